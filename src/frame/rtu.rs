use tracing::trace;

use crate::{
    errors::{CorrelationError, FrameError, FrameSizeKind, MasterError},
    pdu::{ProtocolDataUnit, EXCEPTION_FLAG, MAX_PDU_SIZE},
};

use super::{reject_exception, request_payload, Packager};

/// Calculates the CRC16 checksum for Modbus RTU framing using a lookup
/// table for high performance.
///
/// Polynomial 0xA001 (reflected), initial register 0xFFFF, appended
/// little-endian on the wire.
pub fn calc_crc16(data: &[u8]) -> u16 {
    // Precomputed CRC16 lookup table for polynomial 0xA001 (Modbus standard)
    const CRC16_TABLE: [u16; 256] = [
        0x0000, 0xC0C1, 0xC181, 0x0140, 0xC301, 0x03C0, 0x0280, 0xC241, 0xC601, 0x06C0, 0x0780,
        0xC741, 0x0500, 0xC5C1, 0xC481, 0x0440, 0xCC01, 0x0CC0, 0x0D80, 0xCD41, 0x0F00, 0xCFC1,
        0xCE81, 0x0E40, 0x0A00, 0xCAC1, 0xCB81, 0x0B40, 0xC901, 0x09C0, 0x0880, 0xC841, 0xD801,
        0x18C0, 0x1980, 0xD941, 0x1B00, 0xDBC1, 0xDA81, 0x1A40, 0x1E00, 0xDEC1, 0xDF81, 0x1F40,
        0xDD01, 0x1DC0, 0x1C80, 0xDC41, 0x1400, 0xD4C1, 0xD581, 0x1540, 0xD701, 0x17C0, 0x1680,
        0xD641, 0xD201, 0x12C0, 0x1380, 0xD341, 0x1100, 0xD1C1, 0xD081, 0x1040, 0xF001, 0x30C0,
        0x3180, 0xF141, 0x3300, 0xF3C1, 0xF281, 0x3240, 0x3600, 0xF6C1, 0xF781, 0x3740, 0xF501,
        0x35C0, 0x3480, 0xF441, 0x3C00, 0xFCC1, 0xFD81, 0x3D40, 0xFF01, 0x3FC0, 0x3E80, 0xFE41,
        0xFA01, 0x3AC0, 0x3B80, 0xFB41, 0x3900, 0xF9C1, 0xF881, 0x3840, 0x2800, 0xE8C1, 0xE981,
        0x2940, 0xEB01, 0x2BC0, 0x2A80, 0xEA41, 0xEE01, 0x2EC0, 0x2F80, 0xEF41, 0x2D00, 0xEDC1,
        0xEC81, 0x2C40, 0xE401, 0x24C0, 0x2580, 0xE541, 0x2700, 0xE7C1, 0xE681, 0x2640, 0x2200,
        0xE2C1, 0xE381, 0x2340, 0xE101, 0x21C0, 0x2080, 0xE041, 0xA001, 0x60C0, 0x6180, 0xA141,
        0x6300, 0xA3C1, 0xA281, 0x6240, 0x6600, 0xA6C1, 0xA781, 0x6740, 0xA501, 0x65C0, 0x6480,
        0xA441, 0x6C00, 0xACC1, 0xAD81, 0x6D40, 0xAF01, 0x6FC0, 0x6E80, 0xAE41, 0xAA01, 0x6AC0,
        0x6B80, 0xAB41, 0x6900, 0xA9C1, 0xA881, 0x6840, 0x7800, 0xB8C1, 0xB981, 0x7940, 0xBB01,
        0x7BC0, 0x7A80, 0xBA41, 0xBE01, 0x7EC0, 0x7F80, 0xBF41, 0x7D00, 0xBDC1, 0xBC81, 0x7C40,
        0xB401, 0x74C0, 0x7580, 0xB541, 0x7700, 0xB7C1, 0xB681, 0x7640, 0x7200, 0xB2C1, 0xB381,
        0x7340, 0xB101, 0x71C0, 0x7080, 0xB041, 0x5000, 0x90C1, 0x9181, 0x5140, 0x9301, 0x53C0,
        0x5280, 0x9241, 0x9601, 0x56C0, 0x5780, 0x9741, 0x5500, 0x95C1, 0x9481, 0x5440, 0x9C01,
        0x5CC0, 0x5D80, 0x9D41, 0x5F00, 0x9FC1, 0x9E81, 0x5E40, 0x5A00, 0x9AC1, 0x9B81, 0x5B40,
        0x9901, 0x59C0, 0x5880, 0x9841, 0x8801, 0x48C0, 0x4980, 0x8941, 0x4B00, 0x8BC1, 0x8A81,
        0x4A40, 0x4E00, 0x8EC1, 0x8F81, 0x4F40, 0x8D01, 0x4DC0, 0x4C80, 0x8C41, 0x4400, 0x84C1,
        0x8581, 0x4540, 0x8701, 0x47C0, 0x4680, 0x8641, 0x8201, 0x42C0, 0x4380, 0x8341, 0x4100,
        0x81C1, 0x8081, 0x4040,
    ];

    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        let index = ((crc ^ byte as u16) & 0x00FF) as usize;
        crc = (crc >> 8) ^ CRC16_TABLE[index];
    }

    crc
}

/// Serial binary (RTU) framing: `unitId | functionCode | data | crc16_le`.
#[derive(Debug, Clone)]
pub struct RtuPackager {
    unit_id: u8,
}

impl RtuPackager {
    pub fn new(unit_id: u8) -> Self {
        Self { unit_id }
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }
}

impl Packager for RtuPackager {
    fn encode(&self, pdu: &ProtocolDataUnit) -> Result<Vec<u8>, MasterError> {
        if 1 + pdu.data.len() > MAX_PDU_SIZE {
            return Err(FrameError::size(
                FrameSizeKind::TooLong,
                format!("PDU data too long: {} bytes", pdu.data.len()),
                None,
            )
            .into());
        }

        let mut adu = Vec::with_capacity(pdu.data.len() + 4);
        adu.push(self.unit_id);
        adu.push(pdu.function_code);
        adu.extend_from_slice(&request_payload(pdu));

        let crc = calc_crc16(&adu);
        adu.extend_from_slice(&crc.to_le_bytes());

        trace!("RTU TX: {:02X?}, crc={:04X}", &adu[..adu.len() - 2], crc);

        Ok(adu)
    }

    fn decode(&self, adu: &[u8]) -> Result<ProtocolDataUnit, MasterError> {
        if adu.len() < 4 {
            return Err(FrameError::size(
                FrameSizeKind::TooShort,
                format!("RTU frame too short: {} bytes", adu.len()),
                Some(adu.to_vec()),
            )
            .into());
        }

        let calculated = calc_crc16(&adu[..adu.len() - 2]);
        let received = u16::from_le_bytes([adu[adu.len() - 2], adu[adu.len() - 1]]);

        if calculated != received {
            return Err(FrameError::Crc {
                calculated,
                received,
                frame_hex: hex::encode(&adu[..adu.len() - 2]),
            }
            .into());
        }

        let function_code = adu[1];
        let data = &adu[2..adu.len() - 2];

        reject_exception(function_code, data, adu)?;

        trace!("RTU RX: {:02X?}", &adu[..adu.len() - 2]);

        Ok(ProtocolDataUnit::new(function_code, data.to_vec()))
    }

    fn verify(&self, request_adu: &[u8], reply_adu: &[u8]) -> Result<(), MasterError> {
        if request_adu.len() < 2 || reply_adu.len() < 2 {
            return Err(FrameError::size(
                FrameSizeKind::TooShort,
                "ADU shorter than unit id + function code".to_string(),
                None,
            )
            .into());
        }

        if request_adu[0] != reply_adu[0] {
            return Err(CorrelationError::UnitId {
                request: request_adu[0],
                reply: reply_adu[0],
            }
            .into());
        }

        if request_adu[1] != reply_adu[1] & !EXCEPTION_FLAG {
            return Err(CorrelationError::FunctionCode {
                request: request_adu[1],
                reply: reply_adu[1],
            }
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ILLEGAL_DATA_ADDRESS;

    #[test]
    fn test_crc16_reference_vectors() {
        // Read one holding register from unit 1: wire CRC bytes 84 0A
        assert_eq!(calc_crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), 0x0A84);
        // Read ten holding registers from unit 1: wire CRC bytes C5 CD
        assert_eq!(calc_crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xCDC5);
    }

    #[test]
    fn test_encode_appends_crc_little_endian() {
        let packager = RtuPackager::new(0x01);
        let pdu = ProtocolDataUnit::new(0x03, vec![0x00, 0x00, 0x00, 0x01]);
        let adu = packager.encode(&pdu).unwrap();
        assert_eq!(adu, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
    }

    #[test]
    fn test_decode_round_trip() {
        let packager = RtuPackager::new(0x11);
        let pdu = ProtocolDataUnit::new(0x03, vec![0x04, 0x00, 0x2A, 0x01, 0x02]);
        let adu = packager.encode(&pdu).unwrap();
        let decoded = packager.decode(&adu).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn test_decode_rejects_single_bit_corruption() {
        let packager = RtuPackager::new(0x01);
        let pdu = ProtocolDataUnit::new(0x03, vec![0x02, 0x12, 0x34]);
        let adu = packager.encode(&pdu).unwrap();

        for byte in 0..adu.len() {
            for bit in 0..8 {
                let mut corrupted = adu.clone();
                corrupted[byte] ^= 1 << bit;
                let err = packager.decode(&corrupted).unwrap_err();
                assert!(
                    matches!(err, MasterError::Frame(FrameError::Crc { .. })),
                    "byte {byte} bit {bit} slipped through: {err}"
                );
            }
        }
    }

    #[test]
    fn test_decode_exception_reply() {
        let packager = RtuPackager::new(0x01);
        let mut adu = vec![0x01, 0x83, 0x02];
        let crc = calc_crc16(&adu);
        adu.extend_from_slice(&crc.to_le_bytes());

        let err = packager.decode(&adu).unwrap_err();
        match err {
            MasterError::Exception(e) => {
                assert_eq!(e.function_code, 0x03);
                assert_eq!(e.exception_code, ILLEGAL_DATA_ADDRESS);
                assert!(e.to_string().contains("illegal data address"));
            }
            other => panic!("Expected exception, got {other}"),
        }
    }

    #[test]
    fn test_verify_unit_id_mismatch() {
        let packager = RtuPackager::new(0x01);
        let request = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A];
        let reply = [0x02, 0x03, 0x02, 0x00, 0x2A, 0x00, 0x00];

        let err = packager.verify(&request, &reply).unwrap_err();
        assert!(matches!(
            err,
            MasterError::Correlation(CorrelationError::UnitId { .. })
        ));
    }

    #[test]
    fn test_verify_accepts_exception_function_code() {
        let packager = RtuPackager::new(0x01);
        let request = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A];
        let reply = [0x01, 0x83, 0x02, 0x00, 0x00];
        assert!(packager.verify(&request, &reply).is_ok());
    }

    #[test]
    fn test_encode_applies_word_swap_on_request() {
        let packager = RtuPackager::new(0x01);
        let mut pdu = ProtocolDataUnit::new(0x06, vec![0x00, 0x10, 0x12, 0x34]);
        pdu.reverse_output_byte_order = true;
        let adu = packager.encode(&pdu).unwrap();
        // Address untouched, value word swapped
        assert_eq!(&adu[2..6], &[0x00, 0x10, 0x34, 0x12]);
    }
}
