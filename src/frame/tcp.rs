use std::sync::atomic::{AtomicU16, Ordering};

use tracing::trace;

use crate::{
    errors::{CorrelationError, FrameError, FrameFormatKind, FrameSizeKind, MasterError},
    pdu::{ProtocolDataUnit, MAX_PDU_SIZE},
};

use super::{reject_exception, request_payload, Packager};

/// MBAP header: transaction id(2) + protocol id(2) + length(2) + unit id(1).
const MBAP_HEADER_SIZE: usize = 7;
const PROTOCOL_ID: u16 = 0;

/// Socket framing (Modbus TCP): MBAP header followed by the bare PDU.
///
/// The transaction id increments per request on the owning packager, so one
/// packager instance belongs to one link.
#[derive(Debug)]
pub struct TcpPackager {
    unit_id: u8,
    transaction_id: AtomicU16,
}

impl TcpPackager {
    pub fn new(unit_id: u8) -> Self {
        Self {
            unit_id,
            transaction_id: AtomicU16::new(1),
        }
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    fn next_transaction_id(&self) -> u16 {
        // fetch_add wraps on overflow, which is fine for a correlation token
        self.transaction_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Packager for TcpPackager {
    fn encode(&self, pdu: &ProtocolDataUnit) -> Result<Vec<u8>, MasterError> {
        if 1 + pdu.data.len() > MAX_PDU_SIZE {
            return Err(FrameError::size(
                FrameSizeKind::TooLong,
                format!("PDU data too long: {} bytes", pdu.data.len()),
                None,
            )
            .into());
        }

        let transaction_id = self.next_transaction_id();
        let length = (2 + pdu.data.len()) as u16; // unit id + function code + data

        let mut adu = Vec::with_capacity(MBAP_HEADER_SIZE + 1 + pdu.data.len());
        adu.extend_from_slice(&transaction_id.to_be_bytes());
        adu.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
        adu.extend_from_slice(&length.to_be_bytes());
        adu.push(self.unit_id);
        adu.push(pdu.function_code);
        adu.extend_from_slice(&request_payload(pdu));

        trace!("TCP TX: txn={:04X}, {:02X?}", transaction_id, &adu);

        Ok(adu)
    }

    fn decode(&self, adu: &[u8]) -> Result<ProtocolDataUnit, MasterError> {
        if adu.len() < MBAP_HEADER_SIZE + 1 {
            return Err(FrameError::size(
                FrameSizeKind::TooShort,
                format!("MBAP frame too short: {} bytes", adu.len()),
                Some(adu.to_vec()),
            )
            .into());
        }

        let protocol_id = u16::from_be_bytes([adu[2], adu[3]]);
        if protocol_id != PROTOCOL_ID {
            return Err(FrameError::format(
                FrameFormatKind::InvalidHeader,
                format!("Invalid protocol id: {protocol_id:#06X}"),
                Some(adu.to_vec()),
            )
            .into());
        }

        let length = u16::from_be_bytes([adu[4], adu[5]]) as usize;
        if length != adu.len() - 6 {
            return Err(FrameError::size(
                FrameSizeKind::LengthMismatch,
                format!(
                    "MBAP length field {} does not match {} remaining bytes",
                    length,
                    adu.len() - 6
                ),
                Some(adu.to_vec()),
            )
            .into());
        }

        let function_code = adu[7];
        let data = &adu[8..];

        reject_exception(function_code, data, adu)?;

        trace!("TCP RX: {:02X?}", adu);

        Ok(ProtocolDataUnit::new(function_code, data.to_vec()))
    }

    fn verify(&self, request_adu: &[u8], reply_adu: &[u8]) -> Result<(), MasterError> {
        if request_adu.len() < MBAP_HEADER_SIZE || reply_adu.len() < MBAP_HEADER_SIZE {
            return Err(FrameError::size(
                FrameSizeKind::TooShort,
                "ADU shorter than the MBAP header".to_string(),
                None,
            )
            .into());
        }

        let request_txn = u16::from_be_bytes([request_adu[0], request_adu[1]]);
        let reply_txn = u16::from_be_bytes([reply_adu[0], reply_adu[1]]);

        if request_txn != reply_txn {
            return Err(CorrelationError::TransactionId {
                request: request_txn,
                reply: reply_txn,
            }
            .into());
        }

        if request_adu[6] != reply_adu[6] {
            return Err(CorrelationError::UnitId {
                request: request_adu[6],
                reply: reply_adu[6],
            }
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ILLEGAL_FUNCTION;

    #[test]
    fn test_encode_layout_and_transaction_increment() {
        let packager = TcpPackager::new(0x11);
        let pdu = ProtocolDataUnit::new(0x03, vec![0x00, 0x6B, 0x00, 0x03]);

        let first = packager.encode(&pdu).unwrap();
        assert_eq!(
            first,
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]
        );

        let second = packager.encode(&pdu).unwrap();
        assert_eq!(&second[..2], &[0x00, 0x02]);
    }

    #[test]
    fn test_decode_round_trip() {
        let packager = TcpPackager::new(0x01);
        let pdu = ProtocolDataUnit::new(0x04, vec![0x02, 0x12, 0x34]);

        // Replies reuse the request layout
        let adu = packager.encode(&pdu).unwrap();
        assert_eq!(packager.decode(&adu).unwrap(), pdu);
    }

    #[test]
    fn test_decode_rejects_nonzero_protocol_id() {
        let packager = TcpPackager::new(0x01);
        let adu = vec![0x00, 0x01, 0x00, 0x01, 0x00, 0x03, 0x01, 0x03, 0x00];
        let err = packager.decode(&adu).unwrap_err();
        assert!(matches!(
            err,
            MasterError::Frame(FrameError::Format {
                kind: FrameFormatKind::InvalidHeader,
                ..
            })
        ));
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let packager = TcpPackager::new(0x01);
        let adu = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x09, 0x01, 0x03, 0x00];
        let err = packager.decode(&adu).unwrap_err();
        assert!(matches!(
            err,
            MasterError::Frame(FrameError::Size {
                kind: FrameSizeKind::LengthMismatch,
                ..
            })
        ));
    }

    #[test]
    fn test_decode_exception_reply() {
        let packager = TcpPackager::new(0x01);
        let adu = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x81, 0x01];
        let err = packager.decode(&adu).unwrap_err();
        match err {
            MasterError::Exception(e) => {
                assert_eq!(e.function_code, 0x01);
                assert_eq!(e.exception_code, ILLEGAL_FUNCTION);
            }
            other => panic!("Expected exception, got {other}"),
        }
    }

    #[test]
    fn test_verify_rejects_transaction_id_mismatch() {
        let packager = TcpPackager::new(0x01);
        let request = vec![0x00, 0x05, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        // Well-formed reply, wrong transaction id
        let reply = vec![0x00, 0x06, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x2A];

        let err = packager.verify(&request, &reply).unwrap_err();
        assert!(matches!(
            err,
            MasterError::Correlation(CorrelationError::TransactionId { .. })
        ));
    }

    #[test]
    fn test_verify_rejects_unit_id_mismatch() {
        let packager = TcpPackager::new(0x01);
        let request = vec![0x00, 0x05, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        let reply = vec![0x00, 0x05, 0x00, 0x00, 0x00, 0x05, 0x02, 0x03, 0x02, 0x00, 0x2A];

        let err = packager.verify(&request, &reply).unwrap_err();
        assert!(matches!(
            err,
            MasterError::Correlation(CorrelationError::UnitId { .. })
        ));
    }
}
