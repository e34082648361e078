use tracing::trace;

use crate::{
    errors::{CorrelationError, FrameError, FrameFormatKind, FrameSizeKind, MasterError},
    pdu::{ProtocolDataUnit, EXCEPTION_FLAG, MAX_PDU_SIZE},
};

use super::{reject_exception, request_payload, Packager};

const FRAME_START: u8 = b':';
const FRAME_END: &[u8] = b"\r\n";

/// LRC: two's complement of the byte sum, modulo 256.
pub fn calc_lrc(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    0u8.wrapping_sub(sum)
}

/// Serial text (ASCII) framing: `:` + uppercase hex of
/// `unitId, functionCode, data, LRC` + CRLF.
#[derive(Debug, Clone)]
pub struct AsciiPackager {
    unit_id: u8,
}

impl AsciiPackager {
    pub fn new(unit_id: u8) -> Self {
        Self { unit_id }
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    /// Strip the `:` / CRLF delimiters and hex-decode the payload.
    fn unframe(&self, adu: &[u8]) -> Result<Vec<u8>, MasterError> {
        // ':' + hex(unit, function, lrc) + CRLF
        if adu.len() < 9 {
            return Err(FrameError::size(
                FrameSizeKind::TooShort,
                format!("ASCII frame too short: {} bytes", adu.len()),
                Some(adu.to_vec()),
            )
            .into());
        }

        if adu[0] != FRAME_START {
            return Err(FrameError::format(
                FrameFormatKind::InvalidHeader,
                "ASCII frame does not start with ':'".to_string(),
                Some(adu.to_vec()),
            )
            .into());
        }

        if &adu[adu.len() - 2..] != FRAME_END {
            return Err(FrameError::format(
                FrameFormatKind::InvalidFormat,
                "ASCII frame does not end with CRLF".to_string(),
                Some(adu.to_vec()),
            )
            .into());
        }

        hex::decode(&adu[1..adu.len() - 2]).map_err(|e| {
            FrameError::format(
                FrameFormatKind::InvalidFormat,
                format!("ASCII frame payload is not valid hex: {e}"),
                Some(adu.to_vec()),
            )
            .into()
        })
    }
}

impl Packager for AsciiPackager {
    fn encode(&self, pdu: &ProtocolDataUnit) -> Result<Vec<u8>, MasterError> {
        if 1 + pdu.data.len() > MAX_PDU_SIZE {
            return Err(FrameError::size(
                FrameSizeKind::TooLong,
                format!("PDU data too long: {} bytes", pdu.data.len()),
                None,
            )
            .into());
        }

        let mut raw = Vec::with_capacity(pdu.data.len() + 3);
        raw.push(self.unit_id);
        raw.push(pdu.function_code);
        raw.extend_from_slice(&request_payload(pdu));
        raw.push(calc_lrc(&raw));

        let mut adu = Vec::with_capacity(raw.len() * 2 + 3);
        adu.push(FRAME_START);
        adu.extend_from_slice(hex::encode_upper(&raw).as_bytes());
        adu.extend_from_slice(FRAME_END);

        trace!("ASCII TX: {}", String::from_utf8_lossy(&adu[..adu.len() - 2]));

        Ok(adu)
    }

    fn decode(&self, adu: &[u8]) -> Result<ProtocolDataUnit, MasterError> {
        let raw = self.unframe(adu)?;
        if raw.len() < 3 {
            return Err(FrameError::size(
                FrameSizeKind::TooShort,
                format!("ASCII frame payload too short: {} bytes", raw.len()),
                Some(adu.to_vec()),
            )
            .into());
        }

        let calculated = calc_lrc(&raw[..raw.len() - 1]);
        let received = raw[raw.len() - 1];

        if calculated != received {
            return Err(FrameError::Lrc {
                calculated,
                received,
                frame_hex: hex::encode(&raw[..raw.len() - 1]),
            }
            .into());
        }

        let function_code = raw[1];
        let data = &raw[2..raw.len() - 1];

        reject_exception(function_code, data, adu)?;

        trace!("ASCII RX: {:02X?}", &raw[..raw.len() - 1]);

        Ok(ProtocolDataUnit::new(function_code, data.to_vec()))
    }

    fn verify(&self, request_adu: &[u8], reply_adu: &[u8]) -> Result<(), MasterError> {
        let request = self.unframe(request_adu)?;
        let reply = self.unframe(reply_adu)?;

        if request.len() < 3 || reply.len() < 3 {
            return Err(FrameError::size(
                FrameSizeKind::TooShort,
                "ASCII frame shorter than unit id + function code + LRC".to_string(),
                None,
            )
            .into());
        }

        if request[0] != reply[0] {
            return Err(CorrelationError::UnitId {
                request: request[0],
                reply: reply[0],
            }
            .into());
        }

        if request[1] != reply[1] & !EXCEPTION_FLAG {
            return Err(CorrelationError::FunctionCode {
                request: request[1],
                reply: reply[1],
            }
            .into());
        }

        Ok(())
    }
}
