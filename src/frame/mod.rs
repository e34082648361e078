mod ascii;
mod rtu;
mod tcp;

pub use ascii::{calc_lrc, AsciiPackager};
pub use rtu::{calc_crc16, RtuPackager};
pub use tcp::TcpPackager;

use crate::{
    errors::{FrameError, FrameFormatKind, MasterError},
    pdu::{self, ProtocolDataUnit, EXCEPTION_FLAG},
};

/// Packager specifies the communication layer: it frames a PDU into a
/// binding-specific ADU, reverses the framing on a received ADU, and checks
/// that a reply ADU belongs to its request ADU.
pub trait Packager: Send + Sync {
    /// Encode a request PDU into a wire frame, including checksum/header.
    fn encode(&self, pdu: &ProtocolDataUnit) -> Result<Vec<u8>, MasterError>;

    /// Decode a received wire frame back into a PDU, validating integrity.
    ///
    /// An exception reply (`function_code | 0x80` plus one exception-code
    /// byte) surfaces as [`MasterError::Exception`], not as a PDU.
    fn decode(&self, adu: &[u8]) -> Result<ProtocolDataUnit, MasterError>;

    /// Check that `reply_adu` correlates with `request_adu` (unit id,
    /// transaction id or function code, depending on the binding).
    fn verify(&self, request_adu: &[u8], reply_adu: &[u8]) -> Result<(), MasterError>;
}

/// Request payload with the word swap applied when the PDU asks for it.
pub(crate) fn request_payload(pdu: &ProtocolDataUnit) -> Vec<u8> {
    let mut data = pdu.data.clone();
    if pdu.reverse_output_byte_order {
        if let Some(region) = pdu::request_word_region(pdu.function_code, data.len()) {
            pdu::swap_words(&mut data[region]);
        }
    }
    data
}

/// Surface an exception reply as a structured error.
///
/// `function_code` and `data` are the already-unframed reply fields; `frame`
/// is the raw ADU, kept for the malformed-exception error path.
pub(crate) fn reject_exception(
    function_code: u8,
    data: &[u8],
    frame: &[u8],
) -> Result<(), MasterError> {
    if function_code & EXCEPTION_FLAG == 0 {
        return Ok(());
    }

    if data.len() != 1 {
        return Err(FrameError::format(
            FrameFormatKind::InvalidFormat,
            format!(
                "Exception reply carries {} data bytes, expected exactly 1",
                data.len()
            ),
            Some(frame.to_vec()),
        )
        .into());
    }

    Err(MasterError::exception(
        function_code & !EXCEPTION_FLAG,
        data[0],
    ))
}
