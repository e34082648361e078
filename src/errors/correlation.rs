use thiserror::Error;

/// Request/reply correlation mismatches reported by `Packager::verify`.
///
/// Distinct from [`crate::errors::FrameError`]: the reply frame itself is
/// intact, it just does not belong to the request it arrived for.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("Unit id mismatch: request={request:#04X}, reply={reply:#04X}")]
    UnitId { request: u8, reply: u8 },

    #[error("Transaction id mismatch: request={request:#06X}, reply={reply:#06X}")]
    TransactionId { request: u16, reply: u16 },

    #[error("Function code mismatch: request={request:#04X}, reply={reply:#04X}")]
    FunctionCode { request: u8, reply: u8 },
}
