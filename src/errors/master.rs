use thiserror::Error;

use super::{
    ConfigError, CorrelationError, ExceptionError, FrameError, RequestError, TransportError,
};

/// Top-level error surfaced to the dispatcher's caller.
///
/// Each variant maps to one failure family: only `Transport` failures are
/// ever retried (inside the transporter), `Exception` is a well-formed
/// protocol reply, everything else is terminal on first occurrence.
#[derive(Error, Debug)]
pub enum MasterError {
    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Correlation error: {0}")]
    Correlation(#[from] CorrelationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{0}")]
    Exception(#[from] ExceptionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl MasterError {
    pub fn exception(function_code: u8, exception_code: u8) -> Self {
        MasterError::Exception(ExceptionError::new(function_code, exception_code))
    }

    /// The exception code, when this error is a protocol exception reply.
    pub fn exception_code(&self) -> Option<u8> {
        match self {
            MasterError::Exception(e) => Some(e.exception_code),
            _ => None,
        }
    }
}
