use std::time::Duration;

use thiserror::Error;
use tokio::time::error::Elapsed;

/// Delivery failures on the transport connection.
///
/// `Io` and `Timeout` are retryable inside the transporter's bounded loop;
/// `NoResponse` and `Cancelled` are terminal.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error during {operation}: {details}")]
    Io {
        operation: IoOperation,
        details: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Attempt timed out after {elapsed:?}, limit was {limit:?}")]
    Timeout {
        elapsed: Duration,
        limit: Duration,
        #[source]
        source: Elapsed,
    },

    #[error("No response received after {attempts} attempts over {elapsed:?}")]
    NoResponse { attempts: u16, elapsed: Duration },

    #[error("Request cancelled after {elapsed:?}")]
    Cancelled { elapsed: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOperation {
    Connect,
    Read,
    Write,
    Flush,
    Drain,
}

impl TransportError {
    pub fn io(operation: IoOperation, details: impl Into<String>, source: std::io::Error) -> Self {
        TransportError::Io {
            operation,
            details: details.into(),
            source,
        }
    }

    /// True for failures worth re-sending the same ADU for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Io { .. } | TransportError::Timeout { .. })
    }
}

impl std::fmt::Display for IoOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Flush => write!(f, "flush"),
            Self::Drain => write!(f, "drain"),
        }
    }
}
