mod stream;

pub use stream::StreamTransport;

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::MasterError;

/// Wire framing family, used by the transporter to delimit reply frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Rtu,
    Ascii,
    Tcp,
}

impl FrameFormat {
    /// Largest legal ADU for the binding.
    pub fn max_frame_size(&self) -> usize {
        match self {
            // unit id + PDU + CRC
            FrameFormat::Rtu => 256,
            // ':' + hex-encoded unit id + PDU + LRC + CRLF
            FrameFormat::Ascii => 513,
            // MBAP header + PDU
            FrameFormat::Tcp => 260,
        }
    }
}

/// Transporter specifies the transport layer.
pub trait Transporter: Send + Sync {
    /// Write `adu` and return the complete reply frame.
    ///
    /// `timeout` bounds a single attempt; on an attempt timeout or I/O
    /// failure the same ADU is re-sent up to `wait_times` additional times.
    /// Cancelling `cancel` aborts pending I/O and fails with a cancellation
    /// error distinct from a timeout.
    fn send(
        &self,
        adu: &[u8],
        wait_times: u8,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<u8>, MasterError>> + Send;
}
