use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::errors::{
    FrameError, FrameFormatKind, FrameSizeKind, IoOperation, MasterError, TransportError,
};
use crate::pdu::{
    DIAGNOSTICS, EXCEPTION_FLAG, GET_COMM_EVENT_COUNTER, GET_COMM_EVENT_LOG, READ_COILS,
    READ_DISCRETE_INPUTS, READ_EXCEPTION_STATUS, READ_HOLDING_REGISTERS, READ_INPUT_REGISTERS,
    WRITE_MULTIPLE_COILS, WRITE_MULTIPLE_REGISTERS, WRITE_SINGLE_COIL, WRITE_SINGLE_REGISTER,
};

use super::{FrameFormat, Transporter};

/// Quiet window after which a resynchronizing drain considers the line idle.
const DRAIN_WINDOW: Duration = Duration::from_millis(50);

/// Upper bound on stale bytes discarded in one drain pass.
const DRAIN_LIMIT: usize = 4096;

struct Session<S> {
    stream: S,
    /// Set after a timed-out or cancelled attempt: the device may still
    /// deliver a late reply, which must not be read as the next call's.
    needs_resync: bool,
}

/// Reliable delivery over an already-established byte stream.
///
/// The inner mutex serializes callers per connection, so at most one
/// request is in flight at a time; a second caller blocks until the first
/// send-retry-receive cycle completes.
pub struct StreamTransport<S> {
    session: Mutex<Session<S>>,
    format: FrameFormat,
    max_frame_size: usize,
}

impl StreamTransport<TcpStream> {
    /// Connect a socket-framed transport to a Modbus TCP endpoint.
    pub async fn tcp(addr: impl ToSocketAddrs) -> Result<Self, MasterError> {
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            MasterError::Transport(TransportError::io(
                IoOperation::Connect,
                "Failed to connect",
                e,
            ))
        })?;
        Ok(Self::new(stream, FrameFormat::Tcp))
    }
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, format: FrameFormat) -> Self {
        Self {
            session: Mutex::new(Session {
                stream,
                needs_resync: false,
            }),
            format,
            max_frame_size: format.max_frame_size(),
        }
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn into_inner(self) -> S {
        self.session.into_inner().stream
    }

    /// One delivery attempt: write the request, then read a complete reply
    /// frame as delimited by the binding.
    async fn attempt(
        stream: &mut S,
        adu: &[u8],
        format: FrameFormat,
        max_frame_size: usize,
    ) -> Result<Vec<u8>, MasterError> {
        stream.write_all(adu).await.map_err(|e| {
            MasterError::Transport(TransportError::io(
                IoOperation::Write,
                "Failed to write request",
                e,
            ))
        })?;
        stream.flush().await.map_err(|e| {
            MasterError::Transport(TransportError::io(
                IoOperation::Flush,
                "Failed to flush request",
                e,
            ))
        })?;

        match format {
            FrameFormat::Tcp => read_tcp_frame(stream, max_frame_size).await,
            FrameFormat::Ascii => read_ascii_frame(stream, max_frame_size).await,
            FrameFormat::Rtu => read_rtu_frame(stream, adu).await,
        }
    }
}

impl<S> Transporter for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(
        &self,
        adu: &[u8],
        wait_times: u8,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MasterError> {
        if adu.len() > self.max_frame_size {
            return Err(FrameError::size(
                FrameSizeKind::TooLong,
                format!("Request frame too long: {} bytes", adu.len()),
                Some(adu.to_vec()),
            )
            .into());
        }

        let start = Instant::now();

        let mut session = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(TransportError::Cancelled {
                    elapsed: start.elapsed(),
                }
                .into());
            }
            guard = self.session.lock() => guard,
        };
        let session = &mut *session;

        // Counts up to wait_times + 1 deliveries, so it must be wider
        // than the u8 parameter
        let total_attempts = wait_times as u16 + 1;
        let mut attempt: u16 = 0;

        loop {
            attempt += 1;
            debug!(
                "Attempt {}/{}: sending {} bytes",
                attempt,
                total_attempts,
                adu.len()
            );

            if session.needs_resync {
                drain_stale(&mut session.stream).await?;
                session.needs_resync = false;
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => None,
                result = tokio::time::timeout(
                    timeout,
                    Self::attempt(&mut session.stream, adu, self.format, self.max_frame_size),
                ) => Some(result),
            };

            let Some(outcome) = outcome else {
                session.needs_resync = true;
                return Err(TransportError::Cancelled {
                    elapsed: start.elapsed(),
                }
                .into());
            };

            match outcome {
                Ok(Ok(reply)) => {
                    trace!("RX: {} bytes: {:02X?}", reply.len(), reply);
                    return Ok(reply);
                }
                Ok(Err(MasterError::Transport(e))) if e.is_retryable() => {
                    session.needs_resync = true;
                    warn!("Attempt {attempt}/{total_attempts} failed: {e}");
                }
                // Framing failures are not the transport's to retry
                Ok(Err(other)) => return Err(other),
                Err(elapsed) => {
                    session.needs_resync = true;
                    let e = TransportError::Timeout {
                        elapsed: start.elapsed(),
                        limit: timeout,
                        source: elapsed,
                    };
                    warn!("Attempt {attempt}/{total_attempts} failed: {e}");
                }
            }

            if attempt > wait_times as u16 {
                return Err(TransportError::NoResponse {
                    attempts: attempt,
                    elapsed: start.elapsed(),
                }
                .into());
            }
        }
    }
}

/// Discard stale bytes left over from an abandoned attempt, until the line
/// stays quiet for [`DRAIN_WINDOW`].
async fn drain_stale<S: AsyncRead + Unpin>(stream: &mut S) -> Result<(), MasterError> {
    let mut buf = [0u8; 256];
    let mut discarded = 0usize;

    loop {
        match tokio::time::timeout(DRAIN_WINDOW, stream.read(&mut buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                discarded += n;
                if discarded >= DRAIN_LIMIT {
                    warn!("Drain limit reached with {} stale bytes", discarded);
                    break;
                }
            }
            Ok(Err(e)) => {
                return Err(MasterError::Transport(TransportError::io(
                    IoOperation::Drain,
                    "Failed to drain stale bytes",
                    e,
                )));
            }
            Err(_) => break,
        }
    }

    if discarded > 0 {
        debug!("Discarded {} stale bytes before resend", discarded);
    }

    Ok(())
}

async fn read_tcp_frame<S: AsyncRead + Unpin>(
    stream: &mut S,
    max_frame_size: usize,
) -> Result<Vec<u8>, MasterError> {
    let mut header = [0u8; 7];
    stream.read_exact(&mut header).await.map_err(|e| {
        MasterError::Transport(TransportError::io(
            IoOperation::Read,
            "Failed to read MBAP header",
            e,
        ))
    })?;

    let length = u16::from_be_bytes([header[4], header[5]]) as usize;
    if length < 2 {
        return Err(FrameError::size(
            FrameSizeKind::TooShort,
            format!("MBAP length field too small: {length}"),
            Some(header.to_vec()),
        )
        .into());
    }
    if 6 + length > max_frame_size {
        return Err(FrameError::size(
            FrameSizeKind::TooLong,
            format!("MBAP length field too large: {length}"),
            Some(header.to_vec()),
        )
        .into());
    }

    let mut frame = header.to_vec();
    frame.resize(6 + length, 0);
    // The unit id was consumed with the header
    stream.read_exact(&mut frame[7..]).await.map_err(|e| {
        MasterError::Transport(TransportError::io(
            IoOperation::Read,
            "Failed to read MBAP body",
            e,
        ))
    })?;

    Ok(frame)
}

async fn read_ascii_frame<S: AsyncRead + Unpin>(
    stream: &mut S,
    max_frame_size: usize,
) -> Result<Vec<u8>, MasterError> {
    let mut frame = Vec::with_capacity(32);
    let mut byte = [0u8; 1];

    loop {
        let n = stream.read(&mut byte).await.map_err(|e| {
            MasterError::Transport(TransportError::io(
                IoOperation::Read,
                "Failed to read ASCII frame",
                e,
            ))
        })?;
        if n == 0 {
            return Err(MasterError::Transport(TransportError::io(
                IoOperation::Read,
                "Connection closed mid-frame",
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "EOF"),
            )));
        }

        frame.push(byte[0]);
        if frame.len() > max_frame_size {
            return Err(FrameError::size(
                FrameSizeKind::TooLong,
                format!("ASCII frame exceeds {max_frame_size} bytes without CRLF"),
                Some(frame),
            )
            .into());
        }

        if frame.len() >= 2 && frame[frame.len() - 2..] == *b"\r\n" {
            return Ok(frame);
        }
    }
}

/// Read one RTU frame, sized from its own leading bytes.
///
/// Byte-count-prefixed replies carry their length in the third byte; echo
/// replies have a fixed shape; a diagnostics reply echoes the request.
async fn read_rtu_frame<S: AsyncRead + Unpin>(
    stream: &mut S,
    request: &[u8],
) -> Result<Vec<u8>, MasterError> {
    let mut frame = vec![0u8; 2];
    stream.read_exact(&mut frame).await.map_err(|e| {
        MasterError::Transport(TransportError::io(
            IoOperation::Read,
            "Failed to read RTU frame start",
            e,
        ))
    })?;

    let function_code = frame[1];
    let remaining = if function_code & EXCEPTION_FLAG != 0 {
        // exception code + CRC
        3
    } else {
        match function_code {
            READ_COILS | READ_DISCRETE_INPUTS | READ_HOLDING_REGISTERS | READ_INPUT_REGISTERS
            | GET_COMM_EVENT_LOG => {
                let mut count = [0u8; 1];
                stream.read_exact(&mut count).await.map_err(|e| {
                    MasterError::Transport(TransportError::io(
                        IoOperation::Read,
                        "Failed to read RTU byte count",
                        e,
                    ))
                })?;
                frame.push(count[0]);
                count[0] as usize + 2
            }
            // address/value echo + CRC
            WRITE_SINGLE_COIL | WRITE_SINGLE_REGISTER | WRITE_MULTIPLE_COILS
            | WRITE_MULTIPLE_REGISTERS => 6,
            // status byte + CRC
            READ_EXCEPTION_STATUS => 3,
            // status word + event count + CRC
            GET_COMM_EVENT_COUNTER => 6,
            // the reply echoes the request frame
            DIAGNOSTICS => request.len().saturating_sub(2),
            other => {
                return Err(FrameError::format(
                    FrameFormatKind::UnexpectedResponse,
                    format!("Cannot size RTU reply for function {other:#04X}"),
                    Some(frame),
                )
                .into());
            }
        }
    };

    let start = frame.len();
    frame.resize(start + remaining, 0);
    stream.read_exact(&mut frame[start..]).await.map_err(|e| {
        MasterError::Transport(TransportError::io(
            IoOperation::Read,
            "Failed to read RTU frame body",
            e,
        ))
    })?;

    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::calc_crc16;

    fn tcp_request() -> Vec<u8> {
        vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01]
    }

    fn tcp_reply() -> Vec<u8> {
        vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x2A]
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_returns_complete_tcp_frame() {
        let (local, mut remote) = tokio::io::duplex(4096);
        let transport = StreamTransport::new(local, FrameFormat::Tcp);
        let cancel = CancellationToken::new();

        remote.write_all(&tcp_reply()).await.unwrap();

        let request = tcp_request();
        let reply = transport
            .send(&request, 2, Duration::from_millis(500), &cancel)
            .await
            .unwrap();
        assert_eq!(reply, tcp_reply());

        let mut echoed = vec![0u8; request.len()];
        remote.read_exact(&mut echoed).await.unwrap();
        assert_eq!(echoed, request);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_retries_and_exhausts() {
        let (local, mut remote) = tokio::io::duplex(4096);
        let transport = StreamTransport::new(local, FrameFormat::Tcp);
        let cancel = CancellationToken::new();

        let request = tcp_request();
        let err = transport
            .send(&request, 2, Duration::from_millis(100), &cancel)
            .await
            .unwrap_err();

        match err {
            MasterError::Transport(TransportError::NoResponse { attempts, .. }) => {
                assert_eq!(attempts, 3);
            }
            other => panic!("Expected NoResponse, got {other}"),
        }

        // Exactly three copies of the same request went out
        let mut sent = vec![0u8; request.len() * 3];
        remote.read_exact(&mut sent).await.unwrap();
        for chunk in sent.chunks(request.len()) {
            assert_eq!(chunk, request.as_slice());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_counts_max_wait_times_without_wrapping() {
        let (local, remote) = tokio::io::duplex(4096);
        // Dropping the remote end makes every write fail fast with a
        // retryable I/O error
        drop(remote);
        let transport = StreamTransport::new(local, FrameFormat::Tcp);
        let cancel = CancellationToken::new();

        let err = transport
            .send(&tcp_request(), u8::MAX, Duration::from_millis(100), &cancel)
            .await
            .unwrap_err();

        match err {
            MasterError::Transport(TransportError::NoResponse { attempts, .. }) => {
                assert_eq!(attempts, u8::MAX as u16 + 1);
            }
            other => panic!("Expected NoResponse, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_observes_pre_cancellation() {
        let (local, _remote) = tokio::io::duplex(4096);
        let transport = StreamTransport::new(local, FrameFormat::Tcp);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = transport
            .send(&tcp_request(), 2, Duration::from_millis(100), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MasterError::Transport(TransportError::Cancelled { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_cancelled_while_awaiting_reply() {
        let (local, _remote) = tokio::io::duplex(4096);
        let transport = StreamTransport::new(local, FrameFormat::Tcp);
        let cancel = CancellationToken::new();

        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });

        let err = transport
            .send(&tcp_request(), 0, Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MasterError::Transport(TransportError::Cancelled { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_reply_is_drained_not_returned() {
        let (local, mut remote) = tokio::io::duplex(4096);
        let transport = StreamTransport::new(local, FrameFormat::Tcp);
        let cancel = CancellationToken::new();

        // First call times out with nothing on the line
        let err = transport
            .send(&tcp_request(), 0, Duration::from_millis(100), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MasterError::Transport(TransportError::NoResponse { .. })
        ));

        // The late reply lands after the call gave up
        remote.write_all(&tcp_reply()).await.unwrap();

        // The next call must not pick it up as its own reply
        let err = transport
            .send(&tcp_request(), 0, Duration::from_millis(100), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MasterError::Transport(TransportError::NoResponse { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rtu_reply_sized_from_byte_count() {
        let (local, mut remote) = tokio::io::duplex(4096);
        let transport = StreamTransport::new(local, FrameFormat::Rtu);
        let cancel = CancellationToken::new();

        let mut reply = vec![0x01, 0x03, 0x02, 0x12, 0x34];
        let crc = calc_crc16(&reply);
        reply.extend_from_slice(&crc.to_le_bytes());

        // Trailing garbage must not be folded into the frame
        remote.write_all(&reply).await.unwrap();
        remote.write_all(&[0xDE, 0xAD]).await.unwrap();

        let mut request = vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        let crc = calc_crc16(&request);
        request.extend_from_slice(&crc.to_le_bytes());

        let got = transport
            .send(&request, 0, Duration::from_millis(500), &cancel)
            .await
            .unwrap();
        assert_eq!(got, reply);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rtu_exception_reply_sized_without_byte_count() {
        let (local, mut remote) = tokio::io::duplex(4096);
        let transport = StreamTransport::new(local, FrameFormat::Rtu);
        let cancel = CancellationToken::new();

        let mut reply = vec![0x01, 0x83, 0x02];
        let crc = calc_crc16(&reply);
        reply.extend_from_slice(&crc.to_le_bytes());
        remote.write_all(&reply).await.unwrap();

        let mut request = vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        let crc = calc_crc16(&request);
        request.extend_from_slice(&crc.to_le_bytes());

        let got = transport
            .send(&request, 0, Duration::from_millis(500), &cancel)
            .await
            .unwrap();
        assert_eq!(got, reply);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ascii_reply_read_until_crlf() {
        let (local, mut remote) = tokio::io::duplex(4096);
        let transport = StreamTransport::new(local, FrameFormat::Ascii);
        let cancel = CancellationToken::new();

        remote.write_all(b":010302002AD0\r\n").await.unwrap();

        let got = transport
            .send(b":010300000001FB\r\n", 0, Duration::from_millis(500), &cancel)
            .await
            .unwrap();
        assert_eq!(got, b":010302002AD0\r\n".to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_request_rejected_before_io() {
        let (local, _remote) = tokio::io::duplex(4096);
        let transport = StreamTransport::new(local, FrameFormat::Rtu);
        let cancel = CancellationToken::new();

        let err = transport
            .send(&[0u8; 300], 0, Duration::from_millis(100), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MasterError::Frame(FrameError::Size {
                kind: FrameSizeKind::TooLong,
                ..
            })
        ));
    }
}
