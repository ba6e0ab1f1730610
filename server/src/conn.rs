//! Frame-level connection I/O with idle-timeout enforcement.
//!
//! Wraps a byte stream and exchanges whole [`Frame`]s. Every completed
//! transfer pushes the idle deadline 15 minutes (by default) into the
//! future; a connection that stays silent past the deadline fails its next
//! read with [`ConnError::IdleTimeout`], which the worker treats exactly
//! like a peer disconnect.
//!
//! Short reads are buffered and resumed, never discarded: header and body
//! transfers go through `read_exact`/`write_all`, which keep partial
//! progress in the caller's buffer until the transfer completes.

use shared::{Frame, FrameError, FrameHeader, HEADER_SIZE};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};

/// Idle deadline applied when the caller does not choose one.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Ways a connection ends. None of these are server faults; all of them
/// terminate the connection without a reply.
#[derive(Debug, Error)]
pub enum ConnError {
    /// Peer closed the stream cleanly.
    #[error("connection closed by peer")]
    Closed,
    /// No complete transfer within the idle deadline.
    #[error("connection idle past deadline")]
    IdleTimeout,
    /// Socket-level read/write failure.
    #[error("transfer failed: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed frame header; the stream can no longer be trusted.
    #[error("framing error: {0}")]
    Framing(#[from] FrameError),
}

/// A stream connection that speaks whole frames.
#[derive(Debug)]
pub struct FrameConn<S> {
    stream: S,
    idle_timeout: Duration,
    deadline: Instant,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FrameConn<S> {
    pub fn new(stream: S, idle_timeout: Duration) -> Self {
        Self {
            stream,
            idle_timeout,
            deadline: Instant::now() + idle_timeout,
        }
    }

    /// Fills `buffer` completely from the stream, honoring the idle
    /// deadline, then refreshes it.
    async fn transfer_in(&mut self, buffer: &mut [u8]) -> Result<(), ConnError> {
        match timeout_at(self.deadline, self.stream.read_exact(buffer)).await {
            Err(_) => Err(ConnError::IdleTimeout),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(ConnError::Closed),
            Ok(Err(e)) => Err(ConnError::Io(e)),
            Ok(Ok(_)) => {
                self.deadline = Instant::now() + self.idle_timeout;
                Ok(())
            }
        }
    }

    /// Writes `buffer` completely to the stream, honoring the idle
    /// deadline, then refreshes it.
    async fn transfer_out(&mut self, buffer: &[u8]) -> Result<(), ConnError> {
        match timeout_at(self.deadline, self.stream.write_all(buffer)).await {
            Err(_) => Err(ConnError::IdleTimeout),
            Ok(Err(e)) => Err(ConnError::Io(e)),
            Ok(Ok(())) => {
                self.deadline = Instant::now() + self.idle_timeout;
                Ok(())
            }
        }
    }

    /// Reads one frame: fixed header first, then the declared body.
    pub async fn read_frame(&mut self) -> Result<Frame, ConnError> {
        let mut head = [0u8; HEADER_SIZE];
        self.transfer_in(&mut head).await?;

        let header = FrameHeader::decode(&head)?;

        let mut body = vec![0u8; header.body_len];
        if header.body_len > 0 {
            self.transfer_in(&mut body).await?;
        }

        Ok(Frame {
            flag: header.flag,
            chunk_index: header.chunk_index,
            chunk_count: header.chunk_count,
            correlation_id: header.correlation_id,
            body,
        })
    }

    /// Writes one frame as a single contiguous transfer.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), ConnError> {
        self.transfer_out(&frame.encode()).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{ActionCode, MAX_BODY_SIZE};
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_frame_roundtrip_over_stream() {
        let (a, b) = duplex(1024);
        let mut writer = FrameConn::new(a, DEFAULT_IDLE_TIMEOUT);
        let mut reader = FrameConn::new(b, DEFAULT_IDLE_TIMEOUT);

        let frame = Frame::new(ActionCode::Text, 0, 2, 555, vec![1, 2, 3]);
        writer.write_frame(&frame).await.unwrap();

        let received = reader.read_frame().await.unwrap();
        assert_eq!(received, frame);
    }

    #[tokio::test]
    async fn test_empty_body_frame() {
        let (a, b) = duplex(1024);
        let mut writer = FrameConn::new(a, DEFAULT_IDLE_TIMEOUT);
        let mut reader = FrameConn::new(b, DEFAULT_IDLE_TIMEOUT);

        let frame = Frame::single(ActionCode::GetBoardElements, 9, Vec::new());
        writer.write_frame(&frame).await.unwrap();
        assert_eq!(reader.read_frame().await.unwrap(), frame);
    }

    #[tokio::test]
    async fn test_read_detects_peer_close() {
        let (a, b) = duplex(1024);
        drop(a);
        let mut reader = FrameConn::new(b, DEFAULT_IDLE_TIMEOUT);

        assert!(matches!(reader.read_frame().await, Err(ConnError::Closed)));
    }

    #[tokio::test]
    async fn test_oversized_body_is_framing_error() {
        let (a, b) = duplex(1024);
        let mut reader = FrameConn::new(b, DEFAULT_IDLE_TIMEOUT);

        let mut bytes = Frame::single(ActionCode::LogIn, 1, vec![0; 4]).encode();
        bytes[20..24].copy_from_slice(&((MAX_BODY_SIZE as i32) + 1).to_le_bytes());

        let mut raw = a;
        tokio::io::AsyncWriteExt::write_all(&mut raw, &bytes).await.unwrap();

        assert!(matches!(
            reader.read_frame().await,
            Err(ConnError::Framing(FrameError::BodyTooLarge(_)))
        ));
    }

    #[tokio::test]
    async fn test_idle_timeout_fails_pending_read() {
        let (_a, b) = duplex(1024);
        let mut reader = FrameConn::new(b, Duration::from_millis(50));

        // Nothing ever arrives; the read must fail once the deadline passes.
        assert!(matches!(
            reader.read_frame().await,
            Err(ConnError::IdleTimeout)
        ));
    }

    #[tokio::test]
    async fn test_transfer_refreshes_deadline() {
        let (a, b) = duplex(4096);
        let mut writer = FrameConn::new(a, Duration::from_secs(3600));
        let mut reader = FrameConn::new(b, Duration::from_millis(100));

        // Two frames spaced 60ms apart: each read lands within a freshly
        // refreshed deadline even though 120ms pass in total.
        let frame = Frame::single(ActionCode::Undo, 1, Vec::new());
        writer.write_frame(&frame).await.unwrap();
        assert!(reader.read_frame().await.is_ok());

        tokio::time::sleep(Duration::from_millis(60)).await;
        writer.write_frame(&frame).await.unwrap();
        assert!(reader.read_frame().await.is_ok());
    }

    #[tokio::test]
    async fn test_split_message_survives_stream() {
        let (a, b) = duplex(4096);
        let mut writer = FrameConn::new(a, DEFAULT_IDLE_TIMEOUT);
        let mut reader = FrameConn::new(b, DEFAULT_IDLE_TIMEOUT);

        let payload: Vec<u8> = (0..250).map(|i| i as u8).collect();
        let frames = shared::split_message(ActionCode::PointsSet, 99, &payload);
        assert_eq!(frames.len(), 3);

        for frame in &frames {
            writer.write_frame(frame).await.unwrap();
        }

        let mut reassembled = Vec::new();
        for _ in 0..frames.len() {
            reassembled.extend(reader.read_frame().await.unwrap().body);
        }
        assert_eq!(reassembled, payload);
    }
}
