//! Channel abstraction for the frame protocol.
//!
//! The frame layer needs nothing more than a reliable, ordered byte stream.
//! [`Channel`] names that contract so the same connection code runs over TCP,
//! an in-memory duplex pipe, or anything else that is `AsyncRead + AsyncWrite`.

use std::io;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from underlying channel
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Channel is closed
    #[error("Channel is closed")]
    Closed,

    /// Address binding failed
    #[error("Failed to bind to address: {0}")]
    BindFailed(String),

    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// A reliable, ordered, bidirectional byte stream.
pub trait Channel: AsyncRead + AsyncWrite + Unpin + Send {
    /// Human-readable identity of the remote end, for logging.
    fn peer_label(&self) -> String;
}

impl Channel for DuplexStream {
    fn peer_label(&self) -> String {
        "duplex".to_string()
    }
}

/// Channel statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Total frames sent
    pub frames_sent: u64,
    /// Total frames received
    pub frames_received: u64,
}

impl TransportStats {
    /// Create new empty statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sent frame of `bytes` on the wire
    pub fn record_send(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.frames_sent += 1;
    }

    /// Record a received frame of `bytes` on the wire
    pub fn record_recv(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
        self.frames_received += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_stats() {
        let mut stats = TransportStats::new();
        assert_eq!(stats.bytes_sent, 0);

        stats.record_send(100);
        stats.record_send(8);
        assert_eq!(stats.bytes_sent, 108);
        assert_eq!(stats.frames_sent, 2);

        stats.record_recv(200);
        assert_eq!(stats.bytes_received, 200);
        assert_eq!(stats.frames_received, 1);
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Closed;
        assert_eq!(err.to_string(), "Channel is closed");

        let err = TransportError::BindFailed("test".to_string());
        assert!(err.to_string().contains("Failed to bind"));

        let err = TransportError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_transport_error_from_io() {
        let io_err = io::Error::other("test");
        let transport_err = TransportError::from(io_err);
        assert!(matches!(transport_err, TransportError::Io(_)));
    }
}
