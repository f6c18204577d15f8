//! # TEELINE Transport
//!
//! Byte-stream channels for the TEELINE frame protocol.
//!
//! This crate provides:
//! - The [`Channel`](transport::Channel) contract: any reliable, ordered byte stream
//! - A TCP channel and acceptor with tuned socket options
//! - Transport errors and statistics

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod tcp;
pub mod transport;

pub use tcp::{TcpAcceptor, TcpChannel};
pub use transport::{Channel, TransportError, TransportResult, TransportStats};

/// TCP channel configuration
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Receive buffer size
    pub recv_buffer_size: usize,
    /// Send buffer size
    pub send_buffer_size: usize,
    /// Disable Nagle's algorithm
    pub nodelay: bool,
    /// Listen backlog for acceptors
    pub backlog: i32,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: 256 * 1024,
            send_buffer_size: 256 * 1024,
            nodelay: true,
            backlog: 128,
        }
    }
}

impl TcpConfig {
    /// Check the configuration for unusable values.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] if a buffer size is zero or
    /// too large for the socket API, or the backlog is not positive.
    pub fn validate(&self) -> TransportResult<()> {
        for (name, size) in [
            ("recv_buffer_size", self.recv_buffer_size),
            ("send_buffer_size", self.send_buffer_size),
        ] {
            if size == 0 || u32::try_from(size).is_err() {
                return Err(TransportError::InvalidConfig(format!(
                    "{name} out of range: {size}"
                )));
            }
        }
        if self.backlog <= 0 {
            return Err(TransportError::InvalidConfig(format!(
                "backlog must be positive, got {}",
                self.backlog
            )));
        }
        Ok(())
    }
}
