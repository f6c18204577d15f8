//! Frame transport over a byte-stream channel.
//!
//! Wraps a [`Channel`] with a [`FrameBuffer`]. The channel read is the only
//! suspension point; it is raced against a shutdown signal so a
//! [`ShutdownHandle`] can unblock a pending receive from another task.

use crate::error::{Error, Result};
use crate::frame::{Frame, FrameBuffer, encode_length_prefix};
use crate::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_READ_CHUNK_SIZE};
use std::collections::VecDeque;
use std::sync::Arc;
use teeline_transport::{Channel, TransportStats};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;

/// Cloneable handle that closes a frame transport from anywhere.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Signal shutdown. Pending and future receives fail with `ChannelClosed`.
    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    /// Whether shutdown has been signalled.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Sends and receives length-prefixed frames.
pub struct FrameTransport<C> {
    channel: C,
    buffer: FrameBuffer,
    pending: VecDeque<Frame>,
    read_buf: Vec<u8>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    next_send_sequence: u64,
    closed_mid_frame: bool,
    stats: TransportStats,
}

impl<C: Channel> FrameTransport<C> {
    /// Wrap a channel with default limits.
    pub fn new(channel: C) -> Self {
        Self::with_limits(channel, DEFAULT_MAX_FRAME_SIZE, DEFAULT_READ_CHUNK_SIZE)
    }

    /// Wrap a channel with a maximum frame size and read chunk size.
    pub fn with_limits(channel: C, max_frame_size: u64, read_chunk_size: usize) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            channel,
            buffer: FrameBuffer::with_max_frame_size(max_frame_size),
            pending: VecDeque::new(),
            read_buf: vec![0u8; read_chunk_size.max(1)],
            shutdown_tx: Arc::new(tx),
            shutdown_rx: rx,
            next_send_sequence: 0,
            closed_mid_frame: false,
            stats: TransportStats::new(),
        }
    }

    /// Receive the next complete frame.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelClosed`] on end of stream or shutdown
    /// - [`Error::Channel`] if the read fails
    /// - [`Error::Frame`] for an oversized length prefix
    pub async fn receive_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                self.stats.record_recv(frame.wire_len());
                return Ok(frame);
            }

            if *self.shutdown_rx.borrow_and_update() {
                return Err(Error::ChannelClosed);
            }

            let read = tokio::select! {
                biased;
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        tracing::debug!("Receive on {} cancelled by shutdown", self.channel.peer_label());
                        return Err(Error::ChannelClosed);
                    }
                    continue;
                }
                read = self.channel.read(&mut self.read_buf) => read?,
            };

            if read == 0 {
                if self.buffer.has_partial() {
                    tracing::warn!(
                        "Channel {} closed mid-frame, discarding {} buffered bytes",
                        self.channel.peer_label(),
                        self.buffer.len()
                    );
                    self.buffer.clear();
                    self.closed_mid_frame = true;
                }
                return Err(Error::ChannelClosed);
            }

            let frames = self.buffer.push(&self.read_buf[..read])?;
            self.pending.extend(frames);
        }
    }

    /// Send one frame, returning its send sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] after shutdown and [`Error::Channel`]
    /// if the write fails.
    pub async fn send_frame(&mut self, payload: &[u8]) -> Result<u64> {
        if self.is_shut_down() {
            return Err(Error::ChannelClosed);
        }

        self.channel
            .write_all(&encode_length_prefix(payload.len()))
            .await?;
        self.channel.write_all(payload).await?;
        self.channel.flush().await?;

        let sequence = self.next_send_sequence;
        self.next_send_sequence += 1;
        self.stats
            .record_send(crate::LENGTH_PREFIX_SIZE + payload.len());
        Ok(sequence)
    }

    /// Handle that unblocks pending receives.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Whether shutdown has been signalled.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Whether a partially received frame is buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.buffer.has_partial()
    }

    /// Whether the peer closed the channel with a frame half received.
    #[must_use]
    pub fn closed_mid_frame(&self) -> bool {
        self.closed_mid_frame
    }

    /// Sequence number of the next received frame.
    #[must_use]
    pub fn next_receive_sequence(&self) -> u64 {
        self.buffer.next_sequence() - self.pending.len() as u64
    }

    /// Sequence number the next sent frame will carry.
    #[must_use]
    pub fn next_send_sequence(&self) -> u64 {
        self.next_send_sequence
    }

    /// Byte and frame counters.
    #[must_use]
    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Remote identity for logging.
    #[must_use]
    pub fn peer_label(&self) -> String {
        self.channel.peer_label()
    }

    /// Signal shutdown and close the write half of the channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Channel`] if the channel shutdown fails.
    pub async fn close(&mut self) -> Result<()> {
        self.shutdown_tx.send_replace(true);
        self.channel.shutdown().await?;
        Ok(())
    }
}
