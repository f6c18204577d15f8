//! Length-prefixed frames and their reassembly.
//!
//! Wire format:
//!
//! ```text
//! +------------------+---------------------------+
//! | length: u64 (BE) | payload: `length` bytes   |
//! +------------------+---------------------------+
//! ```
//!
//! [`FrameBuffer`] is the I/O-free half: bytes go in as they arrive from the
//! channel, complete frames come out. It runs a two-state machine:
//! - `WaitingForPrefix`: fewer than 8 bytes buffered
//! - `WaitingForPayload`: prefix parsed, `length` more bytes needed
//!
//! Bytes belonging to the next frame are kept, so after every `push` the
//! buffer holds at most one partial frame.

use crate::error::FrameError;
use crate::{DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
use bytes::{Buf, Bytes, BytesMut};

/// A complete, immutable frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    sequence: u64,
    payload: Bytes,
}

impl Frame {
    /// Create a frame with a sequence number.
    #[must_use]
    pub fn new(sequence: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            payload: payload.into(),
        }
    }

    /// Per-connection sequence number, 0-based.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Frame payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Size on the wire, prefix included.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.payload.len()
    }

    /// Take the payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// Encode the length prefix for a payload of `len` bytes.
#[must_use]
pub fn encode_length_prefix(len: usize) -> [u8; LENGTH_PREFIX_SIZE] {
    (len as u64).to_be_bytes()
}

/// Serialize one frame: prefix followed by payload.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    out.extend_from_slice(&encode_length_prefix(payload.len()));
    out.extend_from_slice(payload);
    out
}

#[derive(Debug, Clone, Copy)]
enum State {
    WaitingForPrefix,
    WaitingForPayload { length: usize },
}

/// Accumulates channel bytes and extracts complete frames.
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    max_frame_size: u64,
    next_sequence: u64,
}

impl FrameBuffer {
    /// Create a buffer with the default maximum frame size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a buffer rejecting frames above `max_frame_size` payload bytes.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: u64) -> Self {
        Self {
            buffer: BytesMut::with_capacity(16 * 1024),
            state: State::WaitingForPrefix,
            max_frame_size,
            next_sequence: 0,
        }
    }

    /// Append `data` and extract every frame it completes.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooLarge`] as soon as a length prefix above the
    /// maximum is seen.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>, FrameError> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>, FrameError> {
        loop {
            match self.state {
                State::WaitingForPrefix => {
                    if self.buffer.len() < LENGTH_PREFIX_SIZE {
                        return Ok(None);
                    }

                    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
                    prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX_SIZE]);
                    let length = u64::from_be_bytes(prefix);
                    if length > self.max_frame_size {
                        return Err(FrameError::TooLarge {
                            length,
                            max: self.max_frame_size,
                        });
                    }
                    let length = usize::try_from(length).map_err(|_| FrameError::TooLarge {
                        length,
                        max: self.max_frame_size,
                    })?;

                    self.buffer.advance(LENGTH_PREFIX_SIZE);
                    self.state = State::WaitingForPayload { length };
                }
                State::WaitingForPayload { length } => {
                    if self.buffer.len() < length {
                        return Ok(None);
                    }

                    let payload = self.buffer.split_to(length).freeze();
                    self.state = State::WaitingForPrefix;

                    let frame = Frame::new(self.next_sequence, payload);
                    self.next_sequence += 1;
                    return Ok(Some(frame));
                }
            }
        }
    }

    /// Bytes buffered towards the next frame (prefix bytes excluded once parsed).
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Whether a frame has been started but not completed.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty() || matches!(self.state, State::WaitingForPayload { .. })
    }

    /// Sequence number the next complete frame will carry.
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Discard buffered bytes and reset the state machine.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForPrefix;
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&encode_frame(b"hello")).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"hello");
        assert_eq!(frames[0].sequence(), 0);
        assert_eq!(frames[0].wire_len(), 13);
        assert!(!buffer.has_partial());
    }

    #[test]
    fn test_prefix_is_big_endian() {
        let encoded = encode_frame(&[0xAA; 258]);
        assert_eq!(&encoded[..8], &[0, 0, 0, 0, 0, 0, 0x01, 0x02]);
    }

    #[test]
    fn test_zero_length_frame() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&encode_frame(&[])).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_empty());
    }

    #[test]
    fn test_fragmented_prefix_and_payload() {
        let mut buffer = FrameBuffer::new();
        let encoded = encode_frame(b"fragmented payload");

        assert!(buffer.push(&encoded[..3]).unwrap().is_empty());
        assert!(buffer.has_partial());
        assert!(buffer.push(&encoded[3..10]).unwrap().is_empty());
        assert_eq!(buffer.len(), 2);

        let frames = buffer.push(&encoded[10..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"fragmented payload");
    }

    #[test]
    fn test_multiple_frames_keep_trailing_bytes() {
        let mut buffer = FrameBuffer::new();
        let mut stream = encode_frame(b"one");
        stream.extend(encode_frame(b"two"));
        let third = encode_frame(b"three");
        stream.extend_from_slice(&third[..5]);

        let frames = buffer.push(&stream).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].payload(), b"two");
        assert_eq!(frames[1].sequence(), 1);
        assert_eq!(buffer.len(), 5);

        let frames = buffer.push(&third[5..]).unwrap();
        assert_eq!(frames[0].payload(), b"three");
        assert_eq!(frames[0].sequence(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_oversized_prefix_rejected_early() {
        let mut buffer = FrameBuffer::with_max_frame_size(1024);
        let prefix = encode_length_prefix(1025);

        let result = buffer.push(&prefix);
        assert!(matches!(
            result,
            Err(FrameError::TooLarge {
                length: 1025,
                max: 1024
            })
        ));
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = FrameBuffer::new();
        buffer.push(&encode_frame(b"partial")[..9]).unwrap();
        buffer.clear();
        assert!(!buffer.has_partial());

        let frames = buffer.push(&encode_frame(b"x")).unwrap();
        assert_eq!(frames[0].payload(), b"x");
    }
}
