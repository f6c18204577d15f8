//! Error types for the TEELINE core.

use std::fmt;
use teeline_crypto::BackendError;
use thiserror::Error;

/// Core orchestration errors
#[derive(Debug, Error)]
pub enum Error {
    /// Frame parsing or wire-format error
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Cipher session error
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Result code returned by the backend
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Read or write failure on the channel
    #[error("channel error: {0}")]
    Channel(#[from] std::io::Error),

    /// The channel was closed, by the peer or by a shutdown handle
    #[error("channel closed")]
    ChannelClosed,

    /// Rejected configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Frame-level errors
#[derive(Debug, Error)]
pub enum FrameError {
    /// Length prefix above the configured maximum
    #[error("frame length {length} exceeds maximum {max}")]
    TooLarge {
        /// Declared payload length
        length: u64,
        /// Configured maximum
        max: u64,
    },

    /// Payload not a whole number of cipher blocks
    #[error("payload of {length} bytes is not a multiple of block size {block_size}")]
    Misaligned {
        /// Payload length
        length: usize,
        /// Cipher block size
        block_size: usize,
    },

    /// Public-key payload shorter than its fixed header
    #[error("public key payload too short: {0} bytes")]
    PublicKeyTooShort(usize),

    /// Public-key length fields disagree with the payload size
    #[error("public key lengths declare {declared} bytes, payload carries {actual}")]
    PublicKeyLength {
        /// Bytes declared by the two length fields
        declared: u64,
        /// Bytes following the header
        actual: usize,
    },
}

/// Cipher session errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation invoked in the wrong state
    #[error("{operation} not allowed in state {state}")]
    BadState {
        /// Rejected operation
        operation: &'static str,
        /// State at the time of the call
        state: &'static str,
    },

    /// Backend session already released
    #[error("session closed")]
    Closed,

    /// Key length differs from the size declared at prepare time
    #[error("key length {actual} does not match prepared key size {expected}")]
    KeyLength {
        /// Prepared key size
        expected: usize,
        /// Supplied key length
        actual: usize,
    },

    /// Asymmetric input is not exactly one cipher block
    #[error("block length {actual}, expected {expected}")]
    BlockLength {
        /// Cipher block size
        expected: usize,
        /// Supplied length
        actual: usize,
    },

    /// Plaintext exceeds the padding capacity of one block
    #[error("plaintext of {len} bytes exceeds block capacity {max}")]
    PlaintextTooLong {
        /// Plaintext length
        len: usize,
        /// Capacity
        max: usize,
    },

    /// Input chunk size is zero or above the padding capacity
    #[error("input chunk size {size} outside 1..={max}")]
    InputChunkSize {
        /// Requested chunk size
        size: usize,
        /// Capacity
        max: usize,
    },

    /// Public key with an empty modulus or exponent
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
}

/// The seven error kinds reported to a connection owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or mismatched-size input
    BadParameters,
    /// Operation invoked out of order
    BadState,
    /// Output buffer too small
    ShortBuffer,
    /// Orderly closure of the channel
    ChannelClosed,
    /// Read or write failure on the channel
    ChannelError,
    /// Opaque backend failure
    BackendFailure,
    /// Invalid length prefix or alignment
    MalformedFrame,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BadParameters => "BadParameters",
            Self::BadState => "BadState",
            Self::ShortBuffer => "ShortBuffer",
            Self::ChannelClosed => "ChannelClosed",
            Self::ChannelError => "ChannelError",
            Self::BackendFailure => "BackendFailure",
            Self::MalformedFrame => "MalformedFrame",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Frame(_) => ErrorKind::MalformedFrame,
            Self::InvalidConfig(_) => ErrorKind::BadParameters,
            Self::Session(e) => match e {
                SessionError::BadState { .. } | SessionError::Closed => ErrorKind::BadState,
                SessionError::KeyLength { .. }
                | SessionError::BlockLength { .. }
                | SessionError::PlaintextTooLong { .. }
                | SessionError::InputChunkSize { .. }
                | SessionError::InvalidPublicKey(_) => ErrorKind::BadParameters,
            },
            Self::Backend(e) => match e {
                BackendError::BadParameters(_) => ErrorKind::BadParameters,
                BackendError::BadState(_) => ErrorKind::BadState,
                BackendError::ShortBuffer { .. } => ErrorKind::ShortBuffer,
                BackendError::OutOfMemory
                | BackendError::UnknownSession(_)
                | BackendError::Failure(_) => ErrorKind::BackendFailure,
            },
            Self::ChannelClosed => ErrorKind::ChannelClosed,
            Self::Channel(_) => ErrorKind::ChannelError,
        }
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;
