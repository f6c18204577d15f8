//! # TEELINE Core
//!
//! Orchestration layer for TEELINE: streaming length-prefixed encrypted frames
//! between peers whose keys live inside a secure backend.
//!
//! This crate provides:
//! - Length-prefixed frame encoding and incremental reassembly
//! - Frame transport over any byte-stream [`Channel`](teeline_transport::Channel)
//! - Asymmetric key exchange and symmetric cipher session state machines
//! - Chunked decrypt/encrypt pipelines
//! - [`Connection`], tying one channel to one cipher session
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Connection                               │
//! │   (handshake, per-frame error policy, ordered delivery)         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                  Cipher sessions / pipeline                      │
//! │   (RSA key exchange, AES ECB/CBC/CTR, chunk-by-chunk)           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                       Frame transport                            │
//! │   (8-byte big-endian length prefix, reassembly, shutdown)       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All key material stays in the [`Backend`](teeline_crypto::Backend); this
//! crate only moves ciphertext, plaintext and public keys.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod connection;
pub mod error;
pub mod frame;
pub mod key_exchange;
pub mod pipeline;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use connection::{
    CipherSession, Connection, ConnectionConfig, ConnectionError, ConnectionPolicy,
    ConnectionStats,
};
pub use error::{Error, ErrorKind, FrameError, Result, SessionError};
pub use frame::{Frame, FrameBuffer, encode_frame, encode_length_prefix};
pub use key_exchange::{AsymmetricKeyExchange, decode_public_key, encode_public_key};
pub use pipeline::{
    ChunkCipher, PartialDecrypt, PeerEncryptor, PlaintextFrame, decrypt_frame, encrypt_symmetric,
};
pub use session::{CipherState, SymmetricSession};
pub use transport::{FrameTransport, ShutdownHandle};

/// Length prefix size in bytes (unsigned 64-bit, big-endian)
pub const LENGTH_PREFIX_SIZE: usize = 8;

/// Default maximum frame payload (64 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: u64 = 64 * 1024 * 1024;

/// Default number of bytes requested per channel read
pub const DEFAULT_READ_CHUNK_SIZE: usize = 16 * 1024;

/// Default plaintext bytes per asymmetric block on the sending side
pub const DEFAULT_INPUT_CHUNK_SIZE: usize = 32;

/// Public-key frame header: modulus length then exponent length, u32 big-endian
pub const PUBLIC_KEY_HEADER_SIZE: usize = 8;
