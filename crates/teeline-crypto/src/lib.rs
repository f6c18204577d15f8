//! # TEELINE Crypto
//!
//! Backend capability interface for the TEELINE orchestration layer.
//!
//! This crate provides:
//! - The [`Backend`] trait: the synchronous command set a secure backend exposes
//! - Backend result codes ([`BackendError`])
//! - [`SharedBackend`] for serializing invocations across connections
//! - Exported public keys and peer-side block encryption
//! - [`SoftwareBackend`], an in-process reference implementation
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Block |
//! |----------|-----------|-------|
//! | Key exchange | RSA 1024–4096 | modulus size |
//! | Block padding | PKCS#1 v1.5, OAEP-SHA1 | |
//! | Stream cipher | AES-128/256-CTR | 16 bytes |
//! | Block cipher | AES-128/256-ECB/CBC, no padding | 16 bytes |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod backend;
pub mod error;
pub mod public_key;
pub mod software;

pub use backend::{
    AES_BLOCK_SIZE, AES128_KEY_SIZE, AES256_KEY_SIZE, Algorithm, AsymmetricPadding, Backend,
    CipherMode, CipherParams, PublicAttribute, SessionHandle, SharedBackend,
};
pub use error::{BackendError, BackendResult};
pub use public_key::{ExportedPublicKey, PeerPublicKey};
pub use software::SoftwareBackend;

/// RSA key sizes accepted by `generate_keypair`
pub const SUPPORTED_RSA_KEY_SIZES: [u32; 4] = [1024, 2048, 3072, 4096];

/// Default RSA key size in bits
pub const DEFAULT_RSA_KEY_BITS: u32 = 1024;

/// Cipher block size in bytes for an RSA key of `key_size_bits`.
#[must_use]
pub const fn rsa_block_size(key_size_bits: u32) -> usize {
    (key_size_bits / 8) as usize
}
