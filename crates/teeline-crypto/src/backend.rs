//! Backend capability interface.
//!
//! A backend is the component that owns key material and performs the actual
//! cryptographic transforms. It is driven through a small set of synchronous
//! commands, each addressed to a session handle:
//!
//! | Command | Purpose |
//! |---------|---------|
//! | `generate_keypair` | create (or replace) the session's asymmetric keypair |
//! | `get_public_key` | export one public attribute (modulus or exponent) |
//! | `asymmetric_encrypt` / `asymmetric_decrypt` | one cipher block with the keypair |
//! | `prepare_symmetric_cipher` | allocate a symmetric operation |
//! | `set_key` / `set_iv` | load key material, then start a cipher stream |
//! | `cipher_update` | transform a buffer with the running stream |
//!
//! ## Output buffers
//!
//! Output-producing commands write into a caller buffer and return the true
//! output length. When the buffer is too small they return
//! [`BackendError::ShortBuffer`] carrying the required size. A backend MUST
//! detect a short buffer before mutating any cipher state, so retrying the
//! same command with a resized buffer is always safe.

use crate::error::{BackendError, BackendResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

/// AES block size in bytes
pub const AES_BLOCK_SIZE: usize = 16;

/// AES-128 key size in bytes
pub const AES128_KEY_SIZE: usize = 16;

/// AES-256 key size in bytes
pub const AES256_KEY_SIZE: usize = 32;

/// Opaque handle to a backend session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(u32);

impl SessionHandle {
    /// Wrap a raw handle value.
    #[must_use]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw handle value.
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Symmetric cipher algorithm (AES chaining mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// AES-ECB, no padding
    Ecb,
    /// AES-CBC, no padding
    Cbc,
    /// AES-CTR (stream mode)
    Ctr,
}

impl Algorithm {
    /// Whether `cipher_update` input must be a multiple of the block size.
    #[must_use]
    pub fn requires_alignment(self) -> bool {
        !matches!(self, Self::Ctr)
    }

    /// Whether the algorithm consumes an initialization vector.
    #[must_use]
    pub fn uses_iv(self) -> bool {
        !matches!(self, Self::Ecb)
    }
}

impl TryFrom<u32> for Algorithm {
    type Error = BackendError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ecb),
            1 => Ok(Self::Cbc),
            2 => Ok(Self::Ctr),
            _ => Err(BackendError::bad_parameters(format!(
                "invalid algorithm {value}"
            ))),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ecb => f.write_str("aes-ecb"),
            Self::Cbc => f.write_str("aes-cbc"),
            Self::Ctr => f.write_str("aes-ctr"),
        }
    }
}

/// Direction of a symmetric operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherMode {
    /// Decode ciphertext
    Decrypt,
    /// Encode plaintext
    Encrypt,
}

impl TryFrom<u32> for CipherMode {
    type Error = BackendError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Decrypt),
            1 => Ok(Self::Encrypt),
            _ => Err(BackendError::bad_parameters(format!("invalid mode {value}"))),
        }
    }
}

/// Arguments of `prepare_symmetric_cipher`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherParams {
    /// Chaining mode
    pub algorithm: Algorithm,
    /// Key size in bytes (16 or 32)
    pub key_size: usize,
    /// Encrypt or decrypt
    pub mode: CipherMode,
}

impl CipherParams {
    /// Build parameters, validating the key size.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::BadParameters`] if `key_size` is neither 16 nor 32.
    pub fn new(algorithm: Algorithm, key_size: usize, mode: CipherMode) -> BackendResult<Self> {
        let params = Self {
            algorithm,
            key_size,
            mode,
        };
        params.validate()?;
        Ok(params)
    }

    /// Build parameters from raw command values (algorithm id, key size, mode id).
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::BadParameters`] for any unrecognized value.
    pub fn from_raw(algorithm: u32, key_size: u32, mode: u32) -> BackendResult<Self> {
        Self::new(
            Algorithm::try_from(algorithm)?,
            key_size as usize,
            CipherMode::try_from(mode)?,
        )
    }

    /// Check the key size.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::BadParameters`] if the key size is unsupported.
    pub fn validate(&self) -> BackendResult<()> {
        match self.key_size {
            AES128_KEY_SIZE | AES256_KEY_SIZE => Ok(()),
            other => Err(BackendError::bad_parameters(format!(
                "invalid key size {other}"
            ))),
        }
    }

    /// Cipher block size in bytes.
    #[must_use]
    pub fn block_size(&self) -> usize {
        AES_BLOCK_SIZE
    }
}

/// Padding scheme for asymmetric block operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AsymmetricPadding {
    /// RSAES-PKCS1-v1_5
    #[default]
    Pkcs1v15,
    /// RSAES-OAEP with SHA-1 and MGF1-SHA-1
    OaepSha1,
}

impl AsymmetricPadding {
    /// Padding overhead in bytes.
    #[must_use]
    pub fn overhead(self) -> usize {
        match self {
            Self::Pkcs1v15 => 11,
            // 2 * SHA-1 output + 2
            Self::OaepSha1 => 42,
        }
    }

    /// Largest plaintext that fits in one block of `block_size` bytes.
    #[must_use]
    pub fn max_plaintext_len(self, block_size: usize) -> usize {
        block_size.saturating_sub(self.overhead())
    }
}

/// Public attribute selector for `get_public_key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicAttribute {
    /// RSA modulus `n`
    Modulus,
    /// RSA public exponent `e`
    Exponent,
}

/// Capability interface of a secure cryptographic backend.
///
/// Every call is synchronous. Implementations own all key material; callers
/// only ever hold [`SessionHandle`]s.
pub trait Backend: Send {
    /// Open a new session.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::OutOfMemory`] if no session can be allocated.
    fn open_session(&mut self) -> BackendResult<SessionHandle>;

    /// Close a session and release all key material attached to it.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::UnknownSession`] for a stale handle.
    fn close_session(&mut self, session: SessionHandle) -> BackendResult<()>;

    /// Generate a keypair of `key_size_bits`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::BadParameters`] for an unsupported key size.
    fn generate_keypair(&mut self, session: SessionHandle, key_size_bits: u32)
    -> BackendResult<()>;

    /// Export one public attribute as an unsigned big-endian octet string.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::ShortBuffer`] if `out` is too small,
    /// [`BackendError::BadState`] if no keypair exists.
    fn get_public_key(
        &mut self,
        session: SessionHandle,
        attribute: PublicAttribute,
        out: &mut [u8],
    ) -> BackendResult<usize>;

    /// Encrypt one block with the session keypair.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::ShortBuffer`] if `output` is too small,
    /// [`BackendError::BadState`] if no keypair exists.
    fn asymmetric_encrypt(
        &mut self,
        session: SessionHandle,
        padding: AsymmetricPadding,
        input: &[u8],
        output: &mut [u8],
    ) -> BackendResult<usize>;

    /// Decrypt one block with the session keypair.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::ShortBuffer`] if `output` is too small,
    /// [`BackendError::BadState`] if no keypair exists.
    fn asymmetric_decrypt(
        &mut self,
        session: SessionHandle,
        padding: AsymmetricPadding,
        input: &[u8],
        output: &mut [u8],
    ) -> BackendResult<usize>;

    /// Allocate a symmetric operation, discarding any previous key and IV.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::BadParameters`] for invalid parameters.
    fn prepare_symmetric_cipher(
        &mut self,
        session: SessionHandle,
        params: &CipherParams,
    ) -> BackendResult<()>;

    /// Load key material into the prepared operation.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::BadState`] before `prepare_symmetric_cipher`,
    /// [`BackendError::BadParameters`] on a key size mismatch.
    fn set_key(&mut self, session: SessionHandle, key: &[u8]) -> BackendResult<()>;

    /// Start a fresh cipher stream with `iv`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::BadState`] if no key is loaded.
    fn set_iv(&mut self, session: SessionHandle, iv: &[u8]) -> BackendResult<()>;

    /// Transform `input` into `output` with the running cipher stream.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::ShortBuffer`] (state untouched) if `output` is
    /// smaller than `input`, [`BackendError::BadState`] if no stream is running.
    fn cipher_update(
        &mut self,
        session: SessionHandle,
        input: &[u8],
        output: &mut [u8],
    ) -> BackendResult<usize>;
}

/// Backend shared between connections.
///
/// The backend is a single logical resource, so every invocation goes through
/// the mutex. The lock is never held across an `.await`.
pub struct SharedBackend<B> {
    inner: Arc<Mutex<B>>,
}

impl<B: Backend> SharedBackend<B> {
    /// Wrap a backend for sharing.
    pub fn new(backend: B) -> Self {
        Self {
            inner: Arc::new(Mutex::new(backend)),
        }
    }

    /// Run one backend invocation under the lock.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, or [`BackendError::Failure`] if a previous
    /// holder panicked while holding the lock.
    pub fn call<T>(&self, f: impl FnOnce(&mut B) -> BackendResult<T>) -> BackendResult<T> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| BackendError::Failure("backend lock poisoned".to_string()))?;
        f(&mut guard)
    }
}

impl<B> Clone for SharedBackend<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
