//! Software reference backend.
//!
//! Implements the [`Backend`] capability interface in-process with RustCrypto
//! primitives: RSA keypairs (PKCS#1 v1.5 or OAEP-SHA1 block encryption) and
//! AES-128/256 in ECB, CBC or CTR mode. It follows the command semantics of a
//! secure-world application:
//!
//! - `prepare_symmetric_cipher` discards any previous key and stream
//! - `set_key` resets the stream; a new `set_iv` is required before ciphering
//! - short output buffers are reported before any cipher state is touched
//!
//! It is intended for hosts without a secure environment and for tests.

mod engine;

use crate::backend::{
    AES_BLOCK_SIZE, AsymmetricPadding, Backend, CipherParams, PublicAttribute, SessionHandle,
};
use crate::error::{BackendError, BackendResult};
use crate::public_key::{encrypt_with, export};
use crate::SUPPORTED_RSA_KEY_SIZES;
use engine::{CipherEngine, build_engine};
use rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pkcs1v15Encrypt, RsaPrivateKey};
use std::collections::HashMap;
use zeroize::Zeroizing;

/// Default maximum number of concurrently open sessions
pub const DEFAULT_MAX_SESSIONS: usize = 64;

struct SymmetricOperation {
    params: CipherParams,
    key: Option<Zeroizing<Vec<u8>>>,
    engine: Option<Box<dyn CipherEngine>>,
}

#[derive(Default)]
struct SoftSession {
    keypair: Option<RsaPrivateKey>,
    symmetric: Option<SymmetricOperation>,
}

/// In-process backend built on RustCrypto.
pub struct SoftwareBackend {
    sessions: HashMap<SessionHandle, SoftSession>,
    next_handle: u32,
    max_sessions: usize,
}

impl SoftwareBackend {
    /// Create a backend with the default session limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_sessions(DEFAULT_MAX_SESSIONS)
    }

    /// Create a backend allowing at most `max_sessions` open sessions.
    #[must_use]
    pub fn with_max_sessions(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            next_handle: 1,
            max_sessions,
        }
    }

    /// Number of currently open sessions.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn session(&mut self, handle: SessionHandle) -> BackendResult<&mut SoftSession> {
        self.sessions
            .get_mut(&handle)
            .ok_or(BackendError::UnknownSession(handle.as_u32()))
    }

    fn keypair(&mut self, handle: SessionHandle) -> BackendResult<&RsaPrivateKey> {
        self.session(handle)?
            .keypair
            .as_ref()
            .ok_or_else(|| BackendError::bad_state("no keypair generated"))
    }

    fn symmetric(&mut self, handle: SessionHandle) -> BackendResult<&mut SymmetricOperation> {
        self.session(handle)?
            .symmetric
            .as_mut()
            .ok_or_else(|| BackendError::bad_state("no symmetric operation prepared"))
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for SoftwareBackend {
    fn open_session(&mut self) -> BackendResult<SessionHandle> {
        if self.sessions.len() >= self.max_sessions {
            return Err(BackendError::OutOfMemory);
        }

        let handle = SessionHandle::new(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        self.sessions.insert(handle, SoftSession::default());

        tracing::debug!("Backend session {} opened", handle);
        Ok(handle)
    }

    fn close_session(&mut self, session: SessionHandle) -> BackendResult<()> {
        // Dropping the session zeroizes the RSA key and symmetric key buffers
        self.sessions
            .remove(&session)
            .ok_or(BackendError::UnknownSession(session.as_u32()))?;

        tracing::debug!("Backend session {} released", session);
        Ok(())
    }

    fn generate_keypair(
        &mut self,
        session: SessionHandle,
        key_size_bits: u32,
    ) -> BackendResult<()> {
        if !SUPPORTED_RSA_KEY_SIZES.contains(&key_size_bits) {
            return Err(BackendError::bad_parameters(format!(
                "unsupported RSA key size {key_size_bits}"
            )));
        }

        let slot = self.session(session)?;
        let key = RsaPrivateKey::new(&mut OsRng, key_size_bits as usize)
            .map_err(|e| BackendError::Failure(format!("key generation failed: {e}")))?;
        slot.keypair = Some(key);

        tracing::debug!("Backend session {}: {}-bit keypair generated", session, key_size_bits);
        Ok(())
    }

    fn get_public_key(
        &mut self,
        session: SessionHandle,
        attribute: PublicAttribute,
        out: &mut [u8],
    ) -> BackendResult<usize> {
        let exported = export(&self.keypair(session)?.to_public_key());
        let value = match attribute {
            PublicAttribute::Modulus => exported.modulus,
            PublicAttribute::Exponent => exported.exponent,
        };

        if out.len() < value.len() {
            return Err(BackendError::ShortBuffer {
                required: value.len(),
            });
        }

        out[..value.len()].copy_from_slice(&value);
        Ok(value.len())
    }

    fn asymmetric_encrypt(
        &mut self,
        session: SessionHandle,
        padding: AsymmetricPadding,
        input: &[u8],
        output: &mut [u8],
    ) -> BackendResult<usize> {
        let public = self.keypair(session)?.to_public_key();
        if output.len() < public.size() {
            return Err(BackendError::ShortBuffer {
                required: public.size(),
            });
        }

        let ciphertext = encrypt_with(&public, padding, input)?;
        output[..ciphertext.len()].copy_from_slice(&ciphertext);
        Ok(ciphertext.len())
    }

    fn asymmetric_decrypt(
        &mut self,
        session: SessionHandle,
        padding: AsymmetricPadding,
        input: &[u8],
        output: &mut [u8],
    ) -> BackendResult<usize> {
        let key = self.keypair(session)?;
        if input.len() != key.size() {
            return Err(BackendError::bad_parameters(format!(
                "ciphertext of {} bytes, expected {}",
                input.len(),
                key.size()
            )));
        }

        let result = match padding {
            AsymmetricPadding::Pkcs1v15 => key.decrypt(Pkcs1v15Encrypt, input),
            AsymmetricPadding::OaepSha1 => key.decrypt(Oaep::new::<sha1::Sha1>(), input),
        };
        let plaintext = Zeroizing::new(
            result.map_err(|e| BackendError::Failure(format!("RSA decryption failed: {e}")))?,
        );

        if output.len() < plaintext.len() {
            return Err(BackendError::ShortBuffer {
                required: plaintext.len(),
            });
        }

        output[..plaintext.len()].copy_from_slice(&plaintext);
        Ok(plaintext.len())
    }

    fn prepare_symmetric_cipher(
        &mut self,
        session: SessionHandle,
        params: &CipherParams,
    ) -> BackendResult<()> {
        params.validate()?;

        let slot = self.session(session)?;
        slot.symmetric = Some(SymmetricOperation {
            params: *params,
            key: None,
            engine: None,
        });

        tracing::debug!(
            "Backend session {}: prepared {} {:?} with {}-byte key",
            session,
            params.algorithm,
            params.mode,
            params.key_size
        );
        Ok(())
    }

    fn set_key(&mut self, session: SessionHandle, key: &[u8]) -> BackendResult<()> {
        let op = self.symmetric(session)?;
        if key.len() != op.params.key_size {
            return Err(BackendError::bad_parameters(format!(
                "wrong key size {}, expected {} bytes",
                key.len(),
                op.params.key_size
            )));
        }

        op.key = Some(Zeroizing::new(key.to_vec()));
        op.engine = None;
        Ok(())
    }

    fn set_iv(&mut self, session: SessionHandle, iv: &[u8]) -> BackendResult<()> {
        let op = self.symmetric(session)?;
        let key = op
            .key
            .as_ref()
            .ok_or_else(|| BackendError::bad_state("no key loaded"))?;

        op.engine = Some(build_engine(&op.params, key, iv)?);
        Ok(())
    }

    fn cipher_update(
        &mut self,
        session: SessionHandle,
        input: &[u8],
        output: &mut [u8],
    ) -> BackendResult<usize> {
        let op = self.symmetric(session)?;
        let aligned = !op.params.algorithm.requires_alignment() || input.len() % AES_BLOCK_SIZE == 0;
        let engine = op
            .engine
            .as_mut()
            .ok_or_else(|| BackendError::bad_state("cipher stream not initialized"))?;

        if output.len() < input.len() {
            return Err(BackendError::ShortBuffer {
                required: input.len(),
            });
        }
        if !aligned {
            return Err(BackendError::bad_parameters(format!(
                "input of {} bytes is not block aligned",
                input.len()
            )));
        }

        engine.update(input, output)
    }
}
