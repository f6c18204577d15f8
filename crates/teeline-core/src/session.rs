//! Symmetric cipher session state machine.
//!
//! ```text
//! Uninitialized --prepare--> Prepared --set_key--> Keyed --set_iv--> Ready
//!                               ^                    ^                 |
//!                               +------prepare-------+-----set_key-----+
//! ```
//!
//! The session holds only a backend session handle. Key bytes are passed
//! through to the backend on `set_key` and never retained.

use crate::error::{Error, Result, SessionError};
use std::fmt;
use teeline_crypto::{
    Algorithm, Backend, BackendError, BackendResult, CipherMode, CipherParams, SessionHandle,
    SharedBackend,
};

/// Owned backend session handle.
///
/// Released exactly once: by [`BackendSession::close`] or, failing that, on drop.
pub(crate) struct BackendSession<B: Backend> {
    backend: SharedBackend<B>,
    handle: Option<SessionHandle>,
}

impl<B: Backend> BackendSession<B> {
    pub(crate) fn open(backend: SharedBackend<B>) -> Result<Self> {
        let handle = backend.call(|b| b.open_session())?;
        Ok(Self {
            backend,
            handle: Some(handle),
        })
    }

    pub(crate) fn handle(&self) -> Option<SessionHandle> {
        self.handle
    }

    pub(crate) fn invoke<T>(
        &self,
        f: impl FnOnce(&mut B, SessionHandle) -> BackendResult<T>,
    ) -> Result<T> {
        let handle = self.handle.ok_or(SessionError::Closed)?;
        Ok(self.backend.call(|b| f(b, handle))?)
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => {
                self.backend.call(|b| b.close_session(handle))?;
                tracing::debug!("Closed backend session {}", handle);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl<B: Backend> Drop for BackendSession<B> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle {
            tracing::debug!("Releasing unclosed backend session {}", handle);
            if let Err(e) = self.close() {
                tracing::warn!("Failed to release backend session {}: {}", handle, e);
            }
        }
    }
}

/// Run an output-producing backend command.
///
/// The buffer is sized up front; a `ShortBuffer` result is retried exactly
/// once with the size the backend reports.
pub(crate) fn call_sized(
    initial: usize,
    mut op: impl FnMut(&mut [u8]) -> Result<usize>,
) -> Result<Vec<u8>> {
    let mut out = vec![0u8; initial];
    let written = match op(&mut out) {
        Ok(written) => written,
        Err(Error::Backend(BackendError::ShortBuffer { required })) => {
            tracing::debug!(
                "Backend reported short buffer ({} < {}), retrying",
                initial,
                required
            );
            out.resize(required, 0);
            op(&mut out)?
        }
        Err(e) => return Err(e),
    };
    out.truncate(written);
    Ok(out)
}

/// Symmetric session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherState {
    /// No operation prepared
    Uninitialized,
    /// Algorithm and mode chosen, no key
    Prepared,
    /// Key loaded, no IV
    Keyed,
    /// IV loaded; observably identical to `Ready`
    IVSet,
    /// Cipher stream running
    Ready,
}

impl CipherState {
    fn rank(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Prepared => 1,
            Self::Keyed => 2,
            Self::IVSet | Self::Ready => 3,
        }
    }

    /// Whether this state is at least `other` along the setup sequence.
    #[must_use]
    pub fn is_at_least(self, other: Self) -> bool {
        self.rank() >= other.rank()
    }

    /// State name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "Uninitialized",
            Self::Prepared => "Prepared",
            Self::Keyed => "Keyed",
            Self::IVSet => "IVSet",
            Self::Ready => "Ready",
        }
    }
}

impl fmt::Display for CipherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A symmetric cipher session bound to one backend session.
pub struct SymmetricSession<B: Backend> {
    session: BackendSession<B>,
    state: CipherState,
    params: Option<CipherParams>,
}

impl<B: Backend> SymmetricSession<B> {
    /// Open a backend session in state `Uninitialized`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] if the backend cannot open a session.
    pub fn open(backend: SharedBackend<B>) -> Result<Self> {
        Ok(Self {
            session: BackendSession::open(backend)?,
            state: CipherState::Uninitialized,
            params: None,
        })
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CipherState {
        self.state
    }

    /// Parameters given to the last successful `prepare`.
    #[must_use]
    pub fn params(&self) -> Option<CipherParams> {
        self.params
    }

    /// Backend handle, `None` once closed.
    #[must_use]
    pub fn handle(&self) -> Option<SessionHandle> {
        self.session.handle()
    }

    fn require(&self, operation: &'static str, min: CipherState) -> Result<()> {
        if self.session.handle().is_none() {
            return Err(SessionError::Closed.into());
        }
        if !self.state.is_at_least(min) {
            return Err(SessionError::BadState {
                operation,
                state: self.state.as_str(),
            }
            .into());
        }
        Ok(())
    }

    /// Choose algorithm, key size and direction. Discards any key and IV.
    ///
    /// # Errors
    ///
    /// Returns a `BadParameters` backend error for invalid parameters; the
    /// state is unchanged in that case.
    pub fn prepare(&mut self, params: CipherParams) -> Result<()> {
        self.require("prepare", CipherState::Uninitialized)?;
        self.session
            .invoke(|b, h| b.prepare_symmetric_cipher(h, &params))?;

        tracing::debug!(
            "Session {:?}: {} -> Prepared ({} {:?})",
            self.handle(),
            self.state,
            params.algorithm,
            params.mode
        );
        self.state = CipherState::Prepared;
        self.params = Some(params);
        Ok(())
    }

    /// [`prepare`](Self::prepare) from raw command values: algorithm id
    /// (0 ECB, 1 CBC, 2 CTR), key size in bytes, mode id (0 decrypt, 1 encrypt).
    ///
    /// # Errors
    ///
    /// Returns a `BadParameters` error for unrecognized values.
    pub fn prepare_raw(&mut self, algorithm: u32, key_size: u32, mode: u32) -> Result<()> {
        let params = CipherParams::from_raw(algorithm, key_size, mode)?;
        self.prepare(params)
    }

    /// Load the key. Requires `Prepared` or later; lands in `Keyed`.
    ///
    /// # Errors
    ///
    /// [`SessionError::BadState`] before `prepare`,
    /// [`SessionError::KeyLength`] if the key size differs from the prepared one.
    pub fn set_key(&mut self, key: &[u8]) -> Result<()> {
        self.require("set_key", CipherState::Prepared)?;
        let expected = self.params.map_or(0, |p| p.key_size);
        if key.len() != expected {
            return Err(SessionError::KeyLength {
                expected,
                actual: key.len(),
            }
            .into());
        }

        self.session.invoke(|b, h| b.set_key(h, key))?;
        tracing::debug!("Session {:?}: {} -> Keyed", self.handle(), self.state);
        self.state = CipherState::Keyed;
        Ok(())
    }

    /// Load the IV and start a fresh cipher stream. Requires `Keyed` or later.
    ///
    /// # Errors
    ///
    /// [`SessionError::BadState`] before `set_key`; a `BadParameters` backend
    /// error for a wrong IV size.
    pub fn set_iv(&mut self, iv: &[u8]) -> Result<()> {
        self.require("set_iv", CipherState::Keyed)?;
        self.session.invoke(|b, h| b.set_iv(h, iv))?;

        tracing::debug!("Session {:?}: {} -> Ready", self.handle(), self.state);
        self.state = CipherState::Ready;
        Ok(())
    }

    /// Transform `input` with the running stream. Output length equals input length.
    ///
    /// # Errors
    ///
    /// [`SessionError::BadState`] unless `Ready`; backend errors otherwise.
    /// A single `ShortBuffer` is absorbed by one resized retry.
    pub fn cipher_update(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        self.require("cipher_update", CipherState::Ready)?;
        let session = &self.session;
        call_sized(input.len(), |out| {
            session.invoke(|b, h| b.cipher_update(h, input, out))
        })
    }

    /// Cipher block size, once prepared.
    #[must_use]
    pub fn block_size(&self) -> Option<usize> {
        self.params.map(|p| p.block_size())
    }

    /// Algorithm, once prepared.
    #[must_use]
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.params.map(|p| p.algorithm)
    }

    /// Direction, once prepared.
    #[must_use]
    pub fn mode(&self) -> Option<CipherMode> {
        self.params.map(|p| p.mode)
    }

    /// Release the backend session.
    ///
    /// # Errors
    ///
    /// Returns the backend error if `CloseSession` fails.
    pub fn close(&mut self) -> Result<()> {
        self.state = CipherState::Uninitialized;
        self.params = None;
        self.session.close()
    }
}

impl<B: Backend> fmt::Debug for SymmetricSession<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricSession")
            .field("handle", &self.handle())
            .field("state", &self.state)
            .field("params", &self.params)
            .finish()
    }
}
