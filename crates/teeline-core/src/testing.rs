//! Backend wrapper with scripted faults, for unit tests.

use teeline_crypto::{
    AsymmetricPadding, Backend, BackendError, BackendResult, CipherParams, PublicAttribute,
    SessionHandle, SharedBackend, SoftwareBackend,
};

/// Delegates to [`SoftwareBackend`], injecting `ShortBuffer` results and
/// decrypt failures on demand and counting calls.
pub(crate) struct ScriptedBackend {
    inner: SoftwareBackend,
    short_buffers: usize,
    fail_decrypt_at: Option<usize>,
    cipher_calls: usize,
    decrypt_calls: usize,
    close_calls: usize,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self {
            inner: SoftwareBackend::new(),
            short_buffers: 0,
            fail_decrypt_at: None,
            cipher_calls: 0,
            decrypt_calls: 0,
            close_calls: 0,
        }
    }

    /// Report `ShortBuffer` for the next `n` output-producing calls.
    pub(crate) fn short_buffers(mut self, n: usize) -> Self {
        self.short_buffers = n;
        self
    }

    pub(crate) fn set_short_buffers(&mut self, n: usize) {
        self.short_buffers = n;
    }

    /// Fail the `n`th (0-based) asymmetric decrypt.
    pub(crate) fn fail_decrypt_at(mut self, n: usize) -> Self {
        self.fail_decrypt_at = Some(n);
        self
    }

    pub(crate) fn inner(&self) -> &SoftwareBackend {
        &self.inner
    }

    pub(crate) fn cipher_calls(&self) -> usize {
        self.cipher_calls
    }

    pub(crate) fn decrypt_calls(&self) -> usize {
        self.decrypt_calls
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls
    }

    fn take_short_buffer(&mut self) -> bool {
        if self.short_buffers > 0 {
            self.short_buffers -= 1;
            true
        } else {
            false
        }
    }
}

pub(crate) fn shared(backend: ScriptedBackend) -> SharedBackend<ScriptedBackend> {
    SharedBackend::new(backend)
}

impl Backend for ScriptedBackend {
    fn open_session(&mut self) -> BackendResult<SessionHandle> {
        self.inner.open_session()
    }

    fn close_session(&mut self, session: SessionHandle) -> BackendResult<()> {
        self.close_calls += 1;
        self.inner.close_session(session)
    }

    fn generate_keypair(&mut self, session: SessionHandle, key_size_bits: u32) -> BackendResult<()> {
        self.inner.generate_keypair(session, key_size_bits)
    }

    fn get_public_key(
        &mut self,
        session: SessionHandle,
        attribute: PublicAttribute,
        out: &mut [u8],
    ) -> BackendResult<usize> {
        if self.take_short_buffer() {
            let mut scratch = [0u8; 1024];
            let required = self.inner.get_public_key(session, attribute, &mut scratch)?;
            return Err(BackendError::ShortBuffer { required });
        }
        self.inner.get_public_key(session, attribute, out)
    }

    fn asymmetric_encrypt(
        &mut self,
        session: SessionHandle,
        padding: AsymmetricPadding,
        input: &[u8],
        output: &mut [u8],
    ) -> BackendResult<usize> {
        self.inner.asymmetric_encrypt(session, padding, input, output)
    }

    fn asymmetric_decrypt(
        &mut self,
        session: SessionHandle,
        padding: AsymmetricPadding,
        input: &[u8],
        output: &mut [u8],
    ) -> BackendResult<usize> {
        let call = self.decrypt_calls;
        self.decrypt_calls += 1;

        if self.fail_decrypt_at == Some(call) {
            return Err(BackendError::Failure("scripted decrypt failure".to_string()));
        }
        if self.take_short_buffer() {
            return Err(BackendError::ShortBuffer {
                required: input.len(),
            });
        }
        self.inner.asymmetric_decrypt(session, padding, input, output)
    }

    fn prepare_symmetric_cipher(
        &mut self,
        session: SessionHandle,
        params: &CipherParams,
    ) -> BackendResult<()> {
        self.inner.prepare_symmetric_cipher(session, params)
    }

    fn set_key(&mut self, session: SessionHandle, key: &[u8]) -> BackendResult<()> {
        self.inner.set_key(session, key)
    }

    fn set_iv(&mut self, session: SessionHandle, iv: &[u8]) -> BackendResult<()> {
        self.inner.set_iv(session, iv)
    }

    fn cipher_update(
        &mut self,
        session: SessionHandle,
        input: &[u8],
        output: &mut [u8],
    ) -> BackendResult<usize> {
        self.cipher_calls += 1;
        if self.take_short_buffer() {
            return Err(BackendError::ShortBuffer {
                required: input.len(),
            });
        }
        self.inner.cipher_update(session, input, output)
    }
}
