//! Shared fixtures for TEELINE integration tests.

use std::net::SocketAddr;
use teeline_core::SymmetricSession;
use teeline_crypto::{
    AsymmetricPadding, Backend, BackendResult, CipherMode, CipherParams, PublicAttribute,
    SessionHandle, SharedBackend, SoftwareBackend,
};
use teeline_transport::{TcpAcceptor, TcpConfig};

/// Software backend that counts session lifecycle calls.
pub struct CountingBackend {
    inner: SoftwareBackend,
    opened: usize,
    closed: usize,
}

impl CountingBackend {
    /// Wrap a fresh software backend.
    pub fn new() -> Self {
        Self {
            inner: SoftwareBackend::new(),
            opened: 0,
            closed: 0,
        }
    }

    /// `OpenSession` calls so far.
    pub fn opened(&self) -> usize {
        self.opened
    }

    /// `CloseSession` calls so far.
    pub fn closed(&self) -> usize {
        self.closed
    }

    /// Sessions currently open at the backend.
    pub fn live_sessions(&self) -> usize {
        self.inner.open_sessions()
    }
}

impl Default for CountingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for CountingBackend {
    fn open_session(&mut self) -> BackendResult<SessionHandle> {
        self.opened += 1;
        self.inner.open_session()
    }

    fn close_session(&mut self, session: SessionHandle) -> BackendResult<()> {
        self.closed += 1;
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
        self.inner.cipher_update(session, input, output)
    }
}

/// Bind an acceptor on an ephemeral loopback port.
pub fn loopback_acceptor() -> (TcpAcceptor, SocketAddr) {
    let acceptor = TcpAcceptor::bind(
        "127.0.0.1:0".parse().expect("loopback address"),
        TcpConfig::default(),
    )
    .expect("bind loopback");
    let addr = acceptor.local_addr().expect("local address");
    (acceptor, addr)
}

/// Open a symmetric session and drive it to `Ready`.
pub fn ready_session<B: Backend>(
    backend: &SharedBackend<B>,
    params: CipherParams,
    key: &[u8],
    iv: &[u8],
) -> SymmetricSession<B> {
    let mut session = SymmetricSession::open(backend.clone()).expect("open session");
    session.prepare(params).expect("prepare");
    session.set_key(key).expect("set key");
    session.set_iv(iv).expect("set iv");
    session
}

/// Encrypt/decrypt pair of sessions sharing key and IV.
pub fn session_pair<B: Backend>(
    backend: &SharedBackend<B>,
    algorithm: teeline_crypto::Algorithm,
    key: &[u8],
    iv: &[u8],
) -> (SymmetricSession<B>, SymmetricSession<B>) {
    let params = |mode| CipherParams::new(algorithm, key.len(), mode).expect("cipher params");
    (
        ready_session(backend, params(CipherMode::Encrypt), key, iv),
        ready_session(backend, params(CipherMode::Decrypt), key, iv),
    )
}

/// Deterministic non-repeating test data.
pub fn test_pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8).collect()
}
