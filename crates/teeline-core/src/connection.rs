//! Connection: one channel, one cipher session, one frame sequence.
//!
//! A connection is driven by a single task. The two ends of the protocol are:
//!
//! - the **receiver**, which generates a keypair in the backend, sends the
//!   public key as its first frame and then decrypts every frame it receives;
//! - the **sender**, which reads that first frame and encrypts plaintext for
//!   the receiver's key.
//!
//! Fatal errors are reported as [`ConnectionError`], carrying the error kind
//! and the sequence number of the frame being processed. A fatal error ends
//! the connection: the backend session is released, the transport is shut
//! down and every later call fails with `ChannelClosed`.

use crate::error::{Error, ErrorKind, Result, SessionError};
use crate::frame::Frame;
use crate::key_exchange::{AsymmetricKeyExchange, decode_public_key, encode_public_key};
use crate::pipeline::{
    ChunkCipher, PeerEncryptor, PlaintextFrame, decrypt_frame, encrypt_symmetric,
};
use crate::session::SymmetricSession;
use crate::transport::{FrameTransport, ShutdownHandle};
use crate::{
    DEFAULT_INPUT_CHUNK_SIZE, DEFAULT_MAX_FRAME_SIZE, DEFAULT_READ_CHUNK_SIZE,
    PUBLIC_KEY_HEADER_SIZE,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use teeline_crypto::{
    AsymmetricPadding, Backend, DEFAULT_RSA_KEY_BITS, ExportedPublicKey, PeerPublicKey,
    SUPPORTED_RSA_KEY_SIZES, SharedBackend, rsa_block_size,
};
use teeline_transport::Channel;

/// Encoded length of the public exponent 65537.
const PUBLIC_EXPONENT_LEN: usize = 3;

/// What to do when a frame fails to decrypt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionPolicy {
    /// Terminate the connection
    #[default]
    CloseOnError,
    /// Log, drop the frame and continue with the next one
    SkipFrame,
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Largest accepted frame payload
    pub max_frame_size: u64,
    /// Bytes requested per channel read
    pub read_chunk_size: usize,
    /// RSA key size generated by the receiver
    pub key_size_bits: u32,
    /// Asymmetric block padding; both ends must agree
    pub padding: AsymmetricPadding,
    /// Plaintext bytes per asymmetric block on the sending side
    pub input_chunk_size: usize,
    /// Reaction to per-frame decrypt failures
    pub policy: ConnectionPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            key_size_bits: DEFAULT_RSA_KEY_BITS,
            padding: AsymmetricPadding::default(),
            input_chunk_size: DEFAULT_INPUT_CHUNK_SIZE,
            policy: ConnectionPolicy::default(),
        }
    }
}

impl ConnectionConfig {
    /// Check the configuration for inconsistent values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size == 0 {
            return Err(Error::InvalidConfig("max_frame_size must be positive".into()));
        }
        if self.read_chunk_size == 0 {
            return Err(Error::InvalidConfig("read_chunk_size must be positive".into()));
        }
        if !SUPPORTED_RSA_KEY_SIZES.contains(&self.key_size_bits) {
            return Err(Error::InvalidConfig(format!(
                "unsupported key size {} (expected one of {:?})",
                self.key_size_bits, SUPPORTED_RSA_KEY_SIZES
            )));
        }

        let block_size = rsa_block_size(self.key_size_bits);
        let key_frame = (PUBLIC_KEY_HEADER_SIZE + block_size + PUBLIC_EXPONENT_LEN) as u64;
        if self.max_frame_size < key_frame {
            return Err(Error::InvalidConfig(format!(
                "max_frame_size {} cannot carry the {key_frame}-byte public key frame of a {}-bit key",
                self.max_frame_size, self.key_size_bits
            )));
        }

        let capacity = self.padding.max_plaintext_len(block_size);
        if self.input_chunk_size == 0 || self.input_chunk_size > capacity {
            return Err(Error::InvalidConfig(format!(
                "input_chunk_size {} outside 1..={capacity} for {}-bit {:?}",
                self.input_chunk_size, self.key_size_bits, self.padding
            )));
        }
        Ok(())
    }
}

/// The single active cipher session of a connection.
pub enum CipherSession<B: Backend> {
    /// Receiver-side keypair
    Asymmetric(AsymmetricKeyExchange<B>),
    /// Symmetric stream cipher
    Symmetric(SymmetricSession<B>),
}

impl<B: Backend> CipherSession<B> {
    fn cipher_mut(&mut self) -> &mut dyn ChunkCipher {
        match self {
            Self::Asymmetric(kx) => kx,
            Self::Symmetric(session) => session,
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            Self::Asymmetric(kx) => kx.close(),
            Self::Symmetric(session) => session.close(),
        }
    }
}

/// Connection counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Frames received
    pub frames_received: u64,
    /// Frames sent
    pub frames_sent: u64,
    /// Wire bytes received
    pub bytes_received: u64,
    /// Wire bytes sent
    pub bytes_sent: u64,
    /// Cipher chunks decrypted
    pub chunks_decrypted: u64,
    /// Frames dropped under [`ConnectionPolicy::SkipFrame`]
    pub frames_skipped: u64,
}

/// A fatal connection error.
#[derive(Debug)]
pub struct ConnectionError {
    /// Error kind
    pub kind: ErrorKind,
    /// Frame sequence number being processed, if any
    pub sequence: Option<u64>,
    /// Underlying error
    pub source: Error,
    /// Plaintext chunks recovered from the failing frame
    pub partial: Vec<Vec<u8>>,
}

impl ConnectionError {
    fn new(source: Error, sequence: Option<u64>) -> Self {
        Self {
            kind: source.kind(),
            sequence,
            source,
            partial: Vec::new(),
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sequence {
            Some(sequence) => write!(f, "{} at frame {}: {}", self.kind, sequence, self.source),
            None => write!(f, "{}: {}", self.kind, self.source),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// One end of an encrypted frame stream.
pub struct Connection<C, B: Backend> {
    transport: FrameTransport<C>,
    backend: SharedBackend<B>,
    config: ConnectionConfig,
    session: Option<CipherSession<B>>,
    peer: Option<PeerEncryptor>,
    public_key: Option<ExportedPublicKey>,
    chunks_decrypted: u64,
    frames_skipped: u64,
    failed: Option<ErrorKind>,
}

impl<C: Channel, B: Backend> Connection<C, B> {
    /// Create a connection over an established channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` does not validate.
    pub fn new(channel: C, backend: SharedBackend<B>, config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let transport =
            FrameTransport::with_limits(channel, config.max_frame_size, config.read_chunk_size);

        tracing::info!("Connection established with {}", transport.peer_label());
        Ok(Self {
            transport,
            backend,
            config,
            session: None,
            peer: None,
            public_key: None,
            chunks_decrypted: 0,
            frames_skipped: 0,
            failed: None,
        })
    }

    fn ensure_usable(&self, sequence: u64) -> std::result::Result<(), ConnectionError> {
        match self.failed {
            Some(kind) => {
                tracing::debug!(
                    "Connection with {} already failed with {}",
                    self.transport.peer_label(),
                    kind
                );
                Err(ConnectionError::new(Error::ChannelClosed, Some(sequence)))
            }
            None => Ok(()),
        }
    }

    fn install(&mut self, session: CipherSession<B>) -> Result<()> {
        if let Some(mut previous) = self.session.replace(session) {
            previous.close()?;
        }
        Ok(())
    }

    /// Receiver handshake: generate a keypair and send its public key as the
    /// first frame.
    ///
    /// # Errors
    ///
    /// Backend errors during key generation or export, channel errors while
    /// sending.
    pub async fn handshake_as_receiver(&mut self) -> std::result::Result<ExportedPublicKey, ConnectionError> {
        let sequence = self.transport.next_send_sequence();
        self.ensure_usable(sequence)?;
        let fail = move |e: Error| ConnectionError::new(e, Some(sequence));

        let exported = match self.generate_and_install() {
            Ok(exported) => exported,
            Err(e) => return Err(self.fatal(fail(e))),
        };
        if let Err(e) = self.transport.send_frame(&encode_public_key(&exported)).await {
            return Err(self.fatal(fail(e)));
        }

        tracing::info!(
            "Sent {}-bit public key to {}",
            self.config.key_size_bits,
            self.transport.peer_label()
        );
        self.public_key = Some(exported.clone());
        Ok(exported)
    }

    fn generate_and_install(&mut self) -> Result<ExportedPublicKey> {
        let mut kx = AsymmetricKeyExchange::open(self.backend.clone(), self.config.padding)?;
        kx.generate_keypair(self.config.key_size_bits)?;
        let exported = kx.export_public_key()?;
        self.install(CipherSession::Asymmetric(kx))?;
        Ok(exported)
    }

    /// Sender handshake: receive the peer's public key from the first frame.
    ///
    /// # Errors
    ///
    /// `MalformedFrame` or `BadParameters` for an undecodable key,
    /// `ChannelClosed` if the peer leaves before sending it.
    pub async fn handshake_as_sender(&mut self) -> std::result::Result<PeerPublicKey, ConnectionError> {
        let sequence = self.transport.next_receive_sequence();
        self.ensure_usable(sequence)?;

        let (key, encryptor) = match self.receive_peer_key().await {
            Ok(received) => received,
            Err(e) => return Err(self.fatal(ConnectionError::new(e, Some(sequence)))),
        };

        tracing::info!(
            "Received {}-byte public key from {}",
            key.block_size(),
            self.transport.peer_label()
        );
        self.peer = Some(encryptor);
        Ok(key)
    }

    async fn receive_peer_key(&mut self) -> Result<(PeerPublicKey, PeerEncryptor)> {
        let frame = self.transport.receive_frame().await?;
        let exported = decode_public_key(frame.payload())?;
        let key = PeerPublicKey::from_exported(&exported)
            .map_err(|e| SessionError::InvalidPublicKey(e.to_string()))?;
        let encryptor =
            PeerEncryptor::new(key.clone(), self.config.padding, self.config.input_chunk_size)?;
        Ok((key, encryptor))
    }

    /// Make `session` the active cipher session, closing any previous one.
    ///
    /// # Errors
    ///
    /// Returns the backend error if closing the previous session fails.
    pub fn attach_symmetric(&mut self, session: SymmetricSession<B>) -> std::result::Result<(), ConnectionError> {
        if self.failed.is_some() {
            return Err(ConnectionError::new(Error::ChannelClosed, None));
        }
        self.install(CipherSession::Symmetric(session))
            .map_err(|e| self.fatal(ConnectionError::new(e, None)))
    }

    /// Receive and decrypt the next frame.
    ///
    /// Returns `Ok(None)` when the channel closes cleanly between frames or is
    /// shut down through a [`ShutdownHandle`].
    ///
    /// # Errors
    ///
    /// Channel errors, a close in the middle of a frame, `BadState`, and
    /// decrypt failures under [`ConnectionPolicy::CloseOnError`]. Each of
    /// these ends the connection; later calls return `ChannelClosed`.
    pub async fn next_plaintext(&mut self) -> std::result::Result<Option<PlaintextFrame>, ConnectionError> {
        loop {
            let sequence = self.transport.next_receive_sequence();
            self.ensure_usable(sequence)?;
            let frame = match self.transport.receive_frame().await {
                Ok(frame) => frame,
                Err(Error::ChannelClosed) if !self.transport.closed_mid_frame() => {
                    tracing::info!(
                        "Channel {} closed after {} frames",
                        self.transport.peer_label(),
                        self.transport.stats().frames_received
                    );
                    return Ok(None);
                }
                Err(e) => return Err(self.fatal(ConnectionError::new(e, Some(sequence)))),
            };

            match self.decrypt(&frame) {
                Ok(plaintext) => {
                    self.chunks_decrypted += plaintext.chunks.len() as u64;
                    return Ok(Some(plaintext));
                }
                Err(err) => {
                    if self.config.policy == ConnectionPolicy::SkipFrame
                        && err.kind != ErrorKind::BadState
                    {
                        tracing::warn!("Skipping frame {}: {}", frame.sequence(), err.source);
                        self.frames_skipped += 1;
                        continue;
                    }
                    return Err(self.fatal(err));
                }
            }
        }
    }

    fn decrypt(&mut self, frame: &Frame) -> std::result::Result<PlaintextFrame, ConnectionError> {
        let session = self.session.as_mut().ok_or_else(|| {
            ConnectionError::new(
                SessionError::BadState {
                    operation: "next_plaintext",
                    state: "no cipher session",
                }
                .into(),
                Some(frame.sequence()),
            )
        })?;

        decrypt_frame(session.cipher_mut(), frame).map_err(|partial| ConnectionError {
            kind: partial.error.kind(),
            sequence: Some(partial.sequence),
            source: partial.error,
            partial: partial.chunks,
        })
    }

    /// Tear the connection down after a fatal error: release the backend
    /// session, signal transport shutdown and refuse further calls.
    fn fatal(&mut self, err: ConnectionError) -> ConnectionError {
        tracing::error!("Connection with {} failed: {}", self.transport.peer_label(), err);
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close() {
                tracing::warn!("Releasing session after failure: {}", e);
            }
        }
        self.peer = None;
        self.transport.shutdown_handle().close();
        self.failed = Some(err.kind);
        err
    }

    /// Kind of the fatal error that ended this connection, if any.
    #[must_use]
    pub fn failure(&self) -> Option<ErrorKind> {
        self.failed
    }

    /// Encrypt `plaintext` for the peer and send it as one frame.
    ///
    /// Uses the peer public key after [`handshake_as_sender`](Self::handshake_as_sender),
    /// otherwise an attached symmetric session.
    ///
    /// # Errors
    ///
    /// `BadState` without a peer key or symmetric session; encryption and
    /// channel errors otherwise.
    pub async fn send_plaintext(&mut self, plaintext: &[u8]) -> std::result::Result<u64, ConnectionError> {
        let sequence = self.transport.next_send_sequence();
        self.ensure_usable(sequence)?;

        let payload = match (&self.peer, self.session.as_mut()) {
            (Some(encryptor), _) => encryptor.encrypt_payload(plaintext),
            (None, Some(CipherSession::Symmetric(session))) => encrypt_symmetric(session, plaintext),
            _ => Err(SessionError::BadState {
                operation: "send_plaintext",
                state: "no peer key",
            }
            .into()),
        };
        match payload {
            Ok(payload) => self.send_ciphertext(&payload).await,
            Err(e) => Err(self.fatal(ConnectionError::new(e, Some(sequence)))),
        }
    }

    /// Send an already-encrypted payload as one frame.
    ///
    /// # Errors
    ///
    /// Channel errors.
    pub async fn send_ciphertext(&mut self, payload: &[u8]) -> std::result::Result<u64, ConnectionError> {
        let sequence = self.transport.next_send_sequence();
        self.ensure_usable(sequence)?;
        match self.transport.send_frame(payload).await {
            Ok(sent) => Ok(sent),
            Err(e) => Err(self.fatal(ConnectionError::new(e, Some(sequence)))),
        }
    }

    /// Handle that unblocks a pending [`next_plaintext`](Self::next_plaintext).
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.transport.shutdown_handle()
    }

    /// Public key sent during the receiver handshake.
    #[must_use]
    pub fn public_key(&self) -> Option<&ExportedPublicKey> {
        self.public_key.as_ref()
    }

    /// Encryptor built during the sender handshake.
    #[must_use]
    pub fn peer_encryptor(&self) -> Option<&PeerEncryptor> {
        self.peer.as_ref()
    }

    /// Active cipher session.
    #[must_use]
    pub fn session(&self) -> Option<&CipherSession<B>> {
        self.session.as_ref()
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Remote identity for logging.
    #[must_use]
    pub fn peer_label(&self) -> String {
        self.transport.peer_label()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        let transport = self.transport.stats();
        ConnectionStats {
            frames_received: transport.frames_received,
            frames_sent: transport.frames_sent,
            bytes_received: transport.bytes_received,
            bytes_sent: transport.bytes_sent,
            chunks_decrypted: self.chunks_decrypted,
            frames_skipped: self.frames_skipped,
        }
    }

    /// Close the connection: release the backend session, then the channel.
    ///
    /// # Errors
    ///
    /// Returns the backend error if `CloseSession` fails.
    pub async fn close(mut self) -> std::result::Result<ConnectionStats, ConnectionError> {
        if let Some(mut session) = self.session.take() {
            session
                .close()
                .map_err(|e| ConnectionError::new(e, None))?;
        }
        if let Err(e) = self.transport.close().await {
            tracing::debug!("Channel shutdown for {}: {}", self.transport.peer_label(), e);
        }

        let stats = self.stats();
        tracing::info!(
            "Connection with {} closed ({} frames in, {} out)",
            self.transport.peer_label(),
            stats.frames_received,
            stats.frames_sent
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedBackend, shared};
    use std::time::Duration;
    use teeline_crypto::{Algorithm, CipherMode, CipherParams, SoftwareBackend};
    use tokio::io::{AsyncWriteExt, DuplexStream, duplex};

    type Soft = SoftwareBackend;

    fn pair<B: Backend>(
        receiver_backend: SharedBackend<B>,
        config: ConnectionConfig,
    ) -> (Connection<DuplexStream, B>, Connection<DuplexStream, Soft>) {
        let (a, b) = duplex(64 * 1024);
        let receiver = Connection::new(a, receiver_backend, config.clone()).unwrap();
        let sender = Connection::new(b, SharedBackend::new(Soft::new()), config).unwrap();
        (receiver, sender)
    }

    async fn handshake<B: Backend>(
        receiver: &mut Connection<DuplexStream, B>,
        sender: &mut Connection<DuplexStream, Soft>,
    ) {
        let exported = receiver.handshake_as_receiver().await.unwrap();
        let key = sender.handshake_as_sender().await.unwrap();
        assert_eq!(key.to_exported(), exported);
    }

    #[test]
    fn test_config_validation() {
        assert!(ConnectionConfig::default().validate().is_ok());

        let config = ConnectionConfig {
            key_size_bits: 1000,
            ..ConnectionConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::BadParameters);

        let config = ConnectionConfig {
            padding: AsymmetricPadding::OaepSha1,
            input_chunk_size: 100,
            ..ConnectionConfig::default()
        };
        assert!(config.validate().is_err());

        // The receiver's own key frame must fit: 8 + 512 + 3 for 4096 bits
        let config = ConnectionConfig {
            key_size_bits: 4096,
            max_frame_size: 522,
            ..ConnectionConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::BadParameters);
        let config = ConnectionConfig {
            max_frame_size: 523,
            ..config
        };
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_two_block_scenario() {
        let backend = shared(ScriptedBackend::new());
        let (mut receiver, mut sender) = pair(backend.clone(), ConnectionConfig::default());
        handshake(&mut receiver, &mut sender).await;
        assert_eq!(
            receiver.public_key().unwrap().exponent,
            vec![0x01, 0x00, 0x01]
        );

        let plaintext: Vec<u8> = (0u8..64).collect();
        assert_eq!(sender.send_plaintext(&plaintext).await.unwrap(), 0);

        let frame = receiver.next_plaintext().await.unwrap().unwrap();
        assert_eq!(frame.sequence, 0);
        assert_eq!(frame.chunks.len(), 2);
        assert_eq!(frame.concat(), plaintext);
        assert_eq!(backend.call(|b| Ok(b.decrypt_calls())).unwrap(), 2);
        assert_eq!(receiver.stats().chunks_decrypted, 2);
    }

    #[tokio::test]
    async fn test_orderly_close_yields_none() {
        let (mut receiver, mut sender) =
            pair(SharedBackend::new(Soft::new()), ConnectionConfig::default());
        handshake(&mut receiver, &mut sender).await;

        sender.send_plaintext(b"last words").await.unwrap();
        sender.close().await.unwrap();

        assert!(receiver.next_plaintext().await.unwrap().is_some());
        assert!(receiver.next_plaintext().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_mid_frame_is_fatal() {
        let (a, mut raw) = duplex(4096);
        let mut receiver =
            Connection::new(a, SharedBackend::new(Soft::new()), ConnectionConfig::default())
                .unwrap();
        receiver.handshake_as_receiver().await.unwrap();

        raw.write_all(&[0, 0, 0, 0, 0, 0, 1, 0, 0xAA]).await.unwrap();
        drop(raw);

        let err = receiver.next_plaintext().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ChannelClosed);
        assert_eq!(err.sequence, Some(0));
    }

    #[tokio::test]
    async fn test_misaligned_frame_closes_by_default() {
        let backend = shared(ScriptedBackend::new());
        let (mut receiver, mut sender) = pair(backend.clone(), ConnectionConfig::default());
        handshake(&mut receiver, &mut sender).await;

        sender.send_plaintext(b"good").await.unwrap();
        sender.send_ciphertext(&[0u8; 100]).await.unwrap();
        sender.send_plaintext(b"never delivered").await.unwrap();

        assert!(receiver.next_plaintext().await.unwrap().is_some());
        let err = receiver.next_plaintext().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedFrame);
        assert_eq!(err.sequence, Some(1));
        assert!(err.to_string().starts_with("MalformedFrame at frame 1"));

        // The failure tore the connection down
        assert_eq!(receiver.failure(), Some(ErrorKind::MalformedFrame));
        assert!(receiver.session().is_none());
        assert_eq!(backend.call(|b| Ok(b.close_calls())).unwrap(), 1);
        assert_eq!(backend.call(|b| Ok(b.inner().open_sessions())).unwrap(), 0);

        // The valid frame behind the bad one is not decrypted
        let err = receiver.next_plaintext().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ChannelClosed);
        assert_eq!(receiver.stats().frames_received, 2);
        assert_eq!(
            receiver.send_ciphertext(b"x").await.unwrap_err().kind,
            ErrorKind::ChannelClosed
        );

        // Session already released: close does not release it again
        receiver.close().await.unwrap();
        assert_eq!(backend.call(|b| Ok(b.close_calls())).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_bad_state_is_fatal_under_skip_frame() {
        let config = ConnectionConfig {
            policy: ConnectionPolicy::SkipFrame,
            ..ConnectionConfig::default()
        };
        let (mut receiver, mut sender) = pair(SharedBackend::new(Soft::new()), config);

        sender.send_ciphertext(&[0u8; 128]).await.unwrap();
        sender.send_ciphertext(&[0u8; 128]).await.unwrap();

        let err = receiver.next_plaintext().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadState);
        assert_eq!(receiver.stats().frames_skipped, 0);

        let err = receiver.next_plaintext().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ChannelClosed);
        assert_eq!(receiver.stats().frames_received, 1);
    }

    #[tokio::test]
    async fn test_skip_frame_policy() {
        let config = ConnectionConfig {
            policy: ConnectionPolicy::SkipFrame,
            ..ConnectionConfig::default()
        };
        let (mut receiver, mut sender) = pair(SharedBackend::new(Soft::new()), config);
        handshake(&mut receiver, &mut sender).await;

        sender.send_ciphertext(&[0u8; 100]).await.unwrap();
        sender.send_plaintext(b"after the bad frame").await.unwrap();

        let frame = receiver.next_plaintext().await.unwrap().unwrap();
        assert_eq!(frame.sequence, 1);
        assert_eq!(&frame.concat()[..19], b"after the bad frame");
        assert_eq!(receiver.stats().frames_skipped, 1);
    }

    #[tokio::test]
    async fn test_backend_failure_reports_partial_plaintext() {
        let backend = shared(ScriptedBackend::new().fail_decrypt_at(1));
        let (mut receiver, mut sender) = pair(backend, ConnectionConfig::default());
        handshake(&mut receiver, &mut sender).await;

        sender.send_plaintext(&[4u8; 64]).await.unwrap();
        let err = receiver.next_plaintext().await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::BackendFailure);
        assert_eq!(err.partial, vec![vec![4u8; 32]]);
    }

    #[tokio::test]
    async fn test_no_session_is_bad_state() {
        let (mut receiver, mut sender) =
            pair(SharedBackend::new(Soft::new()), ConnectionConfig::default());

        sender.send_ciphertext(&[0u8; 128]).await.unwrap();
        let err = receiver.next_plaintext().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadState);

        // No peer key on the sending side either
        let err = sender.send_plaintext(b"x").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadState);
        assert_eq!(sender.failure(), Some(ErrorKind::BadState));
    }

    #[tokio::test]
    async fn test_shutdown_handle_unblocks_receive() {
        let (mut receiver, _sender) =
            pair(SharedBackend::new(Soft::new()), ConnectionConfig::default());
        let handle = receiver.shutdown_handle();

        let task = tokio::spawn(async move { receiver.next_plaintext().await.map(|f| f.is_none()) });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.close();

        let closed = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(closed);
    }

    #[tokio::test]
    async fn test_close_releases_backend_session_once() {
        let backend = shared(ScriptedBackend::new());
        let (mut receiver, mut sender) = pair(backend.clone(), ConnectionConfig::default());
        handshake(&mut receiver, &mut sender).await;

        receiver.close().await.unwrap();
        assert_eq!(backend.call(|b| Ok(b.close_calls())).unwrap(), 1);
        assert_eq!(backend.call(|b| Ok(b.inner().open_sessions())).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_symmetric_stream() {
        let backend = SharedBackend::new(Soft::new());
        let (a, b) = duplex(4096);
        let mut receiver = Connection::new(a, backend.clone(), ConnectionConfig::default()).unwrap();
        let mut sender = Connection::new(b, backend.clone(), ConnectionConfig::default()).unwrap();

        for (connection, mode) in [
            (&mut receiver, CipherMode::Decrypt),
            (&mut sender, CipherMode::Encrypt),
        ] {
            let mut session = SymmetricSession::open(backend.clone()).unwrap();
            session
                .prepare(CipherParams::new(Algorithm::Ctr, 16, mode).unwrap())
                .unwrap();
            session.set_key(&[0x42; 16]).unwrap();
            session.set_iv(&[0x24; 16]).unwrap();
            connection.attach_symmetric(session).unwrap();
        }

        sender.send_plaintext(b"symmetric frames need no padding").await.unwrap();
        let frame = receiver.next_plaintext().await.unwrap().unwrap();
        assert_eq!(frame.concat(), b"symmetric frames need no padding");
    }
}
