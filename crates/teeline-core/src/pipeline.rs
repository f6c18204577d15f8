//! Chunked cipher pipelines.
//!
//! The receiving side carves each frame payload into cipher-block chunks and
//! runs them through the active session strictly in order. The sending side
//! does the reverse: asymmetric input is cut into fixed-size plaintext chunks
//! (the last one zero-padded), each becoming one full cipher block.

use crate::error::{Error, FrameError, Result, SessionError};
use crate::frame::Frame;
use crate::key_exchange::AsymmetricKeyExchange;
use crate::session::SymmetricSession;
use teeline_crypto::{AsymmetricPadding, Backend, PeerPublicKey};

/// A session that transforms one chunk at a time.
pub trait ChunkCipher {
    /// Chunk size in bytes.
    ///
    /// # Errors
    ///
    /// Returns a `BadState` error if the session is not ready to cipher.
    fn chunk_size(&self) -> Result<usize>;

    /// Whether the final chunk of a payload may be shorter than `chunk_size`.
    fn allows_partial_chunk(&self) -> bool;

    /// Transform one chunk.
    ///
    /// # Errors
    ///
    /// Propagates session and backend errors.
    fn transform_chunk(&mut self, chunk: &[u8]) -> Result<Vec<u8>>;
}

impl<B: Backend> ChunkCipher for AsymmetricKeyExchange<B> {
    fn chunk_size(&self) -> Result<usize> {
        self.block_size().ok_or_else(|| {
            SessionError::BadState {
                operation: "decrypt_frame",
                state: "no keypair",
            }
            .into()
        })
    }

    fn allows_partial_chunk(&self) -> bool {
        false
    }

    fn transform_chunk(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        self.decrypt_block(chunk)
    }
}

impl<B: Backend> ChunkCipher for SymmetricSession<B> {
    fn chunk_size(&self) -> Result<usize> {
        self.block_size().ok_or_else(|| {
            SessionError::BadState {
                operation: "cipher_frame",
                state: self.state().as_str(),
            }
            .into()
        })
    }

    fn allows_partial_chunk(&self) -> bool {
        self.algorithm()
            .is_some_and(|algorithm| !algorithm.requires_alignment())
    }

    fn transform_chunk(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        self.cipher_update(chunk)
    }
}

/// Plaintext recovered from one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaintextFrame {
    /// Sequence number of the source frame
    pub sequence: u64,
    /// One entry per cipher chunk, in arrival order
    pub chunks: Vec<Vec<u8>>,
}

impl PlaintextFrame {
    /// Concatenate all chunks.
    #[must_use]
    pub fn concat(&self) -> Vec<u8> {
        self.chunks.concat()
    }

    /// Total plaintext length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Whether no plaintext was produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A frame whose decryption stopped at a failing chunk.
#[derive(Debug, thiserror::Error)]
#[error("frame {sequence}: aborted after {} chunks: {error}", .chunks.len())]
pub struct PartialDecrypt {
    /// Sequence number of the source frame
    pub sequence: u64,
    /// Chunks decrypted before the failure
    pub chunks: Vec<Vec<u8>>,
    /// Cause
    #[source]
    pub error: Error,
}

/// Split `payload` into chunks for `cipher`, validating alignment.
fn chunk_plan<C: ChunkCipher + ?Sized>(cipher: &C, payload_len: usize) -> Result<usize> {
    let chunk_size = cipher.chunk_size()?;
    if payload_len % chunk_size != 0 && !cipher.allows_partial_chunk() {
        return Err(FrameError::Misaligned {
            length: payload_len,
            block_size: chunk_size,
        }
        .into());
    }
    Ok(chunk_size)
}

/// Decrypt one frame chunk by chunk, in order.
///
/// # Errors
///
/// Returns a [`PartialDecrypt`] holding the chunks produced before the first
/// failure. A misaligned payload fails before any chunk is processed.
pub fn decrypt_frame<C: ChunkCipher + ?Sized>(
    cipher: &mut C,
    frame: &Frame,
) -> std::result::Result<PlaintextFrame, PartialDecrypt> {
    let sequence = frame.sequence();
    let chunk_size = chunk_plan(&*cipher, frame.len()).map_err(|error| PartialDecrypt {
        sequence,
        chunks: Vec::new(),
        error,
    })?;

    let mut chunks = Vec::with_capacity(frame.len().div_ceil(chunk_size));
    for chunk in frame.payload().chunks(chunk_size) {
        match cipher.transform_chunk(chunk) {
            Ok(plaintext) => chunks.push(plaintext),
            Err(error) => {
                return Err(PartialDecrypt {
                    sequence,
                    chunks,
                    error,
                });
            }
        }
    }

    tracing::trace!("Frame {}: {} chunks decrypted", sequence, chunks.len());
    Ok(PlaintextFrame { sequence, chunks })
}

/// Encrypt a payload through a symmetric session in encrypt mode.
///
/// # Errors
///
/// [`FrameError::Misaligned`] if ECB/CBC input is not block aligned; session
/// and backend errors otherwise.
pub fn encrypt_symmetric<B: Backend>(
    session: &mut SymmetricSession<B>,
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let chunk_size = chunk_plan(&*session, plaintext.len())?;
    let mut out = Vec::with_capacity(plaintext.len());
    for chunk in plaintext.chunks(chunk_size) {
        out.extend(session.cipher_update(chunk)?);
    }
    Ok(out)
}

/// Streaming-peer encryptor holding the receiver's public key.
#[derive(Debug, Clone)]
pub struct PeerEncryptor {
    key: PeerPublicKey,
    padding: AsymmetricPadding,
    input_chunk_size: usize,
}

impl PeerEncryptor {
    /// Create an encryptor cutting plaintext into `input_chunk_size` pieces.
    ///
    /// # Errors
    ///
    /// [`SessionError::InputChunkSize`] if the chunk size is zero or above the
    /// padding capacity of one block.
    pub fn new(key: PeerPublicKey, padding: AsymmetricPadding, input_chunk_size: usize) -> Result<Self> {
        let max = key.max_plaintext_len(padding);
        if input_chunk_size == 0 || input_chunk_size > max {
            return Err(SessionError::InputChunkSize {
                size: input_chunk_size,
                max,
            }
            .into());
        }
        Ok(Self {
            key,
            padding,
            input_chunk_size,
        })
    }

    /// Cipher block size of the peer key.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.key.block_size()
    }

    /// Plaintext bytes carried per cipher block.
    #[must_use]
    pub fn input_chunk_size(&self) -> usize {
        self.input_chunk_size
    }

    /// Ciphertext length for `plaintext_len` bytes of input.
    #[must_use]
    pub fn ciphertext_len(&self, plaintext_len: usize) -> usize {
        plaintext_len.div_ceil(self.input_chunk_size) * self.block_size()
    }

    /// Encrypt `plaintext` into a block-aligned frame payload.
    ///
    /// The last input chunk is zero-padded to the full chunk size, so the
    /// receiver sees those zero bytes as trailing plaintext.
    ///
    /// # Errors
    ///
    /// Returns a backend error if block encryption fails.
    pub fn encrypt_payload(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.ciphertext_len(plaintext.len()));
        let mut padded = vec![0u8; self.input_chunk_size];

        for chunk in plaintext.chunks(self.input_chunk_size) {
            let input = if chunk.len() == self.input_chunk_size {
                chunk
            } else {
                padded[..chunk.len()].copy_from_slice(chunk);
                padded[chunk.len()..].fill(0);
                &padded[..]
            };
            out.extend(self.key.encrypt_block(self.padding, input)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{ScriptedBackend, shared};
    use teeline_crypto::{Algorithm, CipherMode, CipherParams, SharedBackend, SoftwareBackend};

    fn keyed_exchange<B: Backend>(backend: SharedBackend<B>) -> (AsymmetricKeyExchange<B>, PeerEncryptor) {
        let mut kx = AsymmetricKeyExchange::open(backend, AsymmetricPadding::Pkcs1v15).unwrap();
        kx.generate_keypair(1024).unwrap();
        let peer = PeerPublicKey::from_exported(&kx.export_public_key().unwrap()).unwrap();
        let encryptor = PeerEncryptor::new(peer, AsymmetricPadding::Pkcs1v15, 32).unwrap();
        (kx, encryptor)
    }

    fn symmetric(backend: SharedBackend<SoftwareBackend>, algorithm: Algorithm, mode: CipherMode) -> SymmetricSession<SoftwareBackend> {
        let mut session = SymmetricSession::open(backend).unwrap();
        session
            .prepare(CipherParams::new(algorithm, 32, mode).unwrap())
            .unwrap();
        session.set_key(&[0x5A; 32]).unwrap();
        session.set_iv(&[0xA5; 16]).unwrap();
        session
    }

    #[test]
    fn test_two_block_frame_in_order() {
        let backend = shared(ScriptedBackend::new());
        let (mut kx, encryptor) = keyed_exchange(backend.clone());

        let plaintext: Vec<u8> = (0..64).collect();
        let payload = encryptor.encrypt_payload(&plaintext).unwrap();
        assert_eq!(payload.len(), 256);

        let frame = Frame::new(1, payload);
        let result = decrypt_frame(&mut kx, &frame).unwrap();
        assert_eq!(result.sequence, 1);
        assert_eq!(result.chunks.len(), 2);
        assert_eq!(result.chunks[0], &plaintext[..32]);
        assert_eq!(result.chunks[1], &plaintext[32..]);
        assert_eq!(backend.call(|b| Ok(b.decrypt_calls())).unwrap(), 2);
    }

    #[test]
    fn test_last_chunk_zero_padded() {
        let (mut kx, encryptor) = keyed_exchange(SharedBackend::new(SoftwareBackend::new()));
        assert_eq!(encryptor.ciphertext_len(40), 256);

        let payload = encryptor.encrypt_payload(b"forty bytes of plaintext, split in two!!").unwrap();
        let result = decrypt_frame(&mut kx, &Frame::new(0, payload)).unwrap();
        let plaintext = result.concat();

        assert_eq!(plaintext.len(), 64);
        assert_eq!(&plaintext[..40], b"forty bytes of plaintext, split in two!!");
        assert!(plaintext[40..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_empty_frame_yields_no_chunks() {
        let (mut kx, _) = keyed_exchange(SharedBackend::new(SoftwareBackend::new()));
        let result = decrypt_frame(&mut kx, &Frame::new(0, Vec::new())).unwrap();
        assert!(result.chunks.is_empty());
        assert!(result.is_empty());
    }

    #[test]
    fn test_misaligned_asymmetric_frame() {
        let (mut kx, _) = keyed_exchange(SharedBackend::new(SoftwareBackend::new()));
        let err = decrypt_frame(&mut kx, &Frame::new(3, vec![0u8; 200])).unwrap_err();

        assert_eq!(err.sequence, 3);
        assert!(err.chunks.is_empty());
        assert_eq!(err.error.kind(), ErrorKind::MalformedFrame);
    }

    #[test]
    fn test_failure_mid_frame_keeps_partial_output() {
        let backend = shared(ScriptedBackend::new().fail_decrypt_at(1));
        let (mut kx, encryptor) = keyed_exchange(backend.clone());

        let payload = encryptor.encrypt_payload(&[9u8; 96]).unwrap();
        let err = decrypt_frame(&mut kx, &Frame::new(0, payload)).unwrap_err();

        assert_eq!(err.chunks, vec![vec![9u8; 32]]);
        assert_eq!(err.error.kind(), ErrorKind::BackendFailure);
        // The third block is never attempted
        assert_eq!(backend.call(|b| Ok(b.decrypt_calls())).unwrap(), 2);
    }

    #[test]
    fn test_decrypt_without_keypair() {
        let mut kx = AsymmetricKeyExchange::open(
            SharedBackend::new(SoftwareBackend::new()),
            AsymmetricPadding::Pkcs1v15,
        )
        .unwrap();
        let err = decrypt_frame(&mut kx, &Frame::new(0, vec![0u8; 128])).unwrap_err();
        assert_eq!(err.error.kind(), ErrorKind::BadState);
    }

    #[test]
    fn test_symmetric_ctr_allows_partial_chunk() {
        let backend = SharedBackend::new(SoftwareBackend::new());
        let mut enc = symmetric(backend.clone(), Algorithm::Ctr, CipherMode::Encrypt);
        let mut dec = symmetric(backend, Algorithm::Ctr, CipherMode::Decrypt);

        let plaintext = b"not a multiple of sixteen bytes";
        let ciphertext = encrypt_symmetric(&mut enc, plaintext).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len());

        let result = decrypt_frame(&mut dec, &Frame::new(0, ciphertext)).unwrap();
        assert_eq!(result.chunks.len(), 2);
        assert_eq!(result.concat(), plaintext);
    }

    #[test]
    fn test_symmetric_cbc_requires_alignment() {
        let backend = SharedBackend::new(SoftwareBackend::new());
        let mut enc = symmetric(backend.clone(), Algorithm::Cbc, CipherMode::Encrypt);
        let mut dec = symmetric(backend, Algorithm::Cbc, CipherMode::Decrypt);

        let err = encrypt_symmetric(&mut enc, &[1u8; 20]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedFrame);

        let ciphertext = encrypt_symmetric(&mut enc, &[1u8; 48]).unwrap();
        let result = decrypt_frame(&mut dec, &Frame::new(0, ciphertext)).unwrap();
        assert_eq!(result.concat(), vec![1u8; 48]);
    }

    #[test]
    fn test_input_chunk_size_bounds() {
        let (_kx, encryptor) = keyed_exchange(SharedBackend::new(SoftwareBackend::new()));
        let key = encryptor.key.clone();

        assert!(PeerEncryptor::new(key.clone(), AsymmetricPadding::Pkcs1v15, 117).is_ok());
        assert_eq!(
            PeerEncryptor::new(key.clone(), AsymmetricPadding::Pkcs1v15, 118)
                .unwrap_err()
                .kind(),
            ErrorKind::BadParameters
        );
        assert!(PeerEncryptor::new(key, AsymmetricPadding::OaepSha1, 0).is_err());
    }
}
