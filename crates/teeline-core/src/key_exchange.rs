//! Asymmetric key exchange.
//!
//! The key-generating party asks the backend for a keypair, exports the public
//! half and sends it as the first frame. The peer encrypts fixed-size blocks
//! with it; each block comes back through [`AsymmetricKeyExchange::decrypt_block`].
//!
//! Public-key payload:
//!
//! ```text
//! +----------------+-----------------+-----------+------------+
//! | mod_len u32 BE | exp_len u32 BE  | modulus   | exponent   |
//! +----------------+-----------------+-----------+------------+
//! ```

use crate::PUBLIC_KEY_HEADER_SIZE;
use crate::error::{FrameError, Result, SessionError};
use crate::session::{BackendSession, call_sized};
use std::fmt;
use teeline_crypto::{
    AsymmetricPadding, Backend, ExportedPublicKey, PublicAttribute, SessionHandle, SharedBackend,
    rsa_block_size,
};

/// Initial exponent buffer; exponents wider than this are re-queried.
const EXPONENT_BUFFER_SIZE: usize = 8;

/// Keypair holder and block decryptor bound to one backend session.
pub struct AsymmetricKeyExchange<B: Backend> {
    session: BackendSession<B>,
    padding: AsymmetricPadding,
    key_size_bits: Option<u32>,
}

impl<B: Backend> AsymmetricKeyExchange<B> {
    /// Open a backend session. No keypair exists yet.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] if the backend cannot open a session.
    pub fn open(backend: SharedBackend<B>, padding: AsymmetricPadding) -> Result<Self> {
        Ok(Self {
            session: BackendSession::open(backend)?,
            padding,
            key_size_bits: None,
        })
    }

    /// Generate a keypair, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns a `BadParameters` backend error for unsupported key sizes.
    pub fn generate_keypair(&mut self, key_size_bits: u32) -> Result<()> {
        self.session
            .invoke(|b, h| b.generate_keypair(h, key_size_bits))?;
        self.key_size_bits = Some(key_size_bits);

        tracing::debug!(
            "Session {:?}: generated {}-bit keypair",
            self.session.handle(),
            key_size_bits
        );
        Ok(())
    }

    fn require_key(&self, operation: &'static str) -> Result<u32> {
        if self.session.handle().is_none() {
            return Err(SessionError::Closed.into());
        }
        self.key_size_bits.ok_or_else(|| {
            SessionError::BadState {
                operation,
                state: "no keypair",
            }
            .into()
        })
    }

    /// Export modulus and exponent.
    ///
    /// # Errors
    ///
    /// [`SessionError::BadState`] before `generate_keypair`; backend errors
    /// otherwise.
    pub fn export_public_key(&self) -> Result<ExportedPublicKey> {
        let bits = self.require_key("export_public_key")?;

        let query = |attribute: PublicAttribute, initial: usize| {
            call_sized(initial, |out| {
                self.session
                    .invoke(|b, h| b.get_public_key(h, attribute, out))
            })
        };
        let modulus = query(PublicAttribute::Modulus, rsa_block_size(bits))?;
        let exponent = query(PublicAttribute::Exponent, EXPONENT_BUFFER_SIZE)?;

        Ok(ExportedPublicKey::new(modulus, exponent))
    }

    /// Decrypt exactly one cipher block.
    ///
    /// # Errors
    ///
    /// [`SessionError::BadState`] before `generate_keypair`,
    /// [`SessionError::BlockLength`] for any length other than the block size.
    pub fn decrypt_block(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let block_size = rsa_block_size(self.require_key("decrypt_block")?);
        if ciphertext.len() != block_size {
            return Err(SessionError::BlockLength {
                expected: block_size,
                actual: ciphertext.len(),
            }
            .into());
        }

        let padding = self.padding;
        call_sized(block_size, |out| {
            self.session
                .invoke(|b, h| b.asymmetric_decrypt(h, padding, ciphertext, out))
        })
    }

    /// Encrypt one block with the session's own public key.
    ///
    /// # Errors
    ///
    /// [`SessionError::BadState`] before `generate_keypair`,
    /// [`SessionError::PlaintextTooLong`] above the padding capacity.
    pub fn encrypt_block(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let block_size = rsa_block_size(self.require_key("encrypt_block")?);
        let max = self.padding.max_plaintext_len(block_size);
        if plaintext.len() > max {
            return Err(SessionError::PlaintextTooLong {
                len: plaintext.len(),
                max,
            }
            .into());
        }

        let padding = self.padding;
        call_sized(block_size, |out| {
            self.session
                .invoke(|b, h| b.asymmetric_encrypt(h, padding, plaintext, out))
        })
    }

    /// Cipher block size in bytes, once a keypair exists.
    #[must_use]
    pub fn block_size(&self) -> Option<usize> {
        self.key_size_bits.map(rsa_block_size)
    }

    /// Key size in bits, once a keypair exists.
    #[must_use]
    pub fn key_size_bits(&self) -> Option<u32> {
        self.key_size_bits
    }

    /// Block padding scheme.
    #[must_use]
    pub fn padding(&self) -> AsymmetricPadding {
        self.padding
    }

    /// Backend handle, `None` once closed.
    #[must_use]
    pub fn handle(&self) -> Option<SessionHandle> {
        self.session.handle()
    }

    /// Release the backend session and its keypair.
    ///
    /// # Errors
    ///
    /// Returns the backend error if `CloseSession` fails.
    pub fn close(&mut self) -> Result<()> {
        self.key_size_bits = None;
        self.session.close()
    }
}

impl<B: Backend> fmt::Debug for AsymmetricKeyExchange<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsymmetricKeyExchange")
            .field("handle", &self.handle())
            .field("padding", &self.padding)
            .field("key_size_bits", &self.key_size_bits)
            .finish()
    }
}

/// Encode an exported public key as a frame payload.
#[must_use]
pub fn encode_public_key(key: &ExportedPublicKey) -> Vec<u8> {
    let mut out =
        Vec::with_capacity(PUBLIC_KEY_HEADER_SIZE + key.modulus.len() + key.exponent.len());
    out.extend_from_slice(&key.modulus_len().to_be_bytes());
    out.extend_from_slice(&key.exponent_len().to_be_bytes());
    out.extend_from_slice(&key.modulus);
    out.extend_from_slice(&key.exponent);
    out
}

/// Decode a public-key frame payload.
///
/// # Errors
///
/// [`FrameError::PublicKeyTooShort`] below the 8-byte header,
/// [`FrameError::PublicKeyLength`] if the declared lengths do not exactly
/// cover the rest of the payload, [`SessionError::InvalidPublicKey`] for an
/// empty modulus or exponent.
pub fn decode_public_key(payload: &[u8]) -> Result<ExportedPublicKey> {
    if payload.len() < PUBLIC_KEY_HEADER_SIZE {
        return Err(FrameError::PublicKeyTooShort(payload.len()).into());
    }

    let (header, body) = payload.split_at(PUBLIC_KEY_HEADER_SIZE);
    let (mod_len, exp_len) = header.split_at(4);
    let mod_len = u32::from_be_bytes([mod_len[0], mod_len[1], mod_len[2], mod_len[3]]);
    let exp_len = u32::from_be_bytes([exp_len[0], exp_len[1], exp_len[2], exp_len[3]]);

    let declared = u64::from(mod_len) + u64::from(exp_len);
    if declared != body.len() as u64 {
        return Err(FrameError::PublicKeyLength {
            declared,
            actual: body.len(),
        }
        .into());
    }
    if mod_len == 0 || exp_len == 0 {
        return Err(SessionError::InvalidPublicKey("empty modulus or exponent".to_string()).into());
    }

    let (modulus, exponent) = body.split_at(mod_len as usize);
    Ok(ExportedPublicKey::new(modulus.to_vec(), exponent.to_vec()))
}
