//! Exported RSA public keys.
//!
//! The private half of a keypair never leaves the backend. What crosses the
//! boundary is [`ExportedPublicKey`]: the modulus and public exponent as
//! unsigned big-endian octet strings. The streaming peer turns it back into a
//! usable key with [`PeerPublicKey`].

use crate::backend::AsymmetricPadding;
use crate::error::{BackendError, BackendResult};
use rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Oaep, Pkcs1v15Encrypt, RsaPublicKey};
use std::fmt;

/// Public half of a backend keypair.
#[derive(Clone, PartialEq, Eq)]
pub struct ExportedPublicKey {
    /// Modulus `n`, big-endian
    pub modulus: Vec<u8>,
    /// Public exponent `e`, big-endian
    pub exponent: Vec<u8>,
}

impl ExportedPublicKey {
    /// Create from raw octet strings.
    #[must_use]
    pub fn new(modulus: Vec<u8>, exponent: Vec<u8>) -> Self {
        Self { modulus, exponent }
    }

    /// Modulus length in bytes.
    #[must_use]
    pub fn modulus_len(&self) -> u32 {
        self.modulus.len() as u32
    }

    /// Exponent length in bytes.
    #[must_use]
    pub fn exponent_len(&self) -> u32 {
        self.exponent.len() as u32
    }
}

impl fmt::Debug for ExportedPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedPublicKey")
            .field("modulus_len", &self.modulus.len())
            .field("exponent", &self.exponent)
            .finish()
    }
}

/// A peer's public key, ready to encrypt cipher blocks.
#[derive(Clone, Debug)]
pub struct PeerPublicKey {
    key: RsaPublicKey,
}

impl PeerPublicKey {
    /// Rebuild a public key from its exported form.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::BadParameters`] if the modulus or exponent is
    /// empty or does not form a valid RSA public key.
    pub fn from_exported(exported: &ExportedPublicKey) -> BackendResult<Self> {
        if exported.modulus.is_empty() || exported.exponent.is_empty() {
            return Err(BackendError::bad_parameters("empty modulus or exponent"));
        }

        let n = BigUint::from_bytes_be(&exported.modulus);
        let e = BigUint::from_bytes_be(&exported.exponent);
        let key = RsaPublicKey::new(n, e)
            .map_err(|e| BackendError::bad_parameters(format!("invalid public key: {e}")))?;

        Ok(Self { key })
    }

    /// Cipher block size (modulus size in bytes).
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.key.size()
    }

    /// Largest plaintext one block can carry under `padding`.
    #[must_use]
    pub fn max_plaintext_len(&self, padding: AsymmetricPadding) -> usize {
        padding.max_plaintext_len(self.block_size())
    }

    /// Export back to octet strings.
    #[must_use]
    pub fn to_exported(&self) -> ExportedPublicKey {
        export(&self.key)
    }

    /// Encrypt one block. The result is always exactly [`Self::block_size`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::BadParameters`] if `plaintext` exceeds the
    /// padding capacity.
    pub fn encrypt_block(
        &self,
        padding: AsymmetricPadding,
        plaintext: &[u8],
    ) -> BackendResult<Vec<u8>> {
        encrypt_with(&self.key, padding, plaintext)
    }
}

pub(crate) fn export(key: &RsaPublicKey) -> ExportedPublicKey {
    ExportedPublicKey {
        modulus: key.n().to_bytes_be(),
        exponent: key.e().to_bytes_be(),
    }
}

pub(crate) fn encrypt_with(
    key: &RsaPublicKey,
    padding: AsymmetricPadding,
    plaintext: &[u8],
) -> BackendResult<Vec<u8>> {
    let max = padding.max_plaintext_len(key.size());
    if plaintext.len() > max {
        return Err(BackendError::bad_parameters(format!(
            "plaintext of {} bytes exceeds block capacity {max}",
            plaintext.len()
        )));
    }

    let result = match padding {
        AsymmetricPadding::Pkcs1v15 => key.encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext),
        AsymmetricPadding::OaepSha1 => {
            key.encrypt(&mut OsRng, Oaep::new::<sha1::Sha1>(), plaintext)
        }
    };

    result.map_err(|e| BackendError::Failure(format!("RSA encryption failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_parts() {
        let exported = ExportedPublicKey::new(vec![], vec![0x01, 0x00, 0x01]);
        assert!(matches!(
            PeerPublicKey::from_exported(&exported),
            Err(BackendError::BadParameters(_))
        ));
    }

    #[test]
    fn test_lengths() {
        let exported = ExportedPublicKey::new(vec![0xA1; 128], vec![0x01, 0x00, 0x01]);
        assert_eq!(exported.modulus_len(), 128);
        assert_eq!(exported.exponent_len(), 3);
    }

    #[test]
    fn test_debug_hides_modulus_bytes() {
        let exported = ExportedPublicKey::new(vec![0xA1; 4], vec![3]);
        let rendered = format!("{exported:?}");
        assert!(rendered.contains("modulus_len: 4"));
        assert!(!rendered.contains("161"));
    }
}
