//! AES cipher streams behind `cipher_update`.

use crate::backend::{
    AES_BLOCK_SIZE, AES128_KEY_SIZE, AES256_KEY_SIZE, Algorithm, CipherMode, CipherParams,
};
use crate::error::{BackendError, BackendResult};
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{
    BlockDecryptMut, BlockEncryptMut, BlockSizeUser, KeyInit, KeyIvInit, StreamCipher,
};
use aes::{Aes128, Aes256};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// A running cipher stream.
///
/// Callers guarantee `output.len() >= input.len()` and block alignment where
/// the algorithm requires it.
pub(crate) trait CipherEngine: Send {
    fn update(&mut self, input: &[u8], output: &mut [u8]) -> BackendResult<usize>;
}

struct KeystreamEngine<C>(C);

impl<C: StreamCipher + Send> CipherEngine for KeystreamEngine<C> {
    fn update(&mut self, input: &[u8], output: &mut [u8]) -> BackendResult<usize> {
        let out = &mut output[..input.len()];
        out.copy_from_slice(input);
        self.0
            .try_apply_keystream(out)
            .map_err(|_| BackendError::Failure("counter space exhausted".to_string()))?;
        Ok(input.len())
    }
}

struct EncryptBlocks<C>(C);

impl<C: BlockEncryptMut + Send> CipherEngine for EncryptBlocks<C> {
    fn update(&mut self, input: &[u8], output: &mut [u8]) -> BackendResult<usize> {
        let out = &mut output[..input.len()];
        out.copy_from_slice(input);
        for block in out.chunks_exact_mut(C::block_size()) {
            self.0.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        Ok(input.len())
    }
}

struct DecryptBlocks<C>(C);

impl<C: BlockDecryptMut + Send> CipherEngine for DecryptBlocks<C> {
    fn update(&mut self, input: &[u8], output: &mut [u8]) -> BackendResult<usize> {
        let out = &mut output[..input.len()];
        out.copy_from_slice(input);
        for block in out.chunks_exact_mut(C::block_size()) {
            self.0.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        Ok(input.len())
    }
}

fn bad_length<E>(_: E) -> BackendError {
    BackendError::bad_parameters("invalid key or IV length")
}

/// Build the cipher stream for a prepared operation.
///
/// ECB ignores `iv`; CTR and CBC require exactly one AES block of IV.
pub(crate) fn build_engine(
    params: &CipherParams,
    key: &[u8],
    iv: &[u8],
) -> BackendResult<Box<dyn CipherEngine>> {
    if params.algorithm.uses_iv() && iv.len() != AES_BLOCK_SIZE {
        return Err(BackendError::bad_parameters(format!(
            "invalid IV size {}, expected {AES_BLOCK_SIZE}",
            iv.len()
        )));
    }

    let engine: Box<dyn CipherEngine> = match (params.algorithm, params.mode, key.len()) {
        // CTR is symmetric in both directions
        (Algorithm::Ctr, _, AES128_KEY_SIZE) => Box::new(KeystreamEngine(
            Aes128Ctr::new_from_slices(key, iv).map_err(bad_length)?,
        )),
        (Algorithm::Ctr, _, AES256_KEY_SIZE) => Box::new(KeystreamEngine(
            Aes256Ctr::new_from_slices(key, iv).map_err(bad_length)?,
        )),
        (Algorithm::Cbc, CipherMode::Encrypt, AES128_KEY_SIZE) => Box::new(EncryptBlocks(
            cbc::Encryptor::<Aes128>::new_from_slices(key, iv).map_err(bad_length)?,
        )),
        (Algorithm::Cbc, CipherMode::Encrypt, AES256_KEY_SIZE) => Box::new(EncryptBlocks(
            cbc::Encryptor::<Aes256>::new_from_slices(key, iv).map_err(bad_length)?,
        )),
        (Algorithm::Cbc, CipherMode::Decrypt, AES128_KEY_SIZE) => Box::new(DecryptBlocks(
            cbc::Decryptor::<Aes128>::new_from_slices(key, iv).map_err(bad_length)?,
        )),
        (Algorithm::Cbc, CipherMode::Decrypt, AES256_KEY_SIZE) => Box::new(DecryptBlocks(
            cbc::Decryptor::<Aes256>::new_from_slices(key, iv).map_err(bad_length)?,
        )),
        (Algorithm::Ecb, CipherMode::Encrypt, AES128_KEY_SIZE) => Box::new(EncryptBlocks(
            Aes128::new_from_slice(key).map_err(bad_length)?,
        )),
        (Algorithm::Ecb, CipherMode::Encrypt, AES256_KEY_SIZE) => Box::new(EncryptBlocks(
            Aes256::new_from_slice(key).map_err(bad_length)?,
        )),
        (Algorithm::Ecb, CipherMode::Decrypt, AES128_KEY_SIZE) => Box::new(DecryptBlocks(
            Aes128::new_from_slice(key).map_err(bad_length)?,
        )),
        (Algorithm::Ecb, CipherMode::Decrypt, AES256_KEY_SIZE) => Box::new(DecryptBlocks(
            Aes256::new_from_slice(key).map_err(bad_length)?,
        )),
        (_, _, other) => {
            return Err(BackendError::bad_parameters(format!(
                "invalid key size {other}"
            )));
        }
    };

    Ok(engine)
}
