//! Block cipher capability used by the frame codec.
//!
//! Frames are encrypted block by block (16 bytes, no chaining) with AES-256.
//! The key is derived from a 16-bit seed shared by every node of a network,
//! so the effective keyspace is 65,536 keys. Nodes only interoperate when the
//! derivation is identical, do not change it.
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;
use sha2::{Digest, Sha256};

pub const BLOCK_SIZE: usize = 16;

/// Encrypt/decrypt whole 16-byte blocks in place.
pub trait BlockCipher {
    /// Keys the cipher from a network key seed.
    fn from_seed(seed: u16) -> Self
    where
        Self: Sized;

    fn encrypt_blocks(&self, buf: &mut [u8]) -> Result<(), CipherError>;
    fn decrypt_blocks(&self, buf: &mut [u8]) -> Result<(), CipherError>;
}

/// AES-256 keyed from a 16-bit seed.
#[derive(Clone)]
pub struct Aes256Cipher {
    inner: Aes256,
    seed: u16,
}

impl Aes256Cipher {
    pub fn seed(&self) -> u16 {
        self.seed
    }
}

impl std::fmt::Debug for Aes256Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aes256Cipher").finish_non_exhaustive()
    }
}

impl BlockCipher for Aes256Cipher {
    fn from_seed(seed: u16) -> Self {
        let key = derive_key(seed);
        Self {
            inner: Aes256::new(GenericArray::from_slice(&key)),
            seed,
        }
    }

    fn encrypt_blocks(&self, buf: &mut [u8]) -> Result<(), CipherError> {
        check_aligned(buf)?;
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            self.inner.encrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    fn decrypt_blocks(&self, buf: &mut [u8]) -> Result<(), CipherError> {
        check_aligned(buf)?;
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            self.inner.decrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }
}

/// 32-byte key material: SHA-256 over the seed, high byte first.
pub fn derive_key(seed: u16) -> [u8; 32] {
    let mut key = [0u8; 32];
    key.copy_from_slice(&Sha256::digest(seed.to_be_bytes()));
    key
}

/// Number of cipher blocks needed to hold `len` bytes.
pub fn blocks_for(len: usize) -> usize {
    (len + BLOCK_SIZE - 1) / BLOCK_SIZE
}

fn check_aligned(buf: &[u8]) -> Result<(), CipherError> {
    if buf.len() % BLOCK_SIZE != 0 {
        return Err(CipherError::Misaligned { len: buf.len() });
    }
    Ok(())
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("Buffer of {}B is not a whole number of {}B blocks.", .len, BLOCK_SIZE)]
    Misaligned { len: usize },
}
