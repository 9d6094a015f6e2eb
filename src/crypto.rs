//! Hashing, block ciphers, and random material for the file engine.
//!
//! The descriptor format is built on SHA-1 and AES-128: descriptor
//! locators are truncated SHA-1 digests (optionally passed through one
//! ECB block under the description key), file parts and descriptor
//! blocks are AES-CBC ciphertexts, and configuration keys are wrapped
//! with a single ECB block under a password-derived key.
//!
//! Part encryption is a *stream*: one CBC state is created per open file
//! and chains across every part, so part N's effective IV is the last
//! ciphertext block of part N-1. [`CbcEncryptor`]/[`CbcDecryptor`] keep
//! that chaining state between calls.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit};
use aes::Aes128;
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::{Digest, Sha1};

/// AES-128 block size in bytes. Part and descriptor blocks must be a
/// multiple of this.
pub const AES_BLOCK: usize = 16;

const NICK_SEED: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789abcdefghijklmnopqrstuvwxyz";

/// SHA-1 digest of `data`.
pub fn sha1_digest(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// First 16 bytes of the SHA-1 digest, the size of a descriptor locator
/// and of an AES-128 key.
pub fn sha1_16(data: &[u8]) -> [u8; 16] {
    let digest = sha1_digest(data);
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

/// Derive an AES key from a password.
pub fn password_to_key(password: &str) -> [u8; 16] {
    sha1_16(password.as_bytes())
}

/// Encrypt one 16-byte block with AES-128-ECB.
pub fn ecb_encrypt_block(key: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(key.into());
    let mut buf = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut buf);
    buf.into()
}

/// Decrypt one 16-byte block with AES-128-ECB.
pub fn ecb_decrypt_block(key: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(key.into());
    let mut buf = GenericArray::clone_from_slice(block);
    cipher.decrypt_block(&mut buf);
    buf.into()
}

/// Streaming AES-128-CBC encryptor. The chaining state persists across
/// calls to [`CbcEncryptor::apply`].
pub struct CbcEncryptor(cbc::Encryptor<Aes128>);

impl CbcEncryptor {
    pub fn new(key: &[u8; 16], iv: &[u8; 16]) -> Self {
        Self(cbc::Encryptor::new(key.into(), iv.into()))
    }

    /// Encrypt `buf` in place. `buf.len()` must be a multiple of
    /// [`AES_BLOCK`]; callers validate block sizing before encrypting.
    pub fn apply(&mut self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len() % AES_BLOCK, 0);
        for chunk in buf.chunks_exact_mut(AES_BLOCK) {
            self.0.encrypt_block_mut(GenericArray::from_mut_slice(chunk));
        }
    }
}

/// Streaming AES-128-CBC decryptor, the read-side mirror of
/// [`CbcEncryptor`].
pub struct CbcDecryptor(cbc::Decryptor<Aes128>);

impl CbcDecryptor {
    pub fn new(key: &[u8; 16], iv: &[u8; 16]) -> Self {
        Self(cbc::Decryptor::new(key.into(), iv.into()))
    }

    /// Decrypt `buf` in place. `buf.len()` must be a multiple of
    /// [`AES_BLOCK`].
    pub fn apply(&mut self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len() % AES_BLOCK, 0);
        for chunk in buf.chunks_exact_mut(AES_BLOCK) {
            self.0.decrypt_block_mut(GenericArray::from_mut_slice(chunk));
        }
    }
}

/// OS-backed random bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// A random 16-byte value, used for keys and for the locators of part
/// and chained-descriptor URIs.
pub fn random_key() -> [u8; 16] {
    let mut key = [0u8; 16];
    OsRng.fill_bytes(&mut key);
    key
}

/// A random printable string over `[A-Za-z0-9]`, used for descriptor
/// padding and nicks.
pub fn random_printable(len: usize) -> String {
    let mut out = String::with_capacity(len);
    for _ in 0..len {
        let idx = (OsRng.next_u32() as usize) % NICK_SEED.len();
        out.push(NICK_SEED[idx] as char);
    }
    out
}

/// A random 6-character nick.
pub fn random_nick() -> String {
    random_printable(6)
}
