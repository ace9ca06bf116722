//! miio payload encryption and decryption.
//! AES-128-CBC with key and IV derived from the device token through MD5.

use crate::error::{MiioError, Result};
use aes::Aes128;
use cbc::{Decryptor, Encryptor};
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use md5::{Digest, Md5};

/// Length of a device token in bytes
pub const TOKEN_LEN: usize = 16;

const BLOCK_SIZE: usize = 16;

/// MD5 over the concatenation of `parts`.
pub fn md5_concat(parts: &[&[u8]]) -> [u8; 16] {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Decode a 32 character hex token into its raw 16 bytes.
pub fn decode_token(token_hex: &str) -> Result<[u8; TOKEN_LEN]> {
    let bytes = hex::decode(token_hex.trim())
        .map_err(|e| MiioError::InvalidToken(format!("{}: {}", token_hex, e)))?;
    bytes.as_slice().try_into().map_err(|_| {
        MiioError::InvalidToken(format!(
            "expected {} bytes, got {}",
            TOKEN_LEN,
            bytes.len()
        ))
    })
}

/// MiioCipher holds the token of one device and the key/IV derived from it.
#[derive(Clone)]
pub struct MiioCipher {
    /// Raw device token, also mixed into packet checksums
    token: [u8; TOKEN_LEN],
    /// MD5(token)
    key: [u8; 16],
    /// MD5(key ++ token)
    iv: [u8; 16],
}

impl MiioCipher {
    /// Create a new MiioCipher from a raw 16-byte token.
    pub fn new(token: &[u8]) -> Result<Self> {
        let token: [u8; TOKEN_LEN] = token
            .try_into()
            .map_err(|_| MiioError::EncryptionFailed)?;
        let key = md5_concat(&[&token]);
        let iv = md5_concat(&[&key, &token]);
        Ok(Self { token, key, iv })
    }

    /// Create a new MiioCipher from the hex form stored in the device table.
    pub fn from_hex(token_hex: &str) -> Result<Self> {
        Self::new(&decode_token(token_hex)?)
    }

    pub fn token(&self) -> &[u8; TOKEN_LEN] {
        &self.token
    }

    pub fn key(&self) -> &[u8; 16] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }

    /// PKCS#7 pad `data` to the block size and encrypt it.
    ///
    /// Padding is always added, so block-aligned input grows by one full block.
    pub fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        let mut encryptor = Encryptor::<Aes128>::new(&self.key.into(), &self.iv.into());

        let padding_len = BLOCK_SIZE - data.len() % BLOCK_SIZE;
        let mut ciphertext = Vec::with_capacity(data.len() + padding_len);
        ciphertext.extend_from_slice(data);
        ciphertext.resize(data.len() + padding_len, padding_len as u8);

        for chunk in ciphertext.chunks_mut(BLOCK_SIZE) {
            let block = cipher::generic_array::GenericArray::from_mut_slice(chunk);
            encryptor.encrypt_block_mut(block);
        }

        ciphertext
    }

    /// Decrypt `data` and strip padding.
    ///
    /// The last byte is only treated as a pad length when it lies in `1..=16` and
    /// does not exceed the plaintext; anything else leaves the buffer untouched.
    /// The pad bytes themselves are not checked.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if !data.len().is_multiple_of(BLOCK_SIZE) {
            return Err(MiioError::DecryptionFailed);
        }

        let mut decryptor = Decryptor::<Aes128>::new(&self.key.into(), &self.iv.into());
        let mut plaintext = data.to_vec();

        for chunk in plaintext.chunks_mut(BLOCK_SIZE) {
            let block = cipher::generic_array::GenericArray::from_mut_slice(chunk);
            decryptor.decrypt_block_mut(block);
        }

        if let Some(&last) = plaintext.last() {
            let pad_len = last as usize;
            if (1..=BLOCK_SIZE).contains(&pad_len) && pad_len <= plaintext.len() {
                plaintext.truncate(plaintext.len() - pad_len);
            }
        }
        Ok(plaintext)
    }
}
