//! Authenticated encryption for short secrets at rest (TOTP secrets).
//!
//! AES-GCM with a fresh random 96-bit nonce per call; the nonce is
//! prepended to the ciphertext and the whole blob is standard-base64 for
//! storage in the user record. The key length selects the AES variant; any
//! length other than 16, 24, or 32 bytes is a hard error surfaced at
//! startup.

use aes_gcm::{
    Aes128Gcm, Aes256Gcm, AesGcm, Nonce,
    aead::{Aead, KeyInit, consts::U12},
    aes::Aes192,
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;

type Aes192Gcm = AesGcm<Aes192, U12>;

const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CryptError {
    #[error("encryption key must be 16, 24, or 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("encryption failed")]
    Encrypt,
    #[error("ciphertext is not valid base64")]
    Encoding,
    #[error("ciphertext shorter than the nonce")]
    TooShort,
    #[error("decryption failed")]
    Decrypt,
    #[error("decrypted secret is not valid UTF-8")]
    NotUtf8,
}

enum Cipher {
    Aes128(Box<Aes128Gcm>),
    Aes192(Box<Aes192Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            Cipher::Aes128(_) => "Aes128",
            Cipher::Aes192(_) => "Aes192",
            Cipher::Aes256(_) => "Aes256",
        };
        f.debug_tuple(variant).finish()
    }
}

/// A cipher constructed once from the configured key and shared by all
/// requests.
#[derive(Debug)]
pub struct SecretCipher {
    cipher: Cipher,
}

impl SecretCipher {
    pub fn new(key: &[u8]) -> Result<Self, CryptError> {
        let cipher = match key.len() {
            16 => Cipher::Aes128(Box::new(
                Aes128Gcm::new_from_slice(key)
                    .map_err(|_| CryptError::InvalidKeyLength(key.len()))?,
            )),
            24 => Cipher::Aes192(Box::new(
                Aes192Gcm::new_from_slice(key)
                    .map_err(|_| CryptError::InvalidKeyLength(key.len()))?,
            )),
            32 => Cipher::Aes256(Box::new(
                Aes256Gcm::new_from_slice(key)
                    .map_err(|_| CryptError::InvalidKeyLength(key.len()))?,
            )),
            other => return Err(CryptError::InvalidKeyLength(other)),
        };
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = match &self.cipher {
            Cipher::Aes128(c) => c.encrypt(nonce, plaintext.as_bytes()),
            Cipher::Aes192(c) => c.encrypt(nonce, plaintext.as_bytes()),
            Cipher::Aes256(c) => c.encrypt(nonce, plaintext.as_bytes()),
        }
        .map_err(|_| CryptError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptError> {
        let blob =
            BASE64.decode(encoded).map_err(|_| CryptError::Encoding)?;
        if blob.len() < NONCE_LEN {
            return Err(CryptError::TooShort);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = match &self.cipher {
            Cipher::Aes128(c) => c.decrypt(nonce, ciphertext),
            Cipher::Aes192(c) => c.decrypt(nonce, ciphertext),
            Cipher::Aes256(c) => c.decrypt(nonce, ciphertext),
        }
        .map_err(|_| CryptError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| CryptError::NotUtf8)
    }
}
