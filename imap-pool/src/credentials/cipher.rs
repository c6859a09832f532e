//! Module dedicated to the AES-256-GCM secret cipher.

use aes_gcm::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;

use super::SecretCipher;
use crate::{Error, Result};

/// Size of the AES-GCM nonce (96 bits).
const NONCE_SIZE: usize = 12;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("invalid AES-256 key: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("invalid base64 encoding")]
    InvalidBase64(#[source] base64::DecodeError),
    #[error("encrypted data too short: {0} bytes")]
    TooShort(usize),
    #[error("AES-GCM encryption failed")]
    Encrypt,
    #[error("AES-GCM decryption failed: wrong key or corrupted data")]
    Decrypt,
    #[error("decrypted data is not valid UTF-8")]
    InvalidUtf8(#[source] std::string::FromUtf8Error),
}

/// The AES-256-GCM secret cipher.
///
/// Ciphertexts are base64 encoded `nonce || ciphertext`, a fresh
/// random nonce being generated for every encryption.
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    pub fn new(key: &[u8]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| CipherError::InvalidKeyLength(key.len()))
            .map_err(|err| Error::DecryptCredentialsError(Box::new(err)))?;

        Ok(Self { cipher })
    }

    /// Build a cipher from a base64 encoded 32 bytes key.
    pub fn from_base64_key(key: &str) -> Result<Self> {
        let key = BASE64
            .decode(key.trim())
            .map_err(CipherError::InvalidBase64)
            .map_err(|err| Error::DecryptCredentialsError(Box::new(err)))?;

        Self::new(&key)
    }
}

impl SecretCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| Error::EncryptCredentialsError(Box::new(CipherError::Encrypt)))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(combined))
    }

    fn decrypt(&self, encrypted: &str) -> Result<String> {
        let decrypt = || -> std::result::Result<String, CipherError> {
            let combined = BASE64
                .decode(encrypted)
                .map_err(CipherError::InvalidBase64)?;

            if combined.len() < NONCE_SIZE {
                return Err(CipherError::TooShort(combined.len()));
            }

            let (nonce, ciphertext) = combined.split_at(NONCE_SIZE);

            let plaintext = self
                .cipher
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| CipherError::Decrypt)?;

            String::from_utf8(plaintext).map_err(CipherError::InvalidUtf8)
        };

        decrypt().map_err(|err| Error::DecryptCredentialsError(Box::new(err)))
    }
}

#[cfg(test)]
mod tests {
    use super::{AesGcmCipher, SecretCipher};
    use crate::ErrorCode;

    const KEY: [u8; 32] = [7; 32];

    #[test]
    fn encrypt_then_decrypt() {
        let cipher = AesGcmCipher::new(&KEY).unwrap();

        let a = cipher.encrypt("password").unwrap();
        let b = cipher.encrypt("password").unwrap();

        assert_ne!(a, "password");
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), "password");
        assert_eq!(cipher.decrypt(&b).unwrap(), "password");
    }

    #[test]
    fn wrong_key() {
        let encrypted = AesGcmCipher::new(&KEY).unwrap().encrypt("password").unwrap();
        let err = AesGcmCipher::new(&[8; 32])
            .unwrap()
            .decrypt(&encrypted)
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::CredentialsError);
    }

    #[test]
    fn invalid_input() {
        let cipher = AesGcmCipher::new(&KEY).unwrap();
        assert!(cipher.decrypt("not base64!").is_err());
        assert!(cipher.decrypt("AAAA").is_err());
        assert!(AesGcmCipher::new(&[0; 16]).is_err());
    }
}
