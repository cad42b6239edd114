//! Key Vault
//!
//! Wallet private keys are stored sealed. The custody core only ever asks the
//! vault to seal a fresh key or to open one for signing; key management
//! lives behind [`KeyVault`].
//!
//! `AesGcmVault` seals with AES-256-GCM under a key-encryption key supplied
//! from outside the process (an environment variable holding 64 hex chars).
//! Sealed format: hex(nonce || ciphertext || tag).

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, OsRng},
};
use rand::RngCore;
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum VaultError {
    #[error("Key-encryption key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),
}

/// Secret-management capability at the wallet boundary
pub trait KeyVault: Send + Sync {
    fn seal(&self, private_key: &str) -> Result<String, VaultError>;

    fn open(&self, sealed: &str) -> Result<String, VaultError>;
}

pub struct AesGcmVault {
    cipher: Aes256Gcm,
}

impl AesGcmVault {
    pub fn new(kek: [u8; 32]) -> Self {
        let key = aes_gcm::Key::<Aes256Gcm>::from_slice(&kek);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    pub fn from_hex(kek_hex: &str) -> Result<Self, VaultError> {
        let bytes =
            hex::decode(kek_hex.trim()).map_err(|e| VaultError::KeyUnavailable(e.to_string()))?;
        let kek: [u8; 32] = bytes.try_into().map_err(|_| {
            VaultError::KeyUnavailable("key-encryption key must be 32 bytes".to_string())
        })?;
        Ok(Self::new(kek))
    }

    /// Read the hex KEK from `var`
    pub fn from_env(var: &str) -> Result<Self, VaultError> {
        let value = std::env::var(var)
            .map_err(|_| VaultError::KeyUnavailable(format!("{} is not set", var)))?;
        Self::from_hex(&value)
    }

    /// Random KEK held only in memory. Sealed keys do not survive a restart.
    pub fn ephemeral() -> Self {
        let mut kek = [0u8; 32];
        OsRng.fill_bytes(&mut kek);
        Self::new(kek)
    }
}

impl KeyVault for AesGcmVault {
    fn seal(&self, private_key: &str) -> Result<String, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, private_key.as_bytes())
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(hex::encode(sealed))
    }

    fn open(&self, sealed: &str) -> Result<String, VaultError> {
        let bytes = hex::decode(sealed).map_err(|e| VaultError::Decryption(e.to_string()))?;
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(VaultError::Decryption("sealed key too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| VaultError::Decryption(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| VaultError::Decryption(e.to_string()))
    }
}
