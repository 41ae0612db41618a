//! Authenticated encryption of sensitive values at rest.
//!
//! Blob layout, base64 encoded: `version(1) || salt(16) || iv(12) ||
//! ciphertext || tag(16)`. A fresh salt and IV are drawn per call; the
//! version byte is bound as associated data.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;

use super::error::AccessError;
use super::metrics;

pub const VAULT_FORMAT_V1: u8 = 1;

const SALT_SIZE: usize = 16;
const IV_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const KEY_SIZE: usize = 32;
const HEADER_SIZE: usize = 1 + SALT_SIZE + IV_SIZE;

/// Argon2id cost parameters for the per-record key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    fn to_argon2(self) -> Result<Params, argon2::Error> {
        Params::new(self.memory_kib, self.iterations, self.parallelism, Some(KEY_SIZE))
    }
}

#[derive(Clone)]
pub struct CredentialVault {
    master_secret: Arc<Secret<String>>,
    params: Params,
}

impl CredentialVault {
    pub fn new(master_secret: Secret<String>, kdf: KdfParams) -> Result<Self, AccessError> {
        if master_secret.expose_secret().is_empty() {
            return Err(AccessError::ValidationError(
                "Vault master secret must not be empty".to_string(),
            ));
        }
        let params = kdf
            .to_argon2()
            .map_err(|e| AccessError::ValidationError(format!("Invalid KDF parameters: {}", e)))?;

        tracing::info!(
            memory_kib = kdf.memory_kib,
            iterations = kdf.iterations,
            parallelism = kdf.parallelism,
            "Credential vault initialized"
        );
        Ok(Self {
            master_secret: Arc::new(master_secret),
            params,
        })
    }

    /// Encrypts on the blocking pool; key derivation is CPU-bound.
    pub async fn encrypt(&self, plaintext: Vec<u8>) -> Result<String, AccessError> {
        let vault = self.clone();
        tokio::task::spawn_blocking(move || vault.seal(&plaintext))
            .await
            .map_err(|e| AccessError::Internal(anyhow::anyhow!("Vault task failed: {}", e)))?
    }

    pub async fn decrypt(&self, blob: String) -> Result<Vec<u8>, AccessError> {
        let vault = self.clone();
        tokio::task::spawn_blocking(move || vault.open(&blob))
            .await
            .map_err(|e| AccessError::Internal(anyhow::anyhow!("Vault task failed: {}", e)))?
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<String, AccessError> {
        let mut salt = [0u8; SALT_SIZE];
        let mut iv = [0u8; IV_SIZE];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut iv);

        let cipher = self.cipher(&salt).map_err(AccessError::Internal)?;
        let version = [VAULT_FORMAT_V1];
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: plaintext,
                    aad: &version,
                },
            )
            .map_err(|e| AccessError::Internal(anyhow::anyhow!("Encryption failed: {}", e)))?;

        let mut blob = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
        blob.push(VAULT_FORMAT_V1);
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(blob))
    }

    /// Every failure, malformed input included, is reported as
    /// `AuthenticationFailed`.
    pub fn open(&self, blob: &str) -> Result<Vec<u8>, AccessError> {
        self.try_open(blob).map_err(|reason| {
            metrics::record_vault_failure();
            tracing::warn!(reason = %reason, "Vault blob rejected");
            AccessError::AuthenticationFailed
        })
    }

    fn try_open(&self, blob: &str) -> Result<Vec<u8>, anyhow::Error> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(blob.trim())
            .map_err(|e| anyhow::anyhow!("Base64 decode failed: {}", e))?;

        if raw.len() < HEADER_SIZE + TAG_SIZE {
            anyhow::bail!("Blob too short");
        }
        if raw[0] != VAULT_FORMAT_V1 {
            anyhow::bail!("Unknown blob version {}", raw[0]);
        }

        let salt = &raw[1..1 + SALT_SIZE];
        let iv = &raw[1 + SALT_SIZE..HEADER_SIZE];
        let cipher = self.cipher(salt)?;
        cipher
            .decrypt(
                Nonce::from_slice(iv),
                Payload {
                    msg: &raw[HEADER_SIZE..],
                    aad: &raw[..1],
                },
            )
            .map_err(|_| anyhow::anyhow!("Tag verification failed"))
    }

    fn cipher(&self, salt: &[u8]) -> Result<Aes256Gcm, anyhow::Error> {
        let mut key = [0u8; KEY_SIZE];
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
            .hash_password_into(self.master_secret.expose_secret().as_bytes(), salt, &mut key)
            .map_err(|e| anyhow::anyhow!("Key derivation failed: {}", e))?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| anyhow::anyhow!("Key init failed: {}", e))?;
        key.fill(0);
        Ok(cipher)
    }
}
