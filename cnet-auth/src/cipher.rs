//! Authenticated encryption for credentials stored at rest.
//!
//! Ciphertexts are self-describing strings of the form
//! `salt:nonce:ciphertext`, each part hex encoded. The AES-256-GCM key is
//! derived per value from the operator password and the random salt with
//! Argon2id, so two encryptions of the same secret never match.
//!
//! Derivation is deliberately slow. [`AesGcmCipher`] keeps the keys it has
//! derived, keyed by salt, so a stored credential that is decrypted on every
//! health check pays for Argon2 once. Async callers should still go through
//! [`encrypt_blocking`] and [`decrypt_blocking`], which run the work on the
//! blocking pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use argon2::Argon2;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const SALT_SIZE: usize = 32;
/// Derived keys kept before the cache is flushed.
const MAX_CACHED_KEYS: usize = 256;

type DerivedKey = Zeroizing<[u8; KEY_SIZE]>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("encryption password is not configured")]
    MissingPassword,
    #[error("invalid encrypted data format")]
    InvalidFormat,
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("encryption failed")]
    Encryption,
    #[error("decryption failed")]
    Decryption,
    #[error("cipher task failed: {0}")]
    Task(String),
}

/// `encrypt(plaintext) -> ciphertext` / `decrypt(ciphertext) -> plaintext`.
pub trait SecretCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError>;

    fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError>;
}

/// AES-256-GCM with an Argon2id-derived key.
pub struct AesGcmCipher {
    password: Zeroizing<String>,
    keys: Mutex<HashMap<[u8; SALT_SIZE], DerivedKey>>,
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher").finish_non_exhaustive()
    }
}

impl AesGcmCipher {
    pub fn new(password: impl Into<String>) -> Result<Self, CipherError> {
        let password = password.into();
        if password.is_empty() {
            return Err(CipherError::MissingPassword);
        }
        Ok(Self {
            password: Zeroizing::new(password),
            keys: Mutex::new(HashMap::new()),
        })
    }

    fn derive_key(&self, salt: &[u8; SALT_SIZE]) -> Result<DerivedKey, CipherError> {
        if let Some(key) = self.cached_key(salt) {
            return Ok(key);
        }

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        Argon2::default()
            .hash_password_into(self.password.as_bytes(), salt, key.as_mut())
            .map_err(|e| CipherError::KeyDerivation(e.to_string()))?;

        if let Ok(mut keys) = self.keys.lock() {
            if keys.len() >= MAX_CACHED_KEYS {
                keys.clear();
            }
            keys.insert(*salt, key.clone());
        }
        Ok(key)
    }

    fn cached_key(&self, salt: &[u8; SALT_SIZE]) -> Option<DerivedKey> {
        self.keys.lock().ok()?.get(salt).cloned()
    }

    #[cfg(test)]
    fn cached_keys(&self) -> usize {
        self.keys.lock().map(|k| k.len()).unwrap_or(0)
    }
}

impl SecretCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let key = self.derive_key(&salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| CipherError::Encryption)?;

        Ok(format!(
            "{}:{}:{}",
            hex::encode(salt),
            hex::encode(nonce_bytes),
            hex::encode(ciphertext)
        ))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError> {
        let mut parts = ciphertext.split(':');
        let (Some(salt), Some(nonce), Some(body), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CipherError::InvalidFormat);
        };
        let salt: [u8; SALT_SIZE] = hex::decode(salt)
            .ok()
            .and_then(|s| s.try_into().ok())
            .ok_or(CipherError::InvalidFormat)?;
        let nonce = hex::decode(nonce).map_err(|_| CipherError::InvalidFormat)?;
        let body = hex::decode(body).map_err(|_| CipherError::InvalidFormat)?;
        if nonce.len() != NONCE_SIZE || body.is_empty() {
            return Err(CipherError::InvalidFormat);
        }

        let key = self.derive_key(&salt)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&nonce), body.as_slice())
                .map_err(|_| CipherError::Decryption)?,
        );
        String::from_utf8(plaintext.to_vec()).map_err(|_| CipherError::Decryption)
    }
}

/// [`SecretCipher::encrypt`] on the blocking pool.
pub async fn encrypt_blocking(
    cipher: Arc<dyn SecretCipher>,
    plaintext: Zeroizing<String>,
) -> Result<String, CipherError> {
    tokio::task::spawn_blocking(move || cipher.encrypt(&plaintext))
        .await
        .map_err(|e| CipherError::Task(e.to_string()))?
}

/// [`SecretCipher::decrypt`] on the blocking pool.
pub async fn decrypt_blocking(
    cipher: Arc<dyn SecretCipher>,
    ciphertext: String,
) -> Result<Zeroizing<String>, CipherError> {
    tokio::task::spawn_blocking(move || cipher.decrypt(&ciphertext).map(Zeroizing::new))
        .await
        .map_err(|e| CipherError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_with_fresh_salt() {
        let cipher = AesGcmCipher::new("operator-password").unwrap();
        let a = cipher.encrypt("plex-token").unwrap();
        let b = cipher.encrypt("plex-token").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.split(':').count(), 3);
        assert_eq!(cipher.decrypt(&a).unwrap(), "plex-token");
        assert_eq!(cipher.decrypt(&b).unwrap(), "plex-token");
    }

    #[test]
    fn wrong_password_fails() {
        let sealed = AesGcmCipher::new("one").unwrap().encrypt("secret").unwrap();
        let other = AesGcmCipher::new("two").unwrap();
        assert_eq!(other.decrypt(&sealed), Err(CipherError::Decryption));
    }

    #[test]
    fn tampered_or_malformed_input_is_rejected() {
        let cipher = AesGcmCipher::new("pw").unwrap();
        let sealed = cipher.encrypt("secret").unwrap();
        let mut tampered = sealed.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == '0' { '1' } else { '0' });
        assert_eq!(cipher.decrypt(&tampered), Err(CipherError::Decryption));

        assert_eq!(cipher.decrypt("abc"), Err(CipherError::InvalidFormat));
        assert_eq!(cipher.decrypt("zz:zz:zz"), Err(CipherError::InvalidFormat));
        assert_eq!(
            cipher.decrypt(&format!("{sealed}:extra")),
            Err(CipherError::InvalidFormat)
        );
    }

    #[test]
    fn keys_are_derived_once_per_salt() {
        let cipher = AesGcmCipher::new("pw").unwrap();
        let sealed = cipher.encrypt("nas-token").unwrap();
        assert_eq!(cipher.cached_keys(), 1);

        for _ in 0..3 {
            assert_eq!(cipher.decrypt(&sealed).unwrap(), "nas-token");
        }
        assert_eq!(cipher.cached_keys(), 1);

        // a fresh instance derives the same key from the stored salt
        let restarted = AesGcmCipher::new("pw").unwrap();
        assert_eq!(restarted.decrypt(&sealed).unwrap(), "nas-token");
        assert_eq!(restarted.cached_keys(), 1);

        cipher.encrypt("nas-token").unwrap();
        assert_eq!(cipher.cached_keys(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn blocking_helpers_round_trip() {
        let cipher: Arc<dyn SecretCipher> = Arc::new(AesGcmCipher::new("pw").unwrap());
        let sealed = encrypt_blocking(cipher.clone(), Zeroizing::new("proxmox-token".into()))
            .await
            .unwrap();
        let opened = decrypt_blocking(cipher, sealed).await.unwrap();
        assert_eq!(opened.as_str(), "proxmox-token");
    }

    #[test]
    fn empty_password_is_rejected() {
        assert!(matches!(
            AesGcmCipher::new(""),
            Err(CipherError::MissingPassword)
        ));
    }
}
