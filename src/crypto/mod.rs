// src/crypto/mod.rs
// C1: Encryption Service — authenticated symmetric encryption for sensitive
// blobs, with the master key held by the OS secret store and a file fallback.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use rand::RngCore;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{AppError, AppResult, ErrorKind};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const KEYRING_SERVICE: &str = "waddle";
const KEYRING_USER: &str = "master-key";

/// Authenticated symmetric encryption bound to a per-record associated data
/// tag (spec §4.1). A fresh nonce is generated per call and stored alongside
/// the ciphertext; `associatedData` is not encrypted but is authenticated,
/// so a ciphertext cannot be replayed against a different logical record.
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

/// A ciphertext cannot be matched against the expected associated data
/// (either it was tampered with, or it belongs to a different record).
#[derive(Debug, Clone, Copy)]
pub struct InvalidCiphertext;

impl EncryptionService {
    /// Load the master key from the OS secret store; if unavailable, fall
    /// back to a base64-encoded key file under `data_dir` with mode 0600,
    /// generating one on first run.
    pub fn load_or_create(data_dir: &Path) -> AppResult<Self> {
        let key = match Self::load_from_keyring() {
            Some(key) => key,
            None => {
                warn!("OS secret store unavailable; falling back to key file");
                Self::load_or_create_key_file(data_dir)?
            }
        };

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        Ok(Self { cipher })
    }

    fn load_from_keyring() -> Option<[u8; KEY_LEN]> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER).ok()?;
        match entry.get_password() {
            Ok(encoded) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .ok()?;
                bytes.try_into().ok()
            }
            Err(keyring::Error::NoEntry) => {
                let mut key = [0u8; KEY_LEN];
                rand::thread_rng().fill_bytes(&mut key);
                let encoded = base64::engine::general_purpose::STANDARD.encode(key);
                entry.set_password(&encoded).ok()?;
                Some(key)
            }
            Err(_) => None,
        }
    }

    fn load_or_create_key_file(data_dir: &Path) -> AppResult<[u8; KEY_LEN]> {
        std::fs::create_dir_all(data_dir)?;
        let path = Self::key_file_path(data_dir);

        if path.exists() {
            let encoded = std::fs::read_to_string(&path)?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| AppError::encryption(format!("corrupt key file: {e}")))?;
            bytes
                .try_into()
                .map_err(|_| AppError::encryption("key file has wrong length"))
        } else {
            let mut key = [0u8; KEY_LEN];
            rand::thread_rng().fill_bytes(&mut key);
            let encoded = base64::engine::general_purpose::STANDARD.encode(key);

            #[cfg(unix)]
            {
                use std::fs::OpenOptions;
                use std::io::Write;
                use std::os::unix::fs::OpenOptionsExt;
                let mut file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .mode(0o600)
                    .open(&path)?;
                file.write_all(encoded.as_bytes())?;
            }
            #[cfg(not(unix))]
            {
                std::fs::write(&path, &encoded)?;
            }

            Ok(key)
        }
    }

    fn key_file_path(data_dir: &Path) -> PathBuf {
        data_dir.join("master.key")
    }

    /// Encrypt `plaintext`, binding `associated_data` to the ciphertext.
    /// Returns `nonce || ciphertext` so callers only need to persist one blob.
    pub fn encrypt(&self, plaintext: &[u8], associated_data: &[u8]) -> AppResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let payload = aes_gcm::aead::Payload {
            msg: plaintext,
            aad: associated_data,
        };

        let ciphertext = self
            .cipher
            .encrypt(nonce, payload)
            .map_err(|_| AppError::encryption("encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a blob produced by `encrypt`. Returns `InvalidCiphertext` if
    /// the blob is malformed, tampered with, or bound to different
    /// associated data than was supplied.
    pub fn decrypt(
        &self,
        blob: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>, InvalidCiphertext> {
        if blob.len() < NONCE_LEN {
            return Err(InvalidCiphertext);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let payload = aes_gcm::aead::Payload {
            msg: ciphertext,
            aad: associated_data,
        };

        self.cipher
            .decrypt(nonce, payload)
            .map_err(|_| InvalidCiphertext)
    }
}

/// SHA-256 hex digest, used for `FileRef.sha256` and `VectorRecord.textHash`.
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_service() -> EncryptionService {
        let key = [7u8; KEY_LEN];
        EncryptionService {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    #[test]
    fn round_trips() {
        let svc = test_service();
        let ct = svc.encrypt(b"hello world", b"2024-03-14").unwrap();
        let pt = svc.decrypt(&ct, b"2024-03-14").unwrap();
        assert_eq!(pt, b"hello world");
    }

    #[test]
    fn rejects_mismatched_associated_data() {
        let svc = test_service();
        let ct = svc.encrypt(b"hello world", b"2024-03-14").unwrap();
        let result = svc.decrypt(&ct, b"2024-03-15");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_truncated_ciphertext() {
        let svc = test_service();
        let result = svc.decrypt(b"short", b"ad");
        assert!(result.is_err());
    }

    #[test]
    fn nonce_differs_per_call() {
        let svc = test_service();
        let a = svc.encrypt(b"same plaintext", b"ad").unwrap();
        let b = svc.encrypt(b"same plaintext", b"ad").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn sha256_matches_known_vector() {
        let digest = sha256_hex(b"abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
