use crate::core::error::VaultError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 12;
pub const KEY_LEN: usize = 32;
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// A derived 256-bit key, wiped from memory on drop
pub type DerivedKey = Zeroizing<[u8; KEY_LEN]>;

/// Ciphertext and the IV it was sealed under; never split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}

fn generate_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::rng().fill_bytes(&mut iv);
    iv
}

/// PBKDF2-HMAC-SHA256
pub fn derive_key(passphrase: &str, salt: &[u8], iterations: u32) -> DerivedKey {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut key[..]);
    key
}

/// Rebuild a key exported to the session store
pub fn key_from_bytes(bytes: &[u8]) -> Option<DerivedKey> {
    if bytes.len() != KEY_LEN {
        return None;
    }
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(bytes);
    Some(key)
}

/// AES-256-GCM under a fresh random IV
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> Result<EncryptedRecord, VaultError> {
    let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| VaultError::InvalidPassword)?;
    let iv = generate_iv();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| VaultError::Serialization("Encryption failed".to_string()))?;

    Ok(EncryptedRecord {
        iv: iv.to_vec(),
        ciphertext,
    })
}

/// Authenticated decryption; any failure is `InvalidPassword`
pub fn decrypt(key: &DerivedKey, record: &EncryptedRecord) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    if record.iv.len() != IV_LEN {
        return Err(VaultError::InvalidPassword);
    }
    let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| VaultError::InvalidPassword)?;
    cipher
        .decrypt(Nonce::from_slice(&record.iv), record.ciphertext.as_slice())
        .map(Zeroizing::new)
        .map_err(|_| VaultError::InvalidPassword)
}
