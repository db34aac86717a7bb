use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng, Payload},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::ids::GroupMasterKey;

const KDF_SALT: &[u8] = b"groupv2-kdf-salt-v1";

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Key derivation failed")]
    KeyDerivationFailed,
}

pub type Result<T> = std::result::Result<T, EncryptionError>;

/// Derive a 32-byte purpose-bound key from the group master key
/// using HKDF-SHA256.
///
/// # Arguments
/// * `master_key` - group master key
/// * `info` - purpose label; distinct labels yield independent keys
pub fn derive_group_key(master_key: &GroupMasterKey, info: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let hkdf = Hkdf::<Sha256>::new(Some(KDF_SALT), master_key.as_bytes());
    let mut okm = Zeroizing::new([0u8; 32]);
    hkdf.expand(info, &mut okm[..])
        .map_err(|_| EncryptionError::KeyDerivationFailed)?;
    Ok(okm)
}

/// Seal bytes with XChaCha20-Poly1305
///
/// # Arguments
/// * `plaintext` - bytes to seal
/// * `key` - 32-byte key
/// * `aad` - associated data bound into the tag (not encrypted)
///
/// # Returns
/// Nonce-prefixed ciphertext (24 bytes + ciphertext)
pub fn seal(plaintext: &[u8], key: &[u8; 32], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| EncryptionError::EncryptionFailed)?;

    let mut nonce_bytes = [0u8; 24];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| EncryptionError::EncryptionFailed)?;

    let mut result = Vec::with_capacity(24 + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Open bytes sealed by [`seal`].
pub fn open(sealed: &[u8], key: &[u8; 32], aad: &[u8]) -> Result<Vec<u8>> {
    // nonce + tag
    if sealed.len() < 24 + 16 {
        return Err(EncryptionError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(24);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| EncryptionError::DecryptionFailed)?;

    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| EncryptionError::DecryptionFailed)
}

/// Generate `len` random bytes (invite-link passwords and the like).
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let key = [0x42u8; 32];
        let sealed = seal(b"group actions", &key, b"aad").unwrap();
        assert_eq!(open(&sealed, &key, b"aad").unwrap(), b"group actions");
    }

    #[test]
    fn test_open_wrong_aad_fails() {
        let key = [0x42u8; 32];
        let sealed = seal(b"group actions", &key, b"group-a").unwrap();
        assert!(open(&sealed, &key, b"group-b").is_err());
    }

    #[test]
    fn test_open_truncated_fails() {
        assert!(matches!(
            open(&[0u8; 10], &[1u8; 32], b""),
            Err(EncryptionError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_derived_keys_are_purpose_bound() {
        let master = GroupMasterKey::from_bytes([7; 32]);
        let a = derive_group_key(&master, b"one").unwrap();
        let b = derive_group_key(&master, b"two").unwrap();
        assert_ne!(*a, *b);
        assert_eq!(*a, *derive_group_key(&master, b"one").unwrap());
    }

    #[test]
    fn test_random_bytes_len() {
        assert_eq!(random_bytes(32).len(), 32);
    }
}
