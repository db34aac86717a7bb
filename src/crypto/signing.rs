use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

use crate::change::SignedGroupChange;

#[derive(Error, Debug)]
pub enum SigningError {
    #[error("Invalid key length")]
    InvalidKeyLength,
    #[error("Invalid signature")]
    InvalidSignature,
}

pub type Result<T> = std::result::Result<T, SigningError>;

/// Generate an Ed25519 keypair
///
/// # Returns
/// (public_key, private_key) - Both as 32-byte arrays
pub fn generate_keypair() -> ([u8; 32], [u8; 32]) {
    let signing_key = SigningKey::generate(&mut OsRng);

    let secret_key = signing_key.to_bytes();
    let public_key = signing_key.verifying_key().to_bytes();

    (public_key, secret_key)
}

/// Sign data with Ed25519 private key
///
/// # Returns
/// 64-byte signature
pub fn sign_data(data: &[u8], private_key: &[u8; 32]) -> [u8; 64] {
    let signing_key = SigningKey::from_bytes(private_key);
    signing_key.sign(data).to_bytes()
}

/// Verify Ed25519 signature
///
/// # Returns
/// True if signature is valid
pub fn verify_signature(data: &[u8], signature: &[u8; 64], public_key: &[u8; 32]) -> Result<bool> {
    let verifying_key =
        VerifyingKey::from_bytes(public_key).map_err(|_| SigningError::InvalidKeyLength)?;
    let sig = Signature::from_bytes(signature);

    match verifying_key.verify(data, &sig) {
        Ok(_) => Ok(true),
        Err(_) => Ok(false),
    }
}

/// Server side of the contract: sign sealed actions to produce the
/// authoritative change. Clients only ever verify.
pub fn sign_group_change(encrypted_actions: Vec<u8>, server_private_key: &[u8; 32]) -> SignedGroupChange {
    let server_signature = sign_data(&encrypted_actions, server_private_key);
    SignedGroupChange {
        encrypted_actions,
        server_signature,
    }
}

/// Verify the server signature on a change.
pub fn verify_group_change(change: &SignedGroupChange, server_public_key: &[u8; 32]) -> Result<()> {
    if verify_signature(&change.encrypted_actions, &change.server_signature, server_public_key)? {
        Ok(())
    } else {
        Err(SigningError::InvalidSignature)
    }
}
