/// The group crypto context seam.
///
/// The engine never touches group secrets directly: it hands plaintext
/// changes to a `ChangeCodec` to seal proposals, and hands server responses
/// to it to verify and open them. Production deployments plug in their
/// zero-knowledge group layer here; `SealedChangeCodec` is the bundled
/// implementation (HKDF-derived XChaCha20-Poly1305 sealing plus Ed25519
/// server signatures).

use thiserror::Error;

use crate::change::{cbor_decode, cbor_encode, ChangeError, DecryptedGroupChange, SignedGroupChange};
use crate::crypto::encryption::{self, EncryptionError};
use crate::crypto::signing::{self, SigningError};
use crate::ids::GroupMasterKey;

/// HKDF label for the change-sealing key.
const CHANGE_KEY_INFO: &[u8] = b"groupv2 change actions";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Server signature verification failed: {0}")]
    Signature(#[from] SigningError),

    #[error("Sealing error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] ChangeError),
}

// ---------------------------------------------------------------------------
// ChangeCodec
// ---------------------------------------------------------------------------

pub trait ChangeCodec: Send + Sync {
    /// Seal a plaintext change for submission as a proposal.
    fn encrypt_change(
        &self,
        master_key: &GroupMasterKey,
        change: &DecryptedGroupChange,
    ) -> Result<Vec<u8>, CodecError>;

    /// Open sealed actions without any signature check. Only the holder of
    /// the master key can do this.
    fn decrypt_change(
        &self,
        master_key: &GroupMasterKey,
        encrypted_actions: &[u8],
    ) -> Result<DecryptedGroupChange, CodecError>;

    /// Verify the server signature, then open the change. Any failure here
    /// means the change must not be applied.
    fn open_signed_change(
        &self,
        master_key: &GroupMasterKey,
        change: &SignedGroupChange,
    ) -> Result<DecryptedGroupChange, CodecError>;
}

// ---------------------------------------------------------------------------
// SealedChangeCodec
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct SealedChangeCodec {
    server_public_key: [u8; 32],
}

impl SealedChangeCodec {
    /// `server_public_key` is the Ed25519 key the group server signs
    /// accepted changes with.
    pub fn new(server_public_key: [u8; 32]) -> Self {
        SealedChangeCodec { server_public_key }
    }

    pub fn server_public_key(&self) -> &[u8; 32] {
        &self.server_public_key
    }
}

impl ChangeCodec for SealedChangeCodec {
    fn encrypt_change(
        &self,
        master_key: &GroupMasterKey,
        change: &DecryptedGroupChange,
    ) -> Result<Vec<u8>, CodecError> {
        let key = encryption::derive_group_key(master_key, CHANGE_KEY_INFO)?;
        let plaintext = cbor_encode(change)?;
        let group_id = master_key.group_id();
        Ok(encryption::seal(&plaintext, &key, group_id.as_bytes())?)
    }

    fn decrypt_change(
        &self,
        master_key: &GroupMasterKey,
        encrypted_actions: &[u8],
    ) -> Result<DecryptedGroupChange, CodecError> {
        let key = encryption::derive_group_key(master_key, CHANGE_KEY_INFO)?;
        let group_id = master_key.group_id();
        let plaintext = encryption::open(encrypted_actions, &key, group_id.as_bytes())?;
        Ok(cbor_decode(&plaintext)?)
    }

    fn open_signed_change(
        &self,
        master_key: &GroupMasterKey,
        change: &SignedGroupChange,
    ) -> Result<DecryptedGroupChange, CodecError> {
        signing::verify_group_change(change, &self.server_public_key)?;
        self.decrypt_change(master_key, &change.encrypted_actions)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
