/// Identity types for the group engine.
///
/// - `GroupMasterKey`: 32-byte group secret, zeroized on drop
/// - `GroupId`: stable group identifier (legacy V1 or master-key-derived V2)
/// - `Aci`: stable account identifier of a group member
/// - `ProfileKeyCommitment`: opaque commitment carried on member entries

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Key-derivation context for V2 group identifiers.
const GROUP_ID_CONTEXT: &str = "groupv2 2024-01 group identifier";

// ---------------------------------------------------------------------------
// GroupMasterKey
// ---------------------------------------------------------------------------

/// The root group secret. Every per-group key and the V2 `GroupId` derive
/// from it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct GroupMasterKey([u8; 32]);

impl GroupMasterKey {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        GroupMasterKey(bytes)
    }

    /// Generate a fresh random master key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        GroupMasterKey(bytes)
    }

    /// Return the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive the V2 group identifier for this key.
    pub fn group_id(&self) -> GroupId {
        GroupId::V2(blake3::derive_key(GROUP_ID_CONTEXT, &self.0))
    }
}

impl fmt::Debug for GroupMasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GroupMasterKey(..)")
    }
}

// ---------------------------------------------------------------------------
// GroupId
// ---------------------------------------------------------------------------

/// Group identifier.
///
/// `V1` ids belong to legacy groups, which this engine can look up but never
/// edit. `V2` ids are BLAKE3-derived from the group's master key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GroupId {
    V1([u8; 16]),
    V2([u8; 32]),
}

impl GroupId {
    pub fn is_v2(&self) -> bool {
        matches!(self, GroupId::V2(_))
    }

    /// Return the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            GroupId::V1(bytes) => bytes,
            GroupId::V2(bytes) => bytes,
        }
    }

    /// Hex-encode for display/storage.
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Decode from hex string. 16 bytes decode as V1, 32 bytes as V2.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        match bytes.len() {
            16 => {
                let mut id = [0u8; 16];
                id.copy_from_slice(&bytes);
                Ok(GroupId::V1(id))
            }
            32 => {
                let mut id = [0u8; 32];
                id.copy_from_slice(&bytes);
                Ok(GroupId::V2(id))
            }
            _ => Err(hex::FromHexError::InvalidStringLength),
        }
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let version = if self.is_v2() { "V2" } else { "V1" };
        write!(f, "GroupId::{}({}..)", version, &self.to_hex()[..12])
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// Aci
// ---------------------------------------------------------------------------

/// Account identifier, stable across phone number changes.
///
/// **Ordering** follows the UUID bytes. The engine relies on this order for
/// deterministic choices (e.g. which member an outgoing sole admin promotes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Aci(Uuid);

impl Aci {
    pub fn new(uuid: Uuid) -> Self {
        Aci(uuid)
    }

    /// A fresh random ACI.
    pub fn random() -> Self {
        Aci(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Aci(Uuid::from_bytes(bytes))
    }

    pub fn uuid(&self) -> &Uuid {
        &self.0
    }

    /// The all-zero ACI is reserved and never names a real account.
    pub fn is_unknown(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Debug for Aci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aci({})", &self.0.simple().to_string()[..8])
    }
}

impl fmt::Display for Aci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ProfileKeyCommitment
// ---------------------------------------------------------------------------

/// Commitment to a member's profile key, produced by the external
/// credential layer. Opaque to this engine apart from the all-zero check.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileKeyCommitment(pub [u8; 32]);

impl ProfileKeyCommitment {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        ProfileKeyCommitment(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// An all-zero commitment means no credential could be derived.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for ProfileKeyCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProfileKeyCommitment({})", &hex::encode(self.0)[..8])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
