/// Group change types: the action taxonomy, the plaintext change, and the
/// signed/sealed forms exchanged with the server.
///
/// A change always moves a group from `revision - 1` to `revision`. The
/// plaintext `DecryptedGroupChange` only exists locally; on the wire its
/// actions travel CBOR-encoded and sealed under the group key, and the
/// server's accepted version additionally carries an Ed25519 signature.

use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use thiserror::Error;

use crate::ids::{Aci, GroupId, ProfileKeyCommitment};
use crate::model::{AccessRequired, Member, PendingMember, RequestingMember, Role};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ChangeError {
    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    #[error("CBOR decode error: {0}")]
    CborDecode(String),

    #[error("Bincode error: {0}")]
    BincodeError(String),
}

// ---------------------------------------------------------------------------
// GroupAction
// ---------------------------------------------------------------------------

/// One typed step of a group change. Actions apply strictly in list order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum GroupAction {
    // Membership
    AddMember { member: Member },
    DeleteMember { aci: Aci },
    ModifyMemberRole { aci: Aci, role: Role },
    ModifyMemberProfileKey { aci: Aci, commitment: ProfileKeyCommitment },

    // Invites
    AddPendingMember { pending: PendingMember },
    DeletePendingMember { aci: Aci },
    PromotePendingMember { aci: Aci, commitment: ProfileKeyCommitment },

    // Join requests
    AddRequestingMember { requesting: RequestingMember },
    DeleteRequestingMember { aci: Aci },
    PromoteRequestingMember { aci: Aci, role: Role },

    // Attributes
    ModifyTitle { title: String },
    ModifyDescription { description: String },
    ModifyAvatar { avatar_key: String },
    ModifyDisappearingTimer { seconds: u32 },

    // Access control
    ModifyAttributesAccess { access: AccessRequired },
    ModifyMembershipAccess { access: AccessRequired },
    ModifyAddFromInviteLinkAccess { access: AccessRequired },
    ModifyInviteLinkPassword { password: Vec<u8> },
    ModifyAnnouncementsOnly { announcements_only: bool },
}

impl GroupAction {
    /// Returns true for actions that change who is in the group.
    pub fn is_membership_action(&self) -> bool {
        matches!(
            self,
            GroupAction::AddMember { .. }
                | GroupAction::DeleteMember { .. }
                | GroupAction::ModifyMemberRole { .. }
                | GroupAction::AddPendingMember { .. }
                | GroupAction::DeletePendingMember { .. }
                | GroupAction::PromotePendingMember { .. }
                | GroupAction::AddRequestingMember { .. }
                | GroupAction::DeleteRequestingMember { .. }
                | GroupAction::PromoteRequestingMember { .. }
        )
    }

    /// Short name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupAction::AddMember { .. } => "AddMember",
            GroupAction::DeleteMember { .. } => "DeleteMember",
            GroupAction::ModifyMemberRole { .. } => "ModifyMemberRole",
            GroupAction::ModifyMemberProfileKey { .. } => "ModifyMemberProfileKey",
            GroupAction::AddPendingMember { .. } => "AddPendingMember",
            GroupAction::DeletePendingMember { .. } => "DeletePendingMember",
            GroupAction::PromotePendingMember { .. } => "PromotePendingMember",
            GroupAction::AddRequestingMember { .. } => "AddRequestingMember",
            GroupAction::DeleteRequestingMember { .. } => "DeleteRequestingMember",
            GroupAction::PromoteRequestingMember { .. } => "PromoteRequestingMember",
            GroupAction::ModifyTitle { .. } => "ModifyTitle",
            GroupAction::ModifyDescription { .. } => "ModifyDescription",
            GroupAction::ModifyAvatar { .. } => "ModifyAvatar",
            GroupAction::ModifyDisappearingTimer { .. } => "ModifyDisappearingTimer",
            GroupAction::ModifyAttributesAccess { .. } => "ModifyAttributesAccess",
            GroupAction::ModifyMembershipAccess { .. } => "ModifyMembershipAccess",
            GroupAction::ModifyAddFromInviteLinkAccess { .. } => "ModifyAddFromInviteLinkAccess",
            GroupAction::ModifyInviteLinkPassword { .. } => "ModifyInviteLinkPassword",
            GroupAction::ModifyAnnouncementsOnly { .. } => "ModifyAnnouncementsOnly",
        }
    }
}

// ---------------------------------------------------------------------------
// DecryptedGroupChange
// ---------------------------------------------------------------------------

/// Plaintext change moving a group to `revision`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DecryptedGroupChange {
    /// Target revision; the change applies on top of `revision - 1`.
    pub revision: u32,
    /// Account that authored the change.
    pub editor: Aci,
    pub actions: Vec<GroupAction>,
}

impl DecryptedGroupChange {
    /// The revision this change must be applied on top of, or `None` for a
    /// malformed change targeting revision 0.
    pub fn from_revision(&self) -> Option<u32> {
        self.revision.checked_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Wire forms
// ---------------------------------------------------------------------------

/// Server-accepted change: sealed actions plus the server's signature over
/// them. This is the authoritative form, both in patch responses and on the
/// update channel.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SignedGroupChange {
    /// `DecryptedGroupChange` CBOR-encoded, then sealed under the group key.
    pub encrypted_actions: Vec<u8>,
    /// Ed25519 signature over `encrypted_actions`.
    #[serde(with = "BigArray")]
    pub server_signature: [u8; 64],
}

impl SignedGroupChange {
    /// Serialize for storage / wire transfer.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ChangeError> {
        bincode::serialize(self).map_err(|e| ChangeError::BincodeError(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChangeError> {
        bincode::deserialize(bytes).map_err(|e| ChangeError::BincodeError(e.to_string()))
    }
}

/// A client's unsigned proposal, bound to the revision it was built from.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct GroupChangeProposal {
    pub group_id: GroupId,
    pub base_revision: u32,
    pub encrypted_actions: Vec<u8>,
}

// ---------------------------------------------------------------------------
// CBOR helpers
// ---------------------------------------------------------------------------

/// CBOR-encode a value to bytes.
pub fn cbor_encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ChangeError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| ChangeError::CborEncode(e.to_string()))?;
    Ok(buf)
}

/// CBOR-decode a value from bytes.
pub fn cbor_decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ChangeError> {
    ciborium::from_reader(bytes).map_err(|e| ChangeError::CborDecode(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
