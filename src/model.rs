/// Plaintext group snapshot and its invariants.
///
/// `DecryptedGroup` is the state the local store persists per group. It is
/// only ever replaced by applying an authoritative change (see `apply`);
/// callers read it, they never mutate it in place.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::ids::{Aci, ProfileKeyCommitment};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantError {
    #[error("Duplicate ACI {0:?} in group")]
    DuplicateAci(Aci),

    #[error("Group has members but no administrator")]
    NoAdministrator,

    #[error("Member {0:?} carries an unknown role")]
    UnknownRole(Aci),

    #[error("Member {0:?} carries the reserved unknown ACI")]
    UnknownAci(Aci),
}

// ---------------------------------------------------------------------------
// Role, AccessRequired, AccessControl
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Role {
    /// Out-of-range value; never valid inside a snapshot.
    Unknown = 0,
    #[default]
    Default = 1,
    Administrator = 2,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        *self == Role::Administrator
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AccessRequired {
    Unknown = 0,
    Any = 1,
    Member = 2,
    Administrator = 3,
    Unsatisfiable = 4,
}

impl AccessRequired {
    /// Whether a member holding `role` satisfies this requirement.
    pub fn allows(&self, role: Role) -> bool {
        match self {
            AccessRequired::Any | AccessRequired::Member => role != Role::Unknown,
            AccessRequired::Administrator => role.is_admin(),
            AccessRequired::Unknown | AccessRequired::Unsatisfiable => false,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessControl {
    /// Who may change title, description, avatar and timer.
    pub attributes: AccessRequired,
    /// Who may add members.
    pub members: AccessRequired,
    /// Who may join via the invite link (`Any` = instantly,
    /// `Administrator` = by approved request).
    pub add_from_invite_link: AccessRequired,
}

impl Default for AccessControl {
    fn default() -> Self {
        AccessControl {
            attributes: AccessRequired::Member,
            members: AccessRequired::Member,
            add_from_invite_link: AccessRequired::Unsatisfiable,
        }
    }
}

// ---------------------------------------------------------------------------
// Member entries
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Member {
    pub aci: Aci,
    pub role: Role,
    /// Revision at which this member (last) joined.
    pub joined_revision: u32,
    pub profile_key_commitment: ProfileKeyCommitment,
}

/// Invited but not yet accepted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PendingMember {
    pub aci: Aci,
    pub role: Role,
    pub added_by: Aci,
    pub timestamp_ms: i64,
}

/// Asked to join via the invite link, awaiting an administrator.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RequestingMember {
    pub aci: Aci,
    pub profile_key_commitment: ProfileKeyCommitment,
    pub timestamp_ms: i64,
}

// ---------------------------------------------------------------------------
// DecryptedGroup
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct DecryptedGroup {
    pub revision: u32,
    pub title: String,
    pub description: String,
    /// Storage key of the encrypted avatar blob; empty when unset.
    pub avatar_key: String,
    pub access_control: AccessControl,
    pub members: Vec<Member>,
    pub pending_members: Vec<PendingMember>,
    pub requesting_members: Vec<RequestingMember>,
    /// 0 disables disappearing messages.
    pub disappearing_message_timer_seconds: u32,
    pub announcements_only: bool,
    pub invite_link_password: Vec<u8>,
}

/// Where an ACI currently sits in a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipStatus {
    Member(Role),
    Pending,
    Requesting,
    NotInGroup,
}

impl DecryptedGroup {
    pub fn member(&self, aci: &Aci) -> Option<&Member> {
        self.members.iter().find(|m| m.aci == *aci)
    }

    pub fn pending_member(&self, aci: &Aci) -> Option<&PendingMember> {
        self.pending_members.iter().find(|m| m.aci == *aci)
    }

    pub fn requesting_member(&self, aci: &Aci) -> Option<&RequestingMember> {
        self.requesting_members.iter().find(|m| m.aci == *aci)
    }

    pub fn is_member(&self, aci: &Aci) -> bool {
        self.member(aci).is_some()
    }

    pub fn is_admin(&self, aci: &Aci) -> bool {
        self.member(aci).map(|m| m.role.is_admin()).unwrap_or(false)
    }

    pub fn status_of(&self, aci: &Aci) -> MembershipStatus {
        if let Some(member) = self.member(aci) {
            MembershipStatus::Member(member.role)
        } else if self.pending_member(aci).is_some() {
            MembershipStatus::Pending
        } else if self.requesting_member(aci).is_some() {
            MembershipStatus::Requesting
        } else {
            MembershipStatus::NotInGroup
        }
    }

    /// Administrators in member order.
    pub fn administrators(&self) -> impl Iterator<Item = &Member> {
        self.members.iter().filter(|m| m.role.is_admin())
    }

    /// Members plus outstanding invites; the size limit applies to this figure.
    pub fn occupied_slots(&self) -> usize {
        self.members.len() + self.pending_members.len()
    }

    /// Check every snapshot invariant.
    ///
    /// - each ACI appears once across members, pending and requesting
    /// - no entry uses the reserved unknown ACI or an unknown role
    /// - a non-empty member list holds at least one administrator
    pub fn validate(&self) -> Result<(), InvariantError> {
        let mut seen: HashSet<Aci> = HashSet::new();
        let all_acis = self
            .members
            .iter()
            .map(|m| m.aci)
            .chain(self.pending_members.iter().map(|p| p.aci))
            .chain(self.requesting_members.iter().map(|r| r.aci));

        for aci in all_acis {
            if aci.is_unknown() {
                return Err(InvariantError::UnknownAci(aci));
            }
            if !seen.insert(aci) {
                return Err(InvariantError::DuplicateAci(aci));
            }
        }

        if let Some(member) = self.members.iter().find(|m| m.role == Role::Unknown) {
            return Err(InvariantError::UnknownRole(member.aci));
        }
        if let Some(pending) = self.pending_members.iter().find(|p| p.role == Role::Unknown) {
            return Err(InvariantError::UnknownRole(pending.aci));
        }

        if !self.members.is_empty() && self.administrators().next().is_none() {
            return Err(InvariantError::NoAdministrator);
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
