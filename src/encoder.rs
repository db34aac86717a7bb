/// Change encoder: intents in, sealed proposal and predicted snapshot out.
///
/// Each intent is diffed against a working copy of the snapshot that already
/// reflects the intents before it, so a session can add a member and then
/// promote them. Intents that would change nothing are dropped. The final
/// action list is run through `apply_change` on the untouched base snapshot;
/// that both validates the invariants and produces the prediction.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::apply::{apply_actions, apply_change, ApplyError};
use crate::change::{DecryptedGroupChange, GroupAction, GroupChangeProposal};
use crate::config::EngineConfig;
use crate::crypto::{random_bytes, ChangeCodec, CodecError};
use crate::ids::{Aci, ProfileKeyCommitment};
use crate::limits::{check_group_size, GroupSizeStatus, INVITE_LINK_PASSWORD_BYTES};
use crate::model::{AccessRequired, DecryptedGroup, Member, MembershipStatus, PendingMember, Role};
use crate::store::StoredGroup;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Not a member of the group")]
    NotAMember,

    #[error("{intent} requires a higher role")]
    InsufficientRights { intent: &'static str },

    #[error("Group would hold {size} entries, limit is {limit}")]
    GroupTooLarge { size: usize, limit: usize },

    #[error("Invalid edit: {0}")]
    InvalidEdit(String),

    /// Caller bug: the intent cannot be expressed at all.
    #[error("Malformed intent: {0}")]
    InvalidIntent(String),

    /// The combined actions would leave the group in an invalid state.
    #[error("Edit breaks group invariants: {0}")]
    Prediction(#[from] ApplyError),

    #[error("Failed to seal change: {0}")]
    Codec(#[from] CodecError),
}

impl EncodeError {
    /// Fatal errors point at a client bug rather than at group state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EncodeError::InvalidIntent(_) | EncodeError::Codec(_))
    }
}

// ---------------------------------------------------------------------------
// Intents
// ---------------------------------------------------------------------------

/// Someone to add. With a profile-key commitment they join directly;
/// without one they are invited and show up as pending.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupCandidate {
    pub aci: Aci,
    pub profile_key_commitment: Option<ProfileKeyCommitment>,
}

impl GroupCandidate {
    pub fn member(aci: Aci, commitment: ProfileKeyCommitment) -> Self {
        GroupCandidate {
            aci,
            profile_key_commitment: Some(commitment),
        }
    }

    pub fn invitee(aci: Aci) -> Self {
        GroupCandidate {
            aci,
            profile_key_commitment: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditIntent {
    /// `timestamp_ms` stamps any invitations the add produces.
    AddMembers {
        candidates: Vec<GroupCandidate>,
        timestamp_ms: i64,
    },
    RemoveMember(Aci),
    ChangeRole { aci: Aci, role: Role },
    SetTitle(String),
    SetDescription(String),
    SetAvatar(String),
    SetDisappearingTimer(u32),
    SetAnnouncementsOnly(bool),
    SetAttributesAccess(AccessRequired),
    SetMembershipAccess(AccessRequired),
    SetAddFromInviteLinkAccess(AccessRequired),
    ResetInviteLinkPassword { password: Vec<u8> },
    ApproveJoinRequests(Vec<Aci>),
    DenyJoinRequests(Vec<Aci>),
    AcceptInvite(ProfileKeyCommitment),
    UpdateSelfProfileKey(ProfileKeyCommitment),
    LeaveGroup { allow_auto_promotion: bool },
}

impl EditIntent {
    /// Add members, stamping invitations with the current time.
    pub fn add_members(candidates: impl IntoIterator<Item = GroupCandidate>) -> Self {
        EditIntent::AddMembers {
            candidates: candidates.into_iter().collect(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Rotate the invite link to a freshly generated password.
    pub fn reset_invite_link_password() -> Self {
        EditIntent::ResetInviteLinkPassword {
            password: random_bytes(INVITE_LINK_PASSWORD_BYTES),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EditIntent::AddMembers { .. } => "add_members",
            EditIntent::RemoveMember(_) => "remove_member",
            EditIntent::ChangeRole { .. } => "change_role",
            EditIntent::SetTitle(_) => "set_title",
            EditIntent::SetDescription(_) => "set_description",
            EditIntent::SetAvatar(_) => "set_avatar",
            EditIntent::SetDisappearingTimer(_) => "set_disappearing_timer",
            EditIntent::SetAnnouncementsOnly(_) => "set_announcements_only",
            EditIntent::SetAttributesAccess(_) => "set_attributes_access",
            EditIntent::SetMembershipAccess(_) => "set_membership_access",
            EditIntent::SetAddFromInviteLinkAccess(_) => "set_add_from_invite_link_access",
            EditIntent::ResetInviteLinkPassword { .. } => "reset_invite_link_password",
            EditIntent::ApproveJoinRequests(_) => "approve_join_requests",
            EditIntent::DenyJoinRequests(_) => "deny_join_requests",
            EditIntent::AcceptInvite(_) => "accept_invite",
            EditIntent::UpdateSelfProfileKey(_) => "update_self_profile_key",
            EditIntent::LeaveGroup { .. } => "leave_group",
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct EncodedChange {
    /// What goes to the server.
    pub proposal: GroupChangeProposal,
    /// The plaintext change the proposal seals.
    pub change: DecryptedGroupChange,
    /// Optimistic result; the server's returned change still wins.
    pub predicted: DecryptedGroup,
}

// ---------------------------------------------------------------------------
// ChangeEncoder
// ---------------------------------------------------------------------------

pub struct ChangeEncoder {
    self_aci: Aci,
    config: EngineConfig,
    codec: Arc<dyn ChangeCodec>,
}

impl ChangeEncoder {
    pub fn new(self_aci: Aci, config: EngineConfig, codec: Arc<dyn ChangeCodec>) -> Self {
        ChangeEncoder {
            self_aci,
            config,
            codec,
        }
    }

    /// Diff `intents` against `stored`. Returns `None` when nothing would
    /// change.
    pub fn encode(
        &self,
        stored: &StoredGroup,
        intents: &[EditIntent],
    ) -> Result<Option<EncodedChange>, EncodeError> {
        if !stored.group_id.is_v2() {
            return Err(EncodeError::InvalidEdit(
                "legacy groups cannot be edited".to_string(),
            ));
        }

        let base = &stored.group;
        let revision = base
            .revision
            .checked_add(1)
            .ok_or_else(|| EncodeError::InvalidEdit("revision counter exhausted".to_string()))?;

        let mut working = base.clone();
        let mut actions = Vec::new();
        for intent in intents {
            let step = self.diff_intent(&working, intent)?;
            if step.is_empty() {
                log::debug!("{:?}: {} is a no-op, dropped", stored.group_id, intent.as_str());
                continue;
            }
            apply_actions(&mut working, revision, self.self_aci, &step)?;
            actions.extend(step);
        }

        if actions.is_empty() {
            return Ok(None);
        }

        let size = working.occupied_slots();
        if size > base.occupied_slots() {
            if let GroupSizeStatus::TooLarge { limit } =
                check_group_size(size, self.config.max_group_size)
            {
                return Err(EncodeError::GroupTooLarge { size, limit });
            }
        }

        let change = DecryptedGroupChange {
            revision,
            editor: self.self_aci,
            actions,
        };
        let (predicted, _) = apply_change(stored.group_id, base, &change)?;
        let encrypted_actions = self.codec.encrypt_change(&stored.master_key, &change)?;

        log::debug!(
            "{:?}: encoded {} action(s) on revision {}",
            stored.group_id,
            change.actions.len(),
            base.revision
        );

        Ok(Some(EncodedChange {
            proposal: GroupChangeProposal {
                group_id: stored.group_id,
                base_revision: base.revision,
                encrypted_actions,
            },
            change,
            predicted,
        }))
    }

    fn diff_intent(
        &self,
        group: &DecryptedGroup,
        intent: &EditIntent,
    ) -> Result<Vec<GroupAction>, EncodeError> {
        let me = self.self_aci;
        let name = intent.as_str();

        let actions = match intent {
            EditIntent::AddMembers {
                candidates,
                timestamp_ms,
            } => {
                self.require(group, group.access_control.members, name)?;
                let mut seen = HashSet::new();
                let mut actions = Vec::new();
                for candidate in candidates {
                    ensure_known(&candidate.aci, name)?;
                    if !seen.insert(candidate.aci) {
                        continue;
                    }
                    match group.status_of(&candidate.aci) {
                        MembershipStatus::Member(_) | MembershipStatus::Pending => {}
                        // Adding someone who asked to join approves them.
                        MembershipStatus::Requesting => {
                            self.require(group, AccessRequired::Administrator, name)?;
                            actions.push(GroupAction::PromoteRequestingMember {
                                aci: candidate.aci,
                                role: Role::Default,
                            });
                        }
                        MembershipStatus::NotInGroup => match candidate.profile_key_commitment {
                            Some(commitment) => {
                                ensure_commitment(&commitment, name)?;
                                actions.push(GroupAction::AddMember {
                                    member: Member {
                                        aci: candidate.aci,
                                        role: Role::Default,
                                        joined_revision: 0,
                                        profile_key_commitment: commitment,
                                    },
                                });
                            }
                            None => actions.push(GroupAction::AddPendingMember {
                                pending: PendingMember {
                                    aci: candidate.aci,
                                    role: Role::Default,
                                    added_by: me,
                                    timestamp_ms: *timestamp_ms,
                                },
                            }),
                        },
                    }
                }
                actions
            }

            EditIntent::RemoveMember(aci) => {
                ensure_known(aci, name)?;
                if *aci == me {
                    return Err(EncodeError::InvalidEdit(
                        "use leave_group to remove yourself".to_string(),
                    ));
                }
                self.require(group, AccessRequired::Administrator, name)?;
                match group.status_of(aci) {
                    MembershipStatus::Member(_) => vec![GroupAction::DeleteMember { aci: *aci }],
                    MembershipStatus::Pending => vec![GroupAction::DeletePendingMember { aci: *aci }],
                    MembershipStatus::Requesting => {
                        vec![GroupAction::DeleteRequestingMember { aci: *aci }]
                    }
                    MembershipStatus::NotInGroup => Vec::new(),
                }
            }

            EditIntent::ChangeRole { aci, role } => {
                ensure_known(aci, name)?;
                if *role == Role::Unknown {
                    return Err(EncodeError::InvalidIntent(format!("{}: unknown role", name)));
                }
                self.require(group, AccessRequired::Administrator, name)?;
                match group.member(aci) {
                    Some(member) if member.role == *role => Vec::new(),
                    Some(_) => vec![GroupAction::ModifyMemberRole { aci: *aci, role: *role }],
                    None => {
                        return Err(EncodeError::InvalidEdit(format!(
                            "{:?} is not a member",
                            aci
                        )))
                    }
                }
            }

            EditIntent::SetTitle(title) => {
                self.require(group, group.access_control.attributes, name)?;
                check_length(title, self.config.max_title_chars, "title")?;
                if *title == group.title {
                    Vec::new()
                } else {
                    vec![GroupAction::ModifyTitle { title: title.clone() }]
                }
            }

            EditIntent::SetDescription(description) => {
                self.require(group, group.access_control.attributes, name)?;
                check_length(description, self.config.max_description_chars, "description")?;
                if *description == group.description {
                    Vec::new()
                } else {
                    vec![GroupAction::ModifyDescription {
                        description: description.clone(),
                    }]
                }
            }

            EditIntent::SetAvatar(avatar_key) => {
                self.require(group, group.access_control.attributes, name)?;
                if *avatar_key == group.avatar_key {
                    Vec::new()
                } else {
                    vec![GroupAction::ModifyAvatar {
                        avatar_key: avatar_key.clone(),
                    }]
                }
            }

            EditIntent::SetDisappearingTimer(seconds) => {
                self.require(group, group.access_control.attributes, name)?;
                if *seconds == group.disappearing_message_timer_seconds {
                    Vec::new()
                } else {
                    vec![GroupAction::ModifyDisappearingTimer { seconds: *seconds }]
                }
            }

            EditIntent::SetAnnouncementsOnly(announcements_only) => {
                self.require(group, AccessRequired::Administrator, name)?;
                if *announcements_only == group.announcements_only {
                    Vec::new()
                } else {
                    vec![GroupAction::ModifyAnnouncementsOnly {
                        announcements_only: *announcements_only,
                    }]
                }
            }

            EditIntent::SetAttributesAccess(access) => {
                ensure_access(access, name)?;
                self.require(group, AccessRequired::Administrator, name)?;
                if *access == group.access_control.attributes {
                    Vec::new()
                } else {
                    vec![GroupAction::ModifyAttributesAccess { access: *access }]
                }
            }

            EditIntent::SetMembershipAccess(access) => {
                ensure_access(access, name)?;
                self.require(group, AccessRequired::Administrator, name)?;
                if *access == group.access_control.members {
                    Vec::new()
                } else {
                    vec![GroupAction::ModifyMembershipAccess { access: *access }]
                }
            }

            EditIntent::SetAddFromInviteLinkAccess(access) => {
                ensure_access(access, name)?;
                self.require(group, AccessRequired::Administrator, name)?;
                if *access == group.access_control.add_from_invite_link {
                    Vec::new()
                } else {
                    vec![GroupAction::ModifyAddFromInviteLinkAccess { access: *access }]
                }
            }

            EditIntent::ResetInviteLinkPassword { password } => {
                if password.len() != INVITE_LINK_PASSWORD_BYTES {
                    return Err(EncodeError::InvalidIntent(format!(
                        "{}: password must be {} bytes",
                        name, INVITE_LINK_PASSWORD_BYTES
                    )));
                }
                self.require(group, AccessRequired::Administrator, name)?;
                if *password == group.invite_link_password {
                    Vec::new()
                } else {
                    vec![GroupAction::ModifyInviteLinkPassword {
                        password: password.clone(),
                    }]
                }
            }

            EditIntent::ApproveJoinRequests(acis) => {
                self.require(group, AccessRequired::Administrator, name)?;
                let mut seen = HashSet::new();
                let mut actions = Vec::new();
                for aci in acis.iter().filter(|aci| seen.insert(**aci)) {
                    ensure_known(aci, name)?;
                    match group.status_of(aci) {
                        MembershipStatus::Requesting => {
                            actions.push(GroupAction::PromoteRequestingMember {
                                aci: *aci,
                                role: Role::Default,
                            })
                        }
                        MembershipStatus::Member(_) => {}
                        _ => {
                            return Err(EncodeError::InvalidEdit(format!(
                                "{:?} has no join request",
                                aci
                            )))
                        }
                    }
                }
                actions
            }

            EditIntent::DenyJoinRequests(acis) => {
                self.require(group, AccessRequired::Administrator, name)?;
                let mut seen = HashSet::new();
                acis.iter()
                    .filter(|aci| seen.insert(**aci))
                    .filter(|aci| group.requesting_member(aci).is_some())
                    .map(|aci| GroupAction::DeleteRequestingMember { aci: *aci })
                    .collect()
            }

            EditIntent::AcceptInvite(commitment) => {
                ensure_commitment(commitment, name)?;
                match group.status_of(&me) {
                    MembershipStatus::Pending => vec![GroupAction::PromotePendingMember {
                        aci: me,
                        commitment: *commitment,
                    }],
                    MembershipStatus::Member(_) => Vec::new(),
                    _ => return Err(EncodeError::NotAMember),
                }
            }

            EditIntent::UpdateSelfProfileKey(commitment) => {
                ensure_commitment(commitment, name)?;
                let member = group.member(&me).ok_or(EncodeError::NotAMember)?;
                if member.profile_key_commitment == *commitment {
                    Vec::new()
                } else {
                    vec![GroupAction::ModifyMemberProfileKey {
                        aci: me,
                        commitment: *commitment,
                    }]
                }
            }

            EditIntent::LeaveGroup {
                allow_auto_promotion,
            } => self.diff_leave(group, *allow_auto_promotion)?,
        };

        Ok(actions)
    }

    /// Leaving as the only administrator of a group with other members
    /// promotes the member with the lowest ACI in the same change.
    fn diff_leave(
        &self,
        group: &DecryptedGroup,
        allow_auto_promotion: bool,
    ) -> Result<Vec<GroupAction>, EncodeError> {
        let me = self.self_aci;
        match group.status_of(&me) {
            MembershipStatus::Member(role) => {
                let mut actions = Vec::new();
                let sole_admin = role.is_admin() && group.administrators().count() == 1;
                let successor = group
                    .members
                    .iter()
                    .map(|m| m.aci)
                    .filter(|aci| *aci != me)
                    .min();

                if let (true, Some(successor)) = (sole_admin, successor) {
                    if !allow_auto_promotion {
                        return Err(EncodeError::InvalidEdit(
                            "sole administrator cannot leave without promoting a member"
                                .to_string(),
                        ));
                    }
                    log::debug!("Auto-promoting {:?} before leaving", successor);
                    actions.push(GroupAction::ModifyMemberRole {
                        aci: successor,
                        role: Role::Administrator,
                    });
                }
                actions.push(GroupAction::DeleteMember { aci: me });
                Ok(actions)
            }
            MembershipStatus::Pending => Ok(vec![GroupAction::DeletePendingMember { aci: me }]),
            MembershipStatus::Requesting => {
                Ok(vec![GroupAction::DeleteRequestingMember { aci: me }])
            }
            MembershipStatus::NotInGroup => Err(EncodeError::NotAMember),
        }
    }

    fn require(
        &self,
        group: &DecryptedGroup,
        access: AccessRequired,
        intent: &'static str,
    ) -> Result<(), EncodeError> {
        let role = match group.status_of(&self.self_aci) {
            MembershipStatus::Member(role) => role,
            _ => return Err(EncodeError::NotAMember),
        };
        if access.allows(role) {
            Ok(())
        } else {
            Err(EncodeError::InsufficientRights { intent })
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ensure_known(aci: &Aci, intent: &str) -> Result<(), EncodeError> {
    if aci.is_unknown() {
        return Err(EncodeError::InvalidIntent(format!("{}: unknown ACI", intent)));
    }
    Ok(())
}

fn ensure_commitment(commitment: &ProfileKeyCommitment, intent: &str) -> Result<(), EncodeError> {
    if commitment.is_empty() {
        return Err(EncodeError::InvalidIntent(format!(
            "{}: no profile key credential",
            intent
        )));
    }
    Ok(())
}

fn ensure_access(access: &AccessRequired, intent: &str) -> Result<(), EncodeError> {
    if *access == AccessRequired::Unknown {
        return Err(EncodeError::InvalidIntent(format!(
            "{}: unknown access level",
            intent
        )));
    }
    Ok(())
}

fn check_length(value: &str, max_chars: usize, field: &str) -> Result<(), EncodeError> {
    let chars = value.chars().count();
    if chars > max_chars {
        return Err(EncodeError::InvalidEdit(format!(
            "{} is {} characters, limit is {}",
            field, chars, max_chars
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
