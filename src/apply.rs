/// Pure change application, the single place a snapshot advances.
///
/// `apply_change` takes a snapshot at revision `r` and a change targeting
/// `r + 1`, runs every action in order against a copy, validates the result
/// and returns the new snapshot together with the events it produced. The
/// input snapshot is never touched, so a rejected change leaves no trace.
///
/// Both the reconciler (authoritative changes) and the encoder (optimistic
/// prediction) go through this function, which is what makes the predicted
/// snapshot equal the applied one whenever the server does not rewrite the
/// proposal.

use thiserror::Error;

use crate::change::{DecryptedGroupChange, GroupAction};
use crate::events::{GroupEvent, GroupEventKind};
use crate::ids::{Aci, GroupId};
use crate::model::{DecryptedGroup, InvariantError, Member, MembershipStatus, Role};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error("Change targets revision 0")]
    InvalidRevision,

    #[error("Change to revision {change} cannot apply on top of revision {local}")]
    RevisionMismatch { local: u32, change: u32 },

    #[error("{action}: target {aci:?} not found")]
    TargetNotFound { action: &'static str, aci: Aci },

    #[error("{action}: {aci:?} is already in the group")]
    AlreadyInGroup { action: &'static str, aci: Aci },

    #[error("{0}: unknown role")]
    UnknownRole(&'static str),

    #[error("Resulting group violates invariant: {0}")]
    Invariant(#[from] InvariantError),
}

// ---------------------------------------------------------------------------
// apply_change
// ---------------------------------------------------------------------------

/// Apply `change` on top of `group`, returning the next snapshot and events.
pub fn apply_change(
    group_id: GroupId,
    group: &DecryptedGroup,
    change: &DecryptedGroupChange,
) -> Result<(DecryptedGroup, Vec<GroupEvent>), ApplyError> {
    let from = change.from_revision().ok_or(ApplyError::InvalidRevision)?;
    if from != group.revision {
        return Err(ApplyError::RevisionMismatch {
            local: group.revision,
            change: change.revision,
        });
    }

    let mut next = group.clone();
    next.revision = change.revision;
    let kinds = apply_actions(&mut next, change.revision, change.editor, &change.actions)?;
    next.validate()?;

    let events = kinds
        .into_iter()
        .map(|kind| GroupEvent {
            group_id,
            revision: change.revision,
            editor: change.editor,
            kind,
        })
        .collect();

    Ok((next, events))
}

/// Run `actions` in order against `group` in place, without the final
/// invariant check. Callers either validate afterwards or work on a scratch
/// copy.
pub(crate) fn apply_actions(
    group: &mut DecryptedGroup,
    revision: u32,
    editor: Aci,
    actions: &[GroupAction],
) -> Result<Vec<GroupEventKind>, ApplyError> {
    let mut kinds = Vec::new();
    for action in actions {
        if let Some(kind) = apply_action(group, revision, editor, action)? {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

/// Apply one action. Returns the event it produced, or `None` when the
/// action set a field to the value it already held.
fn apply_action(
    group: &mut DecryptedGroup,
    revision: u32,
    editor: Aci,
    action: &GroupAction,
) -> Result<Option<GroupEventKind>, ApplyError> {
    let name = action.as_str();

    let kind = match action {
        // --- Membership ---------------------------------------------------
        GroupAction::AddMember { member } => {
            if member.role == Role::Unknown {
                return Err(ApplyError::UnknownRole(name));
            }
            ensure_absent(group, name, &member.aci)?;
            group.members.push(Member {
                joined_revision: revision,
                ..member.clone()
            });
            Some(GroupEventKind::MemberAdded {
                aci: member.aci,
                role: member.role,
            })
        }

        GroupAction::DeleteMember { aci } => {
            let idx = position(group.members.iter().map(|m| m.aci), name, aci)?;
            group.members.remove(idx);
            if *aci == editor {
                Some(GroupEventKind::MemberLeft { aci: *aci })
            } else {
                Some(GroupEventKind::MemberRemoved { aci: *aci })
            }
        }

        GroupAction::ModifyMemberRole { aci, role } => {
            if *role == Role::Unknown {
                return Err(ApplyError::UnknownRole(name));
            }
            let member = group
                .members
                .iter_mut()
                .find(|m| m.aci == *aci)
                .ok_or(ApplyError::TargetNotFound { action: name, aci: *aci })?;
            let old = member.role;
            member.role = *role;
            (old != *role).then_some(GroupEventKind::RoleChanged {
                aci: *aci,
                old,
                new: *role,
            })
        }

        GroupAction::ModifyMemberProfileKey { aci, commitment } => {
            let member = group
                .members
                .iter_mut()
                .find(|m| m.aci == *aci)
                .ok_or(ApplyError::TargetNotFound { action: name, aci: *aci })?;
            let changed = member.profile_key_commitment != *commitment;
            member.profile_key_commitment = *commitment;
            changed.then_some(GroupEventKind::ProfileKeyChanged { aci: *aci })
        }

        // --- Invites ------------------------------------------------------
        GroupAction::AddPendingMember { pending } => {
            if pending.role == Role::Unknown {
                return Err(ApplyError::UnknownRole(name));
            }
            ensure_absent(group, name, &pending.aci)?;
            group.pending_members.push(pending.clone());
            Some(GroupEventKind::MemberInvited {
                aci: pending.aci,
                role: pending.role,
            })
        }

        GroupAction::DeletePendingMember { aci } => {
            let idx = position(group.pending_members.iter().map(|p| p.aci), name, aci)?;
            group.pending_members.remove(idx);
            if *aci == editor {
                Some(GroupEventKind::InviteDeclined { aci: *aci })
            } else {
                Some(GroupEventKind::InviteRevoked { aci: *aci })
            }
        }

        GroupAction::PromotePendingMember { aci, commitment } => {
            let idx = position(group.pending_members.iter().map(|p| p.aci), name, aci)?;
            let pending = group.pending_members.remove(idx);
            group.members.push(Member {
                aci: pending.aci,
                role: pending.role,
                joined_revision: revision,
                profile_key_commitment: *commitment,
            });
            Some(GroupEventKind::InviteAccepted { aci: *aci })
        }

        // --- Join requests ------------------------------------------------
        GroupAction::AddRequestingMember { requesting } => {
            ensure_absent(group, name, &requesting.aci)?;
            group.requesting_members.push(requesting.clone());
            Some(GroupEventKind::JoinRequested { aci: requesting.aci })
        }

        GroupAction::DeleteRequestingMember { aci } => {
            let idx = position(group.requesting_members.iter().map(|r| r.aci), name, aci)?;
            group.requesting_members.remove(idx);
            if *aci == editor {
                Some(GroupEventKind::JoinRequestCancelled { aci: *aci })
            } else {
                Some(GroupEventKind::JoinRequestDenied { aci: *aci })
            }
        }

        GroupAction::PromoteRequestingMember { aci, role } => {
            if *role == Role::Unknown {
                return Err(ApplyError::UnknownRole(name));
            }
            let idx = position(group.requesting_members.iter().map(|r| r.aci), name, aci)?;
            let requesting = group.requesting_members.remove(idx);
            group.members.push(Member {
                aci: requesting.aci,
                role: *role,
                joined_revision: revision,
                profile_key_commitment: requesting.profile_key_commitment,
            });
            Some(GroupEventKind::JoinRequestApproved { aci: *aci, role: *role })
        }

        // --- Attributes ---------------------------------------------------
        GroupAction::ModifyTitle { title } => {
            replace(&mut group.title, title.clone())
                .map(|(old, new)| GroupEventKind::TitleChanged { old, new })
        }

        GroupAction::ModifyDescription { description } => {
            replace(&mut group.description, description.clone())
                .map(|(old, new)| GroupEventKind::DescriptionChanged { old, new })
        }

        GroupAction::ModifyAvatar { avatar_key } => {
            replace(&mut group.avatar_key, avatar_key.clone())
                .map(|(old, new)| GroupEventKind::AvatarChanged { old, new })
        }

        GroupAction::ModifyDisappearingTimer { seconds } => {
            replace(&mut group.disappearing_message_timer_seconds, *seconds)
                .map(|(old, new)| GroupEventKind::DisappearingTimerChanged { old, new })
        }

        // --- Access control -----------------------------------------------
        GroupAction::ModifyAttributesAccess { access } => {
            replace(&mut group.access_control.attributes, *access)
                .map(|(old, new)| GroupEventKind::AttributesAccessChanged { old, new })
        }

        GroupAction::ModifyMembershipAccess { access } => {
            replace(&mut group.access_control.members, *access)
                .map(|(old, new)| GroupEventKind::MembershipAccessChanged { old, new })
        }

        GroupAction::ModifyAddFromInviteLinkAccess { access } => {
            replace(&mut group.access_control.add_from_invite_link, *access)
                .map(|(old, new)| GroupEventKind::InviteLinkAccessChanged { old, new })
        }

        GroupAction::ModifyInviteLinkPassword { password } => {
            replace(&mut group.invite_link_password, password.clone())
                .map(|_| GroupEventKind::InviteLinkPasswordReset)
        }

        GroupAction::ModifyAnnouncementsOnly { announcements_only } => {
            replace(&mut group.announcements_only, *announcements_only)
                .map(|(old, new)| GroupEventKind::AnnouncementsOnlyChanged { old, new })
        }
    };

    Ok(kind)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ensure_absent(group: &DecryptedGroup, action: &'static str, aci: &Aci) -> Result<(), ApplyError> {
    match group.status_of(aci) {
        MembershipStatus::NotInGroup => Ok(()),
        _ => Err(ApplyError::AlreadyInGroup { action, aci: *aci }),
    }
}

fn position(
    mut acis: impl Iterator<Item = Aci>,
    action: &'static str,
    aci: &Aci,
) -> Result<usize, ApplyError> {
    acis.position(|candidate| candidate == *aci)
        .ok_or(ApplyError::TargetNotFound { action, aci: *aci })
}

/// Overwrite `slot`; returns `(old, new)` only if the value changed.
fn replace<T: PartialEq + Clone>(slot: &mut T, value: T) -> Option<(T, T)> {
    if *slot == value {
        return None;
    }
    let old = std::mem::replace(slot, value.clone());
    Some((old, value))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{GroupMasterKey, ProfileKeyCommitment};
    use crate::model::{AccessRequired, PendingMember, RequestingMember};

    fn gid() -> GroupId {
        GroupMasterKey::from_bytes([0x11; 32]).group_id()
    }

    fn aci(n: u8) -> Aci {
        Aci::from_bytes([n; 16])
    }

    fn commitment(n: u8) -> ProfileKeyCommitment {
        ProfileKeyCommitment::from_bytes([n; 32])
    }

    fn member(a: Aci, role: Role) -> Member {
        Member {
            aci: a,
            role,
            joined_revision: 0,
            profile_key_commitment: commitment(1),
        }
    }

    /// Self (admin) + other (default) at revision 5.
    fn two_member_group() -> DecryptedGroup {
        DecryptedGroup {
            revision: 5,
            title: "Group".into(),
            members: vec![member(aci(1), Role::Administrator), member(aci(2), Role::Default)],
            ..Default::default()
        }
    }

    fn change(revision: u32, editor: Aci, actions: Vec<GroupAction>) -> DecryptedGroupChange {
        DecryptedGroupChange { revision, editor, actions }
    }

    #[test]
    fn test_sole_admin_leave_with_promotion() {
        let group = two_member_group();
        let leave = change(
            6,
            aci(1),
            vec![
                GroupAction::ModifyMemberRole { aci: aci(2), role: Role::Administrator },
                GroupAction::DeleteMember { aci: aci(1) },
            ],
        );

        let (next, events) = apply_change(gid(), &group, &leave).unwrap();
        assert_eq!(next.revision, 6);
        assert!(next.member(&aci(1)).is_none());
        assert_eq!(next.member(&aci(2)).unwrap().role, Role::Administrator);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1].kind,
            GroupEventKind::MemberLeft { aci: aci(1) }
        );
        assert!(events.iter().all(|e| e.revision == 6 && e.editor == aci(1)));
    }

    #[test]
    fn test_delete_before_promote_still_valid_at_end() {
        // Invariants are checked on the final snapshot, not between actions.
        let group = two_member_group();
        let leave = change(
            6,
            aci(1),
            vec![
                GroupAction::DeleteMember { aci: aci(1) },
                GroupAction::ModifyMemberRole { aci: aci(2), role: Role::Administrator },
            ],
        );
        assert!(apply_change(gid(), &group, &leave).is_ok());
    }

    #[test]
    fn test_last_admin_removed_rejected() {
        let group = two_member_group();
        let leave = change(6, aci(1), vec![GroupAction::DeleteMember { aci: aci(1) }]);
        let err = apply_change(gid(), &group, &leave).unwrap_err();
        assert_eq!(err, ApplyError::Invariant(InvariantError::NoAdministrator));
    }

    #[test]
    fn test_only_member_leaves_to_empty_group() {
        let group = DecryptedGroup {
            revision: 2,
            members: vec![member(aci(1), Role::Administrator)],
            ..Default::default()
        };
        let leave = change(3, aci(1), vec![GroupAction::DeleteMember { aci: aci(1) }]);
        let (next, _) = apply_change(gid(), &group, &leave).unwrap();
        assert!(next.members.is_empty());
        assert!(next.validate().is_ok());
    }

    #[test]
    fn test_revision_mismatch_rejected() {
        let group = two_member_group();
        let future = change(8, aci(1), vec![GroupAction::ModifyTitle { title: "x".into() }]);
        assert_eq!(
            apply_change(gid(), &group, &future).unwrap_err(),
            ApplyError::RevisionMismatch { local: 5, change: 8 }
        );

        let zero = change(0, aci(1), vec![]);
        assert_eq!(
            apply_change(gid(), &group, &zero).unwrap_err(),
            ApplyError::InvalidRevision
        );
    }

    #[test]
    fn test_add_member_stamps_joined_revision() {
        let group = two_member_group();
        let add = change(
            6,
            aci(1),
            vec![GroupAction::AddMember { member: member(aci(3), Role::Default) }],
        );
        let (next, events) = apply_change(gid(), &group, &add).unwrap();
        assert_eq!(next.member(&aci(3)).unwrap().joined_revision, 6);
        assert_eq!(
            events[0].kind,
            GroupEventKind::MemberAdded { aci: aci(3), role: Role::Default }
        );
    }

    #[test]
    fn test_add_existing_member_rejected() {
        let group = two_member_group();
        let add = change(
            6,
            aci(1),
            vec![GroupAction::AddMember { member: member(aci(2), Role::Default) }],
        );
        assert!(matches!(
            apply_change(gid(), &group, &add),
            Err(ApplyError::AlreadyInGroup { .. })
        ));
    }

    #[test]
    fn test_missing_target_rejects_whole_change() {
        let group = two_member_group();
        let bad = change(
            6,
            aci(1),
            vec![
                GroupAction::ModifyTitle { title: "New".into() },
                GroupAction::DeleteMember { aci: aci(9) },
            ],
        );
        assert!(matches!(
            apply_change(gid(), &group, &bad),
            Err(ApplyError::TargetNotFound { action: "DeleteMember", .. })
        ));
        assert_eq!(group.title, "Group");
    }

    #[test]
    fn test_unknown_role_rejected() {
        let group = two_member_group();
        let bad = change(
            6,
            aci(1),
            vec![GroupAction::ModifyMemberRole { aci: aci(2), role: Role::Unknown }],
        );
        assert_eq!(
            apply_change(gid(), &group, &bad).unwrap_err(),
            ApplyError::UnknownRole("ModifyMemberRole")
        );
    }

    #[test]
    fn test_unchanged_fields_emit_no_events() {
        let group = two_member_group();
        let same = change(
            6,
            aci(1),
            vec![
                GroupAction::ModifyTitle { title: "Group".into() },
                GroupAction::ModifyMemberRole { aci: aci(2), role: Role::Default },
            ],
        );
        let (next, events) = apply_change(gid(), &group, &same).unwrap();
        assert_eq!(next.revision, 6);
        assert!(events.is_empty());
    }

    #[test]
    fn test_invite_lifecycle() {
        let group = two_member_group();
        let invite = change(
            6,
            aci(1),
            vec![GroupAction::AddPendingMember {
                pending: PendingMember {
                    aci: aci(3),
                    role: Role::Default,
                    added_by: aci(1),
                    timestamp_ms: 10,
                },
            }],
        );
        let (group, _) = apply_change(gid(), &group, &invite).unwrap();
        assert_eq!(group.status_of(&aci(3)), MembershipStatus::Pending);

        let accept = change(
            7,
            aci(3),
            vec![GroupAction::PromotePendingMember { aci: aci(3), commitment: commitment(3) }],
        );
        let (group, events) = apply_change(gid(), &group, &accept).unwrap();
        assert_eq!(group.status_of(&aci(3)), MembershipStatus::Member(Role::Default));
        assert_eq!(group.member(&aci(3)).unwrap().profile_key_commitment, commitment(3));
        assert_eq!(events[0].kind, GroupEventKind::InviteAccepted { aci: aci(3) });
    }

    #[test]
    fn test_join_request_denied_vs_cancelled() {
        let mut group = two_member_group();
        group.requesting_members.push(RequestingMember {
            aci: aci(4),
            profile_key_commitment: commitment(4),
            timestamp_ms: 1,
        });

        let deny = change(6, aci(1), vec![GroupAction::DeleteRequestingMember { aci: aci(4) }]);
        let (_, events) = apply_change(gid(), &group, &deny).unwrap();
        assert_eq!(events[0].kind, GroupEventKind::JoinRequestDenied { aci: aci(4) });

        let cancel = change(6, aci(4), vec![GroupAction::DeleteRequestingMember { aci: aci(4) }]);
        let (_, events) = apply_change(gid(), &group, &cancel).unwrap();
        assert_eq!(events[0].kind, GroupEventKind::JoinRequestCancelled { aci: aci(4) });

        let approve = change(
            6,
            aci(1),
            vec![GroupAction::PromoteRequestingMember { aci: aci(4), role: Role::Default }],
        );
        let (next, _) = apply_change(gid(), &group, &approve).unwrap();
        assert_eq!(next.member(&aci(4)).unwrap().profile_key_commitment, commitment(4));
        assert!(next.requesting_members.is_empty());
    }

    #[test]
    fn test_metadata_events_carry_old_and_new() {
        let group = two_member_group();
        let edit = change(
            6,
            aci(1),
            vec![
                GroupAction::ModifyTitle { title: "Renamed".into() },
                GroupAction::ModifyDisappearingTimer { seconds: 3600 },
                GroupAction::ModifyMembershipAccess { access: AccessRequired::Administrator },
                GroupAction::ModifyAnnouncementsOnly { announcements_only: true },
            ],
        );
        let (next, events) = apply_change(gid(), &group, &edit).unwrap();
        assert_eq!(next.title, "Renamed");
        assert_eq!(next.access_control.members, AccessRequired::Administrator);
        assert!(next.announcements_only);
        assert_eq!(
            events[0].kind,
            GroupEventKind::TitleChanged { old: "Group".into(), new: "Renamed".into() }
        );
        assert_eq!(
            events[1].kind,
            GroupEventKind::DisappearingTimerChanged { old: 0, new: 3600 }
        );
        assert_eq!(events.len(), 4);
    }
}
