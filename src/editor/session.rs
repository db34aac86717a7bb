//! Edit session: intents for one group, committed as one round trip.
//!
//! A session owns the group's edit lock for its whole life. Committing
//! consumes it; dropping it (early return, panic, cancelled future) releases
//! the lock without submitting anything.

use std::fmt;
use std::sync::Arc;

use super::locks::GroupLockGuard;
use super::{EditorInner, GroupChangeError, GroupChangeFailureReason, GroupChangeOutcome};
use crate::encoder::{EditIntent, EncodedChange, GroupCandidate};
use crate::ids::{Aci, GroupId, ProfileKeyCommitment};
use crate::model::{AccessRequired, Role};
use crate::reconciler::ReconcileOutcome;

/// Session lifecycle. `Applied`, `Unchanged`, `Conflict` and `Failed` are
/// terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditState {
    Idle,
    Collecting,
    Encoding,
    Submitted,
    /// A server change was stored.
    Applied,
    /// Every intent was a no-op; nothing was sent or stored.
    Unchanged,
    Conflict,
    Failed,
}

impl EditState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EditState::Applied | EditState::Unchanged | EditState::Conflict | EditState::Failed
        )
    }

    fn after_commit(result: &Result<GroupChangeOutcome, GroupChangeError>) -> Self {
        match result {
            Ok(GroupChangeOutcome::Applied { .. }) => EditState::Applied,
            Ok(GroupChangeOutcome::NoChange { .. }) => EditState::Unchanged,
            Err(e) if e.reason() == GroupChangeFailureReason::LocalRevisionMismatch => {
                EditState::Conflict
            }
            Err(_) => EditState::Failed,
        }
    }
}

pub struct EditSession {
    group_id: GroupId,
    intents: Vec<EditIntent>,
    state: EditState,
    inner: Arc<EditorInner>,
    _lock: GroupLockGuard,
}

impl EditSession {
    pub(super) fn new(group_id: GroupId, inner: Arc<EditorInner>, lock: GroupLockGuard) -> Self {
        let mut session = EditSession {
            group_id,
            intents: Vec::new(),
            state: EditState::Idle,
            inner,
            _lock: lock,
        };
        session.transition(EditState::Collecting);
        session
    }

    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    pub fn state(&self) -> EditState {
        self.state
    }

    /// Intents recorded so far, in order.
    pub fn intents(&self) -> &[EditIntent] {
        &self.intents
    }

    // -----------------------------------------------------------------------
    // Intents
    // -----------------------------------------------------------------------

    pub fn add_members<I>(&mut self, candidates: I) -> &mut Self
    where
        I: IntoIterator<Item = GroupCandidate>,
    {
        self.record(EditIntent::add_members(candidates))
    }

    /// Remove a member, revoke an invite or deny a join request, whichever
    /// applies to `aci`.
    pub fn remove_member(&mut self, aci: Aci) -> &mut Self {
        self.record(EditIntent::RemoveMember(aci))
    }

    pub fn change_role(&mut self, aci: Aci, role: Role) -> &mut Self {
        self.record(EditIntent::ChangeRole { aci, role })
    }

    pub fn set_title(&mut self, title: impl Into<String>) -> &mut Self {
        self.record(EditIntent::SetTitle(title.into()))
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> &mut Self {
        self.record(EditIntent::SetDescription(description.into()))
    }

    pub fn set_avatar(&mut self, avatar_key: impl Into<String>) -> &mut Self {
        self.record(EditIntent::SetAvatar(avatar_key.into()))
    }

    /// `0` turns disappearing messages off.
    pub fn set_disappearing_timer(&mut self, seconds: u32) -> &mut Self {
        self.record(EditIntent::SetDisappearingTimer(seconds))
    }

    pub fn set_announcements_only(&mut self, announcements_only: bool) -> &mut Self {
        self.record(EditIntent::SetAnnouncementsOnly(announcements_only))
    }

    pub fn set_attributes_access(&mut self, access: AccessRequired) -> &mut Self {
        self.record(EditIntent::SetAttributesAccess(access))
    }

    pub fn set_membership_access(&mut self, access: AccessRequired) -> &mut Self {
        self.record(EditIntent::SetMembershipAccess(access))
    }

    pub fn set_add_from_invite_link_access(&mut self, access: AccessRequired) -> &mut Self {
        self.record(EditIntent::SetAddFromInviteLinkAccess(access))
    }

    /// The new password is generated now, so re-encoding the session
    /// proposes the same one.
    pub fn reset_invite_link_password(&mut self) -> &mut Self {
        self.record(EditIntent::reset_invite_link_password())
    }

    pub fn approve_join_requests<I>(&mut self, acis: I) -> &mut Self
    where
        I: IntoIterator<Item = Aci>,
    {
        self.record(EditIntent::ApproveJoinRequests(acis.into_iter().collect()))
    }

    pub fn deny_join_requests<I>(&mut self, acis: I) -> &mut Self
    where
        I: IntoIterator<Item = Aci>,
    {
        self.record(EditIntent::DenyJoinRequests(acis.into_iter().collect()))
    }

    pub fn accept_invite(&mut self, commitment: ProfileKeyCommitment) -> &mut Self {
        self.record(EditIntent::AcceptInvite(commitment))
    }

    pub fn update_self_profile_key(&mut self, commitment: ProfileKeyCommitment) -> &mut Self {
        self.record(EditIntent::UpdateSelfProfileKey(commitment))
    }

    /// Leave the group. As the only administrator of a group with other
    /// members, `allow_auto_promotion` decides between promoting a
    /// successor in the same change and failing with `InvalidEdit`.
    pub fn leave_group(&mut self, allow_auto_promotion: bool) -> &mut Self {
        self.record(EditIntent::LeaveGroup {
            allow_auto_promotion,
        })
    }

    fn record(&mut self, intent: EditIntent) -> &mut Self {
        log::trace!("{:?}: recorded {}", self.group_id, intent.as_str());
        self.intents.push(intent);
        self
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    /// Encode, submit and reconcile the recorded intents. Exactly one server
    /// round trip, or none when the intents change nothing. Never retries.
    pub async fn commit(mut self) -> Result<GroupChangeOutcome, GroupChangeError> {
        self.transition(EditState::Encoding);
        let result = self.submit().await;

        self.transition(EditState::after_commit(&result));

        if let Err(e) = &result {
            log::warn!("{:?}: edit failed ({:?}): {}", self.group_id, e.reason(), e);
        }
        result
    }

    async fn submit(&mut self) -> Result<GroupChangeOutcome, GroupChangeError> {
        let inner = self.inner.clone();
        let group_id = self.group_id;

        let stored = inner
            .store
            .get(&group_id)?
            .ok_or(GroupChangeError::UnknownGroup(group_id))?;

        let EncodedChange {
            proposal,
            change,
            predicted,
        } = match inner.encoder.encode(&stored, &self.intents)? {
            Some(encoded) => encoded,
            None => {
                log::debug!("{:?}: nothing to submit", group_id);
                return Ok(GroupChangeOutcome::NoChange {
                    group: stored.group,
                });
            }
        };

        self.transition(EditState::Submitted);
        log::info!(
            "{:?}: submitting {} action(s) on revision {}",
            group_id,
            change.actions.len(),
            proposal.base_revision
        );
        let response = inner.server.patch_group(&group_id, proposal).await?;

        match inner.reconciler.apply_signed(&group_id, &response.group_change)? {
            ReconcileOutcome::Applied { group, events } => {
                if group != predicted {
                    log::info!(
                        "{:?}: server rewrote the change to revision {}",
                        group_id,
                        group.revision
                    );
                }
                Ok(GroupChangeOutcome::Applied {
                    group,
                    events,
                    predicted,
                })
            }
            // The update channel delivered our own change first.
            ReconcileOutcome::AlreadyApplied { .. } => {
                let group = inner
                    .store
                    .get(&group_id)?
                    .map(|stored| stored.group)
                    .ok_or(GroupChangeError::UnknownGroup(group_id))?;
                Ok(GroupChangeOutcome::Applied {
                    group,
                    events: Vec::new(),
                    predicted,
                })
            }
        }
    }

    fn transition(&mut self, next: EditState) {
        log::debug!("{:?}: edit session {:?} -> {:?}", self.group_id, self.state, next);
        self.state = next;
    }
}

impl Drop for EditSession {
    fn drop(&mut self) {
        match self.state {
            EditState::Collecting if !self.intents.is_empty() => log::debug!(
                "{:?}: session dropped, {} intent(s) discarded",
                self.group_id,
                self.intents.len()
            ),
            EditState::Encoding | EditState::Submitted => log::warn!(
                "{:?}: session cancelled while {:?}; server outcome unknown",
                self.group_id,
                self.state
            ),
            _ => {}
        }
        log::debug!("{:?}: edit session {:?} -> Idle", self.group_id, self.state);
    }
}

impl fmt::Debug for EditSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditSession")
            .field("group_id", &self.group_id)
            .field("state", &self.state)
            .field("intents", &self.intents.len())
            .finish()
    }
}
