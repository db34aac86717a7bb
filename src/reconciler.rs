/// Change reconciler: the only writer of group snapshots after creation.
///
/// Authoritative changes arrive from two places: the response to our own
/// edit, and the independent update channel. Both come through here. A
/// change is applied only on top of the exact revision it was made for;
/// anything older is a harmless redelivery and anything newer means we
/// missed a change and must refetch. The store write is a compare-and-set
/// on the revision we read, so a concurrent writer can never be overwritten.

use std::sync::Arc;

use thiserror::Error;

use crate::apply::{self, ApplyError};
use crate::change::{DecryptedGroupChange, SignedGroupChange};
use crate::crypto::{ChangeCodec, CodecError};
use crate::events::{EventBus, GroupEvent, GroupEventKind};
use crate::ids::{Aci, GroupId};
use crate::model::DecryptedGroup;
use crate::store::{GroupStore, StoreError, StoredGroup};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Group {0:?} is not in the local store")]
    UnknownGroup(GroupId),

    /// The change does not follow the local revision. Refetch the group.
    #[error("Resync required: local revision {local}, change applies on {from}")]
    ResyncRequired { local: u32, from: u32 },

    #[error("Change failed verification: {0}")]
    Verification(#[from] CodecError),

    #[error("Change is structurally invalid: {0}")]
    Invalid(#[from] ApplyError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The change advanced the stored snapshot.
    Applied {
        group: DecryptedGroup,
        events: Vec<GroupEvent>,
    },
    /// The store already holds this revision or a later one. Nothing was
    /// written and no events were emitted.
    AlreadyApplied { local_revision: u32 },
}

impl ReconcileOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ReconcileOutcome::Applied { .. })
    }
}

// ---------------------------------------------------------------------------
// ChangeReconciler
// ---------------------------------------------------------------------------

pub struct ChangeReconciler {
    store: Arc<dyn GroupStore>,
    codec: Arc<dyn ChangeCodec>,
    events: EventBus,
}

impl ChangeReconciler {
    pub fn new(store: Arc<dyn GroupStore>, codec: Arc<dyn ChangeCodec>, events: EventBus) -> Self {
        ChangeReconciler {
            store,
            codec,
            events,
        }
    }

    /// Verify a server-signed change and apply it.
    ///
    /// Verification happens before anything else; a change that fails it is
    /// never looked at further.
    pub fn apply_signed(
        &self,
        group_id: &GroupId,
        signed: &SignedGroupChange,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let stored = self.load(group_id)?;
        let change = self
            .codec
            .open_signed_change(&stored.master_key, signed)
            .map_err(|e| {
                log::warn!("{:?}: rejected server change: {}", group_id, e);
                ReconcileError::Verification(e)
            })?;
        self.reconcile(stored, &change)
    }

    /// Apply a change that was already verified and opened.
    pub fn apply_decrypted(
        &self,
        group_id: &GroupId,
        change: &DecryptedGroupChange,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let stored = self.load(group_id)?;
        self.reconcile(stored, change)
    }

    /// Replace the stored snapshot with a refetched one after a gap.
    ///
    /// Only a strictly newer revision is installed, through the same
    /// compare-and-set as single changes. A successful replace emits one
    /// `Resynced` event attributed to `editor`, the account that refetched.
    pub fn replace_snapshot(
        &self,
        group_id: &GroupId,
        group: DecryptedGroup,
        editor: Aci,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        group.validate().map_err(ApplyError::from)?;

        loop {
            let local = self.load(group_id)?.revision();
            if group.revision <= local {
                log::debug!(
                    "{:?}: refetched revision {} is not newer than local {}",
                    group_id,
                    group.revision,
                    local
                );
                return Ok(ReconcileOutcome::AlreadyApplied {
                    local_revision: local,
                });
            }

            // A failed swap means the store advanced; re-read and compare
            // again. Revisions only grow, so this settles.
            if self.store.compare_and_set(group_id, local, group.clone())? {
                log::info!(
                    "{:?}: resynced from revision {} to {}",
                    group_id,
                    local,
                    group.revision
                );
                let events = vec![GroupEvent {
                    group_id: *group_id,
                    revision: group.revision,
                    editor,
                    kind: GroupEventKind::Resynced {
                        from: local,
                        to: group.revision,
                    },
                }];
                self.events.publish(&events);
                return Ok(ReconcileOutcome::Applied { group, events });
            }
        }
    }

    fn load(&self, group_id: &GroupId) -> Result<StoredGroup, ReconcileError> {
        self.store
            .get(group_id)?
            .ok_or(ReconcileError::UnknownGroup(*group_id))
    }

    fn reconcile(
        &self,
        stored: StoredGroup,
        change: &DecryptedGroupChange,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let group_id = stored.group_id;
        let local = stored.revision();
        let from = change.from_revision().ok_or(ApplyError::InvalidRevision)?;

        if change.revision <= local {
            log::debug!(
                "{:?}: revision {} already applied (local {})",
                group_id,
                change.revision,
                local
            );
            return Ok(ReconcileOutcome::AlreadyApplied {
                local_revision: local,
            });
        }
        if from != local {
            log::warn!(
                "{:?}: gap before revision {} (local {}), resync required",
                group_id,
                change.revision,
                local
            );
            return Err(ReconcileError::ResyncRequired { local, from });
        }

        let (next, events) = apply::apply_change(group_id, &stored.group, change).map_err(|e| {
            log::warn!("{:?}: change to revision {} rejected: {}", group_id, change.revision, e);
            e
        })?;

        if !self.store.compare_and_set(&group_id, local, next.clone())? {
            // Another writer moved the group while we were applying.
            return match self.store.get(&group_id)? {
                Some(current) if current.revision() >= change.revision => {
                    log::debug!(
                        "{:?}: revision {} landed concurrently",
                        group_id,
                        change.revision
                    );
                    Ok(ReconcileOutcome::AlreadyApplied {
                        local_revision: current.revision(),
                    })
                }
                Some(current) => {
                    log::warn!(
                        "{:?}: store moved to revision {} under us",
                        group_id,
                        current.revision()
                    );
                    Err(ReconcileError::ResyncRequired {
                        local: current.revision(),
                        from,
                    })
                }
                None => Err(ReconcileError::UnknownGroup(group_id)),
            };
        }

        log::info!(
            "{:?}: applied revision {} ({} action(s), {} event(s))",
            group_id,
            change.revision,
            change.actions.len(),
            events.len()
        );
        self.events.publish(&events);

        Ok(ReconcileOutcome::Applied {
            group: next,
            events,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
