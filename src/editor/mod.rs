//! Group editor: the entry point applications call.
//!
//! `GroupEditor::edit` hands out an `EditSession` holding the group's edit
//! lock. The session records intents and `commit` runs
//! encoder -> server -> reconciler once. Remote changes from the update
//! channel go through `apply_remote_change`, which does not take the edit
//! lock; the reconciler's compare-and-set keeps the two paths consistent.
//!
//! # Example
//!
//! ```ignore
//! let mut session = editor.edit(group_id).await?;
//! session.set_title("Weekend hike").set_disappearing_timer(86_400);
//! let outcome = session.commit().await?;
//! ```

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::change::SignedGroupChange;
use crate::config::{ConfigError, EngineConfig};
use crate::crypto::ChangeCodec;
use crate::encoder::{ChangeEncoder, EncodeError};
use crate::events::{EventBus, GroupEvent};
use crate::ids::{Aci, GroupId, GroupMasterKey};
use crate::model::{DecryptedGroup, InvariantError, MembershipStatus};
use crate::reconciler::{ChangeReconciler, ReconcileError, ReconcileOutcome};
use crate::server::{GroupServer, ServerError};
use crate::store::{GroupStore, StoreError, StoredGroup};

mod locks;
mod session;

pub use locks::{GroupLockGuard, GroupLocks};
pub use session::{EditSession, EditState};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Caller-facing classification of a failed edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GroupChangeFailureReason {
    NotAMember,
    /// Someone else's change landed first. Refetch, then start a new session.
    LocalRevisionMismatch,
    NetworkError,
    GroupTooLarge,
    InvalidEdit,
    InsufficientRights,
    /// The server's response failed signature or structural checks.
    VerificationFailed,
    StorageFailure,
}

#[derive(Error, Debug)]
pub enum GroupChangeError {
    #[error("Legacy group {0:?} cannot be edited")]
    LegacyGroup(GroupId),

    #[error("Group {0:?} is not in the local store")]
    UnknownGroup(GroupId),

    #[error("Still in group {0:?}; leave before deleting")]
    StillInGroup(GroupId),

    #[error("Invalid group snapshot: {0}")]
    InvalidSnapshot(#[from] InvariantError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl GroupChangeError {
    pub fn reason(&self) -> GroupChangeFailureReason {
        use GroupChangeFailureReason as R;

        match self {
            GroupChangeError::LegacyGroup(_)
            | GroupChangeError::StillInGroup(_)
            | GroupChangeError::InvalidSnapshot(_) => R::InvalidEdit,
            GroupChangeError::UnknownGroup(_) => R::NotAMember,
            GroupChangeError::Encode(e) => match e {
                EncodeError::NotAMember => R::NotAMember,
                EncodeError::InsufficientRights { .. } => R::InsufficientRights,
                EncodeError::GroupTooLarge { .. } => R::GroupTooLarge,
                EncodeError::InvalidEdit(_)
                | EncodeError::InvalidIntent(_)
                | EncodeError::Prediction(_)
                | EncodeError::Codec(_) => R::InvalidEdit,
            },
            GroupChangeError::Server(e) => match e {
                ServerError::Conflict { .. } => R::LocalRevisionMismatch,
                ServerError::Network(_) => R::NetworkError,
                ServerError::NotAMember => R::NotAMember,
                ServerError::Forbidden(_) => R::InsufficientRights,
                ServerError::GroupTooLarge => R::GroupTooLarge,
                ServerError::Rejected(_) => R::InvalidEdit,
            },
            GroupChangeError::Reconcile(e) => match e {
                ReconcileError::ResyncRequired { .. } => R::LocalRevisionMismatch,
                ReconcileError::Verification(_) | ReconcileError::Invalid(_) => {
                    R::VerificationFailed
                }
                ReconcileError::UnknownGroup(_) => R::NotAMember,
                ReconcileError::Store(_) => R::StorageFailure,
            },
            GroupChangeError::Store(_) => R::StorageFailure,
        }
    }

    /// Retrying can succeed: after a network error as-is, after a conflict
    /// once the group has been refetched. The engine itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.reason(),
            GroupChangeFailureReason::NetworkError
                | GroupChangeFailureReason::LocalRevisionMismatch
        )
    }

    /// A client bug or a bad server response, not a state problem.
    pub fn is_fatal(&self) -> bool {
        match self {
            GroupChangeError::Encode(e) => e.is_fatal(),
            _ => self.reason() == GroupChangeFailureReason::VerificationFailed,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupChangeOutcome {
    /// The server accepted a change and it is now the stored snapshot.
    /// `group` follows the server's version; `predicted` is what we proposed.
    Applied {
        group: DecryptedGroup,
        events: Vec<GroupEvent>,
        predicted: DecryptedGroup,
    },
    /// Every intent was a no-op; nothing was sent.
    NoChange { group: DecryptedGroup },
}

impl GroupChangeOutcome {
    pub fn group(&self) -> &DecryptedGroup {
        match self {
            GroupChangeOutcome::Applied { group, .. } | GroupChangeOutcome::NoChange { group } => {
                group
            }
        }
    }

    pub fn revision(&self) -> u32 {
        self.group().revision
    }

    pub fn events(&self) -> &[GroupEvent] {
        match self {
            GroupChangeOutcome::Applied { events, .. } => events,
            GroupChangeOutcome::NoChange { .. } => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// GroupEditor
// ---------------------------------------------------------------------------

pub(crate) struct EditorInner {
    pub(crate) store: Arc<dyn GroupStore>,
    pub(crate) server: Arc<dyn GroupServer>,
    pub(crate) encoder: ChangeEncoder,
    pub(crate) reconciler: ChangeReconciler,
}

/// Cheap to clone; clones share store, server, locks and event bus.
#[derive(Clone)]
pub struct GroupEditor {
    self_aci: Aci,
    config: EngineConfig,
    locks: GroupLocks,
    events: EventBus,
    inner: Arc<EditorInner>,
}

impl GroupEditor {
    pub fn new(
        self_aci: Aci,
        store: Arc<dyn GroupStore>,
        server: Arc<dyn GroupServer>,
        codec: Arc<dyn ChangeCodec>,
        config: EngineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        log::info!("Group editor for {:?}: {}", self_aci, config);

        let events = EventBus::new(config.event_channel_capacity);
        let encoder = ChangeEncoder::new(self_aci, config.clone(), codec.clone());
        let reconciler = ChangeReconciler::new(store.clone(), codec, events.clone());

        Ok(GroupEditor {
            self_aci,
            config,
            locks: GroupLocks::new(),
            events,
            inner: Arc::new(EditorInner {
                store,
                server,
                encoder,
                reconciler,
            }),
        })
    }

    pub fn self_aci(&self) -> Aci {
        self.self_aci
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open an edit session, waiting for any session already in flight on
    /// the same group. Legacy groups are rejected before locking.
    pub async fn edit(&self, group_id: GroupId) -> Result<EditSession, GroupChangeError> {
        if !group_id.is_v2() {
            return Err(GroupChangeError::LegacyGroup(group_id));
        }
        let lock = self.locks.acquire(group_id).await;
        Ok(EditSession::new(group_id, self.inner.clone(), lock))
    }

    /// Take the group's edit lock without a session, for requests that
    /// must not race a membership edit (join-request handling).
    pub async fn lock(&self, group_id: GroupId) -> GroupLockGuard {
        self.locks.acquire(group_id).await
    }

    pub fn locks(&self) -> &GroupLocks {
        &self.locks
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GroupEvent> {
        self.events.subscribe()
    }

    /// Apply a change delivered by the update channel.
    pub fn apply_remote_change(
        &self,
        group_id: &GroupId,
        change: &SignedGroupChange,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.inner.reconciler.apply_signed(group_id, change)
    }

    /// Install a group snapshot fetched from the server, typically after
    /// `ReconcileError::ResyncRequired`. Waits for the edit lock so no
    /// session is mid-commit; only a strictly newer revision replaces the
    /// stored one, and a replacement emits a single `Resynced` event.
    pub async fn resync_group(
        &self,
        group_id: GroupId,
        group: DecryptedGroup,
    ) -> Result<ReconcileOutcome, GroupChangeError> {
        let _lock = self.locks.acquire(group_id).await;
        Ok(self
            .inner
            .reconciler
            .replace_snapshot(&group_id, group, self.self_aci)?)
    }

    /// Latest stored snapshot.
    pub fn group(&self, group_id: &GroupId) -> Result<Option<DecryptedGroup>, StoreError> {
        Ok(self.inner.store.get(group_id)?.map(|stored| stored.group))
    }

    /// Record a group we just joined or fetched. Returns `false` if a live
    /// record already exists.
    pub fn insert_group(
        &self,
        master_key: GroupMasterKey,
        group: DecryptedGroup,
    ) -> Result<bool, GroupChangeError> {
        group.validate()?;
        let revision = group.revision;
        let record = StoredGroup::new(master_key, group);
        let group_id = record.group_id;
        let inserted = self.inner.store.insert(record)?;
        if inserted {
            log::info!("{:?}: stored at revision {}", group_id, revision);
        }
        Ok(inserted)
    }

    /// Tombstone a group we are no longer part of.
    pub async fn delete_group(&self, group_id: GroupId) -> Result<bool, GroupChangeError> {
        let _lock = self.locks.acquire(group_id).await;
        if let Some(stored) = self.inner.store.get(&group_id)? {
            if stored.group.status_of(&self.self_aci) != MembershipStatus::NotInGroup {
                return Err(GroupChangeError::StillInGroup(group_id));
            }
        }
        Ok(self.inner.store.delete(&group_id)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
