//! Local group store contract.
//!
//! The store holds the latest authoritative snapshot per group. The engine
//! never assumes it is the only writer: every write after creation is a
//! compare-and-set on the revision the writer observed, so two writers that
//! raced on the same revision cannot both land.
//!
//! The application supplies the durable implementation (encrypted database
//! on device); `MemoryGroupStore` covers tests and ephemeral use.

use thiserror::Error;

use crate::ids::{GroupId, GroupMasterKey};
use crate::model::DecryptedGroup;

pub mod memory;

pub use memory::MemoryGroupStore;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Revision must advance: expected {expected}, got {new}")]
    NonMonotonic { expected: u32, new: u32 },

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Storage I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// StoredGroup
// ---------------------------------------------------------------------------

/// One group as persisted locally: its key material and latest snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredGroup {
    pub group_id: GroupId,
    pub master_key: GroupMasterKey,
    pub group: DecryptedGroup,
}

impl StoredGroup {
    pub fn new(master_key: GroupMasterKey, group: DecryptedGroup) -> Self {
        StoredGroup {
            group_id: master_key.group_id(),
            master_key,
            group,
        }
    }

    pub fn revision(&self) -> u32 {
        self.group.revision
    }
}

// ---------------------------------------------------------------------------
// GroupStore
// ---------------------------------------------------------------------------

pub trait GroupStore: Send + Sync {
    /// Latest snapshot for a group, or `None` if unknown or deleted.
    fn get(&self, group_id: &GroupId) -> Result<Option<StoredGroup>>;

    /// Create the record when a group is first joined or fetched.
    /// Returns `false` (and writes nothing) if a live record exists.
    fn insert(&self, record: StoredGroup) -> Result<bool>;

    /// Replace the snapshot iff the stored revision equals
    /// `expected_revision`. The new revision is `group.revision` and must be
    /// greater than `expected_revision`. Returns `false` when another writer
    /// got there first.
    fn compare_and_set(
        &self,
        group_id: &GroupId,
        expected_revision: u32,
        group: DecryptedGroup,
    ) -> Result<bool>;

    /// Tombstone a group after the local account left and the user deleted
    /// it. Returns `false` if there was nothing to delete.
    fn delete(&self, group_id: &GroupId) -> Result<bool>;
}
