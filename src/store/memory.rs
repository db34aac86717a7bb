use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{GroupStore, Result, StoreError, StoredGroup};
use crate::ids::GroupId;
use crate::model::DecryptedGroup;

/// In-memory `GroupStore`. One mutex guards the whole map, which makes each
/// compare-and-set trivially atomic.
#[derive(Debug, Default)]
pub struct MemoryGroupStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    groups: HashMap<GroupId, StoredGroup>,
    tombstones: HashSet<GroupId>,
}

impl MemoryGroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the group was deleted locally.
    pub fn is_tombstoned(&self, group_id: &GroupId) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.tombstones.contains(group_id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.groups.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GroupStore for MemoryGroupStore {
    fn get(&self, group_id: &GroupId) -> Result<Option<StoredGroup>> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.groups.get(group_id).cloned())
    }

    fn insert(&self, record: StoredGroup) -> Result<bool> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        if inner.groups.contains_key(&record.group_id) {
            return Ok(false);
        }
        // Rejoining a deleted group clears its tombstone.
        inner.tombstones.remove(&record.group_id);
        inner.groups.insert(record.group_id, record);
        Ok(true)
    }

    fn compare_and_set(
        &self,
        group_id: &GroupId,
        expected_revision: u32,
        group: DecryptedGroup,
    ) -> Result<bool> {
        if group.revision <= expected_revision {
            return Err(StoreError::NonMonotonic {
                expected: expected_revision,
                new: group.revision,
            });
        }

        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        match inner.groups.get_mut(group_id) {
            Some(record) if record.group.revision == expected_revision => {
                record.group = group;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete(&self, group_id: &GroupId) -> Result<bool> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        let removed = inner.groups.remove(group_id).is_some();
        if removed {
            inner.tombstones.insert(*group_id);
        }
        Ok(removed)
    }
}
