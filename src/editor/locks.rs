//! Per-group edit locks.
//!
//! One async mutex per group id, created on first use and pruned when the
//! last holder or waiter lets go. Sessions for different groups never touch
//! each other's lock; the registry map itself is only held for the instant
//! it takes to look up or prune an entry, never across an await.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::ids::GroupId;

/// One group's lock plus the number of holders and waiters using it.
struct LockEntry {
    lock: Arc<AsyncMutex<()>>,
    users: usize,
}

type LockMap = HashMap<GroupId, LockEntry>;

/// Registry of per-group locks. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct GroupLocks {
    inner: Arc<Mutex<LockMap>>,
}

impl GroupLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `group_id`. The lock is released when
    /// the returned guard is dropped, on every exit path. Cancelling the
    /// wait gives up the registration as well.
    pub async fn acquire(&self, group_id: GroupId) -> GroupLockGuard {
        let (lock, registration) = {
            let mut map = lock_map(&self.inner);
            let entry = map.entry(group_id).or_insert_with(|| LockEntry {
                lock: Arc::new(AsyncMutex::new(())),
                users: 0,
            });
            entry.users += 1;
            let registration = Registration {
                group_id,
                registry: self.inner.clone(),
            };
            (entry.lock.clone(), registration)
        };

        log::debug!("{:?}: waiting for edit lock", group_id);
        let guard = lock.lock_owned().await;
        log::debug!("{:?}: edit lock acquired", group_id);

        GroupLockGuard {
            group_id,
            guard: Some(guard),
            _registration: registration,
        }
    }

    /// Whether someone currently holds the lock for `group_id`.
    pub fn is_locked(&self, group_id: &GroupId) -> bool {
        lock_map(&self.inner)
            .get(group_id)
            .map(|entry| entry.lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of groups with a live lock entry.
    pub fn len(&self) -> usize {
        lock_map(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for GroupLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupLocks").field("groups", &self.len()).finish()
    }
}

/// The map only holds counters and `Arc`s, so a panic while it was locked
/// cannot leave it half-updated; recover from poisoning instead of
/// propagating it.
fn lock_map(map: &Mutex<LockMap>) -> MutexGuard<'_, LockMap> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One counted use of a registry entry, held by a waiter and then by its
/// guard. The entry is pruned when the last registration drops.
struct Registration {
    group_id: GroupId,
    registry: Arc<Mutex<LockMap>>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut map = lock_map(&self.registry);
        if let Some(entry) = map.get_mut(&self.group_id) {
            entry.users = entry.users.saturating_sub(1);
            if entry.users == 0 {
                map.remove(&self.group_id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/// Exclusive access to one group. Dropping it releases the lock.
pub struct GroupLockGuard {
    group_id: GroupId,
    guard: Option<OwnedMutexGuard<()>>,
    // Dropped after `guard`: the entry must outlive the held lock.
    _registration: Registration,
}

impl GroupLockGuard {
    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }
}

impl fmt::Debug for GroupLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupLockGuard")
            .field("group_id", &self.group_id)
            .finish()
    }
}

impl Drop for GroupLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        log::debug!("{:?}: edit lock released", self.group_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
