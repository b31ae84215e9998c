//! Per-credential critical sections
//!
//! One mutex per tag id, created on first use. Every operation that reads and
//! then writes a credential's session or balance holds the tag's lock for the
//! whole read-check-write, so two scans of the same tag never interleave while
//! different tags proceed in parallel.
//!
//! Entries live only while someone holds or waits for them: the last
//! [`CredentialGuard`] to drop removes the tag from the map, so unknown or
//! forged tag ids from readers do not accumulate.
//!
//! Locks are not reentrant: the `*_in_txn` helpers in the ledger assume the
//! caller already holds the lock and never take it themselves.

use dashmap::DashMap;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::sync::Arc;

type LockMap = DashMap<String, Arc<Mutex<()>>>;

#[derive(Debug, Default)]
pub struct CredentialLocks {
    locks: LockMap,
}

impl CredentialLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the tag's lock is held
    ///
    /// The shard guard is released before waiting, so a contended tag never
    /// holds up other tags in the same shard.
    pub fn lock(&self, tag_id: &str) -> CredentialGuard<'_> {
        let handle = self.handle(tag_id);
        CredentialGuard {
            locks: &self.locks,
            tag_id: tag_id.to_string(),
            guard: Some(handle.lock_arc()),
        }
    }

    /// Take the tag's lock if it is free
    pub fn try_lock(&self, tag_id: &str) -> Option<CredentialGuard<'_>> {
        let handle = self.handle(tag_id);
        let Some(guard) = handle.try_lock_arc() else {
            drop(handle);
            release(&self.locks, tag_id);
            return None;
        };
        Some(CredentialGuard {
            locks: &self.locks,
            tag_id: tag_id.to_string(),
            guard: Some(guard),
        })
    }

    fn handle(&self, tag_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(tag_id) {
            return lock.clone();
        }
        self.locks
            .entry(tag_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Tags currently locked or waited on
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held credential lock, removes the map entry when it was the last user
#[must_use]
pub struct CredentialGuard<'a> {
    locks: &'a LockMap,
    tag_id: String,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl Drop for CredentialGuard<'_> {
    fn drop(&mut self) {
        // unlock first, the guard owns one reference
        self.guard.take();
        release(self.locks, &self.tag_id);
    }
}

/// Drop the entry if only the map still references it
///
/// Waiters clone the handle under the shard lock, so a handle that is about
/// to be locked always has a count above one here.
fn release(locks: &LockMap, tag_id: &str) {
    locks.remove_if(tag_id, |_, lock| Arc::strong_count(lock) == 1);
}
