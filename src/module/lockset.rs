//! Per-resource re-entrant locks
//!
//! Locks live in a map keyed by resource id. Every lock call, including the
//! re-entrant ones and waiting ones, counts as a user of the entry; the entry is
//! removed when the count drops to zero, so ids of uninstalled resources do not
//! leak locks.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::module::resource::ResourceId;
use crate::module::traits::ResolverError;

#[derive(Debug, Default)]
struct Ownership {
    thread: Option<ThreadId>,
    depth: usize,
}

#[derive(Debug, Default)]
struct ResourceLock {
    ownership: Mutex<Ownership>,
    released: Condvar,
}

impl ResourceLock {
    /// Take the lock if free or already ours
    fn try_take(ownership: &mut Ownership, me: ThreadId) -> bool {
        match ownership.thread {
            None => {
                ownership.thread = Some(me);
                ownership.depth = 1;
                true
            }
            Some(owner) if owner == me => {
                ownership.depth += 1;
                true
            }
            Some(_) => false,
        }
    }
}

#[derive(Debug)]
struct Slot {
    lock: Arc<ResourceLock>,
    users: usize,
}

/// Re-entrant lock per resource id
#[derive(Debug, Default)]
pub struct LockSet {
    slots: Mutex<HashMap<ResourceId, Slot>>,
}

impl LockSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn checkout(&self, id: ResourceId) -> Arc<ResourceLock> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(id).or_insert_with(|| Slot {
            lock: Arc::new(ResourceLock::default()),
            users: 0,
        });
        slot.users += 1;
        Arc::clone(&slot.lock)
    }

    fn checkin(&self, id: ResourceId) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&id) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                slots.remove(&id);
            }
        }
    }

    /// Block until the lock for `id` is held by the current thread
    pub fn lock(&self, id: ResourceId) {
        let me = thread::current().id();
        let lock = self.checkout(id);
        let mut ownership = lock.ownership.lock();
        while !ResourceLock::try_take(&mut ownership, me) {
            lock.released.wait(&mut ownership);
        }
    }

    /// Try to take the lock for `id` within `timeout`
    pub fn try_lock(&self, id: ResourceId, timeout: Duration) -> bool {
        let me = thread::current().id();
        let deadline = Instant::now() + timeout;
        let lock = self.checkout(id);
        let mut ownership = lock.ownership.lock();
        loop {
            if ResourceLock::try_take(&mut ownership, me) {
                return true;
            }
            if lock.released.wait_until(&mut ownership, deadline).timed_out() {
                if ResourceLock::try_take(&mut ownership, me) {
                    return true;
                }
                drop(ownership);
                self.checkin(id);
                debug!("Timed out after {:?} waiting for lock on {}", timeout, id);
                return false;
            }
        }
    }

    /// Release one level of the current thread's hold on `id`
    pub fn unlock(&self, id: ResourceId) -> Result<(), ResolverError> {
        let me = thread::current().id();
        let lock = {
            let slots = self.slots.lock();
            match slots.get(&id) {
                Some(slot) => Arc::clone(&slot.lock),
                None => return Err(ResolverError::NotLockOwner(id)),
            }
        };
        {
            let mut ownership = lock.ownership.lock();
            if ownership.thread != Some(me) {
                return Err(ResolverError::NotLockOwner(id));
            }
            ownership.depth -= 1;
            if ownership.depth == 0 {
                ownership.thread = None;
                lock.released.notify_all();
            }
        }
        self.checkin(id);
        Ok(())
    }

    /// Lock every id in ascending order, all or nothing
    ///
    /// On timeout the locks already taken are released in reverse order.
    pub fn lock_all(
        &self,
        ids: impl IntoIterator<Item = ResourceId>,
        timeout: Duration,
    ) -> Result<LockGuard<'_>, ResolverError> {
        let mut ids: Vec<ResourceId> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();

        let mut guard = LockGuard {
            set: self,
            held: Vec::with_capacity(ids.len()),
        };
        for id in ids {
            if !self.try_lock(id, timeout) {
                return Err(ResolverError::LockTimeout(id));
            }
            guard.held.push(id);
        }
        Ok(guard)
    }

    /// Whether any thread holds the lock for `id`
    pub fn is_locked(&self, id: ResourceId) -> bool {
        let lock = {
            let slots = self.slots.lock();
            match slots.get(&id) {
                Some(slot) => Arc::clone(&slot.lock),
                None => return false,
            }
        };
        let held = lock.ownership.lock().thread.is_some();
        held
    }

    /// Number of live lock entries
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Locks taken by [`LockSet::lock_all`], released on drop
pub struct LockGuard<'a> {
    set: &'a LockSet,
    held: Vec<ResourceId>,
}

impl LockGuard<'_> {
    pub fn ids(&self) -> &[ResourceId] {
        &self.held
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        for id in self.held.drain(..).rev() {
            if let Err(e) = self.set.unlock(id) {
                warn!("Failed to release lock on {}: {}", id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_reentrant_lock_and_cleanup() {
        let set = LockSet::new();
        let id = ResourceId(1);
        set.lock(id);
        set.lock(id);
        assert!(set.is_locked(id));
        set.unlock(id).unwrap();
        assert!(set.is_locked(id));
        set.unlock(id).unwrap();
        assert!(!set.is_locked(id));
        assert!(set.is_empty());
    }

    #[test]
    fn test_unlock_without_holding_fails() {
        let set = LockSet::new();
        assert!(matches!(
            set.unlock(ResourceId(9)),
            Err(ResolverError::NotLockOwner(_))
        ));
    }

    #[test]
    fn test_try_lock_times_out_against_other_thread() {
        let set = Arc::new(LockSet::new());
        let id = ResourceId(2);
        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = {
            let set = Arc::clone(&set);
            thread::spawn(move || {
                set.lock(id);
                locked_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                set.unlock(id).unwrap();
            })
        };

        locked_rx.recv().unwrap();
        assert!(!set.try_lock(id, Duration::from_millis(20)));
        assert!(set.unlock(id).is_err());

        release_tx.send(()).unwrap();
        holder.join().unwrap();
        assert!(set.try_lock(id, Duration::from_millis(500)));
        set.unlock(id).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_lock_all_is_all_or_nothing() {
        let set = Arc::new(LockSet::new());
        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = {
            let set = Arc::clone(&set);
            thread::spawn(move || {
                set.lock(ResourceId(3));
                locked_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                set.unlock(ResourceId(3)).unwrap();
            })
        };
        locked_rx.recv().unwrap();

        let result = set.lock_all(
            [ResourceId(4), ResourceId(1), ResourceId(3)],
            Duration::from_millis(20),
        );
        assert!(matches!(result, Err(ResolverError::LockTimeout(ResourceId(3)))));
        assert!(!set.is_locked(ResourceId(1)));

        release_tx.send(()).unwrap();
        holder.join().unwrap();

        {
            let guard = set
                .lock_all([ResourceId(4), ResourceId(1), ResourceId(1)], Duration::from_millis(500))
                .unwrap();
            assert_eq!(guard.ids(), &[ResourceId(1), ResourceId(4)]);
            assert!(set.is_locked(ResourceId(4)));
        }
        assert!(set.is_empty());
    }
}
