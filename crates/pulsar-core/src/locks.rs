use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, LockResult, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct NamedLock {
    held: Mutex<bool>,
    released: Condvar,
}

/// In-process registry of named locks, one per lock file path. A single server
/// process owns the lifecycle of any given job, so no cross-process locking is done.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: Mutex<HashMap<PathBuf, Arc<NamedLock>>>,
}

/// Held lock; released on drop.
pub struct LockGuard {
    lock: Arc<NamedLock>,
}

fn recover<'a, T>(result: LockResult<MutexGuard<'a, T>>) -> MutexGuard<'a, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self, path: &Path) -> LockGuard {
        let lock = {
            let mut locks = recover(self.locks.lock());
            locks
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(NamedLock::default()))
                .clone()
        };

        let mut held = recover(lock.held.lock());
        while *held {
            held = lock
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *held = true;
        drop(held);

        LockGuard { lock }
    }

    /// Forget every lock registered beneath `prefix`, e.g. once a job directory is
    /// deleted.
    pub fn free_locks_under(&self, prefix: &Path) {
        let mut locks = recover(self.locks.lock());
        locks.retain(|path, _| !path.starts_with(prefix));
    }

    pub fn len(&self) -> usize {
        recover(self.locks.lock()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let mut held = recover(self.lock.held.lock());
        *held = false;
        drop(held);
        self.lock.released.notify_one();
    }
}
