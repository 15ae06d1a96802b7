use std::sync::{LockResult, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub(crate) fn recover<'a, T>(result: LockResult<MutexGuard<'a, T>>) -> MutexGuard<'a, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}

/// Joins `handles`, giving up on those still running once `timeout` elapses.
/// Threads left behind are logged and detached, never killed.
pub(crate) fn join_with_timeout(
    handles: Vec<JoinHandle<()>>,
    timeout: Option<Duration>,
    what: &str,
) {
    let deadline = timeout.map(|t| Instant::now() + t);
    for handle in handles {
        while !handle.is_finished() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
        if !handle.is_finished() {
            tracing::warn!("A {} thread did not stop within the shutdown timeout", what);
            continue;
        }
        if handle.join().is_err() {
            tracing::error!("A {} thread panicked", what);
        }
    }
}
