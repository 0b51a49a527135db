//! Session lock state and the lock action.
//!
//! The session event source pushes lock/unlock notifications into the daemon
//! loop; the lock action asks the host to lock the session.

pub mod logind;

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use tracing::info;

use crate::domain::EngineEvent;

pub use logind::LogindLock;
pub use logind::SessionWatcher;

/// Lock state change reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Locked,
    Unlocked,
}

impl SessionEvent {
    /// Map a `LockedHint` style boolean to an event.
    pub fn from_locked(locked: bool) -> Self {
        if locked { Self::Locked } else { Self::Unlocked }
    }
}

impl From<SessionEvent> for EngineEvent {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::Locked => EngineEvent::SessionLocked,
            SessionEvent::Unlocked => EngineEvent::SessionUnlocked,
        }
    }
}

/// Locks the current session.
///
/// Fire-and-forget and idempotent: locking an already locked session is harmless.
pub trait LockAction {
    fn lock(&mut self);
}

/// Lock action that only logs (dry-run mode).
#[derive(Debug, Clone, Default)]
pub struct DryRunLock {
    count: Arc<AtomicUsize>,
}

impl DryRunLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times a lock was requested.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

impl LockAction for DryRunLock {
    fn lock(&mut self) {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        info!("[DRY RUN] Would lock session (request #{})", n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_event_from_locked() {
        assert_eq!(SessionEvent::from_locked(true), SessionEvent::Locked);
        assert_eq!(SessionEvent::from_locked(false), SessionEvent::Unlocked);
    }

    #[test]
    fn test_session_event_into_engine_event() {
        assert_eq!(
            EngineEvent::from(SessionEvent::Locked),
            EngineEvent::SessionLocked
        );
        assert_eq!(
            EngineEvent::from(SessionEvent::Unlocked),
            EngineEvent::SessionUnlocked
        );
    }

    #[test]
    fn test_dry_run_lock_counts() {
        let lock = DryRunLock::new();
        let mut handle = lock.clone();
        handle.lock();
        handle.lock();
        assert_eq!(lock.count(), 2);
    }
}
