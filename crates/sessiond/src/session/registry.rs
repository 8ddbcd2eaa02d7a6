//! Known session ids and per-id transition locks.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::log::SessionLog;

/// Registry of live sessions.
///
/// Membership is the transcript cache: an id is registered exactly while
/// [`SessionLog`] holds an entry for it. Transitions on one id are
/// serialized through [`SessionRegistry::lock`]; transitions on different
/// ids run concurrently.
#[derive(Debug)]
pub struct SessionRegistry {
    log: Arc<SessionLog>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionRegistry {
    pub fn new(log: Arc<SessionLog>) -> Self {
        Self {
            log,
            locks: DashMap::new(),
        }
    }

    pub fn log(&self) -> &Arc<SessionLog> {
        &self.log
    }

    pub fn contains(&self, id: &str) -> bool {
        self.log.exists(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.log.session_ids()
    }

    /// Acquire the transition lock for `id`.
    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(id.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    /// Drop the lock slot of a session that has left the registry.
    ///
    /// Waiters still queued on the old slot will find the id unregistered
    /// once they acquire it. Ids are never reused, so a fresh slot created
    /// afterwards cannot race a live session.
    pub fn retire(&self, id: &str) {
        self.locks.remove(id);
    }
}
