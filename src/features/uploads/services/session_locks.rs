use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Per-session reader/writer locks.
///
/// Chunk writes take the shared side so they run concurrently with each
/// other; finalize takes the exclusive side so no chunk lands mid-assembly
/// and two finalize calls never assemble the same session at once.
///
/// The locks only cover one process. Replicas sharing a session store rely
/// on the store's compare-and-swap to pick a single winner, and each
/// finalize attempt persists under its own artifact key.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<Uuid, Arc<RwLock<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock handle for a session, created on first use
    pub fn handle(&self, upload_id: Uuid) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(locks.entry(upload_id).or_default())
    }

    /// Drop the lock of a purged session
    pub fn forget(&self, upload_id: Uuid) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks.remove(&upload_id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_session_shares_one_lock() {
        let locks = SessionLocks::new();
        let id = Uuid::new_v4();

        let a = locks.handle(id);
        let b = locks.handle(id);
        assert!(Arc::ptr_eq(&a, &b));

        let _write = a.write().await;
        assert!(b.try_read().is_err());
        assert!(locks.handle(Uuid::new_v4()).try_write().is_ok());
    }

    #[test]
    fn test_forget_removes_handle() {
        let locks = SessionLocks::new();
        let id = Uuid::new_v4();
        locks.handle(id);
        assert_eq!(locks.len(), 1);

        locks.forget(id);
        assert_eq!(locks.len(), 0);
    }
}
