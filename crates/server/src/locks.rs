use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Table = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Async mutual exclusion keyed by file name.
///
/// Different names never contend; entries are dropped once nobody holds or
/// waits on them.
#[derive(Clone, Default)]
pub struct NameLocks {
    table: Table,
}

/// Held while a pipeline works on one name.
pub struct NameGuard {
    key: String,
    table: Table,
    _guard: OwnedMutexGuard<()>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, name: &str) -> NameGuard {
        let slot = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(name.to_string()).or_default())
        };

        NameGuard {
            key: name.to_string(),
            table: Arc::clone(&self.table),
            _guard: slot.lock_owned().await,
        }
    }

    /// Names currently held or awaited.
    pub fn active(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Drop for NameGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // The table and this guard are the only owners left
        if table
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) <= 2)
        {
            table.remove(&self.key);
        }
    }
}
