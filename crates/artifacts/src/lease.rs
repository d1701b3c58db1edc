use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Reference counts of paths currently used by an in-flight request.
///
/// Cleanup consults the table and skips any leased path instead of waiting
/// for it.
#[derive(Debug, Clone, Default)]
pub struct LeaseTable {
    inner: Arc<Mutex<HashMap<PathBuf, usize>>>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a lease on `path`; it is released when the returned guard drops.
    pub fn acquire(&self, path: impl Into<PathBuf>) -> Lease {
        let path = path.into();
        *self.lock().entry(path.clone()).or_insert(0) += 1;
        Lease {
            table: self.clone(),
            path,
        }
    }

    pub fn is_leased(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    /// Number of distinct paths currently leased.
    pub fn active(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, path: &Path) {
        let mut leases = self.lock();
        if let Some(count) = leases.get_mut(path) {
            *count -= 1;
            if *count == 0 {
                leases.remove(path);
            }
        }
    }

    // Counts stay consistent even if a holder panicked mid-update.
    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, usize>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
pub struct Lease {
    table: LeaseTable,
    path: PathBuf,
}

impl Lease {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.table.release(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_released_on_drop() {
        let table = LeaseTable::new();
        let path = Path::new("/data/uploads/images/a.png");

        let lease = table.acquire(path);
        assert!(table.is_leased(path));
        assert_eq!(lease.path(), path);

        drop(lease);
        assert!(!table.is_leased(path), "Lease should be released on drop");
        assert_eq!(table.active(), 0);
    }

    #[test]
    fn test_nested_leases_are_counted() {
        let table = LeaseTable::new();
        let path = Path::new("/data/a.png");

        let first = table.acquire(path);
        let second = table.acquire(path);
        assert_eq!(table.active(), 1, "Same path counts as one active entry");

        drop(first);
        assert!(table.is_leased(path), "Second holder still owns the path");

        drop(second);
        assert!(!table.is_leased(path));
    }

    #[test]
    fn test_leases_are_shared_across_clones() {
        let table = LeaseTable::new();
        let clone = table.clone();
        let path = Path::new("/data/b.png");

        let _lease = clone.acquire(path);
        assert!(table.is_leased(path));
    }
}
