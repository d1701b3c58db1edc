use crate::errors::StorageError;
use crate::layout::{PARTIAL_SUFFIX, StorageLayout};
use crate::lease::{Lease, LeaseTable};
use crate::record::UploadRecord;
use std::ffi::OsString;
use std::fs::{self, Metadata, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Extension of annotated result images.
pub const RESULT_EXTENSION: &str = "jpg";

/// Which artifacts a purge may remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeScope {
    /// Files last modified at least this long ago.
    OlderThan(Duration),
    /// Every file not currently leased.
    All,
}

/// A result file written to the static namespace.
///
/// The file stays leased until this value is dropped, so purges skip it while
/// the owning request is still packaging its response.
#[derive(Debug)]
pub struct StoredArtifact {
    pub path: PathBuf,
    pub url: String,
    pub lease: Lease,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    layout: StorageLayout,
    leases: LeaseTable,
}

impl ArtifactStore {
    /// Open the store, creating the namespace directories if needed.
    pub fn open(layout: StorageLayout) -> Result<Self, StorageError> {
        layout.ensure_dirs()?;
        tracing::info!(root = %layout.root().display(), "Artifact store ready");

        Ok(Self {
            layout,
            leases: LeaseTable::new(),
        })
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Mark `path` as in use so purges skip it until the lease drops.
    pub fn lease(&self, path: &Path) -> Lease {
        self.leases.acquire(path)
    }

    /// Persist the raw upload at `record.storage_path`.
    pub fn save(&self, record: &UploadRecord, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        let path = &record.storage_path;
        if !self.layout.contains(path) {
            return Err(StorageError::OutsideRoot(path.clone()));
        }

        write_exclusive(path, bytes)?;

        tracing::debug!(
            path = %path.display(),
            size_bytes = bytes.len(),
            "Upload saved"
        );
        Ok(path.clone())
    }

    /// Persist an annotated result derived from `record`.
    ///
    /// `frame` distinguishes the units of a video; still images pass `None`.
    pub fn save_result(
        &self,
        record: &UploadRecord,
        frame: Option<u32>,
        bytes: &[u8],
    ) -> Result<StoredArtifact, StorageError> {
        let file_name = result_file_name(record, frame);
        let path = self.layout.result_path(record.kind, &file_name);
        let url = self
            .layout
            .url_for(&path)
            .ok_or_else(|| StorageError::OutsideRoot(path.clone()))?;

        let lease = self.lease(&path);
        write_exclusive(&path, bytes)?;

        tracing::debug!(path = %path.display(), url = %url, "Result saved");
        Ok(StoredArtifact { path, url, lease })
    }

    /// Remove a consumed upload. Returns `false` if it was already gone.
    pub fn discard(&self, record: &UploadRecord) -> Result<bool, StorageError> {
        match fs::remove_file(&record.storage_path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(&record.storage_path, e)),
        }
    }

    /// Delete eligible files from every managed namespace.
    ///
    /// Leased files (and the staging files of leased targets) are skipped.
    /// Files that disappear mid-scan are not errors.
    pub fn purge(&self, scope: PurgeScope) -> Result<usize, StorageError> {
        let cutoff = match scope {
            PurgeScope::All => None,
            PurgeScope::OlderThan(age) => match SystemTime::now().checked_sub(age) {
                Some(cutoff) => Some(cutoff),
                None => return Ok(0),
            },
        };

        let mut removed = 0usize;
        for dir in self.layout.managed_dirs() {
            removed += self.purge_dir(&dir, cutoff)?;
        }

        tracing::info!(removed, scope = ?scope, "Purge finished");
        Ok(removed)
    }

    fn purge_dir(&self, dir: &Path, cutoff: Option<SystemTime>) -> Result<usize, StorageError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StorageError::io(dir, e)),
        };

        let mut removed = 0usize;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping entry without metadata");
                    continue;
                }
            };

            if metadata.is_dir() {
                removed += self.purge_dir(&path, cutoff)?;
                continue;
            }

            if !self.is_eligible(&path, &metadata, cutoff) {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "Purged artifact");
                    removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to purge artifact");
                }
            }
        }

        Ok(removed)
    }

    fn is_eligible(&self, path: &Path, metadata: &Metadata, cutoff: Option<SystemTime>) -> bool {
        if self.leases.is_leased(path) {
            return false;
        }
        if let Some(target) = partial_target(path) {
            if self.leases.is_leased(&target) {
                return false;
            }
        }

        match cutoff {
            None => true,
            Some(cutoff) => metadata
                .modified()
                .map(|modified| modified <= cutoff)
                .unwrap_or(false),
        }
    }
}

/// File name of the annotated output for `record`.
pub fn result_file_name(record: &UploadRecord, frame: Option<u32>) -> String {
    match frame {
        Some(frame) => format!("{}_f{:05}.{}", record.stem(), frame, RESULT_EXTENSION),
        None => format!("{}.{}", record.stem(), RESULT_EXTENSION),
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}

fn partial_target(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let target = name.strip_suffix(PARTIAL_SUFFIX)?;
    Some(path.with_file_name(target))
}

/// Write `bytes` to `path` without ever replacing an existing file.
///
/// The content is staged next to the target and hard-linked into place, which
/// fails atomically if the target appeared in the meantime.
fn write_exclusive(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if path.exists() {
        return Err(StorageError::AlreadyExists(path.to_path_buf()));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }

    let staging = partial_path(path);
    stage(&staging, bytes)?;

    let linked = fs::hard_link(&staging, path).map_err(|e| match e.kind() {
        io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(path.to_path_buf()),
        _ => StorageError::io(path, e),
    });

    discard_staging(&staging);
    linked
}

fn discard_staging(staging: &Path) {
    if let Err(e) = fs::remove_file(staging) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %staging.display(), error = %e, "Failed to remove staging file");
        }
    }
}

fn stage(staging: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(staging)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(staging.to_path_buf()),
            _ => StorageError::io(staging, e),
        })?;

    if let Err(e) = file.write_all(bytes).and_then(|()| file.sync_data()) {
        drop(file);
        discard_staging(staging);
        return Err(StorageError::io(staging, e));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MediaKind;
    use chrono::Utc;

    fn record(name: &str) -> UploadRecord {
        UploadRecord {
            original_filename: name.to_string(),
            sanitized_filename: name.to_string(),
            storage_path: PathBuf::from("/unused").join(name),
            kind: MediaKind::Video,
            size_bytes: 0,
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_result_file_name() {
        assert_eq!(result_file_name(&record("clip.mp4"), None), "clip.jpg");
        assert_eq!(
            result_file_name(&record("clip.mp4"), Some(42)),
            "clip_f00042.jpg"
        );
    }

    #[test]
    fn test_partial_path_round_trip() {
        let path = Path::new("/a/b/cat.jpg");
        let staging = partial_path(path);
        assert_eq!(staging, PathBuf::from("/a/b/cat.jpg.part"));
        assert_eq!(partial_target(&staging).as_deref(), Some(path));
        assert!(partial_target(path).is_none());
    }
}
