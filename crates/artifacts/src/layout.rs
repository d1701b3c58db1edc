//! On-disk layout of the artifact root.
//!
//! ```text
//! <root>/uploads/{images,videos}/...       raw uploads awaiting inference
//! <root>/static/{images,videos}/exp/...    annotated results, served statically
//! ```

use crate::errors::StorageError;
use crate::record::MediaKind;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Upload namespace, relative to the root.
pub const UPLOADS_DIR: &str = "uploads";

/// Statically served namespace, relative to the root.
pub const STATIC_DIR: &str = "static";

/// Result directory inside each kind of the static namespace.
pub const RESULTS_DIR: &str = "exp";

/// Suffix of staging files that are renamed into place once fully written.
pub const PARTIAL_SUFFIX: &str = ".part";

#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
    url_prefix: String,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>, url_prefix: &str) -> Self {
        let trimmed = url_prefix.trim_end_matches('/');
        let url_prefix = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        };

        Self {
            root: root.into(),
            url_prefix,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    pub fn uploads_root(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }

    pub fn static_root(&self) -> PathBuf {
        self.root.join(STATIC_DIR)
    }

    pub fn upload_dir(&self, kind: MediaKind) -> PathBuf {
        self.uploads_root().join(kind.dir_name())
    }

    pub fn result_dir(&self, kind: MediaKind) -> PathBuf {
        self.static_root().join(kind.dir_name()).join(RESULTS_DIR)
    }

    pub fn upload_path(&self, kind: MediaKind, file_name: &str) -> PathBuf {
        self.upload_dir(kind).join(file_name)
    }

    pub fn result_path(&self, kind: MediaKind, file_name: &str) -> PathBuf {
        self.result_dir(kind).join(file_name)
    }

    /// Every directory the store writes into or sweeps.
    pub fn managed_dirs(&self) -> [PathBuf; 4] {
        [
            self.upload_dir(MediaKind::Image),
            self.upload_dir(MediaKind::Video),
            self.result_dir(MediaKind::Image),
            self.result_dir(MediaKind::Video),
        ]
    }

    /// Public URL of a file under the static namespace.
    pub fn url_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(self.static_root()).ok()?;

        let mut url = self.url_prefix.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    url.push('/');
                    url.push_str(part.to_str()?);
                }
                _ => return None,
            }
        }

        Some(url)
    }

    /// Whether `path` is a plain descendant of the root (no `..` hops).
    pub fn contains(&self, path: &Path) -> bool {
        path.strip_prefix(&self.root)
            .map(|rel| rel.components().all(|c| matches!(c, Component::Normal(_))))
            .unwrap_or(false)
    }

    pub fn ensure_dirs(&self) -> Result<(), StorageError> {
        for dir in self.managed_dirs() {
            fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaces_are_partitioned() {
        let layout = StorageLayout::new("/srv/detect", "/static");

        assert_eq!(
            layout.upload_dir(MediaKind::Image),
            PathBuf::from("/srv/detect/uploads/images")
        );
        assert_eq!(
            layout.upload_dir(MediaKind::Video),
            PathBuf::from("/srv/detect/uploads/videos")
        );
        assert_eq!(
            layout.result_dir(MediaKind::Image),
            PathBuf::from("/srv/detect/static/images/exp")
        );
        assert_eq!(
            layout.result_dir(MediaKind::Video),
            PathBuf::from("/srv/detect/static/videos/exp")
        );
    }

    #[test]
    fn test_url_for_static_file() {
        let layout = StorageLayout::new("/srv/detect", "static/");
        let path = layout.result_path(MediaKind::Image, "cat.jpg");

        assert_eq!(layout.url_prefix(), "/static");
        assert_eq!(
            layout.url_for(&path).as_deref(),
            Some("/static/images/exp/cat.jpg")
        );
    }

    #[test]
    fn test_url_for_rejects_non_static_paths() {
        let layout = StorageLayout::new("/srv/detect", "/static");

        assert!(layout.url_for(&layout.upload_path(MediaKind::Image, "a.png")).is_none());
        assert!(layout.url_for(Path::new("/srv/detect/static/../uploads/a.png")).is_none());
    }

    #[test]
    fn test_contains_rejects_parent_hops() {
        let layout = StorageLayout::new("/srv/detect", "/static");

        assert!(layout.contains(Path::new("/srv/detect/uploads/images/a.png")));
        assert!(!layout.contains(Path::new("/srv/detect/../etc/passwd")));
        assert!(!layout.contains(Path::new("/tmp/a.png")));
    }
}
