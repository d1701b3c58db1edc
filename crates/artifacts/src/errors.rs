use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage unavailable at {path}: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Artifact already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("Path is outside the artifact root: {0}")]
    OutsideRoot(PathBuf),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::Unavailable {
            path: path.into(),
            source,
        }
    }
}
