use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// Extensions recognised as still images.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tiff", "tif", "webp"];

/// Extensions recognised as video containers.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "flv", "wmv"];

impl MediaKind {
    /// Classify a lowercase extension (without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        if IMAGE_EXTENSIONS.contains(&ext) {
            Some(MediaKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    /// Directory name used for this kind inside every namespace.
    pub fn dir_name(&self) -> &'static str {
        match self {
            MediaKind::Image => "images",
            MediaKind::Video => "videos",
        }
    }

    /// Top-level MIME type matching this kind.
    pub fn mime_type(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

/// Metadata for a single received file, created once intake validation passes.
#[derive(Debug, Clone, Serialize)]
pub struct UploadRecord {
    pub original_filename: String,
    pub sanitized_filename: String,
    pub storage_path: PathBuf,
    pub kind: MediaKind,
    pub size_bytes: u64,
    pub received_at: DateTime<Utc>,
}

impl UploadRecord {
    /// Sanitized filename without its extension.
    pub fn stem(&self) -> &str {
        match self.sanitized_filename.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.sanitized_filename,
        }
    }
}
