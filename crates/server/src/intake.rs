//! Upload validation and filename sanitisation.
//!
//! Nothing here touches the filesystem: a successful validation only builds
//! the [`UploadRecord`] the artifact store will later persist.

use crate::error::ValidationError;
use artifacts::{MediaKind, StorageLayout, UploadRecord};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

const FALLBACK_STEM: &str = "upload";
const MAX_STEM_CHARS: usize = 64;

pub struct IntakeValidator {
    allowed: HashSet<String>,
    max_file_size: u64,
    layout: StorageLayout,
    counter: AtomicU64,
}

impl IntakeValidator {
    pub fn new(allowed_extensions: &[String], max_file_size: u64, layout: StorageLayout) -> Self {
        let allowed = allowed_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();

        Self {
            allowed,
            max_file_size,
            layout,
            // Random seed keeps names from a restarted process distinct
            counter: AtomicU64::new(u64::from(fastrand::u32(..))),
        }
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Allowed extensions, sorted for display.
    pub fn allowed_extensions(&self) -> Vec<&str> {
        let mut exts: Vec<&str> = self.allowed.iter().map(String::as_str).collect();
        exts.sort_unstable();
        exts
    }

    /// Classify a file by name and declared content type.
    pub fn classify(&self, filename: &str, content_type: Option<&str>) -> Result<MediaKind, ValidationError> {
        let base = base_name(filename);
        if base.trim().is_empty() {
            return Err(ValidationError::MissingFile);
        }

        let ext = extension(base).ok_or_else(|| ValidationError::UnsupportedType(base.to_string()))?;
        if !self.allowed.contains(&ext) {
            return Err(ValidationError::UnsupportedType(ext));
        }

        let kind = MediaKind::from_extension(&ext).ok_or_else(|| ValidationError::UnsupportedType(ext.clone()))?;

        if let Some(declared) = content_type.and_then(declared_kind) {
            if declared != kind {
                return Err(ValidationError::UnsupportedType(format!(
                    "{} declared as {}",
                    ext,
                    content_type.unwrap_or_default()
                )));
            }
        }

        Ok(kind)
    }

    /// Validate an upload and assign it a unique storage name.
    pub fn validate(
        &self,
        filename: &str,
        content_type: Option<&str>,
        size: u64,
    ) -> Result<UploadRecord, ValidationError> {
        let kind = self.classify(filename, content_type)?;

        if size > self.max_file_size {
            return Err(ValidationError::OversizedFile {
                limit: self.max_file_size,
            });
        }

        let received_at = Utc::now();
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) % 1_000_000;
        let (stem, ext) = sanitize(filename);
        let sanitized_filename = format!(
            "{}_{:06}_{}.{}",
            received_at.format("%Y%m%d_%H%M%S"),
            seq,
            stem,
            ext
        );

        Ok(UploadRecord {
            original_filename: filename.to_string(),
            storage_path: self.layout.upload_path(kind, &sanitized_filename),
            sanitized_filename,
            kind,
            size_bytes: size,
            received_at,
        })
    }
}

/// Safe `(stem, extension)` for a client-supplied file name.
///
/// Path components are dropped, characters outside `[A-Za-z0-9_-]` become
/// `_`, and the extension is lowercased.
pub fn sanitize(filename: &str) -> (String, String) {
    let base = base_name(filename);
    let (stem, ext) = match base.rsplit_once('.') {
        Some((stem, ext)) => (stem, ext.to_ascii_lowercase()),
        None => (base, String::new()),
    };

    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(MAX_STEM_CHARS)
        .collect();
    let cleaned = cleaned.trim_matches('_');

    let stem = if cleaned.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        cleaned.to_string()
    };
    let ext = ext.chars().filter(char::is_ascii_alphanumeric).collect();

    (stem, ext)
}

fn base_name(filename: &str) -> &str {
    filename.rsplit(['/', '\\']).next().unwrap_or(filename)
}

fn extension(base: &str) -> Option<String> {
    let (_, ext) = base.rsplit_once('.')?;
    let ext = ext.trim().to_ascii_lowercase();
    (!ext.is_empty()).then_some(ext)
}

fn declared_kind(content_type: &str) -> Option<MediaKind> {
    let top = content_type.split('/').next()?.trim().to_ascii_lowercase();
    match top.as_str() {
        "image" => Some(MediaKind::Image),
        "video" => Some(MediaKind::Video),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::Path;

    fn validator() -> IntakeValidator {
        let allowed: Vec<String> = ["png", "jpg", "jpeg", "mp4"].iter().map(|s| s.to_string()).collect();
        IntakeValidator::new(&allowed, 1024, StorageLayout::new("/srv/detect", "/static"))
    }

    #[test]
    fn test_extensions_classified_against_allow_list() {
        let v = validator();
        assert_eq!(v.classify("cat.PNG", None), Ok(MediaKind::Image));
        assert_eq!(v.classify("clip.mp4", None), Ok(MediaKind::Video));
        assert_eq!(
            v.classify("clip.mkv", None),
            Err(ValidationError::UnsupportedType("mkv".to_string()))
        );
        assert!(matches!(v.classify("README", None), Err(ValidationError::UnsupportedType(_))));
        assert!(matches!(v.classify("archive.", None), Err(ValidationError::UnsupportedType(_))));
    }

    #[test]
    fn test_missing_file() {
        let v = validator();
        assert_eq!(v.validate("", None, 10).unwrap_err(), ValidationError::MissingFile);
        assert_eq!(v.validate("dir/", None, 10).unwrap_err(), ValidationError::MissingFile);
    }

    #[test]
    fn test_content_type_must_agree_with_extension() {
        let v = validator();
        assert!(v.classify("cat.png", Some("image/png")).is_ok());
        assert!(v.classify("cat.png", Some("application/octet-stream")).is_ok());
        assert!(matches!(
            v.classify("cat.png", Some("video/mp4")),
            Err(ValidationError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_oversized_file() {
        let v = validator();
        assert!(v.validate("cat.png", None, 1024).is_ok());
        assert_eq!(
            v.validate("cat.png", None, 1025).unwrap_err(),
            ValidationError::OversizedFile { limit: 1024 }
        );
    }

    #[test]
    fn test_record_points_into_uploads() {
        let record = validator().validate("../../etc/My Cat!.JPG", Some("image/jpeg"), 42).unwrap();

        assert_eq!(record.kind, MediaKind::Image);
        assert_eq!(record.size_bytes, 42);
        assert_eq!(record.original_filename, "../../etc/My Cat!.JPG");
        assert!(record.sanitized_filename.ends_with("_My_Cat.jpg"));
        assert_eq!(
            record.storage_path.parent(),
            Some(Path::new("/srv/detect/uploads/images"))
        );
    }

    #[test]
    fn test_sanitized_names_are_unique() {
        let v = validator();
        let names: HashSet<String> = (0..500)
            .map(|_| v.validate("same.png", None, 1).unwrap().sanitized_filename)
            .collect();
        assert_eq!(names.len(), 500);
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("C:\\Users\\me\\pic.Png"), ("pic".to_string(), "png".to_string()));
        assert_eq!(sanitize("...png"), ("upload".to_string(), "png".to_string()));
        assert_eq!(sanitize("a b/c d.jpeg"), ("c_d".to_string(), "jpeg".to_string()));
        assert_eq!(sanitize("日本.png"), ("upload".to_string(), "png".to_string()));
    }
}
