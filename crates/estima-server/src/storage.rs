//! Avatar storage.
//!
//! The session layer only ever sees the reference returned by
//! [`FileStore::store`]; the payload never goes near a session.

use std::path::{Path, PathBuf};

use estima_core::validation::AVATAR_PREFIX;
use estima_core::SessionError;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("file too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error("file type not allowed: {0}")]
    InvalidType(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TooLarge { size, limit } => SessionError::PayloadTooLarge { size, limit },
            StoreError::InvalidType(content_type) => SessionError::InvalidFileType(content_type),
            StoreError::Io(_) => SessionError::Internal,
        }
    }
}

pub trait FileStore: Send + Sync {
    /// Persist `bytes` and return the public reference to them.
    fn store(&self, bytes: &[u8], content_type: &str) -> Result<String, StoreError>;
}

/// Writes avatars as `avatar-<uuid>.<ext>` into one directory.
pub struct DiskFileStore {
    dir: PathBuf,
    allowed_types: Vec<String>,
    max_bytes: usize,
}

impl DiskFileStore {
    pub fn new(dir: impl Into<PathBuf>, allowed_types: Vec<String>, max_bytes: usize) -> Self {
        Self {
            dir: dir.into(),
            allowed_types,
            max_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

impl FileStore for DiskFileStore {
    fn store(&self, bytes: &[u8], content_type: &str) -> Result<String, StoreError> {
        // Drop parameters such as "; charset=binary".
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if !self.allowed_types.iter().any(|allowed| *allowed == mime) {
            return Err(StoreError::InvalidType(mime));
        }
        let ext = extension_for(&mime).ok_or_else(|| StoreError::InvalidType(mime.clone()))?;
        if bytes.len() > self.max_bytes {
            return Err(StoreError::TooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }

        std::fs::create_dir_all(&self.dir)?;
        let file_name = format!("avatar-{}.{ext}", Uuid::now_v7());
        std::fs::write(self.dir.join(&file_name), bytes)?;
        tracing::info!(file = %file_name, size = bytes.len(), "avatar stored");
        Ok(format!("{AVATAR_PREFIX}{file_name}"))
    }
}

fn extension_for(mime: &str) -> Option<&'static str> {
    match mime {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use estima_core::validation::validate_avatar_ref;

    fn store(dir: &Path) -> DiskFileStore {
        DiskFileStore::new(
            dir,
            vec!["image/png".into(), "image/jpeg".into(), "image/gif".into(), "image/webp".into()],
            16,
        )
    }

    #[test]
    fn stores_allowed_image() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let reference = store.store(b"\x89PNG....", "image/png").unwrap();
        assert!(reference.starts_with("/uploads/avatar-"));
        assert!(reference.ends_with(".png"));
        validate_avatar_ref(&reference).unwrap();

        let file = tmp.path().join(reference.trim_start_matches(AVATAR_PREFIX));
        assert_eq!(std::fs::read(file).unwrap(), b"\x89PNG....");
    }

    #[test]
    fn content_type_parameters_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let reference = store(tmp.path()).store(b"jpeg", "Image/JPEG; q=1").unwrap();
        assert!(reference.ends_with(".jpg"));
    }

    #[test]
    fn rejects_disallowed_type() {
        let tmp = tempfile::tempdir().unwrap();
        let err = store(tmp.path()).store(b"<svg/>", "image/svg+xml").unwrap_err();
        assert!(matches!(err, StoreError::InvalidType(ref t) if t == "image/svg+xml"));
        assert_eq!(SessionError::from(err).code(), "INVALID_FILE_TYPE");
    }

    #[test]
    fn rejects_oversized_payload() {
        let tmp = tempfile::tempdir().unwrap();
        let err = store(tmp.path()).store(&[0u8; 17], "image/gif").unwrap_err();
        assert!(matches!(err, StoreError::TooLarge { size: 17, limit: 16 }));
        assert_eq!(SessionError::from(err).code(), "PAYLOAD_TOO_LARGE");
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn creates_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("public").join("uploads");
        let reference = store(&nested).store(b"gif", "image/gif").unwrap();
        assert!(nested.join(reference.trim_start_matches(AVATAR_PREFIX)).exists());
    }
}
