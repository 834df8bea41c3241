//! # File Storage
//!
//! Uploaded inputs and generated subtitle files on local disk. Uploads are
//! stored under an opaque id with the original extension preserved (the
//! decoder dispatches on it); outputs are one SRT per job id.
//!
//! Jobs reference uploads, they do not own them: an upload exists before
//! any job does and survives the job's removal.

use crate::config::StorageConfig;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Storage {
    upload_dir: PathBuf,
    output_dir: PathBuf,
}

impl Storage {
    /// Create the storage layer, ensuring both directories exist.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let upload_dir = PathBuf::from(&config.upload_dir);
        let output_dir = PathBuf::from(&config.output_dir);

        std::fs::create_dir_all(&upload_dir)
            .with_context(|| format!("Failed to create {}", upload_dir.display()))?;
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;

        Ok(Self {
            upload_dir,
            output_dir,
        })
    }

    /// Persist uploaded bytes under a fresh file id. Returns the id.
    pub async fn save_upload(&self, original_filename: &str, bytes: &[u8]) -> Result<String> {
        let file_id = Uuid::new_v4().to_string();
        let path = self.upload_dir.join(format!(
            "{}{}",
            file_id,
            sanitized_extension(original_filename)
        ));

        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(file_id)
    }

    /// Locate an upload by id, whatever extension it was stored with.
    pub fn find_upload(&self, file_id: &str) -> Option<PathBuf> {
        let entries = std::fs::read_dir(&self.upload_dir).ok()?;
        for entry in entries.flatten() {
            let path = entry.path();
            let stem = path.file_stem().and_then(|s| s.to_str());
            if stem == Some(file_id) && path.is_file() {
                return Some(path);
            }
        }
        None
    }

    /// Where a job's SRT output lives.
    pub fn output_path(&self, job_id: Uuid) -> PathBuf {
        self.output_dir.join(format!("{}.srt", job_id))
    }
}

/// Keep only a plain alphanumeric extension; anything suspicious is
/// dropped rather than written into a path.
fn sanitized_extension(filename: &str) -> String {
    match Path::new(filename).extension().and_then(|e| e.to_str()) {
        Some(ext)
            if !ext.is_empty()
                && ext.len() <= 8
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            format!(".{}", ext.to_lowercase())
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_storage(dir: &Path) -> Storage {
        Storage::new(&StorageConfig {
            upload_dir: dir.join("uploads").to_string_lossy().into_owned(),
            output_dir: dir.join("outputs").to_string_lossy().into_owned(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_save_and_find_upload() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path());

        let file_id = storage.save_upload("clip.MP4", b"fake bytes").await.unwrap();
        let found = storage.find_upload(&file_id).expect("upload should exist");

        assert_eq!(found.extension().unwrap(), "mp4");
        assert_eq!(std::fs::read(found).unwrap(), b"fake bytes");
    }

    #[tokio::test]
    async fn test_find_upload_unknown_id() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path());
        assert!(storage.find_upload("no-such-id").is_none());
    }

    #[tokio::test]
    async fn test_hostile_extension_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path());

        let file_id = storage
            .save_upload("evil.../../x.sh!!", b"data")
            .await
            .unwrap();
        let found = storage.find_upload(&file_id).unwrap();
        assert_eq!(found.file_name().unwrap().to_str().unwrap(), file_id);
    }

    #[test]
    fn test_output_path_uses_job_id() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(dir.path());
        let job_id = Uuid::new_v4();
        let path = storage.output_path(job_id);
        assert!(path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with(&job_id.to_string()));
        assert_eq!(path.extension().unwrap(), "srt");
    }
}
