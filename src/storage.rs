//! Storage commit for validated payloads.
//!
//! Writes bytes via a temporary file and an atomic rename, so a partially
//! written file is never visible under its final name. Name conflicts in
//! the target directory are resolved with a numeric suffix; concurrent
//! commits of distinct names are isolated by the rename itself.

use crate::classify::FileDescriptor;
use crate::config::UploadConfig;
use crate::error::UploadError;
use log::{debug, error, info, warn};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Temporary file prefix for atomic operations
const TEMP_FILE_PREFIX: &str = ".safedrop_tmp_";

/// A committed upload on durable storage.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    /// Full path of the committed file
    pub path: PathBuf,
    /// Name the file was stored under (may differ from the requested
    /// storage name after conflict resolution)
    pub storage_name: String,
    /// Committed size in bytes
    pub size: u64,
}

/// Commits validated bytes into one target directory.
pub struct StorageCommitter {
    target_dir: PathBuf,
}

impl StorageCommitter {
    /// Verify the target directory exists (creating it if needed) and is
    /// writable. Any failure is `StorageUnavailable`.
    pub fn new(config: &UploadConfig) -> Result<Self, UploadError> {
        let target_dir = config.storage_dir.clone();
        Self::ensure_directory_exists(&target_dir)?;
        Ok(Self { target_dir })
    }

    fn ensure_directory_exists(dir: &Path) -> Result<(), UploadError> {
        if !dir.exists() {
            info!("Creating storage directory: {dir:?}");
            fs::create_dir_all(dir).map_err(|e| {
                error!("Failed to create storage directory {dir:?}: {e}");
                UploadError::storage_unavailable(format!(
                    "cannot create storage directory: {e}"
                ))
            })?;
        } else if !dir.is_dir() {
            return Err(UploadError::storage_unavailable(format!(
                "storage path {dir:?} exists but is not a directory"
            )));
        }

        // Probe writability up front rather than failing mid-commit
        let probe = dir.join(".write_test");
        match File::create(&probe) {
            Ok(_) => {
                let _ = fs::remove_file(&probe); // Ignore errors on cleanup
                Ok(())
            }
            Err(e) => {
                error!("Storage directory {dir:?} is not writable: {e}");
                Err(UploadError::storage_unavailable(format!(
                    "storage directory is not writable: {e}"
                )))
            }
        }
    }

    /// Write validated bytes under the descriptor's storage name.
    pub fn commit(
        &self,
        descriptor: &FileDescriptor,
        bytes: &[u8],
    ) -> Result<StoredArtifact, UploadError> {
        let (final_name, renamed) = self.resolve_name_conflict(&descriptor.storage_name)?;
        let target_path = self.target_dir.join(&final_name);

        self.write_file_atomically(&target_path, bytes)?;

        if renamed {
            warn!(
                "Storage name '{}' was taken; stored as '{final_name}'",
                descriptor.storage_name
            );
        }
        info!(
            "Uploaded file '{}' saved to '{}' as {final_name}",
            descriptor.display_name,
            self.target_dir.display()
        );

        Ok(StoredArtifact {
            path: target_path,
            storage_name: final_name,
            size: bytes.len() as u64,
        })
    }

    /// Remove a committed artifact (scan gate rollback).
    pub fn discard(&self, artifact: &StoredArtifact) -> Result<(), UploadError> {
        fs::remove_file(&artifact.path).map_err(|e| {
            error!(
                "Failed to remove artifact {:?} during rollback: {e}",
                artifact.path
            );
            UploadError::storage_unavailable(format!("cannot remove artifact: {e}"))
        })
    }

    /// Pick a free name, suffixing `_1.._9999` on conflict.
    fn resolve_name_conflict(&self, requested: &str) -> Result<(String, bool), UploadError> {
        if !self.target_dir.join(requested).exists() {
            return Ok((requested.to_string(), false));
        }

        let path = Path::new(requested);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();

        for i in 1..=9999 {
            let candidate = format!("{stem}_{i}{extension}");
            if !self.target_dir.join(&candidate).exists() {
                return Ok((candidate, true));
            }
        }

        Err(UploadError::storage_unavailable(
            "unable to find a free storage name after 9999 attempts",
        ))
    }

    /// Write file atomically using temporary file and rename
    fn write_file_atomically(&self, target_path: &Path, content: &[u8]) -> Result<(), UploadError> {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let temp_filename = format!("{}{}_{nanos:x}.tmp", TEMP_FILE_PREFIX, std::process::id());
        let temp_path = self.target_dir.join(temp_filename);

        {
            let mut temp_file = File::create(&temp_path).map_err(|e| {
                error!("Failed to create temporary file {temp_path:?}: {e}");
                UploadError::storage_unavailable(format!("cannot create temporary file: {e}"))
            })?;

            temp_file.write_all(content).map_err(|e| {
                error!("Failed to write to temporary file {temp_path:?}: {e}");
                let _ = fs::remove_file(&temp_path); // Cleanup on error
                UploadError::storage_unavailable(format!("write failed: {e}"))
            })?;

            temp_file.sync_all().map_err(|e| {
                error!("Failed to sync temporary file {temp_path:?}: {e}");
                let _ = fs::remove_file(&temp_path); // Cleanup on error
                UploadError::storage_unavailable(format!("sync failed: {e}"))
            })?;
        }

        fs::rename(&temp_path, target_path).map_err(|e| {
            error!("Failed to rename {temp_path:?} to {target_path:?}: {e}");
            let _ = fs::remove_file(&temp_path); // Cleanup on error
            UploadError::storage_unavailable(format!("rename failed: {e}"))
        })?;

        debug!("Successfully wrote file atomically to {target_path:?}");
        Ok(())
    }
}
