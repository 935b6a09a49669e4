use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::KeyValueStore;
use crate::error::{ErrorCode, FlagKitError, Result};

/// Key-value preference store persisted as a single JSON document.
///
/// Every write rewrites the document to a temporary file under an exclusive
/// lock and renames it over the previous one, so a crash leaves either the
/// old or the new document on disk.
pub struct FilePreferences {
    path: PathBuf,
    lock_file_path: PathBuf,
    values: Mutex<HashMap<String, String>>,
}

impl FilePreferences {
    /// Open the preference document at `path`, creating parent directories.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                FlagKitError::with_source(
                    ErrorCode::IllegalState,
                    format!("Failed to create preference directory: {}", parent.display()),
                    e,
                )
            })?;
        }

        let values = Self::read_document(&path)?;
        let lock_file_path = path.with_extension("lock");

        Ok(Self {
            path,
            lock_file_path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(path: &Path) -> Result<HashMap<String, String>> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(FlagKitError::with_source(
                    ErrorCode::IllegalState,
                    format!("Failed to read preferences: {}", path.display()),
                    e,
                ))
            }
        };

        match serde_json::from_str(&data) {
            Ok(values) => Ok(values),
            Err(e) => {
                // A corrupt document only loses sync state; the next fetch resyncs.
                tracing::warn!("Discarding unreadable preferences {}: {}", path.display(), e);
                Ok(HashMap::new())
            }
        }
    }

    fn acquire_lock(&self) -> Result<File> {
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_file_path)
            .map_err(|e| {
                FlagKitError::with_source(ErrorCode::IllegalState, "Failed to open lock file", e)
            })?;

        lock_file.lock_exclusive().map_err(|e| {
            FlagKitError::with_source(ErrorCode::IllegalState, "Failed to acquire file lock", e)
        })?;

        Ok(lock_file)
    }

    fn write_document(&self, values: &HashMap<String, String>) -> Result<()> {
        let lock_file = self.acquire_lock()?;

        let data = serde_json::to_vec(values).map_err(|e| {
            FlagKitError::with_source(ErrorCode::IllegalState, "Failed to encode preferences", e)
        })?;

        let tmp_path = self.path.with_extension("tmp");
        let mut file = File::create(&tmp_path).map_err(|e| {
            FlagKitError::with_source(
                ErrorCode::IllegalState,
                format!("Failed to create {}", tmp_path.display()),
                e,
            )
        })?;
        file.write_all(&data).map_err(|e| {
            FlagKitError::with_source(ErrorCode::IllegalState, "Failed to write preferences", e)
        })?;
        file.sync_all().map_err(|e| {
            FlagKitError::with_source(ErrorCode::IllegalState, "Failed to sync preferences", e)
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|e| {
            FlagKitError::with_source(ErrorCode::IllegalState, "Failed to replace preferences", e)
        })?;

        drop(lock_file);
        Ok(())
    }
}

impl KeyValueStore for FilePreferences {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock();
        let previous = values.insert(key.to_string(), value.to_string());
        if let Err(e) = self.write_document(&values) {
            match previous {
                Some(previous) => values.insert(key.to_string(), previous),
                None => values.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock();
        let Some(previous) = values.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.write_document(&values) {
            values.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }
}
