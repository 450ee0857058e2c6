//! Open-time configuration of a local storage.
//!
//! Persisted as camelCase JSON so the host application can keep it next to
//! its own settings.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::{FileOp, Result, StorageError};
use crate::core::statements::DEFAULT_CAPACITY;

pub const DATABASE_FILE_NAME: &str = "notevault.storage.sqlite";
pub const LOCK_FILE_NAME: &str = "notevault.storage.sqlite.lock";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountKind {
    #[default]
    Local,
    Remote,
}

/// The account whose data a storage holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub name: String,
    pub user_id: i64,
    pub kind: AccountKind,
}

impl Account {
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            user_id: 0,
            kind: AccountKind::Local,
        }
    }

    pub fn remote(name: impl Into<String>, user_id: i64) -> Self {
        Self {
            name: name.into(),
            user_id,
            kind: AccountKind::Remote,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    /// Account-specific directory holding the database and payload files.
    pub storage_dir: PathBuf,
    /// Proceed even if another process holds the storage lock.
    pub override_lock: bool,
    /// Delete the existing database and payload files before opening.
    pub start_from_scratch: bool,
    /// Apply pending schema patches while opening.
    pub upgrade_automatically: bool,
    pub statement_cache_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("."),
            override_lock: false,
            start_from_scratch: false,
            upgrade_automatically: true,
            statement_cache_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl StorageConfig {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            ..Self::default()
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(DATABASE_FILE_NAME)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.storage_dir.join(LOCK_FILE_NAME)
    }

    /// Reads a config from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|e| StorageError::fs(FileOp::Read, path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Writes the config as pretty JSON, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StorageError::fs(FileOp::CreateDir, parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| StorageError::fs(FileOp::Write, path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf/storage.json");
        let mut config = StorageConfig::new(dir.path().join("account"));
        config.override_lock = true;
        config.save(&path).unwrap();

        let json = fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"overrideLock\": true"));
        assert!(json.contains("\"storageDir\""));

        assert_eq!(StorageConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: StorageConfig = serde_json::from_str(r#"{"storageDir": "/tmp/x"}"#).unwrap();
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/x"));
        assert!(config.upgrade_automatically);
        assert_eq!(config.statement_cache_capacity, DEFAULT_CAPACITY);
        assert!(config.database_path().ends_with(DATABASE_FILE_NAME));
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(StorageConfig::load(&path), Err(StorageError::Json(_))));
    }
}
