//! The open database of one account: connection, advisory lock and payload
//! directory.

use std::fs::{self, File, OpenOptions};
use std::path::Path;

use fs2::FileExt;
use rusqlite::Connection;

use crate::core::blob_store::BlobStore;
use crate::core::config::StorageConfig;
use crate::core::error::{Context, Result, StorageError};
use crate::core::patches::pending_patches;
use crate::core::schema::{SchemaManager, HIGHEST_SUPPORTED_VERSION};

pub struct Storage {
    conn: Connection,
    blobs: BlobStore,
    _lock_file: Option<File>,
}

fn opening_failure(path: &Path, reason: impl ToString) -> StorageError {
    StorageError::OpeningFailure {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Memory page size of the host.
fn host_page_size() -> i64 {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            return size as i64;
        }
    }
    4096
}

fn acquire_lock(config: &StorageConfig) -> Result<Option<File>> {
    let lock_path = config.lock_path();
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| opening_failure(&lock_path, e))?;

    match lock_file.try_lock_exclusive() {
        Ok(()) => Ok(Some(lock_file)),
        Err(e) if config.override_lock => {
            log::warn!(
                "Local storage at {} is locked by another process, proceeding anyway: {e}",
                config.storage_dir.display()
            );
            Ok(None)
        }
        Err(e) => Err(opening_failure(
            &lock_path,
            format!("storage is locked by another process: {e}"),
        )),
    }
}

impl Storage {
    /// Opens (creating if needed) the storage described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OpeningFailure`] when the directory, the lock
    /// or the database can't be opened, [`StorageError::SchemaFailure`] when
    /// the schema can't be created and [`StorageError::VersionTooHigh`] when
    /// the database was written by a newer build.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let dir = &config.storage_dir;
        fs::create_dir_all(dir).map_err(|e| opening_failure(dir, e))?;

        let lock_file = acquire_lock(config)?;
        let db_path = config.database_path();
        let blobs = BlobStore::new(dir);

        if config.start_from_scratch {
            log::info!("Starting local storage at {} from scratch", dir.display());
            for suffix in ["", "-wal", "-shm"] {
                let mut name = db_path.as_os_str().to_os_string();
                name.push(suffix);
                match fs::remove_file(&name) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(opening_failure(&db_path, e)),
                }
            }
            blobs.clear()?;
        }

        let conn = Connection::open(&db_path).map_err(|e| opening_failure(&db_path, e))?;
        conn.pragma_update(None, "page_size", host_page_size())
            .map_err(|e| opening_failure(&db_path, e))?;
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(|e| opening_failure(&db_path, e))?;
        let mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| opening_failure(&db_path, e))?;
        log::debug!("Opened {} in {mode} journal mode", db_path.display());

        let schema = SchemaManager::new(&conn);
        schema.ensure_schema()?;

        let version = schema.current_version()?;
        if version > HIGHEST_SUPPORTED_VERSION {
            return Err(StorageError::VersionTooHigh {
                found: version,
                supported: HIGHEST_SUPPORTED_VERSION,
            });
        }

        let storage = Self {
            conn,
            blobs,
            _lock_file: lock_file,
        };
        if version < HIGHEST_SUPPORTED_VERSION {
            if config.upgrade_automatically {
                storage.apply_pending_patches()?;
            } else {
                log::warn!(
                    "Local storage schema version {version} requires an upgrade to {HIGHEST_SUPPORTED_VERSION}"
                );
            }
        }
        Ok(storage)
    }

    /// Runs every pending schema patch in order; returns how many ran.
    pub fn apply_pending_patches(&self) -> Result<usize> {
        let version = SchemaManager::new(&self.conn).current_version()?;
        let patches = pending_patches(version);
        for patch in &patches {
            log::info!(
                "Applying schema patch {} -> {}: {}",
                patch.from_version(),
                patch.to_version(),
                patch.description()
            );
            patch.apply(&self.conn, &self.blobs)?;
        }
        Ok(patches.len())
    }

    pub fn schema(&self) -> SchemaManager<'_> {
        SchemaManager::new(&self.conn)
    }

    /// Rebuilds the database file to reclaim free pages.
    pub fn compact(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM").context("can't compact local storage")
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_layout() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::new(dir.path().join("acc"));
        let storage = Storage::open(&config).unwrap();

        assert!(config.database_path().exists());
        assert!(config.lock_path().exists());
        let fk: i64 = storage
            .connection()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
        assert_eq!(
            storage.schema().current_version().unwrap(),
            HIGHEST_SUPPORTED_VERSION
        );
    }

    #[test]
    fn test_second_open_is_locked_unless_overridden() {
        let dir = TempDir::new().unwrap();
        let mut config = StorageConfig::new(dir.path());
        let _first = Storage::open(&config).unwrap();

        assert!(matches!(
            Storage::open(&config),
            Err(StorageError::OpeningFailure { .. })
        ));

        config.override_lock = true;
        assert!(Storage::open(&config).is_ok());
    }

    #[test]
    fn test_version_too_high_refuses_to_open() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::new(dir.path());
        {
            let storage = Storage::open(&config).unwrap();
            storage.schema().set_version(HIGHEST_SUPPORTED_VERSION + 1).unwrap();
        }
        assert!(matches!(
            Storage::open(&config),
            Err(StorageError::VersionTooHigh { .. })
        ));
    }

    #[test]
    fn test_start_from_scratch_drops_data() {
        let dir = TempDir::new().unwrap();
        let mut config = StorageConfig::new(dir.path());
        {
            let storage = Storage::open(&config).unwrap();
            storage
                .connection()
                .execute(
                    "INSERT INTO SavedSearches (localUid, name, nameLower, isDirty, isLocal) \
                     VALUES ('s1', 'S', 's', 1, 0)",
                    [],
                )
                .unwrap();
        }
        config.start_from_scratch = true;
        let storage = Storage::open(&config).unwrap();
        let count: i64 = storage
            .connection()
            .query_row("SELECT COUNT(*) FROM SavedSearches", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
