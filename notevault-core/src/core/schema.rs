//! Schema creation and version bookkeeping.

use rusqlite::{Connection, OptionalExtension};

use crate::core::error::{Context, Result};

/// Highest `Auxiliary.version` this build understands.
pub const HIGHEST_SUPPORTED_VERSION: i32 = 2;

/// Version reported by databases created before versioning existed.
const UNVERSIONED: i32 = 1;

/// Creates and inspects the relational schema of one storage connection.
pub struct SchemaManager<'c> {
    conn: &'c Connection,
}

impl<'c> SchemaManager<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Creates every table, index, trigger and full-text table that is missing.
    ///
    /// A database without any of the tables yet is stamped with
    /// [`HIGHEST_SUPPORTED_VERSION`]; an existing database keeps whatever
    /// version it has, or none.
    pub fn ensure_schema(&self) -> Result<()> {
        let fresh: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'Notes'",
                [],
                |row| row.get(0),
            )
            .schema_context("can't inspect existing schema")?;

        self.conn
            .execute_batch(include_str!("schema.sql"))
            .schema_context("can't create local storage schema")?;

        if fresh == 0 {
            log::info!("Created local storage schema version {HIGHEST_SUPPORTED_VERSION}");
            self.set_version(HIGHEST_SUPPORTED_VERSION)?;
        }
        Ok(())
    }

    pub fn current_version(&self) -> Result<i32> {
        let version: Option<i32> = self
            .conn
            .query_row("SELECT version FROM Auxiliary LIMIT 1", [], |row| row.get(0))
            .optional()
            .schema_context("can't read schema version")?;
        Ok(version.unwrap_or(UNVERSIONED))
    }

    pub fn set_version(&self, version: i32) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO Auxiliary (lock, version) VALUES ('X', ?1)",
                [version],
            )
            .schema_context("can't write schema version")?;
        Ok(())
    }

    pub fn is_version_too_high(&self) -> Result<bool> {
        Ok(self.current_version()? > HIGHEST_SUPPORTED_VERSION)
    }

    pub fn requires_upgrade(&self) -> Result<bool> {
        Ok(self.current_version()? < HIGHEST_SUPPORTED_VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_ensure_schema_creates_tables_and_stamps_version() {
        let temp = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp.path()).unwrap();
        let schema = SchemaManager::new(&conn);
        schema.ensure_schema().unwrap();

        let tables = table_names(&conn);
        for name in ["Notebooks", "Notes", "Tags", "NoteTags", "Resources", "SavedSearches", "NoteFTS"] {
            assert!(tables.contains(&name.to_string()), "missing {name}");
        }
        assert_eq!(schema.current_version().unwrap(), HIGHEST_SUPPORTED_VERSION);
        assert!(!schema.requires_upgrade().unwrap());
        assert!(!schema.is_version_too_high().unwrap());
    }

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = SchemaManager::new(&conn);
        schema.ensure_schema().unwrap();
        schema.ensure_schema().unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM Auxiliary", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_missing_version_row_reads_as_one() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = SchemaManager::new(&conn);
        schema.ensure_schema().unwrap();
        conn.execute("DELETE FROM Auxiliary", []).unwrap();

        // Re-running on an existing database must not stamp it.
        schema.ensure_schema().unwrap();
        assert_eq!(schema.current_version().unwrap(), 1);
        assert!(schema.requires_upgrade().unwrap());
    }

    #[test]
    fn test_version_too_high() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = SchemaManager::new(&conn);
        schema.ensure_schema().unwrap();
        schema.set_version(HIGHEST_SUPPORTED_VERSION + 1).unwrap();
        assert!(schema.is_version_too_high().unwrap());
    }
}
