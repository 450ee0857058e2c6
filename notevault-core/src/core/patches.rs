//! Upgrade steps between schema versions.

use rusqlite::Connection;

use crate::core::blob_store::{BlobStore, PayloadWrite};
use crate::core::error::{Context, Result};
use crate::core::schema::SchemaManager;
use crate::core::transaction::{Transaction, TransactionKind};

/// One step of the schema upgrade chain.
pub trait SchemaPatch {
    fn from_version(&self) -> i32;
    fn to_version(&self) -> i32;
    fn description(&self) -> &'static str;

    /// Applies the patch and stamps [`to_version`](Self::to_version).
    fn apply(&self, conn: &Connection, blobs: &BlobStore) -> Result<()>;
}

/// Returns the patches leading from `version` to the newest version, in order.
pub fn pending_patches(version: i32) -> Vec<Box<dyn SchemaPatch>> {
    let all: Vec<Box<dyn SchemaPatch>> = vec![Box::new(Patch1To2)];
    all.into_iter()
        .filter(|p| p.from_version() >= version)
        .collect()
}

/// Moves resource payloads that version 1 kept inside the `Resources` rows
/// into the blob store.
pub struct Patch1To2;

const LEGACY_COLUMNS: [&str; 2] = ["dataBody", "alternateDataBody"];

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        [table, column],
        |row| row.get::<_, i64>(0).map(|count| count > 0),
    )
    .schema_context("can't inspect resource columns")
}

impl SchemaPatch for Patch1To2 {
    fn from_version(&self) -> i32 {
        1
    }

    fn to_version(&self) -> i32 {
        2
    }

    fn description(&self) -> &'static str {
        "Move resource data bodies from the database into payload files"
    }

    fn apply(&self, conn: &Connection, blobs: &BlobStore) -> Result<()> {
        let tx = Transaction::begin(conn, TransactionKind::Exclusive)?;

        let has_data = has_column(&tx, "Resources", LEGACY_COLUMNS[0])?;
        let has_alt = has_column(&tx, "Resources", LEGACY_COLUMNS[1])?;

        if has_data || has_alt {
            let data_expr = if has_data { "dataBody" } else { "NULL" };
            let alt_expr = if has_alt { "alternateDataBody" } else { "NULL" };
            let rows: Vec<(String, String, Option<Vec<u8>>, Option<Vec<u8>>)> = {
                let mut stmt = tx
                    .prepare(&format!(
                        "SELECT localUid, noteLocalUid, {data_expr}, {alt_expr} FROM Resources"
                    ))
                    .schema_context("can't read legacy resource bodies")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
                    .schema_context("can't read legacy resource bodies")?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .schema_context("can't read legacy resource bodies")?;
                rows
            };

            log::info!("Moving payloads of {} resources into files", rows.len());
            for (local_id, note_local_id, data, alt) in &rows {
                blobs.write(
                    note_local_id,
                    local_id,
                    PayloadWrite {
                        data: data.as_deref(),
                        alternate_data: alt.as_deref(),
                    },
                )?;
            }

            for (column, present) in LEGACY_COLUMNS.iter().zip([has_data, has_alt]) {
                if present {
                    tx.execute_batch(&format!("ALTER TABLE Resources DROP COLUMN {column}"))
                        .schema_context("can't drop legacy resource column")?;
                }
            }
        }

        SchemaManager::new(&tx).set_version(self.to_version())?;
        tx.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::blob_store::Payload;
    use tempfile::TempDir;

    #[test]
    fn test_pending_patches_chain() {
        assert_eq!(pending_patches(1).len(), 1);
        assert!(pending_patches(2).is_empty());
    }

    #[test]
    fn test_patch_moves_bodies_to_files() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open(dir.path().join("db.sqlite")).unwrap();
        let schema = SchemaManager::new(&conn);
        schema.ensure_schema().unwrap();
        conn.execute_batch(
            "DELETE FROM Auxiliary;
             ALTER TABLE Resources ADD COLUMN dataBody BLOB;
             ALTER TABLE Resources ADD COLUMN alternateDataBody BLOB;
             INSERT INTO Notebooks (localUid, name, nameLower, isDirty, isLocal) VALUES ('nb', 'Nb', 'nb', 1, 0);
             INSERT INTO Notes (localUid, notebookLocalUid, isDirty, isLocal) VALUES ('n1', 'nb', 1, 0);
             INSERT INTO Resources (localUid, noteLocalUid, isDirty, dataBody, alternateDataBody)
                 VALUES ('r1', 'n1', 1, x'010203', x'0405');",
        )
        .unwrap();
        assert!(schema.requires_upgrade().unwrap());

        let blobs = BlobStore::new(dir.path());
        for patch in pending_patches(schema.current_version().unwrap()) {
            patch.apply(&conn, &blobs).unwrap();
        }

        assert_eq!(schema.current_version().unwrap(), 2);
        assert!(!has_column(&conn, "Resources", "dataBody").unwrap());
        assert_eq!(
            blobs.read(Payload::Data, "n1", "r1").unwrap(),
            Some(vec![1, 2, 3])
        );
        assert_eq!(
            blobs.read(Payload::AlternateData, "n1", "r1").unwrap(),
            Some(vec![4, 5])
        );
    }
}
