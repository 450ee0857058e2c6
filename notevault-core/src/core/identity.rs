//! Dual-identity reconciliation shared by every entity repository.
//!
//! Persisted rows are keyed by a locally generated id; entities that have
//! been synchronized also carry a server guid. Callers never declare whether
//! a write is an insert or an update: [`reconcile`] derives it from which of
//! the two keys already resolve to a row.

use std::sync::LazyLock;

use regex::Regex;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::core::error::{Context, Result, StorageError};

/// Generates a fresh local id.
pub fn new_local_id() -> String {
    Uuid::new_v4().to_string()
}

static GUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("hardcoded guid regex")
});

/// Returns `true` if `guid` has the lexical form of a server guid.
pub fn is_valid_guid(guid: &str) -> bool {
    GUID_RE.is_match(guid)
}

/// Fails with [`StorageError::InvalidGuid`] unless `guid` is absent or well formed.
pub fn check_guid(guid: Option<&str>) -> Result<()> {
    match guid {
        Some(g) if !is_valid_guid(g) => Err(StorageError::InvalidGuid(g.to_string())),
        _ => Ok(()),
    }
}

/// Whether a write should insert a new row or replace an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteIntent {
    Add,
    Update,
}

/// Table coordinates of an entity keyed by local id with an optional guid.
#[derive(Debug, Clone, Copy)]
pub struct IdentityTable {
    pub kind: &'static str,
    pub table: &'static str,
}

impl IdentityTable {
    pub const NOTEBOOK: Self = Self { kind: "Notebook", table: "Notebooks" };
    pub const NOTE: Self = Self { kind: "Note", table: "Notes" };
    pub const TAG: Self = Self { kind: "Tag", table: "Tags" };
    pub const RESOURCE: Self = Self { kind: "Resource", table: "Resources" };
    pub const SAVED_SEARCH: Self = Self { kind: "Saved search", table: "SavedSearches" };

    /// Resolves the local id of the row carrying `guid`.
    pub fn local_id_for_guid(&self, conn: &Connection, guid: &str) -> Result<Option<String>> {
        conn.query_row(
            &format!("SELECT localUid FROM {} WHERE guid = ?1", self.table),
            [guid],
            |row| row.get(0),
        )
        .optional()
        .context(&format!("can't find {} local id by guid", self.kind.to_lowercase()))
    }

    /// Resolves the guid of the row with `local_id`; `Ok(None)` covers both a
    /// missing row and a row without guid.
    pub fn guid_for_local_id(&self, conn: &Connection, local_id: &str) -> Result<Option<String>> {
        let guid: Option<Option<String>> = conn
            .query_row(
                &format!("SELECT guid FROM {} WHERE localUid = ?1", self.table),
                [local_id],
                |row| row.get(0),
            )
            .optional()
            .context(&format!("can't find {} guid by local id", self.kind.to_lowercase()))?;
        Ok(guid.flatten())
    }

    pub fn exists(&self, conn: &Connection, local_id: &str) -> Result<bool> {
        let found: Option<i64> = conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE localUid = ?1", self.table),
                [local_id],
                |row| row.get(0),
            )
            .optional()
            .context(&format!("can't check {} existence", self.kind.to_lowercase()))?;
        Ok(found.is_some())
    }
}

/// Decides the local id a write targets.
///
/// On success returns the local id to write under, which is either the one
/// the caller supplied, one adopted from the guid's existing row, or a fresh
/// id for an add with neither key resolving.
///
/// * add: guid conflicts and local-id conflicts fail with `AlreadyExists`.
/// * update: the guid is looked up first, then the local id; neither
///   resolving fails with `NotFound`.
pub fn reconcile(
    conn: &Connection,
    table: IdentityTable,
    intent: WriteIntent,
    local_id: &str,
    guid: Option<&str>,
) -> Result<String> {
    check_guid(guid)?;

    let by_guid = match guid {
        Some(g) => table.local_id_for_guid(conn, g)?,
        None => None,
    };

    match intent {
        WriteIntent::Add => {
            if let (Some(g), Some(_)) = (guid, by_guid.as_ref()) {
                return Err(StorageError::already_exists(table.kind, g));
            }
            if local_id.is_empty() {
                return Ok(new_local_id());
            }
            if table.exists(conn, local_id)? {
                return Err(StorageError::already_exists(table.kind, local_id));
            }
            Ok(local_id.to_string())
        }
        WriteIntent::Update => {
            if let Some(found) = by_guid {
                if !local_id.is_empty() && found != local_id && table.exists(conn, local_id)? {
                    // Two distinct rows would end up sharing the guid.
                    return Err(StorageError::already_exists(
                        table.kind,
                        guid.unwrap_or_default(),
                    ));
                }
                return Ok(found);
            }
            if !local_id.is_empty() && table.exists(conn, local_id)? {
                return Ok(local_id.to_string());
            }
            let key = if local_id.is_empty() {
                guid.unwrap_or_default()
            } else {
                local_id
            };
            Err(StorageError::not_found(table.kind, key))
        }
    }
}

/// Given one of a related entity's two keys, resolves the other one.
///
/// Returns `(local_id, guid)`. A supplied guid wins over a supplied local id;
/// a related row that resolves from neither fails with `NotFound`.
pub fn resolve_pair(
    conn: &Connection,
    table: IdentityTable,
    local_id: Option<&str>,
    guid: Option<&str>,
) -> Result<(String, Option<String>)> {
    if let Some(g) = guid {
        check_guid(Some(g))?;
        if let Some(found) = table.local_id_for_guid(conn, g)? {
            return Ok((found, Some(g.to_string())));
        }
    }
    match local_id.filter(|l| !l.is_empty()) {
        Some(l) if table.exists(conn, l)? => {
            let g = table.guid_for_local_id(conn, l)?;
            Ok((l.to_string(), g))
        }
        Some(l) => Err(StorageError::not_found(table.kind, l)),
        None => Err(StorageError::not_found(
            table.kind,
            guid.unwrap_or("<no identifier>"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn_with_tags() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE Tags (localUid TEXT PRIMARY KEY NOT NULL, guid TEXT UNIQUE);
             INSERT INTO Tags VALUES ('local-a', '11111111-2222-3333-4444-555555555555');
             INSERT INTO Tags VALUES ('local-b', NULL);",
        )
        .unwrap();
        conn
    }

    const GUID_A: &str = "11111111-2222-3333-4444-555555555555";
    const GUID_NEW: &str = "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee";

    #[test]
    fn test_guid_lexical_check() {
        assert!(is_valid_guid(GUID_A));
        assert!(!is_valid_guid("not-a-guid"));
        assert!(!is_valid_guid(""));
        assert!(matches!(
            check_guid(Some("xyz")),
            Err(StorageError::InvalidGuid(_))
        ));
        assert!(check_guid(None).is_ok());
    }

    #[test]
    fn test_add_with_guid_only_synthesizes_local_id() {
        let conn = conn_with_tags();
        let id = reconcile(&conn, IdentityTable::TAG, WriteIntent::Add, "", Some(GUID_NEW)).unwrap();
        assert!(!id.is_empty());
        assert_ne!(id, "local-a");
    }

    #[test]
    fn test_add_existing_guid_is_conflict() {
        let conn = conn_with_tags();
        let err = reconcile(&conn, IdentityTable::TAG, WriteIntent::Add, "", Some(GUID_A)).unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_add_existing_local_id_is_conflict() {
        let conn = conn_with_tags();
        let err = reconcile(&conn, IdentityTable::TAG, WriteIntent::Add, "local-b", None).unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_update_by_guid_adopts_local_id() {
        let conn = conn_with_tags();
        let id = reconcile(&conn, IdentityTable::TAG, WriteIntent::Update, "", Some(GUID_A)).unwrap();
        assert_eq!(id, "local-a");
    }

    #[test]
    fn test_update_assigning_guid_falls_back_to_local_id() {
        let conn = conn_with_tags();
        let id = reconcile(&conn, IdentityTable::TAG, WriteIntent::Update, "local-b", Some(GUID_NEW))
            .unwrap();
        assert_eq!(id, "local-b");
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let conn = conn_with_tags();
        let err = reconcile(&conn, IdentityTable::TAG, WriteIntent::Update, "nope", Some(GUID_NEW))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_resolve_pair_from_either_key() {
        let conn = conn_with_tags();
        let (l, g) = resolve_pair(&conn, IdentityTable::TAG, None, Some(GUID_A)).unwrap();
        assert_eq!(l, "local-a");
        assert_eq!(g.as_deref(), Some(GUID_A));

        let (l, g) = resolve_pair(&conn, IdentityTable::TAG, Some("local-a"), None).unwrap();
        assert_eq!(l, "local-a");
        assert_eq!(g.as_deref(), Some(GUID_A));

        assert!(resolve_pair(&conn, IdentityTable::TAG, Some("missing"), None)
            .unwrap_err()
            .is_not_found());
    }
}
