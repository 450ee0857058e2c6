//! Per-entity persistence on top of one connection.
//!
//! Repository functions never open transactions themselves: the caller owns
//! the unit of work and passes its connection in through [`Repo`]. The
//! lookups, listings and counts that only differ by table are implemented
//! once over [`StoredEntity`].

mod linked_notebooks;
mod notebooks;
mod notes;
mod resources;
mod saved_searches;
mod tags;
mod users;

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::core::blob_store::{BlobStore, StagedPayloads};
use crate::core::error::{Context, Result, StorageError};
use crate::core::identity::IdentityTable;
use crate::core::model::{LazyMap, LinkedNotebookScope, ListFilter, ListParams, SortOrder};
use crate::core::statements::StatementCache;

/// Borrowed handles every repository function works with.
#[derive(Clone, Copy)]
pub(crate) struct Repo<'a> {
    pub conn: &'a Connection,
    pub stmts: &'a StatementCache,
    pub blobs: &'a BlobStore,
    /// Payload writes land here and reach `blobs` once the caller commits.
    pub staged: &'a StagedPayloads,
}

/// An entity stored in a table keyed by `localUid` with an optional `guid`.
pub(crate) trait StoredEntity: Sized {
    const IDENTITY: IdentityTable;

    /// Hydrates the main row; child records are loaded separately.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    /// Restricts a listing to a linked-notebook scope.
    fn linked_notebook_clause(_scope: &LinkedNotebookScope) -> Option<(String, Vec<Value>)> {
        None
    }
}

/// Accumulates `WHERE` conditions and their bound values.
#[derive(Debug, Default)]
pub(crate) struct Conditions {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl Conditions {
    pub fn push(&mut self, clause: impl Into<String>, params: impl IntoIterator<Item = Value>) {
        self.clauses.push(clause.into());
        self.params.extend(params);
    }

    fn flag(&mut self, column: &str, wanted: Option<bool>) {
        if let Some(on) = wanted {
            self.clauses
                .push(format!("{column} = {}", if on { 1 } else { 0 }));
        }
    }

    /// Adds the flag filters shared by every entity with local/favorite flags.
    pub fn filter(&mut self, filter: &ListFilter) {
        self.flag("isDirty", filter.dirty);
        self.flag("isLocal", filter.local);
        self.flag("isFavorited", filter.favorited);
        match filter.has_guid {
            Some(true) => self.clauses.push("guid IS NOT NULL".into()),
            Some(false) => self.clauses.push("guid IS NULL".into()),
            None => {}
        }
    }

    pub fn sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn params(&self) -> Vec<&dyn ToSql> {
        self.params.iter().map(|v| v as &dyn ToSql).collect()
    }
}

/// `ORDER BY`/`LIMIT` tail of a listing query.
pub(crate) fn order_and_page<O: SortOrder>(params: &ListParams<O>) -> String {
    let mut sql = String::new();
    if let Some(column) = params.order.column() {
        sql.push_str(&format!(" ORDER BY {column} {}", params.direction.sql()));
    }
    match (params.limit, params.offset) {
        (Some(limit), offset) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
        (None, 0) => {}
        (None, offset) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
    }
    sql
}

/// Converts an aggregate result: NULL (empty table) reads as zero, anything
/// but an integer is an error.
pub(crate) fn aggregate_to_i64(value: Value, context: &str) -> Result<i64> {
    match value {
        Value::Integer(i) => Ok(i),
        Value::Null => Ok(0),
        other => Err(StorageError::IntConversion {
            context: context.to_string(),
            value: format!("{other:?}"),
        }),
    }
}

/// Stores a boolean singleton flag as NULL (unset) or 1 (set).
pub(crate) fn singleton_flag(on: bool) -> Option<i64> {
    on.then_some(1)
}

pub(crate) fn lower(name: Option<&str>) -> Option<String> {
    name.map(str::to_lowercase)
}

impl<'a> Repo<'a> {
    pub fn find_by<E: StoredEntity>(&self, column: &str, value: &dyn ToSql) -> Result<Option<E>> {
        let table = E::IDENTITY.table;
        let mut stmt = self
            .conn
            .prepare_cached(&format!("SELECT * FROM {table} WHERE {column} = ?1"))
            .context(&format!("can't prepare {} lookup", E::IDENTITY.kind.to_lowercase()))?;
        let mut rows = stmt
            .query_map([value], E::from_row)
            .context(&format!("can't find {}", E::IDENTITY.kind.to_lowercase()))?;
        match rows.next() {
            Some(row) => Ok(Some(row.context(&format!(
                "can't read {} row",
                E::IDENTITY.kind.to_lowercase()
            ))?)),
            None => Ok(None),
        }
    }

    pub fn find_by_local_id<E: StoredEntity>(&self, local_id: &str) -> Result<Option<E>> {
        self.find_by("localUid", &local_id)
    }

    pub fn find_by_guid<E: StoredEntity>(&self, guid: &str) -> Result<Option<E>> {
        self.find_by("guid", &guid)
    }

    fn conditions_for<E: StoredEntity>(
        &self,
        filter: &ListFilter,
        scope: &LinkedNotebookScope,
        extra: Option<(&str, Vec<Value>)>,
    ) -> Conditions {
        let mut conditions = Conditions::default();
        conditions.filter(filter);
        if let Some((clause, params)) = E::linked_notebook_clause(scope) {
            conditions.push(clause, params);
        }
        if let Some((clause, params)) = extra {
            conditions.push(clause, params);
        }
        conditions
    }

    /// Lists main rows matching `params` plus an optional extra condition.
    pub fn list_rows<E: StoredEntity, O: SortOrder>(
        &self,
        params: &ListParams<O>,
        extra: Option<(&str, Vec<Value>)>,
    ) -> Result<Vec<E>> {
        let conditions = self.conditions_for::<E>(&params.filter, &params.linked_notebook, extra);
        let sql = format!(
            "SELECT * FROM {}{}{}",
            E::IDENTITY.table,
            conditions.sql(),
            order_and_page(params)
        );
        let context = format!("can't list {}s", E::IDENTITY.kind.to_lowercase());
        let mut stmt = self.conn.prepare(&sql).context(&context)?;
        let rows = stmt
            .query_map(conditions.params().as_slice(), E::from_row)
            .context(&context)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context(&context)?;
        Ok(rows)
    }

    pub fn count_rows<E: StoredEntity>(
        &self,
        filter: &ListFilter,
        scope: &LinkedNotebookScope,
        extra: Option<(&str, Vec<Value>)>,
    ) -> Result<i64> {
        let conditions = self.conditions_for::<E>(filter, scope, extra);
        let sql = format!("SELECT COUNT(*) FROM {}{}", E::IDENTITY.table, conditions.sql());
        let context = format!("can't count {}s", E::IDENTITY.kind.to_lowercase());
        let value: Value = self
            .conn
            .query_row(&sql, conditions.params().as_slice(), |row| row.get(0))
            .context(&context)?;
        aggregate_to_i64(value, &context)
    }

    /// Reads an application-data map stored as a keys-only table plus a
    /// key/value table; `None` when both are empty.
    pub fn read_lazy_map(
        &self,
        keys_table: &str,
        map_table: &str,
        owner_column: &str,
        owner: &str,
    ) -> Result<Option<LazyMap>> {
        let context = "can't read application data";
        let mut stmt = self
            .conn
            .prepare_cached(&format!("SELECT key FROM {keys_table} WHERE {owner_column} = ?1"))
            .context(context)?;
        let keys = stmt
            .query_map([owner], |row| row.get(0))
            .context(context)?
            .collect::<std::result::Result<BTreeSet<String>, _>>()
            .context(context)?;

        let mut stmt = self
            .conn
            .prepare_cached(&format!(
                "SELECT key, value FROM {map_table} WHERE {owner_column} = ?1"
            ))
            .context(context)?;
        let full_map = stmt
            .query_map([owner], |row| {
                Ok((row.get(0)?, row.get::<_, Option<String>>(1)?.unwrap_or_default()))
            })
            .context(context)?
            .collect::<std::result::Result<BTreeMap<String, String>, _>>()
            .context(context)?;

        let map = LazyMap {
            keys_only: (!keys.is_empty()).then_some(keys),
            full_map: (!full_map.is_empty()).then_some(full_map),
        };
        Ok((!map.is_empty()).then_some(map))
    }

    fn max_usn(&self, sql: &str, param: Option<&str>) -> Result<i64> {
        let context = "can't compute highest update sequence number";
        let value: Option<Value> = match param {
            Some(p) => self.conn.query_row(sql, [p], |row| row.get(0)),
            None => self.conn.query_row(sql, [], |row| row.get(0)),
        }
        .optional()
        .context(context)?;
        aggregate_to_i64(value.unwrap_or(Value::Null), context)
    }

    /// Maximum update sequence number over the tables the sync layer tracks,
    /// within the own account or one linked notebook.
    pub fn account_high_usn(&self, linked_notebook_guid: Option<&str>) -> Result<i64> {
        let scope = match linked_notebook_guid {
            Some(_) => "linkedNotebookGuid = ?1",
            None => "linkedNotebookGuid IS NULL",
        };
        let mut queries = vec![
            format!("SELECT MAX(updateSequenceNumber) FROM Notebooks WHERE {scope}"),
            format!("SELECT MAX(updateSequenceNumber) FROM Tags WHERE {scope}"),
            format!(
                "SELECT MAX(updateSequenceNumber) FROM Notes WHERE notebookLocalUid IN \
                 (SELECT localUid FROM Notebooks WHERE {scope})"
            ),
            format!(
                "SELECT MAX(updateSequenceNumber) FROM Resources WHERE noteLocalUid IN \
                 (SELECT localUid FROM Notes WHERE notebookLocalUid IN \
                 (SELECT localUid FROM Notebooks WHERE {scope}))"
            ),
        ];
        match linked_notebook_guid {
            Some(_) => queries.push(
                "SELECT updateSequenceNumber FROM LinkedNotebooks WHERE guid = ?1".to_string(),
            ),
            None => {
                queries.push("SELECT MAX(updateSequenceNumber) FROM SavedSearches".to_string());
                queries.push("SELECT MAX(updateSequenceNumber) FROM LinkedNotebooks".to_string());
            }
        }

        let mut high = 0;
        for sql in &queries {
            let param = if sql.contains("?1") { linked_notebook_guid } else { None };
            high = high.max(self.max_usn(sql, param)?);
        }
        Ok(high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_conversion() {
        assert_eq!(aggregate_to_i64(Value::Null, "x").unwrap(), 0);
        assert_eq!(aggregate_to_i64(Value::Integer(7), "x").unwrap(), 7);
        assert!(matches!(
            aggregate_to_i64(Value::Text("abc".into()), "x"),
            Err(StorageError::IntConversion { .. })
        ));
    }

    #[test]
    fn test_conditions_sql() {
        let mut c = Conditions::default();
        assert_eq!(c.sql(), "");
        c.filter(&ListFilter::ALL.dirty(true).has_guid(false));
        c.push("nameLower = ?", [Value::Text("x".into())]);
        assert_eq!(c.sql(), " WHERE isDirty = 1 AND guid IS NULL AND nameLower = ?");
        assert_eq!(c.params().len(), 1);
    }
}
