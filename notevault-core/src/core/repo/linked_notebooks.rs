use rusqlite::{named_params, OptionalExtension, Row};

use super::{aggregate_to_i64, order_and_page, Conditions, Repo};
use crate::core::error::{Context, Result, StorageError};
use crate::core::identity::WriteIntent;
use crate::core::model::{LinkedNotebook, LinkedNotebookOrder, ListFilter, ListParams};
use crate::core::statements::CachedStatement;
use crate::core::validation::check_linked_notebook;

fn map_linked_notebook_row(row: &Row<'_>) -> rusqlite::Result<LinkedNotebook> {
    Ok(LinkedNotebook {
        guid: row.get("guid")?,
        update_sequence_number: row.get("updateSequenceNumber")?,
        share_name: row.get("shareName")?,
        username: row.get("username")?,
        shard_id: row.get("shardId")?,
        shared_notebook_global_id: row.get("sharedNotebookGlobalId")?,
        uri: row.get("uri")?,
        note_store_url: row.get("noteStoreUrl")?,
        web_api_url_prefix: row.get("webApiUrlPrefix")?,
        stack: row.get("stack")?,
        business_id: row.get("businessId")?,
        is_dirty: row.get("isDirty")?,
    })
}

impl Repo<'_> {
    pub fn put_linked_notebook(&self, linked: &LinkedNotebook, intent: WriteIntent) -> Result<()> {
        check_linked_notebook(linked)?;
        let exists = self.find_linked_notebook(&linked.guid)?.is_some();
        let statement = match (intent, exists) {
            (WriteIntent::Add, true) => {
                return Err(StorageError::already_exists("Linked notebook", &linked.guid))
            }
            (WriteIntent::Update, false) => {
                return Err(StorageError::not_found("Linked notebook", &linked.guid))
            }
            (WriteIntent::Add, false) => CachedStatement::InsertLinkedNotebook,
            (WriteIntent::Update, true) => CachedStatement::UpdateLinkedNotebook,
        };

        self.stmts
            .prepare(self.conn, statement)?
            .execute(named_params! {
                ":guid": linked.guid,
                ":updateSequenceNumber": linked.update_sequence_number,
                ":shareName": linked.share_name,
                ":username": linked.username,
                ":shardId": linked.shard_id,
                ":sharedNotebookGlobalId": linked.shared_notebook_global_id,
                ":uri": linked.uri,
                ":noteStoreUrl": linked.note_store_url,
                ":webApiUrlPrefix": linked.web_api_url_prefix,
                ":stack": linked.stack,
                ":businessId": linked.business_id,
                ":isDirty": linked.is_dirty,
            })
            .context("can't write linked notebook")?;
        Ok(())
    }

    pub fn find_linked_notebook(&self, guid: &str) -> Result<Option<LinkedNotebook>> {
        self.conn
            .query_row(
                "SELECT * FROM LinkedNotebooks WHERE guid = ?1",
                [guid],
                map_linked_notebook_row,
            )
            .optional()
            .context("can't find linked notebook")
    }

    /// Linked notebooks only carry a dirty flag; the other filter flags are
    /// ignored.
    pub fn list_linked_notebooks(
        &self,
        params: &ListParams<LinkedNotebookOrder>,
    ) -> Result<Vec<LinkedNotebook>> {
        let mut conditions = Conditions::default();
        conditions.flag("isDirty", params.filter.dirty);
        let sql = format!(
            "SELECT * FROM LinkedNotebooks{}{}",
            conditions.sql(),
            order_and_page(params)
        );
        let mut stmt = self.conn.prepare(&sql).context("can't list linked notebooks")?;
        let rows = stmt
            .query_map([], map_linked_notebook_row)
            .context("can't list linked notebooks")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("can't list linked notebooks")?;
        Ok(rows)
    }

    /// Counts linked notebooks; only the dirty part of `filter` applies.
    pub fn linked_notebook_count(&self, filter: &ListFilter) -> Result<i64> {
        let mut conditions = Conditions::default();
        conditions.flag("isDirty", filter.dirty);
        let value = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM LinkedNotebooks{}", conditions.sql()),
                [],
                |row| row.get(0),
            )
            .context("can't count linked notebooks")?;
        aggregate_to_i64(value, "can't count linked notebooks")
    }

    /// Local ids of the notes living in the notebooks of a linked notebook.
    pub fn note_local_ids_in_linked_notebook(&self, guid: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT localUid FROM Notes WHERE notebookLocalUid IN \
                 (SELECT localUid FROM Notebooks WHERE linkedNotebookGuid = ?1)",
            )
            .context("can't collect linked notebook notes")?;
        let ids = stmt
            .query_map([guid], |row| row.get(0))
            .context("can't collect linked notebook notes")?
            .collect::<std::result::Result<Vec<String>, _>>()
            .context("can't collect linked notebook notes")?;
        Ok(ids)
    }

    /// Deletes the linked notebook row; its notebooks, notes and tags go with
    /// it through the delete triggers.
    pub fn expunge_linked_notebook(&self, guid: &str) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM LinkedNotebooks WHERE guid = ?1", [guid])
            .context("can't expunge linked notebook")?;
        if changed == 0 {
            return Err(StorageError::not_found("Linked notebook", guid));
        }
        Ok(())
    }
}
