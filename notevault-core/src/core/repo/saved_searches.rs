use rusqlite::{named_params, OptionalExtension, Row};

use super::{Repo, StoredEntity};
use crate::core::error::{Context, Result, StorageError};
use crate::core::identity::{reconcile, IdentityTable, WriteIntent};
use crate::core::model::{SavedSearch, SavedSearchKey};
use crate::core::statements::CachedStatement;
use crate::core::validation::check_saved_search;

impl StoredEntity for SavedSearch {
    const IDENTITY: IdentityTable = IdentityTable::SAVED_SEARCH;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(SavedSearch {
            local_id: row.get("localUid")?,
            guid: row.get("guid")?,
            name: row.get("name")?,
            query: row.get("query")?,
            query_format: row.get("format")?,
            update_sequence_number: row.get("updateSequenceNumber")?,
            include_account: row.get("includeAccount")?,
            include_personal_linked_notebooks: row.get("includePersonalLinkedNotebooks")?,
            include_business_linked_notebooks: row.get("includeBusinessLinkedNotebooks")?,
            is_dirty: row.get("isDirty")?,
            is_local: row.get("isLocal")?,
            is_favorited: row.get("isFavorited")?,
        })
    }
}

impl Repo<'_> {
    /// Writes a saved search and returns it with its final local id.
    ///
    /// # Errors
    ///
    /// Fails with `AlreadyExists` when another search already uses the same
    /// name, compared case-insensitively.
    pub fn put_saved_search(&self, search: &SavedSearch, intent: WriteIntent) -> Result<SavedSearch> {
        check_saved_search(search)?;
        let local_id = reconcile(
            self.conn,
            IdentityTable::SAVED_SEARCH,
            intent,
            &search.local_id,
            search.guid.as_deref(),
        )?;

        let name = search.name.as_deref().unwrap_or_default();
        let name_lower = name.to_lowercase();
        let holder: Option<String> = self
            .conn
            .query_row(
                "SELECT localUid FROM SavedSearches WHERE nameLower = ?1",
                [&name_lower],
                |row| row.get(0),
            )
            .optional()
            .context("can't check saved search name")?;
        if holder.is_some_and(|h| h != local_id) {
            return Err(StorageError::already_exists("Saved search", name));
        }

        let statement = match intent {
            WriteIntent::Add => CachedStatement::InsertSavedSearch,
            WriteIntent::Update => CachedStatement::UpdateSavedSearch,
        };
        self.stmts
            .prepare(self.conn, statement)?
            .execute(named_params! {
                ":localUid": local_id,
                ":guid": search.guid,
                ":name": name,
                ":nameLower": name_lower,
                ":query": search.query,
                ":format": search.query_format,
                ":updateSequenceNumber": search.update_sequence_number,
                ":isDirty": search.is_dirty,
                ":isLocal": search.is_local,
                ":isFavorited": search.is_favorited,
                ":includeAccount": search.include_account,
                ":includePersonalLinkedNotebooks": search.include_personal_linked_notebooks,
                ":includeBusinessLinkedNotebooks": search.include_business_linked_notebooks,
            })
            .context("can't write saved search")?;

        Ok(SavedSearch {
            local_id,
            ..search.clone()
        })
    }

    pub fn find_saved_search(&self, key: &SavedSearchKey) -> Result<Option<SavedSearch>> {
        match key {
            SavedSearchKey::LocalId(id) => self.find_by_local_id(id),
            SavedSearchKey::Guid(guid) => self.find_by_guid(guid),
            SavedSearchKey::Name(name) => self.find_by("nameLower", &name.to_lowercase()),
        }
    }

    pub fn expunge_saved_search(&self, local_id: &str) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM SavedSearches WHERE localUid = ?1", [local_id])
            .context("can't expunge saved search")?;
        if changed == 0 {
            return Err(StorageError::not_found("Saved search", local_id));
        }
        Ok(())
    }
}
