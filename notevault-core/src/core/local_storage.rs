//! The account-level entry point to local storage.

use std::collections::BTreeMap;

use crossbeam_channel::Receiver;
use rusqlite::Connection;

use crate::core::blob_store::StagedPayloads;
use crate::core::config::{Account, StorageConfig};
use crate::core::error::{Result, StorageError};
use crate::core::events::{EventBus, StorageEvent};
use crate::core::identity::WriteIntent;
use crate::core::model::{
    GetNoteOptions, LinkedNotebook, LinkedNotebookOrder, LinkedNotebookScope, ListFilter,
    ListParams, Note, NoteCountOptions, NoteKey, NoteOrder, Notebook, NotebookKey, NotebookOrder,
    Resource, SavedSearch, SavedSearchKey, SavedSearchOrder, SharedNotebook, Tag, TagKey, TagOrder,
    UpdateNoteOptions, User,
};
use crate::core::repo::Repo;
use crate::core::search::NoteSearchQuery;
use crate::core::statements::StatementCache;
use crate::core::storage::Storage;
use crate::core::transaction::{Transaction, TransactionKind};

/// Local storage of one account.
///
/// Every write runs in its own exclusive transaction and is announced to
/// subscribers once committed. Payload files are only written, moved or
/// removed after the commit; a failure there is logged and returned, the
/// database change stays. A rolled back write leaves the files untouched.
pub struct LocalStorageManager {
    account: Account,
    config: StorageConfig,
    storage: Storage,
    statements: StatementCache,
    events: EventBus,
    staged: StagedPayloads,
}

impl LocalStorageManager {
    /// Opens the storage of `account` as described by `config`.
    ///
    /// # Errors
    ///
    /// Everything [`Storage::open`] can fail with.
    pub fn open(account: Account, config: StorageConfig) -> Result<Self> {
        log::info!(
            "Opening local storage of account {} at {}",
            account.name,
            config.storage_dir.display()
        );
        let storage = Storage::open(&config)?;
        let statements = StatementCache::new(storage.connection(), config.statement_cache_capacity);
        Ok(Self {
            account,
            config,
            storage,
            statements,
            events: EventBus::default(),
            staged: StagedPayloads::default(),
        })
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Switches to another account's storage.
    ///
    /// The new storage is opened before the current one is released, so a
    /// failure leaves the manager on the old account. Switching to the
    /// directory already open only swaps the account and flushes the
    /// statement cache.
    pub fn switch_user(&mut self, account: Account, config: StorageConfig) -> Result<()> {
        self.statements.clear(self.storage.connection());
        if config.storage_dir != self.config.storage_dir {
            let storage = Storage::open(&config)?;
            self.statements =
                StatementCache::new(storage.connection(), config.statement_cache_capacity);
            self.storage = storage;
        }
        log::info!(
            "Switched local storage to account {} at {}",
            account.name,
            config.storage_dir.display()
        );
        self.account = account;
        self.config = config;
        self.events.publish(StorageEvent::AccountSwitched {
            storage_dir: self.config.storage_dir.clone(),
        });
        Ok(())
    }

    /// Receives every event published after this call.
    pub fn subscribe(&self) -> Receiver<StorageEvent> {
        self.events.subscribe()
    }

    fn repo<'a>(&'a self, conn: &'a Connection) -> Repo<'a> {
        Repo {
            conn,
            stmts: &self.statements,
            blobs: self.storage.blobs(),
            staged: &self.staged,
        }
    }

    /// Runs `f` in an exclusive transaction and commits it. Payload changes
    /// staged by a write that does not commit are dropped.
    fn write<T>(&self, f: impl FnOnce(Repo<'_>) -> Result<T>) -> Result<T> {
        self.staged.discard();
        let committed = Transaction::begin(self.storage.connection(), TransactionKind::Exclusive)
            .and_then(|tx| {
                let value = f(self.repo(&tx))?;
                tx.commit()?;
                Ok(value)
            });
        if committed.is_err() {
            self.staged.discard();
        }
        committed
    }

    /// Stores the payloads staged by the last committed write.
    fn store_staged(&self) -> Result<()> {
        self.staged.apply(self.storage.blobs())
    }

    /// Runs `f` under one shared lock.
    fn read<T>(&self, f: impl FnOnce(Repo<'_>) -> Result<T>) -> Result<T> {
        let tx = Transaction::begin(self.storage.connection(), TransactionKind::Selection)?;
        let value = f(self.repo(&tx))?;
        tx.end()?;
        Ok(value)
    }

    /// Single statement reads go without a transaction.
    fn query(&self) -> Repo<'_> {
        self.repo(self.storage.connection())
    }

    fn report_cleanup(result: Result<()>, what: &str) -> Result<()> {
        if let Err(e) = &result {
            log::warn!("Committed {what} but failed to update its payload files: {e}");
        }
        result
    }

    // Users

    pub fn add_user(&mut self, user: &User) -> Result<()> {
        self.write(|repo| repo.put_user(user, WriteIntent::Add))?;
        self.events.publish(StorageEvent::UserPut(Box::new(user.clone())));
        Ok(())
    }

    pub fn update_user(&mut self, user: &User) -> Result<()> {
        self.write(|repo| repo.put_user(user, WriteIntent::Update))?;
        self.events.publish(StorageEvent::UserPut(Box::new(user.clone())));
        Ok(())
    }

    pub fn find_user(&self, id: i64) -> Result<Option<User>> {
        self.read(|repo| repo.find_user(id))
    }

    /// Marks a user deleted and inactive, keeping the row. Without a
    /// deletion timestamp on `user` the current time is recorded.
    pub fn delete_user(&mut self, user: &User) -> Result<()> {
        let timestamp = user
            .deletion_timestamp
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        let stored = self.write(|repo| {
            repo.mark_user_deleted(user.id, timestamp)?;
            repo.find_user(user.id)
        })?;
        if let Some(stored) = stored {
            self.events.publish(StorageEvent::UserPut(Box::new(stored)));
        }
        Ok(())
    }

    pub fn expunge_user(&mut self, id: i64) -> Result<()> {
        self.write(|repo| repo.expunge_user(id))?;
        self.events.publish(StorageEvent::UserExpunged { id });
        Ok(())
    }

    /// Number of users not marked deleted.
    pub fn user_count(&self, filter: &ListFilter) -> Result<i64> {
        self.query().user_count(filter)
    }

    // Notebooks

    /// Adds a notebook; an empty local id gets a fresh one.
    ///
    /// Returns the notebook as stored.
    pub fn add_notebook(&mut self, notebook: &Notebook) -> Result<Notebook> {
        let stored = self.write(|repo| repo.put_notebook(notebook, WriteIntent::Add))?;
        self.events.publish(StorageEvent::NotebookPut(Box::new(stored.clone())));
        Ok(stored)
    }

    pub fn update_notebook(&mut self, notebook: &Notebook) -> Result<Notebook> {
        let stored = self.write(|repo| repo.put_notebook(notebook, WriteIntent::Update))?;
        self.events.publish(StorageEvent::NotebookPut(Box::new(stored.clone())));
        Ok(stored)
    }

    pub fn find_notebook(&self, key: &NotebookKey) -> Result<Option<Notebook>> {
        self.read(|repo| repo.find_notebook(key))
    }

    pub fn find_default_notebook(&self) -> Result<Option<Notebook>> {
        self.read(|repo| repo.find_default_notebook())
    }

    pub fn find_last_used_notebook(&self) -> Result<Option<Notebook>> {
        self.read(|repo| repo.find_last_used_notebook())
    }

    pub fn find_default_or_last_used_notebook(&self) -> Result<Option<Notebook>> {
        self.read(|repo| match repo.find_default_notebook()? {
            Some(notebook) => Ok(Some(notebook)),
            None => repo.find_last_used_notebook(),
        })
    }

    pub fn list_notebooks(&self, params: &ListParams<NotebookOrder>) -> Result<Vec<Notebook>> {
        self.read(|repo| repo.list_notebooks(params))
    }

    pub fn list_shared_notebooks(&self, notebook_guid: &str) -> Result<Vec<SharedNotebook>> {
        self.query().list_shared_notebooks(notebook_guid)
    }

    pub fn notebook_count(&self, filter: &ListFilter, scope: &LinkedNotebookScope) -> Result<i64> {
        self.query().count_rows::<Notebook>(filter, scope, None)
    }

    pub fn find_notebook_for_note_local_id(&self, note_local_id: &str) -> Result<Option<Notebook>> {
        self.read(|repo| repo.find_notebook_for_note_local_id(note_local_id))
    }

    pub fn find_notebook_for_note_guid(&self, note_guid: &str) -> Result<Option<Notebook>> {
        self.read(|repo| repo.find_notebook_for_note_guid(note_guid))
    }

    /// Expunges a notebook with all its notes and their payload files.
    pub fn expunge_notebook(&mut self, key: &NotebookKey) -> Result<()> {
        let (local_id, note_local_ids) = self.write(|repo| {
            let notebook = repo
                .find_notebook(key)?
                .ok_or_else(|| StorageError::not_found("Notebook", format!("{key:?}")))?;
            let note_local_ids = repo.note_local_ids_in_notebook(&notebook.local_id)?;
            repo.expunge_notebook(&notebook.local_id)?;
            Ok((notebook.local_id, note_local_ids))
        })?;
        let cleanup = self.storage.blobs().remove_notes(&note_local_ids);
        self.events.publish(StorageEvent::NotebookExpunged {
            local_id,
            note_local_ids,
        });
        Self::report_cleanup(cleanup, "notebook expunge")
    }

    // Linked notebooks

    pub fn add_linked_notebook(&mut self, linked: &LinkedNotebook) -> Result<()> {
        self.write(|repo| repo.put_linked_notebook(linked, WriteIntent::Add))?;
        self.events
            .publish(StorageEvent::LinkedNotebookPut(Box::new(linked.clone())));
        Ok(())
    }

    pub fn update_linked_notebook(&mut self, linked: &LinkedNotebook) -> Result<()> {
        self.write(|repo| repo.put_linked_notebook(linked, WriteIntent::Update))?;
        self.events
            .publish(StorageEvent::LinkedNotebookPut(Box::new(linked.clone())));
        Ok(())
    }

    pub fn find_linked_notebook(&self, guid: &str) -> Result<Option<LinkedNotebook>> {
        self.query().find_linked_notebook(guid)
    }

    pub fn list_linked_notebooks(
        &self,
        params: &ListParams<LinkedNotebookOrder>,
    ) -> Result<Vec<LinkedNotebook>> {
        self.query().list_linked_notebooks(params)
    }

    pub fn linked_notebook_count(&self, filter: &ListFilter) -> Result<i64> {
        self.query().linked_notebook_count(filter)
    }

    /// Expunges a linked notebook together with its notebooks, notes and tags.
    pub fn expunge_linked_notebook(&mut self, guid: &str) -> Result<()> {
        let note_local_ids = self.write(|repo| {
            let note_local_ids = repo.note_local_ids_in_linked_notebook(guid)?;
            repo.expunge_linked_notebook(guid)?;
            Ok(note_local_ids)
        })?;
        let cleanup = self.storage.blobs().remove_notes(&note_local_ids);
        self.events.publish(StorageEvent::LinkedNotebookExpunged {
            guid: guid.to_string(),
        });
        Self::report_cleanup(cleanup, "linked notebook expunge")
    }

    // Notes

    /// Adds a note with its tag links and resources, writing every resource
    /// payload that carries a body.
    pub fn add_note(&mut self, note: &Note) -> Result<Note> {
        let written = self.write(|repo| {
            repo.put_note(note, WriteIntent::Add, UpdateNoteOptions::default())
        })?;
        let payloads = self.store_staged();
        self.events
            .publish(StorageEvent::NotePut(Box::new(written.note.clone())));
        Self::report_cleanup(payloads, "note add")?;
        Ok(written.note)
    }

    /// Updates a note; `options` decide whether tag links and resources are
    /// rewritten.
    pub fn update_note(&mut self, note: &Note, options: UpdateNoteOptions) -> Result<Note> {
        let written = self.write(|repo| repo.put_note(note, WriteIntent::Update, options))?;
        let blobs = self.storage.blobs();
        let mut cleanup = self.store_staged();
        for resource_local_id in &written.removed_resource_ids {
            if let Err(e) = blobs.remove_resource(&written.note.local_id, resource_local_id) {
                cleanup = cleanup.and(Err(e));
            }
        }
        self.events
            .publish(StorageEvent::NoteUpdated(Box::new(written.note.clone())));
        Self::report_cleanup(cleanup, "note update")?;
        Ok(written.note)
    }

    pub fn find_note(&self, key: &NoteKey, options: GetNoteOptions) -> Result<Option<Note>> {
        self.read(|repo| repo.find_note(key, options))
    }

    pub fn list_notes(
        &self,
        params: &ListParams<NoteOrder>,
        options: GetNoteOptions,
    ) -> Result<Vec<Note>> {
        self.read(|repo| repo.list_notes(params, options, None))
    }

    pub fn list_notes_per_notebook(
        &self,
        notebook_local_id: &str,
        params: &ListParams<NoteOrder>,
        options: GetNoteOptions,
    ) -> Result<Vec<Note>> {
        self.read(|repo| repo.list_notes_per_notebook(notebook_local_id, params, options))
    }

    pub fn list_notes_per_tag(
        &self,
        tag_local_id: &str,
        params: &ListParams<NoteOrder>,
        options: GetNoteOptions,
    ) -> Result<Vec<Note>> {
        self.read(|repo| repo.list_notes_per_tag(tag_local_id, params, options))
    }

    pub fn list_notes_by_local_ids(
        &self,
        local_ids: &[String],
        params: &ListParams<NoteOrder>,
        options: GetNoteOptions,
    ) -> Result<Vec<Note>> {
        self.read(|repo| repo.list_notes_by_local_ids(local_ids, params, options))
    }

    pub fn note_count(&self, options: NoteCountOptions) -> Result<i64> {
        self.query().note_count(options)
    }

    pub fn note_count_per_notebook(
        &self,
        notebook_local_id: &str,
        options: NoteCountOptions,
    ) -> Result<i64> {
        self.query().note_count_per_notebook(notebook_local_id, options)
    }

    pub fn note_count_per_tag(&self, tag_local_id: &str, options: NoteCountOptions) -> Result<i64> {
        self.query().note_count_per_tag(tag_local_id, options)
    }

    pub fn note_counts_per_all_tags(
        &self,
        options: NoteCountOptions,
    ) -> Result<BTreeMap<String, i64>> {
        self.query().note_counts_per_all_tags(options)
    }

    pub fn note_count_per_notebooks_and_tags(
        &self,
        notebook_local_ids: &[String],
        tag_local_ids: &[String],
        options: NoteCountOptions,
    ) -> Result<i64> {
        self.query()
            .note_count_per_notebooks_and_tags(notebook_local_ids, tag_local_ids, options)
    }

    /// Expunges a note with its resources and their payload files.
    pub fn expunge_note(&mut self, key: &NoteKey) -> Result<()> {
        let local_id = self.write(|repo| {
            let note = repo
                .find_note(key, GetNoteOptions::BARE)?
                .ok_or_else(|| StorageError::not_found("Note", format!("{key:?}")))?;
            repo.expunge_note(&note.local_id)?;
            Ok(note.local_id)
        })?;
        let cleanup = self.storage.blobs().remove_note(&local_id);
        self.events.publish(StorageEvent::NoteExpunged { local_id });
        Self::report_cleanup(cleanup, "note expunge")
    }

    /// Local ids of the notes matching `query`; empty for an empty query.
    pub fn find_note_local_ids_with_search_query(
        &self,
        query: &NoteSearchQuery,
    ) -> Result<Vec<String>> {
        self.read(|repo| repo.find_note_local_ids_with_search_query(query))
    }

    pub fn find_notes_with_search_query(
        &self,
        query: &NoteSearchQuery,
        params: &ListParams<NoteOrder>,
        options: GetNoteOptions,
    ) -> Result<Vec<Note>> {
        self.read(|repo| repo.find_notes_with_search_query(query, params, options))
    }

    // Tags

    pub fn add_tag(&mut self, tag: &Tag) -> Result<Tag> {
        let stored = self.write(|repo| repo.put_tag(tag, WriteIntent::Add))?;
        self.events.publish(StorageEvent::TagPut(Box::new(stored.clone())));
        Ok(stored)
    }

    pub fn update_tag(&mut self, tag: &Tag) -> Result<Tag> {
        let stored = self.write(|repo| repo.put_tag(tag, WriteIntent::Update))?;
        self.events.publish(StorageEvent::TagPut(Box::new(stored.clone())));
        Ok(stored)
    }

    pub fn find_tag(&self, key: &TagKey) -> Result<Option<Tag>> {
        self.query().find_tag(key)
    }

    pub fn list_tags(&self, params: &ListParams<TagOrder>) -> Result<Vec<Tag>> {
        self.query().list_rows::<Tag, _>(params, None)
    }

    pub fn list_tags_per_note(
        &self,
        note_local_id: &str,
        params: &ListParams<TagOrder>,
    ) -> Result<Vec<Tag>> {
        self.query().list_tags_per_note(note_local_id, params)
    }

    pub fn tag_count(&self, filter: &ListFilter, scope: &LinkedNotebookScope) -> Result<i64> {
        self.query().count_rows::<Tag>(filter, scope, None)
    }

    /// Expunges a tag and its whole subtree; returns the local ids of the
    /// expunged descendants.
    pub fn expunge_tag(&mut self, key: &TagKey) -> Result<Vec<String>> {
        let expunged = self.write(|repo| {
            let tag = repo
                .find_tag(key)?
                .ok_or_else(|| StorageError::not_found("Tag", format!("{key:?}")))?;
            repo.expunge_tag(&tag.local_id)
        })?;
        let mut expunged = expunged.into_iter();
        let local_id = expunged.next().unwrap_or_default();
        let child_local_ids: Vec<String> = expunged.collect();
        self.events.publish(StorageEvent::TagExpunged {
            local_id,
            child_local_ids: child_local_ids.clone(),
        });
        Ok(child_local_ids)
    }

    /// Drops linked-notebook tags no note refers to anymore.
    pub fn expunge_noteless_tags_from_linked_notebooks(&mut self) -> Result<Vec<String>> {
        let local_ids = self.write(|repo| repo.expunge_noteless_linked_tags())?;
        if !local_ids.is_empty() {
            self.events.publish(StorageEvent::TagsExpunged {
                local_ids: local_ids.clone(),
            });
        }
        Ok(local_ids)
    }

    // Resources

    /// Adds a resource to an existing note, writing its payloads.
    pub fn add_resource(&mut self, resource: &Resource) -> Result<Resource> {
        let stored = self.write(|repo| repo.put_resource(resource, WriteIntent::Add, true))?;
        let payloads = self.store_staged();
        self.events
            .publish(StorageEvent::ResourcePut(Box::new(stored.clone())));
        Self::report_cleanup(payloads, "resource add")?;
        Ok(stored)
    }

    /// Updates a resource; payloads are rewritten only when bodies are given.
    pub fn update_resource(&mut self, resource: &Resource) -> Result<Resource> {
        let stored = self.write(|repo| repo.put_resource(resource, WriteIntent::Update, true))?;
        let payloads = self.store_staged();
        self.events
            .publish(StorageEvent::ResourcePut(Box::new(stored.clone())));
        Self::report_cleanup(payloads, "resource update")?;
        Ok(stored)
    }

    pub fn find_resource(&self, local_id: &str, with_binary_data: bool) -> Result<Option<Resource>> {
        self.read(|repo| repo.find_resource(local_id, with_binary_data))
    }

    pub fn resource_count(&self, filter: &ListFilter) -> Result<i64> {
        self.query()
            .count_rows::<Resource>(filter, &LinkedNotebookScope::Any, None)
    }

    pub fn resource_count_per_note(&self, note_local_id: &str) -> Result<i64> {
        self.query().resource_count_per_note(note_local_id)
    }

    pub fn expunge_resource(&mut self, local_id: &str) -> Result<()> {
        let note_local_id = self.write(|repo| repo.expunge_resource(local_id))?;
        let cleanup = self
            .storage
            .blobs()
            .remove_resource(&note_local_id, local_id);
        self.events.publish(StorageEvent::ResourceExpunged {
            local_id: local_id.to_string(),
        });
        Self::report_cleanup(cleanup, "resource expunge")
    }

    // Saved searches

    pub fn add_saved_search(&mut self, search: &SavedSearch) -> Result<SavedSearch> {
        let stored = self.write(|repo| repo.put_saved_search(search, WriteIntent::Add))?;
        self.events
            .publish(StorageEvent::SavedSearchPut(Box::new(stored.clone())));
        Ok(stored)
    }

    pub fn update_saved_search(&mut self, search: &SavedSearch) -> Result<SavedSearch> {
        let stored = self.write(|repo| repo.put_saved_search(search, WriteIntent::Update))?;
        self.events
            .publish(StorageEvent::SavedSearchPut(Box::new(stored.clone())));
        Ok(stored)
    }

    pub fn find_saved_search(&self, key: &SavedSearchKey) -> Result<Option<SavedSearch>> {
        self.query().find_saved_search(key)
    }

    pub fn list_saved_searches(
        &self,
        params: &ListParams<SavedSearchOrder>,
    ) -> Result<Vec<SavedSearch>> {
        self.query().list_rows::<SavedSearch, _>(params, None)
    }

    pub fn saved_search_count(&self, filter: &ListFilter) -> Result<i64> {
        self.query()
            .count_rows::<SavedSearch>(filter, &LinkedNotebookScope::Any, None)
    }

    pub fn expunge_saved_search(&mut self, key: &SavedSearchKey) -> Result<()> {
        let local_id = self.write(|repo| {
            let search = repo
                .find_saved_search(key)?
                .ok_or_else(|| StorageError::not_found("Saved search", format!("{key:?}")))?;
            repo.expunge_saved_search(&search.local_id)?;
            Ok(search.local_id)
        })?;
        self.events
            .publish(StorageEvent::SavedSearchExpunged { local_id });
        Ok(())
    }

    // Account-wide

    /// Highest update sequence number of the own account, or of one linked
    /// notebook.
    pub fn account_high_usn(&self, linked_notebook_guid: Option<&str>) -> Result<i64> {
        self.read(|repo| repo.account_high_usn(linked_notebook_guid))
    }

    pub fn compact(&mut self) -> Result<()> {
        self.statements.clear(self.storage.connection());
        self.storage.compact()
    }

    pub fn current_schema_version(&self) -> Result<i32> {
        self.storage.schema().current_version()
    }

    pub fn requires_upgrade(&self) -> Result<bool> {
        self.storage.schema().requires_upgrade()
    }

    /// Applies every pending schema patch; returns how many ran.
    pub fn apply_pending_patches(&mut self) -> Result<usize> {
        self.statements.clear(self.storage.connection());
        self.storage.apply_pending_patches()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::blob_store::Payload;
    use crate::core::model::ResourceData;
    use tempfile::TempDir;

    const GUID_A: &str = "1b4e28ba-2fa1-11d2-883f-0016d3cca427";
    const GUID_B: &str = "6fa459ea-ee8a-3ca4-894e-db77e160355e";

    fn open(dir: &TempDir) -> LocalStorageManager {
        LocalStorageManager::open(Account::local("test"), StorageConfig::new(dir.path())).unwrap()
    }

    fn note_in(notebook: &Notebook, title: &str) -> Note {
        Note {
            title: Some(title.to_string()),
            content: Some(format!("<en-note><div>{title} body</div></en-note>")),
            ..Note::new(notebook.local_id.clone())
        }
    }

    fn resource_with(note: &Note, body: &[u8], mime: &str) -> Resource {
        Resource {
            data: Some(ResourceData::from_body(body.to_vec())),
            mime: Some(mime.to_string()),
            ..Resource::new(note.local_id.clone())
        }
    }

    #[test]
    fn test_note_round_trip_by_local_id_and_guid() {
        let dir = TempDir::new().unwrap();
        let mut storage = open(&dir);
        let notebook = storage.add_notebook(&Notebook::new("Inbox")).unwrap();
        let note = Note {
            guid: Some(GUID_A.to_string()),
            ..note_in(&notebook, "Groceries")
        };
        let stored = storage.add_note(&note).unwrap();

        let by_local = storage
            .find_note(&NoteKey::LocalId(stored.local_id.clone()), GetNoteOptions::FULL)
            .unwrap()
            .unwrap();
        let by_guid = storage
            .find_note(&NoteKey::Guid(GUID_A.to_string()), GetNoteOptions::FULL)
            .unwrap()
            .unwrap();
        assert_eq!(by_local, by_guid);
        assert_eq!(by_local.title.as_deref(), Some("Groceries"));
        assert_eq!(by_local.notebook_local_id, notebook.local_id);
    }

    #[test]
    fn test_reconciliation_of_guid_only_entities() {
        let dir = TempDir::new().unwrap();
        let mut storage = open(&dir);
        let synced = Notebook {
            local_id: String::new(),
            guid: Some(GUID_A.to_string()),
            ..Notebook::new("Synced")
        };
        let stored = storage.add_notebook(&synced).unwrap();
        assert!(!stored.local_id.is_empty());

        let duplicate = Notebook {
            local_id: String::new(),
            guid: Some(GUID_A.to_string()),
            ..Notebook::new("Other")
        };
        assert!(storage.add_notebook(&duplicate).unwrap_err().is_already_exists());

        let renamed = Notebook {
            local_id: String::new(),
            guid: Some(GUID_A.to_string()),
            ..Notebook::new("Renamed")
        };
        let updated = storage.update_notebook(&renamed).unwrap();
        assert_eq!(updated.local_id, stored.local_id);
        assert_eq!(storage.notebook_count(&ListFilter::ALL, &LinkedNotebookScope::Any).unwrap(), 1);

        let missing = Notebook {
            local_id: String::new(),
            guid: Some(GUID_B.to_string()),
            ..Notebook::new("Missing")
        };
        assert!(storage.update_notebook(&missing).unwrap_err().is_not_found());
    }

    #[test]
    fn test_second_default_notebook_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut storage = open(&dir);
        storage
            .add_notebook(&Notebook {
                is_default: true,
                ..Notebook::new("First")
            })
            .unwrap();
        let second = storage.add_notebook(&Notebook {
            is_default: true,
            ..Notebook::new("Second")
        });
        assert!(second.is_err());
        assert_eq!(
            storage.find_default_notebook().unwrap().unwrap().name.as_deref(),
            Some("First")
        );
    }

    #[test]
    fn test_saved_search_names_are_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let mut storage = open(&dir);
        storage
            .add_saved_search(&SavedSearch::new("Todo", "todo:false"))
            .unwrap();
        let err = storage
            .add_saved_search(&SavedSearch::new("TODO", "todo:true"))
            .unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(storage.saved_search_count(&ListFilter::ALL).unwrap(), 1);
    }

    #[test]
    fn test_expunge_notebook_removes_notes_and_payloads() {
        let dir = TempDir::new().unwrap();
        let mut storage = open(&dir);
        let notebook = storage.add_notebook(&Notebook::new("Trash")).unwrap();
        let mut note = note_in(&notebook, "Scan");
        note.resources = vec![resource_with(&note, b"png bytes", "image/png")];
        let note = storage.add_note(&note).unwrap();
        let resource_id = note.resources[0].local_id.clone();
        let path = storage
            .storage
            .blobs()
            .path(Payload::Data, &note.local_id, &resource_id);
        assert!(path.exists());

        let events = storage.subscribe();
        storage
            .expunge_notebook(&NotebookKey::LocalId(notebook.local_id.clone()))
            .unwrap();

        assert!(!path.exists());
        assert_eq!(storage.note_count(NoteCountOptions::default()).unwrap(), 0);
        assert_eq!(storage.resource_count(&ListFilter::ALL).unwrap(), 0);
        assert_eq!(
            events.try_recv().unwrap(),
            StorageEvent::NotebookExpunged {
                local_id: notebook.local_id,
                note_local_ids: vec![note.local_id],
            }
        );
    }

    #[test]
    fn test_update_note_drops_removed_resources() {
        let dir = TempDir::new().unwrap();
        let mut storage = open(&dir);
        let notebook = storage.add_notebook(&Notebook::new("Inbox")).unwrap();
        let mut note = note_in(&notebook, "Two files");
        note.resources = vec![
            resource_with(&note, b"first", "text/plain"),
            resource_with(&note, b"second", "text/plain"),
        ];
        let note = storage.add_note(&note).unwrap();
        let dropped = note.resources[1].local_id.clone();
        let dropped_path = storage
            .storage
            .blobs()
            .path(Payload::Data, &note.local_id, &dropped);
        assert!(dropped_path.exists());

        let mut edited = note.clone();
        edited.resources.truncate(1);
        let updated = storage
            .update_note(&edited, UpdateNoteOptions::default())
            .unwrap();

        assert_eq!(updated.resources.len(), 1);
        assert!(!dropped_path.exists());
        assert_eq!(storage.resource_count_per_note(&note.local_id).unwrap(), 1);
        let kept = storage
            .find_resource(&note.resources[0].local_id, true)
            .unwrap()
            .unwrap();
        assert_eq!(kept.data.unwrap().body.as_deref(), Some(&b"first"[..]));
    }

    #[test]
    fn test_tag_search_all_versus_any() {
        let dir = TempDir::new().unwrap();
        let mut storage = open(&dir);
        let notebook = storage.add_notebook(&Notebook::new("Inbox")).unwrap();
        let work = storage.add_tag(&Tag::new("work")).unwrap();
        let urgent = storage.add_tag(&Tag::new("urgent")).unwrap();

        let mut both = note_in(&notebook, "Both");
        both.tag_local_ids = vec![work.local_id.clone(), urgent.local_id.clone()];
        let both = storage.add_note(&both).unwrap();
        let mut only_work = note_in(&notebook, "Only work");
        only_work.tag_local_ids = vec![work.local_id.clone()];
        let only_work = storage.add_note(&only_work).unwrap();
        storage.add_note(&note_in(&notebook, "Untagged")).unwrap();

        let all = NoteSearchQuery::parse("tag:work tag:urgent").unwrap();
        assert_eq!(
            storage.find_note_local_ids_with_search_query(&all).unwrap(),
            vec![both.local_id.clone()]
        );

        let any = NoteSearchQuery::parse("any: tag:work tag:urgent").unwrap();
        let mut found = storage.find_note_local_ids_with_search_query(&any).unwrap();
        found.sort();
        let mut expected = vec![both.local_id, only_work.local_id];
        expected.sort();
        assert_eq!(found, expected);

        let empty = NoteSearchQuery::parse("").unwrap();
        assert!(storage.find_note_local_ids_with_search_query(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_content_search_matches_title_and_body() {
        let dir = TempDir::new().unwrap();
        let mut storage = open(&dir);
        let notebook = storage.add_notebook(&Notebook::new("Inbox")).unwrap();
        let hit = storage.add_note(&note_in(&notebook, "Quarterly report")).unwrap();
        storage.add_note(&note_in(&notebook, "Shopping")).unwrap();

        let query = NoteSearchQuery::parse("quarterly").unwrap();
        let notes = storage
            .find_notes_with_search_query(&query, &ListParams::all(), GetNoteOptions::BARE)
            .unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].local_id, hit.local_id);

        let negated = NoteSearchQuery::parse("-quarterly").unwrap();
        let rest = storage.find_note_local_ids_with_search_query(&negated).unwrap();
        assert_eq!(rest.len(), 1);
        assert_ne!(rest[0], hit.local_id);
    }

    #[test]
    fn test_expunge_tag_takes_subtree() {
        let dir = TempDir::new().unwrap();
        let mut storage = open(&dir);
        let parent = storage.add_tag(&Tag::new("projects")).unwrap();
        let child = storage
            .add_tag(&Tag {
                parent_local_id: Some(parent.local_id.clone()),
                ..Tag::new("alpha")
            })
            .unwrap();

        let children = storage
            .expunge_tag(&TagKey::LocalId(parent.local_id.clone()))
            .unwrap();
        assert_eq!(children, vec![child.local_id]);
        assert_eq!(storage.tag_count(&ListFilter::ALL, &LinkedNotebookScope::Any).unwrap(), 0);
    }

    #[test]
    fn test_tag_parent_cycle_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut storage = open(&dir);
        let root = storage.add_tag(&Tag::new("projects")).unwrap();
        let child = storage
            .add_tag(&Tag {
                parent_local_id: Some(root.local_id.clone()),
                ..Tag::new("alpha")
            })
            .unwrap();

        for parent in [&child, &root] {
            let err = storage
                .update_tag(&Tag {
                    parent_local_id: Some(parent.local_id.clone()),
                    ..root.clone()
                })
                .unwrap_err();
            assert!(matches!(err, StorageError::Validation(_)), "{err}");
        }
        let stored = storage
            .find_tag(&TagKey::LocalId(root.local_id.clone()))
            .unwrap()
            .unwrap();
        assert_eq!(stored.parent_local_id, None);
    }

    #[test]
    fn test_expunge_tag_terminates_on_stored_cycle() {
        let dir = TempDir::new().unwrap();
        let mut storage = open(&dir);
        let first = storage.add_tag(&Tag::new("first")).unwrap();
        let second = storage
            .add_tag(&Tag {
                parent_local_id: Some(first.local_id.clone()),
                ..Tag::new("second")
            })
            .unwrap();
        storage
            .storage
            .connection()
            .execute(
                "UPDATE Tags SET parentLocalUid = ?1 WHERE localUid = ?2",
                [&second.local_id, &first.local_id],
            )
            .unwrap();

        let children = storage
            .expunge_tag(&TagKey::LocalId(first.local_id.clone()))
            .unwrap();
        assert_eq!(children, vec![second.local_id]);
        assert_eq!(storage.tag_count(&ListFilter::ALL, &LinkedNotebookScope::Any).unwrap(), 0);
    }

    #[test]
    fn test_failed_add_note_leaves_no_payload_files() {
        let dir = TempDir::new().unwrap();
        let mut storage = open(&dir);
        let notebook = storage.add_notebook(&Notebook::new("Inbox")).unwrap();
        let mut first = note_in(&notebook, "First");
        first.resources = vec![Resource {
            guid: Some(GUID_A.to_string()),
            ..resource_with(&first, b"taken", "text/plain")
        }];
        storage.add_note(&first).unwrap();

        let mut second = note_in(&notebook, "Second");
        let fresh = resource_with(&second, b"fresh", "text/plain");
        second.resources = vec![
            fresh.clone(),
            Resource {
                guid: Some(GUID_A.to_string()),
                ..resource_with(&second, b"clash", "text/plain")
            },
        ];
        assert!(storage.add_note(&second).unwrap_err().is_already_exists());

        let path = storage
            .storage
            .blobs()
            .path(Payload::Data, &second.local_id, &fresh.local_id);
        assert!(!path.exists());
        assert_eq!(
            storage.note_count(NoteCountOptions::default()).unwrap(),
            1
        );
    }

    #[test]
    fn test_failed_update_note_keeps_previous_payload() {
        let dir = TempDir::new().unwrap();
        let mut storage = open(&dir);
        let notebook = storage.add_notebook(&Notebook::new("Inbox")).unwrap();
        let mut other = note_in(&notebook, "Other");
        other.resources = vec![Resource {
            guid: Some(GUID_A.to_string()),
            ..resource_with(&other, b"taken", "text/plain")
        }];
        storage.add_note(&other).unwrap();

        let mut note = note_in(&notebook, "Edited");
        note.resources = vec![resource_with(&note, b"v1", "text/plain")];
        let note = storage.add_note(&note).unwrap();
        let resource_id = note.resources[0].local_id.clone();

        let mut edited = note.clone();
        edited.resources[0].data = Some(ResourceData::from_body(b"version two".to_vec()));
        edited.resources.push(Resource {
            guid: Some(GUID_A.to_string()),
            ..resource_with(&note, b"clash", "text/plain")
        });
        assert!(storage
            .update_note(&edited, UpdateNoteOptions::default())
            .is_err());

        let stored = storage.find_resource(&resource_id, true).unwrap().unwrap();
        let data = stored.data.unwrap();
        assert_eq!(data.body.as_deref(), Some(&b"v1"[..]));
        assert_eq!(data.size, Some(2));
    }

    #[test]
    fn test_resource_moved_to_other_note_keeps_payload() {
        let dir = TempDir::new().unwrap();
        let mut storage = open(&dir);
        let notebook = storage.add_notebook(&Notebook::new("Inbox")).unwrap();
        let mut source = note_in(&notebook, "Source");
        source.resources = vec![resource_with(&source, b"payload", "text/plain")];
        let source = storage.add_note(&source).unwrap();
        let target = storage.add_note(&note_in(&notebook, "Target")).unwrap();

        let stored = storage
            .find_resource(&source.resources[0].local_id, false)
            .unwrap()
            .unwrap();
        let moved = storage
            .update_resource(&Resource {
                note_local_id: target.local_id.clone(),
                note_guid: None,
                ..stored
            })
            .unwrap();
        assert_eq!(moved.note_local_id, target.local_id);

        let blobs = storage.storage.blobs();
        assert!(!blobs.path(Payload::Data, &source.local_id, &moved.local_id).exists());
        assert!(blobs.path(Payload::Data, &target.local_id, &moved.local_id).exists());
        let reread = storage.find_resource(&moved.local_id, true).unwrap().unwrap();
        assert_eq!(reread.data.unwrap().body.as_deref(), Some(&b"payload"[..]));
    }

    #[test]
    fn test_counts_honor_filters() {
        let dir = TempDir::new().unwrap();
        let mut storage = open(&dir);
        storage.add_notebook(&Notebook::new("Draft")).unwrap();
        storage
            .add_notebook(&Notebook {
                is_dirty: false,
                ..Notebook::new("Synced")
            })
            .unwrap();
        let all = ListFilter::ALL;
        let any = LinkedNotebookScope::Any;
        assert_eq!(storage.notebook_count(&all, &any).unwrap(), 2);
        assert_eq!(storage.notebook_count(&all.dirty(true), &any).unwrap(), 1);

        storage
            .add_linked_notebook(&LinkedNotebook {
                guid: GUID_A.to_string(),
                share_name: Some("Shared".to_string()),
                ..LinkedNotebook::default()
            })
            .unwrap();
        storage.add_tag(&Tag::new("work")).unwrap();
        storage
            .add_tag(&Tag {
                guid: Some(GUID_B.to_string()),
                linked_notebook_guid: Some(GUID_A.to_string()),
                is_dirty: false,
                ..Tag::new("work")
            })
            .unwrap();
        assert_eq!(storage.tag_count(&all, &any).unwrap(), 2);
        assert_eq!(
            storage
                .tag_count(&all, &LinkedNotebookScope::Linked(GUID_A.to_string()))
                .unwrap(),
            1
        );
        assert_eq!(
            storage
                .tag_count(&all.dirty(true), &LinkedNotebookScope::OwnAccount)
                .unwrap(),
            1
        );
        assert_eq!(storage.linked_notebook_count(&all).unwrap(), 1);
        assert_eq!(storage.linked_notebook_count(&all.dirty(true)).unwrap(), 0);

        storage
            .add_saved_search(&SavedSearch {
                is_favorited: true,
                ..SavedSearch::new("Starred", "todo:true")
            })
            .unwrap();
        storage
            .add_saved_search(&SavedSearch::new("Plain", "todo:false"))
            .unwrap();
        assert_eq!(storage.saved_search_count(&all).unwrap(), 2);
        assert_eq!(storage.saved_search_count(&all.favorited(true)).unwrap(), 1);
        assert_eq!(storage.resource_count(&all.dirty(true)).unwrap(), 0);

        storage
            .add_user(&User {
                id: 1,
                is_local: true,
                ..User::default()
            })
            .unwrap();
        storage.add_user(&User { id: 2, ..User::default() }).unwrap();
        assert_eq!(storage.user_count(&all).unwrap(), 2);
        assert_eq!(storage.user_count(&all.local(true)).unwrap(), 1);
    }

    #[test]
    fn test_note_tag_guids_skip_local_only_tags() {
        let dir = TempDir::new().unwrap();
        let mut storage = open(&dir);
        let notebook = storage.add_notebook(&Notebook::new("Inbox")).unwrap();
        let draft = storage.add_tag(&Tag::new("draft")).unwrap();
        let synced = storage
            .add_tag(&Tag {
                guid: Some(GUID_B.to_string()),
                ..Tag::new("work")
            })
            .unwrap();

        let mut note = note_in(&notebook, "Mixed");
        note.tag_local_ids = vec![draft.local_id.clone(), synced.local_id.clone()];
        let note = storage.add_note(&note).unwrap();

        let stored = storage
            .find_note(&NoteKey::LocalId(note.local_id), GetNoteOptions::FULL)
            .unwrap()
            .unwrap();
        assert_eq!(stored.tag_local_ids, vec![draft.local_id, synced.local_id]);
        assert_eq!(stored.tag_guids, vec![GUID_B.to_string()]);
    }

    #[test]
    fn test_interrupted_payload_write_is_recovered_on_read() {
        let dir = TempDir::new().unwrap();
        let mut storage = open(&dir);
        let notebook = storage.add_notebook(&Notebook::new("Inbox")).unwrap();
        let mut note = note_in(&notebook, "Attachment");
        note.resources = vec![resource_with(&note, b"committed", "text/plain")];
        let note = storage.add_note(&note).unwrap();
        let resource_id = note.resources[0].local_id.clone();
        let path = storage
            .storage
            .blobs()
            .path(Payload::Data, &note.local_id, &resource_id);

        // A crash between writing the new file and renaming it into place.
        let mut pending = path.as_os_str().to_os_string();
        pending.push(".new");
        std::fs::write(&pending, b"half written").unwrap();

        let resource = storage.find_resource(&resource_id, true).unwrap().unwrap();
        assert_eq!(resource.data.unwrap().body.as_deref(), Some(&b"committed"[..]));
        assert!(!std::path::Path::new(&pending).exists());
    }

    #[test]
    fn test_switch_user_reopens_and_notifies() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let mut storage = open(&first);
        storage.add_notebook(&Notebook::new("Mine")).unwrap();
        let events = storage.subscribe();

        storage
            .switch_user(Account::remote("other", 42), StorageConfig::new(second.path()))
            .unwrap();

        assert_eq!(storage.notebook_count(&ListFilter::ALL, &LinkedNotebookScope::Any).unwrap(), 0);
        assert_eq!(storage.account().user_id, 42);
        assert_eq!(
            events.try_recv().unwrap(),
            StorageEvent::AccountSwitched {
                storage_dir: second.path().to_path_buf(),
            }
        );
    }
}
