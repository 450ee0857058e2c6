use rusqlite::types::Value;
use rusqlite::{named_params, OptionalExtension, Row};

use super::tags::linked_notebook_scope_clause;
use super::{singleton_flag, Repo, StoredEntity};
use crate::core::error::{Context, Result, StorageError};
use crate::core::identity::{reconcile, IdentityTable, WriteIntent};
use crate::core::model::{
    BusinessNotebook, LinkedNotebookScope, ListParams, Notebook, NotebookKey, NotebookOrder,
    NotebookRecipientSettings, NotebookRestrictions, Publishing, SharedNotebook,
};
use crate::core::statements::CachedStatement;
use crate::core::validation::check_notebook;

impl StoredEntity for Notebook {
    const IDENTITY: IdentityTable = IdentityTable::NOTEBOOK;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let publishing = Publishing {
            uri: row.get("publishingUri")?,
            order: row.get("publishingNoteSortOrder")?,
            ascending: row.get("publishingAscendingSort")?,
            public_description: row.get("publicDescription")?,
        };
        let business = BusinessNotebook {
            notebook_description: row.get("businessNotebookDescription")?,
            privilege: row.get("businessNotebookPrivilegeLevel")?,
            recommended: row.get("businessNotebookIsRecommended")?,
        };
        let recipient = NotebookRecipientSettings {
            reminder_notify_email: row.get("recipientReminderNotifyEmail")?,
            reminder_notify_in_app: row.get("recipientReminderNotifyInApp")?,
            in_my_list: row.get("recipientInMyList")?,
            stack: row.get("recipientStack")?,
        };

        Ok(Notebook {
            local_id: row.get("localUid")?,
            guid: row.get("guid")?,
            linked_notebook_guid: row.get("linkedNotebookGuid")?,
            update_sequence_number: row.get("updateSequenceNumber")?,
            name: row.get("name")?,
            creation_timestamp: row.get("creationTimestamp")?,
            modification_timestamp: row.get("modificationTimestamp")?,
            is_default: row.get::<_, Option<i64>>("isDefault")?.is_some(),
            is_last_used: row.get::<_, Option<i64>>("isLastUsed")?.is_some(),
            publishing: (publishing != Publishing::default()).then_some(publishing),
            published: row.get("isPublished")?,
            stack: row.get("stack")?,
            business_notebook: (business != BusinessNotebook::default()).then_some(business),
            contact_id: row.get("contactId")?,
            recipient_settings: (recipient != NotebookRecipientSettings::default())
                .then_some(recipient),
            restrictions: None,
            shared_notebooks: Vec::new(),
            is_dirty: row.get("isDirty")?,
            is_local: row.get("isLocal")?,
            is_favorited: row.get("isFavorited")?,
        })
    }

    fn linked_notebook_clause(scope: &LinkedNotebookScope) -> Option<(String, Vec<Value>)> {
        linked_notebook_scope_clause(scope)
    }
}

fn map_restrictions_row(row: &Row<'_>) -> rusqlite::Result<NotebookRestrictions> {
    Ok(NotebookRestrictions {
        no_read_notes: row.get("noReadNotes")?,
        no_create_notes: row.get("noCreateNotes")?,
        no_update_notes: row.get("noUpdateNotes")?,
        no_expunge_notes: row.get("noExpungeNotes")?,
        no_share_notes: row.get("noShareNotes")?,
        no_email_notes: row.get("noEmailNotes")?,
        no_send_message_to_recipients: row.get("noSendMessageToRecipients")?,
        no_update_notebook: row.get("noUpdateNotebook")?,
        no_expunge_notebook: row.get("noExpungeNotebook")?,
        no_set_default_notebook: row.get("noSetDefaultNotebook")?,
        no_set_notebook_stack: row.get("noSetNotebookStack")?,
        no_publish_to_public: row.get("noPublishToPublic")?,
        no_publish_to_business_library: row.get("noPublishToBusinessLibrary")?,
        no_create_tags: row.get("noCreateTags")?,
        no_update_tags: row.get("noUpdateTags")?,
        no_expunge_tags: row.get("noExpungeTags")?,
        no_set_parent_tag: row.get("noSetParentTag")?,
        no_create_shared_notebooks: row.get("noCreateSharedNotebooks")?,
        update_which_shared_notebook_restrictions: row
            .get("updateWhichSharedNotebookRestrictions")?,
        expunge_which_shared_notebook_restrictions: row
            .get("expungeWhichSharedNotebookRestrictions")?,
    })
}

fn map_shared_notebook_row(row: &Row<'_>) -> rusqlite::Result<SharedNotebook> {
    Ok(SharedNotebook {
        id: row.get("shareId")?,
        user_id: row.get("userId")?,
        notebook_guid: row.get("notebookGuid")?,
        email: row.get("email")?,
        creation_timestamp: row.get("creationTimestamp")?,
        modification_timestamp: row.get("modificationTimestamp")?,
        global_id: row.get("globalId")?,
        username: row.get("username")?,
        privilege: row.get("privilege")?,
        reminder_notify_email: row.get("reminderNotifyEmail")?,
        reminder_notify_in_app: row.get("reminderNotifyInApp")?,
        sharer_user_id: row.get("sharerUserId")?,
        recipient_username: row.get("recipientUsername")?,
        recipient_user_id: row.get("recipientUserId")?,
        recipient_identity_id: row.get("recipientIdentityId")?,
        assignment_timestamp: row.get("assignmentTimestamp")?,
        index_in_notebook: row.get("indexInNotebook")?,
    })
}

impl Repo<'_> {
    /// Writes a notebook with its restrictions and shares.
    ///
    /// Marking a notebook default or last used while another notebook holds
    /// the flag violates the schema's uniqueness constraint and fails.
    pub fn put_notebook(&self, notebook: &Notebook, intent: WriteIntent) -> Result<Notebook> {
        check_notebook(notebook)?;
        let local_id = reconcile(
            self.conn,
            IdentityTable::NOTEBOOK,
            intent,
            &notebook.local_id,
            notebook.guid.as_deref(),
        )?;

        if let Some(linked) = notebook.linked_notebook_guid.as_deref() {
            if self.find_linked_notebook(linked)?.is_none() {
                return Err(StorageError::not_found("Linked notebook", linked));
            }
        }

        let name = notebook.name.as_deref().unwrap_or_default();
        let name_lower = name.to_lowercase();
        let holder: Option<String> = self
            .conn
            .query_row(
                "SELECT localUid FROM Notebooks WHERE nameLower = ?1 \
                 AND COALESCE(linkedNotebookGuid, '') = COALESCE(?2, '')",
                rusqlite::params![name_lower, notebook.linked_notebook_guid],
                |row| row.get(0),
            )
            .optional()
            .context("can't check notebook name")?;
        if holder.is_some_and(|h| h != local_id) {
            return Err(StorageError::already_exists("Notebook", name));
        }

        let statement = match intent {
            WriteIntent::Add => CachedStatement::InsertNotebook,
            WriteIntent::Update => {
                // Shares hang off the old guid, which may be about to change.
                self.conn
                    .execute(
                        "DELETE FROM SharedNotebooks WHERE notebookGuid = \
                         (SELECT guid FROM Notebooks WHERE localUid = ?1)",
                        [&local_id],
                    )
                    .context("can't clear shared notebooks")?;
                CachedStatement::UpdateNotebook
            }
        };

        let publishing = notebook.publishing.clone().unwrap_or_default();
        let business = notebook.business_notebook.clone().unwrap_or_default();
        let recipient = notebook.recipient_settings.clone().unwrap_or_default();
        self.stmts
            .prepare(self.conn, statement)?
            .execute(named_params! {
                ":localUid": local_id,
                ":guid": notebook.guid,
                ":linkedNotebookGuid": notebook.linked_notebook_guid,
                ":updateSequenceNumber": notebook.update_sequence_number,
                ":name": name,
                ":nameLower": name_lower,
                ":creationTimestamp": notebook.creation_timestamp,
                ":modificationTimestamp": notebook.modification_timestamp,
                ":isDirty": notebook.is_dirty,
                ":isLocal": notebook.is_local,
                ":isFavorited": notebook.is_favorited,
                ":isDefault": singleton_flag(notebook.is_default),
                ":isLastUsed": singleton_flag(notebook.is_last_used),
                ":publishingUri": publishing.uri,
                ":publishingNoteSortOrder": publishing.order,
                ":publishingAscendingSort": publishing.ascending,
                ":publicDescription": publishing.public_description,
                ":isPublished": notebook.published,
                ":stack": notebook.stack,
                ":businessNotebookDescription": business.notebook_description,
                ":businessNotebookPrivilegeLevel": business.privilege,
                ":businessNotebookIsRecommended": business.recommended,
                ":contactId": notebook.contact_id,
                ":recipientReminderNotifyEmail": recipient.reminder_notify_email,
                ":recipientReminderNotifyInApp": recipient.reminder_notify_in_app,
                ":recipientInMyList": recipient.in_my_list,
                ":recipientStack": recipient.stack,
            })
            .context("can't write notebook")?;

        self.conn
            .execute("DELETE FROM NotebookRestrictions WHERE localUid = ?1", [&local_id])
            .context("can't clear notebook restrictions")?;
        if let Some(r) = &notebook.restrictions {
            self.stmts
                .prepare(self.conn, CachedStatement::ReplaceNotebookRestrictions)?
                .execute(named_params! {
                    ":localUid": local_id,
                    ":noReadNotes": r.no_read_notes,
                    ":noCreateNotes": r.no_create_notes,
                    ":noUpdateNotes": r.no_update_notes,
                    ":noExpungeNotes": r.no_expunge_notes,
                    ":noShareNotes": r.no_share_notes,
                    ":noEmailNotes": r.no_email_notes,
                    ":noSendMessageToRecipients": r.no_send_message_to_recipients,
                    ":noUpdateNotebook": r.no_update_notebook,
                    ":noExpungeNotebook": r.no_expunge_notebook,
                    ":noSetDefaultNotebook": r.no_set_default_notebook,
                    ":noSetNotebookStack": r.no_set_notebook_stack,
                    ":noPublishToPublic": r.no_publish_to_public,
                    ":noPublishToBusinessLibrary": r.no_publish_to_business_library,
                    ":noCreateTags": r.no_create_tags,
                    ":noUpdateTags": r.no_update_tags,
                    ":noExpungeTags": r.no_expunge_tags,
                    ":noSetParentTag": r.no_set_parent_tag,
                    ":noCreateSharedNotebooks": r.no_create_shared_notebooks,
                    ":updateWhichSharedNotebookRestrictions": r.update_which_shared_notebook_restrictions,
                    ":expungeWhichSharedNotebookRestrictions": r.expunge_which_shared_notebook_restrictions,
                })
                .context("can't write notebook restrictions")?;
        }

        let mut shared_notebooks = notebook.shared_notebooks.clone();
        if let Some(guid) = notebook.guid.as_deref() {
            let mut insert = self
                .stmts
                .prepare(self.conn, CachedStatement::InsertSharedNotebook)?;
            for (position, shared) in shared_notebooks.iter_mut().enumerate() {
                shared.notebook_guid = Some(guid.to_string());
                let index = shared.index_in_notebook.unwrap_or(position as i32);
                shared.index_in_notebook = Some(index);
                insert
                    .execute(named_params! {
                        ":shareId": shared.id,
                        ":userId": shared.user_id,
                        ":notebookGuid": guid,
                        ":email": shared.email,
                        ":creationTimestamp": shared.creation_timestamp,
                        ":modificationTimestamp": shared.modification_timestamp,
                        ":globalId": shared.global_id,
                        ":username": shared.username,
                        ":privilege": shared.privilege,
                        ":reminderNotifyEmail": shared.reminder_notify_email,
                        ":reminderNotifyInApp": shared.reminder_notify_in_app,
                        ":sharerUserId": shared.sharer_user_id,
                        ":recipientUsername": shared.recipient_username,
                        ":recipientUserId": shared.recipient_user_id,
                        ":recipientIdentityId": shared.recipient_identity_id,
                        ":assignmentTimestamp": shared.assignment_timestamp,
                        ":indexInNotebook": index,
                    })
                    .context("can't write shared notebook")?;
            }
        }

        Ok(Notebook {
            local_id,
            shared_notebooks,
            ..notebook.clone()
        })
    }

    fn hydrate_notebook(&self, mut notebook: Notebook) -> Result<Notebook> {
        notebook.restrictions = self
            .conn
            .query_row(
                "SELECT * FROM NotebookRestrictions WHERE localUid = ?1",
                [&notebook.local_id],
                map_restrictions_row,
            )
            .optional()
            .context("can't read notebook restrictions")?;
        if let Some(guid) = notebook.guid.as_deref() {
            notebook.shared_notebooks = self.list_shared_notebooks(guid)?;
        }
        Ok(notebook)
    }

    pub fn list_shared_notebooks(&self, notebook_guid: &str) -> Result<Vec<SharedNotebook>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT * FROM SharedNotebooks WHERE notebookGuid = ?1 \
                 ORDER BY indexInNotebook, shareId",
            )
            .context("can't list shared notebooks")?;
        let rows = stmt
            .query_map([notebook_guid], map_shared_notebook_row)
            .context("can't list shared notebooks")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("can't list shared notebooks")?;
        Ok(rows)
    }

    pub fn find_notebook(&self, key: &NotebookKey) -> Result<Option<Notebook>> {
        let found = match key {
            NotebookKey::LocalId(id) => self.find_by_local_id::<Notebook>(id)?,
            NotebookKey::Guid(guid) => self.find_by_guid::<Notebook>(guid)?,
            NotebookKey::Name {
                name,
                linked_notebook_guid,
            } => self
                .conn
                .query_row(
                    "SELECT * FROM Notebooks WHERE nameLower = ?1 \
                     AND COALESCE(linkedNotebookGuid, '') = COALESCE(?2, '')",
                    rusqlite::params![name.to_lowercase(), linked_notebook_guid],
                    Notebook::from_row,
                )
                .optional()
                .context("can't find notebook by name")?,
        };
        found.map(|nb| self.hydrate_notebook(nb)).transpose()
    }

    pub fn find_default_notebook(&self) -> Result<Option<Notebook>> {
        self.find_by::<Notebook>("isDefault", &1)?
            .map(|nb| self.hydrate_notebook(nb))
            .transpose()
    }

    pub fn find_last_used_notebook(&self) -> Result<Option<Notebook>> {
        self.find_by::<Notebook>("isLastUsed", &1)?
            .map(|nb| self.hydrate_notebook(nb))
            .transpose()
    }

    pub fn list_notebooks(&self, params: &ListParams<NotebookOrder>) -> Result<Vec<Notebook>> {
        self.list_rows::<Notebook, _>(params, None)?
            .into_iter()
            .map(|nb| self.hydrate_notebook(nb))
            .collect()
    }

    /// The notebook owning the note with the given local id.
    pub fn find_notebook_for_note_local_id(&self, note_local_id: &str) -> Result<Option<Notebook>> {
        let notebook_id: Option<String> = self
            .conn
            .query_row(
                "SELECT notebookLocalUid FROM Notes WHERE localUid = ?1",
                [note_local_id],
                |row| row.get(0),
            )
            .optional()
            .context("can't find note's notebook")?;
        match notebook_id {
            Some(id) => self.find_notebook(&NotebookKey::LocalId(id)),
            None => Ok(None),
        }
    }

    pub fn find_notebook_for_note_guid(&self, note_guid: &str) -> Result<Option<Notebook>> {
        let notebook_id: Option<String> = self
            .conn
            .query_row(
                "SELECT notebookLocalUid FROM Notes WHERE guid = ?1",
                [note_guid],
                |row| row.get(0),
            )
            .optional()
            .context("can't find note's notebook")?;
        match notebook_id {
            Some(id) => self.find_notebook(&NotebookKey::LocalId(id)),
            None => Ok(None),
        }
    }

    pub fn note_local_ids_in_notebook(&self, notebook_local_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT localUid FROM Notes WHERE notebookLocalUid = ?1")
            .context("can't collect notebook notes")?;
        let ids = stmt
            .query_map([notebook_local_id], |row| row.get(0))
            .context("can't collect notebook notes")?
            .collect::<std::result::Result<Vec<String>, _>>()
            .context("can't collect notebook notes")?;
        Ok(ids)
    }

    /// Deletes the notebook row; its notes and side records go with it
    /// through the delete triggers.
    pub fn expunge_notebook(&self, local_id: &str) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM Notebooks WHERE localUid = ?1", [local_id])
            .context("can't expunge notebook")?;
        if changed == 0 {
            return Err(StorageError::not_found("Notebook", local_id));
        }
        Ok(())
    }
}
