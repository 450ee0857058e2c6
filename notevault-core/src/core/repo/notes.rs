use std::collections::{BTreeMap, HashMap, HashSet};

use rusqlite::types::Value;
use rusqlite::{named_params, OptionalExtension, Row};

use super::{aggregate_to_i64, Repo, StoredEntity};
use crate::core::error::{Context, Result, StorageError};
use crate::core::identity::{reconcile, resolve_pair, IdentityTable, WriteIntent};
use crate::core::model::{
    GetNoteOptions, LinkedNotebookScope, ListParams, Note, NoteAttributes, NoteCountOptions,
    NoteKey, NoteLimits, NoteOrder, NoteRestrictions, Resource, ResourceData, SharedNote,
    UpdateNoteOptions,
};
use crate::core::statements::CachedStatement;
use crate::core::text::{derive_content, normalize, DerivedContent};
use crate::core::validation::{check_guid_clearing, check_note};

impl StoredEntity for Note {
    const IDENTITY: IdentityTable = IdentityTable::NOTE;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let has_attributes: bool = row.get("hasAttributes")?;
        let attributes = if has_attributes {
            Some(NoteAttributes {
                subject_date: row.get("subjectDate")?,
                latitude: row.get("latitude")?,
                longitude: row.get("longitude")?,
                altitude: row.get("altitude")?,
                author: row.get("author")?,
                source: row.get("source")?,
                source_url: row.get("sourceURL")?,
                source_application: row.get("sourceApplication")?,
                share_date: row.get("shareDate")?,
                reminder_order: row.get("reminderOrder")?,
                reminder_done_time: row.get("reminderDoneTime")?,
                reminder_time: row.get("reminderTime")?,
                place_name: row.get("placeName")?,
                content_class: row.get("contentClass")?,
                application_data: None,
                last_edited_by: row.get("lastEditedBy")?,
                classifications: None,
                creator_id: row.get("creatorId")?,
                last_editor_id: row.get("lastEditorId")?,
                shared_with_business: row.get("sharedWithBusiness")?,
                conflict_source_note_guid: row.get("conflictSourceNoteGuid")?,
                note_title_quality: row.get("noteTitleQuality")?,
            })
        } else {
            None
        };

        Ok(Note {
            local_id: row.get("localUid")?,
            guid: row.get("guid")?,
            update_sequence_number: row.get("updateSequenceNumber")?,
            title: row.get("title")?,
            content: row.get("content")?,
            content_hash: row.get("contentHash")?,
            content_length: row.get("contentLength")?,
            creation_timestamp: row.get("creationTimestamp")?,
            modification_timestamp: row.get("modificationTimestamp")?,
            deletion_timestamp: row.get("deletionTimestamp")?,
            active: row.get("isActive")?,
            notebook_local_id: row.get("notebookLocalUid")?,
            notebook_guid: row.get("notebookGuid")?,
            tag_local_ids: Vec::new(),
            tag_guids: Vec::new(),
            resources: Vec::new(),
            attributes,
            restrictions: None,
            limits: None,
            shared_notes: Vec::new(),
            thumbnail: row.get("thumbnail")?,
            is_dirty: row.get("isDirty")?,
            is_local: row.get("isLocal")?,
            is_favorited: row.get("isFavorited")?,
        })
    }

    fn linked_notebook_clause(scope: &LinkedNotebookScope) -> Option<(String, Vec<Value>)> {
        match scope {
            LinkedNotebookScope::Any => None,
            LinkedNotebookScope::OwnAccount => Some((
                "notebookLocalUid IN (SELECT localUid FROM Notebooks WHERE linkedNotebookGuid IS NULL)"
                    .into(),
                vec![],
            )),
            LinkedNotebookScope::Linked(guid) => Some((
                "notebookLocalUid IN (SELECT localUid FROM Notebooks WHERE linkedNotebookGuid = ?)"
                    .into(),
                vec![Value::Text(guid.clone())],
            )),
        }
    }
}

fn map_restrictions_row(row: &Row<'_>) -> rusqlite::Result<NoteRestrictions> {
    Ok(NoteRestrictions {
        no_update_title: row.get("noUpdateNoteTitle")?,
        no_update_content: row.get("noUpdateNoteContent")?,
        no_email: row.get("noEmailNote")?,
        no_share: row.get("noShareNote")?,
        no_share_publicly: row.get("noShareNotePublicly")?,
    })
}

fn map_limits_row(row: &Row<'_>) -> rusqlite::Result<NoteLimits> {
    Ok(NoteLimits {
        note_resource_count_max: row.get("noteResourceCountMax")?,
        upload_limit: row.get("uploadLimit")?,
        resource_size_max: row.get("resourceSizeMax")?,
        note_size_max: row.get("noteSizeMax")?,
        uploaded: row.get("uploaded")?,
    })
}

fn map_shared_note_row(row: &Row<'_>) -> rusqlite::Result<SharedNote> {
    Ok(SharedNote {
        note_guid: row.get("noteGuid")?,
        sharer_user_id: row.get("sharerUserId")?,
        recipient_identity_id: row.get("recipientIdentityId")?,
        recipient_contact_name: row.get("recipientContactName")?,
        recipient_contact_id: row.get("recipientContactId")?,
        recipient_contact_type: row.get("recipientContactType")?,
        recipient_user_id: row.get("recipientUserId")?,
        privilege: row.get("privilege")?,
        creation_timestamp: row.get("creationTimestamp")?,
        modification_timestamp: row.get("modificationTimestamp")?,
        assignment_timestamp: row.get("assignmentTimestamp")?,
        index_in_note: row.get("indexInNote")?,
    })
}

/// Deletion-state condition for note counts; `None` when every note counts.
fn deletion_clause(options: NoteCountOptions) -> Option<&'static str> {
    match (options.include_non_deleted, options.include_deleted) {
        (true, true) => None,
        (true, false) => Some("deletionTimestamp IS NULL"),
        (false, true) => Some("deletionTimestamp IS NOT NULL"),
        (false, false) => Some("0"),
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// A resource row as last stored: enough to tell whether a payload changed.
struct StoredPayloads {
    data_hash: Option<Vec<u8>>,
    alternate_data_hash: Option<Vec<u8>>,
}

fn payload_changed(resource: &Resource, stored: &StoredPayloads) -> bool {
    let changed = |data: Option<&ResourceData>, old: &Option<Vec<u8>>| {
        data.is_some_and(|d| d.body.is_some() && (d.hash.is_none() || d.hash != *old))
    };
    changed(resource.data.as_ref(), &stored.data_hash)
        || changed(resource.alternate_data.as_ref(), &stored.alternate_data_hash)
}

/// A copy of `resource` attached to the note being written.
fn owned_resource(resource: &Resource, note_local_id: &str, note: &Note, position: usize) -> Resource {
    Resource {
        note_local_id: note_local_id.to_string(),
        note_guid: note.guid.clone(),
        index_in_note: resource.index_in_note.or(Some(position as i32)),
        ..resource.clone()
    }
}

/// Outcome of a note write.
pub(crate) struct NoteWrite {
    /// The note as stored, with resource metadata but without payload bytes.
    pub note: Note,
    /// Resources deleted by the resource diff; their payload files are
    /// removed once the transaction has committed.
    pub removed_resource_ids: Vec<String>,
}

impl Repo<'_> {
    /// Writes a note with all its side records, tag links and resources.
    ///
    /// On update, `options` selects whether tag links and resources are
    /// rewritten. Resources are diffed against the stored set: matching
    /// rows are updated, new ones added and missing ones deleted. Payload
    /// bytes are only written for new resources or when a body with a
    /// changed hash is supplied.
    pub fn put_note(
        &self,
        note: &Note,
        intent: WriteIntent,
        options: UpdateNoteOptions,
    ) -> Result<NoteWrite> {
        check_note(note)?;
        let (notebook_local_id, notebook_guid) = resolve_pair(
            self.conn,
            IdentityTable::NOTEBOOK,
            Some(note.notebook_local_id.as_str()),
            note.notebook_guid.as_deref(),
        )?;
        let local_id = reconcile(
            self.conn,
            IdentityTable::NOTE,
            intent,
            &note.local_id,
            note.guid.as_deref(),
        )?;

        if intent == WriteIntent::Update && note.guid.is_none() {
            let stored_guid = IdentityTable::NOTE.guid_for_local_id(self.conn, &local_id)?;
            if stored_guid.is_some() {
                let mut candidate = note.clone();
                if !options.update_resource_metadata {
                    candidate.resources = self.list_resources_per_note(&local_id, false)?;
                }
                check_guid_clearing(&candidate)?;
            }
        }

        let derived = note
            .content
            .as_deref()
            .map(derive_content)
            .unwrap_or_default();
        self.write_note_row(
            note,
            intent,
            &local_id,
            (&notebook_local_id, notebook_guid.as_deref()),
            &derived,
        )?;
        self.put_note_side_records(note, &local_id)?;

        if intent == WriteIntent::Add || options.update_tags {
            self.put_note_tags(note, &local_id)?;
        }

        let mut removed_resource_ids = Vec::new();
        match intent {
            WriteIntent::Add => {
                for (position, resource) in note.resources.iter().enumerate() {
                    let resource = owned_resource(resource, &local_id, note, position);
                    self.put_resource(&resource, WriteIntent::Add, true)?;
                }
            }
            WriteIntent::Update if options.update_resource_metadata => {
                removed_resource_ids = self.diff_note_resources(note, &local_id, options)?;
            }
            WriteIntent::Update => {}
        }

        let stored = self
            .find_note(
                &NoteKey::LocalId(local_id.clone()),
                GetNoteOptions {
                    with_resource_metadata: true,
                    with_resource_binary_data: false,
                },
            )?
            .ok_or_else(|| StorageError::not_found("Note", &local_id))?;
        check_note(&stored)?;

        Ok(NoteWrite {
            note: stored,
            removed_resource_ids,
        })
    }

    fn write_note_row(
        &self,
        note: &Note,
        intent: WriteIntent,
        local_id: &str,
        (notebook_local_id, notebook_guid): (&str, Option<&str>),
        derived: &DerivedContent,
    ) -> Result<()> {
        let statement = match intent {
            WriteIntent::Add => CachedStatement::InsertNote,
            WriteIntent::Update => CachedStatement::UpdateNote,
        };
        let a = note.attributes.clone().unwrap_or_default();
        let has_app_data = a.application_data.as_ref().is_some_and(|m| !m.is_empty());
        let has_classifications = a.classifications.as_ref().is_some_and(|c| !c.is_empty());

        self.stmts
            .prepare(self.conn, statement)?
            .execute(named_params! {
                ":localUid": local_id,
                ":guid": note.guid,
                ":updateSequenceNumber": note.update_sequence_number,
                ":isDirty": note.is_dirty,
                ":isLocal": note.is_local,
                ":isFavorited": note.is_favorited,
                ":title": note.title,
                ":titleNormalized": note.title.as_deref().map(normalize),
                ":content": note.content,
                ":contentLength": note.content_length,
                ":contentHash": note.content_hash,
                ":contentPlainText": note.content.as_ref().map(|_| &derived.plain_text),
                ":contentListOfWords": note.content.as_ref().map(|_| &derived.list_of_words),
                ":contentContainsFinishedToDo": derived.flags.finished_todo,
                ":contentContainsUnfinishedToDo": derived.flags.unfinished_todo,
                ":contentContainsEncryption": derived.flags.encryption,
                ":creationTimestamp": note.creation_timestamp,
                ":modificationTimestamp": note.modification_timestamp,
                ":deletionTimestamp": note.deletion_timestamp,
                ":isActive": note.active,
                ":hasAttributes": note.attributes.is_some(),
                ":thumbnail": note.thumbnail,
                ":notebookLocalUid": notebook_local_id,
                ":notebookGuid": notebook_guid,
                ":subjectDate": a.subject_date,
                ":latitude": a.latitude,
                ":longitude": a.longitude,
                ":altitude": a.altitude,
                ":author": a.author,
                ":source": a.source,
                ":sourceURL": a.source_url,
                ":sourceApplication": a.source_application,
                ":shareDate": a.share_date,
                ":reminderOrder": a.reminder_order,
                ":reminderDoneTime": a.reminder_done_time,
                ":reminderTime": a.reminder_time,
                ":placeName": a.place_name,
                ":contentClass": a.content_class,
                ":lastEditedBy": a.last_edited_by,
                ":creatorId": a.creator_id,
                ":lastEditorId": a.last_editor_id,
                ":sharedWithBusiness": a.shared_with_business,
                ":conflictSourceNoteGuid": a.conflict_source_note_guid,
                ":noteTitleQuality": a.note_title_quality,
                ":hasApplicationData": has_app_data,
                ":hasClassifications": has_classifications,
            })
            .context("can't write note")?;
        Ok(())
    }

    fn put_note_side_records(&self, note: &Note, local_id: &str) -> Result<()> {
        for table in [
            "NoteRestrictions",
            "NoteLimits",
            "SharedNotes",
            "NoteApplicationDataKeysOnly",
            "NoteApplicationDataFullMap",
            "NoteClassifications",
        ] {
            self.conn
                .execute(&format!("DELETE FROM {table} WHERE noteLocalUid = ?1"), [local_id])
                .context("can't clear note side records")?;
        }

        if let Some(r) = &note.restrictions {
            self.stmts
                .prepare(self.conn, CachedStatement::ReplaceNoteRestrictions)?
                .execute(named_params! {
                    ":noteLocalUid": local_id,
                    ":noUpdateNoteTitle": r.no_update_title,
                    ":noUpdateNoteContent": r.no_update_content,
                    ":noEmailNote": r.no_email,
                    ":noShareNote": r.no_share,
                    ":noShareNotePublicly": r.no_share_publicly,
                })
                .context("can't write note restrictions")?;
        }
        if let Some(l) = &note.limits {
            self.stmts
                .prepare(self.conn, CachedStatement::ReplaceNoteLimits)?
                .execute(named_params! {
                    ":noteLocalUid": local_id,
                    ":noteResourceCountMax": l.note_resource_count_max,
                    ":uploadLimit": l.upload_limit,
                    ":resourceSizeMax": l.resource_size_max,
                    ":noteSizeMax": l.note_size_max,
                    ":uploaded": l.uploaded,
                })
                .context("can't write note limits")?;
        }

        let mut shared = self.stmts.prepare(self.conn, CachedStatement::InsertSharedNote)?;
        for (position, s) in note.shared_notes.iter().enumerate() {
            shared
                .execute(named_params! {
                    ":noteLocalUid": local_id,
                    ":noteGuid": s.note_guid.as_ref().or(note.guid.as_ref()),
                    ":sharerUserId": s.sharer_user_id,
                    ":recipientIdentityId": s.recipient_identity_id,
                    ":recipientContactName": s.recipient_contact_name,
                    ":recipientContactId": s.recipient_contact_id,
                    ":recipientContactType": s.recipient_contact_type,
                    ":recipientUserId": s.recipient_user_id,
                    ":privilege": s.privilege,
                    ":creationTimestamp": s.creation_timestamp,
                    ":modificationTimestamp": s.modification_timestamp,
                    ":assignmentTimestamp": s.assignment_timestamp,
                    ":indexInNote": s.index_in_note.unwrap_or(position as i32),
                })
                .context("can't write shared note")?;
        }

        let Some(attributes) = &note.attributes else {
            return Ok(());
        };
        if let Some(app_data) = &attributes.application_data {
            let mut keys = self
                .stmts
                .prepare(self.conn, CachedStatement::InsertNoteApplicationDataKey)?;
            for key in app_data.keys_only.iter().flatten() {
                keys.execute(named_params! { ":noteLocalUid": local_id, ":key": key })
                    .context("can't write note application data")?;
            }
            let mut entries = self
                .stmts
                .prepare(self.conn, CachedStatement::InsertNoteApplicationDataEntry)?;
            for (key, value) in app_data.full_map.iter().flatten() {
                entries
                    .execute(named_params! { ":noteLocalUid": local_id, ":key": key, ":value": value })
                    .context("can't write note application data")?;
            }
        }
        if let Some(classifications) = &attributes.classifications {
            let mut insert = self
                .stmts
                .prepare(self.conn, CachedStatement::InsertNoteClassification)?;
            for (key, value) in classifications {
                insert
                    .execute(named_params! { ":noteLocalUid": local_id, ":key": key, ":value": value })
                    .context("can't write note classification")?;
            }
        }
        Ok(())
    }

    /// Replaces the note's tag links. Tags are addressed by local id when the
    /// note lists any, by guid otherwise.
    fn put_note_tags(&self, note: &Note, local_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM NoteTags WHERE localNote = ?1", [local_id])
            .context("can't clear note tags")?;

        let tags = if note.tag_local_ids.is_empty() {
            note.tag_guids
                .iter()
                .map(|g| resolve_pair(self.conn, IdentityTable::TAG, None, Some(g)))
                .collect::<Result<Vec<_>>>()?
        } else {
            note.tag_local_ids
                .iter()
                .map(|l| resolve_pair(self.conn, IdentityTable::TAG, Some(l), None))
                .collect::<Result<Vec<_>>>()?
        };

        let mut insert = self.stmts.prepare(self.conn, CachedStatement::InsertNoteTag)?;
        for (index, (tag_local_id, tag_guid)) in tags.iter().enumerate() {
            insert
                .execute(named_params! {
                    ":localNote": local_id,
                    ":note": note.guid,
                    ":localTag": tag_local_id,
                    ":tag": tag_guid,
                    ":tagIndexInNote": index as i64,
                })
                .context("can't write note tag")?;
        }
        Ok(())
    }

    fn diff_note_resources(
        &self,
        note: &Note,
        local_id: &str,
        options: UpdateNoteOptions,
    ) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT localUid, dataHash, alternateDataHash FROM Resources WHERE noteLocalUid = ?1",
            )
            .context("can't read stored note resources")?;
        let stored: HashMap<String, StoredPayloads> = stmt
            .query_map([local_id], |row| {
                Ok((
                    row.get(0)?,
                    StoredPayloads {
                        data_hash: row.get(1)?,
                        alternate_data_hash: row.get(2)?,
                    },
                ))
            })
            .context("can't read stored note resources")?
            .collect::<std::result::Result<_, _>>()
            .context("can't read stored note resources")?;

        let mut kept = HashSet::new();
        for (position, resource) in note.resources.iter().enumerate() {
            let mut resource = owned_resource(resource, local_id, note, position);
            let existing = match resource.guid.as_deref() {
                Some(guid) => IdentityTable::RESOURCE.local_id_for_guid(self.conn, guid)?,
                None => None,
            }
            .or_else(|| {
                stored
                    .contains_key(&resource.local_id)
                    .then(|| resource.local_id.clone())
            });

            let written = match existing.and_then(|id| stored.get(&id).map(|s| (id, s))) {
                Some((id, previous)) => {
                    resource.local_id = id;
                    let write_binary =
                        options.update_resource_binary_data && payload_changed(&resource, previous);
                    self.put_resource(&resource, WriteIntent::Update, write_binary)?
                }
                None => self.put_resource(&resource, WriteIntent::Add, true)?,
            };
            kept.insert(written.local_id);
        }

        let mut removed = Vec::new();
        for id in stored.keys().filter(|id| !kept.contains(*id)) {
            self.conn
                .execute("DELETE FROM Resources WHERE localUid = ?1", [id])
                .context("can't expunge note resource")?;
            removed.push(id.clone());
        }
        Ok(removed)
    }

    fn hydrate_note(&self, mut note: Note, options: GetNoteOptions) -> Result<Note> {
        let id = note.local_id.clone();

        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT localTag, tag FROM NoteTags WHERE localNote = ?1 \
                 ORDER BY tagIndexInNote, rowid",
            )
            .context("can't read note tags")?;
        let tags = stmt
            .query_map([&id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })
            .context("can't read note tags")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("can't read note tags")?;
        for (local, guid) in tags {
            note.tag_local_ids.push(local);
            note.tag_guids.extend(guid);
        }

        note.restrictions = self
            .conn
            .query_row(
                "SELECT * FROM NoteRestrictions WHERE noteLocalUid = ?1",
                [&id],
                map_restrictions_row,
            )
            .optional()
            .context("can't read note restrictions")?;
        note.limits = self
            .conn
            .query_row("SELECT * FROM NoteLimits WHERE noteLocalUid = ?1", [&id], map_limits_row)
            .optional()
            .context("can't read note limits")?;

        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT * FROM SharedNotes WHERE noteLocalUid = ?1 ORDER BY indexInNote, rowid",
            )
            .context("can't read shared notes")?;
        note.shared_notes = stmt
            .query_map([&id], map_shared_note_row)
            .context("can't read shared notes")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("can't read shared notes")?;

        if let Some(app_data) = self.read_lazy_map(
            "NoteApplicationDataKeysOnly",
            "NoteApplicationDataFullMap",
            "noteLocalUid",
            &id,
        )? {
            note.attributes.get_or_insert_with(NoteAttributes::default).application_data =
                Some(app_data);
        }

        let mut stmt = self
            .conn
            .prepare_cached("SELECT key, value FROM NoteClassifications WHERE noteLocalUid = ?1")
            .context("can't read note classifications")?;
        let classifications = stmt
            .query_map([&id], |row| {
                Ok((row.get(0)?, row.get::<_, Option<String>>(1)?.unwrap_or_default()))
            })
            .context("can't read note classifications")?
            .collect::<std::result::Result<BTreeMap<String, String>, _>>()
            .context("can't read note classifications")?;
        if !classifications.is_empty() {
            note.attributes.get_or_insert_with(NoteAttributes::default).classifications =
                Some(classifications);
        }

        if options.with_resource_metadata {
            note.resources =
                self.list_resources_per_note(&id, options.with_resource_binary_data)?;
        }
        Ok(note)
    }

    pub fn find_note(&self, key: &NoteKey, options: GetNoteOptions) -> Result<Option<Note>> {
        let found = match key {
            NoteKey::LocalId(id) => self.find_by_local_id::<Note>(id)?,
            NoteKey::Guid(guid) => self.find_by_guid::<Note>(guid)?,
        };
        found.map(|n| self.hydrate_note(n, options)).transpose()
    }

    /// Lists notes matching `params` and an optional extra condition.
    pub fn list_notes(
        &self,
        params: &ListParams<NoteOrder>,
        options: GetNoteOptions,
        extra: Option<(&str, Vec<Value>)>,
    ) -> Result<Vec<Note>> {
        self.list_rows::<Note, _>(params, extra)?
            .into_iter()
            .map(|n| self.hydrate_note(n, options))
            .collect()
    }

    pub fn list_notes_per_notebook(
        &self,
        notebook_local_id: &str,
        params: &ListParams<NoteOrder>,
        options: GetNoteOptions,
    ) -> Result<Vec<Note>> {
        self.list_notes(
            params,
            options,
            Some((
                "notebookLocalUid = ?",
                vec![Value::Text(notebook_local_id.to_string())],
            )),
        )
    }

    pub fn list_notes_per_tag(
        &self,
        tag_local_id: &str,
        params: &ListParams<NoteOrder>,
        options: GetNoteOptions,
    ) -> Result<Vec<Note>> {
        self.list_notes(
            params,
            options,
            Some((
                "localUid IN (SELECT localNote FROM NoteTags WHERE localTag = ?)",
                vec![Value::Text(tag_local_id.to_string())],
            )),
        )
    }

    pub fn list_notes_by_local_ids(
        &self,
        local_ids: &[String],
        params: &ListParams<NoteOrder>,
        options: GetNoteOptions,
    ) -> Result<Vec<Note>> {
        if local_ids.is_empty() {
            return Ok(Vec::new());
        }
        let clause = format!("localUid IN ({})", placeholders(local_ids.len()));
        let values = local_ids.iter().cloned().map(Value::Text).collect();
        self.list_notes(params, options, Some((&clause, values)))
    }

    fn count_notes(&self, options: NoteCountOptions, clause: Option<(&str, Vec<Value>)>) -> Result<i64> {
        let mut sql = "SELECT COUNT(DISTINCT localUid) FROM Notes".to_string();
        let mut conditions = Vec::new();
        let mut params = Vec::new();
        if let Some(deletion) = deletion_clause(options) {
            conditions.push(deletion.to_string());
        }
        if let Some((c, p)) = clause {
            conditions.push(c.to_string());
            params.extend(p);
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        let value = self
            .conn
            .query_row(&sql, rusqlite::params_from_iter(params), |row| row.get(0))
            .context("can't count notes")?;
        aggregate_to_i64(value, "can't count notes")
    }

    pub fn note_count(&self, options: NoteCountOptions) -> Result<i64> {
        self.count_notes(options, None)
    }

    pub fn note_count_per_notebook(
        &self,
        notebook_local_id: &str,
        options: NoteCountOptions,
    ) -> Result<i64> {
        self.count_notes(
            options,
            Some((
                "notebookLocalUid = ?",
                vec![Value::Text(notebook_local_id.to_string())],
            )),
        )
    }

    pub fn note_count_per_tag(&self, tag_local_id: &str, options: NoteCountOptions) -> Result<i64> {
        self.count_notes(
            options,
            Some((
                "localUid IN (SELECT localNote FROM NoteTags WHERE localTag = ?)",
                vec![Value::Text(tag_local_id.to_string())],
            )),
        )
    }

    /// Note counts keyed by tag local id; tags without notes are absent.
    pub fn note_counts_per_all_tags(&self, options: NoteCountOptions) -> Result<BTreeMap<String, i64>> {
        let deletion = deletion_clause(options)
            .map(|c| format!(" WHERE {c}"))
            .unwrap_or_default();
        let sql = format!(
            "SELECT NoteTags.localTag, COUNT(DISTINCT Notes.localUid) FROM Notes \
             JOIN NoteTags ON Notes.localUid = NoteTags.localNote{deletion} \
             GROUP BY NoteTags.localTag"
        );
        let mut stmt = self.conn.prepare(&sql).context("can't count notes per tag")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Value>(1)?)))
            .context("can't count notes per tag")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("can't count notes per tag")?;
        counts
            .into_iter()
            .map(|(tag, count)| Ok((tag, aggregate_to_i64(count, "can't count notes per tag")?)))
            .collect()
    }

    /// Counts notes in any of the notebooks that carry any of the tags; an
    /// empty list leaves that dimension unrestricted.
    pub fn note_count_per_notebooks_and_tags(
        &self,
        notebook_local_ids: &[String],
        tag_local_ids: &[String],
        options: NoteCountOptions,
    ) -> Result<i64> {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        if !notebook_local_ids.is_empty() {
            clauses.push(format!(
                "notebookLocalUid IN ({})",
                placeholders(notebook_local_ids.len())
            ));
            params.extend(notebook_local_ids.iter().cloned().map(Value::Text));
        }
        if !tag_local_ids.is_empty() {
            clauses.push(format!(
                "localUid IN (SELECT localNote FROM NoteTags WHERE localTag IN ({}))",
                placeholders(tag_local_ids.len())
            ));
            params.extend(tag_local_ids.iter().cloned().map(Value::Text));
        }
        if clauses.is_empty() {
            return self.count_notes(options, None);
        }
        let clause = clauses.join(" AND ");
        self.count_notes(options, Some((&clause, params)))
    }

    pub fn expunge_note(&self, local_id: &str) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM Notes WHERE localUid = ?1", [local_id])
            .context("can't expunge note")?;
        if changed == 0 {
            return Err(StorageError::not_found("Note", local_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deletion_clause() {
        assert_eq!(deletion_clause(NoteCountOptions::default()), Some("deletionTimestamp IS NULL"));
        let all = NoteCountOptions {
            include_non_deleted: true,
            include_deleted: true,
        };
        assert_eq!(deletion_clause(all), None);
    }

    #[test]
    fn test_payload_changed_needs_body_and_new_hash() {
        let stored = StoredPayloads {
            data_hash: Some(vec![1]),
            alternate_data_hash: None,
        };
        let mut resource = Resource::new("n");
        assert!(!payload_changed(&resource, &stored));

        resource.data = Some(ResourceData {
            body: Some(vec![9]),
            size: Some(1),
            hash: Some(vec![1]),
        });
        assert!(!payload_changed(&resource, &stored));

        resource.data.as_mut().unwrap().hash = Some(vec![2]);
        assert!(payload_changed(&resource, &stored));
    }
}
