use std::collections::{HashSet, VecDeque};

use rusqlite::types::Value;
use rusqlite::{named_params, OptionalExtension, Row};

use super::{Repo, StoredEntity};
use crate::core::error::{Context, Result, StorageError};
use crate::core::identity::{reconcile, resolve_pair, IdentityTable, WriteIntent};
use crate::core::model::{LinkedNotebookScope, ListParams, Tag, TagKey, TagOrder};
use crate::core::statements::CachedStatement;
use crate::core::validation::check_tag;

pub(crate) fn linked_notebook_scope_clause(
    scope: &LinkedNotebookScope,
) -> Option<(String, Vec<Value>)> {
    match scope {
        LinkedNotebookScope::Any => None,
        LinkedNotebookScope::OwnAccount => Some(("linkedNotebookGuid IS NULL".into(), vec![])),
        LinkedNotebookScope::Linked(guid) => Some((
            "linkedNotebookGuid = ?".into(),
            vec![Value::Text(guid.clone())],
        )),
    }
}

impl StoredEntity for Tag {
    const IDENTITY: IdentityTable = IdentityTable::TAG;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Tag {
            local_id: row.get("localUid")?,
            guid: row.get("guid")?,
            linked_notebook_guid: row.get("linkedNotebookGuid")?,
            update_sequence_number: row.get("updateSequenceNumber")?,
            name: row.get("name")?,
            parent_guid: row.get("parentGuid")?,
            parent_local_id: row.get("parentLocalUid")?,
            is_dirty: row.get("isDirty")?,
            is_local: row.get("isLocal")?,
            is_favorited: row.get("isFavorited")?,
        })
    }

    fn linked_notebook_clause(scope: &LinkedNotebookScope) -> Option<(String, Vec<Value>)> {
        linked_notebook_scope_clause(scope)
    }
}

impl Repo<'_> {
    /// Fails when `parent_local_id` is `local_id` itself or one of its
    /// descendants.
    fn check_not_descendant(&self, local_id: &str, parent_local_id: &str) -> Result<()> {
        let mut seen = HashSet::new();
        let mut current = Some(parent_local_id.to_string());
        while let Some(id) = current {
            if id == local_id {
                return Err(StorageError::validation(format!(
                    "tag {local_id} can't be its own ancestor"
                )));
            }
            if !seen.insert(id.clone()) {
                break;
            }
            current = self
                .conn
                .query_row(
                    "SELECT parentLocalUid FROM Tags WHERE localUid = ?1",
                    [&id],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()
                .context("can't check tag ancestry")?
                .flatten();
        }
        Ok(())
    }

    /// Writes a tag, resolving whichever parent key is missing.
    ///
    /// Returns the tag as stored: final local id and both parent keys.
    pub fn put_tag(&self, tag: &Tag, intent: WriteIntent) -> Result<Tag> {
        check_tag(tag)?;
        let local_id = reconcile(
            self.conn,
            IdentityTable::TAG,
            intent,
            &tag.local_id,
            tag.guid.as_deref(),
        )?;

        let (parent_local_id, parent_guid) =
            if tag.parent_local_id.is_some() || tag.parent_guid.is_some() {
                let (l, g) = resolve_pair(
                    self.conn,
                    IdentityTable::TAG,
                    tag.parent_local_id.as_deref(),
                    tag.parent_guid.as_deref(),
                )?;
                self.check_not_descendant(&local_id, &l)?;
                (Some(l), g)
            } else {
                (None, None)
            };

        let name = tag.name.as_deref().unwrap_or_default();
        let name_lower = name.to_lowercase();
        let holder: Option<String> = self
            .conn
            .query_row(
                "SELECT localUid FROM Tags WHERE nameLower = ?1 \
                 AND COALESCE(linkedNotebookGuid, '') = COALESCE(?2, '')",
                rusqlite::params![name_lower, tag.linked_notebook_guid],
                |row| row.get(0),
            )
            .optional()
            .context("can't check tag name")?;
        if holder.is_some_and(|h| h != local_id) {
            return Err(StorageError::already_exists("Tag", name));
        }

        let statement = match intent {
            WriteIntent::Add => CachedStatement::InsertTag,
            WriteIntent::Update => CachedStatement::UpdateTag,
        };
        self.stmts
            .prepare(self.conn, statement)?
            .execute(named_params! {
                ":localUid": local_id,
                ":guid": tag.guid,
                ":linkedNotebookGuid": tag.linked_notebook_guid,
                ":updateSequenceNumber": tag.update_sequence_number,
                ":name": name,
                ":nameLower": name_lower,
                ":parentGuid": parent_guid,
                ":parentLocalUid": parent_local_id,
                ":isDirty": tag.is_dirty,
                ":isLocal": tag.is_local,
                ":isFavorited": tag.is_favorited,
            })
            .context("can't write tag")?;

        Ok(Tag {
            local_id,
            parent_local_id,
            parent_guid,
            ..tag.clone()
        })
    }

    pub fn find_tag(&self, key: &TagKey) -> Result<Option<Tag>> {
        match key {
            TagKey::LocalId(id) => self.find_by_local_id(id),
            TagKey::Guid(guid) => self.find_by_guid(guid),
            TagKey::Name {
                name,
                linked_notebook_guid,
            } => self
                .conn
                .query_row(
                    "SELECT * FROM Tags WHERE nameLower = ?1 \
                     AND COALESCE(linkedNotebookGuid, '') = COALESCE(?2, '')",
                    rusqlite::params![name.to_lowercase(), linked_notebook_guid],
                    Tag::from_row,
                )
                .optional()
                .context("can't find tag by name"),
        }
    }

    /// Tags linked to one note, in the listing's order.
    pub fn list_tags_per_note(
        &self,
        note_local_id: &str,
        params: &ListParams<TagOrder>,
    ) -> Result<Vec<Tag>> {
        self.list_rows(
            params,
            Some((
                "localUid IN (SELECT localTag FROM NoteTags WHERE localNote = ?)",
                vec![Value::Text(note_local_id.to_string())],
            )),
        )
    }

    /// Resolves tag names (case-insensitive) to local ids; unknown names are
    /// skipped.
    pub fn tag_local_ids_by_names(&self, names: &[String]) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT localUid FROM Tags WHERE nameLower = ?1")
            .context("can't resolve tag names")?;
        let mut ids = Vec::new();
        for name in names {
            let found = stmt
                .query_map([name.to_lowercase()], |row| row.get::<_, String>(0))
                .context("can't resolve tag names")?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("can't resolve tag names")?;
            ids.extend(found);
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Deletes a tag and its whole subtree.
    ///
    /// Returns the local ids of all deleted tags, the root first. Parent links
    /// are cut before deleting, so a cycle left behind by older data is
    /// removed as a whole.
    pub fn expunge_tag(&self, local_id: &str) -> Result<Vec<String>> {
        if !IdentityTable::TAG.exists(self.conn, local_id)? {
            return Err(StorageError::not_found("Tag", local_id));
        }

        let mut affected = vec![local_id.to_string()];
        let mut seen: HashSet<String> = affected.iter().cloned().collect();
        let mut queue = VecDeque::from([local_id.to_string()]);
        let mut children = self
            .conn
            .prepare_cached("SELECT localUid FROM Tags WHERE parentLocalUid = ?1")
            .context("can't collect child tags")?;
        while let Some(id) = queue.pop_front() {
            let child_ids = children
                .query_map([&id], |row| row.get::<_, String>(0))
                .context("can't collect child tags")?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("can't collect child tags")?;
            for child_id in child_ids {
                if seen.insert(child_id.clone()) {
                    affected.push(child_id.clone());
                    queue.push_back(child_id);
                }
            }
        }

        for id in &affected {
            self.conn
                .execute(
                    "UPDATE Tags SET parentLocalUid = NULL, parentGuid = NULL WHERE localUid = ?1",
                    [id],
                )
                .context("can't detach tag")?;
        }
        for id in affected.iter().rev() {
            self.conn
                .execute("DELETE FROM Tags WHERE localUid = ?1", [id])
                .context("can't expunge tag")?;
        }
        Ok(affected)
    }

    /// Deletes tags from linked notebooks that no note references anymore.
    ///
    /// Surviving children of a deleted tag are detached from it.
    pub fn expunge_noteless_linked_tags(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT localUid FROM Tags WHERE linkedNotebookGuid IS NOT NULL \
                 AND localUid NOT IN (SELECT DISTINCT localTag FROM NoteTags)",
            )
            .context("can't collect noteless tags")?;
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .context("can't collect noteless tags")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("can't collect noteless tags")?;

        for id in &ids {
            self.conn
                .execute(
                    "UPDATE Tags SET parentLocalUid = NULL, parentGuid = NULL \
                     WHERE parentLocalUid = ?1",
                    [id],
                )
                .context("can't detach child tags")?;
        }
        for id in &ids {
            self.conn
                .execute("DELETE FROM Tags WHERE localUid = ?1", [id])
                .context("can't expunge noteless tag")?;
        }
        Ok(ids)
    }
}
