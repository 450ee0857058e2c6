use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{LazyMap, Resource};

/// A note with its attachments, tag links and side records.
///
/// Tags are referenced by local id and, where the tags carry one, by guid;
/// either list is enough on write, the other is resolved by the storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub local_id: String,
    pub guid: Option<String>,
    pub update_sequence_number: Option<i32>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub content_hash: Option<Vec<u8>>,
    pub content_length: Option<i32>,
    pub creation_timestamp: Option<i64>,
    pub modification_timestamp: Option<i64>,
    pub deletion_timestamp: Option<i64>,
    pub active: Option<bool>,
    pub notebook_local_id: String,
    pub notebook_guid: Option<String>,
    /// Every linked tag, in link order.
    pub tag_local_ids: Vec<String>,
    /// Guids of the linked tags that have one, in link order. Local-only tags
    /// have no entry, so positions only line up with `tag_local_ids` when
    /// every tag is synced. Used to link tags only when `tag_local_ids` is
    /// empty.
    pub tag_guids: Vec<String>,
    pub resources: Vec<Resource>,
    pub attributes: Option<NoteAttributes>,
    pub restrictions: Option<NoteRestrictions>,
    pub limits: Option<NoteLimits>,
    pub shared_notes: Vec<SharedNote>,
    pub thumbnail: Option<Vec<u8>>,
    pub is_dirty: bool,
    pub is_local: bool,
    pub is_favorited: bool,
}

impl Note {
    pub fn new(notebook_local_id: impl Into<String>) -> Self {
        Self {
            local_id: crate::core::identity::new_local_id(),
            notebook_local_id: notebook_local_id.into(),
            active: Some(true),
            is_dirty: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteAttributes {
    pub subject_date: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub author: Option<String>,
    pub source: Option<String>,
    pub source_url: Option<String>,
    pub source_application: Option<String>,
    pub share_date: Option<i64>,
    pub reminder_order: Option<i64>,
    pub reminder_done_time: Option<i64>,
    pub reminder_time: Option<i64>,
    pub place_name: Option<String>,
    pub content_class: Option<String>,
    pub application_data: Option<LazyMap>,
    pub last_edited_by: Option<String>,
    pub classifications: Option<BTreeMap<String, String>>,
    pub creator_id: Option<i32>,
    pub last_editor_id: Option<i32>,
    pub shared_with_business: Option<bool>,
    pub conflict_source_note_guid: Option<String>,
    pub note_title_quality: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteRestrictions {
    pub no_update_title: Option<bool>,
    pub no_update_content: Option<bool>,
    pub no_email: Option<bool>,
    pub no_share: Option<bool>,
    pub no_share_publicly: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteLimits {
    pub note_resource_count_max: Option<i32>,
    pub upload_limit: Option<i64>,
    pub resource_size_max: Option<i64>,
    pub note_size_max: Option<i64>,
    pub uploaded: Option<i64>,
}

/// One share of a note with an identity; ordered within the note by
/// `index_in_note`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedNote {
    pub note_guid: Option<String>,
    pub sharer_user_id: Option<i32>,
    pub recipient_identity_id: Option<i64>,
    pub recipient_contact_name: Option<String>,
    pub recipient_contact_id: Option<String>,
    pub recipient_contact_type: Option<i32>,
    pub recipient_user_id: Option<i32>,
    pub privilege: Option<i32>,
    pub creation_timestamp: Option<i64>,
    pub modification_timestamp: Option<i64>,
    pub assignment_timestamp: Option<i64>,
    pub index_in_note: Option<i32>,
}

/// What to load alongside a note.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetNoteOptions {
    pub with_resource_metadata: bool,
    pub with_resource_binary_data: bool,
}

impl GetNoteOptions {
    pub const BARE: Self = Self {
        with_resource_metadata: false,
        with_resource_binary_data: false,
    };

    pub const FULL: Self = Self {
        with_resource_metadata: true,
        with_resource_binary_data: true,
    };
}

/// Which parts of an existing note an update rewrites.
///
/// The note row and its 1:1 side records are always replaced. Resources and
/// tag links are only touched when requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateNoteOptions {
    pub update_resource_metadata: bool,
    pub update_resource_binary_data: bool,
    pub update_tags: bool,
}

impl Default for UpdateNoteOptions {
    fn default() -> Self {
        Self {
            update_resource_metadata: true,
            update_resource_binary_data: true,
            update_tags: true,
        }
    }
}

/// Which notes participate in counts, by deletion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteCountOptions {
    pub include_non_deleted: bool,
    pub include_deleted: bool,
}

impl Default for NoteCountOptions {
    fn default() -> Self {
        Self {
            include_non_deleted: true,
            include_deleted: false,
        }
    }
}
