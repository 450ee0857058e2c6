//! Entity types persisted by the storage engine and the parameter types used
//! to list and look them up.

mod linked_notebook;
mod note;
mod notebook;
mod resource;
mod saved_search;
mod tag;
mod user;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

pub use linked_notebook::LinkedNotebook;
pub use note::{
    GetNoteOptions, Note, NoteAttributes, NoteCountOptions, NoteLimits, NoteRestrictions,
    SharedNote, UpdateNoteOptions,
};
pub use notebook::{
    BusinessNotebook, Notebook, NotebookRecipientSettings, NotebookRestrictions, Publishing,
    SharedNotebook,
};
pub use resource::{Resource, ResourceAttributes, ResourceData};
pub use saved_search::SavedSearch;
pub use tag::Tag;
pub use user::{AccountLimits, Accounting, BusinessUserInfo, User, UserAttributes};

/// Application data attached to notes and resources.
///
/// `keys_only` holds keys whose values have not been fetched; `full_map`
/// holds key/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LazyMap {
    pub keys_only: Option<BTreeSet<String>>,
    pub full_map: Option<BTreeMap<String, String>>,
}

impl LazyMap {
    pub(crate) fn is_empty(&self) -> bool {
        self.keys_only.as_ref().map_or(true, |k| k.is_empty())
            && self.full_map.as_ref().map_or(true, |m| m.is_empty())
    }
}

/// Row filter shared by every `list_*` operation.
///
/// Each field left at `None` means "either"; `Some(true)` keeps only rows
/// with the flag set and `Some(false)` only rows without it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub dirty: Option<bool>,
    pub local: Option<bool>,
    pub favorited: Option<bool>,
    pub has_guid: Option<bool>,
}

impl ListFilter {
    pub const ALL: Self = Self {
        dirty: None,
        local: None,
        favorited: None,
        has_guid: None,
    };

    pub fn dirty(mut self, dirty: bool) -> Self {
        self.dirty = Some(dirty);
        self
    }

    pub fn local(mut self, local: bool) -> Self {
        self.local = Some(local);
        self
    }

    pub fn favorited(mut self, favorited: bool) -> Self {
        self.favorited = Some(favorited);
        self
    }

    pub fn has_guid(mut self, has_guid: bool) -> Self {
        self.has_guid = Some(has_guid);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Ascending,
    Descending,
}

impl OrderDirection {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            OrderDirection::Ascending => "ASC",
            OrderDirection::Descending => "DESC",
        }
    }
}

/// Restricts listing to the user's own account, to one linked notebook, or
/// to neither.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LinkedNotebookScope {
    #[default]
    Any,
    OwnAccount,
    Linked(String),
}

/// Sort key of an entity listing; `column()` is `None` for unordered output.
pub trait SortOrder: Copy {
    fn column(self) -> Option<&'static str>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NotebookOrder {
    ByUpdateSequenceNumber,
    ByName,
    ByCreationTimestamp,
    ByModificationTimestamp,
    #[default]
    NoOrder,
}

impl SortOrder for NotebookOrder {
    fn column(self) -> Option<&'static str> {
        match self {
            Self::ByUpdateSequenceNumber => Some("updateSequenceNumber"),
            Self::ByName => Some("nameLower"),
            Self::ByCreationTimestamp => Some("creationTimestamp"),
            Self::ByModificationTimestamp => Some("modificationTimestamp"),
            Self::NoOrder => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NoteOrder {
    ByUpdateSequenceNumber,
    ByTitle,
    ByCreationTimestamp,
    ByModificationTimestamp,
    ByDeletionTimestamp,
    ByAuthor,
    BySource,
    BySourceApplication,
    ByReminderTime,
    ByPlaceName,
    #[default]
    NoOrder,
}

impl SortOrder for NoteOrder {
    fn column(self) -> Option<&'static str> {
        match self {
            Self::ByUpdateSequenceNumber => Some("updateSequenceNumber"),
            Self::ByTitle => Some("title"),
            Self::ByCreationTimestamp => Some("creationTimestamp"),
            Self::ByModificationTimestamp => Some("modificationTimestamp"),
            Self::ByDeletionTimestamp => Some("deletionTimestamp"),
            Self::ByAuthor => Some("author"),
            Self::BySource => Some("source"),
            Self::BySourceApplication => Some("sourceApplication"),
            Self::ByReminderTime => Some("reminderTime"),
            Self::ByPlaceName => Some("placeName"),
            Self::NoOrder => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TagOrder {
    ByUpdateSequenceNumber,
    ByName,
    #[default]
    NoOrder,
}

impl SortOrder for TagOrder {
    fn column(self) -> Option<&'static str> {
        match self {
            Self::ByUpdateSequenceNumber => Some("updateSequenceNumber"),
            Self::ByName => Some("nameLower"),
            Self::NoOrder => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SavedSearchOrder {
    ByUpdateSequenceNumber,
    ByName,
    ByFormat,
    #[default]
    NoOrder,
}

impl SortOrder for SavedSearchOrder {
    fn column(self) -> Option<&'static str> {
        match self {
            Self::ByUpdateSequenceNumber => Some("updateSequenceNumber"),
            Self::ByName => Some("nameLower"),
            Self::ByFormat => Some("format"),
            Self::NoOrder => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkedNotebookOrder {
    ByUpdateSequenceNumber,
    ByShareName,
    ByUsername,
    #[default]
    NoOrder,
}

impl SortOrder for LinkedNotebookOrder {
    fn column(self) -> Option<&'static str> {
        match self {
            Self::ByUpdateSequenceNumber => Some("updateSequenceNumber"),
            Self::ByShareName => Some("shareName"),
            Self::ByUsername => Some("username"),
            Self::NoOrder => None,
        }
    }
}

/// Listing parameters: filter, paging, ordering and linked-notebook scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams<O> {
    pub filter: ListFilter,
    pub limit: Option<u64>,
    pub offset: u64,
    pub order: O,
    pub direction: OrderDirection,
    pub linked_notebook: LinkedNotebookScope,
}

impl<O: Default> ListParams<O> {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_filter(filter: ListFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }
}

/// Lookup key for a notebook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotebookKey {
    LocalId(String),
    Guid(String),
    /// Case-insensitive name within the own account or one linked notebook.
    Name {
        name: String,
        linked_notebook_guid: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteKey {
    LocalId(String),
    Guid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagKey {
    LocalId(String),
    Guid(String),
    Name {
        name: String,
        linked_notebook_guid: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavedSearchKey {
    LocalId(String),
    Guid(String),
    Name(String),
}
