//! Local storage engine for a synchronizing note-taking client.
//!
//! The primary entry point is [`LocalStorageManager`], which owns the SQLite
//! database and the resource payload files of one account. All reads and
//! writes of notebooks, notes, tags, resources, saved searches, linked
//! notebooks and users go through its methods.
//!
//! Types are re-exported from their respective sub-modules for convenience;
//! consumers should import from the crate root rather than the `core` module.

pub mod core;

// Re-export commonly used types.
#[doc(inline)]
pub use core::{
    blob_store::{BlobStore, Payload},
    config::{Account, AccountKind, StorageConfig},
    error::{FileOp, Result, StorageError},
    events::StorageEvent,
    local_storage::LocalStorageManager,
    model::{
        AccountLimits, Accounting, BusinessNotebook, BusinessUserInfo, GetNoteOptions, LazyMap,
        LinkedNotebook, LinkedNotebookOrder, LinkedNotebookScope, ListFilter, ListParams, Note,
        NoteAttributes, NoteCountOptions, NoteKey, NoteLimits, NoteOrder, NoteRestrictions,
        Notebook, NotebookKey, NotebookOrder, NotebookRecipientSettings, NotebookRestrictions,
        OrderDirection, Publishing, Resource, ResourceAttributes, ResourceData, SavedSearch,
        SavedSearchKey, SavedSearchOrder, SharedNote, SharedNotebook, Tag, TagKey, TagOrder,
        UpdateNoteOptions, User, UserAttributes,
    },
    search::{NoteSearchQuery, NumericFilter, TextFilter},
    transaction::{TransactionKind, TransactionState},
};
