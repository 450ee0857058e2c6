//! Internal domain modules for the notevault storage engine.
//!
//! All public types from these modules are re-exported at the crate root
//! with `#[doc(inline)]`; import from there in preference to this module.

pub mod blob_store;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod local_storage;
pub mod model;
pub mod patches;
pub(crate) mod repo;
pub mod schema;
pub mod search;
pub mod statements;
pub mod storage;
pub mod text;
pub mod transaction;
pub mod validation;

#[doc(inline)]
pub use blob_store::{BlobStore, Payload, PayloadWrite, StagedPayloads};
#[doc(inline)]
pub use config::{Account, AccountKind, StorageConfig};
#[doc(inline)]
pub use error::{FileOp, Result, StorageError};
#[doc(inline)]
pub use events::{EventBus, StorageEvent};
#[doc(inline)]
pub use local_storage::LocalStorageManager;
#[doc(inline)]
pub use search::{CompiledQuery, NoteSearchQuery};
#[doc(inline)]
pub use storage::Storage;
#[doc(inline)]
pub use transaction::{Transaction, TransactionKind, TransactionState};
