//! Error types for the notevault storage engine.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// The filesystem operation that failed inside the resource blob store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Open,
    Read,
    Write,
    Flush,
    Rename,
    Remove,
    CreateDir,
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileOp::Open => "open",
            FileOp::Read => "read",
            FileOp::Write => "write",
            FileOp::Flush => "flush",
            FileOp::Rename => "rename",
            FileOp::Remove => "remove",
            FileOp::CreateDir => "create directory",
        };
        f.write_str(name)
    }
}

/// All errors that can occur within the storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database file, its directory or its lock could not be opened.
    #[error("Can't open local storage at {path}: {reason}")]
    OpeningFailure { path: PathBuf, reason: String },

    /// A DDL statement failed while creating or patching the schema.
    #[error("Schema failure: {context}: {source}")]
    SchemaFailure {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    /// A DML/DQL statement failed after the schema was established.
    #[error("{context}: {source}")]
    RequestFailure {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The entity failed structural checks; nothing was written.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A guid did not pass the lexical validity check.
    #[error("Invalid guid: {0}")]
    InvalidGuid(String),

    /// Identity reconciliation found no row for the given key.
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// Identity reconciliation found a row where none was expected.
    #[error("{kind} already exists: {key}")]
    AlreadyExists { kind: &'static str, key: String },

    /// An aggregate or required numeric column held non-numeric data.
    #[error("Can't convert {value:?} to integer: {context}")]
    IntConversion { context: String, value: String },

    /// The database was written by a newer build.
    #[error("Database schema version {found} is higher than the supported version {supported}")]
    VersionTooHigh { found: i32, supported: i32 },

    /// A resource payload file operation failed.
    #[error("Can't {op} {path}: {source}")]
    FileSystem {
        op: FileOp,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The search query text could not be parsed.
    #[error("Invalid search query: {0}")]
    SearchQuery(String),

    /// A stored or supplied JSON document was malformed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias that pins the error type to [`StorageError`].
pub type Result<T> = std::result::Result<T, StorageError>;

impl From<rusqlite::Error> for StorageError {
    fn from(source: rusqlite::Error) -> Self {
        StorageError::RequestFailure {
            context: "Database request failed".to_string(),
            source,
        }
    }
}

impl StorageError {
    pub(crate) fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        StorageError::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub(crate) fn already_exists(kind: &'static str, key: impl Into<String>) -> Self {
        StorageError::AlreadyExists {
            kind,
            key: key.into(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        StorageError::Validation(message.into())
    }

    pub(crate) fn fs(op: FileOp, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::FileSystem {
            op,
            path: path.into(),
            source,
        }
    }

    /// Returns `true` for the reconciliation outcome "no such row".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// Returns `true` for the reconciliation outcome "row already present".
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StorageError::AlreadyExists { .. })
    }

    /// Returns a short, human-readable message suitable for display to the end user.
    ///
    /// The full `Display` output carries the engine diagnostics and paths and is
    /// meant for logs.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::OpeningFailure { .. } => "Could not open local storage".to_string(),
            Self::SchemaFailure { .. } => "Local storage is damaged or incompatible".to_string(),
            Self::RequestFailure { context, .. } => context.clone(),
            Self::Validation(msg) => msg.clone(),
            Self::InvalidGuid(guid) => format!("Invalid identifier: {guid}"),
            Self::NotFound { kind, .. } => format!("{kind} no longer exists"),
            Self::AlreadyExists { kind, .. } => format!("{kind} already exists"),
            Self::IntConversion { .. } => "Local storage returned unexpected data".to_string(),
            Self::VersionTooHigh { .. } => {
                "Local storage was created by a newer version of the application".to_string()
            }
            Self::FileSystem { op, .. } => format!("Attachment file error ({op})"),
            Self::SearchQuery(msg) => format!("Search query error: {msg}"),
            Self::Json(e) => format!("Data format error: {e}"),
        }
    }
}

/// Attaches a human-readable summary to a failed SQLite call.
pub(crate) trait Context<T> {
    fn context(self, context: &str) -> Result<T>;
    fn schema_context(self, context: &str) -> Result<T>;
}

impl<T> Context<T> for std::result::Result<T, rusqlite::Error> {
    fn context(self, context: &str) -> Result<T> {
        self.map_err(|source| StorageError::RequestFailure {
            context: context.to_string(),
            source,
        })
    }

    fn schema_context(self, context: &str) -> Result<T> {
        self.map_err(|source| StorageError::SchemaFailure {
            context: context.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_failure_carries_engine_text() {
        let err: Result<()> = Err(rusqlite::Error::InvalidQuery).context("can't insert notebook");
        let err = err.unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("can't insert notebook"));
        assert_eq!(err.user_message(), "can't insert notebook");
    }

    #[test]
    fn test_reconciliation_helpers() {
        assert!(StorageError::not_found("Note", "x").is_not_found());
        assert!(StorageError::already_exists("Tag", "y").is_already_exists());
        assert!(!StorageError::validation("bad").is_not_found());
    }

    #[test]
    fn test_file_system_error_names_path() {
        let err = StorageError::fs(
            FileOp::Rename,
            "/tmp/a.dat",
            std::io::Error::new(std::io::ErrorKind::Other, "boom"),
        );
        assert!(err.to_string().contains("rename /tmp/a.dat"));
    }
}
