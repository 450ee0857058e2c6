//! The note search language: parsing query text and compiling it to SQL.

pub mod compiler;
pub mod query;

pub use compiler::CompiledQuery;
pub use query::{NoteSearchQuery, NumericFilter, TextFilter};
