//! Unified error handling for Horizon Lite.
//!
//! This module defines [`EngineError`], the single error type propagated
//! throughout every layer of the storage engine — pager, catalog, B+ tree,
//! SQL front end, and executor.
//!
//! Errors are organised by the taxonomy the engine actually observes:
//! statement errors and conflict errors are recoverable and flow back to the
//! caller as `Result::Err`; programmer errors and I/O errors are treated as
//! fatal (the pager and B+ tree panic directly rather than returning one of
//! these, since by definition the engine's own invariants are broken) and so
//! are not represented here at all.
//!
//! A convenience [`Result<T>`] type alias is re-exported so that callers can
//! write `Result<T>` instead of `std::result::Result<T, EngineError>`.

use std::fmt;
use std::io;

/// The canonical error type for all Horizon Lite operations.
#[derive(Debug)]
pub enum EngineError {
    /// An I/O error originating from the filesystem.
    Io(io::Error),

    /// The on-disk database file is corrupt (bad magic, wrong version, a
    /// length that isn't a whole multiple of the page size).
    CorruptDatabase(String),

    /// The SQL text could not be parsed into a valid statement.
    InvalidSql(String),

    /// The referenced table does not exist in the catalog.
    TableNotFound(String),

    /// The referenced column does not exist in the active table's schema.
    ColumnNotFound(String),

    /// A table with the given name already exists.
    DuplicateTable(String),

    /// An INSERT collided with an existing primary key.
    DuplicateKey(i32),

    /// A statement requested something the engine does not support (e.g. a
    /// DELETE whose predicate isn't `col0 = literal`).
    Unsupported(String),

    /// A catalog or schema resource limit was exceeded (too many tables, too
    /// many columns, a value too wide for its column).
    ResourceExhausted(String),

    /// No table is currently selected for a statement that requires one.
    NoActiveTable,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Io(err) => write!(f, "I/O error: {err}"),
            EngineError::CorruptDatabase(msg) => write!(f, "corrupt database: {msg}"),
            EngineError::InvalidSql(msg) => write!(f, "invalid SQL: {msg}"),
            EngineError::TableNotFound(name) => write!(f, "table not found: {name}"),
            EngineError::ColumnNotFound(name) => write!(f, "column not found: {name}"),
            EngineError::DuplicateTable(name) => write!(f, "table already exists: {name}"),
            EngineError::DuplicateKey(key) => write!(f, "duplicate key: {key}"),
            EngineError::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            EngineError::ResourceExhausted(msg) => write!(f, "resource exhausted: {msg}"),
            EngineError::NoActiveTable => write!(f, "no active table"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        EngineError::Io(err)
    }
}

/// A specialised [`Result`] type for Horizon Lite operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts_via_from() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let err: EngineError = EngineError::from(io_err);
        assert!(matches!(err, EngineError::Io(_)));
        assert!(err.to_string().contains("file missing"));
    }

    #[test]
    fn io_error_converts_via_question_mark() {
        fn might_fail() -> Result<()> {
            let _f = std::fs::File::open("/non/existent/path/horizon_lite_test")?;
            Ok(())
        }
        assert!(matches!(might_fail().unwrap_err(), EngineError::Io(_)));
    }

    #[test]
    fn display_messages_are_human_readable() {
        let cases: Vec<(EngineError, &str)> = vec![
            (
                EngineError::CorruptDatabase("bad magic".into()),
                "corrupt database: bad magic",
            ),
            (
                EngineError::InvalidSql("unexpected token".into()),
                "invalid SQL: unexpected token",
            ),
            (EngineError::TableNotFound("users".into()), "table not found: users"),
            (EngineError::ColumnNotFound("email".into()), "column not found: email"),
            (
                EngineError::DuplicateTable("users".into()),
                "table already exists: users",
            ),
            (EngineError::DuplicateKey(7), "duplicate key: 7"),
            (
                EngineError::Unsupported("non-PK delete".into()),
                "unsupported: non-PK delete",
            ),
            (
                EngineError::ResourceExhausted("too many tables".into()),
                "resource exhausted: too many tables",
            ),
            (EngineError::NoActiveTable, "no active table"),
        ];
        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn error_source_chains_io_errors_only() {
        use std::error::Error;
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        assert!(EngineError::Io(io_err).source().is_some());
        assert!(EngineError::NoActiveTable.source().is_none());
    }
}
