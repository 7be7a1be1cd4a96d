//! # Horizon Lite
//!
//! An embeddable, single-file relational store: a B+Tree storage engine
//! keyed by each table's first (`INT`) column, a page-0 catalog with an
//! append-only schema blob, and a reduced SQL surface (`USE`, `CREATE
//! TABLE`, `INSERT INTO`, `SELECT`, `DELETE`) over it. There is no
//! concurrency control and no write-ahead log: one [`Database`] handle owns
//! its file exclusively and every statement is applied directly to the
//! paged file (§5).

pub mod catalog;
pub mod error;
pub mod execution;
pub mod pager;
pub mod sql;
pub mod types;

pub mod btree;

pub use error::{EngineError, Result};
pub use types::Value;
pub use pager::PageId;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use catalog::Catalog;
use execution::{ActiveTable, Outcome};
use pager::Pager;
use sql::parser::Parser;

/// A row returned from a query, alongside the column names it was
/// projected from.
#[derive(Debug, Clone)]
pub struct Row {
    pub columns: Arc<Vec<String>>,
    pub values: Vec<Value>,
}

impl Row {
    /// Get a value by column name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name)).map(|i| &self.values[i])
    }

    /// Get a value by column index.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

/// A `SELECT` result set.
#[derive(Debug)]
pub struct QueryResult {
    pub columns: Arc<Vec<String>>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl IntoIterator for QueryResult {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;
    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// The outcome of a non-`SELECT` statement.
#[derive(Debug)]
pub enum ExecResult {
    /// `USE` / `CREATE TABLE` succeeded.
    Ack,
    Inserted,
    /// `INSERT` collided with an existing primary key.
    DuplicateKey(i32),
    /// Rows actually removed by a `DELETE` (0 or 1 — only primary-key
    /// deletes are supported, §4.6).
    Deleted(usize),
}

/// A database connection: one open file, one pager, one catalog, and the
/// table a statement last named (§3 "Table runtime handle"). Single
/// connection, single thread — there is no internal locking (§5, §9
/// "Concurrency").
pub struct Database {
    path: PathBuf,
    pager: Pager,
    catalog: Catalog,
    active: Option<ActiveTable>,
}

impl Database {
    /// Open or create a database file at `path`. A brand-new (empty) file
    /// gets a fresh catalog written to page 0; an existing file has its
    /// catalog and schema blob loaded and validated (§4.4).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut pager = Pager::open(path)?;
        let catalog = if pager.num_pages() == 0 { Catalog::init(&mut pager)? } else { Catalog::load(&mut pager)? };

        Ok(Database { path: path.to_path_buf(), pager, catalog, active: None })
    }

    /// Execute a single non-`SELECT` statement (`USE`, `CREATE TABLE`,
    /// `INSERT INTO`, `DELETE`). Parses and runs only the first statement
    /// in `sql_text`.
    pub fn execute(&mut self, sql_text: &str) -> Result<ExecResult> {
        let stmt = Parser::parse(sql_text)?;
        match execution::execute(&stmt, &mut self.pager, &mut self.catalog, &mut self.active)? {
            Outcome::Ack => Ok(ExecResult::Ack),
            Outcome::Inserted => Ok(ExecResult::Inserted),
            Outcome::DuplicateKey(k) => Ok(ExecResult::DuplicateKey(k)),
            Outcome::Deleted(n) => Ok(ExecResult::Deleted(n)),
            Outcome::Rows(_) => Err(EngineError::Unsupported(
                "execute() does not return rows; use query() for SELECT".into(),
            )),
        }
    }

    /// Execute a `SELECT` statement and collect its result set.
    pub fn query(&mut self, sql_text: &str) -> Result<QueryResult> {
        let stmt = Parser::parse(sql_text)?;
        match execution::execute(&stmt, &mut self.pager, &mut self.catalog, &mut self.active)? {
            Outcome::Rows(result) => Ok(result),
            _ => Err(EngineError::Unsupported("query() requires a SELECT statement".into())),
        }
    }

    /// The currently active table's name, if any (§6.4 `.btree`/`.constants`
    /// meta-commands operate against this table).
    pub fn active_table_name(&self) -> Option<&str> {
        self.active.as_ref().map(|t| t.schema.name.as_str())
    }

    /// The active table's schema and B+Tree handle, if any. Exposed for the
    /// `.btree`/`.constants` REPL meta-commands (§6.4).
    pub fn active_table(&self) -> Option<&ActiveTable> {
        self.active.as_ref()
    }

    /// Direct pager access, for tools (like `.btree`) that need to walk the
    /// tree structure outside the normal statement-execution path.
    pub fn pager_mut(&mut self) -> &mut Pager {
        &mut self.pager
    }

    /// The file path this database was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the database, flushing any dirty pages.
    pub fn close(self) -> Result<()> {
        self.pager.close()
    }
}
