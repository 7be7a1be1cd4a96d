//! # Catalog & schema/row codec
//!
//! Page 0 of the database file is the catalog: a fixed [`CatalogHeader`]
//! followed by up to [`CATALOG_MAX_TABLES`] packed [`CatalogEntry`] records
//! mapping a table name to its B+Tree root page and a schema slot. The
//! schemas themselves (column names, types, widths) are kept in the
//! connection's in-memory schema table and persisted as a newline-delimited
//! text blob in a dedicated run of pages, whose location is recorded in the
//! header (§4.4, §6.1).
//!
//! This module also owns the dynamic row codec (§4.3): row width is a
//! runtime property of a table's schema, so every row (de)serialization
//! routine here takes a [`TableSchema`] rather than assuming a compile-time
//! layout (§9 "Dynamic row width").

use std::time::{SystemTime, UNIX_EPOCH};

use log::info;

use crate::error::{EngineError, Result};
use crate::pager::{PageId, Pager, INVALID_PAGE_NUM, PAGE_SIZE};
use crate::types::{ColumnType, Value};

/// Magic bytes identifying a Horizon Lite database file (`"DTB1"` read as a
/// little-endian u32, kept from the original format's `0x44544231`).
pub const DB_MAGIC: u32 = 0x4454_4231;

/// Current on-disk catalog version. Versions below 2 predate embedded
/// schemas and are not supported by this port.
pub const CATALOG_VERSION: u32 = 2;

/// Maximum number of tables the catalog's fixed entry array can hold.
pub const CATALOG_MAX_TABLES: usize = 32;

/// Maximum number of schemas the in-memory schema table can hold. Mirrors
/// the original's `MAX_TABLES`, kept distinct from [`CATALOG_MAX_TABLES`]
/// even though in practice the two always move together (one schema per
/// catalog entry).
pub const MAX_TABLES: usize = 32;

/// Maximum number of columns in a single table's schema.
pub const MAX_COLUMNS: usize = 100;

/// Maximum length, in bytes, of a table or column name (NUL-padded).
pub const MAX_NAME_LEN: usize = 32;

const HEADER_SIZE: usize = 28;
const ENTRY_SIZE: usize = MAX_NAME_LEN + 4 + 4;

// ---------------------------------------------------------------------------
// Catalog header / entries (page 0 layout)
// ---------------------------------------------------------------------------

/// In-memory mirror of the page-0 catalog header.
#[derive(Debug, Clone, Copy)]
struct CatalogHeader {
    magic: u32,
    version: u32,
    num_tables: u32,
    schemas_start_page: PageId,
    schemas_alloc_pages: u32,
    schemas_byte_len: u32,
    schemas_checksum: u32,
}

impl CatalogHeader {
    fn fresh() -> CatalogHeader {
        CatalogHeader {
            magic: DB_MAGIC,
            version: CATALOG_VERSION,
            num_tables: 0,
            schemas_start_page: INVALID_PAGE_NUM,
            schemas_alloc_pages: 0,
            schemas_byte_len: 0,
            schemas_checksum: 0,
        }
    }

    fn read(buf: &[u8]) -> CatalogHeader {
        CatalogHeader {
            magic: read_u32(buf, 0),
            version: read_u32(buf, 4),
            num_tables: read_u32(buf, 8),
            schemas_start_page: read_u32(buf, 12),
            schemas_alloc_pages: read_u32(buf, 16),
            schemas_byte_len: read_u32(buf, 20),
            schemas_checksum: read_u32(buf, 24),
        }
    }

    fn write(&self, buf: &mut [u8]) {
        write_u32(buf, 0, self.magic);
        write_u32(buf, 4, self.version);
        write_u32(buf, 8, self.num_tables);
        write_u32(buf, 12, self.schemas_start_page);
        write_u32(buf, 16, self.schemas_alloc_pages);
        write_u32(buf, 20, self.schemas_byte_len);
        write_u32(buf, 24, self.schemas_checksum);
    }
}

/// A single catalog directory entry: name → root page + schema slot.
#[derive(Debug, Clone)]
struct CatalogEntry {
    name: String,
    root_page_num: PageId,
    schema_index: u32,
}

fn read_entry(buf: &[u8], slot: usize) -> CatalogEntry {
    let off = HEADER_SIZE + slot * ENTRY_SIZE;
    let name = read_fixed_string(&buf[off..off + MAX_NAME_LEN]);
    let root_page_num = read_u32(buf, off + MAX_NAME_LEN);
    let schema_index = read_u32(buf, off + MAX_NAME_LEN + 4);
    CatalogEntry {
        name,
        root_page_num,
        schema_index,
    }
}

fn write_entry(buf: &mut [u8], slot: usize, entry: &CatalogEntry) {
    let off = HEADER_SIZE + slot * ENTRY_SIZE;
    write_fixed_string(&mut buf[off..off + MAX_NAME_LEN], &entry.name);
    write_u32(buf, off + MAX_NAME_LEN, entry.root_page_num);
    write_u32(buf, off + MAX_NAME_LEN + 4, entry.schema_index);
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// One column's name and type within a [`TableSchema`].
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub col_type: ColumnType,
}

/// A table's schema: ordered columns, the first of which must be `INT` and
/// serves as the B+Tree primary key (§3 invariant 5).
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Sum of every column's on-disk width — the row codec's row size.
    pub fn row_size(&self) -> usize {
        self.columns.iter().map(|c| c.col_type.width()).sum()
    }

    /// Linear scan for a column by name (case-insensitive).
    pub fn col_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Byte offset within a row where column `i` begins: the prefix sum of
    /// every earlier column's width.
    pub fn col_offset(&self, i: usize) -> usize {
        self.columns[..i].iter().map(|c| c.col_type.width()).sum()
    }
}

// ---------------------------------------------------------------------------
// Row codec (dynamic — schema-driven)
// ---------------------------------------------------------------------------

/// Serialize textual column values into `dest` (which must be at least
/// `schema.row_size()` bytes) according to `schema`'s column types.
///
/// Fewer `values` than columns is legal: missing trailing values are
/// treated as empty strings, which for INT becomes `0` and for TIMESTAMP
/// becomes "now" (§4.3).
pub fn serialize_row(schema: &TableSchema, values: &[&str], dest: &mut [u8]) {
    let mut offset = 0;
    for (i, col) in schema.columns.iter().enumerate() {
        let text = values.get(i).copied().unwrap_or("");
        let width = col.col_type.width();
        let slot = &mut dest[offset..offset + width];
        match col.col_type {
            ColumnType::Int => {
                let v: i32 = text.trim().parse().unwrap_or(0);
                slot.copy_from_slice(&v.to_ne_bytes());
            }
            ColumnType::Timestamp => {
                let v: i64 = text.trim().parse().unwrap_or_else(|_| now_epoch_seconds());
                slot.copy_from_slice(&v.to_ne_bytes());
            }
            ColumnType::String(n) => {
                slot.fill(0);
                let bytes = text.as_bytes();
                let copy_len = bytes.len().min(n);
                slot[..copy_len].copy_from_slice(&bytes[..copy_len]);
            }
        }
        offset += width;
    }
}

fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub fn row_get_int(schema: &TableSchema, row: &[u8], col: usize) -> i32 {
    let off = schema.col_offset(col);
    i32::from_ne_bytes(row[off..off + 4].try_into().unwrap())
}

pub fn row_get_timestamp(schema: &TableSchema, row: &[u8], col: usize) -> i64 {
    let off = schema.col_offset(col);
    i64::from_ne_bytes(row[off..off + 8].try_into().unwrap())
}

pub fn row_get_string(schema: &TableSchema, row: &[u8], col: usize) -> String {
    let off = schema.col_offset(col);
    let width = schema.columns[col].col_type.width();
    read_fixed_string(&row[off..off + width])
}

/// Read a typed value out of a serialized row for column `col`.
pub fn row_get_value(schema: &TableSchema, row: &[u8], col: usize) -> Value {
    match schema.columns[col].col_type {
        ColumnType::Int => Value::Int(row_get_int(schema, row, col)),
        ColumnType::Timestamp => Value::Timestamp(row_get_timestamp(schema, row, col)),
        ColumnType::String(_) => Value::Text(row_get_string(schema, row, col)),
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// The in-memory catalog: the directory of tables plus every table's
/// schema, loaded from (and persisted to) page 0 and the schema blob.
///
/// Per §9 "Process-global schema table", this lives on the connection
/// rather than in module-level mutable state, so multiple `Catalog`s (one
/// per open database) can coexist in a single process.
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    schemas: Vec<TableSchema>,
    header: CatalogHeader,
}

impl Catalog {
    /// Initialize a brand-new catalog on page 0 of a freshly created file.
    pub fn init(pager: &mut Pager) -> Result<Catalog> {
        let header = CatalogHeader::fresh();
        let page = pager.get_page(0)?;
        page.fill(0);
        header.write(page);
        pager.flush(0)?;
        Ok(Catalog {
            entries: Vec::new(),
            schemas: Vec::new(),
            header,
        })
    }

    /// Load the catalog from an existing database file. Validates the
    /// magic and version on page 0 (a mismatch is a fatal corruption, per
    /// §3 invariant 2).
    pub fn load(pager: &mut Pager) -> Result<Catalog> {
        let page = pager.get_page(0)?;
        let header = CatalogHeader::read(page);
        if header.magic != DB_MAGIC {
            panic!("corrupt database: bad magic {:#x}", header.magic);
        }
        if header.version < CATALOG_VERSION {
            panic!("corrupt database: unsupported catalog version {}", header.version);
        }

        let mut entries = Vec::with_capacity(header.num_tables as usize);
        {
            let page = pager.get_page(0)?;
            for slot in 0..header.num_tables as usize {
                entries.push(read_entry(page, slot));
            }
        }

        let schemas = if header.schemas_start_page != INVALID_PAGE_NUM && header.schemas_byte_len > 0 {
            load_schema_blob(pager, header.schemas_start_page, header.schemas_byte_len)?
        } else {
            Vec::new()
        };

        Ok(Catalog { entries, schemas, header })
    }

    /// Look up a table's catalog entry index by name.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name.eq_ignore_ascii_case(name))
    }

    pub fn root_page(&self, idx: usize) -> PageId {
        self.entries[idx].root_page_num
    }

    pub fn schema(&self, idx: usize) -> &TableSchema {
        &self.schemas[self.entries[idx].schema_index as usize]
    }

    /// Register a new table: append a catalog entry and its schema, then
    /// persist both following the durability protocol in §5: page 0 is
    /// flushed with the new entry *before* the schema blob is (re)written,
    /// and the header's schema-pointer fields are updated and flushed last.
    pub fn add_table(&mut self, pager: &mut Pager, schema: TableSchema, root_page: PageId) -> Result<()> {
        if self.header.num_tables as usize >= CATALOG_MAX_TABLES {
            return Err(EngineError::ResourceExhausted(format!(
                "catalog is full (max {CATALOG_MAX_TABLES} tables)"
            )));
        }
        if self.schemas.len() >= MAX_TABLES {
            return Err(EngineError::ResourceExhausted(format!(
                "schema table is full (max {MAX_TABLES} tables)"
            )));
        }
        if schema.columns.len() > MAX_COLUMNS {
            return Err(EngineError::ResourceExhausted(format!(
                "table {} has too many columns (max {MAX_COLUMNS})",
                schema.name
            )));
        }

        let schema_index = self.schemas.len() as u32;
        let entry = CatalogEntry {
            name: schema.name.clone(),
            root_page_num: root_page,
            schema_index,
        };

        let slot = self.entries.len();
        self.entries.push(entry.clone());
        self.schemas.push(schema);
        self.header.num_tables += 1;

        // Step 1: write the new entry into page 0 and flush it.
        {
            let page = pager.get_page(0)?;
            self.header.write(page);
            write_entry(page, slot, &entry);
        }
        pager.flush(0)?;

        // Step 2: rewrite the schema blob (not yet referenced by the header).
        self.save_schemas(pager)?;

        info!("registered table '{}' at root page {}", entry.name, root_page);
        Ok(())
    }

    /// Serialize every known schema and write it to a run of pages,
    /// reusing the existing allocation in place if it is large enough,
    /// otherwise appending a fresh run (§4.4). Updates and flushes the
    /// header last, so readers never observe a pointer to a half-written
    /// blob.
    fn save_schemas(&mut self, pager: &mut Pager) -> Result<()> {
        let blob = serialize_schemas(&self.schemas);
        let bytes = blob.len() as u32;
        let needed = ((bytes as usize + PAGE_SIZE - 1) / PAGE_SIZE) as u32;

        let start = if self.header.schemas_start_page != INVALID_PAGE_NUM
            && needed <= self.header.schemas_alloc_pages
        {
            self.header.schemas_start_page
        } else {
            pager.unused_page_num()
        };

        for i in 0..needed {
            let page = pager.get_page(start + i)?;
            page.fill(0);
            let off = i as usize * PAGE_SIZE;
            let remaining = blob.len().saturating_sub(off);
            let take = remaining.min(PAGE_SIZE);
            if take > 0 {
                page[..take].copy_from_slice(&blob.as_bytes()[off..off + take]);
            }
            pager.flush(start + i)?;
        }

        self.header.schemas_start_page = start;
        self.header.schemas_alloc_pages = needed;
        self.header.schemas_byte_len = bytes;
        self.header.version = CATALOG_VERSION;

        let page = pager.get_page(0)?;
        self.header.write(page);
        pager.flush(0)?;
        Ok(())
    }
}

/// Serialize every schema to the newline-delimited text format in §6.1.
fn serialize_schemas(schemas: &[TableSchema]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", schemas.len()));
    for schema in schemas {
        out.push_str(&format!("{}\n", schema.name));
        out.push_str(&format!("{}\n", schema.columns.len()));
        for col in &schema.columns {
            let (tag, size) = (col.col_type.tag(), col.col_type.width());
            out.push_str(&format!("{}\t{}\t{}\n", col.name, tag, size));
        }
    }
    out
}

fn load_schema_blob(pager: &mut Pager, start: PageId, byte_len: u32) -> Result<Vec<TableSchema>> {
    let pages_needed = ((byte_len as usize + PAGE_SIZE - 1) / PAGE_SIZE) as u32;
    let mut bytes = Vec::with_capacity(byte_len as usize);
    for i in 0..pages_needed {
        let page = pager.get_page(start + i)?;
        let remaining = byte_len as usize - bytes.len();
        let take = remaining.min(PAGE_SIZE);
        bytes.extend_from_slice(&page[..take]);
    }
    let text = String::from_utf8_lossy(&bytes);
    Ok(parse_schemas(&text))
}

/// Parse the newline-delimited schema blob format (§6.1).
fn parse_schemas(text: &str) -> Vec<TableSchema> {
    let mut lines = text.lines();
    let num_tables: usize = lines.next().and_then(|l| l.trim().parse().ok()).unwrap_or(0);
    let mut schemas = Vec::with_capacity(num_tables);
    for _ in 0..num_tables {
        let Some(name) = lines.next() else { break };
        let Some(num_cols) = lines.next().and_then(|l| l.trim().parse::<usize>().ok()) else {
            break;
        };
        let mut columns = Vec::with_capacity(num_cols);
        for _ in 0..num_cols {
            let Some(line) = lines.next() else { break };
            let mut parts = line.split('\t');
            let col_name = parts.next().unwrap_or("").to_string();
            let tag: u8 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            let size: usize = parts.next().and_then(|s| s.parse().ok()).unwrap_or(4);
            columns.push(ColumnDef {
                name: col_name,
                col_type: ColumnType::from_tag(tag, size),
            });
        }
        schemas.push(TableSchema {
            name: name.to_string(),
            columns,
        });
    }
    schemas
}

// ---------------------------------------------------------------------------
// Fixed-width byte helpers
// ---------------------------------------------------------------------------

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_ne_bytes(buf[off..off + 4].try_into().unwrap())
}

fn write_u32(buf: &mut [u8], off: usize, val: u32) {
    buf[off..off + 4].copy_from_slice(&val.to_ne_bytes());
}

fn read_fixed_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn write_fixed_string(buf: &mut [u8], s: &str) {
    buf.fill(0);
    let bytes = s.as_bytes();
    let len = bytes.len().min(buf.len());
    buf[..len].copy_from_slice(&bytes[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn schema(name: &str) -> TableSchema {
        TableSchema {
            name: name.to_string(),
            columns: vec![
                ColumnDef { name: "id".into(), col_type: ColumnType::Int },
                ColumnDef { name: "label".into(), col_type: ColumnType::String(16) },
            ],
        }
    }

    #[test]
    fn row_size_sums_column_widths() {
        assert_eq!(schema("t").row_size(), 4 + 16);
    }

    #[test]
    fn col_index_is_case_insensitive() {
        let s = schema("t");
        assert_eq!(s.col_index("ID"), Some(0));
        assert_eq!(s.col_index("label"), Some(1));
        assert_eq!(s.col_index("nope"), None);
    }

    #[test]
    fn row_round_trips() {
        let s = schema("t");
        let mut row = vec![0u8; s.row_size()];
        serialize_row(&s, &["42", "alice"], &mut row);
        assert_eq!(row_get_int(&s, &row, 0), 42);
        assert_eq!(row_get_string(&s, &row, 1), "alice");
    }

    #[test]
    fn missing_trailing_values_default_to_empty() {
        let s = schema("t");
        let mut row = vec![0u8; s.row_size()];
        serialize_row(&s, &["7"], &mut row);
        assert_eq!(row_get_int(&s, &row, 0), 7);
        assert_eq!(row_get_string(&s, &row, 1), "");
    }

    #[test]
    fn bad_int_literal_writes_zero() {
        let s = schema("t");
        let mut row = vec![0u8; s.row_size()];
        serialize_row(&s, &["not-a-number", "x"], &mut row);
        assert_eq!(row_get_int(&s, &row, 0), 0);
    }

    #[test]
    fn empty_timestamp_defaults_to_now() {
        let s = TableSchema {
            name: "t".into(),
            columns: vec![ColumnDef { name: "ts".into(), col_type: ColumnType::Timestamp }],
        };
        let mut row = vec![0u8; s.row_size()];
        serialize_row(&s, &[""], &mut row);
        let ts = row_get_timestamp(&s, &row, 0);
        assert!(ts > 0);
    }

    #[test]
    fn unparseable_timestamp_defaults_to_now() {
        let s = TableSchema {
            name: "t".into(),
            columns: vec![ColumnDef { name: "ts".into(), col_type: ColumnType::Timestamp }],
        };
        let mut row = vec![0u8; s.row_size()];
        serialize_row(&s, &["not-a-timestamp"], &mut row);
        let ts = row_get_timestamp(&s, &row, 0);
        assert!(ts > 0);
    }

    #[test]
    fn init_then_load_round_trips_empty_catalog() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let mut pager = Pager::open(tmp.path()).unwrap();
            Catalog::init(&mut pager).unwrap();
        }
        let mut pager = Pager::open(tmp.path()).unwrap();
        let cat = Catalog::load(&mut pager).unwrap();
        assert_eq!(cat.find("anything"), None);
    }

    #[test]
    fn add_table_persists_across_reopen() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let mut pager = Pager::open(tmp.path()).unwrap();
            let mut cat = Catalog::init(&mut pager).unwrap();
            cat.add_table(&mut pager, schema("widgets"), 1).unwrap();
        }
        let mut pager = Pager::open(tmp.path()).unwrap();
        let cat = Catalog::load(&mut pager).unwrap();
        let idx = cat.find("widgets").expect("table should be found");
        assert_eq!(cat.root_page(idx), 1);
        assert_eq!(cat.schema(idx), &schema("widgets"));
    }

    #[test]
    fn catalog_full_is_rejected() {
        let tmp = NamedTempFile::new().unwrap();
        let mut pager = Pager::open(tmp.path()).unwrap();
        let mut cat = Catalog::init(&mut pager).unwrap();
        for i in 0..CATALOG_MAX_TABLES {
            cat.add_table(&mut pager, schema(&format!("t{i}")), (i + 1) as u32).unwrap();
        }
        let err = cat.add_table(&mut pager, schema("overflow"), 999).unwrap_err();
        assert!(matches!(err, EngineError::ResourceExhausted(_)));
    }
}
