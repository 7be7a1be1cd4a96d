//! Core value and column-type representation for Horizon Lite.
//!
//! Every column is one of exactly three types (spec §3): a 4-byte signed
//! integer, a fixed-width zero-padded string, or an 8-byte epoch-second
//! timestamp. There is no NULL storage class distinct from these — a STRING
//! column is considered "null" when its trimmed value is empty (§4.7).

use std::fmt;

/// The declared type of a column, carrying its on-disk width.
///
/// `STRING` carries its own fixed width because it is the only variable-size
/// declaration in `CREATE TABLE`; `INT` and `TIMESTAMP` widths are fixed by
/// the format (4 and 8 bytes respectively) and are reproduced here only for
/// symmetry with [`ColumnType::width`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    String(usize),
    Timestamp,
}

impl ColumnType {
    /// Parse a `CREATE TABLE` type keyword.
    ///
    /// Per spec §4.3 / §9 Open Questions: unknown type names silently
    /// default to `INT` rather than being rejected. `size` is only
    /// meaningful for `STRING` columns (see [`ColumnType::for_string`]).
    pub fn parse(name: &str) -> ColumnType {
        match name.to_ascii_lowercase().as_str() {
            "string" => ColumnType::String(DEFAULT_STRING_WIDTH),
            "timestamp" => ColumnType::Timestamp,
            _ => ColumnType::Int,
        }
    }

    /// The on-disk width in bytes of a value of this type.
    pub fn width(&self) -> usize {
        match self {
            ColumnType::Int => 4,
            ColumnType::String(n) => *n,
            ColumnType::Timestamp => 8,
        }
    }

    pub fn tag(&self) -> u8 {
        match self {
            ColumnType::Int => 0,
            ColumnType::String(_) => 1,
            ColumnType::Timestamp => 2,
        }
    }

    pub fn from_tag(tag: u8, size: usize) -> ColumnType {
        match tag {
            1 => ColumnType::String(size),
            2 => ColumnType::Timestamp,
            _ => ColumnType::Int,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Int => write!(f, "int"),
            ColumnType::String(n) => write!(f, "string({n})"),
            ColumnType::Timestamp => write!(f, "timestamp"),
        }
    }
}

/// Default width for a `STRING` column declared without an explicit size
/// (spec §4.6: "each STRING column defaults to size 255").
pub const DEFAULT_STRING_WIDTH: usize = 255;

/// A runtime value extracted from or about to be written into a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Text(String),
    Timestamp(i64),
}

impl Value {
    /// Whether this value is considered NULL for `IS NULL` purposes.
    ///
    /// Only string values can be null (an empty trimmed value); integers and
    /// timestamps are never null (spec §4.7).
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Text(s) if s.is_empty())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Timestamp(t) => write!(f, "{t}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_name_defaults_to_int() {
        assert_eq!(ColumnType::parse("int"), ColumnType::Int);
        assert_eq!(ColumnType::parse("INT"), ColumnType::Int);
        assert_eq!(ColumnType::parse("string"), ColumnType::String(DEFAULT_STRING_WIDTH));
        assert_eq!(ColumnType::parse("timestamp"), ColumnType::Timestamp);
        assert_eq!(ColumnType::parse("nonsense"), ColumnType::Int);
    }

    #[test]
    fn widths_match_format() {
        assert_eq!(ColumnType::Int.width(), 4);
        assert_eq!(ColumnType::Timestamp.width(), 8);
        assert_eq!(ColumnType::String(32).width(), 32);
    }

    #[test]
    fn tag_round_trips() {
        for ct in [ColumnType::Int, ColumnType::String(16), ColumnType::Timestamp] {
            let round = ColumnType::from_tag(ct.tag(), ct.width());
            assert_eq!(ct, round);
        }
    }

    #[test]
    fn empty_string_is_null_others_are_not() {
        assert!(Value::Text(String::new()).is_null());
        assert!(!Value::Text("x".into()).is_null());
        assert!(!Value::Int(0).is_null());
        assert!(!Value::Timestamp(0).is_null());
    }
}
