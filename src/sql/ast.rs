//! Parsed statement and predicate tree shapes (§4.7, §6.3).
//!
//! The executor never sees raw SQL text — it only ever consumes one of
//! these. The parser owns the predicate tree until the executor takes it;
//! in this Rust port ownership transfer is just a move, so there is no
//! separate "free" step (§9 "Predicate tree lifetime").

/// A column definition inside `CREATE TABLE`, before widths are resolved —
/// `STRING` columns take their default width (255) at this stage (§4.6).
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDecl {
    pub name: String,
    pub type_name: String,
}

/// What to project out of a `SELECT`.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    All,
    Columns(Vec<String>),
}

/// An `ORDER BY` clause: column name plus direction.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub desc: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStmt {
    pub table: String,
    pub projection: Projection,
    pub filter: Option<Expr>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStmt {
    pub table: String,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStmt {
    pub table: String,
    pub columns: Vec<ColumnDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStmt {
    pub table: String,
    pub values: Vec<String>,
}

/// The statement kinds the executor understands (§6.3 `ParsedStmt.kind`).
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Use(String),
    CreateTable(CreateTableStmt),
    Insert(InsertStmt),
    Select(SelectStmt),
    Delete(DeleteStmt),
}

/// A predicate tree node (§4.7). Evaluation is total: every node kind
/// always produces a boolean (or, for comparison operands, a value),
/// never an exception.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    /// A literal's raw text; numeric-vs-string interpretation is decided
    /// at evaluation time based on the other comparison operand (§4.7).
    Literal(String),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    /// `value BETWEEN low AND high`.
    Between(Box<Expr>, Box<Expr>, Box<Expr>),
    /// `expr IS [NOT] NULL`.
    IsNull(Box<Expr>, bool),
    /// `expr IN (list...)`.
    In(Box<Expr>, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
}

impl Expr {
    /// True if this expression is `col = literal` or `literal = col`
    /// (§4.6 point-lookup eligibility).
    pub fn as_equality(&self) -> Option<(&str, &str)> {
        match self {
            Expr::Binary(BinaryOp::Eq, lhs, rhs) => match (lhs.as_ref(), rhs.as_ref()) {
                (Expr::Column(c), Expr::Literal(v)) => Some((c.as_str(), v.as_str())),
                (Expr::Literal(v), Expr::Column(c)) => Some((c.as_str(), v.as_str())),
                _ => None,
            },
            _ => None,
        }
    }

    /// The root's point-lookup column/literal, even if the root is an AND
    /// of that equality with further clauses (§4.6, §9 Open Question: the
    /// source point-looks up on a conjunction's leading equality and still
    /// evaluates the whole predicate afterward; this port preserves that).
    pub fn point_lookup_equality(&self) -> Option<(&str, &str)> {
        match self {
            Expr::Binary(BinaryOp::And, lhs, _) => lhs.as_equality().or_else(|| self.as_equality()),
            _ => self.as_equality(),
        }
    }
}
