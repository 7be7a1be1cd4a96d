//! # Execution
//!
//! The predicate evaluator (§4.7) and statement executor (§4.6). A
//! [`Statement`](crate::sql::Statement) from the parser is run here against
//! the active connection's [`Catalog`] and [`Pager`] — there is no separate
//! planner stage: the only "plan choice" the engine makes is point-lookup
//! versus full scan, decided inline from the predicate tree's shape.

use log::debug;

use crate::btree::{self, TableHandle};
use crate::catalog::{row_get_value, serialize_row, Catalog, TableSchema, MAX_NAME_LEN};
use crate::error::{EngineError, Result};
use crate::pager::Pager;
use crate::sql::ast::*;
use crate::types::{ColumnType, Value};
use crate::{QueryResult, Row};

use std::cmp::Ordering;
use std::sync::Arc;

/// The table a connection is currently pointed at, rebuilt whenever a
/// statement names a table (`use`, `create table`, `insert into`, `select
/// ... from`, `delete from`) — mirroring the original single shared table
/// handle rather than threading one through every call (§3 "Table runtime
/// handle").
#[derive(Debug, Clone)]
pub struct ActiveTable {
    pub schema: TableSchema,
    pub handle: TableHandle,
}

/// The effect of executing one statement, returned to the connection layer.
#[derive(Debug)]
pub enum Outcome {
    /// `USE` / `CREATE TABLE` succeeded; no rows.
    Ack,
    Inserted,
    /// An `INSERT` collided with an existing key.
    DuplicateKey(i32),
    /// Number of rows actually removed (0 or 1 — only primary-key deletes
    /// are supported, per §4.6).
    Deleted(usize),
    Rows(QueryResult),
}

/// Run one parsed statement against `pager`/`catalog`, updating `active` as
/// a side effect whenever the statement names a table.
pub fn execute(
    stmt: &Statement,
    pager: &mut Pager,
    catalog: &mut Catalog,
    active: &mut Option<ActiveTable>,
) -> Result<Outcome> {
    match stmt {
        Statement::Use(name) => {
            *active = Some(switch_table(name, catalog)?);
            Ok(Outcome::Ack)
        }
        Statement::CreateTable(ct) => {
            let table = execute_create_table(ct, pager, catalog)?;
            *active = Some(table);
            Ok(Outcome::Ack)
        }
        Statement::Insert(ins) => execute_insert(ins, pager, catalog, active),
        Statement::Select(sel) => {
            let result = execute_select(sel, pager, catalog, active)?;
            Ok(Outcome::Rows(result))
        }
        Statement::Delete(del) => execute_delete(del, pager, catalog, active),
    }
}

fn switch_table(name: &str, catalog: &Catalog) -> Result<ActiveTable> {
    let idx = catalog.find(name).ok_or_else(|| EngineError::TableNotFound(name.to_string()))?;
    let schema = catalog.schema(idx).clone();
    let handle = TableHandle { root_page: catalog.root_page(idx), row_size: schema.row_size() };
    Ok(ActiveTable { schema, handle })
}

// ---------------------------------------------------------------------------
// CREATE TABLE
// ---------------------------------------------------------------------------

fn execute_create_table(ct: &CreateTableStmt, pager: &mut Pager, catalog: &mut Catalog) -> Result<ActiveTable> {
    if catalog.find(&ct.table).is_some() {
        return Err(EngineError::DuplicateTable(ct.table.clone()));
    }
    if ct.table.len() > MAX_NAME_LEN {
        return Err(EngineError::ResourceExhausted(format!(
            "table name '{}' exceeds {MAX_NAME_LEN} bytes",
            ct.table
        )));
    }
    if ct.columns.is_empty() {
        return Err(EngineError::InvalidSql("table must declare at least one column".into()));
    }

    let columns = ct
        .columns
        .iter()
        .map(|c| crate::catalog::ColumnDef { name: c.name.clone(), col_type: ColumnType::parse(&c.type_name) })
        .collect::<Vec<_>>();

    // Invariant 5 (§3): column 0 is always the B+Tree key and must be INT.
    // The original tutorial this is descended from never checked this at
    // DDL time and just let a non-INT key silently corrupt key ordering;
    // this port rejects it up front instead.
    if columns[0].col_type != ColumnType::Int {
        return Err(EngineError::InvalidSql("the first column of every table must be INT".into()));
    }

    let schema = TableSchema { name: ct.table.clone(), columns };
    let row_size = schema.row_size();

    let handle = btree::create_table(pager, row_size)?;
    catalog.add_table(pager, schema.clone(), handle.root_page)?;

    Ok(ActiveTable { schema, handle })
}

// ---------------------------------------------------------------------------
// INSERT
// ---------------------------------------------------------------------------

fn execute_insert(
    ins: &InsertStmt,
    pager: &mut Pager,
    catalog: &mut Catalog,
    active: &mut Option<ActiveTable>,
) -> Result<Outcome> {
    let table = switch_table(&ins.table, catalog)?;
    if table.schema.columns[0].col_type != ColumnType::Int {
        return Err(EngineError::Unsupported("table's key column is not INT".into()));
    }
    check_value_widths(&table.schema, &ins.values)?;

    let key: i32 = ins.values.first().map(|v| v.trim()).unwrap_or("").parse().unwrap_or(0);

    let mut row = vec![0u8; table.schema.row_size()];
    let values: Vec<&str> = ins.values.iter().map(String::as_str).collect();
    serialize_row(&table.schema, &values, &mut row);

    let result = btree::insert(pager, &table.handle, key as u32, &row);
    *active = Some(table);
    match result {
        Ok(()) => Ok(Outcome::Inserted),
        Err(EngineError::DuplicateKey(k)) => Ok(Outcome::DuplicateKey(k)),
        Err(e) => Err(e),
    }
}

/// Reject a `STRING` value that would not fit its column's fixed width
/// rather than silently truncating it (§7 "value overflow of per-string
/// size" is a statement-rejecting error, distinct from the row codec's own
/// forgiving behavior when called directly).
fn check_value_widths(schema: &TableSchema, values: &[String]) -> Result<()> {
    for (i, col) in schema.columns.iter().enumerate() {
        if let ColumnType::String(n) = col.col_type {
            if let Some(v) = values.get(i) {
                if v.len() > n {
                    return Err(EngineError::ResourceExhausted(format!(
                        "value for column '{}' is {} bytes, column width is {n}",
                        col.name,
                        v.len()
                    )));
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// DELETE
// ---------------------------------------------------------------------------

fn execute_delete(
    del: &DeleteStmt,
    pager: &mut Pager,
    catalog: &mut Catalog,
    active: &mut Option<ActiveTable>,
) -> Result<Outcome> {
    let table = switch_table(&del.table, catalog)?;

    let Some(filter) = &del.filter else {
        debug!("delete on {} has no predicate; only primary-key deletes are supported", del.table);
        *active = Some(table);
        return Ok(Outcome::Deleted(0));
    };
    let Some(key) = point_lookup_key(&table.schema, filter) else {
        debug!("delete predicate on {} is not col0 = literal; reporting no-op", del.table);
        *active = Some(table);
        return Ok(Outcome::Deleted(0));
    };

    let existed = btree::contains(pager, &table.handle, key)?;
    if existed {
        btree::delete(pager, &table.handle, key)?;
    }
    *active = Some(table);
    Ok(Outcome::Deleted(if existed { 1 } else { 0 }))
}

// ---------------------------------------------------------------------------
// SELECT
// ---------------------------------------------------------------------------

fn execute_select(
    sel: &SelectStmt,
    pager: &mut Pager,
    catalog: &mut Catalog,
    active: &mut Option<ActiveTable>,
) -> Result<QueryResult> {
    let table = switch_table(&sel.table, catalog)?;

    let proj_indices: Vec<usize> = match &sel.projection {
        Projection::All => (0..table.schema.columns.len()).collect(),
        Projection::Columns(names) => names
            .iter()
            .map(|n| table.schema.col_index(n).ok_or_else(|| EngineError::ColumnNotFound(n.clone())))
            .collect::<Result<Vec<_>>>()?,
    };
    if let Some(OrderBy { column, .. }) = &sel.order_by {
        table.schema.col_index(column).ok_or_else(|| EngineError::ColumnNotFound(column.clone()))?;
    }
    if let Some(filter) = &sel.filter {
        validate_expr_columns(&table.schema, filter)?;
    }

    let mut rows: Vec<Vec<u8>> = Vec::new();
    match sel.filter.as_ref().and_then(|f| point_lookup_key(&table.schema, f).map(|k| (f, k))) {
        Some((filter, key)) => {
            debug!("point lookup on {} for key {key}", sel.table);
            if btree::contains(pager, &table.handle, key)? {
                let cursor = btree::find(pager, &table.handle, key)?;
                let (_, row) = btree::cursor_value(pager, &table.handle, &cursor)?;
                if eval_bool(filter, &table.schema, row)? {
                    rows.push(row.to_vec());
                }
            }
        }
        None => {
            debug!("full scan on {}", sel.table);
            let mut cursor = btree::start(pager, &table.handle)?;
            while !cursor.end_of_table {
                let (_, row) = btree::cursor_value(pager, &table.handle, &cursor)?;
                let keep = match &sel.filter {
                    Some(f) => eval_bool(f, &table.schema, row)?,
                    None => true,
                };
                if keep {
                    rows.push(row.to_vec());
                }
                btree::cursor_advance(pager, &table.handle, &mut cursor)?;
            }
        }
    }

    if let Some(ob) = &sel.order_by {
        let idx = table.schema.col_index(&ob.column).expect("validated above");
        rows.sort_by(|a, b| {
            let ord = compare_column(&table.schema, idx, a, b);
            if ob.desc { ord.reverse() } else { ord }
        });
    }

    let offset = sel.offset.unwrap_or(0);
    let mut rows = if offset < rows.len() { rows.split_off(offset) } else { Vec::new() };
    if let Some(limit) = sel.limit {
        rows.truncate(limit);
    }

    let columns = Arc::new(proj_indices.iter().map(|&i| table.schema.columns[i].name.clone()).collect());
    let result_rows = rows
        .iter()
        .map(|r| Row {
            columns: columns.clone(),
            values: proj_indices.iter().map(|&i| row_get_value(&table.schema, r, i)).collect(),
        })
        .collect();

    *active = Some(table);
    Ok(QueryResult { columns, rows: result_rows })
}

fn validate_expr_columns(schema: &TableSchema, expr: &Expr) -> Result<()> {
    match expr {
        Expr::Column(name) => {
            schema.col_index(name).ok_or_else(|| EngineError::ColumnNotFound(name.clone()))?;
            Ok(())
        }
        Expr::Literal(_) => Ok(()),
        Expr::Binary(_, l, r) => {
            validate_expr_columns(schema, l)?;
            validate_expr_columns(schema, r)
        }
        Expr::Unary(_, inner) | Expr::IsNull(inner, _) => validate_expr_columns(schema, inner),
        Expr::Between(v, lo, hi) => {
            validate_expr_columns(schema, v)?;
            validate_expr_columns(schema, lo)?;
            validate_expr_columns(schema, hi)
        }
        Expr::In(v, items) => {
            validate_expr_columns(schema, v)?;
            for item in items {
                validate_expr_columns(schema, item)?;
            }
            Ok(())
        }
    }
}

/// Ordering used by `ORDER BY`: a column's own type decides numeric vs.
/// lexicographic, unlike predicate comparisons (§4.7) which infer it from
/// both operands.
fn compare_column(schema: &TableSchema, idx: usize, a: &[u8], b: &[u8]) -> Ordering {
    match row_get_value(schema, a, idx) {
        Value::Int(_) | Value::Timestamp(_) => {
            let av = numeric_of(&row_get_value(schema, a, idx)).unwrap_or(0);
            let bv = numeric_of(&row_get_value(schema, b, idx)).unwrap_or(0);
            av.cmp(&bv)
        }
        Value::Text(_) => {
            let av = row_get_value(schema, a, idx).to_string();
            let bv = row_get_value(schema, b, idx).to_string();
            av.cmp(&bv)
        }
    }
}

fn numeric_of(v: &Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(*i as i64),
        Value::Timestamp(t) => Some(*t),
        Value::Text(s) => s.trim().parse().ok(),
    }
}

/// The point-lookup key for a predicate whose root is (or whose leading AND
/// conjunct is) `col0 = literal` (§4.6, §9 Open Question — see
/// [`Expr::point_lookup_equality`]). The full predicate is still evaluated
/// against the fetched row afterward, so an AND's trailing clauses are never
/// skipped.
fn point_lookup_key(schema: &TableSchema, expr: &Expr) -> Option<u32> {
    let (col, literal) = expr.point_lookup_equality()?;
    if schema.col_index(col) != Some(0) {
        return None;
    }
    let v: i32 = literal.trim().parse().unwrap_or(0);
    Some(v as u32)
}

// ---------------------------------------------------------------------------
// Predicate evaluator (§4.7)
// ---------------------------------------------------------------------------

/// A comparison operand resolved from either a column or a literal. Carries
/// enough of its origin to decide numeric-vs-lexicographic comparison:
/// an `INT`/`TIMESTAMP` column always forces a numeric comparison; a
/// `STRING` column or a bare literal only does if the other side also
/// parses as an integer (§4.7).
enum Operand {
    IntLike(i64),
    Text(String),
}

fn eval_operand(expr: &Expr, schema: &TableSchema, row: &[u8]) -> Result<Operand> {
    match expr {
        Expr::Column(name) => {
            let idx = schema.col_index(name).ok_or_else(|| EngineError::ColumnNotFound(name.clone()))?;
            Ok(match row_get_value(schema, row, idx) {
                Value::Int(i) => Operand::IntLike(i as i64),
                Value::Timestamp(t) => Operand::IntLike(t),
                Value::Text(s) => Operand::Text(s),
            })
        }
        Expr::Literal(text) => Ok(Operand::Text(text.clone())),
        _ => Err(EngineError::InvalidSql("expected a column or literal operand".into())),
    }
}

fn operand_numeric(op: &Operand) -> Option<i64> {
    match op {
        Operand::IntLike(v) => Some(*v),
        Operand::Text(s) => s.trim().parse().ok(),
    }
}

fn operand_text(op: &Operand) -> String {
    match op {
        Operand::IntLike(v) => v.to_string(),
        Operand::Text(s) => s.clone(),
    }
}

fn operand_is_null(op: &Operand) -> bool {
    match op {
        Operand::IntLike(_) => false,
        Operand::Text(s) => s.trim().is_empty(),
    }
}

fn compare_operands(lhs: &Operand, rhs: &Operand) -> Ordering {
    let force_numeric = matches!(lhs, Operand::IntLike(_)) || matches!(rhs, Operand::IntLike(_));
    if force_numeric || (operand_numeric(lhs).is_some() && operand_numeric(rhs).is_some()) {
        if let (Some(a), Some(b)) = (operand_numeric(lhs), operand_numeric(rhs)) {
            return a.cmp(&b);
        }
    }
    operand_text(lhs).cmp(&operand_text(rhs))
}

/// Evaluate a predicate tree against one row. Always produces a boolean —
/// there is no exceptional path (§4.7, §8 "evaluation is total").
fn eval_bool(expr: &Expr, schema: &TableSchema, row: &[u8]) -> Result<bool> {
    match expr {
        Expr::Binary(BinaryOp::And, l, r) => Ok(eval_bool(l, schema, row)? && eval_bool(r, schema, row)?),
        Expr::Binary(BinaryOp::Or, l, r) => Ok(eval_bool(l, schema, row)? || eval_bool(r, schema, row)?),
        Expr::Binary(op, l, r) => {
            let lv = eval_operand(l, schema, row)?;
            let rv = eval_operand(r, schema, row)?;
            let ord = compare_operands(&lv, &rv);
            Ok(match op {
                BinaryOp::Eq => ord == Ordering::Equal,
                BinaryOp::Ne => ord != Ordering::Equal,
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                BinaryOp::Ge => ord != Ordering::Less,
                BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
            })
        }
        Expr::Unary(UnaryOp::Not, inner) => Ok(!eval_bool(inner, schema, row)?),
        Expr::Between(v, lo, hi) => {
            let vv = eval_operand(v, schema, row)?;
            let lov = eval_operand(lo, schema, row)?;
            let hiv = eval_operand(hi, schema, row)?;
            Ok(compare_operands(&vv, &lov) != Ordering::Less && compare_operands(&vv, &hiv) != Ordering::Greater)
        }
        Expr::IsNull(inner, negated) => {
            let v = eval_operand(inner, schema, row)?;
            let is_null = operand_is_null(&v);
            Ok(is_null != *negated)
        }
        Expr::In(v, items) => {
            let vv = eval_operand(v, schema, row)?;
            for item in items {
                let iv = eval_operand(item, schema, row)?;
                if compare_operands(&vv, &iv) == Ordering::Equal {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Expr::Column(_) | Expr::Literal(_) => {
            let v = eval_operand(expr, schema, row)?;
            Ok(match v {
                Operand::IntLike(i) => i != 0,
                Operand::Text(s) => !s.trim().is_empty(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDef;

    fn schema() -> TableSchema {
        TableSchema {
            name: "t1".into(),
            columns: vec![
                ColumnDef { name: "id".into(), col_type: ColumnType::Int },
                ColumnDef { name: "name".into(), col_type: ColumnType::String(16) },
                ColumnDef { name: "age".into(), col_type: ColumnType::Int },
            ],
        }
    }

    fn row(schema: &TableSchema, id: i32, name: &str, age: i32) -> Vec<u8> {
        let mut buf = vec![0u8; schema.row_size()];
        serialize_row(schema, &[&id.to_string(), name, &age.to_string()], &mut buf);
        buf
    }

    fn col(name: &str) -> Box<Expr> {
        Box::new(Expr::Column(name.to_string()))
    }
    fn lit(text: &str) -> Box<Expr> {
        Box::new(Expr::Literal(text.to_string()))
    }

    #[test]
    fn numeric_comparison_on_int_column() {
        let schema = schema();
        let r = row(&schema, 5, "bob", 30);
        let expr = Expr::Binary(BinaryOp::Gt, col("age"), lit("18"));
        assert!(eval_bool(&expr, &schema, &r).unwrap());
    }

    #[test]
    fn lexicographic_comparison_on_string_column() {
        let schema = schema();
        let r = row(&schema, 5, "bob", 30);
        let expr = Expr::Binary(BinaryOp::Lt, col("name"), lit("carl"));
        assert!(eval_bool(&expr, &schema, &r).unwrap());
    }

    #[test]
    fn and_short_circuits_and_both_sides_matter() {
        let schema = schema();
        let r = row(&schema, 5, "bob", 30);
        let expr = Expr::Binary(
            BinaryOp::And,
            Box::new(Expr::Binary(BinaryOp::Eq, col("id"), lit("5"))),
            Box::new(Expr::Binary(BinaryOp::Eq, col("name"), lit("carl"))),
        );
        assert!(!eval_bool(&expr, &schema, &r).unwrap());
    }

    #[test]
    fn between_is_inclusive() {
        let schema = schema();
        let r = row(&schema, 5, "bob", 30);
        let expr = Expr::Between(col("age"), lit("30"), lit("40"));
        assert!(eval_bool(&expr, &schema, &r).unwrap());
    }

    #[test]
    fn is_null_true_for_empty_string_column() {
        let schema = schema();
        let r = row(&schema, 5, "", 30);
        let expr = Expr::IsNull(col("name"), false);
        assert!(eval_bool(&expr, &schema, &r).unwrap());
    }

    #[test]
    fn is_not_null_false_for_empty_string_column() {
        let schema = schema();
        let r = row(&schema, 5, "", 30);
        let expr = Expr::IsNull(col("name"), true);
        assert!(!eval_bool(&expr, &schema, &r).unwrap());
    }

    #[test]
    fn in_list_matches_any_member() {
        let schema = schema();
        let r = row(&schema, 5, "bob", 30);
        let expr = Expr::In(col("age"), vec![*lit("10"), *lit("30"), *lit("50")]);
        assert!(eval_bool(&expr, &schema, &r).unwrap());
    }

    #[test]
    fn unknown_column_in_predicate_is_an_error() {
        let schema = schema();
        let r = row(&schema, 5, "bob", 30);
        let expr = Expr::Binary(BinaryOp::Eq, col("nope"), lit("1"));
        assert!(eval_bool(&expr, &schema, &r).is_err());
    }

    #[test]
    fn point_lookup_key_requires_first_column() {
        let schema = schema();
        let eligible = Expr::Binary(BinaryOp::Eq, col("id"), lit("7"));
        assert_eq!(point_lookup_key(&schema, &eligible), Some(7));

        let not_eligible = Expr::Binary(BinaryOp::Eq, col("age"), lit("7"));
        assert_eq!(point_lookup_key(&schema, &not_eligible), None);
    }
}
