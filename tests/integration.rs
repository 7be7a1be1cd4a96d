use horizon::{Database, EngineError, ExecResult, Value};
use tempfile::TempDir;

fn open_db() -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path().join("test.hdb")).unwrap();
    (dir, db)
}

fn create_t1(db: &mut Database) {
    db.execute("create table t1(id int, name string, age int)").unwrap();
}

/// A table with a wide enough row (four default-width `STRING` columns, ~1KB
/// total) that only 3 cells fit per leaf — small enough to force a
/// multi-level tree after a handful of inserts (mirrors spec.md §8 scenario
/// 4's `INTERNAL_NODE_MAX_KEYS=3`, "leaves sized so each holds ≤ 3 cells").
fn create_wide(db: &mut Database) {
    db.execute("create table wide(id int, a string, b string, c string, d string)").unwrap();
}

fn insert_wide(db: &mut Database, id: i32) {
    db.execute(&format!("insert into wide {id} a{id} b{id} c{id} d{id}")).unwrap();
}

#[test]
fn point_lookup_after_insert_returns_the_row() {
    let (_dir, mut db) = open_db();
    create_t1(&mut db);
    db.execute("insert into t1 1 alice 30").unwrap();
    db.execute("insert into t1 2 bob 25").unwrap();

    let result = db.query("select * from t1 where id=1").unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.rows[0].get("name"), Some(&Value::Text("alice".to_string())));
    assert_eq!(result.rows[0].get("age"), Some(&Value::Int(30)));
}

#[test]
fn duplicate_key_is_reported_without_corrupting_the_table() {
    let (_dir, mut db) = open_db();
    create_t1(&mut db);
    db.execute("insert into t1 1 alice 30").unwrap();
    match db.execute("insert into t1 1 eve 99").unwrap() {
        ExecResult::DuplicateKey(1) => {}
        other => panic!("expected DuplicateKey(1), got {other:?}"),
    }

    let result = db.query("select * from t1").unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.rows[0].get("name"), Some(&Value::Text("alice".to_string())));
}

#[test]
fn full_scan_returns_rows_in_ascending_key_order() {
    let (_dir, mut db) = open_db();
    create_t1(&mut db);
    for id in [5, 1, 4, 2, 3] {
        db.execute(&format!("insert into t1 {id} name{id} {id}")).unwrap();
    }

    let result = db.query("select * from t1").unwrap();
    let ids: Vec<i32> = result.rows.iter().map(|r| r.get("id").unwrap().as_int().unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[test]
fn insert_enough_keys_to_force_a_multi_level_tree() {
    let (_dir, mut db) = open_db();
    create_wide(&mut db);
    for id in 1..=15 {
        insert_wide(&mut db, id);
    }

    let result = db.query("select * from wide").unwrap();
    let ids: Vec<i32> = result.rows.iter().map(|r| r.get("id").unwrap().as_int().unwrap()).collect();
    assert_eq!(ids, (1..=15).collect::<Vec<_>>());

    let tree = horizon::btree::dump_tree(db.pager_mut(), &db.active_table().unwrap().handle).unwrap();
    assert!(tree.to_lowercase().contains("internal"), "expected at least one internal node, got:\n{tree}");
}

#[test]
fn delete_by_primary_key_removes_exactly_that_row() {
    let (_dir, mut db) = open_db();
    create_t1(&mut db);
    for id in 1..=5 {
        db.execute(&format!("insert into t1 {id} name{id} {id}")).unwrap();
    }

    match db.execute("delete from t1 where id=2").unwrap() {
        ExecResult::Deleted(1) => {}
        other => panic!("expected Deleted(1), got {other:?}"),
    }

    let result = db.query("select * from t1").unwrap();
    let ids: Vec<i32> = result.rows.iter().map(|r| r.get("id").unwrap().as_int().unwrap()).collect();
    assert_eq!(ids, vec![1, 3, 4, 5]);
}

#[test]
fn deleting_every_key_in_a_leaf_exercises_underflow_handling() {
    let (_dir, mut db) = open_db();
    create_wide(&mut db);
    for id in 1..=15 {
        insert_wide(&mut db, id);
    }
    for id in 1..=15 {
        db.execute(&format!("delete from wide where id={id}")).unwrap();
    }

    let result = db.query("select * from wide").unwrap();
    assert!(result.is_empty());
}

#[test]
fn delete_of_absent_key_is_a_no_op() {
    let (_dir, mut db) = open_db();
    create_t1(&mut db);
    db.execute("insert into t1 1 alice 30").unwrap();

    match db.execute("delete from t1 where id=999").unwrap() {
        ExecResult::Deleted(0) => {}
        other => panic!("expected Deleted(0), got {other:?}"),
    }
    assert_eq!(db.query("select * from t1").unwrap().len(), 1);
}

#[test]
fn data_survives_a_close_and_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.hdb");

    {
        let mut db = Database::open(&path).unwrap();
        create_t1(&mut db);
        db.execute("insert into t1 1 alice 30").unwrap();
        db.execute("insert into t1 2 bob 25").unwrap();
        db.close().unwrap();
    }

    let mut db = Database::open(&path).unwrap();
    let result = db.query("select * from t1").unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result.rows[0].get("name"), Some(&Value::Text("alice".to_string())));
}

#[test]
fn select_with_projection_order_by_and_limit() {
    let (_dir, mut db) = open_db();
    create_t1(&mut db);
    for (id, name, age) in [(1, "carl", 40), (2, "alice", 30), (3, "bob", 20)] {
        db.execute(&format!("insert into t1 {id} {name} {age}")).unwrap();
    }

    let result = db.query("select name, age from t1 order by age desc limit 2").unwrap();
    assert_eq!(result.columns.as_ref(), &vec!["name".to_string(), "age".to_string()]);
    let names: Vec<&str> = result.rows.iter().map(|r| r.get("name").unwrap().as_text().unwrap()).collect();
    assert_eq!(names, vec!["carl", "alice"]);
}

#[test]
fn order_by_desc_is_stable_for_ties() {
    let (_dir, mut db) = open_db();
    create_t1(&mut db);
    // Ascending scan order by id is 1..=4; all share the same age, so a
    // stable descending sort must preserve that relative order rather than
    // reversing it.
    for (id, name) in [(1, "carl"), (2, "alice"), (3, "dave"), (4, "bob")] {
        db.execute(&format!("insert into t1 {id} {name} 30")).unwrap();
    }

    let result = db.query("select name from t1 order by age desc").unwrap();
    let names: Vec<&str> = result.rows.iter().map(|r| r.get("name").unwrap().as_text().unwrap()).collect();
    assert_eq!(names, vec!["carl", "alice", "dave", "bob"]);
}

#[test]
fn select_with_offset_skips_leading_rows() {
    let (_dir, mut db) = open_db();
    create_t1(&mut db);
    for id in 1..=5 {
        db.execute(&format!("insert into t1 {id} name{id} {id}")).unwrap();
    }

    let result = db.query("select * from t1 order by id offset 3").unwrap();
    let ids: Vec<i32> = result.rows.iter().map(|r| r.get("id").unwrap().as_int().unwrap()).collect();
    assert_eq!(ids, vec![4, 5]);
}

#[test]
fn predicate_between_and_in_and_not() {
    let (_dir, mut db) = open_db();
    create_t1(&mut db);
    for id in 1..=10 {
        db.execute(&format!("insert into t1 {id} name{id} {id}")).unwrap();
    }

    let between = db.query("select * from t1 where age between 3 and 5").unwrap();
    assert_eq!(between.len(), 3);

    let in_list = db.query("select * from t1 where age in (1, 5, 9)").unwrap();
    assert_eq!(in_list.len(), 3);

    let not_eq = db.query("select * from t1 where not age=5").unwrap();
    assert_eq!(not_eq.len(), 9);
}

#[test]
fn is_null_matches_empty_string_columns() {
    let (_dir, mut db) = open_db();
    create_t1(&mut db);
    db.execute("insert into t1 1 '' 30").unwrap();
    db.execute("insert into t1 2 bob 25").unwrap();

    let result = db.query("select * from t1 where name is null").unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.rows[0].get("id"), Some(&Value::Int(1)));
}

#[test]
fn and_after_point_lookup_still_filters_the_row() {
    let (_dir, mut db) = open_db();
    create_t1(&mut db);
    db.execute("insert into t1 1 alice 30").unwrap();

    // Point-lookup eligible (leading conjunct is col0 = literal), but the
    // trailing clause should still rule the row out.
    let result = db.query("select * from t1 where id=1 and name=bob").unwrap();
    assert!(result.is_empty());

    let result = db.query("select * from t1 where id=1 and name=alice").unwrap();
    assert_eq!(result.len(), 1);
}

#[test]
fn duplicate_table_name_is_rejected() {
    let (_dir, mut db) = open_db();
    create_t1(&mut db);
    let err = db.execute("create table t1(id int)").unwrap_err();
    assert!(matches!(err, EngineError::DuplicateTable(_)));
}

#[test]
fn non_int_first_column_is_rejected_at_create_time() {
    let (_dir, mut db) = open_db();
    let err = db.execute("create table bad(name string, id int)").unwrap_err();
    assert!(matches!(err, EngineError::InvalidSql(_)));
}

#[test]
fn oversized_string_value_is_rejected() {
    let (_dir, mut db) = open_db();
    db.execute("create table t2(id int, tag string)").unwrap();
    // tag's default width is 255; this is far over that.
    let huge = "x".repeat(300);
    let err = db.execute(&format!("insert into t2 1 {huge}")).unwrap_err();
    assert!(matches!(err, EngineError::ResourceExhausted(_)));
}

#[test]
fn selecting_an_unknown_table_is_a_table_not_found_error() {
    let (_dir, mut db) = open_db();
    let err = db.query("select * from ghosts").unwrap_err();
    assert!(matches!(err, EngineError::TableNotFound(_)));
}

#[test]
fn use_switches_the_active_table_for_meta_commands() {
    let (_dir, mut db) = open_db();
    create_t1(&mut db);
    db.execute("create table t2(id int, val string)").unwrap();

    db.execute("use t1").unwrap();
    assert_eq!(db.active_table_name(), Some("t1"));

    db.execute("use t2").unwrap();
    assert_eq!(db.active_table_name(), Some("t2"));
}

#[test]
fn constants_reflect_the_tables_row_size() {
    let (_dir, mut db) = open_db();
    create_t1(&mut db);
    let row_size = db.active_table().unwrap().handle.row_size;
    let c = horizon::btree::constants(row_size);
    assert_eq!(c.row_size, 4 + 255 + 4);
    assert!(c.leaf_max_cells > 0);
}
