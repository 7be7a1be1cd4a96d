//! # Horizon Lite CLI
//!
//! The interactive REPL (spec.md §6.4, informative): a line-based prompt,
//! one statement per line, plus the `.exit`/`.btree`/`.constants`
//! meta-commands.

use std::env;
use std::io::{self, BufRead, Write};

use horizon::{btree, Database, ExecResult};

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: {} <database file>", args.first().map(String::as_str).unwrap_or("horizon"));
        std::process::exit(1);
    }
    let db_path = &args[1];

    let mut db = match Database::open(db_path) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("error opening database: {e}");
            std::process::exit(1);
        }
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("db > ");
        if stdout.flush().is_err() {
            break;
        }

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(_) => break,
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if input.starts_with('.') {
            if !handle_meta_command(input, &mut db) {
                break;
            }
            continue;
        }

        run_statement(&mut db, input);
    }

    if let Err(e) = db.close() {
        eprintln!("error closing database: {e}");
    }
}

/// Returns `false` when the REPL should terminate (`.exit`).
fn handle_meta_command(cmd: &str, db: &mut Database) -> bool {
    match cmd {
        ".exit" => false,
        ".btree" => {
            match db.active_table() {
                Some(table) => {
                    let handle = table.handle;
                    match btree::dump_tree(db.pager_mut(), &handle) {
                        Ok(text) => print!("{text}"),
                        Err(e) => eprintln!("error: {e}"),
                    }
                }
                None => eprintln!("error: no active table; run a USE or CREATE TABLE statement first"),
            }
            true
        }
        ".constants" => {
            match db.active_table() {
                Some(table) => {
                    let c = btree::constants(table.handle.row_size);
                    println!("ROW_SIZE: {}", c.row_size);
                    println!("LEAF_NODE_HEADER_SIZE: {}", c.leaf_header_size);
                    println!("LEAF_NODE_MAX_CELLS: {}", c.leaf_max_cells);
                    println!("INTERNAL_NODE_HEADER_SIZE: {}", c.internal_header_size);
                    println!("INTERNAL_NODE_MAX_KEYS: {}", c.internal_max_keys);
                }
                None => eprintln!("error: no active table; run a USE or CREATE TABLE statement first"),
            }
            true
        }
        _ => {
            eprintln!("unrecognized command '{cmd}'");
            true
        }
    }
}

fn run_statement(db: &mut Database, sql: &str) {
    let upper = sql.trim_start().to_ascii_uppercase();
    if upper.starts_with("SELECT") {
        match db.query(sql) {
            Ok(result) => print_rows(result),
            Err(e) => eprintln!("error: {e}"),
        }
        return;
    }

    match db.execute(sql) {
        Ok(ExecResult::Ack) => println!("Executed."),
        Ok(ExecResult::Inserted) => println!("Executed."),
        Ok(ExecResult::DuplicateKey(k)) => println!("Error: Duplicate key '{k}'."),
        Ok(ExecResult::Deleted(n)) => println!("Executed ({n} row(s) deleted)."),
        Err(e) => eprintln!("error: {e}"),
    }
}

fn print_rows(result: horizon::QueryResult) {
    if result.is_empty() {
        return;
    }
    println!("{}", result.columns.join("|"));
    for row in result {
        let vals: Vec<String> = row.values.iter().map(|v| v.to_string()).collect();
        println!("{}", vals.join("|"));
    }
}
