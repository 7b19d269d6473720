// Main entry point for the sqlforward CLI
// An interactive shell that forwards statements through a dispatcher to an
// in-memory store, one connection per shell session

use anyhow::Result;
use clap::Parser as ClapParser;
use sqlforward::{
    parse_statement, DataSource, DispatchConfig, Dispatcher, ExecutionOutcome, MemoryDataSource,
    Query, RequestContext, Row, Value,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Connection id used for the shell's single session
const SHELL_CONNECTION: u64 = 1;

/// sqlforward - statement dispatcher shell over an in-memory store
#[derive(ClapParser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON dispatcher configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Execute a single SQL statement and exit
    #[arg(short, long)]
    execute: Option<String>,

    /// Bind argument for --execute (repeatable, in placeholder order)
    #[arg(short, long = "arg")]
    args: Vec<String>,

    /// SQL script run directly against the store before the first statement
    #[arg(long)]
    init: Option<PathBuf>,

    /// Log filter, e.g. "info" or "sqlforward=debug"
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .compact()
        .init();

    let config = match &args.config {
        Some(path) => DispatchConfig::load(path)?,
        None => DispatchConfig::default(),
    };
    info!(?config, "starting sqlforward shell");

    let store = MemoryDataSource::new();
    if let Some(path) = &args.init {
        let script = std::fs::read_to_string(path)?;
        run_script(&store, &script)?;
    }
    let dispatcher = Dispatcher::with_config(Arc::new(store.clone()), config);

    // If a statement was provided, execute it and exit
    if let Some(sql) = args.execute {
        let binds = args.args.iter().map(|a| Value::from_literal(a)).collect();
        execute_statement(&dispatcher, &sql, binds)?;
        dispatcher.close()?;
        return Ok(());
    }

    println!("╔════════════════════════════════════════════╗");
    println!("║          sqlforward Interactive Shell       ║");
    println!("╚════════════════════════════════════════════╝");
    println!();
    println!("Type SQL statements or '.help' for help");
    println!("Type '.exit' to quit");
    println!();

    repl(&dispatcher, &store)?;
    dispatcher.close()?;
    Ok(())
}

/// Read-Eval-Print Loop over one dispatcher
fn repl(dispatcher: &Dispatcher, store: &MemoryDataSource) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("sqlforward> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            // EOF
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        // Schema changes bypass the dispatcher and go straight to the store
        if let Some(sql) = input.strip_prefix(".ddl ") {
            if let Err(e) = run_script(store, sql) {
                eprintln!("Error: {}", e);
            }
            continue;
        }

        if input.starts_with('.') {
            match input {
                ".exit" | ".quit" => {
                    println!("Goodbye!");
                    break;
                }
                ".help" => print_help(),
                ".status" => match dispatcher.in_transaction() {
                    Ok(true) => println!("Transaction: active"),
                    Ok(false) => println!("Transaction: idle"),
                    Err(e) => eprintln!("Error: {}", e),
                },
                _ => {
                    println!("Unknown command: {}", input);
                    println!("Type '.help' for help");
                }
            }
            continue;
        }

        if let Err(e) = execute_statement(dispatcher, input, Vec::new()) {
            eprintln!("Error: {}", e);
        }
    }

    Ok(())
}

/// Parse, dispatch and print one statement
fn execute_statement(dispatcher: &Dispatcher, sql: &str, binds: Vec<Value>) -> Result<()> {
    let statement = parse_statement(sql)?;
    let ctx = RequestContext::new(SHELL_CONNECTION, statement, sql).with_args(binds);

    match dispatcher.dispatch(&ctx)? {
        ExecutionOutcome::Empty => println!("OK ({})", ctx.statement),
        ExecutionOutcome::Write(summary) => match summary.last_insert_id {
            Some(id) => println!("{} row(s) affected, last insert id {}", summary.rows_affected, id),
            None => println!("{} row(s) affected", summary.rows_affected),
        },
        ExecutionOutcome::Rows(rows) => {
            let columns = rows.columns().to_vec();
            let rows = rows.collect_rows()?;
            println!("{}", format_rows(&columns, &rows));
        }
    }
    Ok(())
}

/// Execute every statement of a script on the store itself
fn run_script(store: &MemoryDataSource, script: &str) -> Result<()> {
    let statements = Parser::parse_sql(&GenericDialect {}, script)?;
    for statement in statements {
        store.exec(Query::new(statement.to_string(), Vec::new()))?;
    }
    if let Ok(tables) = store.table_names() {
        println!("Tables: {}", tables.join(", "));
    }
    Ok(())
}

/// Render rows as a box-drawn table
fn format_rows(columns: &[String], rows: &[Row]) -> String {
    if rows.is_empty() {
        return "No rows found".to_string();
    }

    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in rows {
        for (width, value) in widths.iter_mut().zip(&row.values) {
            *width = (*width).max(value.to_string().chars().count());
        }
    }

    let border = |left: &str, mid: &str, right: &str| {
        let cells: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
        format!("{}{}{}\n", left, cells.join(mid), right)
    };
    let line = |cells: Vec<String>| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!(" {:<width$} ", cell, width = *width))
            .collect();
        format!("│{}│\n", padded.join("│"))
    };

    let mut result = String::new();
    result.push_str(&border("┌", "┬", "┐"));
    result.push_str(&line(columns.to_vec()));
    result.push_str(&border("├", "┼", "┤"));
    for row in rows {
        result.push_str(&line(row.values.iter().map(|v| v.to_string()).collect()));
    }
    result.push_str(&border("└", "┴", "┘"));
    result.push_str(&format!("\n{} row(s) returned", rows.len()));

    result
}

fn print_help() {
    println!("╔════════════════════════════════════════════╗");
    println!("║              sqlforward Help               ║");
    println!("╚════════════════════════════════════════════╝");
    println!();
    println!("Special Commands:");
    println!("  .help              Show this help message");
    println!("  .status            Show whether a transaction is open");
    println!("  .ddl <sql>         Run schema statements directly on the store");
    println!("  .exit, .quit       Exit the shell");
    println!();
    println!("Transaction Control:");
    println!("  BEGIN | START TRANSACTION [READ ONLY] [ISOLATION LEVEL ...]");
    println!("  COMMIT");
    println!("  ROLLBACK");
    println!();
    println!("Schema (via .ddl or --init):");
    println!("  CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)");
    println!("  DROP TABLE users");
    println!();
    println!("Data Statements:");
    println!("  SELECT * FROM users WHERE id = 1");
    println!("  INSERT INTO users VALUES (1, 'Alice', 30)");
    println!("  UPDATE users SET age = 31 WHERE id = 1");
    println!("  DELETE FROM users WHERE id = 1");
    println!();
    println!("Notes:");
    println!("  - Statements inside a transaction are invisible to other");
    println!("    connections until COMMIT");
    println!("  - Leaving the shell rolls back an open transaction");
    println!();
}
