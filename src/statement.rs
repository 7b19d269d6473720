// Statement classification
// Maps a parsed sqlparser AST onto the closed set of statement kinds the
// dispatcher routes on

use crate::datasource::{IsolationLevel, TxOptions};
use anyhow::{anyhow, Result};
use sqlparser::ast::{
    Statement, TransactionAccessMode, TransactionIsolationLevel, TransactionMode,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::fmt;

/// Transaction-control statements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionControl {
    /// START TRANSACTION / BEGIN, with the requested modes
    Start(TxOptions),
    Commit,
    Rollback,
}

/// The kinds of statement a dispatcher distinguishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedStatement {
    TransactionControl(TransactionControl),
    Select,
    Insert,
    Update,
    Delete,
    /// Anything else; `kind` is a short label such as "CREATE TABLE"
    Other { kind: String },
}

impl ParsedStatement {
    /// Classify one sqlparser statement
    pub fn classify(statement: &Statement) -> Self {
        match statement {
            Statement::StartTransaction { modes, .. } => {
                ParsedStatement::TransactionControl(TransactionControl::Start(tx_options(modes)))
            }
            Statement::Commit { .. } => {
                ParsedStatement::TransactionControl(TransactionControl::Commit)
            }
            Statement::Rollback {
                savepoint: None, ..
            } => ParsedStatement::TransactionControl(TransactionControl::Rollback),
            Statement::Rollback {
                savepoint: Some(_), ..
            } => ParsedStatement::Other {
                kind: "ROLLBACK TO SAVEPOINT".to_string(),
            },
            Statement::Query(_) => ParsedStatement::Select,
            Statement::Insert(_) => ParsedStatement::Insert,
            Statement::Update { .. } => ParsedStatement::Update,
            Statement::Delete(_) => ParsedStatement::Delete,
            other => ParsedStatement::Other {
                kind: kind_label(other),
            },
        }
    }

    /// Short label used in logs and errors
    pub fn kind(&self) -> &str {
        match self {
            ParsedStatement::TransactionControl(TransactionControl::Start(_)) => "START TRANSACTION",
            ParsedStatement::TransactionControl(TransactionControl::Commit) => "COMMIT",
            ParsedStatement::TransactionControl(TransactionControl::Rollback) => "ROLLBACK",
            ParsedStatement::Select => "SELECT",
            ParsedStatement::Insert => "INSERT",
            ParsedStatement::Update => "UPDATE",
            ParsedStatement::Delete => "DELETE",
            ParsedStatement::Other { kind } => kind,
        }
    }
}

impl fmt::Display for ParsedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Parse SQL text holding exactly one statement and classify it
pub fn parse_statement(sql: &str) -> Result<ParsedStatement> {
    let ast = Parser::parse_sql(&GenericDialect {}, sql)
        .map_err(|e| anyhow!("SQL parsing error: {}", e))?;
    match ast.as_slice() {
        [statement] => Ok(ParsedStatement::classify(statement)),
        [] => Err(anyhow!("Empty statement")),
        _ => Err(anyhow!("Only single statements are supported")),
    }
}

#[allow(unreachable_patterns)]
fn tx_options(modes: &[TransactionMode]) -> TxOptions {
    let mut options = TxOptions::default();
    for mode in modes {
        match mode {
            TransactionMode::AccessMode(TransactionAccessMode::ReadOnly) => {
                options.read_only = true
            }
            TransactionMode::AccessMode(TransactionAccessMode::ReadWrite) => {
                options.read_only = false
            }
            TransactionMode::IsolationLevel(level) => options.isolation = isolation(level),
            _ => {}
        }
    }
    options
}

#[allow(unreachable_patterns)]
fn isolation(level: &TransactionIsolationLevel) -> Option<IsolationLevel> {
    match level {
        TransactionIsolationLevel::ReadUncommitted => Some(IsolationLevel::ReadUncommitted),
        TransactionIsolationLevel::ReadCommitted => Some(IsolationLevel::ReadCommitted),
        TransactionIsolationLevel::RepeatableRead => Some(IsolationLevel::RepeatableRead),
        TransactionIsolationLevel::Serializable => Some(IsolationLevel::Serializable),
        // Dialect-specific levels are left to the store's default
        _ => None,
    }
}

/// Leading keywords of the statement, e.g. "CREATE TABLE" or "SHOW"
fn kind_label(statement: &Statement) -> String {
    let text = statement.to_string();
    let mut words = text.split_whitespace();
    let first = words.next().unwrap_or_default().to_ascii_uppercase();
    match first.as_str() {
        "CREATE" | "DROP" | "ALTER" | "TRUNCATE" => match words.next() {
            Some(second) => format!("{} {}", first, second.to_ascii_uppercase()),
            None => first,
        },
        _ => first,
    }
}
