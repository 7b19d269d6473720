// Data-access layer
// The value types exchanged with a store, and the capability a store must offer
// for the dispatcher to route statements to it

pub mod memory;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

pub use memory::MemoryDataSource;

/// A single bind value or column value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

impl Value {
    /// Parse a loosely-typed literal as given on a command line
    /// Anything that is not a number, boolean or NULL is kept as text
    pub fn from_literal(s: &str) -> Self {
        if s.eq_ignore_ascii_case("null") {
            Value::Null
        } else if let Ok(i) = s.parse::<i64>() {
            Value::Integer(i)
        } else if let Ok(f) = s.parse::<f64>() {
            Value::Float(f)
        } else if s.eq_ignore_ascii_case("true") {
            Value::Boolean(true)
        } else if s.eq_ignore_ascii_case("false") {
            Value::Boolean(false)
        } else {
            Value::Text(s.to_string())
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the value's type, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Integer(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::Text(_) => "TEXT",
            Value::Boolean(_) => "BOOLEAN",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::Boolean(b) => write!(f, "{}", b),
        }
    }
}

/// A single result row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }
}

/// Statement text plus positional bind arguments
/// Built fresh for every dispatched statement and handed to the store by value
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub sql: String,
    pub args: Vec<Value>,
    /// Point in time after which the store should give up on the statement
    pub deadline: Option<Instant>,
}

impl Query {
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// True when the query carries a deadline that has already passed
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Rows produced by a read, consumed lazily by the caller
pub struct RowSet {
    columns: Vec<String>,
    rows: Box<dyn Iterator<Item = Result<Row>> + Send>,
}

impl RowSet {
    pub fn new(
        columns: Vec<String>,
        rows: impl Iterator<Item = Result<Row>> + Send + 'static,
    ) -> Self {
        Self {
            columns,
            rows: Box::new(rows),
        }
    }

    /// Wrap rows that are already materialized
    pub fn from_rows(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self::new(columns, rows.into_iter().map(Ok))
    }

    pub fn empty() -> Self {
        Self::from_rows(Vec::new(), Vec::new())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Drain the set, stopping at the first row error
    pub fn collect_rows(self) -> Result<Vec<Row>> {
        self.rows.collect()
    }
}

impl Iterator for RowSet {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }
}

impl fmt::Debug for RowSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowSet")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

/// Outcome of a write or DDL statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

/// What a dispatched statement produced
/// Reads yield rows, writes yield a summary, transaction control yields nothing
#[derive(Debug)]
pub enum ExecutionOutcome {
    Empty,
    Rows(RowSet),
    Write(WriteSummary),
}

impl ExecutionOutcome {
    pub fn is_empty(&self) -> bool {
        matches!(self, ExecutionOutcome::Empty)
    }

    pub fn into_rows(self) -> Option<RowSet> {
        match self {
            ExecutionOutcome::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn into_write(self) -> Option<WriteSummary> {
        match self {
            ExecutionOutcome::Write(summary) => Some(summary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Options requested when a transaction is started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOptions {
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
}

/// A store reachable directly, or through a transaction it hands out
///
/// One instance is shared by every dispatcher of a deployment, so
/// implementations must tolerate concurrent calls.
pub trait DataSource: Send + Sync {
    /// Run a read statement
    fn query(&self, query: Query) -> Result<RowSet>;

    /// Run a write or DDL statement
    fn exec(&self, query: Query) -> Result<WriteSummary>;

    /// Open a transaction
    fn begin_tx(&self, options: TxOptions) -> Result<Box<dyn Tx>>;
}

/// An open transaction
///
/// `commit` and `rollback` consume the handle: once either has been called
/// the transaction cannot be used again, whatever the outcome.
pub trait Tx: Send {
    fn query(&mut self, query: Query) -> Result<RowSet>;

    fn exec(&mut self, query: Query) -> Result<WriteSummary>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}
