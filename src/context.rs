// Request context
// Everything the dispatcher needs to know about one inbound statement

use crate::datasource::{Query, Value};
use crate::statement::ParsedStatement;
use std::time::{Duration, Instant};

/// One statement arriving on a logical connection
/// Read-only from the dispatcher's point of view
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Identifier of the client connection, used only for logging
    pub connection_id: u64,
    pub statement: ParsedStatement,
    /// Original SQL text, forwarded to the store as-is
    pub sql: String,
    pub args: Vec<Value>,
    /// When set, work for this statement must not start after this instant
    pub deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(connection_id: u64, statement: ParsedStatement, sql: impl Into<String>) -> Self {
        Self {
            connection_id,
            statement,
            sql: sql.into(),
            args: Vec::new(),
            deadline: None,
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Build the query handed to the store
    pub fn query(&self) -> Query {
        Query::new(self.sql.clone(), self.args.clone()).with_deadline(self.deadline)
    }

    /// Fingerprint of the SQL text, logged in place of the statement itself
    pub fn digest(&self) -> u64 {
        seahash::hash(self.sql.as_bytes())
    }
}
