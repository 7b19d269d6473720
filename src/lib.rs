// sqlforward - statement dispatch and transaction state for a SQL proxy
// This is the library root that exposes the public API

pub mod config;
pub mod context;
pub mod datasource;
pub mod dispatch;
pub mod error;
pub mod statement;

// Re-export commonly used types for convenience
pub use config::{DispatchConfig, NestedBeginPolicy, UnsupportedPolicy};
pub use context::RequestContext;
pub use datasource::{
    DataSource, ExecutionOutcome, IsolationLevel, MemoryDataSource, Query, Row, RowSet, Tx,
    TxOptions, Value, WriteSummary,
};
pub use dispatch::Dispatcher;
pub use error::DispatchError;
pub use statement::{parse_statement, ParsedStatement, TransactionControl};
