// Dispatch errors
// One variant per failure a caller may need to translate into a protocol response

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The statement kind has no route
    #[error("unsupported statement: {kind}")]
    UnsupportedStatement { kind: String },

    /// START TRANSACTION while a transaction is already open
    #[error("a transaction is already active on this connection")]
    TransactionConflict,

    /// COMMIT or ROLLBACK without an open transaction
    #[error("no active transaction")]
    NoActiveTransaction,

    /// Another call is already running on the same dispatcher
    #[error("concurrent dispatch on a single connection")]
    ConcurrentDispatch,

    /// The request deadline passed before the statement was started
    #[error("deadline exceeded before dispatch")]
    DeadlineExceeded,

    /// Error returned by the data source, passed through untouched
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl DispatchError {
    pub fn is_upstream(&self) -> bool {
        matches!(self, DispatchError::Upstream(_))
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
