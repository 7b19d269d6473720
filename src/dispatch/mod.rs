// Statement dispatcher
// Routes one connection's statements to the transaction controller or to the
// execution path, and owns that connection's transaction handle
//
// A dispatcher serves exactly one logical connection. Calls are expected to
// arrive one at a time; a second call while one is in flight fails fast with
// `DispatchError::ConcurrentDispatch` instead of touching the transaction state.

mod execute;
mod transaction;

#[cfg(test)]
mod tests;

use crate::config::{DispatchConfig, UnsupportedPolicy};
use crate::context::RequestContext;
use crate::datasource::{DataSource, ExecutionOutcome, Tx};
use crate::error::{DispatchError, Result};
use crate::statement::ParsedStatement;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use tracing::{debug, debug_span, warn};

/// The transaction slot: `None` while idle, the open handle while active
type Slot = Option<Box<dyn Tx>>;

pub struct Dispatcher {
    source: Arc<dyn DataSource>,
    config: DispatchConfig,
    tx: Mutex<Slot>,
}

impl Dispatcher {
    /// Create a dispatcher for a new connection with the default configuration
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self::with_config(source, DispatchConfig::default())
    }

    pub fn with_config(source: Arc<dyn DataSource>, config: DispatchConfig) -> Self {
        Self {
            source,
            config,
            tx: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Whether a transaction is currently open on this connection
    pub fn in_transaction(&self) -> Result<bool> {
        Ok(self.lock()?.is_some())
    }

    /// Route one statement and return what it produced
    ///
    /// Transaction-control statements return `ExecutionOutcome::Empty` on success.
    /// Errors from the data source are returned unchanged as `DispatchError::Upstream`.
    pub fn dispatch(&self, ctx: &RequestContext) -> Result<ExecutionOutcome> {
        let _span = debug_span!(
            "dispatch",
            connection_id = ctx.connection_id,
            kind = ctx.statement.kind(),
            digest = ctx.digest(),
        )
        .entered();

        let mut slot = self.lock()?;
        debug!(in_transaction = slot.is_some(), "dispatching statement");

        match &ctx.statement {
            ParsedStatement::TransactionControl(control) => {
                transaction::apply(self.source.as_ref(), &self.config, &mut slot, *control, ctx)?;
                Ok(ExecutionOutcome::Empty)
            }
            ParsedStatement::Select => {
                check_deadline(ctx)?;
                execute::read(self.source.as_ref(), &mut slot, ctx).map(ExecutionOutcome::Rows)
            }
            ParsedStatement::Insert | ParsedStatement::Update | ParsedStatement::Delete => {
                check_deadline(ctx)?;
                execute::write(self.source.as_ref(), &mut slot, ctx).map(ExecutionOutcome::Write)
            }
            ParsedStatement::Other { kind } => match self.config.unsupported {
                UnsupportedPolicy::Reject => Err(DispatchError::UnsupportedStatement {
                    kind: kind.clone(),
                }),
                UnsupportedPolicy::Ignore => {
                    warn!("ignoring unsupported statement");
                    Ok(ExecutionOutcome::Empty)
                }
            },
        }
    }

    /// Tear down the connection, rolling back a transaction left open
    pub fn close(mut self) -> Result<()> {
        let slot = self.tx.get_mut().unwrap_or_else(PoisonError::into_inner);
        match slot.take() {
            Some(tx) => {
                warn!("connection closed with an open transaction, rolling back");
                tx.rollback().map_err(DispatchError::Upstream)
            }
            None => Ok(()),
        }
    }

    /// Take exclusive access to the transaction slot or fail immediately
    fn lock(&self) -> Result<MutexGuard<'_, Slot>> {
        match self.tx.try_lock() {
            Ok(guard) => Ok(guard),
            // A panic inside the store left the slot as it was; keep using it
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => {
                warn!("rejected concurrent call on a single connection");
                Err(DispatchError::ConcurrentDispatch)
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let slot = self.tx.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = slot.take() {
            warn!("dispatcher dropped with an open transaction, rolling back");
            if let Err(e) = tx.rollback() {
                warn!(error = %e, "rollback on drop failed");
            }
        }
    }
}

fn check_deadline(ctx: &RequestContext) -> Result<()> {
    if ctx.is_expired() {
        return Err(DispatchError::DeadlineExceeded);
    }
    Ok(())
}
