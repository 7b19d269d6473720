// Transaction-state controller
// Idle (no handle) <-> Active (handle held), driven by START/COMMIT/ROLLBACK

use super::Slot;
use crate::config::{DispatchConfig, NestedBeginPolicy};
use crate::context::RequestContext;
use crate::datasource::{DataSource, TxOptions};
use crate::error::{DispatchError, Result};
use crate::statement::TransactionControl;
use tracing::{info, warn};

pub(super) fn apply(
    source: &dyn DataSource,
    config: &DispatchConfig,
    slot: &mut Slot,
    control: TransactionControl,
    ctx: &RequestContext,
) -> Result<()> {
    match control {
        TransactionControl::Start(options) => begin(source, config, slot, options, ctx),
        TransactionControl::Commit => commit(slot),
        TransactionControl::Rollback => rollback(slot),
    }
}

fn begin(
    source: &dyn DataSource,
    config: &DispatchConfig,
    slot: &mut Slot,
    options: TxOptions,
    ctx: &RequestContext,
) -> Result<()> {
    if ctx.is_expired() {
        return Err(DispatchError::DeadlineExceeded);
    }

    if slot.is_some() {
        match config.nested_begin {
            NestedBeginPolicy::Reject => return Err(DispatchError::TransactionConflict),
            NestedBeginPolicy::Replace => {
                // Only replace once the new transaction exists
                let tx = source.begin_tx(options)?;
                warn!("replacing active transaction; previous one abandoned without commit or rollback");
                *slot = Some(tx);
                return Ok(());
            }
        }
    }

    *slot = Some(source.begin_tx(options)?);
    info!(read_only = options.read_only, isolation = ?options.isolation, "transaction started");
    Ok(())
}

/// The handle leaves the slot before commit is attempted, so the connection is
/// idle afterwards whether or not the commit succeeded
fn commit(slot: &mut Slot) -> Result<()> {
    let tx = slot.take().ok_or(DispatchError::NoActiveTransaction)?;
    match tx.commit() {
        Ok(()) => {
            info!("transaction committed");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "commit failed, transaction state cleared");
            Err(DispatchError::Upstream(e))
        }
    }
}

fn rollback(slot: &mut Slot) -> Result<()> {
    let tx = slot.take().ok_or(DispatchError::NoActiveTransaction)?;
    match tx.rollback() {
        Ok(()) => {
            info!("transaction rolled back");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "rollback failed, transaction state cleared");
            Err(DispatchError::Upstream(e))
        }
    }
}
