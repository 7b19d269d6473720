// Execution path
// Sends DML to the open transaction if there is one, otherwise to the store

use super::Slot;
use crate::context::RequestContext;
use crate::datasource::{DataSource, RowSet, WriteSummary};
use crate::error::Result;

pub(super) fn read(source: &dyn DataSource, slot: &mut Slot, ctx: &RequestContext) -> Result<RowSet> {
    let query = ctx.query();
    let rows = match slot.as_mut() {
        Some(tx) => tx.query(query)?,
        None => source.query(query)?,
    };
    Ok(rows)
}

pub(super) fn write(
    source: &dyn DataSource,
    slot: &mut Slot,
    ctx: &RequestContext,
) -> Result<WriteSummary> {
    let query = ctx.query();
    let summary = match slot.as_mut() {
        Some(tx) => tx.exec(query)?,
        None => source.exec(query)?,
    };
    Ok(summary)
}
