// In-memory data source
// A thread-safe store with snapshot transactions, used by the shell and the tests
//
// Transactions work on a private copy of the catalog taken at begin time.
// Every committed change to a table bumps that table's version. Commit publishes
// the tables the transaction wrote, and fails without publishing anything if
// one of them was changed by someone else since the transaction began.

mod interpret;
mod table;

pub use table::{Column, DataType, Schema, Table};

use super::{DataSource, Query, RowSet, Tx, TxOptions, WriteSummary};
use anyhow::{anyhow, Result};
use interpret::Catalog;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Committed tables plus the version each one was last changed at
#[derive(Default)]
struct Store {
    tables: Catalog,
    versions: HashMap<String, u64>,
    clock: u64,
}

impl Store {
    /// Record a committed change to a table, including its creation or drop
    fn touch(&mut self, table: &str) {
        self.clock += 1;
        self.versions.insert(table.to_string(), self.clock);
    }
}

/// Shared in-memory store
#[derive(Clone, Default)]
pub struct MemoryDataSource {
    store: Arc<RwLock<Store>>,
}

impl MemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all committed tables, sorted
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .read()?
            .tables
            .values()
            .map(|t| t.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Committed row count of a table, if it exists
    pub fn row_count(&self, table: &str) -> Result<Option<usize>> {
        Ok(self
            .read()?
            .tables
            .get(&table.to_ascii_lowercase())
            .map(Table::row_count))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Store>> {
        self.store
            .read()
            .map_err(|_| anyhow!("Catalog lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Store>> {
        self.store
            .write()
            .map_err(|_| anyhow!("Catalog lock poisoned"))
    }
}

impl DataSource for MemoryDataSource {
    fn query(&self, query: Query) -> Result<RowSet> {
        check_deadline(&query)?;
        interpret::run_query(&self.read()?.tables, &query)
    }

    fn exec(&self, query: Query) -> Result<WriteSummary> {
        check_deadline(&query)?;
        let mut store = self.write()?;
        let applied = interpret::run_exec(&mut store.tables, &query)?;
        store.touch(&applied.table);
        Ok(applied.summary)
    }

    fn begin_tx(&self, options: TxOptions) -> Result<Box<dyn Tx>> {
        let store = self.read()?;
        let working = store.tables.clone();
        let versions = store.versions.clone();
        drop(store);

        debug!(
            tables = working.len(),
            read_only = options.read_only,
            isolation = ?options.isolation,
            "memory transaction started"
        );
        Ok(Box::new(MemoryTx {
            source: self.clone(),
            working,
            versions,
            written: HashSet::new(),
            options,
        }))
    }
}

/// Transaction over a snapshot of the catalog
pub struct MemoryTx {
    source: MemoryDataSource,
    working: Catalog,
    /// Table versions as they were when the snapshot was taken
    versions: HashMap<String, u64>,
    /// Lower-cased names of tables created, changed or dropped in this transaction
    written: HashSet<String>,
    options: TxOptions,
}

impl Tx for MemoryTx {
    fn query(&mut self, query: Query) -> Result<RowSet> {
        check_deadline(&query)?;
        interpret::run_query(&self.working, &query)
    }

    fn exec(&mut self, query: Query) -> Result<WriteSummary> {
        check_deadline(&query)?;
        if self.options.read_only {
            return Err(anyhow!("Cannot execute a write in a READ ONLY transaction"));
        }
        let applied = interpret::run_exec(&mut self.working, &query)?;
        self.written.insert(applied.table);
        Ok(applied.summary)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx {
            source,
            mut working,
            versions,
            written,
            ..
        } = *self;

        let mut store = source.write()?;

        // Check every written table before publishing any of them
        if let Some(name) = written
            .iter()
            .find(|name| store.versions.get(*name) != versions.get(*name))
        {
            debug!(table = %name, "memory transaction commit conflict");
            return Err(anyhow!(
                "Table '{}' was modified by another connection since the transaction began",
                name
            ));
        }

        for name in &written {
            match working.remove(name) {
                Some(table) => {
                    store.tables.insert(name.clone(), table);
                }
                None => {
                    store.tables.remove(name);
                }
            }
            store.touch(name);
        }
        debug!(tables = written.len(), "memory transaction committed");
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        debug!(tables = self.written.len(), "memory transaction rolled back");
        Ok(())
    }
}

fn check_deadline(query: &Query) -> Result<()> {
    if query.is_expired() {
        return Err(anyhow!("Query deadline exceeded"));
    }
    Ok(())
}
