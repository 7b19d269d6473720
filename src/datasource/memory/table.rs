// In-memory table
// A table combines a schema, its rows, and an index on the primary key

use crate::datasource::{Row, Value};
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;

/// The column types the in-memory store understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
}

impl DataType {
    /// Check a value against the column type, widening integers into float columns
    pub(super) fn coerce(&self, value: Value) -> Result<Value> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (DataType::Integer, v @ Value::Integer(_)) => Ok(v),
            (DataType::Float, v @ Value::Float(_)) => Ok(v),
            (DataType::Float, Value::Integer(i)) => Ok(Value::Float(i as f64)),
            (DataType::Text, v @ Value::Text(_)) => Ok(v),
            (DataType::Boolean, v @ Value::Boolean(_)) => Ok(v),
            (expected, v) => Err(anyhow!(
                "Type mismatch: expected {:?}, got {}",
                expected,
                v.type_name()
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub primary_key: bool,
    pub nullable: bool,
}

/// The structure of a table: which columns exist and their types
#[derive(Debug, Clone)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn get_column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|col| col.name.eq_ignore_ascii_case(name))
    }

    pub fn get_primary_key_index(&self) -> Option<usize> {
        self.columns.iter().position(|col| col.primary_key)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Resolve a column name, failing with a readable error
    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.get_column_index(name)
            .ok_or_else(|| anyhow!("Column not found: {}", name))
    }
}

/// Ordered key for the primary-key index
/// Floats are keyed by their bit pattern since f64 has no total order
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum IndexKey {
    Integer(i64),
    Float(u64),
    Text(String),
    Boolean(bool),
}

impl IndexKey {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Integer(i) => Some(IndexKey::Integer(*i)),
            // -0.0 == 0.0, so both must map to the same key
            Value::Float(f) if *f == 0.0 => Some(IndexKey::Float(0f64.to_bits())),
            Value::Float(f) => Some(IndexKey::Float(f.to_bits())),
            Value::Text(s) => Some(IndexKey::Text(s.clone())),
            Value::Boolean(b) => Some(IndexKey::Boolean(*b)),
        }
    }
}

/// Equality conditions joined by AND, as (column index, value) pairs
pub type Filter = [(usize, Value)];

#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub schema: Schema,
    /// Rows keyed by a monotonically increasing row id, so scans keep insert order
    rows: BTreeMap<u64, Row>,
    pk_index: BTreeMap<IndexKey, u64>,
    next_row_id: u64,
}

impl Table {
    pub fn new(name: String, schema: Schema) -> Self {
        Self {
            name,
            schema,
            rows: BTreeMap::new(),
            pk_index: BTreeMap::new(),
            next_row_id: 0,
        }
    }

    /// Insert a full row (values in schema order)
    /// Returns the primary key when it is an integer, for last-insert-id reporting
    pub fn insert(&mut self, values: Vec<Value>) -> Result<Option<i64>> {
        if values.len() != self.schema.columns.len() {
            return Err(anyhow!(
                "Expected {} values, got {}",
                self.schema.columns.len(),
                values.len()
            ));
        }

        let values = self.check_row(values)?;

        let pk_key = match self.schema.get_primary_key_index() {
            Some(pk) => {
                let key = IndexKey::from_value(&values[pk])
                    .ok_or_else(|| anyhow!("Primary key cannot be NULL"))?;
                if self.pk_index.contains_key(&key) {
                    return Err(anyhow!(
                        "Primary key violation: duplicate value {} in '{}'",
                        values[pk],
                        self.name
                    ));
                }
                Some(key)
            }
            None => None,
        };

        let row_id = self.next_row_id;
        self.next_row_id += 1;

        let inserted_id = match &pk_key {
            Some(IndexKey::Integer(i)) => Some(*i),
            _ => None,
        };
        if let Some(key) = pk_key {
            self.pk_index.insert(key, row_id);
        }
        self.rows.insert(row_id, Row::new(values));

        Ok(inserted_id)
    }

    /// Rows matching every condition of the filter, in insert order
    pub fn select(&self, filter: &Filter) -> Vec<Row> {
        self.matching_ids(filter)
            .into_iter()
            .filter_map(|id| self.rows.get(&id).cloned())
            .collect()
    }

    /// Apply assignments to matching rows; returns the number of rows changed
    pub fn update(&mut self, filter: &Filter, assignments: &[(usize, Value)]) -> Result<u64> {
        let ids = self.matching_ids(filter);
        let pk = self.schema.get_primary_key_index();

        // Build every new row first so a failing row leaves the table untouched
        let mut staged = Vec::with_capacity(ids.len());
        for id in &ids {
            let Some(row) = self.rows.get(id) else { continue };
            let mut values = row.values.clone();
            for (col, value) in assignments {
                values[*col] = value.clone();
            }
            staged.push((*id, self.check_row(values)?));
        }

        let mut pk_index = self.pk_index.clone();
        if let Some(pk) = pk {
            for (id, _) in &staged {
                if let Some(old) = self.rows.get(id).and_then(|r| IndexKey::from_value(&r.values[pk])) {
                    pk_index.remove(&old);
                }
            }
            for (id, values) in &staged {
                let key = IndexKey::from_value(&values[pk])
                    .ok_or_else(|| anyhow!("Primary key cannot be NULL"))?;
                if pk_index.insert(key, *id).is_some() {
                    return Err(anyhow!(
                        "Primary key violation: duplicate value {} in '{}'",
                        values[pk],
                        self.name
                    ));
                }
            }
        }

        let count = staged.len() as u64;
        for (id, values) in staged {
            self.rows.insert(id, Row::new(values));
        }
        self.pk_index = pk_index;

        Ok(count)
    }

    /// Remove matching rows; returns the number removed
    pub fn delete(&mut self, filter: &Filter) -> u64 {
        let ids = self.matching_ids(filter);
        let pk = self.schema.get_primary_key_index();

        let mut count = 0;
        for id in ids {
            if let Some(row) = self.rows.remove(&id) {
                if let Some(key) = pk.and_then(|pk| IndexKey::from_value(&row.values[pk])) {
                    self.pk_index.remove(&key);
                }
                count += 1;
            }
        }
        count
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Row ids matching the filter, using the primary-key index when the
    /// filter pins the key column
    fn matching_ids(&self, filter: &Filter) -> Vec<u64> {
        let pk = self.schema.get_primary_key_index();
        let pinned = filter.iter().find(|(col, _)| Some(*col) == pk);

        let candidates: Vec<u64> = match pinned {
            Some((_, value)) => IndexKey::from_value(value)
                .and_then(|key| self.pk_index.get(&key).copied())
                .into_iter()
                .collect(),
            None => self.rows.keys().copied().collect(),
        };

        candidates
            .into_iter()
            .filter(|id| {
                self.rows.get(id).is_some_and(|row| {
                    filter.iter().all(|(col, value)| {
                        !value.is_null() && row.values[*col] == *value
                    })
                })
            })
            .collect()
    }

    /// Type-check a row and enforce NOT NULL constraints
    fn check_row(&self, values: Vec<Value>) -> Result<Vec<Value>> {
        values
            .into_iter()
            .zip(&self.schema.columns)
            .map(|(value, column)| {
                if value.is_null() && (!column.nullable || column.primary_key) {
                    return Err(anyhow!("Column '{}' cannot be NULL", column.name));
                }
                column
                    .data_type
                    .coerce(value)
                    .map_err(|e| anyhow!("Column '{}': {}", column.name, e))
            })
            .collect()
    }
}
