// SQL interpreter for the in-memory store
// Turns sqlparser statements into operations on the table catalog

use super::table::{Column, DataType, Schema, Table};
use crate::datasource::{Query, RowSet, Value, WriteSummary};
use anyhow::{anyhow, Result};
use sqlparser::ast::{
    AssignmentTarget, BinaryOperator, ColumnOption, DataType as SqlDataType, Expr, FromTable,
    Ident, ObjectName, ObjectType, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins,
    UnaryOperator, Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::HashMap;

/// Tables by lower-cased name
pub(super) type Catalog = HashMap<String, Table>;

/// Result of a write, with the table it touched
pub(super) struct Applied {
    pub summary: WriteSummary,
    pub table: String,
}

/// Parse exactly one statement
pub(super) fn parse(sql: &str) -> Result<Statement> {
    let mut ast = Parser::parse_sql(&GenericDialect {}, sql)
        .map_err(|e| anyhow!("SQL parsing error: {}", e))?;
    if ast.len() != 1 {
        return Err(anyhow!("Only single statements are supported"));
    }
    Ok(ast.remove(0))
}

/// Run a read against the catalog
pub(super) fn run_query(catalog: &Catalog, query: &Query) -> Result<RowSet> {
    let statement = parse(&query.sql)?;
    let mut binder = Binder::new(&query.args);

    let Statement::Query(q) = &statement else {
        return Err(anyhow!("Not a read statement: {}", query.sql));
    };
    let SetExpr::Select(select) = q.body.as_ref() else {
        return Err(anyhow!("Unsupported SELECT format"));
    };

    let table_name = match select.from.first() {
        Some(from) => table_name(from)?,
        None => return Err(anyhow!("No table specified in SELECT")),
    };
    let table = lookup(catalog, &table_name)?;

    // Projection: (column index, output name)
    let mut projection = Vec::new();
    for item in &select.projection {
        match item {
            SelectItem::Wildcard(_) => {
                projection.extend(table.schema.column_names().into_iter().enumerate());
            }
            SelectItem::UnnamedExpr(expr) => {
                let name = column_name(expr)?;
                projection.push((table.schema.require_column(&name)?, name));
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                let name = column_name(expr)?;
                projection.push((table.schema.require_column(&name)?, alias.value.clone()));
            }
            _ => return Err(anyhow!("Unsupported select item: {}", item)),
        }
    }

    let filter = match &select.selection {
        Some(expr) => where_clause(expr, &table.schema, &mut binder)?,
        None => Vec::new(),
    };
    binder.finish()?;

    let columns = projection.iter().map(|(_, name)| name.clone()).collect();
    let rows = table
        .select(&filter)
        .into_iter()
        .map(|row| {
            let values = projection
                .iter()
                .map(|(idx, _)| row.values[*idx].clone())
                .collect();
            crate::datasource::Row::new(values)
        })
        .collect();

    Ok(RowSet::from_rows(columns, rows))
}

/// Run a write or DDL statement against the catalog
pub(super) fn run_exec(catalog: &mut Catalog, query: &Query) -> Result<Applied> {
    let statement = parse(&query.sql)?;
    let mut binder = Binder::new(&query.args);

    let applied = match &statement {
        Statement::CreateTable(create) => {
            let name = object_name(&create.name);
            let key = name.to_ascii_lowercase();
            if catalog.contains_key(&key) {
                if create.if_not_exists {
                    return Ok(Applied {
                        summary: WriteSummary::default(),
                        table: key,
                    });
                }
                return Err(anyhow!("Table '{}' already exists", name));
            }

            let mut columns = Vec::new();
            for def in &create.columns {
                let primary_key = def.options.iter().any(|opt| {
                    matches!(opt.option, ColumnOption::Unique { is_primary: true, .. })
                });
                let nullable = !def
                    .options
                    .iter()
                    .any(|opt| matches!(opt.option, ColumnOption::NotNull));
                columns.push(Column {
                    name: def.name.value.clone(),
                    data_type: data_type(&def.data_type)?,
                    primary_key,
                    nullable,
                });
            }
            if columns.iter().filter(|c| c.primary_key).count() > 1 {
                return Err(anyhow!("Only single column primary keys are supported"));
            }

            catalog.insert(key.clone(), Table::new(name, Schema::new(columns)));
            Applied {
                summary: WriteSummary::default(),
                table: key,
            }
        }

        Statement::Drop {
            object_type: ObjectType::Table,
            if_exists,
            names,
            ..
        } => {
            let [name] = names.as_slice() else {
                return Err(anyhow!("Only single table drops are supported"));
            };
            let key = object_name(name).to_ascii_lowercase();
            if catalog.remove(&key).is_none() && !*if_exists {
                return Err(anyhow!("Table '{}' not found", name));
            }
            Applied {
                summary: WriteSummary::default(),
                table: key,
            }
        }

        Statement::Insert(insert) => {
            let key = object_name(&insert.table_name).to_ascii_lowercase();
            let table = lookup_mut(catalog, &key)?;

            let rows = match insert.source.as_ref().map(|s| s.body.as_ref()) {
                Some(SetExpr::Values(values)) if !values.rows.is_empty() => &values.rows,
                Some(SetExpr::Values(_)) | None => return Err(anyhow!("No values provided")),
                Some(_) => return Err(anyhow!("Unsupported INSERT format")),
            };

            // Map listed columns onto schema positions; unlisted ones get NULL
            let positions: Vec<usize> = if insert.columns.is_empty() {
                (0..table.schema.columns.len()).collect()
            } else {
                insert
                    .columns
                    .iter()
                    .map(|c| table.schema.require_column(&c.value))
                    .collect::<Result<_>>()?
            };

            let mut full_rows = Vec::with_capacity(rows.len());
            for exprs in rows {
                if exprs.len() != positions.len() {
                    return Err(anyhow!(
                        "Expected {} values, got {}",
                        positions.len(),
                        exprs.len()
                    ));
                }
                let mut values = vec![Value::Null; table.schema.columns.len()];
                for (pos, expr) in positions.iter().zip(exprs) {
                    values[*pos] = binder.value(expr)?;
                }
                full_rows.push(values);
            }
            binder.finish()?;

            // Insert into a copy so a failing row does not leave a partial write
            let mut staged = table.clone();
            let mut last_insert_id = None;
            for values in full_rows {
                if let Some(id) = staged.insert(values)? {
                    last_insert_id = Some(id);
                }
            }
            let rows_affected = rows.len() as u64;
            *table = staged;

            Applied {
                summary: WriteSummary {
                    rows_affected,
                    last_insert_id,
                },
                table: key,
            }
        }

        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => {
            let key = table_name(table)?.to_ascii_lowercase();
            let target = lookup_mut(catalog, &key)?;

            let mut sets = Vec::with_capacity(assignments.len());
            for assignment in assignments {
                let column = match &assignment.target {
                    AssignmentTarget::ColumnName(name) => last_ident(name)?,
                    _ => return Err(anyhow!("Unsupported assignment target")),
                };
                let idx = target.schema.require_column(&column)?;
                sets.push((idx, binder.value(&assignment.value)?));
            }
            let filter = match selection {
                Some(expr) => where_clause(expr, &target.schema, &mut binder)?,
                None => Vec::new(),
            };
            binder.finish()?;

            let rows_affected = target.update(&filter, &sets)?;
            Applied {
                summary: WriteSummary {
                    rows_affected,
                    last_insert_id: None,
                },
                table: key,
            }
        }

        Statement::Delete(delete) => {
            let from = match &delete.from {
                FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
            };
            let key = match from.as_slice() {
                [table] => table_name(table)?.to_ascii_lowercase(),
                _ => return Err(anyhow!("Only single table deletes are supported")),
            };
            let target = lookup_mut(catalog, &key)?;

            let filter = match &delete.selection {
                Some(expr) => where_clause(expr, &target.schema, &mut binder)?,
                None => Vec::new(),
            };
            binder.finish()?;

            Applied {
                summary: WriteSummary {
                    rows_affected: target.delete(&filter),
                    last_insert_id: None,
                },
                table: key,
            }
        }

        Statement::Query(_) => return Err(anyhow!("Reads must go through query, not exec")),
        _ => return Err(anyhow!("Unsupported SQL statement: {}", query.sql)),
    };

    Ok(applied)
}

/// Hands out bind arguments for `?` and `$n` placeholders
struct Binder<'a> {
    args: &'a [Value],
    next: usize,
    highest: usize,
}

impl<'a> Binder<'a> {
    fn new(args: &'a [Value]) -> Self {
        Self {
            args,
            next: 0,
            highest: 0,
        }
    }

    fn placeholder(&mut self, marker: &str) -> Result<Value> {
        let position = if marker == "?" {
            self.next += 1;
            self.next
        } else if let Some(n) = marker.strip_prefix('$') {
            n.parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| anyhow!("Invalid placeholder: {}", marker))?
        } else {
            return Err(anyhow!("Unsupported placeholder: {}", marker));
        };
        self.highest = self.highest.max(position);

        self.args.get(position - 1).cloned().ok_or_else(|| {
            anyhow!(
                "Missing bind argument {} ({} provided)",
                position,
                self.args.len()
            )
        })
    }

    /// Evaluate a literal or placeholder expression
    fn value(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Value(SqlValue::Number(n, _)) => {
                if let Ok(i) = n.parse::<i64>() {
                    Ok(Value::Integer(i))
                } else {
                    Ok(Value::Float(n.parse()?))
                }
            }
            Expr::Value(SqlValue::SingleQuotedString(s))
            | Expr::Value(SqlValue::DoubleQuotedString(s)) => Ok(Value::Text(s.clone())),
            Expr::Value(SqlValue::Boolean(b)) => Ok(Value::Boolean(*b)),
            Expr::Value(SqlValue::Null) => Ok(Value::Null),
            Expr::Value(SqlValue::Placeholder(marker)) => self.placeholder(marker),
            Expr::Nested(inner) => self.value(inner),
            Expr::UnaryOp {
                op: UnaryOperator::Minus,
                expr,
            } => match self.value(expr)? {
                Value::Integer(i) => i
                    .checked_neg()
                    .map(Value::Integer)
                    .ok_or_else(|| anyhow!("Integer overflow negating {}", i)),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(anyhow!("Cannot negate {}", other.type_name())),
            },
            _ => Err(anyhow!("Unsupported value expression: {}", expr)),
        }
    }

    /// Every supplied argument must have been consumed
    fn finish(&self) -> Result<()> {
        if self.highest != self.args.len() {
            return Err(anyhow!(
                "Statement uses {} bind argument(s) but {} were provided",
                self.highest,
                self.args.len()
            ));
        }
        Ok(())
    }
}

/// WHERE support: `col = value` conditions joined by AND
fn where_clause(expr: &Expr, schema: &Schema, binder: &mut Binder) -> Result<Vec<(usize, Value)>> {
    match expr {
        Expr::Nested(inner) => where_clause(inner, schema, binder),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            let mut conditions = where_clause(left, schema, binder)?;
            conditions.extend(where_clause(right, schema, binder)?);
            Ok(conditions)
        }
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } => {
            let column = column_name(left)?;
            let idx = schema.require_column(&column)?;
            // Compare in the column's type, as stored values were coerced on write
            let value = schema.columns[idx]
                .data_type
                .coerce(binder.value(right)?)
                .map_err(|e| anyhow!("WHERE {}: {}", column, e))?;
            Ok(vec![(idx, value)])
        }
        _ => Err(anyhow!("Unsupported WHERE clause: {}", expr)),
    }
}

fn data_type(sql_type: &SqlDataType) -> Result<DataType> {
    match sql_type {
        SqlDataType::Int(_)
        | SqlDataType::Integer(_)
        | SqlDataType::SmallInt(_)
        | SqlDataType::BigInt(_) => Ok(DataType::Integer),
        SqlDataType::Float(_) | SqlDataType::DoublePrecision | SqlDataType::Real => {
            Ok(DataType::Float)
        }
        SqlDataType::Text
        | SqlDataType::Varchar(_)
        | SqlDataType::Char(_)
        | SqlDataType::String(_) => Ok(DataType::Text),
        SqlDataType::Boolean | SqlDataType::Bool => Ok(DataType::Boolean),
        _ => Err(anyhow!("Unsupported data type: {}", sql_type)),
    }
}

fn lookup<'a>(catalog: &'a Catalog, name: &str) -> Result<&'a Table> {
    catalog
        .get(&name.to_ascii_lowercase())
        .ok_or_else(|| anyhow!("Table '{}' not found", name))
}

fn lookup_mut<'a>(catalog: &'a mut Catalog, key: &str) -> Result<&'a mut Table> {
    catalog
        .get_mut(key)
        .ok_or_else(|| anyhow!("Table '{}' not found", key))
}

fn object_name(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|i| i.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}

fn last_ident(name: &ObjectName) -> Result<String> {
    name.0
        .last()
        .map(|i: &Ident| i.value.clone())
        .ok_or_else(|| anyhow!("Empty column name"))
}

fn table_name(table: &TableWithJoins) -> Result<String> {
    match &table.relation {
        TableFactor::Table { name, .. } => Ok(object_name(name)),
        _ => Err(anyhow!("Unsupported table reference")),
    }
}

fn column_name(expr: &Expr) -> Result<String> {
    match expr {
        Expr::Identifier(ident) => Ok(ident.value.clone()),
        Expr::CompoundIdentifier(idents) => idents
            .last()
            .map(|i| i.value.clone())
            .ok_or_else(|| anyhow!("Empty column name")),
        _ => Err(anyhow!("Expected column name, got {}", expr)),
    }
}
