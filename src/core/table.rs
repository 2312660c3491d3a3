//! Purpose: Ordered rows of runtime-typed values sharing one `ColumnMap`.
//! Exports: `Table`, `Row`, `RowPredicate`, `RowOperation`.
//! Role: In-memory metadata store read and written by `TableIo` formats.
//! Invariants: Every row holds exactly one value per column, typed as the column.
//! Invariants: Column changes repair every row; bulk operations apply all-or-nothing.
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::column::{Column, ColumnKey, ColumnMap};
use crate::core::error::{Error, ErrorKind, usage};
use crate::core::object::Object;
use crate::core::query::{RowQuery, RowUpdate};
use crate::core::types::{Element, Scalar, Type};

static NEXT_ROW_HANDLE: AtomicU64 = AtomicU64::new(1);

fn next_handle() -> u64 {
    NEXT_ROW_HANDLE.fetch_add(1, Ordering::Relaxed)
}

/// One record; values are addressed by column id or name.
#[derive(Clone)]
pub struct Row {
    columns: Arc<ColumnMap>,
    values: Vec<Object>,
    handle: Option<u64>,
}

impl Row {
    fn blank(columns: Arc<ColumnMap>) -> Self {
        let values = columns.iter().map(|column| Object::of_type(column.ty())).collect();
        Self {
            columns,
            values,
            handle: None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &ColumnMap {
        &self.columns
    }

    pub fn get<'a>(&self, key: impl Into<ColumnKey<'a>>) -> Result<&Object, Error> {
        let pos = self.columns.position(key.into())?;
        Ok(&self.values[pos])
    }

    /// Store `value`, converted into the column type.
    pub fn set<'a, T: Element>(&mut self, key: impl Into<ColumnKey<'a>>, value: T) -> Result<(), Error> {
        let pos = self.columns.position(key.into())?;
        self.values[pos].set(value)
    }

    /// Store another object's value, converted into the column type.
    pub fn assign<'a>(&mut self, key: impl Into<ColumnKey<'a>>, value: &Object) -> Result<(), Error> {
        let pos = self.columns.position(key.into())?;
        self.values[pos].assign(value)
    }

    pub fn set_scalar<'a>(&mut self, key: impl Into<ColumnKey<'a>>, value: Scalar) -> Result<(), Error> {
        let pos = self.columns.position(key.into())?;
        self.values[pos].set_scalar(value)
    }

    /// Values paired with their columns, in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&Column, &Object)> + '_ {
        self.columns.iter().zip(self.values.iter())
    }

    /// Equal when every column holds an equal value of the same type.
    pub fn same_values(&self, other: &Row) -> bool {
        self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(other.values.iter())
                .all(|(a, b)| a.try_eq(b).unwrap_or(false))
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{value}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (column, value) in self.iter() {
            map.entry(&column.name(), value);
        }
        map.finish()
    }
}

/// Row selection for bulk deletes and updates.
pub trait RowPredicate {
    fn matches(&self, row: &Row) -> Result<bool, Error>;
}

impl<F> RowPredicate for F
where
    F: Fn(&Row) -> bool,
{
    fn matches(&self, row: &Row) -> Result<bool, Error> {
        Ok(self(row))
    }
}

/// Field mutation applied to each selected row.
pub trait RowOperation {
    fn apply(&self, row: &mut Row) -> Result<(), Error>;
}

impl<F> RowOperation for F
where
    F: Fn(&mut Row) -> Result<(), Error>,
{
    fn apply(&self, row: &mut Row) -> Result<(), Error> {
        self(row)
    }
}

#[derive(Clone, Default)]
pub struct Table {
    columns: Arc<ColumnMap>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_columns(columns: impl IntoIterator<Item = Column>) -> Result<Self, Error> {
        Ok(Self {
            columns: Arc::new(ColumnMap::from_columns(columns)?),
            rows: Vec::new(),
        })
    }

    /// Drop all rows and columns.
    pub fn clear(&mut self) {
        self.columns = Arc::new(ColumnMap::new());
        self.rows.clear();
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_map(&self) -> &ColumnMap {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column<'a>(&self, key: impl Into<ColumnKey<'a>>) -> Result<&Column, Error> {
        self.columns.column(key)
    }

    pub fn column_at(&self, pos: usize) -> Result<&Column, Error> {
        self.columns.column_at(pos)
    }

    pub fn index_of<'a>(&self, key: impl Into<ColumnKey<'a>>) -> Option<usize> {
        self.columns.index_of(key)
    }

    // ---- columns ----

    /// Append a column to a table without rows.
    pub fn add_column(&mut self, column: Column) -> Result<usize, Error> {
        self.require_no_rows()?;
        let pos = self.columns.len();
        self.restructure(|map| map.insert_column(column, pos), |_, _| Ok(()))
    }

    /// Append a column, filling existing rows with `default`.
    pub fn add_column_with_default(&mut self, column: Column, default: &Object) -> Result<usize, Error> {
        let pos = self.columns.len();
        self.insert_column_with_default(column, pos, default)
    }

    /// Insert a column at `pos` in a table without rows.
    pub fn insert_column(&mut self, column: Column, pos: usize) -> Result<usize, Error> {
        self.require_no_rows()?;
        self.restructure(|map| map.insert_column(column, pos), |_, _| Ok(()))
    }

    /// Insert a column at `pos`, filling existing rows with `default`.
    pub fn insert_column_with_default(
        &mut self,
        column: Column,
        pos: usize,
        default: &Object,
    ) -> Result<usize, Error> {
        let value = conform(column.ty(), default, column.name())?;
        self.restructure(
            |map| map.insert_column(column, pos),
            |values, pos| {
                values.insert(pos, value.clone());
                Ok(())
            },
        )
    }

    pub fn remove_column<'a>(&mut self, key: impl Into<ColumnKey<'a>>) -> Result<Column, Error> {
        let key = key.into();
        let mut removed = None;
        self.restructure(
            |map| {
                let (pos, column) = map.remove_column(key)?;
                removed = Some(column);
                Ok(pos)
            },
            |values, pos| {
                values.remove(pos);
                Ok(())
            },
        )?;
        removed.ok_or_else(|| Error::new(ErrorKind::Internal).with_message("column vanished"))
    }

    /// Move a column to `pos`; row slots move with it.
    pub fn move_column<'a>(&mut self, key: impl Into<ColumnKey<'a>>, pos: usize) -> Result<(), Error> {
        let key = key.into();
        let from = self.columns.position(key)?;
        self.restructure(
            |map| map.move_column(key, pos).map(|_| pos),
            move |values, to| {
                let value = values.remove(from);
                values.insert(to, value);
                Ok(())
            },
        )?;
        Ok(())
    }

    fn require_no_rows(&self) -> Result<(), Error> {
        if self.rows.is_empty() {
            Ok(())
        } else {
            Err(usage("table already has rows; provide a default value for the new column"))
        }
    }

    /// Apply a schema change and the matching slot change to every row, or neither.
    fn restructure<S, R>(&mut self, change_schema: S, mut change_row: R) -> Result<usize, Error>
    where
        S: FnOnce(&mut ColumnMap) -> Result<usize, Error>,
        R: FnMut(&mut Vec<Object>, usize) -> Result<(), Error>,
    {
        let mut map = ColumnMap::clone(&self.columns);
        let pos = change_schema(&mut map)?;
        let map = Arc::new(map);
        let mut rows = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let mut values = row.values.clone();
            change_row(&mut values, pos)?;
            rows.push(Row {
                columns: Arc::clone(&map),
                values,
                handle: row.handle,
            });
        }
        self.columns = map;
        self.rows = rows;
        Ok(pos)
    }

    // ---- rows ----

    pub fn row(&self, pos: usize) -> Result<&Row, Error> {
        self.rows.get(pos).ok_or_else(|| row_out_of_range(pos, self.rows.len()))
    }

    pub fn row_mut(&mut self, pos: usize) -> Result<&mut Row, Error> {
        let len = self.rows.len();
        self.rows.get_mut(pos).ok_or_else(|| row_out_of_range(pos, len))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Row> {
        self.rows.iter_mut()
    }

    /// A detached row shaped like the current schema, holding default values.
    pub fn create_row(&self) -> Row {
        Row::blank(Arc::clone(&self.columns))
    }

    pub fn add_row(&mut self, row: &Row) -> Result<(), Error> {
        let pos = self.rows.len();
        self.insert_row(row, pos)
    }

    /// Copy `row` into the table at `pos`, converting values into column types.
    pub fn insert_row(&mut self, row: &Row, pos: usize) -> Result<(), Error> {
        if pos > self.rows.len() {
            return Err(row_out_of_range(pos, self.rows.len()));
        }
        let mut owned = self.conform_row(row)?;
        owned.handle = Some(next_handle());
        self.rows.insert(pos, owned);
        Ok(())
    }

    /// Delete the row `row` was read from, or else the first row with equal values.
    pub fn delete_row(&mut self, row: &Row) -> Result<(), Error> {
        let pos = self.locate(row)?;
        self.rows.remove(pos);
        Ok(())
    }

    /// Replace the row `row` was read from with its current values.
    pub fn update_row(&mut self, row: &Row) -> Result<(), Error> {
        let pos = self.locate(row)?;
        let mut owned = self.conform_row(row)?;
        owned.handle = self.rows[pos].handle;
        self.rows[pos] = owned;
        Ok(())
    }

    /// Delete every row matching the query expression; returns the count removed.
    pub fn delete_rows(&mut self, query: &str) -> Result<usize, Error> {
        let predicate = RowQuery::compile(query, &self.columns)?;
        self.delete_rows_matching(&predicate)
    }

    /// Apply the update expression to every row matching the query; returns the count updated.
    pub fn update_rows(&mut self, operation: &str, query: &str) -> Result<usize, Error> {
        let predicate = RowQuery::compile(query, &self.columns)?;
        let operation = RowUpdate::compile(operation, &self.columns)?;
        self.update_rows_matching(&operation, &predicate)
    }

    pub fn delete_rows_matching(&mut self, predicate: &dyn RowPredicate) -> Result<usize, Error> {
        let selected = self.select(predicate)?;
        let before = self.rows.len();
        let mut flags = selected.into_iter();
        self.rows.retain(|_| !flags.next().unwrap_or(false));
        Ok(before - self.rows.len())
    }

    pub fn update_rows_matching(
        &mut self,
        operation: &dyn RowOperation,
        predicate: &dyn RowPredicate,
    ) -> Result<usize, Error> {
        let selected = self.select(predicate)?;
        let mut staged = Vec::new();
        for (pos, row) in self.rows.iter().enumerate() {
            if !selected[pos] {
                continue;
            }
            let mut candidate = row.clone();
            operation.apply(&mut candidate)?;
            let mut owned = self.conform_row(&candidate)?;
            owned.handle = row.handle;
            staged.push((pos, owned));
        }
        let count = staged.len();
        for (pos, row) in staged {
            self.rows[pos] = row;
        }
        Ok(count)
    }

    fn select(&self, predicate: &dyn RowPredicate) -> Result<Vec<bool>, Error> {
        self.rows.iter().map(|row| predicate.matches(row)).collect()
    }

    fn locate(&self, row: &Row) -> Result<usize, Error> {
        if let Some(handle) = row.handle {
            if let Some(pos) = self.rows.iter().position(|own| own.handle == Some(handle)) {
                return Ok(pos);
            }
        }
        self.rows
            .iter()
            .position(|own| own.same_values(row))
            .ok_or_else(|| Error::new(ErrorKind::RowNotFound).with_message("no matching row in table"))
    }

    /// Table-owned copy of `row` laid out and typed like the current schema.
    fn conform_row(&self, row: &Row) -> Result<Row, Error> {
        let aligned = Arc::ptr_eq(&row.columns, &self.columns);
        if row.len() != self.columns.len() {
            return Err(Error::new(ErrorKind::SchemaMismatch).with_message(format!(
                "row has {} values, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        let mut values = Vec::with_capacity(row.len());
        for (pos, column) in self.columns.iter().enumerate() {
            let value = if aligned {
                &row.values[pos]
            } else {
                row.get(column.name()).map_err(|_| {
                    Error::new(ErrorKind::SchemaMismatch)
                        .with_message(format!("row has no value for column `{}`", column.name()))
                })?
            };
            values.push(conform(column.ty(), value, column.name())?);
        }
        Ok(Row {
            columns: Arc::clone(&self.columns),
            values,
            handle: None,
        })
    }
}

impl<'a> IntoIterator for &'a Table {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("columns", &self.columns.iter().map(Column::name).collect::<Vec<_>>())
            .field("rows", &self.rows)
            .finish()
    }
}

fn conform(ty: Type, value: &Object, column: &str) -> Result<Object, Error> {
    if value.ty() == ty {
        return Ok(value.clone());
    }
    let mut converted = Object::of_type(ty);
    if value.is_null() || converted.assign(value).is_err() {
        return Err(Error::new(ErrorKind::SchemaMismatch).with_message(format!(
            "column `{column}` expects {ty}, got {}",
            value.ty()
        )));
    }
    Ok(converted)
}

fn row_out_of_range(pos: usize, len: usize) -> Error {
    Error::new(ErrorKind::IndexOutOfRange)
        .with_message(format!("table has {len} rows"))
        .with_index(pos)
}
