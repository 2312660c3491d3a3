//! Purpose: Ordered, dual-indexed schema describing a record shape.
//! Exports: `Column`, `ColumnMap`, `ColumnKey`.
//! Role: Shared by `Table`, `Row` and table formats to resolve columns by id or name.
//! Invariants: Ids and names are unique within one map; ids are assigned max+1 when absent.
//! Invariants: Lookups never reorder entries.
use std::collections::HashMap;
use std::fmt;

use crate::core::error::{Error, ErrorKind};
use crate::core::types::Type;

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    id: Option<usize>,
    name: String,
    ty: Type,
    description: String,
}

impl Column {
    /// A column whose id is assigned when it joins a map.
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            id: None,
            name: name.into(),
            ty,
            description: String::new(),
        }
    }

    pub fn with_id(id: usize, name: impl Into<String>, ty: Type) -> Self {
        Self {
            id: Some(id),
            ..Self::new(name, ty)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn id(&self) -> Option<usize> {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> Type {
        self.ty
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Column selector: by id or by name.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ColumnKey<'a> {
    Id(usize),
    Name(&'a str),
}

impl From<usize> for ColumnKey<'_> {
    fn from(id: usize) -> Self {
        ColumnKey::Id(id)
    }
}

impl<'a> From<&'a str> for ColumnKey<'a> {
    fn from(name: &'a str) -> Self {
        ColumnKey::Name(name)
    }
}

impl<'a> From<&'a String> for ColumnKey<'a> {
    fn from(name: &'a String) -> Self {
        ColumnKey::Name(name)
    }
}

impl fmt::Display for ColumnKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKey::Id(id) => write!(f, "#{id}"),
            ColumnKey::Name(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ColumnMap {
    columns: Vec<Column>,
    by_id: HashMap<usize, usize>,
    by_name: HashMap<String, usize>,
}

impl ColumnMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_columns(columns: impl IntoIterator<Item = Column>) -> Result<Self, Error> {
        let mut map = Self::new();
        for column in columns {
            map.add_column(column)?;
        }
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Column> {
        self.columns.iter()
    }

    /// Append `column`, returning its position.
    pub fn add_column(&mut self, column: Column) -> Result<usize, Error> {
        self.insert_column(column, self.columns.len())
    }

    /// Insert `column` at `pos`, shifting later columns right.
    pub fn insert_column(&mut self, mut column: Column, pos: usize) -> Result<usize, Error> {
        if pos > self.columns.len() {
            return Err(Error::new(ErrorKind::IndexOutOfRange)
                .with_message(format!("column position beyond {} columns", self.columns.len()))
                .with_index(pos));
        }
        if column.ty().is_null() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("column `{}` has no element type", column.name())));
        }
        if self.by_name.contains_key(column.name()) {
            return Err(Error::new(ErrorKind::DuplicateColumn)
                .with_message(format!("column name `{}` already exists", column.name())));
        }
        let id = match column.id {
            Some(id) if self.by_id.contains_key(&id) => {
                return Err(Error::new(ErrorKind::DuplicateColumn)
                    .with_message(format!("column id {id} already exists")));
            }
            Some(id) => id,
            None => self.next_id()?,
        };
        column.id = Some(id);
        self.columns.insert(pos, column);
        self.reindex();
        Ok(pos)
    }

    /// Remove the column selected by `key`, returning its former position and definition.
    pub fn remove_column<'a>(&mut self, key: impl Into<ColumnKey<'a>>) -> Result<(usize, Column), Error> {
        let pos = self.position(key.into())?;
        let column = self.columns.remove(pos);
        self.reindex();
        Ok((pos, column))
    }

    /// Move the column selected by `key` to `pos`, returning its former position.
    pub fn move_column<'a>(&mut self, key: impl Into<ColumnKey<'a>>, pos: usize) -> Result<usize, Error> {
        let from = self.position(key.into())?;
        if pos >= self.columns.len() {
            return Err(Error::new(ErrorKind::IndexOutOfRange)
                .with_message(format!("column position beyond {} columns", self.columns.len()))
                .with_index(pos));
        }
        let column = self.columns.remove(from);
        self.columns.insert(pos, column);
        self.reindex();
        Ok(from)
    }

    pub fn column<'a>(&self, key: impl Into<ColumnKey<'a>>) -> Result<&Column, Error> {
        let pos = self.position(key.into())?;
        Ok(&self.columns[pos])
    }

    pub fn column_at(&self, pos: usize) -> Result<&Column, Error> {
        self.columns.get(pos).ok_or_else(|| {
            Error::new(ErrorKind::IndexOutOfRange)
                .with_message(format!("table has {} columns", self.columns.len()))
                .with_index(pos)
        })
    }

    /// Position of the selected column, `None` when absent.
    pub fn index_of<'a>(&self, key: impl Into<ColumnKey<'a>>) -> Option<usize> {
        match key.into() {
            ColumnKey::Id(id) => self.by_id.get(&id).copied(),
            ColumnKey::Name(name) => self.by_name.get(name).copied(),
        }
    }

    pub(crate) fn position(&self, key: ColumnKey<'_>) -> Result<usize, Error> {
        self.index_of(key).ok_or_else(|| {
            Error::new(ErrorKind::ColumnNotFound).with_message(format!("no column {key}"))
        })
    }

    fn next_id(&self) -> Result<usize, Error> {
        match self.by_id.keys().max() {
            None => Ok(1),
            Some(max) => max.checked_add(1).ok_or_else(|| {
                Error::new(ErrorKind::IndexOutOfRange)
                    .with_message("no column id left after the largest assigned id")
                    .with_index(*max)
            }),
        }
    }

    fn reindex(&mut self) {
        self.by_id.clear();
        self.by_name.clear();
        for (pos, column) in self.columns.iter().enumerate() {
            if let Some(id) = column.id {
                self.by_id.insert(id, pos);
            }
            self.by_name.insert(column.name.clone(), pos);
        }
    }
}

impl PartialEq for ColumnMap {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

impl<'a> IntoIterator for &'a ColumnMap {
    type Item = &'a Column;
    type IntoIter = std::slice::Iter<'a, Column>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::{Column, ColumnMap};
    use crate::core::error::ErrorKind;
    use crate::core::types::Type;

    #[test]
    fn new_column_has_no_id() {
        let column = Column::new("firstCol", Type::float()).with_description("defocus");
        assert_eq!(column.id(), None);
        assert_eq!(column.name(), "firstCol");
        assert_eq!(column.ty(), Type::float());
        assert_eq!(column.description(), "defocus");
    }

    #[test]
    fn ids_are_assigned_after_the_largest() {
        let mut map = ColumnMap::new();
        assert_eq!(map.add_column(Column::new("firstCol", Type::float())).unwrap(), 0);
        assert_eq!(map.add_column(Column::new("secondCol", Type::int16())).unwrap(), 1);
        assert_eq!(map.column_at(0).unwrap().id(), Some(1));
        assert_eq!(map.column_at(1).unwrap().id(), Some(2));

        let third = map
            .add_column(Column::with_id(100, "thirdCol", Type::float()))
            .unwrap();
        map.add_column(Column::new("forthCol", Type::float())).unwrap();
        assert_eq!(map.column_at(third).unwrap().id(), Some(100));
        assert_eq!(map.column_at(third + 1).unwrap().id(), Some(101));
    }

    #[test]
    fn lookups_by_id_and_name() {
        let map = ColumnMap::from_columns([
            Column::new("a", Type::int32()),
            Column::new("b", Type::string()),
        ])
        .unwrap();
        assert_eq!(map.index_of("b"), Some(1));
        assert_eq!(map.index_of(1usize), Some(0));
        assert_eq!(map.index_of(100usize), None);
        assert_eq!(map.index_of("noColumn"), None);
        assert_eq!(map.column("a").unwrap().ty(), Type::int32());

        let err = map.column("missing").expect_err("absent");
        assert_eq!(err.kind(), ErrorKind::ColumnNotFound);
        let err = map.column_at(5).expect_err("absent");
        assert_eq!(err.kind(), ErrorKind::IndexOutOfRange);
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut map = ColumnMap::new();
        map.add_column(Column::with_id(1, "x", Type::int32())).unwrap();
        let err = map
            .add_column(Column::with_id(1, "y", Type::int32()))
            .expect_err("dup id");
        assert_eq!(err.kind(), ErrorKind::DuplicateColumn);
        let err = map
            .add_column(Column::new("x", Type::float()))
            .expect_err("dup name");
        assert_eq!(err.kind(), ErrorKind::DuplicateColumn);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn exhausted_ids_are_an_error() {
        let mut map = ColumnMap::new();
        map.add_column(Column::with_id(usize::MAX, "last", Type::int32())).unwrap();
        let err = map
            .add_column(Column::new("next", Type::int32()))
            .expect_err("no id left");
        assert_eq!(err.kind(), ErrorKind::IndexOutOfRange);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn untyped_columns_are_rejected() {
        let mut map = ColumnMap::new();
        let err = map
            .add_column(Column::new("untyped", Type::null()))
            .expect_err("null type");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(map.is_empty());
    }

    #[test]
    fn insert_shifts_following_columns() {
        let mut map = ColumnMap::from_columns([
            Column::new("firstCol", Type::float()),
            Column::new("secondCol", Type::float()),
            Column::new("thirdCol", Type::float()),
            Column::new("forthCol", Type::float()),
        ])
        .unwrap();
        let pos = map.insert_column(Column::new("thirdBCol", Type::float()), 3).unwrap();
        assert_eq!(pos, 3);
        for (i, name) in ["firstCol", "secondCol", "thirdCol", "thirdBCol", "forthCol"]
            .iter()
            .enumerate()
        {
            assert_eq!(map.index_of(*name), Some(i));
        }
    }

    #[test]
    fn move_and_remove_keep_indexes_consistent() {
        let mut map = ColumnMap::from_columns([
            Column::new("a", Type::int32()),
            Column::new("b", Type::int32()),
            Column::new("c", Type::int32()),
        ])
        .unwrap();
        assert_eq!(map.move_column("a", 2).unwrap(), 0);
        assert_eq!(map.index_of("a"), Some(2));
        assert_eq!(map.index_of(1usize), Some(2));
        assert_eq!(map.index_of("b"), Some(0));

        let (pos, removed) = map.remove_column("b").unwrap();
        assert_eq!(pos, 0);
        assert_eq!(removed.name(), "b");
        assert_eq!(map.index_of("c"), Some(0));
        assert_eq!(map.index_of("a"), Some(1));
    }
}
