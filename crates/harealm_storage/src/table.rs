//! Tables: typed columns over stably keyed rows.

use crate::cell::{Cell, ColumnType, IndexKey, RowKey};
use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Declaration of a single column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name, unique within its table.
    pub name: String,
    /// Storage type.
    pub ty: ColumnType,
    /// Target table name for link columns.
    pub link_target: Option<String>,
    /// Whether a search index is maintained.
    pub indexed: bool,
}

impl ColumnSpec {
    /// Creates an unindexed scalar column.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            link_target: None,
            indexed: false,
        }
    }

    /// Creates a link or link-list column targeting `target`.
    #[must_use]
    pub fn link(name: impl Into<String>, ty: ColumnType, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty,
            link_target: Some(target.into()),
            indexed: false,
        }
    }

    /// Marks the column as indexed.
    #[must_use]
    pub fn with_index(mut self) -> Self {
        self.indexed = true;
        self
    }
}

type SearchIndex = HashMap<IndexKey, BTreeSet<RowKey>>;

/// A table of rows with a fixed column layout.
///
/// Rows are kept in key order, which is also insertion order. Search
/// indexes are derived data and are rebuilt after decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    name: String,
    columns: Vec<ColumnSpec>,
    rows: BTreeMap<RowKey, Vec<Cell>>,
    next_key: u64,
    #[serde(skip)]
    indexes: HashMap<String, SearchIndex>,
}

impl Table {
    /// Creates an empty table with no columns.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            rows: BTreeMap::new(),
            next_key: 0,
            indexes: HashMap::new(),
        }
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the column layout.
    #[must_use]
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Returns the column at `index`.
    #[must_use]
    pub fn column(&self, index: usize) -> Option<&ColumnSpec> {
        self.columns.get(index)
    }

    /// Finds a column by name.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Returns the number of live rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns true if `key` is a live row.
    #[must_use]
    pub fn contains(&self, key: RowKey) -> bool {
        self.rows.contains_key(&key)
    }

    /// Iterates live row keys in storage order.
    pub fn row_keys(&self) -> impl Iterator<Item = RowKey> + '_ {
        self.rows.keys().copied()
    }

    /// Appends a column. Existing rows receive the type's default cell.
    pub fn add_column(&mut self, spec: ColumnSpec) -> StorageResult<usize> {
        let position = self.columns.len();
        self.insert_column(position, spec)?;
        Ok(position)
    }

    /// Inserts a column at `position`.
    pub fn insert_column(&mut self, position: usize, spec: ColumnSpec) -> StorageResult<()> {
        if self.column_index(&spec.name).is_some() {
            return Err(StorageError::DuplicateColumn {
                table: self.name.clone(),
                column: spec.name,
            });
        }
        if spec.indexed && !spec.ty.is_indexable() {
            return Err(self.not_indexable(&spec.name));
        }
        let position = position.min(self.columns.len());
        let default = spec.ty.default_cell();
        for cells in self.rows.values_mut() {
            cells.insert(position, default.clone());
        }
        let indexed = spec.indexed;
        self.columns.insert(position, spec);
        if indexed {
            self.build_index(position);
        }
        Ok(())
    }

    /// Removes a column and its data.
    pub fn remove_column(&mut self, index: usize) -> StorageResult<ColumnSpec> {
        self.check_column(index)?;
        for cells in self.rows.values_mut() {
            cells.remove(index);
        }
        let spec = self.columns.remove(index);
        self.indexes.remove(&spec.name);
        Ok(spec)
    }

    /// Moves a column from `from` to `to`, keeping its data.
    pub fn move_column(&mut self, from: usize, to: usize) -> StorageResult<()> {
        self.check_column(from)?;
        self.check_column(to)?;
        if from == to {
            return Ok(());
        }
        let spec = self.columns.remove(from);
        self.columns.insert(to, spec);
        for cells in self.rows.values_mut() {
            let cell = cells.remove(from);
            cells.insert(to, cell);
        }
        Ok(())
    }

    /// Adds or removes the search index on a column.
    pub fn set_indexed(&mut self, index: usize, indexed: bool) -> StorageResult<()> {
        self.check_column(index)?;
        let spec = &self.columns[index];
        if indexed && !spec.ty.is_indexable() {
            return Err(self.not_indexable(&spec.name));
        }
        if spec.indexed == indexed {
            return Ok(());
        }
        self.columns[index].indexed = indexed;
        if indexed {
            self.build_index(index);
        } else {
            let name = self.columns[index].name.clone();
            self.indexes.remove(&name);
        }
        Ok(())
    }

    /// Adds a row filled with default cells and returns its key.
    pub fn add_row(&mut self) -> RowKey {
        let key = RowKey::new(self.next_key);
        self.next_key += 1;
        let cells: Vec<Cell> = self.columns.iter().map(|c| c.ty.default_cell()).collect();
        for (spec, cell) in self.columns.iter().zip(&cells) {
            if spec.indexed {
                if let Some(index_key) = cell.index_key() {
                    self.indexes
                        .entry(spec.name.clone())
                        .or_default()
                        .entry(index_key)
                        .or_default()
                        .insert(key);
                }
            }
        }
        self.rows.insert(key, cells);
        key
    }

    /// Removes a row.
    pub fn remove_row(&mut self, key: RowKey) -> StorageResult<()> {
        let cells = self.rows.remove(&key).ok_or_else(|| self.no_such_row(key))?;
        for (spec, cell) in self.columns.iter().zip(&cells) {
            if spec.indexed {
                if let Some(index) = self.indexes.get_mut(&spec.name) {
                    Self::index_remove(index, cell, key);
                }
            }
        }
        Ok(())
    }

    /// Removes every row. Row keys are not reused afterwards.
    pub fn clear(&mut self) {
        self.rows.clear();
        for index in self.indexes.values_mut() {
            index.clear();
        }
    }

    /// Reads a cell.
    pub fn get(&self, key: RowKey, column: usize) -> StorageResult<&Cell> {
        self.check_column(column)?;
        let cells = self.rows.get(&key).ok_or_else(|| self.no_such_row(key))?;
        Ok(&cells[column])
    }

    /// Writes a cell, keeping the search index current.
    pub fn set(&mut self, key: RowKey, column: usize, cell: Cell) -> StorageResult<()> {
        self.check_column(column)?;
        let spec = &self.columns[column];
        if !spec.ty.accepts(&cell) {
            return Err(StorageError::TypeMismatch {
                table: self.name.clone(),
                column: spec.name.clone(),
                expected: spec.ty,
            });
        }
        let indexed = spec.indexed;
        let name = spec.name.clone();
        let Some(cells) = self.rows.get_mut(&key) else {
            return Err(StorageError::NoSuchRow {
                table: self.name.clone(),
                row: key,
            });
        };
        let old = std::mem::replace(&mut cells[column], cell);
        if indexed {
            let index = self.indexes.entry(name).or_default();
            Self::index_remove(index, &old, key);
            if let Some(index_key) = cells[column].index_key() {
                index.entry(index_key).or_default().insert(key);
            }
        }
        Ok(())
    }

    /// Finds the first row, in storage order, whose cell equals `value`.
    pub fn find_first(&self, column: usize, value: &Cell) -> StorageResult<Option<RowKey>> {
        self.check_column(column)?;
        let spec = &self.columns[column];
        if spec.indexed {
            if let (Some(index), Some(index_key)) =
                (self.indexes.get(&spec.name), value.index_key())
            {
                return Ok(index
                    .get(&index_key)
                    .and_then(|keys| keys.iter().next().copied()));
            }
        }
        Ok(self
            .rows
            .iter()
            .find(|(_, cells)| &cells[column] == value)
            .map(|(key, _)| *key))
    }

    /// Counts the rows whose cell equals `value`.
    pub fn count_equal(&self, column: usize, value: &Cell) -> StorageResult<usize> {
        self.check_column(column)?;
        let spec = &self.columns[column];
        if let (true, Some(index), Some(index_key)) = (
            spec.indexed,
            self.indexes.get(&spec.name),
            value.index_key(),
        ) {
            return Ok(index.get(&index_key).map_or(0, BTreeSet::len));
        }
        Ok(self
            .rows
            .values()
            .filter(|cells| &cells[column] == value)
            .count())
    }

    /// Rebuilds every search index from the row data.
    pub fn rebuild_indexes(&mut self) {
        self.indexes.clear();
        for position in 0..self.columns.len() {
            if self.columns[position].indexed {
                self.build_index(position);
            }
        }
    }

    /// Returns true if any link column targeting `target` points at `key`.
    #[must_use]
    pub fn links_to_row(&self, target: &str, key: RowKey) -> bool {
        self.link_columns(target).any(|column| {
            self.rows.values().any(|cells| match &cells[column] {
                Cell::Link(link) => *link == Some(key),
                Cell::LinkList(links) => links.contains(&key),
                _ => false,
            })
        })
    }

    /// Nullifies links and removes list entries pointing at `key`.
    pub fn unlink_row(&mut self, target: &str, key: RowKey) {
        let columns: Vec<usize> = self.link_columns(target).collect();
        for cells in self.rows.values_mut() {
            for &column in &columns {
                match &mut cells[column] {
                    Cell::Link(link) if *link == Some(key) => *link = None,
                    Cell::LinkList(links) => links.retain(|k| *k != key),
                    _ => {}
                }
            }
        }
    }

    /// Returns true if any link column targeting `target` holds a link.
    #[must_use]
    pub fn links_to_table(&self, target: &str) -> bool {
        self.link_columns(target).any(|column| {
            self.rows.values().any(|cells| match &cells[column] {
                Cell::Link(link) => link.is_some(),
                Cell::LinkList(links) => !links.is_empty(),
                _ => false,
            })
        })
    }

    /// Clears every link pointing into `target`.
    pub fn unlink_table(&mut self, target: &str) {
        let columns: Vec<usize> = self.link_columns(target).collect();
        for cells in self.rows.values_mut() {
            for &column in &columns {
                cells[column] = self.columns[column].ty.default_cell();
            }
        }
    }

    fn link_columns<'a>(&'a self, target: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.columns.iter().enumerate().filter_map(move |(i, c)| {
            (c.ty.is_link() && c.link_target.as_deref() == Some(target)).then_some(i)
        })
    }

    fn build_index(&mut self, column: usize) {
        let mut index = SearchIndex::new();
        for (key, cells) in &self.rows {
            if let Some(index_key) = cells[column].index_key() {
                index.entry(index_key).or_default().insert(*key);
            }
        }
        self.indexes.insert(self.columns[column].name.clone(), index);
    }

    fn index_remove(index: &mut SearchIndex, cell: &Cell, key: RowKey) {
        if let Some(index_key) = cell.index_key() {
            if let Some(keys) = index.get_mut(&index_key) {
                keys.remove(&key);
                if keys.is_empty() {
                    index.remove(&index_key);
                }
            }
        }
    }

    fn check_column(&self, index: usize) -> StorageResult<()> {
        if index < self.columns.len() {
            Ok(())
        } else {
            Err(StorageError::NoSuchColumn {
                table: self.name.clone(),
                column: format!("#{index}"),
            })
        }
    }

    fn no_such_row(&self, row: RowKey) -> StorageError {
        StorageError::NoSuchRow {
            table: self.name.clone(),
            row,
        }
    }

    fn not_indexable(&self, column: &str) -> StorageError {
        StorageError::NotIndexable {
            table: self.name.clone(),
            column: column.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> Table {
        let mut table = Table::new("class_Person");
        table
            .add_column(ColumnSpec::new("name", ColumnType::String).with_index())
            .unwrap();
        table
            .add_column(ColumnSpec::new("age", ColumnType::Int))
            .unwrap();
        table
    }

    fn insert(table: &mut Table, name: &str, age: i64) -> RowKey {
        let key = table.add_row();
        table.set(key, 0, Cell::String(name.into())).unwrap();
        table.set(key, 1, Cell::Int(age)).unwrap();
        key
    }

    #[test]
    fn rows_keep_insertion_order() {
        let mut table = people();
        let a = insert(&mut table, "a", 1);
        let b = insert(&mut table, "b", 2);
        table.remove_row(a).unwrap();
        let c = insert(&mut table, "c", 3);
        assert_eq!(table.row_keys().collect::<Vec<_>>(), vec![b, c]);
        assert!(c > b);
    }

    #[test]
    fn indexed_lookup_tracks_updates() {
        let mut table = people();
        let key = insert(&mut table, "alice", 30);
        let alice = Cell::String("alice".into());
        assert_eq!(table.find_first(0, &alice).unwrap(), Some(key));

        table.set(key, 0, Cell::String("bob".into())).unwrap();
        assert_eq!(table.find_first(0, &alice).unwrap(), None);
        assert_eq!(
            table.find_first(0, &Cell::String("bob".into())).unwrap(),
            Some(key)
        );

        table.remove_row(key).unwrap();
        assert_eq!(table.count_equal(0, &Cell::String("bob".into())).unwrap(), 0);
    }

    #[test]
    fn unindexed_lookup_scans() {
        let mut table = people();
        insert(&mut table, "a", 5);
        let b = insert(&mut table, "b", 7);
        assert_eq!(table.find_first(1, &Cell::Int(7)).unwrap(), Some(b));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let mut table = people();
        let key = table.add_row();
        let err = table.set(key, 1, Cell::String("x".into())).unwrap_err();
        assert!(matches!(err, StorageError::TypeMismatch { .. }));
    }

    #[test]
    fn add_column_fills_defaults() {
        let mut table = people();
        let key = insert(&mut table, "a", 1);
        let column = table
            .add_column(ColumnSpec::new("score", ColumnType::Double))
            .unwrap();
        assert_eq!(table.get(key, column).unwrap(), &Cell::Double(0.0));
    }

    #[test]
    fn move_column_keeps_data() {
        let mut table = people();
        let key = insert(&mut table, "a", 9);
        table.move_column(1, 0).unwrap();
        assert_eq!(table.columns()[0].name, "age");
        assert_eq!(table.get(key, 0).unwrap(), &Cell::Int(9));
        assert_eq!(table.get(key, 1).unwrap(), &Cell::String("a".into()));
    }

    #[test]
    fn remove_column_drops_index() {
        let mut table = people();
        insert(&mut table, "a", 1);
        table.remove_column(0).unwrap();
        assert_eq!(table.columns().len(), 1);
        assert_eq!(table.column_index("name"), None);
    }

    #[test]
    fn duplicate_column_rejected() {
        let mut table = people();
        let err = table
            .add_column(ColumnSpec::new("name", ColumnType::Int))
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateColumn { .. }));
    }

    #[test]
    fn binary_columns_are_not_indexable() {
        let mut table = people();
        let err = table
            .add_column(ColumnSpec::new("blob", ColumnType::Binary).with_index())
            .unwrap_err();
        assert!(matches!(err, StorageError::NotIndexable { .. }));
    }

    #[test]
    fn unlink_row_clears_links_and_list_entries() {
        let mut table = Table::new("class_Owner");
        table
            .add_column(ColumnSpec::link("dog", ColumnType::Link, "class_Dog"))
            .unwrap();
        table
            .add_column(ColumnSpec::link("dogs", ColumnType::LinkList, "class_Dog"))
            .unwrap();
        let owner = table.add_row();
        let dog = RowKey::new(3);
        table.set(owner, 0, Cell::Link(Some(dog))).unwrap();
        table
            .set(owner, 1, Cell::LinkList(vec![dog, RowKey::new(4), dog]))
            .unwrap();

        assert!(table.links_to_row("class_Dog", dog));
        table.unlink_row("class_Dog", dog);
        assert!(!table.links_to_row("class_Dog", dog));
        assert_eq!(table.get(owner, 0).unwrap(), &Cell::Link(None));
        assert_eq!(
            table.get(owner, 1).unwrap(),
            &Cell::LinkList(vec![RowKey::new(4)])
        );
    }
}
