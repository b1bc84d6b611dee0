//! Groups: the set of tables forming one consistent database state.

use crate::cell::RowKey;
use crate::error::{StorageError, StorageResult};
use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A named collection of tables.
///
/// Tables are shared copy-on-write, so cloning a group is cheap and a write
/// transaction only copies the tables it actually modifies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Group {
    tables: BTreeMap<String, Arc<Table>>,
}

impl Group {
    /// Creates an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the table with the given name.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name).map(|table| &**table)
    }

    /// Returns a mutable handle to a table, copying it if it is shared.
    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name).map(Arc::make_mut)
    }

    /// Returns the table, or a `NoSuchTable` error.
    pub fn require_table(&self, name: &str) -> StorageResult<&Table> {
        self.table(name)
            .ok_or_else(|| StorageError::NoSuchTable(name.to_string()))
    }

    /// Mutable variant of [`Group::require_table`].
    pub fn require_table_mut(&mut self, name: &str) -> StorageResult<&mut Table> {
        self.table_mut(name)
            .ok_or_else(|| StorageError::NoSuchTable(name.to_string()))
    }

    /// Returns true if a table with this name exists.
    #[must_use]
    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Iterates table names in sorted order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Creates an empty table.
    pub fn create_table(&mut self, name: &str) -> StorageResult<&mut Table> {
        if self.tables.contains_key(name) {
            return Err(StorageError::DuplicateTable(name.to_string()));
        }
        let table = self
            .tables
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Table::new(name)));
        Ok(Arc::make_mut(table))
    }

    /// Removes a table, clearing every link that pointed into it.
    pub fn remove_table(&mut self, name: &str) -> StorageResult<()> {
        self.tables
            .remove(name)
            .ok_or_else(|| StorageError::NoSuchTable(name.to_string()))?;
        self.unlink_table(name);
        Ok(())
    }

    /// Deletes a row and removes every link pointing at it.
    ///
    /// Links become null and link lists drop the entry, so no link is left
    /// dangling. Deletion never cascades to linked rows.
    pub fn delete_row(&mut self, table: &str, key: RowKey) -> StorageResult<()> {
        self.require_table_mut(table)?.remove_row(key)?;
        for other in self.tables.values_mut() {
            if other.links_to_row(table, key) {
                Arc::make_mut(other).unlink_row(table, key);
            }
        }
        Ok(())
    }

    /// Deletes every row of a table and every link pointing into it.
    pub fn clear_table(&mut self, table: &str) -> StorageResult<()> {
        self.require_table_mut(table)?.clear();
        self.unlink_table(table);
        Ok(())
    }

    /// Rebuilds the search indexes of every table.
    pub fn rebuild_indexes(&mut self) {
        for table in self.tables.values_mut() {
            Arc::make_mut(table).rebuild_indexes();
        }
    }

    fn unlink_table(&mut self, target: &str) {
        for other in self.tables.values_mut() {
            if other.links_to_table(target) {
                Arc::make_mut(other).unlink_table(target);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{Cell, ColumnType};
    use crate::table::ColumnSpec;

    fn owners_and_dogs() -> (Group, RowKey, RowKey) {
        let mut group = Group::new();
        let dogs = group.create_table("class_Dog").unwrap();
        dogs.add_column(ColumnSpec::new("name", ColumnType::String))
            .unwrap();
        let dog = dogs.add_row();

        let owners = group.create_table("class_Owner").unwrap();
        owners
            .add_column(ColumnSpec::link("pet", ColumnType::Link, "class_Dog"))
            .unwrap();
        owners
            .add_column(ColumnSpec::link("pack", ColumnType::LinkList, "class_Dog"))
            .unwrap();
        let owner = owners.add_row();
        owners.set(owner, 0, Cell::Link(Some(dog))).unwrap();
        owners.set(owner, 1, Cell::LinkList(vec![dog])).unwrap();
        (group, owner, dog)
    }

    #[test]
    fn delete_row_nullifies_links() {
        let (mut group, owner, dog) = owners_and_dogs();
        group.delete_row("class_Dog", dog).unwrap();

        let owners = group.table("class_Owner").unwrap();
        assert_eq!(owners.get(owner, 0).unwrap(), &Cell::Link(None));
        assert_eq!(owners.get(owner, 1).unwrap(), &Cell::LinkList(vec![]));
    }

    #[test]
    fn clear_table_unlinks_everything() {
        let (mut group, owner, _) = owners_and_dogs();
        group.clear_table("class_Dog").unwrap();
        assert!(group.table("class_Dog").unwrap().is_empty());
        let owners = group.table("class_Owner").unwrap();
        assert!(owners.get(owner, 0).unwrap().is_null());
    }

    #[test]
    fn clones_are_copy_on_write() {
        let (group, owner, _) = owners_and_dogs();
        let mut copy = group.clone();
        copy.table_mut("class_Owner")
            .unwrap()
            .set(owner, 0, Cell::Link(None))
            .unwrap();

        assert!(!group
            .table("class_Owner")
            .unwrap()
            .get(owner, 0)
            .unwrap()
            .is_null());
    }

    #[test]
    fn duplicate_table_rejected() {
        let mut group = Group::new();
        group.create_table("t").unwrap();
        assert!(matches!(
            group.create_table("t"),
            Err(StorageError::DuplicateTable(_))
        ));
    }

    #[test]
    fn missing_table_reported() {
        let mut group = Group::new();
        assert!(matches!(
            group.delete_row("nope", RowKey::new(0)),
            Err(StorageError::NoSuchTable(_))
        ));
    }
}
