//! Mutable implementation of a database catalog.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::catalog::{Catalog, Index, IndexRef, Table, TableRef};
use crate::error::OptimizerError;

/// A [database catalog] that stores database objects in memory and provides operation to add/remove database objects.
///
/// # Error handling
///
/// Errors returned by methods of the `MutableCatalog` are recoverable.
///
/// [database catalog]: crate::catalog::Catalog
#[derive(Debug, Default)]
pub struct MutableCatalog {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, TableRef>,
    indexes: HashMap<String, IndexRef>,
}

impl MutableCatalog {
    /// Creates a instance of [MutableCatalog].
    pub fn new() -> Self {
        MutableCatalog::default()
    }

    /// Adds the given table to this catalog.
    /// If the table already exists this method returns an error.
    pub fn add_table(&self, table: Table) -> Result<TableRef, OptimizerError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match inner.tables.entry(table.name().to_string()) {
            Entry::Occupied(_) => Err(OptimizerError::argument(format!("Table already exists. Table: {}", table.name()))),
            Entry::Vacant(v) => {
                let table = Arc::new(table);
                v.insert(table.clone());
                Ok(table)
            }
        }
    }

    /// Adds the given index to this catalog.
    /// If the index already exists or its table does not exist this method returns an error.
    pub fn add_index(&self, index: Index) -> Result<(), OptimizerError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if !inner.tables.contains_key(index.table()) {
            let message = format!("Table does not exist. Table: {} index: {}", index.table(), index.name());
            return Err(OptimizerError::argument(message));
        }
        match inner.indexes.entry(index.name().to_string()) {
            Entry::Occupied(_) => Err(OptimizerError::argument(format!("Index already exists. Index: {}", index.name()))),
            Entry::Vacant(v) => {
                v.insert(Arc::new(index));
                Ok(())
            }
        }
    }

    /// Removes a database table with name `table` and all its indexes.
    /// If the table does not exist this method returns an error.
    pub fn remove_table(&self, table: &str) -> Result<(), OptimizerError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.tables.remove(table).is_none() {
            return Err(OptimizerError::argument(format!("Table does not exist. Table: {}", table)));
        }
        inner.indexes.retain(|_, index| index.table() != table);
        Ok(())
    }
}

impl Catalog for MutableCatalog {
    fn get_table(&self, name: &str) -> Option<TableRef> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.tables.get(name).cloned()
    }

    fn get_index(&self, name: &str) -> Option<IndexRef> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.indexes.get(name).cloned()
    }

    fn get_indexes(&self, table: &str) -> Vec<IndexRef> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut indexes: Vec<IndexRef> = inner.indexes.values().filter(|i| i.table() == table).cloned().collect();
        indexes.sort_by(|a, b| a.name().cmp(b.name()));
        indexes
    }
}
