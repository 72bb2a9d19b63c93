use std::cell::{Ref, RefCell};
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::ops::Deref;
use std::rc::Rc;

use crate::datatypes::DataType;
use crate::error::OptimizerError;

/// Uniquely identifies a column within a query.
pub type ColumnId = usize;

/// A reference to the metadata shared by the components of one optimization.
pub type MetadataRef = Rc<MutableMetadata>;

/// An ordered set of columns. Ordered sets keep derived properties deterministic.
pub type ColumnSet = BTreeSet<ColumnId>;

/// Column metadata. If the table property is set then this is information about a column that belongs
/// to a database table. Otherwise this is a metadata of a synthetic column computed by an operator.
#[derive(Debug, Clone)]
pub struct ColumnMetadata {
    id: ColumnId,
    name: String,
    data_type: DataType,
    table: Option<String>,
    alias: Option<String>,
}

impl ColumnMetadata {
    /// Creates column metadata for a column of the given table accessed under the given alias.
    pub fn new_table_column(name: String, data_type: DataType, table: String, alias: String) -> Self {
        ColumnMetadata {
            id: 0,
            name,
            data_type,
            table: Some(table),
            alias: Some(alias),
        }
    }

    /// Creates column metadata for a synthetic column.
    pub fn new_synthetic_column(name: String, data_type: DataType) -> Self {
        ColumnMetadata {
            id: 0,
            name,
            data_type,
            table: None,
            alias: None,
        }
    }

    /// Returns the identifier of this column.
    pub fn id(&self) -> ColumnId {
        self.id
    }

    /// Returns the name of this column.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the type of this column.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Returns the table this column belongs to. If the table is absent then this a synthetic column.
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// Returns the alias under which the table of this column is accessed.
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }
}

/// Stores columns referenced by a query. Column identifiers start from `1`.
///
/// Metadata is owned by one optimization invocation. Rules that introduce new columns
/// (e.g. a split of an aggregate into two stages) register them here.
#[derive(Debug, Default)]
pub struct MutableMetadata {
    inner: RefCell<MutableMetadataInner>,
}

#[derive(Debug, Default)]
struct MutableMetadataInner {
    columns: Vec<ColumnMetadata>,
    table_columns: HashMap<(String, String), ColumnId>,
}

impl MutableMetadata {
    /// Creates a new instance of a MutableMetadata.
    pub fn new() -> Self {
        MutableMetadata::default()
    }

    /// Adds a new column to this metadata and returns its identifier.
    /// When the given column belongs to a table this method first checks
    /// if the same column of the same alias already exists and if so returns its identifier.
    /// A synthetic column is always added as a new column.
    pub fn add_column(&self, mut column: ColumnMetadata) -> ColumnId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.columns.len() + 1;
        column.id = id;

        if let Some(alias) = column.alias.as_ref() {
            let key = (alias.clone(), column.name.clone());
            match inner.table_columns.entry(key) {
                Entry::Occupied(o) => return *o.get(),
                Entry::Vacant(v) => {
                    v.insert(id);
                }
            }
        }

        inner.columns.push(column);
        id
    }

    /// Returns column metadata for the given column identifier.
    pub fn get_column(&self, column_id: ColumnId) -> Result<ColumnMetadataRef<'_>, OptimizerError> {
        let inner = self.inner.borrow();
        if column_id == 0 || column_id > inner.columns.len() {
            return Err(OptimizerError::argument(format!("Unknown column id: {}", column_id)));
        }
        let r = Ref::map(inner, |inner| &inner.columns[column_id - 1]);
        Ok(ColumnMetadataRef { inner: r })
    }

    /// Returns the identifier of a column of a table accessed under the given alias.
    pub fn find_column(&self, alias: &str, name: &str) -> Option<ColumnId> {
        let inner = self.inner.borrow();
        inner.table_columns.get(&(alias.to_string(), name.to_string())).copied()
    }

    /// Returns the number of registered columns.
    pub fn num_columns(&self) -> usize {
        self.inner.borrow().columns.len()
    }
}

/// A reference to a column metadata.
#[derive(Debug)]
pub struct ColumnMetadataRef<'a> {
    inner: Ref<'a, ColumnMetadata>,
}

impl Deref for ColumnMetadataRef<'_> {
    type Target = ColumnMetadata;

    fn deref(&self) -> &Self::Target {
        self.inner.deref()
    }
}
