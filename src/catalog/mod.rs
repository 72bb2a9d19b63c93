//! Database catalog.
//!
//! The optimizer treats the catalog as a read-only source of metadata.
//! See [CachingCatalog] for a catalog that memoizes lookups for the duration of one optimization.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::{Arc, PoisonError, RwLock};

use crate::datatypes::DataType;
use crate::error::OptimizerError;

pub mod mutable;

pub type CatalogRef = Arc<dyn Catalog>;
pub type TableRef = Arc<Table>;
pub type IndexRef = Arc<Index>;
pub type ColumnRef = Arc<Column>;

/// Provides access to database objects used by the optimizer.
pub trait Catalog: Debug + Sync + Send {
    /// Returns a table with the given name.
    fn get_table(&self, name: &str) -> Option<TableRef>;

    /// Returns an index with the given name.
    fn get_index(&self, name: &str) -> Option<IndexRef>;

    /// Returns all indexes of the given table.
    fn get_indexes(&self, table: &str) -> Vec<IndexRef>;

    /// Returns statistics of the given table.
    fn get_table_statistics(&self, table: &str) -> Option<TableStatistics> {
        self.get_table(table).and_then(|t| t.statistics().cloned())
    }
}

/// Describes how rows of a table are stored across the segments of a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableDistribution {
    /// Rows are distributed by the hash of the given columns.
    Hashed(Vec<String>),
    /// Rows are distributed randomly.
    Random,
    /// Every segment stores a copy of the table.
    Replicated,
    /// The table is stored on the coordinator only.
    Coordinator,
}

/// Represents a database table.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    columns: Vec<ColumnRef>,
    distribution: TableDistribution,
    partition_key: Option<String>,
    primary_key: Vec<String>,
    statistics: Option<TableStatistics>,
}

impl Table {
    /// The name of this table.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The columns of this table.
    pub fn columns(&self) -> &[ColumnRef] {
        &self.columns
    }

    /// Returns a column with the given name.
    pub fn get_column(&self, name: &str) -> Option<ColumnRef> {
        self.columns.iter().find(|c| c.name == name).cloned()
    }

    /// Returns the position of the column with the given name.
    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// The distribution policy of this table.
    pub fn distribution(&self) -> &TableDistribution {
        &self.distribution
    }

    /// The column this table is partitioned by.
    pub fn partition_key(&self) -> Option<&str> {
        self.partition_key.as_deref()
    }

    /// The columns of the primary key of this table. Empty if this table has no primary key.
    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    /// Returns statistics available for this table.
    pub fn statistics(&self) -> Option<&TableStatistics> {
        self.statistics.as_ref()
    }
}

/// Statistics for a database table.
#[derive(Debug, Clone, Default)]
pub struct TableStatistics {
    row_count: usize,
    columns: HashMap<String, ColumnStatistics>,
}

impl TableStatistics {
    /// Creates a new table statistics object.
    pub fn new(row_count: usize) -> Self {
        TableStatistics {
            row_count,
            columns: HashMap::new(),
        }
    }

    /// The total number of rows in a table.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Statistics of the given column.
    pub fn column(&self, name: &str) -> Option<&ColumnStatistics> {
        self.columns.get(name)
    }
}

/// Statistics for a column of a database table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStatistics {
    distinct_count: f64,
    null_fraction: f64,
}

impl ColumnStatistics {
    /// Creates column statistics. `null_fraction` must be within `[0, 1]`.
    pub fn new(distinct_count: f64, null_fraction: f64) -> Result<Self, OptimizerError> {
        if distinct_count < 0.0 || !(0.0..=1.0).contains(&null_fraction) {
            let message = format!(
                "Invalid column statistics. distinct_count: {} null_fraction: {}",
                distinct_count, null_fraction
            );
            return Err(OptimizerError::catalog(message));
        }
        Ok(ColumnStatistics {
            distinct_count,
            null_fraction,
        })
    }

    /// The number of distinct values.
    pub fn distinct_count(&self) -> f64 {
        self.distinct_count
    }

    /// The fraction of null values.
    pub fn null_fraction(&self) -> f64 {
        self.null_fraction
    }
}

/// A builder to create instances of a [table].
///
/// [table]: crate::catalog::Table
#[derive(Debug, Clone)]
pub struct TableBuilder {
    name: String,
    columns: Vec<ColumnRef>,
    distribution: TableDistribution,
    partition_key: Option<String>,
    primary_key: Vec<String>,
    row_count: Option<usize>,
    column_statistics: Vec<(String, f64, f64)>,
}

impl TableBuilder {
    /// Creates a builder for a table the given name.
    /// By default a table is distributed randomly.
    pub fn new(name: &str) -> Self {
        TableBuilder {
            name: name.to_string(),
            columns: Vec::new(),
            distribution: TableDistribution::Random,
            partition_key: None,
            primary_key: Vec::new(),
            row_count: None,
            column_statistics: Vec::new(),
        }
    }

    /// Adds a nullable column with the given name and data type to this table.
    pub fn add_column(self, name: &str, data_type: DataType) -> TableBuilder {
        self.add_column_with_nullability(name, data_type, true)
    }

    /// Adds a column that can not contain nulls.
    pub fn add_not_null_column(self, name: &str, data_type: DataType) -> TableBuilder {
        self.add_column_with_nullability(name, data_type, false)
    }

    fn add_column_with_nullability(mut self, name: &str, data_type: DataType, nullable: bool) -> TableBuilder {
        let column = Column::new(name.to_string(), Some(self.name.clone()), data_type, nullable);
        self.columns.push(Arc::new(column));
        self
    }

    /// Distributes rows of this table by the hash of the given columns.
    pub fn distributed_by(mut self, columns: &[&str]) -> TableBuilder {
        self.distribution = TableDistribution::Hashed(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Sets the distribution policy of this table.
    pub fn distribution(mut self, distribution: TableDistribution) -> TableBuilder {
        self.distribution = distribution;
        self
    }

    /// Partitions this table by the given column.
    pub fn partition_by(mut self, column: &str) -> TableBuilder {
        self.partition_key = Some(column.to_string());
        self
    }

    /// Sets the primary key of this table.
    pub fn primary_key(mut self, columns: &[&str]) -> TableBuilder {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Sets row count statistics for this table.
    pub fn add_row_count(mut self, row_count: usize) -> TableBuilder {
        self.row_count = Some(row_count);
        self
    }

    /// Adds statistics for the given column. Requires row count statistics.
    pub fn add_column_statistics(mut self, column: &str, distinct_count: f64, null_fraction: f64) -> TableBuilder {
        self.column_statistics.push((column.to_string(), distinct_count, null_fraction));
        self
    }

    /// Creates an instance of a [table] with previously specified properties.
    ///
    /// [table]: crate::catalog::Table
    pub fn build(self) -> Result<Table, OptimizerError> {
        if self.columns.is_empty() {
            return Err(OptimizerError::argument("No columns has been specified"));
        }

        let mut names = HashSet::new();
        for col in self.columns.iter() {
            let col_name = col.name().as_str();
            if !names.insert(col_name) {
                let message = format!("Column already exists. Column: {} table: {}", col_name, self.name);
                return Err(OptimizerError::argument(message));
            }
        }

        let check_column = |name: &str, usage: &str| {
            if names.contains(name) {
                Ok(())
            } else {
                let message = format!("{} column does not exist. Column: {} table: {}", usage, name, self.name);
                Err(OptimizerError::argument(message))
            }
        };

        if let TableDistribution::Hashed(columns) = &self.distribution {
            if columns.is_empty() {
                return Err(OptimizerError::argument("Hash distribution requires at least one column"));
            }
            for c in columns {
                check_column(c.as_str(), "Distribution")?;
            }
        }
        if let Some(key) = self.partition_key.as_ref() {
            check_column(key.as_str(), "Partition key")?;
        }
        for c in self.primary_key.iter() {
            check_column(c.as_str(), "Primary key")?;
        }

        let statistics = match self.row_count {
            Some(row_count) => {
                let mut statistics = TableStatistics::new(row_count);
                for (name, distinct_count, null_fraction) in self.column_statistics.iter() {
                    check_column(name.as_str(), "Statistics")?;
                    let column_statistics = ColumnStatistics::new(*distinct_count, *null_fraction)?;
                    statistics.columns.insert(name.clone(), column_statistics);
                }
                Some(statistics)
            }
            None if !self.column_statistics.is_empty() => {
                return Err(OptimizerError::argument("Column statistics require row count statistics"))
            }
            None => None,
        };

        Ok(Table {
            name: self.name,
            columns: self.columns,
            distribution: self.distribution,
            partition_key: self.partition_key,
            primary_key: self.primary_key,
            statistics,
        })
    }
}

/// Represents a database index.
#[derive(Debug, Clone)]
pub struct Index {
    name: String,
    table: String,
    columns: Vec<ColumnRef>,
    unique: bool,
}

impl Index {
    /// The name of this index.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name of the table this index is defined for.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the columns covered by this index. Entries of an index are sorted by these columns in ascending order.
    pub fn columns(&self) -> &[ColumnRef] {
        &self.columns
    }

    /// Whether this index is unique or not.
    pub fn unique(&self) -> bool {
        self.unique
    }
}

/// A builder to create instances of an [Index].
///
/// [Index]: crate::catalog::Index
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    name: String,
    table: TableRef,
    columns: Vec<String>,
    unique: bool,
}

impl IndexBuilder {
    /// Creates a builder for an index with the given name.
    pub fn new(table: TableRef, name: &str) -> Self {
        IndexBuilder {
            name: name.to_string(),
            table,
            columns: Vec::new(),
            unique: false,
        }
    }

    /// Adds a column covered by this index.
    pub fn add_column(mut self, column: &str) -> IndexBuilder {
        self.columns.push(column.into());
        self
    }

    /// Marks this index as unique.
    pub fn unique(mut self) -> IndexBuilder {
        self.unique = true;
        self
    }

    /// Creates an instance of an [index] with previously specified properties.
    ///
    /// [index]: crate::catalog::Index
    pub fn build(self) -> Result<Index, OptimizerError> {
        if self.columns.is_empty() {
            return Err(OptimizerError::argument("No columns have been specified"));
        }

        let table = self.table;
        let columns: Result<Vec<ColumnRef>, _> = self
            .columns
            .into_iter()
            .map(|name| match table.get_column(name.as_str()) {
                Some(col) => Ok(col),
                None => Err(OptimizerError::argument(format!(
                    "Column does not exist. Table: {}, column: {}",
                    &table.name, name
                ))),
            })
            .collect();

        Ok(Index {
            name: self.name,
            table: table.name.clone(),
            columns: columns?,
            unique: self.unique,
        })
    }
}

/// A column of a database table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    table: Option<String>,
    data_type: DataType,
    nullable: bool,
}

impl Column {
    pub(crate) fn new(column_name: String, table_name: Option<String>, data_type: DataType, nullable: bool) -> Self {
        Column {
            name: column_name,
            table: table_name,
            data_type,
            nullable,
        }
    }

    /// The name of this column.
    pub fn name(&self) -> &String {
        &self.name
    }

    /// The table this column belongs to.
    pub fn table(&self) -> Option<&String> {
        self.table.as_ref()
    }

    /// The data type of this column.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Whether this column can contain nulls.
    pub fn nullable(&self) -> bool {
        self.nullable
    }
}

/// A catalog that memoizes lookups of the underlying catalog.
/// An instance of a caching catalog is created for every optimization and is discarded afterwards.
#[derive(Debug)]
pub struct CachingCatalog {
    catalog: CatalogRef,
    tables: RwLock<HashMap<String, Option<TableRef>>>,
    indexes: RwLock<HashMap<String, Option<IndexRef>>>,
    table_indexes: RwLock<HashMap<String, Vec<IndexRef>>>,
}

impl CachingCatalog {
    /// Creates a caching catalog on top of the given catalog.
    pub fn new(catalog: CatalogRef) -> Self {
        CachingCatalog {
            catalog,
            tables: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
            table_indexes: RwLock::new(HashMap::new()),
        }
    }

    /// Returns a table with the given name or a [catalog error](OptimizerError::Catalog) if it does not exist.
    pub fn table(&self, name: &str) -> Result<TableRef, OptimizerError> {
        self.get_table(name)
            .ok_or_else(|| OptimizerError::catalog(format!("Table does not exist. Table: {}", name)))
    }

    fn cached<T, F>(cache: &RwLock<HashMap<String, T>>, key: &str, f: F) -> T
    where
        T: Clone,
        F: FnOnce() -> T,
    {
        {
            let cache = cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(value) = cache.get(key) {
                return value.clone();
            }
        }
        let value = f();
        let mut cache = cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.entry(key.to_string()).or_insert(value).clone()
    }
}

impl Catalog for CachingCatalog {
    fn get_table(&self, name: &str) -> Option<TableRef> {
        CachingCatalog::cached(&self.tables, name, || self.catalog.get_table(name))
    }

    fn get_index(&self, name: &str) -> Option<IndexRef> {
        CachingCatalog::cached(&self.indexes, name, || self.catalog.get_index(name))
    }

    fn get_indexes(&self, table: &str) -> Vec<IndexRef> {
        CachingCatalog::cached(&self.table_indexes, table, || self.catalog.get_indexes(table))
    }
}
