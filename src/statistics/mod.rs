//! Cardinality estimation.

use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::error::OptimizerError;
use crate::meta::ColumnId;
use crate::operators::relational::logical::LogicalOp;
use crate::properties::logical::LogicalProperties;
use crate::properties::InputProperties;

pub mod simple;

/// The number of rows of a table without statistics.
pub const UNKNOWN_ROW_COUNT: f64 = 1000f64;

/// Statistics of a memo group.
#[derive(Debug, Clone, PartialEq)]
pub struct Statistics {
    row_count: f64,
    distinct: BTreeMap<ColumnId, f64>,
}

impl Statistics {
    /// Creates statistics with the given row count. An estimate is never less than one row.
    pub fn from_row_count(row_count: f64) -> Self {
        Statistics {
            row_count: row_count.max(1.0),
            distinct: BTreeMap::new(),
        }
    }

    /// The estimated number of rows.
    pub fn row_count(&self) -> f64 {
        self.row_count
    }

    /// The estimated number of distinct values of the given column.
    pub fn distinct_count(&self, column: ColumnId) -> Option<f64> {
        self.distinct.get(&column).copied()
    }

    /// The estimated number of distinct values of the given column or the number of rows when unknown.
    pub fn distinct_or_rows(&self, column: ColumnId) -> f64 {
        self.distinct_count(column).unwrap_or(self.row_count).min(self.row_count).max(1.0)
    }

    pub fn distinct(&self) -> &BTreeMap<ColumnId, f64> {
        &self.distinct
    }

    pub fn with_distinct(mut self, column: ColumnId, distinct_count: f64) -> Self {
        self.distinct.insert(column, distinct_count.min(self.row_count).max(1.0));
        self
    }
}

/// Estimates statistics of logical operators.
pub trait StatisticsBuilder: Debug {
    /// Builds statistics of the given operator from statistics of its inputs.
    /// Logical properties of the inputs tell which input produces a column.
    /// `cte_producer` contains statistics of the producer when the operator is a CTE consumer.
    fn build_statistics(
        &self,
        op: &LogicalOp,
        logical: &LogicalProperties,
        inputs: &[InputProperties],
        cte_producer: Option<&Statistics>,
    ) -> Result<Statistics, OptimizerError>;
}
