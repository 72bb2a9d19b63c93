//! Ordering of rows.

use std::fmt::{Display, Formatter};

use itertools::Itertools;

use crate::meta::{ColumnId, ColumnSet};

/// Describes how rows are sorted. An empty ordering means that rows are not sorted.
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash)]
pub struct OrderSpec {
    pub columns: Vec<OrderingColumn>,
}

impl OrderSpec {
    /// An ordering that does not sort rows.
    pub fn none() -> Self {
        OrderSpec::default()
    }

    pub fn new(columns: Vec<OrderingColumn>) -> Self {
        OrderSpec { columns }
    }

    /// Creates an ordering where all the given columns are sorted in ascending order.
    pub fn from_columns(columns: &[ColumnId]) -> Self {
        OrderSpec::new(columns.iter().copied().map(OrderingColumn::asc).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns `true` if rows sorted in this ordering are also sorted in the `required` ordering.
    /// That is the case when the required ordering is a prefix of this ordering.
    pub fn satisfies(&self, required: &OrderSpec) -> bool {
        required.prefix_of(self)
    }

    /// Returns `true` if this ordering is a prefix of the given ordering.
    pub fn prefix_of(&self, other: &OrderSpec) -> bool {
        if self.columns.len() > other.columns.len() {
            return false;
        }
        self.columns.iter().zip(other.columns.iter()).all(|(l, r)| l == r)
    }

    /// Returns the columns of this ordering.
    pub fn column_set(&self) -> ColumnSet {
        self.columns.iter().map(|c| c.column).collect()
    }

    /// Returns `true` if every column of this ordering belongs to the given set.
    pub fn is_subset_of(&self, columns: &ColumnSet) -> bool {
        self.columns.iter().all(|c| columns.contains(&c.column))
    }

    /// Returns the longest prefix of this ordering that consists only of the given columns.
    pub fn retain_prefix(&self, columns: &ColumnSet) -> OrderSpec {
        let columns = self.columns.iter().take_while(|c| columns.contains(&c.column)).copied().collect();
        OrderSpec { columns }
    }

    /// Replaces columns from `source` with the columns at the same positions in `target`.
    pub fn with_mapping(&self, source: &[ColumnId], target: &[ColumnId]) -> OrderSpec {
        let columns = self
            .columns
            .iter()
            .map(|c| match source.iter().position(|s| *s == c.column).and_then(|p| target.get(p)) {
                Some(column) => OrderingColumn::ord(*column, c.descending),
                None => *c,
            })
            .collect();
        OrderSpec { columns }
    }
}

impl Display for OrderSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.columns.iter().join(", "))
    }
}

/// Specifies how a column is sorted.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash, Ord, PartialOrd)]
pub struct OrderingColumn {
    pub column: ColumnId,
    pub descending: bool,
}

impl OrderingColumn {
    pub fn ord(column: ColumnId, descending: bool) -> Self {
        OrderingColumn { column, descending }
    }

    pub fn asc(column: ColumnId) -> Self {
        OrderingColumn::ord(column, false)
    }

    pub fn desc(column: ColumnId) -> Self {
        OrderingColumn::ord(column, true)
    }
}

impl Display for OrderingColumn {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.descending {
            write!(f, "-{}", self.column)
        } else {
            write!(f, "+{}", self.column)
        }
    }
}
