//! Partition propagation.
//!
//! A dynamic scan of a partitioned table must be resolved by a partition selector:
//! either a static one placed above the scan or a propagating one placed on the outer side
//! of a hash join whose condition involves the partition key (dynamic partition elimination).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use itertools::Itertools;

use crate::meta::ColumnId;
use crate::operators::relational::ScanId;
use crate::properties::logical::LogicalProperties;

/// Partition propagation provided by an expression.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PartitionInfo {
    /// Dynamic scans that have not been resolved by a partition selector.
    pub unresolved: BTreeSet<ScanId>,
    /// Dynamic scans for which this expression propagates partition selection.
    pub propagated: BTreeSet<ScanId>,
}

impl PartitionInfo {
    pub fn is_empty(&self) -> bool {
        self.unresolved.is_empty() && self.propagated.is_empty()
    }

    /// Combines partition propagation of the given inputs.
    pub fn union<'a, I>(inputs: I) -> PartitionInfo
    where
        I: IntoIterator<Item = &'a PartitionInfo>,
    {
        let mut info = PartitionInfo::default();
        for input in inputs {
            info.unresolved.extend(input.unresolved.iter().copied());
            info.propagated.extend(input.propagated.iter().copied());
        }
        info
    }

    /// Checks whether this partition propagation satisfies the given requirement.
    pub fn satisfies(&self, required: &PartitionRequirement) -> bool {
        self.unresolved.iter().all(|s| required.allowed_unresolved.contains(s))
            && required.propagators.keys().all(|s| self.propagated.contains(s))
    }
}

/// Partition propagation required by an operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PartitionRequirement {
    /// Dynamic scans that may remain unresolved (they are resolved by a propagator above).
    pub allowed_unresolved: BTreeSet<ScanId>,
    /// Dynamic scans that require a propagating selector (scan -> column to select partitions with).
    pub propagators: BTreeMap<ScanId, ColumnId>,
}

impl PartitionRequirement {
    pub fn is_empty(&self) -> bool {
        self.allowed_unresolved.is_empty() && self.propagators.is_empty()
    }

    /// Restricts this requirement to the given input: unresolved scans are limited to the scans
    /// read by that input and propagators to the ones whose columns the input produces.
    pub fn restrict(&self, input: &LogicalProperties) -> PartitionRequirement {
        PartitionRequirement {
            allowed_unresolved: self
                .allowed_unresolved
                .iter()
                .filter(|s| input.partition_consumers.contains_key(s))
                .copied()
                .collect(),
            propagators: self
                .propagators
                .iter()
                .filter(|(_, c)| input.output_columns.contains(c))
                .map(|(s, c)| (*s, *c))
                .collect(),
        }
    }
}

impl Display for PartitionRequirement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "unresolved=[{}]", self.allowed_unresolved.iter().join(", "))?;
        if !self.propagators.is_empty() {
            let propagators = self.propagators.iter().map(|(s, c)| format!("{}:{}", s, c)).join(", ");
            write!(f, " propagators=[{}]", propagators)?;
        }
        Ok(())
    }
}

impl Display for PartitionInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unresolved=[{}] propagated=[{}]",
            self.unresolved.iter().join(", "),
            self.propagated.iter().join(", ")
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn satisfies() {
        let derived = PartitionInfo {
            unresolved: vec![1].into_iter().collect(),
            propagated: vec![2].into_iter().collect(),
        };

        assert!(!derived.satisfies(&PartitionRequirement::default()), "unresolved scan");

        let mut required = PartitionRequirement {
            allowed_unresolved: vec![1].into_iter().collect(),
            propagators: BTreeMap::new(),
        };
        assert!(derived.satisfies(&required));

        required.propagators.insert(2, 10);
        assert!(derived.satisfies(&required));

        required.propagators.insert(3, 11);
        assert!(!derived.satisfies(&required), "missing propagator");
    }
}
