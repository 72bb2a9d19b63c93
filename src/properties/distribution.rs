//! Distribution of rows across the segments of a cluster.

use std::fmt::{Display, Formatter};

use itertools::Itertools;

use crate::meta::{ColumnId, ColumnSet};
use crate::properties::logical::EquivalenceClasses;

/// Describes how rows of a relation are distributed across segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DistributionSpec {
    /// No particular distribution. Used only in requirements.
    Any,
    /// All rows reside on a single node (either the coordinator or a segment).
    Singleton,
    /// All rows reside on the coordinator.
    StrictSingleton,
    /// Every segment holds a copy of all rows.
    Replicated,
    /// Rows are distributed by the hash of the given columns.
    Hashed(Vec<ColumnId>),
    /// Rows are distributed randomly.
    Random,
    /// Rows are spread across segments in any way except singleton. Used only in requirements.
    NonSingleton,
    /// The same rows can be produced on any node (e.g. constant tables).
    Universal,
}

/// How a derived hashed distribution is compared with the required one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DistributionMatching {
    /// Hash columns must be equal as sets (up to column equivalence).
    Satisfy,
    /// Hash columns must match position by position (up to column equivalence).
    Exact,
}

impl DistributionSpec {
    /// Returns `true` if this distribution places all rows on a single node.
    pub fn is_singleton(&self) -> bool {
        matches!(self, DistributionSpec::Singleton | DistributionSpec::StrictSingleton)
    }

    /// Checks whether this derived distribution satisfies the required distribution.
    ///
    /// When `subset_hash_matching` is `true` a distribution hashed on a subset of the required columns
    /// satisfies the requirement: rows that agree on all the required columns also agree on the subset.
    pub fn satisfies(
        &self,
        required: &RequiredDistribution,
        equivalences: &EquivalenceClasses,
        subset_hash_matching: bool,
    ) -> bool {
        use DistributionSpec::*;

        match (&required.spec, self) {
            (Any, _) => true,
            (Singleton, Singleton | StrictSingleton | Universal) => true,
            (StrictSingleton, StrictSingleton) => true,
            (Replicated, Replicated | Universal) => true,
            (Universal, Universal) => true,
            (Hashed(required_columns), Hashed(columns)) => match required.matching {
                DistributionMatching::Exact => {
                    required_columns.len() == columns.len()
                        && required_columns.iter().zip(columns.iter()).all(|(r, d)| equivalences.are_equivalent(*r, *d))
                }
                DistributionMatching::Satisfy => {
                    let covered = |c: &ColumnId, by: &[ColumnId]| by.iter().any(|o| equivalences.are_equivalent(*c, *o));
                    let derived_covered = !columns.is_empty() && columns.iter().all(|c| covered(c, required_columns.as_slice()));
                    let required_covered = required_columns.iter().all(|c| covered(c, columns.as_slice()));
                    derived_covered && (required_covered || subset_hash_matching)
                }
            },
            (Random | NonSingleton, Hashed(_) | Random) => true,
            _ => false,
        }
    }

    /// Returns a distribution in which the columns from `source` are replaced with the columns from `target`.
    /// A hashed distribution on a column that is not present in `source` becomes random.
    pub fn with_mapping(&self, source: &[ColumnId], target: &[ColumnId]) -> DistributionSpec {
        match self {
            DistributionSpec::Hashed(columns) => {
                let mapped: Option<Vec<_>> = columns
                    .iter()
                    .map(|c| source.iter().position(|s| s == c).and_then(|p| target.get(p).copied()))
                    .collect();
                match mapped {
                    Some(columns) => DistributionSpec::Hashed(columns),
                    None => DistributionSpec::Random,
                }
            }
            _ => self.clone(),
        }
    }

    /// Returns `true` if every column of this distribution belongs to the given set.
    pub fn is_covered_by(&self, columns: &ColumnSet) -> bool {
        match self {
            DistributionSpec::Hashed(hashed) => hashed.iter().all(|c| columns.contains(c)),
            _ => true,
        }
    }
}

impl Display for DistributionSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DistributionSpec::Any => write!(f, "Any"),
            DistributionSpec::Singleton => write!(f, "Singleton"),
            DistributionSpec::StrictSingleton => write!(f, "StrictSingleton"),
            DistributionSpec::Replicated => write!(f, "Replicated"),
            DistributionSpec::Hashed(columns) => write!(f, "Hashed[{}]", columns.iter().join(", ")),
            DistributionSpec::Random => write!(f, "Random"),
            DistributionSpec::NonSingleton => write!(f, "NonSingleton"),
            DistributionSpec::Universal => write!(f, "Universal"),
        }
    }
}

/// A distribution required by an operator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequiredDistribution {
    pub spec: DistributionSpec,
    pub matching: DistributionMatching,
}

impl RequiredDistribution {
    pub fn new(spec: DistributionSpec, matching: DistributionMatching) -> Self {
        RequiredDistribution { spec, matching }
    }

    /// No distribution is required.
    pub fn any() -> Self {
        RequiredDistribution::new(DistributionSpec::Any, DistributionMatching::Satisfy)
    }

    pub fn singleton() -> Self {
        RequiredDistribution::new(DistributionSpec::Singleton, DistributionMatching::Satisfy)
    }

    pub fn replicated() -> Self {
        RequiredDistribution::new(DistributionSpec::Replicated, DistributionMatching::Satisfy)
    }

    /// Replication required for correctness rather than chosen for performance
    /// (e.g. the inner side of a `NOT IN` anti join must see every inner row).
    pub fn mandatory_replicated() -> Self {
        RequiredDistribution::new(DistributionSpec::Replicated, DistributionMatching::Exact)
    }

    pub fn is_mandatory_replication(&self) -> bool {
        self.spec == DistributionSpec::Replicated && self.matching == DistributionMatching::Exact
    }

    pub fn non_singleton() -> Self {
        RequiredDistribution::new(DistributionSpec::NonSingleton, DistributionMatching::Satisfy)
    }

    pub fn hashed(columns: Vec<ColumnId>) -> Self {
        RequiredDistribution::new(DistributionSpec::Hashed(columns), DistributionMatching::Satisfy)
    }

    pub fn exact_hashed(columns: Vec<ColumnId>) -> Self {
        RequiredDistribution::new(DistributionSpec::Hashed(columns), DistributionMatching::Exact)
    }

    pub fn is_any(&self) -> bool {
        self.spec == DistributionSpec::Any
    }
}

impl Default for RequiredDistribution {
    fn default() -> Self {
        RequiredDistribution::any()
    }
}

impl Display for RequiredDistribution {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.spec)?;
        if self.matching == DistributionMatching::Exact {
            write!(f, "(exact)")?;
        }
        Ok(())
    }
}
