//! Requirements of common table expressions.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use itertools::Itertools;

use crate::operators::relational::CteId;
use crate::properties::distribution::DistributionSpec;

/// CTEs whose consumers may appear in a subtree.
/// Each entry carries the distribution of the producer, consumers derive the same distribution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CteRequirement {
    pub producers: BTreeMap<CteId, DistributionSpec>,
}

impl CteRequirement {
    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    /// Returns a requirement that additionally allows consumers of the given CTE.
    pub fn with_producer(&self, cte_id: CteId, distribution: DistributionSpec) -> CteRequirement {
        let mut producers = self.producers.clone();
        producers.insert(cte_id, distribution);
        CteRequirement { producers }
    }

    /// Checks whether all the given consumers have a producer.
    pub fn allows(&self, consumers: &BTreeSet<CteId>) -> bool {
        consumers.iter().all(|c| self.producers.contains_key(c))
    }
}

impl Display for CteRequirement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let producers = self.producers.iter().map(|(id, d)| format!("{}:{}", id, d)).join(", ");
        write!(f, "[{}]", producers)
    }
}
