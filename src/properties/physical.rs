//! Required and derived physical properties. See [RequiredProperties] and [DerivedProperties].

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use itertools::Itertools;

use crate::operators::relational::CteId;
use crate::properties::cte::CteRequirement;
use crate::properties::distribution::{DistributionSpec, RequiredDistribution};
use crate::properties::logical::EquivalenceClasses;
use crate::properties::ordering::OrderSpec;
use crate::properties::partitioning::{PartitionInfo, PartitionRequirement};
use crate::properties::rewindability::Rewindability;

/// Physical properties required by an operator.
/// Winners of a memo group are stored per distinct set of required properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RequiredProperties {
    pub ordering: OrderSpec,
    pub distribution: RequiredDistribution,
    pub rewindability: Rewindability,
    pub partition: PartitionRequirement,
    pub cte: CteRequirement,
}

impl RequiredProperties {
    /// Returns required properties that require nothing.
    pub fn none() -> Self {
        RequiredProperties::default()
    }

    /// Returns required properties that require the given ordering and nothing else.
    pub fn new_with_ordering(ordering: OrderSpec) -> Self {
        RequiredProperties {
            ordering,
            ..RequiredProperties::default()
        }
    }

    /// Returns required properties that require the given distribution and nothing else.
    pub fn new_with_distribution(distribution: RequiredDistribution) -> Self {
        RequiredProperties {
            distribution,
            ..RequiredProperties::default()
        }
    }

    pub fn with_ordering(self, ordering: OrderSpec) -> Self {
        RequiredProperties { ordering, ..self }
    }

    pub fn without_ordering(self) -> Self {
        self.with_ordering(OrderSpec::none())
    }

    pub fn with_distribution(self, distribution: RequiredDistribution) -> Self {
        RequiredProperties { distribution, ..self }
    }

    pub fn with_rewindability(self, rewindability: Rewindability) -> Self {
        RequiredProperties { rewindability, ..self }
    }

    pub fn with_partition(self, partition: PartitionRequirement) -> Self {
        RequiredProperties { partition, ..self }
    }

    pub fn with_cte(self, cte: CteRequirement) -> Self {
        RequiredProperties { cte, ..self }
    }

    /// Returns `true` if there are no requirements.
    pub fn is_none(&self) -> bool {
        self == &RequiredProperties::default()
    }
}

impl Display for RequiredProperties {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if !self.ordering.is_empty() {
            parts.push(format!("ordering={}", self.ordering));
        }
        if !self.distribution.is_any() {
            parts.push(format!("distribution={}", self.distribution));
        }
        if self.rewindability.is_rewindable() {
            parts.push(format!("{}", self.rewindability));
        }
        if !self.partition.is_empty() {
            parts.push(format!("partitions=[{}]", self.partition));
        }
        if !self.cte.is_empty() {
            parts.push(format!("cte={}", self.cte));
        }
        write!(f, "{{{}}}", parts.join(" "))
    }
}

/// Physical properties provided by a particular physical expression.
/// Unlike logical properties they depend on the inputs chosen for that expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedProperties {
    pub ordering: OrderSpec,
    pub distribution: DistributionSpec,
    pub rewindability: Rewindability,
    pub partition: PartitionInfo,
    pub cte_consumers: BTreeSet<CteId>,
}

impl DerivedProperties {
    /// Derived properties of an unordered expression with the given distribution.
    pub fn new(distribution: DistributionSpec) -> Self {
        DerivedProperties {
            ordering: OrderSpec::none(),
            distribution,
            rewindability: Rewindability::NotRewindable,
            partition: PartitionInfo::default(),
            cte_consumers: BTreeSet::new(),
        }
    }

    /// Checks whether these properties satisfy every dimension of the required properties.
    pub fn satisfies(
        &self,
        required: &RequiredProperties,
        equivalences: &EquivalenceClasses,
        subset_hash_matching: bool,
    ) -> bool {
        self.ordering.satisfies(&required.ordering)
            && self.distribution.satisfies(&required.distribution, equivalences, subset_hash_matching)
            && self.rewindability.satisfies(required.rewindability)
            && self.partition.satisfies(&required.partition)
            && required.cte.allows(&self.cte_consumers)
    }
}

impl Display for DerivedProperties {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{distribution={}", self.distribution)?;
        if !self.ordering.is_empty() {
            write!(f, " ordering={}", self.ordering)?;
        }
        if self.rewindability.is_rewindable() {
            write!(f, " {}", self.rewindability)?;
        }
        if !self.partition.is_empty() {
            write!(f, " partitions=[{}]", self.partition)?;
        }
        if !self.cte_consumers.is_empty() {
            write!(f, " cte_consumers=[{}]", self.cte_consumers.iter().join(", "))?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::properties::ordering::OrderingColumn;

    #[test]
    fn display_required() {
        assert_eq!(format!("{}", RequiredProperties::none()), "{}");

        let required = RequiredProperties::new_with_ordering(OrderSpec::new(vec![OrderingColumn::asc(1)]))
            .with_distribution(RequiredDistribution::singleton())
            .with_rewindability(Rewindability::Rewindable);
        assert_eq!(format!("{}", required), "{ordering=[+1] distribution=Singleton rewindable}");
    }

    #[test]
    fn derived_satisfies_required() {
        let mut derived = DerivedProperties::new(DistributionSpec::Hashed(vec![1]));
        let equivalences = EquivalenceClasses::default();

        assert!(derived.satisfies(&RequiredProperties::none(), &equivalences, false));

        let required = RequiredProperties::new_with_distribution(RequiredDistribution::singleton());
        assert!(!derived.satisfies(&required, &equivalences, false));

        derived.cte_consumers.insert(1);
        assert!(!derived.satisfies(&RequiredProperties::none(), &equivalences, false), "consumer without producer");

        let required = RequiredProperties::none().with_cte(CteRequirement::default().with_producer(1, DistributionSpec::Random));
        assert!(derived.satisfies(&required, &equivalences, false));
    }
}
