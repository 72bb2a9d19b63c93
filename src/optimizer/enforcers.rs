//! Enforcers convert physical properties derived by an expression into the properties required from it.
//!
//! Enforcers are placed above an expression in a fixed order: partition selectors first,
//! then a motion, a sort and finally a spool. A motion destroys the ordering of its input
//! (except for a gather-merge) so the sort must come after it.

use crate::meta::ColumnSet;
use crate::operators::relational::physical::{Motion, MotionKind, PartitionSelector, PhysicalOp, Sort};
use crate::properties::derive::PhysicalContext;
use crate::properties::distribution::DistributionSpec;
use crate::properties::logical::EquivalenceClasses;
use crate::properties::physical::{DerivedProperties, RequiredProperties};

/// The outcome of an attempt to enforce a single physical property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enforcement {
    /// The derived property already satisfies the requirement.
    NotNeeded,
    /// The given enforcer converts the derived property into the required one.
    Enforce(PhysicalOp),
    /// The requirement can not be satisfied by an enforcer.
    Prohibited,
}

/// Returns the motion that must be placed above an expression that provides the `derived` properties
/// to satisfy the distribution of the `required` properties.
pub fn enforce_distribution(
    derived: &DerivedProperties,
    required: &RequiredProperties,
    equivalences: &EquivalenceClasses,
    subset_hash_matching: bool,
) -> Enforcement {
    let distribution = &derived.distribution;
    if distribution.satisfies(&required.distribution, equivalences, subset_hash_matching) {
        return Enforcement::NotNeeded;
    }
    // Replicated and universal inputs produce duplicates when their rows are moved between segments.
    let duplicated = matches!(distribution, DistributionSpec::Replicated | DistributionSpec::Universal);

    let kind = match &required.distribution.spec {
        DistributionSpec::Any => return Enforcement::NotNeeded,
        DistributionSpec::Singleton | DistributionSpec::StrictSingleton => {
            if !required.ordering.is_empty() && derived.ordering.satisfies(&required.ordering) {
                MotionKind::GatherMerge(required.ordering.clone())
            } else {
                MotionKind::Gather
            }
        }
        DistributionSpec::Replicated => MotionKind::Broadcast,
        DistributionSpec::Hashed(_) if duplicated => return Enforcement::Prohibited,
        DistributionSpec::Hashed(columns) => MotionKind::Redistribute(columns.clone()),
        DistributionSpec::Random | DistributionSpec::NonSingleton if duplicated => return Enforcement::Prohibited,
        DistributionSpec::Random | DistributionSpec::NonSingleton => MotionKind::Random,
        DistributionSpec::Universal => return Enforcement::Prohibited,
    };
    Enforcement::Enforce(PhysicalOp::Motion(Motion { kind }))
}

/// Returns the sort that must be placed above an expression to satisfy the required ordering.
pub fn enforce_ordering(derived: &DerivedProperties, required: &RequiredProperties) -> Enforcement {
    if derived.ordering.satisfies(&required.ordering) {
        Enforcement::NotNeeded
    } else {
        Enforcement::Enforce(PhysicalOp::Sort(Sort {
            ordering: required.ordering.clone(),
        }))
    }
}

/// Returns partition selectors that resolve dynamic scans that are not allowed to remain unresolved
/// and propagate partition selection for the required propagators.
fn enforce_partitions(
    derived: &DerivedProperties,
    required: &RequiredProperties,
    output_columns: &ColumnSet,
) -> Option<Vec<PhysicalOp>> {
    let mut selectors = Vec::new();
    for scan_id in derived.partition.unresolved.iter() {
        if !required.partition.allowed_unresolved.contains(scan_id) {
            selectors.push(PhysicalOp::PartitionSelector(PartitionSelector {
                scan_id: *scan_id,
                column: None,
            }));
        }
    }
    for (scan_id, column) in required.partition.propagators.iter() {
        if derived.partition.propagated.contains(scan_id) {
            continue;
        }
        if !output_columns.contains(column) {
            return None;
        }
        selectors.push(PhysicalOp::PartitionSelector(PartitionSelector {
            scan_id: *scan_id,
            column: Some(*column),
        }));
    }
    Some(selectors)
}

/// Computes the enforcers that convert the `derived` properties of an expression into the properties
/// required by the given context. Returns the enforcers in the order they must be applied together
/// with the properties provided by the topmost enforcer.
///
/// Returns `None` if the required properties can not be enforced. CTE requirements are never enforced.
pub fn enforcers(
    ctx: &PhysicalContext,
    derived: DerivedProperties,
    subset_hash_matching: bool,
) -> Option<(Vec<PhysicalOp>, DerivedProperties)> {
    let required = ctx.required;
    if !required.cte.allows(&derived.cte_consumers) {
        return None;
    }

    let mut result = Vec::new();
    let mut current = derived;
    let mut apply = |op: PhysicalOp, current: &mut DerivedProperties| {
        *current = op.derive_properties(ctx, std::slice::from_ref(current));
        result.push(op);
    };

    for selector in enforce_partitions(&current, required, &ctx.logical.output_columns)? {
        apply(selector, &mut current);
    }

    match enforce_distribution(&current, required, &ctx.logical.equivalence_classes, subset_hash_matching) {
        Enforcement::NotNeeded => {}
        Enforcement::Enforce(motion) => apply(motion, &mut current),
        Enforcement::Prohibited => return None,
    }

    if let Enforcement::Enforce(sort) = enforce_ordering(&current, required) {
        apply(sort, &mut current);
    }

    if !current.rewindability.satisfies(required.rewindability) {
        apply(PhysicalOp::Spool, &mut current);
    }

    if current.satisfies(required, &ctx.logical.equivalence_classes, subset_hash_matching) {
        Some((result, current))
    } else {
        None
    }
}
