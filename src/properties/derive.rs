//! Physical property derivation of physical operators.
//!
//! Every physical operator supports one or more optimization requests. A request describes
//! the properties required from each input of an operator given the properties required
//! from the operator itself and the properties derived by the inputs that have already been optimized.

use std::collections::BTreeSet;

use crate::meta::{ColumnId, ColumnSet};
use crate::operators::relational::logical::AggregateStage;
use crate::operators::relational::physical::{
    Append, CteScan, HashJoin, IndexNestedLoopJoin, MotionKind, PhysicalAggregate, PhysicalOp, Sequence,
};
use crate::operators::relational::JoinType;
use crate::operators::scalar::ScalarExpr;
use crate::properties::distribution::{DistributionMatching, DistributionSpec, RequiredDistribution};
use crate::properties::logical::LogicalProperties;
use crate::properties::ordering::OrderSpec;
use crate::properties::partitioning::PartitionInfo;
use crate::properties::physical::{DerivedProperties, RequiredProperties};
use crate::properties::rewindability::Rewindability;

/// Information available to an operator when it computes requirements for its inputs
/// and derives its physical properties.
#[derive(Debug, Clone, Copy)]
pub struct PhysicalContext<'a> {
    /// Properties required from the operator.
    pub required: &'a RequiredProperties,
    /// Logical properties of the operator's group.
    pub logical: &'a LogicalProperties,
    /// Logical properties of the operator's inputs.
    pub inputs: &'a [&'a LogicalProperties],
}

impl PhysicalOp {
    /// Returns the number of optimization requests supported by this operator.
    /// Enforcers support no requests because they are never optimized on their own.
    pub fn num_requests(&self) -> usize {
        match self {
            PhysicalOp::Filter(_) | PhysicalOp::ComputeScalar(_) => 3,
            PhysicalOp::HashJoin(_) => 3,
            PhysicalOp::NestedLoopJoin(_) | PhysicalOp::IndexNestedLoopJoin(_) | PhysicalOp::Append(_) => 2,
            PhysicalOp::HashAggregate(aggr) | PhysicalOp::StreamAggregate(aggr) => {
                if aggr.stage != AggregateStage::Local && !aggr.group_by.is_empty() {
                    2
                } else {
                    1
                }
            }
            _ if self.is_enforcer() => 0,
            _ => 1,
        }
    }

    /// Returns the properties the `child`-th input must provide under the given request or
    /// `None` if this request can not be satisfied.
    /// `optimized` contains the derived properties of the inputs that precede the `child`-th input.
    pub fn required_input(
        &self,
        ctx: &PhysicalContext,
        request: usize,
        child: usize,
        optimized: &[DerivedProperties],
    ) -> Option<RequiredProperties> {
        let input = ctx.inputs.get(child)?;
        match self {
            PhysicalOp::Filter(_) | PhysicalOp::ComputeScalar(_) => match request {
                0 => pass_through(ctx, input, true, true),
                1 if !ctx.required.ordering.is_empty() => pass_through(ctx, input, false, true),
                2 if !ctx.required.distribution.is_any() => pass_through(ctx, input, false, false),
                _ => None,
            },
            PhysicalOp::HashJoin(join) => hash_join_input(join, ctx, request, child, optimized),
            PhysicalOp::NestedLoopJoin(join) => {
                // A singleton outer input joins with a copy of the inner input on a single node.
                let singleton_outer = optimized.first().map_or(false, |p| p.distribution.is_singleton());
                let distribution = match (request, child) {
                    (0, 0) => RequiredDistribution::any(),
                    (0, _) if singleton_outer => RequiredDistribution::singleton(),
                    (0, _) if join.join_type == JoinType::LeftAntiSemiNotIn => RequiredDistribution::mandatory_replicated(),
                    (0, _) => RequiredDistribution::replicated(),
                    (1, _) => RequiredDistribution::singleton(),
                    _ => return None,
                };
                let required = base_requirement(ctx, input).with_distribution(distribution);
                if child == 0 {
                    Some(required.with_ordering(outer_ordering(ctx, input)))
                } else {
                    Some(required.with_rewindability(Rewindability::Rewindable))
                }
            }
            PhysicalOp::IndexNestedLoopJoin(join) => index_join_input(join, ctx, request, input),
            PhysicalOp::HashAggregate(aggr) | PhysicalOp::StreamAggregate(aggr) => {
                let distribution = match (request, aggr.stage) {
                    (0, AggregateStage::Local) => RequiredDistribution::any(),
                    (0, _) if aggr.group_by.is_empty() => RequiredDistribution::singleton(),
                    (0, _) => RequiredDistribution::hashed(aggr.group_by.clone()),
                    (1, _) => RequiredDistribution::singleton(),
                    _ => return None,
                };
                let required = base_requirement(ctx, input).with_distribution(distribution);
                match self {
                    PhysicalOp::StreamAggregate(_) => Some(required.with_ordering(OrderSpec::from_columns(&aggr.group_by))),
                    _ => Some(required),
                }
            }
            PhysicalOp::Limit(limit) => Some(
                base_requirement(ctx, input)
                    .with_distribution(RequiredDistribution::singleton())
                    .with_ordering(limit.ordering.clone()),
            ),
            PhysicalOp::Append(_) => {
                let distribution = match request {
                    0 => RequiredDistribution::non_singleton(),
                    1 => RequiredDistribution::singleton(),
                    _ => return None,
                };
                Some(base_requirement(ctx, input).with_distribution(distribution))
            }
            PhysicalOp::Dml(dml) => {
                let matching = match dml.distribution {
                    DistributionSpec::Hashed(_) => DistributionMatching::Exact,
                    _ => DistributionMatching::Satisfy,
                };
                let distribution = RequiredDistribution::new(dml.distribution.clone(), matching);
                Some(base_requirement(ctx, input).with_distribution(distribution))
            }
            PhysicalOp::Sequence(sequence) => sequence_input(sequence, ctx, child, input, optimized),
            PhysicalOp::TableScan(_)
            | PhysicalOp::IndexScan(_)
            | PhysicalOp::ConstTableGet(_)
            | PhysicalOp::CteScan(_)
            | PhysicalOp::Sort(_)
            | PhysicalOp::Motion(_)
            | PhysicalOp::Spool
            | PhysicalOp::PartitionSelector(_) => None,
        }
    }

    /// Derives physical properties of this operator from the derived properties of its inputs.
    pub fn derive_properties(&self, ctx: &PhysicalContext, inputs: &[DerivedProperties]) -> DerivedProperties {
        let first = || inputs.first().cloned().unwrap_or_else(|| DerivedProperties::new(DistributionSpec::Random));

        match self {
            PhysicalOp::TableScan(scan) => {
                let mut props = DerivedProperties::new(scan.distribution.clone());
                props.rewindability = Rewindability::Rewindable;
                if scan.dynamic {
                    props.partition.unresolved.insert(scan.scan_id);
                }
                props
            }
            PhysicalOp::IndexScan(scan) => {
                let mut props = DerivedProperties::new(scan.distribution.clone());
                props.ordering = scan.ordering.clone();
                props.rewindability = Rewindability::Rewindable;
                if scan.dynamic {
                    props.partition.unresolved.insert(scan.scan_id);
                }
                props
            }
            PhysicalOp::ConstTableGet(_) => {
                let mut props = DerivedProperties::new(DistributionSpec::Universal);
                props.rewindability = Rewindability::Rewindable;
                props
            }
            PhysicalOp::CteScan(scan) => derive_cte_scan(scan, ctx),
            PhysicalOp::Filter(_) => first(),
            PhysicalOp::ComputeScalar(compute) => {
                let mut props = first();
                let (source, target): (Vec<ColumnId>, Vec<ColumnId>) = compute
                    .exprs
                    .iter()
                    .filter_map(|(id, expr)| match expr {
                        ScalarExpr::Column(column) => Some((*column, *id)),
                        _ => None,
                    })
                    .unzip();
                props.ordering = props.ordering.with_mapping(&source, &target).retain_prefix(&ctx.logical.output_columns);
                props.distribution = props.distribution.with_mapping(&source, &target);
                props
            }
            PhysicalOp::HashJoin(join) => derive_hash_join(join, inputs),
            PhysicalOp::NestedLoopJoin(_) => {
                let mut props = join_properties(inputs);
                props.ordering = first().ordering;
                props
            }
            PhysicalOp::IndexNestedLoopJoin(join) => {
                let mut props = first();
                if props.distribution == DistributionSpec::Replicated {
                    props.distribution = join.distribution.clone();
                }
                props.rewindability = Rewindability::NotRewindable;
                props
            }
            PhysicalOp::HashAggregate(_) => {
                let mut props = first();
                props.ordering = OrderSpec::none();
                props.rewindability = Rewindability::Rewindable;
                props
            }
            PhysicalOp::StreamAggregate(aggr) => derive_stream_aggregate(aggr, first()),
            PhysicalOp::Limit(_) => first(),
            PhysicalOp::Append(append) => derive_append(append, inputs),
            PhysicalOp::Dml(dml) => {
                let mut props = DerivedProperties::new(dml.distribution.clone());
                let input = first();
                props.partition = input.partition;
                props.cte_consumers = input.cte_consumers;
                props
            }
            PhysicalOp::Sequence(sequence) => {
                let mut props = inputs.get(1).cloned().unwrap_or_else(first);
                props.cte_consumers.remove(&sequence.cte_id);
                if let Some(producer) = inputs.first() {
                    props.cte_consumers.extend(producer.cte_consumers.iter().copied());
                    props.partition = PartitionInfo::union(vec![&producer.partition, &props.partition]);
                }
                props
            }
            PhysicalOp::Sort(sort) => {
                let mut props = first();
                props.ordering = sort.ordering.clone();
                props.rewindability = Rewindability::Rewindable;
                props
            }
            PhysicalOp::Motion(motion) => {
                let mut props = first();
                props.rewindability = Rewindability::NotRewindable;
                props.ordering = OrderSpec::none();
                props.distribution = match &motion.kind {
                    MotionKind::Gather => DistributionSpec::StrictSingleton,
                    MotionKind::GatherMerge(ordering) => {
                        props.ordering = ordering.clone();
                        DistributionSpec::StrictSingleton
                    }
                    MotionKind::Broadcast => DistributionSpec::Replicated,
                    MotionKind::Redistribute(columns) => DistributionSpec::Hashed(columns.clone()),
                    MotionKind::Random => DistributionSpec::Random,
                };
                props
            }
            PhysicalOp::Spool => {
                let mut props = first();
                props.rewindability = Rewindability::Rewindable;
                props
            }
            PhysicalOp::PartitionSelector(selector) => {
                let mut props = first();
                if selector.is_propagating() {
                    props.partition.propagated.insert(selector.scan_id);
                } else {
                    props.partition.unresolved.remove(&selector.scan_id);
                }
                props
            }
        }
    }
}

/// Requirements that only carry partition propagation and CTE producers down to the given input.
fn base_requirement(ctx: &PhysicalContext, input: &LogicalProperties) -> RequiredProperties {
    RequiredProperties::none()
        .with_partition(ctx.required.partition.restrict(input))
        .with_cte(ctx.required.cte.clone())
}

/// Passes the required ordering and/or distribution down to the given input.
/// Returns `None` if the input does not produce the columns of a requirement it has to satisfy.
fn pass_through(
    ctx: &PhysicalContext,
    input: &LogicalProperties,
    ordering: bool,
    distribution: bool,
) -> Option<RequiredProperties> {
    let mut required = base_requirement(ctx, input).with_rewindability(ctx.required.rewindability);
    if ordering {
        if !ctx.required.ordering.is_subset_of(&input.output_columns) {
            return None;
        }
        required = required.with_ordering(ctx.required.ordering.clone());
    }
    if distribution {
        if !ctx.required.distribution.spec.is_covered_by(&input.output_columns) {
            return None;
        }
        required = required.with_distribution(ctx.required.distribution.clone());
    }
    Some(required)
}

/// The part of the required ordering an outer input of an order-preserving join can provide.
fn outer_ordering(ctx: &PhysicalContext, outer: &LogicalProperties) -> OrderSpec {
    if ctx.required.ordering.is_subset_of(&outer.output_columns) {
        ctx.required.ordering.clone()
    } else {
        OrderSpec::none()
    }
}

fn hash_join_input(
    join: &HashJoin,
    ctx: &PhysicalContext,
    request: usize,
    child: usize,
    optimized: &[DerivedProperties],
) -> Option<RequiredProperties> {
    let outer = ctx.inputs.get(0)?;
    let inner = ctx.inputs.get(1)?;
    // Copies of the preserved inner input of a right outer join would duplicate its unmatched rows.
    let right_outer = join.join_type == JoinType::RightOuter;

    if child == 0 {
        let distribution = match request {
            0 if !join.left_keys.is_empty() => RequiredDistribution::hashed(join.left_keys.clone()),
            1 if right_outer => return None,
            1 => RequiredDistribution::any(),
            2 => RequiredDistribution::singleton(),
            _ => return None,
        };
        let mut partition = ctx.required.partition.restrict(outer);
        partition.propagators.extend(join.partition_scans.iter().map(|(scan, column)| (*scan, *column)));
        let required = base_requirement(ctx, outer).with_distribution(distribution).with_partition(partition);
        return Some(required);
    }

    let outer_distribution = &optimized.first()?.distribution;
    let not_in = join.join_type == JoinType::LeftAntiSemiNotIn;
    let distribution = match request {
        0 | 1 if not_in && !outer_distribution.is_singleton() => RequiredDistribution::mandatory_replicated(),
        0 => match outer_distribution {
            DistributionSpec::Hashed(columns) => {
                let equivalences = &outer.equivalence_classes;
                let inner_columns: Option<Vec<_>> = columns
                    .iter()
                    .map(|c| {
                        let position = join.left_keys.iter().position(|k| equivalences.are_equivalent(*k, *c))?;
                        join.right_keys.get(position).copied()
                    })
                    .collect();
                RequiredDistribution::exact_hashed(inner_columns.unwrap_or_else(|| join.right_keys.clone()))
            }
            d if d.is_singleton() => RequiredDistribution::singleton(),
            _ if right_outer => return None,
            _ => RequiredDistribution::replicated(),
        },
        1 if right_outer => return None,
        1 if outer_distribution.is_singleton() => RequiredDistribution::singleton(),
        1 => RequiredDistribution::replicated(),
        2 => RequiredDistribution::singleton(),
        _ => return None,
    };
    let mut partition = ctx.required.partition.restrict(inner);
    partition.allowed_unresolved.extend(join.partition_scans.iter().map(|(scan, _)| *scan));
    Some(base_requirement(ctx, inner).with_distribution(distribution).with_partition(partition))
}

fn index_join_input(
    join: &IndexNestedLoopJoin,
    ctx: &PhysicalContext,
    request: usize,
    outer: &LogicalProperties,
) -> Option<RequiredProperties> {
    let distribution = match (request, &join.distribution) {
        (_, DistributionSpec::Replicated) | (_, DistributionSpec::Universal) if request == 0 => {
            RequiredDistribution::any()
        }
        (0, DistributionSpec::Hashed(columns)) => {
            // The outer rows must be co-located with the rows of the table they join with.
            let outer_columns: Option<Vec<_>> = columns
                .iter()
                .map(|c| {
                    let position = join.inner_keys.iter().position(|k| k == c)?;
                    join.outer_keys.get(position).copied()
                })
                .collect();
            RequiredDistribution::exact_hashed(outer_columns?)
        }
        (0, d) if d.is_singleton() => RequiredDistribution::singleton(),
        (1, DistributionSpec::Hashed(_)) | (1, DistributionSpec::Random) if join.join_type == JoinType::Inner => {
            RequiredDistribution::replicated()
        }
        _ => return None,
    };
    Some(
        base_requirement(ctx, outer)
            .with_distribution(distribution)
            .with_ordering(outer_ordering(ctx, outer)),
    )
}

fn sequence_input(
    sequence: &Sequence,
    ctx: &PhysicalContext,
    child: usize,
    input: &LogicalProperties,
    optimized: &[DerivedProperties],
) -> Option<RequiredProperties> {
    if child == 0 {
        return Some(base_requirement(ctx, input));
    }
    let producer = optimized.first()?;
    let cte = ctx.required.cte.with_producer(sequence.cte_id, producer.distribution.clone());
    let required = pass_through(ctx, input, true, true)?;
    Some(required.with_cte(cte))
}

/// Properties of a join that preserves the distribution of its outer input.
fn join_properties(inputs: &[DerivedProperties]) -> DerivedProperties {
    let outer = inputs.get(0).map(|p| p.distribution.clone()).unwrap_or(DistributionSpec::Random);
    let distribution = match (&outer, inputs.get(1)) {
        (DistributionSpec::Universal, Some(inner)) => inner.distribution.clone(),
        _ => outer,
    };
    let mut props = DerivedProperties::new(distribution);
    props.partition = PartitionInfo::union(inputs.iter().map(|p| &p.partition));
    props.cte_consumers = inputs.iter().flat_map(|p| p.cte_consumers.iter().copied()).collect();
    props
}

fn derive_hash_join(join: &HashJoin, inputs: &[DerivedProperties]) -> DerivedProperties {
    let mut props = join_properties(inputs);
    if join.join_type == JoinType::RightOuter {
        // Unmatched rows of the outer input are null-extended so only the inner distribution holds.
        if let Some(inner) = inputs.get(1) {
            props.distribution = inner.distribution.clone();
        }
    }
    if let Some(outer) = inputs.first() {
        let resolved: BTreeSet<_> = join
            .partition_scans
            .iter()
            .map(|(scan, _)| *scan)
            .filter(|scan| outer.partition.propagated.contains(scan))
            .collect();
        for scan in resolved {
            props.partition.unresolved.remove(&scan);
            props.partition.propagated.remove(&scan);
        }
    }
    props
}

fn derive_stream_aggregate(aggr: &PhysicalAggregate, input: DerivedProperties) -> DerivedProperties {
    let group_by: ColumnSet = aggr.group_by.iter().copied().collect();
    let ordering = input.ordering.retain_prefix(&group_by);
    DerivedProperties { ordering, ..input }
}

fn derive_append(append: &Append, inputs: &[DerivedProperties]) -> DerivedProperties {
    let distribution = if !inputs.is_empty() && inputs.iter().all(|p| p.distribution.is_singleton()) {
        DistributionSpec::Singleton
    } else if inputs.len() == 1 {
        inputs[0].distribution.with_mapping(&append.input_columns[0], &append.output)
    } else {
        DistributionSpec::Random
    };
    let mut props = DerivedProperties::new(distribution);
    props.partition = PartitionInfo::union(inputs.iter().map(|p| &p.partition));
    props.cte_consumers = inputs.iter().flat_map(|p| p.cte_consumers.iter().copied()).collect();
    props
}

fn derive_cte_scan(scan: &CteScan, ctx: &PhysicalContext) -> DerivedProperties {
    // A consumer without a producer derives a distribution no requirement accepts.
    let distribution = match ctx.required.cte.producers.get(&scan.cte_id) {
        Some(distribution) => distribution.with_mapping(&scan.producer_columns, &scan.columns),
        None => DistributionSpec::Random,
    };
    let mut props = DerivedProperties::new(distribution);
    props.rewindability = Rewindability::Rewindable;
    props.cte_consumers.insert(scan.cte_id);
    props
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::operators::relational::physical::{Filter, Motion, NestedLoopJoin, Sort, TableScan};
    use crate::operators::scalar::col;
    use crate::properties::logical::MaxCardinality;
    use crate::properties::ordering::OrderingColumn;

    fn logical(columns: &[ColumnId]) -> LogicalProperties {
        let mut props = LogicalProperties::empty();
        props.output_columns = columns.iter().copied().collect();
        props.max_cardinality = MaxCardinality::Unbounded;
        props
    }

    fn hash_join(left_keys: Vec<ColumnId>, right_keys: Vec<ColumnId>) -> PhysicalOp {
        PhysicalOp::HashJoin(HashJoin {
            join_type: JoinType::Inner,
            condition: ScalarExpr::eq(col(left_keys[0]), col(right_keys[0])),
            left_keys,
            right_keys,
            partition_scans: vec![(7, 1)],
        })
    }

    #[test]
    fn hash_join_requests_colocated_inputs() {
        let join = hash_join(vec![1], vec![3]);
        let required = RequiredProperties::none();
        let group = logical(&[1, 2, 3, 4]);
        let left = logical(&[1, 2]);
        let right = logical(&[3, 4]);
        let inputs = [&left, &right];
        let ctx = PhysicalContext {
            required: &required,
            logical: &group,
            inputs: &inputs,
        };

        assert_eq!(join.num_requests(), 3);

        let outer = join.required_input(&ctx, 0, 0, &[]).unwrap();
        assert_eq!(outer.distribution, RequiredDistribution::hashed(vec![1]));
        assert_eq!(outer.partition.propagators.get(&7), Some(&1), "dynamic partition elimination");

        let outer_props = DerivedProperties::new(DistributionSpec::Hashed(vec![1]));
        let inner = join.required_input(&ctx, 0, 1, &[outer_props]).unwrap();
        assert_eq!(inner.distribution, RequiredDistribution::exact_hashed(vec![3]));
        assert!(inner.partition.allowed_unresolved.contains(&7));

        let outer_props = DerivedProperties::new(DistributionSpec::Singleton);
        let inner = join.required_input(&ctx, 0, 1, &[outer_props]).unwrap();
        assert_eq!(inner.distribution, RequiredDistribution::singleton());

        let inner = join.required_input(&ctx, 1, 1, &[DerivedProperties::new(DistributionSpec::Random)]).unwrap();
        assert_eq!(inner.distribution, RequiredDistribution::replicated());
    }

    #[test]
    fn not_in_join_requires_replicated_inner_input() {
        let join = PhysicalOp::HashJoin(HashJoin {
            join_type: JoinType::LeftAntiSemiNotIn,
            condition: ScalarExpr::eq(col(1), col(3)),
            left_keys: vec![1],
            right_keys: vec![3],
            partition_scans: vec![],
        });
        let required = RequiredProperties::none();
        let group = logical(&[1, 2]);
        let left = logical(&[1, 2]);
        let right = logical(&[3, 4]);
        let inputs = [&left, &right];
        let ctx = PhysicalContext {
            required: &required,
            logical: &group,
            inputs: &inputs,
        };

        let outer_props = DerivedProperties::new(DistributionSpec::Hashed(vec![1]));
        let inner = join.required_input(&ctx, 0, 1, &[outer_props]).unwrap();
        assert!(inner.distribution.is_mandatory_replication(), "{}", inner.distribution);

        let outer_props = DerivedProperties::new(DistributionSpec::Singleton);
        let inner = join.required_input(&ctx, 2, 1, &[outer_props]).unwrap();
        assert_eq!(inner.distribution, RequiredDistribution::singleton());
    }

    #[test]
    fn replicated_inner_input_requires_distributed_outer_input() {
        let hash_join = hash_join(vec![1], vec![3]);
        let nl_join = PhysicalOp::NestedLoopJoin(NestedLoopJoin {
            join_type: JoinType::Inner,
            condition: ScalarExpr::eq(col(1), col(3)),
        });
        let required = RequiredProperties::none();
        let group = logical(&[1, 2, 3, 4]);
        let left = logical(&[1, 2]);
        let right = logical(&[3, 4]);
        let inputs = [&left, &right];
        let ctx = PhysicalContext {
            required: &required,
            logical: &group,
            inputs: &inputs,
        };
        let coordinator = [DerivedProperties::new(DistributionSpec::StrictSingleton)];
        let random = [DerivedProperties::new(DistributionSpec::Random)];

        let inner = hash_join.required_input(&ctx, 1, 1, &coordinator).unwrap();
        assert_eq!(inner.distribution, RequiredDistribution::singleton());
        let inner = hash_join.required_input(&ctx, 1, 1, &random).unwrap();
        assert_eq!(inner.distribution, RequiredDistribution::replicated());

        let inner = nl_join.required_input(&ctx, 0, 1, &coordinator).unwrap();
        assert_eq!(inner.distribution, RequiredDistribution::singleton());
        assert_eq!(inner.rewindability, Rewindability::Rewindable);
        let inner = nl_join.required_input(&ctx, 0, 1, &random).unwrap();
        assert_eq!(inner.distribution, RequiredDistribution::replicated());
    }

    #[test]
    fn right_outer_hash_join_never_replicates_inner_input() {
        let join = PhysicalOp::HashJoin(HashJoin {
            join_type: JoinType::RightOuter,
            condition: ScalarExpr::eq(col(1), col(3)),
            left_keys: vec![1],
            right_keys: vec![3],
            partition_scans: vec![],
        });
        let required = RequiredProperties::none();
        let group = logical(&[1, 2, 3, 4]);
        let left = logical(&[1, 2]);
        let right = logical(&[3, 4]);
        let inputs = [&left, &right];
        let ctx = PhysicalContext {
            required: &required,
            logical: &group,
            inputs: &inputs,
        };

        let outer = join.required_input(&ctx, 0, 0, &[]).unwrap();
        assert_eq!(outer.distribution, RequiredDistribution::hashed(vec![1]));
        let inner = join.required_input(&ctx, 0, 1, &[DerivedProperties::new(DistributionSpec::Hashed(vec![1]))]).unwrap();
        assert_eq!(inner.distribution, RequiredDistribution::exact_hashed(vec![3]));
        assert_eq!(join.required_input(&ctx, 0, 1, &[DerivedProperties::new(DistributionSpec::Random)]), None);

        assert_eq!(join.required_input(&ctx, 1, 0, &[]), None, "broadcast of the preserved side");
        assert_eq!(join.required_input(&ctx, 1, 1, &[DerivedProperties::new(DistributionSpec::Random)]), None);

        let singleton = [DerivedProperties::new(DistributionSpec::Singleton)];
        let inner = join.required_input(&ctx, 2, 1, &singleton).unwrap();
        assert_eq!(inner.distribution, RequiredDistribution::singleton());

        let props = join.derive_properties(
            &ctx,
            &[
                DerivedProperties::new(DistributionSpec::Hashed(vec![1])),
                DerivedProperties::new(DistributionSpec::Hashed(vec![3])),
            ],
        );
        assert_eq!(props.distribution, DistributionSpec::Hashed(vec![3]));
    }

    #[test]
    fn hash_join_resolves_propagated_scans() {
        let join = hash_join(vec![1], vec![3]);
        let required = RequiredProperties::none();
        let group = logical(&[1, 2, 3, 4]);
        let ctx = PhysicalContext {
            required: &required,
            logical: &group,
            inputs: &[],
        };

        let mut outer = DerivedProperties::new(DistributionSpec::Hashed(vec![1]));
        outer.partition.propagated.insert(7);
        let mut inner = DerivedProperties::new(DistributionSpec::Hashed(vec![3]));
        inner.partition.unresolved.insert(7);

        let props = join.derive_properties(&ctx, &[outer, inner]);
        assert_eq!(props.distribution, DistributionSpec::Hashed(vec![1]));
        assert!(props.partition.is_empty(), "{}", props.partition);
    }

    #[test]
    fn filter_requests() {
        let filter = PhysicalOp::Filter(Filter { filter: col(1) });
        let required = RequiredProperties::new_with_ordering(OrderSpec::from_columns(&[1]))
            .with_distribution(RequiredDistribution::singleton());
        let group = logical(&[1, 2]);
        let input = logical(&[1, 2]);
        let inputs = [&input];
        let ctx = PhysicalContext {
            required: &required,
            logical: &group,
            inputs: &inputs,
        };

        assert_eq!(filter.required_input(&ctx, 0, 0, &[]).unwrap(), required);
        assert_eq!(
            filter.required_input(&ctx, 1, 0, &[]).unwrap(),
            RequiredProperties::new_with_distribution(RequiredDistribution::singleton())
        );
        assert_eq!(filter.required_input(&ctx, 2, 0, &[]).unwrap(), RequiredProperties::none());
    }

    #[test]
    fn enforcers() {
        let required = RequiredProperties::none();
        let group = logical(&[1, 2]);
        let ctx = PhysicalContext {
            required: &required,
            logical: &group,
            inputs: &[],
        };
        let scan = PhysicalOp::TableScan(TableScan {
            table: "A".into(),
            alias: "a".into(),
            columns: vec![1, 2],
            scan_id: 1,
            dynamic: true,
            distribution: DistributionSpec::Hashed(vec![1]),
        });
        let scan_props = scan.derive_properties(&ctx, &[]);
        assert!(scan_props.partition.unresolved.contains(&1));
        assert!(scan_props.rewindability.is_rewindable());

        let ordering = OrderSpec::new(vec![OrderingColumn::desc(2)]);
        let sort = PhysicalOp::Sort(Sort {
            ordering: ordering.clone(),
        });
        let sorted = sort.derive_properties(&ctx, &[scan_props]);
        assert_eq!(sorted.ordering, ordering);

        let gather = PhysicalOp::Motion(Motion {
            kind: MotionKind::GatherMerge(ordering.clone()),
        });
        let gathered = gather.derive_properties(&ctx, &[sorted]);
        assert_eq!(gathered.distribution, DistributionSpec::StrictSingleton);
        assert_eq!(gathered.ordering, ordering);
        assert!(!gathered.rewindability.is_rewindable());
        assert_eq!(gather.num_requests(), 0);
    }
}
