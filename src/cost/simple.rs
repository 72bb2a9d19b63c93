use crate::config::CostModelParams;
use crate::cost::{Cost, CostEstimationContext, CostModel};
use crate::operators::relational::physical::{MotionKind, PhysicalOp};
use crate::properties::distribution::DistributionSpec;

/// A cost model with per-operator formulas driven by [CostModelParams].
///
/// Work done by operators over distributed inputs is divided between the segments of a cluster.
#[derive(Debug, Clone)]
pub struct SimpleCostModel {
    params: CostModelParams,
}

impl SimpleCostModel {
    pub fn new(params: CostModelParams) -> Self {
        SimpleCostModel { params }
    }

    fn parallelism(&self, distribution: Option<&DistributionSpec>) -> f64 {
        match distribution {
            Some(DistributionSpec::Hashed(_)) | Some(DistributionSpec::Random) => self.params.segments.max(1) as f64,
            _ => 1.0,
        }
    }

    fn local_cost(&self, op: &PhysicalOp, ctx: &CostEstimationContext) -> f64 {
        let p = &self.params;
        let rows = ctx.output_rows();
        let input_rows = ctx.input_rows(0);
        let input_parallelism = self.parallelism(ctx.derived.first().map(|d| &d.distribution));

        match op {
            PhysicalOp::TableScan(scan) => rows * p.scan_row_cost / self.parallelism(Some(&scan.distribution)),
            PhysicalOp::IndexScan(scan) => rows * p.index_scan_row_cost / self.parallelism(Some(&scan.distribution)),
            PhysicalOp::Filter(_) => input_rows * p.filter_row_cost / input_parallelism,
            PhysicalOp::ComputeScalar(compute) => {
                input_rows * p.compute_row_cost * compute.exprs.len().max(1) as f64 / input_parallelism
            }
            PhysicalOp::HashJoin(_) => {
                let build = ctx.input_rows(1) * p.hash_build_row_cost;
                let probe = input_rows * p.hash_probe_row_cost;
                (build + probe) / input_parallelism
            }
            PhysicalOp::NestedLoopJoin(_) => input_rows * ctx.input_rows(1) * p.nested_loop_row_cost / input_parallelism,
            PhysicalOp::IndexNestedLoopJoin(_) => {
                (input_rows * p.index_scan_row_cost + rows * p.scan_row_cost) / input_parallelism
            }
            PhysicalOp::HashAggregate(_) => {
                (input_rows * p.aggregate_row_cost + rows * p.hash_build_row_cost) / input_parallelism
            }
            PhysicalOp::StreamAggregate(_) => input_rows * p.aggregate_row_cost / input_parallelism,
            PhysicalOp::Limit(_) => rows * p.filter_row_cost,
            PhysicalOp::Append(_) => {
                let total: f64 = ctx.inputs.iter().map(|s| s.row_count()).sum();
                total * p.compute_row_cost
            }
            PhysicalOp::ConstTableGet(_) => rows * p.compute_row_cost,
            PhysicalOp::Dml(_) => input_rows * p.scan_row_cost / input_parallelism,
            PhysicalOp::Sequence(_) => input_rows * p.materialize_row_cost / input_parallelism,
            PhysicalOp::CteScan(_) => rows * p.scan_row_cost,
            PhysicalOp::Sort(_) => {
                let per_segment = (input_rows / input_parallelism).max(1.0);
                per_segment * per_segment.log2().max(1.0) * p.sort_row_cost
            }
            PhysicalOp::Motion(motion) => {
                let transfer = input_rows * (p.motion_send_row_cost + p.motion_receive_row_cost);
                match &motion.kind {
                    MotionKind::Gather => transfer,
                    MotionKind::GatherMerge(_) => transfer + input_rows * p.compute_row_cost,
                    MotionKind::Broadcast => {
                        let penalty = if input_rows > p.broadcast_threshold
                            && !ctx.required.distribution.is_mandatory_replication()
                        {
                            p.broadcast_penalty
                        } else {
                            0.0
                        };
                        transfer * p.segments.max(1) as f64 / input_parallelism + penalty
                    }
                    MotionKind::Redistribute(_) | MotionKind::Random => transfer / self.params.segments.max(1) as f64,
                }
            }
            PhysicalOp::Spool => input_rows * p.materialize_row_cost / input_parallelism,
            PhysicalOp::PartitionSelector(_) => input_rows * p.filter_row_cost / input_parallelism,
        }
    }
}

impl Default for SimpleCostModel {
    fn default() -> Self {
        SimpleCostModel::new(CostModelParams::default())
    }
}

impl CostModel for SimpleCostModel {
    fn estimate_cost(&self, op: &PhysicalOp, ctx: &CostEstimationContext) -> Cost {
        let local = Cost::new(self.local_cost(op, ctx));
        local + ctx.input_cost()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::operators::relational::physical::{Motion, Sort};
    use crate::properties::distribution::RequiredDistribution;
    use crate::properties::ordering::OrderSpec;
    use crate::properties::physical::{DerivedProperties, RequiredProperties};
    use crate::statistics::Statistics;

    fn broadcast_cost(rows: f64, required: &RequiredProperties) -> Cost {
        let model = SimpleCostModel::default();
        let statistics = Statistics::from_row_count(rows);
        let derived = [DerivedProperties::new(DistributionSpec::Hashed(vec![1]))];
        let ctx = CostEstimationContext {
            statistics: &statistics,
            inputs: &[&statistics],
            input_costs: &[Cost::new(10.0)],
            derived: &derived,
            required,
        };
        let op = PhysicalOp::Motion(Motion {
            kind: MotionKind::Broadcast,
        });
        model.estimate_cost(&op, &ctx)
    }

    #[test]
    fn broadcast_penalty() {
        let threshold = CostModelParams::default().broadcast_threshold;
        let penalty = CostModelParams::default().broadcast_penalty;
        let required = RequiredProperties::new_with_distribution(RequiredDistribution::replicated());

        let small = broadcast_cost(threshold / 2.0, &required);
        assert!(small.value() < penalty, "{}", small);

        let large = broadcast_cost(threshold * 2.0, &required);
        assert!(large.value() > penalty, "{}", large);

        let mandatory = RequiredProperties::new_with_distribution(RequiredDistribution::mandatory_replicated());
        let large_mandatory = broadcast_cost(threshold * 2.0, &mandatory);
        assert!(large_mandatory.value() < penalty, "replication required by a NOT IN join: {}", large_mandatory);
    }

    #[test]
    fn cost_includes_input_costs() {
        let model = SimpleCostModel::default();
        let statistics = Statistics::from_row_count(100.0);
        let derived = [DerivedProperties::new(DistributionSpec::Singleton)];
        let required = RequiredProperties::none();
        let ctx = CostEstimationContext {
            statistics: &statistics,
            inputs: &[&statistics],
            input_costs: &[Cost::new(1000.0)],
            derived: &derived,
            required: &required,
        };
        let sort = PhysicalOp::Sort(Sort {
            ordering: OrderSpec::from_columns(&[1]),
        });
        assert!(model.estimate_cost(&sort, &ctx) > Cost::new(1000.0));
    }
}
