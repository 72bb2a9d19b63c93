use crate::error::OptimizerError;
use crate::memo::{CostContextId, Memo, MAX_EXPR_DEPTH};
use crate::plan::PhysicalPlan;

/// Builds a physical plan from the given cost context. Inputs of every expression are
/// the cost contexts selected by the context of that expression, not the current winners of the input groups.
///
/// Returns an internal error if any of those contexts has been pruned.
pub fn extract_plan(memo: &Memo, context: CostContextId) -> Result<PhysicalPlan, OptimizerError> {
    extract(memo, context, 0)
}

fn extract(memo: &Memo, id: CostContextId, depth: usize) -> Result<PhysicalPlan, OptimizerError> {
    if depth > MAX_EXPR_DEPTH {
        return Err(OptimizerError::internal(format!("Plan is too deep. Max depth: {}", MAX_EXPR_DEPTH)));
    }
    let context = memo.cost_context(id)?;
    let op = match memo.expr(context.expr).physical_op() {
        Some(op) => op.clone(),
        None => {
            let message = format!("Cost context {} refers to a logical expression {}", id, context.expr);
            return Err(OptimizerError::internal(message));
        }
    };

    let mut inputs = Vec::with_capacity(context.inputs.len());
    for input in context.inputs.iter() {
        inputs.push(extract(memo, *input, depth + 1)?);
    }

    let mut plan = PhysicalPlan {
        op,
        inputs,
        cost: context.expr_cost,
        properties: context.expr_derived.clone(),
    };
    for enforcer in context.enforcers.iter() {
        plan = PhysicalPlan {
            op: enforcer.op.clone(),
            inputs: vec![plan],
            cost: enforcer.cost,
            properties: enforcer.derived.clone(),
        };
    }
    Ok(plan)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cost::Cost;
    use crate::memo::{CostContext, Enforcer, ExprId};
    use crate::operators::relational::physical::{Filter, Motion, MotionKind, PhysicalOp, TableScan};
    use crate::operators::scalar::{col, int, ScalarExpr};
    use crate::operators::Expr;
    use crate::plan::format_plan;
    use crate::properties::distribution::DistributionSpec;
    use crate::properties::physical::{DerivedProperties, RequiredProperties};
    use crate::testing::TestCatalog;

    fn context(expr: ExprId, cost: f64, inputs: Vec<CostContextId>, enforcers: Vec<Enforcer>) -> CostContext {
        let derived = enforcers
            .last()
            .map(|e| e.derived.clone())
            .unwrap_or_else(|| DerivedProperties::new(DistributionSpec::Random));
        let total = enforcers.last().map(|e| e.cost).unwrap_or_else(|| Cost::new(cost));
        CostContext {
            expr,
            required: RequiredProperties::none(),
            request: 0,
            inputs,
            expr_derived: DerivedProperties::new(DistributionSpec::Random),
            expr_cost: Cost::new(cost),
            enforcers,
            derived,
            cost: total,
            rank: 0,
        }
    }

    fn scan(scan_id: usize) -> Expr {
        Expr::physical(
            PhysicalOp::TableScan(TableScan {
                table: "A".into(),
                alias: "a".into(),
                columns: vec![1, 2, 3],
                scan_id,
                dynamic: false,
                distribution: DistributionSpec::Random,
            }),
            vec![],
        )
    }

    #[test]
    fn extract_selected_contexts() {
        let catalog = TestCatalog::new();
        let mut memo = catalog.memo();
        let get_a = catalog.builder().get("A", "a").unwrap().build().unwrap();
        let scan_group = memo.insert(&get_a).unwrap();
        let filter = ScalarExpr::gt(col(1), int(1));
        let select = catalog.builder().get("A", "a").unwrap().select(filter.clone()).unwrap().build().unwrap();
        let select_group = memo.insert(&select).unwrap();

        let scan1 = memo.insert_into(scan_group, &scan(1)).unwrap().expr.unwrap();
        let scan2 = memo.insert_into(scan_group, &scan(2)).unwrap().expr.unwrap();
        let physical_filter = Expr::physical(PhysicalOp::Filter(Filter { filter }), vec![Expr::group(scan_group)]);
        let filter_expr = memo.insert_into(select_group, &physical_filter).unwrap().expr.unwrap();

        let scan_ctx = memo.add_cost_context(context(scan1, 20.0, vec![], vec![])).unwrap().unwrap();
        let gather = Enforcer {
            op: PhysicalOp::Motion(Motion {
                kind: MotionKind::Gather,
            }),
            derived: DerivedProperties::new(DistributionSpec::StrictSingleton),
            cost: Cost::new(40.0),
        };
        let filter_ctx = memo.add_cost_context(context(filter_expr, 25.0, vec![scan_ctx], vec![gather])).unwrap().unwrap();
        // A cheaper scan does not change the plan of the filter.
        memo.add_cost_context(context(scan2, 10.0, vec![], vec![])).unwrap().unwrap();

        let plan = extract_plan(&memo, filter_ctx).unwrap();
        assert_eq!(
            format_plan(&plan),
            "Motion Gather\n  Filter filter=col:1 > 1\n    TableScan A alias=a cols=[1, 2, 3]"
        );
        assert_eq!(plan.cost, Cost::new(40.0));
        assert_eq!(plan.properties.distribution, DistributionSpec::StrictSingleton);
        assert_eq!(plan.inputs[0].cost, Cost::new(25.0));
        assert_eq!(plan.inputs[0].inputs[0].cost, Cost::new(20.0));
        match &plan.inputs[0].inputs[0].op {
            PhysicalOp::TableScan(scan) => assert_eq!(scan.scan_id, 1),
            op => panic!("Unexpected operator: {}", op),
        }
    }

    #[test]
    fn pruned_context_is_an_internal_error() {
        let catalog = TestCatalog::new();
        let mut memo = catalog.memo();
        let get_a = catalog.builder().get("A", "a").unwrap().build().unwrap();
        let group = memo.insert(&get_a).unwrap();
        let scan1 = memo.insert_into(group, &scan(1)).unwrap().expr.unwrap();
        let scan2 = memo.insert_into(group, &scan(2)).unwrap().expr.unwrap();

        let first = memo.add_cost_context(context(scan1, 20.0, vec![], vec![])).unwrap().unwrap();
        memo.add_cost_context(context(scan2, 10.0, vec![], vec![])).unwrap().unwrap();

        let err = extract_plan(&memo, first).unwrap_err();
        assert!(matches!(err, OptimizerError::Internal(_)), "{}", err);
    }
}
