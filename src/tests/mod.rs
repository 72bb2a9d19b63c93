use crate::catalog::TableDistribution;
use crate::config::{OptimizerConfig, SearchStage};
use crate::error::OptimizerError;
use crate::hints::{JoinHint, PlanHints, ScanHint};
use crate::operators::builder::ExprBuilder;
use crate::operators::relational::logical::DmlKind;
use crate::operators::relational::physical::{MotionKind, PhysicalOp};
use crate::operators::relational::JoinType;
use crate::operators::scalar::{col, int, AggregateExpr, AggregateFunction, ScalarExpr};
use crate::operators::Expr;
use crate::optimizer::Optimizer;
use crate::plan::PhysicalPlan;
use crate::properties::distribution::RequiredDistribution;
use crate::properties::ordering::OrderSpec;
use crate::properties::physical::RequiredProperties;
use crate::rules::{XformId, XformSet};
use crate::testing::{hashed_table, table, OptimizerTester, TestCatalog};

fn count_nodes(plan: &PhysicalPlan, f: impl Fn(&PhysicalOp) -> bool) -> usize {
    let mut count = 0;
    plan.visit(&mut |node| {
        if f(&node.op) {
            count += 1;
        }
    });
    count
}

fn is_motion(op: &PhysicalOp) -> bool {
    matches!(op, PhysicalOp::Motion(_))
}

/// `(A join B on a1 = b1) join C on b1 = c1`. Columns: A(1, 2, 3), B(4, 5, 6), C(7, 8, 9).
fn three_way_join(builder: ExprBuilder) -> Expr {
    let a = builder.new_builder().get("A", "a").unwrap();
    let b = builder.new_builder().get("B", "b").unwrap();
    let c = builder.new_builder().get("C", "c").unwrap();
    a.join(b, JoinType::Inner, ScalarExpr::eq(col(1), col(4)))
        .unwrap()
        .join(c, JoinType::Inner, ScalarExpr::eq(col(4), col(7)))
        .unwrap()
        .build()
        .unwrap()
}

fn three_tables(distribution: impl Fn(&str) -> TableDistribution) -> TestCatalog {
    let catalog = TestCatalog::empty();
    for (name, columns) in [("A", ["a1", "a2", "a3"]), ("B", ["b1", "b2", "b3"]), ("C", ["c1", "c2", "c3"])].iter() {
        let table = table(name, columns).distribution(distribution(columns[0])).add_row_count(10_000).build().unwrap();
        catalog.add_table(table);
    }
    catalog
}

#[test]
fn colocated_join() {
    let catalog = three_tables(|key| TableDistribution::Hashed(vec![key.to_string()]));
    let tester = OptimizerTester::new(catalog);
    let result = tester.optimize(&three_way_join(tester.builder()));

    assert!(matches!(result.plan.op, PhysicalOp::HashJoin(_)), "plan:\n{}", result.plan);
    assert!(!result.plan.any(is_motion), "inputs are co-located. plan:\n{}", result.plan);
    assert_eq!(count_nodes(&result.plan, |op| matches!(op, PhysicalOp::TableScan(_))), 3);
}

#[test]
fn outer_join_builds_hash_table_on_smaller_preserved_side() {
    let catalog = TestCatalog::empty();
    for (name, columns, rows) in [("S", ["s1", "s2"], 10), ("L", ["l1", "l2"], 100_000)].iter() {
        let distribution = TableDistribution::Hashed(vec![columns[0].to_string()]);
        let table = table(name, columns).distribution(distribution).add_row_count(*rows).build().unwrap();
        catalog.add_table(table);
    }
    let tester = OptimizerTester::new(catalog);
    let builder = tester.builder();
    let s = builder.new_builder().get("S", "s").unwrap();
    let l = builder.new_builder().get("L", "l").unwrap();
    let expr = s.join(l, JoinType::LeftOuter, ScalarExpr::eq(col(1), col(3))).unwrap().build().unwrap();
    let result = tester.optimize(&expr);

    assert!(
        matches!(&result.plan.op, PhysicalOp::HashJoin(join) if join.join_type == JoinType::RightOuter),
        "plan:\n{}",
        result.plan
    );
    assert!(!result.plan.any(is_motion), "inputs are co-located. plan:\n{}", result.plan);
}

#[test]
fn join_of_tables_distributed_by_other_columns() {
    let catalog = TestCatalog::empty();
    for (name, columns) in [("A", ["a1", "a2", "a3"]), ("B", ["b1", "b2", "b3"]), ("C", ["c1", "c2", "c3"])].iter() {
        let table = table(name, columns).distributed_by(&[columns[1]]).add_row_count(10_000).build().unwrap();
        catalog.add_table(table);
    }
    let tester = OptimizerTester::new(catalog);
    let result = tester.optimize(&three_way_join(tester.builder()));

    assert!(result.plan.any(is_motion), "plan:\n{}", result.plan);
    assert!(result.plan.any(|op| matches!(op, PhysicalOp::HashJoin(_))), "plan:\n{}", result.plan);
}

#[test]
fn join_cost_does_not_depend_on_xform_order() {
    let catalog = three_tables(|_| TableDistribution::Random);
    let tester = OptimizerTester::new(catalog);
    let expr = three_way_join(tester.builder());
    let expected = tester.optimize(&expr);

    let catalog = tester.catalog();
    for order in [XformId::ALL.iter().rev().copied().collect::<Vec<_>>(), vec![XformId::JoinToNestedLoopJoin]].iter() {
        let optimizer = Optimizer::new(catalog.catalog(), catalog.metadata(), OptimizerConfig::default())
            .with_xform_order(order.clone());
        let result = optimizer.optimize(&expr, &RequiredProperties::none()).unwrap();
        let diff = (result.cost.value() - expected.cost.value()).abs();
        assert!(diff < 1e-6, "order: {:?}\nexpected: {}\nactual: {}\nplan:\n{}", order, expected.cost, result.cost, result.plan);
    }
}

#[test]
fn limit_with_ordering() {
    let mut tester = OptimizerTester::new(TestCatalog::new());
    tester.set_shuffle_runs(2);
    let expr = tester.builder().get("A", "a").unwrap().limit(0, Some(10), OrderSpec::from_columns(&[1])).unwrap();

    tester.expect_plan(
        &expr.build().unwrap(),
        r#"
Limit count=10
  Sort ord=[+1]
    Motion Gather
      TableScan A alias=a cols=[1, 2, 3]
"#,
    );
}

#[test]
fn required_ordering_of_a_filter() {
    let mut tester = OptimizerTester::new(TestCatalog::new());
    tester.set_required(RequiredProperties::none().with_ordering(OrderSpec::from_columns(&[2])));
    let expr = tester.builder().get("A", "a").unwrap().select(ScalarExpr::gt(col(1), int(10))).unwrap();

    let result = tester.optimize(&expr.build().unwrap());
    assert!(result.plan.properties.ordering.satisfies(&OrderSpec::from_columns(&[2])), "plan:\n{}", result.plan);
    assert_eq!(count_nodes(&result.plan, |op| matches!(op, PhysicalOp::Sort(_))), 1, "plan:\n{}", result.plan);
}

#[test]
fn insert_into_hashed_table() {
    let catalog = TestCatalog::new();
    catalog.add_table(hashed_table("H", &["h1", "h2", "h3"]).build().unwrap());
    let mut tester = OptimizerTester::new(catalog);
    tester.set_shuffle_runs(2);
    let expr = tester.builder().get("A", "a").unwrap().dml(DmlKind::Insert, "H").unwrap();

    tester.expect_plan(
        &expr.build().unwrap(),
        r#"
Dml Insert table=H
  Motion Redistribute cols=[1]
    TableScan A alias=a cols=[1, 2, 3]
"#,
    );
}

#[test]
fn aggregate_over_colocated_table() {
    let catalog = TestCatalog::empty();
    catalog.add_table(hashed_table("A", &["a1", "a2", "a3"]).add_row_count(1000).build().unwrap());
    let tester = OptimizerTester::new(catalog);
    let count = AggregateExpr::new(AggregateFunction::Count, vec![col(2)], false);
    let expr = tester.builder().get("A", "a").unwrap().aggregate(vec![1], vec![count]).unwrap();

    let result = tester.optimize(&expr.build().unwrap());
    assert!(
        matches!(result.plan.op, PhysicalOp::HashAggregate(_) | PhysicalOp::StreamAggregate(_)),
        "plan:\n{}",
        result.plan
    );
    assert!(!result.plan.any(is_motion), "plan:\n{}", result.plan);
}

#[test]
fn aggregate_over_random_table() {
    let tester = OptimizerTester::new(TestCatalog::new());
    let count = AggregateExpr::new(AggregateFunction::Count, vec![col(2)], false);
    let expr = tester.builder().get("A", "a").unwrap().aggregate(vec![1], vec![count]).unwrap();

    let result = tester.optimize(&expr.build().unwrap());
    assert!(
        matches!(result.plan.op, PhysicalOp::HashAggregate(_) | PhysicalOp::StreamAggregate(_)),
        "plan:\n{}",
        result.plan
    );
    assert!(result.plan.any(is_motion), "plan:\n{}", result.plan);
}

#[test]
fn static_partition_selection() {
    let catalog = TestCatalog::empty();
    catalog.add_table(table("P", &["p1", "p2"]).partition_by("p2").build().unwrap());
    let tester = OptimizerTester::new(catalog);
    let expr = tester.builder().get("P", "p").unwrap().build().unwrap();

    tester.expect_plan(
        &expr,
        r#"
PartitionSelector scan=1
  DynamicTableScan P alias=p cols=[1, 2]
"#,
    );
}

#[test]
fn dynamic_partition_elimination() {
    let catalog = TestCatalog::new();
    catalog.add_table(table("P", &["p1", "p2"]).partition_by("p2").build().unwrap());
    let mut tester = OptimizerTester::new(catalog);
    let disabled: XformSet = vec![XformId::JoinCommutativity, XformId::JoinToNestedLoopJoin].into_iter().collect();
    tester.set_config(OptimizerConfig::default().with_disabled_xforms(disabled));

    let builder = tester.builder();
    let a = builder.new_builder().get("A", "a").unwrap();
    let p = builder.new_builder().get("P", "p").unwrap();
    let expr = a.join(p, JoinType::Inner, ScalarExpr::eq(col(1), col(5))).unwrap().build().unwrap();

    let result = tester.optimize(&expr);
    let propagating = |op: &PhysicalOp| matches!(op, PhysicalOp::PartitionSelector(s) if s.is_propagating());
    let static_selector = |op: &PhysicalOp| matches!(op, PhysicalOp::PartitionSelector(s) if !s.is_propagating());

    assert!(matches!(&result.plan.op, PhysicalOp::HashJoin(join) if !join.partition_scans.is_empty()));
    assert!(result.plan.any(propagating), "plan:\n{}", result.plan);
    assert!(!result.plan.any(static_selector), "plan:\n{}", result.plan);
    assert!(result.plan.properties.partition.unresolved.is_empty());
}

#[test]
fn common_table_expression() {
    let tester = OptimizerTester::new(TestCatalog::new());
    let builder = tester.builder();
    let producer = builder.new_builder().get("A", "a").unwrap();
    let cte = producer.register_cte().unwrap();
    // The first consumer produces columns 4, 5, 6 and the second one 7, 8, 9.
    let c1 = builder.new_builder().cte_consumer(cte).unwrap();
    let c2 = builder.new_builder().cte_consumer(cte).unwrap();
    let body = c1.join(c2, JoinType::Inner, ScalarExpr::eq(col(4), col(7))).unwrap();
    let expr = producer.cte_anchor(cte, body).unwrap().build().unwrap();

    let result = tester.optimize(&expr);
    assert!(matches!(result.plan.op, PhysicalOp::Sequence(_)), "plan:\n{}", result.plan);
    assert_eq!(count_nodes(&result.plan, |op| matches!(op, PhysicalOp::CteScan(_))), 2, "plan:\n{}", result.plan);
    assert!(result.plan.properties.cte_consumers.is_empty());
}

#[test]
fn join_hints() {
    let mut tester = OptimizerTester::new(TestCatalog::new());
    tester.set_hints(PlanHints::new().with_join_hint(&["a", "b"], JoinHint::NestLoop));

    let builder = tester.builder();
    let a = builder.new_builder().get("A", "a").unwrap();
    let b = builder.new_builder().get("B", "b").unwrap();
    let expr = a.join(b, JoinType::Inner, ScalarExpr::eq(col(1), col(4))).unwrap().build().unwrap();

    let result = tester.optimize(&expr);
    assert!(result.plan.any(|op| matches!(op, PhysicalOp::NestedLoopJoin(_))), "plan:\n{}", result.plan);
    assert!(!result.plan.any(|op| matches!(op, PhysicalOp::HashJoin(_))), "plan:\n{}", result.plan);

    tester.set_hints(PlanHints::new().with_join_hint(&["b", "a"], JoinHint::NoNestLoop));
    let result = tester.optimize(&expr);
    assert!(result.plan.any(|op| matches!(op, PhysicalOp::HashJoin(_))), "plan:\n{}", result.plan);
    assert!(!result.plan.any(|op| matches!(op, PhysicalOp::NestedLoopJoin(_))), "plan:\n{}", result.plan);
}

#[test]
fn scan_hints() {
    let catalog = TestCatalog::new();
    catalog.add_index("A", "a_a2_idx", &["a2"]);
    let mut tester = OptimizerTester::new(catalog);
    tester.set_hints(PlanHints::new().with_scan_hint("a", ScanHint::IndexScan));
    let expr = tester.builder().get("A", "a").unwrap().select(ScalarExpr::gt(col(2), int(10))).unwrap();

    tester.expect_plan(
        &expr.build().unwrap(),
        "IndexScan A index=a_a2_idx cols=[1, 2, 3] cond=col:2 > 10",
    );
}

#[test]
fn hints_that_forbid_every_plan() {
    let catalog = TestCatalog::new();
    let hints = PlanHints::new().with_scan_hint("a", ScanHint::NoSeqScan);
    let optimizer = Optimizer::new(catalog.catalog(), catalog.metadata(), OptimizerConfig::default()).with_hints(hints);
    let expr = catalog.builder().get("A", "a").unwrap().build().unwrap();

    let err = optimizer.optimize(&expr, &RequiredProperties::none()).unwrap_err();
    assert!(matches!(err, OptimizerError::Unsupported(_)), "{}", err);
    assert!(err.is_fallback());
}

#[test]
fn search_stages_from_yaml() {
    let config: OptimizerConfig = serde_yaml::from_str(include_str!("stages.yaml")).unwrap();
    assert_eq!(config.join_order_threshold, 4);
    assert_eq!(config.cost.segments, 4);
    assert_eq!(config.stages.len(), 2);
    assert!(config.stages[0].xforms.contains(XformId::JoinToHashJoin));
    assert!(!config.stages[0].xforms.contains(XformId::JoinCommutativity));
    assert_eq!(config.stages[0].max_alternatives, Some(1000));
    assert_eq!(config.stages[1].xforms, XformSet::all());

    let catalog = TestCatalog::new();
    let builder = catalog.builder();
    let a = builder.new_builder().get("A", "a").unwrap();
    let b = builder.new_builder().get("B", "b").unwrap();
    let expr = a.join(b, JoinType::Inner, ScalarExpr::eq(col(1), col(4))).unwrap().build().unwrap();

    let optimizer = Optimizer::new(catalog.catalog(), catalog.metadata(), config);
    let result = optimizer.optimize(&expr, &RequiredProperties::none()).unwrap();
    assert_eq!(result.stats.stages, 2);
    assert!(result.plan.any(|op| matches!(op, PhysicalOp::HashJoin(_))), "plan:\n{}", result.plan);
}

#[test]
fn later_stage_relaxes_restrictions() {
    let catalog = TestCatalog::new();
    let expr = catalog.builder().get("A", "a").unwrap().select(ScalarExpr::gt(col(1), int(1))).unwrap();
    let expr = expr.build().unwrap();
    let scans_only: XformSet = vec![XformId::GetToTableScan].into_iter().collect();
    let config = OptimizerConfig::default().with_stages(vec![SearchStage::new(scans_only), SearchStage::default()]);

    let optimizer = Optimizer::new(catalog.catalog(), catalog.metadata(), config);
    let result = optimizer.optimize(&expr, &RequiredProperties::none()).unwrap();
    assert_eq!(result.stats.stages, 2);
    assert!(matches!(result.plan.op, PhysicalOp::Filter(_)), "plan:\n{}", result.plan);
}

#[test]
fn gather_merge_of_sorted_index_scan() {
    let catalog = TestCatalog::new();
    catalog.add_index("A", "a_a2_idx", &["a2"]);
    let mut tester = OptimizerTester::new(catalog);
    tester.set_hints(PlanHints::new().with_scan_hint("a", ScanHint::IndexScan));
    tester.set_required(
        RequiredProperties::new_with_distribution(RequiredDistribution::singleton())
            .with_ordering(OrderSpec::from_columns(&[2])),
    );
    let expr = tester.builder().get("A", "a").unwrap().select(ScalarExpr::gt(col(2), int(10))).unwrap();

    let result = tester.optimize(&expr.build().unwrap());
    match &result.plan.op {
        PhysicalOp::Motion(motion) => assert!(matches!(motion.kind, MotionKind::GatherMerge(_)), "plan:\n{}", result.plan),
        _ => panic!("Unexpected plan:\n{}", result.plan),
    }
}
