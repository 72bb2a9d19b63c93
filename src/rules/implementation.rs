//! Implementation xforms. An implementation xform produces physical expressions for a logical one.
//! Inputs of the produced expressions are the input groups of the logical expression.

use crate::catalog::{TableDistribution, TableRef};
use crate::error::OptimizerError;
use crate::hints::{JoinMethod, ScanMethod};
use crate::meta::{ColumnId, ColumnSet};
use crate::operators::relational::logical::{LogicalGet, LogicalOp, LogicalOpKind};
use crate::operators::relational::physical::{
    Append, ComputeScalar, ConstTableGet, CteScan, Filter, HashJoin, IndexNestedLoopJoin, IndexScan, NestedLoopJoin,
    PhysicalAggregate, PhysicalDml, PhysicalLimit, PhysicalOp, Sequence, TableScan,
};
use crate::operators::relational::JoinType;
use crate::operators::scalar::{BinaryOp, ScalarExpr};
use crate::operators::Expr;
use crate::properties::distribution::DistributionSpec;
use crate::properties::ordering::{OrderSpec, OrderingColumn};
use crate::rules::pattern::Pattern;
use crate::rules::{Promise, Xform, XformContext, XformId};

/// Returns all implementation xforms.
pub fn xforms() -> Vec<Box<dyn Xform>> {
    vec![
        Box::new(GetToTableScan::new()),
        Box::new(SelectToIndexScan::new()),
        Box::new(SelectToDynamicIndexScan::new()),
        Box::new(select_to_filter()),
        Box::new(project_to_compute_scalar()),
        Box::new(JoinToHashJoin::new()),
        Box::new(JoinToNestedLoopJoin::new()),
        Box::new(JoinToIndexNestedLoopJoin::new()),
        Box::new(aggregate_to_hash_aggregate()),
        Box::new(aggregate_to_stream_aggregate()),
        Box::new(implement_limit()),
        Box::new(UnionAllToAppend::new()),
        Box::new(values_to_const_table_get()),
        Box::new(ImplementDml::new()),
        Box::new(cte_anchor_to_sequence()),
        Box::new(cte_consumer_to_cte_scan()),
    ]
}

fn leaves(n: usize) -> Vec<Pattern> {
    vec![Pattern::Leaf; n]
}

/// Replaces a logical operator with a physical operator that has the same inputs.
pub struct OneToOne {
    id: XformId,
    pattern: Pattern,
    implement: fn(&LogicalOp) -> Option<PhysicalOp>,
}

impl OneToOne {
    fn new(id: XformId, kind: LogicalOpKind, arity: usize, implement: fn(&LogicalOp) -> Option<PhysicalOp>) -> Self {
        OneToOne {
            id,
            pattern: Pattern::operator(kind, leaves(arity)),
            implement,
        }
    }
}

impl Xform for OneToOne {
    fn id(&self) -> XformId {
        self.id
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn transform(&self, _ctx: &XformContext, binding: &Expr) -> Result<Vec<Expr>, OptimizerError> {
        let op = binding.logical_op().and_then(self.implement);
        Ok(op.map(|op| Expr::physical(op, binding.inputs().to_vec())).into_iter().collect())
    }
}

pub fn select_to_filter() -> OneToOne {
    OneToOne::new(XformId::SelectToFilter, LogicalOpKind::Select, 1, |op| match op {
        LogicalOp::Select(select) => Some(PhysicalOp::Filter(Filter {
            filter: select.filter.clone(),
        })),
        _ => None,
    })
}

pub fn project_to_compute_scalar() -> OneToOne {
    OneToOne::new(XformId::ProjectToComputeScalar, LogicalOpKind::Project, 1, |op| match op {
        LogicalOp::Project(project) => Some(PhysicalOp::ComputeScalar(ComputeScalar {
            exprs: project.exprs.clone(),
        })),
        _ => None,
    })
}

pub fn aggregate_to_hash_aggregate() -> OneToOne {
    OneToOne::new(XformId::AggregateToHashAggregate, LogicalOpKind::Aggregate, 1, |op| match op {
        LogicalOp::Aggregate(aggr) => Some(PhysicalOp::HashAggregate(PhysicalAggregate {
            group_by: aggr.group_by.clone(),
            aggregates: aggr.aggregates.clone(),
            stage: aggr.stage,
        })),
        _ => None,
    })
}

/// Stream aggregate expects its input to be ordered by the grouping columns.
pub fn aggregate_to_stream_aggregate() -> OneToOne {
    OneToOne::new(XformId::AggregateToStreamAggregate, LogicalOpKind::Aggregate, 1, |op| match op {
        LogicalOp::Aggregate(aggr) => Some(PhysicalOp::StreamAggregate(PhysicalAggregate {
            group_by: aggr.group_by.clone(),
            aggregates: aggr.aggregates.clone(),
            stage: aggr.stage,
        })),
        _ => None,
    })
}

pub fn implement_limit() -> OneToOne {
    OneToOne::new(XformId::ImplementLimit, LogicalOpKind::Limit, 1, |op| match op {
        LogicalOp::Limit(limit) => Some(PhysicalOp::Limit(PhysicalLimit {
            offset: limit.offset,
            count: limit.count,
            ordering: limit.ordering.clone(),
        })),
        _ => None,
    })
}

pub fn values_to_const_table_get() -> OneToOne {
    OneToOne::new(XformId::ValuesToConstTableGet, LogicalOpKind::Values, 0, |op| match op {
        LogicalOp::Values(values) => Some(PhysicalOp::ConstTableGet(ConstTableGet {
            columns: values.columns.clone(),
            rows: values.rows.clone(),
        })),
        _ => None,
    })
}

pub fn cte_anchor_to_sequence() -> OneToOne {
    OneToOne::new(XformId::CteAnchorToSequence, LogicalOpKind::CteAnchor, 2, |op| match op {
        LogicalOp::CteAnchor(anchor) => Some(PhysicalOp::Sequence(Sequence { cte_id: anchor.cte_id })),
        _ => None,
    })
}

pub fn cte_consumer_to_cte_scan() -> OneToOne {
    OneToOne::new(XformId::CteConsumerToCteScan, LogicalOpKind::CteConsumer, 0, |op| match op {
        LogicalOp::CteConsumer(consumer) => Some(PhysicalOp::CteScan(CteScan {
            cte_id: consumer.cte_id,
            columns: consumer.columns.clone(),
            producer_columns: consumer.producer_columns.clone(),
        })),
        _ => None,
    })
}

/// Maps the distribution policy of a table to the distribution of rows produced by a scan
/// of that table. `columns` are the identifiers of the scanned columns.
fn scan_distribution(ctx: &XformContext, table: &TableRef, columns: &[ColumnId]) -> Result<DistributionSpec, OptimizerError> {
    let distribution = match table.distribution() {
        TableDistribution::Hashed(keys) => {
            let mut hashed = Vec::with_capacity(keys.len());
            for key in keys {
                match find_column(ctx, columns, key)? {
                    Some(id) => hashed.push(id),
                    None => return Ok(DistributionSpec::Random),
                }
            }
            DistributionSpec::Hashed(hashed)
        }
        TableDistribution::Random => DistributionSpec::Random,
        TableDistribution::Replicated => DistributionSpec::Replicated,
        TableDistribution::Coordinator => DistributionSpec::StrictSingleton,
    };
    Ok(distribution)
}

/// Returns the identifier of the column with the given name among the given columns.
fn find_column(ctx: &XformContext, columns: &[ColumnId], name: &str) -> Result<Option<ColumnId>, OptimizerError> {
    for id in columns {
        if ctx.metadata().get_column(*id)?.name() == name {
            return Ok(Some(*id));
        }
    }
    Ok(None)
}

fn get_table(ctx: &XformContext, name: &str) -> Result<TableRef, OptimizerError> {
    ctx.catalog()
        .get_table(name)
        .ok_or_else(|| OptimizerError::catalog(format!("Table does not exist. Table: {}", name)))
}

/// Implements a get with a full scan of a table. A get of a partitioned table becomes a dynamic scan.
pub struct GetToTableScan {
    pattern: Pattern,
}

impl GetToTableScan {
    pub fn new() -> Self {
        GetToTableScan {
            pattern: Pattern::operator(LogicalOpKind::Get, vec![]),
        }
    }
}

impl Xform for GetToTableScan {
    fn id(&self) -> XformId {
        XformId::GetToTableScan
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn promise(&self, ctx: &XformContext, op: &LogicalOp) -> Promise {
        match op {
            LogicalOp::Get(get) if ctx.hints().allows_scan(&get.alias, ScanMethod::Seq) => Promise::Low,
            _ => Promise::None,
        }
    }

    fn transform(&self, ctx: &XformContext, binding: &Expr) -> Result<Vec<Expr>, OptimizerError> {
        let get = match binding.logical_op() {
            Some(LogicalOp::Get(get)) => get,
            _ => return Ok(Vec::new()),
        };
        let table = get_table(ctx, &get.table)?;
        let scan = PhysicalOp::TableScan(TableScan {
            table: get.table.clone(),
            alias: get.alias.clone(),
            columns: get.columns.clone(),
            scan_id: get.scan_id,
            dynamic: get.partition_column.is_some(),
            distribution: scan_distribution(ctx, &table, &get.columns)?,
        });
        Ok(vec![Expr::physical(scan, vec![])])
    }
}

/// Implements a filter over a get with an index scan when the filter restricts
/// the leading column of an index of the table.
pub struct SelectToIndexScan {
    pattern: Pattern,
}

impl SelectToIndexScan {
    pub fn new() -> Self {
        SelectToIndexScan {
            pattern: select_over_get(),
        }
    }
}

impl Xform for SelectToIndexScan {
    fn id(&self) -> XformId {
        XformId::SelectToIndexScan
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn transform(&self, ctx: &XformContext, binding: &Expr) -> Result<Vec<Expr>, OptimizerError> {
        index_scans(ctx, binding, false)
    }
}

/// Implements a filter over a get of a partitioned table with a dynamic index scan.
/// Partitions the scan reads are selected the same way as partitions of a dynamic table scan.
pub struct SelectToDynamicIndexScan {
    pattern: Pattern,
}

impl SelectToDynamicIndexScan {
    pub fn new() -> Self {
        SelectToDynamicIndexScan {
            pattern: select_over_get(),
        }
    }
}

impl Xform for SelectToDynamicIndexScan {
    fn id(&self) -> XformId {
        XformId::SelectToDynamicIndexScan
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn promise(&self, ctx: &XformContext, op: &LogicalOp) -> Promise {
        match op {
            LogicalOp::Select(_) if !ctx.logical().partition_consumers.is_empty() => Promise::High,
            _ => Promise::None,
        }
    }

    fn transform(&self, ctx: &XformContext, binding: &Expr) -> Result<Vec<Expr>, OptimizerError> {
        index_scans(ctx, binding, true)
    }
}

fn select_over_get() -> Pattern {
    let get = Pattern::operator(LogicalOpKind::Get, vec![]);
    Pattern::operator(LogicalOpKind::Select, vec![get])
}

/// Returns an index scan for every index of the table whose leading column is restricted by the filter.
/// `dynamic` selects gets of partitioned tables, other gets are ignored.
fn index_scans(ctx: &XformContext, binding: &Expr, dynamic: bool) -> Result<Vec<Expr>, OptimizerError> {
    let (filter, get) = match (binding.logical_op(), binding.input(0).and_then(|e| e.logical_op())) {
        (Some(LogicalOp::Select(select)), Some(LogicalOp::Get(get))) => (&select.filter, get),
        _ => return Ok(Vec::new()),
    };
    if get.partition_column.is_some() != dynamic || !ctx.hints().allows_scan(&get.alias, ScanMethod::Index) {
        return Ok(Vec::new());
    }

    let restricted: ColumnSet = filter
        .split_conjunction()
        .iter()
        .filter_map(|c| c.as_column_comparison())
        .filter(|(_, op, value)| *op != BinaryOp::NotEq && !value.is_null())
        .map(|(column, _, _)| column)
        .collect();

    let table = get_table(ctx, &get.table)?;
    let distribution = scan_distribution(ctx, &table, &get.columns)?;
    let mut result = Vec::new();
    for index in ctx.catalog().get_indexes(&get.table) {
        let columns = index_columns(ctx, get, index.columns().iter().map(|c| c.name().as_str()))?;
        match columns.first() {
            Some(leading) if restricted.contains(leading) => {}
            _ => continue,
        }
        let scan = PhysicalOp::IndexScan(IndexScan {
            table: get.table.clone(),
            alias: get.alias.clone(),
            index: index.name().to_string(),
            columns: get.columns.clone(),
            condition: filter.clone(),
            scan_id: get.scan_id,
            dynamic,
            ordering: OrderSpec::new(columns.into_iter().map(OrderingColumn::asc).collect()),
            distribution: distribution.clone(),
        });
        result.push(Expr::physical(scan, vec![]));
    }
    Ok(result)
}

/// Returns the longest prefix of the given index columns that is produced by the given get.
fn index_columns<'a>(
    ctx: &XformContext,
    get: &LogicalGet,
    names: impl Iterator<Item = &'a str>,
) -> Result<Vec<ColumnId>, OptimizerError> {
    let mut columns = Vec::new();
    for name in names {
        match find_column(ctx, &get.columns, name)? {
            Some(id) => columns.push(id),
            None => break,
        }
    }
    Ok(columns)
}

/// Splits equalities of a join condition between columns of the left and the right side into key pairs.
fn join_keys(condition: &ScalarExpr, left: &ColumnSet, right: &ColumnSet) -> (Vec<ColumnId>, Vec<ColumnId>) {
    condition
        .split_conjunction()
        .iter()
        .filter_map(|c| c.as_column_equality())
        .filter_map(|(l, r)| {
            if left.contains(&l) && right.contains(&r) {
                Some((l, r))
            } else if left.contains(&r) && right.contains(&l) {
                Some((r, l))
            } else {
                None
            }
        })
        .unzip()
}

fn join_inputs<'a>(ctx: &XformContext, binding: &'a Expr) -> Result<(&'a Expr, ColumnSet, &'a Expr, ColumnSet), OptimizerError> {
    match binding.inputs() {
        [left, right] => {
            let left_columns = ctx.properties(left)?.output_columns;
            let right_columns = ctx.properties(right)?.output_columns;
            Ok((left, left_columns, right, right_columns))
        }
        inputs => Err(OptimizerError::internal(format!("Join: Unexpected number of inputs: {}", inputs.len()))),
    }
}

/// Implements a join with a hash join. Requires at least one equality between columns of both sides.
///
/// When the build side contains dynamic scans of partitioned tables whose partition key is
/// a join key, the join selects partitions of those scans by values of the probe side.
pub struct JoinToHashJoin {
    pattern: Pattern,
}

impl JoinToHashJoin {
    pub fn new() -> Self {
        JoinToHashJoin {
            pattern: Pattern::operator(LogicalOpKind::Join, leaves(2)),
        }
    }
}

impl Xform for JoinToHashJoin {
    fn id(&self) -> XformId {
        XformId::JoinToHashJoin
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn promise(&self, ctx: &XformContext, _op: &LogicalOp) -> Promise {
        if ctx.hints().allows_join(&ctx.logical().relations, JoinMethod::Hash) {
            Promise::High
        } else {
            Promise::None
        }
    }

    fn transform(&self, ctx: &XformContext, binding: &Expr) -> Result<Vec<Expr>, OptimizerError> {
        let join = match binding.logical_op() {
            Some(LogicalOp::Join(join)) => join,
            _ => return Ok(Vec::new()),
        };
        let (left, left_columns, right, right_columns) = join_inputs(ctx, binding)?;
        let (left_keys, right_keys) = join_keys(&join.condition, &left_columns, &right_columns);
        if left_keys.is_empty() {
            return Ok(Vec::new());
        }

        // Unmatched rows of the build side of a right outer join are part of the output.
        let partition_scans = if join.join_type == JoinType::RightOuter {
            Vec::new()
        } else {
            let partition_consumers = ctx.properties(right)?.partition_consumers;
            partition_consumers
                .iter()
                .filter_map(|(scan, column)| {
                    let position = right_keys.iter().position(|k| k == column)?;
                    Some((*scan, left_keys[position]))
                })
                .collect()
        };

        let hash_join = PhysicalOp::HashJoin(HashJoin {
            join_type: join.join_type,
            condition: join.condition.clone(),
            left_keys,
            right_keys,
            partition_scans,
        });
        Ok(vec![Expr::physical(hash_join, vec![left.clone(), right.clone()])])
    }
}

pub struct JoinToNestedLoopJoin {
    pattern: Pattern,
}

impl JoinToNestedLoopJoin {
    pub fn new() -> Self {
        JoinToNestedLoopJoin {
            pattern: Pattern::operator(LogicalOpKind::Join, leaves(2)),
        }
    }
}

impl Xform for JoinToNestedLoopJoin {
    fn id(&self) -> XformId {
        XformId::JoinToNestedLoopJoin
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn promise(&self, ctx: &XformContext, op: &LogicalOp) -> Promise {
        match op {
            LogicalOp::Join(join)
                if join.join_type != JoinType::RightOuter
                    && ctx.hints().allows_join(&ctx.logical().relations, JoinMethod::NestLoop) =>
            {
                Promise::Low
            }
            _ => Promise::None,
        }
    }

    fn transform(&self, _ctx: &XformContext, binding: &Expr) -> Result<Vec<Expr>, OptimizerError> {
        // The outer input of a nested loop join is the preserved one.
        let join = match binding.logical_op() {
            Some(LogicalOp::Join(join)) if join.join_type != JoinType::RightOuter => join,
            _ => return Ok(Vec::new()),
        };
        let nl_join = PhysicalOp::NestedLoopJoin(NestedLoopJoin {
            join_type: join.join_type,
            condition: join.condition.clone(),
        });
        Ok(vec![Expr::physical(nl_join, binding.inputs().to_vec())])
    }
}

/// Implements an inner join of an expression and a get with an index nested loop join
/// when the join condition has an equality on the leading column of an index of the table.
/// The table is accessed through the index so the get is not an input of the join.
pub struct JoinToIndexNestedLoopJoin {
    pattern: Pattern,
}

impl JoinToIndexNestedLoopJoin {
    pub fn new() -> Self {
        let get = Pattern::operator(LogicalOpKind::Get, vec![]);
        JoinToIndexNestedLoopJoin {
            pattern: Pattern::operator(LogicalOpKind::Join, vec![Pattern::Leaf, get]),
        }
    }
}

impl Xform for JoinToIndexNestedLoopJoin {
    fn id(&self) -> XformId {
        XformId::JoinToIndexNestedLoopJoin
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn promise(&self, ctx: &XformContext, op: &LogicalOp) -> Promise {
        match op {
            LogicalOp::Join(join)
                if join.join_type == JoinType::Inner
                    && ctx.hints().allows_join(&ctx.logical().relations, JoinMethod::NestLoop) =>
            {
                Promise::Low
            }
            _ => Promise::None,
        }
    }

    fn transform(&self, ctx: &XformContext, binding: &Expr) -> Result<Vec<Expr>, OptimizerError> {
        let (join, get) = match (binding.logical_op(), binding.input(1).and_then(|e| e.logical_op())) {
            (Some(LogicalOp::Join(join)), Some(LogicalOp::Get(get))) if join.join_type == JoinType::Inner => (join, get),
            _ => return Ok(Vec::new()),
        };
        if get.partition_column.is_some() || !ctx.hints().allows_scan(&get.alias, ScanMethod::Index) {
            return Ok(Vec::new());
        }
        let (outer, outer_columns, _, inner_columns) = join_inputs(ctx, binding)?;
        let (outer_keys, inner_keys) = join_keys(&join.condition, &outer_columns, &inner_columns);
        if outer_keys.is_empty() {
            return Ok(Vec::new());
        }

        let table = get_table(ctx, &get.table)?;
        let distribution = scan_distribution(ctx, &table, &get.columns)?;
        let mut result = Vec::new();
        for index in ctx.catalog().get_indexes(&get.table) {
            let columns = index_columns(ctx, get, index.columns().iter().map(|c| c.name().as_str()))?;
            match columns.first() {
                Some(leading) if inner_keys.contains(leading) => {}
                _ => continue,
            }
            let index_join = PhysicalOp::IndexNestedLoopJoin(IndexNestedLoopJoin {
                join_type: join.join_type,
                table: get.table.clone(),
                alias: get.alias.clone(),
                index: index.name().to_string(),
                columns: get.columns.clone(),
                condition: join.condition.clone(),
                outer_keys: outer_keys.clone(),
                inner_keys: inner_keys.clone(),
                distribution: distribution.clone(),
            });
            result.push(Expr::physical(index_join, vec![outer.clone()]));
        }
        Ok(result)
    }
}

pub struct UnionAllToAppend {
    pattern: Pattern,
}

impl UnionAllToAppend {
    pub fn new() -> Self {
        UnionAllToAppend {
            pattern: Pattern::any_inputs(LogicalOpKind::UnionAll),
        }
    }
}

impl Xform for UnionAllToAppend {
    fn id(&self) -> XformId {
        XformId::UnionAllToAppend
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn transform(&self, _ctx: &XformContext, binding: &Expr) -> Result<Vec<Expr>, OptimizerError> {
        let union = match binding.logical_op() {
            Some(LogicalOp::UnionAll(union)) => union,
            _ => return Ok(Vec::new()),
        };
        let append = PhysicalOp::Append(Append {
            output: union.output.clone(),
            input_columns: union.input_columns.clone(),
        });
        Ok(vec![Expr::physical(append, binding.inputs().to_vec())])
    }
}

/// Implements a DML operator. The input of a DML operator must be distributed
/// the same way as the target table.
pub struct ImplementDml {
    pattern: Pattern,
}

impl ImplementDml {
    pub fn new() -> Self {
        ImplementDml {
            pattern: Pattern::operator(LogicalOpKind::Dml, leaves(1)),
        }
    }
}

impl Xform for ImplementDml {
    fn id(&self) -> XformId {
        XformId::ImplementDml
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn transform(&self, ctx: &XformContext, binding: &Expr) -> Result<Vec<Expr>, OptimizerError> {
        let dml = match binding.logical_op() {
            Some(LogicalOp::Dml(dml)) => dml,
            _ => return Ok(Vec::new()),
        };
        let table = get_table(ctx, &dml.table)?;
        let distribution = match table.distribution() {
            TableDistribution::Hashed(keys) => {
                // Values of the i-th table column are provided by the i-th input column.
                let columns: Option<Vec<ColumnId>> = keys
                    .iter()
                    .map(|key| table.column_position(key).and_then(|p| dml.columns.get(p).copied()))
                    .collect();
                columns.map(DistributionSpec::Hashed).unwrap_or(DistributionSpec::Random)
            }
            TableDistribution::Random => DistributionSpec::Random,
            TableDistribution::Replicated => DistributionSpec::Replicated,
            TableDistribution::Coordinator => DistributionSpec::StrictSingleton,
        };
        let dml = PhysicalOp::Dml(PhysicalDml {
            kind: dml.kind,
            table: dml.table.clone(),
            columns: dml.columns.clone(),
            distribution,
        });
        Ok(vec![Expr::physical(dml, binding.inputs().to_vec())])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hints::{JoinHint, PlanHints, ScanHint};
    use crate::operators::relational::logical::DmlKind;
    use crate::operators::scalar::{col, int, AggregateExpr, AggregateFunction, ScalarValue};
    use crate::rules::testing::{expect_apply, expect_no_match, RuleTester};
    use crate::testing::{hashed_table, table, TestCatalog};

    #[test]
    fn get_to_table_scan() {
        let catalog = TestCatalog::new();
        catalog.add_table(hashed_table("H", &["h1", "h2"]).partition_by("h2").build().unwrap());

        let expr = catalog.builder().get("A", "a").unwrap().build().unwrap();
        expect_apply(GetToTableScan::new(), &catalog, &expr, &["TableScan A alias=a cols=[1, 2, 3]"]);

        let expr = catalog.builder().get("H", "h").unwrap().build().unwrap();
        let mut tester = RuleTester::new(GetToTableScan::new(), &catalog);
        tester.apply(&expr, &["DynamicTableScan H alias=h cols=[4, 5]"]);
    }

    #[test]
    fn scan_hints() {
        let catalog = TestCatalog::new();
        let expr = catalog.builder().get("A", "a").unwrap().build().unwrap();
        let hints = PlanHints::new().with_scan_hint("a", ScanHint::NoSeqScan);
        let mut tester = RuleTester::new(GetToTableScan::new(), &catalog).with_hints(hints);
        tester.no_match(&expr);
    }

    #[test]
    fn select_to_index_scan() {
        let catalog = TestCatalog::new();
        catalog.add_index("A", "a_a2_idx", &["a2"]);
        catalog.add_index("A", "a_a3_idx", &["a3"]);
        let filter = ScalarExpr::conjunction(vec![ScalarExpr::gt(col(2), int(10)), ScalarExpr::eq(col(1), col(3))]);
        let expr = catalog.builder().get("A", "a").unwrap().select(filter).unwrap().build().unwrap();

        expect_apply(
            SelectToIndexScan::new(),
            &catalog,
            &expr,
            &["IndexScan A index=a_a2_idx cols=[1, 2, 3] cond=col:2 > 10 AND col:1 = col:3"],
        );
    }

    #[test]
    fn select_to_dynamic_index_scan() {
        let catalog = TestCatalog::new();
        catalog.add_table(table("P", &["p1", "p2"]).partition_by("p2").build().unwrap());
        catalog.add_index("P", "p_p1_idx", &["p1"]);
        catalog.add_index("A", "a_a1_idx", &["a1"]);

        let expr = catalog.builder().get("P", "p").unwrap().select(ScalarExpr::gt(col(1), int(10))).unwrap();
        let expr = expr.build().unwrap();
        expect_apply(
            SelectToDynamicIndexScan::new(),
            &catalog,
            &expr,
            &["DynamicIndexScan P index=p_p1_idx cols=[1, 2] cond=col:1 > 10"],
        );
        expect_no_match(SelectToIndexScan::new(), &catalog, &expr);

        // Columns of A are 3, 4 and 5.
        let expr = catalog.builder().get("A", "a").unwrap().select(ScalarExpr::gt(col(3), int(10))).unwrap();
        expect_no_match(SelectToDynamicIndexScan::new(), &catalog, &expr.build().unwrap());
    }

    #[test]
    fn select_without_indexed_columns() {
        let catalog = TestCatalog::new();
        catalog.add_index("A", "a_a2_idx", &["a2"]);
        let expr = catalog.builder().get("A", "a").unwrap().select(ScalarExpr::gt(col(1), int(10))).unwrap();
        expect_no_match(SelectToIndexScan::new(), &catalog, &expr.build().unwrap());
    }

    #[test]
    fn select_and_project() {
        let catalog = TestCatalog::new();
        let expr = catalog
            .builder()
            .get("A", "a")
            .unwrap()
            .select(ScalarExpr::gt(col(1), int(10)))
            .unwrap()
            .build()
            .unwrap();
        expect_apply(select_to_filter(), &catalog, &expr, &["Filter filter=col:1 > 10\n  Group 00"]);

        let expr = catalog.builder().get("A", "a").unwrap().project(vec![col(2), col(1)]).unwrap().build().unwrap();
        expect_apply(
            project_to_compute_scalar(),
            &catalog,
            &expr,
            &["ComputeScalar cols=[2=col:2, 1=col:1]\n  Group 00"],
        );
    }

    #[test]
    fn join_to_hash_join() {
        let catalog = TestCatalog::new();
        let builder = catalog.builder();
        let a = builder.new_builder().get("A", "a").unwrap();
        let b = builder.new_builder().get("B", "b").unwrap();
        let condition = ScalarExpr::conjunction(vec![ScalarExpr::eq(col(4), col(1)), ScalarExpr::gt(col(2), col(5))]);
        let expr = a.join(b, JoinType::Inner, condition).unwrap().build().unwrap();

        let mut tester = RuleTester::new(JoinToHashJoin::new(), &catalog);
        tester.apply(&expr, &["HashJoin type=Inner on=col:4 = col:1 AND col:2 > col:5\n  Group 00\n  Group 01"]);
    }

    #[test]
    fn hash_join_requires_equality() {
        let catalog = TestCatalog::new();
        let builder = catalog.builder();
        let a = builder.new_builder().get("A", "a").unwrap();
        let b = builder.new_builder().get("B", "b").unwrap();
        let expr = a.join(b, JoinType::Inner, ScalarExpr::gt(col(1), col(4))).unwrap().build().unwrap();

        expect_no_match(JoinToHashJoin::new(), &catalog, &expr);
        expect_apply(
            JoinToNestedLoopJoin::new(),
            &catalog,
            &expr,
            &["NestedLoopJoin type=Inner on=col:1 > col:4\n  Group 00\n  Group 01"],
        );
    }

    #[test]
    fn right_outer_join_to_hash_join() {
        let catalog = TestCatalog::new();
        catalog.add_table(table("P", &["p1", "p2"]).partition_by("p2").build().unwrap());
        let builder = catalog.builder();
        let a = builder.new_builder().get("A", "a").unwrap();
        let p = builder.new_builder().get("P", "p").unwrap();
        let expr = a.join(p, JoinType::RightOuter, ScalarExpr::eq(col(1), col(5))).unwrap().build().unwrap();

        // Partitions of the preserved build side can not be eliminated.
        expect_apply(
            JoinToHashJoin::new(),
            &catalog,
            &expr,
            &["HashJoin type=RightOuter on=col:1 = col:5\n  Group 00\n  Group 01"],
        );
        expect_no_match(JoinToNestedLoopJoin::new(), &catalog, &expr);
    }

    #[test]
    fn hash_join_selects_partitions_of_build_side() {
        let catalog = TestCatalog::new();
        catalog.add_table(table("P", &["p1", "p2"]).partition_by("p2").build().unwrap());
        let builder = catalog.builder();
        let a = builder.new_builder().get("A", "a").unwrap();
        let p = builder.new_builder().get("P", "p").unwrap();
        let expr = a.join(p, JoinType::Inner, ScalarExpr::eq(col(1), col(5))).unwrap().build().unwrap();

        expect_apply(
            JoinToHashJoin::new(),
            &catalog,
            &expr,
            &["HashJoin type=Inner on=col:1 = col:5 dpe=[2]\n  Group 00\n  Group 01"],
        );
    }

    #[test]
    fn join_hints() {
        let catalog = TestCatalog::new();
        let builder = catalog.builder();
        let a = builder.new_builder().get("A", "a").unwrap();
        let b = builder.new_builder().get("B", "b").unwrap();
        let expr = a.join(b, JoinType::Inner, ScalarExpr::eq(col(1), col(4))).unwrap().build().unwrap();

        let hints = PlanHints::new().with_join_hint(&["a", "b"], JoinHint::NoHashJoin);
        let mut tester = RuleTester::new(JoinToHashJoin::new(), &catalog).with_hints(hints.clone());
        tester.no_match(&expr);

        let mut tester = RuleTester::new(JoinToNestedLoopJoin::new(), &catalog).with_hints(hints);
        tester.apply(&expr, &["NestedLoopJoin type=Inner on=col:1 = col:4\n  Group 00\n  Group 01"]);
    }

    #[test]
    fn join_to_index_nested_loop_join() {
        let catalog = TestCatalog::new();
        catalog.add_index("B", "b_b2_idx", &["b2"]);
        let builder = catalog.builder();
        let a = builder.new_builder().get("A", "a").unwrap();
        let b = builder.new_builder().get("B", "b").unwrap();
        let expr = a.join(b, JoinType::Inner, ScalarExpr::eq(col(1), col(5))).unwrap().build().unwrap();

        expect_apply(
            JoinToIndexNestedLoopJoin::new(),
            &catalog,
            &expr,
            &["IndexNestedLoopJoin type=Inner table=B index=b_b2_idx on=col:1 = col:5\n  Group 00"],
        );
    }

    #[test]
    fn index_nested_loop_join_requires_indexed_key() {
        let catalog = TestCatalog::new();
        catalog.add_index("B", "b_b2_idx", &["b2"]);
        let builder = catalog.builder();
        let a = builder.new_builder().get("A", "a").unwrap();
        let b = builder.new_builder().get("B", "b").unwrap();
        let expr = a.join(b, JoinType::Inner, ScalarExpr::eq(col(1), col(4))).unwrap().build().unwrap();

        expect_no_match(JoinToIndexNestedLoopJoin::new(), &catalog, &expr);
    }

    #[test]
    fn aggregates() {
        let catalog = TestCatalog::new();
        let count = AggregateExpr::new(AggregateFunction::Count, vec![col(2)], false);
        let expr = catalog.builder().get("A", "a").unwrap().aggregate(vec![1], vec![count]).unwrap().build().unwrap();

        let mut tester = RuleTester::new(aggregate_to_hash_aggregate(), &catalog);
        tester.apply(&expr, &["HashAggregate group_by=[1] aggregates=[4=count(col:2)]\n  Group 00"]);

        let mut tester = RuleTester::new(aggregate_to_stream_aggregate(), &catalog);
        tester.apply(&expr, &["StreamAggregate group_by=[1] aggregates=[4=count(col:2)]\n  Group 00"]);
    }

    #[test]
    fn insert_into_hashed_table() {
        let catalog = TestCatalog::new();
        catalog.add_table(hashed_table("H", &["h1", "h2", "h3"]).build().unwrap());
        let expr = catalog.builder().get("A", "a").unwrap().dml(DmlKind::Insert, "H").unwrap().build().unwrap();

        let mut tester = RuleTester::new(ImplementDml::new(), &catalog);
        tester.apply(&expr, &["Dml Insert table=H\n  Group 00"]);

        let group = tester.memo().group_ids().last().unwrap();
        let dml = tester.memo().group(group).exprs().last().copied().unwrap();
        match tester.memo().expr(dml).physical_op() {
            Some(PhysicalOp::Dml(dml)) => assert_eq!(dml.distribution, DistributionSpec::Hashed(vec![1])),
            op => panic!("Unexpected operator: {:?}", op),
        }
    }

    #[test]
    fn union_values_and_limit() {
        let catalog = TestCatalog::new();
        let builder = catalog.builder();
        let values = builder.new_builder().values(vec![vec![ScalarValue::Int32(1)]]).unwrap();
        let expr = values.clone().build().unwrap();
        expect_apply(values_to_const_table_get(), &catalog, &expr, &["ConstTableGet cols=[1] rows=1"]);

        let a = builder.new_builder().get_columns("A", "a", &["a1"]).unwrap();
        let b = builder.new_builder().get_columns("B", "b", &["b1"]).unwrap();
        let expr = a.union_all(vec![b]).unwrap().build().unwrap();
        expect_apply(UnionAllToAppend::new(), &catalog, &expr, &["Append cols=[4]\n  Group 00\n  Group 01"]);

        let expr = catalog
            .builder()
            .get("A", "a")
            .unwrap()
            .limit(5, Some(10), OrderSpec::none())
            .unwrap()
            .build()
            .unwrap();
        expect_apply(implement_limit(), &catalog, &expr, &["Limit offset=5 count=10\n  Group 00"]);
    }
}
