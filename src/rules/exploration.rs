//! Exploration xforms. An exploration xform produces logical expressions that are equivalent
//! to the matched one: they have the same logical properties and are added to the same memo group.

use crate::datatypes::DataType;
use crate::error::OptimizerError;
use crate::memo::MemoExpr;
use crate::meta::{ColumnId, ColumnMetadata, ColumnSet};
use crate::operators::relational::logical::{
    AggregateStage, LogicalAggregate, LogicalJoin, LogicalLimit, LogicalOp, LogicalOpKind, LogicalProject,
    LogicalSelect,
};
use crate::operators::relational::JoinType;
use crate::operators::scalar::{AggregateExpr, ScalarExpr};
use crate::operators::Expr;
use crate::properties::logical::MaxCardinality;
use crate::properties::ordering::OrderSpec;
use crate::rules::pattern::Pattern;
use crate::rules::{Promise, Xform, XformContext, XformId};

/// Returns all exploration xforms.
pub fn xforms() -> Vec<Box<dyn Xform>> {
    vec![
        Box::new(JoinCommutativity::new()),
        Box::new(JoinAssociativity::new()),
        Box::new(ExpandNAryJoin::new()),
        Box::new(PushSelectIntoJoin::new()),
        Box::new(SemiJoinToInnerJoin::new()),
        Box::new(ApplyToJoin::new()),
        Box::new(SplitAggregate::new()),
        Box::new(LeftJoinToRightJoin::new()),
    ]
}

fn join(join_type: JoinType, condition: ScalarExpr, left: Expr, right: Expr) -> Expr {
    Expr::logical(LogicalOp::Join(LogicalJoin { join_type, condition }), vec![left, right])
}

fn select(filter: ScalarExpr, input: Expr) -> Expr {
    Expr::logical(LogicalOp::Select(LogicalSelect { filter }), vec![input])
}

fn inputs<const N: usize>(binding: &Expr) -> Result<[&Expr; N], OptimizerError> {
    let inputs = binding.inputs();
    if inputs.len() != N {
        let message = format!("Unexpected number of inputs. Expected {} but got {}", N, inputs.len());
        return Err(OptimizerError::internal(message));
    }
    let mut result = [&inputs[0]; N];
    for (i, input) in inputs.iter().enumerate() {
        result[i] = input;
    }
    Ok(result)
}

fn output_columns(ctx: &XformContext, expr: &Expr) -> Result<ColumnSet, OptimizerError> {
    Ok(ctx.properties(expr)?.output_columns)
}

/// Returns the expression of the current group with the given operator.
fn find_expr<'a>(ctx: &'a XformContext, op: &LogicalOp) -> Option<&'a MemoExpr> {
    let memo = ctx.memo();
    memo.group(ctx.group_id()).exprs().iter().map(|e| memo.expr(*e)).find(|e| e.logical_op() == Some(op))
}

fn within_join_order_threshold(ctx: &XformContext) -> bool {
    ctx.logical().relations.len() <= ctx.config().join_order_threshold
}

/// `A ⋈ B` -> `B ⋈ A` for inner joins.
pub struct JoinCommutativity {
    pattern: Pattern,
}

impl JoinCommutativity {
    pub fn new() -> Self {
        JoinCommutativity {
            pattern: Pattern::operator(LogicalOpKind::Join, vec![Pattern::Leaf, Pattern::Leaf]),
        }
    }
}

impl Xform for JoinCommutativity {
    fn id(&self) -> XformId {
        XformId::JoinCommutativity
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn promise(&self, ctx: &XformContext, op: &LogicalOp) -> Promise {
        match op {
            LogicalOp::Join(join) if join.join_type == JoinType::Inner && within_join_order_threshold(ctx) => {
                Promise::Low
            }
            _ => Promise::None,
        }
    }

    fn transform(&self, _ctx: &XformContext, binding: &Expr) -> Result<Vec<Expr>, OptimizerError> {
        let [left, right] = inputs::<2>(binding)?;
        match binding.logical_op() {
            Some(LogicalOp::Join(j)) if j.join_type == JoinType::Inner => {
                Ok(vec![join(JoinType::Inner, j.condition.clone(), right.clone(), left.clone())])
            }
            _ => Ok(Vec::new()),
        }
    }
}

/// `(A ⋈ B) ⋈ C` -> `A ⋈ (B ⋈ C)` for inner joins.
///
/// Conjuncts of both join conditions that reference only columns of `B` and `C` become
/// the condition of the new join. The xform does not introduce cross joins.
pub struct JoinAssociativity {
    pattern: Pattern,
}

impl JoinAssociativity {
    pub fn new() -> Self {
        let inner = Pattern::operator(LogicalOpKind::Join, vec![Pattern::Leaf, Pattern::Leaf]);
        JoinAssociativity {
            pattern: Pattern::operator(LogicalOpKind::Join, vec![inner, Pattern::Leaf]),
        }
    }
}

impl Xform for JoinAssociativity {
    fn id(&self) -> XformId {
        XformId::JoinAssociativity
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn promise(&self, ctx: &XformContext, op: &LogicalOp) -> Promise {
        match op {
            LogicalOp::Join(join) if join.join_type == JoinType::Inner && within_join_order_threshold(ctx) => {
                Promise::Low
            }
            _ => Promise::None,
        }
    }

    fn transform(&self, ctx: &XformContext, binding: &Expr) -> Result<Vec<Expr>, OptimizerError> {
        let (top, bottom) = match (binding.logical_op(), binding.input(0).and_then(|e| e.logical_op())) {
            (Some(LogicalOp::Join(top)), Some(LogicalOp::Join(bottom)))
                if top.join_type == JoinType::Inner && bottom.join_type == JoinType::Inner =>
            {
                (top, bottom)
            }
            _ => return Ok(Vec::new()),
        };
        let [left_join, c] = inputs::<2>(binding)?;
        let [a, b] = inputs::<2>(left_join)?;

        let mut bc_columns = output_columns(ctx, b)?;
        bc_columns.extend(output_columns(ctx, c)?);

        let mut conjuncts = bottom.condition.split_conjunction();
        conjuncts.extend(top.condition.split_conjunction());
        let (lower, upper): (Vec<_>, Vec<_>) = conjuncts.into_iter().partition(|e| e.columns().is_subset(&bc_columns));
        if lower.is_empty() || upper.is_empty() {
            return Ok(Vec::new());
        }

        let bc = join(JoinType::Inner, ScalarExpr::conjunction(lower), b.clone(), c.clone());
        Ok(vec![join(JoinType::Inner, ScalarExpr::conjunction(upper), a.clone(), bc)])
    }
}

/// Expands an n-ary join into a left-deep tree of binary inner joins in the order of its inputs.
/// Every conjunct of the condition is placed at the lowest join that provides all its columns.
pub struct ExpandNAryJoin {
    pattern: Pattern,
}

impl ExpandNAryJoin {
    pub fn new() -> Self {
        ExpandNAryJoin {
            pattern: Pattern::any_inputs(LogicalOpKind::NAryJoin),
        }
    }
}

impl Xform for ExpandNAryJoin {
    fn id(&self) -> XformId {
        XformId::ExpandNAryJoin
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn promise(&self, _ctx: &XformContext, _op: &LogicalOp) -> Promise {
        Promise::High
    }

    fn transform(&self, ctx: &XformContext, binding: &Expr) -> Result<Vec<Expr>, OptimizerError> {
        let condition = match binding.logical_op() {
            Some(LogicalOp::NAryJoin(join)) => &join.condition,
            _ => return Ok(Vec::new()),
        };
        let (first, rest) = match binding.inputs().split_first() {
            Some(inputs) => inputs,
            None => return Ok(Vec::new()),
        };
        let mut remaining = condition.split_conjunction();
        if rest.is_empty() {
            return Ok(vec![select(ScalarExpr::conjunction(remaining), first.clone())]);
        }

        let mut result = first.clone();
        let mut columns = output_columns(ctx, first)?;
        for (i, input) in rest.iter().enumerate() {
            columns.extend(output_columns(ctx, input)?);
            let placed: Vec<ScalarExpr> = if i + 1 == rest.len() {
                // Conjuncts with outer references go to the topmost join.
                std::mem::take(&mut remaining)
            } else {
                let (placed, other): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|e| e.columns().is_subset(&columns));
                remaining = other;
                placed
            };
            result = join(JoinType::Inner, ScalarExpr::conjunction(placed), result, input.clone());
        }
        Ok(vec![result])
    }
}

/// Pushes conjuncts of a filter into the inputs of a join below it.
///
/// For inner joins conjuncts that reference one side are pushed into that side and conjuncts
/// that reference both sides are merged into the join condition. For other join types
/// only conjuncts that reference the left side are pushed.
pub struct PushSelectIntoJoin {
    pattern: Pattern,
}

impl PushSelectIntoJoin {
    pub fn new() -> Self {
        let join = Pattern::operator(LogicalOpKind::Join, vec![Pattern::Tree, Pattern::Tree]);
        PushSelectIntoJoin {
            pattern: Pattern::operator(LogicalOpKind::Select, vec![join]),
        }
    }
}

impl Xform for PushSelectIntoJoin {
    fn id(&self) -> XformId {
        XformId::PushSelectIntoJoin
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn promise(&self, _ctx: &XformContext, op: &LogicalOp) -> Promise {
        match op {
            LogicalOp::Select(select) if !select.filter.is_true() => Promise::High,
            _ => Promise::None,
        }
    }

    fn transform(&self, ctx: &XformContext, binding: &Expr) -> Result<Vec<Expr>, OptimizerError> {
        let filter = match binding.logical_op() {
            Some(LogicalOp::Select(select)) => &select.filter,
            _ => return Ok(Vec::new()),
        };
        let [join_expr] = inputs::<1>(binding)?;
        let join_op = match join_expr.logical_op() {
            Some(LogicalOp::Join(join)) => join,
            _ => return Ok(Vec::new()),
        };
        let [left, right] = inputs::<2>(join_expr)?;
        let left_columns = output_columns(ctx, left)?;
        let right_columns = output_columns(ctx, right)?;
        let both_columns: ColumnSet = left_columns.union(&right_columns).copied().collect();
        let inner = join_op.join_type == JoinType::Inner;
        // Filters over the columns of the preserved side of an outer join can be pushed down.
        let (push_left, push_right) = match join_op.join_type {
            JoinType::Inner => (true, true),
            JoinType::RightOuter => (false, true),
            _ => (true, false),
        };

        let mut left_filter = Vec::new();
        let mut right_filter = Vec::new();
        let mut join_filter = Vec::new();
        let mut remaining = Vec::new();
        for conjunct in filter.split_conjunction() {
            let columns = conjunct.columns();
            if push_left && columns.is_subset(&left_columns) {
                left_filter.push(conjunct);
            } else if push_right && columns.is_subset(&right_columns) {
                right_filter.push(conjunct);
            } else if inner && columns.is_subset(&both_columns) {
                join_filter.push(conjunct);
            } else {
                remaining.push(conjunct);
            }
        }
        if left_filter.is_empty() && right_filter.is_empty() && join_filter.is_empty() {
            return Ok(Vec::new());
        }

        let push = |conjuncts: Vec<ScalarExpr>, input: &Expr| {
            if conjuncts.is_empty() {
                input.clone()
            } else {
                select(ScalarExpr::conjunction(conjuncts), input.clone())
            }
        };
        let mut condition = join_op.condition.split_conjunction();
        condition.extend(join_filter);
        let new_join = join(
            join_op.join_type,
            ScalarExpr::conjunction(condition),
            push(left_filter, left),
            push(right_filter, right),
        );
        Ok(vec![push(remaining, &new_join)])
    }
}

/// Replaces a semi join whose condition references only columns of its left side with
/// an inner join of the left side and at most one row of the right side.
/// A projection on top restores the columns of the semi join.
pub struct SemiJoinToInnerJoin {
    pattern: Pattern,
}

impl SemiJoinToInnerJoin {
    pub fn new() -> Self {
        SemiJoinToInnerJoin {
            pattern: Pattern::operator(LogicalOpKind::Join, vec![Pattern::Leaf, Pattern::Leaf]),
        }
    }
}

impl Xform for SemiJoinToInnerJoin {
    fn id(&self) -> XformId {
        XformId::SemiJoinToInnerJoin
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn promise(&self, ctx: &XformContext, op: &LogicalOp) -> Promise {
        match op {
            LogicalOp::Join(join) if join.join_type == JoinType::LeftSemi => {
                // Columns of a semi join are the columns of its left side.
                let props = ctx.logical();
                let outer_only = join
                    .condition
                    .columns()
                    .iter()
                    .all(|c| props.output_columns.contains(c) || props.outer_refs.contains(c));
                if outer_only {
                    Promise::High
                } else {
                    Promise::None
                }
            }
            _ => Promise::None,
        }
    }

    fn transform(&self, ctx: &XformContext, binding: &Expr) -> Result<Vec<Expr>, OptimizerError> {
        let condition = match binding.logical_op() {
            Some(LogicalOp::Join(join)) if join.join_type == JoinType::LeftSemi => &join.condition,
            _ => return Ok(Vec::new()),
        };
        let [left, right] = inputs::<2>(binding)?;
        if ctx.properties(right)?.max_cardinality == MaxCardinality::Bounded(0) {
            return Ok(Vec::new());
        }

        let limit = LogicalOp::Limit(LogicalLimit {
            offset: 0,
            count: Some(1),
            ordering: OrderSpec::none(),
        });
        let one_row = Expr::logical(limit, vec![right.clone()]);
        let inner = join(JoinType::Inner, condition.clone(), left.clone(), one_row);

        let columns: Vec<ColumnId> = output_columns(ctx, left)?.into_iter().collect();
        let project = LogicalOp::Project(LogicalProject::columns(&columns));
        Ok(vec![Expr::logical(project, vec![inner])])
    }
}

/// Replaces an apply whose right side does not reference columns of its left side with a join.
pub struct ApplyToJoin {
    pattern: Pattern,
}

impl ApplyToJoin {
    pub fn new() -> Self {
        ApplyToJoin {
            pattern: Pattern::operator(LogicalOpKind::Apply, vec![Pattern::Leaf, Pattern::Leaf]),
        }
    }
}

impl Xform for ApplyToJoin {
    fn id(&self) -> XformId {
        XformId::ApplyToJoin
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn promise(&self, ctx: &XformContext, op: &LogicalOp) -> Promise {
        let expr = match find_expr(ctx, op) {
            Some(expr) if expr.inputs().len() == 2 => expr,
            _ => return Promise::None,
        };
        let memo = ctx.memo();
        let left = memo.group(expr.inputs()[0]).logical();
        let right = memo.group(expr.inputs()[1]).logical();
        if right.outer_refs.is_disjoint(&left.output_columns) {
            Promise::High
        } else {
            Promise::None
        }
    }

    fn transform(&self, ctx: &XformContext, binding: &Expr) -> Result<Vec<Expr>, OptimizerError> {
        let apply = match binding.logical_op() {
            Some(LogicalOp::Apply(apply)) => apply,
            _ => return Ok(Vec::new()),
        };
        let [left, right] = inputs::<2>(binding)?;
        let left_columns = output_columns(ctx, left)?;
        if !ctx.properties(right)?.outer_refs.is_disjoint(&left_columns) {
            return Ok(Vec::new());
        }
        Ok(vec![join(apply.apply_type.join_type(), apply.condition.clone(), left.clone(), right.clone())])
    }
}

/// Splits a single-stage aggregate into a local aggregate that computes partial results
/// and a global aggregate that combines them.
pub struct SplitAggregate {
    pattern: Pattern,
}

impl SplitAggregate {
    pub fn new() -> Self {
        SplitAggregate {
            pattern: Pattern::operator(LogicalOpKind::Aggregate, vec![Pattern::Leaf]),
        }
    }

    fn is_splittable(aggregate: &LogicalAggregate) -> bool {
        aggregate.stage == AggregateStage::Single
            && !aggregate.aggregates.is_empty()
            && aggregate.aggregates.iter().all(|(_, a)| {
                a.is_splittable() && a.args.len() <= 1 && a.args.iter().all(|arg| matches!(arg, ScalarExpr::Column(_)))
            })
    }
}

impl Xform for SplitAggregate {
    fn id(&self) -> XformId {
        XformId::SplitAggregate
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn promise(&self, _ctx: &XformContext, op: &LogicalOp) -> Promise {
        match op {
            LogicalOp::Aggregate(aggregate) if Self::is_splittable(aggregate) => Promise::Low,
            _ => Promise::None,
        }
    }

    fn transform(&self, ctx: &XformContext, binding: &Expr) -> Result<Vec<Expr>, OptimizerError> {
        let aggregate = match binding.logical_op() {
            Some(LogicalOp::Aggregate(aggregate)) if Self::is_splittable(aggregate) => aggregate,
            _ => return Ok(Vec::new()),
        };
        let [input] = inputs::<1>(binding)?;

        let metadata = ctx.metadata();
        let mut local = Vec::with_capacity(aggregate.aggregates.len());
        let mut global = Vec::with_capacity(aggregate.aggregates.len());
        for (id, aggr) in aggregate.aggregates.iter() {
            let global_func = match aggr.func.global_function() {
                Some(func) => func,
                _ => return Ok(Vec::new()),
            };
            let arg_type = match aggr.args.first() {
                Some(ScalarExpr::Column(column)) => metadata.get_column(*column)?.data_type(),
                Some(_) => return Ok(Vec::new()),
                None => DataType::Int64,
            };
            let name = format!("partial_{}", aggr.func);
            let partial = metadata.add_column(ColumnMetadata::new_synthetic_column(name, aggr.func.return_type(arg_type)));

            local.push((partial, aggr.clone()));
            global.push((*id, AggregateExpr::new(global_func, vec![ScalarExpr::Column(partial)], false)));
        }

        let local = LogicalOp::Aggregate(LogicalAggregate {
            group_by: aggregate.group_by.clone(),
            aggregates: local,
            stage: AggregateStage::Local,
        });
        let global = LogicalOp::Aggregate(LogicalAggregate {
            group_by: aggregate.group_by.clone(),
            aggregates: global,
            stage: AggregateStage::Global,
        });
        Ok(vec![Expr::logical(global, vec![Expr::logical(local, vec![input.clone()])])])
    }
}

/// `A ⟕ B` -> `B ⟖ A`. Lets the optimizer build the hash table of an outer join on its preserved side.
pub struct LeftJoinToRightJoin {
    pattern: Pattern,
}

impl LeftJoinToRightJoin {
    pub fn new() -> Self {
        LeftJoinToRightJoin {
            pattern: Pattern::operator(LogicalOpKind::Join, vec![Pattern::Leaf, Pattern::Leaf]),
        }
    }
}

impl Xform for LeftJoinToRightJoin {
    fn id(&self) -> XformId {
        XformId::LeftJoinToRightJoin
    }

    fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    fn promise(&self, _ctx: &XformContext, op: &LogicalOp) -> Promise {
        match op {
            LogicalOp::Join(join) if join.join_type == JoinType::LeftOuter => Promise::Low,
            _ => Promise::None,
        }
    }

    fn transform(&self, _ctx: &XformContext, binding: &Expr) -> Result<Vec<Expr>, OptimizerError> {
        let [left, right] = inputs::<2>(binding)?;
        match binding.logical_op() {
            Some(LogicalOp::Join(j)) if j.join_type == JoinType::LeftOuter => {
                Ok(vec![join(JoinType::RightOuter, j.condition.clone(), right.clone(), left.clone())])
            }
            _ => Ok(Vec::new()),
        }
    }
}
