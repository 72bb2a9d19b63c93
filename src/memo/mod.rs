//! `Memo` is the primary data structure used by the cost-based optimizer:
//!  * It stores each expression as a group of logically equivalent expressions.
//!  * It provides memoization of identical subexpressions within an expression tree.
//!  * It stores the best known way (a [cost context](CostContext)) to satisfy each required set of
//!    physical properties for every group.
//!
//! Groups and group expressions live in index-stable arrays and refer to each other by identifiers.
//! Inputs of a group expression are always identifiers of memo groups. That is why two expressions
//! are duplicates when they have equal operators and equal input groups. When an xform proves that
//! two groups are equivalent the memo merges them and rewrites every expression that referred to
//! the dissolved group.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::{Debug, Display, Formatter, Write};
use std::rc::Rc;

use itertools::Itertools;

use crate::cost::Cost;
use crate::error::{OptimizerError, ResourceKind};
use crate::hints::HintRank;
use crate::operators::relational::logical::LogicalOp;
use crate::operators::relational::physical::PhysicalOp;
use crate::operators::relational::CteId;
use crate::operators::{Expr, ExprNode, Operator};
use crate::properties::logical::LogicalProperties;
use crate::properties::physical::{DerivedProperties, RequiredProperties};
use crate::properties::{InputProperties, PropertiesProvider};
use crate::rules::{XformId, XformSet};
use crate::statistics::Statistics;

#[cfg(test)]
pub mod testing;

/// The maximum depth of an expression tree that can be copied into a memo.
pub const MAX_EXPR_DEPTH: usize = 256;

/// Uniquely identifies a memo group in a memo.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub(crate) usize);

impl GroupId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl Display for GroupId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

impl Debug for GroupId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GroupId({})", self.0)
    }
}

/// Uniquely identifies a memo expression in a memo.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ExprId(usize);

impl ExprId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl Display for ExprId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

impl Debug for ExprId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExprId({})", self.0)
    }
}

/// Uniquely identifies a cost context in a memo.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct CostContextId(usize);

impl Display for CostContextId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx:{}", self.0)
    }
}

impl Debug for CostContextId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CostContextId({})", self.0)
    }
}

/// A group of logically equivalent expressions.
#[derive(Debug)]
pub struct MemoGroup {
    id: GroupId,
    exprs: Vec<ExprId>,
    logical: LogicalProperties,
    statistics: Statistics,
    merged_into: Option<GroupId>,
    explored: bool,
    implemented: bool,
    optimized: HashSet<RequiredProperties>,
    winners: HashMap<RequiredProperties, CostContextId>,
}

impl MemoGroup {
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Expressions of this group in the order they were added.
    pub fn exprs(&self) -> &[ExprId] {
        &self.exprs
    }

    pub fn logical(&self) -> &LogicalProperties {
        &self.logical
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn is_explored(&self) -> bool {
        self.explored
    }

    pub fn is_implemented(&self) -> bool {
        self.implemented
    }

    /// Whether this group has been optimized under the given required properties.
    pub fn is_optimized(&self, required: &RequiredProperties) -> bool {
        self.optimized.contains(required)
    }
}

/// An operator applied to memo groups.
#[derive(Debug)]
pub struct MemoExpr {
    id: ExprId,
    group: GroupId,
    operator: Operator,
    inputs: Vec<GroupId>,
    applied: XformSet,
    explored: bool,
    implemented: bool,
    optimized: HashSet<RequiredProperties>,
    removed: bool,
}

impl MemoExpr {
    pub fn id(&self) -> ExprId {
        self.id
    }

    /// The group this expression belonged to when it was added. Use [Memo::find] to get the current group.
    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    pub fn logical_op(&self) -> Option<&LogicalOp> {
        self.operator.as_logical()
    }

    pub fn physical_op(&self) -> Option<&PhysicalOp> {
        self.operator.as_physical()
    }

    pub fn inputs(&self) -> &[GroupId] {
        &self.inputs
    }

    /// Xforms that have already been applied to this expression.
    pub fn applied(&self) -> &XformSet {
        &self.applied
    }

    pub fn is_explored(&self) -> bool {
        self.explored
    }

    pub fn is_implemented(&self) -> bool {
        self.implemented
    }

    pub fn is_optimized(&self, required: &RequiredProperties) -> bool {
        self.optimized.contains(required)
    }

    /// Builds an expression whose inputs are references to the input groups of this expression.
    pub fn to_expr(&self) -> Expr {
        Expr::new(self.operator.clone(), self.inputs.iter().map(|g| Expr::group(*g)).collect())
    }
}

/// The result of an optimization of a physical group expression under required physical properties:
/// the expression, the cost contexts chosen for its inputs and the enforcers placed above it.
#[derive(Debug, Clone)]
pub struct CostContext {
    pub expr: ExprId,
    pub required: RequiredProperties,
    /// The optimization request of the expression's operator this context was produced by.
    pub request: usize,
    pub inputs: Vec<CostContextId>,
    /// Properties provided by the expression itself.
    pub expr_derived: DerivedProperties,
    /// The cost of the expression including its inputs but without enforcers.
    pub expr_cost: Cost,
    /// Enforcers in the order they are applied (the first one consumes the output of the expression).
    pub enforcers: Vec<Enforcer>,
    /// Properties provided by the topmost operator (an enforcer or the expression itself).
    pub derived: DerivedProperties,
    /// The total cost including inputs and enforcers.
    pub cost: Cost,
    /// The preference mandated by plan hints.
    pub rank: HintRank,
}

impl CostContext {
    /// Returns `true` if this context must replace the given winner.
    /// A context with a higher rank always wins, otherwise the context must be strictly cheaper.
    pub fn is_better_than(&self, other: &CostContext) -> bool {
        match self.rank.cmp(&other.rank) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.cost < other.cost,
        }
    }
}

/// An enforcer placed above an expression together with the properties it provides
/// and the total cost of the plan up to and including that enforcer.
#[derive(Debug, Clone)]
pub struct Enforcer {
    pub op: PhysicalOp,
    pub derived: DerivedProperties,
    pub cost: Cost,
}

#[derive(Debug)]
struct CostContextSlot {
    context: Option<CostContext>,
    refs: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ExprKey {
    operator: Operator,
    inputs: Vec<GroupId>,
}

/// The result of [Memo::insert_into].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertResult {
    /// The group the expression belongs to.
    pub group: GroupId,
    /// The identifier of the new expression or `None` if the memo already contained that expression.
    pub expr: Option<ExprId>,
}

/// Marks the state of a memo before an insertion so the insertion can be undone.
#[derive(Debug, Clone, Copy)]
struct Mark {
    groups: usize,
    exprs: usize,
}

pub struct Memo {
    groups: Vec<MemoGroup>,
    exprs: Vec<MemoExpr>,
    index: HashMap<ExprKey, ExprId>,
    contexts: Vec<CostContextSlot>,
    cte_producers: HashMap<CteId, GroupId>,
    new_ctes: Vec<CteId>,
    pending_merges: Vec<(GroupId, GroupId)>,
    properties: Rc<dyn PropertiesProvider>,
    verify_logical_properties: bool,
    limit: usize,
    num_pruned: usize,
}

impl Memo {
    /// Creates a new memo. Logical properties and statistics of new groups are built by the given provider.
    pub fn new(properties: Rc<dyn PropertiesProvider>) -> Self {
        Memo {
            groups: Vec::new(),
            exprs: Vec::new(),
            index: HashMap::new(),
            contexts: Vec::new(),
            cte_producers: HashMap::new(),
            new_ctes: Vec::new(),
            pending_merges: Vec::new(),
            properties,
            verify_logical_properties: false,
            limit: usize::MAX,
            num_pruned: 0,
        }
    }

    /// Sets the maximum number of expressions this memo can hold.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Enables re-derivation of logical properties of every new logical expression added to an existing group.
    pub fn with_verification(mut self, value: bool) -> Self {
        self.verify_logical_properties = value;
        self
    }

    /// Copies the given expression into this memo. If this memo does not contain the given expression
    /// a new group is created. Otherwise returns the group of the existing expression.
    ///
    /// Either the whole expression is added or the memo is left unchanged.
    pub fn insert(&mut self, expr: &Expr) -> Result<GroupId, OptimizerError> {
        let result = self.atomic_insert(expr, None)?;
        Ok(self.find(result.group))
    }

    /// Copies the given expression into the given group. Inputs of the expression that are not group
    /// references are copied into new groups (or deduplicated).
    ///
    /// If an identical expression already belongs to another group the groups are merged.
    /// If the expression is a reference to another group the groups are merged as well.
    pub fn insert_into(&mut self, group: GroupId, expr: &Expr) -> Result<InsertResult, OptimizerError> {
        let group = self.find(group);
        let result = self.atomic_insert(expr, Some(group))?;
        Ok(InsertResult {
            group: self.find(result.group),
            expr: result.expr,
        })
    }

    fn atomic_insert(&mut self, expr: &Expr, target: Option<GroupId>) -> Result<InsertResult, OptimizerError> {
        let mark = Mark {
            groups: self.groups.len(),
            exprs: self.exprs.len(),
        };
        self.new_ctes.clear();
        self.pending_merges.clear();

        match self.copy_in(expr, target, 0) {
            Ok(result) => {
                let merges = std::mem::take(&mut self.pending_merges);
                if let Err(err) = self.check_merges(&merges) {
                    self.rollback(mark);
                    return Err(err);
                }
                self.new_ctes.clear();
                for (l, r) in merges {
                    self.merge_groups(l, r)?;
                }
                Ok(result)
            }
            Err(err) => {
                self.rollback(mark);
                Err(err)
            }
        }
    }

    fn rollback(&mut self, mark: Mark) {
        self.groups.truncate(mark.groups);
        self.exprs.truncate(mark.exprs);
        self.index.retain(|_, e| e.0 < mark.exprs);
        for group in self.groups.iter_mut() {
            group.exprs.retain(|e| e.0 < mark.exprs);
        }
        for cte_id in std::mem::take(&mut self.new_ctes) {
            self.cte_producers.remove(&cte_id);
        }
        self.pending_merges.clear();
    }

    fn copy_in(&mut self, expr: &Expr, target: Option<GroupId>, depth: usize) -> Result<InsertResult, OptimizerError> {
        if depth > MAX_EXPR_DEPTH {
            let message = format!("Expression tree is too deep. Max depth: {}", MAX_EXPR_DEPTH);
            return Err(OptimizerError::internal(message));
        }

        let (operator, inputs) = match expr.node() {
            ExprNode::Group(group) => {
                let group = self.checked_group(*group)?;
                if let Some(target) = target {
                    if target != group {
                        self.pending_merges.push((target, group));
                    }
                }
                return Ok(InsertResult { group, expr: None });
            }
            ExprNode::Operator { operator, inputs } => (operator, inputs),
        };

        if let Some(arity) = operator.arity() {
            if arity != inputs.len() {
                let message =
                    format!("{}: Expected {} inputs but got {}", operator_name(operator), arity, inputs.len());
                return Err(OptimizerError::argument(message));
            }
        }

        let input_groups = match operator {
            Operator::Physical(_) => {
                if target.is_none() {
                    let message = format!("{}: A physical expression must be added to an existing group", operator);
                    return Err(OptimizerError::internal(message));
                }
                let groups: Option<Vec<_>> = inputs.iter().map(|i| i.as_group()).collect();
                match groups {
                    Some(groups) => groups.into_iter().map(|g| self.checked_group(g)).collect::<Result<Vec<_>, _>>()?,
                    None => {
                        let message = format!("{}: Inputs of a physical expression must be memo groups", operator);
                        return Err(OptimizerError::internal(message));
                    }
                }
            }
            Operator::Logical(LogicalOp::CteAnchor(anchor)) => {
                let producer = self.copy_in(&inputs[0], None, depth + 1)?.group;
                if !self.cte_producers.contains_key(&anchor.cte_id) {
                    self.cte_producers.insert(anchor.cte_id, producer);
                    self.new_ctes.push(anchor.cte_id);
                }
                let body = self.copy_in(&inputs[1], None, depth + 1)?.group;
                vec![producer, body]
            }
            Operator::Logical(_) => {
                let mut groups = Vec::with_capacity(inputs.len());
                for input in inputs {
                    groups.push(self.copy_in(input, None, depth + 1)?.group);
                }
                groups
            }
        };

        let key = ExprKey {
            operator: operator.clone(),
            inputs: input_groups,
        };

        if let Some(existing) = self.index.get(&key) {
            let group = self.find(self.exprs[existing.0].group);
            if let Some(target) = target {
                if target != group {
                    self.pending_merges.push((target, group));
                }
            }
            return Ok(InsertResult { group, expr: None });
        }

        if self.exprs.len() >= self.limit {
            let message = format!("The number of memo expressions exceeds the limit: {}", self.limit);
            return Err(OptimizerError::resource(ResourceKind::MemoLimit, message));
        }

        let group = match (target, operator) {
            (Some(target), Operator::Logical(op)) => {
                if self.verify_logical_properties {
                    self.verify_properties(target, op, &key.inputs)?;
                }
                target
            }
            (Some(target), Operator::Physical(_)) => target,
            (None, Operator::Logical(op)) => {
                let (logical, statistics) = self.build_properties(op, &key.inputs)?;
                self.add_group(logical, statistics)
            }
            (None, Operator::Physical(op)) => {
                return Err(OptimizerError::internal(format!("{}: Physical expression without a group", op)));
            }
        };

        let expr_id = ExprId(self.exprs.len());
        self.exprs.push(MemoExpr {
            id: expr_id,
            group,
            operator: key.operator.clone(),
            inputs: key.inputs.clone(),
            applied: XformSet::empty(),
            explored: false,
            implemented: false,
            optimized: HashSet::new(),
            removed: false,
        });
        self.groups[group.0].exprs.push(expr_id);
        self.index.insert(key, expr_id);

        Ok(InsertResult {
            group,
            expr: Some(expr_id),
        })
    }

    fn add_group(&mut self, logical: LogicalProperties, statistics: Statistics) -> GroupId {
        let id = GroupId(self.groups.len());
        self.groups.push(MemoGroup {
            id,
            exprs: Vec::new(),
            logical,
            statistics,
            merged_into: None,
            explored: false,
            implemented: false,
            optimized: HashSet::new(),
            winners: HashMap::new(),
        });
        id
    }

    fn cte_producer(&self, op: &LogicalOp) -> Option<GroupId> {
        match op {
            LogicalOp::CteConsumer(consumer) => self.cte_producers.get(&consumer.cte_id).map(|g| self.find(*g)),
            _ => None,
        }
    }

    fn build_properties(
        &self,
        op: &LogicalOp,
        inputs: &[GroupId],
    ) -> Result<(LogicalProperties, Statistics), OptimizerError> {
        let input_props: Vec<_> = inputs
            .iter()
            .map(|g| {
                let group = self.group(*g);
                InputProperties {
                    logical: &group.logical,
                    statistics: &group.statistics,
                }
            })
            .collect();
        let producer = self.cte_producer(op).map(|g| {
            let group = self.group(g);
            InputProperties {
                logical: &group.logical,
                statistics: &group.statistics,
            }
        });
        self.properties.build_properties(op, &input_props, producer)
    }

    fn verify_properties(&self, group: GroupId, op: &LogicalOp, inputs: &[GroupId]) -> Result<(), OptimizerError> {
        let input_props: Vec<_> = inputs.iter().map(|g| &self.group(*g).logical).collect();
        let producer = self.cte_producer(op).map(|g| &self.group(g).logical);
        let logical = self.properties.build_logical_properties(op, &input_props, producer)?;
        let expected = &self.group(group).logical;
        if &logical != expected {
            let message = format!(
                "Logical properties of {} differ from logical properties of group {}: {} != {}",
                op,
                group,
                logical,
                expected
            );
            return Err(OptimizerError::internal(message));
        }
        Ok(())
    }

    /// Derives logical properties of the given expression. Properties of a reference to a group are
    /// the properties of that group.
    pub fn derive_logical_properties(&self, expr: &Expr) -> Result<LogicalProperties, OptimizerError> {
        match expr.node() {
            ExprNode::Group(group) => Ok(self.group(self.checked_group(*group)?).logical.clone()),
            ExprNode::Operator {
                operator: Operator::Logical(op),
                inputs,
            } => {
                let inputs = inputs.iter().map(|i| self.derive_logical_properties(i)).collect::<Result<Vec<_>, _>>()?;
                let inputs: Vec<_> = inputs.iter().collect();
                let producer = self.cte_producer(op).map(|g| &self.group(g).logical);
                self.properties.build_logical_properties(op, &inputs, producer)
            }
            ExprNode::Operator {
                operator: Operator::Physical(op),
                ..
            } => Err(OptimizerError::argument(format!("{}: Can not derive logical properties", op))),
        }
    }

    fn checked_group(&self, group: GroupId) -> Result<GroupId, OptimizerError> {
        if group.0 < self.groups.len() {
            Ok(self.find(group))
        } else {
            Err(OptimizerError::internal(format!("Unknown group: {}", group)))
        }
    }

    /// Returns the identifier of the group the given group has been merged into
    /// or the given identifier if that group has not been merged.
    pub fn find(&self, group: GroupId) -> GroupId {
        let mut current = group;
        while let Some(next) = self.groups.get(current.0).and_then(|g| g.merged_into) {
            current = next;
        }
        current
    }

    /// Returns the group with the given identifier (or the group it has been merged into).
    ///
    /// # Panics
    ///
    /// Panics if this memo does not contain the given group.
    pub fn group(&self, group: GroupId) -> &MemoGroup {
        &self.groups[self.find(group).0]
    }

    /// Returns the expression with the given identifier.
    ///
    /// # Panics
    ///
    /// Panics if this memo does not contain the given expression.
    pub fn expr(&self, expr: ExprId) -> &MemoExpr {
        &self.exprs[expr.0]
    }

    /// Returns the current group of the given expression.
    pub fn expr_group(&self, expr: ExprId) -> GroupId {
        self.find(self.exprs[expr.0].group)
    }

    /// Identifiers of all groups that have not been merged into other groups.
    pub fn group_ids(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.groups.iter().filter(|g| g.merged_into.is_none()).map(|g| g.id)
    }

    /// The number of groups that have not been merged into other groups.
    pub fn num_groups(&self) -> usize {
        self.group_ids().count()
    }

    /// The number of expressions including the expressions removed as duplicates by group merges.
    pub fn num_exprs(&self) -> usize {
        self.exprs.len()
    }

    /// The number of cost contexts that were discarded because cheaper alternatives were found.
    pub fn num_pruned(&self) -> usize {
        self.num_pruned
    }

    /// Returns the producer group of the given common table expression.
    pub fn cte_producer_group(&self, cte_id: CteId) -> Option<GroupId> {
        self.cte_producers.get(&cte_id).map(|g| self.find(*g))
    }

    /// Marks the given xform as applied to the given expression.
    /// Returns `false` if that xform has already been applied.
    pub fn mark_applied(&mut self, expr: ExprId, xform: XformId) -> bool {
        self.exprs[expr.0].applied.insert(xform)
    }

    pub fn mark_expr_explored(&mut self, expr: ExprId) {
        self.exprs[expr.0].explored = true;
    }

    pub fn mark_expr_implemented(&mut self, expr: ExprId) {
        self.exprs[expr.0].implemented = true;
    }

    pub fn mark_expr_optimized(&mut self, expr: ExprId, required: &RequiredProperties) {
        self.exprs[expr.0].optimized.insert(required.clone());
    }

    pub fn mark_group_explored(&mut self, group: GroupId) {
        let group = self.find(group);
        self.groups[group.0].explored = true;
    }

    pub fn mark_group_implemented(&mut self, group: GroupId) {
        let group = self.find(group);
        self.groups[group.0].implemented = true;
    }

    pub fn mark_group_optimized(&mut self, group: GroupId, required: &RequiredProperties) {
        let group = self.find(group);
        self.groups[group.0].optimized.insert(required.clone());
    }

    /// Clears the exploration, implementation and optimization state of every group and expression,
    /// so the next search stage visits them again. Applied xforms and winners are retained.
    pub fn reset_search_state(&mut self) {
        for group in self.groups.iter_mut() {
            group.explored = false;
            group.implemented = false;
            group.optimized.clear();
        }
        for expr in self.exprs.iter_mut() {
            expr.explored = false;
            expr.implemented = false;
            expr.optimized.clear();
        }
    }

    /// Returns the best known cost context of the given group under the given required properties.
    pub fn winner(&self, group: GroupId, required: &RequiredProperties) -> Option<(CostContextId, &CostContext)> {
        let id = *self.group(group).winners.get(required)?;
        let context = self.contexts.get(id.0).and_then(|s| s.context.as_ref())?;
        Some((id, context))
    }

    /// Returns the cost context with the given identifier.
    /// Returns an internal error if this context has been pruned.
    pub fn cost_context(&self, id: CostContextId) -> Result<&CostContext, OptimizerError> {
        match self.contexts.get(id.0) {
            Some(CostContextSlot {
                context: Some(context), ..
            }) => Ok(context),
            Some(_) => Err(OptimizerError::internal(format!("Cost context {} has been pruned", id))),
            None => Err(OptimizerError::internal(format!("Unknown cost context: {}", id))),
        }
    }

    /// Installs the given cost context as the winner of its group under its required properties
    /// if that context is better than the current winner (see [CostContext::is_better_than]).
    /// Returns the identifier of the installed context or `None` if the context has been discarded.
    ///
    /// The memo is not modified when this method returns an error.
    pub fn add_cost_context(&mut self, context: CostContext) -> Result<Option<CostContextId>, OptimizerError> {
        if context.expr.0 >= self.exprs.len() {
            return Err(OptimizerError::internal(format!("Unknown expression: {}", context.expr)));
        }
        let expr = &self.exprs[context.expr.0];
        if expr.inputs.len() != context.inputs.len() {
            let message = format!(
                "Cost context of expression {} has {} inputs but the expression has {} inputs",
                context.expr,
                context.inputs.len(),
                expr.inputs.len()
            );
            return Err(OptimizerError::internal(message));
        }
        for input in context.inputs.iter() {
            self.cost_context(*input)?;
        }

        let group = self.find(expr.group);
        if let Some((_, winner)) = self.winner(group, &context.required) {
            if !context.is_better_than(winner) {
                self.num_pruned += 1;
                return Ok(None);
            }
        }

        let id = CostContextId(self.contexts.len());
        for input in context.inputs.iter() {
            self.contexts[input.0].refs += 1;
        }
        log::debug!(
            "New winner: group {} {} expr {} cost {} rank {}",
            group,
            context.required,
            context.expr,
            context.cost,
            context.rank
        );
        let required = context.required.clone();
        self.contexts.push(CostContextSlot {
            context: Some(context),
            refs: 1,
        });

        if let Some(previous) = self.groups[group.0].winners.insert(required, id) {
            self.release(previous);
        }
        Ok(Some(id))
    }

    /// Prevents the given cost context from being pruned until [unpin](Self::unpin) is called.
    pub fn pin(&mut self, id: CostContextId) -> Result<(), OptimizerError> {
        self.cost_context(id)?;
        self.contexts[id.0].refs += 1;
        Ok(())
    }

    /// Releases a context pinned by [pin](Self::pin).
    pub fn unpin(&mut self, id: CostContextId) {
        self.release(id);
    }

    fn release(&mut self, id: CostContextId) {
        let mut queue = vec![id];
        while let Some(id) = queue.pop() {
            let slot = match self.contexts.get_mut(id.0) {
                Some(slot) if slot.refs > 0 => slot,
                _ => continue,
            };
            slot.refs -= 1;
            if slot.refs == 0 {
                if let Some(context) = slot.context.take() {
                    self.num_pruned += 1;
                    queue.extend(context.inputs);
                }
            }
        }
    }

    fn check_equivalent(&self, l: GroupId, r: GroupId) -> Result<(), OptimizerError> {
        let (left, right) = (&self.groups[l.0].logical, &self.groups[r.0].logical);
        if left != right {
            let message = format!(
                "Groups {} and {} are equivalent but have different logical properties: {} != {}",
                l, r, left, right
            );
            return Err(OptimizerError::internal(message));
        }
        Ok(())
    }

    /// Computes the closure of the given merges without modifying this memo and checks that
    /// every pair of groups it merges have identical logical properties.
    /// Once this check passes [merge_groups](Self::merge_groups) can not fail.
    fn check_merges(&self, merges: &[(GroupId, GroupId)]) -> Result<(), OptimizerError> {
        let mut merged: HashMap<GroupId, GroupId> = HashMap::new();
        let mut queue: VecDeque<_> = merges.iter().copied().collect();

        while !queue.is_empty() {
            while let Some((l, r)) = queue.pop_front() {
                let (l, r) = (self.resolve(&merged, l), self.resolve(&merged, r));
                if l == r {
                    continue;
                }
                self.check_equivalent(l, r)?;
                let (survivor, dissolved) = if l < r { (l, r) } else { (r, l) };
                merged.insert(dissolved, survivor);
            }

            // Expressions that reference merged groups may become duplicates of other expressions.
            let mut rewritten: HashMap<ExprKey, GroupId> = HashMap::new();
            for expr in self.exprs.iter().filter(|e| !e.removed) {
                if !expr.inputs.iter().any(|g| merged.contains_key(&self.find(*g))) {
                    continue;
                }
                let group = self.resolve(&merged, expr.group);
                let key = ExprKey {
                    operator: expr.operator.clone(),
                    inputs: expr.inputs.iter().map(|g| self.resolve(&merged, *g)).collect(),
                };
                let duplicate = match self.index.get(&key) {
                    Some(existing) if *existing != expr.id => Some(self.resolve(&merged, self.exprs[existing.0].group)),
                    _ => rewritten.get(&key).map(|g| self.resolve(&merged, *g)),
                };
                match duplicate {
                    Some(other) if other != group => queue.push_back((group, other)),
                    _ => {
                        rewritten.insert(key, group);
                    }
                }
            }
        }
        Ok(())
    }

    fn resolve(&self, merged: &HashMap<GroupId, GroupId>, group: GroupId) -> GroupId {
        let mut current = self.find(group);
        while let Some(next) = merged.get(&current) {
            current = *next;
        }
        current
    }

    /// Merges the given groups and every pair of groups that become equivalent as a result.
    /// The group with the lower identifier survives.
    fn merge_groups(&mut self, l: GroupId, r: GroupId) -> Result<(), OptimizerError> {
        let mut queue = VecDeque::new();
        queue.push_back((l, r));

        while let Some((l, r)) = queue.pop_front() {
            let (l, r) = (self.find(l), self.find(r));
            if l == r {
                continue;
            }
            let (survivor, dissolved) = if l < r { (l, r) } else { (r, l) };
            self.check_equivalent(survivor, dissolved)?;

            log::debug!("Merging group {} into group {}", dissolved, survivor);

            let moved = std::mem::take(&mut self.groups[dissolved.0].exprs);
            for expr in moved.iter() {
                self.exprs[expr.0].group = survivor;
            }
            self.groups[survivor.0].exprs.extend(moved);
            self.groups[dissolved.0].merged_into = Some(survivor);

            let dissolved_explored = self.groups[dissolved.0].explored;
            let dissolved_implemented = self.groups[dissolved.0].implemented;
            let dissolved_optimized = std::mem::take(&mut self.groups[dissolved.0].optimized);
            let dissolved_winners = std::mem::take(&mut self.groups[dissolved.0].winners);
            {
                let group = &mut self.groups[survivor.0];
                group.explored &= dissolved_explored;
                group.implemented &= dissolved_implemented;
                group.optimized.retain(|r| dissolved_optimized.contains(r));
            }

            for (required, candidate) in dissolved_winners {
                let current = self.groups[survivor.0].winners.get(&required).copied();
                match current {
                    None => {
                        self.groups[survivor.0].winners.insert(required, candidate);
                    }
                    Some(current) => {
                        let replace = match (self.cost_context(candidate), self.cost_context(current)) {
                            (Ok(c), Ok(w)) => c.is_better_than(w),
                            (Ok(_), Err(_)) => true,
                            _ => false,
                        };
                        if replace {
                            self.groups[survivor.0].winners.insert(required, candidate);
                            self.release(current);
                        } else {
                            self.release(candidate);
                        }
                    }
                }
            }

            for group in self.cte_producers.values_mut() {
                if *group == dissolved {
                    *group = survivor;
                }
            }

            let referencing: Vec<ExprId> = self
                .exprs
                .iter()
                .filter(|e| !e.removed && e.inputs.contains(&dissolved))
                .map(|e| e.id)
                .collect();

            for expr_id in referencing {
                let old_key = ExprKey {
                    operator: self.exprs[expr_id.0].operator.clone(),
                    inputs: self.exprs[expr_id.0].inputs.clone(),
                };
                if self.index.get(&old_key) == Some(&expr_id) {
                    self.index.remove(&old_key);
                }
                let inputs: Vec<_> = old_key.inputs.iter().map(|g| self.find(*g)).collect();
                self.exprs[expr_id.0].inputs = inputs.clone();
                let new_key = ExprKey {
                    operator: old_key.operator,
                    inputs,
                };

                match self.index.get(&new_key).copied() {
                    Some(existing) if existing != expr_id => {
                        let this_group = self.find(self.exprs[expr_id.0].group);
                        let other_group = self.find(self.exprs[existing.0].group);
                        self.exprs[expr_id.0].removed = true;
                        self.groups[this_group.0].exprs.retain(|e| *e != expr_id);
                        if this_group != other_group {
                            queue.push_back((this_group, other_group));
                        }
                    }
                    _ => {
                        self.index.insert(new_key, expr_id);
                    }
                }
            }
        }
        Ok(())
    }
}

fn operator_name(operator: &Operator) -> &'static str {
    match operator {
        Operator::Logical(op) => op.name(),
        Operator::Physical(op) => op.name(),
    }
}

impl Debug for Memo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("groups", &self.groups)
            .field("exprs", &self.exprs)
            .field("cte_producers", &self.cte_producers)
            .field("num_contexts", &self.contexts.len())
            .finish()
    }
}

/// Builds a textual representation of the given memo.
/// Groups are written in reverse order, merged groups are omitted.
pub fn format_memo(memo: &Memo) -> String {
    let mut buf = String::new();

    for group in memo.groups.iter().rev().filter(|g| g.merged_into.is_none()) {
        // Writing to a String never fails.
        let _ = write!(buf, "{} ", group.id);
        for (i, expr_id) in group.exprs.iter().enumerate() {
            if i > 0 {
                // newline + 3 spaces
                buf.push_str("\n   ");
            }
            let expr = &memo.exprs[expr_id.0];
            let _ = write!(buf, "{}", expr.operator);
            if !expr.inputs.is_empty() {
                let _ = write!(buf, " inputs=[{}]", expr.inputs.iter().map(|g| memo.find(*g)).join(", "));
            }
        }
        buf.push('\n');
    }

    buf
}

#[cfg(test)]
mod test {
    use super::testing::*;
    use super::*;
    use crate::operators::relational::logical::{LogicalJoin, LogicalProject, LogicalSelect};
    use crate::operators::relational::JoinType;
    use crate::operators::scalar::{col, int, BinaryOp, ScalarExpr};
    use crate::properties::distribution::DistributionSpec;
    use crate::testing::TestCatalog;

    fn context(expr: ExprId, cost: f64, rank: HintRank) -> CostContext {
        CostContext {
            expr,
            required: RequiredProperties::none(),
            request: 0,
            inputs: vec![],
            expr_derived: DerivedProperties::new(DistributionSpec::Random),
            expr_cost: Cost::new(cost),
            enforcers: vec![],
            derived: DerivedProperties::new(DistributionSpec::Random),
            cost: Cost::new(cost),
            rank,
        }
    }

    #[test]
    fn insert_is_idempotent() {
        let catalog = TestCatalog::new();
        let mut memo = catalog.memo();
        let expr = catalog
            .builder()
            .get("A", "a")
            .unwrap()
            .select(ScalarExpr::gt(col(1), int(10)))
            .unwrap()
            .build()
            .unwrap();

        let group = memo.insert(&expr).unwrap();
        let num_exprs = memo.group(group).exprs().len();
        let same = memo.insert(&expr).unwrap();

        assert_eq!(group, same);
        assert_eq!(memo.group(group).exprs().len(), num_exprs);
        assert_eq!(memo.num_exprs(), 2);

        expect_memo(
            &memo,
            r#"
01 LogicalSelect filter=col:1 > 10 inputs=[00]
00 LogicalGet A alias=a cols=[1, 2, 3]
"#,
        );
    }

    #[test]
    fn insert_shares_identical_subexpressions() {
        let catalog = TestCatalog::new();
        let mut memo = catalog.memo();
        let builder = catalog.builder();
        let get_a = builder.clone().get("A", "a").unwrap().build().unwrap();
        let filter = ScalarExpr::gt(col(1), int(10));
        let filtered = select(&filter, get_a.clone());
        let join = LogicalOp::Join(LogicalJoin {
            join_type: JoinType::Inner,
            condition: ScalarExpr::true_literal(),
        });
        let join = Expr::logical(join, vec![filtered.clone(), filtered]);

        let group = memo.insert(&join).unwrap();
        let join_expr = memo.expr(memo.group(group).exprs()[0]);
        assert_eq!(join_expr.inputs()[0], join_expr.inputs()[1]);
        assert_eq!(memo.num_groups(), 3);
    }

    #[test]
    fn merge_groups_when_expression_belongs_to_another_group() {
        let catalog = TestCatalog::new();
        let mut memo = catalog.memo();
        let builder = catalog.builder();
        let get_a = builder.clone().get("A", "a").unwrap().build().unwrap();

        let filter = ScalarExpr::gt(col(1), int(10));
        let select1 = select(&filter, get_a.clone());
        let select2 = select(&filter, select1.clone());
        let top1 = memo.insert(&select2).unwrap();
        let middle = memo.group(top1).exprs()[0];
        let middle_group = memo.expr(middle).inputs()[0];

        let parent = select(&ScalarExpr::gt(col(2), int(1)), Expr::group(top1));
        let parent_group = memo.insert(&parent).unwrap();

        // select(select(a)) is equivalent to select(a).
        let result = memo.insert_into(top1, &Expr::group(middle_group)).unwrap();

        assert_eq!(memo.find(top1), memo.find(middle_group), "both groups resolve to the survivor");
        assert_eq!(result.group, memo.find(top1));
        assert_eq!(result.expr, None);

        let parent_expr = memo.expr(memo.group(parent_group).exprs()[0]);
        assert_eq!(parent_expr.inputs(), &[memo.find(top1)], "references are rewritten");

        for group in memo.group_ids().collect::<Vec<_>>() {
            for expr in memo.group(group).exprs() {
                for input in memo.expr(*expr).inputs() {
                    assert_eq!(memo.find(*input), *input, "dangling reference in {}", memo.expr(*expr).operator());
                }
            }
        }
    }

    #[test]
    fn merge_cascades_to_parents() {
        let catalog = TestCatalog::new();
        let mut memo = catalog.memo();
        let builder = catalog.builder();
        let get_a = builder.clone().get("A", "a").unwrap().build().unwrap();
        let filter = ScalarExpr::gt(col(1), int(10));
        let project = LogicalOp::Project(LogicalProject::columns(&[1, 2, 3]));

        // g1 = select(a), g2 = select(select(a))
        let g1 = memo.insert(&select(&filter, get_a.clone())).unwrap();
        let g2 = memo.insert(&select(&filter, Expr::group(g1))).unwrap();
        // p1 = project(g1), p2 = project(g2) live in different groups.
        let p1 = memo.insert(&Expr::logical(project.clone(), vec![Expr::group(g1)])).unwrap();
        let p2 = memo.insert(&Expr::logical(project.clone(), vec![Expr::group(g2)])).unwrap();
        assert_ne!(p1, p2);

        memo.insert_into(g2, &Expr::group(g1)).unwrap();

        assert_eq!(memo.find(g1), memo.find(g2));
        assert_eq!(memo.find(p1), memo.find(p2), "project(g1) and project(g2) became duplicates");
        assert_eq!(memo.group(p1).exprs().len(), 1);
    }

    #[test]
    fn failed_insert_leaves_memo_unchanged() {
        let catalog = TestCatalog::new();
        let mut memo = catalog.memo().with_limit(3);
        let get_a = catalog.builder().get("A", "a").unwrap().build().unwrap();
        let group = memo.insert(&get_a).unwrap();

        let filter = ScalarExpr::gt(col(1), int(10));
        let select1 = select(&filter, get_a.clone());
        let select2 = select(&ScalarExpr::gt(col(2), int(10)), select1);
        let select3 = select(&ScalarExpr::gt(col(3), int(10)), select2);

        let err = memo.insert(&select3).unwrap_err();
        assert!(matches!(err, OptimizerError::ResourceExhausted(_)), "{}", err);
        assert_eq!(memo.num_exprs(), 1);
        assert_eq!(memo.num_groups(), 1);
        assert_eq!(memo.group(group).exprs().len(), 1);

        expect_memo(
            &memo,
            r#"
00 LogicalGet A alias=a cols=[1, 2, 3]
"#,
        );
    }

    #[test]
    fn reject_physical_expression_with_operator_inputs() {
        let catalog = TestCatalog::new();
        let mut memo = catalog.memo();
        let get_a = catalog.builder().get("A", "a").unwrap().build().unwrap();
        let group = memo.insert(&get_a).unwrap();

        let filter = Expr::physical(
            PhysicalOp::Filter(crate::operators::relational::physical::Filter { filter: col(1) }),
            vec![get_a],
        );
        let err = memo.insert_into(group, &filter).unwrap_err();
        assert!(matches!(err, OptimizerError::Internal(_)), "{}", err);
        assert_eq!(memo.num_exprs(), 1);
    }

    #[test]
    fn verify_logical_properties_of_group_members() {
        let catalog = TestCatalog::new();
        let mut memo = catalog.memo().with_verification(true);
        let get_a = catalog.builder().get("A", "a").unwrap().build().unwrap();
        let get_b = catalog.builder().get("B", "b").unwrap().build().unwrap();
        let group = memo.insert(&get_a).unwrap();

        let err = memo.insert_into(group, &get_b).unwrap_err();
        assert!(matches!(err, OptimizerError::Internal(_)), "{}", err);
        assert_eq!(memo.num_groups(), 1, "no group has been added");
    }

    #[test]
    fn cheapest_cost_context_wins_regardless_of_order() {
        let costs = [[30.0, 10.0, 20.0], [10.0, 20.0, 30.0], [30.0, 20.0, 10.0]];
        for order in costs.iter() {
            let (mut memo, group, exprs) = memo_with_physical_alternatives(order.len());
            for (expr, cost) in exprs.iter().zip(order.iter()) {
                memo.add_cost_context(context(*expr, *cost, 0)).unwrap();
            }
            let (_, winner) = memo.winner(group, &RequiredProperties::none()).unwrap();
            assert_eq!(winner.cost, Cost::new(10.0), "order: {:?}", order);
        }
    }

    #[test]
    fn equal_cost_keeps_first_context() {
        let (mut memo, group, exprs) = memo_with_physical_alternatives(2);
        let first = memo.add_cost_context(context(exprs[0], 10.0, 0)).unwrap();
        let second = memo.add_cost_context(context(exprs[1], 10.0, 0)).unwrap();

        assert!(first.is_some());
        assert_eq!(second, None);
        let (id, _) = memo.winner(group, &RequiredProperties::none()).unwrap();
        assert_eq!(Some(id), first);
    }

    #[test]
    fn hinted_context_wins_regardless_of_cost() {
        let (mut memo, group, exprs) = memo_with_physical_alternatives(2);
        memo.add_cost_context(context(exprs[0], 10.0, 0)).unwrap();
        memo.add_cost_context(context(exprs[1], 100.0, 1)).unwrap();

        let (_, winner) = memo.winner(group, &RequiredProperties::none()).unwrap();
        assert_eq!(winner.expr, exprs[1]);

        let cheaper = memo.add_cost_context(context(exprs[0], 1.0, 0)).unwrap();
        assert_eq!(cheaper, None, "an unhinted context never replaces a hinted one");
    }

    #[test]
    fn pinned_contexts_are_retained() {
        let (mut memo, _, exprs) = memo_with_physical_alternatives(2);
        let first = memo.add_cost_context(context(exprs[0], 20.0, 0)).unwrap().unwrap();
        memo.pin(first).unwrap();
        memo.add_cost_context(context(exprs[1], 10.0, 0)).unwrap().unwrap();

        assert!(memo.cost_context(first).is_ok(), "a pinned context is retained");

        memo.unpin(first);
        let err = memo.cost_context(first).unwrap_err();
        assert!(matches!(err, OptimizerError::Internal(_)), "{}", err);
        assert_eq!(memo.num_pruned(), 1);
    }

    #[test]
    fn contexts_referenced_by_other_contexts_are_retained() {
        let catalog = TestCatalog::new();
        let mut memo = catalog.memo();
        let get_a = catalog.builder().get("A", "a").unwrap().build().unwrap();
        let scan_group = memo.insert(&get_a).unwrap();
        let filtered = select(&ScalarExpr::gt(col(1), int(1)), Expr::group(scan_group));
        let select_group = memo.insert(&filtered).unwrap();

        let scan1 = memo.insert_into(scan_group, &physical_scan("A", 1)).unwrap().expr.unwrap();
        let scan2 = memo.insert_into(scan_group, &physical_scan("A", 2)).unwrap().expr.unwrap();
        let filter = Expr::physical(
            PhysicalOp::Filter(crate::operators::relational::physical::Filter {
                filter: ScalarExpr::gt(col(1), int(1)),
            }),
            vec![Expr::group(scan_group)],
        );
        let filter = memo.insert_into(select_group, &filter).unwrap().expr.unwrap();

        let scan_ctx = memo.add_cost_context(context(scan1, 20.0, 0)).unwrap().unwrap();
        let mut filter_ctx = context(filter, 25.0, 0);
        filter_ctx.inputs = vec![scan_ctx];
        memo.add_cost_context(filter_ctx).unwrap().unwrap();

        memo.add_cost_context(context(scan2, 10.0, 0)).unwrap().unwrap();
        assert!(memo.cost_context(scan_ctx).is_ok(), "referenced by the winner of the parent group");
    }

    #[test]
    fn merge_keeps_the_better_winner() {
        let catalog = TestCatalog::new();
        let mut memo = catalog.memo();
        let get_a = catalog.builder().get("A", "a").unwrap().build().unwrap();
        let filter = ScalarExpr::gt(col(1), int(10));
        let g1 = memo.insert(&select(&filter, get_a.clone())).unwrap();
        let g2 = memo.insert(&select(&filter, Expr::group(g1))).unwrap();

        let scan_group = memo.expr(memo.group(g1).exprs()[0]).inputs()[0];
        let scan = memo.insert_into(scan_group, &physical_scan("A", 1)).unwrap().expr.unwrap();
        let scan_ctx = memo.add_cost_context(context(scan, 5.0, 0)).unwrap().unwrap();

        // 10 < a1 is the same filter written the other way around.
        let reversed = ScalarExpr::binary(int(10), BinaryOp::Lt, col(1));
        let e1 = memo.insert_into(g1, &physical_filter(&filter, scan_group)).unwrap().expr.unwrap();
        let e2 = memo.insert_into(g2, &physical_filter(&reversed, scan_group)).unwrap().expr.unwrap();

        let mut ctx1 = context(e1, 20.0, 0);
        ctx1.inputs = vec![scan_ctx];
        let mut ctx2 = context(e2, 10.0, 0);
        ctx2.inputs = vec![scan_ctx];
        let c1 = memo.add_cost_context(ctx1).unwrap().unwrap();
        let c2 = memo.add_cost_context(ctx2).unwrap().unwrap();

        memo.insert_into(g2, &Expr::group(g1)).unwrap();

        assert_eq!(memo.find(g1), memo.find(g2));
        let (winner, _) = memo.winner(g1, &RequiredProperties::none()).unwrap();
        assert_eq!(winner, c2);
        assert!(memo.cost_context(c1).is_err(), "the loser is pruned");
        assert!(memo.cost_context(scan_ctx).is_ok(), "the input of the winner is retained");
    }

    #[test]
    fn failed_merge_leaves_memo_unchanged() {
        let catalog = TestCatalog::new();
        let mut memo = catalog.memo().with_verification(false);
        let get_a = catalog.builder().get("A", "a").unwrap().build().unwrap();
        let filter = ScalarExpr::gt(col(1), int(10));
        let all_columns = LogicalOp::Project(LogicalProject::columns(&[1, 2, 3]));
        let two_columns = LogicalOp::Project(LogicalProject::columns(&[1, 2]));

        let g1 = memo.insert(&select(&filter, get_a)).unwrap();
        let g2 = memo.insert(&select(&filter, Expr::group(g1))).unwrap();
        let p1 = memo.insert(&Expr::logical(all_columns.clone(), vec![Expr::group(g1)])).unwrap();
        // A group whose logical properties disagree with one of its members.
        let p2 = memo.insert(&Expr::logical(two_columns, vec![Expr::group(g2)])).unwrap();
        memo.insert_into(p2, &Expr::logical(all_columns, vec![Expr::group(g2)])).unwrap();

        let before = format_memo(&memo);
        let num_exprs = memo.num_exprs();

        // Merging g1 and g2 makes p1 and p2 duplicates, the merge of p1 and p2 fails.
        let err = memo.insert_into(g2, &Expr::group(g1)).unwrap_err();
        assert!(matches!(err, OptimizerError::Internal(_)), "{}", err);

        assert_ne!(memo.find(g1), memo.find(g2), "the first merge of the cascade has been undone");
        assert_ne!(memo.find(p1), memo.find(p2));
        assert_eq!(memo.num_exprs(), num_exprs);
        assert_eq!(format_memo(&memo), before);

        let parent = memo.expr(memo.group(p1).exprs()[0]);
        assert_eq!(parent.inputs(), &[g1], "references are not rewritten");
    }

    fn select(filter: &ScalarExpr, input: Expr) -> Expr {
        Expr::logical(LogicalOp::Select(LogicalSelect { filter: filter.clone() }), vec![input])
    }

    fn physical_scan(table: &str, scan_id: usize) -> Expr {
        Expr::physical(
            PhysicalOp::TableScan(crate::operators::relational::physical::TableScan {
                table: table.into(),
                alias: table.to_lowercase(),
                columns: vec![1, 2, 3],
                scan_id,
                dynamic: false,
                distribution: DistributionSpec::Random,
            }),
            vec![],
        )
    }

    fn physical_filter(filter: &ScalarExpr, input: GroupId) -> Expr {
        Expr::physical(
            PhysicalOp::Filter(crate::operators::relational::physical::Filter { filter: filter.clone() }),
            vec![Expr::group(input)],
        )
    }

    fn memo_with_physical_alternatives(n: usize) -> (Memo, GroupId, Vec<ExprId>) {
        let catalog = TestCatalog::new();
        let mut memo = catalog.memo();
        let get_a = catalog.builder().get("A", "a").unwrap().build().unwrap();
        let group = memo.insert(&get_a).unwrap();
        let exprs = (0..n).map(|i| memo.insert_into(group, &physical_scan("A", i + 1)).unwrap().expr.unwrap()).collect();
        (memo, group, exprs)
    }
}
