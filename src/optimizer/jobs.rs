//! Jobs of the search. See [SearchJob].

use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use crate::catalog::CatalogRef;
use crate::config::OptimizerConfig;
use crate::cost::{Cost, CostEstimationContext, CostModel};
use crate::error::OptimizerError;
use crate::hints::PlanHints;
use crate::memo::{CostContext, CostContextId, Enforcer, ExprId, GroupId, Memo};
use crate::meta::MetadataRef;
use crate::operators::format::format_expr;
use crate::operators::relational::physical::PhysicalOp;
use crate::optimizer::enforcers::enforcers;
use crate::optimizer::scheduler::{Job, Step};
use crate::optimizer::SearchStats;
use crate::properties::derive::PhysicalContext;
use crate::properties::logical::LogicalProperties;
use crate::properties::physical::{DerivedProperties, RequiredProperties};
use crate::rules::binding::bindings;
use crate::rules::{Promise, XformCatalog, XformContext, XformId, XformSet};

/// State of one optimization shared by all jobs.
pub struct SearchContext {
    pub memo: Memo,
    pub xforms: Rc<XformCatalog>,
    /// Xforms that can be applied in the current stage.
    pub enabled: XformSet,
    /// The order in which applicable xforms of the same promise are scheduled.
    pub order: Vec<XformId>,
    pub metadata: MetadataRef,
    pub catalog: CatalogRef,
    pub config: OptimizerConfig,
    pub hints: PlanHints,
    pub cost_model: Rc<dyn CostModel>,
    pub stats: SearchStats,
}

impl SearchContext {
    /// Returns the xforms of the given kind that are worth applying to the given expression.
    /// Xforms with lower promise come first.
    fn candidates(&self, expr: ExprId, exploration: bool) -> Result<Vec<XformId>, OptimizerError> {
        let memo = &self.memo;
        let memo_expr = memo.expr(expr);
        let op = match memo_expr.logical_op() {
            Some(op) => op,
            None => return Ok(Vec::new()),
        };
        let xform_ctx =
            XformContext::new(memo, memo.expr_group(expr), &self.metadata, &self.catalog, &self.config, &self.hints);

        let mut candidates = Vec::new();
        for id in self.order.iter().copied() {
            if id.is_exploration() != exploration || !self.enabled.contains(id) || memo_expr.applied().contains(id) {
                continue;
            }
            let xform = self.xforms.get(id)?;
            if !xform.pattern().matches_root(op) {
                continue;
            }
            let promise = xform.promise(&xform_ctx, op);
            if promise != Promise::None {
                candidates.push((promise, id));
            }
        }
        // The scheduler runs the jobs spawned last first.
        candidates.sort_by_key(|(promise, _)| *promise);
        Ok(candidates.into_iter().map(|(_, id)| id).collect())
    }
}

/// A job of the search.
///
/// * [OptimizeGroup] finds the cheapest plan of a group under the given required properties.
/// It implements the group and then optimizes every physical expression of the group.
/// * [ImplementGroup] explores the group and then applies implementation xforms to its logical expressions.
/// * [ExploreGroup] applies exploration xforms to logical expressions of a group until no new expressions appear.
/// * [OptimizeExpr] optimizes the inputs of a physical expression under every optimization request
/// of its operator, adds enforcers and installs the result as a [CostContext].
pub enum SearchJob {
    OptimizeGroup(OptimizeGroup),
    ImplementGroup(ImplementGroup),
    ExploreGroup(ExploreGroup),
    ImplementExpr(ImplementExpr),
    ExploreExpr(ExploreExpr),
    ApplyXform(ApplyXform),
    OptimizeExpr(OptimizeExpr),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobKey {
    OptimizeGroup(GroupId, RequiredProperties),
    ImplementGroup(GroupId),
    ExploreGroup(GroupId),
    ImplementExpr(ExprId),
    ExploreExpr(ExprId),
    ApplyXform(ExprId, XformId),
    OptimizeExpr(ExprId, RequiredProperties),
}

impl SearchJob {
    pub fn optimize_group(group: GroupId, required: RequiredProperties) -> Self {
        SearchJob::OptimizeGroup(OptimizeGroup {
            group,
            required,
            implemented: false,
            spawned: HashSet::new(),
        })
    }

    fn implement_group(group: GroupId) -> Self {
        SearchJob::ImplementGroup(ImplementGroup {
            group,
            explored: false,
            spawned: HashSet::new(),
        })
    }

    fn explore_group(group: GroupId) -> Self {
        SearchJob::ExploreGroup(ExploreGroup {
            group,
            spawned: HashSet::new(),
        })
    }

    fn implement_expr(expr: ExprId) -> Self {
        SearchJob::ImplementExpr(ImplementExpr { expr, started: false })
    }

    fn explore_expr(expr: ExprId) -> Self {
        SearchJob::ExploreExpr(ExploreExpr {
            expr,
            step: ExploreStep::Start,
        })
    }

    fn apply_xform(expr: ExprId, xform: XformId) -> Self {
        SearchJob::ApplyXform(ApplyXform { expr, xform })
    }

    fn optimize_expr(expr: ExprId, required: RequiredProperties) -> Self {
        SearchJob::OptimizeExpr(OptimizeExpr {
            expr,
            required,
            started: false,
            request: 0,
            inputs: Vec::new(),
            derived: Vec::new(),
            awaiting: None,
        })
    }

    /// The name of the kind of this job.
    pub fn kind(&self) -> &'static str {
        match self {
            SearchJob::OptimizeGroup(_) => "OptimizeGroup",
            SearchJob::ImplementGroup(_) => "ImplementGroup",
            SearchJob::ExploreGroup(_) => "ExploreGroup",
            SearchJob::ImplementExpr(_) => "ImplementExpr",
            SearchJob::ExploreExpr(_) => "ExploreExpr",
            SearchJob::ApplyXform(_) => "ApplyXform",
            SearchJob::OptimizeExpr(_) => "OptimizeExpr",
        }
    }
}

impl Job for SearchJob {
    type Key = JobKey;
    type Context = SearchContext;

    fn key(&self) -> JobKey {
        match self {
            SearchJob::OptimizeGroup(job) => JobKey::OptimizeGroup(job.group, job.required.clone()),
            SearchJob::ImplementGroup(job) => JobKey::ImplementGroup(job.group),
            SearchJob::ExploreGroup(job) => JobKey::ExploreGroup(job.group),
            SearchJob::ImplementExpr(job) => JobKey::ImplementExpr(job.expr),
            SearchJob::ExploreExpr(job) => JobKey::ExploreExpr(job.expr),
            SearchJob::ApplyXform(job) => JobKey::ApplyXform(job.expr, job.xform),
            SearchJob::OptimizeExpr(job) => JobKey::OptimizeExpr(job.expr, job.required.clone()),
        }
    }

    fn run(&mut self, ctx: &mut Self::Context) -> Result<Step<Self>, OptimizerError> {
        ctx.stats.record_job(self.kind());
        match self {
            SearchJob::OptimizeGroup(job) => job.run(ctx),
            SearchJob::ImplementGroup(job) => job.run(ctx),
            SearchJob::ExploreGroup(job) => job.run(ctx),
            SearchJob::ImplementExpr(job) => job.run(ctx),
            SearchJob::ExploreExpr(job) => job.run(ctx),
            SearchJob::ApplyXform(job) => job.run(ctx),
            SearchJob::OptimizeExpr(job) => job.run(ctx),
        }
    }

    fn abandon(self, ctx: &mut Self::Context) {
        if let SearchJob::OptimizeExpr(mut job) = self {
            job.release_inputs(&mut ctx.memo);
        }
    }
}

impl Display for SearchJob {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchJob::OptimizeGroup(job) => write!(f, "OptimizeGroup {} {}", job.group, job.required),
            SearchJob::ImplementGroup(job) => write!(f, "ImplementGroup {}", job.group),
            SearchJob::ExploreGroup(job) => write!(f, "ExploreGroup {}", job.group),
            SearchJob::ImplementExpr(job) => write!(f, "ImplementExpr {}", job.expr),
            SearchJob::ExploreExpr(job) => write!(f, "ExploreExpr {}", job.expr),
            SearchJob::ApplyXform(job) => write!(f, "ApplyXform {} expr {}", job.xform, job.expr),
            SearchJob::OptimizeExpr(job) => {
                write!(f, "OptimizeExpr {} {} request {}", job.expr, job.required, job.request)
            }
        }
    }
}

pub struct OptimizeGroup {
    group: GroupId,
    required: RequiredProperties,
    implemented: bool,
    spawned: HashSet<ExprId>,
}

impl OptimizeGroup {
    fn run(&mut self, ctx: &mut SearchContext) -> Result<Step<SearchJob>, OptimizerError> {
        let group = ctx.memo.find(self.group);
        if !self.implemented {
            let memo_group = ctx.memo.group(group);
            if memo_group.is_optimized(&self.required) {
                return Ok(Step::Done);
            }
            self.implemented = true;
            if !memo_group.is_implemented() {
                return Ok(Step::Spawn(vec![SearchJob::implement_group(group)]));
            }
        }

        let mut jobs = Vec::new();
        for expr_id in ctx.memo.group(group).exprs().iter().rev() {
            let expr = ctx.memo.expr(*expr_id);
            if expr.physical_op().is_some() && !expr.is_optimized(&self.required) && self.spawned.insert(*expr_id) {
                jobs.push(SearchJob::optimize_expr(*expr_id, self.required.clone()));
            }
        }
        if !jobs.is_empty() {
            return Ok(Step::Spawn(jobs));
        }

        ctx.memo.mark_group_optimized(group, &self.required);
        Ok(Step::Done)
    }
}

pub struct ImplementGroup {
    group: GroupId,
    explored: bool,
    spawned: HashSet<ExprId>,
}

impl ImplementGroup {
    fn run(&mut self, ctx: &mut SearchContext) -> Result<Step<SearchJob>, OptimizerError> {
        let group = ctx.memo.find(self.group);
        if !self.explored {
            let memo_group = ctx.memo.group(group);
            if memo_group.is_implemented() {
                return Ok(Step::Done);
            }
            self.explored = true;
            if !memo_group.is_explored() {
                return Ok(Step::Spawn(vec![SearchJob::explore_group(group)]));
            }
        }

        let mut jobs = Vec::new();
        for expr_id in ctx.memo.group(group).exprs().iter().rev() {
            let expr = ctx.memo.expr(*expr_id);
            if expr.logical_op().is_some() && !expr.is_implemented() && self.spawned.insert(*expr_id) {
                jobs.push(SearchJob::implement_expr(*expr_id));
            }
        }
        if !jobs.is_empty() {
            return Ok(Step::Spawn(jobs));
        }

        ctx.memo.mark_group_implemented(group);
        Ok(Step::Done)
    }
}

pub struct ExploreGroup {
    group: GroupId,
    spawned: HashSet<ExprId>,
}

impl ExploreGroup {
    fn run(&mut self, ctx: &mut SearchContext) -> Result<Step<SearchJob>, OptimizerError> {
        let group = ctx.memo.find(self.group);
        if self.spawned.is_empty() && ctx.memo.group(group).is_explored() {
            return Ok(Step::Done);
        }

        // Exploration of one expression can add new expressions to the group.
        let mut jobs = Vec::new();
        for expr_id in ctx.memo.group(group).exprs().iter().rev() {
            let expr = ctx.memo.expr(*expr_id);
            if expr.logical_op().is_some() && !expr.is_explored() && self.spawned.insert(*expr_id) {
                jobs.push(SearchJob::explore_expr(*expr_id));
            }
        }
        if !jobs.is_empty() {
            return Ok(Step::Spawn(jobs));
        }

        ctx.memo.mark_group_explored(group);
        Ok(Step::Done)
    }
}

pub struct ImplementExpr {
    expr: ExprId,
    started: bool,
}

impl ImplementExpr {
    fn run(&mut self, ctx: &mut SearchContext) -> Result<Step<SearchJob>, OptimizerError> {
        if !self.started {
            self.started = true;
            if ctx.memo.expr(self.expr).is_implemented() {
                return Ok(Step::Done);
            }
            let candidates = ctx.candidates(self.expr, false)?;
            if !candidates.is_empty() {
                let jobs = candidates.into_iter().map(|xform| SearchJob::apply_xform(self.expr, xform)).collect();
                return Ok(Step::Spawn(jobs));
            }
        }
        ctx.memo.mark_expr_implemented(self.expr);
        Ok(Step::Done)
    }
}

enum ExploreStep {
    Start,
    InputsExplored,
    XformsApplied,
}

pub struct ExploreExpr {
    expr: ExprId,
    step: ExploreStep,
}

impl ExploreExpr {
    fn run(&mut self, ctx: &mut SearchContext) -> Result<Step<SearchJob>, OptimizerError> {
        loop {
            match self.step {
                ExploreStep::Start => {
                    if ctx.memo.expr(self.expr).is_explored() {
                        return Ok(Step::Done);
                    }
                    self.step = ExploreStep::InputsExplored;

                    let mut groups: Vec<GroupId> = Vec::new();
                    for input in ctx.memo.expr(self.expr).inputs() {
                        let input = ctx.memo.find(*input);
                        if !ctx.memo.group(input).is_explored() && !groups.contains(&input) {
                            groups.push(input);
                        }
                    }
                    if !groups.is_empty() {
                        return Ok(Step::Spawn(groups.into_iter().map(SearchJob::explore_group).collect()));
                    }
                }
                ExploreStep::InputsExplored => {
                    self.step = ExploreStep::XformsApplied;
                    let candidates = ctx.candidates(self.expr, true)?;
                    if !candidates.is_empty() {
                        let jobs = candidates.into_iter().map(|xform| SearchJob::apply_xform(self.expr, xform)).collect();
                        return Ok(Step::Spawn(jobs));
                    }
                }
                ExploreStep::XformsApplied => {
                    ctx.memo.mark_expr_explored(self.expr);
                    return Ok(Step::Done);
                }
            }
        }
    }
}

pub struct ApplyXform {
    expr: ExprId,
    xform: XformId,
}

impl ApplyXform {
    fn run(&mut self, ctx: &mut SearchContext) -> Result<Step<SearchJob>, OptimizerError> {
        if !ctx.memo.mark_applied(self.expr, self.xform) {
            return Ok(Step::Done);
        }
        let xforms = ctx.xforms.clone();
        let xform = xforms.get(self.xform)?;
        let group = ctx.memo.expr_group(self.expr);

        let alternatives = {
            let memo = &ctx.memo;
            let xform_ctx = XformContext::new(memo, group, &ctx.metadata, &ctx.catalog, &ctx.config, &ctx.hints);
            let mut alternatives = Vec::new();
            for binding in bindings(memo, self.expr, xform.pattern(), ctx.config.max_bindings)? {
                alternatives.extend(xform.transform(&xform_ctx, &binding)?);
            }
            alternatives
        };
        ctx.stats.xform_applications += 1;

        for alternative in alternatives {
            let result = ctx.memo.insert_into(group, &alternative)?;
            if let Some(expr) = result.expr {
                ctx.stats.alternatives += 1;
                log::trace!("{} expr {}: new expr {} in group {}\n{}", self.xform, self.expr, expr, result.group, format_expr(&alternative));
            } else {
                log::trace!("{} expr {}: duplicate\n{}", self.xform, self.expr, format_expr(&alternative));
            }
        }
        Ok(Step::Done)
    }
}

pub struct OptimizeExpr {
    expr: ExprId,
    required: RequiredProperties,
    started: bool,
    /// The current optimization request.
    request: usize,
    /// Pinned winners of the inputs optimized under the current request.
    inputs: Vec<CostContextId>,
    /// Properties provided by those winners.
    derived: Vec<DerivedProperties>,
    /// Properties required from the input being optimized.
    awaiting: Option<RequiredProperties>,
}

impl OptimizeExpr {
    fn run(&mut self, ctx: &mut SearchContext) -> Result<Step<SearchJob>, OptimizerError> {
        let op = match ctx.memo.expr(self.expr).physical_op() {
            Some(op) => op.clone(),
            None => return Err(OptimizerError::internal(format!("Expression {} is not physical", self.expr))),
        };
        if !self.started {
            self.started = true;
            if ctx.memo.expr(self.expr).is_optimized(&self.required) {
                return Ok(Step::Done);
            }
        }

        while self.request < op.num_requests() {
            if let Some(required) = self.awaiting.take() {
                let input_group = self.input_group(&ctx.memo, self.inputs.len())?;
                let winner = match ctx.memo.winner(input_group, &required) {
                    Some((id, winner)) => Some((id, winner.derived.clone())),
                    None => None,
                };
                match winner {
                    Some((id, derived)) => {
                        ctx.memo.pin(id)?;
                        self.inputs.push(id);
                        self.derived.push(derived);
                    }
                    None => {
                        self.next_request(&mut ctx.memo);
                        continue;
                    }
                }
                if self.can_be_pruned(ctx, &op)? {
                    ctx.stats.pruned += 1;
                    self.next_request(&mut ctx.memo);
                    continue;
                }
            }

            let child = self.inputs.len();
            if child < ctx.memo.expr(self.expr).inputs().len() {
                let required = {
                    let (logical, inputs) = self.logical_properties(&ctx.memo);
                    let physical_ctx = PhysicalContext {
                        required: &self.required,
                        logical,
                        inputs: &inputs,
                    };
                    op.required_input(&physical_ctx, self.request, child, &self.derived)
                };
                match required {
                    Some(required) => {
                        let input_group = self.input_group(&ctx.memo, child)?;
                        self.awaiting = Some(required.clone());
                        return Ok(Step::Spawn(vec![SearchJob::optimize_group(input_group, required)]));
                    }
                    None => {
                        self.next_request(&mut ctx.memo);
                        continue;
                    }
                }
            }

            if let Some(context) = self.cost_context(ctx, &op)? {
                ctx.memo.add_cost_context(context)?;
            }
            self.next_request(&mut ctx.memo);
        }

        ctx.memo.mark_expr_optimized(self.expr, &self.required);
        Ok(Step::Done)
    }

    fn input_group(&self, memo: &Memo, child: usize) -> Result<GroupId, OptimizerError> {
        match memo.expr(self.expr).inputs().get(child) {
            Some(group) => Ok(memo.find(*group)),
            None => Err(OptimizerError::internal(format!("Expression {} has no input {}", self.expr, child))),
        }
    }

    fn logical_properties<'m>(&self, memo: &'m Memo) -> (&'m LogicalProperties, Vec<&'m LogicalProperties>) {
        let expr = memo.expr(self.expr);
        let inputs = expr.inputs().iter().map(|g| memo.group(*g).logical()).collect();
        (memo.group(expr.group()).logical(), inputs)
    }

    /// Checks whether this expression can not beat the current winner of its group
    /// no matter what its remaining inputs cost. Costs never decrease towards the root.
    fn can_be_pruned(&self, ctx: &SearchContext, op: &PhysicalOp) -> Result<bool, OptimizerError> {
        if !ctx.config.enable_cost_pruning {
            return Ok(false);
        }
        let memo = &ctx.memo;
        let group = memo.expr_group(self.expr);
        let winner = match memo.winner(group, &self.required) {
            Some((_, winner)) => winner,
            None => return Ok(false),
        };
        let rank = ctx.hints.rank(op, &memo.group(group).logical().relations);
        if winner.rank != rank {
            return Ok(winner.rank > rank);
        }
        let mut partial = Cost::zero();
        for input in self.inputs.iter() {
            partial = partial + memo.cost_context(*input)?.cost;
        }
        Ok(partial >= winner.cost)
    }

    /// Derives properties of this expression, places enforcers above it and computes the total cost.
    /// Returns `None` if the required properties can not be satisfied.
    fn cost_context(&self, ctx: &SearchContext, op: &PhysicalOp) -> Result<Option<CostContext>, OptimizerError> {
        let memo = &ctx.memo;
        let expr = memo.expr(self.expr);
        let group = memo.group(expr.group());
        let (logical, input_logical) = self.logical_properties(memo);
        let input_statistics: Vec<_> = expr.inputs().iter().map(|g| memo.group(*g).statistics()).collect();
        let mut input_costs = Vec::with_capacity(self.inputs.len());
        for input in self.inputs.iter() {
            input_costs.push(memo.cost_context(*input)?.cost);
        }

        let physical_ctx = PhysicalContext {
            required: &self.required,
            logical,
            inputs: &input_logical,
        };
        let expr_derived = op.derive_properties(&physical_ctx, &self.derived);
        let expr_cost = ctx.cost_model.estimate_cost(
            op,
            &CostEstimationContext {
                statistics: group.statistics(),
                inputs: &input_statistics,
                input_costs: &input_costs,
                derived: &self.derived,
                required: &self.required,
            },
        );

        let (ops, derived) = match enforcers(&physical_ctx, expr_derived.clone(), ctx.config.subset_hash_matching) {
            Some(result) => result,
            None => return Ok(None),
        };
        let statistics = [group.statistics()];
        let mut cost = expr_cost;
        let mut current = expr_derived.clone();
        let mut placed = Vec::with_capacity(ops.len());
        for enforcer in ops {
            cost = ctx.cost_model.estimate_cost(
                &enforcer,
                &CostEstimationContext {
                    statistics: group.statistics(),
                    inputs: &statistics,
                    input_costs: &[cost],
                    derived: std::slice::from_ref(&current),
                    required: &self.required,
                },
            );
            current = enforcer.derive_properties(&physical_ctx, std::slice::from_ref(&current));
            placed.push(Enforcer {
                op: enforcer,
                derived: current.clone(),
                cost,
            });
        }

        Ok(Some(CostContext {
            expr: self.expr,
            required: self.required.clone(),
            request: self.request,
            inputs: self.inputs.clone(),
            expr_derived,
            expr_cost,
            enforcers: placed,
            derived,
            cost,
            rank: ctx.hints.rank(op, &logical.relations),
        }))
    }

    fn next_request(&mut self, memo: &mut Memo) {
        self.release_inputs(memo);
        self.awaiting = None;
        self.request += 1;
    }

    fn release_inputs(&mut self, memo: &mut Memo) {
        for input in self.inputs.drain(..) {
            memo.unpin(input);
        }
        self.derived.clear();
    }
}
