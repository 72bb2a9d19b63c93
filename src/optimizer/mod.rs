//! Cascades-style search over a memo.
//!
//! The search is driven by a set of jobs (see [jobs::SearchJob]) executed by a [cooperative scheduler](scheduler::Scheduler).
//! The optimizer copies an expression into a memo, schedules a job that optimizes the root group
//! under the required properties and runs the scheduler once per [search stage](SearchStage).
//! The plan is then extracted from the winner of the root group.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use itertools::Itertools;

use crate::catalog::{CachingCatalog, CatalogRef};
use crate::config::{OptimizerConfig, SearchStage};
use crate::cost::simple::SimpleCostModel;
use crate::cost::{Cost, CostModel};
use crate::error::{OptimizerError, ResourceKind};
use crate::hints::PlanHints;
use crate::memo::{GroupId, Memo};
use crate::meta::MetadataRef;
use crate::operators::Expr;
use crate::optimizer::extract::extract_plan;
use crate::optimizer::jobs::{SearchContext, SearchJob};
use crate::optimizer::scheduler::{Outcome, Scheduler};
use crate::plan::PhysicalPlan;
use crate::properties::physical::RequiredProperties;
use crate::properties::DefaultPropertiesProvider;
use crate::rules::{XformCatalog, XformId, XformSet};
use crate::statistics::simple::CatalogStatisticsBuilder;

pub mod enforcers;
mod extract;
mod jobs;
mod scheduler;

/// Cancels an optimization. A token can be shared between threads: the optimizer checks it before every job.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Statistics of a search.
#[derive(Debug, Clone, Default)]
pub struct SearchStats {
    /// The number of job invocations per kind of job.
    pub jobs: BTreeMap<&'static str, usize>,
    /// The number of stages that have been run.
    pub stages: usize,
    pub groups: usize,
    pub exprs: usize,
    pub xform_applications: usize,
    /// The number of new expressions produced by xforms.
    pub alternatives: usize,
    /// The number of optimization requests abandoned because they could not beat the current winner.
    pub pruned: usize,
    /// The number of cost contexts released by the memo.
    pub discarded_contexts: usize,
    pub elapsed: Duration,
}

impl SearchStats {
    fn record_job(&mut self, kind: &'static str) {
        *self.jobs.entry(kind).or_default() += 1;
    }

    /// The total number of job invocations.
    pub fn total_jobs(&self) -> usize {
        self.jobs.values().sum()
    }
}

impl Display for SearchStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "stages={} jobs={} [{}] groups={} exprs={} xforms={} alternatives={} pruned={} discarded={} elapsed={:?}",
            self.stages,
            self.total_jobs(),
            self.jobs.iter().map(|(k, v)| format!("{}={}", k, v)).join(", "),
            self.groups,
            self.exprs,
            self.xform_applications,
            self.alternatives,
            self.pruned,
            self.discarded_contexts,
            self.elapsed
        )
    }
}

/// The result of an optimization.
#[derive(Debug, Clone)]
pub struct OptimizedPlan {
    pub plan: PhysicalPlan,
    pub cost: Cost,
    pub stats: SearchStats,
}

/// Why a stage has ended before all of its jobs have completed.
enum StageEnd {
    Exhausted(ResourceKind),
    CostThresholdReached,
}

/// Cost-based optimizer. Produces the cheapest physical plan of a logical expression that satisfies
/// the required physical properties.
///
/// Each call to [optimize](Self::optimize) uses a new memo that is dropped when the call returns.
pub struct Optimizer {
    catalog: CatalogRef,
    metadata: MetadataRef,
    config: OptimizerConfig,
    hints: PlanHints,
    cost_model: Rc<dyn CostModel>,
    xforms: Rc<XformCatalog>,
    order: Vec<XformId>,
    cancellation: CancellationToken,
}

impl Optimizer {
    /// Creates an optimizer that uses [SimpleCostModel] with cost parameters from the given config.
    pub fn new(catalog: CatalogRef, metadata: MetadataRef, config: OptimizerConfig) -> Self {
        let cost_model = Rc::new(SimpleCostModel::new(config.cost.clone()));
        Optimizer {
            catalog,
            metadata,
            config,
            hints: PlanHints::new(),
            cost_model,
            xforms: Rc::new(XformCatalog::new()),
            order: XformId::ALL.to_vec(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cost_model(mut self, cost_model: Rc<dyn CostModel>) -> Self {
        self.cost_model = cost_model;
        self
    }

    pub fn with_hints(mut self, hints: PlanHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Sets the order in which applicable xforms with the same promise are applied.
    /// Xforms missing from the given list follow the listed ones.
    pub fn with_xform_order(mut self, order: Vec<XformId>) -> Self {
        let mut order: Vec<_> = order.into_iter().unique().collect();
        for id in XformId::ALL.iter() {
            if !order.contains(id) {
                order.push(*id);
            }
        }
        self.order = order;
        self
    }

    /// Optimizes the given logical expression.
    ///
    /// Returns [Unsupported](OptimizerError::Unsupported) when no stage has produced a plan and
    /// [ResourceExhausted](OptimizerError::ResourceExhausted) when the search has been cancelled,
    /// the memo has reached its limit or the last stage has run out of its budget without finding a plan.
    pub fn optimize(&self, expr: &Expr, required: &RequiredProperties) -> Result<OptimizedPlan, OptimizerError> {
        let started_at = Instant::now();
        let catalog: CatalogRef = Arc::new(CachingCatalog::new(self.catalog.clone()));
        let statistics = CatalogStatisticsBuilder::new(catalog.clone(), self.metadata.clone(), self.config.cost.clone());
        let provider = DefaultPropertiesProvider::new(catalog.clone(), self.metadata.clone(), Box::new(statistics));
        let mut memo = Memo::new(Rc::new(provider))
            .with_limit(self.config.memo_limit)
            .with_verification(self.config.verify_logical_properties);
        let root = memo.insert(expr)?;

        let mut ctx = SearchContext {
            memo,
            xforms: self.xforms.clone(),
            enabled: XformSet::empty(),
            order: self.order.clone(),
            metadata: self.metadata.clone(),
            catalog,
            config: self.config.clone(),
            hints: self.hints.clone(),
            cost_model: self.cost_model.clone(),
            stats: SearchStats::default(),
        };

        let mut exhausted = None;
        for (i, stage) in self.config.search_stages().iter().enumerate() {
            if i > 0 {
                ctx.memo.reset_search_state();
            }
            ctx.enabled = stage.xforms.difference(&self.config.disabled_xforms);
            ctx.stats.stages += 1;
            log::info!(
                "Stage {}: xforms={} time_limit={:?} max_alternatives={:?} cost_threshold={:?}",
                i,
                ctx.enabled,
                stage.time_limit,
                stage.max_alternatives,
                stage.cost_threshold
            );

            match self.run_stage(stage, root, required, &mut ctx)? {
                Outcome::Completed => {
                    log::info!("Stage {} completed", i);
                    exhausted = None;
                    if threshold_reached(&ctx.memo, root, required, stage) {
                        break;
                    }
                }
                Outcome::Interrupted(StageEnd::CostThresholdReached) => {
                    log::info!("Stage {}: cost threshold reached", i);
                    exhausted = None;
                    break;
                }
                Outcome::Interrupted(StageEnd::Exhausted(kind)) => {
                    log::info!("Stage {} stopped: {}", i, kind);
                    exhausted = Some(kind);
                }
            }
        }

        ctx.stats.groups = ctx.memo.num_groups();
        ctx.stats.exprs = ctx.memo.num_exprs();
        ctx.stats.discarded_contexts = ctx.memo.num_pruned();
        ctx.stats.elapsed = started_at.elapsed();
        log::info!("Search statistics: {}", ctx.stats);

        let winner = ctx.memo.winner(root, required).map(|(id, context)| (id, context.cost));
        match winner {
            Some((id, cost)) => {
                let plan = extract_plan(&ctx.memo, id)?;
                Ok(OptimizedPlan {
                    plan,
                    cost,
                    stats: ctx.stats,
                })
            }
            None => {
                let err = match exhausted {
                    Some(kind) => OptimizerError::resource(kind, "No plan has been found within the budget of the search"),
                    None => OptimizerError::unsupported(format!("No plan satisfies the required properties {}", required)),
                };
                log::info!("Optimization failed: {}", err);
                Err(err)
            }
        }
    }

    fn run_stage(
        &self,
        stage: &SearchStage,
        root: GroupId,
        required: &RequiredProperties,
        ctx: &mut SearchContext,
    ) -> Result<Outcome<StageEnd>, OptimizerError> {
        let deadline = stage.time_limit.map(|limit| Instant::now() + limit);
        let max_exprs = stage.max_alternatives.map(|max| ctx.memo.num_exprs() + max);
        let cancellation = &self.cancellation;

        let mut scheduler = Scheduler::new();
        let job = SearchJob::optimize_group(ctx.memo.find(root), required.clone());
        scheduler.run(job, ctx, |state| {
            if cancellation.is_cancelled() {
                return Err(OptimizerError::resource(ResourceKind::Cancelled, "Optimization has been cancelled"));
            }
            if matches!(deadline, Some(deadline) if Instant::now() >= deadline) {
                return Ok(Some(StageEnd::Exhausted(ResourceKind::Timeout)));
            }
            if matches!(max_exprs, Some(max) if state.memo.num_exprs() >= max) {
                return Ok(Some(StageEnd::Exhausted(ResourceKind::AlternativesBudget)));
            }
            if threshold_reached(&state.memo, root, required, stage) {
                return Ok(Some(StageEnd::CostThresholdReached));
            }
            Ok(None)
        })
    }
}

fn threshold_reached(memo: &Memo, root: GroupId, required: &RequiredProperties, stage: &SearchStage) -> bool {
    match (stage.cost_threshold, memo.winner(root, required)) {
        (Some(threshold), Some((_, winner))) => winner.cost <= Cost::new(threshold),
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::operators::scalar::{col, int, ScalarExpr};
    use crate::plan::format_plan;
    use crate::properties::distribution::{DistributionMatching, DistributionSpec, RequiredDistribution};
    use crate::testing::TestCatalog;

    fn optimize(optimizer: Optimizer, catalog: &TestCatalog) -> Result<OptimizedPlan, OptimizerError> {
        let expr = catalog.builder().get("A", "a").unwrap().build().unwrap();
        let required = RequiredProperties::new_with_distribution(RequiredDistribution::singleton());
        optimizer.optimize(&expr, &required)
    }

    fn optimizer(catalog: &TestCatalog, config: OptimizerConfig) -> Optimizer {
        Optimizer::new(catalog.catalog(), catalog.metadata(), config)
    }

    fn resource_kind(err: OptimizerError) -> ResourceKind {
        match err {
            OptimizerError::ResourceExhausted(e) => e.kind(),
            other => panic!("Unexpected error: {}", other),
        }
    }

    #[test]
    fn optimize_scan() {
        let catalog = TestCatalog::new();
        let result = optimize(optimizer(&catalog, OptimizerConfig::default()), &catalog).unwrap();

        assert_eq!(format_plan(&result.plan), "Motion Gather\n  TableScan A alias=a cols=[1, 2, 3]");
        assert_eq!(result.cost, result.plan.cost);
        assert!(result.plan.inputs[0].cost <= result.cost);
        assert_eq!(result.stats.stages, 1);
        assert!(result.stats.jobs.contains_key("OptimizeExpr"));
        assert!(result.stats.xform_applications > 0);
    }

    #[test]
    fn unsatisfiable_requirements_are_unsupported() {
        let catalog = TestCatalog::new();
        let expr = catalog.builder().get("A", "a").unwrap().build().unwrap();
        let universal = RequiredDistribution::new(DistributionSpec::Universal, DistributionMatching::Satisfy);
        let required = RequiredProperties::new_with_distribution(universal);

        let err = optimizer(&catalog, OptimizerConfig::default()).optimize(&expr, &required).unwrap_err();
        assert!(matches!(err, OptimizerError::Unsupported(_)), "{}", err);
        assert!(err.is_fallback());
    }

    #[test]
    fn no_implementation_xforms() {
        let catalog = TestCatalog::new();
        let config = OptimizerConfig::default().with_disabled_xforms(XformSet::implementation());

        let err = optimize(optimizer(&catalog, config), &catalog).unwrap_err();
        assert!(matches!(err, OptimizerError::Unsupported(_)), "{}", err);
    }

    #[test]
    fn cancellation() {
        let catalog = TestCatalog::new();
        let token = CancellationToken::new();
        token.cancel();
        let optimizer = optimizer(&catalog, OptimizerConfig::default()).with_cancellation_token(token);

        let err = optimize(optimizer, &catalog).unwrap_err();
        assert_eq!(resource_kind(err), ResourceKind::Cancelled);
    }

    #[test]
    fn time_limit() {
        let catalog = TestCatalog::new();
        let stage = SearchStage::default().with_time_limit(Duration::from_secs(0));
        let config = OptimizerConfig::default().with_stages(vec![stage]);

        let err = optimize(optimizer(&catalog, config), &catalog).unwrap_err();
        assert_eq!(resource_kind(err), ResourceKind::Timeout);
    }

    #[test]
    fn alternatives_budget() {
        let catalog = TestCatalog::new();
        let stage = SearchStage::default().with_max_alternatives(0);
        let config = OptimizerConfig::default().with_stages(vec![stage]);

        let err = optimize(optimizer(&catalog, config), &catalog).unwrap_err();
        assert_eq!(resource_kind(err), ResourceKind::AlternativesBudget);
    }

    #[test]
    fn next_stage_runs_when_previous_one_has_no_plan() {
        let catalog = TestCatalog::new();
        let stages = vec![
            SearchStage::default().with_max_alternatives(0),
            SearchStage::default().with_cost_threshold(f64::MAX),
            SearchStage::default(),
        ];
        let config = OptimizerConfig::default().with_stages(stages);

        let result = optimize(optimizer(&catalog, config), &catalog).unwrap();
        assert_eq!(format_plan(&result.plan), "Motion Gather\n  TableScan A alias=a cols=[1, 2, 3]");
        assert_eq!(result.stats.stages, 2, "the second stage has reached its cost threshold");
    }

    #[test]
    fn memo_limit() {
        let catalog = TestCatalog::new();
        let config = OptimizerConfig::default().with_memo_limit(1);
        let expr = catalog
            .builder()
            .get("A", "a")
            .unwrap()
            .select(ScalarExpr::gt(col(1), int(1)))
            .unwrap()
            .build()
            .unwrap();

        let err = optimizer(&catalog, config).optimize(&expr, &RequiredProperties::none()).unwrap_err();
        assert_eq!(resource_kind(err), ResourceKind::MemoLimit);
    }

    #[test]
    fn cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }
}
