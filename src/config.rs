//! Optimizer configuration.

use std::time::Duration;

use crate::rules::XformSet;

/// Configuration of one optimization.
#[derive(Debug, Clone)]
#[cfg_attr(test, derive(serde::Deserialize))]
#[cfg_attr(test, serde(default))]
pub struct OptimizerConfig {
    /// Parameters of the cost model and of cardinality estimation.
    pub cost: CostModelParams,
    /// Xforms that must not be applied.
    pub disabled_xforms: XformSet,
    /// The maximum number of relations in a join for which join reordering is explored.
    pub join_order_threshold: usize,
    /// Whether a distribution hashed on a subset of the required columns satisfies the requirement.
    pub subset_hash_matching: bool,
    /// Search stages. An empty list means a single stage in which all xforms are enabled.
    pub stages: Vec<SearchStage>,
    /// The maximum number of group expressions in a memo.
    pub memo_limit: usize,
    /// The maximum number of bindings enumerated per xform application.
    pub max_bindings: usize,
    /// Whether to re-derive logical properties of every new logical expression and compare them
    /// with logical properties of its group.
    pub verify_logical_properties: bool,
    /// Whether to stop optimizing an expression once its cost exceeds the cost of the best plan found so far.
    pub enable_cost_pruning: bool,
}

impl OptimizerConfig {
    pub fn with_cost_params(mut self, cost: CostModelParams) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_disabled_xforms(mut self, xforms: XformSet) -> Self {
        self.disabled_xforms = xforms;
        self
    }

    pub fn with_join_order_threshold(mut self, threshold: usize) -> Self {
        self.join_order_threshold = threshold;
        self
    }

    pub fn with_subset_hash_matching(mut self, value: bool) -> Self {
        self.subset_hash_matching = value;
        self
    }

    pub fn with_stages(mut self, stages: Vec<SearchStage>) -> Self {
        self.stages = stages;
        self
    }

    pub fn with_memo_limit(mut self, limit: usize) -> Self {
        self.memo_limit = limit;
        self
    }

    pub fn with_max_bindings(mut self, limit: usize) -> Self {
        self.max_bindings = limit;
        self
    }

    pub fn with_verify_logical_properties(mut self, value: bool) -> Self {
        self.verify_logical_properties = value;
        self
    }

    pub fn with_cost_pruning(mut self, value: bool) -> Self {
        self.enable_cost_pruning = value;
        self
    }

    /// Returns the stages of the search. If no stages are configured returns one unrestricted stage.
    pub fn search_stages(&self) -> Vec<SearchStage> {
        if self.stages.is_empty() {
            vec![SearchStage::default()]
        } else {
            self.stages.clone()
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            cost: CostModelParams::default(),
            disabled_xforms: XformSet::empty(),
            join_order_threshold: 10,
            subset_hash_matching: false,
            stages: Vec::new(),
            memo_limit: 100_000,
            max_bindings: 1_000,
            verify_logical_properties: cfg!(debug_assertions),
            enable_cost_pruning: true,
        }
    }
}

/// Parameters of the cost model. Per-row costs are in abstract units.
#[derive(Debug, Clone)]
#[cfg_attr(test, derive(serde::Deserialize))]
#[cfg_attr(test, serde(default))]
pub struct CostModelParams {
    pub scan_row_cost: f64,
    pub index_scan_row_cost: f64,
    pub filter_row_cost: f64,
    pub compute_row_cost: f64,
    pub hash_build_row_cost: f64,
    pub hash_probe_row_cost: f64,
    pub aggregate_row_cost: f64,
    pub sort_row_cost: f64,
    pub nested_loop_row_cost: f64,
    pub motion_send_row_cost: f64,
    pub motion_receive_row_cost: f64,
    pub materialize_row_cost: f64,
    /// Broadcasting more rows than this adds the broadcast penalty to the cost of a motion.
    pub broadcast_threshold: f64,
    pub broadcast_penalty: f64,
    /// The number of segments of a cluster.
    pub segments: usize,
    /// Damping factor applied to the selectivities of conjunctive predicates.
    pub selectivity_damping: f64,
    /// The selectivity of a predicate whose selectivity can not be estimated.
    pub default_selectivity: f64,
}

impl Default for CostModelParams {
    fn default() -> Self {
        CostModelParams {
            scan_row_cost: 1.0,
            index_scan_row_cost: 2.0,
            filter_row_cost: 0.1,
            compute_row_cost: 0.1,
            hash_build_row_cost: 1.5,
            hash_probe_row_cost: 1.0,
            aggregate_row_cost: 0.5,
            sort_row_cost: 0.3,
            nested_loop_row_cost: 0.2,
            motion_send_row_cost: 0.5,
            motion_receive_row_cost: 0.5,
            materialize_row_cost: 0.2,
            broadcast_threshold: 100_000.0,
            broadcast_penalty: 1_000_000.0,
            segments: 3,
            selectivity_damping: 0.75,
            default_selectivity: 0.4,
        }
    }
}

/// A stage of the search. Each stage restricts the set of xforms that can be applied
/// and the budget the optimizer can spend on the search.
#[derive(Debug, Clone)]
#[cfg_attr(test, derive(serde::Deserialize))]
#[cfg_attr(test, serde(default))]
pub struct SearchStage {
    /// Xforms enabled in this stage.
    pub xforms: XformSet,
    pub time_limit: Option<Duration>,
    /// The maximum number of group expressions this stage can add to the memo.
    pub max_alternatives: Option<usize>,
    /// This stage ends once a plan with a cost not greater than the threshold has been found.
    pub cost_threshold: Option<f64>,
}

impl SearchStage {
    pub fn new(xforms: XformSet) -> Self {
        SearchStage {
            xforms,
            time_limit: None,
            max_alternatives: None,
            cost_threshold: None,
        }
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    pub fn with_max_alternatives(mut self, limit: usize) -> Self {
        self.max_alternatives = Some(limit);
        self
    }

    pub fn with_cost_threshold(mut self, threshold: f64) -> Self {
        self.cost_threshold = Some(threshold);
        self
    }
}

impl Default for SearchStage {
    fn default() -> Self {
        SearchStage::new(XformSet::all())
    }
}
