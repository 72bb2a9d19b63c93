use std::rc::Rc;
use std::sync::{Arc, Once};

use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::catalog::mutable::MutableCatalog;
use crate::catalog::{Catalog, CatalogRef, IndexBuilder, Table, TableBuilder, TableDistribution};
use crate::config::{CostModelParams, OptimizerConfig};
use crate::datatypes::DataType;
use crate::hints::PlanHints;
use crate::memo::Memo;
use crate::meta::{MetadataRef, MutableMetadata};
use crate::operators::builder::ExprBuilder;
use crate::operators::Expr;
use crate::optimizer::{OptimizedPlan, Optimizer};
use crate::plan::format_plan;
use crate::properties::physical::RequiredProperties;
use crate::properties::DefaultPropertiesProvider;
use crate::rules::XformId;
use crate::statistics::simple::CatalogStatisticsBuilder;

static INIT_LOG: Once = Once::new();

/// Installs a logger. Log output is controlled by the `RUST_LOG` environment variable.
pub fn init_logger() {
    INIT_LOG.call_once(pretty_env_logger::init);
}

/// A catalog and metadata shared by tests.
///
/// A new instance contains tables `A(a1, a2, a3)` and `B(b1, b2, b3)` with `int32` columns.
/// Both tables are randomly distributed and have no statistics. Columns of the first table
/// accessed by a test receive identifiers `1, 2, 3`, columns of the second one `4, 5, 6`.
pub struct TestCatalog {
    catalog: Arc<MutableCatalog>,
    metadata: MetadataRef,
}

impl TestCatalog {
    pub fn new() -> Self {
        let catalog = TestCatalog::empty();
        catalog.add_table(table("A", &["a1", "a2", "a3"]).build().unwrap());
        catalog.add_table(table("B", &["b1", "b2", "b3"]).build().unwrap());
        catalog
    }

    /// A catalog without tables.
    pub fn empty() -> Self {
        init_logger();
        TestCatalog {
            catalog: Arc::new(MutableCatalog::new()),
            metadata: Rc::new(MutableMetadata::new()),
        }
    }

    pub fn add_table(&self, table: Table) {
        self.catalog.add_table(table).unwrap();
    }

    /// Replaces the table with the given name.
    pub fn replace_table(&self, table: Table) {
        let _ = self.catalog.remove_table(table.name());
        self.add_table(table);
    }

    pub fn add_index(&self, table: &str, name: &str, columns: &[&str]) {
        let table = self.catalog.get_table(table).unwrap();
        let index = columns.iter().fold(IndexBuilder::new(table, name), |b, c| b.add_column(c));
        self.catalog.add_index(index.build().unwrap()).unwrap();
    }

    pub fn catalog(&self) -> CatalogRef {
        self.catalog.clone()
    }

    pub fn metadata(&self) -> MetadataRef {
        self.metadata.clone()
    }

    pub fn builder(&self) -> ExprBuilder {
        ExprBuilder::new(self.catalog(), self.metadata())
    }

    /// Creates a memo that verifies logical properties of new group members.
    pub fn memo(&self) -> Memo {
        let statistics = CatalogStatisticsBuilder::new(self.catalog(), self.metadata(), CostModelParams::default());
        let provider = DefaultPropertiesProvider::new(self.catalog(), self.metadata(), Box::new(statistics));
        Memo::new(Rc::new(provider)).with_verification(true)
    }
}

/// A builder of a table with `int32` columns.
pub fn table(name: &str, columns: &[&str]) -> TableBuilder {
    columns.iter().fold(TableBuilder::new(name), |b, c| b.add_column(c, DataType::Int32))
}

/// A builder of a table with `int32` columns hash-distributed by the first column.
pub fn hashed_table(name: &str, columns: &[&str]) -> TableBuilder {
    let key = columns.first().copied().unwrap_or_default();
    table(name, columns).distribution(TableDistribution::Hashed(vec![key.to_string()]))
}

/// Runs the optimizer over expressions built by a test and compares the resulting plan
/// with the expected one.
pub struct OptimizerTester {
    catalog: TestCatalog,
    config: OptimizerConfig,
    hints: PlanHints,
    required: RequiredProperties,
    shuffle_runs: usize,
}

impl OptimizerTester {
    pub fn new(catalog: TestCatalog) -> Self {
        OptimizerTester {
            catalog,
            config: OptimizerConfig::default().with_verify_logical_properties(true),
            hints: PlanHints::new(),
            required: RequiredProperties::none(),
            shuffle_runs: 0,
        }
    }

    pub fn catalog(&self) -> &TestCatalog {
        &self.catalog
    }

    pub fn builder(&self) -> ExprBuilder {
        self.catalog.builder()
    }

    pub fn set_config(&mut self, config: OptimizerConfig) {
        self.config = config;
    }

    pub fn set_hints(&mut self, hints: PlanHints) {
        self.hints = hints;
    }

    pub fn set_required(&mut self, required: RequiredProperties) {
        self.required = required;
    }

    /// Sets the number of additional runs of [expect_plan](Self::expect_plan) in which xforms are applied
    /// in random order. Each of those runs must find a plan with the same cost.
    pub fn set_shuffle_runs(&mut self, runs: usize) {
        self.shuffle_runs = runs;
    }

    pub fn optimize(&self, expr: &Expr) -> OptimizedPlan {
        self.run(expr, None)
    }

    fn run(&self, expr: &Expr, order: Option<Vec<XformId>>) -> OptimizedPlan {
        let mut optimizer = Optimizer::new(self.catalog.catalog(), self.catalog.metadata(), self.config.clone())
            .with_hints(self.hints.clone());
        if let Some(order) = order {
            optimizer = optimizer.with_xform_order(order);
        }
        match optimizer.optimize(expr, &self.required) {
            Ok(plan) => plan,
            Err(e) => panic!("Failed to optimize an expression: {}", e),
        }
    }

    /// Optimizes the given expression and compares the plan with the expected one.
    pub fn expect_plan(&self, expr: &Expr, expected: &str) -> OptimizedPlan {
        let plan = self.optimize(expr);
        let actual = format_plan(&plan.plan);
        assert_eq!(actual.trim(), expected.trim(), "plan:\n{}", actual);

        let mut rng = thread_rng();
        for _ in 0..self.shuffle_runs {
            let mut order = XformId::ALL.to_vec();
            order.shuffle(&mut rng);
            let other = self.run(expr, Some(order.clone()));
            let diff = (other.cost.value() - plan.cost.value()).abs();
            assert!(
                diff <= 1e-6 * plan.cost.value().max(1.0),
                "xform order: {:?}\nexpected cost: {} plan:\n{}\nactual cost: {} plan:\n{}",
                order,
                plan.cost,
                actual,
                other.cost,
                format_plan(&other.plan)
            );
        }
        plan
    }
}
