//! Statistics based on information available in a [database catalog](crate::catalog::Catalog).

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::catalog::CatalogRef;
use crate::config::CostModelParams;
use crate::error::OptimizerError;
use crate::meta::{ColumnId, MetadataRef};
use crate::operators::relational::logical::{
    AggregateStage, LogicalAggregate, LogicalCteConsumer, LogicalGet, LogicalLimit, LogicalOp, LogicalProject,
};
use crate::operators::relational::JoinType;
use crate::operators::scalar::{BinaryOp, ScalarExpr};
use crate::properties::logical::LogicalProperties;
use crate::properties::InputProperties;
use crate::statistics::{Statistics, StatisticsBuilder, UNKNOWN_ROW_COUNT};

/// Estimates cardinality using table and column statistics of a catalog.
/// Conjuncts of a predicate are assumed to be correlated: their selectivities are damped.
#[derive(Debug)]
pub struct CatalogStatisticsBuilder {
    catalog: CatalogRef,
    metadata: MetadataRef,
    params: CostModelParams,
}

impl CatalogStatisticsBuilder {
    pub fn new(catalog: CatalogRef, metadata: MetadataRef, params: CostModelParams) -> Self {
        CatalogStatisticsBuilder {
            catalog,
            metadata,
            params,
        }
    }

    fn build_get(&self, get: &LogicalGet) -> Result<Statistics, OptimizerError> {
        let table_statistics = self.catalog.get_table_statistics(&get.table);
        let row_count = table_statistics.as_ref().map(|s| s.row_count() as f64).unwrap_or(UNKNOWN_ROW_COUNT);
        let mut statistics = Statistics::from_row_count(row_count);

        if let Some(table_statistics) = table_statistics {
            for id in get.columns.iter().copied() {
                let column = self.metadata.get_column(id)?;
                if let Some(column_statistics) = table_statistics.column(column.name()) {
                    statistics = statistics.with_distinct(id, column_statistics.distinct_count());
                }
            }
        }
        Ok(statistics)
    }

    /// Estimates the selectivity of the given predicate.
    pub fn selectivity(&self, predicate: &ScalarExpr, input: &Statistics) -> f64 {
        self.estimate_selectivity(predicate, &|column| Some(input.distinct_or_rows(column)))
    }

    /// Estimates the selectivity of a predicate over the cross product of the given inputs.
    /// The number of distinct values of a column is taken from the input that produces that column.
    pub fn join_selectivity(&self, predicate: &ScalarExpr, inputs: &[InputProperties]) -> f64 {
        self.estimate_selectivity(predicate, &|column| input_distinct(column, inputs))
    }

    fn estimate_selectivity(&self, predicate: &ScalarExpr, distinct: &dyn Fn(ColumnId) -> Option<f64>) -> f64 {
        let mut selectivities: Vec<f64> =
            predicate.split_conjunction().iter().map(|c| self.conjunct_selectivity(c, distinct)).collect();
        selectivities.sort_by(|l, r| l.partial_cmp(r).unwrap_or(Ordering::Equal));

        // The most selective conjunct is taken as is, every next one contributes less.
        let damping = self.params.selectivity_damping;
        selectivities
            .iter()
            .enumerate()
            .fold(1.0, |acc, (i, s)| acc * s.powf(damping.powi(i as i32)))
            .max(0.0)
            .min(1.0)
    }

    fn conjunct_selectivity(&self, expr: &ScalarExpr, distinct: &dyn Fn(ColumnId) -> Option<f64>) -> f64 {
        if expr.is_true() {
            return 1.0;
        }
        if let Some((l, r)) = expr.as_column_equality() {
            return match (distinct(l), distinct(r)) {
                (Some(l), Some(r)) => 1.0 / l.max(r),
                (Some(d), None) | (None, Some(d)) => 1.0 / d,
                (None, None) => self.params.default_selectivity,
            };
        }
        if let Some((column, op, value)) = expr.as_column_comparison() {
            if value.is_null() {
                return 0.0;
            }
            return match (op, distinct(column)) {
                (BinaryOp::Eq, Some(d)) => 1.0 / d,
                (BinaryOp::NotEq, Some(d)) => 1.0 - 1.0 / d,
                (BinaryOp::Eq, None) => self.params.default_selectivity,
                (BinaryOp::NotEq, None) => 1.0 - self.params.default_selectivity,
                _ => 1.0 / 3.0,
            };
        }
        match expr {
            ScalarExpr::BinaryExpr {
                lhs,
                op: BinaryOp::Or,
                rhs,
            } => {
                let l = self.estimate_selectivity(lhs, distinct);
                let r = self.estimate_selectivity(rhs, distinct);
                l + r - l * r
            }
            ScalarExpr::Not(expr) => 1.0 - self.estimate_selectivity(expr, distinct),
            _ => self.params.default_selectivity,
        }
    }

    fn build_project(&self, project: &LogicalProject, input: &Statistics) -> Statistics {
        let mut statistics = Statistics::from_row_count(input.row_count());
        for (id, expr) in project.exprs.iter() {
            if let ScalarExpr::Column(column) = expr {
                if let Some(distinct) = input.distinct_count(*column) {
                    statistics = statistics.with_distinct(*id, distinct);
                }
            }
        }
        statistics
    }

    fn build_join(
        &self,
        join_type: JoinType,
        condition: &ScalarExpr,
        left: InputProperties,
        right: InputProperties,
    ) -> Statistics {
        let selectivity = self.join_selectivity(condition, &[left, right]);
        let (left, right) = (left.statistics, right.statistics);
        let inner_rows = left.row_count() * right.row_count() * selectivity;
        let combined = || {
            let mut distinct = left.distinct().clone();
            distinct.extend(right.distinct().iter().map(|(c, d)| (*c, *d)));
            distinct
        };

        let (row_count, distinct) = match join_type {
            JoinType::Inner => (inner_rows, combined()),
            JoinType::LeftOuter => (left.row_count().max(inner_rows), combined()),
            JoinType::RightOuter => (right.row_count().max(inner_rows), combined()),
            JoinType::LeftSemi => (left.row_count().min(inner_rows), left.distinct().clone()),
            JoinType::LeftAntiSemi | JoinType::LeftAntiSemiNotIn => {
                let matched = (selectivity * right.row_count()).min(1.0);
                (left.row_count() * (1.0 - matched), left.distinct().clone())
            }
        };
        with_distinct(Statistics::from_row_count(row_count), distinct)
    }

    fn build_nary_join(&self, condition: &ScalarExpr, inputs: &[InputProperties]) -> Statistics {
        let selectivity = self.join_selectivity(condition, inputs);
        let row_count: f64 = inputs.iter().map(|p| p.statistics.row_count()).product();
        let distinct = inputs.iter().flat_map(|p| p.statistics.distinct().iter().map(|(c, d)| (*c, *d))).collect();
        with_distinct(Statistics::from_row_count(row_count * selectivity), distinct)
    }

    fn build_aggregate(&self, aggregate: &LogicalAggregate, input: &Statistics) -> Statistics {
        if aggregate.group_by.is_empty() && aggregate.stage != AggregateStage::Local {
            return Statistics::from_row_count(1.0);
        }
        let groups: f64 = aggregate.group_by.iter().map(|c| input.distinct_or_rows(*c)).product();
        let groups = match aggregate.stage {
            // Every segment produces its own groups.
            AggregateStage::Local => groups * self.params.segments as f64,
            _ => groups,
        };
        let row_count = input.row_count().min(groups);
        let distinct = aggregate.group_by.iter().filter_map(|c| input.distinct_count(*c).map(|d| (*c, d))).collect();
        with_distinct(Statistics::from_row_count(row_count), distinct)
    }

    fn build_limit(&self, limit: &LogicalLimit, input: &Statistics) -> Statistics {
        let rows = (input.row_count() - limit.offset as f64).max(0.0);
        let rows = match limit.count {
            Some(count) => rows.min(count as f64),
            None => rows,
        };
        with_distinct(Statistics::from_row_count(rows), input.distinct().clone())
    }

    fn build_cte_consumer(&self, consumer: &LogicalCteConsumer, producer: &Statistics) -> Statistics {
        let mapping: HashMap<_, _> = consumer.producer_columns.iter().zip(consumer.columns.iter()).collect();
        let distinct = producer
            .distinct()
            .iter()
            .filter_map(|(c, d)| mapping.get(c).map(|id| (**id, *d)))
            .collect();
        with_distinct(Statistics::from_row_count(producer.row_count()), distinct)
    }
}

impl StatisticsBuilder for CatalogStatisticsBuilder {
    fn build_statistics(
        &self,
        op: &LogicalOp,
        _logical: &LogicalProperties,
        inputs: &[InputProperties],
        cte_producer: Option<&Statistics>,
    ) -> Result<Statistics, OptimizerError> {
        let input_properties = |i: usize| {
            inputs.get(i).copied().ok_or_else(|| {
                OptimizerError::internal(format!("{}: No statistics for input {}", op.name(), i))
            })
        };
        let input = |i: usize| input_properties(i).map(|p| p.statistics);

        let statistics = match op {
            LogicalOp::Get(get) => self.build_get(get)?,
            LogicalOp::Select(select) => {
                let input = input(0)?;
                let selectivity = self.selectivity(&select.filter, input);
                let statistics = Statistics::from_row_count(input.row_count() * selectivity);
                let mut distinct = input.distinct().clone();
                for conjunct in select.filter.split_conjunction() {
                    if let Some((column, BinaryOp::Eq, _)) = conjunct.as_column_comparison() {
                        distinct.insert(column, 1.0);
                    }
                }
                with_distinct(statistics, distinct)
            }
            LogicalOp::Project(project) => self.build_project(project, input(0)?),
            LogicalOp::Join(join) => {
                self.build_join(join.join_type, &join.condition, input_properties(0)?, input_properties(1)?)
            }
            LogicalOp::Apply(apply) => self.build_join(
                apply.apply_type.join_type(),
                &apply.condition,
                input_properties(0)?,
                input_properties(1)?,
            ),
            LogicalOp::NAryJoin(join) => self.build_nary_join(&join.condition, inputs),
            LogicalOp::Aggregate(aggregate) => self.build_aggregate(aggregate, input(0)?),
            LogicalOp::Limit(limit) => self.build_limit(limit, input(0)?),
            LogicalOp::UnionAll(_) => Statistics::from_row_count(inputs.iter().map(|p| p.statistics.row_count()).sum()),
            LogicalOp::Values(values) => Statistics::from_row_count(values.rows.len() as f64),
            LogicalOp::Dml(_) => Statistics::from_row_count(input(0)?.row_count()),
            LogicalOp::CteAnchor(_) => input(1)?.clone(),
            LogicalOp::CteConsumer(consumer) => match cte_producer {
                Some(producer) => self.build_cte_consumer(consumer, producer),
                None => {
                    let message = format!("CTE consumer outside of its anchor. CTE: {}", consumer.cte_id);
                    return Err(OptimizerError::argument(message));
                }
            },
        };
        Ok(statistics)
    }
}

/// The number of distinct values of a column produced by one of the inputs.
/// Falls back to the row count of that input when it has no statistics for the column.
fn input_distinct(column: ColumnId, inputs: &[InputProperties]) -> Option<f64> {
    inputs
        .iter()
        .find(|p| p.logical.output_columns.contains(&column))
        .map(|p| p.statistics.distinct_or_rows(column))
}

fn with_distinct(statistics: Statistics, distinct: BTreeMap<ColumnId, f64>) -> Statistics {
    distinct.into_iter().fold(statistics, |s, (column, d)| s.with_distinct(column, d))
}
