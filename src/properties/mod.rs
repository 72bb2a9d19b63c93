//! Logical and physical properties.

use std::fmt::Debug;

use crate::catalog::CatalogRef;
use crate::error::OptimizerError;
use crate::meta::MetadataRef;
use crate::operators::relational::logical::LogicalOp;
use crate::properties::logical::{LogicalProperties, LogicalPropertiesBuilder};
use crate::statistics::{Statistics, StatisticsBuilder};

pub mod cte;
pub mod derive;
pub mod distribution;
pub mod logical;
pub mod ordering;
pub mod partitioning;
pub mod physical;
pub mod rewindability;

/// Logical properties and statistics of an input of an operator.
#[derive(Debug, Clone, Copy)]
pub struct InputProperties<'a> {
    pub logical: &'a LogicalProperties,
    pub statistics: &'a Statistics,
}

/// Provides logical properties and statistics for memo groups.
pub trait PropertiesProvider: Debug {
    /// Builds logical properties and statistics of the given operator.
    /// `cte_producer` contains properties of the producer when the operator is a CTE consumer.
    fn build_properties(
        &self,
        op: &LogicalOp,
        inputs: &[InputProperties],
        cte_producer: Option<InputProperties>,
    ) -> Result<(LogicalProperties, Statistics), OptimizerError>;

    /// Builds only logical properties of the given operator.
    /// Used to verify that all expressions of a group have identical logical properties.
    fn build_logical_properties(
        &self,
        op: &LogicalOp,
        inputs: &[&LogicalProperties],
        cte_producer: Option<&LogicalProperties>,
    ) -> Result<LogicalProperties, OptimizerError>;
}

/// Builds logical properties with [LogicalPropertiesBuilder] and statistics with the given [StatisticsBuilder].
#[derive(Debug)]
pub struct DefaultPropertiesProvider {
    logical: LogicalPropertiesBuilder,
    statistics: Box<dyn StatisticsBuilder>,
}

impl DefaultPropertiesProvider {
    pub fn new(catalog: CatalogRef, metadata: MetadataRef, statistics: Box<dyn StatisticsBuilder>) -> Self {
        DefaultPropertiesProvider {
            logical: LogicalPropertiesBuilder::new(catalog, metadata),
            statistics,
        }
    }
}

impl PropertiesProvider for DefaultPropertiesProvider {
    fn build_properties(
        &self,
        op: &LogicalOp,
        inputs: &[InputProperties],
        cte_producer: Option<InputProperties>,
    ) -> Result<(LogicalProperties, Statistics), OptimizerError> {
        let input_logical: Vec<_> = inputs.iter().map(|p| p.logical).collect();

        let logical = self.logical.build(op, &input_logical, cte_producer.map(|p| p.logical))?;
        let statistics = self.statistics.build_statistics(op, &logical, inputs, cte_producer.map(|p| p.statistics))?;
        Ok((logical, statistics))
    }

    fn build_logical_properties(
        &self,
        op: &LogicalOp,
        inputs: &[&LogicalProperties],
        cte_producer: Option<&LogicalProperties>,
    ) -> Result<LogicalProperties, OptimizerError> {
        self.logical.build(op, inputs, cte_producer)
    }
}
