//! Cost-model.

use std::fmt::{Debug, Display, Formatter};
use std::iter::Sum;
use std::ops::Add;

use ordered_float::OrderedFloat;

use crate::operators::relational::physical::PhysicalOp;
use crate::properties::physical::{DerivedProperties, RequiredProperties};
use crate::statistics::Statistics;

pub mod simple;

/// The cost of a physical expression. A cost is never negative.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cost(OrderedFloat<f64>);

impl Cost {
    pub fn new(value: f64) -> Self {
        if value.is_nan() || value < 0.0 {
            Cost(OrderedFloat(0.0))
        } else {
            Cost(OrderedFloat(value))
        }
    }

    pub fn zero() -> Self {
        Cost::default()
    }

    pub fn value(&self) -> f64 {
        self.0.into_inner()
    }
}

impl Add for Cost {
    type Output = Cost;

    fn add(self, rhs: Self) -> Self::Output {
        Cost::new(self.value() + rhs.value())
    }
}

impl Sum for Cost {
    fn sum<I: Iterator<Item = Cost>>(iter: I) -> Self {
        iter.fold(Cost::zero(), |acc, c| acc + c)
    }
}

impl Display for Cost {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.value())
    }
}

impl Debug for Cost {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cost({})", self.value())
    }
}

/// Estimates the cost of physical operators.
///
/// The cost returned by a cost model is the total cost of an expression: the cost of the operator itself
/// plus the costs of its inputs. An implementation must never return a cost less than the sum of input costs,
/// branch-and-bound pruning relies on that.
pub trait CostModel: Debug {
    /// Estimates the total cost of the given operator.
    fn estimate_cost(&self, op: &PhysicalOp, ctx: &CostEstimationContext) -> Cost;
}

/// Provides information that can be used to estimate the cost of an operator.
#[derive(Debug, Clone, Copy)]
pub struct CostEstimationContext<'a> {
    /// Statistics of the output of the operator.
    pub statistics: &'a Statistics,
    /// Statistics of the inputs.
    pub inputs: &'a [&'a Statistics],
    /// Total costs of the inputs.
    pub input_costs: &'a [Cost],
    /// Physical properties derived by the inputs.
    pub derived: &'a [DerivedProperties],
    /// Physical properties required from the operator.
    pub required: &'a RequiredProperties,
}

impl CostEstimationContext<'_> {
    /// Returns the number of rows produced by the i-th input. Returns `1` if there is no such input.
    pub fn input_rows(&self, i: usize) -> f64 {
        self.inputs.get(i).map(|s| s.row_count()).unwrap_or(1.0)
    }

    /// Returns the sum of costs of all inputs.
    pub fn input_cost(&self) -> Cost {
        self.input_costs.iter().copied().sum()
    }

    /// Returns the number of rows produced by the operator.
    pub fn output_rows(&self) -> f64 {
        self.statistics.row_count()
    }
}
