use std::fmt::{Display, Formatter};

use itertools::Itertools;

use crate::datatypes::DataType;
use crate::meta::ColumnSet;
use crate::operators::scalar::expr::ScalarExpr;

/// Supported aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AggregateFunction {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggregateFunction {
    /// Returns the type of values produced by this function for an argument of the given type.
    pub fn return_type(&self, arg_type: DataType) -> DataType {
        match self {
            AggregateFunction::Count => DataType::Int64,
            AggregateFunction::Sum | AggregateFunction::Avg if arg_type.is_numeric() => DataType::Int64,
            _ => arg_type,
        }
    }

    /// Returns the function that combines partial results produced by this function.
    /// `None` means that the function can not be computed in two stages.
    pub fn global_function(&self) -> Option<AggregateFunction> {
        match self {
            AggregateFunction::Count => Some(AggregateFunction::Sum),
            AggregateFunction::Sum => Some(AggregateFunction::Sum),
            AggregateFunction::Min => Some(AggregateFunction::Min),
            AggregateFunction::Max => Some(AggregateFunction::Max),
            AggregateFunction::Avg => None,
        }
    }

    /// Whether this function never produces `NULL`.
    pub fn is_not_null(&self) -> bool {
        matches!(self, AggregateFunction::Count)
    }
}

impl Display for AggregateFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateFunction::Count => write!(f, "count"),
            AggregateFunction::Sum => write!(f, "sum"),
            AggregateFunction::Min => write!(f, "min"),
            AggregateFunction::Max => write!(f, "max"),
            AggregateFunction::Avg => write!(f, "avg"),
        }
    }
}

/// An aggregate function call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregateExpr {
    pub func: AggregateFunction,
    pub args: Vec<ScalarExpr>,
    pub distinct: bool,
}

impl AggregateExpr {
    pub fn new(func: AggregateFunction, args: Vec<ScalarExpr>, distinct: bool) -> Self {
        AggregateExpr { func, args, distinct }
    }

    /// Columns referenced by the arguments of this aggregate.
    pub fn columns(&self) -> ColumnSet {
        self.args.iter().flat_map(|a| a.columns()).collect()
    }

    /// Whether this aggregate can be split into local and global stages.
    pub fn is_splittable(&self) -> bool {
        !self.distinct && self.func.global_function().is_some()
    }
}

impl Display for AggregateExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.func)?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        write!(f, "{})", self.args.iter().join(", "))
    }
}
