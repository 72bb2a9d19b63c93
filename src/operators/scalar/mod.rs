//! Scalar expressions. Scalar expressions are immutable trees embedded into the payload of relational operators.

pub mod aggregates;
pub mod expr;
pub mod value;

pub use aggregates::{AggregateExpr, AggregateFunction};
pub use expr::{BinaryOp, ExprRewriter, ExprVisitor, ScalarExpr};
pub use value::ScalarValue;

/// Creates a column reference expression.
pub fn col(id: crate::meta::ColumnId) -> ScalarExpr {
    ScalarExpr::Column(id)
}

/// Creates an int32 literal.
pub fn int(value: i32) -> ScalarExpr {
    ScalarExpr::Scalar(ScalarValue::Int32(value))
}
