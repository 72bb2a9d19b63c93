//! Operators and expressions.
//!
//! An [Operator] is either a [logical](LogicalOp) or a [physical](PhysicalOp) operator.
//! Scalar expressions are not operators on their own - they are immutable trees embedded into
//! the payload of relational operators. Patterns used by transformation rules are described by
//! a separate type (see [Pattern](crate::rules::pattern::Pattern)) so they can never end up in a memo.

use std::fmt::{Display, Formatter};

use triomphe::Arc;

use crate::memo::GroupId;
use crate::operators::format::OperatorFormatter;
use crate::operators::relational::logical::LogicalOp;
use crate::operators::relational::physical::PhysicalOp;

pub mod builder;
pub mod format;
pub mod relational;
pub mod scalar;

/// A relational operator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operator {
    Logical(LogicalOp),
    Physical(PhysicalOp),
}

impl Operator {
    /// Returns the number of inputs this operator expects or `None` if it accepts any number of inputs.
    pub fn arity(&self) -> Option<usize> {
        match self {
            Operator::Logical(op) => op.arity(),
            Operator::Physical(op) => op.arity(),
        }
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, Operator::Logical(_))
    }

    pub fn as_logical(&self) -> Option<&LogicalOp> {
        match self {
            Operator::Logical(op) => Some(op),
            Operator::Physical(_) => None,
        }
    }

    pub fn as_physical(&self) -> Option<&PhysicalOp> {
        match self {
            Operator::Logical(_) => None,
            Operator::Physical(op) => Some(op),
        }
    }

    pub fn format<F>(&self, f: &mut F)
    where
        F: OperatorFormatter,
    {
        match self {
            Operator::Logical(op) => op.format(f),
            Operator::Physical(op) => op.format(f),
        }
    }
}

impl From<LogicalOp> for Operator {
    fn from(op: LogicalOp) -> Self {
        Operator::Logical(op)
    }
}

impl From<PhysicalOp> for Operator {
    fn from(op: PhysicalOp) -> Self {
        Operator::Physical(op)
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        format::fmt_operator(f, |fmt| self.format(fmt))
    }
}

/// An immutable reference-counted expression tree. Inputs are shared, never copied.
///
/// An input of an expression produced by a transformation rule can be a reference to a memo group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Expr(Arc<ExprNode>);

/// A node of an expression tree.
#[derive(Debug, PartialEq, Eq, Hash)]
pub enum ExprNode {
    /// An operator with its inputs.
    Operator { operator: Operator, inputs: Vec<Expr> },
    /// A reference to a memo group.
    Group(GroupId),
}

impl Expr {
    /// Creates a new expression.
    pub fn new(operator: impl Into<Operator>, inputs: Vec<Expr>) -> Self {
        Expr(Arc::new(ExprNode::Operator {
            operator: operator.into(),
            inputs,
        }))
    }

    /// Creates a new logical expression.
    pub fn logical(operator: LogicalOp, inputs: Vec<Expr>) -> Self {
        Expr::new(operator, inputs)
    }

    /// Creates a new physical expression.
    pub fn physical(operator: PhysicalOp, inputs: Vec<Expr>) -> Self {
        Expr::new(operator, inputs)
    }

    /// Creates a reference to the given memo group.
    pub fn group(group_id: GroupId) -> Self {
        Expr(Arc::new(ExprNode::Group(group_id)))
    }

    pub fn node(&self) -> &ExprNode {
        self.0.as_ref()
    }

    /// Returns the operator of this expression or `None` if this is a reference to a group.
    pub fn operator(&self) -> Option<&Operator> {
        match self.node() {
            ExprNode::Operator { operator, .. } => Some(operator),
            ExprNode::Group(_) => None,
        }
    }

    /// Returns the logical operator of this expression.
    pub fn logical_op(&self) -> Option<&LogicalOp> {
        self.operator().and_then(|op| op.as_logical())
    }

    /// Returns the inputs of this expression. A reference to a group has no inputs.
    pub fn inputs(&self) -> &[Expr] {
        match self.node() {
            ExprNode::Operator { inputs, .. } => inputs,
            ExprNode::Group(_) => &[],
        }
    }

    /// Returns the i-th input of this expression.
    pub fn input(&self, i: usize) -> Option<&Expr> {
        self.inputs().get(i)
    }

    /// If this expression is a reference to a group returns the identifier of that group.
    pub fn as_group(&self) -> Option<GroupId> {
        match self.node() {
            ExprNode::Operator { .. } => None,
            ExprNode::Group(group_id) => Some(*group_id),
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(format::format_expr(self).as_str())
    }
}
