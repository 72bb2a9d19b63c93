use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt::{Display, Formatter};

use itertools::Itertools;

use crate::datatypes::DataType;
use crate::meta::{ColumnId, ColumnSet};
use crate::operators::scalar::value::ScalarValue;

/// Scalar expressions supported by the optimizer.
///
/// The derived ordering of expressions is used to bring predicates into a canonical form
/// (see [ScalarExpr::normalize]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarExpr {
    Column(ColumnId),
    Scalar(ScalarValue),
    BinaryExpr {
        lhs: Box<ScalarExpr>,
        op: BinaryOp,
        rhs: Box<ScalarExpr>,
    },
    Not(Box<ScalarExpr>),
    IsNull(Box<ScalarExpr>),
    Cast {
        expr: Box<ScalarExpr>,
        data_type: DataType,
    },
    Func {
        name: String,
        args: Vec<ScalarExpr>,
    },
}

impl ScalarExpr {
    /// Creates a binary expression.
    pub fn binary(lhs: ScalarExpr, op: BinaryOp, rhs: ScalarExpr) -> ScalarExpr {
        ScalarExpr::BinaryExpr {
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
        }
    }

    /// Creates an equality expression `lhs = rhs`.
    pub fn eq(lhs: ScalarExpr, rhs: ScalarExpr) -> ScalarExpr {
        ScalarExpr::binary(lhs, BinaryOp::Eq, rhs)
    }

    /// Creates a comparison `lhs > rhs`.
    pub fn gt(lhs: ScalarExpr, rhs: ScalarExpr) -> ScalarExpr {
        ScalarExpr::binary(lhs, BinaryOp::Gt, rhs)
    }

    /// Creates the boolean `true` literal.
    pub fn true_literal() -> ScalarExpr {
        ScalarExpr::Scalar(ScalarValue::Bool(true))
    }

    /// Returns `true` if this expression is the boolean `true` literal.
    pub fn is_true(&self) -> bool {
        matches!(self, ScalarExpr::Scalar(ScalarValue::Bool(true)))
    }

    /// Performs a depth-first traversal of this expression tree calling methods of the given `visitor`.
    ///
    /// If [ExprVisitor::pre_visit] returns `Ok(false)` then child expressions of the expression are not visited.
    ///
    /// If an error is returned then traversal terminates.
    pub fn accept<V>(&self, visitor: &mut V) -> Result<(), V::Error>
    where
        V: ExprVisitor,
    {
        if !visitor.pre_visit(self)? {
            return Ok(());
        }
        match self {
            ScalarExpr::Column(_) => {}
            ScalarExpr::Scalar(_) => {}
            ScalarExpr::BinaryExpr { lhs, rhs, .. } => {
                lhs.accept(visitor)?;
                rhs.accept(visitor)?;
            }
            ScalarExpr::Not(expr) | ScalarExpr::IsNull(expr) => {
                expr.accept(visitor)?;
            }
            ScalarExpr::Cast { expr, .. } => {
                expr.accept(visitor)?;
            }
            ScalarExpr::Func { args, .. } => {
                for arg in args {
                    arg.accept(visitor)?;
                }
            }
        }
        visitor.post_visit(self)
    }

    /// Performs a depth-first traversal of this expression and recursively rewrites it using the given `rewriter`.
    ///
    /// If [ExprRewriter::pre_rewrite] returns `Ok(false)` then child expressions of the expression are not visited.
    ///
    /// If an error is returned then traversal terminates.
    pub fn rewrite<V>(self, rewriter: &mut V) -> Result<Self, V::Error>
    where
        V: ExprRewriter,
    {
        if !rewriter.pre_rewrite(&self)? {
            return Ok(self);
        }
        let expr = match self {
            ScalarExpr::Column(_) => self,
            ScalarExpr::Scalar(_) => self,
            ScalarExpr::BinaryExpr { lhs, op, rhs } => ScalarExpr::BinaryExpr {
                lhs: rewrite_boxed(*lhs, rewriter)?,
                op,
                rhs: rewrite_boxed(*rhs, rewriter)?,
            },
            ScalarExpr::Not(expr) => ScalarExpr::Not(rewrite_boxed(*expr, rewriter)?),
            ScalarExpr::IsNull(expr) => ScalarExpr::IsNull(rewrite_boxed(*expr, rewriter)?),
            ScalarExpr::Cast { expr, data_type } => ScalarExpr::Cast {
                expr: rewrite_boxed(*expr, rewriter)?,
                data_type,
            },
            ScalarExpr::Func { name, args } => {
                let args: Result<Vec<_>, _> = args.into_iter().map(|a| a.rewrite(rewriter)).collect();
                ScalarExpr::Func { name, args: args? }
            }
        };
        rewriter.rewrite(expr)
    }

    /// Returns all columns referenced by this expression.
    pub fn columns(&self) -> ColumnSet {
        struct CollectColumns(ColumnSet);

        impl ExprVisitor for CollectColumns {
            type Error = Infallible;

            fn post_visit(&mut self, expr: &ScalarExpr) -> Result<(), Self::Error> {
                if let ScalarExpr::Column(id) = expr {
                    self.0.insert(*id);
                }
                Ok(())
            }
        }

        let mut visitor = CollectColumns(ColumnSet::new());
        match self.accept(&mut visitor) {
            Ok(()) => visitor.0,
            Err(never) => match never {},
        }
    }

    /// Splits this expression into a list of conjuncts. The `true` literal produces an empty list.
    pub fn split_conjunction(&self) -> Vec<ScalarExpr> {
        fn collect(expr: &ScalarExpr, out: &mut Vec<ScalarExpr>) {
            match expr {
                ScalarExpr::BinaryExpr {
                    lhs,
                    op: BinaryOp::And,
                    rhs,
                } => {
                    collect(lhs, out);
                    collect(rhs, out);
                }
                _ if expr.is_true() => {}
                _ => out.push(expr.clone()),
            }
        }

        let mut conjuncts = Vec::new();
        collect(self, &mut conjuncts);
        conjuncts
    }

    /// Combines the given expressions with `AND`. An empty list produces the `true` literal.
    pub fn conjunction(exprs: Vec<ScalarExpr>) -> ScalarExpr {
        let mut exprs = exprs.into_iter().filter(|e| !e.is_true());
        match exprs.next() {
            None => ScalarExpr::true_literal(),
            Some(first) => exprs.fold(first, |acc, e| ScalarExpr::binary(acc, BinaryOp::And, e)),
        }
    }

    /// Brings this expression into a canonical form: operands of comparisons are ordered
    /// and conjuncts are sorted and deduplicated. `col:3 = col:1` and `col:1 = col:3`
    /// have the same normal form.
    pub fn normalize(&self) -> ScalarExpr {
        match self {
            ScalarExpr::BinaryExpr {
                op: BinaryOp::And, ..
            } => {
                let mut conjuncts: Vec<ScalarExpr> = self.split_conjunction().iter().map(|c| c.normalize()).collect();
                conjuncts.sort();
                conjuncts.dedup();
                ScalarExpr::conjunction(conjuncts)
            }
            ScalarExpr::BinaryExpr { lhs, op, rhs } if op.is_comparison() || *op == BinaryOp::Or => {
                let lhs = lhs.normalize();
                let rhs = rhs.normalize();
                if rhs < lhs {
                    ScalarExpr::binary(rhs, op.commute(), lhs)
                } else {
                    ScalarExpr::binary(lhs, *op, rhs)
                }
            }
            ScalarExpr::BinaryExpr { lhs, op, rhs } => ScalarExpr::binary(lhs.normalize(), *op, rhs.normalize()),
            ScalarExpr::Not(expr) => ScalarExpr::Not(Box::new(expr.normalize())),
            ScalarExpr::IsNull(expr) => ScalarExpr::IsNull(Box::new(expr.normalize())),
            ScalarExpr::Cast { expr, data_type } => ScalarExpr::Cast {
                expr: Box::new(expr.normalize()),
                data_type: *data_type,
            },
            ScalarExpr::Func { name, args } => ScalarExpr::Func {
                name: name.clone(),
                args: args.iter().map(|a| a.normalize()).collect(),
            },
            ScalarExpr::Column(_) | ScalarExpr::Scalar(_) => self.clone(),
        }
    }

    /// If this expression is an equality between two columns returns these columns.
    pub fn as_column_equality(&self) -> Option<(ColumnId, ColumnId)> {
        match self {
            ScalarExpr::BinaryExpr { lhs, op: BinaryOp::Eq, rhs } => match (lhs.as_ref(), rhs.as_ref()) {
                (ScalarExpr::Column(l), ScalarExpr::Column(r)) => Some((*l, *r)),
                _ => None,
            },
            _ => None,
        }
    }

    /// If this expression is a comparison between a column and a literal returns
    /// the column, the comparison operator (with the column as its left operand) and the literal.
    pub fn as_column_comparison(&self) -> Option<(ColumnId, BinaryOp, &ScalarValue)> {
        match self {
            ScalarExpr::BinaryExpr { lhs, op, rhs } if op.is_comparison() => match (lhs.as_ref(), rhs.as_ref()) {
                (ScalarExpr::Column(c), ScalarExpr::Scalar(v)) => Some((*c, *op, v)),
                (ScalarExpr::Scalar(v), ScalarExpr::Column(c)) => Some((*c, op.commute(), v)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Returns columns that can not be `NULL` in any row for which this predicate evaluates to `true`.
    pub fn null_rejecting_columns(&self) -> ColumnSet {
        fn strict_columns(expr: &ScalarExpr) -> ColumnSet {
            match expr {
                ScalarExpr::Column(id) => std::iter::once(*id).collect(),
                ScalarExpr::Cast { expr, .. } => strict_columns(expr),
                _ => ColumnSet::new(),
            }
        }

        match self {
            ScalarExpr::BinaryExpr {
                op: BinaryOp::And, ..
            } => self.split_conjunction().iter().flat_map(|c| c.null_rejecting_columns()).collect(),
            ScalarExpr::BinaryExpr {
                lhs,
                op: BinaryOp::Or,
                rhs,
            } => {
                let lhs = lhs.null_rejecting_columns();
                let rhs = rhs.null_rejecting_columns();
                lhs.intersection(&rhs).copied().collect()
            }
            ScalarExpr::BinaryExpr { lhs, op, rhs } if op.is_comparison() => {
                let mut columns = strict_columns(lhs);
                columns.extend(strict_columns(rhs));
                columns
            }
            ScalarExpr::Not(expr) => match expr.as_ref() {
                ScalarExpr::IsNull(expr) => strict_columns(expr),
                _ => ColumnSet::new(),
            },
            _ => ColumnSet::new(),
        }
    }

    /// Replaces columns of this expression according to the given mapping.
    /// Columns that are not present in the mapping are left unchanged.
    pub fn remap_columns(&self, mapping: &HashMap<ColumnId, ColumnId>) -> ScalarExpr {
        struct RemapColumns<'a>(&'a HashMap<ColumnId, ColumnId>);

        impl ExprRewriter for RemapColumns<'_> {
            type Error = Infallible;

            fn rewrite(&mut self, expr: ScalarExpr) -> Result<ScalarExpr, Self::Error> {
                match expr {
                    ScalarExpr::Column(id) => Ok(ScalarExpr::Column(self.0.get(&id).copied().unwrap_or(id))),
                    _ => Ok(expr),
                }
            }
        }

        match self.clone().rewrite(&mut RemapColumns(mapping)) {
            Ok(expr) => expr,
            Err(never) => match never {},
        }
    }
}

fn rewrite_boxed<V>(expr: ScalarExpr, rewriter: &mut V) -> Result<Box<ScalarExpr>, V::Error>
where
    V: ExprRewriter,
{
    let new_expr = expr.rewrite(rewriter)?;
    Ok(Box::new(new_expr))
}

/// Called by [ScalarExpr::accept] during a traversal of an expression tree.
pub trait ExprVisitor {
    /// The error type returned when operation fails.
    type Error;

    /// Called before all child expressions of `expr` are visited.
    ///
    /// Default implementation always returns `Ok(true)`.
    fn pre_visit(&mut self, _expr: &ScalarExpr) -> Result<bool, Self::Error> {
        Ok(true)
    }

    /// Called after all child expressions of `expr` are visited.
    fn post_visit(&mut self, expr: &ScalarExpr) -> Result<(), Self::Error>;
}

/// Called by [ScalarExpr::rewrite] during a traversal of an expression tree.
pub trait ExprRewriter {
    /// The error type returned when operation fails.
    type Error;

    /// Called before all child expressions of `expr` are rewritten.
    ///
    /// Default implementation always returns `Ok(true)`.
    fn pre_rewrite(&mut self, _expr: &ScalarExpr) -> Result<bool, Self::Error> {
        Ok(true)
    }

    /// Rewrites the given expression. Called after all children of the given expression are rewritten.
    fn rewrite(&mut self, expr: ScalarExpr) -> Result<ScalarExpr, Self::Error>;
}

/// Binary operators.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl BinaryOp {
    pub fn return_type(&self) -> DataType {
        DataType::Bool
    }

    /// Returns `true` if this is a comparison operator.
    pub fn is_comparison(&self) -> bool {
        !matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// Returns an operator `op` such that `a self b` is equivalent to `b op a`.
    pub fn commute(&self) -> BinaryOp {
        match self {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::LtEq => BinaryOp::GtEq,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::GtEq => BinaryOp::LtEq,
            _ => *self,
        }
    }
}

impl Display for ScalarExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarExpr::Column(column_id) => write!(f, "col:{}", column_id),
            ScalarExpr::Scalar(value) => write!(f, "{}", value),
            ScalarExpr::BinaryExpr { lhs, op, rhs } => {
                write_operand(f, lhs, *op)?;
                write!(f, " {} ", op)?;
                write_operand(f, rhs, *op)
            }
            ScalarExpr::Not(expr) => write!(f, "NOT {}", expr),
            ScalarExpr::IsNull(expr) => write!(f, "{} IS NULL", expr),
            ScalarExpr::Cast { expr, data_type } => write!(f, "CAST({} AS {})", expr, data_type),
            ScalarExpr::Func { name, args } => write!(f, "{}({})", name, args.iter().join(", ")),
        }
    }
}

fn write_operand(f: &mut Formatter<'_>, expr: &ScalarExpr, parent: BinaryOp) -> std::fmt::Result {
    match expr {
        ScalarExpr::BinaryExpr { op, .. } if !op.is_comparison() && *op != parent => write!(f, "({})", expr),
        _ => write!(f, "{}", expr),
    }
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryOp::And => write!(f, "AND"),
            BinaryOp::Or => write!(f, "OR"),
            BinaryOp::Eq => write!(f, "="),
            BinaryOp::NotEq => write!(f, "!="),
            BinaryOp::Lt => write!(f, "<"),
            BinaryOp::LtEq => write!(f, "<="),
            BinaryOp::Gt => write!(f, ">"),
            BinaryOp::GtEq => write!(f, ">="),
        }
    }
}
