//! Patterns to match expressions of a memo.
//!
//! A pattern is a tree of operator kinds and wildcards. Patterns are never inserted into a memo:
//! they only describe which group expressions (and which expressions of their input groups)
//! an xform expects. See [bindings](crate::rules::binding) for how patterns are matched.

use std::fmt::{Debug, Display, Formatter};

use itertools::Itertools;

use crate::operators::relational::logical::{LogicalOp, LogicalOpKind};

/// A pattern for matching logical expressions.
#[derive(Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Matches any input. The input is bound as a reference to its memo group.
    Leaf,
    /// Matches any input. The input is bound as a fully expanded expression tree so an xform
    /// can inspect and rebuild the whole subtree.
    Tree,
    /// Matches all remaining inputs (any number of them, including zero).
    /// Each input is bound as a reference to its memo group.
    MultiLeaf,
    /// Matches an operator of the given kind whose inputs match the given patterns.
    Operator { kind: LogicalOpKind, inputs: Vec<Pattern> },
}

impl Pattern {
    /// A pattern that matches an operator of the given kind with inputs that match the given patterns.
    pub fn operator(kind: LogicalOpKind, inputs: Vec<Pattern>) -> Self {
        Pattern::Operator { kind, inputs }
    }

    /// A pattern that matches an operator of the given kind with any inputs.
    pub fn any_inputs(kind: LogicalOpKind) -> Self {
        Pattern::Operator {
            kind,
            inputs: vec![Pattern::MultiLeaf],
        }
    }

    /// Returns `true` if the root of this pattern matches the given operator.
    /// Wildcards match every operator.
    pub fn matches_root(&self, op: &LogicalOp) -> bool {
        match self {
            Pattern::Operator { kind, inputs } => {
                if *kind != op.kind() {
                    return false;
                }
                match op.arity() {
                    Some(arity) => Self::accepts_arity(inputs, arity),
                    None => true,
                }
            }
            _ => true,
        }
    }

    /// The number of group levels this pattern expands.
    pub fn depth(&self) -> usize {
        match self {
            Pattern::Operator { inputs, .. } => 1 + inputs.iter().map(|p| p.depth()).max().unwrap_or(0),
            _ => 0,
        }
    }

    fn accepts_arity(inputs: &[Pattern], arity: usize) -> bool {
        match inputs.last() {
            Some(Pattern::MultiLeaf) => inputs.len() - 1 <= arity,
            _ => inputs.len() == arity,
        }
    }
}

impl Display for Pattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Pattern::Leaf => write!(f, "Leaf"),
            Pattern::Tree => write!(f, "Tree"),
            Pattern::MultiLeaf => write!(f, "MultiLeaf"),
            Pattern::Operator { kind, inputs } if inputs.is_empty() => write!(f, "{:?}", kind),
            Pattern::Operator { kind, inputs } => write!(f, "{:?}({})", kind, inputs.iter().join(", ")),
        }
    }
}

impl Debug for Pattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
