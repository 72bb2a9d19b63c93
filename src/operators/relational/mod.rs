//! Relational operators.

use std::fmt::{Display, Formatter};

pub mod logical;
pub mod physical;

/// Identifies a scan of a table within a query. Partition propagation refers to dynamic scans by their scan ids.
pub type ScanId = usize;

/// Identifies a common table expression within a query.
pub type CteId = usize;

/// Join types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JoinType {
    Inner,
    LeftOuter,
    /// Outer join that preserves the rows of its right input.
    RightOuter,
    LeftSemi,
    LeftAntiSemi,
    /// Anti semi join with the `NOT IN` semantics: a `NULL` in the inner side rejects every outer row.
    LeftAntiSemiNotIn,
}

impl JoinType {
    /// Whether a join of this type outputs only the columns of its left input.
    pub fn is_semi_or_anti(&self) -> bool {
        matches!(self, JoinType::LeftSemi | JoinType::LeftAntiSemi | JoinType::LeftAntiSemiNotIn)
    }
}

impl Display for JoinType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            JoinType::Inner => write!(f, "Inner"),
            JoinType::LeftOuter => write!(f, "LeftOuter"),
            JoinType::RightOuter => write!(f, "RightOuter"),
            JoinType::LeftSemi => write!(f, "LeftSemi"),
            JoinType::LeftAntiSemi => write!(f, "LeftAntiSemi"),
            JoinType::LeftAntiSemiNotIn => write!(f, "LeftAntiSemiNotIn"),
        }
    }
}
