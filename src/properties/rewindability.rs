//! Rewindability: whether the output of an operator can be re-read without recomputation.

use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rewindability {
    NotRewindable,
    Rewindable,
}

impl Rewindability {
    /// A non-rewindable requirement is satisfied by anything.
    pub fn satisfies(&self, required: Rewindability) -> bool {
        match required {
            Rewindability::NotRewindable => true,
            Rewindability::Rewindable => *self == Rewindability::Rewindable,
        }
    }

    pub fn is_rewindable(&self) -> bool {
        *self == Rewindability::Rewindable
    }
}

impl Default for Rewindability {
    fn default() -> Self {
        Rewindability::NotRewindable
    }
}

impl Display for Rewindability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Rewindability::NotRewindable => write!(f, "not-rewindable"),
            Rewindability::Rewindable => write!(f, "rewindable"),
        }
    }
}
