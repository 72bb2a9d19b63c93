//! Plan hints restrict the strategies the optimizer may use for particular tables and joins.
//!
//! Negative hints (`NoSeqScan`, `NoHashJoin`, ...) disable the implementation xforms that produce
//! the forbidden operators. Positive hints (`SeqScan`, `HashJoin`, ...) do not restrict the search,
//! instead the memo prefers a hinted alternative over an unhinted one regardless of cost.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use itertools::Itertools;

use crate::operators::relational::physical::PhysicalOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanHint {
    SeqScan,
    NoSeqScan,
    IndexScan,
    NoIndexScan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinHint {
    HashJoin,
    NestLoop,
    NoHashJoin,
    NoNestLoop,
}

/// A scan method a hint can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanMethod {
    Seq,
    Index,
}

/// A join method a hint can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinMethod {
    Hash,
    NestLoop,
}

/// The preference of an alternative mandated by plan hints. Alternatives with a greater rank win.
/// Alternatives not mentioned by any hint have rank `0`.
pub type HintRank = usize;

/// Plan hints of a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanHints {
    scans: Vec<(String, ScanHint)>,
    joins: Vec<(BTreeSet<String>, JoinHint)>,
}

impl PlanHints {
    pub fn new() -> Self {
        PlanHints::default()
    }

    /// Adds a hint for the scan of the table with the given alias.
    pub fn with_scan_hint(mut self, alias: &str, hint: ScanHint) -> Self {
        self.scans.push((alias.to_string(), hint));
        self
    }

    /// Adds a hint for the join of the tables with the given aliases.
    pub fn with_join_hint(mut self, aliases: &[&str], hint: JoinHint) -> Self {
        self.joins.push((aliases.iter().map(|a| a.to_string()).collect(), hint));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty() && self.joins.is_empty()
    }

    /// Returns `false` if a hint forbids the given scan method for the table with the given alias.
    pub fn allows_scan(&self, alias: &str, method: ScanMethod) -> bool {
        !self.scans.iter().any(|(a, hint)| {
            a == alias
                && matches!(
                    (hint, method),
                    (ScanHint::NoSeqScan, ScanMethod::Seq) | (ScanHint::NoIndexScan, ScanMethod::Index)
                )
        })
    }

    /// Returns `false` if a hint forbids the given join method for the join of the given relations.
    pub fn allows_join(&self, relations: &BTreeSet<String>, method: JoinMethod) -> bool {
        !self.joins.iter().any(|(aliases, hint)| {
            aliases == relations
                && matches!(
                    (hint, method),
                    (JoinHint::NoHashJoin, JoinMethod::Hash) | (JoinHint::NoNestLoop, JoinMethod::NestLoop)
                )
        })
    }

    /// Returns the rank of the given physical operator in a group that reads the given relations.
    ///
    /// A hint applies to a group when its aliases are exactly the relations of the group.
    /// When several positive hints apply, the hint declared first takes precedence.
    pub fn rank(&self, op: &PhysicalOp, relations: &BTreeSet<String>) -> HintRank {
        let positive = self.applicable(relations);
        let mandate = match op {
            PhysicalOp::TableScan(_) => Mandate::Scan(ScanMethod::Seq),
            PhysicalOp::IndexScan(_) => Mandate::Scan(ScanMethod::Index),
            PhysicalOp::HashJoin(_) => Mandate::Join(JoinMethod::Hash),
            PhysicalOp::NestedLoopJoin(_) | PhysicalOp::IndexNestedLoopJoin(_) => Mandate::Join(JoinMethod::NestLoop),
            _ => return 0,
        };
        match positive.iter().position(|m| *m == mandate) {
            Some(p) => positive.len() - p,
            None => 0,
        }
    }

    /// Positive hints that apply to a group in the order of their precedence.
    fn applicable(&self, relations: &BTreeSet<String>) -> Vec<Mandate> {
        let scans = self.scans.iter().filter(|(alias, _)| relations.len() == 1 && relations.contains(alias)).filter_map(
            |(_, hint)| match hint {
                ScanHint::SeqScan => Some(Mandate::Scan(ScanMethod::Seq)),
                ScanHint::IndexScan => Some(Mandate::Scan(ScanMethod::Index)),
                _ => None,
            },
        );
        let joins = self.joins.iter().filter(|(aliases, _)| aliases == relations).filter_map(|(_, hint)| match hint {
            JoinHint::HashJoin => Some(Mandate::Join(JoinMethod::Hash)),
            JoinHint::NestLoop => Some(Mandate::Join(JoinMethod::NestLoop)),
            _ => None,
        });
        scans.chain(joins).unique().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Mandate {
    Scan(ScanMethod),
    Join(JoinMethod),
}

impl Display for PlanHints {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let scans = self.scans.iter().map(|(alias, hint)| format!("{:?}({})", hint, alias));
        let joins = self.joins.iter().map(|(aliases, hint)| format!("{:?}({})", hint, aliases.iter().join(" ")));
        write!(f, "{}", scans.chain(joins).join(" "))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::operators::relational::physical::{HashJoin, NestedLoopJoin};
    use crate::operators::relational::JoinType;
    use crate::operators::scalar::ScalarExpr;

    fn relations(aliases: &[&str]) -> BTreeSet<String> {
        aliases.iter().map(|a| a.to_string()).collect()
    }

    fn hash_join() -> PhysicalOp {
        PhysicalOp::HashJoin(HashJoin {
            join_type: JoinType::Inner,
            condition: ScalarExpr::true_literal(),
            left_keys: vec![],
            right_keys: vec![],
            partition_scans: vec![],
        })
    }

    fn nested_loop_join() -> PhysicalOp {
        PhysicalOp::NestedLoopJoin(NestedLoopJoin {
            join_type: JoinType::Inner,
            condition: ScalarExpr::true_literal(),
        })
    }

    #[test]
    fn negative_hints() {
        let hints = PlanHints::new()
            .with_scan_hint("a", ScanHint::NoSeqScan)
            .with_join_hint(&["a", "b"], JoinHint::NoHashJoin);

        assert!(!hints.allows_scan("a", ScanMethod::Seq));
        assert!(hints.allows_scan("a", ScanMethod::Index));
        assert!(hints.allows_scan("b", ScanMethod::Seq));

        assert!(!hints.allows_join(&relations(&["b", "a"]), JoinMethod::Hash));
        assert!(hints.allows_join(&relations(&["a", "b"]), JoinMethod::NestLoop));
        assert!(hints.allows_join(&relations(&["a", "b", "c"]), JoinMethod::Hash));
    }

    #[test]
    fn positive_hints_rank() {
        let hints = PlanHints::new()
            .with_join_hint(&["a", "b"], JoinHint::NestLoop)
            .with_join_hint(&["a", "b"], JoinHint::HashJoin);
        let ab = relations(&["a", "b"]);

        assert!(hints.rank(&nested_loop_join(), &ab) > hints.rank(&hash_join(), &ab), "first declared hint wins");
        assert!(hints.rank(&hash_join(), &ab) > 0);
        assert_eq!(hints.rank(&hash_join(), &relations(&["a", "c"])), 0);
        assert_eq!(PlanHints::new().rank(&hash_join(), &ab), 0);
    }
}
