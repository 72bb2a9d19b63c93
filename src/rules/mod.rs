//! Transformation rules (xforms) used by the optimizer.
//!
//! An xform matches a [pattern](crate::rules::pattern::Pattern) against expressions of a memo group
//! and produces alternative expressions. Exploration xforms produce equivalent logical expressions,
//! implementation xforms produce physical expressions. Every group expression records the xforms
//! that have been applied to it so an xform is never applied twice to the same expression.

use std::convert::TryFrom;
use std::fmt::{Debug, Display, Formatter};
use std::iter::FromIterator;
use std::str::FromStr;

use itertools::Itertools;

use crate::catalog::CatalogRef;
use crate::config::OptimizerConfig;
use crate::error::OptimizerError;
use crate::hints::PlanHints;
use crate::memo::{GroupId, Memo};
use crate::meta::MetadataRef;
use crate::operators::relational::logical::LogicalOp;
use crate::operators::Expr;
use crate::properties::logical::LogicalProperties;
use crate::rules::pattern::Pattern;

pub mod binding;
pub mod exploration;
pub mod implementation;
pub mod pattern;
#[cfg(test)]
pub mod testing;

/// Identifiers of all xforms known to the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum XformId {
    JoinCommutativity,
    JoinAssociativity,
    ExpandNAryJoin,
    PushSelectIntoJoin,
    SemiJoinToInnerJoin,
    ApplyToJoin,
    SplitAggregate,
    LeftJoinToRightJoin,
    GetToTableScan,
    SelectToIndexScan,
    SelectToDynamicIndexScan,
    SelectToFilter,
    ProjectToComputeScalar,
    JoinToHashJoin,
    JoinToNestedLoopJoin,
    JoinToIndexNestedLoopJoin,
    AggregateToHashAggregate,
    AggregateToStreamAggregate,
    ImplementLimit,
    UnionAllToAppend,
    ValuesToConstTableGet,
    ImplementDml,
    CteAnchorToSequence,
    CteConsumerToCteScan,
}

impl XformId {
    pub const ALL: [XformId; 24] = [
        XformId::JoinCommutativity,
        XformId::JoinAssociativity,
        XformId::ExpandNAryJoin,
        XformId::PushSelectIntoJoin,
        XformId::SemiJoinToInnerJoin,
        XformId::ApplyToJoin,
        XformId::SplitAggregate,
        XformId::LeftJoinToRightJoin,
        XformId::GetToTableScan,
        XformId::SelectToIndexScan,
        XformId::SelectToDynamicIndexScan,
        XformId::SelectToFilter,
        XformId::ProjectToComputeScalar,
        XformId::JoinToHashJoin,
        XformId::JoinToNestedLoopJoin,
        XformId::JoinToIndexNestedLoopJoin,
        XformId::AggregateToHashAggregate,
        XformId::AggregateToStreamAggregate,
        XformId::ImplementLimit,
        XformId::UnionAllToAppend,
        XformId::ValuesToConstTableGet,
        XformId::ImplementDml,
        XformId::CteAnchorToSequence,
        XformId::CteConsumerToCteScan,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            XformId::JoinCommutativity => "JoinCommutativity",
            XformId::JoinAssociativity => "JoinAssociativity",
            XformId::ExpandNAryJoin => "ExpandNAryJoin",
            XformId::PushSelectIntoJoin => "PushSelectIntoJoin",
            XformId::SemiJoinToInnerJoin => "SemiJoinToInnerJoin",
            XformId::ApplyToJoin => "ApplyToJoin",
            XformId::SplitAggregate => "SplitAggregate",
            XformId::LeftJoinToRightJoin => "LeftJoinToRightJoin",
            XformId::GetToTableScan => "GetToTableScan",
            XformId::SelectToIndexScan => "SelectToIndexScan",
            XformId::SelectToDynamicIndexScan => "SelectToDynamicIndexScan",
            XformId::SelectToFilter => "SelectToFilter",
            XformId::ProjectToComputeScalar => "ProjectToComputeScalar",
            XformId::JoinToHashJoin => "JoinToHashJoin",
            XformId::JoinToNestedLoopJoin => "JoinToNestedLoopJoin",
            XformId::JoinToIndexNestedLoopJoin => "JoinToIndexNestedLoopJoin",
            XformId::AggregateToHashAggregate => "AggregateToHashAggregate",
            XformId::AggregateToStreamAggregate => "AggregateToStreamAggregate",
            XformId::ImplementLimit => "ImplementLimit",
            XformId::UnionAllToAppend => "UnionAllToAppend",
            XformId::ValuesToConstTableGet => "ValuesToConstTableGet",
            XformId::ImplementDml => "ImplementDml",
            XformId::CteAnchorToSequence => "CteAnchorToSequence",
            XformId::CteConsumerToCteScan => "CteConsumerToCteScan",
        }
    }

    /// Whether this xform produces logical expressions.
    pub fn is_exploration(&self) -> bool {
        matches!(
            self,
            XformId::JoinCommutativity
                | XformId::JoinAssociativity
                | XformId::ExpandNAryJoin
                | XformId::PushSelectIntoJoin
                | XformId::SemiJoinToInnerJoin
                | XformId::ApplyToJoin
                | XformId::SplitAggregate
                | XformId::LeftJoinToRightJoin
        )
    }

    fn bit(&self) -> u64 {
        1 << (*self as u64)
    }
}

impl Display for XformId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for XformId {
    type Err = OptimizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        XformId::ALL
            .iter()
            .find(|id| id.name().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| OptimizerError::argument(format!("Unknown xform: {}", s)))
    }
}

/// A set of xforms.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(test, derive(serde::Deserialize))]
#[cfg_attr(test, serde(try_from = "Vec<String>"))]
pub struct XformSet(u64);

impl XformSet {
    pub fn empty() -> Self {
        XformSet(0)
    }

    pub fn all() -> Self {
        XformId::ALL.iter().copied().collect()
    }

    /// All exploration xforms.
    pub fn exploration() -> Self {
        XformId::ALL.iter().copied().filter(|id| id.is_exploration()).collect()
    }

    /// All implementation xforms.
    pub fn implementation() -> Self {
        XformId::ALL.iter().copied().filter(|id| !id.is_exploration()).collect()
    }

    /// Adds the given xform to this set. Returns `false` if the set already contains it.
    pub fn insert(&mut self, id: XformId) -> bool {
        let added = !self.contains(id);
        self.0 |= id.bit();
        added
    }

    pub fn remove(&mut self, id: XformId) {
        self.0 &= !id.bit();
    }

    pub fn contains(&self, id: XformId) -> bool {
        self.0 & id.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn union(&self, other: &XformSet) -> XformSet {
        XformSet(self.0 | other.0)
    }

    pub fn intersection(&self, other: &XformSet) -> XformSet {
        XformSet(self.0 & other.0)
    }

    pub fn difference(&self, other: &XformSet) -> XformSet {
        XformSet(self.0 & !other.0)
    }

    /// Returns an iterator over xforms of this set in the order of their identifiers.
    pub fn iter(&self) -> impl Iterator<Item = XformId> + '_ {
        XformId::ALL.iter().copied().filter(move |id| self.contains(*id))
    }
}

impl FromIterator<XformId> for XformSet {
    fn from_iter<T: IntoIterator<Item = XformId>>(iter: T) -> Self {
        let mut set = XformSet::empty();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl TryFrom<Vec<String>> for XformSet {
    type Error = String;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        names.iter().map(|name| XformId::from_str(name).map_err(|e| e.to_string())).collect()
    }
}

impl Display for XformSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.iter().join(", "))
    }
}

impl Debug for XformSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// How promising an application of an xform to an expression is.
/// Xforms with `High` promise are applied before xforms with `Low` promise.
/// An xform with `None` promise is not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Promise {
    None,
    Low,
    High,
}

/// A transformation rule.
pub trait Xform {
    fn id(&self) -> XformId;

    /// The pattern an expression must match for this xform to be applied to it.
    fn pattern(&self) -> &Pattern;

    /// Returns the promise of an application of this xform to an expression with the given operator.
    /// Called before bindings are extracted.
    fn promise(&self, _ctx: &XformContext, _op: &LogicalOp) -> Promise {
        Promise::Low
    }

    /// Produces alternative expressions for the given binding. Inputs of the produced expressions
    /// are either references to memo groups or new logical expressions.
    /// An implementation xform must return physical expressions whose inputs are group references.
    fn transform(&self, ctx: &XformContext, binding: &Expr) -> Result<Vec<Expr>, OptimizerError>;
}

impl Debug for dyn Xform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Xform").field("id", &self.id()).field("pattern", self.pattern()).finish()
    }
}

/// Provides an xform access to the memo group it is applied to and to the state of the optimization.
pub struct XformContext<'a> {
    memo: &'a Memo,
    group: GroupId,
    metadata: &'a MetadataRef,
    catalog: &'a CatalogRef,
    config: &'a OptimizerConfig,
    hints: &'a PlanHints,
}

impl<'a> XformContext<'a> {
    pub fn new(
        memo: &'a Memo,
        group: GroupId,
        metadata: &'a MetadataRef,
        catalog: &'a CatalogRef,
        config: &'a OptimizerConfig,
        hints: &'a PlanHints,
    ) -> Self {
        XformContext {
            memo,
            group,
            metadata,
            catalog,
            config,
            hints,
        }
    }

    /// The group the xform is applied to.
    pub fn group_id(&self) -> GroupId {
        self.group
    }

    /// Logical properties of the group the xform is applied to.
    pub fn logical(&self) -> &LogicalProperties {
        self.memo.group(self.group).logical()
    }

    /// Returns logical properties of the given expression. Properties of a reference to a group
    /// are the properties of that group, properties of other expressions are derived from their inputs.
    pub fn properties(&self, expr: &Expr) -> Result<LogicalProperties, OptimizerError> {
        self.memo.derive_logical_properties(expr)
    }

    pub fn memo(&self) -> &Memo {
        self.memo
    }

    pub fn metadata(&self) -> &MetadataRef {
        self.metadata
    }

    pub fn catalog(&self) -> &CatalogRef {
        self.catalog
    }

    pub fn config(&self) -> &OptimizerConfig {
        self.config
    }

    pub fn hints(&self) -> &PlanHints {
        self.hints
    }
}

/// All xforms known to the optimizer, indexed by their identifiers.
pub struct XformCatalog {
    xforms: Vec<Box<dyn Xform>>,
}

impl XformCatalog {
    pub fn new() -> Self {
        let mut xforms = exploration::xforms();
        xforms.extend(implementation::xforms());
        xforms.sort_by_key(|x| x.id());
        XformCatalog { xforms }
    }

    /// Returns the xform with the given identifier.
    pub fn get(&self, id: XformId) -> Result<&dyn Xform, OptimizerError> {
        self.xforms
            .iter()
            .find(|x| x.id() == id)
            .map(|x| x.as_ref())
            .ok_or_else(|| OptimizerError::internal(format!("Xform {} is not registered", id)))
    }

    /// Returns the xforms from the given set.
    pub fn xforms(&self, set: XformSet) -> impl Iterator<Item = &dyn Xform> + '_ {
        self.xforms.iter().filter(move |x| set.contains(x.id())).map(|x| x.as_ref())
    }
}

impl Default for XformCatalog {
    fn default() -> Self {
        XformCatalog::new()
    }
}

impl Debug for XformCatalog {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.xforms.iter().map(|x| x.id())).finish()
    }
}
