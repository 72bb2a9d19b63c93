//! Logical operators.

use std::fmt::{Display, Formatter};

use crate::meta::ColumnId;
use crate::operators::format::OperatorFormatter;
use crate::operators::relational::{CteId, JoinType, ScanId};
use crate::operators::scalar::{AggregateExpr, ScalarExpr, ScalarValue};
use crate::properties::ordering::OrderSpec;

/// A logical operator. Logical operators describe what a query computes but not how.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    Get(LogicalGet),
    Select(LogicalSelect),
    Project(LogicalProject),
    Join(LogicalJoin),
    NAryJoin(LogicalNAryJoin),
    Aggregate(LogicalAggregate),
    Limit(LogicalLimit),
    UnionAll(LogicalUnionAll),
    Values(LogicalValues),
    Dml(LogicalDml),
    Apply(LogicalApply),
    CteAnchor(LogicalCteAnchor),
    CteConsumer(LogicalCteConsumer),
}

/// The kind of a logical operator. Patterns of xforms match operators by their kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOpKind {
    Get,
    Select,
    Project,
    Join,
    NAryJoin,
    Aggregate,
    Limit,
    UnionAll,
    Values,
    Dml,
    Apply,
    CteAnchor,
    CteConsumer,
}

impl LogicalOp {
    pub fn kind(&self) -> LogicalOpKind {
        match self {
            LogicalOp::Get(_) => LogicalOpKind::Get,
            LogicalOp::Select(_) => LogicalOpKind::Select,
            LogicalOp::Project(_) => LogicalOpKind::Project,
            LogicalOp::Join(_) => LogicalOpKind::Join,
            LogicalOp::NAryJoin(_) => LogicalOpKind::NAryJoin,
            LogicalOp::Aggregate(_) => LogicalOpKind::Aggregate,
            LogicalOp::Limit(_) => LogicalOpKind::Limit,
            LogicalOp::UnionAll(_) => LogicalOpKind::UnionAll,
            LogicalOp::Values(_) => LogicalOpKind::Values,
            LogicalOp::Dml(_) => LogicalOpKind::Dml,
            LogicalOp::Apply(_) => LogicalOpKind::Apply,
            LogicalOp::CteAnchor(_) => LogicalOpKind::CteAnchor,
            LogicalOp::CteConsumer(_) => LogicalOpKind::CteConsumer,
        }
    }

    /// Returns the number of inputs this operator expects or `None` if it accepts any number of inputs.
    pub fn arity(&self) -> Option<usize> {
        match self {
            LogicalOp::Get(_) | LogicalOp::Values(_) | LogicalOp::CteConsumer(_) => Some(0),
            LogicalOp::Select(_)
            | LogicalOp::Project(_)
            | LogicalOp::Aggregate(_)
            | LogicalOp::Limit(_)
            | LogicalOp::Dml(_) => Some(1),
            LogicalOp::Join(_) | LogicalOp::Apply(_) | LogicalOp::CteAnchor(_) => Some(2),
            LogicalOp::NAryJoin(_) | LogicalOp::UnionAll(_) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LogicalOp::Get(_) => "LogicalGet",
            LogicalOp::Select(_) => "LogicalSelect",
            LogicalOp::Project(_) => "LogicalProject",
            LogicalOp::Join(_) => "LogicalJoin",
            LogicalOp::NAryJoin(_) => "LogicalNAryJoin",
            LogicalOp::Aggregate(_) => "LogicalAggregate",
            LogicalOp::Limit(_) => "LogicalLimit",
            LogicalOp::UnionAll(_) => "LogicalUnionAll",
            LogicalOp::Values(_) => "LogicalValues",
            LogicalOp::Dml(_) => "LogicalDml",
            LogicalOp::Apply(_) => "LogicalApply",
            LogicalOp::CteAnchor(_) => "LogicalCteAnchor",
            LogicalOp::CteConsumer(_) => "LogicalCteConsumer",
        }
    }

    pub fn format<F>(&self, f: &mut F)
    where
        F: OperatorFormatter,
    {
        f.write_name(self.name());
        match self {
            LogicalOp::Get(get) => {
                f.write_value("", &get.table);
                if get.alias != get.table {
                    f.write_value("alias", &get.alias);
                }
                f.write_values("cols", &get.columns);
            }
            LogicalOp::Select(select) => f.write_value("filter", &select.filter),
            LogicalOp::Project(project) => {
                let exprs: Vec<_> = project.exprs.iter().map(|(id, expr)| format_assignment(*id, expr)).collect();
                f.write_values("cols", &exprs)
            }
            LogicalOp::Join(join) => {
                f.write_value("type", join.join_type);
                f.write_value("on", &join.condition);
            }
            LogicalOp::NAryJoin(join) => f.write_value("on", &join.condition),
            LogicalOp::Aggregate(aggr) => {
                if aggr.stage != AggregateStage::Single {
                    f.write_value("stage", aggr.stage);
                }
                f.write_values("group_by", &aggr.group_by);
                let aggrs: Vec<_> = aggr.aggregates.iter().map(|(id, expr)| format_assignment(*id, expr)).collect();
                f.write_values("aggregates", &aggrs);
            }
            LogicalOp::Limit(limit) => {
                if limit.offset > 0 {
                    f.write_value("offset", limit.offset);
                }
                if let Some(count) = limit.count {
                    f.write_value("count", count);
                }
                f.write_values("order", &limit.ordering.columns);
            }
            LogicalOp::UnionAll(union) => f.write_values("cols", &union.output),
            LogicalOp::Values(values) => {
                f.write_values("cols", &values.columns);
                f.write_value("rows", values.rows.len());
            }
            LogicalOp::Dml(dml) => {
                f.write_value("", dml.kind);
                f.write_value("table", &dml.table);
                f.write_values("cols", &dml.columns);
            }
            LogicalOp::Apply(apply) => {
                f.write_value("type", apply.apply_type);
                f.write_value("on", &apply.condition);
            }
            LogicalOp::CteAnchor(anchor) => f.write_value("cte", anchor.cte_id),
            LogicalOp::CteConsumer(consumer) => {
                f.write_value("cte", consumer.cte_id);
                f.write_values("cols", &consumer.columns);
            }
        }
    }
}

pub(crate) fn format_assignment(id: ColumnId, expr: impl Display) -> String {
    format!("{}={}", id, expr)
}

impl Display for LogicalOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        crate::operators::format::fmt_operator(f, |fmt| self.format(fmt))
    }
}

/// Reads all rows of a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalGet {
    pub table: String,
    pub alias: String,
    pub columns: Vec<ColumnId>,
    pub scan_id: ScanId,
    /// The column of the partition key when the table is partitioned.
    pub partition_column: Option<ColumnId>,
}

/// Filters rows of its input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalSelect {
    pub filter: ScalarExpr,
}

/// Computes a list of expressions. A column that is passed through is represented as
/// an assignment of the column to itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalProject {
    pub exprs: Vec<(ColumnId, ScalarExpr)>,
}

impl LogicalProject {
    /// Creates a projection that passes the given columns through.
    pub fn columns(columns: &[ColumnId]) -> Self {
        LogicalProject {
            exprs: columns.iter().map(|c| (*c, ScalarExpr::Column(*c))).collect(),
        }
    }
}

/// A binary join.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalJoin {
    pub join_type: JoinType,
    pub condition: ScalarExpr,
}

/// A join of an arbitrary number of inputs. All joins are inner joins.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalNAryJoin {
    pub condition: ScalarExpr,
}

/// Stage of a computation of an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateStage {
    /// An aggregate computed in one step.
    Single,
    /// Computes partial results on every segment.
    Local,
    /// Combines partial results produced by a local aggregate.
    Global,
}

impl Display for AggregateStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateStage::Single => write!(f, "Single"),
            AggregateStage::Local => write!(f, "Local"),
            AggregateStage::Global => write!(f, "Global"),
        }
    }
}

/// Groups rows by the given columns and computes aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalAggregate {
    pub group_by: Vec<ColumnId>,
    pub aggregates: Vec<(ColumnId, AggregateExpr)>,
    pub stage: AggregateStage,
}

/// Returns at most `count` rows after skipping `offset` rows in the given ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalLimit {
    pub offset: u64,
    pub count: Option<u64>,
    pub ordering: OrderSpec,
}

/// Concatenates its inputs. `input_columns[i]` are the columns of the i-th input
/// that are mapped to the `output` columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalUnionAll {
    pub output: Vec<ColumnId>,
    pub input_columns: Vec<Vec<ColumnId>>,
}

/// A list of constant rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalValues {
    pub columns: Vec<ColumnId>,
    pub rows: Vec<Vec<ScalarValue>>,
}

/// Kind of a DML statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmlKind {
    Insert,
    Delete,
    Update,
}

impl Display for DmlKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DmlKind::Insert => write!(f, "Insert"),
            DmlKind::Delete => write!(f, "Delete"),
            DmlKind::Update => write!(f, "Update"),
        }
    }
}

/// Modifies a table. `columns` are the columns of the input that provide values
/// for the columns of the table (in the order of table columns).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalDml {
    pub kind: DmlKind,
    pub table: String,
    pub columns: Vec<ColumnId>,
}

/// Type of an apply operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplyType {
    Inner,
    LeftOuter,
    Semi,
    AntiSemi,
}

impl ApplyType {
    /// The type of a join an uncorrelated apply of this type is equivalent to.
    pub fn join_type(&self) -> JoinType {
        match self {
            ApplyType::Inner => JoinType::Inner,
            ApplyType::LeftOuter => JoinType::LeftOuter,
            ApplyType::Semi => JoinType::LeftSemi,
            ApplyType::AntiSemi => JoinType::LeftAntiSemi,
        }
    }
}

impl Display for ApplyType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.join_type())
    }
}

/// Evaluates its right input (a subquery) for every row of its left input.
/// The right input can reference columns of the left input (outer references).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalApply {
    pub apply_type: ApplyType,
    pub condition: ScalarExpr,
}

/// Defines a common table expression: the first input is the producer and
/// the second input is an expression that consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalCteAnchor {
    pub cte_id: CteId,
}

/// Reads rows of a common table expression. `columns` are the columns produced by this consumer.
/// `producer_columns` are the corresponding output columns of the producer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalCteConsumer {
    pub cte_id: CteId,
    pub columns: Vec<ColumnId>,
    pub producer_columns: Vec<ColumnId>,
}
