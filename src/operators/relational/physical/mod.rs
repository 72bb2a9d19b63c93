//! Physical operators. A physical operator describes how a result of a logical operator is computed.
//!
//! Enforcers ([Sort], [Motion], [PhysicalOp::Spool] and [PartitionSelector]) are physical operators
//! that are not produced by implementation rules. The optimizer adds them to a plan
//! when properties provided by an expression do not satisfy the required ones.

use std::fmt::{Display, Formatter};

use itertools::Itertools;

use crate::meta::ColumnId;
use crate::operators::format::OperatorFormatter;
use crate::operators::relational::logical::{format_assignment, AggregateStage, DmlKind};
use crate::operators::relational::{CteId, JoinType, ScanId};
use crate::operators::scalar::{AggregateExpr, ScalarExpr, ScalarValue};
use crate::properties::distribution::DistributionSpec;
use crate::properties::ordering::OrderSpec;

/// A physical operator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PhysicalOp {
    TableScan(TableScan),
    IndexScan(IndexScan),
    Filter(Filter),
    ComputeScalar(ComputeScalar),
    HashJoin(HashJoin),
    NestedLoopJoin(NestedLoopJoin),
    IndexNestedLoopJoin(IndexNestedLoopJoin),
    HashAggregate(PhysicalAggregate),
    StreamAggregate(PhysicalAggregate),
    Limit(PhysicalLimit),
    Append(Append),
    ConstTableGet(ConstTableGet),
    Dml(PhysicalDml),
    Sequence(Sequence),
    CteScan(CteScan),
    Sort(Sort),
    Motion(Motion),
    /// Materializes its input so it can be read multiple times.
    Spool,
    PartitionSelector(PartitionSelector),
}

impl PhysicalOp {
    /// Returns the number of inputs this operator expects or `None` if it accepts any number of inputs.
    pub fn arity(&self) -> Option<usize> {
        match self {
            PhysicalOp::TableScan(_) | PhysicalOp::IndexScan(_) | PhysicalOp::ConstTableGet(_) | PhysicalOp::CteScan(_) => {
                Some(0)
            }
            PhysicalOp::HashJoin(_) | PhysicalOp::NestedLoopJoin(_) | PhysicalOp::Sequence(_) => Some(2),
            PhysicalOp::Append(_) => None,
            _ => Some(1),
        }
    }

    /// Whether this operator is an enforcer.
    pub fn is_enforcer(&self) -> bool {
        matches!(
            self,
            PhysicalOp::Sort(_) | PhysicalOp::Motion(_) | PhysicalOp::Spool | PhysicalOp::PartitionSelector(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            PhysicalOp::TableScan(scan) if scan.dynamic => "DynamicTableScan",
            PhysicalOp::TableScan(_) => "TableScan",
            PhysicalOp::IndexScan(scan) if scan.dynamic => "DynamicIndexScan",
            PhysicalOp::IndexScan(_) => "IndexScan",
            PhysicalOp::Filter(_) => "Filter",
            PhysicalOp::ComputeScalar(_) => "ComputeScalar",
            PhysicalOp::HashJoin(_) => "HashJoin",
            PhysicalOp::NestedLoopJoin(_) => "NestedLoopJoin",
            PhysicalOp::IndexNestedLoopJoin(_) => "IndexNestedLoopJoin",
            PhysicalOp::HashAggregate(_) => "HashAggregate",
            PhysicalOp::StreamAggregate(_) => "StreamAggregate",
            PhysicalOp::Limit(_) => "Limit",
            PhysicalOp::Append(_) => "Append",
            PhysicalOp::ConstTableGet(_) => "ConstTableGet",
            PhysicalOp::Dml(_) => "Dml",
            PhysicalOp::Sequence(_) => "Sequence",
            PhysicalOp::CteScan(_) => "CteScan",
            PhysicalOp::Sort(_) => "Sort",
            PhysicalOp::Motion(_) => "Motion",
            PhysicalOp::Spool => "Spool",
            PhysicalOp::PartitionSelector(_) => "PartitionSelector",
        }
    }

    pub fn format<F>(&self, f: &mut F)
    where
        F: OperatorFormatter,
    {
        f.write_name(self.name());
        match self {
            PhysicalOp::TableScan(scan) => {
                f.write_value("", &scan.table);
                if scan.alias != scan.table {
                    f.write_value("alias", &scan.alias);
                }
                f.write_values("cols", &scan.columns);
            }
            PhysicalOp::IndexScan(scan) => {
                f.write_value("", &scan.table);
                f.write_value("index", &scan.index);
                f.write_values("cols", &scan.columns);
                f.write_value("cond", &scan.condition);
            }
            PhysicalOp::Filter(filter) => f.write_value("filter", &filter.filter),
            PhysicalOp::ComputeScalar(compute) => {
                let exprs: Vec<_> = compute.exprs.iter().map(|(id, expr)| format_assignment(*id, expr)).collect();
                f.write_values("cols", &exprs);
            }
            PhysicalOp::HashJoin(join) => {
                f.write_value("type", join.join_type);
                f.write_value("on", &join.condition);
                if !join.partition_scans.is_empty() {
                    let scans: Vec<_> = join.partition_scans.iter().map(|(scan, _)| scan).collect();
                    f.write_values("dpe", &scans);
                }
            }
            PhysicalOp::NestedLoopJoin(join) => {
                f.write_value("type", join.join_type);
                f.write_value("on", &join.condition);
            }
            PhysicalOp::IndexNestedLoopJoin(join) => {
                f.write_value("type", join.join_type);
                f.write_value("table", &join.table);
                f.write_value("index", &join.index);
                f.write_value("on", &join.condition);
            }
            PhysicalOp::HashAggregate(aggr) | PhysicalOp::StreamAggregate(aggr) => {
                if aggr.stage != AggregateStage::Single {
                    f.write_value("stage", aggr.stage);
                }
                f.write_values("group_by", &aggr.group_by);
                let aggrs: Vec<_> = aggr.aggregates.iter().map(|(id, expr)| format_assignment(*id, expr)).collect();
                f.write_values("aggregates", &aggrs);
            }
            PhysicalOp::Limit(limit) => {
                if limit.offset > 0 {
                    f.write_value("offset", limit.offset);
                }
                if let Some(count) = limit.count {
                    f.write_value("count", count);
                }
            }
            PhysicalOp::Append(append) => f.write_values("cols", &append.output),
            PhysicalOp::ConstTableGet(values) => {
                f.write_values("cols", &values.columns);
                f.write_value("rows", values.rows.len());
            }
            PhysicalOp::Dml(dml) => {
                f.write_value("", dml.kind);
                f.write_value("table", &dml.table);
            }
            PhysicalOp::Sequence(sequence) => f.write_value("cte", sequence.cte_id),
            PhysicalOp::CteScan(scan) => {
                f.write_value("cte", scan.cte_id);
                f.write_values("cols", &scan.columns);
            }
            PhysicalOp::Sort(sort) => f.write_values("ord", &sort.ordering.columns),
            PhysicalOp::Motion(motion) => f.write_value("", &motion.kind),
            PhysicalOp::Spool => {}
            PhysicalOp::PartitionSelector(selector) => {
                f.write_value("scan", selector.scan_id);
                if let Some(column) = selector.column {
                    f.write_value("propagate", column);
                }
            }
        }
    }
}

impl Display for PhysicalOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        crate::operators::format::fmt_operator(f, |fmt| self.format(fmt))
    }
}

/// Reads rows of a table. A dynamic table scan reads only the partitions selected by a [PartitionSelector].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableScan {
    pub table: String,
    pub alias: String,
    pub columns: Vec<ColumnId>,
    pub scan_id: ScanId,
    pub dynamic: bool,
    pub distribution: DistributionSpec,
}

/// Reads rows of a table that match the given condition using an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexScan {
    pub table: String,
    pub alias: String,
    pub index: String,
    pub columns: Vec<ColumnId>,
    pub condition: ScalarExpr,
    pub scan_id: ScanId,
    /// Whether this scan reads the partitions of a partitioned table selected at runtime.
    pub dynamic: bool,
    /// The ordering of rows produced by this scan (columns of the index).
    pub ordering: OrderSpec,
    pub distribution: DistributionSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Filter {
    pub filter: ScalarExpr,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComputeScalar {
    pub exprs: Vec<(ColumnId, ScalarExpr)>,
}

/// Builds a hash table from its right input and probes it with the rows of its left input.
/// `left_keys[i] = right_keys[i]` are the equalities of the join condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HashJoin {
    pub join_type: JoinType,
    pub condition: ScalarExpr,
    pub left_keys: Vec<ColumnId>,
    pub right_keys: Vec<ColumnId>,
    /// Dynamic scans of the right input whose partitions are selected by values of
    /// the given key column of the left input (dynamic partition elimination).
    pub partition_scans: Vec<(ScanId, ColumnId)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NestedLoopJoin {
    pub join_type: JoinType,
    pub condition: ScalarExpr,
}

/// For every row of its only input looks up matching rows of the table using an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexNestedLoopJoin {
    pub join_type: JoinType,
    pub table: String,
    pub alias: String,
    pub index: String,
    pub columns: Vec<ColumnId>,
    pub condition: ScalarExpr,
    pub outer_keys: Vec<ColumnId>,
    pub inner_keys: Vec<ColumnId>,
    /// The distribution of the table.
    pub distribution: DistributionSpec,
}

/// Physical aggregate. Used by both the [PhysicalOp::HashAggregate] and the [PhysicalOp::StreamAggregate].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhysicalAggregate {
    pub group_by: Vec<ColumnId>,
    pub aggregates: Vec<(ColumnId, AggregateExpr)>,
    pub stage: AggregateStage,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhysicalLimit {
    pub offset: u64,
    pub count: Option<u64>,
    pub ordering: OrderSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Append {
    pub output: Vec<ColumnId>,
    pub input_columns: Vec<Vec<ColumnId>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstTableGet {
    pub columns: Vec<ColumnId>,
    pub rows: Vec<Vec<ScalarValue>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhysicalDml {
    pub kind: DmlKind,
    pub table: String,
    pub columns: Vec<ColumnId>,
    /// The distribution of rows the table expects from the input.
    pub distribution: DistributionSpec,
}

/// Executes the producer of a common table expression (the first input) and then returns rows of its second input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sequence {
    pub cte_id: CteId,
}

/// Reads rows of a common table expression materialized by the producer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CteScan {
    pub cte_id: CteId,
    pub columns: Vec<ColumnId>,
    pub producer_columns: Vec<ColumnId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sort {
    pub ordering: OrderSpec,
}

/// Moves rows between segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Motion {
    pub kind: MotionKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MotionKind {
    /// Sends all rows to a single node.
    Gather,
    /// Sends all rows to a single node preserving the given ordering.
    GatherMerge(OrderSpec),
    /// Sends every row to every segment.
    Broadcast,
    /// Sends every row to a segment determined by the hash of the given columns.
    Redistribute(Vec<ColumnId>),
    /// Sends every row to a random segment.
    Random,
}

impl Display for MotionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MotionKind::Gather => write!(f, "Gather"),
            MotionKind::GatherMerge(ordering) => write!(f, "GatherMerge ord=[{}]", ordering.columns.iter().join(", ")),
            MotionKind::Broadcast => write!(f, "Broadcast"),
            MotionKind::Redistribute(columns) => write!(f, "Redistribute cols=[{}]", columns.iter().join(", ")),
            MotionKind::Random => write!(f, "Random"),
        }
    }
}

/// Selects partitions of the dynamic scan `scan_id`.
/// A static selector resolves the partitions itself. A propagating selector
/// computes partitions from values of the `column` of its input and passes them to the scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionSelector {
    pub scan_id: ScanId,
    pub column: Option<ColumnId>,
}

impl PartitionSelector {
    pub fn is_propagating(&self) -> bool {
        self.column.is_some()
    }
}
