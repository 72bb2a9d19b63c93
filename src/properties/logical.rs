//! Logical properties. Logical properties are identical for all expressions of a memo group.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{Display, Formatter};

use itertools::Itertools;

use crate::catalog::CatalogRef;
use crate::error::OptimizerError;
use crate::meta::{ColumnId, ColumnSet, MetadataRef};
use crate::operators::relational::logical::{
    AggregateStage, LogicalAggregate, LogicalCteConsumer, LogicalGet, LogicalOp, LogicalProject, LogicalUnionAll,
    LogicalValues,
};
use crate::operators::relational::{JoinType, ScanId};
use crate::operators::scalar::{AggregateExpr, ScalarExpr};

/// The maximum number of rows an expression can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaxCardinality {
    Bounded(u64),
    Unbounded,
}

impl MaxCardinality {
    /// Returns `true` if an expression produces at most one row.
    pub fn at_most_one(&self) -> bool {
        matches!(self, MaxCardinality::Bounded(n) if *n <= 1)
    }

    pub fn multiply(self, other: MaxCardinality) -> MaxCardinality {
        match (self, other) {
            (MaxCardinality::Bounded(0), _) | (_, MaxCardinality::Bounded(0)) => MaxCardinality::Bounded(0),
            (MaxCardinality::Bounded(l), MaxCardinality::Bounded(r)) => {
                l.checked_mul(r).map(MaxCardinality::Bounded).unwrap_or(MaxCardinality::Unbounded)
            }
            _ => MaxCardinality::Unbounded,
        }
    }

    pub fn add(self, other: MaxCardinality) -> MaxCardinality {
        match (self, other) {
            (MaxCardinality::Bounded(l), MaxCardinality::Bounded(r)) => {
                l.checked_add(r).map(MaxCardinality::Bounded).unwrap_or(MaxCardinality::Unbounded)
            }
            _ => MaxCardinality::Unbounded,
        }
    }

    pub fn min(self, other: MaxCardinality) -> MaxCardinality {
        match (self, other) {
            (MaxCardinality::Bounded(l), MaxCardinality::Bounded(r)) => MaxCardinality::Bounded(l.min(r)),
            (MaxCardinality::Bounded(n), MaxCardinality::Unbounded)
            | (MaxCardinality::Unbounded, MaxCardinality::Bounded(n)) => MaxCardinality::Bounded(n),
            _ => MaxCardinality::Unbounded,
        }
    }

    fn at_least_one(self) -> MaxCardinality {
        match self {
            MaxCardinality::Bounded(0) => MaxCardinality::Bounded(1),
            _ => self,
        }
    }
}

impl Display for MaxCardinality {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MaxCardinality::Bounded(n) => write!(f, "{}", n),
            MaxCardinality::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// Sets of columns that are known to have equal values in every row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EquivalenceClasses {
    classes: Vec<ColumnSet>,
}

impl EquivalenceClasses {
    /// Builds equivalence classes from the given pairs of equal columns.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (ColumnId, ColumnId)>,
    {
        let mut classes: Vec<ColumnSet> = Vec::new();
        for (l, r) in pairs {
            if l == r {
                continue;
            }
            let left = classes.iter().position(|c| c.contains(&l));
            let right = classes.iter().position(|c| c.contains(&r));
            match (left, right) {
                (Some(i), Some(j)) if i == j => {}
                (Some(i), Some(j)) => {
                    let other = classes.remove(i.max(j));
                    classes[i.min(j)].extend(other);
                }
                (Some(i), None) => {
                    classes[i].insert(r);
                }
                (None, Some(j)) => {
                    classes[j].insert(l);
                }
                (None, None) => classes.push(vec![l, r].into_iter().collect()),
            }
        }
        classes.sort();
        EquivalenceClasses { classes }
    }

    /// Returns `true` if the given columns are known to be equal. A column is always equivalent to itself.
    pub fn are_equivalent(&self, l: ColumnId, r: ColumnId) -> bool {
        l == r || self.classes.iter().any(|c| c.contains(&l) && c.contains(&r))
    }

    pub fn classes(&self) -> &[ColumnSet] {
        &self.classes
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Properties that are identical across all expressions within a memo group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalProperties {
    /// Columns produced by an expression.
    pub output_columns: ColumnSet,
    /// Output columns that can not contain `NULL`s.
    pub not_null: ColumnSet,
    /// Minimal sets of columns that uniquely identify a row.
    /// An expression that produces at most one row has the empty key.
    pub keys: BTreeSet<ColumnSet>,
    /// Output columns known to have equal values.
    pub equivalence_classes: EquivalenceClasses,
    pub max_cardinality: MaxCardinality,
    /// Columns referenced by an expression that are not produced by its inputs (correlated columns).
    pub outer_refs: ColumnSet,
    /// Predicates (in normal form) that hold for every row produced by an expression.
    pub constraint: BTreeSet<ScalarExpr>,
    /// Aliases of the tables accessed by an expression.
    pub relations: BTreeSet<String>,
    /// Partitioned tables read by an expression (scan id -> the column of the partition key).
    pub partition_consumers: BTreeMap<ScanId, ColumnId>,
}

impl LogicalProperties {
    /// Logical properties of an expression that produces no rows and no columns.
    pub fn empty() -> Self {
        LogicalProperties {
            output_columns: ColumnSet::new(),
            not_null: ColumnSet::new(),
            keys: BTreeSet::new(),
            equivalence_classes: EquivalenceClasses::default(),
            max_cardinality: MaxCardinality::Bounded(0),
            outer_refs: ColumnSet::new(),
            constraint: BTreeSet::new(),
            relations: BTreeSet::new(),
            partition_consumers: BTreeMap::new(),
        }
    }

    /// Returns `true` if an expression references columns that are not produced by its inputs.
    pub fn has_outer_refs(&self) -> bool {
        !self.outer_refs.is_empty()
    }
}

impl Display for LogicalProperties {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "cols=[{}]", self.output_columns.iter().join(", "))?;
        if !self.not_null.is_empty() {
            write!(f, " not_null=[{}]", self.not_null.iter().join(", "))?;
        }
        if !self.keys.is_empty() {
            let keys = self.keys.iter().map(|k| format!("[{}]", k.iter().join(", "))).join(", ");
            write!(f, " keys=[{}]", keys)?;
        }
        if !self.outer_refs.is_empty() {
            write!(f, " outer_refs=[{}]", self.outer_refs.iter().join(", "))?;
        }
        write!(f, " max_card={}", self.max_cardinality)
    }
}

/// Derives logical properties of logical operators.
#[derive(Debug)]
pub struct LogicalPropertiesBuilder {
    catalog: CatalogRef,
    metadata: MetadataRef,
}

impl LogicalPropertiesBuilder {
    pub fn new(catalog: CatalogRef, metadata: MetadataRef) -> Self {
        LogicalPropertiesBuilder { catalog, metadata }
    }

    /// Derives logical properties of the given operator from logical properties of its inputs.
    /// `cte_producer` must contain properties of the producer when the operator is a CTE consumer.
    pub fn build(
        &self,
        op: &LogicalOp,
        inputs: &[&LogicalProperties],
        cte_producer: Option<&LogicalProperties>,
    ) -> Result<LogicalProperties, OptimizerError> {
        match op.arity() {
            Some(n) if n != inputs.len() => {
                let message = format!("{}: Unexpected number of inputs. Expected {} but got {}", op.name(), n, inputs.len());
                return Err(OptimizerError::argument(message));
            }
            None if inputs.is_empty() => {
                return Err(OptimizerError::argument(format!("{}: No inputs", op.name())));
            }
            _ => {}
        }

        let props = match op {
            LogicalOp::Get(get) => self.build_get(get)?,
            LogicalOp::Select(select) => {
                let input = inputs[0];
                let mut props = input.clone();
                props.not_null.extend(select.filter.null_rejecting_columns());
                add_conjuncts(&mut props.constraint, &select.filter);
                props.outer_refs.extend(select.filter.columns().difference(&input.output_columns));
                props
            }
            LogicalOp::Project(project) => build_project(project, inputs[0]),
            LogicalOp::Join(join) => build_join(join.join_type, &join.condition, inputs[0], inputs[1]),
            LogicalOp::NAryJoin(join) => {
                let mut props = inputs[0].clone();
                for input in &inputs[1..] {
                    props = build_join(JoinType::Inner, &ScalarExpr::true_literal(), &props, input);
                }
                let outer_refs = join.condition.columns().difference(&props.output_columns).copied().collect::<Vec<_>>();
                props.outer_refs.extend(outer_refs);
                props.not_null.extend(join.condition.null_rejecting_columns());
                add_conjuncts(&mut props.constraint, &join.condition);
                props
            }
            LogicalOp::Aggregate(aggregate) => build_aggregate(aggregate, inputs[0]),
            LogicalOp::Limit(limit) => {
                let input = inputs[0];
                let mut props = input.clone();
                if let Some(count) = limit.count {
                    props.max_cardinality = props.max_cardinality.min(MaxCardinality::Bounded(count));
                }
                props.outer_refs.extend(limit.ordering.column_set().difference(&input.output_columns));
                props
            }
            LogicalOp::UnionAll(union) => build_union_all(union, inputs)?,
            LogicalOp::Values(values) => build_values(values)?,
            LogicalOp::Dml(_) => {
                let input = inputs[0];
                LogicalProperties {
                    max_cardinality: MaxCardinality::Unbounded,
                    outer_refs: input.outer_refs.clone(),
                    relations: input.relations.clone(),
                    partition_consumers: input.partition_consumers.clone(),
                    ..LogicalProperties::empty()
                }
            }
            LogicalOp::Apply(apply) => build_join(apply.apply_type.join_type(), &apply.condition, inputs[0], inputs[1]),
            LogicalOp::CteAnchor(_) => {
                let producer = inputs[0];
                let mut props = inputs[1].clone();
                props.outer_refs.extend(producer.outer_refs.iter().copied());
                props.relations.extend(producer.relations.iter().cloned());
                props
            }
            LogicalOp::CteConsumer(consumer) => match cte_producer {
                Some(producer) => build_cte_consumer(consumer, producer)?,
                None => {
                    let message = format!("CTE consumer outside of its anchor. CTE: {}", consumer.cte_id);
                    return Err(OptimizerError::argument(message));
                }
            },
        };
        Ok(finish(props))
    }

    fn build_get(&self, get: &LogicalGet) -> Result<LogicalProperties, OptimizerError> {
        let table = self
            .catalog
            .get_table(&get.table)
            .ok_or_else(|| OptimizerError::catalog(format!("Table does not exist. Table: {}", get.table)))?;

        let mut not_null = ColumnSet::new();
        let mut columns_by_name = HashMap::new();
        for id in get.columns.iter().copied() {
            let column = self.metadata.get_column(id)?;
            let table_column = table.get_column(column.name()).ok_or_else(|| {
                OptimizerError::catalog(format!("Column does not exist. Table: {} column: {}", get.table, column.name()))
            })?;
            if !table_column.nullable() {
                not_null.insert(id);
            }
            columns_by_name.insert(column.name().to_string(), id);
        }

        let mut keys = BTreeSet::new();
        if !table.primary_key().is_empty() {
            let key: Option<ColumnSet> = table.primary_key().iter().map(|c| columns_by_name.get(c).copied()).collect();
            if let Some(key) = key {
                keys.insert(key);
            }
        }

        Ok(LogicalProperties {
            output_columns: get.columns.iter().copied().collect(),
            not_null,
            keys,
            max_cardinality: MaxCardinality::Unbounded,
            relations: std::iter::once(get.alias.clone()).collect(),
            partition_consumers: get.partition_column.map(|c| (get.scan_id, c)).into_iter().collect(),
            ..LogicalProperties::empty()
        })
    }
}

fn build_project(project: &LogicalProject, input: &LogicalProperties) -> LogicalProperties {
    let mut mapping = HashMap::new();
    for (id, expr) in project.exprs.iter() {
        if let ScalarExpr::Column(column) = expr {
            if id == column {
                mapping.insert(*column, *id);
            } else {
                mapping.entry(*column).or_insert(*id);
            }
        }
    }

    let not_null = project
        .exprs
        .iter()
        .filter(|(_, expr)| match expr {
            ScalarExpr::Column(column) => input.not_null.contains(column),
            ScalarExpr::Scalar(value) => !value.is_null(),
            _ => false,
        })
        .map(|(id, _)| *id)
        .collect();

    let keys = input
        .keys
        .iter()
        .filter_map(|key| key.iter().map(|c| mapping.get(c).copied()).collect::<Option<ColumnSet>>())
        .collect();

    let constraint = input
        .constraint
        .iter()
        .filter(|c| c.columns().iter().all(|col| mapping.contains_key(col)))
        .map(|c| c.remap_columns(&mapping).normalize())
        .collect();

    let mut outer_refs = input.outer_refs.clone();
    for (_, expr) in project.exprs.iter() {
        outer_refs.extend(expr.columns().difference(&input.output_columns));
    }

    LogicalProperties {
        output_columns: project.exprs.iter().map(|(id, _)| *id).collect(),
        not_null,
        keys,
        equivalence_classes: EquivalenceClasses::default(),
        max_cardinality: input.max_cardinality,
        outer_refs,
        constraint,
        relations: input.relations.clone(),
        partition_consumers: input.partition_consumers.clone(),
    }
}

fn build_join(
    join_type: JoinType,
    condition: &ScalarExpr,
    left: &LogicalProperties,
    right: &LogicalProperties,
) -> LogicalProperties {
    let all_columns: ColumnSet = left.output_columns.union(&right.output_columns).copied().collect();
    let mut outer_refs: ColumnSet = left.outer_refs.union(&right.outer_refs).copied().collect();
    outer_refs.extend(condition.columns());
    let outer_refs = outer_refs.difference(&all_columns).copied().collect();

    let relations = left.relations.union(&right.relations).cloned().collect();
    let mut partition_consumers = left.partition_consumers.clone();
    partition_consumers.extend(right.partition_consumers.iter().map(|(k, v)| (*k, *v)));

    let mut props = match join_type {
        JoinType::Inner => {
            let mut not_null: ColumnSet = left.not_null.union(&right.not_null).copied().collect();
            not_null.extend(condition.null_rejecting_columns());
            let mut constraint: BTreeSet<ScalarExpr> = left.constraint.union(&right.constraint).cloned().collect();
            add_conjuncts(&mut constraint, condition);
            LogicalProperties {
                output_columns: all_columns,
                not_null,
                keys: combine_keys(&left.keys, &right.keys),
                max_cardinality: left.max_cardinality.multiply(right.max_cardinality),
                constraint,
                ..LogicalProperties::empty()
            }
        }
        JoinType::LeftOuter | JoinType::RightOuter => {
            let (preserved, nullable) = if join_type == JoinType::LeftOuter { (left, right) } else { (right, left) };
            LogicalProperties {
                output_columns: all_columns,
                not_null: preserved.not_null.clone(),
                keys: combine_keys(&left.keys, &right.keys),
                max_cardinality: preserved.max_cardinality.multiply(nullable.max_cardinality.at_least_one()),
                constraint: preserved.constraint.clone(),
                ..LogicalProperties::empty()
            }
        }
        JoinType::LeftSemi => {
            let mut not_null = left.not_null.clone();
            not_null.extend(condition.null_rejecting_columns());
            let mut constraint = left.constraint.clone();
            add_conjuncts(&mut constraint, condition);
            LogicalProperties {
                output_columns: left.output_columns.clone(),
                not_null,
                keys: left.keys.clone(),
                max_cardinality: left.max_cardinality,
                constraint,
                ..LogicalProperties::empty()
            }
        }
        JoinType::LeftAntiSemi | JoinType::LeftAntiSemiNotIn => LogicalProperties {
            output_columns: left.output_columns.clone(),
            not_null: left.not_null.clone(),
            keys: left.keys.clone(),
            max_cardinality: left.max_cardinality,
            constraint: left.constraint.clone(),
            ..LogicalProperties::empty()
        },
    };
    props.outer_refs = outer_refs;
    props.relations = relations;
    props.partition_consumers = partition_consumers;
    props
}

fn build_aggregate(aggregate: &LogicalAggregate, input: &LogicalProperties) -> LogicalProperties {
    let group_by: ColumnSet = aggregate.group_by.iter().copied().collect();

    let mut output_columns = group_by.clone();
    output_columns.extend(aggregate.aggregates.iter().map(|(id, _)| *id));

    let mut not_null: ColumnSet = group_by.intersection(&input.not_null).copied().collect();
    // A global aggregate of non-null partial results (e.g. sum of local counts) is not null as well.
    let merges_not_null = |a: &AggregateExpr| {
        let columns = a.columns();
        aggregate.stage == AggregateStage::Global && !columns.is_empty() && columns.is_subset(&input.not_null)
    };
    not_null.extend(
        aggregate
            .aggregates
            .iter()
            .filter(|(_, a)| a.func.is_not_null() || merges_not_null(a))
            .map(|(id, _)| *id),
    );

    // Every key of the input that consists of grouping columns is also a key of the output.
    let mut keys: BTreeSet<ColumnSet> = input.keys.iter().filter(|k| k.is_subset(&group_by)).cloned().collect();
    if aggregate.stage != AggregateStage::Local {
        keys.insert(group_by.clone());
    }

    let max_cardinality = match aggregate.stage {
        AggregateStage::Single | AggregateStage::Global if group_by.is_empty() => MaxCardinality::Bounded(1),
        _ => input.max_cardinality,
    };

    let mut outer_refs = input.outer_refs.clone();
    outer_refs.extend(group_by.difference(&input.output_columns));
    for (_, aggr) in aggregate.aggregates.iter() {
        outer_refs.extend(aggr.columns().difference(&input.output_columns));
    }

    LogicalProperties {
        output_columns,
        not_null,
        keys,
        equivalence_classes: EquivalenceClasses::default(),
        max_cardinality,
        outer_refs,
        constraint: input.constraint.clone(),
        relations: input.relations.clone(),
        partition_consumers: input.partition_consumers.clone(),
    }
}

fn build_union_all(union: &LogicalUnionAll, inputs: &[&LogicalProperties]) -> Result<LogicalProperties, OptimizerError> {
    if union.input_columns.len() != inputs.len() {
        let message = format!(
            "UnionAll: Number of column mappings does not match the number of inputs. Expected {} but got {}",
            inputs.len(),
            union.input_columns.len()
        );
        return Err(OptimizerError::argument(message));
    }
    if let Some(columns) = union.input_columns.iter().find(|c| c.len() != union.output.len()) {
        let message = format!("UnionAll: Unexpected number of input columns: {:?}. Output: {:?}", columns, union.output);
        return Err(OptimizerError::argument(message));
    }

    let not_null = union
        .output
        .iter()
        .enumerate()
        .filter(|(i, _)| inputs.iter().zip(union.input_columns.iter()).all(|(input, cols)| input.not_null.contains(&cols[*i])))
        .map(|(_, c)| *c)
        .collect();

    let mut props = LogicalProperties {
        output_columns: union.output.iter().copied().collect(),
        not_null,
        ..LogicalProperties::empty()
    };
    for input in inputs {
        props.max_cardinality = props.max_cardinality.add(input.max_cardinality);
        props.outer_refs.extend(input.outer_refs.iter().copied());
        props.relations.extend(input.relations.iter().cloned());
        props.partition_consumers.extend(input.partition_consumers.iter().map(|(k, v)| (*k, *v)));
    }
    Ok(props)
}

fn build_values(values: &LogicalValues) -> Result<LogicalProperties, OptimizerError> {
    if let Some(row) = values.rows.iter().find(|r| r.len() != values.columns.len()) {
        let message = format!("Values: Unexpected number of values in a row: {:?}. Columns: {:?}", row, values.columns);
        return Err(OptimizerError::argument(message));
    }
    let not_null = values
        .columns
        .iter()
        .enumerate()
        .filter(|(i, _)| values.rows.iter().all(|r| !r[*i].is_null()))
        .map(|(_, c)| *c)
        .collect();

    Ok(LogicalProperties {
        output_columns: values.columns.iter().copied().collect(),
        not_null,
        max_cardinality: MaxCardinality::Bounded(values.rows.len() as u64),
        ..LogicalProperties::empty()
    })
}

fn build_cte_consumer(
    consumer: &LogicalCteConsumer,
    producer: &LogicalProperties,
) -> Result<LogicalProperties, OptimizerError> {
    if consumer.columns.len() != consumer.producer_columns.len() {
        let message = format!(
            "CTE consumer: Number of columns does not match the number of producer columns. CTE: {}",
            consumer.cte_id
        );
        return Err(OptimizerError::argument(message));
    }
    let mapping: HashMap<ColumnId, ColumnId> =
        consumer.producer_columns.iter().copied().zip(consumer.columns.iter().copied()).collect();
    let map_set = |columns: &ColumnSet| -> Option<ColumnSet> { columns.iter().map(|c| mapping.get(c).copied()).collect() };

    Ok(LogicalProperties {
        output_columns: consumer.columns.iter().copied().collect(),
        not_null: producer.not_null.iter().filter_map(|c| mapping.get(c).copied()).collect(),
        keys: producer.keys.iter().filter_map(map_set).collect(),
        max_cardinality: producer.max_cardinality,
        constraint: producer
            .constraint
            .iter()
            .filter(|c| c.columns().iter().all(|col| mapping.contains_key(col)))
            .map(|c| c.remap_columns(&mapping).normalize())
            .collect(),
        relations: producer.relations.clone(),
        ..LogicalProperties::empty()
    })
}

fn add_conjuncts(constraint: &mut BTreeSet<ScalarExpr>, expr: &ScalarExpr) {
    constraint.extend(expr.split_conjunction().iter().map(|c| c.normalize()));
}

fn combine_keys(left: &BTreeSet<ColumnSet>, right: &BTreeSet<ColumnSet>) -> BTreeSet<ColumnSet> {
    left.iter()
        .cartesian_product(right.iter())
        .map(|(l, r)| l.union(r).copied().collect())
        .collect()
}

fn minimize_keys(keys: &BTreeSet<ColumnSet>) -> BTreeSet<ColumnSet> {
    keys.iter()
        .filter(|key| !keys.iter().any(|other| other != *key && other.is_subset(key)))
        .cloned()
        .collect()
}

/// Restricts properties to the output columns and computes derived parts of logical properties.
fn finish(mut props: LogicalProperties) -> LogicalProperties {
    let output = &props.output_columns;
    props.not_null = props.not_null.intersection(output).copied().collect();
    props.outer_refs = props.outer_refs.difference(output).copied().collect();
    props.constraint.retain(|c| c.columns().is_subset(output));

    let keys: BTreeSet<ColumnSet> = if props.max_cardinality.at_most_one() {
        std::iter::once(ColumnSet::new()).collect()
    } else {
        props.keys.iter().filter(|k| k.is_subset(output)).cloned().collect()
    };
    props.keys = minimize_keys(&keys);
    props.equivalence_classes =
        EquivalenceClasses::from_pairs(props.constraint.iter().filter_map(|c| c.as_column_equality()));
    props
}
