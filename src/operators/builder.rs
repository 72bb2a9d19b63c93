//! A builder of logical expression trees.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

use crate::catalog::{CatalogRef, TableRef};
use crate::datatypes::DataType;
use crate::error::OptimizerError;
use crate::meta::{ColumnId, ColumnMetadata, ColumnSet, MetadataRef};
use crate::operators::relational::logical::{
    AggregateStage, ApplyType, DmlKind, LogicalAggregate, LogicalApply, LogicalCteAnchor, LogicalCteConsumer,
    LogicalDml, LogicalGet, LogicalJoin, LogicalLimit, LogicalNAryJoin, LogicalOp, LogicalProject, LogicalSelect,
    LogicalUnionAll, LogicalValues,
};
use crate::operators::relational::{CteId, JoinType, ScanId};
use crate::operators::scalar::{AggregateExpr, ScalarExpr, ScalarValue};
use crate::operators::Expr;
use crate::properties::ordering::OrderSpec;

/// Provides API to build logical expression trees.
///
/// Every method that adds an operator consumes the builder and returns a builder
/// whose current expression is the new operator. Builders created by [ExprBuilder::new_builder]
/// share metadata and identifiers of scans and CTEs with their parent.
#[derive(Clone)]
pub struct ExprBuilder {
    context: Rc<BuilderContext>,
    current: Option<(Expr, Vec<ColumnId>)>,
}

struct BuilderContext {
    catalog: CatalogRef,
    metadata: MetadataRef,
    next_scan_id: Cell<ScanId>,
    next_cte_id: Cell<CteId>,
    ctes: RefCell<HashMap<CteId, Vec<ColumnId>>>,
}

impl ExprBuilder {
    /// Creates a new builder that uses the given catalog and metadata.
    pub fn new(catalog: CatalogRef, metadata: MetadataRef) -> Self {
        ExprBuilder {
            context: Rc::new(BuilderContext {
                catalog,
                metadata,
                next_scan_id: Cell::new(1),
                next_cte_id: Cell::new(1),
                ctes: RefCell::new(HashMap::new()),
            }),
            current: None,
        }
    }

    /// Creates a builder for another expression (e.g. the right side of a join).
    pub fn new_builder(&self) -> ExprBuilder {
        ExprBuilder {
            context: self.context.clone(),
            current: None,
        }
    }

    pub fn metadata(&self) -> &MetadataRef {
        &self.context.metadata
    }

    /// Returns the identifier of the column `name` of the table accessed under the given alias.
    pub fn column(&self, alias: &str, name: &str) -> Result<ColumnId, OptimizerError> {
        self.context
            .metadata
            .find_column(alias, name)
            .ok_or_else(|| OptimizerError::argument(format!("Unknown column: {}.{}", alias, name)))
    }

    /// Returns the output columns of the current expression.
    pub fn output_columns(&self) -> Result<&[ColumnId], OptimizerError> {
        self.current.as_ref().map(|(_, columns)| columns.as_slice()).ok_or_else(no_input)
    }

    /// Adds a scan of all columns of the given table.
    pub fn get(self, table: &str, alias: &str) -> Result<Self, OptimizerError> {
        let table_ref = self.table(table)?;
        let columns: Vec<String> = table_ref.columns().iter().map(|c| c.name().clone()).collect();
        let columns: Vec<&str> = columns.iter().map(|c| c.as_str()).collect();
        self.get_columns(table, alias, &columns)
    }

    /// Adds a scan of the given columns of the given table.
    pub fn get_columns(self, table: &str, alias: &str, columns: &[&str]) -> Result<Self, OptimizerError> {
        if self.current.is_some() {
            return Err(OptimizerError::argument("Adding a scan on top of another operator is not allowed"));
        }
        let table_ref = self.table(table)?;
        let metadata = &self.context.metadata;

        let mut ids = Vec::with_capacity(columns.len());
        for name in columns {
            let column = table_ref.get_column(name).ok_or_else(|| {
                OptimizerError::argument(format!("Column does not exist. Column: {}. Table: {}", name, table))
            })?;
            let column = ColumnMetadata::new_table_column(
                column.name().clone(),
                column.data_type(),
                table.to_string(),
                alias.to_string(),
            );
            ids.push(metadata.add_column(column));
        }

        let partition_column = match table_ref.partition_key() {
            Some(key) => {
                let column = table_ref
                    .get_column(key)
                    .ok_or_else(|| OptimizerError::catalog(format!("Unknown partition key {} of table {}", key, table)))?;
                let column = ColumnMetadata::new_table_column(
                    column.name().clone(),
                    column.data_type(),
                    table.to_string(),
                    alias.to_string(),
                );
                Some(metadata.add_column(column))
            }
            None => None,
        };

        let scan_id = self.context.next_scan_id.get();
        self.context.next_scan_id.set(scan_id + 1);

        let get = LogicalOp::Get(LogicalGet {
            table: table.to_string(),
            alias: alias.to_string(),
            columns: ids.clone(),
            scan_id,
            partition_column,
        });
        Ok(self.with_expr(Expr::logical(get, vec![]), ids))
    }

    /// Adds a filter.
    pub fn select(self, filter: ScalarExpr) -> Result<Self, OptimizerError> {
        let (input, columns) = self.input()?;
        let select = LogicalOp::Select(LogicalSelect { filter });
        Ok(self.with_expr(Expr::logical(select, vec![input]), columns))
    }

    /// Adds a projection. Column references keep their identifiers,
    /// every other expression produces a new column.
    pub fn project(self, exprs: Vec<ScalarExpr>) -> Result<Self, OptimizerError> {
        let (input, _) = self.input()?;
        let mut assignments = Vec::with_capacity(exprs.len());
        for expr in exprs {
            let id = match &expr {
                ScalarExpr::Column(id) => *id,
                _ => {
                    let data_type = self.data_type(&expr)?;
                    self.synthetic_column("?column?", data_type)
                }
            };
            assignments.push((id, expr));
        }
        let columns = assignments.iter().map(|(id, _)| *id).collect();
        let project = LogicalOp::Project(LogicalProject { exprs: assignments });
        Ok(self.with_expr(Expr::logical(project, vec![input]), columns))
    }

    /// Adds a join of the current expression (the left input) and the expression of the given builder.
    pub fn join(self, right: ExprBuilder, join_type: JoinType, condition: ScalarExpr) -> Result<Self, OptimizerError> {
        let (left, mut columns) = self.input()?;
        let (right, right_columns) = right.input()?;
        if !join_type.is_semi_or_anti() {
            columns.extend(right_columns);
        }
        let join = LogicalOp::Join(LogicalJoin { join_type, condition });
        Ok(self.with_expr(Expr::logical(join, vec![left, right]), columns))
    }

    /// Adds an inner join of the current expression and the expressions of the given builders.
    pub fn nary_join(self, others: Vec<ExprBuilder>, condition: ScalarExpr) -> Result<Self, OptimizerError> {
        let (first, mut columns) = self.input()?;
        let mut inputs = vec![first];
        for other in others {
            let (input, input_columns) = other.input()?;
            inputs.push(input);
            columns.extend(input_columns);
        }
        let join = LogicalOp::NAryJoin(LogicalNAryJoin { condition });
        Ok(self.with_expr(Expr::logical(join, inputs), columns))
    }

    /// Adds an apply: the expression of the given builder is evaluated for every row of the current expression.
    pub fn apply(self, right: ExprBuilder, apply_type: ApplyType, condition: ScalarExpr) -> Result<Self, OptimizerError> {
        let (left, mut columns) = self.input()?;
        let (right, right_columns) = right.input()?;
        if !apply_type.join_type().is_semi_or_anti() {
            columns.extend(right_columns);
        }
        let apply = LogicalOp::Apply(LogicalApply { apply_type, condition });
        Ok(self.with_expr(Expr::logical(apply, vec![left, right]), columns))
    }

    /// Adds an aggregate. Every aggregate expression produces a new column.
    pub fn aggregate(self, group_by: Vec<ColumnId>, aggregates: Vec<AggregateExpr>) -> Result<Self, OptimizerError> {
        let (input, input_columns) = self.input()?;
        let input_columns: ColumnSet = input_columns.into_iter().collect();
        if let Some(column) = group_by.iter().find(|c| !input_columns.contains(c)) {
            let message = format!("Aggregate: Grouping column is not produced by the input: {}", column);
            return Err(OptimizerError::argument(message));
        }

        let mut columns = group_by.clone();
        let mut assignments = Vec::with_capacity(aggregates.len());
        for aggr in aggregates {
            let arg_type = match aggr.args.first() {
                Some(arg) => self.data_type(arg)?,
                None => DataType::Int64,
            };
            let id = self.synthetic_column(&aggr.func.to_string(), aggr.func.return_type(arg_type));
            columns.push(id);
            assignments.push((id, aggr));
        }
        let aggregate = LogicalOp::Aggregate(LogicalAggregate {
            group_by,
            aggregates: assignments,
            stage: AggregateStage::Single,
        });
        Ok(self.with_expr(Expr::logical(aggregate, vec![input]), columns))
    }

    /// Adds a limit.
    pub fn limit(self, offset: u64, count: Option<u64>, ordering: OrderSpec) -> Result<Self, OptimizerError> {
        let (input, columns) = self.input()?;
        let output: ColumnSet = columns.iter().copied().collect();
        if !ordering.is_subset_of(&output) {
            let message = format!("Limit: Ordering {} references columns not produced by the input", ordering);
            return Err(OptimizerError::argument(message));
        }
        let limit = LogicalOp::Limit(LogicalLimit { offset, count, ordering });
        Ok(self.with_expr(Expr::logical(limit, vec![input]), columns))
    }

    /// Adds a union all of the current expression and the expressions of the given builders.
    pub fn union_all(self, others: Vec<ExprBuilder>) -> Result<Self, OptimizerError> {
        let (first, first_columns) = self.input()?;
        let mut inputs = vec![first];
        let mut input_columns = vec![first_columns.clone()];
        for other in others {
            let (input, columns) = other.input()?;
            if columns.len() != first_columns.len() {
                let message = format!(
                    "UnionAll: Inputs produce different number of columns: {} and {}",
                    first_columns.len(),
                    columns.len()
                );
                return Err(OptimizerError::argument(message));
            }
            inputs.push(input);
            input_columns.push(columns);
        }

        let mut output = Vec::with_capacity(first_columns.len());
        for column in first_columns.iter() {
            let (name, data_type) = {
                let column = self.context.metadata.get_column(*column)?;
                (column.name().to_string(), column.data_type())
            };
            output.push(self.synthetic_column(&name, data_type));
        }
        let union = LogicalOp::UnionAll(LogicalUnionAll {
            output: output.clone(),
            input_columns,
        });
        Ok(self.with_expr(Expr::logical(union, inputs), output))
    }

    /// Adds a list of constant rows.
    pub fn values(self, rows: Vec<Vec<ScalarValue>>) -> Result<Self, OptimizerError> {
        if self.current.is_some() {
            return Err(OptimizerError::argument("Adding values on top of another operator is not allowed"));
        }
        let num_columns = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != num_columns) {
            return Err(OptimizerError::argument("Values: All rows must have the same number of values"));
        }
        let columns: Vec<ColumnId> = (0..num_columns)
            .map(|i| {
                let data_type = rows.iter().map(|r| r[i].data_type()).find(|t| *t != DataType::Null);
                self.synthetic_column(&format!("column{}", i + 1), data_type.unwrap_or(DataType::Null))
            })
            .collect();
        let values = LogicalOp::Values(LogicalValues {
            columns: columns.clone(),
            rows,
        });
        Ok(self.with_expr(Expr::logical(values, vec![]), columns))
    }

    /// Adds a DML operator that writes the output of the current expression into the given table.
    pub fn dml(self, kind: DmlKind, table: &str) -> Result<Self, OptimizerError> {
        let (input, columns) = self.input()?;
        let table_ref = self.table(table)?;
        if kind == DmlKind::Insert && columns.len() != table_ref.columns().len() {
            let message = format!(
                "Dml: Expected {} columns but the input produces {}. Table: {}",
                table_ref.columns().len(),
                columns.len(),
                table
            );
            return Err(OptimizerError::argument(message));
        }
        let dml = LogicalOp::Dml(LogicalDml {
            kind,
            table: table.to_string(),
            columns,
        });
        Ok(self.with_expr(Expr::logical(dml, vec![input]), vec![]))
    }

    /// Registers the current expression as a producer of a new common table expression.
    pub fn register_cte(&self) -> Result<CteId, OptimizerError> {
        let columns = self.output_columns()?.to_vec();
        let cte_id = self.context.next_cte_id.get();
        self.context.next_cte_id.set(cte_id + 1);
        self.context.ctes.borrow_mut().insert(cte_id, columns);
        Ok(cte_id)
    }

    /// Adds a consumer of the given common table expression. The consumer produces new columns.
    pub fn cte_consumer(self, cte_id: CteId) -> Result<Self, OptimizerError> {
        if self.current.is_some() {
            return Err(OptimizerError::argument("Adding a CTE consumer on top of another operator is not allowed"));
        }
        let producer_columns = self
            .context
            .ctes
            .borrow()
            .get(&cte_id)
            .cloned()
            .ok_or_else(|| OptimizerError::argument(format!("Unknown CTE: {}", cte_id)))?;

        let mut columns = Vec::with_capacity(producer_columns.len());
        for column in producer_columns.iter() {
            let (name, data_type) = {
                let column = self.context.metadata.get_column(*column)?;
                (column.name().to_string(), column.data_type())
            };
            columns.push(self.synthetic_column(&name, data_type));
        }
        let consumer = LogicalOp::CteConsumer(LogicalCteConsumer {
            cte_id,
            columns: columns.clone(),
            producer_columns,
        });
        Ok(self.with_expr(Expr::logical(consumer, vec![]), columns))
    }

    /// Adds an anchor of the given CTE: the current expression is the producer and
    /// the expression of the given builder consumes it.
    pub fn cte_anchor(self, cte_id: CteId, body: ExprBuilder) -> Result<Self, OptimizerError> {
        let (producer, _) = self.input()?;
        let (body, columns) = body.input()?;
        let anchor = LogicalOp::CteAnchor(LogicalCteAnchor { cte_id });
        Ok(self.with_expr(Expr::logical(anchor, vec![producer, body]), columns))
    }

    /// Returns the expression built by this builder.
    pub fn build(self) -> Result<Expr, OptimizerError> {
        self.current.map(|(expr, _)| expr).ok_or_else(no_input)
    }

    fn input(&self) -> Result<(Expr, Vec<ColumnId>), OptimizerError> {
        self.current.clone().ok_or_else(no_input)
    }

    fn with_expr(self, expr: Expr, columns: Vec<ColumnId>) -> Self {
        ExprBuilder {
            context: self.context,
            current: Some((expr, columns)),
        }
    }

    fn table(&self, table: &str) -> Result<TableRef, OptimizerError> {
        self.context
            .catalog
            .get_table(table)
            .ok_or_else(|| OptimizerError::catalog(format!("Table does not exist. Table: {}", table)))
    }

    fn synthetic_column(&self, name: &str, data_type: DataType) -> ColumnId {
        self.context.metadata.add_column(ColumnMetadata::new_synthetic_column(name.to_string(), data_type))
    }

    fn data_type(&self, expr: &ScalarExpr) -> Result<DataType, OptimizerError> {
        let data_type = match expr {
            ScalarExpr::Column(id) => self.context.metadata.get_column(*id)?.data_type(),
            ScalarExpr::Scalar(value) => value.data_type(),
            ScalarExpr::BinaryExpr { op, .. } => op.return_type(),
            ScalarExpr::Not(_) | ScalarExpr::IsNull(_) => DataType::Bool,
            ScalarExpr::Cast { data_type, .. } => *data_type,
            ScalarExpr::Func { args, .. } => match args.first() {
                Some(arg) => self.data_type(arg)?,
                None => DataType::Null,
            },
        };
        Ok(data_type)
    }
}

fn no_input() -> OptimizerError {
    OptimizerError::argument("No input operator")
}

impl Debug for ExprBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExprBuilder").field("current", &self.current).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::operators::format::format_expr;
    use crate::operators::scalar::{col, int, AggregateFunction};
    use crate::testing::TestCatalog;

    #[test]
    fn build_join() {
        let catalog = TestCatalog::new();
        let builder = catalog.builder();

        let a = builder.new_builder().get("A", "a").unwrap();
        let b = builder.new_builder().get("B", "b").unwrap();
        let a1 = builder.column("a", "a1").unwrap();
        let b1 = builder.column("b", "b1").unwrap();

        let expr = a
            .join(b, JoinType::Inner, ScalarExpr::eq(col(a1), col(b1)))
            .unwrap()
            .select(ScalarExpr::binary(col(a1), crate::operators::scalar::BinaryOp::Gt, int(10)))
            .unwrap()
            .build()
            .unwrap();

        let expected = r#"
LogicalSelect filter=col:1 > 10
  LogicalJoin type=Inner on=col:1 = col:4
    LogicalGet A alias=a cols=[1, 2, 3]
    LogicalGet B alias=b cols=[4, 5, 6]
"#;
        assert_eq!(format_expr(&expr), expected.trim());
    }

    #[test]
    fn aggregate_creates_new_columns() {
        let catalog = TestCatalog::new();
        let builder = catalog.builder().get("A", "a").unwrap();
        let a1 = builder.column("a", "a1").unwrap();
        let a2 = builder.column("a", "a2").unwrap();

        let builder = builder
            .aggregate(vec![a1], vec![AggregateExpr::new(AggregateFunction::Count, vec![col(a2)], false)])
            .unwrap();
        let columns = builder.output_columns().unwrap().to_vec();
        assert_eq!(columns.len(), 2);
        assert_eq!(builder.metadata().get_column(columns[1]).unwrap().data_type(), DataType::Int64);
    }

    #[test]
    fn reject_unknown_grouping_column() {
        let catalog = TestCatalog::new();
        let result = catalog.builder().get("A", "a").unwrap().aggregate(vec![100], vec![]);
        assert!(matches!(result, Err(OptimizerError::Argument(_))), "{:?}", result);
    }

    #[test]
    fn reject_unknown_table() {
        let catalog = TestCatalog::new();
        let result = catalog.builder().get("X", "x");
        assert!(matches!(result, Err(OptimizerError::Catalog(_))), "{:?}", result);
    }

    #[test]
    fn cte_consumer_produces_new_columns() {
        let catalog = TestCatalog::new();
        let builder = catalog.builder();
        let producer = builder.new_builder().get_columns("A", "a", &["a1"]).unwrap();
        let cte_id = producer.register_cte().unwrap();

        let consumer = builder.new_builder().cte_consumer(cte_id).unwrap();
        let consumer_columns = consumer.output_columns().unwrap().to_vec();
        assert_ne!(consumer_columns, producer.output_columns().unwrap().to_vec());

        let expr = producer.cte_anchor(cte_id, consumer).unwrap().build().unwrap();
        assert_eq!(expr.inputs().len(), 2);
    }
}
