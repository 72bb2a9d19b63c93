//! Extraction of bindings: expression trees built from a group expression and the expressions
//! of its input groups that match a [pattern](Pattern).
//!
//! Inputs matched by [Pattern::Leaf] and [Pattern::MultiLeaf] are bound as references to memo groups.
//! Inputs matched by [Pattern::Tree] are expanded recursively. Inputs matched by an operator pattern
//! produce one binding per matching expression of the input group, so a group expression can have
//! many bindings. The number of bindings is capped by a limit.

use crate::error::OptimizerError;
use crate::memo::{ExprId, GroupId, Memo, MAX_EXPR_DEPTH};
use crate::operators::Expr;
use crate::rules::pattern::Pattern;

/// Returns bindings of the given pattern to the given group expression.
/// Returns an empty vector if the expression does not match the pattern.
/// At most `limit` bindings are returned.
pub fn bindings(memo: &Memo, expr: ExprId, pattern: &Pattern, limit: usize) -> Result<Vec<Expr>, OptimizerError> {
    if !matches!(pattern, Pattern::Operator { .. }) {
        let message = format!("The root of a pattern must be an operator: {}", pattern);
        return Err(OptimizerError::internal(message));
    }
    let binder = Binder { memo, limit };
    binder.bind_expr(expr, pattern)
}

/// Expands the given group into an expression tree built from the first logical expression
/// of every group. Groups that would make the tree infinite remain group references.
pub fn expand_group(memo: &Memo, group: GroupId) -> Result<Expr, OptimizerError> {
    let binder = Binder { memo, limit: 1 };
    let mut path = Vec::new();
    binder.expand(group, &mut path)
}

struct Binder<'a> {
    memo: &'a Memo,
    limit: usize,
}

impl Binder<'_> {
    fn bind_expr(&self, expr_id: ExprId, pattern: &Pattern) -> Result<Vec<Expr>, OptimizerError> {
        let expr = self.memo.expr(expr_id);
        let op = match expr.logical_op() {
            Some(op) if pattern.matches_root(op) => op,
            _ => return Ok(Vec::new()),
        };
        let input_patterns = match pattern {
            Pattern::Operator { inputs, .. } => inputs,
            _ => return Ok(Vec::new()),
        };

        let mut alternatives = Vec::with_capacity(expr.inputs().len());
        for (i, group) in expr.inputs().iter().enumerate() {
            let group = self.memo.find(*group);
            let input_pattern = match input_patterns.get(i) {
                Some(Pattern::MultiLeaf) => &Pattern::Leaf,
                Some(p) => p,
                None => match input_patterns.last() {
                    Some(Pattern::MultiLeaf) => &Pattern::Leaf,
                    _ => return Ok(Vec::new()),
                },
            };
            let bound = self.bind_input(group, input_pattern)?;
            if bound.is_empty() {
                return Ok(Vec::new());
            }
            alternatives.push(bound);
        }

        let mut combinations: Vec<Vec<Expr>> = vec![Vec::new()];
        for bound in alternatives {
            let mut next = Vec::with_capacity(combinations.len() * bound.len());
            'outer: for prefix in combinations.iter() {
                for input in bound.iter() {
                    if next.len() >= self.limit {
                        log::trace!("Binding limit reached. Expr: {} limit: {}", expr_id, self.limit);
                        break 'outer;
                    }
                    let mut inputs = prefix.clone();
                    inputs.push(input.clone());
                    next.push(inputs);
                }
            }
            combinations = next;
        }

        Ok(combinations.into_iter().map(|inputs| Expr::logical(op.clone(), inputs)).collect())
    }

    fn bind_input(&self, group: GroupId, pattern: &Pattern) -> Result<Vec<Expr>, OptimizerError> {
        match pattern {
            Pattern::Leaf | Pattern::MultiLeaf => Ok(vec![Expr::group(group)]),
            Pattern::Tree => {
                let mut path = Vec::new();
                Ok(vec![self.expand(group, &mut path)?])
            }
            Pattern::Operator { .. } => {
                let mut result = Vec::new();
                for expr in self.memo.group(group).exprs() {
                    if result.len() >= self.limit {
                        break;
                    }
                    result.extend(self.bind_expr(*expr, pattern)?);
                }
                result.truncate(self.limit);
                Ok(result)
            }
        }
    }

    fn expand(&self, group: GroupId, path: &mut Vec<GroupId>) -> Result<Expr, OptimizerError> {
        if path.len() > MAX_EXPR_DEPTH {
            let message = format!("Expression tree is too deep. Max depth: {}", MAX_EXPR_DEPTH);
            return Err(OptimizerError::internal(message));
        }
        let group = self.memo.find(group);
        path.push(group);

        let candidate = self.memo.group(group).exprs().iter().map(|e| self.memo.expr(*e)).find(|e| {
            e.logical_op().is_some() && e.inputs().iter().all(|i| !path.contains(&self.memo.find(*i)))
        });

        let result = match candidate {
            Some(expr) => {
                let mut inputs = Vec::with_capacity(expr.inputs().len());
                for input in expr.inputs() {
                    inputs.push(self.expand(*input, path)?);
                }
                Expr::new(expr.operator().clone(), inputs)
            }
            None => Expr::group(group),
        };

        path.pop();
        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::operators::format::format_expr;
    use crate::operators::relational::logical::{LogicalOp, LogicalOpKind, LogicalSelect};
    use crate::operators::relational::JoinType;
    use crate::operators::scalar::{col, int, ScalarExpr};
    use crate::testing::TestCatalog;

    fn join_pattern() -> Pattern {
        Pattern::operator(
            LogicalOpKind::Join,
            vec![Pattern::operator(LogicalOpKind::Select, vec![Pattern::Leaf]), Pattern::Leaf],
        )
    }

    #[test]
    fn bind_operator_inputs() {
        let catalog = TestCatalog::new();
        let mut memo = catalog.memo();
        let builder = catalog.builder();
        let a = builder.new_builder().get("A", "a").unwrap().select(ScalarExpr::gt(col(1), int(1))).unwrap();
        let b = builder.new_builder().get("B", "b").unwrap();
        let expr = a.join(b, JoinType::Inner, ScalarExpr::eq(col(1), col(4))).unwrap().build().unwrap();

        let group = memo.insert(&expr).unwrap();
        let join = memo.group(group).exprs()[0];

        let result = bindings(&memo, join, &join_pattern(), 10).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(
            format_expr(&result[0]),
            "LogicalJoin type=Inner on=col:1 = col:4\n  LogicalSelect filter=col:1 > 1\n    Group 00\n  Group 02"
        );

        // select(select(a)) is equivalent to select(a) and produces another binding.
        let select_group = memo.expr(join).inputs()[0];
        let scan_group = memo.expr(memo.group(select_group).exprs()[0]).inputs()[0];
        let other = Expr::logical(
            LogicalOp::Select(LogicalSelect {
                filter: ScalarExpr::gt(col(1), int(1)),
            }),
            vec![Expr::logical(
                LogicalOp::Select(LogicalSelect {
                    filter: ScalarExpr::gt(col(1), int(1)),
                }),
                vec![Expr::group(scan_group)],
            )],
        );
        memo.insert_into(select_group, &other).unwrap();

        let result = bindings(&memo, join, &join_pattern(), 10).unwrap();
        assert_eq!(result.len(), 2);

        let result = bindings(&memo, join, &join_pattern(), 1).unwrap();
        assert_eq!(result.len(), 1, "limit");
    }

    #[test]
    fn no_binding_when_input_does_not_match() {
        let catalog = TestCatalog::new();
        let mut memo = catalog.memo();
        let builder = catalog.builder();
        let a = builder.new_builder().get("A", "a").unwrap();
        let b = builder.new_builder().get("B", "b").unwrap();
        let expr = a.join(b, JoinType::Inner, ScalarExpr::eq(col(1), col(4))).unwrap().build().unwrap();

        let group = memo.insert(&expr).unwrap();
        let join = memo.group(group).exprs()[0];
        assert!(bindings(&memo, join, &join_pattern(), 10).unwrap().is_empty());
    }

    #[test]
    fn expand_tree() {
        let catalog = TestCatalog::new();
        let mut memo = catalog.memo();
        let builder = catalog.builder();
        let a = builder.new_builder().get("A", "a").unwrap().select(ScalarExpr::gt(col(1), int(1))).unwrap();
        let b = builder.new_builder().get("B", "b").unwrap();
        let expr = a.join(b, JoinType::Inner, ScalarExpr::eq(col(1), col(4))).unwrap().build().unwrap();
        let group = memo.insert(&expr).unwrap();

        let pattern = Pattern::operator(LogicalOpKind::Join, vec![Pattern::Tree, Pattern::Leaf]);
        let join = memo.group(group).exprs()[0];
        let result = bindings(&memo, join, &pattern, 10).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(
            format_expr(&result[0]),
            "LogicalJoin type=Inner on=col:1 = col:4\n  LogicalSelect filter=col:1 > 1\n    LogicalGet A alias=a cols=[1, 2, 3]\n  Group 02"
        );

        assert_eq!(format_expr(&expand_group(&memo, group).unwrap()), format_expr(&expr));
    }

    #[test]
    fn reject_wildcard_root() {
        let catalog = TestCatalog::new();
        let mut memo = catalog.memo();
        let expr = catalog.builder().get("A", "a").unwrap().build().unwrap();
        let group = memo.insert(&expr).unwrap();
        let get = memo.group(group).exprs()[0];
        assert!(bindings(&memo, get, &Pattern::Leaf, 10).is_err());
    }
}
