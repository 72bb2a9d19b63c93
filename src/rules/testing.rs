use crate::config::OptimizerConfig;
use crate::error::OptimizerError;
use crate::hints::PlanHints;
use crate::memo::{ExprId, GroupId, Memo};
use crate::operators::format::format_expr;
use crate::operators::Expr;
use crate::rules::binding::bindings;
use crate::rules::{Promise, Xform, XformContext};
use crate::testing::TestCatalog;

/// Expects that the given xform produces the expected expressions when it is applied
/// to the given expression. See [RuleTester::apply].
pub fn expect_apply<T>(xform: T, catalog: &TestCatalog, expr: &Expr, expected: &[&str])
where
    T: Xform + 'static,
{
    let mut tester = RuleTester::new(xform, catalog);
    tester.apply(expr, expected);
}

/// Expects that the given xform is not applicable to the given expression. See [RuleTester::no_match].
pub fn expect_no_match<T>(xform: T, catalog: &TestCatalog, expr: &Expr)
where
    T: Xform + 'static,
{
    let mut tester = RuleTester::new(xform, catalog);
    tester.no_match(expr);
}

/// Applies a single [xform](Xform) to the root expression of a memo.
pub struct RuleTester<'a> {
    xform: Box<dyn Xform>,
    catalog: &'a TestCatalog,
    memo: Memo,
    config: OptimizerConfig,
    hints: PlanHints,
}

impl<'a> RuleTester<'a> {
    pub fn new<T>(xform: T, catalog: &'a TestCatalog) -> Self
    where
        T: Xform + 'static,
    {
        RuleTester {
            xform: Box::new(xform),
            catalog,
            memo: catalog.memo(),
            config: OptimizerConfig::default(),
            hints: PlanHints::new(),
        }
    }

    pub fn with_config(mut self, config: OptimizerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_hints(mut self, hints: PlanHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn memo(&self) -> &Memo {
        &self.memo
    }

    /// Inserts the given expression into the memo, applies the xform to the root expression
    /// of the expression's group and compares the produced expressions with the expected ones.
    /// The produced expressions are then added to the group.
    pub fn apply(&mut self, expr: &Expr, expected: &[&str]) {
        let (group, expr_id) = self.insert(expr);
        let result = match self.transform(group, expr_id) {
            Ok(Some(result)) => result,
            Ok(None) => panic!("Xform is not applicable: {:?}", self.xform),
            Err(e) => panic!("Failed to apply an xform. Xform: {:?}. Error: {}", self.xform, e),
        };

        let actual: Vec<String> = result.iter().map(format_expr).collect();
        let expected: Vec<String> = expected.iter().map(|e| e.trim().to_string()).collect();
        assert_eq!(actual, expected, "xform: {:?}", self.xform);

        for new_expr in result.iter() {
            if let Err(e) = self.memo.insert_into(group, new_expr) {
                panic!("Failed to add a result of an xform to the memo: {}\n{}", e, format_expr(new_expr));
            }
        }
    }

    /// Expects that the xform has `None` promise for the given expression or produces no alternatives.
    pub fn no_match(&mut self, expr: &Expr) {
        let (group, expr_id) = self.insert(expr);
        match self.transform(group, expr_id) {
            Ok(None) => {}
            Ok(Some(result)) => {
                let result: Vec<String> = result.iter().map(format_expr).collect();
                assert!(result.is_empty(), "Xform should not have been applied. Xform: {:?} result: {:?}", self.xform, result);
            }
            Err(e) => panic!("Failed to apply an xform. Xform: {:?}. Error: {}", self.xform, e),
        }
    }

    fn insert(&mut self, expr: &Expr) -> (GroupId, ExprId) {
        let group = self.memo.insert(expr).unwrap();
        let expr_id = self.memo.group(group).exprs()[0];
        (group, expr_id)
    }

    fn transform(&self, group: GroupId, expr_id: ExprId) -> Result<Option<Vec<Expr>>, OptimizerError> {
        let metadata = self.catalog.metadata();
        let catalog = self.catalog.catalog();
        let ctx = XformContext::new(&self.memo, group, &metadata, &catalog, &self.config, &self.hints);

        let op = self.memo.expr(expr_id).logical_op().ok_or_else(|| OptimizerError::internal("Not a logical expression"))?;
        if !self.xform.pattern().matches_root(op) || self.xform.promise(&ctx, op) == Promise::None {
            return Ok(None);
        }

        let mut result = Vec::new();
        for binding in bindings(&self.memo, expr_id, self.xform.pattern(), self.config.max_bindings)? {
            result.extend(self.xform.transform(&ctx, &binding)?);
        }
        Ok(Some(result))
    }
}
