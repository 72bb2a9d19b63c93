//! The output of the optimizer: a tree of physical operators.

use std::fmt::{Display, Formatter};

use crate::cost::Cost;
use crate::operators::format::StringOperatorFormatter;
use crate::operators::relational::physical::PhysicalOp;
use crate::properties::physical::DerivedProperties;

/// A node of a physical plan. Enforcers chosen by the optimizer are ordinary nodes of the plan.
#[derive(Debug, Clone)]
pub struct PhysicalPlan {
    pub op: PhysicalOp,
    pub inputs: Vec<PhysicalPlan>,
    /// The total cost of the subtree rooted at this node.
    pub cost: Cost,
    /// Physical properties provided by this node.
    pub properties: DerivedProperties,
}

impl PhysicalPlan {
    /// Returns the number of nodes of this plan.
    pub fn num_nodes(&self) -> usize {
        1 + self.inputs.iter().map(|i| i.num_nodes()).sum::<usize>()
    }

    /// Calls the given function for every node of this plan in pre-order.
    pub fn visit<F>(&self, f: &mut F)
    where
        F: FnMut(&PhysicalPlan),
    {
        f(self);
        for input in self.inputs.iter() {
            input.visit(f);
        }
    }

    /// Returns `true` if the given predicate holds for any node of this plan.
    pub fn any<F>(&self, f: F) -> bool
    where
        F: Fn(&PhysicalOp) -> bool,
    {
        let mut found = false;
        self.visit(&mut |node| found = found || f(&node.op));
        found
    }
}

impl Display for PhysicalPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(format_plan(self).as_str())
    }
}

/// Formats the given plan as an indented tree, one operator per line.
///
/// ```text
/// HashJoin type=Inner on=col:1 = col:4
///   TableScan A cols=[1, 2]
///   Motion Broadcast
///     TableScan B cols=[4, 5]
/// ```
pub fn format_plan(plan: &PhysicalPlan) -> String {
    let mut buf = String::new();
    format_plan_at(plan, 0, &mut buf);
    buf
}

fn format_plan_at(plan: &PhysicalPlan, depth: usize, buf: &mut String) {
    if depth > 0 {
        buf.push('\n');
    }
    buf.push_str(" ".repeat(depth * 2).as_str());
    plan.op.format(&mut StringOperatorFormatter::new(buf));
    for input in plan.inputs.iter() {
        format_plan_at(input, depth + 1, buf);
    }
}
