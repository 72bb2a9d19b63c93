//! Textual representation of operators and expressions.

use std::fmt::{Display, Formatter};

use itertools::Itertools;

use crate::operators::{Expr, ExprNode};

/// Provides methods to build a textual representation of an operator.
pub trait OperatorFormatter {
    /// Writes the name of an operator.
    fn write_name(&mut self, name: &str);

    /// Writes a value of some attribute of an operator.
    /// If the name is empty only the value is written.
    fn write_value<D>(&mut self, name: &str, value: D)
    where
        D: Display;

    /// Writes values of some attribute of an operator. Nothing is written when `values` is empty.
    fn write_values<D>(&mut self, name: &str, values: &[D])
    where
        D: Display;
}

/// An [OperatorFormatter] that writes to a string.
pub struct StringOperatorFormatter<'b> {
    buf: &'b mut String,
}

impl<'b> StringOperatorFormatter<'b> {
    pub fn new(buf: &'b mut String) -> Self {
        StringOperatorFormatter { buf }
    }
}

impl OperatorFormatter for StringOperatorFormatter<'_> {
    fn write_name(&mut self, name: &str) {
        self.buf.push_str(name);
    }

    fn write_value<D>(&mut self, name: &str, value: D)
    where
        D: Display,
    {
        self.buf.push(' ');
        if !name.is_empty() {
            self.buf.push_str(name);
            self.buf.push('=');
        }
        self.buf.push_str(value.to_string().as_str());
    }

    fn write_values<D>(&mut self, name: &str, values: &[D])
    where
        D: Display,
    {
        if values.is_empty() {
            return;
        }
        self.buf.push(' ');
        self.buf.push_str(name);
        self.buf.push_str("=[");
        self.buf.push_str(values.iter().join(", ").as_str());
        self.buf.push(']');
    }
}

pub(crate) fn fmt_operator<F>(f: &mut Formatter<'_>, format: F) -> std::fmt::Result
where
    F: FnOnce(&mut StringOperatorFormatter<'_>),
{
    let mut buf = String::new();
    format(&mut StringOperatorFormatter::new(&mut buf));
    f.write_str(buf.as_str())
}

/// Formats the given expression as an indented tree. References to memo groups are written as `Group <id>`.
///
/// ```text
/// LogicalJoin type=Inner on=col:1 = col:3
///   LogicalGet A cols=[1, 2]
///   Group 01
/// ```
pub fn format_expr(expr: &Expr) -> String {
    let mut buf = String::new();
    format_expr_at(expr, 0, &mut buf);
    buf
}

fn format_expr_at(expr: &Expr, depth: usize, buf: &mut String) {
    if depth > 0 {
        buf.push('\n');
    }
    buf.push_str(" ".repeat(depth * 2).as_str());
    match expr.node() {
        ExprNode::Operator { operator, inputs } => {
            operator.format(&mut StringOperatorFormatter::new(buf));
            for input in inputs {
                format_expr_at(input, depth + 1, buf);
            }
        }
        ExprNode::Group(group_id) => {
            buf.push_str(format!("Group {}", group_id).as_str());
        }
    }
}
