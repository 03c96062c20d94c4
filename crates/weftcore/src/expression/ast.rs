//! Abstract syntax tree for condition expressions

use crate::resolver::{self, Reference};
use crate::Value;

/// A condition expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// `left op right`
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    /// `operand is [not] empty`, `operand is [not] null`
    Check { operand: Operand, check: Check },
    /// A bare operand, true when its value is truthy
    Truthy(Operand),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
    Literal(bool),
}

impl Expression {
    pub fn and(self, other: Expression) -> Expression {
        Expression::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expression) -> Expression {
        Expression::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Expression {
        Expression::Not(Box::new(self))
    }

    /// Every reference the expression reads.
    pub fn references(&self) -> Vec<Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut Vec<Reference>) {
        match self {
            Expression::Compare { left, right, .. } => {
                left.collect_references(out);
                right.collect_references(out);
            }
            Expression::Check { operand, .. } | Expression::Truthy(operand) => {
                operand.collect_references(out)
            }
            Expression::And(a, b) | Expression::Or(a, b) => {
                a.collect_references(out);
                b.collect_references(out);
            }
            Expression::Not(inner) => inner.collect_references(out),
            Expression::Literal(_) => {}
        }
    }
}

/// One side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Reference(Reference),
    Literal(Value),
    /// A quoted string containing placeholders, rendered before comparison
    Template(String),
}

impl Operand {
    fn collect_references(&self, out: &mut Vec<Reference>) {
        match self {
            Operand::Reference(r) => out.push(r.clone()),
            Operand::Template(t) => out.extend(resolver::references(t).unwrap_or_default()),
            Operand::Literal(_) => {}
        }
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// substring, array element or object key
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Empty,
    NotEmpty,
    Null,
    NotNull,
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            CompareOp::Eq => "==",
            CompareOp::NotEq => "!=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Contains => "contains",
            CompareOp::NotContains => "not contains",
            CompareOp::StartsWith => "starts_with",
            CompareOp::EndsWith => "ends_with",
        };
        f.write_str(op)
    }
}
