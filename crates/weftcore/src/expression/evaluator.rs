//! Condition expression evaluator

use super::ast::{Check, CompareOp, Expression, Operand};
use crate::{ResolveError, Resolver, Value};

/// Evaluate a condition expression against the resolver's scopes
pub fn evaluate(expr: &Expression, resolver: &Resolver<'_>) -> Result<bool, ResolveError> {
    Ok(match expr {
        Expression::Literal(b) => *b,
        Expression::Compare { left, op, right } => {
            let left = operand_value(left, resolver)?;
            let right = operand_value(right, resolver)?;
            compare(&left, *op, &right)
        }
        Expression::Check { operand, check } => {
            let value = operand_value(operand, resolver)?;
            match check {
                Check::Empty => value.is_empty(),
                Check::NotEmpty => !value.is_empty(),
                Check::Null => value.is_null(),
                Check::NotNull => !value.is_null(),
            }
        }
        Expression::Truthy(operand) => operand_value(operand, resolver)?.is_truthy(),
        Expression::And(left, right) => evaluate(left, resolver)? && evaluate(right, resolver)?,
        Expression::Or(left, right) => evaluate(left, resolver)? || evaluate(right, resolver)?,
        Expression::Not(inner) => !evaluate(inner, resolver)?,
    })
}

fn operand_value(operand: &Operand, resolver: &Resolver<'_>) -> Result<Value, ResolveError> {
    match operand {
        Operand::Reference(reference) => resolver.lookup(reference),
        Operand::Literal(value) => Ok(value.clone()),
        Operand::Template(template) => resolver.render(template).map(Value::String),
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::NotEq => !values_equal(left, right),
        CompareOp::Gt => order(left, right).is_some_and(|o| o.is_gt()),
        CompareOp::Gte => order(left, right).is_some_and(|o| o.is_ge()),
        CompareOp::Lt => order(left, right).is_some_and(|o| o.is_lt()),
        CompareOp::Lte => order(left, right).is_some_and(|o| o.is_le()),
        CompareOp::Contains => contains(left, right),
        CompareOp::NotContains => !contains(left, right),
        CompareOp::StartsWith => text_of(left).is_some_and(|s| s.starts_with(&right.to_text())),
        CompareOp::EndsWith => text_of(left).is_some_and(|s| s.ends_with(&right.to_text())),
    }
}

/// Loose equality: numbers compare numerically against numeric strings,
/// scalars against strings compare by their text form.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            match (left.to_number(), right.to_number()) {
                (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
                _ => false,
            }
        }
        (Value::String(s), Value::Bool(_)) | (Value::Bool(_), Value::String(s)) => {
            let other = if left.as_str().is_some() { right } else { left };
            s.eq_ignore_ascii_case(&other.to_text())
        }
        _ => false,
    }
}

fn order(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => match (left.to_number(), right.to_number()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => Some(a.cmp(b)),
        },
        _ => left.to_number()?.partial_cmp(&right.to_number()?),
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => s.contains(&needle.to_text()),
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::Object(map) => map.contains_key(&needle.to_text()),
        _ => false,
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(other.to_text()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parse;
    use crate::{Context, Outputs};
    use std::collections::HashMap;

    fn eval(source: &str, bindings: &HashMap<String, Value>) -> bool {
        let mut ctx = Context::default().with_env("mode", "strict");
        ctx.set_outputs(
            "classify",
            Outputs::from([
                ("intent".to_string(), Value::from("search")),
                ("score".to_string(), Value::from(0.9)),
                (
                    "tags".to_string(),
                    Value::Array(vec![Value::from("a"), Value::from("b")]),
                ),
            ]),
        )
        .unwrap();
        let resolver = Resolver::new(&ctx).with_bindings(bindings);
        evaluate(&parse(source).unwrap(), &resolver).unwrap()
    }

    #[test]
    fn test_numeric_and_string_comparisons() {
        let none = HashMap::new();
        assert!(eval("{{#classify.intent#}} == 'search'", &none));
        assert!(eval("classify.score > 0.8", &none));
        assert!(!eval("classify.score >= 1", &none));
        assert!(eval("classify.intent starts_with 'se'", &none));
        assert!(eval("env.mode != 'lenient'", &none));
    }

    #[test]
    fn test_contains_and_checks() {
        let none = HashMap::new();
        assert!(eval("classify.tags contains 'a'", &none));
        assert!(eval("classify.tags not contains 'z'", &none));
        assert!(eval("classify.intent is not empty", &none));
        assert!(eval("classify.intent.missing is null", &none));
    }

    #[test]
    fn test_bound_values_and_logic() {
        let bindings = HashMap::from([("count".to_string(), Value::from(2i64))]);
        assert!(eval("count < 3 and not (count == 0)", &bindings));
        assert!(!eval("count < 3 and count > 5", &bindings));
        assert!(eval("count == '2' || false", &bindings));
    }

    #[test]
    fn test_missing_reference_is_an_error() {
        let ctx = Context::default();
        let expr = parse("{{ghost.field}} == 1").unwrap();
        assert!(evaluate(&expr, &Resolver::new(&ctx)).is_err());
    }
}
