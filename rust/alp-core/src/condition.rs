//! Condition-expression evaluation.
//!
//! Conditions appear in flow-edge `when` clauses and in the `if`/`switch`
//! ops. A condition is either a scalar (judged by truthiness) or a mapping
//! with exactly one comparator key. Operands that are `$`-reference strings
//! are resolved through the caller-supplied resolver; everything else is a
//! literal.
//!
//! Malformed conditions (wrong key count, wrong operand arity) evaluate
//! false rather than erroring, so a bad edge guard fails closed.

use crate::value::is_truthy;
use serde_json::Value;

/// Resolves `$`-reference operands inside a condition. Flow edges resolve
/// against the most recent output; ops see pre-resolved operands and use
/// [`no_refs`].
pub trait ConditionScope {
    /// Resolve a reference such as `$value` or `$value.score`. `None` means
    /// the reference does not apply, which compares like `null`.
    fn resolve(&self, reference: &str) -> Option<Value>;
}

impl<F> ConditionScope for F
where
    F: Fn(&str) -> Option<Value>,
{
    fn resolve(&self, reference: &str) -> Option<Value> {
        self(reference)
    }
}

/// Scope for contexts whose operands are already resolved: every reference
/// string is kept as a literal.
pub fn no_refs(_reference: &str) -> Option<Value> {
    None
}

/// Evaluate a condition. `None`/`null` is vacuously true (an absent `when`
/// activates its edge unconditionally).
pub fn eval_condition(cond: &Value, scope: &dyn ConditionScope) -> bool {
    match cond {
        Value::Null => true,
        Value::Bool(b) => *b,
        Value::String(_) | Value::Number(_) | Value::Array(_) => {
            is_truthy(&resolve_operand(cond, scope))
        }
        Value::Object(map) => {
            if map.len() != 1 {
                return false;
            }
            let (key, arg) = map.iter().next().expect("len checked");
            match (key.as_str(), arg) {
                ("and", Value::Array(subs)) => subs.iter().all(|c| eval_condition(c, scope)),
                ("or", Value::Array(subs)) => subs.iter().any(|c| eval_condition(c, scope)),
                ("not", sub) => !eval_condition(sub, scope),
                ("eq" | "ne" | "gt" | "gte" | "lt" | "lte", Value::Array(operands))
                    if operands.len() == 2 =>
                {
                    let left = resolve_operand(&operands[0], scope);
                    let right = resolve_operand(&operands[1], scope);
                    compare(key, &left, &right)
                }
                _ => false,
            }
        }
    }
}

fn resolve_operand(operand: &Value, scope: &dyn ConditionScope) -> Value {
    match operand {
        Value::String(s) if s.starts_with('$') => scope.resolve(s).unwrap_or(Value::Null),
        other => other.clone(),
    }
}

/// Ordering comparisons are defined for number/number (with int/float
/// promotion) and string/string pairs; any other pairing is false.
fn compare(op: &str, left: &Value, right: &Value) -> bool {
    match op {
        "eq" => values_equal(left, right),
        "ne" => !values_equal(left, right),
        _ => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => None,
                },
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            match ordering {
                Some(ord) => match op {
                    "gt" => ord.is_gt(),
                    "gte" => ord.is_ge(),
                    "lt" => ord.is_lt(),
                    "lte" => ord.is_le(),
                    _ => false,
                },
                None => false,
            }
        }
    }
}

/// Equality with numeric promotion: `1` equals `1.0`.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope(value: Value) -> impl Fn(&str) -> Option<Value> {
        move |reference: &str| {
            let path = reference.strip_prefix('$')?;
            if path == "value" {
                return Some(value.clone());
            }
            let rest = path.strip_prefix("value.").unwrap_or(path);
            crate::value::get_path(&value, rest).cloned()
        }
    }

    #[test]
    fn absent_condition_is_true() {
        assert!(eval_condition(&Value::Null, &no_refs));
    }

    #[test]
    fn comparators_over_resolved_value() {
        let s = scope(json!(5));
        assert!(eval_condition(&json!({"gt": ["$value", 0]}), &s));
        assert!(!eval_condition(&json!({"lte": ["$value", 0]}), &s));

        let neg = scope(json!(-3));
        assert!(!eval_condition(&json!({"gt": ["$value", 0]}), &neg));
        assert!(eval_condition(&json!({"lte": ["$value", 0]}), &neg));
    }

    #[test]
    fn dotted_references_into_output() {
        let s = scope(json!({"score": 7, "tag": "warn"}));
        assert!(eval_condition(&json!({"gte": ["$value.score", 7]}), &s));
        assert!(eval_condition(&json!({"eq": ["$tag", "warn"]}), &s));
    }

    #[test]
    fn numeric_promotion_in_eq() {
        assert!(eval_condition(&json!({"eq": [1, 1.0]}), &no_refs));
        assert!(eval_condition(&json!({"ne": [1, "1"]}), &no_refs));
    }

    #[test]
    fn and_or_not_nest() {
        let cond = json!({"and": [{"gt": [2, 1]}, {"or": [{"eq": [0, 1]}, {"not": false}]}]});
        assert!(eval_condition(&cond, &no_refs));
    }

    #[test]
    fn string_ordering() {
        assert!(eval_condition(&json!({"lt": ["apple", "banana"]}), &no_refs));
        assert!(!eval_condition(&json!({"lt": ["apple", 2]}), &no_refs));
    }

    #[test]
    fn scalar_conditions_use_truthiness() {
        assert!(eval_condition(&json!(1), &no_refs));
        assert!(!eval_condition(&json!(""), &no_refs));
        assert!(eval_condition(&json!("$value"), &scope(json!("x"))));
        assert!(!eval_condition(&json!("$value"), &scope(json!(0))));
    }

    #[test]
    fn malformed_conditions_fail_closed() {
        assert!(!eval_condition(&json!({"gt": [1]}), &no_refs));
        assert!(!eval_condition(&json!({"gt": [1, 2], "lt": [1, 2]}), &no_refs));
        assert!(!eval_condition(&json!({"between": [1, 2]}), &no_refs));
    }
}
