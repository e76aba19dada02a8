//! The ten fixed condition operators, evaluated against a request's JSON
//! field-path tree.
//!
//! `Operator` is an exhaustive enum deserialized from the wire format, so an
//! invalid operator name is rejected at manifest registration time, never
//! seen here — there is deliberately no catch-all match arm. What *can*
//! reach evaluation is an operator applied to a field of the wrong shape
//! (e.g. `gt` against a string); those cases return `false` with a warning
//! rather than panicking.

use kernel_core::fieldpath::resolve;
use kernel_core::model::{Condition, Operator};
use regex::Regex;
use serde_json::Value;

/// Evaluate one condition against `request_value` (see
/// [`kernel_core::request::EvaluationRequest::as_value`]). Returns the match
/// result plus an optional non-fatal warning.
#[must_use]
pub fn eval(condition: &Condition, request_value: &Value) -> (bool, Option<String>) {
    let Some(field) = resolve(request_value, &condition.field_path) else {
        return (false, None);
    };

    match condition.operator {
        Operator::Eq => (field == &condition.value, None),
        Operator::Ne => (field != &condition.value, None),
        Operator::Gt => compare_numeric(field, &condition.value, |a, b| a > b),
        Operator::Lt => compare_numeric(field, &condition.value, |a, b| a < b),
        Operator::Gte => compare_numeric(field, &condition.value, |a, b| a >= b),
        Operator::Lte => compare_numeric(field, &condition.value, |a, b| a <= b),
        Operator::In => membership(&condition.value, field),
        Operator::Nin => {
            let (is_member, warning) = membership(&condition.value, field);
            (!is_member, warning)
        }
        Operator::Contains => contains(field, &condition.value),
        Operator::Regex => regex_match(field, &condition.value),
    }
}

fn compare_numeric(
    field: &Value,
    operand: &Value,
    op: impl Fn(f64, f64) -> bool,
) -> (bool, Option<String>) {
    match (field.as_f64(), operand.as_f64()) {
        (Some(a), Some(b)) => (op(a, b), None),
        _ => (false, Some(format!("numeric comparison against non-numeric field {field}"))),
    }
}

/// `needle` is the field value; `array_operand` is the condition's `value`,
/// expected to be a JSON array.
fn membership(array_operand: &Value, needle: &Value) -> (bool, Option<String>) {
    match array_operand.as_array() {
        Some(items) => (items.contains(needle), None),
        None => (false, Some("`in`/`nin` operand must be an array".to_string())),
    }
}

fn contains(field: &Value, operand: &Value) -> (bool, Option<String>) {
    if let Some(s) = field.as_str() {
        return (operand.as_str().is_some_and(|needle| s.contains(needle)), None);
    }
    if let Some(items) = field.as_array() {
        return (items.contains(operand), None);
    }
    (false, Some("`contains` field must be a string or array".to_string()))
}

fn regex_match(field: &Value, pattern: &Value) -> (bool, Option<String>) {
    let (Some(s), Some(pattern)) = (field.as_str(), pattern.as_str()) else {
        return (false, Some("`regex` requires a string field and a string pattern".to_string()));
    };
    match Regex::new(pattern) {
        Ok(re) => (re.is_match(s), None),
        Err(e) => (false, Some(format!("invalid regex pattern `{pattern}`: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn eq_matches_exact_value() {
        let c = Condition::new("action", Operator::Eq, json!("delete"));
        let (ok, _) = eval(&c, &json!({"action": "delete"}));
        assert!(ok);
    }

    #[test]
    fn in_operator_matches_array_membership() {
        // S3: role must be one of [admin, owner].
        let c = Condition::new("roles", Operator::In, json!(["admin", "owner"]));
        let (ok, _) = eval(&c, &json!({"roles": "admin"}));
        assert!(ok);
        let (ok, _) = eval(&c, &json!({"roles": "guest"}));
        assert!(!ok);
    }

    #[test]
    fn nin_is_the_negation_of_in() {
        let c = Condition::new("context.region", Operator::Nin, json!(["eu", "uk"]));
        let (ok, _) = eval(&c, &json!({"context": {"region": "us"}}));
        assert!(ok);
        let (ok, _) = eval(&c, &json!({"context": {"region": "eu"}}));
        assert!(!ok);
    }

    #[test]
    fn missing_field_path_is_non_match_without_warning() {
        let c = Condition::new("context.missing", Operator::Eq, json!(true));
        let (ok, warning) = eval(&c, &json!({"context": {}}));
        assert!(!ok);
        assert!(warning.is_none());
    }

    #[test]
    fn gt_requires_numeric_operands() {
        let c = Condition::new("context.amount", Operator::Gt, json!(100));
        let (ok, warning) = eval(&c, &json!({"context": {"amount": "not a number"}}));
        assert!(!ok);
        assert!(warning.is_some());
    }

    #[test]
    fn contains_matches_substring_and_array_element() {
        let c = Condition::new("action", Operator::Contains, json!("del"));
        let (ok, _) = eval(&c, &json!({"action": "delete"}));
        assert!(ok);

        let c = Condition::new("roles", Operator::Contains, json!("admin"));
        let (ok, _) = eval(&c, &json!({"roles": ["admin", "viewer"]}));
        assert!(ok);
    }

    #[test]
    fn regex_matches_pattern() {
        let c = Condition::new("context.email", Operator::Regex, json!(r"^.+@example\.com$"));
        let (ok, _) = eval(&c, &json!({"context": {"email": "a@example.com"}}));
        assert!(ok);
        let (ok, _) = eval(&c, &json!({"context": {"email": "a@other.com"}}));
        assert!(!ok);
    }

    #[test]
    fn invalid_regex_pattern_is_non_match_with_warning() {
        let c = Condition::new("action", Operator::Regex, json!("("));
        let (ok, warning) = eval(&c, &json!({"action": "delete"}));
        assert!(!ok);
        assert!(warning.is_some());
    }
}
