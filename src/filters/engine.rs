//! Pure evaluation of filter expressions against chain events
//!
//! The engine never errors: malformed or unknown filter shapes fail closed.
//! Static rejection of bad filters is the validator's job at
//! subscription-creation time.

use serde_json::Value;
use std::collections::HashMap;

use super::value::{compare_values, values_equal};
use crate::types::ChainEvent;

/// Mapping from parameter name to filter specification.
///
/// Parameter names are reserved event field names, `args.<dot.path>`
/// look-ups, or bare argument names (backward compatible top-level lookup).
pub type FilterMap = HashMap<String, FilterSpec>;

/// Event field names that resolve to `ChainEvent` fields rather than args.
pub const RESERVED_FIELDS: [&str; 6] = [
    "contractAddress",
    "eventName",
    "blockNumber",
    "transactionHash",
    "logIndex",
    "timestamp",
];

/// One filter entry: either an explicit operator expression, or a literal.
///
/// A bare array is sugar for `{operator: "in"}` and a bare scalar for
/// `{operator: "eq"}`.
#[derive(Debug, Clone, serde::Serialize, PartialEq)]
#[serde(untagged)]
pub enum FilterSpec {
    Expression(FilterExpression),
    Literal(Value),
}

// Hand-written so only maps become expressions. An untagged derive would
// match short bare arrays against FilterExpression positionally, turning
// `["USDC"]` into an Unknown-operator expression instead of `in` sugar.
impl<'de> serde::Deserialize<'de> for FilterSpec {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if value.is_object() {
            let expression =
                FilterExpression::deserialize(value).map_err(serde::de::Error::custom)?;
            Ok(FilterSpec::Expression(expression))
        } else {
            Ok(FilterSpec::Literal(value))
        }
    }
}

/// Operator + value pair used to accept or reject an event.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct FilterExpression {
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
}

/// Supported comparison operators. Anything else deserializes to `Unknown`
/// and fails closed during evaluation.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    In,
    Contains,
    #[serde(other)]
    Unknown,
}

/// Evaluates a filter map against an event. AND semantics across entries;
/// an empty or absent map matches unconditionally.
pub fn evaluate(event: &ChainEvent, filters: &FilterMap) -> bool {
    filters
        .iter()
        .all(|(name, spec)| evaluate_entry(event, name, spec))
}

fn evaluate_entry(event: &ChainEvent, name: &str, spec: &FilterSpec) -> bool {
    let expression = normalize_spec(spec);

    match resolve(event, name) {
        Some(actual) => apply_operator(&expression, &actual),
        // Unresolvable parameters match nothing except an explicit eq
        // against null.
        None => expression.operator == FilterOperator::Eq && expression.value.is_null(),
    }
}

/// Desugars implicit literal/array forms into explicit expressions.
fn normalize_spec(spec: &FilterSpec) -> FilterExpression {
    match spec {
        FilterSpec::Expression(expr) => expr.clone(),
        FilterSpec::Literal(Value::Array(items)) => FilterExpression {
            operator: FilterOperator::In,
            value: Value::Array(items.clone()),
        },
        FilterSpec::Literal(literal) => FilterExpression {
            operator: FilterOperator::Eq,
            value: literal.clone(),
        },
    }
}

/// Resolves a parameter name against the event.
///
/// Reserved names read event fields, `args.<path>` walks nested argument
/// objects, and anything else falls back to a top-level arg lookup.
fn resolve(event: &ChainEvent, name: &str) -> Option<Value> {
    match name {
        "contractAddress" => Some(Value::String(event.contract_address.clone())),
        "eventName" => Some(Value::String(event.event_name.clone())),
        "blockNumber" => Some(Value::from(event.block_number)),
        "transactionHash" => Some(Value::String(event.transaction_hash.clone())),
        "logIndex" => Some(Value::from(event.log_index)),
        "timestamp" => Some(Value::String(event.timestamp.to_rfc3339())),
        _ => {
            if let Some(path) = name.strip_prefix("args.") {
                resolve_path(&event.args, path)
            } else {
                event.args.get(name).cloned()
            }
        }
    }
}

fn resolve_path(args: &serde_json::Map<String, Value>, path: &str) -> Option<Value> {
    let mut segments = path.split('.');
    let mut current = args.get(segments.next()?)?.clone();
    for segment in segments {
        current = current.as_object()?.get(segment)?.clone();
    }
    Some(current)
}

fn apply_operator(expression: &FilterExpression, actual: &Value) -> bool {
    let expected = &expression.value;
    match expression.operator {
        FilterOperator::Eq => values_equal(actual, expected),
        FilterOperator::Ne => !values_equal(actual, expected),
        FilterOperator::Gt => {
            matches!(compare_values(actual, expected), Some(std::cmp::Ordering::Greater))
        }
        FilterOperator::Lt => {
            matches!(compare_values(actual, expected), Some(std::cmp::Ordering::Less))
        }
        FilterOperator::In => match expected {
            Value::Array(candidates) => {
                candidates.iter().any(|candidate| values_equal(actual, candidate))
            }
            _ => false,
        },
        FilterOperator::Contains => match actual {
            Value::String(haystack) => {
                let needle = match expected {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return false,
                };
                haystack.to_lowercase().contains(&needle.to_lowercase())
            }
            Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
            _ => false,
        },
        FilterOperator::Unknown => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn event_with_args(args: Value) -> ChainEvent {
        ChainEvent {
            contract_address: "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string(),
            event_name: "Transfer".to_string(),
            block_number: 18_000_000,
            transaction_hash: "0xdeadbeef".to_string(),
            log_index: 7,
            args: args.as_object().cloned().unwrap_or_default(),
            timestamp: Utc::now(),
        }
    }

    fn filters(json: Value) -> FilterMap {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn empty_filter_map_matches_everything() {
        let event = event_with_args(json!({"from": "0x1", "value": "10"}));
        assert!(evaluate(&event, &FilterMap::new()));
    }

    #[test]
    fn reflexive_equality_on_every_reserved_field() {
        let event = event_with_args(json!({}));
        let cases = json!({
            "contractAddress": {"operator": "eq", "value": event.contract_address},
            "eventName": {"operator": "eq", "value": "Transfer"},
            "blockNumber": {"operator": "eq", "value": 18_000_000u64},
            "transactionHash": {"operator": "eq", "value": "0xdeadbeef"},
            "logIndex": {"operator": "eq", "value": 7},
            "timestamp": {"operator": "eq", "value": event.timestamp.to_rfc3339()},
        });
        assert!(evaluate(&event, &filters(cases)));
    }

    #[test]
    fn uppercased_address_literal_still_matches() {
        let event = event_with_args(json!({}));
        let map = filters(json!({
            "contractAddress": "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"
        }));
        assert!(evaluate(&event, &map));
    }

    #[test]
    fn and_semantics_short_circuit() {
        let event = event_with_args(json!({"value": "10"}));
        let map = filters(json!({
            "eventName": "Transfer",
            "value": "11"
        }));
        assert!(!evaluate(&event, &map));
    }

    #[test]
    fn bare_literal_is_implicit_eq() {
        let event = event_with_args(json!({"value": "100"}));
        assert!(evaluate(&event, &filters(json!({"value": "100"}))));
        assert!(!evaluate(&event, &filters(json!({"value": "101"}))));
    }

    #[test]
    fn bare_array_is_implicit_in() {
        let event = event_with_args(json!({"token": "USDC"}));
        assert!(evaluate(&event, &filters(json!({"token": ["DAI", "USDC"]}))));
        assert!(!evaluate(&event, &filters(json!({"token": ["DAI", "WETH"]}))));
    }

    #[test]
    fn short_bare_arrays_stay_literal_in_sugar() {
        // One- and two-element arrays must parse as literals, not as
        // positional FilterExpression fields.
        let map = filters(json!({"token": ["USDC"]}));
        assert!(matches!(
            map.get("token"),
            Some(FilterSpec::Literal(Value::Array(_)))
        ));

        let event = event_with_args(json!({"token": "USDC"}));
        assert!(evaluate(&event, &map));
        assert!(evaluate(&event, &filters(json!({"token": ["DAI", "USDC"]}))));
        assert!(!evaluate(&event, &filters(json!({"token": ["DAI"]}))));
    }

    #[test]
    fn in_with_empty_array_matches_nothing() {
        let event = event_with_args(json!({"token": "USDC"}));
        let map = filters(json!({"token": {"operator": "in", "value": []}}));
        assert!(!evaluate(&event, &map));
    }

    #[test]
    fn in_with_non_array_value_fails() {
        let event = event_with_args(json!({"token": "USDC"}));
        let map = filters(json!({"token": {"operator": "in", "value": "USDC"}}));
        assert!(!evaluate(&event, &map));
    }

    #[test]
    fn gt_lt_numeric_and_big_integer() {
        let event = event_with_args(json!({"value": "1000000000000000000000"}));
        assert!(evaluate(
            &event,
            &filters(json!({"value": {"operator": "gt", "value": "999999999999999999999"}}))
        ));
        assert!(evaluate(
            &event,
            &filters(json!({"blockNumber": {"operator": "gt", "value": 17_999_999}}))
        ));
        assert!(evaluate(
            &event,
            &filters(json!({"blockNumber": {"operator": "lt", "value": 18_000_001}}))
        ));
    }

    #[test]
    fn gt_on_incomparable_types_fails_closed() {
        let event = event_with_args(json!({"flag": true}));
        let map = filters(json!({"flag": {"operator": "gt", "value": 1}}));
        assert!(!evaluate(&event, &map));
    }

    #[test]
    fn contains_substring_is_case_insensitive() {
        let event = event_with_args(json!({"memo": "Hello Chainrelay"}));
        assert!(evaluate(
            &event,
            &filters(json!({"memo": {"operator": "contains", "value": "chainRELAY"}}))
        ));
        assert!(!evaluate(
            &event,
            &filters(json!({"memo": {"operator": "contains", "value": "absent"}}))
        ));
    }

    #[test]
    fn contains_on_array_tests_membership() {
        let event = event_with_args(json!({"tags": ["swap", "v3"]}));
        assert!(evaluate(
            &event,
            &filters(json!({"tags": {"operator": "contains", "value": "swap"}}))
        ));
        assert!(!evaluate(
            &event,
            &filters(json!({"tags": {"operator": "contains", "value": "v2"}}))
        ));
    }

    #[test]
    fn contains_on_number_fails() {
        let event = event_with_args(json!({"value": 42}));
        let map = filters(json!({"value": {"operator": "contains", "value": "4"}}));
        assert!(!evaluate(&event, &map));
    }

    #[test]
    fn unknown_operator_fails_closed_without_panicking() {
        let event = event_with_args(json!({"value": "10"}));
        let map = filters(json!({"value": {"operator": "regex", "value": ".*"}}));
        assert!(!evaluate(&event, &map));
    }

    #[test]
    fn nested_args_path_resolution() {
        let event = event_with_args(json!({
            "metadata": {"source": {"chain": "mainnet"}}
        }));
        assert!(evaluate(
            &event,
            &filters(json!({"args.metadata.source.chain": "mainnet"}))
        ));
    }

    #[test]
    fn missing_nested_path_evaluates_false_not_error() {
        let event = event_with_args(json!({"from": "0xAAA"}));
        let map = filters(json!({"args.metadata.missing": "x"}));
        assert!(!evaluate(&event, &map));
    }

    #[test]
    fn missing_value_matches_explicit_eq_null() {
        let event = event_with_args(json!({}));
        assert!(evaluate(
            &event,
            &filters(json!({"args.absent": {"operator": "eq", "value": null}}))
        ));
        assert!(!evaluate(
            &event,
            &filters(json!({"args.absent": {"operator": "ne", "value": null}}))
        ));
    }

    #[test]
    fn bare_arg_name_backward_compatible_lookup() {
        let event = event_with_args(json!({"from": "0xBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB"}));
        let map = filters(json!({"from": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"}));
        assert!(evaluate(&event, &map));
    }

    #[test]
    fn ne_operator() {
        let event = event_with_args(json!({"status": "open"}));
        assert!(evaluate(
            &event,
            &filters(json!({"status": {"operator": "ne", "value": "closed"}}))
        ));
        assert!(!evaluate(
            &event,
            &filters(json!({"status": {"operator": "ne", "value": "open"}}))
        ));
    }
}
