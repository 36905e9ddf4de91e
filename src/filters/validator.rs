//! Static validation of filter maps
//!
//! Rejects malformed filters at subscription-creation time so the engine
//! never sees shapes it would silently fail closed on. Structural checks
//! only; nothing here evaluates against event data.

use serde_json::Value;

use super::engine::{FilterExpression, FilterMap, FilterOperator, FilterSpec, RESERVED_FIELDS};

/// Validates every entry in a filter map, collecting all problems instead of
/// stopping at the first.
pub fn validate_filters(filters: &FilterMap) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    for (name, spec) in filters {
        if let Err(reason) = validate_parameter_name(name) {
            errors.push(format!("parameter '{name}': {reason}"));
        }
        if let FilterSpec::Expression(expression) = spec {
            for reason in validate_filter_expression(expression) {
                errors.push(format!("parameter '{name}': {reason}"));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Structural checks on a single expression: operator whitelist and
/// operator/value compatibility.
pub fn validate_filter_expression(expression: &FilterExpression) -> Vec<String> {
    let mut errors = Vec::new();

    match expression.operator {
        FilterOperator::Unknown => {
            errors.push("unknown operator (expected eq, ne, gt, lt, in, contains)".to_string());
        }
        FilterOperator::In => match &expression.value {
            Value::Array(items) if items.is_empty() => {
                errors.push("'in' requires a non-empty array value".to_string());
            }
            Value::Array(_) => {}
            _ => errors.push("'in' requires an array value".to_string()),
        },
        FilterOperator::Gt | FilterOperator::Lt => {
            if !matches!(expression.value, Value::Number(_) | Value::String(_)) {
                errors.push("'gt'/'lt' require a number or string value".to_string());
            }
        }
        FilterOperator::Contains => {
            if !matches!(
                expression.value,
                Value::String(_) | Value::Number(_) | Value::Bool(_)
            ) {
                errors.push("'contains' requires a scalar value".to_string());
            }
        }
        FilterOperator::Eq | FilterOperator::Ne => {}
    }

    errors
}

fn validate_parameter_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name cannot be empty".to_string());
    }

    if RESERVED_FIELDS.contains(&name) {
        return Ok(());
    }

    if let Some(path) = name.strip_prefix("args.") {
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err("'args.' path segments cannot be empty".to_string());
        }
        return Ok(());
    }

    let mut chars = name.chars();
    let leading_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if leading_ok && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err("expected a reserved field, 'args.<path>', or a bare argument name".to_string())
    }
}
