//! Comparison semantics for filter values
//!
//! All comparisons dispatch on an explicit classification of the two JSON
//! values (address, big integer, number, text) instead of sniffing object
//! shapes at each call site.

use alloy::primitives::I256;
use serde_json::Value;
use std::cmp::Ordering;

/// True if the string looks like a hex address: `0x` + 40 hex chars.
pub fn is_address_like(s: &str) -> bool {
    s.len() == 42
        && s.starts_with("0x")
        && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Interprets a value as an arbitrary-precision integer where possible.
///
/// Integer JSON numbers and integer-looking strings qualify; decimal strings
/// such as `"1.5"` do not, and fall through to the generic comparison paths.
pub fn as_big_int(value: &Value) -> Option<I256> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(I256::try_from(i).ok()?)
            } else if let Some(u) = n.as_u64() {
                Some(I256::try_from(u).ok()?)
            } else {
                None
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            trimmed.parse::<I256>().ok()
        }
        _ => None,
    }
}

/// Deep equality with address case-insensitivity and numeric comparison of
/// big-integer-like values.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Value::String(x), Value::String(y)) = (a, b) {
        if is_address_like(x) && is_address_like(y) {
            return x.eq_ignore_ascii_case(y);
        }
    }

    if let (Some(x), Some(y)) = (as_big_int(a), as_big_int(b)) {
        return x == y;
    }

    if let (Value::Number(x), Value::Number(y)) = (a, b) {
        if let (Some(x), Some(y)) = (x.as_f64(), y.as_f64()) {
            return x == y;
        }
    }

    a == b
}

/// Ordering for `gt`/`lt`: numeric for numbers and big-integer-like values,
/// lexical for plain strings, undefined for anything else.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_big_int(a), as_big_int(b)) {
        return Some(x.cmp(&y));
    }

    if let (Value::Number(x), Value::Number(y)) = (a, b) {
        return x.as_f64()?.partial_cmp(&y.as_f64()?);
    }

    if let (Value::String(x), Value::String(y)) = (a, b) {
        return Some(x.as_str().cmp(y.as_str()));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn address_like_detection() {
        assert!(is_address_like("0x1234567890abcdef1234567890abcdef12345678"));
        assert!(is_address_like("0x1234567890ABCDEF1234567890ABCDEF12345678"));
        assert!(!is_address_like("0x1234"));
        assert!(!is_address_like("1234567890abcdef1234567890abcdef12345678ab"));
        assert!(!is_address_like("0x1234567890abcdef1234567890abcdef1234567z"));
    }

    #[test]
    fn addresses_compare_case_insensitively() {
        assert!(values_equal(
            &json!("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"),
            &json!("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
        ));
        assert!(!values_equal(
            &json!("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"),
            &json!("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"),
        ));
    }

    #[test]
    fn big_integers_compare_numerically_not_lexically() {
        // Lexically "9" > "10"; numerically it is not.
        assert_eq!(
            compare_values(&json!("9"), &json!("10")),
            Some(Ordering::Less)
        );
        assert!(values_equal(&json!("1000000000000000000000000"), &json!("1000000000000000000000000")));
        assert!(values_equal(&json!(5), &json!("5")));
        assert!(values_equal(&json!("-3"), &json!(-3)));
    }

    #[test]
    fn decimal_strings_do_not_take_the_big_int_path() {
        assert!(as_big_int(&json!("1.5")).is_none());
        // Falls through to deep equality: string vs number never match.
        assert!(!values_equal(&json!("1.5"), &json!(1.5)));
        assert!(values_equal(&json!(1.5), &json!(1.5)));
    }

    #[test]
    fn plain_strings_compare_lexically() {
        assert_eq!(
            compare_values(&json!("apple"), &json!("banana")),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn mixed_types_have_no_ordering() {
        assert_eq!(compare_values(&json!(true), &json!(1)), None);
        assert_eq!(compare_values(&json!({"a": 1}), &json!({"a": 1})), None);
        assert_eq!(compare_values(&json!("abc"), &json!(1)), None);
    }

    #[test]
    fn deep_equality_fallback() {
        assert!(values_equal(&json!({"a": [1, 2]}), &json!({"a": [1, 2]})));
        assert!(!values_equal(&json!({"a": [1, 2]}), &json!({"a": [2, 1]})));
        assert!(values_equal(&json!(null), &json!(null)));
    }
}
