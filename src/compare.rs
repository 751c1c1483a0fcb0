use serde_json::{Number, Value};

/// Deep structural equality between two values.
///
/// Sequences compare element-wise in order, mappings by key set and per-key
/// value regardless of insertion order. Primitives never coerce across types:
/// `1` and `1.0` differ, as do `true` and `1`.
pub fn structurally_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| structurally_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter().all(|(key, x)| {
                    b.get(key)
                        .is_some_and(|y| structurally_equal(x, y))
                })
        }
        _ => false,
    }
}

/// Integers compare by their exact digits, whatever their size; floats by value
fn numbers_equal(a: &Number, b: &Number) -> bool {
    match (a.is_f64(), b.is_f64()) {
        (true, true) => a.as_f64() == b.as_f64(),
        (false, false) => canonical_integer(a) == canonical_integer(b),
        _ => false,
    }
}

/// Sign and digits without leading zeros; zero is never negative
fn canonical_integer(n: &Number) -> (bool, String) {
    let text = n.to_string();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, text.as_str()),
    };
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        (false, "0".to_string())
    } else {
        (negative, digits.to_string())
    }
}
