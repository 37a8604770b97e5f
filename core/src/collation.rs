//! Collation over JSON scalar values. Filter lookups and min/max metric math
//! need a total order within a type family; values of incomparable shapes
//! (object vs number, etc.) simply don't collate.

use std::cmp::Ordering;

use serde_json::Value;

/// Compare two JSON values in collation order. `None` when the values are
/// not comparable (mixed scalar types, arrays, objects).
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => {
            // Exact integer comparison when both sides fit; f64 otherwise
            if let (Some(xi), Some(yi)) = (x.as_i64(), y.as_i64()) {
                return Some(xi.cmp(&yi));
            }
            if let (Some(xu), Some(yu)) = (x.as_u64(), y.as_u64()) {
                return Some(xu.cmp(&yu));
            }
            let (xf, yf) = (x.as_f64()?, y.as_f64()?);
            xf.partial_cmp(&yf)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Numeric reading of a JSON value, for sum/avg arithmetic.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
