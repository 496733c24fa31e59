//! Ordering of JSON order-by values
//!
//! Values of different types order by type rank:
//! null < bool < number < string < array < object.

use std::cmp::Ordering;

use serde_json::Value;

use super::info::SortOrder;

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Ascending comparison of two order-by values
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let by_type = type_rank(a).cmp(&type_rank(b));
    if by_type != Ordering::Equal {
        return by_type;
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        // Objects only compare by type
        _ => Ordering::Equal,
    }
}

/// Compare two key tuples column by column, honouring each direction
///
/// The result is "which comes first in the output": `Less` means `a` is
/// emitted before `b`.
pub fn compare_keys(a: &[Value], b: &[Value], orders: &[SortOrder]) -> Ordering {
    for (i, (l, r)) in a.iter().zip(b.iter()).enumerate() {
        let ord = compare_values(l, r);
        let ord = match orders.get(i).copied().unwrap_or_default() {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Compare resource ids the way ties on equal keys are broken
///
/// Rids follow the first column's direction.
pub fn compare_rids(a: &str, b: &str, orders: &[SortOrder]) -> Ordering {
    let ord = a.cmp(b);
    match orders.first().copied().unwrap_or_default() {
        SortOrder::Ascending => ord,
        SortOrder::Descending => ord.reverse(),
    }
}
