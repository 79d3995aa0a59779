//! View key collation.
//!
//! Type order: `null < false < true < numbers < strings < arrays < objects`.
//! Arrays compare element-wise with shorter prefixes first; objects compare
//! by their key/value pairs in stored order.

use serde_json::Value;
use std::cmp::Ordering;

/// Compares two view keys.
pub fn collate(left: &Value, right: &Value) -> Ordering {
    let rank = type_rank(left).cmp(&type_rank(right));
    if rank != Ordering::Equal {
        return rank;
    }

    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or(0.0);
            let b = b.as_f64().unwrap_or(0.0);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => collate_sequence(a.iter(), b.iter()),
        (Value::Object(a), Value::Object(b)) => {
            for ((key_a, value_a), (key_b, value_b)) in a.iter().zip(b.iter()) {
                let ordering = key_a.cmp(key_b).then_with(|| collate(value_a, value_b));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.len().cmp(&b.len())
        }
        _ => Ordering::Equal,
    }
}

fn collate_sequence<'a>(
    mut left: impl Iterator<Item = &'a Value>,
    mut right: impl Iterator<Item = &'a Value>,
) -> Ordering {
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a), Some(b)) => match collate(a, b) {
                Ordering::Equal => continue,
                other => return other,
            },
        }
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}
