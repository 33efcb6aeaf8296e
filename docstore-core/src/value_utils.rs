//! Helpers over `serde_json::Value` used by the matcher, updater, cursor and indexes
//!
//! Dot-notation paths, equality and ordering rules, and canonical keys for
//! bucketing values (grouping, distinct, index entries).

use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

use crate::error::{DocStoreError, Result};

/// Split a dot-notation path into segments, rejecting empty segments
///
/// ```
/// use docstore_core::value_utils::split_path;
///
/// assert_eq!(split_path("lines.0.quantity").unwrap(), vec!["lines", "0", "quantity"]);
/// assert!(split_path("a..b").is_err());
/// assert!(split_path("").is_err());
/// ```
pub fn split_path(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() {
        return Err(DocStoreError::InvalidPath("empty field path".to_string()));
    }
    let parts: Vec<&str> = path.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(DocStoreError::InvalidPath(format!(
            "empty segment in field path '{}'",
            path
        )));
    }
    Ok(parts)
}

/// Parse a path segment as an array index
pub fn array_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse::<usize>().ok()
}

/// Exact lookup of a dotted path (`"shipto.zip"`, `"lines.0.sku"`)
///
/// Numeric segments index arrays. A named segment applied to an array
/// resolves to nothing; [`collect_path_values`] fans out instead.
///
/// ```
/// use serde_json::json;
/// use docstore_core::value_utils::get_nested_value;
///
/// let order = json!({"shipto": {"zip": "60611"}, "lines": [{"sku": "a1"}]});
/// assert_eq!(get_nested_value(&order, "lines.0.sku"), Some(&json!("a1")));
/// assert_eq!(get_nested_value(&order, "lines.sku"), None);
/// ```
pub fn get_nested_value<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, step)
}

/// Same as [`get_nested_value`] but rooted at a field map
pub fn get_in_map<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let head = map.get(parts.next()?)?;
    parts.try_fold(head, step)
}

fn step<'a>(value: &'a Value, part: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(part),
        Value::Array(arr) => arr.get(array_index(part)?),
        _ => None,
    }
}

/// Resolve every value a query path refers to
///
/// Embedded documents are traversed by key. When a segment meets an array,
/// a numeric segment selects that element; a non-numeric segment is applied
/// to each embedded-document element of the array, so `"lines.item"` yields
/// the `item` of every line.
///
/// ```
/// use serde_json::json;
/// use docstore_core::value_utils::collect_path_values;
///
/// let doc = json!({"x": [{"a": 1}, 7, {"a": 11}]});
/// let values = collect_path_values(doc.as_object().unwrap(), "x.a");
/// assert_eq!(values, vec![&json!(1), &json!(11)]);
/// ```
pub fn collect_path_values<'a>(root: &'a Map<String, Value>, path: &str) -> Vec<&'a Value> {
    let parts: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some(first) = root.get(parts[0]) {
        collect_from(first, &parts[1..], &mut out);
    }
    out
}

fn collect_from<'a>(current: &'a Value, parts: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = parts.split_first() else {
        out.push(current);
        return;
    };
    match current {
        Value::Object(map) => {
            if let Some(child) = map.get(*head) {
                collect_from(child, rest, out);
            }
        }
        Value::Array(arr) => {
            if let Some(index) = array_index(head) {
                if let Some(elem) = arr.get(index) {
                    collect_from(elem, rest, out);
                }
            } else {
                for elem in arr.iter().filter(|e| e.is_object()) {
                    collect_from(elem, parts, out);
                }
            }
        }
        _ => {}
    }
}

/// Integer value of a number, folding integral floats that fit in `i64`
///
/// Every place that compares or buckets numbers goes through this, so
/// `1`, `1.0` and `9007199254740992.0` land on the same integer everywhere
/// while `9007199254740993` stays distinct from the float next to it.
///
/// ```
/// use serde_json::Number;
/// use docstore_core::value_utils::integral_i64;
///
/// assert_eq!(integral_i64(&Number::from(7)), Some(7));
/// assert_eq!(integral_i64(&Number::from_f64(7.0).unwrap()), Some(7));
/// assert_eq!(integral_i64(&Number::from_f64(7.5).unwrap()), None);
/// assert_eq!(integral_i64(&Number::from_f64(1e19).unwrap()), None);
/// ```
pub fn integral_i64(n: &Number) -> Option<i64> {
    // i64::MIN is exactly representable; i64::MAX rounds up to 2^63
    const LOWER: f64 = i64::MIN as f64;
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= LOWER && *f < -LOWER)
            .map(|f| f as i64)
    })
}

/// Equality used by the matcher and update operators
///
/// Numbers are equal when numerically equal (`1 == 1.0`); embedded
/// documents are equal when they hold the same keys with equal values.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => match (integral_i64(n1), integral_i64(n2)) {
            (Some(i1), Some(i2)) => i1 == i2,
            _ => n1.as_f64() == n2.as_f64(),
        },
        (Value::Array(a1), Value::Array(a2)) => {
            a1.len() == a2.len() && a1.iter().zip(a2).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(m1), Value::Object(m2)) => {
            m1.len() == m2.len()
                && m1
                    .iter()
                    .all(|(k, v)| m2.get(k).map(|w| values_equal(v, w)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// Ordering for the range operators
///
/// Only numbers with numbers, strings with strings and booleans with booleans
/// compare; every other pairing is `None`, so `$gt` and friends never match it.
///
/// ```
/// use serde_json::json;
/// use std::cmp::Ordering;
/// use docstore_core::value_utils::compare_values;
///
/// assert_eq!(compare_values(&json!(90), &json!(90.0)), Some(Ordering::Equal));
/// assert_eq!(compare_values(&json!("pear"), &json!("apple")), Some(Ordering::Greater));
/// assert_eq!(compare_values(&json!("9"), &json!(4)), None);
/// ```
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => match (integral_i64(n1), integral_i64(n2)) {
            (Some(i1), Some(i2)) => Some(i1.cmp(&i2)),
            _ => n1.as_f64()?.partial_cmp(&n2.as_f64()?),
        },
        (Value::String(s1), Value::String(s2)) => Some(s1.cmp(s2)),
        (Value::Bool(b1), Value::Bool(b2)) => Some(b1.cmp(b2)),
        _ => None,
    }
}

/// Type rank for mixed-type ordering: null < number < string < object < array < bool
fn type_rank(val: &Value) -> u8 {
    match val {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over JSON values, used for sorting and ordered outputs
pub fn total_cmp(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Object(m1), Value::Object(m2)) => {
            for ((k1, v1), (k2, v2)) in m1.iter().zip(m2.iter()) {
                let ord = k1.cmp(k2).then_with(|| total_cmp(v1, v2));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            m1.len().cmp(&m2.len())
        }
        (Value::Array(a1), Value::Array(a2)) => {
            for (x, y) in a1.iter().zip(a2.iter()) {
                let ord = total_cmp(x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a1.len().cmp(&a2.len())
        }
        _ => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

/// Sort-key comparison where a missing field orders before everything, `null` included
///
/// ```
/// use serde_json::json;
/// use std::cmp::Ordering;
/// use docstore_core::value_utils::compare_values_with_none;
///
/// assert_eq!(compare_values_with_none(None, Some(&json!(null))), Ordering::Less);
/// assert_eq!(compare_values_with_none(Some(&json!("a")), Some(&json!(7))), Ordering::Greater);
/// ```
pub fn compare_values_with_none(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => total_cmp(x, y),
        _ => a.is_some().cmp(&b.is_some()),
    }
}

/// Numeric addition preserving integers where possible
///
/// Returns `None` when either side is not a number. Integer overflow falls
/// back to floating point.
pub fn numeric_add(a: &Value, b: &Value) -> Option<Value> {
    let (Value::Number(n1), Value::Number(n2)) = (a, b) else {
        return None;
    };
    if let (Some(i1), Some(i2)) = (n1.as_i64(), n2.as_i64()) {
        if let Some(sum) = i1.checked_add(i2) {
            return Some(Value::from(sum));
        }
    }
    let sum = n1.as_f64()? + n2.as_f64()?;
    serde_json::Number::from_f64(sum).map(Value::Number)
}

/// Short type name used in error messages
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "double",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Hashable rendering of a value: sorted object keys, integral floats as integers
///
/// Values that are [`values_equal`] render identically, so the string can key
/// group buckets, distinct sets and index entries.
///
/// ```
/// use serde_json::json;
/// use docstore_core::value_utils::canonical_json_string;
///
/// let key = json!({"city": "Oslo", "year": 2020});
/// let same = json!({"year": 2020.0, "city": "Oslo"});
/// assert_eq!(canonical_json_string(&key), canonical_json_string(&same));
/// ```
pub fn canonical_json_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(child) = map.get(key) {
                    write_canonical(child, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Number(n) => match integral_i64(n) {
            Some(i) => out.push_str(&i.to_string()),
            None => out.push_str(&n.to_string()),
        },
        scalar => out.push_str(&scalar.to_string()),
    }
}
