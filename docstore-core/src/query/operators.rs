// docstore-core/src/query/operators.rs
//! Field-level query operators
//!
//! Every operator a field condition may use is a variant of [`Condition`].
//! Operator documents such as `{"$gte": 90, "$lte": 95}` are parsed once by
//! [`parse_field_conditions`]; evaluation then works on the set of values a
//! path resolves to (see [`collect_path_values`](crate::value_utils::collect_path_values)).
//!
//! ```text
//! Condition
//!     ↓
//! ┌────────────────┬────────────────┬────────────────┬────────────────┐
//! │ Comparison     │ Set            │ Array          │ Element        │
//! │ ($eq, $gt...)  │ ($in, $nin)    │ ($all, $size,  │ ($exists,      │
//! │                │                │  $elemMatch)   │  $type, $regex)│
//! └────────────────┴────────────────┴────────────────┴────────────────┘
//! ```

use lazy_static::lazy_static;
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::num::NonZeroUsize;

use super::Query;
use crate::document::DocumentId;
use crate::error::{DocStoreError, Result};
use crate::value_utils::{compare_values, values_equal};

// ============================================================================
// REGEX WITH OPTIONS SUPPORT
// ============================================================================

const REGEX_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(size) => size,
    None => panic!("regex cache size must be non-zero"),
};

lazy_static! {
    /// Compiled patterns shared by all queries, keyed by "options/pattern"
    static ref REGEX_CACHE: Mutex<LruCache<String, Regex>> =
        Mutex::new(LruCache::new(REGEX_CACHE_SIZE));
}

/// Build the pattern string with inline flags for `$options`
///
/// Supports `i` (case insensitive), `m` (multiline anchors), `s` (dot
/// matches newline) and `x` (extended, whitespace ignored).
fn build_regex_pattern(pattern: &str, options: &str) -> Result<String> {
    if let Some(bad) = options.chars().find(|c| !matches!(c, 'i' | 'm' | 's' | 'x')) {
        return Err(DocStoreError::InvalidQuery(format!(
            "invalid $options flag '{}'",
            bad
        )));
    }
    if options.is_empty() {
        Ok(pattern.to_string())
    } else {
        Ok(format!("(?{}){}", options, pattern))
    }
}

/// Get or compile a regex pattern through the shared LRU cache
pub(crate) fn compile_regex(pattern: &str, options: &str) -> Result<Regex> {
    let cache_key = format!("{}/{}", options, pattern);

    if let Some(regex) = REGEX_CACHE.lock().get(&cache_key) {
        return Ok(regex.clone());
    }

    let regex = Regex::new(&build_regex_pattern(pattern, options)?).map_err(|e| {
        DocStoreError::InvalidQuery(format!("invalid regex pattern '{}': {}", pattern, e))
    })?;

    REGEX_CACHE.lock().put(cache_key, regex.clone());
    Ok(regex)
}

// ============================================================================
// CONDITION TYPES
// ============================================================================

/// Type names accepted by `$type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Double,
    String,
    Object,
    Array,
    Bool,
    Null,
    Int,
    Number,
}

impl ValueType {
    fn parse(operand: &Value) -> Result<Self> {
        let name = match operand {
            Value::String(s) => s.as_str(),
            Value::Number(n) => match n.as_i64() {
                Some(1) => "double",
                Some(2) => "string",
                Some(3) => "object",
                Some(4) => "array",
                Some(8) => "bool",
                Some(10) => "null",
                Some(16) | Some(18) => "int",
                _ => {
                    return Err(DocStoreError::InvalidQuery(format!(
                        "unknown $type code {}",
                        n
                    )))
                }
            },
            _ => {
                return Err(DocStoreError::InvalidQuery(
                    "$type requires a type name or code".to_string(),
                ))
            }
        };
        Ok(match name {
            "double" => ValueType::Double,
            "string" => ValueType::String,
            "object" => ValueType::Object,
            "array" => ValueType::Array,
            "bool" | "boolean" => ValueType::Bool,
            "null" => ValueType::Null,
            "int" | "long" => ValueType::Int,
            "number" => ValueType::Number,
            other => {
                return Err(DocStoreError::InvalidQuery(format!(
                    "unknown $type name '{}'",
                    other
                )))
            }
        })
    }

    fn holds(self, value: &Value) -> bool {
        match self {
            ValueType::Double => value.is_f64(),
            ValueType::String => value.is_string(),
            ValueType::Object => value.is_object(),
            ValueType::Array => value.is_array(),
            ValueType::Bool => value.is_boolean(),
            ValueType::Null => value.is_null(),
            ValueType::Int => value.is_i64() || value.is_u64(),
            ValueType::Number => value.is_number(),
        }
    }
}

/// `$elemMatch` operand
#[derive(Debug, Clone)]
pub enum ElemMatch {
    /// Sub-filter applied to embedded-document elements: `{"$elemMatch": {"a": 1, "b": {"$gt": 1}}}`
    Filter(Box<Query>),
    /// Operator document applied to each element: `{"$elemMatch": {"$gte": 80, "$lt": 85}}`
    Operators(Vec<Condition>),
}

/// One compiled field condition
#[derive(Debug, Clone)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    All(Vec<Value>),
    Size(usize),
    Exists(bool),
    Type(ValueType),
    Regex(Regex),
    ElemMatch(ElemMatch),
    Not(Vec<Condition>),
}

// ============================================================================
// PARSING
// ============================================================================

/// Whether a filter value is an operator document rather than a literal
pub(crate) fn is_operator_doc(map: &Map<String, Value>) -> bool {
    !DocumentId::is_object_id_literal(map)
        && map.keys().next().map(|k| k.starts_with('$')).unwrap_or(false)
}

/// Parse the value side of a `field: value` filter entry
pub fn parse_field_conditions(operand: &Value) -> Result<Vec<Condition>> {
    match operand {
        Value::Object(map) if is_operator_doc(map) => parse_operator_doc(map),
        literal => Ok(vec![Condition::Eq(literal.clone())]),
    }
}

fn parse_operator_doc(map: &Map<String, Value>) -> Result<Vec<Condition>> {
    let mut conditions = Vec::with_capacity(map.len());
    let options = match map.get("$options") {
        None => None,
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => {
            return Err(DocStoreError::InvalidQuery(
                "$options must be a string".to_string(),
            ))
        }
    };
    if options.is_some() && !map.contains_key("$regex") {
        return Err(DocStoreError::InvalidQuery(
            "$options needs a $regex".to_string(),
        ));
    }

    for (op, operand) in map {
        let condition = match op.as_str() {
            "$eq" => Condition::Eq(operand.clone()),
            "$ne" => Condition::Ne(operand.clone()),
            "$gt" => Condition::Gt(operand.clone()),
            "$gte" => Condition::Gte(operand.clone()),
            "$lt" => Condition::Lt(operand.clone()),
            "$lte" => Condition::Lte(operand.clone()),
            "$in" => Condition::In(array_operand(op, operand)?),
            "$nin" => Condition::Nin(array_operand(op, operand)?),
            "$all" => Condition::All(array_operand(op, operand)?),
            "$size" => Condition::Size(size_operand(operand)?),
            "$exists" => Condition::Exists(exists_operand(operand)),
            "$type" => Condition::Type(ValueType::parse(operand)?),
            "$regex" => match operand {
                Value::String(pattern) => {
                    Condition::Regex(compile_regex(pattern, options.unwrap_or(""))?)
                }
                _ => {
                    return Err(DocStoreError::InvalidQuery(
                        "$regex requires a string pattern".to_string(),
                    ))
                }
            },
            "$options" => continue,
            "$elemMatch" => Condition::ElemMatch(parse_elem_match(operand)?),
            "$not" => match operand {
                Value::Object(inner) if is_operator_doc(inner) => {
                    Condition::Not(parse_operator_doc(inner)?)
                }
                _ => {
                    return Err(DocStoreError::InvalidQuery(
                        "$not requires an operator document".to_string(),
                    ))
                }
            },
            other if other.starts_with('$') => {
                return Err(DocStoreError::UnsupportedOperator(other.to_string()))
            }
            other => {
                return Err(DocStoreError::InvalidQuery(format!(
                    "cannot mix operators and field '{}' in one condition",
                    other
                )))
            }
        };
        conditions.push(condition);
    }
    Ok(conditions)
}

fn array_operand(op: &str, operand: &Value) -> Result<Vec<Value>> {
    match operand {
        Value::Array(items) => Ok(items.clone()),
        _ => Err(DocStoreError::InvalidQuery(format!(
            "{} requires an array",
            op
        ))),
    }
}

fn size_operand(operand: &Value) -> Result<usize> {
    let size = operand.as_u64().or_else(|| {
        operand
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0)
            .map(|f| f as u64)
    });
    size.map(|s| s as usize).ok_or_else(|| {
        DocStoreError::InvalidQuery("$size requires a non-negative integer".to_string())
    })
}

/// `$exists` takes any truthy value the way the shell does: `false`, `0` and `null` mean absent
fn exists_operand(operand: &Value) -> bool {
    match operand {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        _ => true,
    }
}

fn parse_elem_match(operand: &Value) -> Result<ElemMatch> {
    let Value::Object(map) = operand else {
        return Err(DocStoreError::InvalidQuery(
            "$elemMatch requires an object".to_string(),
        ));
    };
    let operator_form = map
        .keys()
        .next()
        .map(|k| k.starts_with('$') && !matches!(k.as_str(), "$and" | "$or" | "$nor"))
        .unwrap_or(false);
    if operator_form {
        Ok(ElemMatch::Operators(parse_operator_doc(map)?))
    } else {
        Ok(ElemMatch::Filter(Box::new(Query::parse(operand)?)))
    }
}

// ============================================================================
// EVALUATION
// ============================================================================

impl Condition {
    /// Evaluate against the values a field path resolved to
    ///
    /// `values` is empty when the path is missing from the document.
    pub fn matches(&self, values: &[&Value]) -> bool {
        match self {
            Condition::Eq(expected) => eq_matches(values, expected),
            Condition::Ne(expected) => !eq_matches(values, expected),
            Condition::Gt(bound) => compare_matches(values, bound, |o| o == Ordering::Greater),
            Condition::Gte(bound) => compare_matches(values, bound, |o| o != Ordering::Less),
            Condition::Lt(bound) => compare_matches(values, bound, |o| o == Ordering::Less),
            Condition::Lte(bound) => compare_matches(values, bound, |o| o != Ordering::Greater),
            Condition::In(set) => set.iter().any(|item| eq_matches(values, item)),
            Condition::Nin(set) => !set.iter().any(|item| eq_matches(values, item)),
            Condition::All(required) => all_matches(values, required),
            Condition::Size(size) => values
                .iter()
                .any(|v| v.as_array().map(|a| a.len() == *size).unwrap_or(false)),
            Condition::Exists(expected) => !values.is_empty() == *expected,
            Condition::Type(kind) => values.iter().any(|v| {
                kind.holds(v)
                    || v.as_array()
                        .map(|a| a.iter().any(|e| kind.holds(e)))
                        .unwrap_or(false)
            }),
            Condition::Regex(regex) => values.iter().any(|v| match v {
                Value::String(s) => regex.is_match(s),
                Value::Array(items) => items
                    .iter()
                    .any(|e| e.as_str().map(|s| regex.is_match(s)).unwrap_or(false)),
                _ => false,
            }),
            Condition::ElemMatch(elem_match) => values.iter().any(|v| {
                let Some(items) = v.as_array() else {
                    return false;
                };
                items.iter().any(|item| match elem_match {
                    ElemMatch::Filter(query) => item
                        .as_object()
                        .map(|fields| query.matches_fields(fields))
                        .unwrap_or(false),
                    ElemMatch::Operators(conditions) => {
                        conditions.iter().all(|c| c.matches(&[item]))
                    }
                })
            }),
            Condition::Not(inner) => !inner.iter().all(|c| c.matches(values)),
        }
    }

    /// Plain equality operand, if this condition is one
    pub fn equality_operand(&self) -> Option<&Value> {
        match self {
            Condition::Eq(value) => Some(value),
            _ => None,
        }
    }
}

/// Equality with implicit array containment; `null` also matches a missing field
fn eq_matches(values: &[&Value], expected: &Value) -> bool {
    if values.is_empty() {
        return expected.is_null();
    }
    values.iter().any(|v| {
        values_equal(v, expected)
            || v.as_array()
                .map(|items| items.iter().any(|e| values_equal(e, expected)))
                .unwrap_or(false)
    })
}

fn compare_matches<F>(values: &[&Value], bound: &Value, predicate: F) -> bool
where
    F: Fn(Ordering) -> bool,
{
    let check = |v: &Value| compare_values(v, bound).map(&predicate).unwrap_or(false);
    values.iter().any(|v| match v {
        Value::Array(items) => items.iter().any(check),
        other => check(other),
    })
}

fn all_matches(values: &[&Value], required: &[Value]) -> bool {
    if required.is_empty() {
        return false;
    }
    values.iter().any(|v| match v {
        Value::Array(items) => required
            .iter()
            .all(|r| items.iter().any(|e| values_equal(e, r))),
        scalar => required.iter().all(|r| values_equal(scalar, r)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(operand: Value, field: Option<Value>) -> bool {
        let conditions = parse_field_conditions(&operand).unwrap();
        let values: Vec<&Value> = field.iter().collect();
        conditions.iter().all(|c| c.matches(&values))
    }

    #[test]
    fn test_eq_literal_and_array_containment() {
        assert!(check(json!("Alice"), Some(json!("Alice"))));
        assert!(check(json!("b"), Some(json!(["a", "b"]))));
        assert!(check(json!(["a", "b"]), Some(json!(["a", "b"]))));
        assert!(!check(json!("c"), Some(json!(["a", "b"]))));
        assert!(check(json!(1.0), Some(json!(1))));
    }

    #[test]
    fn test_eq_null_matches_missing() {
        assert!(check(json!(null), None));
        assert!(check(json!(null), Some(json!(null))));
        assert!(!check(json!(null), Some(json!(0))));
    }

    #[test]
    fn test_ne_operator() {
        assert!(check(json!({"$ne": 5}), Some(json!(4))));
        assert!(check(json!({"$ne": 5}), None));
        assert!(!check(json!({"$ne": 5}), Some(json!([1, 5]))));
    }

    #[test]
    fn test_comparison_operators() {
        assert!(check(json!({"$gt": 90}), Some(json!(91))));
        assert!(!check(json!({"$gt": 90}), Some(json!(90))));
        assert!(check(json!({"$gte": 90, "$lte": 95}), Some(json!(95))));
        assert!(!check(json!({"$gte": 90, "$lte": 95}), Some(json!(96))));
        assert!(check(json!({"$lt": 3}), Some(json!([10, 2]))));
        assert!(!check(json!({"$gt": 1}), None));
    }

    #[test]
    fn test_comparison_strings() {
        assert!(check(json!({"$gt": "b"}), Some(json!("c"))));
        assert!(!check(json!({"$gt": "b"}), Some(json!("a"))));
    }

    #[test]
    fn test_comparison_incompatible_types() {
        assert!(!check(json!({"$gt": 5}), Some(json!("10"))));
        assert!(!check(json!({"$lt": "z"}), Some(json!(1))));
        assert!(!check(json!({"$gte": true}), Some(json!(1))));
    }

    #[test]
    fn test_in_nin() {
        assert!(check(json!({"$in": [1, 2]}), Some(json!(2))));
        assert!(check(json!({"$in": ["x", "y"]}), Some(json!(["a", "y"]))));
        assert!(!check(json!({"$in": [1, 2]}), None));
        assert!(check(json!({"$in": [null]}), None));
        assert!(check(json!({"$nin": [1, 2]}), Some(json!(3))));
        assert!(check(json!({"$nin": [1, 2]}), None));
        assert!(!check(json!({"$nin": [1, 2]}), Some(json!([2, 3]))));
    }

    #[test]
    fn test_in_requires_array() {
        assert!(matches!(
            parse_field_conditions(&json!({"$in": 5})),
            Err(DocStoreError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_all_operator() {
        assert!(check(json!({"$all": ["a", "c"]}), Some(json!(["a", "b", "c"]))));
        assert!(!check(json!({"$all": ["a", "d"]}), Some(json!(["a", "b", "c"]))));
        assert!(check(json!({"$all": ["a"]}), Some(json!("a"))));
        assert!(!check(json!({"$all": []}), Some(json!(["a"]))));
    }

    #[test]
    fn test_size_operator() {
        assert!(check(json!({"$size": 3}), Some(json!([1, 2, 3]))));
        assert!(!check(json!({"$size": 2}), Some(json!([1, 2, 3]))));
        assert!(!check(json!({"$size": 0}), Some(json!("abc"))));
        assert!(parse_field_conditions(&json!({"$size": -1})).is_err());
    }

    #[test]
    fn test_exists_operator() {
        assert!(check(json!({"$exists": true}), Some(json!(null))));
        assert!(!check(json!({"$exists": true}), None));
        assert!(check(json!({"$exists": false}), None));
        assert!(check(json!({"$exists": 0}), None));
        assert!(!check(json!({"$exists": 1}), None));
    }

    #[test]
    fn test_type_operator() {
        assert!(check(json!({"$type": "string"}), Some(json!("x"))));
        assert!(check(json!({"$type": 2}), Some(json!("x"))));
        assert!(check(json!({"$type": "int"}), Some(json!(3))));
        assert!(check(json!({"$type": "double"}), Some(json!(3.5))));
        assert!(!check(json!({"$type": "double"}), Some(json!(3))));
        assert!(check(json!({"$type": "number"}), Some(json!(3))));
        assert!(check(json!({"$type": "bool"}), Some(json!(false))));
        assert!(check(json!({"$type": "string"}), Some(json!([1, "x"]))));
        assert!(parse_field_conditions(&json!({"$type": "decimal"})).is_err());
        assert!(parse_field_conditions(&json!({"$type": 99})).is_err());
    }

    #[test]
    fn test_regex_operator() {
        assert!(check(json!({"$regex": "^Al"}), Some(json!("Alice"))));
        assert!(!check(json!({"$regex": "^al"}), Some(json!("Alice"))));
        assert!(check(
            json!({"$regex": "^al", "$options": "i"}),
            Some(json!("Alice"))
        ));
        assert!(check(json!({"$regex": "b$"}), Some(json!(["xa", "xb"]))));
        assert!(!check(json!({"$regex": "1"}), Some(json!(1))));
    }

    #[test]
    fn test_regex_multiline_and_dotall() {
        assert!(check(
            json!({"$regex": "^two", "$options": "m"}),
            Some(json!("one\ntwo"))
        ));
        assert!(check(
            json!({"$regex": "one.two", "$options": "s"}),
            Some(json!("one\ntwo"))
        ));
    }

    #[test]
    fn test_regex_errors() {
        assert!(matches!(
            parse_field_conditions(&json!({"$regex": "(unclosed"})),
            Err(DocStoreError::InvalidQuery(_))
        ));
        assert!(matches!(
            parse_field_conditions(&json!({"$regex": "a", "$options": "q"})),
            Err(DocStoreError::InvalidQuery(_))
        ));
        assert!(matches!(
            parse_field_conditions(&json!({"$options": "i"})),
            Err(DocStoreError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_regex_cache_reuse() {
        let first = compile_regex("^cached[0-9]+$", "i").unwrap();
        let second = compile_regex("^cached[0-9]+$", "i").unwrap();
        assert_eq!(first.as_str(), second.as_str());
        assert!(second.is_match("CACHED42"));
    }

    #[test]
    fn test_elem_match_operator_form() {
        let op = json!({"$elemMatch": {"$gte": 80, "$lt": 85}});
        assert!(check(op.clone(), Some(json!([82, 90]))));
        assert!(!check(op.clone(), Some(json!([79, 90]))));
        assert!(!check(op, Some(json!(82))));
    }

    #[test]
    fn test_elem_match_filter_form() {
        let op = json!({"$elemMatch": {"a": 1, "b": {"$gt": 1}}});
        assert!(check(op.clone(), Some(json!([{"a": 1, "b": 2}]))));
        // Both conditions must hold on the same element
        assert!(!check(op, Some(json!([{"a": 1, "b": 0}, {"a": 2, "b": 5}]))));
    }

    #[test]
    fn test_not_operator() {
        assert!(check(json!({"$not": {"$gt": 5}}), Some(json!(3))));
        assert!(!check(json!({"$not": {"$gt": 5}}), Some(json!(7))));
        assert!(check(json!({"$not": {"$gt": 5}}), None));
        assert!(check(json!({"$not": {"$regex": "^a"}}), Some(json!("bcd"))));
        assert!(parse_field_conditions(&json!({"$not": 5})).is_err());
    }

    #[test]
    fn test_unknown_operator() {
        assert!(matches!(
            parse_field_conditions(&json!({"$near": [1, 2]})),
            Err(DocStoreError::UnsupportedOperator(op)) if op == "$near"
        ));
    }

    #[test]
    fn test_oid_literal_is_a_value() {
        let oid = json!({"$oid": "abc"});
        assert!(check(oid.clone(), Some(oid)));
        assert!(!check(json!({"$oid": "abc"}), Some(json!({"$oid": "abd"}))));
    }

    #[test]
    fn test_embedded_document_literal() {
        assert!(check(json!({"a": 1, "b": 2}), Some(json!({"a": 1, "b": 2}))));
        assert!(!check(json!({"a": 1}), Some(json!({"a": 1, "b": 2}))));
    }
}
