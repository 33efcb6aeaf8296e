// docstore-core/src/query.rs
//! Query module for filter expressions
//!
//! A filter such as `{"num": {"$gte": 90, "$lte": 95}, "kind": "a"}` is
//! compiled once into a [`Query`]; matching a compiled query against a
//! document cannot fail. Every malformed filter is reported by
//! [`Query::parse`]:
//!
//! - unknown operators: [`DocStoreError::UnsupportedOperator`]
//! - malformed operands: [`DocStoreError::InvalidQuery`]
//!
//! ```rust
//! use docstore_core::{Document, Query};
//! use serde_json::json;
//!
//! let query = Query::parse(&json!({"age": {"$gte": 18}, "status": "active"})).unwrap();
//! let doc = Document::from_value(json!({"_id": 1, "age": 30, "status": "active"})).unwrap();
//! assert!(query.matches(&doc));
//! ```

pub mod operators;

use serde_json::{Map, Value};

use crate::document::Document;
use crate::error::{DocStoreError, Result};
use crate::value_utils::{collect_path_values, split_path};

pub use operators::{Condition, ElemMatch, ValueType};

/// One top-level clause of a filter
#[derive(Debug, Clone)]
pub enum Predicate {
    /// All conditions must hold for the values at `path`
    Field {
        path: String,
        conditions: Vec<Condition>,
    },
    And(Vec<Query>),
    Or(Vec<Query>),
    Nor(Vec<Query>),
}

impl Predicate {
    fn matches(&self, fields: &Map<String, Value>) -> bool {
        match self {
            Predicate::Field { path, conditions } => {
                let values = collect_path_values(fields, path);
                conditions.iter().all(|c| c.matches(&values))
            }
            Predicate::And(queries) => queries.iter().all(|q| q.matches_fields(fields)),
            Predicate::Or(queries) => queries.iter().any(|q| q.matches_fields(fields)),
            Predicate::Nor(queries) => !queries.iter().any(|q| q.matches_fields(fields)),
        }
    }
}

/// A compiled filter: the conjunction of its predicates
///
/// The empty query matches every document.
#[derive(Debug, Clone, Default)]
pub struct Query {
    predicates: Vec<Predicate>,
}

impl Query {
    /// Query matching every document
    pub fn all() -> Self {
        Query::default()
    }

    /// Compile a filter expression
    ///
    /// `null` is accepted as the empty filter.
    pub fn parse(filter: &Value) -> Result<Self> {
        let map = match filter {
            Value::Object(map) => map,
            Value::Null => return Ok(Query::all()),
            other => {
                return Err(DocStoreError::InvalidQuery(format!(
                    "filter must be an object, got {}",
                    other
                )))
            }
        };

        let mut predicates = Vec::with_capacity(map.len());
        for (key, operand) in map {
            let predicate = match key.as_str() {
                "$and" => Predicate::And(Self::parse_clauses(key, operand)?),
                "$or" => Predicate::Or(Self::parse_clauses(key, operand)?),
                "$nor" => Predicate::Nor(Self::parse_clauses(key, operand)?),
                op if op.starts_with('$') => {
                    return Err(DocStoreError::UnsupportedOperator(op.to_string()))
                }
                path => {
                    split_path(path).map_err(|e| DocStoreError::InvalidQuery(e.to_string()))?;
                    Predicate::Field {
                        path: path.to_string(),
                        conditions: operators::parse_field_conditions(operand)?,
                    }
                }
            };
            predicates.push(predicate);
        }
        Ok(Query { predicates })
    }

    fn parse_clauses(op: &str, operand: &Value) -> Result<Vec<Query>> {
        match operand {
            Value::Array(items) if !items.is_empty() => items.iter().map(Query::parse).collect(),
            _ => Err(DocStoreError::InvalidQuery(format!(
                "{} requires a non-empty array of filters",
                op
            ))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Check if a document matches this query
    pub fn matches(&self, document: &Document) -> bool {
        self.matches_fields(document.fields())
    }

    /// Match against a bare field map (embedded documents, `$elemMatch` elements)
    pub fn matches_fields(&self, fields: &Map<String, Value>) -> bool {
        self.predicates.iter().all(|p| p.matches(fields))
    }

    /// Top-level plain equality conditions, in filter order
    ///
    /// Used to seed upserted documents and to pick an index.
    pub fn equalities(&self) -> Vec<(&str, &Value)> {
        self.predicates
            .iter()
            .filter_map(|p| match p {
                Predicate::Field { path, conditions } if conditions.len() == 1 => conditions[0]
                    .equality_operand()
                    .map(|value| (path.as_str(), value)),
                _ => None,
            })
            .collect()
    }

    /// Equality operand for a single path, if the filter pins it
    pub fn equality_for(&self, path: &str) -> Option<&Value> {
        self.equalities()
            .into_iter()
            .find(|(p, _)| *p == path)
            .map(|(_, v)| v)
    }
}

/// Compile `filter` and match it against one document
pub fn matches_filter(document: &Document, filter: &Value) -> Result<bool> {
    Ok(Query::parse(filter)?.matches(document))
}
