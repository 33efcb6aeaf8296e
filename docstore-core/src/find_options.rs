// docstore-core/src/find_options.rs
// Find query options: projection, sort, limit, skip

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::ops::Range;

use crate::document::{Document, ID_FIELD};
use crate::error::{DocStoreError, Result};
use crate::value_utils::{collect_path_values, compare_values_with_none, split_path, total_cmp};

/// Sort direction, serialized as `1` / `-1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_i32(self) -> i32 {
        match self {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        }
    }
}

impl From<SortOrder> for i32 {
    fn from(order: SortOrder) -> i32 {
        order.as_i32()
    }
}

impl TryFrom<i32> for SortOrder {
    type Error = DocStoreError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            1 => Ok(SortOrder::Ascending),
            -1 => Ok(SortOrder::Descending),
            other => Err(DocStoreError::InvalidQuery(format!(
                "sort direction must be 1 or -1, got {}",
                other
            ))),
        }
    }
}

/// Options for find queries
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Projection: field → 1 (include) or 0 (exclude)
    /// Special case: _id can be excluded in include mode
    pub projection: Option<Vec<(String, i32)>>,

    /// Sort keys in priority order
    pub sort: Option<Vec<(String, SortOrder)>>,

    /// Limit: maximum number of documents to return
    pub limit: Option<usize>,

    /// Skip: number of documents to skip (for pagination)
    pub skip: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projection<I, S>(mut self, projection: I) -> Self
    where
        I: IntoIterator<Item = (S, i32)>,
        S: Into<String>,
    {
        self.projection = Some(projection.into_iter().map(|(f, v)| (f.into(), v)).collect());
        self
    }

    pub fn with_sort<I, S>(mut self, sort: I) -> Self
    where
        I: IntoIterator<Item = (S, SortOrder)>,
        S: Into<String>,
    {
        self.sort = Some(sort.into_iter().map(|(f, o)| (f.into(), o)).collect());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Reject projections that mix inclusion and exclusion, and malformed paths
    pub fn validate(&self) -> Result<()> {
        if let Some(projection) = &self.projection {
            for (field, _) in projection {
                split_path(field)?;
            }
            let includes = projection.iter().any(|(_, v)| *v != 0);
            let excludes = projection
                .iter()
                .any(|(field, v)| *v == 0 && field != ID_FIELD);
            if includes && excludes {
                return Err(DocStoreError::InvalidQuery(
                    "projection cannot mix inclusion and exclusion".to_string(),
                ));
            }
        }
        if let Some(sort) = &self.sort {
            for (field, _) in sort {
                split_path(field)?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// PROJECTION
// ============================================================================

/// Field tree built from dotted projection paths
enum ProjectionNode {
    Leaf,
    Branch(HashMap<String, ProjectionNode>),
}

fn build_tree<'a>(paths: impl Iterator<Item = &'a str>) -> HashMap<String, ProjectionNode> {
    let mut root = HashMap::new();
    for path in paths {
        let mut level = &mut root;
        let mut parts = path.split('.').peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                level.insert(part.to_string(), ProjectionNode::Leaf);
                break;
            }
            let node = level
                .entry(part.to_string())
                .or_insert_with(|| ProjectionNode::Branch(HashMap::new()));
            match node {
                ProjectionNode::Branch(children) => level = children,
                // A shorter path already selects the whole subtree
                ProjectionNode::Leaf => break,
            }
        }
    }
    root
}

fn include_fields(fields: &Map<String, Value>, tree: &HashMap<String, ProjectionNode>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in fields {
        match tree.get(key) {
            Some(ProjectionNode::Leaf) => {
                out.insert(key.clone(), value.clone());
            }
            Some(ProjectionNode::Branch(children)) => {
                if let Some(projected) = include_value(value, children) {
                    out.insert(key.clone(), projected);
                }
            }
            None => {}
        }
    }
    out
}

fn include_value(value: &Value, tree: &HashMap<String, ProjectionNode>) -> Option<Value> {
    match value {
        Value::Object(map) => Some(Value::Object(include_fields(map, tree))),
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .filter_map(|item| match item {
                    Value::Object(_) | Value::Array(_) => include_value(item, tree),
                    _ => None,
                })
                .collect(),
        )),
        _ => None,
    }
}

fn exclude_fields(fields: &Map<String, Value>, tree: &HashMap<String, ProjectionNode>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in fields {
        match tree.get(key) {
            Some(ProjectionNode::Leaf) => {}
            Some(ProjectionNode::Branch(children)) => {
                out.insert(key.clone(), exclude_value(value, children));
            }
            None => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    out
}

fn exclude_value(value: &Value, tree: &HashMap<String, ProjectionNode>) -> Value {
    match value {
        Value::Object(map) => Value::Object(exclude_fields(map, tree)),
        Value::Array(items) => Value::Array(items.iter().map(|i| exclude_value(i, tree)).collect()),
        other => other.clone(),
    }
}

/// Apply projection to a document
///
/// Inclusion mode keeps the listed paths (rebuilt as nested documents for
/// dot notation) plus `_id`; exclusion mode drops the listed paths. `_id`
/// is only dropped when projected with `0`.
pub fn apply_projection(doc: &Document, projection: &[(String, i32)]) -> Value {
    if projection.is_empty() {
        return doc.to_value();
    }

    let include_mode = projection.iter().any(|(_, v)| *v != 0);
    let drop_id = projection.iter().any(|(f, v)| f == ID_FIELD && *v == 0);

    let mut result = if include_mode {
        let tree = build_tree(
            projection
                .iter()
                .filter(|(_, v)| *v != 0)
                .map(|(f, _)| f.as_str()),
        );
        let mut out = include_fields(doc.fields(), &tree);
        if !drop_id && !out.contains_key(ID_FIELD) {
            // _id stays first
            let mut with_id = Map::with_capacity(out.len() + 1);
            with_id.insert(ID_FIELD.to_string(), doc.id().to_value());
            with_id.extend(std::mem::take(&mut out));
            out = with_id;
        }
        out
    } else {
        let tree = build_tree(projection.iter().map(|(f, _)| f.as_str()));
        exclude_fields(doc.fields(), &tree)
    };

    if drop_id {
        result.shift_remove(ID_FIELD);
    }
    Value::Object(result)
}

// ============================================================================
// SORT, SKIP, LIMIT
// ============================================================================

/// Apply sort to documents
///
/// Stable multi-key sort; missing fields order before every present value.
/// Supports dot notation for nested fields (e.g., "address.city"). A path
/// that passes through an array (e.g., "lines.quantity") sorts by the
/// smallest element ascending and the largest descending.
pub fn apply_sort(docs: &mut [&Document], sort: &[(String, SortOrder)]) {
    if sort.is_empty() {
        return;
    }

    docs.sort_by(|a, b| {
        for (field, direction) in sort {
            let cmp = compare_values_with_none(
                sort_key(a, field, *direction),
                sort_key(b, field, *direction),
            );
            if cmp != std::cmp::Ordering::Equal {
                return match direction {
                    SortOrder::Ascending => cmp,
                    SortOrder::Descending => cmp.reverse(),
                };
            }
        }
        std::cmp::Ordering::Equal
    });
}

fn sort_key<'a>(doc: &'a Document, field: &str, direction: SortOrder) -> Option<&'a Value> {
    if let Some(exact) = doc.get(field) {
        return Some(exact);
    }
    let candidates = collect_path_values(doc.fields(), field);
    let mut flat = Vec::with_capacity(candidates.len());
    for value in candidates {
        match value {
            Value::Array(items) if !items.is_empty() => flat.extend(items.iter()),
            other => flat.push(other),
        }
    }
    let by_order = |x: &&Value, y: &&Value| total_cmp(x, y);
    match direction {
        SortOrder::Ascending => flat.into_iter().min_by(by_order),
        SortOrder::Descending => flat.into_iter().max_by(by_order),
    }
}

/// Window of positions left after skip and limit
pub fn limit_skip_range(len: usize, limit: Option<usize>, skip: Option<usize>) -> Range<usize> {
    let start = skip.unwrap_or(0).min(len);
    let end = match limit {
        Some(limit) => start.saturating_add(limit).min(len),
        None => len,
    };
    start..end
}
