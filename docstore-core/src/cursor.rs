// docstore-core/src/cursor.rs
// Snapshot-backed result cursor

use serde_json::{json, Value};
use std::sync::Arc;

use crate::document::Document;
use crate::find_options::{apply_projection, apply_sort, limit_skip_range, FindOptions, SortOrder};
use crate::error::Result;

/// How a cursor's matched set was produced, reported by [`Cursor::explain`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPlan {
    /// Index used to narrow the candidates, if any
    pub index: Option<String>,
    /// Documents examined by the matcher
    pub scanned: usize,
    /// Equality values the index was probed with
    pub index_bounds: Option<Value>,
}

/// Result of a find
///
/// The matched documents are captured when the cursor is created; later
/// writes to the collection are not visible through it. Projection, sort,
/// skip and limit are applied each time the cursor is iterated, so it can
/// be iterated any number of times with the same result.
#[derive(Debug, Clone)]
pub struct Cursor {
    snapshot: Arc<[Document]>,
    options: FindOptions,
    plan: QueryPlan,
}

impl Cursor {
    pub(crate) fn new(matched: Vec<Document>, options: FindOptions, plan: QueryPlan) -> Self {
        Cursor {
            snapshot: matched.into(),
            options,
            plan,
        }
    }

    pub fn options(&self) -> &FindOptions {
        &self.options
    }

    /// Replace the sort keys; validated like every other option
    pub fn sort<I, S>(mut self, sort: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, SortOrder)>,
        S: Into<String>,
    {
        self.options = self.options.with_sort(sort);
        self.options.validate()?;
        Ok(self)
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.options.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.options.limit = Some(limit);
        self
    }

    pub fn projection<I, S>(mut self, projection: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, i32)>,
        S: Into<String>,
    {
        self.options = self.options.with_projection(projection);
        self.options.validate()?;
        Ok(self)
    }

    /// Lazily yield the projected documents
    ///
    /// Sorting happens up front over references into the snapshot;
    /// projection runs per emitted document.
    pub fn iter(&self) -> CursorIter<'_> {
        let mut ordered: Vec<&Document> = self.snapshot.iter().collect();
        if let Some(sort) = &self.options.sort {
            apply_sort(&mut ordered, sort);
        }
        let window = limit_skip_range(ordered.len(), self.options.limit, self.options.skip);
        let windowed: Vec<&Document> = ordered
            .into_iter()
            .skip(window.start)
            .take(window.len())
            .collect();
        CursorIter {
            docs: windowed.into_iter(),
            projection: self.options.projection.as_deref(),
        }
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.iter().collect()
    }

    pub fn first(&self) -> Option<Value> {
        self.iter().next()
    }

    /// Number of matched documents, ignoring skip and limit
    pub fn count(&self) -> usize {
        self.snapshot.len()
    }

    /// Number of documents iteration would yield (skip and limit applied)
    pub fn count_bounded(&self) -> usize {
        limit_skip_range(self.snapshot.len(), self.options.limit, self.options.skip).len()
    }

    /// Short description of how the result was computed
    pub fn explain(&self) -> Value {
        let cursor = match &self.plan.index {
            Some(name) => format!("IndexCursor {}", name),
            None => "BasicCursor".to_string(),
        };
        json!({
            "cursor": cursor,
            "scanned": self.plan.scanned,
            "matched": self.snapshot.len(),
            "returned": self.count_bounded(),
            "index_bounds": self.plan.index_bounds.clone().unwrap_or_else(|| json!({})),
        })
    }
}

impl<'a> IntoIterator for &'a Cursor {
    type Item = Value;
    type IntoIter = CursorIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator returned by [`Cursor::iter`]
pub struct CursorIter<'a> {
    docs: std::vec::IntoIter<&'a Document>,
    projection: Option<&'a [(String, i32)]>,
}

impl<'a> Iterator for CursorIter<'a> {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        let doc = self.docs.next()?;
        Some(match self.projection {
            Some(projection) => apply_projection(doc, projection),
            None => doc.to_value(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.docs.size_hint()
    }
}

impl ExactSizeIterator for CursorIter<'_> {}
