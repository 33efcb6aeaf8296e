// docstore-core/src/index.rs
// Secondary indexes: ordered key → document id sets, used to narrow equality lookups

use ahash::AHashSet;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::document::{Document, DocumentId, ID_FIELD};
use crate::error::{DocStoreError, Result};
use crate::find_options::SortOrder;
use crate::query::Query;
use crate::value_utils::{canonical_json_string, collect_path_values, integral_i64, split_path};

/// Name of the implicit primary index
pub const ID_INDEX_NAME: &str = "_id_";

/// Index key - supported types for indexing
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat),
    String(String),
    /// Embedded documents and arrays, keyed by their canonical JSON form
    Composite(String),
    /// Compound key for multi-field indexes (e.g., ["country", "city"])
    Compound(Vec<IndexKey>),
}

/// OrderedFloat wrapper for f64 to enable Ord
#[derive(Debug, Clone, Copy)]
pub struct OrderedFloat(pub f64);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for OrderedFloat {}

impl std::hash::Hash for OrderedFloat {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Convert serde_json::Value to IndexKey
///
/// Integral floats become `Int` so `1` and `1.0` share a key, matching the
/// numeric equality the matcher uses.
impl From<&Value> for IndexKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => IndexKey::Null,
            Value::Bool(b) => IndexKey::Bool(*b),
            Value::Number(n) => match (integral_i64(n), n.as_f64()) {
                (Some(i), _) => IndexKey::Int(i),
                (None, Some(f)) => IndexKey::Float(OrderedFloat(f)),
                (None, None) => IndexKey::Null,
            },
            Value::String(s) => IndexKey::String(s.clone()),
            other => IndexKey::Composite(canonical_json_string(other)),
        }
    }
}

/// Public description of an index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub keys: Vec<(String, SortOrder)>,
}

impl IndexInfo {
    fn for_keys(keys: Vec<(String, SortOrder)>) -> Self {
        let name = keys
            .iter()
            .map(|(field, order)| format!("{}_{}", field, order.as_i32()))
            .collect::<Vec<_>>()
            .join("_");
        IndexInfo { name, keys }
    }

    pub fn is_compound(&self) -> bool {
        self.keys.len() > 1
    }
}

/// Candidate set produced by the planner
#[derive(Debug, Clone, PartialEq)]
pub struct IndexProbe {
    pub name: String,
    pub ids: Vec<DocumentId>,
    pub bounds: Value,
}

struct SecondaryIndex {
    info: IndexInfo,
    entries: BTreeMap<IndexKey, AHashSet<DocumentId>>,
}

impl SecondaryIndex {
    /// Every key a document contributes (several for array fields)
    fn keys_for(&self, doc: &Document) -> Vec<IndexKey> {
        let per_field: Vec<Vec<IndexKey>> = self
            .info
            .keys
            .iter()
            .map(|(field, _)| field_keys(doc, field))
            .collect();

        if !self.info.is_compound() {
            return per_field.into_iter().next().unwrap_or_default();
        }

        let mut combos: Vec<Vec<IndexKey>> = vec![Vec::new()];
        for keys in per_field {
            combos = combos
                .into_iter()
                .flat_map(|prefix| {
                    keys.iter().map(move |k| {
                        let mut next = prefix.clone();
                        next.push(k.clone());
                        next
                    })
                })
                .collect();
        }
        combos.into_iter().map(IndexKey::Compound).collect()
    }

    fn insert(&mut self, doc: &Document) {
        for key in self.keys_for(doc) {
            self.entries.entry(key).or_default().insert(doc.id().clone());
        }
    }

    fn remove(&mut self, doc: &Document) {
        for key in self.keys_for(doc) {
            if let Some(ids) = self.entries.get_mut(&key) {
                ids.remove(doc.id());
                if ids.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
    }

    fn entry_count(&self) -> usize {
        self.entries.values().map(|ids| ids.len()).sum()
    }
}

/// Keys of one field; arrays contribute one key per element, a missing field indexes as null
fn field_keys(doc: &Document, field: &str) -> Vec<IndexKey> {
    let values = collect_path_values(doc.fields(), field);
    if values.is_empty() {
        return vec![IndexKey::Null];
    }
    let mut keys = Vec::new();
    for value in values {
        match value {
            Value::Array(items) => keys.extend(items.iter().map(IndexKey::from)),
            other => keys.push(IndexKey::from(other)),
        }
    }
    keys.sort();
    keys.dedup();
    keys
}

/// Equality operands an index can answer exactly when re-checked by the matcher
fn indexable_operand(value: &Value) -> bool {
    matches!(value, Value::Bool(_) | Value::Number(_) | Value::String(_))
}

/// Secondary indexes of one collection
#[derive(Default)]
pub struct IndexManager {
    indexes: IndexMap<String, SecondaryIndex>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an index and build it from `docs`; creating an existing index returns its name
    pub fn create_index<'a>(
        &mut self,
        keys: Vec<(String, SortOrder)>,
        docs: impl Iterator<Item = &'a Document>,
    ) -> Result<String> {
        if keys.is_empty() {
            return Err(DocStoreError::IndexError(
                "index needs at least one field".to_string(),
            ));
        }
        for (field, _) in &keys {
            split_path(field).map_err(|e| DocStoreError::IndexError(e.to_string()))?;
        }
        if keys.len() == 1 && keys[0].0 == ID_FIELD {
            log::warn!("{} always exists; index request ignored", ID_INDEX_NAME);
            return Ok(ID_INDEX_NAME.to_string());
        }

        let info = IndexInfo::for_keys(keys);
        if self.indexes.contains_key(&info.name) {
            return Ok(info.name);
        }

        let name = info.name.clone();
        let mut index = SecondaryIndex {
            info,
            entries: BTreeMap::new(),
        };
        for doc in docs {
            index.insert(doc);
        }
        log::info!(
            "created index {} with {} entries",
            name,
            index.entry_count()
        );
        self.indexes.insert(name.clone(), index);
        Ok(name)
    }

    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        if name == ID_INDEX_NAME {
            return Err(DocStoreError::IndexError(
                "cannot drop the _id_ index".to_string(),
            ));
        }
        match self.indexes.shift_remove(name) {
            Some(_) => {
                log::info!("dropped index {}", name);
                Ok(())
            }
            None => Err(DocStoreError::IndexError(format!("index not found: {}", name))),
        }
    }

    /// Implicit `_id_` index first, then secondary indexes in creation order
    pub fn index_information(&self) -> Vec<IndexInfo> {
        let mut infos = Vec::with_capacity(self.indexes.len() + 1);
        infos.push(IndexInfo {
            name: ID_INDEX_NAME.to_string(),
            keys: vec![(ID_FIELD.to_string(), SortOrder::Ascending)],
        });
        infos.extend(self.indexes.values().map(|index| index.info.clone()));
        infos
    }

    pub fn insert_document(&mut self, doc: &Document) {
        for index in self.indexes.values_mut() {
            index.insert(doc);
        }
    }

    pub fn remove_document(&mut self, doc: &Document) {
        for index in self.indexes.values_mut() {
            index.remove(doc);
        }
    }

    pub fn replace_document(&mut self, old: &Document, new: &Document) {
        self.remove_document(old);
        self.insert_document(new);
    }

    /// Pick the index with the most fields pinned by plain equalities
    ///
    /// Returns `None` when no index applies; the caller then scans.
    pub fn plan(&self, query: &Query) -> Option<IndexProbe> {
        let equalities = query.equalities();
        let mut best: Option<(&SecondaryIndex, Vec<&Value>)> = None;

        for index in self.indexes.values() {
            let operands: Option<Vec<&Value>> = index
                .info
                .keys
                .iter()
                .map(|(field, _)| {
                    equalities
                        .iter()
                        .find(|(path, value)| path == field && indexable_operand(value))
                        .map(|(_, value)| *value)
                })
                .collect();
            if let Some(operands) = operands {
                let better = best
                    .as_ref()
                    .map(|(b, _)| index.info.keys.len() > b.info.keys.len())
                    .unwrap_or(true);
                if better {
                    best = Some((index, operands));
                }
            }
        }

        let (index, operands) = best?;
        let key = if index.info.is_compound() {
            IndexKey::Compound(operands.iter().map(|v| IndexKey::from(*v)).collect())
        } else {
            IndexKey::from(operands[0])
        };
        let ids = index
            .entries
            .get(&key)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        let mut bounds = serde_json::Map::new();
        for ((field, _), operand) in index.info.keys.iter().zip(&operands) {
            bounds.insert(field.clone(), json!([operand, operand]));
        }

        Some(IndexProbe {
            name: index.info.name.clone(),
            ids,
            bounds: Value::Object(bounds),
        })
    }
}
