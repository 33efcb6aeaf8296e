// docstore-core/src/collection_core.rs
// Collection logic: documents, identifiers, index maintenance
//
// FILE STRUCTURE:
// ├── Constructor
// ├── CRUD Operations
// │   ├── insert_one, insert_many, save
// │   ├── update, update_one, update_many
// │   └── remove, delete_one, delete_many
// ├── Query Operations
// │   ├── find, find_with_options, find_one, count_documents
// │   └── explain
// ├── Aggregation (distinct, group, map_reduce)
// ├── Index Operations (create_index, drop_index, index_information)
// └── Private Helpers (id assignment, candidate selection, upsert seeding)

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::aggregation::{self, GroupSpec, MapReduce};
use crate::config::IdGeneration;
use crate::cursor::{Cursor, QueryPlan};
use crate::document::{Document, DocumentId, ID_FIELD};
use crate::error::{DocStoreError, Result};
use crate::find_options::{FindOptions, SortOrder};
use crate::index::{IndexInfo, IndexManager, ID_INDEX_NAME};
use crate::query::Query;
use crate::update::{UpdateOptions, UpdateResult, UpdateSpec};
use crate::value_utils::split_path;

/// Result of insert_many operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<DocumentId>,
    pub inserted_count: usize,
}

struct CollectionState {
    /// Documents in insertion order, keyed by `_id`
    docs: IndexMap<DocumentId, Document>,
    indexes: IndexManager,
    /// Highest auto-increment identifier handed out so far
    last_id: u64,
}

/// Matching documents (by position in `docs`) plus how they were found
struct Selection {
    positions: Vec<usize>,
    plan: QueryPlan,
}

/// A named, ordered set of documents
///
/// All methods take `&self`; the state sits behind a read/write lock, so
/// writers are serialized and readers never observe a half-applied write.
pub struct CollectionCore {
    name: String,
    id_generation: IdGeneration,
    state: RwLock<CollectionState>,
}

impl CollectionCore {
    pub fn new(name: impl Into<String>, id_generation: IdGeneration) -> Self {
        CollectionCore {
            name: name.into(),
            id_generation,
            state: RwLock::new(CollectionState {
                docs: IndexMap::new(),
                indexes: IndexManager::new(),
                last_id: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of documents
    pub fn len(&self) -> usize {
        self.state.read().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========== CRUD OPERATIONS ==========

    /// Insert one document - returns its `_id`, generated when absent
    pub fn insert_one(&self, document: Value) -> Result<DocumentId> {
        let fields = Document::object_fields(document)?;
        let mut state = self.state.write();
        let mut last_id = state.last_id;
        let doc = self.prepare_document(&state.docs, None, &mut last_id, fields)?;
        let id = doc.id().clone();
        state.last_id = last_id;
        state.indexes.insert_document(&doc);
        state.docs.insert(id.clone(), doc);
        log::trace!("{}: inserted {}", self.name, id);
        Ok(id)
    }

    /// Insert many documents; on any failure nothing is inserted
    pub fn insert_many(&self, documents: Vec<Value>) -> Result<InsertManyResult> {
        let mut state = self.state.write();
        let mut last_id = state.last_id;
        let mut staged: IndexMap<DocumentId, Document> = IndexMap::with_capacity(documents.len());
        for document in documents {
            let fields = Document::object_fields(document)?;
            let doc = self.prepare_document(&state.docs, Some(&staged), &mut last_id, fields)?;
            staged.insert(doc.id().clone(), doc);
        }

        state.last_id = last_id;
        let mut inserted_ids = Vec::with_capacity(staged.len());
        for (id, doc) in staged {
            state.indexes.insert_document(&doc);
            state.docs.insert(id.clone(), doc);
            inserted_ids.push(id);
        }
        log::debug!("{}: inserted {} documents", self.name, inserted_ids.len());
        Ok(InsertManyResult {
            inserted_count: inserted_ids.len(),
            inserted_ids,
        })
    }

    /// Replace the document with the same `_id`, or insert when there is none
    pub fn save(&self, document: Value) -> Result<DocumentId> {
        let fields = Document::object_fields(document)?;
        let existing_id = match fields.get(ID_FIELD) {
            Some(raw) => Some(DocumentId::from_value(raw)?),
            None => None,
        };

        let mut state = self.state.write();
        if let Some(id) = existing_id {
            let replacement = Document::new(id.clone(), fields.clone());
            let state = &mut *state;
            if let Some(current) = state.docs.get_mut(&id) {
                state.indexes.replace_document(current, &replacement);
                *current = replacement;
                log::trace!("{}: saved over {}", self.name, id);
                return Ok(id);
            }
        }

        let mut last_id = state.last_id;
        let doc = self.prepare_document(&state.docs, None, &mut last_id, fields)?;
        let id = doc.id().clone();
        state.last_id = last_id;
        state.indexes.insert_document(&doc);
        state.docs.insert(id.clone(), doc);
        Ok(id)
    }

    /// Update documents matching `filter`
    ///
    /// Without `multi` only the first match (collection order) is touched.
    /// Every new document is computed before any is written, so a failing
    /// update leaves the collection unchanged. With `upsert` and no match, a
    /// document built from the filter's equalities and the update is inserted.
    pub fn update(&self, filter: &Value, update: &Value, options: UpdateOptions) -> Result<UpdateResult> {
        let query = Query::parse(filter)?;
        let spec = UpdateSpec::parse(update)?;
        if options.multi && spec.is_replacement() {
            return Err(DocStoreError::InvalidUpdate(
                "multi update requires update operators".to_string(),
            ));
        }

        let mut guard = self.state.write();
        let state = &mut *guard;
        let mut selection = self.select(state, &query, !options.multi);
        selection.positions.truncate(if options.multi { usize::MAX } else { 1 });

        if selection.positions.is_empty() {
            if !options.upsert {
                return Ok(UpdateResult::default());
            }
            let mut last_id = state.last_id;
            let doc = self.build_upsert(&state.docs, &mut last_id, &query, &spec)?;
            let id = doc.id().clone();
            state.last_id = last_id;
            state.indexes.insert_document(&doc);
            state.docs.insert(id.clone(), doc);
            log::debug!("{}: upserted {}", self.name, id);
            return Ok(UpdateResult {
                matched: 0,
                modified: 0,
                upserted_id: Some(id),
            });
        }

        let mut staged = Vec::with_capacity(selection.positions.len());
        for &position in &selection.positions {
            if let Some((_, current)) = state.docs.get_index(position) {
                let (updated, changed) = spec.apply(current)?;
                if changed {
                    staged.push((position, updated));
                }
            }
        }

        let result = UpdateResult {
            matched: selection.positions.len() as u64,
            modified: staged.len() as u64,
            upserted_id: None,
        };
        for (position, updated) in staged {
            if let Some((_, current)) = state.docs.get_index_mut(position) {
                state.indexes.replace_document(current, &updated);
                *current = updated;
            }
        }
        log::debug!(
            "{}: update matched {} modified {}",
            self.name,
            result.matched,
            result.modified
        );
        Ok(result)
    }

    pub fn update_one(&self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        self.update(filter, update, UpdateOptions::default())
    }

    pub fn update_many(&self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        self.update(filter, update, UpdateOptions::multi())
    }

    /// Remove every document matching `filter`; returns the number removed
    pub fn remove(&self, filter: &Value) -> Result<u64> {
        self.remove_matching(filter, usize::MAX)
    }

    pub fn delete_one(&self, filter: &Value) -> Result<u64> {
        self.remove_matching(filter, 1)
    }

    pub fn delete_many(&self, filter: &Value) -> Result<u64> {
        self.remove(filter)
    }

    fn remove_matching(&self, filter: &Value, limit: usize) -> Result<u64> {
        let query = Query::parse(filter)?;
        let mut guard = self.state.write();
        let state = &mut *guard;
        let selection = self.select(state, &query, limit == 1);

        let ids: Vec<DocumentId> = selection
            .positions
            .iter()
            .take(limit)
            .filter_map(|&p| state.docs.get_index(p).map(|(id, _)| id.clone()))
            .collect();
        for id in &ids {
            if let Some(doc) = state.docs.shift_remove(id) {
                state.indexes.remove_document(&doc);
            }
        }
        log::debug!("{}: removed {} documents", self.name, ids.len());
        Ok(ids.len() as u64)
    }

    // ========== QUERY OPERATIONS ==========

    /// Find documents matching `filter`
    pub fn find(&self, filter: &Value) -> Result<Cursor> {
        self.find_with_options(filter, FindOptions::default())
    }

    /// Find with projection, sort, skip and limit
    pub fn find_with_options(&self, filter: &Value, options: FindOptions) -> Result<Cursor> {
        options.validate()?;
        let query = Query::parse(filter)?;
        let state = self.state.read();
        let selection = self.select(&state, &query, false);
        let matched = selection
            .positions
            .iter()
            .filter_map(|&p| state.docs.get_index(p).map(|(_, doc)| doc.clone()))
            .collect();
        Ok(Cursor::new(matched, options, selection.plan))
    }

    /// First match in collection order
    pub fn find_one(&self, filter: &Value) -> Result<Option<Value>> {
        let query = Query::parse(filter)?;
        let state = self.state.read();
        let selection = self.select(&state, &query, true);
        Ok(selection
            .positions
            .first()
            .and_then(|&p| state.docs.get_index(p))
            .map(|(_, doc)| doc.to_value()))
    }

    pub fn count_documents(&self, filter: &Value) -> Result<u64> {
        let query = Query::parse(filter)?;
        let state = self.state.read();
        Ok(self.select(&state, &query, false).positions.len() as u64)
    }

    /// Plan summary for `filter`; see [`Cursor::explain`]
    pub fn explain(&self, filter: &Value) -> Result<Value> {
        Ok(self.find(filter)?.explain())
    }

    // ========== AGGREGATION ==========

    /// Distinct values of `field` among documents matching `filter`
    pub fn distinct(&self, field: &str, filter: &Value) -> Result<Vec<Value>> {
        split_path(field)?;
        let matched = self.snapshot(filter)?;
        Ok(aggregation::distinct(&matched, field))
    }

    /// Group all documents; the `GroupSpec` condition narrows the input
    pub fn group(&self, spec: GroupSpec) -> Result<Vec<Value>> {
        let docs = self.snapshot(&Value::Null)?;
        aggregation::group(&docs, spec)
    }

    pub fn map_reduce(&self, job: MapReduce) -> Result<Vec<Value>> {
        let docs = self.snapshot(&Value::Null)?;
        aggregation::map_reduce(&docs, job)
    }

    /// Clone the matching documents so user callbacks run without the lock held
    fn snapshot(&self, filter: &Value) -> Result<Vec<Document>> {
        let query = Query::parse(filter)?;
        let state = self.state.read();
        let selection = self.select(&state, &query, false);
        Ok(selection
            .positions
            .iter()
            .filter_map(|&p| state.docs.get_index(p).map(|(_, doc)| doc.clone()))
            .collect())
    }

    // ========== INDEX OPERATIONS ==========

    /// Create a (compound) index; returns its name, e.g. `"name_1"` or `"name_-1_author_-1"`
    pub fn create_index<I, S>(&self, keys: I) -> Result<String>
    where
        I: IntoIterator<Item = (S, SortOrder)>,
        S: Into<String>,
    {
        let keys: Vec<(String, SortOrder)> = keys.into_iter().map(|(f, o)| (f.into(), o)).collect();
        let mut guard = self.state.write();
        let state = &mut *guard;
        state.indexes.create_index(keys, state.docs.values())
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.state.write().indexes.drop_index(name)
    }

    /// The implicit `_id_` index followed by secondary indexes
    pub fn index_information(&self) -> Vec<IndexInfo> {
        self.state.read().indexes.index_information()
    }

    // ========== PRIVATE HELPERS ==========

    /// Positions of matching documents in collection order
    ///
    /// An `_id` equality is answered from the primary map, otherwise a
    /// secondary index is used when one applies; every candidate is still
    /// checked against the full query.
    fn select(&self, state: &CollectionState, query: &Query, first_only: bool) -> Selection {
        let (candidates, index, bounds): (Option<Vec<usize>>, Option<String>, Option<Value>) =
            match query
                .equality_for(ID_FIELD)
                .and_then(|raw| DocumentId::from_value(raw).ok().map(|id| (raw, id)))
            {
                Some((raw, id)) => (
                    Some(state.docs.get_index_of(&id).into_iter().collect()),
                    Some(ID_INDEX_NAME.to_string()),
                    Some(serde_json::json!({ "_id": [raw, raw] })),
                ),
                None => match state.indexes.plan(query) {
                    Some(probe) => {
                        let mut positions: Vec<usize> = probe
                            .ids
                            .iter()
                            .filter_map(|id| state.docs.get_index_of(id))
                            .collect();
                        positions.sort_unstable();
                        (Some(positions), Some(probe.name), Some(probe.bounds))
                    }
                    None => (None, None, None),
                },
            };

        let candidates: Box<dyn Iterator<Item = usize>> = match candidates {
            Some(candidates) => Box::new(candidates.into_iter()),
            None => Box::new(0..state.docs.len()),
        };
        let mut scanned = 0;
        let mut positions = Vec::new();
        for position in candidates {
            let Some((_, doc)) = state.docs.get_index(position) else {
                continue;
            };
            scanned += 1;
            if query.matches(doc) {
                positions.push(position);
                if first_only {
                    break;
                }
            }
        }

        log::debug!(
            "{}: {} scanned {} matched {}",
            self.name,
            index.as_deref().unwrap_or("collection scan"),
            scanned,
            positions.len()
        );
        Selection {
            positions,
            plan: QueryPlan {
                index,
                scanned,
                index_bounds: bounds,
            },
        }
    }

    /// Next auto-increment identifier not already taken
    fn next_auto_id(
        docs: &IndexMap<DocumentId, Document>,
        staged: Option<&IndexMap<DocumentId, Document>>,
        last_id: &mut u64,
    ) -> DocumentId {
        loop {
            let candidate = DocumentId::new_auto(*last_id);
            *last_id = last_id.saturating_add(1);
            let taken = docs.contains_key(&candidate)
                || staged.map(|s| s.contains_key(&candidate)).unwrap_or(false);
            if !taken {
                return candidate;
            }
        }
    }

    fn generate_id(
        &self,
        docs: &IndexMap<DocumentId, Document>,
        staged: Option<&IndexMap<DocumentId, Document>>,
        last_id: &mut u64,
    ) -> DocumentId {
        match self.id_generation {
            IdGeneration::AutoIncrement => Self::next_auto_id(docs, staged, last_id),
            IdGeneration::ObjectId => DocumentId::new_object_id(),
        }
    }

    /// Assign or validate `_id` and reject duplicates
    fn prepare_document(
        &self,
        docs: &IndexMap<DocumentId, Document>,
        staged: Option<&IndexMap<DocumentId, Document>>,
        last_id: &mut u64,
        fields: Map<String, Value>,
    ) -> Result<Document> {
        let id = match fields.get(ID_FIELD) {
            Some(raw) => DocumentId::from_value(raw)?,
            None => self.generate_id(docs, staged, last_id),
        };
        let duplicate =
            docs.contains_key(&id) || staged.map(|s| s.contains_key(&id)).unwrap_or(false);
        if duplicate {
            return Err(DocStoreError::DuplicateKey(format!("{}: {}", self.name, id)));
        }
        Ok(Document::new(id, fields))
    }

    /// Document inserted by an upsert that matched nothing
    fn build_upsert(
        &self,
        docs: &IndexMap<DocumentId, Document>,
        last_id: &mut u64,
        query: &Query,
        spec: &UpdateSpec,
    ) -> Result<Document> {
        let filter_id = query.equality_for(ID_FIELD).cloned();

        let fields = match spec {
            UpdateSpec::Replace(body) => {
                let mut fields = body.clone();
                if !fields.contains_key(ID_FIELD) {
                    if let Some(id) = filter_id {
                        fields.insert(ID_FIELD.to_string(), id);
                    }
                }
                fields
            }
            UpdateSpec::Operators(_) => {
                let mut seed = Map::new();
                if let Some(id) = filter_id {
                    seed.insert(ID_FIELD.to_string(), id);
                }
                let seed_id = match seed.get(ID_FIELD) {
                    Some(raw) => DocumentId::from_value(raw)?,
                    None => self.generate_id(docs, None, last_id),
                };
                let mut doc = Document::new(seed_id, seed);
                for (path, value) in query.equalities() {
                    if path != ID_FIELD {
                        doc.set_path(path, value.clone())?;
                    }
                }
                let (updated, _) = spec.apply(&doc)?;
                updated.fields().clone()
            }
        };
        self.prepare_document(docs, None, last_id, fields)
    }
}
