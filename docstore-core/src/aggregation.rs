// docstore-core/src/aggregation.rs
// Grouping, distinct and map-reduce over a collection's documents

use ahash::{AHashMap, AHashSet};
use serde_json::{Map, Value};
use std::fmt;

use crate::document::{Document, ID_FIELD};
use crate::error::{DocStoreError, Result};
use crate::query::Query;
use crate::value_utils::{canonical_json_string, collect_path_values, total_cmp};

type KeyFn = Box<dyn FnMut(&Document) -> Map<String, Value>>;
type ReduceFn = Box<dyn FnMut(&Document, &mut Map<String, Value>)>;
type FinalizeFn = Box<dyn FnMut(&mut Map<String, Value>)>;
type MapFn = Box<dyn FnMut(&Document, &mut Emitter)>;
type ReduceValuesFn = Box<dyn FnMut(&Value, &[Value]) -> Value>;
type FinalizeValueFn = Box<dyn FnMut(&Value, Value) -> Value>;

// ============================================================================
// GROUP
// ============================================================================

enum GroupKey {
    Fields(Vec<String>),
    Function(KeyFn),
}

/// Grouping request
///
/// ```rust
/// use docstore_core::{DatabaseCore, GroupSpec};
/// use serde_json::json;
///
/// let db = DatabaseCore::new();
/// let cities = db.collection("cities");
/// cities.insert_one(json!({"city": "Paris", "pop": 10})).unwrap();
/// cities.insert_one(json!({"city": "Lyon", "pop": 4})).unwrap();
/// cities.insert_one(json!({"city": "Paris", "pop": 5})).unwrap();
///
/// let groups = cities
///     .group(
///         GroupSpec::by_fields(["city"])
///             .initial(json!({"total": 0}))
///             .reduce(|doc, acc| {
///                 let pop = doc.get("pop").and_then(|v| v.as_i64()).unwrap_or(0);
///                 let total = acc["total"].as_i64().unwrap_or(0);
///                 acc.insert("total".into(), json!(total + pop));
///             }),
///     )
///     .unwrap();
/// assert_eq!(groups[0], json!({"city": "Paris", "total": 15}));
/// assert_eq!(groups[1], json!({"city": "Lyon", "total": 4}));
/// ```
pub struct GroupSpec {
    key: GroupKey,
    initial: Value,
    reduce: ReduceFn,
    finalize: Option<FinalizeFn>,
    condition: Option<Value>,
}

impl GroupSpec {
    /// Group by the values of the given (dotted) fields; a missing field groups as null
    pub fn by_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_key(GroupKey::Fields(fields.into_iter().map(Into::into).collect()))
    }

    /// Group by a computed key document
    pub fn by_key<F>(key: F) -> Self
    where
        F: FnMut(&Document) -> Map<String, Value> + 'static,
    {
        Self::with_key(GroupKey::Function(Box::new(key)))
    }

    fn with_key(key: GroupKey) -> Self {
        GroupSpec {
            key,
            initial: Value::Object(Map::new()),
            reduce: Box::new(|_, _| {}),
            finalize: None,
            condition: None,
        }
    }

    /// Starting accumulator, copied for every group; must be an object
    pub fn initial(mut self, initial: Value) -> Self {
        self.initial = initial;
        self
    }

    pub fn reduce<F>(mut self, reduce: F) -> Self
    where
        F: FnMut(&Document, &mut Map<String, Value>) + 'static,
    {
        self.reduce = Box::new(reduce);
        self
    }

    /// Runs once per group after every reduction; edits the accumulator in place
    pub fn finalize<F>(mut self, finalize: F) -> Self
    where
        F: FnMut(&mut Map<String, Value>) + 'static,
    {
        self.finalize = Some(Box::new(finalize));
        self
    }

    /// Filter applied before grouping
    pub fn condition(mut self, filter: Value) -> Self {
        self.condition = Some(filter);
        self
    }

    fn key_of(&mut self, doc: &Document) -> Map<String, Value> {
        match &mut self.key {
            GroupKey::Fields(fields) => fields
                .iter()
                .map(|f| (f.clone(), doc.get(f).cloned().unwrap_or(Value::Null)))
                .collect(),
            GroupKey::Function(key) => key(doc),
        }
    }
}

impl fmt::Debug for GroupSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = match &self.key {
            GroupKey::Fields(fields) => format!("{:?}", fields),
            GroupKey::Function(_) => "<fn>".to_string(),
        };
        f.debug_struct("GroupSpec")
            .field("key", &key)
            .field("initial", &self.initial)
            .field("finalize", &self.finalize.is_some())
            .field("condition", &self.condition)
            .finish()
    }
}

fn compile_filter(filter: Option<&Value>) -> Result<Query> {
    match filter {
        Some(filter) => Query::parse(filter),
        None => Ok(Query::all()),
    }
}

/// Partition `docs` by key and fold each partition into its accumulator
///
/// Groups appear in order of first occurrence; each output record holds the
/// key fields followed by the accumulator fields.
pub fn group(docs: &[Document], mut spec: GroupSpec) -> Result<Vec<Value>> {
    let Value::Object(initial) = spec.initial.clone() else {
        return Err(DocStoreError::AggregationError(
            "group initial value must be an object".to_string(),
        ));
    };
    let condition = compile_filter(spec.condition.as_ref())?;

    let mut positions: AHashMap<String, usize> = AHashMap::new();
    let mut groups: Vec<(Map<String, Value>, Map<String, Value>)> = Vec::new();

    for doc in docs.iter().filter(|d| condition.matches(d)) {
        let key = spec.key_of(doc);
        let bucket = canonical_json_string(&Value::Object(key.clone()));
        let position = *positions.entry(bucket).or_insert_with(|| {
            groups.push((key, initial.clone()));
            groups.len() - 1
        });
        (spec.reduce)(doc, &mut groups[position].1);
    }

    log::debug!("group: {} documents into {} groups", docs.len(), groups.len());

    Ok(groups
        .into_iter()
        .map(|(key, mut acc)| {
            if let Some(finalize) = spec.finalize.as_mut() {
                finalize(&mut acc);
            }
            let mut record = key;
            record.extend(acc);
            Value::Object(record)
        })
        .collect())
}

// ============================================================================
// DISTINCT
// ============================================================================

/// Distinct values of a (dotted) field, unwinding arrays, in ascending order
pub fn distinct(docs: &[Document], field: &str) -> Vec<Value> {
    let mut seen: AHashSet<String> = AHashSet::new();
    let mut values = Vec::new();
    for doc in docs {
        for value in collect_path_values(doc.fields(), field) {
            let candidates: Vec<&Value> = match value {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            for candidate in candidates {
                if seen.insert(canonical_json_string(candidate)) {
                    values.push(candidate.clone());
                }
            }
        }
    }
    values.sort_by(total_cmp);
    values
}

// ============================================================================
// MAP-REDUCE
// ============================================================================

/// Collects the `(key, value)` pairs a map function emits
#[derive(Debug, Default)]
pub struct Emitter {
    pairs: Vec<(Value, Value)>,
}

impl Emitter {
    pub fn emit(&mut self, key: Value, value: Value) {
        self.pairs.push((key, value));
    }
}

/// Map-reduce request
pub struct MapReduce {
    map: MapFn,
    reduce: ReduceValuesFn,
    query: Option<Value>,
    finalize: Option<FinalizeValueFn>,
}

impl MapReduce {
    pub fn new<M, R>(map: M, reduce: R) -> Self
    where
        M: FnMut(&Document, &mut Emitter) + 'static,
        R: FnMut(&Value, &[Value]) -> Value + 'static,
    {
        MapReduce {
            map: Box::new(map),
            reduce: Box::new(reduce),
            query: None,
            finalize: None,
        }
    }

    /// Only map documents matching `filter`
    pub fn query(mut self, filter: Value) -> Self {
        self.query = Some(filter);
        self
    }

    pub fn finalize<F>(mut self, finalize: F) -> Self
    where
        F: FnMut(&Value, Value) -> Value + 'static,
    {
        self.finalize = Some(Box::new(finalize));
        self
    }
}

impl fmt::Debug for MapReduce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapReduce")
            .field("query", &self.query)
            .field("finalize", &self.finalize.is_some())
            .finish()
    }
}

/// Run a map-reduce job; results are `{"_id": key, "value": v}` ordered by key
///
/// `reduce` is only called for keys emitted more than once.
pub fn map_reduce(docs: &[Document], mut job: MapReduce) -> Result<Vec<Value>> {
    let query = compile_filter(job.query.as_ref())?;

    let mut emitter = Emitter::default();
    for doc in docs.iter().filter(|d| query.matches(d)) {
        (job.map)(doc, &mut emitter);
    }

    let mut positions: AHashMap<String, usize> = AHashMap::new();
    let mut buckets: Vec<(Value, Vec<Value>)> = Vec::new();
    for (key, value) in emitter.pairs {
        let bucket = canonical_json_string(&key);
        match positions.get(&bucket) {
            Some(&i) => buckets[i].1.push(value),
            None => {
                positions.insert(bucket, buckets.len());
                buckets.push((key, vec![value]));
            }
        }
    }
    buckets.sort_by(|a, b| total_cmp(&a.0, &b.0));

    log::debug!("map_reduce: {} keys", buckets.len());

    let mut results = Vec::with_capacity(buckets.len());
    for (key, mut values) in buckets {
        let reduced = if values.len() == 1 {
            values.pop().unwrap_or(Value::Null)
        } else {
            (job.reduce)(&key, &values)
        };
        let value = match job.finalize.as_mut() {
            Some(finalize) => finalize(&key, reduced),
            None => reduced,
        };
        let mut record = Map::new();
        record.insert(ID_FIELD.to_string(), key);
        record.insert("value".to_string(), value);
        results.push(Value::Object(record));
    }
    Ok(results)
}
