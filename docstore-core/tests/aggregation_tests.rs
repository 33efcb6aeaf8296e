// aggregation_tests.rs
// group, distinct and map-reduce over collections

use docstore_core::{CollectionCore, DatabaseCore, DocStoreError, GroupSpec, MapReduce};
use serde_json::{json, Map, Value};
use std::sync::Arc;

fn cities(db: &DatabaseCore) -> Arc<CollectionCore> {
    let coll = db.collection("cities");
    coll.insert_many(vec![
        json!({"city": "Springfield", "zip": "01101", "pop": 100}),
        json!({"city": "Shelbyville", "zip": "02201", "pop": 70}),
        json!({"city": "Springfield", "zip": "01102", "pop": 250}),
        json!({"city": "Shelbyville", "zip": "02202", "pop": 30}),
        json!({"city": "Springfield", "zip": "01103", "pop": 50}),
        json!({"city": "Shelbyville", "zip": "02203", "pop": 5}),
    ])
    .unwrap();
    coll
}

fn sum_pop(doc: &docstore_core::Document, acc: &mut Map<String, Value>) {
    let pop = doc.get("pop").and_then(Value::as_i64).unwrap_or(0);
    let total = acc.get("total").and_then(Value::as_i64).unwrap_or(0);
    acc.insert("total".to_string(), json!(total + pop));
}

// ========== GROUP ==========

#[test]
fn test_group_population_by_city() {
    let db = DatabaseCore::new();
    let coll = cities(&db);

    let groups = coll
        .group(
            GroupSpec::by_fields(["city"])
                .initial(json!({"total": 0}))
                .reduce(sum_pop),
        )
        .unwrap();

    assert_eq!(
        groups,
        vec![
            json!({"city": "Springfield", "total": 400}),
            json!({"city": "Shelbyville", "total": 105}),
        ]
    );
}

#[test]
fn test_group_with_condition_and_finalize() {
    let db = DatabaseCore::new();
    let coll = cities(&db);

    let groups = coll
        .group(
            GroupSpec::by_fields(["city"])
                .initial(json!({"total": 0, "count": 0}))
                .condition(json!({"pop": {"$gte": 50}}))
                .reduce(|doc, acc| {
                    sum_pop(doc, acc);
                    let count = acc.get("count").and_then(Value::as_i64).unwrap_or(0);
                    acc.insert("count".to_string(), json!(count + 1));
                })
                .finalize(|acc| {
                    let total = acc.get("total").and_then(Value::as_f64).unwrap_or(0.0);
                    let count = acc.get("count").and_then(Value::as_f64).unwrap_or(1.0);
                    acc.insert("avg".to_string(), json!(total / count));
                }),
        )
        .unwrap();

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0]["count"], json!(3));
    assert_eq!(groups[0]["avg"], json!(400.0 / 3.0));
    assert_eq!(groups[1], json!({"city": "Shelbyville", "total": 70, "count": 1, "avg": 70.0}));
}

#[test]
fn test_group_by_key_function() {
    let db = DatabaseCore::new();
    let coll = cities(&db);

    let groups = coll
        .group(
            GroupSpec::by_key(|doc| {
                let big = doc.get("pop").and_then(Value::as_i64).unwrap_or(0) >= 100;
                let mut key = Map::new();
                key.insert("big".to_string(), json!(big));
                key
            })
            .initial(json!({"total": 0}))
            .reduce(sum_pop),
        )
        .unwrap();

    assert_eq!(
        groups,
        vec![json!({"big": true, "total": 350}), json!({"big": false, "total": 155})]
    );
}

#[test]
fn test_group_rejects_non_object_initial() {
    let db = DatabaseCore::new();
    let coll = cities(&db);
    let result = coll.group(GroupSpec::by_fields(["city"]).initial(json!(0)));
    assert!(matches!(result, Err(DocStoreError::AggregationError(_))));
}

// ========== DISTINCT ==========

#[test]
fn test_distinct_values() {
    let db = DatabaseCore::new();
    let coll = db.collection("articles");
    coll.insert_many(vec![
        json!({"author": "kim", "tags": ["db", "rust"], "meta": {"lang": "en"}}),
        json!({"author": "lee", "tags": ["rust"], "meta": {"lang": "ko"}}),
        json!({"author": "kim", "tags": [], "meta": {"lang": "en"}}),
        json!({"author": "park"}),
    ])
    .unwrap();

    assert_eq!(
        coll.distinct("author", &json!({})).unwrap(),
        vec![json!("kim"), json!("lee"), json!("park")]
    );
    // Array values are unwound
    assert_eq!(coll.distinct("tags", &json!({})).unwrap(), vec![json!("db"), json!("rust")]);
    // Nested and filtered
    assert_eq!(coll.distinct("meta.lang", &json!({})).unwrap(), vec![json!("en"), json!("ko")]);
    assert_eq!(
        coll.distinct("meta.lang", &json!({"author": "kim"})).unwrap(),
        vec![json!("en")]
    );
}

// ========== MAP-REDUCE ==========

#[test]
fn test_map_reduce_vote_sums() {
    let db = DatabaseCore::new();
    let coll = db.collection("posts");
    coll.insert_many(vec![
        json!({"author": "ann", "votes": 3}),
        json!({"author": "bob", "votes": 5}),
        json!({"author": "ann", "votes": 4}),
        json!({"author": "cal", "votes": 1}),
        json!({"author": "ann", "votes": 2}),
    ])
    .unwrap();

    let job = MapReduce::new(
        |doc, emitter| {
            if let (Some(author), Some(votes)) = (doc.get("author"), doc.get("votes")) {
                emitter.emit(author.clone(), votes.clone());
            }
        },
        |_key, values| json!(values.iter().filter_map(Value::as_i64).sum::<i64>()),
    );
    let results = coll.map_reduce(job).unwrap();

    assert_eq!(
        results,
        vec![
            json!({"_id": "ann", "value": 9}),
            json!({"_id": "bob", "value": 5}),
            json!({"_id": "cal", "value": 1}),
        ]
    );
}

#[test]
fn test_map_reduce_query_and_finalize() {
    let db = DatabaseCore::new();
    let coll = db.collection("posts");
    coll.insert_many(vec![
        json!({"author": "ann", "votes": 3}),
        json!({"author": "ann", "votes": 7}),
        json!({"author": "bob", "votes": 0}),
    ])
    .unwrap();

    let job = MapReduce::new(
        |doc, emitter| emitter.emit(doc.get("author").cloned().unwrap_or(Value::Null), json!(1)),
        |_key, values| json!(values.len()),
    )
    .query(json!({"votes": {"$gt": 0}}))
    .finalize(|_key, value| json!({"posts": value}));

    assert_eq!(
        coll.map_reduce(job).unwrap(),
        vec![json!({"_id": "ann", "value": {"posts": 2}})]
    );
}

#[test]
fn test_large_numbers_bucket_like_the_matcher() {
    let db = DatabaseCore::new();
    let coll = db.collection("big");
    coll.insert_many(vec![
        json!({"n": 9007199254740992.0}),
        json!({"n": 9007199254740992_i64}),
        json!({"n": 9007199254740993_i64}),
    ])
    .unwrap();

    assert_eq!(coll.count_documents(&json!({"n": 9007199254740992.0})).unwrap(), 2);
    let groups = coll
        .group(GroupSpec::by_fields(["n"]).initial(json!({"total": 0})).reduce(sum_pop))
        .unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(coll.distinct("n", &json!({})).unwrap().len(), 2);
}
