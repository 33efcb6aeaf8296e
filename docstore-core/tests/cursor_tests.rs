// cursor_tests.rs
// Projection, sort, skip and limit through find_with_options and cursor modifiers

use docstore_core::{CollectionCore, DatabaseCore, DocStoreError, FindOptions, SortOrder};
use serde_json::{json, Value};
use std::sync::Arc;

fn people(db: &DatabaseCore) -> Arc<CollectionCore> {
    let coll = db.collection("people");
    coll.insert_many(vec![
        json!({"_id": 1, "name": "Cleo", "age": 41, "address": {"city": "Oslo", "zip": "0150"}}),
        json!({"_id": 2, "name": "Abe", "age": 29, "address": {"city": "Bergen", "zip": "5003"}}),
        json!({"_id": 3, "name": "Bea", "age": 35}),
        json!({"_id": 4, "name": "Dan", "age": 29, "address": {"city": "Oslo", "zip": "0151"}}),
    ])
    .unwrap();
    coll
}

fn field(docs: &[Value], name: &str) -> Vec<Value> {
    docs.iter().map(|d| d[name].clone()).collect()
}

// ========== PROJECTION ==========

#[test]
fn test_projection_include_keeps_id() {
    let db = DatabaseCore::new();
    let coll = people(&db);
    let docs = coll
        .find_with_options(&json!({"_id": 1}), FindOptions::new().with_projection([("name", 1)]))
        .unwrap()
        .to_vec();
    assert_eq!(docs, vec![json!({"_id": 1, "name": "Cleo"})]);
}

#[test]
fn test_projection_exclude_id() {
    let db = DatabaseCore::new();
    let coll = people(&db);
    let docs = coll
        .find_with_options(
            &json!({}),
            FindOptions::new().with_projection([("name", 1), ("_id", 0)]),
        )
        .unwrap()
        .to_vec();
    assert!(docs.iter().all(|d| d.as_object().map(|m| m.len()) == Some(1)));
}

#[test]
fn test_projection_exclude_and_nested() {
    let db = DatabaseCore::new();
    let coll = people(&db);

    let excluded = coll
        .find_with_options(&json!({"_id": 1}), FindOptions::new().with_projection([("address", 0)]))
        .unwrap()
        .to_vec();
    assert_eq!(excluded, vec![json!({"_id": 1, "name": "Cleo", "age": 41})]);

    let nested = coll
        .find_with_options(
            &json!({"_id": 1}),
            FindOptions::new().with_projection([("address.city", 1)]),
        )
        .unwrap()
        .to_vec();
    assert_eq!(nested, vec![json!({"_id": 1, "address": {"city": "Oslo"}})]);
}

#[test]
fn test_mixed_projection_rejected() {
    let db = DatabaseCore::new();
    let coll = people(&db);
    let result = coll.find_with_options(
        &json!({}),
        FindOptions::new().with_projection([("name", 1), ("age", 0)]),
    );
    assert!(matches!(result, Err(DocStoreError::InvalidQuery(_))));
}

// ========== SORT / SKIP / LIMIT ==========

#[test]
fn test_sort_strings_and_integers() {
    let db = DatabaseCore::new();
    let coll = people(&db);

    let by_name = coll
        .find_with_options(&json!({}), FindOptions::new().with_sort([("name", SortOrder::Ascending)]))
        .unwrap()
        .to_vec();
    assert_eq!(
        field(&by_name, "name"),
        vec![json!("Abe"), json!("Bea"), json!("Cleo"), json!("Dan")]
    );

    let by_age = coll
        .find_with_options(&json!({}), FindOptions::new().with_sort([("age", SortOrder::Descending)]))
        .unwrap()
        .to_vec();
    assert_eq!(field(&by_age, "age"), vec![json!(41), json!(35), json!(29), json!(29)]);
}

#[test]
fn test_multi_key_sort_is_stable() {
    let db = DatabaseCore::new();
    let coll = people(&db);
    let docs = coll
        .find(&json!({}))
        .unwrap()
        .sort([("age", SortOrder::Ascending), ("name", SortOrder::Descending)])
        .unwrap()
        .to_vec();
    assert_eq!(field(&docs, "_id"), vec![json!(4), json!(2), json!(3), json!(1)]);
}

#[test]
fn test_missing_sort_field_first() {
    let db = DatabaseCore::new();
    let coll = people(&db);
    let docs = coll
        .find_with_options(
            &json!({}),
            FindOptions::new().with_sort([("address.city", SortOrder::Ascending)]),
        )
        .unwrap()
        .to_vec();
    // Bea has no address; Oslo ties keep insertion order
    assert_eq!(field(&docs, "_id"), vec![json!(3), json!(2), json!(1), json!(4)]);
}

#[test]
fn test_skip_limit_paging() {
    let db = DatabaseCore::new();
    let coll = db.collection("n");
    coll.insert_many((1..=25).map(|i| json!({"_id": i})).collect())
        .unwrap();

    let page = |skip: usize| -> Vec<Value> {
        let docs = coll
            .find_with_options(
                &json!({}),
                FindOptions::new()
                    .with_sort([("_id", SortOrder::Ascending)])
                    .with_skip(skip)
                    .with_limit(10),
            )
            .unwrap()
            .to_vec();
        field(&docs, "_id")
    };
    assert_eq!(page(0).len(), 10);
    assert_eq!(page(10)[0], json!(11));
    assert_eq!(page(20), (21..=25).map(|i| json!(i)).collect::<Vec<_>>());
    assert!(page(30).is_empty());
}

#[test]
fn test_count_and_bounded_count() {
    let db = DatabaseCore::new();
    let coll = people(&db);
    let cursor = coll.find(&json!({})).unwrap().skip(1).limit(2);
    assert_eq!(cursor.count(), 4);
    assert_eq!(cursor.count_bounded(), 2);
    assert_eq!(cursor.iter().count(), 2);
}

#[test]
fn test_cursor_restartable_and_snapshot() {
    let db = DatabaseCore::new();
    let coll = people(&db);
    let cursor = coll
        .find(&json!({"age": 29}))
        .unwrap()
        .sort([("name", SortOrder::Ascending)])
        .unwrap();

    coll.update_many(&json!({}), &json!({"$set": {"age": 0}})).unwrap();
    coll.insert_one(json!({"name": "Eve", "age": 29})).unwrap();

    let first: Vec<Value> = cursor.iter().collect();
    let second: Vec<Value> = (&cursor).into_iter().collect();
    assert_eq!(first, second);
    assert_eq!(field(&first, "name"), vec![json!("Abe"), json!("Dan")]);
    assert_eq!(first[0]["age"], json!(29));
}
