//! Aggregation cursor: counting, launch, mapping and cloning.

mod common;

use std::sync::atomic::Ordering;

use bson::{Document, doc};
use fathom_cursor::{CursorError, CursorVariant};
use fathom_pipeline::{AggregationBuilder, Sort};
use pretty_assertions::assert_eq;

use common::{MemoryCollection, User, numbered_docs, user_docs};

fn users() -> MemoryCollection {
    MemoryCollection::new("users", user_docs())
}

fn paris_by_age() -> Vec<Document> {
    AggregationBuilder::new("users")
        .match_stage(doc! { "city": "Paris" })
        .sort(Sort::new().ascending("age"))
        .build_documents()
}

#[tokio::test]
async fn test_count_requires_filter() {
    let cursor = users().aggregation::<User>(&paris_by_age());

    let err = cursor.count().await.unwrap_err();
    assert!(matches!(err, CursorError::FilterNotSet));
    assert!(err.is_precondition());
}

#[tokio::test]
async fn test_count_with_empty_filter_uses_estimate() {
    let coll = users();
    let probes = coll.probes();
    let mut cursor = coll.aggregation::<User>(&paris_by_age());
    cursor.set_filter(doc! {});

    assert_eq!(cursor.count().await.unwrap(), 5);
    assert_eq!(probes.estimated_calls.load(Ordering::SeqCst), 1);
    assert_eq!(probes.exact_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_count_with_filter_counts_exactly() {
    let coll = users();
    let probes = coll.probes();
    let mut cursor = coll.aggregation::<User>(&paris_by_age());
    cursor.set_filter(doc! { "age": 42 });

    assert_eq!(cursor.filter(), Some(&doc! { "age": 42 }));
    assert_eq!(cursor.count().await.unwrap(), 1);
    assert_eq!(probes.exact_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_results_follow_the_pipeline() {
    let mut cursor = users().aggregation::<User>(&paris_by_age());
    let users = cursor.to_vec().await.unwrap();

    assert_eq!(
        users.iter().map(|u| u.name.as_str()).collect::<Vec<_>>(),
        vec!["alice"]
    );
}

#[tokio::test]
async fn test_launch_keeps_first_document() {
    let coll = MemoryCollection::new("numbers", numbered_docs(3));
    let native = coll.aggregate_cursor(&[]);
    let probes = native.probes();
    let mut cursor =
        fathom_cursor::AggregationCursor::<Document, _>::new(native, std::sync::Arc::new(coll));

    cursor.launch().await.unwrap();
    assert_eq!(probes.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(cursor.readable_length(), 1);

    let docs = cursor.to_vec().await.unwrap();
    assert_eq!(
        docs.iter().map(|d| d.get_i32("n").unwrap()).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
}

#[tokio::test]
async fn test_close_after_launch_yields_nothing() {
    let mut cursor = users().aggregation::<User>(&paris_by_age());

    cursor.launch().await.unwrap();
    assert_eq!(cursor.readable_length(), 1);

    cursor.close().await.unwrap();
    assert!(cursor.closed().await);
    assert!(!cursor.has_next().await.unwrap());
    assert!(cursor.to_vec().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_map_and_clone_keep_filter() {
    let mut cursor = users().aggregation::<User>(&[]);
    cursor.set_filter(doc! { "city": "Berlin" });

    let mut names = cursor.map(|u| u.name);
    assert_eq!(names.filter(), Some(&doc! { "city": "Berlin" }));

    let first = names.to_vec().await.unwrap();
    assert!(names.closed().await);

    let mut clone = names.clone_cursor().await;
    assert_eq!(clone.filter(), Some(&doc! { "city": "Berlin" }));
    assert!(!clone.closed().await);
    assert_eq!(clone.to_vec().await.unwrap(), first);
    assert_eq!(clone.count().await.unwrap(), 1);
}
