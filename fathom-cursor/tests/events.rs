//! Listener registration and dispatch on the cursor adapter.

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use bson::{Document, doc};
use fathom_cursor::{CursorAdapter, DriverCursor, EventPayload, events, listener};
use futures::TryStreamExt;
use pretty_assertions::assert_eq;

use common::{MemoryCollection, MemoryCursor, counting_listener, numbered_docs};

fn native(n: i32) -> MemoryCursor {
    MemoryCollection::new("numbers", numbered_docs(n)).find(doc! {})
}

#[tokio::test]
async fn test_close_listener_is_registered_on_both_emitters() {
    let native = native(2);
    let native_events = native.events();
    let cursor = CursorAdapter::<Document, _>::new(native);
    let (_, on_close) = counting_listener();

    cursor.on(events::CLOSE, on_close);
    assert_eq!(native_events.listener_count(events::CLOSE), 1);
    assert_eq!(cursor.event_names(), vec![events::CLOSE.to_string()]);
    assert_eq!(cursor.listener_count(events::CLOSE), 1);
}

#[tokio::test]
async fn test_other_events_stay_on_the_adapter() {
    let native = native(2);
    let native_events = native.events();
    let cursor = CursorAdapter::<Document, _>::new(native);
    let (_, on_end) = counting_listener();

    cursor.on(events::END, on_end);
    assert_eq!(native_events.listener_count(events::END), 0);
    assert_eq!(cursor.listener_count(events::END), 1);
}

#[tokio::test]
async fn test_close_is_notified_once() {
    let mut cursor = CursorAdapter::<Document, _>::new(native(3));
    let (closes, on_close) = counting_listener();
    cursor.on(events::CLOSE, on_close);

    let docs: Vec<Document> = (&mut cursor).try_collect().await.unwrap();
    assert_eq!(docs.len(), 3);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    cursor.close().await.unwrap();
    cursor.destroy(None).await.unwrap();
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_once_close_is_dropped_after_firing() {
    let native = native(2);
    let native_events = native.events();
    let mut cursor = CursorAdapter::<Document, _>::new(native);
    let (closes, on_close) = counting_listener();
    let (early, on_early) = counting_listener();
    cursor.once(events::CLOSE, on_close);
    cursor.prepend_once_listener(events::CLOSE, on_early);

    assert_eq!(native_events.listener_count(events::CLOSE), 2);
    assert!(cursor.event_names().is_empty());

    cursor.to_vec().await.unwrap();
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(early.load(Ordering::SeqCst), 1);
    assert_eq!(cursor.listener_count(events::CLOSE), 0);
    assert!(native_events.event_names().is_empty());
}

#[tokio::test]
async fn test_emit_close_goes_through_native_emitter_only() {
    let cursor = CursorAdapter::<Document, _>::new(native(1));
    let (closes, on_close) = counting_listener();
    cursor.on(events::CLOSE, on_close);

    assert!(cursor.emit(events::CLOSE, &EventPayload::Empty));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_removal_applies_to_both_emitters() {
    let native = native(1);
    let native_events = native.events();
    let cursor = CursorAdapter::<Document, _>::new(native);
    let (closes, on_close) = counting_listener();

    cursor.on(events::CLOSE, on_close.clone());
    cursor.off(events::CLOSE, &on_close);
    assert_eq!(native_events.listener_count(events::CLOSE), 0);
    assert!(cursor.event_names().is_empty());

    cursor.on(events::CLOSE, on_close.clone());
    cursor.on(events::END, on_close);
    cursor.remove_all_listeners(None);
    assert_eq!(native_events.listener_count(events::CLOSE), 0);
    assert_eq!(cursor.listener_count(events::END), 0);

    native_events.emit(events::CLOSE, &EventPayload::Empty);
    assert_eq!(closes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_max_listeners_applies_to_both_emitters() {
    let native = native(1);
    let native_events = native.events();
    let cursor = CursorAdapter::<Document, _>::new(native);

    assert_eq!(cursor.get_max_listeners(), events::DEFAULT_MAX_LISTENERS);
    cursor.set_max_listeners(3);
    assert_eq!(cursor.get_max_listeners(), 3);
    assert_eq!(native_events.max_listeners(), 3);
}

#[tokio::test]
async fn test_once_and_prepend_order() {
    let mut cursor = CursorAdapter::<Document, _>::new(native(2));
    let order = Arc::new(Mutex::new(Vec::new()));

    let record = |tag: &'static str| {
        let order = order.clone();
        listener(move |_| order.lock().unwrap().push(tag))
    };
    cursor.on(events::PAUSE, record("on"));
    cursor.prepend_listener(events::PAUSE, record("prepended"));
    cursor.once(events::PAUSE, record("once"));

    let raw = cursor.raw_listeners(events::PAUSE);
    assert_eq!(
        raw.iter().map(|(_, once)| *once).collect::<Vec<_>>(),
        vec![false, false, true]
    );

    cursor.pause();
    cursor.resume();
    cursor.pause();
    assert_eq!(
        *order.lock().unwrap(),
        vec!["prepended", "on", "once", "prepended", "on"]
    );
    assert_eq!(cursor.listeners(events::PAUSE).len(), 2);
}

#[tokio::test]
async fn test_end_and_error_payloads() {
    let mut cursor = CursorAdapter::<Document, _>::new(native(4).fail_on_fetch(5));
    let (ends, on_end) = counting_listener();
    let (errors, on_error) = counting_listener();
    cursor.on(events::END, on_end);
    cursor.on(events::ERROR, on_error);

    // The failing fetch discards the four documents pulled before it.
    let outcome: Result<Vec<Document>, _> = (&mut cursor).try_collect().await;
    assert!(outcome.is_err());
    assert_eq!(ends.load(Ordering::SeqCst), 0);
    assert_eq!(errors.load(Ordering::SeqCst), 1);

    let mut healthy = CursorAdapter::<Document, _>::new(native(2));
    let (ends, on_end) = counting_listener();
    healthy.on(events::END, on_end);
    healthy.to_vec().await.unwrap();
    assert_eq!(ends.load(Ordering::SeqCst), 1);
}
