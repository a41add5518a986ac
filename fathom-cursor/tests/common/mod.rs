//! In-memory collection and cursor implementing the collaborator traits.
#![allow(dead_code)]

use std::cmp::Ordering as CmpOrdering;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use fathom_cursor::{
    AggregationCursor, CollectionOps, CursorError, CursorResult, DriverCursor, EventEmitter,
    EventPayload, FindCursor, FindDriverCursor, events,
};
use mongodb::Namespace;
use mongodb::options::{Collation, CollationStrength, Hint, ReadConcern, SelectionCriteria};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct User {
    pub name: String,
    pub age: i32,
    pub city: String,
}

pub fn user_docs() -> Vec<Document> {
    vec![
        doc! { "_id": 1, "name": "alice", "age": 31, "city": "Paris" },
        doc! { "_id": 2, "name": "bob", "age": 25, "city": "paris" },
        doc! { "_id": 3, "name": "carol", "age": 42, "city": "Berlin" },
        doc! { "_id": 4, "name": "dave", "age": 19, "city": "Lisbon" },
        doc! { "_id": 5, "name": "erin", "age": 37, "city": "PARIS" },
    ]
}

pub fn numbered_docs(n: i32) -> Vec<Document> {
    (0..n).map(|i| doc! { "_id": i, "n": i }).collect()
}

// ----------------------------------------------------------------------
// Matching helpers
// ----------------------------------------------------------------------

fn folds_case(collation: Option<&Collation>) -> bool {
    collation.is_some_and(|c| {
        matches!(
            c.strength,
            Some(CollationStrength::Primary | CollationStrength::Secondary)
        )
    })
}

pub fn matches(doc: &Document, filter: &Document, collation: Option<&Collation>) -> bool {
    let fold = folds_case(collation);
    filter.iter().all(|(key, expected)| match (doc.get(key), expected) {
        (Some(Bson::String(actual)), Bson::String(expected)) if fold => {
            actual.to_lowercase() == expected.to_lowercase()
        }
        (Some(actual), expected) => actual == expected,
        (None, _) => false,
    })
}

fn compare(a: Option<&Bson>, b: Option<&Bson>) -> CmpOrdering {
    match (a, b) {
        (Some(Bson::Int32(a)), Some(Bson::Int32(b))) => a.cmp(b),
        (Some(Bson::Int64(a)), Some(Bson::Int64(b))) => a.cmp(b),
        (Some(Bson::String(a)), Some(Bson::String(b))) => a.cmp(b),
        (Some(Bson::Double(a)), Some(Bson::Double(b))) => a.partial_cmp(b).unwrap_or(CmpOrdering::Equal),
        (None, Some(_)) => CmpOrdering::Less,
        (Some(_), None) => CmpOrdering::Greater,
        _ => CmpOrdering::Equal,
    }
}

fn direction(value: &Bson) -> i64 {
    match value {
        Bson::Int32(n) => *n as i64,
        Bson::Int64(n) => *n,
        _ => 1,
    }
}

fn project(doc: Document, projection: &Document) -> Document {
    doc.into_iter()
        .filter(|(key, _)| key == "_id" || projection.get(key).is_some_and(|v| direction(v) == 1))
        .collect()
}

/// Options a query accumulates before it runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub filter: Document,
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    pub projection: Option<Document>,
    pub collation: Option<Collation>,
    pub hint: Option<Hint>,
    pub comment: Option<String>,
    pub allow_disk_use: Option<bool>,
    pub max_time: Option<Duration>,
    pub batch_size: Option<u32>,
    pub max_await_time: Option<Duration>,
    pub read_concern: Option<ReadConcern>,
    pub read_preference: Option<SelectionCriteria>,
    pub no_cursor_timeout: bool,
}

impl MemoryQuery {
    pub fn filter(filter: Document) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    /// Read `$match`, `$sort`, `$skip` and `$limit` stages into a query.
    pub fn from_pipeline(pipeline: &[Document]) -> Self {
        let mut query = Self::default();
        for stage in pipeline {
            if let Ok(filter) = stage.get_document("$match") {
                query.filter.extend(filter.clone());
            }
            if let Ok(sort) = stage.get_document("$sort") {
                query.sort = Some(sort.clone());
            }
            if let Some(skip) = stage.get("$skip") {
                query.skip = Some(direction(skip) as u64);
            }
            if let Some(limit) = stage.get("$limit") {
                query.limit = Some(direction(limit));
            }
        }
        query
    }

    pub fn run(&self, docs: &[Document]) -> Vec<Document> {
        let mut out: Vec<Document> = docs
            .iter()
            .filter(|doc| matches(doc, &self.filter, self.collation.as_ref()))
            .cloned()
            .collect();

        if let Some(sort) = &self.sort {
            out.sort_by(|a, b| {
                sort.iter()
                    .map(|(key, dir)| {
                        let ord = compare(a.get(key), b.get(key));
                        if direction(dir) < 0 { ord.reverse() } else { ord }
                    })
                    .find(|ord| *ord != CmpOrdering::Equal)
                    .unwrap_or(CmpOrdering::Equal)
            });
        }

        let skip = self.skip.unwrap_or(0) as usize;
        let mut out: Vec<Document> = out.into_iter().skip(skip).collect();
        if let Some(limit) = self.limit.filter(|l| *l > 0) {
            out.truncate(limit as usize);
        }
        if let Some(projection) = &self.projection {
            out = out.into_iter().map(|doc| project(doc, projection)).collect();
        }
        out
    }
}

// ----------------------------------------------------------------------
// Collection
// ----------------------------------------------------------------------

#[derive(Default)]
pub struct CollectionProbes {
    pub estimated_calls: AtomicUsize,
    pub exact_calls: AtomicUsize,
    pub aggregate_calls: AtomicUsize,
    pub last_pipeline: Mutex<Vec<Document>>,
    pub last_collation: Mutex<Option<Collation>>,
}

#[derive(Clone)]
pub struct MemoryCollection {
    name: String,
    docs: Arc<Vec<Document>>,
    probes: Arc<CollectionProbes>,
}

impl MemoryCollection {
    pub fn new(name: &str, docs: Vec<Document>) -> Self {
        Self {
            name: name.to_string(),
            docs: Arc::new(docs),
            probes: Arc::new(CollectionProbes::default()),
        }
    }

    pub fn probes(&self) -> Arc<CollectionProbes> {
        self.probes.clone()
    }

    pub fn namespace(&self) -> Namespace {
        Namespace {
            db: "test".to_string(),
            coll: self.name.clone(),
        }
    }

    pub fn find(&self, filter: Document) -> MemoryCursor {
        MemoryCursor::new(self.clone(), MemoryQuery::filter(filter))
    }

    pub fn aggregate_cursor(&self, pipeline: &[Document]) -> MemoryCursor {
        MemoryCursor::new(self.clone(), MemoryQuery::from_pipeline(pipeline))
    }

    pub fn find_cursor<T>(&self, filter: Document) -> FindCursor<T, MemoryCursor>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        FindCursor::new(self.find(filter.clone()), Arc::new(self.clone()), filter)
    }

    pub fn aggregation<T>(&self, pipeline: &[Document]) -> AggregationCursor<T, MemoryCursor>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        AggregationCursor::new(self.aggregate_cursor(pipeline), Arc::new(self.clone()))
    }
}

#[async_trait]
impl CollectionOps for MemoryCollection {
    async fn count_documents(&self, filter: Document) -> CursorResult<u64> {
        self.probes.exact_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.docs.iter().filter(|d| matches(d, &filter, None)).count() as u64)
    }

    async fn estimated_document_count(&self) -> CursorResult<u64> {
        self.probes.estimated_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.docs.len() as u64)
    }

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        collation: Option<Collation>,
    ) -> CursorResult<Vec<Document>> {
        self.probes.aggregate_calls.fetch_add(1, Ordering::SeqCst);
        *self.probes.last_pipeline.lock().unwrap() = pipeline.clone();
        *self.probes.last_collation.lock().unwrap() = collation.clone();

        let mut query = MemoryQuery::from_pipeline(&pipeline);
        query.collation = collation;
        let matched = query.run(&self.docs);

        let counts = pipeline.iter().any(|stage| {
            stage
                .get_document("$group")
                .is_ok_and(|group| group.contains_key("n"))
        });
        if !counts {
            return Ok(matched);
        }
        if matched.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![doc! { "_id": 1, "n": matched.len() as i32 }])
    }
}

// ----------------------------------------------------------------------
// Cursor
// ----------------------------------------------------------------------

#[derive(Default)]
pub struct CursorProbes {
    pub fetches: AtomicUsize,
    pub closes: AtomicUsize,
    pub killed: AtomicBool,
}

pub struct MemoryCursor {
    source: MemoryCollection,
    query: MemoryQuery,
    results: Option<VecDeque<Document>>,
    closed: bool,
    close_emitted: bool,
    fail_on_fetch: Option<usize>,
    fail_on_close: bool,
    probes: Arc<CursorProbes>,
    events: EventEmitter,
}

impl MemoryCursor {
    pub fn new(source: MemoryCollection, query: MemoryQuery) -> Self {
        Self {
            source,
            query,
            results: None,
            closed: false,
            close_emitted: false,
            fail_on_fetch: None,
            fail_on_close: false,
            probes: Arc::new(CursorProbes::default()),
            events: EventEmitter::new(),
        }
    }

    /// Fail the `n`th fetch (1-based).
    pub fn fail_on_fetch(mut self, n: usize) -> Self {
        self.fail_on_fetch = Some(n);
        self
    }

    pub fn fail_on_close(mut self) -> Self {
        self.fail_on_close = true;
        self
    }

    pub fn probes(&self) -> Arc<CursorProbes> {
        self.probes.clone()
    }

    pub fn query(&self) -> &MemoryQuery {
        &self.query
    }

    fn started(&self) -> bool {
        self.results.is_some()
    }

    fn configure(&mut self, f: impl FnOnce(&mut MemoryQuery)) -> CursorResult<()> {
        if self.started() {
            return Err(CursorError::AlreadyInitialized);
        }
        f(&mut self.query);
        Ok(())
    }

    fn results(&mut self) -> &mut VecDeque<Document> {
        let query = &self.query;
        let docs = &self.source.docs;
        self.results
            .get_or_insert_with(|| query.run(docs).into_iter().collect())
    }

    fn emit_close(&mut self) {
        if !self.close_emitted {
            self.close_emitted = true;
            self.events.emit(events::CLOSE, &EventPayload::Empty);
        }
    }
}

#[async_trait]
impl DriverCursor for MemoryCursor {
    async fn next(&mut self) -> CursorResult<Option<Document>> {
        if self.closed {
            return Ok(None);
        }
        let fetch = self.probes.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_fetch == Some(fetch) {
            return Err(CursorError::internal("injected fetch failure"));
        }
        let doc = self.results().pop_front();
        if doc.is_none() {
            self.closed = true;
            self.emit_close();
        }
        Ok(doc)
    }

    async fn try_next(&mut self) -> CursorResult<Option<Document>> {
        self.next().await
    }

    async fn has_next(&mut self) -> CursorResult<bool> {
        Ok(!self.closed && !self.results().is_empty())
    }

    async fn close(&mut self) -> CursorResult<()> {
        self.probes.closes.fetch_add(1, Ordering::SeqCst);
        self.closed = true;
        self.emit_close();
        if self.fail_on_close {
            return Err(CursorError::internal("injected close failure"));
        }
        Ok(())
    }

    fn clone_cursor(&self) -> Self {
        Self::new(self.source.clone(), self.query.clone())
    }

    fn rewind(&mut self) {
        self.results = None;
        self.closed = false;
        self.close_emitted = false;
    }

    fn closed(&self) -> bool {
        self.closed
    }

    fn id(&self) -> Option<i64> {
        self.started().then_some(42)
    }

    fn namespace(&self) -> Namespace {
        self.source.namespace()
    }

    fn buffered_count(&self) -> usize {
        self.results.as_ref().map_or(0, VecDeque::len)
    }

    fn read_buffered(&mut self, count: Option<usize>) -> Vec<Document> {
        let Some(results) = self.results.as_mut() else {
            return Vec::new();
        };
        let n = count.map_or(results.len(), |c| c.min(results.len()));
        results.drain(..n).collect()
    }

    fn read_concern(&self) -> Option<ReadConcern> {
        self.query.read_concern.clone()
    }

    fn read_preference(&self) -> Option<SelectionCriteria> {
        self.query.read_preference.clone()
    }

    fn set_batch_size(&mut self, size: u32) -> CursorResult<()> {
        self.configure(|q| q.batch_size = Some(size))
    }

    fn set_max_await_time(&mut self, duration: Duration) -> CursorResult<()> {
        self.configure(|q| q.max_await_time = Some(duration))
    }

    fn set_read_concern(&mut self, concern: ReadConcern) -> CursorResult<()> {
        self.configure(|q| q.read_concern = Some(concern))
    }

    fn set_read_preference(&mut self, criteria: SelectionCriteria) -> CursorResult<()> {
        self.configure(|q| q.read_preference = Some(criteria))
    }

    fn set_no_cursor_timeout(&mut self, enabled: bool) -> CursorResult<()> {
        self.configure(|q| q.no_cursor_timeout = enabled)
    }

    fn kill_stream(&mut self) {
        self.probes.killed.store(true, Ordering::SeqCst);
        self.results = Some(VecDeque::new());
    }

    fn events(&self) -> EventEmitter {
        self.events.clone()
    }
}

impl FindDriverCursor for MemoryCursor {
    fn set_filter(&mut self, filter: Document) -> CursorResult<()> {
        self.configure(|q| q.filter = filter)
    }

    fn set_sort(&mut self, sort: Document) -> CursorResult<()> {
        self.configure(|q| q.sort = Some(sort))
    }

    fn set_skip(&mut self, n: u64) -> CursorResult<()> {
        self.configure(|q| q.skip = Some(n))
    }

    fn set_limit(&mut self, n: i64) -> CursorResult<()> {
        self.configure(|q| q.limit = Some(n))
    }

    fn set_projection(&mut self, projection: Document) -> CursorResult<()> {
        self.configure(|q| q.projection = Some(projection))
    }

    fn set_collation(&mut self, collation: Collation) -> CursorResult<()> {
        self.configure(|q| q.collation = Some(collation))
    }

    fn set_hint(&mut self, hint: Hint) -> CursorResult<()> {
        self.configure(|q| q.hint = Some(hint))
    }

    fn set_comment(&mut self, comment: String) -> CursorResult<()> {
        self.configure(|q| q.comment = Some(comment))
    }

    fn set_allow_disk_use(&mut self, allow: bool) -> CursorResult<()> {
        self.configure(|q| q.allow_disk_use = Some(allow))
    }

    fn set_max_time(&mut self, duration: Duration) -> CursorResult<()> {
        self.configure(|q| q.max_time = Some(duration))
    }
}

/// A listener counting its calls.
pub fn counting_listener() -> (Arc<AtomicUsize>, fathom_cursor::Listener) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    let listener = fathom_cursor::listener(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    (count, listener)
}

/// A listener recording every payload it receives.
pub fn recording_listener() -> (Arc<Mutex<Vec<EventPayload>>>, fathom_cursor::Listener) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener = fathom_cursor::listener(move |payload| {
        sink.lock().unwrap().push(payload.clone());
    });
    (seen, listener)
}

pub fn case_insensitive() -> Collation {
    Collation::builder()
        .locale("en")
        .strength(CollationStrength::Secondary)
        .build()
}
