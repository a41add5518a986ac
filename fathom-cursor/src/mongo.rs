//! Bindings to the MongoDB driver.
//!
//! [`MongoCursor`] implements [`DriverCursor`] over a
//! `mongodb::Cursor<Document>`. The query runs lazily: options can be changed
//! until the first document is requested, after which the cursor refuses
//! reconfiguration. [`CollectionCursorExt`] opens typed cursors straight from
//! a collection.
//!
//! # Example
//!
//! ```rust,ignore
//! use bson::doc;
//! use fathom_cursor::mongo::CollectionCursorExt;
//!
//! let users = db.collection::<bson::Document>("users");
//!
//! let mut active = users.find_cursor::<User>(doc! { "status": "active" });
//! active.sort(doc! { "created_at": -1 }).await?.limit(20).await?;
//! let total = active.count().await?;
//! let page = active.to_vec().await?;
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::TryStreamExt;
use mongodb::options::{
    AggregateOptions, Collation, FindOptions, Hint, ReadConcern, SelectionCriteria,
};
use mongodb::{Collection, Cursor, Namespace};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::aggregation::AggregationCursor;
use crate::config::CursorOptions;
use crate::driver::{CollectionOps, DriverCursor, FindDriverCursor};
use crate::error::{CursorError, CursorResult};
use crate::events::{CLOSE, EventEmitter, EventPayload};
use crate::find::FindCursor;

/// A query that produces a driver cursor.
#[async_trait]
pub trait QueryDefinition: Clone + Send + Sync + 'static {
    /// Run the query.
    async fn execute(&self, collection: &Collection<Document>) -> CursorResult<Cursor<Document>>;

    /// Configured read concern.
    fn read_concern(&self) -> Option<ReadConcern>;

    /// Configured read preference.
    fn read_preference(&self) -> Option<SelectionCriteria>;

    /// Set the driver batch size.
    fn set_batch_size(&mut self, size: u32);

    /// Set the tailable await time.
    fn set_max_await_time(&mut self, duration: Duration);

    /// Set the read concern.
    fn set_read_concern(&mut self, concern: ReadConcern);

    /// Set the read preference.
    fn set_read_preference(&mut self, criteria: SelectionCriteria);

    /// Disable the server idle timeout.
    fn set_no_cursor_timeout(&mut self, enabled: bool) -> CursorResult<()>;
}

/// A `find` query and its options.
#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    /// Query filter.
    pub filter: Document,
    /// Driver options.
    pub options: FindOptions,
}

impl FindQuery {
    /// Query matching `filter` with default options.
    pub fn new(filter: Document) -> Self {
        Self {
            filter,
            options: FindOptions::default(),
        }
    }
}

#[async_trait]
impl QueryDefinition for FindQuery {
    async fn execute(&self, collection: &Collection<Document>) -> CursorResult<Cursor<Document>> {
        Ok(collection
            .find(self.filter.clone(), self.options.clone())
            .await?)
    }

    fn read_concern(&self) -> Option<ReadConcern> {
        self.options.read_concern.clone()
    }

    fn read_preference(&self) -> Option<SelectionCriteria> {
        self.options.selection_criteria.clone()
    }

    fn set_batch_size(&mut self, size: u32) {
        self.options.batch_size = Some(size);
    }

    fn set_max_await_time(&mut self, duration: Duration) {
        self.options.max_await_time = Some(duration);
    }

    fn set_read_concern(&mut self, concern: ReadConcern) {
        self.options.read_concern = Some(concern);
    }

    fn set_read_preference(&mut self, criteria: SelectionCriteria) {
        self.options.selection_criteria = Some(criteria);
    }

    fn set_no_cursor_timeout(&mut self, enabled: bool) -> CursorResult<()> {
        self.options.no_cursor_timeout = Some(enabled);
        Ok(())
    }
}

/// An aggregation pipeline and its options.
#[derive(Debug, Clone, Default)]
pub struct AggregateQuery {
    /// Pipeline stages.
    pub pipeline: Vec<Document>,
    /// Driver options.
    pub options: AggregateOptions,
}

impl AggregateQuery {
    /// Aggregation running `pipeline` with default options.
    pub fn new(pipeline: impl IntoIterator<Item = Document>) -> Self {
        Self {
            pipeline: pipeline.into_iter().collect(),
            options: AggregateOptions::default(),
        }
    }
}

#[async_trait]
impl QueryDefinition for AggregateQuery {
    async fn execute(&self, collection: &Collection<Document>) -> CursorResult<Cursor<Document>> {
        Ok(collection
            .aggregate(self.pipeline.clone(), self.options.clone())
            .await?)
    }

    fn read_concern(&self) -> Option<ReadConcern> {
        self.options.read_concern.clone()
    }

    fn read_preference(&self) -> Option<SelectionCriteria> {
        self.options.selection_criteria.clone()
    }

    fn set_batch_size(&mut self, size: u32) {
        self.options.batch_size = Some(size);
    }

    fn set_max_await_time(&mut self, duration: Duration) {
        self.options.max_await_time = Some(duration);
    }

    fn set_read_concern(&mut self, concern: ReadConcern) {
        self.options.read_concern = Some(concern);
    }

    fn set_read_preference(&mut self, criteria: SelectionCriteria) {
        self.options.selection_criteria = Some(criteria);
    }

    fn set_no_cursor_timeout(&mut self, enabled: bool) -> CursorResult<()> {
        Err(CursorError::unsupported(
            "no_cursor_timeout",
            vec![Bson::Boolean(enabled)],
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    Pending,
    Open,
    Exhausted,
    Closed,
}

/// A lazily executed driver cursor.
pub struct MongoCursor<Q: QueryDefinition> {
    collection: Collection<Document>,
    query: Q,
    cursor: Option<Cursor<Document>>,
    peeked: VecDeque<Document>,
    state: CursorState,
    close_emitted: bool,
    events: EventEmitter,
}

/// Native cursor over a `find` query.
pub type MongoFindCursor = MongoCursor<FindQuery>;

/// Native cursor over an aggregation.
pub type MongoAggregateCursor = MongoCursor<AggregateQuery>;

impl<Q: QueryDefinition> std::fmt::Debug for MongoCursor<Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoCursor")
            .field("namespace", &self.collection.namespace())
            .field("state", &self.state)
            .field("peeked", &self.peeked.len())
            .finish()
    }
}

impl<Q: QueryDefinition> MongoCursor<Q> {
    /// Wrap `query` against `collection`. Nothing runs until the first fetch.
    pub fn new(collection: Collection<Document>, query: Q) -> Self {
        Self {
            collection,
            query,
            cursor: None,
            peeked: VecDeque::new(),
            state: CursorState::Pending,
            close_emitted: false,
            events: EventEmitter::new(),
        }
    }

    /// The query definition.
    pub fn query(&self) -> &Q {
        &self.query
    }

    /// Whether the query has not run yet.
    pub fn is_pending(&self) -> bool {
        self.state == CursorState::Pending
    }

    fn ensure_pending(&self) -> CursorResult<()> {
        if self.state == CursorState::Pending {
            Ok(())
        } else {
            Err(CursorError::AlreadyInitialized)
        }
    }

    fn configure(&mut self, f: impl FnOnce(&mut Q)) -> CursorResult<()> {
        self.ensure_pending()?;
        f(&mut self.query);
        Ok(())
    }

    fn emit_close(&mut self) {
        if !self.close_emitted {
            self.close_emitted = true;
            self.events.emit(CLOSE, &EventPayload::Empty);
        }
    }

    async fn fetch(&mut self) -> CursorResult<Option<Document>> {
        if let Some(doc) = self.peeked.pop_front() {
            return Ok(Some(doc));
        }

        match self.state {
            CursorState::Exhausted | CursorState::Closed => return Ok(None),
            CursorState::Pending => {
                debug!(namespace = %self.collection.namespace(), "Executing cursor query");
                self.cursor = Some(self.query.execute(&self.collection).await?);
                self.state = CursorState::Open;
            }
            CursorState::Open => {}
        }

        let next = match self.cursor.as_mut() {
            Some(cursor) => cursor.try_next().await?,
            None => None,
        };
        if next.is_none() {
            self.cursor = None;
            self.state = CursorState::Exhausted;
            self.emit_close();
        }
        Ok(next)
    }
}

#[async_trait]
impl<Q: QueryDefinition> DriverCursor for MongoCursor<Q> {
    async fn next(&mut self) -> CursorResult<Option<Document>> {
        self.fetch().await
    }

    async fn try_next(&mut self) -> CursorResult<Option<Document>> {
        self.fetch().await
    }

    async fn has_next(&mut self) -> CursorResult<bool> {
        if !self.peeked.is_empty() {
            return Ok(true);
        }
        match self.fetch().await? {
            Some(doc) => {
                self.peeked.push_back(doc);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn close(&mut self) -> CursorResult<()> {
        // Dropping the driver cursor kills it on the server.
        self.cursor = None;
        self.peeked.clear();
        self.state = CursorState::Closed;
        self.emit_close();
        Ok(())
    }

    fn clone_cursor(&self) -> Self {
        Self::new(self.collection.clone(), self.query.clone())
    }

    fn rewind(&mut self) {
        self.cursor = None;
        self.peeked.clear();
        self.state = CursorState::Pending;
        self.close_emitted = false;
    }

    fn closed(&self) -> bool {
        matches!(self.state, CursorState::Exhausted | CursorState::Closed)
    }

    fn id(&self) -> Option<i64> {
        None
    }

    fn namespace(&self) -> Namespace {
        self.collection.namespace()
    }

    fn buffered_count(&self) -> usize {
        self.peeked.len()
    }

    fn read_buffered(&mut self, count: Option<usize>) -> Vec<Document> {
        let n = count.map_or(self.peeked.len(), |c| c.min(self.peeked.len()));
        self.peeked.drain(..n).collect()
    }

    fn read_concern(&self) -> Option<ReadConcern> {
        self.query.read_concern()
    }

    fn read_preference(&self) -> Option<SelectionCriteria> {
        self.query.read_preference()
    }

    fn set_batch_size(&mut self, size: u32) -> CursorResult<()> {
        self.configure(|q| q.set_batch_size(size))
    }

    fn set_max_await_time(&mut self, duration: Duration) -> CursorResult<()> {
        self.configure(|q| q.set_max_await_time(duration))
    }

    fn set_read_concern(&mut self, concern: ReadConcern) -> CursorResult<()> {
        self.configure(|q| q.set_read_concern(concern))
    }

    fn set_read_preference(&mut self, criteria: SelectionCriteria) -> CursorResult<()> {
        self.configure(|q| q.set_read_preference(criteria))
    }

    fn set_no_cursor_timeout(&mut self, enabled: bool) -> CursorResult<()> {
        self.ensure_pending()?;
        self.query.set_no_cursor_timeout(enabled)
    }

    fn kill_stream(&mut self) {
        self.cursor = None;
    }

    fn events(&self) -> EventEmitter {
        self.events.clone()
    }
}

impl FindDriverCursor for MongoFindCursor {
    fn set_filter(&mut self, filter: Document) -> CursorResult<()> {
        self.configure(|q| q.filter = filter)
    }

    fn set_sort(&mut self, sort: Document) -> CursorResult<()> {
        self.configure(|q| q.options.sort = Some(sort))
    }

    fn set_skip(&mut self, n: u64) -> CursorResult<()> {
        self.configure(|q| q.options.skip = Some(n))
    }

    fn set_limit(&mut self, n: i64) -> CursorResult<()> {
        self.configure(|q| q.options.limit = Some(n))
    }

    fn set_projection(&mut self, projection: Document) -> CursorResult<()> {
        self.configure(|q| q.options.projection = Some(projection))
    }

    fn set_collation(&mut self, collation: Collation) -> CursorResult<()> {
        self.configure(|q| q.options.collation = Some(collation))
    }

    fn set_hint(&mut self, hint: Hint) -> CursorResult<()> {
        self.configure(|q| q.options.hint = Some(hint))
    }

    fn set_comment(&mut self, comment: String) -> CursorResult<()> {
        self.configure(|q| q.options.comment = Some(comment))
    }

    fn set_allow_disk_use(&mut self, allow: bool) -> CursorResult<()> {
        self.configure(|q| q.options.allow_disk_use = Some(allow))
    }

    fn set_max_time(&mut self, duration: Duration) -> CursorResult<()> {
        self.configure(|q| q.options.max_time = Some(duration))
    }
}

#[async_trait]
impl CollectionOps for Collection<Document> {
    async fn count_documents(&self, filter: Document) -> CursorResult<u64> {
        Ok(Collection::count_documents(self, filter, None).await?)
    }

    async fn estimated_document_count(&self) -> CursorResult<u64> {
        Ok(Collection::estimated_document_count(self, None).await?)
    }

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        collation: Option<Collation>,
    ) -> CursorResult<Vec<Document>> {
        let mut options = AggregateOptions::default();
        options.collation = collation;
        let cursor = Collection::aggregate(self, pipeline, options).await?;
        Ok(cursor.try_collect().await?)
    }
}

/// Open typed cursors directly from a collection.
pub trait CollectionCursorExt {
    /// A cursor over the documents matching `filter`.
    fn find_cursor<T>(&self, filter: Document) -> FindCursor<T>
    where
        T: DeserializeOwned + Send + 'static;

    /// Like [`find_cursor`](Self::find_cursor), applying `options` first.
    fn find_cursor_with_options<T>(
        &self,
        filter: Document,
        options: &CursorOptions,
    ) -> CursorResult<FindCursor<T>>
    where
        T: DeserializeOwned + Send + 'static;

    /// A cursor over the results of `pipeline`.
    fn aggregate_cursor<T>(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
    ) -> AggregationCursor<T>
    where
        T: DeserializeOwned + Send + 'static;

    /// Like [`aggregate_cursor`](Self::aggregate_cursor), applying `options` first.
    fn aggregate_cursor_with_options<T>(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: &CursorOptions,
    ) -> CursorResult<AggregationCursor<T>>
    where
        T: DeserializeOwned + Send + 'static;
}

impl CollectionCursorExt for Collection<Document> {
    fn find_cursor<T>(&self, filter: Document) -> FindCursor<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let native = MongoCursor::new(self.clone(), FindQuery::new(filter.clone()));
        FindCursor::new(native, Arc::new(self.clone()), filter)
    }

    fn find_cursor_with_options<T>(
        &self,
        filter: Document,
        options: &CursorOptions,
    ) -> CursorResult<FindCursor<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let native = MongoCursor::new(self.clone(), FindQuery::new(filter.clone()));
        FindCursor::with_options(native, Arc::new(self.clone()), filter, options)
    }

    fn aggregate_cursor<T>(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
    ) -> AggregationCursor<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let native = MongoCursor::new(self.clone(), AggregateQuery::new(pipeline));
        AggregationCursor::new(native, Arc::new(self.clone()))
    }

    fn aggregate_cursor_with_options<T>(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: &CursorOptions,
    ) -> CursorResult<AggregationCursor<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let native = MongoCursor::new(self.clone(), AggregateQuery::new(pipeline));
        AggregationCursor::with_options(native, Arc::new(self.clone()), options)
    }
}
