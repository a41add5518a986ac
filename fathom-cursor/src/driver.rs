//! Collaborator traits between the adapters and the database driver.
//!
//! The adapters never talk to `mongodb` types directly. They drive a
//! [`DriverCursor`] (a pull-based document iterator with its own event
//! emitter) and, for counting, a [`CollectionOps`]. The [`mongo`](crate::mongo)
//! module implements both over the real driver; tests implement them in
//! memory.

use std::time::Duration;

use async_trait::async_trait;
use bson::Document;
use mongodb::Namespace;
use mongodb::options::{Collation, Hint, ReadConcern, SelectionCriteria};

use crate::error::CursorResult;
use crate::events::EventEmitter;

/// A native, pull-based document cursor.
#[async_trait]
pub trait DriverCursor: Send + 'static {
    /// Fetch the next document, `None` once exhausted.
    async fn next(&mut self) -> CursorResult<Option<Document>>;

    /// Fetch the next document without waiting on a tailable cursor.
    ///
    /// Non-tailable cursors behave like [`next`](Self::next).
    async fn try_next(&mut self) -> CursorResult<Option<Document>>;

    /// Whether another document is available.
    async fn has_next(&mut self) -> CursorResult<bool>;

    /// Close the cursor. Fires the `close` event the first time.
    async fn close(&mut self) -> CursorResult<()>;

    /// A fresh, unstarted cursor over the same query.
    fn clone_cursor(&self) -> Self
    where
        Self: Sized;

    /// Reset to the unstarted state.
    fn rewind(&mut self);

    /// Whether the cursor is closed or exhausted.
    fn closed(&self) -> bool;

    /// Server-side cursor id, if one was assigned.
    fn id(&self) -> Option<i64>;

    /// Namespace the cursor reads from.
    fn namespace(&self) -> Namespace;

    /// Number of documents fetched from the server but not yet returned.
    fn buffered_count(&self) -> usize;

    /// Drain up to `count` already-fetched documents, all when `None`.
    fn read_buffered(&mut self, count: Option<usize>) -> Vec<Document>;

    /// Configured read concern.
    fn read_concern(&self) -> Option<ReadConcern>;

    /// Configured read preference.
    fn read_preference(&self) -> Option<SelectionCriteria>;

    /// Set the driver batch size.
    fn set_batch_size(&mut self, size: u32) -> CursorResult<()>;

    /// Set the tailable await time.
    fn set_max_await_time(&mut self, duration: Duration) -> CursorResult<()>;

    /// Set the read concern.
    fn set_read_concern(&mut self, concern: ReadConcern) -> CursorResult<()>;

    /// Set the read preference.
    fn set_read_preference(&mut self, criteria: SelectionCriteria) -> CursorResult<()>;

    /// Disable the server idle timeout.
    fn set_no_cursor_timeout(&mut self, enabled: bool) -> CursorResult<()>;

    /// Tear down the underlying transport without a round trip.
    fn kill_stream(&mut self);

    /// Handle to the cursor's own emitter.
    fn events(&self) -> EventEmitter;
}

/// A native cursor over a `find` query.
pub trait FindDriverCursor: DriverCursor {
    /// Set the query filter.
    fn set_filter(&mut self, filter: Document) -> CursorResult<()>;

    /// Set the sort specification.
    fn set_sort(&mut self, sort: Document) -> CursorResult<()>;

    /// Skip the first `n` documents.
    fn set_skip(&mut self, n: u64) -> CursorResult<()>;

    /// Return at most `n` documents.
    fn set_limit(&mut self, n: i64) -> CursorResult<()>;

    /// Set the projection.
    fn set_projection(&mut self, projection: Document) -> CursorResult<()>;

    /// Set the collation.
    fn set_collation(&mut self, collation: Collation) -> CursorResult<()>;

    /// Set the index hint.
    fn set_hint(&mut self, hint: Hint) -> CursorResult<()>;

    /// Attach a comment to the query.
    fn set_comment(&mut self, comment: String) -> CursorResult<()>;

    /// Allow the server to spill to disk.
    fn set_allow_disk_use(&mut self, allow: bool) -> CursorResult<()>;

    /// Server-side time limit.
    fn set_max_time(&mut self, duration: Duration) -> CursorResult<()>;
}

/// Collection-level operations used by `count()`.
#[async_trait]
pub trait CollectionOps: Send + Sync {
    /// Exact count of documents matching `filter`.
    async fn count_documents(&self, filter: Document) -> CursorResult<u64>;

    /// Metadata-based count of every document.
    async fn estimated_document_count(&self) -> CursorResult<u64>;

    /// Run `pipeline` and collect every result document.
    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        collation: Option<Collation>,
    ) -> CursorResult<Vec<Document>>;
}
