//! Cursor over aggregation results.

use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bson::Document;
use futures::Stream;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::adapter::{CursorAdapter, CursorVariant};
use crate::config::CursorOptions;
use crate::driver::{CollectionOps, DriverCursor};
use crate::error::{CursorError, CursorResult};
use crate::mongo::MongoAggregateCursor;

/// A typed cursor over the results of an aggregation pipeline.
///
/// Every adapter operation is available through `Deref`. On top of that the
/// cursor can count the documents of its collection matching a filter set
/// with [`set_filter`](Self::set_filter).
pub struct AggregationCursor<T, C: DriverCursor = MongoAggregateCursor> {
    base: CursorAdapter<T, C>,
    collection: Arc<dyn CollectionOps>,
    filter: Option<Document>,
}

impl<T, C: DriverCursor> fmt::Debug for AggregationCursor<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationCursor")
            .field("base", &self.base)
            .field("filter", &self.filter)
            .finish()
    }
}

impl<T, C> AggregationCursor<T, C>
where
    T: DeserializeOwned + Send + 'static,
    C: DriverCursor,
{
    /// Wrap `native`, decoding every result into `T`.
    pub fn new(native: C, collection: Arc<dyn CollectionOps>) -> Self {
        Self::from_adapter(CursorAdapter::new(native), collection)
    }

    /// Wrap `native` after applying `options` to it.
    pub fn with_options(
        native: C,
        collection: Arc<dyn CollectionOps>,
        options: &CursorOptions,
    ) -> CursorResult<Self> {
        Ok(Self::from_adapter(
            CursorAdapter::with_options(native, options)?,
            collection,
        ))
    }
}

impl<T, C> AggregationCursor<T, C>
where
    T: Send + 'static,
    C: DriverCursor,
{
    /// Build from an existing adapter.
    pub fn from_adapter(base: CursorAdapter<T, C>, collection: Arc<dyn CollectionOps>) -> Self {
        Self {
            base,
            collection,
            filter: None,
        }
    }

    /// Set the filter used by [`count`](Self::count).
    pub fn set_filter(&mut self, filter: Document) -> &mut Self {
        self.filter = Some(filter);
        self
    }

    /// The filter used by [`count`](Self::count), if set.
    pub fn filter(&self) -> Option<&Document> {
        self.filter.as_ref()
    }

    /// Count the documents of the collection matching the filter.
    ///
    /// Fails with [`CursorError::FilterNotSet`] before
    /// [`set_filter`](Self::set_filter). An empty filter uses the
    /// metadata-based estimate; anything else counts exactly. The returned
    /// future does not borrow the cursor.
    pub fn count(&self) -> impl Future<Output = CursorResult<u64>> + Send + 'static {
        let collection = self.collection.clone();
        let filter = self.filter.clone();
        let namespace = self.base.namespace().to_string();

        async move {
            let filter = filter.ok_or(CursorError::FilterNotSet)?;
            if filter.is_empty() {
                debug!(namespace = %namespace, strategy = "estimated", "Counting documents");
                collection.estimated_document_count().await
            } else {
                debug!(namespace = %namespace, strategy = "exact", "Counting documents");
                collection.count_documents(filter).await
            }
        }
    }

    /// Start the aggregation on the server.
    ///
    /// Fetches one document; it stays in the readable buffer, so nothing is
    /// lost for the consumer.
    pub async fn launch(&mut self) -> CursorResult<&mut Self> {
        self.base.prefetch().await?;
        Ok(self)
    }

    /// Apply `f` to every result.
    pub fn map<U, F>(self, f: F) -> AggregationCursor<U, C>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        AggregationCursor {
            base: self.base.map(f),
            collection: self.collection,
            filter: self.filter,
        }
    }

    /// Unwrap the underlying adapter.
    pub fn into_inner(self) -> CursorAdapter<T, C> {
        self.base
    }
}

#[async_trait]
impl<T, C> CursorVariant for AggregationCursor<T, C>
where
    T: Send + 'static,
    C: DriverCursor,
{
    type Item = T;
    type Native = C;

    fn adapter(&self) -> &CursorAdapter<T, C> {
        &self.base
    }

    fn adapter_mut(&mut self) -> &mut CursorAdapter<T, C> {
        &mut self.base
    }

    async fn clone_cursor(&mut self) -> Self {
        Self {
            base: self.base.clone_adapter().await,
            collection: self.collection.clone(),
            filter: self.filter.clone(),
        }
    }
}

impl<T, C: DriverCursor> Deref for AggregationCursor<T, C> {
    type Target = CursorAdapter<T, C>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl<T, C: DriverCursor> DerefMut for AggregationCursor<T, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

impl<T, C> Stream for AggregationCursor<T, C>
where
    T: Send + 'static,
    C: DriverCursor,
{
    type Item = CursorResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().base).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.base.size_hint()
    }
}
