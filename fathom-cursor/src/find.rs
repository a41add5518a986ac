//! Cursor over query results.

use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use fathom_pipeline::AggregationBuilder;
use fathom_pipeline::expr::accumulators;
use futures::Stream;
use mongodb::options::{Collation, Hint};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::adapter::{CursorAdapter, CursorVariant};
use crate::config::CursorOptions;
use crate::driver::{CollectionOps, FindDriverCursor};
use crate::error::{CursorError, CursorResult};
use crate::mongo::MongoFindCursor;

/// A typed cursor over the results of a `find` query.
///
/// The filter and collation are cached next to the native cursor so that
/// [`count`](Self::count) can run the same criterion against the collection.
pub struct FindCursor<T, C: FindDriverCursor = MongoFindCursor> {
    base: CursorAdapter<T, C>,
    collection: Arc<dyn CollectionOps>,
    filter: Document,
    collation: Option<Collation>,
}

impl<T, C: FindDriverCursor> fmt::Debug for FindCursor<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FindCursor")
            .field("base", &self.base)
            .field("filter", &self.filter)
            .field("collation", &self.collation)
            .finish()
    }
}

impl<T, C> FindCursor<T, C>
where
    T: DeserializeOwned + Send + 'static,
    C: FindDriverCursor,
{
    /// Wrap `native`, whose query uses `filter`, decoding every result into `T`.
    pub fn new(native: C, collection: Arc<dyn CollectionOps>, filter: Document) -> Self {
        Self::from_adapter(CursorAdapter::new(native), collection, filter)
    }

    /// Wrap `native` after applying `options` to it.
    pub fn with_options(
        native: C,
        collection: Arc<dyn CollectionOps>,
        filter: Document,
        options: &CursorOptions,
    ) -> CursorResult<Self> {
        Ok(Self::from_adapter(
            CursorAdapter::with_options(native, options)?,
            collection,
            filter,
        ))
    }
}

impl<T, C> FindCursor<T, C>
where
    T: Send + 'static,
    C: FindDriverCursor,
{
    /// Build from an existing adapter.
    pub fn from_adapter(
        base: CursorAdapter<T, C>,
        collection: Arc<dyn CollectionOps>,
        filter: Document,
    ) -> Self {
        Self {
            base,
            collection,
            filter,
            collation: None,
        }
    }

    /// The cached query filter.
    pub fn current_filter(&self) -> &Document {
        &self.filter
    }

    /// The cached collation.
    pub fn current_collation(&self) -> Option<&Collation> {
        self.collation.as_ref()
    }

    /// Replace the query filter.
    pub async fn filter(&mut self, filter: Document) -> CursorResult<&mut Self> {
        let cached = filter.clone();
        self.base
            .with_native(move |native| native.set_filter(filter))
            .await?;
        self.filter = cached;
        Ok(self)
    }

    /// Set the sort order.
    pub async fn sort(&mut self, sort: impl Into<Document>) -> CursorResult<&mut Self> {
        let sort = sort.into();
        self.base
            .with_native(move |native| native.set_sort(sort))
            .await?;
        Ok(self)
    }

    /// Skip the first `n` results.
    pub async fn skip(&mut self, n: u64) -> CursorResult<&mut Self> {
        self.base.with_native(|native| native.set_skip(n)).await?;
        Ok(self)
    }

    /// Return at most `n` results.
    pub async fn limit(&mut self, n: i64) -> CursorResult<&mut Self> {
        self.base.with_native(|native| native.set_limit(n)).await?;
        Ok(self)
    }

    /// Set the collation used by the query and by [`count`](Self::count).
    pub async fn collation(&mut self, collation: Collation) -> CursorResult<&mut Self> {
        let cached = collation.clone();
        self.base
            .with_native(move |native| native.set_collation(collation))
            .await?;
        self.collation = Some(cached);
        Ok(self)
    }

    /// Set the index hint.
    pub async fn hint(&mut self, hint: Hint) -> CursorResult<&mut Self> {
        self.base
            .with_native(move |native| native.set_hint(hint))
            .await?;
        Ok(self)
    }

    /// Attach a comment to the query.
    pub async fn comment(&mut self, comment: impl Into<String>) -> CursorResult<&mut Self> {
        let comment = comment.into();
        self.base
            .with_native(move |native| native.set_comment(comment))
            .await?;
        Ok(self)
    }

    /// Allow the server to use temporary files.
    pub async fn allow_disk_use(&mut self, allow: bool) -> CursorResult<&mut Self> {
        self.base
            .with_native(|native| native.set_allow_disk_use(allow))
            .await?;
        Ok(self)
    }

    /// Server-side time limit for the query.
    pub async fn max_time(&mut self, duration: Duration) -> CursorResult<&mut Self> {
        self.base
            .with_native(|native| native.set_max_time(duration))
            .await?;
        Ok(self)
    }

    /// Apply `projection` and decode results into `U` instead.
    ///
    /// Only valid before the first read. On failure the cursor is consumed.
    pub async fn project<U>(mut self, projection: Document) -> CursorResult<FindCursor<U, C>>
    where
        U: DeserializeOwned + Send + 'static,
    {
        self.base
            .with_native(move |native| native.set_projection(projection))
            .await?;
        Ok(FindCursor {
            base: self.base.rebind()?,
            collection: self.collection,
            filter: self.filter,
            collation: self.collation,
        })
    }

    /// Count the documents matching the cached filter.
    ///
    /// With a cached collation the count runs as an aggregation under that
    /// collation. Otherwise an empty filter uses the metadata-based estimate
    /// and anything else counts exactly. The returned future does not borrow
    /// the cursor.
    pub fn count(&self) -> impl Future<Output = CursorResult<u64>> + Send + 'static {
        let collection = self.collection.clone();
        let filter = self.filter.clone();
        let collation = self.collation.clone();
        let namespace = self.base.namespace().clone();

        async move {
            match collation {
                Some(collation) => {
                    debug!(namespace = %namespace, strategy = "collated", "Counting documents");
                    let pipeline = AggregationBuilder::new(namespace.coll)
                        .match_stage(filter)
                        .group(doc! { "_id": 1, "n": accumulators::count() })
                        .build_documents();
                    let results = collection.aggregate(pipeline, Some(collation)).await?;
                    results.first().map_or(Ok(0), read_count)
                }
                None if filter.is_empty() => {
                    debug!(namespace = %namespace, strategy = "estimated", "Counting documents");
                    collection.estimated_document_count().await
                }
                None => {
                    debug!(namespace = %namespace, strategy = "exact", "Counting documents");
                    collection.count_documents(filter).await
                }
            }
        }
    }

    /// Apply `f` to every result.
    pub fn map<U, F>(self, f: F) -> FindCursor<U, C>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        FindCursor {
            base: self.base.map(f),
            collection: self.collection,
            filter: self.filter,
            collation: self.collation,
        }
    }

    /// Unwrap the underlying adapter.
    pub fn into_inner(self) -> CursorAdapter<T, C> {
        self.base
    }
}

fn read_count(result: &Document) -> CursorResult<u64> {
    match result.get("n") {
        Some(Bson::Int32(n)) => Ok((*n).max(0) as u64),
        Some(Bson::Int64(n)) => Ok((*n).max(0) as u64),
        Some(Bson::Double(n)) => Ok(n.max(0.0) as u64),
        _ => Err(CursorError::missing_field("n")),
    }
}

#[async_trait]
impl<T, C> CursorVariant for FindCursor<T, C>
where
    T: Send + 'static,
    C: FindDriverCursor,
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
            collation: self.collation.clone(),
        }
    }
}

impl<T, C: FindDriverCursor> Deref for FindCursor<T, C> {
    type Target = CursorAdapter<T, C>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl<T, C: FindDriverCursor> DerefMut for FindCursor<T, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

impl<T, C> Stream for FindCursor<T, C>
where
    T: Send + 'static,
    C: FindDriverCursor,
{
    type Item = CursorResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().base).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.base.size_hint()
    }
}
