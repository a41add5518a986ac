//! Stream adapter over a native driver cursor.
//!
//! [`CursorAdapter`] owns one [`DriverCursor`] and re-exposes it as a
//! buffered `futures::Stream`. Items are pulled in batches of at most the
//! high water mark; the native cursor sits behind an async lock so a pull
//! that is still in flight when a direct call arrives is finished first.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::TryStreamExt;
//! use fathom_cursor::CursorAdapter;
//!
//! let mut users = CursorAdapter::<User, _>::new(native).map(|u| u.email);
//! while let Some(email) = users.try_next().await? {
//!     println!("{email}");
//! }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker, ready};
use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::future::BoxFuture;
use futures::{FutureExt, Stream};
use mongodb::Namespace;
use mongodb::options::{ReadConcern, SelectionCriteria};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::config::{CursorOptions, DEFAULT_HIGH_WATER_MARK};
use crate::driver::DriverCursor;
use crate::error::{CursorError, CursorResult};
use crate::events::{CLOSE, END, ERROR, EventEmitter, EventPayload, Listener, PAUSE, RESUME};

/// Conversion applied to every native document.
pub type Transform<T> = Arc<dyn Fn(Document) -> CursorResult<T> + Send + Sync>;

fn decode<T: DeserializeOwned>(doc: Document) -> CursorResult<T> {
    Ok(bson::from_document(doc)?)
}

fn decoder<T: DeserializeOwned + 'static>() -> Transform<T> {
    Arc::new(decode::<T>)
}

struct ReadableState<T> {
    buffer: VecDeque<T>,
    high_water_mark: usize,
    paused: bool,
    ended: bool,
    end_emitted: bool,
    destroyed: bool,
    errored: Option<CursorError>,
    waker: Option<Waker>,
}

impl<T> ReadableState<T> {
    fn new(high_water_mark: usize) -> Self {
        Self {
            buffer: VecDeque::new(),
            high_water_mark,
            paused: false,
            ended: false,
            end_emitted: false,
            destroyed: false,
            errored: None,
            waker: None,
        }
    }

    fn map<U>(self, f: impl Fn(T) -> U) -> ReadableState<U> {
        ReadableState {
            buffer: self.buffer.into_iter().map(f).collect(),
            high_water_mark: self.high_water_mark,
            paused: self.paused,
            ended: self.ended,
            end_emitted: self.end_emitted,
            destroyed: self.destroyed,
            errored: self.errored,
            waker: self.waker,
        }
    }

    fn is_finished(&self) -> bool {
        self.ended || self.destroyed
    }

    /// Destroyed, with any pull failure already handed out.
    fn is_spent(&self) -> bool {
        self.destroyed && self.errored.is_none()
    }
}

struct PullOutcome<T> {
    items: Vec<T>,
    ended: bool,
    error: Option<CursorError>,
}

impl<T> PullOutcome<T> {
    fn map<U>(self, f: impl Fn(T) -> U) -> PullOutcome<U> {
        PullOutcome {
            items: self.items.into_iter().map(f).collect(),
            ended: self.ended,
            error: self.error,
        }
    }
}

/// Kill the transport, then close. `error` wins over a close failure.
async fn destroy_native<C: DriverCursor>(
    cursor: &mut C,
    error: Option<CursorError>,
) -> Option<CursorError> {
    cursor.kill_stream();
    match (error, cursor.close().await) {
        (Some(err), Err(close_err)) => {
            warn!(error = %close_err, "Close failed during destroy");
            Some(err)
        }
        (Some(err), Ok(())) => Some(err),
        (None, Err(close_err)) => Some(close_err),
        (None, Ok(())) => None,
    }
}

async fn pull<T, C: DriverCursor>(
    native: Arc<Mutex<C>>,
    transform: Transform<T>,
    size: usize,
) -> PullOutcome<T> {
    let mut cursor = native.lock().await;
    let mut outcome = PullOutcome {
        items: Vec::with_capacity(size),
        ended: false,
        error: None,
    };

    for _ in 0..size {
        let fetched = cursor.next().await;
        match fetched.and_then(|doc| doc.map(&*transform).transpose()) {
            Ok(Some(item)) => {
                trace!(buffered = outcome.items.len() + 1, "Fetched document");
                outcome.items.push(item);
            }
            Ok(None) => {
                outcome.ended = true;
                break;
            }
            Err(err) => {
                outcome.error = destroy_native(&mut *cursor, Some(err)).await;
                break;
            }
        }
    }

    outcome
}

/// A buffered, backpressured stream over a native cursor.
///
/// `T` is the item type produced by the transform chain; `C` is the native
/// cursor. The adapter owns its own [`EventEmitter`] and mirrors `close`
/// registrations onto the native cursor's emitter, which is the only one
/// that ever fires `close`.
pub struct CursorAdapter<T, C: DriverCursor> {
    native: Arc<Mutex<C>>,
    events: EventEmitter,
    native_events: EventEmitter,
    namespace: Namespace,
    transform: Transform<T>,
    readable: ReadableState<T>,
    pending: Option<BoxFuture<'static, PullOutcome<T>>>,
}

// The adapter never pins `T` or `C` in place.
impl<T, C: DriverCursor> Unpin for CursorAdapter<T, C> {}

impl<T, C: DriverCursor> fmt::Debug for CursorAdapter<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorAdapter")
            .field("namespace", &self.namespace)
            .field("buffered", &self.readable.buffer.len())
            .field("high_water_mark", &self.readable.high_water_mark)
            .field("paused", &self.readable.paused)
            .field("ended", &self.readable.ended)
            .field("destroyed", &self.readable.destroyed)
            .field("pulling", &self.pending.is_some())
            .finish()
    }
}

impl<T, C> CursorAdapter<T, C>
where
    T: DeserializeOwned + Send + 'static,
    C: DriverCursor,
{
    /// Wrap `native`, decoding every document into `T`.
    pub fn new(native: C) -> Self {
        Self::from_parts(native, decoder::<T>(), DEFAULT_HIGH_WATER_MARK)
    }

    /// Wrap `native` after applying `options` to it.
    pub fn with_options(mut native: C, options: &CursorOptions) -> CursorResult<Self> {
        if let Some(size) = options.batch_size {
            native.set_batch_size(size)?;
        }
        if let Some(duration) = options.max_await_time {
            native.set_max_await_time(duration)?;
        }
        if let Some(pref) = options.read_preference {
            native.set_read_preference(pref.into())?;
        }
        if options.no_cursor_timeout {
            native.set_no_cursor_timeout(true)?;
        }
        Ok(Self::from_parts(
            native,
            decoder::<T>(),
            options.high_water_mark,
        ))
    }
}

impl<T, C> CursorAdapter<T, C>
where
    T: Send + 'static,
    C: DriverCursor,
{
    /// Wrap `native` with an arbitrary document transform.
    pub fn from_parts(native: C, transform: Transform<T>, high_water_mark: usize) -> Self {
        let namespace = native.namespace();
        let native_events = native.events();
        Self::from_parts_with_events(
            Arc::new(Mutex::new(native)),
            EventEmitter::new(),
            native_events,
            namespace,
            transform,
            ReadableState::new(high_water_mark.max(1)),
        )
    }

    fn from_parts_with_events(
        native: Arc<Mutex<C>>,
        events: EventEmitter,
        native_events: EventEmitter,
        namespace: Namespace,
        transform: Transform<T>,
        readable: ReadableState<T>,
    ) -> Self {
        Self {
            native,
            events,
            native_events,
            namespace,
            transform,
            readable,
            pending: None,
        }
    }

    /// Re-type the adapter before anything was read.
    pub(crate) fn rebind<U>(self) -> CursorResult<CursorAdapter<U, C>>
    where
        U: DeserializeOwned + Send + 'static,
    {
        if self.pending.is_some() || !self.readable.buffer.is_empty() {
            return Err(CursorError::AlreadyInitialized);
        }
        Ok(CursorAdapter::from_parts_with_events(
            self.native,
            self.events,
            self.native_events,
            self.namespace,
            decoder::<U>(),
            ReadableState::new(self.readable.high_water_mark),
        ))
    }

    // ------------------------------------------------------------------
    // Pull loop
    // ------------------------------------------------------------------

    fn pull_size(&self) -> usize {
        self.readable
            .high_water_mark
            .saturating_sub(self.readable.buffer.len())
            .max(1)
    }

    fn start_pull(&self, size: usize) -> BoxFuture<'static, PullOutcome<T>> {
        debug!(namespace = %self.namespace, requested = size, "Pull started");
        self.events.emit(PAUSE, &EventPayload::Empty);
        pull(self.native.clone(), self.transform.clone(), size).boxed()
    }

    fn finish_pull(&mut self, outcome: PullOutcome<T>) {
        self.pending = None;
        let PullOutcome {
            items,
            ended,
            error,
        } = outcome;
        debug!(
            namespace = %self.namespace,
            received = items.len(),
            ended = ended,
            failed = error.is_some(),
            "Pull finished"
        );

        self.readable.buffer.extend(items);
        if ended {
            self.readable.ended = true;
        }
        if let Some(err) = error {
            self.readable.destroyed = true;
            self.readable.buffer.clear();
            self.events.emit(ERROR, &EventPayload::Error(err.clone()));
            self.readable.errored = Some(err);
        }
        self.events.emit(RESUME, &EventPayload::Empty);
    }

    fn emit_end_once(&mut self) {
        if self.readable.ended && self.readable.buffer.is_empty() && !self.readable.end_emitted {
            self.readable.end_emitted = true;
            self.events.emit(END, &EventPayload::Empty);
        }
    }

    /// Drive an in-flight pull to completion.
    pub(crate) async fn settle(&mut self) {
        if let Some(pending) = self.pending.take() {
            let outcome = pending.await;
            self.finish_pull(outcome);
        }
    }

    /// Fetch one native document into the readable buffer.
    pub(crate) async fn prefetch(&mut self) -> CursorResult<()> {
        self.settle().await;
        if self.readable.is_finished() {
            return Ok(());
        }
        let doc = self.native.lock().await.next().await?;
        match doc {
            Some(doc) => {
                let item = (self.transform)(doc)?;
                self.readable.buffer.push_back(item);
            }
            None => self.readable.ended = true,
        }
        Ok(())
    }

    /// Run `f` against the native cursor once no pull is in flight.
    pub(crate) async fn with_native<R, F>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut C) -> R + Send,
        R: Send,
    {
        self.settle().await;
        let mut native = self.native.lock().await;
        f(&mut *native)
    }

    /// Pull up to `size` items, waiting for the native cursor if needed.
    ///
    /// Returns fewer items only at end of stream. A pull failure destroys
    /// the adapter and is returned once.
    pub async fn read(&mut self, size: usize) -> CursorResult<Vec<T>> {
        self.settle().await;
        if self.readable.buffer.len() < size && !self.readable.is_finished() {
            let wanted = size - self.readable.buffer.len();
            let outcome = self.start_pull(wanted).await;
            self.finish_pull(outcome);
        }
        if let Some(err) = self.readable.errored.take() {
            return Err(err);
        }

        let n = size.min(self.readable.buffer.len());
        let items = self.readable.buffer.drain(..n).collect();
        self.emit_end_once();
        Ok(items)
    }

    // ------------------------------------------------------------------
    // Readable state
    // ------------------------------------------------------------------

    /// Stop yielding items until [`resume`](Self::resume).
    pub fn pause(&mut self) {
        if !self.readable.paused {
            self.readable.paused = true;
            self.events.emit(PAUSE, &EventPayload::Empty);
        }
    }

    /// Resume after [`pause`](Self::pause), waking a waiting consumer.
    pub fn resume(&mut self) {
        if self.readable.paused {
            self.readable.paused = false;
            self.events.emit(RESUME, &EventPayload::Empty);
            if let Some(waker) = self.readable.waker.take() {
                waker.wake();
            }
        }
    }

    /// Whether the consumer paused the adapter.
    pub fn is_paused(&self) -> bool {
        self.readable.paused
    }

    /// Whether the native cursor reported exhaustion.
    pub fn is_ended(&self) -> bool {
        self.readable.ended
    }

    /// Whether the adapter was destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.readable.destroyed
    }

    /// Number of items waiting in the readable buffer.
    pub fn readable_length(&self) -> usize {
        self.readable.buffer.len()
    }

    /// The configured high water mark.
    pub fn high_water_mark(&self) -> usize {
        self.readable.high_water_mark
    }

    /// Change the high water mark. Values below 1 are raised to 1.
    pub fn set_high_water_mark(&mut self, mark: usize) -> &mut Self {
        self.readable.high_water_mark = mark.max(1);
        self
    }

    // ------------------------------------------------------------------
    // Destroy
    // ------------------------------------------------------------------

    /// Tear the adapter down.
    ///
    /// Drops any in-flight pull and the readable buffer, kills the native
    /// transport and closes the native cursor. `error` takes precedence over
    /// a close failure; whichever remains is returned and emitted as `error`.
    pub async fn destroy(&mut self, error: Option<CursorError>) -> CursorResult<()> {
        self.pending = None;
        self.readable.destroyed = true;
        self.readable.buffer.clear();
        debug!(namespace = %self.namespace, with_error = error.is_some(), "Destroying cursor");

        let failure = {
            let mut native = self.native.lock().await;
            destroy_native(&mut *native, error).await
        };

        match failure {
            Some(err) => {
                self.events.emit(ERROR, &EventPayload::Error(err.clone()));
                Err(err)
            }
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Native passthroughs
    // ------------------------------------------------------------------

    /// Whether another item is available.
    ///
    /// Fails with [`CursorError::Destroyed`] once the adapter is destroyed.
    pub async fn has_next(&mut self) -> CursorResult<bool> {
        self.settle().await;
        if self.readable.is_spent() {
            return Err(CursorError::Destroyed);
        }
        if !self.readable.buffer.is_empty() {
            return Ok(true);
        }
        if self.readable.is_finished() {
            return Ok(false);
        }
        self.native.lock().await.has_next().await
    }

    async fn fetch(&mut self, wait: bool) -> CursorResult<Option<T>> {
        self.settle().await;
        if let Some(item) = self.readable.buffer.pop_front() {
            return Ok(Some(item));
        }
        if let Some(err) = self.readable.errored.take() {
            return Err(err);
        }
        if self.readable.destroyed {
            return Err(CursorError::Destroyed);
        }
        if self.readable.ended {
            self.emit_end_once();
            return Ok(None);
        }

        let doc = {
            let mut native = self.native.lock().await;
            if wait {
                native.next().await?
            } else {
                native.try_next().await?
            }
        };
        match doc {
            Some(doc) => (self.transform)(doc).map(Some),
            None => {
                if wait {
                    self.readable.ended = true;
                    self.emit_end_once();
                }
                Ok(None)
            }
        }
    }

    /// The next item, `None` at end of stream.
    ///
    /// After [`destroy`](Self::destroy) this fails with
    /// [`CursorError::Destroyed`], apart from a pull failure that has not
    /// been reported yet.
    pub async fn next(&mut self) -> CursorResult<Option<T>> {
        self.fetch(true).await
    }

    /// The next item without waiting on a tailable cursor.
    pub async fn try_next(&mut self) -> CursorResult<Option<T>> {
        self.fetch(false).await
    }

    /// Drain documents the native cursor already fetched.
    pub async fn read_buffered(&mut self, count: Option<usize>) -> CursorResult<Vec<T>> {
        let transform = self.transform.clone();
        let docs = self.with_native(|native| native.read_buffered(count)).await;
        docs.into_iter().map(|doc| transform(doc)).collect()
    }

    /// Number of documents the native cursor holds but has not returned.
    pub async fn buffered_count(&mut self) -> usize {
        self.with_native(|native| native.buffered_count()).await
    }

    /// Set the driver batch size.
    pub async fn batch_size(&mut self, size: u32) -> CursorResult<&mut Self> {
        self.with_native(|native| native.set_batch_size(size)).await?;
        Ok(self)
    }

    /// Set the tailable await time.
    pub async fn max_await_time(&mut self, duration: Duration) -> CursorResult<&mut Self> {
        self.with_native(|native| native.set_max_await_time(duration))
            .await?;
        Ok(self)
    }

    /// Set the read concern.
    pub async fn with_read_concern(&mut self, concern: ReadConcern) -> CursorResult<&mut Self> {
        self.with_native(|native| native.set_read_concern(concern))
            .await?;
        Ok(self)
    }

    /// Set the read preference.
    pub async fn with_read_preference(
        &mut self,
        criteria: impl Into<SelectionCriteria>,
    ) -> CursorResult<&mut Self> {
        let criteria = criteria.into();
        self.with_native(|native| native.set_read_preference(criteria))
            .await?;
        Ok(self)
    }

    /// Keep the server cursor alive past the idle timeout.
    pub async fn no_cursor_timeout(&mut self) -> CursorResult<&mut Self> {
        self.with_native(|native| native.set_no_cursor_timeout(true))
            .await?;
        Ok(self)
    }

    /// The configured read concern.
    pub async fn read_concern(&mut self) -> Option<ReadConcern> {
        self.with_native(|native| native.read_concern()).await
    }

    /// The configured read preference.
    pub async fn read_preference(&mut self) -> Option<SelectionCriteria> {
        self.with_native(|native| native.read_preference()).await
    }

    /// Whether the native cursor is closed.
    pub async fn closed(&mut self) -> bool {
        self.with_native(|native| native.closed()).await
    }

    /// Server-side cursor id.
    pub async fn id(&mut self) -> Option<i64> {
        self.with_native(|native| native.id()).await
    }

    /// Namespace the cursor reads from.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Close the native cursor and drop every buffered item.
    ///
    /// Nothing is yielded afterwards until [`rewind`](Self::rewind).
    pub async fn close(&mut self) -> CursorResult<()> {
        self.settle().await;
        if self.readable.is_spent() {
            return Err(CursorError::Destroyed);
        }
        self.readable.buffer.clear();
        self.readable.ended = true;
        // Closing is not exhaustion; `end` stays unfired.
        self.readable.end_emitted = true;
        if self.readable.destroyed {
            return Ok(());
        }
        self.native.lock().await.close().await
    }

    /// Reset the native cursor and the readable state.
    pub async fn rewind(&mut self) -> &mut Self {
        self.pending = None;
        self.native.lock().await.rewind();
        self.readable = ReadableState::new(self.readable.high_water_mark);
        self
    }

    /// Iterate items without going through the readable state machine.
    ///
    /// Buffered items come first, then native documents. Iteration stops
    /// after the first error.
    pub fn iter(&mut self) -> impl Stream<Item = CursorResult<T>> + Send + '_ {
        futures::stream::unfold((self, false), |(adapter, failed)| async move {
            if failed {
                return None;
            }
            match adapter.next().await {
                Ok(Some(item)) => Some((Ok(item), (adapter, false))),
                Ok(None) => None,
                Err(err) => Some((Err(err), (adapter, true))),
            }
        })
    }

    /// Collect every remaining item.
    pub async fn to_vec(&mut self) -> CursorResult<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    fn emitter_for(&self, event: &str) -> &EventEmitter {
        if event == CLOSE {
            &self.native_events
        } else {
            &self.events
        }
    }

    /// Register `listener` for `event`.
    pub fn on(&self, event: &str, listener: Listener) -> &Self {
        if event == CLOSE {
            self.native_events.on(event, listener.clone());
        }
        self.events.on(event, listener);
        self
    }

    /// Alias of [`on`](Self::on).
    pub fn add_listener(&self, event: &str, listener: Listener) -> &Self {
        self.on(event, listener)
    }

    /// Register a one-shot listener.
    ///
    /// A one-shot `close` listener lives on the native emitter only, so it
    /// is dropped once `close` fires.
    pub fn once(&self, event: &str, listener: Listener) -> &Self {
        self.emitter_for(event).once(event, listener);
        self
    }

    /// Register `listener` ahead of existing ones.
    pub fn prepend_listener(&self, event: &str, listener: Listener) -> &Self {
        if event == CLOSE {
            self.native_events.prepend_listener(event, listener.clone());
        }
        self.events.prepend_listener(event, listener);
        self
    }

    /// Register a one-shot listener ahead of existing ones.
    pub fn prepend_once_listener(&self, event: &str, listener: Listener) -> &Self {
        self.emitter_for(event).prepend_once_listener(event, listener);
        self
    }

    /// Fire `event`. `close` is fired by the native emitter only.
    pub fn emit(&self, event: &str, payload: &EventPayload) -> bool {
        self.emitter_for(event).emit(event, payload)
    }

    /// Remove `listener` from both emitters.
    pub fn remove_listener(&self, event: &str, listener: &Listener) -> &Self {
        self.native_events.remove_listener(event, listener);
        self.events.remove_listener(event, listener);
        self
    }

    /// Alias of [`remove_listener`](Self::remove_listener).
    pub fn off(&self, event: &str, listener: &Listener) -> &Self {
        self.remove_listener(event, listener)
    }

    /// Remove all listeners of `event` (or of every event) from both emitters.
    pub fn remove_all_listeners(&self, event: Option<&str>) -> &Self {
        self.native_events.remove_all_listeners(event);
        self.events.remove_all_listeners(event);
        self
    }

    /// Set the listener warning threshold on both emitters.
    pub fn set_max_listeners(&self, max: usize) -> &Self {
        self.native_events.set_max_listeners(max);
        self.events.set_max_listeners(max);
        self
    }

    /// The adapter's listener warning threshold.
    pub fn get_max_listeners(&self) -> usize {
        self.events.max_listeners()
    }

    /// Number of listeners for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.emitter_for(event).listener_count(event)
    }

    /// Listeners for `event`, in call order.
    pub fn listeners(&self, event: &str) -> Vec<Listener> {
        self.emitter_for(event).listeners(event)
    }

    /// Listeners for `event` with their one-shot flag.
    pub fn raw_listeners(&self, event: &str) -> Vec<(Listener, bool)> {
        self.emitter_for(event).raw_listeners(event)
    }

    /// Events with listeners on the adapter's own emitter.
    ///
    /// One-shot `close` listeners are not listed.
    pub fn event_names(&self) -> Vec<String> {
        self.events.event_names()
    }

    // ------------------------------------------------------------------
    // Unsupported driver operations
    // ------------------------------------------------------------------

    /// Not supported.
    pub fn add_query_modifier(&self, name: &str, value: impl Into<Bson>) -> CursorResult<&Self> {
        Err(CursorError::unsupported(
            "add_query_modifier",
            vec![Bson::String(name.to_string()), value.into()],
        ))
    }

    /// Not supported.
    pub fn min(&self, bounds: Document) -> CursorResult<&Self> {
        Err(CursorError::unsupported("min", vec![Bson::Document(bounds)]))
    }

    /// Not supported.
    pub fn max(&self, bounds: Document) -> CursorResult<&Self> {
        Err(CursorError::unsupported("max", vec![Bson::Document(bounds)]))
    }

    /// Not supported.
    pub fn killed(&self) -> CursorResult<bool> {
        Err(CursorError::unsupported("killed", Vec::new()))
    }

    /// Not supported.
    pub fn load_balanced(&self) -> CursorResult<bool> {
        Err(CursorError::unsupported("load_balanced", Vec::new()))
    }

    /// Not supported; the adapter already is a stream.
    pub fn stream(&self) -> CursorResult<&Self> {
        Err(CursorError::unsupported("stream", Vec::new()))
    }

    // ------------------------------------------------------------------
    // Transform and clone
    // ------------------------------------------------------------------

    /// Apply `f` to every item.
    ///
    /// Items already buffered are converted immediately; an in-flight pull
    /// is converted when it completes.
    pub fn map<U, F>(self, f: F) -> CursorAdapter<U, C>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let f = Arc::new(f);

        let prev = self.transform;
        let g = f.clone();
        let transform: Transform<U> = Arc::new(move |doc| prev(doc).map(|item| g(item)));

        let pending = self.pending.map(|fut| {
            let g = f.clone();
            fut.map(move |outcome| outcome.map(|item| g(item))).boxed()
        });
        let readable = self.readable.map(|item| f(item));

        CursorAdapter {
            native: self.native,
            events: self.events,
            native_events: self.native_events,
            namespace: self.namespace,
            transform,
            readable,
            pending,
        }
    }

    /// A fresh adapter over a cloned native cursor with the same transform.
    ///
    /// Listeners and readable state are not carried over.
    pub async fn clone_adapter(&mut self) -> Self {
        self.settle().await;
        let native = self.native.lock().await.clone_cursor();
        Self::from_parts(
            native,
            self.transform.clone(),
            self.readable.high_water_mark,
        )
    }
}

impl<T, C> Stream for CursorAdapter<T, C>
where
    T: Send + 'static,
    C: DriverCursor,
{
    type Item = CursorResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.readable.paused {
                this.readable.waker = Some(cx.waker().clone());
                return Poll::Pending;
            }
            if let Some(item) = this.readable.buffer.pop_front() {
                return Poll::Ready(Some(Ok(item)));
            }
            if let Some(err) = this.readable.errored.take() {
                return Poll::Ready(Some(Err(err)));
            }
            if this.readable.is_finished() {
                this.emit_end_once();
                return Poll::Ready(None);
            }

            if this.pending.is_none() {
                this.pending = Some(this.start_pull(this.pull_size()));
            }
            let outcome = match this.pending.as_mut() {
                Some(pending) => ready!(pending.as_mut().poll(cx)),
                None => continue,
            };
            this.finish_pull(outcome);
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let buffered = self.readable.buffer.len();
        if self.readable.is_finished() {
            (buffered, Some(buffered))
        } else {
            (buffered, None)
        }
    }
}

/// A typed cursor built on [`CursorAdapter`].
///
/// Implementors supply `clone_cursor()` returning their own type, so a
/// clone keeps variant-specific state such as a filter.
#[async_trait]
pub trait CursorVariant: Sized + Send {
    /// Item type yielded by the cursor.
    type Item: Send + 'static;
    /// Native cursor type.
    type Native: DriverCursor;

    /// The underlying adapter.
    fn adapter(&self) -> &CursorAdapter<Self::Item, Self::Native>;

    /// The underlying adapter, mutably.
    fn adapter_mut(&mut self) -> &mut CursorAdapter<Self::Item, Self::Native>;

    /// A fresh, unstarted cursor of the same variant over the same query.
    async fn clone_cursor(&mut self) -> Self;
}
