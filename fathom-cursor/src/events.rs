//! Named-event listener registry.
//!
//! Both the cursor adapter and the native driver cursor own an
//! [`EventEmitter`]. The adapter mirrors some registrations onto the native
//! emitter so that the `close` notification is fired exactly once, by the
//! native cursor.

use std::fmt;
use std::sync::Arc;

use bson::Bson;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::CursorError;

/// Fired once when the native cursor closes. Owned by the native emitter.
pub const CLOSE: &str = "close";
/// Fired once after the last document was delivered.
pub const END: &str = "end";
/// Fired when a pull starts.
pub const PAUSE: &str = "pause";
/// Fired when a pull completes.
pub const RESUME: &str = "resume";
/// Fired when a pull or destroy fails.
pub const ERROR: &str = "error";

/// Default listener count per event before a warning is logged.
pub const DEFAULT_MAX_LISTENERS: usize = 10;

/// Value passed to listeners.
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// No payload.
    Empty,
    /// The error behind an `error` event.
    Error(CursorError),
    /// An arbitrary value.
    Value(Bson),
}

/// A registered callback.
pub type Listener = Arc<dyn Fn(&EventPayload) + Send + Sync>;

/// Wrap a closure as a [`Listener`].
///
/// Keep the returned handle to remove the listener later; removal compares
/// handles by identity.
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&EventPayload) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Clone)]
struct Registration {
    listener: Listener,
    once: bool,
}

struct Registry {
    events: IndexMap<String, Vec<Registration>>,
    max_listeners: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            events: IndexMap::new(),
            max_listeners: DEFAULT_MAX_LISTENERS,
        }
    }
}

/// A cheap, clonable handle to a listener registry.
///
/// Clones share the same registry.
#[derive(Clone, Default)]
pub struct EventEmitter {
    inner: Arc<Mutex<Registry>>,
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.lock();
        f.debug_struct("EventEmitter")
            .field("events", &registry.events.keys().collect::<Vec<_>>())
            .field("max_listeners", &registry.max_listeners)
            .finish()
    }
}

impl EventEmitter {
    /// Create an empty emitter.
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, event: &str, registration: Registration, prepend: bool) {
        let mut registry = self.inner.lock();
        let max = registry.max_listeners;
        let list = registry.events.entry(event.to_string()).or_default();
        if prepend {
            list.insert(0, registration);
        } else {
            list.push(registration);
        }
        if max > 0 && list.len() > max {
            warn!(
                event = event,
                count = list.len(),
                max = max,
                "Possible listener leak detected"
            );
        }
    }

    /// Append a listener for `event`.
    pub fn on(&self, event: &str, listener: Listener) {
        self.register(event, Registration { listener, once: false }, false);
    }

    /// Alias of [`on`](Self::on).
    pub fn add_listener(&self, event: &str, listener: Listener) {
        self.on(event, listener);
    }

    /// Append a listener that is removed after its first call.
    pub fn once(&self, event: &str, listener: Listener) {
        self.register(event, Registration { listener, once: true }, false);
    }

    /// Insert a listener at the front of the list for `event`.
    pub fn prepend_listener(&self, event: &str, listener: Listener) {
        self.register(event, Registration { listener, once: false }, true);
    }

    /// Insert a one-shot listener at the front of the list for `event`.
    pub fn prepend_once_listener(&self, event: &str, listener: Listener) {
        self.register(event, Registration { listener, once: true }, true);
    }

    /// Call every listener of `event` in order. Returns whether any existed.
    ///
    /// Listeners run outside the registry lock, so they may register or
    /// remove listeners themselves.
    pub fn emit(&self, event: &str, payload: &EventPayload) -> bool {
        let listeners: Vec<Listener> = {
            let mut registry = self.inner.lock();
            let Some(list) = registry.events.get_mut(event) else {
                return false;
            };
            let snapshot: Vec<Listener> = list.iter().map(|r| r.listener.clone()).collect();
            list.retain(|r| !r.once);
            if list.is_empty() {
                registry.events.shift_remove(event);
            }
            snapshot
        };

        for listener in &listeners {
            listener(payload);
        }
        !listeners.is_empty()
    }

    /// Remove the most recently added registration of `listener`.
    pub fn remove_listener(&self, event: &str, listener: &Listener) {
        let mut registry = self.inner.lock();
        let Some(list) = registry.events.get_mut(event) else {
            return;
        };
        if let Some(pos) = list
            .iter()
            .rposition(|r| Arc::ptr_eq(&r.listener, listener))
        {
            list.remove(pos);
        }
        if list.is_empty() {
            registry.events.shift_remove(event);
        }
    }

    /// Alias of [`remove_listener`](Self::remove_listener).
    pub fn off(&self, event: &str, listener: &Listener) {
        self.remove_listener(event, listener);
    }

    /// Remove every listener of `event`, or of every event when `None`.
    pub fn remove_all_listeners(&self, event: Option<&str>) {
        let mut registry = self.inner.lock();
        match event {
            Some(event) => {
                registry.events.shift_remove(event);
            }
            None => registry.events.clear(),
        }
    }

    /// Set the per-event listener count above which a warning is logged.
    /// Zero disables the warning.
    pub fn set_max_listeners(&self, max: usize) {
        self.inner.lock().max_listeners = max;
    }

    /// The per-event warning threshold.
    pub fn max_listeners(&self) -> usize {
        self.inner.lock().max_listeners
    }

    /// Number of listeners registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.lock().events.get(event).map_or(0, Vec::len)
    }

    /// The listeners of `event`, in call order.
    pub fn listeners(&self, event: &str) -> Vec<Listener> {
        self.inner
            .lock()
            .events
            .get(event)
            .map(|list| list.iter().map(|r| r.listener.clone()).collect())
            .unwrap_or_default()
    }

    /// The listeners of `event` together with their one-shot flag.
    pub fn raw_listeners(&self, event: &str) -> Vec<(Listener, bool)> {
        self.inner
            .lock()
            .events
            .get(event)
            .map(|list| list.iter().map(|r| (r.listener.clone(), r.once)).collect())
            .unwrap_or_default()
    }

    /// Events with at least one listener, in registration order.
    pub fn event_names(&self) -> Vec<String> {
        self.inner.lock().events.keys().cloned().collect()
    }
}
