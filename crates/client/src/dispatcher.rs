//! Listener registry and synchronous event delivery.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use tracing::{error, trace};

use crate::types::Event;

/// A registered callback. Identity is the `Arc` allocation: unsubscribe with
/// a clone of the same `Arc` that was subscribed.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Wraps a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Maps event kinds to listeners in registration order.
///
/// Lifecycle kinds (`connected`, `disconnected`, `error`) go through the
/// same path as application kinds.
#[derive(Default)]
pub struct Dispatcher {
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `listener` for `kind`. The same listener may be added twice
    /// and is then invoked twice.
    pub fn subscribe(&self, kind: impl Into<String>, listener: Listener) {
        let mut map = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        map.entry(kind.into()).or_default().push(listener);
    }

    /// Removes every registration of `listener` for `kind`. Returns `false`
    /// if it was not registered.
    pub fn unsubscribe(&self, kind: &str, listener: &Listener) -> bool {
        let mut map = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let Some(list) = map.get_mut(kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| !Arc::ptr_eq(l, listener));
        let removed = list.len() != before;
        if list.is_empty() {
            map.remove(kind);
        }
        removed
    }

    /// Number of registrations for `kind`.
    pub fn listener_count(&self, kind: &str) -> usize {
        let map = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        map.get(kind).map_or(0, Vec::len)
    }

    pub(crate) fn clear(&self) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Invokes every listener for the event's kind, in registration order,
    /// on the calling task. A panicking listener is logged and skipped; the
    /// rest still run.
    ///
    /// The registry is snapshotted first, so listeners may subscribe or
    /// unsubscribe from inside a callback.
    pub fn dispatch(&self, event: &Event) -> DispatchReport {
        let kind = event.kind();
        let snapshot: Vec<Listener> = {
            let map = self.listeners.read().unwrap_or_else(|e| e.into_inner());
            match map.get(kind) {
                Some(list) => list.clone(),
                None => {
                    trace!(kind, "no listeners for event");
                    return DispatchReport::default();
                }
            }
        };

        let mut report = DispatchReport::default();
        for (index, listener) in snapshot.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => report.delivered += 1,
                Err(panic) => {
                    report.failed += 1;
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".into());
                    error!(kind, index, panic = %message, "event listener panicked");
                }
            }
        }
        report
    }
}
