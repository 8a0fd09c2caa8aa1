//! Event handlers and ordered per-event handler sets.
//!
//! A [`Handler`] is a shared callback. Two handlers are the same handler
//! exactly when they were cloned from the same [`Handler::new`] call, so a
//! consumer can register and later unregister by keeping a clone around.
//!
//! [`HandlerTable`] maps event names to an insertion-ordered set of
//! handlers. Both the registry's tracked set and each connection's attached
//! listeners are handler tables.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

type Callback = dyn Fn(&Value) + Send + Sync;

/// A shared event callback with pointer identity.
#[derive(Clone)]
pub struct Handler(Arc<Callback>);

impl Handler {
    /// Wrap a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Invoke the callback.
    pub fn call(&self, payload: &Value) {
        (self.0)(payload);
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0).cast::<()>()
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Handler {}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({:p})", self.addr())
    }
}

/// Event name to insertion-ordered handler set.
#[derive(Clone, Debug, Default)]
pub struct HandlerTable {
    entries: HashMap<String, Vec<Handler>>,
}

impl HandlerTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handler` for `event`. Returns `false` if it was already present.
    pub fn insert(&mut self, event: &str, handler: Handler) -> bool {
        let set = self.entries.entry(event.to_owned()).or_default();
        if set.contains(&handler) {
            return false;
        }
        set.push(handler);
        true
    }

    /// Remove `handler` from `event`. Returns `false` if it was not present.
    pub fn remove(&mut self, event: &str, handler: &Handler) -> bool {
        let Some(set) = self.entries.get_mut(event) else {
            return false;
        };
        let Some(pos) = set.iter().position(|h| h == handler) else {
            return false;
        };
        let _ = set.remove(pos);
        if set.is_empty() {
            let _ = self.entries.remove(event);
        }
        true
    }

    /// Whether `handler` is present for `event`.
    pub fn contains(&self, event: &str, handler: &Handler) -> bool {
        self.entries
            .get(event)
            .is_some_and(|set| set.contains(handler))
    }

    /// Owned copy of the handlers for `event`, in insertion order.
    pub fn snapshot(&self, event: &str) -> Vec<Handler> {
        self.entries.get(event).cloned().unwrap_or_default()
    }

    /// Number of handlers for `event`.
    pub fn count(&self, event: &str) -> usize {
        self.entries.get(event).map_or(0, Vec::len)
    }

    /// Event names with at least one handler, sorted.
    pub fn events(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Iterate over `(event, handlers)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Handler])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop() -> Handler {
        Handler::new(|_| {})
    }

    #[test]
    fn clones_are_equal() {
        let h = noop();
        let h2 = h.clone();
        assert_eq!(h, h2);
    }

    #[test]
    fn distinct_handlers_differ() {
        assert_ne!(noop(), noop());
    }

    #[test]
    fn call_invokes_closure() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = {
            let hits = hits.clone();
            Handler::new(move |v| {
                let _ = hits.fetch_add(v.as_u64().unwrap_or(0) as usize, Ordering::SeqCst);
            })
        };
        h.call(&Value::from(3));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn insert_is_set_semantics() {
        let mut table = HandlerTable::new();
        let h = noop();
        assert!(table.insert("x", h.clone()));
        assert!(!table.insert("x", h.clone()));
        assert_eq!(table.count("x"), 1);
        assert!(table.insert("y", h));
        assert_eq!(table.count("y"), 1);
        assert_eq!(table.events(), vec!["x".to_owned(), "y".to_owned()]);
    }

    #[test]
    fn snapshot_preserves_order() {
        let mut table = HandlerTable::new();
        let a = noop();
        let b = noop();
        let c = noop();
        let _ = table.insert("e", a.clone());
        let _ = table.insert("e", b.clone());
        let _ = table.insert("e", c.clone());
        assert_eq!(table.snapshot("e"), vec![a, b, c]);
    }

    #[test]
    fn remove_unknown_is_noop() {
        let mut table = HandlerTable::new();
        assert!(!table.remove("e", &noop()));
        let _ = table.insert("e", noop());
        assert!(!table.remove("e", &noop()));
        assert_eq!(table.count("e"), 1);
    }

    #[test]
    fn remove_last_drops_event() {
        let mut table = HandlerTable::new();
        let h = noop();
        let _ = table.insert("e", h.clone());
        assert!(table.remove("e", &h));
        assert!(table.events().is_empty());
    }

    #[test]
    fn events_sorted() {
        let mut table = HandlerTable::new();
        let _ = table.insert("b", noop());
        let _ = table.insert("a", noop());
        assert_eq!(table.events(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn snapshot_unaffected_by_later_removal() {
        let mut table = HandlerTable::new();
        let a = noop();
        let b = noop();
        let _ = table.insert("e", a.clone());
        let _ = table.insert("e", b.clone());
        let snap = table.snapshot("e");
        let _ = table.remove("e", &b);
        assert_eq!(snap.len(), 2);
        assert_eq!(table.snapshot("e"), vec![a]);
    }
}
