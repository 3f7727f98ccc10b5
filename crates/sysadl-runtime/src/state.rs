use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sysadl_core::{parse_path, ErrorKind, SysadlError, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

/// Receives `(new_value, old_value, changed_path)`.
pub type StateCallback = Arc<dyn Fn(&Value, &Value, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateStatistics {
    pub updates: u64,
    pub notifications: u64,
    pub subscriptions: usize,
}

pub trait StateStore: Send + Sync {
    fn set_value(&self, path: &str, value: Value) -> Result<(), SysadlError>;
    fn get_value(&self, path: &str) -> Option<Value>;
    /// Deletes the entry at `path`, notifying subscribers with `Null` as the
    /// new value. Returns what was removed.
    fn remove_value(&self, path: &str) -> Option<Value>;
    fn snapshot(&self) -> Value;
    fn subscribe(&self, pattern: &str, callback: StateCallback) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
    fn statistics(&self) -> StateStatistics;
}

/// `*` matches one segment; a pattern also matches ancestors and descendants
/// of the paths it names, since writing a parent replaces the child.
pub fn pattern_matches(pattern: &str, path: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }
    parse_path(pattern)
        .iter()
        .zip(parse_path(path).iter())
        .all(|(expected, actual)| *expected == "*" || expected == actual)
}

struct Subscription {
    pattern: String,
    callback: StateCallback,
}

pub struct ReactiveStateManager {
    root: RwLock<Value>,
    subscriptions: Mutex<BTreeMap<SubscriptionId, Subscription>>,
    next_subscription: AtomicU64,
    stats: Mutex<StateStatistics>,
}

impl Default for ReactiveStateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactiveStateManager {
    pub fn new() -> Self {
        Self::with_state(Value::empty_map())
    }

    pub fn with_state(initial: Value) -> Self {
        let root = if initial.is_null() {
            Value::empty_map()
        } else {
            initial
        };
        Self {
            root: RwLock::new(root),
            subscriptions: Mutex::new(BTreeMap::new()),
            next_subscription: AtomicU64::new(1),
            stats: Mutex::new(StateStatistics::default()),
        }
    }
}

impl ReactiveStateManager {
    fn notify(&self, path: &str, value: &Value, previous: &Value) {
        let listeners = self
            .subscriptions
            .lock()
            .values()
            .filter(|subscription| pattern_matches(&subscription.pattern, path))
            .map(|subscription| Arc::clone(&subscription.callback))
            .collect::<Vec<_>>();
        self.stats.lock().notifications += listeners.len() as u64;

        tracing::trace!(path, listeners = listeners.len(), "state updated");
        for listener in listeners {
            listener(value, previous, path);
        }
    }
}

impl StateStore for ReactiveStateManager {
    fn set_value(&self, path: &str, value: Value) -> Result<(), SysadlError> {
        let previous = self
            .root
            .write()
            .set_path(path, value.clone())
            .map_err(|detail| {
                SysadlError::new(
                    ErrorKind::StateUpdateFailed,
                    format!("Cannot set state path \"{}\": {}", path, detail),
                )
            })?
            .unwrap_or_default();
        self.stats.lock().updates += 1;

        if previous == value {
            return Ok(());
        }
        self.notify(path, &value, &previous);
        Ok(())
    }

    fn get_value(&self, path: &str) -> Option<Value> {
        self.root.read().get_path(path).cloned()
    }

    fn remove_value(&self, path: &str) -> Option<Value> {
        let removed = self.root.write().remove_path(path)?;
        self.stats.lock().updates += 1;
        self.notify(path, &Value::Null, &removed);
        Some(removed)
    }

    fn snapshot(&self) -> Value {
        self.root.read().clone()
    }

    fn subscribe(&self, pattern: &str, callback: StateCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.insert(
            id,
            Subscription {
                pattern: pattern.to_string(),
                callback,
            },
        );
        self.stats.lock().subscriptions = subscriptions.len();
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        let removed = subscriptions.remove(&id).is_some();
        self.stats.lock().subscriptions = subscriptions.len();
        removed
    }

    fn statistics(&self) -> StateStatistics {
        *self.stats.lock()
    }
}

#[cfg(test)]
mod state_tests {
    use super::*;

    #[test]
    fn patterns_match_wildcards_and_ancestors() {
        assert!(pattern_matches("vehicle.location", "vehicle.location.x"));
        assert!(pattern_matches("vehicle.location.x", "vehicle"));
        assert!(pattern_matches("vehicle.*.x", "vehicle.location.x"));
        assert!(pattern_matches("*", "anything.at.all"));
        assert!(!pattern_matches("vehicle.speed", "vehicle.location.x"));
    }

    #[test]
    fn notifies_matching_subscribers_only_on_change() {
        let store = ReactiveStateManager::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.subscribe(
            "sensor",
            Arc::new(move |new, old, path| {
                sink.lock().push((path.to_string(), old.clone(), new.clone()));
            }),
        );

        store.set_value("sensor.temp", Value::from(20)).expect("set");
        store.set_value("sensor.temp", Value::from(20)).expect("set");
        store.set_value("other.temp", Value::from(1)).expect("set");
        store.set_value("sensor.temp", Value::from(25)).expect("set");

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[1],
            (
                "sensor.temp".to_string(),
                Value::from(20),
                Value::from(25)
            )
        );
        assert_eq!(store.statistics().updates, 4);
        assert_eq!(store.statistics().notifications, 2);
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let store = ReactiveStateManager::new();
        let count = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&count);
        let id = store.subscribe("a", Arc::new(move |_, _, _| *sink.lock() += 1));
        store.set_value("a", Value::from(1)).expect("set");
        assert!(store.unsubscribe(id));
        store.set_value("a", Value::from(2)).expect("set");
        assert_eq!(*count.lock(), 1);
        assert_eq!(store.statistics().subscriptions, 0);
    }

    #[test]
    fn remove_value_deletes_and_notifies() {
        let store = ReactiveStateManager::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.subscribe(
            "jobs",
            Arc::new(move |new, old, _| sink.lock().push((old.clone(), new.clone()))),
        );
        store.set_value("jobs.a.done", Value::from(true)).expect("set");

        let removed = store.remove_value("jobs.a");
        assert_eq!(
            removed.and_then(|value| value.get_path("done").cloned()),
            Some(Value::Bool(true))
        );
        assert_eq!(store.get_value("jobs.a"), None);
        assert_eq!(store.remove_value("jobs.a"), None);
        assert_eq!(seen.lock().len(), 2);
        assert_eq!(seen.lock()[1].1, Value::Null);
    }

    #[test]
    fn rejects_writes_through_scalars() {
        let store = ReactiveStateManager::new();
        store.set_value("a", Value::from(1)).expect("set");
        let error = store
            .set_value("a.b", Value::from(2))
            .expect_err("should fail");
        assert_eq!(error.kind, ErrorKind::StateUpdateFailed);
        assert_eq!(store.get_value("a"), Some(Value::from(1)));
    }
}
