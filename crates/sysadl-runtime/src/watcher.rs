use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use sysadl_core::{SysadlError, Value};
use sysadl_expr::{DependencyTracker, Evaluator, StateScope};

use crate::state::{StateStore, SubscriptionId};

pub type ConditionCallback = Box<dyn FnOnce(Value) + Send>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedCondition {
    pub id: String,
    pub expression: String,
    pub dependencies: Vec<String>,
    pub priority: i32,
    pub evaluations: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherStatistics {
    pub watched: usize,
    pub registered: u64,
    pub evaluations: u64,
    pub fired: u64,
    pub evaluation_errors: u64,
}

pub trait ConditionWatcher: Send + Sync {
    /// Calls `on_true` at most once, with the value the expression produced.
    /// Fires immediately when the condition already holds.
    fn watch_condition(
        &self,
        id: &str,
        expression: &str,
        on_true: ConditionCallback,
        options: WatchOptions,
    ) -> Result<(), SysadlError>;
    fn unwatch_condition(&self, id: &str) -> bool;
    fn state(&self) -> Value;
    fn list_conditions(&self) -> Vec<WatchedCondition>;
    fn dependencies(&self, expression: &str) -> Vec<String>;
    fn statistics(&self) -> WatcherStatistics;
}

struct WatchEntry {
    expression: String,
    dependencies: Vec<String>,
    subscriptions: Vec<SubscriptionId>,
    callback: Option<ConditionCallback>,
    priority: i32,
    evaluations: u64,
}

struct WatcherInner {
    store: Arc<dyn StateStore>,
    tracker: DependencyTracker,
    evaluator: Arc<Evaluator>,
    conditions: Mutex<BTreeMap<String, WatchEntry>>,
    stats: Mutex<WatcherStatistics>,
}

impl WatcherInner {
    fn evaluate(&self, expression: &str) -> Option<Value> {
        let snapshot = self.store.snapshot();
        let result = self
            .evaluator
            .evaluate(expression, &StateScope { state: &snapshot });
        let mut stats = self.stats.lock();
        stats.evaluations += 1;
        match result {
            Ok(value) if value.is_truthy() => Some(value),
            Ok(_) => None,
            Err(error) => {
                stats.evaluation_errors += 1;
                tracing::debug!(expression, %error, "condition evaluation failed");
                None
            }
        }
    }

    fn reevaluate(&self, id: &str) {
        let expression = {
            let mut conditions = self.conditions.lock();
            let Some(entry) = conditions.get_mut(id) else {
                return;
            };
            entry.evaluations += 1;
            entry.expression.clone()
        };

        let Some(value) = self.evaluate(&expression) else {
            return;
        };

        let Some(entry) = self.conditions.lock().remove(id) else {
            return;
        };
        for subscription in &entry.subscriptions {
            self.store.unsubscribe(*subscription);
        }
        let watched = self.conditions.lock().len();
        {
            let mut stats = self.stats.lock();
            stats.fired += 1;
            stats.watched = watched;
        }
        tracing::debug!(id, expression = %expression, "condition satisfied");
        if let Some(callback) = entry.callback {
            callback(value);
        }
    }
}

/// Condition watcher backed by a [`StateStore`]; re-evaluates on changes to
/// any dependency path and unregisters itself after firing.
pub struct ReactiveConditionWatcher {
    inner: Arc<WatcherInner>,
}

impl ReactiveConditionWatcher {
    pub fn new(store: Arc<dyn StateStore>, evaluator: Arc<Evaluator>) -> Self {
        Self {
            inner: Arc::new(WatcherInner {
                store,
                tracker: DependencyTracker::new(),
                evaluator,
                conditions: Mutex::new(BTreeMap::new()),
                stats: Mutex::new(WatcherStatistics::default()),
            }),
        }
    }

    pub fn tracker(&self) -> &DependencyTracker {
        &self.inner.tracker
    }

    pub fn clear(&self) {
        let ids = self.inner.conditions.lock().keys().cloned().collect::<Vec<_>>();
        for id in ids {
            self.unwatch_condition(&id);
        }
        self.inner.tracker.clear_cache();
    }
}

impl ConditionWatcher for ReactiveConditionWatcher {
    fn watch_condition(
        &self,
        id: &str,
        expression: &str,
        on_true: ConditionCallback,
        options: WatchOptions,
    ) -> Result<(), SysadlError> {
        self.inner.evaluator.compile(expression)?;
        self.unwatch_condition(id);
        self.inner.stats.lock().registered += 1;

        if let Some(value) = self.inner.evaluate(expression) {
            self.inner.stats.lock().fired += 1;
            on_true(value);
            return Ok(());
        }

        let dependencies = self.dependencies(expression);
        self.inner.conditions.lock().insert(
            id.to_string(),
            WatchEntry {
                expression: expression.to_string(),
                dependencies: dependencies.clone(),
                subscriptions: Vec::new(),
                callback: Some(on_true),
                priority: options.priority,
                evaluations: 1,
            },
        );

        let mut subscriptions = Vec::with_capacity(dependencies.len());
        for dependency in &dependencies {
            let weak: Weak<WatcherInner> = Arc::downgrade(&self.inner);
            let watch_id = id.to_string();
            subscriptions.push(self.inner.store.subscribe(
                dependency,
                Arc::new(move |_, _, _| {
                    if let Some(inner) = weak.upgrade() {
                        inner.reevaluate(&watch_id);
                    }
                }),
            ));
        }

        let orphaned = {
            let mut conditions = self.inner.conditions.lock();
            match conditions.get_mut(id) {
                Some(entry) => {
                    entry.subscriptions = subscriptions;
                    None
                }
                None => Some(subscriptions),
            }
        };
        if let Some(orphaned) = orphaned {
            for subscription in orphaned {
                self.inner.store.unsubscribe(subscription);
            }
            return Ok(());
        }

        let watched = self.inner.conditions.lock().len();
        self.inner.stats.lock().watched = watched;
        tracing::debug!(id, expression, ?dependencies, "condition watch registered");

        // Catch writes that landed between the first evaluation and subscribing.
        self.inner.reevaluate(id);
        Ok(())
    }

    fn unwatch_condition(&self, id: &str) -> bool {
        let Some(entry) = self.inner.conditions.lock().remove(id) else {
            return false;
        };
        for subscription in entry.subscriptions {
            self.inner.store.unsubscribe(subscription);
        }
        let watched = self.inner.conditions.lock().len();
        self.inner.stats.lock().watched = watched;
        true
    }

    fn state(&self) -> Value {
        self.inner.store.snapshot()
    }

    fn list_conditions(&self) -> Vec<WatchedCondition> {
        let mut conditions = self
            .inner
            .conditions
            .lock()
            .iter()
            .map(|(id, entry)| WatchedCondition {
                id: id.clone(),
                expression: entry.expression.clone(),
                dependencies: entry.dependencies.clone(),
                priority: entry.priority,
                evaluations: entry.evaluations,
            })
            .collect::<Vec<_>>();
        conditions.sort_by(|left, right| right.priority.cmp(&left.priority));
        conditions
    }

    fn dependencies(&self, expression: &str) -> Vec<String> {
        let mut paths = Vec::new();
        for dependency in self.inner.tracker.extract_dependencies(expression) {
            let path = store_path(&dependency).to_string();
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        paths
    }

    fn statistics(&self) -> WatcherStatistics {
        *self.inner.stats.lock()
    }
}

/// Expressions may address the root as `state`; the store never does.
fn store_path(dependency: &str) -> &str {
    match dependency.strip_prefix("state") {
        Some("") => "*",
        Some(rest) if rest.starts_with('.') => &rest[1..],
        _ => dependency,
    }
}
