use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sysadl_core::{ErrorKind, InjectionOptions, SysadlError, Value};
use sysadl_expr::{Evaluator, StateScope};
use tokio::sync::oneshot;

use crate::state::StateStore;

#[async_trait]
pub trait EventInjector: Send + Sync {
    async fn inject_event(
        &self,
        event_name: &str,
        parameters: BTreeMap<String, Value>,
        delay: Duration,
        options: InjectionOptions,
    ) -> Result<Value, SysadlError>;
}

type ListenerMap = HashMap<String, Vec<(u64, oneshot::Sender<Value>)>>;

/// Named-event bus with one-shot listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<Mutex<ListenerMap>>,
    next_listener: Arc<AtomicU64>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for the next `name` event. Dropping the returned
    /// handle removes the listener.
    pub fn once(&self, name: &str) -> OnceListener {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.listeners
            .lock()
            .entry(name.to_string())
            .or_default()
            .push((id, sender));
        OnceListener {
            emitter: self.clone(),
            name: name.to_string(),
            id,
            receiver: Some(receiver),
        }
    }

    /// Delivers `payload` to every pending listener of `name` and returns how
    /// many received it.
    pub fn emit(&self, name: &str, payload: Value) -> usize {
        let pending = self.listeners.lock().remove(name).unwrap_or_default();
        let mut delivered = 0usize;
        for (_, sender) in pending {
            if sender.send(payload.clone()).is_ok() {
                delivered += 1;
            }
        }
        tracing::debug!(event = name, delivered, "event emitted");
        delivered
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.lock().get(name).map(Vec::len).unwrap_or(0)
    }

    fn remove_listener(&self, name: &str, id: u64) {
        let mut listeners = self.listeners.lock();
        if let Some(entries) = listeners.get_mut(name) {
            entries.retain(|(listener_id, _)| *listener_id != id);
            if entries.is_empty() {
                listeners.remove(name);
            }
        }
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("events", &self.listeners.lock().len())
            .finish()
    }
}

pub struct OnceListener {
    emitter: EventEmitter,
    name: String,
    id: u64,
    receiver: Option<oneshot::Receiver<Value>>,
}

impl OnceListener {
    pub fn event_name(&self) -> &str {
        &self.name
    }

    /// Resolves with the emitted payload, or `None` when the listener was
    /// already consumed.
    pub async fn recv(&mut self) -> Option<Value> {
        let receiver = self.receiver.as_mut()?;
        let payload = receiver.await.ok();
        self.receiver = None;
        payload
    }
}

impl Drop for OnceListener {
    fn drop(&mut self) {
        self.emitter.remove_listener(&self.name, self.id);
    }
}

/// Injector that emits each event on an [`EventEmitter`] once its delay has
/// elapsed; the payload is the parameter map.
#[derive(Debug, Clone)]
pub struct EmitterEventInjector {
    emitter: EventEmitter,
}

impl EmitterEventInjector {
    pub fn new(emitter: EventEmitter) -> Self {
        Self { emitter }
    }
}

#[async_trait]
impl EventInjector for EmitterEventInjector {
    async fn inject_event(
        &self,
        event_name: &str,
        parameters: BTreeMap<String, Value>,
        delay: Duration,
        options: InjectionOptions,
    ) -> Result<Value, SysadlError> {
        if event_name.trim().is_empty() {
            return Err(SysadlError::new(
                ErrorKind::EventInjectionFailed,
                "Cannot inject an event without a name.",
            ));
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let delivered = self.emitter.emit(event_name, Value::Map(parameters));

        let mut result = BTreeMap::new();
        result.insert("event".to_string(), Value::from(event_name));
        result.insert("delivered".to_string(), Value::from(delivered as u64));
        if let Some(source) = options.source {
            result.insert("source".to_string(), Value::from(source));
        }
        Ok(Value::Map(result))
    }
}

/// Emits injected events and then runs the registered rules for that event
/// whose trigger holds against the current state. An empty trigger always
/// holds.
pub struct RuleEventInjector {
    emitter: EventEmitter,
    events: Arc<EventRegistry>,
    store: Arc<dyn StateStore>,
    evaluator: Arc<Evaluator>,
}

impl RuleEventInjector {
    pub fn new(
        emitter: EventEmitter,
        events: Arc<EventRegistry>,
        store: Arc<dyn StateStore>,
        evaluator: Arc<Evaluator>,
    ) -> Self {
        Self {
            emitter,
            events,
            store,
            evaluator,
        }
    }

    fn trigger_holds(&self, trigger: &str) -> bool {
        if trigger.trim().is_empty() {
            return true;
        }
        let snapshot = self.store.snapshot();
        match self
            .evaluator
            .evaluate_condition(trigger, &StateScope { state: &snapshot })
        {
            Ok(holds) => holds,
            Err(error) => {
                tracing::warn!(trigger, %error, "rule trigger evaluation failed");
                false
            }
        }
    }
}

#[async_trait]
impl EventInjector for RuleEventInjector {
    async fn inject_event(
        &self,
        event_name: &str,
        parameters: BTreeMap<String, Value>,
        delay: Duration,
        options: InjectionOptions,
    ) -> Result<Value, SysadlError> {
        let execution_id = options.execution_id.clone().unwrap_or_default();
        let emitted = EmitterEventInjector::new(self.emitter.clone())
            .inject_event(event_name, parameters.clone(), delay, options)
            .await?;

        let mut fired = Vec::new();
        for (definition_name, definition) in self.events.definitions_for_event(event_name) {
            for rule in &definition.rules {
                if !self.trigger_holds(&rule.trigger) {
                    continue;
                }
                let context = RuleContext {
                    execution_id: execution_id.clone(),
                    definition_name: definition_name.to_string(),
                    event_name: event_name.to_string(),
                    variables: parameters.clone(),
                    state: self.store.snapshot(),
                    store: Arc::clone(&self.store),
                };
                let result = rule.action.execute(&context).await.map_err(|error| {
                    SysadlError::new(
                        ErrorKind::EventInjectionFailed,
                        format!(
                            "Rule for event '{}.{}' failed: {}",
                            definition_name, event_name, error.message
                        ),
                    )
                })?;
                fired.push(result);
            }
        }

        let mut result = match emitted {
            Value::Map(entries) => entries,
            _ => BTreeMap::new(),
        };
        result.insert("rules".to_string(), Value::Array(fired));
        Ok(Value::Map(result))
    }
}

/// Context handed to rule actions.
pub struct RuleContext {
    pub execution_id: String,
    pub definition_name: String,
    pub event_name: String,
    pub variables: BTreeMap<String, Value>,
    pub state: Value,
    pub store: Arc<dyn StateStore>,
}

#[async_trait]
pub trait RuleAction: Send + Sync {
    async fn execute(&self, context: &RuleContext) -> Result<Value, SysadlError>;
}

/// Rule action described by data: state writes followed by task events.
pub struct DeclarativeRule {
    pub updates: BTreeMap<String, Value>,
    pub tasks: Vec<String>,
    pub emitter: Option<EventEmitter>,
}

#[async_trait]
impl RuleAction for DeclarativeRule {
    async fn execute(&self, context: &RuleContext) -> Result<Value, SysadlError> {
        for (path, value) in &self.updates {
            context.store.set_value(path, value.clone())?;
        }
        let mut emitted = Vec::new();
        if let Some(emitter) = &self.emitter {
            for task in &self.tasks {
                let mut payload = BTreeMap::new();
                payload.insert("executionId".to_string(), Value::from(context.execution_id.as_str()));
                payload.insert("event".to_string(), Value::from(context.event_name.as_str()));
                emitter.emit(task, Value::Map(payload));
                emitted.push(Value::from(task.as_str()));
            }
        }
        Ok(Value::Array(emitted))
    }
}

#[derive(Clone)]
pub struct EventRule {
    pub trigger: String,
    pub tasks: Vec<String>,
    pub action: Arc<dyn RuleAction>,
}

impl fmt::Debug for EventRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRule")
            .field("trigger", &self.trigger)
            .field("tasks", &self.tasks)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventDefinition {
    pub rules: Vec<EventRule>,
}

/// A rule located by task name, used by timeout diagnostics.
#[derive(Debug, Clone)]
pub struct RuleLocation<'a> {
    pub definition_name: &'a str,
    pub event_name: &'a str,
    pub rule: &'a EventRule,
}

/// `definition name -> event name -> definition`.
#[derive(Debug, Clone, Default)]
pub struct EventRegistry {
    definitions: BTreeMap<String, BTreeMap<String, EventDefinition>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        definition_name: impl Into<String>,
        event_name: impl Into<String>,
        definition: EventDefinition,
    ) {
        self.definitions
            .entry(definition_name.into())
            .or_default()
            .insert(event_name.into(), definition);
    }

    pub fn lookup(&self, definition_name: &str, event_name: &str) -> Option<&EventDefinition> {
        self.definitions.get(definition_name)?.get(event_name)
    }

    pub fn definitions_for_event<'a>(
        &'a self,
        event_name: &str,
    ) -> Vec<(&'a str, &'a EventDefinition)> {
        self.definitions
            .iter()
            .filter_map(|(definition_name, events)| {
                events
                    .get(event_name)
                    .map(|definition| (definition_name.as_str(), definition))
            })
            .collect()
    }

    pub fn rules_for_task<'a>(&'a self, task: &str) -> Vec<RuleLocation<'a>> {
        let mut found = Vec::new();
        for (definition_name, events) in &self.definitions {
            for (event_name, definition) in events {
                for rule in &definition.rules {
                    if rule.tasks.iter().any(|candidate| candidate == task) {
                        found.push(RuleLocation {
                            definition_name,
                            event_name,
                            rule,
                        });
                    }
                }
            }
        }
        found
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn clear(&mut self) {
        self.definitions.clear();
    }
}
