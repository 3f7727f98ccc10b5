use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sysadl_core::{ErrorKind, ScenarioDefinition, SceneDefinition, SysadlError, Value};
use sysadl_expr::{DependencyTracker, Evaluator};
use sysadl_runtime::{
    ConditionWatcher, DeclarativeRule, EventDefinition, EventEmitter, EventRegistry, EventRule,
    ExecutionLogger, ExecutionOptions, ExecutionResult, ReactiveConditionWatcher,
    ReactiveStateManager, RuleEventInjector, ScenarioExecutor, ScenarioExecutorConfig,
    ScenarioExecutorOptions, SceneExecutor, SceneExecutorConfig, SceneExecutorOptions,
    SceneOutcome, StateStore,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    pub scenario: ScenarioExecutorConfig,
    pub scene: SceneExecutorConfig,
    pub random_seed: Option<u32>,
}

/// Declarative rule: when `trigger` holds, write `updates` then emit every
/// task as an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleSpec {
    pub trigger: String,
    pub tasks: Vec<String>,
    pub updates: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventDefinitionSpec {
    pub rules: Vec<RuleSpec>,
}

/// Everything a runtime needs, as loaded from JSON. `events` is keyed by
/// definition name, then event name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeBundle {
    pub config: Option<RuntimeConfig>,
    pub initial_state: Value,
    pub scenarios: Vec<ScenarioDefinition>,
    pub scenes: Vec<SceneDefinition>,
    pub events: BTreeMap<String, BTreeMap<String, EventDefinitionSpec>>,
}

impl RuntimeBundle {
    /// Folds `other` into this bundle. Definitions are appended, event maps and
    /// top-level state keys are overlaid, and a present `config` replaces ours.
    pub fn merge(&mut self, other: RuntimeBundle) {
        if other.config.is_some() {
            self.config = other.config;
        }
        match (&mut self.initial_state, other.initial_state) {
            (_, Value::Null) => {}
            (Value::Map(current), Value::Map(incoming)) => current.extend(incoming),
            (current, incoming) => *current = incoming,
        }
        self.scenarios.extend(other.scenarios);
        self.scenes.extend(other.scenes);
        for (definition_name, events) in other.events {
            self.events
                .entry(definition_name)
                .or_default()
                .extend(events);
        }
    }

    pub fn config_or_default(&self) -> RuntimeConfig {
        self.config.clone().unwrap_or_default()
    }
}

pub fn parse_bundle_json(source: &str) -> Result<RuntimeBundle, SysadlError> {
    serde_json::from_str(source).map_err(|error| {
        SysadlError::new(
            ErrorKind::InvalidDefinition,
            format!("Bundle JSON is invalid: {}", error),
        )
    })
}

/// State paths an expression reads, without building a runtime.
pub fn extract_dependencies(expression: &str) -> Vec<String> {
    DependencyTracker::new().extract_dependencies(expression)
}

pub fn validate_bundle(bundle: &RuntimeBundle) -> Result<(), SysadlError> {
    if !matches!(bundle.initial_state, Value::Null | Value::Map(_)) {
        return Err(invalid(format!(
            "initialState must be an object, got {}.",
            bundle.initial_state.type_name()
        )));
    }

    let mut seen = BTreeSet::new();
    for scenario in &bundle.scenarios {
        if scenario.name.trim().is_empty() {
            return Err(invalid("Scenario without a name."));
        }
        if !seen.insert(scenario.name.as_str()) {
            return Err(invalid(format!(
                "Scenario \"{}\" is defined more than once.",
                scenario.name
            )));
        }
    }

    let mut seen = BTreeSet::new();
    for scene in &bundle.scenes {
        if scene.name.trim().is_empty() {
            return Err(invalid("Scene without a name."));
        }
        if !seen.insert(scene.name.as_str()) {
            return Err(invalid(format!(
                "Scene \"{}\" is defined more than once.",
                scene.name
            )));
        }
        for (label, event) in [
            ("startEvent", &scene.start_event),
            ("finishEvent", &scene.finish_event),
        ] {
            if event.as_deref().is_some_and(|name| name.trim().is_empty()) {
                return Err(invalid(format!(
                    "Scene \"{}\" has an empty {}.",
                    scene.name, label
                )));
            }
        }
    }

    for (definition_name, events) in &bundle.events {
        if definition_name.trim().is_empty() {
            return Err(invalid("Event definition without a name."));
        }
        for (event_name, definition) in events {
            if event_name.trim().is_empty() {
                return Err(invalid(format!(
                    "Event definition \"{}\" has an event without a name.",
                    definition_name
                )));
            }
            if definition
                .rules
                .iter()
                .flat_map(|rule| rule.tasks.iter())
                .any(|task| task.trim().is_empty())
            {
                return Err(invalid(format!(
                    "Event \"{}.{}\" has an empty task name.",
                    definition_name, event_name
                )));
            }
        }
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> SysadlError {
    SysadlError::new(ErrorKind::InvalidDefinition, message)
}

fn build_registry(
    events: &BTreeMap<String, BTreeMap<String, EventDefinitionSpec>>,
    emitter: &EventEmitter,
) -> EventRegistry {
    let mut registry = EventRegistry::new();
    for (definition_name, definitions) in events {
        for (event_name, spec) in definitions {
            let rules = spec
                .rules
                .iter()
                .map(|rule| EventRule {
                    trigger: rule.trigger.clone(),
                    tasks: rule.tasks.clone(),
                    action: Arc::new(DeclarativeRule {
                        updates: rule.updates.clone(),
                        tasks: rule.tasks.clone(),
                        emitter: Some(emitter.clone()),
                    }),
                })
                .collect();
            registry.insert(
                definition_name.as_str(),
                event_name.as_str(),
                EventDefinition { rules },
            );
        }
    }
    registry
}

/// A state store, watcher, event plumbing and both executors, wired from one
/// bundle.
pub struct SysadlRuntime {
    config: RuntimeConfig,
    state: Arc<ReactiveStateManager>,
    watcher: Arc<ReactiveConditionWatcher>,
    emitter: EventEmitter,
    events: Arc<EventRegistry>,
    scenarios: ScenarioExecutor,
    scenes: SceneExecutor,
}

impl SysadlRuntime {
    pub fn from_bundle(
        bundle: RuntimeBundle,
        logger: Arc<dyn ExecutionLogger>,
    ) -> Result<Self, SysadlError> {
        validate_bundle(&bundle)?;
        let config = bundle.config_or_default();

        let evaluator = Arc::new(match config.random_seed {
            Some(seed) => Evaluator::with_seed(seed),
            None => Evaluator::new(),
        });
        let state = Arc::new(ReactiveStateManager::with_state(bundle.initial_state));
        let store: Arc<dyn StateStore> = state.clone();
        let watcher = Arc::new(ReactiveConditionWatcher::new(
            Arc::clone(&store),
            Arc::clone(&evaluator),
        ));
        let emitter = EventEmitter::new();
        let events = Arc::new(build_registry(&bundle.events, &emitter));
        let injector = Arc::new(RuleEventInjector::new(
            emitter.clone(),
            Arc::clone(&events),
            Arc::clone(&store),
            Arc::clone(&evaluator),
        ));

        let scenarios = ScenarioExecutor::new(ScenarioExecutorOptions {
            config: config.scenario.clone(),
            state: Arc::clone(&store),
            watcher: watcher.clone(),
            injector: injector.clone(),
            logger: Arc::clone(&logger),
            events: Arc::clone(&events),
            evaluator: Arc::clone(&evaluator),
        });
        for scenario in bundle.scenarios {
            scenarios.register_scenario(scenario);
        }

        let scenes = SceneExecutor::new(SceneExecutorOptions {
            config: config.scene.clone(),
            state: store,
            watcher: Some(watcher.clone()),
            injector,
            emitter: emitter.clone(),
            logger,
            events: Arc::clone(&events),
            evaluator,
        });
        for scene in bundle.scenes {
            let name = scene.name.clone();
            scenes.register_scene(&name, scene);
        }

        tracing::debug!(
            scenarios = scenarios.registered_scenarios().len(),
            scenes = scenes.registered_scenes().len(),
            "runtime assembled"
        );
        Ok(Self {
            config,
            state,
            watcher,
            emitter,
            events,
            scenarios,
            scenes,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn state(&self) -> &ReactiveStateManager {
        &self.state
    }

    pub fn watcher(&self) -> &ReactiveConditionWatcher {
        &self.watcher
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    pub fn events(&self) -> &EventRegistry {
        &self.events
    }

    pub fn scenario_executor(&self) -> &ScenarioExecutor {
        &self.scenarios
    }

    pub fn scene_executor(&self) -> &SceneExecutor {
        &self.scenes
    }

    pub async fn run_scenario(
        &self,
        name: &str,
        variables: BTreeMap<String, Value>,
        timeout: Option<u64>,
    ) -> Result<ExecutionResult, SysadlError> {
        self.scenarios
            .execute_registered(
                name,
                ExecutionOptions {
                    initial_variables: variables,
                    timeout,
                    ..ExecutionOptions::default()
                },
            )
            .await
    }

    pub async fn run_scene(
        &self,
        name: &str,
        context: BTreeMap<String, Value>,
    ) -> Result<SceneOutcome, SysadlError> {
        self.scenes.execute_scene(name, context).await
    }

    pub fn dependencies(&self, expression: &str) -> Vec<String> {
        self.watcher.dependencies(expression)
    }

    pub fn snapshot(&self) -> Value {
        self.state.snapshot()
    }
}
