use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sysadl_core::{
    Condition, ConditionContext, ConditionPredicate, ErrorKind, SceneDefinition, SceneValidator,
    ValidatorHandle, Value,
};
use sysadl_expr::Evaluator;

use super::*;
use crate::events::{
    DeclarativeRule, EmitterEventInjector, EventDefinition, EventEmitter, EventInjector,
    EventRegistry, EventRule, RuleEventInjector,
};
use crate::logger::MemoryLogger;
use crate::state::{ReactiveStateManager, StateStore};
use crate::watcher::{ConditionWatcher, ReactiveConditionWatcher};

struct Harness {
    executor: SceneExecutor,
    store: Arc<ReactiveStateManager>,
    emitter: EventEmitter,
    logger: MemoryLogger,
}

fn harness_with(config: SceneExecutorConfig, events: EventRegistry, rule_driven: bool) -> Harness {
    build(config, events, rule_driven, EventEmitter::new())
}

fn build(
    config: SceneExecutorConfig,
    events: EventRegistry,
    rule_driven: bool,
    emitter: EventEmitter,
) -> Harness {
    let store = Arc::new(ReactiveStateManager::new());
    let evaluator = Arc::new(Evaluator::with_seed(11));
    let events = Arc::new(events);
    let watcher = Arc::new(ReactiveConditionWatcher::new(
        Arc::clone(&store) as Arc<dyn StateStore>,
        Arc::clone(&evaluator),
    ));
    let injector: Arc<dyn EventInjector> = if rule_driven {
        Arc::new(RuleEventInjector::new(
            emitter.clone(),
            Arc::clone(&events),
            Arc::clone(&store) as Arc<dyn StateStore>,
            Arc::clone(&evaluator),
        ))
    } else {
        Arc::new(EmitterEventInjector::new(emitter.clone()))
    };
    let logger = MemoryLogger::new();
    let executor = SceneExecutor::new(SceneExecutorOptions {
        config,
        state: Arc::clone(&store) as Arc<dyn StateStore>,
        watcher: Some(watcher as Arc<dyn ConditionWatcher>),
        injector,
        emitter: emitter.clone(),
        logger: Arc::new(logger.clone()),
        events,
        evaluator,
    });
    Harness {
        executor,
        store,
        emitter,
        logger,
    }
}

fn fast_config() -> SceneExecutorConfig {
    SceneExecutorConfig {
        retry_delay: 1,
        ..SceneExecutorConfig::default()
    }
}

fn harness() -> Harness {
    harness_with(fast_config(), EventRegistry::new(), false)
}

fn scene(name: &str) -> SceneDefinition {
    SceneDefinition {
        name: name.to_string(),
        ..SceneDefinition::default()
    }
}

fn emitting_rule(trigger: &str, task: &str, emitter: Option<EventEmitter>) -> EventRule {
    EventRule {
        trigger: trigger.to_string(),
        tasks: vec![task.to_string()],
        action: Arc::new(DeclarativeRule {
            updates: BTreeMap::new(),
            tasks: vec![task.to_string()],
            emitter,
        }),
    }
}

#[tokio::test]
async fn unregistered_scene_is_not_found() {
    let harness = harness();
    let error = harness
        .executor
        .execute_scene("Ghost", BTreeMap::new())
        .await
        .expect_err("scene should be missing");
    assert_eq!(error.kind, ErrorKind::SceneNotFound);
    assert!(error.message.contains("Scene not found"));
    assert_eq!(harness.executor.statistics().attempts, 0);
}

#[tokio::test]
async fn scene_without_finish_event_completes_after_start_event() {
    let harness = harness();
    harness.executor.register_scene(
        "Boot",
        SceneDefinition {
            start_event: Some("PowerOn".to_string()),
            ..scene("Boot")
        },
    );
    let outcome = harness
        .executor
        .execute_scene("Boot", BTreeMap::from([("speed".to_string(), Value::from(3))]))
        .await
        .expect("scene should pass");
    assert!(outcome.success);
    assert_eq!(outcome.retry_count, 0);
    assert_eq!(
        outcome
            .start_event_result
            .as_ref()
            .and_then(|result| result.get_path("event")),
        Some(&Value::from("PowerOn"))
    );
    assert_eq!(outcome.context.get("speed"), Some(&Value::from(3)));
    assert!(harness.executor.list_active_executions().is_empty());
    assert_eq!(harness.executor.statistics().successful, 1);
}

#[tokio::test]
async fn failing_pre_conditions_are_retried_until_exhausted() {
    let harness = harness();
    harness.executor.register_scene(
        "Drive",
        SceneDefinition {
            pre_conditions: vec![Condition::Expression("engine.ready == true".to_string())],
            max_retries: Some(2),
            ..scene("Drive")
        },
    );
    let error = harness
        .executor
        .execute_scene("Drive", BTreeMap::new())
        .await
        .expect_err("pre-conditions should fail");
    assert_eq!(error.kind, ErrorKind::PreConditionFailed);

    let stats = harness.executor.statistics();
    assert_eq!(stats.attempts, 3);
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.failed, 1);
    let checks = harness
        .logger
        .entries()
        .into_iter()
        .filter(|entry| entry.what == "scene.preConditions")
        .count();
    assert_eq!(checks, 3);
    assert_eq!(harness.logger.flush_count(), 3);
}

#[tokio::test]
async fn finish_event_emitted_by_start_event_rule_is_not_lost() {
    let emitter = EventEmitter::new();
    let mut events = EventRegistry::new();
    events.insert(
        "Vehicle",
        "Go",
        EventDefinition {
            rules: vec![emitting_rule("", "Arrived", Some(emitter.clone()))],
        },
    );
    let harness = build(fast_config(), events, true, emitter);
    harness.executor.register_scene(
        "Trip",
        SceneDefinition {
            start_event: Some("Go".to_string()),
            finish_event: Some("Arrived".to_string()),
            timeout: Some(1000),
            ..scene("Trip")
        },
    );
    let outcome = harness
        .executor
        .execute_scene("Trip", BTreeMap::new())
        .await
        .expect("scene should complete");
    assert!(outcome.success);
    assert!(outcome.start_event_result.is_some());
    assert_eq!(harness.emitter.listener_count("Arrived"), 0);
}

#[tokio::test]
async fn finish_event_emitted_later_completes_scene() {
    let harness = harness();
    harness.executor.register_scene(
        "Park",
        SceneDefinition {
            finish_event: Some("Parked".to_string()),
            post_conditions: vec![Condition::Expression("brake.on".to_string())],
            timeout: Some(1000),
            ..scene("Park")
        },
    );
    let store = Arc::clone(&harness.store);
    let emitter = harness.emitter.clone();
    let (outcome, ()) = tokio::join!(
        harness.executor.execute_scene("Park", BTreeMap::new()),
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            store.set_value("brake.on", Value::from(true)).expect("set");
            emitter.emit("Parked", Value::Null);
        }
    );
    let outcome = outcome.expect("scene should complete");
    assert!(outcome.start_event_result.is_none());
}

#[tokio::test]
async fn missing_finish_event_times_out_with_diagnostics() {
    let mut events = EventRegistry::new();
    events.insert(
        "Vehicle",
        "Dock",
        EventDefinition {
            rules: vec![emitting_rule("dock.aligned == true", "Docked", None)],
        },
    );
    let harness = harness_with(fast_config(), events, false);
    harness.executor.register_scene(
        "Dock",
        SceneDefinition {
            finish_event: Some("Docked".to_string()),
            timeout: Some(20),
            ..scene("Dock")
        },
    );
    let error = harness
        .executor
        .execute_scene("Dock", BTreeMap::new())
        .await
        .expect_err("scene should time out");
    assert_eq!(error.kind, ErrorKind::SceneTimeout);
    assert_eq!(
        error.message,
        "Scene timeout: finish event 'Docked' not received within 20ms"
    );
    assert_eq!(harness.emitter.listener_count("Docked"), 0);
    let entries = harness.logger.entries();
    let diagnostics = entries
        .iter()
        .find(|entry| entry.what == "scene.timeoutDiagnostics")
        .expect("diagnostics should be logged");
    let failed = entries
        .iter()
        .find(|entry| entry.what == "scene.failed")
        .expect("failure should be logged");
    assert!(!diagnostics.execution_id.is_empty());
    assert_eq!(diagnostics.execution_id, failed.execution_id);
}

#[test]
fn analyze_dependencies_reports_trigger_values() {
    let mut events = EventRegistry::new();
    events.insert(
        "Vehicle",
        "Dock",
        EventDefinition {
            rules: vec![emitting_rule(
                "dock.aligned == true && dock.speed < 2",
                "Docked",
                None,
            )],
        },
    );
    let harness = harness_with(fast_config(), events, false);
    harness
        .store
        .set_value("dock.speed", Value::from(1))
        .expect("set");

    let report = harness.executor.analyze_dependencies("Dock", "Docked");
    assert_eq!(report.rules.len(), 1);
    let rule = &report.rules[0];
    assert_eq!(rule.definition_name, "Vehicle");
    assert_eq!(rule.event_name, "Dock");
    let paths = rule
        .dependencies
        .iter()
        .map(|dependency| (dependency.path.as_str(), dependency.present))
        .collect::<Vec<_>>();
    assert_eq!(paths, vec![("dock.aligned", false), ("dock.speed", true)]);
    assert!(report
        .suggestions
        .iter()
        .any(|suggestion| suggestion.contains("dock.aligned")));

    let empty = harness.executor.analyze_dependencies("Dock", "Unknown");
    assert!(empty.rules.is_empty());
    assert_eq!(empty.suggestions.len(), 1);
}

#[test]
fn analyze_dependencies_reads_state_prefixed_paths() {
    let mut events = EventRegistry::new();
    events.insert(
        "Vehicle",
        "Dock",
        EventDefinition {
            rules: vec![emitting_rule("state.dock.aligned == true", "Docked", None)],
        },
    );
    let harness = harness_with(fast_config(), events, false);
    harness
        .store
        .set_value("dock.aligned", Value::from(false))
        .expect("set");

    let report = harness.executor.analyze_dependencies("Dock", "Docked");
    let dependency = &report.rules[0].dependencies[0];
    assert_eq!(dependency.path, "dock.aligned");
    assert!(dependency.present);
    assert_eq!(dependency.value, Value::Bool(false));
}

struct Gate {
    open: bool,
}

impl SceneValidator for Gate {
    fn validate_pre_conditions(&self, _context: &ConditionContext<'_>) -> bool {
        self.open
    }
}

#[tokio::test]
async fn validator_replaces_condition_list() {
    let harness = harness();
    harness.executor.register_scene(
        "Gated",
        SceneDefinition {
            pre_conditions: vec![Condition::Expression("true".to_string())],
            validator: Some(ValidatorHandle(Arc::new(Gate { open: false }))),
            ..scene("Gated")
        },
    );
    let error = harness
        .executor
        .execute_scene("Gated", BTreeMap::new())
        .await
        .expect_err("validator should reject");
    assert_eq!(error.kind, ErrorKind::PreConditionFailed);
}

#[tokio::test]
async fn post_conditions_and_predicates_are_checked() {
    let harness = harness();
    harness.executor.register_scene(
        "Check",
        SceneDefinition {
            pre_conditions: vec![Condition::Predicate(ConditionPredicate::new(|context| {
                context.variables.get("mode") == Some(&Value::from("auto"))
            }))],
            post_conditions: vec![Condition::Described {
                expression: "lights.on".to_string(),
                description: Some("lights switched on".to_string()),
            }],
            ..scene("Check")
        },
    );
    let error = harness
        .executor
        .execute_scene(
            "Check",
            BTreeMap::from([("mode".to_string(), Value::from("auto"))]),
        )
        .await
        .expect_err("post-condition should fail");
    assert_eq!(error.kind, ErrorKind::PostConditionFailed);
    assert!(error.message.contains("lights switched on"));

    harness
        .store
        .set_value("lights.on", Value::from(true))
        .expect("set");
    harness
        .executor
        .execute_scene(
            "Check",
            BTreeMap::from([("mode".to_string(), Value::from("auto"))]),
        )
        .await
        .expect("scene should pass");
}

#[tokio::test]
async fn empty_condition_is_invalid() {
    let harness = harness();
    harness.executor.register_scene(
        "Blank",
        SceneDefinition {
            pre_conditions: vec![Condition::Expression("  ".to_string())],
            ..scene("Blank")
        },
    );
    let error = harness
        .executor
        .execute_scene("Blank", BTreeMap::new())
        .await
        .expect_err("blank condition");
    assert_eq!(error.kind, ErrorKind::InvalidConditionFormat);
}

#[tokio::test]
async fn concurrency_limit_is_not_retried() {
    let harness = harness_with(
        SceneExecutorConfig {
            max_concurrent_scenes: 1,
            default_max_retries: 3,
            ..fast_config()
        },
        EventRegistry::new(),
        false,
    );
    harness.executor.register_scene(
        "Hold",
        SceneDefinition {
            finish_event: Some("Release".to_string()),
            timeout: Some(50),
            max_retries: Some(0),
            ..scene("Hold")
        },
    );
    harness.executor.register_scene("Other", scene("Other"));
    let emitter = harness.emitter.clone();
    let (held, other, ()) = tokio::join!(
        harness.executor.execute_scene("Hold", BTreeMap::new()),
        harness.executor.execute_scene("Other", BTreeMap::new()),
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            emitter.emit("Release", Value::Null);
        }
    );
    assert!(held.is_ok());
    assert_eq!(
        other.expect_err("second scene should be rejected").kind,
        ErrorKind::ConcurrencyLimitExceeded
    );
    assert_eq!(harness.executor.statistics().retries, 0);
}

#[tokio::test]
async fn stop_all_scenes_cancels_waiting_attempt() {
    let harness = harness();
    harness.executor.register_scene(
        "Wait",
        SceneDefinition {
            finish_event: Some("Never".to_string()),
            timeout: Some(10_000),
            max_retries: Some(5),
            ..scene("Wait")
        },
    );
    let executor = &harness.executor;
    let (result, stopped) = tokio::join!(executor.execute_scene("Wait", BTreeMap::new()), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        executor.stop_all_scenes()
    });
    assert_eq!(stopped, 1);
    assert_eq!(
        result.expect_err("should stop").kind,
        ErrorKind::ExecutionStopped
    );
    let stats = executor.statistics();
    assert_eq!(stats.stopped, 1);
    assert_eq!(stats.attempts, 1);
}

#[tokio::test]
async fn stop_all_scenes_interrupts_retry_delay() {
    let harness = harness_with(
        SceneExecutorConfig {
            retry_delay: 100,
            ..SceneExecutorConfig::default()
        },
        EventRegistry::new(),
        false,
    );
    harness.executor.register_scene(
        "Blocked",
        SceneDefinition {
            pre_conditions: vec![Condition::Expression("false".to_string())],
            max_retries: Some(3),
            ..scene("Blocked")
        },
    );
    let executor = &harness.executor;
    let (result, stopped) = tokio::join!(executor.execute_scene("Blocked", BTreeMap::new()), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        executor.stop_all_scenes()
    });
    assert_eq!(stopped, 1);
    assert_eq!(
        result.expect_err("should stop").kind,
        ErrorKind::ExecutionStopped
    );
    let stats = executor.statistics();
    assert_eq!(stats.attempts, 1);
    assert_eq!(stats.retries, 0);
    assert_eq!(stats.stopped, 1);

    let entries = harness.logger.entries();
    let attempt_id = entries
        .iter()
        .find(|entry| entry.what == "scene.preConditions")
        .map(|entry| entry.execution_id.clone())
        .expect("pre-condition should be logged");
    let failed = entries
        .iter()
        .find(|entry| entry.what == "scene.failed")
        .expect("failure should be logged");
    assert_eq!(failed.execution_id, attempt_id);
}

#[test]
fn register_scene_resolves_defaults() {
    let harness = harness_with(
        SceneExecutorConfig {
            default_timeout: 1234,
            default_max_retries: 4,
            ..SceneExecutorConfig::default()
        },
        EventRegistry::new(),
        false,
    );
    let record = harness.executor.register_scene("Plain", SceneDefinition::default());
    assert_eq!(record.timeout_ms, 1234);
    assert_eq!(record.max_retries, 4);
    assert_eq!(record.definition.name, "Plain");
    assert_eq!(harness.executor.registered_scenes(), vec!["Plain"]);
}
