mod loops;
mod statement;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sysadl_core::{ErrorKind, ScenarioDefinition, SysadlError, Value};
use sysadl_expr::{Evaluator, LayeredScope};
use uuid::Uuid;

use crate::cancel::{CancelToken, Cancellation};
use crate::events::{EventInjector, EventRegistry};
use crate::logger::{now_ms, ExecutionLogEntry, ExecutionLogger};
use crate::state::StateStore;
use crate::watcher::ConditionWatcher;

pub const DEFAULT_SCENARIO_TIMEOUT_MS: u64 = 300_000;
pub const DEFAULT_CONDITION_WAIT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_LOOP_ITERATIONS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScenarioExecutorConfig {
    pub enable_parallel_execution: bool,
    pub max_concurrent_scenarios: usize,
    pub default_timeout: u64,
    pub enable_variables: bool,
    pub enable_loops: bool,
    pub enable_conditionals: bool,
    pub max_loop_iterations: u64,
    pub debug_mode: bool,
    pub enable_reactive_integration: bool,
    pub condition_wait_timeout: u64,
    pub max_call_depth: u32,
}

impl Default for ScenarioExecutorConfig {
    fn default() -> Self {
        Self {
            enable_parallel_execution: true,
            max_concurrent_scenarios: 5,
            default_timeout: DEFAULT_SCENARIO_TIMEOUT_MS,
            enable_variables: true,
            enable_loops: true,
            enable_conditionals: true,
            max_loop_iterations: DEFAULT_MAX_LOOP_ITERATIONS,
            debug_mode: false,
            enable_reactive_integration: true,
            condition_wait_timeout: DEFAULT_CONDITION_WAIT_TIMEOUT_MS,
            max_call_depth: 16,
        }
    }
}

impl ScenarioExecutorConfig {
    /// Admission limit for top-level executions.
    pub fn concurrency_limit(&self) -> usize {
        if self.enable_parallel_execution {
            self.max_concurrent_scenarios.max(1)
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    pub initial_variables: BTreeMap<String, Value>,
    pub timeout: Option<u64>,
    pub execution_mode: ExecutionMode,
    pub parent_execution_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlFlow {
    Break,
    Continue,
    Return,
}

/// What the scenario body produced: the control-flow signal that ended it, if
/// any, and its value. A body that runs to the end yields the value of its last
/// statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioOutput {
    pub control_flow: Option<ControlFlow>,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub execution_id: String,
    pub result: ScenarioOutput,
    pub duration_ms: u64,
    pub variables: BTreeMap<String, Value>,
    pub final_state: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveExecution {
    pub execution_id: String,
    pub scenario_name: String,
    pub status: ExecutionStatus,
    pub execution_mode: ExecutionMode,
    pub parent_execution_id: Option<String>,
    pub depth: u32,
    pub started_at_ms: u64,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioStatistics {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub stopped: u64,
    pub total_duration_ms: u64,
    pub average_duration_ms: f64,
    pub active: usize,
    pub peak_concurrent: usize,
    pub variable_assignments: u64,
    pub loop_iterations: u64,
    pub condition_evaluations: u64,
}

/// Internal control-flow signal returned by statement execution.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Flow {
    Normal(Value),
    Break,
    Continue,
    Return(Value),
}

struct ExecutionContext {
    active: ActiveExecution,
    cancellation: Cancellation,
}

/// Per-execution interpreter state. Owned by the running future, so the
/// variable scope disappears with it.
pub(crate) struct Frame {
    execution_id: String,
    scenario_name: String,
    depth: u32,
    started: Instant,
    timeout: Duration,
    variables: BTreeMap<String, Value>,
    cancel: CancelToken,
    trace: Vec<String>,
}

impl Frame {
    fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.started.elapsed())
    }

    fn timed_out(&self) -> bool {
        self.started.elapsed() >= self.timeout
    }
}

pub struct ScenarioExecutorOptions {
    pub config: ScenarioExecutorConfig,
    pub state: Arc<dyn StateStore>,
    pub watcher: Arc<dyn ConditionWatcher>,
    pub injector: Arc<dyn EventInjector>,
    pub logger: Arc<dyn ExecutionLogger>,
    pub events: Arc<EventRegistry>,
    pub evaluator: Arc<Evaluator>,
}

pub struct ScenarioExecutor {
    config: ScenarioExecutorConfig,
    state: Arc<dyn StateStore>,
    watcher: Arc<dyn ConditionWatcher>,
    injector: Arc<dyn EventInjector>,
    logger: Arc<dyn ExecutionLogger>,
    events: Arc<EventRegistry>,
    evaluator: Arc<Evaluator>,
    scenarios: RwLock<BTreeMap<String, Arc<ScenarioDefinition>>>,
    contexts: Mutex<BTreeMap<String, ExecutionContext>>,
    stats: Mutex<ScenarioStatistics>,
}

struct ExecutionGuard<'a> {
    executor: &'a ScenarioExecutor,
    execution_id: String,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        if self.executor.config.enable_reactive_integration {
            self.executor.release_variables(&self.execution_id);
        }
        let active = {
            let mut contexts = self.executor.contexts.lock();
            contexts.remove(&self.execution_id);
            contexts.len()
        };
        self.executor.stats.lock().active = active;
    }
}

impl ScenarioExecutor {
    pub fn new(options: ScenarioExecutorOptions) -> Self {
        Self {
            config: options.config,
            state: options.state,
            watcher: options.watcher,
            injector: options.injector,
            logger: options.logger,
            events: options.events,
            evaluator: options.evaluator,
            scenarios: RwLock::new(BTreeMap::new()),
            contexts: Mutex::new(BTreeMap::new()),
            stats: Mutex::new(ScenarioStatistics::default()),
        }
    }

    pub fn config(&self) -> &ScenarioExecutorConfig {
        &self.config
    }

    /// Makes `definition` callable from `ScenarioCall`. Re-registration
    /// replaces the previous definition.
    pub fn register_scenario(&self, definition: ScenarioDefinition) {
        tracing::debug!(scenario = %definition.name, "scenario registered");
        self.scenarios
            .write()
            .insert(definition.name.clone(), Arc::new(definition));
    }

    pub fn scenario(&self, name: &str) -> Option<Arc<ScenarioDefinition>> {
        self.scenarios.read().get(name).cloned()
    }

    pub fn registered_scenarios(&self) -> Vec<String> {
        self.scenarios.read().keys().cloned().collect()
    }

    pub async fn execute_scenario(
        &self,
        definition: &ScenarioDefinition,
        options: ExecutionOptions,
    ) -> Result<ExecutionResult, SysadlError> {
        self.run(definition, options, 0).await
    }

    pub async fn execute_registered(
        &self,
        name: &str,
        options: ExecutionOptions,
    ) -> Result<ExecutionResult, SysadlError> {
        let definition = self.scenario(name).ok_or_else(|| scenario_not_found(name))?;
        self.run(&definition, options, 0).await
    }

    pub fn list_active_executions(&self) -> Vec<ActiveExecution> {
        self.contexts
            .lock()
            .values()
            .map(|context| context.active.clone())
            .collect()
    }

    /// Marks every running execution stopped and signals its cancellation.
    /// Returns how many executions were signalled.
    pub fn stop_all_executions(&self) -> usize {
        let mut contexts = self.contexts.lock();
        for context in contexts.values_mut() {
            context.active.status = ExecutionStatus::Stopped;
            context.cancellation.cancel();
        }
        tracing::info!(count = contexts.len(), "stopping scenario executions");
        contexts.len()
    }

    pub fn statistics(&self) -> ScenarioStatistics {
        *self.stats.lock()
    }

    pub fn clear(&self) {
        self.stop_all_executions();
        self.scenarios.write().clear();
        self.evaluator.clear_cache();
        let active = self.contexts.lock().len();
        *self.stats.lock() = ScenarioStatistics {
            active,
            ..ScenarioStatistics::default()
        };
    }

    fn run<'a>(
        &'a self,
        definition: &'a ScenarioDefinition,
        options: ExecutionOptions,
        depth: u32,
    ) -> BoxFuture<'a, Result<ExecutionResult, SysadlError>> {
        async move {
            let execution_id = Uuid::new_v4().to_string();
            let timeout_ms = options.timeout.unwrap_or(self.config.default_timeout);
            let started_at_ms = now_ms();
            let cancellation = Cancellation::new();
            let cancel = cancellation.token();
            self.admit(
                ExecutionContext {
                    active: ActiveExecution {
                        execution_id: execution_id.clone(),
                        scenario_name: definition.name.clone(),
                        status: ExecutionStatus::Running,
                        execution_mode: options.execution_mode,
                        parent_execution_id: options.parent_execution_id.clone(),
                        depth,
                        started_at_ms,
                        timeout_ms,
                    },
                    cancellation,
                },
            )?;
            let guard = ExecutionGuard {
                executor: self,
                execution_id: execution_id.clone(),
            };

            let mut frame = Frame {
                execution_id: execution_id.clone(),
                scenario_name: definition.name.clone(),
                depth,
                started: Instant::now(),
                timeout: Duration::from_millis(timeout_ms),
                variables: options.initial_variables,
                cancel,
                trace: Vec::new(),
            };
            frame
                .variables
                .insert("__executionId".to_string(), Value::from(execution_id.as_str()));
            frame
                .variables
                .insert("__startTime".to_string(), Value::from(started_at_ms));
            tracing::debug!(
                scenario = %definition.name,
                execution_id = %execution_id,
                depth,
                parent = ?options.parent_execution_id,
                "scenario started"
            );

            let mut outcome = Ok(());
            if self.config.enable_reactive_integration {
                let names = frame.variables.keys().cloned().collect::<Vec<_>>();
                for name in names {
                    if let Err(error) = self.mirror_variable(&frame, &name) {
                        outcome = Err(error);
                        break;
                    }
                }
            }
            let outcome = match outcome {
                Ok(()) => self.execute_body(&definition.body, &mut frame).await,
                Err(error) => Err(error),
            };
            let duration_ms = frame.started.elapsed().as_millis() as u64;
            // Drop the scope before the final snapshot is taken.
            drop(guard);
            self.finish(definition, frame, outcome, duration_ms)
        }
        .boxed()
    }

    fn admit(&self, context: ExecutionContext) -> Result<(), SysadlError> {
        let mut contexts = self.contexts.lock();
        if context.active.depth == 0 {
            let limit = self.config.concurrency_limit();
            let running = contexts
                .values()
                .filter(|existing| existing.active.depth == 0)
                .count();
            if running >= limit {
                return Err(SysadlError::new(
                    ErrorKind::ConcurrencyLimitExceeded,
                    format!(
                        "Maximum concurrent scenarios ({}) reached; cannot start '{}'.",
                        limit, context.active.scenario_name
                    ),
                ));
            }
        }
        contexts.insert(context.active.execution_id.clone(), context);
        let active = contexts.len();
        drop(contexts);

        let mut stats = self.stats.lock();
        stats.total += 1;
        stats.active = active;
        stats.peak_concurrent = stats.peak_concurrent.max(active);
        Ok(())
    }

    fn finish(
        &self,
        definition: &ScenarioDefinition,
        frame: Frame,
        outcome: Result<Flow, SysadlError>,
        duration_ms: u64,
    ) -> Result<ExecutionResult, SysadlError> {
        let status = match &outcome {
            Ok(_) => ExecutionStatus::Completed,
            Err(error) if error.kind == ErrorKind::ExecutionStopped => ExecutionStatus::Stopped,
            Err(_) => ExecutionStatus::Failed,
        };
        {
            let mut stats = self.stats.lock();
            match status {
                ExecutionStatus::Completed => stats.completed += 1,
                ExecutionStatus::Stopped => stats.stopped += 1,
                _ => stats.failed += 1,
            }
            stats.total_duration_ms += duration_ms;
            let finished = stats.completed + stats.failed + stats.stopped;
            stats.average_duration_ms = stats.total_duration_ms as f64 / finished as f64;
        }

        let mut entry = ExecutionLogEntry::new(
            match status {
                ExecutionStatus::Completed => "scenario.completed",
                ExecutionStatus::Stopped => "scenario.stopped",
                _ => "scenario.failed",
            },
            definition.name.as_str(),
            &frame.execution_id,
        )
        .meta("durationMs", duration_ms)
        .meta("depth", frame.depth as u64);
        entry.trace = frame.trace;

        match outcome {
            Ok(flow) => {
                let result = match flow {
                    Flow::Normal(value) => ScenarioOutput {
                        control_flow: None,
                        value,
                    },
                    Flow::Break => ScenarioOutput {
                        control_flow: Some(ControlFlow::Break),
                        value: Value::Null,
                    },
                    Flow::Continue => ScenarioOutput {
                        control_flow: Some(ControlFlow::Continue),
                        value: Value::Null,
                    },
                    Flow::Return(value) => ScenarioOutput {
                        control_flow: Some(ControlFlow::Return),
                        value,
                    },
                };
                self.logger
                    .log_execution(entry.result(result.value.clone()));
                tracing::debug!(
                    scenario = %definition.name,
                    execution_id = %frame.execution_id,
                    duration_ms,
                    "scenario completed"
                );
                Ok(ExecutionResult {
                    success: true,
                    execution_id: frame.execution_id,
                    result,
                    duration_ms,
                    variables: frame.variables,
                    final_state: self.state.snapshot(),
                })
            }
            Err(error) => {
                self.logger.log_execution(
                    entry
                        .result(false)
                        .meta("errorCode", error.code())
                        .meta("error", error.message.as_str()),
                );
                tracing::warn!(
                    scenario = %definition.name,
                    execution_id = %frame.execution_id,
                    duration_ms,
                    %error,
                    "scenario failed"
                );
                Err(error)
            }
        }
    }

    fn mirror_variable(&self, frame: &Frame, name: &str) -> Result<(), SysadlError> {
        let Some(value) = frame.variables.get(name) else {
            return Ok(());
        };
        self.state.set_value(
            &format!("executions.{}.variables.{}", frame.execution_id, name),
            value.clone(),
        )
    }

    fn release_variables(&self, execution_id: &str) {
        self.state
            .remove_value(&format!("executions.{}", execution_id));
    }

    fn evaluate(&self, source: &str, frame: &Frame) -> Result<Value, SysadlError> {
        let snapshot = self.state.snapshot();
        self.evaluator.evaluate(
            source,
            &LayeredScope {
                variables: &frame.variables,
                state: &snapshot,
            },
        )
    }

    fn evaluate_condition(&self, source: &str, frame: &Frame) -> Result<bool, SysadlError> {
        self.stats.lock().condition_evaluations += 1;
        self.evaluate(source, frame).map(|value| value.is_truthy())
    }

    /// Awaits `future` unless the execution is cancelled or runs out of time
    /// first.
    async fn suspend<F>(&self, frame: &Frame, future: F) -> Result<F::Output, SysadlError>
    where
        F: Future + Send,
    {
        let cancel = frame.cancel.clone();
        tokio::select! {
            output = future => Ok(output),
            () = cancel.cancelled() => Err(stopped(frame)),
            () = tokio::time::sleep(frame.remaining()) => Err(timed_out(frame)),
        }
    }
}

fn scenario_not_found(name: &str) -> SysadlError {
    SysadlError::new(
        ErrorKind::ScenarioNotFound,
        format!("Scenario '{}' not found.", name),
    )
}

fn stopped(frame: &Frame) -> SysadlError {
    SysadlError::new(
        ErrorKind::ExecutionStopped,
        format!(
            "Execution {} of scenario '{}' was stopped.",
            frame.execution_id, frame.scenario_name
        ),
    )
}

fn timed_out(frame: &Frame) -> SysadlError {
    SysadlError::new(
        ErrorKind::ScenarioExecutionTimeout,
        format!(
            "Scenario '{}' exceeded its timeout of {}ms.",
            frame.scenario_name,
            frame.timeout.as_millis()
        ),
    )
}
