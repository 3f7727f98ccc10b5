mod diagnostics;
mod phases;
#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sysadl_core::{ErrorKind, SceneDefinition, SysadlError, Value};
use sysadl_expr::Evaluator;
use uuid::Uuid;

use crate::cancel::{CancelToken, Cancellation};
use crate::events::{EventEmitter, EventInjector, EventRegistry};
use crate::logger::{now_ms, ExecutionLogEntry, ExecutionLogger};
use crate::state::StateStore;
use crate::watcher::ConditionWatcher;

pub use diagnostics::{DependencyReport, DependencyValue, RuleDiagnostic};

pub const DEFAULT_SCENE_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SceneExecutorConfig {
    pub max_concurrent_scenes: usize,
    pub default_timeout: u64,
    pub retry_delay: u64,
    pub default_max_retries: u32,
}

impl Default for SceneExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_scenes: 10,
            default_timeout: DEFAULT_SCENE_TIMEOUT_MS,
            retry_delay: 1000,
            default_max_retries: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneRecord {
    pub definition: SceneDefinition,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub registered_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneStatus {
    Started,
    Completed,
    Failed,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenePhase {
    Initialization,
    PreConditions,
    StartEvent,
    WaitingFinish,
    PostConditions,
}

/// Snapshot of one scene attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneExecution {
    pub scene_id: String,
    pub scene_name: String,
    pub started_at_ms: u64,
    pub status: SceneStatus,
    pub phase: ScenePhase,
    pub retry_count: u32,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub start_event_result: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneOutcome {
    pub success: bool,
    pub scene_id: String,
    pub duration_ms: u64,
    pub context: BTreeMap<String, Value>,
    pub retry_count: u32,
    pub start_event_result: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneStatistics {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub stopped: u64,
    pub attempts: u64,
    pub retries: u64,
    pub total_duration_ms: u64,
    pub average_duration_ms: f64,
    pub success_rate: f64,
}

struct ActiveScene {
    execution: SceneExecution,
    cancellation: Cancellation,
}

pub struct SceneExecutorOptions {
    pub config: SceneExecutorConfig,
    pub state: Arc<dyn StateStore>,
    pub watcher: Option<Arc<dyn ConditionWatcher>>,
    pub injector: Arc<dyn EventInjector>,
    pub emitter: EventEmitter,
    pub logger: Arc<dyn ExecutionLogger>,
    pub events: Arc<EventRegistry>,
    pub evaluator: Arc<Evaluator>,
}

pub struct SceneExecutor {
    config: SceneExecutorConfig,
    state: Arc<dyn StateStore>,
    watcher: Option<Arc<dyn ConditionWatcher>>,
    injector: Arc<dyn EventInjector>,
    emitter: EventEmitter,
    logger: Arc<dyn ExecutionLogger>,
    events: Arc<EventRegistry>,
    evaluator: Arc<Evaluator>,
    scenes: RwLock<BTreeMap<String, Arc<SceneRecord>>>,
    active: Mutex<BTreeMap<String, ActiveScene>>,
    retry_waits: Mutex<BTreeMap<String, Cancellation>>,
    stats: Mutex<SceneStatistics>,
}

struct AttemptGuard<'a> {
    executor: &'a SceneExecutor,
    scene_id: String,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.executor.active.lock().remove(&self.scene_id);
    }
}

struct RetryWaitGuard<'a> {
    executor: &'a SceneExecutor,
    wait_id: String,
}

impl Drop for RetryWaitGuard<'_> {
    fn drop(&mut self) {
        self.executor.retry_waits.lock().remove(&self.wait_id);
    }
}

impl SceneExecutor {
    pub fn new(options: SceneExecutorOptions) -> Self {
        Self {
            config: options.config,
            state: options.state,
            watcher: options.watcher,
            injector: options.injector,
            emitter: options.emitter,
            logger: options.logger,
            events: options.events,
            evaluator: options.evaluator,
            scenes: RwLock::new(BTreeMap::new()),
            active: Mutex::new(BTreeMap::new()),
            retry_waits: Mutex::new(BTreeMap::new()),
            stats: Mutex::new(SceneStatistics::default()),
        }
    }

    pub fn config(&self) -> &SceneExecutorConfig {
        &self.config
    }

    pub fn register_scene(&self, name: &str, mut definition: SceneDefinition) -> SceneRecord {
        if definition.name.is_empty() {
            definition.name = name.to_string();
        }
        let record = SceneRecord {
            timeout_ms: definition.timeout.unwrap_or(self.config.default_timeout),
            max_retries: definition
                .max_retries
                .unwrap_or(self.config.default_max_retries),
            registered_at_ms: now_ms(),
            definition,
        };
        tracing::debug!(
            scene = name,
            timeout_ms = record.timeout_ms,
            max_retries = record.max_retries,
            "scene registered"
        );
        self.scenes
            .write()
            .insert(name.to_string(), Arc::new(record.clone()));
        record
    }

    pub fn registered_scenes(&self) -> Vec<String> {
        self.scenes.read().keys().cloned().collect()
    }

    pub fn scene(&self, name: &str) -> Option<Arc<SceneRecord>> {
        self.scenes.read().get(name).cloned()
    }

    /// Runs the scene, retrying failed attempts while retries remain.
    pub async fn execute_scene(
        &self,
        name: &str,
        context: BTreeMap<String, Value>,
    ) -> Result<SceneOutcome, SysadlError> {
        let record = self.scene(name).ok_or_else(|| {
            SysadlError::new(
                ErrorKind::SceneNotFound,
                format!("Scene not found: '{}'.", name),
            )
        })?;
        let mut variables = record.definition.parameters.clone();
        variables.extend(context);

        self.stats.lock().total += 1;
        let started = Instant::now();
        let mut retry_count = 0u32;
        loop {
            let scene_id = Uuid::new_v4().to_string();
            match self
                .run_attempt(&scene_id, name, &record, &variables, retry_count)
                .await
            {
                Ok(start_event_result) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    self.record_finish(SceneStatus::Completed, duration_ms);
                    self.logger.log_execution(
                        ExecutionLogEntry::new("scene.completed", name, &scene_id)
                            .result(true)
                            .meta("durationMs", duration_ms)
                            .meta("retryCount", u64::from(retry_count)),
                    );
                    tracing::info!(scene = name, scene_id = %scene_id, duration_ms, "scene completed");
                    return Ok(SceneOutcome {
                        success: true,
                        scene_id,
                        duration_ms,
                        context: variables,
                        retry_count,
                        start_event_result,
                    });
                }
                Err(mut error) => {
                    let retryable = !matches!(
                        error.kind,
                        ErrorKind::ConcurrencyLimitExceeded
                            | ErrorKind::ExecutionStopped
                            | ErrorKind::SceneNotFound
                    );
                    if retryable && retry_count < record.max_retries {
                        tracing::warn!(
                            scene = name,
                            scene_id = %scene_id,
                            retry_count = retry_count + 1,
                            max_retries = record.max_retries,
                            %error,
                            "scene attempt failed; retrying"
                        );
                        match self.wait_before_retry(name).await {
                            Ok(()) => {
                                retry_count += 1;
                                self.stats.lock().retries += 1;
                                continue;
                            }
                            Err(stopped) => error = stopped,
                        }
                    }

                    let duration_ms = started.elapsed().as_millis() as u64;
                    let status = if error.kind == ErrorKind::ExecutionStopped {
                        SceneStatus::Stopped
                    } else {
                        SceneStatus::Failed
                    };
                    self.record_finish(status, duration_ms);
                    self.logger.log_execution(
                        ExecutionLogEntry::new("scene.failed", name, &scene_id)
                            .result(false)
                            .meta("durationMs", duration_ms)
                            .meta("retryCount", u64::from(retry_count))
                            .meta("errorCode", error.code())
                            .meta("error", error.message.as_str()),
                    );
                    tracing::warn!(scene = name, scene_id = %scene_id, retry_count, %error, "scene failed");
                    return Err(error);
                }
            }
        }
    }

    pub fn list_active_executions(&self) -> Vec<SceneExecution> {
        self.active
            .lock()
            .values()
            .map(|active| active.execution.clone())
            .collect()
    }

    /// Marks every in-flight attempt stopped and cancels its pending await.
    /// Scenes sleeping between attempts are stopped too. Returns how many
    /// attempts and retry waits were signalled.
    pub fn stop_all_scenes(&self) -> usize {
        let mut active = self.active.lock();
        for scene in active.values_mut() {
            scene.execution.status = SceneStatus::Stopped;
            scene.cancellation.cancel();
        }
        let retry_waits = self.retry_waits.lock();
        for cancellation in retry_waits.values() {
            cancellation.cancel();
        }
        let count = active.len() + retry_waits.len();
        tracing::info!(
            attempts = active.len(),
            retry_waits = retry_waits.len(),
            "stopping scenes"
        );
        count
    }

    pub fn statistics(&self) -> SceneStatistics {
        *self.stats.lock()
    }

    pub fn clear(&self) {
        self.stop_all_scenes();
        self.scenes.write().clear();
        *self.stats.lock() = SceneStatistics::default();
    }

    async fn wait_before_retry(&self, name: &str) -> Result<(), SysadlError> {
        let wait_id = Uuid::new_v4().to_string();
        let cancellation = Cancellation::new();
        let token = cancellation.token();
        self.retry_waits.lock().insert(wait_id.clone(), cancellation);
        let _guard = RetryWaitGuard {
            executor: self,
            wait_id,
        };
        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(self.config.retry_delay)) => Ok(()),
            () = token.cancelled() => Err(SysadlError::new(
                ErrorKind::ExecutionStopped,
                format!("Scene '{}' was stopped while waiting to retry.", name),
            )),
        }
    }

    fn admit(
        &self,
        scene_id: &str,
        name: &str,
        retry_count: u32,
    ) -> Result<CancelToken, SysadlError> {
        let mut active = self.active.lock();
        if active.len() >= self.config.max_concurrent_scenes {
            return Err(SysadlError::new(
                ErrorKind::ConcurrencyLimitExceeded,
                format!(
                    "Maximum concurrent scenes ({}) reached; cannot start '{}'.",
                    self.config.max_concurrent_scenes, name
                ),
            ));
        }
        let cancellation = Cancellation::new();
        let token = cancellation.token();
        active.insert(
            scene_id.to_string(),
            ActiveScene {
                execution: SceneExecution {
                    scene_id: scene_id.to_string(),
                    scene_name: name.to_string(),
                    started_at_ms: now_ms(),
                    status: SceneStatus::Started,
                    phase: ScenePhase::Initialization,
                    retry_count,
                    errors: Vec::new(),
                    warnings: Vec::new(),
                    start_event_result: None,
                },
                cancellation,
            },
        );
        drop(active);
        self.stats.lock().attempts += 1;
        Ok(token)
    }

    fn update_attempt(&self, scene_id: &str, update: impl FnOnce(&mut SceneExecution)) {
        if let Some(scene) = self.active.lock().get_mut(scene_id) {
            update(&mut scene.execution);
        }
    }

    fn record_finish(&self, status: SceneStatus, duration_ms: u64) {
        let mut stats = self.stats.lock();
        match status {
            SceneStatus::Completed => stats.successful += 1,
            SceneStatus::Stopped => stats.stopped += 1,
            _ => stats.failed += 1,
        }
        stats.total_duration_ms += duration_ms;
        let finished = stats.successful + stats.failed + stats.stopped;
        stats.average_duration_ms = stats.total_duration_ms as f64 / finished as f64;
        stats.success_rate = stats.successful as f64 / finished as f64;
    }
}
