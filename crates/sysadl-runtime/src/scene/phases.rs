use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use sysadl_core::{
    Condition, ConditionContext, ErrorKind, InjectionOptions, SceneDefinition, SysadlError, Value,
};
use sysadl_expr::LayeredScope;

use super::{AttemptGuard, ScenePhase, SceneExecutor, SceneRecord, SceneStatus};
use crate::cancel::CancelToken;
use crate::logger::ExecutionLogEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ConditionPhase {
    Pre,
    Post,
}

impl ConditionPhase {
    fn label(self) -> &'static str {
        match self {
            Self::Pre => "preConditions",
            Self::Post => "postConditions",
        }
    }

    fn error_kind(self) -> ErrorKind {
        match self {
            Self::Pre => ErrorKind::PreConditionFailed,
            Self::Post => ErrorKind::PostConditionFailed,
        }
    }

    fn scene_phase(self) -> ScenePhase {
        match self {
            Self::Pre => ScenePhase::PreConditions,
            Self::Post => ScenePhase::PostConditions,
        }
    }
}

impl SceneExecutor {
    /// One attempt through every phase, registered as `scene_id`. Returns the
    /// start event result.
    pub(super) async fn run_attempt(
        &self,
        scene_id: &str,
        name: &str,
        record: &SceneRecord,
        variables: &BTreeMap<String, Value>,
        retry_count: u32,
    ) -> Result<Option<Value>, SysadlError> {
        let cancel = self.admit(scene_id, name, retry_count)?;
        let _guard = AttemptGuard {
            executor: self,
            scene_id: scene_id.to_string(),
        };
        let definition = &record.definition;
        tracing::debug!(scene = name, scene_id = %scene_id, retry_count, "scene attempt started");

        let outcome = self
            .run_phases(scene_id, definition, record.timeout_ms, variables, &cancel)
            .await;
        match &outcome {
            Ok(_) => self.update_attempt(scene_id, |execution| {
                execution.status = SceneStatus::Completed;
            }),
            Err(error) => {
                let message = error.to_string();
                self.update_attempt(scene_id, |execution| {
                    if execution.status != SceneStatus::Stopped {
                        execution.status = SceneStatus::Failed;
                    }
                    execution.errors.push(message);
                });
            }
        }
        outcome
    }

    async fn run_phases(
        &self,
        scene_id: &str,
        definition: &SceneDefinition,
        timeout_ms: u64,
        variables: &BTreeMap<String, Value>,
        cancel: &CancelToken,
    ) -> Result<Option<Value>, SysadlError> {
        self.check_conditions(scene_id, definition, variables, ConditionPhase::Pre)
            .await?;

        // Listen before the start event goes out so a synchronous reply is not lost.
        let finish_listener = definition
            .finish_event
            .as_deref()
            .map(|event| self.emitter.once(event));

        self.update_attempt(scene_id, |execution| execution.phase = ScenePhase::StartEvent);
        let start_event_result = match definition.start_event.as_deref() {
            Some(event) => {
                let injected = self
                    .cancellable(
                        scene_id,
                        cancel,
                        self.injector.inject_event(
                            event,
                            variables.clone(),
                            Duration::ZERO,
                            InjectionOptions {
                                source: Some(format!("scene:{}", definition.name)),
                                execution_id: Some(scene_id.to_string()),
                                priority: definition.priority,
                            },
                        ),
                    )
                    .await?
                    .map_err(|error| {
                        SysadlError::new(
                            ErrorKind::StartEventExecutionFailed,
                            format!(
                                "Start event '{}' of scene '{}' failed: {}",
                                event, definition.name, error.message
                            ),
                        )
                    })?;
                let recorded = injected.clone();
                self.update_attempt(scene_id, |execution| {
                    execution.start_event_result = Some(recorded);
                });
                Some(injected)
            }
            None => {
                self.update_attempt(scene_id, |execution| {
                    execution
                        .warnings
                        .push("scene has no start event".to_string());
                });
                None
            }
        };

        self.update_attempt(scene_id, |execution| {
            execution.phase = ScenePhase::WaitingFinish;
        });
        if let (Some(mut listener), Some(finish_event)) =
            (finish_listener, definition.finish_event.as_deref())
        {
            let waited = self
                .cancellable(
                    scene_id,
                    cancel,
                    tokio::time::timeout(Duration::from_millis(timeout_ms), listener.recv()),
                )
                .await?;
            drop(listener);
            match waited {
                Ok(Some(_)) => {
                    tracing::debug!(scene = %definition.name, finish_event, "finish event received");
                }
                Ok(None) => {
                    return Err(SysadlError::new(
                        ErrorKind::ExecutionStopped,
                        format!("Finish listener for '{}' closed before firing.", finish_event),
                    ));
                }
                Err(_) => {
                    self.report_finish_timeout(scene_id, &definition.name, finish_event);
                    return Err(SysadlError::new(
                        ErrorKind::SceneTimeout,
                        format!(
                            "Scene timeout: finish event '{}' not received within {}ms",
                            finish_event, timeout_ms
                        ),
                    ));
                }
            }
        }

        self.check_conditions(scene_id, definition, variables, ConditionPhase::Post)
            .await?;
        Ok(start_event_result)
    }

    /// Validator when present, else every condition in order. Each outcome is
    /// logged and the logger flushed before a failure is returned.
    pub(super) async fn check_conditions(
        &self,
        scene_id: &str,
        definition: &SceneDefinition,
        variables: &BTreeMap<String, Value>,
        phase: ConditionPhase,
    ) -> Result<(), SysadlError> {
        self.update_attempt(scene_id, |execution| execution.phase = phase.scene_phase());
        let failure = self.evaluate_conditions(scene_id, definition, variables, phase);
        self.logger.flush().await?;
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn evaluate_conditions(
        &self,
        scene_id: &str,
        definition: &SceneDefinition,
        variables: &BTreeMap<String, Value>,
        phase: ConditionPhase,
    ) -> Option<SysadlError> {
        let snapshot = self.state.snapshot();
        let context = ConditionContext {
            scene_name: &definition.name,
            variables,
            state: &snapshot,
        };
        let what = format!("scene.{}", phase.label());

        if let Some(validator) = &definition.validator {
            let passed = match phase {
                ConditionPhase::Pre => validator.0.validate_pre_conditions(&context),
                ConditionPhase::Post => validator.0.validate_post_conditions(&context),
            };
            self.logger.log_execution(
                ExecutionLogEntry::new(what.as_str(), definition.name.as_str(), scene_id)
                    .result(passed)
                    .meta("condition", "<validator>"),
            );
            return (!passed).then(|| {
                SysadlError::new(
                    phase.error_kind(),
                    format!(
                        "{} validator rejected scene '{}'.",
                        phase.label(),
                        definition.name
                    ),
                )
            });
        }

        let conditions = match phase {
            ConditionPhase::Pre => &definition.pre_conditions,
            ConditionPhase::Post => &definition.post_conditions,
        };
        for condition in conditions {
            let outcome = self.evaluate_condition(condition, &context);
            let entry = ExecutionLogEntry::new(what.as_str(), definition.name.as_str(), scene_id)
                .meta("condition", condition.label());
            match outcome {
                Ok(true) => self.logger.log_execution(entry.result(true)),
                Ok(false) => {
                    self.logger.log_execution(entry.result(false));
                    return Some(SysadlError::new(
                        phase.error_kind(),
                        format!(
                            "Condition '{}' failed in {} of scene '{}'.",
                            condition.label(),
                            phase.label(),
                            definition.name
                        ),
                    ));
                }
                Err(error) => {
                    self.logger.log_execution(
                        entry
                            .result(false)
                            .meta("errorCode", error.code())
                            .meta("error", error.message.as_str()),
                    );
                    return Some(error);
                }
            }
        }
        None
    }

    fn evaluate_condition(
        &self,
        condition: &Condition,
        context: &ConditionContext<'_>,
    ) -> Result<bool, SysadlError> {
        let expression = match condition {
            Condition::Predicate(predicate) => return Ok((predicate.0)(context)),
            Condition::Expression(expression) => expression,
            Condition::Described { expression, .. } => expression,
        };
        if expression.trim().is_empty() {
            return Err(SysadlError::new(
                ErrorKind::InvalidConditionFormat,
                format!(
                    "Scene '{}' has a condition without an expression.",
                    context.scene_name
                ),
            ));
        }
        self.evaluator.evaluate_condition(
            expression,
            &LayeredScope {
                variables: context.variables,
                state: context.state,
            },
        )
    }

    async fn cancellable<F>(
        &self,
        scene_id: &str,
        cancel: &CancelToken,
        future: F,
    ) -> Result<F::Output, SysadlError>
    where
        F: Future + Send,
    {
        tokio::select! {
            output = future => Ok(output),
            () = cancel.cancelled() => Err(SysadlError::new(
                ErrorKind::ExecutionStopped,
                format!("Scene attempt {} was stopped.", scene_id),
            )),
        }
    }
}
