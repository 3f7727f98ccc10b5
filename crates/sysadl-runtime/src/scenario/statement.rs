use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use sysadl_core::{ErrorKind, InjectionOptions, Statement, SysadlError, Value};
use tokio::sync::oneshot;
use uuid::Uuid;

use super::{scenario_not_found, ExecutionMode, ExecutionOptions, Flow, Frame, ScenarioExecutor};
use crate::events::RuleContext;
use crate::watcher::{ConditionWatcher, WatchOptions};

/// Unregisters a condition watch on every exit path of a wait.
struct WatchGuard<'a> {
    watcher: &'a dyn ConditionWatcher,
    id: String,
}

impl Drop for WatchGuard<'_> {
    fn drop(&mut self) {
        self.watcher.unwatch_condition(&self.id);
    }
}

impl ScenarioExecutor {
    pub(super) fn execute_body<'a>(
        &'a self,
        body: &'a [Statement],
        frame: &'a mut Frame,
    ) -> BoxFuture<'a, Result<Flow, SysadlError>> {
        async move {
            let mut last = Value::Null;
            for statement in body {
                match self.execute_statement(statement, frame).await? {
                    Flow::Normal(value) => last = value,
                    signal => return Ok(signal),
                }
            }
            Ok(Flow::Normal(last))
        }
        .boxed()
    }

    async fn execute_statement(
        &self,
        statement: &Statement,
        frame: &mut Frame,
    ) -> Result<Flow, SysadlError> {
        if frame.cancel.is_cancelled() {
            return Err(super::stopped(frame));
        }
        if frame.timed_out() {
            return Err(super::timed_out(frame));
        }
        frame.trace.push(statement.kind_name().to_string());
        if self.config.debug_mode {
            tracing::debug!(
                execution_id = %frame.execution_id,
                statement = statement.kind_name(),
                "executing statement"
            );
        }

        match statement {
            Statement::VariableAssignment { variable, value } => {
                if !self.config.enable_variables {
                    return Ok(self.skip(statement, "variables"));
                }
                let value = self.evaluate(value, frame)?;
                frame.variables.insert(variable.clone(), value.clone());
                self.stats.lock().variable_assignments += 1;
                if self.config.enable_reactive_integration {
                    self.mirror_variable(frame, variable)?;
                }
                Ok(Flow::Normal(value))
            }
            Statement::EventTrigger {
                events_definition_name,
                event_name,
            } => {
                self.trigger_event(events_definition_name, event_name, frame)
                    .await
            }
            Statement::ConditionWait { condition, timeout } => {
                self.wait_for_condition(condition, *timeout, frame).await
            }
            Statement::WhileLoop { condition, body } => {
                if !self.config.enable_loops {
                    return Ok(self.skip(statement, "loops"));
                }
                self.execute_while(condition, body, frame).await
            }
            Statement::ForLoop {
                variable,
                start,
                end,
                step,
                body,
            } => {
                if !self.config.enable_loops {
                    return Ok(self.skip(statement, "loops"));
                }
                self.execute_for(variable, start, end, step.as_deref(), body, frame)
                    .await
            }
            Statement::IfStatement {
                condition,
                then_body,
                else_body,
            } => {
                if !self.config.enable_conditionals {
                    return Ok(self.skip(statement, "conditionals"));
                }
                let taken = self.evaluate_condition(condition, frame)?;
                let branch = if taken { "then" } else { "else" };
                frame.trace.push(format!("IfStatement -> {}", branch));
                tracing::debug!(execution_id = %frame.execution_id, condition, branch, "branch taken");
                match (taken, else_body) {
                    (true, _) => self.execute_body(then_body, frame).await,
                    (false, Some(else_body)) => self.execute_body(else_body, frame).await,
                    (false, None) => Ok(Flow::Normal(Value::Null)),
                }
            }
            Statement::EventInjection {
                event_name,
                parameters,
                delay,
                options,
            } => {
                let parameters = self.evaluate_parameters(parameters, frame)?;
                let options = InjectionOptions {
                    execution_id: options
                        .execution_id
                        .clone()
                        .or_else(|| Some(frame.execution_id.clone())),
                    ..options.clone()
                };
                let injected = self
                    .suspend(
                        frame,
                        self.injector.inject_event(
                            event_name,
                            parameters,
                            Duration::from_millis(delay.unwrap_or(0)),
                            options,
                        ),
                    )
                    .await??;
                Ok(Flow::Normal(injected))
            }
            Statement::StateUpdate { path, value } => {
                let value = self.evaluate(value, frame)?;
                self.state.set_value(path, value.clone())?;
                Ok(Flow::Normal(value))
            }
            Statement::ScenarioCall {
                scenario_name,
                parameters,
            } => self.call_scenario(scenario_name, parameters, frame).await,
            Statement::Sleep { duration } => {
                let millis = self.evaluate(duration, frame)?.to_number();
                let millis = if millis.is_finite() && millis > 0.0 {
                    millis as u64
                } else {
                    0
                };
                self.suspend(frame, tokio::time::sleep(Duration::from_millis(millis)))
                    .await?;
                Ok(Flow::Normal(Value::Null))
            }
            Statement::Break => Ok(Flow::Break),
            Statement::Continue => Ok(Flow::Continue),
            Statement::Return { value } => {
                let value = match value {
                    Some(source) => self.evaluate(source, frame)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
        }
    }

    fn skip(&self, statement: &Statement, family: &str) -> Flow {
        tracing::warn!(
            statement = statement.kind_name(),
            family,
            "statement skipped: feature disabled"
        );
        Flow::Normal(Value::Null)
    }

    fn evaluate_parameters(
        &self,
        parameters: &BTreeMap<String, String>,
        frame: &Frame,
    ) -> Result<BTreeMap<String, Value>, SysadlError> {
        parameters
            .iter()
            .map(|(name, source)| Ok((name.clone(), self.evaluate(source, frame)?)))
            .collect()
    }

    async fn trigger_event(
        &self,
        definition_name: &str,
        event_name: &str,
        frame: &mut Frame,
    ) -> Result<Flow, SysadlError> {
        let rules = self
            .events
            .lookup(definition_name, event_name)
            .map(|definition| definition.rules.clone())
            .ok_or_else(|| {
                SysadlError::new(
                    ErrorKind::EventNotFound,
                    format!("Event '{}.{}' not found.", definition_name, event_name),
                )
            })?;

        let mut results = Vec::with_capacity(rules.len());
        for rule in rules {
            let context = RuleContext {
                execution_id: frame.execution_id.clone(),
                definition_name: definition_name.to_string(),
                event_name: event_name.to_string(),
                variables: frame.variables.clone(),
                state: self.state.snapshot(),
                store: Arc::clone(&self.state),
            };
            let result = self.suspend(frame, rule.action.execute(&context)).await??;
            results.push(result);
        }
        tracing::debug!(
            execution_id = %frame.execution_id,
            definition = definition_name,
            event = event_name,
            rules = results.len(),
            "event triggered"
        );
        Ok(Flow::Normal(Value::Array(results)))
    }

    async fn wait_for_condition(
        &self,
        condition: &str,
        timeout: Option<u64>,
        frame: &mut Frame,
    ) -> Result<Flow, SysadlError> {
        let timeout_ms = timeout.unwrap_or(self.config.condition_wait_timeout);
        // Variables are not visible to the watcher, so check the full scope first.
        let current = self.evaluate(condition, frame)?;
        self.stats.lock().condition_evaluations += 1;
        if current.is_truthy() {
            return Ok(Flow::Normal(current));
        }

        let (sender, receiver) = oneshot::channel();
        let watch_id = format!("{}:wait:{}", frame.execution_id, Uuid::new_v4());
        self.watcher.watch_condition(
            &watch_id,
            condition,
            Box::new(move |value| {
                let _ = sender.send(value);
            }),
            WatchOptions::default(),
        )?;
        let _guard = WatchGuard {
            watcher: self.watcher.as_ref(),
            id: watch_id,
        };

        let waited = self
            .suspend(
                frame,
                tokio::time::timeout(Duration::from_millis(timeout_ms), receiver),
            )
            .await?;
        match waited {
            Ok(Ok(value)) => Ok(Flow::Normal(value)),
            Ok(Err(_)) => Err(SysadlError::new(
                ErrorKind::ExecutionStopped,
                format!("Condition watch for \"{}\" was removed before it fired.", condition),
            )),
            Err(_) => Err(SysadlError::new(
                ErrorKind::ConditionWaitTimeout,
                format!(
                    "Condition \"{}\" was not satisfied within {}ms.",
                    condition, timeout_ms
                ),
            )),
        }
    }

    async fn call_scenario(
        &self,
        scenario_name: &str,
        parameters: &BTreeMap<String, String>,
        frame: &mut Frame,
    ) -> Result<Flow, SysadlError> {
        let definition = self
            .scenario(scenario_name)
            .ok_or_else(|| scenario_not_found(scenario_name))?;
        if frame.depth + 1 > self.config.max_call_depth {
            return Err(SysadlError::new(
                ErrorKind::CallDepthExceeded,
                format!(
                    "Calling '{}' would exceed the maximum call depth of {}.",
                    scenario_name, self.config.max_call_depth
                ),
            ));
        }

        let mut variables = frame
            .variables
            .iter()
            .filter(|(name, _)| !name.starts_with("__"))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect::<BTreeMap<_, _>>();
        variables.extend(self.evaluate_parameters(parameters, frame)?);

        let options = ExecutionOptions {
            initial_variables: variables,
            timeout: Some(frame.remaining().as_millis() as u64),
            execution_mode: ExecutionMode::Sequential,
            parent_execution_id: Some(frame.execution_id.clone()),
        };
        let result = self
            .suspend(frame, self.run(&definition, options, frame.depth + 1))
            .await??;
        Ok(Flow::Normal(result.result.value))
    }
}
