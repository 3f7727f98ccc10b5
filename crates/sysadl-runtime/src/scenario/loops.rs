use sysadl_core::{ErrorKind, Statement, SysadlError, Value};

use super::{Flow, Frame, ScenarioExecutor};

impl ScenarioExecutor {
    pub(super) async fn execute_while(
        &self,
        condition: &str,
        body: &[Statement],
        frame: &mut Frame,
    ) -> Result<Flow, SysadlError> {
        let mut iterations = 0u64;
        while self.evaluate_condition(condition, frame)? {
            self.enter_iteration(&mut iterations, "WhileLoop", frame)?;
            match self.execute_body(body, frame).await? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Continue | Flow::Normal(_) => {}
            }
        }
        Ok(Flow::Normal(Value::from(iterations)))
    }

    /// Inclusive range; a negative step counts down.
    pub(super) async fn execute_for(
        &self,
        variable: &str,
        start: &str,
        end: &str,
        step: Option<&str>,
        body: &[Statement],
        frame: &mut Frame,
    ) -> Result<Flow, SysadlError> {
        let start = self.evaluate(start, frame)?.to_number();
        let end = self.evaluate(end, frame)?.to_number();
        let step = match step {
            Some(source) => self.evaluate(source, frame)?.to_number(),
            None => 1.0,
        };
        if step == 0.0 || !step.is_finite() {
            return Err(SysadlError::new(
                ErrorKind::ExpressionEvaluationError,
                format!("ForLoop over '{}' needs a non-zero finite step.", variable),
            ));
        }

        let mut iterations = 0u64;
        let mut current = start;
        while (step > 0.0 && current <= end) || (step < 0.0 && current >= end) {
            self.enter_iteration(&mut iterations, "ForLoop", frame)?;
            frame
                .variables
                .insert(variable.to_string(), Value::Number(current));
            if self.config.enable_reactive_integration {
                self.mirror_variable(frame, variable)?;
            }
            match self.execute_body(body, frame).await? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Continue | Flow::Normal(_) => {}
            }
            current += step;
        }
        Ok(Flow::Normal(Value::from(iterations)))
    }

    fn enter_iteration(
        &self,
        iterations: &mut u64,
        kind: &str,
        frame: &Frame,
    ) -> Result<(), SysadlError> {
        if *iterations >= self.config.max_loop_iterations {
            return Err(SysadlError::new(
                ErrorKind::MaxLoopIterationsExceeded,
                format!(
                    "{} in scenario '{}' reached the limit of {} iterations.",
                    kind, frame.scenario_name, self.config.max_loop_iterations
                ),
            ));
        }
        *iterations += 1;
        self.stats.lock().loop_iterations += 1;
        Ok(())
    }
}
