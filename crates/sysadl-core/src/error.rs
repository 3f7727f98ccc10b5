use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ExecutionContextNotFound,
    ScenarioExecutionTimeout,
    MaxLoopIterationsExceeded,
    ExpressionEvaluationError,
    PreConditionFailed,
    PostConditionFailed,
    SceneNotFound,
    SceneTimeout,
    ScenarioNotFound,
    EventNotFound,
    ConcurrencyLimitExceeded,
    ConditionWaitTimeout,
    StartEventExecutionFailed,
    EventInjectionFailed,
    InvalidConditionFormat,
    CallDepthExceeded,
    StateUpdateFailed,
    ExecutionStopped,
    InvalidDefinition,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::ExecutionContextNotFound => "EXECUTION_CONTEXT_NOT_FOUND",
            Self::ScenarioExecutionTimeout => "SCENARIO_EXECUTION_TIMEOUT",
            Self::MaxLoopIterationsExceeded => "MAX_LOOP_ITERATIONS_EXCEEDED",
            Self::ExpressionEvaluationError => "EXPRESSION_EVALUATION_ERROR",
            Self::PreConditionFailed => "PRE_CONDITION_FAILED",
            Self::PostConditionFailed => "POST_CONDITION_FAILED",
            Self::SceneNotFound => "SCENE_NOT_FOUND",
            Self::SceneTimeout => "SCENE_TIMEOUT",
            Self::ScenarioNotFound => "SCENARIO_NOT_FOUND",
            Self::EventNotFound => "EVENT_NOT_FOUND",
            Self::ConcurrencyLimitExceeded => "CONCURRENCY_LIMIT_EXCEEDED",
            Self::ConditionWaitTimeout => "CONDITION_WAIT_TIMEOUT",
            Self::StartEventExecutionFailed => "START_EVENT_EXECUTION_FAILED",
            Self::EventInjectionFailed => "EVENT_INJECTION_FAILED",
            Self::InvalidConditionFormat => "INVALID_CONDITION_FORMAT",
            Self::CallDepthExceeded => "CALL_DEPTH_EXCEEDED",
            Self::StateUpdateFailed => "STATE_UPDATE_FAILED",
            Self::ExecutionStopped => "EXECUTION_STOPPED",
            Self::InvalidDefinition => "INVALID_DEFINITION",
        }
    }

    pub fn is_timeout(self) -> bool {
        matches!(
            self,
            Self::ScenarioExecutionTimeout | Self::ConditionWaitTimeout | Self::SceneTimeout
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct SysadlError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SysadlError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn display_prefixes_message_with_code() {
        let error = SysadlError::new(ErrorKind::SceneNotFound, "Scene not found: Boot");
        assert_eq!(error.to_string(), "SCENE_NOT_FOUND: Scene not found: Boot");
        assert_eq!(error.code(), "SCENE_NOT_FOUND");
    }

    #[test]
    fn timeout_kinds_are_grouped() {
        assert!(ErrorKind::ConditionWaitTimeout.is_timeout());
        assert!(ErrorKind::SceneTimeout.is_timeout());
        assert!(!ErrorKind::PreConditionFailed.is_timeout());
    }
}
