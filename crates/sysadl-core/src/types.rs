use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub body: Vec<Statement>,
}

impl ScenarioDefinition {
    pub fn new(name: impl Into<String>, body: Vec<Statement>) -> Self {
        Self {
            name: name.into(),
            description: None,
            body,
        }
    }
}

/// One node of the scenario language. Every expression field holds source
/// text for the sandboxed evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Statement {
    VariableAssignment {
        variable: String,
        value: String,
    },
    EventTrigger {
        events_definition_name: String,
        event_name: String,
    },
    ConditionWait {
        condition: String,
        #[serde(default)]
        timeout: Option<u64>,
    },
    WhileLoop {
        condition: String,
        #[serde(default)]
        body: Vec<Statement>,
    },
    ForLoop {
        variable: String,
        start: String,
        end: String,
        #[serde(default)]
        step: Option<String>,
        #[serde(default)]
        body: Vec<Statement>,
    },
    IfStatement {
        condition: String,
        #[serde(default)]
        then_body: Vec<Statement>,
        #[serde(default)]
        else_body: Option<Vec<Statement>>,
    },
    EventInjection {
        event_name: String,
        #[serde(default)]
        parameters: BTreeMap<String, String>,
        #[serde(default)]
        delay: Option<u64>,
        #[serde(default)]
        options: InjectionOptions,
    },
    StateUpdate {
        path: String,
        value: String,
    },
    ScenarioCall {
        scenario_name: String,
        #[serde(default)]
        parameters: BTreeMap<String, String>,
    },
    Sleep {
        duration: String,
    },
    Break,
    Continue,
    Return {
        #[serde(default)]
        value: Option<String>,
    },
}

impl Statement {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::VariableAssignment { .. } => "VariableAssignment",
            Self::EventTrigger { .. } => "EventTrigger",
            Self::ConditionWait { .. } => "ConditionWait",
            Self::WhileLoop { .. } => "WhileLoop",
            Self::ForLoop { .. } => "ForLoop",
            Self::IfStatement { .. } => "IfStatement",
            Self::EventInjection { .. } => "EventInjection",
            Self::StateUpdate { .. } => "StateUpdate",
            Self::ScenarioCall { .. } => "ScenarioCall",
            Self::Sleep { .. } => "Sleep",
            Self::Break => "Break",
            Self::Continue => "Continue",
            Self::Return { .. } => "Return",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectionOptions {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub priority: i32,
}

/// Values visible to scene conditions and validators.
#[derive(Debug, Clone, Copy)]
pub struct ConditionContext<'a> {
    pub scene_name: &'a str,
    pub variables: &'a BTreeMap<String, Value>,
    pub state: &'a Value,
}

pub trait SceneValidator: Send + Sync {
    fn validate_pre_conditions(&self, context: &ConditionContext<'_>) -> bool;

    fn validate_post_conditions(&self, _context: &ConditionContext<'_>) -> bool {
        true
    }
}

#[derive(Clone)]
pub struct ValidatorHandle(pub Arc<dyn SceneValidator>);

impl fmt::Debug for ValidatorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ValidatorHandle")
    }
}

type PredicateFn = dyn Fn(&ConditionContext<'_>) -> bool + Send + Sync;

#[derive(Clone)]
pub struct ConditionPredicate(pub Arc<PredicateFn>);

impl ConditionPredicate {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&ConditionContext<'_>) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }
}

impl fmt::Debug for ConditionPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConditionPredicate")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Expression(String),
    Described {
        expression: String,
        #[serde(default)]
        description: Option<String>,
    },
    #[serde(skip)]
    Predicate(ConditionPredicate),
}

impl Condition {
    pub fn label(&self) -> String {
        match self {
            Self::Expression(expression) => expression.clone(),
            Self::Described {
                expression,
                description,
            } => description.clone().unwrap_or_else(|| expression.clone()),
            Self::Predicate(_) => "<predicate>".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub start_event: Option<String>,
    #[serde(default)]
    pub finish_event: Option<String>,
    #[serde(default)]
    pub pre_conditions: Vec<Condition>,
    #[serde(default)]
    pub post_conditions: Vec<Condition>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub priority: i32,
    #[serde(skip)]
    pub validator: Option<ValidatorHandle>,
}
