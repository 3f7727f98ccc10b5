mod cancel;
pub mod events;
pub mod logger;
pub mod scenario;
pub mod scene;
pub mod state;
pub mod watcher;

pub use events::{
    DeclarativeRule, EmitterEventInjector, EventDefinition, EventEmitter, EventInjector,
    EventRegistry, EventRule, OnceListener, RuleAction, RuleContext, RuleEventInjector,
};
pub use logger::{ExecutionLogEntry, ExecutionLogger, MemoryLogger, TracingLogger};
pub use scenario::{
    ActiveExecution, ControlFlow, ExecutionMode, ExecutionOptions, ExecutionResult,
    ExecutionStatus, ScenarioExecutor, ScenarioExecutorConfig, ScenarioExecutorOptions,
    ScenarioOutput, ScenarioStatistics,
};
pub use scene::{
    DependencyReport, DependencyValue, RuleDiagnostic, SceneExecution, SceneExecutor,
    SceneExecutorConfig, SceneExecutorOptions, SceneOutcome, ScenePhase, SceneRecord,
    SceneStatistics, SceneStatus,
};
pub use state::{ReactiveStateManager, StateCallback, StateStatistics, StateStore, SubscriptionId};
pub use watcher::{
    ConditionCallback, ConditionWatcher, ReactiveConditionWatcher, WatchOptions,
    WatchedCondition, WatcherStatistics,
};
