use serde::Serialize;
use sysadl_core::Value;

use super::SceneExecutor;
use crate::logger::ExecutionLogEntry;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyValue {
    pub path: String,
    pub value: Value,
    pub present: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDiagnostic {
    pub definition_name: String,
    pub event_name: String,
    pub trigger: String,
    pub dependencies: Vec<DependencyValue>,
}

/// Why a finish event may not have arrived.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyReport {
    pub scene_name: String,
    pub missing_event: String,
    pub rules: Vec<RuleDiagnostic>,
    pub suggestions: Vec<String>,
}

impl SceneExecutor {
    /// Finds the rules whose tasks emit `missing_event` and reports their
    /// triggers together with the current values of the paths they read.
    pub fn analyze_dependencies(&self, scene_name: &str, missing_event: &str) -> DependencyReport {
        let mut rules = Vec::new();
        let mut suggestions = Vec::new();

        for location in self.events.rules_for_task(missing_event) {
            let mut dependencies = Vec::new();
            if let Some(watcher) = &self.watcher {
                let state = watcher.state();
                for path in watcher.dependencies(&location.rule.trigger) {
                    let value = match path.as_str() {
                        "*" => Some(state.clone()),
                        path => state.get_path(path).cloned(),
                    };
                    if value.is_none() {
                        suggestions.push(format!(
                            "State path '{}' read by trigger '{}' is not set.",
                            path, location.rule.trigger
                        ));
                    }
                    dependencies.push(DependencyValue {
                        present: value.is_some(),
                        value: value.unwrap_or_default(),
                        path,
                    });
                }
            }
            rules.push(RuleDiagnostic {
                definition_name: location.definition_name.to_string(),
                event_name: location.event_name.to_string(),
                trigger: location.rule.trigger.clone(),
                dependencies,
            });
        }

        if rules.is_empty() {
            suggestions.push(format!(
                "No event rule lists '{}' as a task; check the event definitions.",
                missing_event
            ));
        } else {
            suggestions.push(format!(
                "Check that the triggers of the {} rule(s) emitting '{}' can become true.",
                rules.len(),
                missing_event
            ));
        }

        let report = DependencyReport {
            scene_name: scene_name.to_string(),
            missing_event: missing_event.to_string(),
            rules,
            suggestions,
        };
        tracing::warn!(
            scene = scene_name,
            missing_event,
            rules = report.rules.len(),
            suggestions = ?report.suggestions,
            "finish event timeout diagnostics"
        );
        for rule in &report.rules {
            tracing::warn!(
                scene = scene_name,
                definition = %rule.definition_name,
                event = %rule.event_name,
                trigger = %rule.trigger,
                dependencies = ?rule.dependencies,
                "rule expected to emit the finish event"
            );
        }

        report
    }

    /// Analyzes a finish-event timeout and records the report against the
    /// attempt that timed out.
    pub(super) fn report_finish_timeout(&self, scene_id: &str, scene_name: &str, missing_event: &str) {
        let report = self.analyze_dependencies(scene_name, missing_event);
        let mut entry = ExecutionLogEntry::new("scene.timeoutDiagnostics", scene_name, scene_id)
            .meta("missingEvent", missing_event)
            .meta("rules", report.rules.len() as u64);
        entry.trace = report.suggestions;
        self.logger.log_execution(entry);
    }
}
