use std::collections::BTreeMap;

use serde::Serialize;
use sysadl_api::RuntimeBundle;
use sysadl_core::Value;
use sysadl_runtime::{ControlFlow, ExecutionLogEntry, ExecutionResult, SceneOutcome};

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

pub(crate) fn emit_scenario_result(result: &ExecutionResult) {
    println!("RESULT:OK");
    println!("EXECUTION_ID:{}", result.execution_id);
    println!("SUCCESS:{}", result.success);
    let control_flow = match result.result.control_flow {
        Some(ControlFlow::Break) => "break",
        Some(ControlFlow::Continue) => "continue",
        Some(ControlFlow::Return) => "return",
        None => "NONE",
    };
    println!("CONTROL_FLOW:{}", control_flow);
    println!("DURATION_MS:{}", result.duration_ms);
    println!("RESULT_JSON:{}", to_json(&result.result.value));
    let visible = result
        .variables
        .iter()
        .filter(|(name, _)| !name.starts_with("__"))
        .collect::<BTreeMap<_, _>>();
    println!("VARIABLES_JSON:{}", to_json(&visible));
    println!("STATE_JSON:{}", to_json(&result.final_state));
}

pub(crate) fn emit_scene_outcome(outcome: &SceneOutcome, state: &Value) {
    println!("RESULT:OK");
    println!("SCENE_ID:{}", outcome.scene_id);
    println!("SUCCESS:{}", outcome.success);
    println!("RETRY_COUNT:{}", outcome.retry_count);
    println!("DURATION_MS:{}", outcome.duration_ms);
    match &outcome.start_event_result {
        Some(result) => println!("START_EVENT_JSON:{}", to_json(result)),
        None => println!("START_EVENT_JSON:null"),
    }
    println!("STATE_JSON:{}", to_json(state));
}

pub(crate) fn emit_dependencies(dependencies: &[String]) {
    println!("RESULT:OK");
    println!("DEPENDENCIES_JSON:{}", to_json(dependencies));
}

pub(crate) fn emit_listing(bundle: &RuntimeBundle) {
    println!("RESULT:OK");
    for scenario in &bundle.scenarios {
        println!("SCENARIO:{}", scenario.name);
    }
    for scene in &bundle.scenes {
        println!(
            "SCENE:{}|{}|{}",
            scene.name,
            scene.start_event.as_deref().unwrap_or("NONE"),
            scene.finish_event.as_deref().unwrap_or("NONE")
        );
    }
    for (definition_name, events) in &bundle.events {
        for (event_name, definition) in events {
            println!(
                "EVENT:{}.{}|{}",
                definition_name,
                event_name,
                definition.rules.len()
            );
        }
    }
}

pub(crate) fn emit_log_entries(entries: &[ExecutionLogEntry]) {
    for entry in entries {
        println!("LOG_JSON:{}", to_json(entry));
    }
}
