use std::sync::Arc;

use sysadl_api::{extract_dependencies, validate_bundle, RuntimeBundle, SysadlRuntime};
use sysadl_runtime::{ExecutionLogger, MemoryLogger, TracingLogger};

use crate::{
    block_on, emit_dependencies, emit_listing, emit_log_entries, emit_scenario_result,
    emit_scene_outcome, load_bundle, parse_assignments, CliError, DepsArgs, ListArgs,
    SceneArgs, ScenarioArgs,
};

/// `--show-log` keeps entries in memory for printing; otherwise they go to
/// the tracing subscriber.
fn build_runtime(
    bundle: RuntimeBundle,
    show_log: bool,
) -> Result<(SysadlRuntime, Option<MemoryLogger>), CliError> {
    let memory = show_log.then(MemoryLogger::new);
    let logger: Arc<dyn ExecutionLogger> = match &memory {
        Some(memory) => Arc::new(memory.clone()),
        None => Arc::new(TracingLogger),
    };
    let runtime = SysadlRuntime::from_bundle(bundle, logger)?;
    Ok((runtime, memory))
}

pub(crate) fn run_scenario(args: ScenarioArgs) -> Result<i32, CliError> {
    let variables = parse_assignments(&args.vars)?;
    let bundle = load_bundle(&args.bundle)?;
    let (runtime, memory) = build_runtime(bundle, args.show_log)?;

    let result = block_on(runtime.run_scenario(&args.name, variables, args.timeout))??;
    emit_scenario_result(&result);
    if let Some(memory) = memory {
        emit_log_entries(&memory.entries());
    }
    Ok(0)
}

pub(crate) fn run_scene(args: SceneArgs) -> Result<i32, CliError> {
    let context = parse_assignments(&args.params)?;
    let bundle = load_bundle(&args.bundle)?;
    let (runtime, memory) = build_runtime(bundle, args.show_log)?;

    let outcome = block_on(runtime.run_scene(&args.name, context))??;
    emit_scene_outcome(&outcome, &runtime.snapshot());
    if let Some(memory) = memory {
        emit_log_entries(&memory.entries());
    }
    Ok(0)
}

pub(crate) fn run_deps(args: DepsArgs) -> Result<i32, CliError> {
    emit_dependencies(&extract_dependencies(&args.expr));
    Ok(0)
}

pub(crate) fn run_list(args: ListArgs) -> Result<i32, CliError> {
    let bundle = load_bundle(&args.bundle)?;
    validate_bundle(&bundle)?;
    emit_listing(&bundle);
    Ok(0)
}
