use std::collections::BTreeMap;
use std::ffi::OsString;
use std::future::Future;

use clap::Parser;
use sysadl_core::Value;
use tracing_subscriber::EnvFilter;

mod bundle_loader;
mod cli_args;
mod commands;
mod error_map;
mod output;

pub(crate) use bundle_loader::load_bundle;
#[cfg(test)]
pub(crate) use bundle_loader::{read_bundle_sources, resolve_bundle_path};
pub(crate) use cli_args::{Cli, DepsArgs, ListArgs, Mode, SceneArgs, ScenarioArgs};
pub(crate) use error_map::{
    emit_error, map_cli_bundle_path, map_cli_bundle_read, map_cli_bundle_scan,
    map_cli_runtime_init, CliError,
};
pub(crate) use output::{
    emit_dependencies, emit_listing, emit_log_entries, emit_scenario_result, emit_scene_outcome,
};

const DEFAULT_LOG_FILTER: &str = "warn";

pub fn run_cli_from_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return error.exit_code();
        }
    };
    init_logging(cli.log_level.as_deref());
    match run(cli) {
        Ok(code) => code,
        Err(error) => emit_error(error),
    }
}

fn run(cli: Cli) -> Result<i32, CliError> {
    match cli.command {
        Mode::Scenario(args) => commands::run_scenario(args),
        Mode::Scene(args) => commands::run_scene(args),
        Mode::Deps(args) => commands::run_deps(args),
        Mode::List(args) => commands::run_list(args),
    }
}

/// stdout carries the result protocol, so logs go to stderr.
fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

pub(crate) fn block_on<F: Future>(future: F) -> Result<F::Output, CliError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(map_cli_runtime_init)?;
    Ok(runtime.block_on(future))
}

/// Parses `name=value` pairs. Values are read as JSON when they parse,
/// otherwise kept as plain strings.
pub(crate) fn parse_assignments(raw: &[String]) -> Result<BTreeMap<String, Value>, CliError> {
    let mut assignments = BTreeMap::new();
    for item in raw {
        let Some((name, value)) = item.split_once('=') else {
            return Err(CliError::new(
                "CLI_ARG_INVALID",
                format!("Expected name=value, got: {}", item),
            ));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(CliError::new(
                "CLI_ARG_INVALID",
                format!("Missing name in assignment: {}", item),
            ));
        }
        let value = serde_json::from_str::<Value>(value)
            .unwrap_or_else(|_| Value::String(value.to_string()));
        assignments.insert(name.to_string(), value);
    }
    Ok(assignments)
}

#[cfg(test)]
mod tests;
