use std::fmt::Display;

use sysadl_core::SysadlError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub(crate) struct CliError {
    pub(crate) code: String,
    pub(crate) message: String,
}

impl CliError {
    pub(crate) fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<SysadlError> for CliError {
    fn from(error: SysadlError) -> Self {
        Self::new(error.code(), error.message)
    }
}

fn map_error(code: &'static str, error: impl Display) -> CliError {
    CliError::new(code, error.to_string())
}

pub(crate) fn emit_error(error: CliError) -> i32 {
    println!("RESULT:ERROR");
    println!("ERROR_CODE:{}", error.code);
    println!(
        "ERROR_MSG_JSON:{}",
        serde_json::to_string(&error.message).unwrap_or_else(|_| "\"Unknown error\"".to_string())
    );
    1
}

pub(crate) fn map_cli_bundle_path(error: std::io::Error) -> CliError {
    map_error("CLI_BUNDLE_PATH", error)
}

pub(crate) fn map_cli_bundle_scan(error: std::path::StripPrefixError) -> CliError {
    map_error("CLI_BUNDLE_SCAN", error)
}

pub(crate) fn map_cli_bundle_read(error: std::io::Error) -> CliError {
    map_error("CLI_BUNDLE_READ", error)
}

pub(crate) fn map_cli_runtime_init(error: std::io::Error) -> CliError {
    map_error("CLI_RUNTIME_INIT", error)
}
