use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use sysadl_api::{parse_bundle_json, RuntimeBundle};
use walkdir::WalkDir;

use crate::{map_cli_bundle_path, map_cli_bundle_read, map_cli_bundle_scan, CliError};

/// Loads a bundle file, or every `.json` file under a directory merged in
/// path order.
pub(crate) fn load_bundle(bundle: &str) -> Result<RuntimeBundle, CliError> {
    let root = resolve_bundle_path(bundle)?;
    let sources = read_bundle_sources(&root)?;

    let mut merged = RuntimeBundle::default();
    for (relative, source) in sources {
        let parsed = parse_bundle_json(&source).map_err(|error| {
            CliError::new(
                "CLI_BUNDLE_INVALID",
                format!("{}: {}", relative, error.message),
            )
        })?;
        merged.merge(parsed);
    }
    tracing::debug!(
        bundle = %root.display(),
        scenarios = merged.scenarios.len(),
        scenes = merged.scenes.len(),
        "bundle loaded"
    );
    Ok(merged)
}

pub(crate) fn resolve_bundle_path(bundle: &str) -> Result<PathBuf, CliError> {
    let path = PathBuf::from(bundle);
    let absolute = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map_err(map_cli_bundle_path)?
            .join(path)
    };

    if !absolute.exists() {
        return Err(CliError::new(
            "CLI_BUNDLE_NOT_FOUND",
            format!("bundle does not exist: {}", absolute.display()),
        ));
    }

    Ok(absolute)
}

pub(crate) fn read_bundle_sources(root: &Path) -> Result<BTreeMap<String, String>, CliError> {
    let mut sources = BTreeMap::new();

    if root.is_file() {
        let content = fs::read_to_string(root).map_err(map_cli_bundle_read)?;
        let name = root
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        sources.insert(name, content);
        return Ok(sources);
    }

    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if path.extension().and_then(|extension| extension.to_str()) != Some("json") {
            continue;
        }

        let relative = path
            .strip_prefix(root)
            .map_err(map_cli_bundle_scan)?
            .to_string_lossy()
            .replace('\\', "/");

        let content = fs::read_to_string(path).map_err(map_cli_bundle_read)?;
        sources.insert(relative, content);
    }

    if sources.is_empty() {
        return Err(CliError::new(
            "CLI_BUNDLE_EMPTY",
            format!("No .json files under {}", root.display()),
        ));
    }

    Ok(sources)
}
