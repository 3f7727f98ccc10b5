use super::*;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should be monotonic")
        .as_nanos();
    std::env::temp_dir().join(format!("sysadl-rs-{}-{}", name, nanos))
}

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent should be created");
    }
    fs::write(path, content).expect("file should be written");
}

fn demo_path(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("demos")
        .join(name)
        .to_string_lossy()
        .to_string()
}

#[test]
fn resolve_bundle_path_reports_missing_paths() {
    let missing = temp_path("missing-bundle");
    let error = resolve_bundle_path(missing.to_string_lossy().as_ref())
        .expect_err("missing path should fail");
    assert_eq!(error.code, "CLI_BUNDLE_NOT_FOUND");
}

#[test]
fn read_bundle_sources_filters_json_files() {
    let root = temp_path("bundle-dir");
    write_file(&root.join("scenarios.json"), "{\"scenarios\": []}");
    write_file(&root.join("nested").join("scenes.json"), "{\"scenes\": []}");
    write_file(&root.join("notes.txt"), "ignored");

    let sources = read_bundle_sources(&root).expect("scan should pass");
    assert_eq!(sources.len(), 2);
    assert!(sources.contains_key("scenarios.json"));
    assert!(sources.contains_key("nested/scenes.json"));
}

#[test]
fn read_bundle_sources_accepts_a_single_file() {
    let file = temp_path("single-bundle.json");
    write_file(&file, "{}");
    let sources = read_bundle_sources(&file).expect("file should load");
    assert_eq!(sources.len(), 1);
}

#[test]
fn read_bundle_sources_errors_when_no_json_files() {
    let root = temp_path("empty-bundle-dir");
    write_file(&root.join("readme.txt"), "not a bundle");
    let error = read_bundle_sources(&root).expect_err("empty bundle should fail");
    assert_eq!(error.code, "CLI_BUNDLE_EMPTY");
}

#[test]
fn load_bundle_merges_directory_and_names_bad_files() {
    let bundle = load_bundle(&demo_path("factory")).expect("demo should load");
    assert_eq!(bundle.scenarios.len(), 2);
    assert_eq!(bundle.scenes.len(), 2);
    assert_eq!(bundle.config_or_default().random_seed, Some(42));
    assert_eq!(
        bundle.initial_state.get_path("line.powered"),
        Some(&Value::Bool(false))
    );

    let root = temp_path("broken-bundle");
    write_file(&root.join("broken.json"), "{\"scenarios\": [");
    let error = load_bundle(root.to_string_lossy().as_ref()).expect_err("broken json");
    assert_eq!(error.code, "CLI_BUNDLE_INVALID");
    assert!(error.message.starts_with("broken.json:"));
}

#[test]
fn parse_assignments_reads_json_or_strings() {
    let parsed = parse_assignments(&[
        "count=5".to_string(),
        "label=north wing".to_string(),
        "flags={\"fast\":true}".to_string(),
    ])
    .expect("assignments should parse");
    assert_eq!(parsed["count"], Value::from(5));
    assert_eq!(parsed["label"], Value::from("north wing"));
    assert_eq!(
        parsed["flags"].get_path("fast"),
        Some(&Value::Bool(true))
    );

    let error = parse_assignments(&["novalue".to_string()]).expect_err("missing =");
    assert_eq!(error.code, "CLI_ARG_INVALID");
    let error = parse_assignments(&["=1".to_string()]).expect_err("missing name");
    assert_eq!(error.code, "CLI_ARG_INVALID");
}

#[test]
fn run_cli_from_args_returns_exit_codes() {
    let factory = demo_path("factory");
    let ok = run_cli_from_args([
        "sysadl",
        "scenario",
        "--bundle",
        factory.as_str(),
        "--name",
        "produceBatch",
        "--var",
        "count=5",
    ]);
    assert_eq!(ok, 0);

    let missing = run_cli_from_args([
        "sysadl",
        "scene",
        "--bundle",
        factory.as_str(),
        "--name",
        "Unknown",
    ]);
    assert_eq!(missing, 1);

    let deps = run_cli_from_args(["sysadl", "deps", "--expr", "a.b > 1"]);
    assert_eq!(deps, 0);

    let bad_args = run_cli_from_args(["sysadl", "scenario"]);
    assert_ne!(bad_args, 0);
}

#[test]
fn block_on_drives_timers() {
    let value = block_on(async {
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        7
    })
    .expect("runtime should build");
    assert_eq!(value, 7);
}
