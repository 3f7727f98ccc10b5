use std::path::PathBuf;
use std::process::{Command, Output};

fn demos_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("demos")
}

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sysadl"))
        .args(args)
        .output()
        .expect("cli should execute")
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn assert_ok(output: &Output) -> String {
    let stdout = stdout_of(output);
    if !output.status.success() {
        panic!(
            "command failed\nstdout:\n{}\nstderr:\n{}",
            stdout,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    assert!(stdout.starts_with("RESULT:OK"), "stdout: {}", stdout);
    stdout
}

#[test]
fn scenario_breaks_out_of_batch_loop() {
    let factory = demos_root().join("factory");
    let output = run(&[
        "scenario",
        "--bundle",
        factory.to_string_lossy().as_ref(),
        "--name",
        "produceBatch",
        "--var",
        "count=5",
    ]);
    let stdout = assert_ok(&output);
    assert!(stdout.contains("CONTROL_FLOW:return"));
    assert!(stdout.contains("RESULT_JSON:3"));
    assert!(stdout.contains("\"itemsProduced\":3"));
}

#[test]
fn scenario_triggers_event_and_waits_for_state() {
    let factory = demos_root().join("factory");
    let output = run(&[
        "scenario",
        "--bundle",
        factory.to_string_lossy().as_ref(),
        "--name",
        "powerUp",
    ]);
    let stdout = assert_ok(&output);
    assert!(stdout.contains("RESULT_JSON:true"));
}

#[test]
fn single_file_bundle_runs_while_loop() {
    let thermostat = demos_root().join("thermostat.json");
    let output = run(&[
        "scenario",
        "--bundle",
        thermostat.to_string_lossy().as_ref(),
        "--name",
        "heatUp",
        "--var",
        "target=18",
    ]);
    let stdout = assert_ok(&output);
    assert!(stdout.contains("RESULT_JSON:18"));
}

#[test]
fn scene_completes_through_declarative_rule() {
    let factory = demos_root().join("factory");
    let output = run(&[
        "scene",
        "--bundle",
        factory.to_string_lossy().as_ref(),
        "--name",
        "StartLine",
        "--show-log",
    ]);
    let stdout = assert_ok(&output);
    assert!(stdout.contains("SUCCESS:true"));
    assert!(stdout.contains("\"powered\":true"));
    assert!(stdout.contains("LOG_JSON:"));
    assert!(stdout.contains("\"what\":\"scene.completed\""));
}

#[test]
fn scene_times_out_when_rule_trigger_is_false() {
    let factory = demos_root().join("factory");
    let output = run(&[
        "scene",
        "--bundle",
        factory.to_string_lossy().as_ref(),
        "--name",
        "ProduceOne",
    ]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = stdout_of(&output);
    assert!(stdout.contains("RESULT:ERROR"));
    assert!(stdout.contains("ERROR_CODE:SCENE_TIMEOUT"));
}

#[test]
fn unknown_scene_reports_error_code() {
    let factory = demos_root().join("factory");
    let output = run(&[
        "scene",
        "--bundle",
        factory.to_string_lossy().as_ref(),
        "--name",
        "Missing",
    ]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = stdout_of(&output);
    assert!(stdout.contains("ERROR_CODE:SCENE_NOT_FOUND"));
}

#[test]
fn deps_prints_paths_in_order() {
    let output = run(&["deps", "--expr", "line.powered && sensors.temp > 40"]);
    let stdout = assert_ok(&output);
    assert!(stdout.contains("DEPENDENCIES_JSON:[\"line.powered\",\"sensors.temp\"]"));
}

#[test]
fn list_shows_bundle_contents() {
    let factory = demos_root().join("factory");
    let output = run(&["list", "--bundle", factory.to_string_lossy().as_ref()]);
    let stdout = assert_ok(&output);
    assert!(stdout.contains("SCENARIO:produceBatch"));
    assert!(stdout.contains("SCENE:StartLine|PowerOn|LinePowered"));
    assert!(stdout.contains("EVENT:FactoryEvents.PowerOn|1"));
}
