use assert_cmd::Command;
use indoc::indoc;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn actorforge_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("actorforge"))
}

const PIPE: &str = indoc! {"
    name: top
    entities:
      - { kind: atomic, name: source, class: Const, parameters: { value: '5' } }
      - { kind: atomic, name: sink, class: Recorder }
    relations:
      - { name: r, width: 1, bufferSize: 1, links: [source.output, sink.input] }
"};

const ZERO_WIDTH: &str = indoc! {"
    name: top
    entities:
      - { kind: atomic, name: source, class: Const }
      - { kind: atomic, name: sink, class: Discard }
    relations:
      - { name: r, width: 0, bufferSize: 1, links: [source.output, sink.input] }
"};

const CYCLE: &str = indoc! {"
    name: top
    entities:
      - { kind: atomic, name: left, class: Scale }
      - { kind: atomic, name: right, class: Scale }
    connections:
      - { from: left.output, to: right.input, bufferSize: 1 }
      - { from: right.output, to: left.input, bufferSize: 1 }
"};

fn write_model(dir: &TempDir, name: &str, yaml: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, yaml).unwrap();
    path
}

#[test]
fn test_prints_generated_classes() {
    let dir = TempDir::new().unwrap();
    let model = write_model(&dir, "pipe.yaml", PIPE);

    actorforge_cmd()
        .arg(&model)
        .assert()
        .success()
        .stdout(predicate::str::contains("class generated.top extends Object"))
        .stdout(predicate::str::contains("class generated.Main"));
}

#[test]
fn test_package_override() {
    let dir = TempDir::new().unwrap();
    let model = write_model(&dir, "pipe.yaml", PIPE);

    actorforge_cmd()
        .arg(&model)
        .arg("--package")
        .arg("demo")
        .assert()
        .success()
        .stdout(predicate::str::contains("class demo.Main"));
}

#[test]
fn test_output_file() {
    let dir = TempDir::new().unwrap();
    let model = write_model(&dir, "pipe.yaml", PIPE);
    let out = dir.path().join("pipe.ir");

    actorforge_cmd()
        .arg(&model)
        .arg("--output")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let listing = fs::read_to_string(&out).unwrap();
    assert!(listing.contains("_CGbuffer_"));
}

#[test]
fn test_trace_reports_buffer_traffic() {
    let dir = TempDir::new().unwrap();
    let model = write_model(&dir, "pipe.yaml", PIPE);

    let output = actorforge_cmd()
        .arg(&model)
        .args(["--quiet", "--trace", "--iterations", "3"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let trace: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let stores: u64 = trace["stores"]
        .as_object()
        .unwrap()
        .iter()
        .filter(|(name, _)| name.starts_with("_CGbuffer_"))
        .map(|(_, n)| n.as_u64().unwrap())
        .sum();
    assert_eq!(stores, 3);
}

#[test]
fn test_config_file_sets_iterations() {
    let dir = TempDir::new().unwrap();
    let model = write_model(&dir, "pipe.yaml", PIPE);
    let config = dir.path().join("actorforge.yaml");
    fs::write(&config, "iterations: 2\ntargetPackage: fromfile\n").unwrap();

    actorforge_cmd()
        .arg(&model)
        .arg("--config")
        .arg(&config)
        .args(["--quiet", "--run"])
        .assert()
        .success();

    actorforge_cmd()
        .arg(&model)
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("class fromfile.Main"));
}

#[test]
fn test_specialization_error_exits_with_one() {
    let dir = TempDir::new().unwrap();
    let model = write_model(&dir, "cycle.yaml", CYCLE);

    actorforge_cmd()
        .arg(&model)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("cycle"));
}

#[test]
fn test_runtime_error_exits_with_two() {
    let dir = TempDir::new().unwrap();
    let model = write_model(&dir, "zero.yaml", ZERO_WIDTH);

    actorforge_cmd()
        .arg(&model)
        .args(["--quiet", "--run", "--iterations", "1"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("width zero"));
}

#[test]
fn test_watchdog_exits_with_three() {
    let dir = TempDir::new().unwrap();
    let model = write_model(&dir, "pipe.yaml", PIPE);

    // Without an iteration cap the harness never stops on its own.
    actorforge_cmd()
        .arg(&model)
        .args(["--quiet", "--run", "--watchdog", "1"])
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .code(3)
        .stderr(predicate::str::contains("watchdog expired"));
}

#[test]
fn test_missing_model_fails() {
    let dir = TempDir::new().unwrap();

    actorforge_cmd()
        .arg(dir.path().join("absent.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load model"));
}

#[test]
fn test_bad_mode_is_rejected_by_argument_parsing() {
    let dir = TempDir::new().unwrap();
    let model = write_model(&dir, "pipe.yaml", PIPE);

    actorforge_cmd()
        .arg(&model)
        .args(["--mode", "sideways"])
        .assert()
        .failure();
}
