//! CLI integration tests

use std::process::{Command, Output};
use tempfile::TempDir;

fn cmodel(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cmodel"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute command")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = cmodel(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("cost model"), "Should show about text");
    assert!(stdout.contains("simulate"), "Should show simulate command");
    assert!(stdout.contains("inspect"), "Should show inspect command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = cmodel(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("cmodel"), "Should show binary name");
}

/// Test simulate subcommand help
#[test]
fn test_simulate_help() {
    let output = cmodel(&["simulate", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Simulate help should succeed");
    assert!(stdout.contains("--rounds"), "Should show rounds option");
    assert!(stdout.contains("--checkpoint"), "Should show checkpoint option");
    assert!(stdout.contains("--model"), "Should show model option");
}

/// Test that an unknown model is rejected
#[test]
fn test_simulate_rejects_unknown_model() {
    let output = cmodel(&["simulate", "--model", "lightgbm"]);
    assert!(!output.status.success());
}

/// Test a short random-model simulation
#[test]
fn test_simulate_random_json() {
    let output = cmodel(&[
        "--format", "json", "simulate", "--model", "random", "--rounds", "2", "--batch", "4",
        "--predict", "6",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report = stdout_json(&output);
    assert_eq!(report["model"], "random");
    assert_eq!(report["rounds"].as_array().unwrap().len(), 2);
    assert_eq!(report["predictions"], 6);
    assert_eq!(report["finite_predictions"], 6);
}

/// Test that an XGB simulation trains, saves, and can be inspected
#[test]
fn test_simulate_then_inspect() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("xgb.ckpt");
    let path_str = path.to_str().unwrap();

    let output = cmodel(&[
        "--format", "json", "simulate", "--model", "xgb", "--rounds", "3", "--batch", "8",
        "--predict", "10", "--warmup", "8", "--checkpoint", path_str,
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report = stdout_json(&output);
    let rounds = report["rounds"].as_array().unwrap();
    assert_eq!(rounds.len(), 3);
    assert_eq!(rounds[2]["trained"], true);
    assert!(path.exists());

    let output = cmodel(&["--format", "json", "inspect", path_str]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let summary = stdout_json(&output);
    assert_eq!(summary["kind"], "xgb");
    assert_eq!(summary["trained"], true);
    assert_eq!(summary["groups"].as_array().unwrap().len(), 1);
    assert_eq!(
        summary["data_size"],
        rounds[2]["samples"],
        "Inspect should report the saved sample count"
    );
}

/// Test table output of inspect
#[test]
fn test_inspect_table() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("random.ckpt");
    let path_str = path.to_str().unwrap();

    let output = cmodel(&[
        "simulate", "--model", "random", "--rounds", "1", "--batch", "2", "--checkpoint", path_str,
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let output = cmodel(&["inspect", path_str]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("random"));
    assert!(stdout.contains("Max range"));
}

/// Test that a missing checkpoint fails cleanly
#[test]
fn test_inspect_missing_checkpoint() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.ckpt");
    let output = cmodel(&["inspect", path.to_str().unwrap()]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to read checkpoint"));
}
