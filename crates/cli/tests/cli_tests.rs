//! CLI integration tests

use std::process::{Command, Output};

fn dpa(args: &[&str]) -> Output {
    Command::new("cargo")
        .args(["run", "-q", "-p", "dpa-cli", "--"])
        .args(args)
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = dpa(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Disk Pressure Agent"), "Should show app name");
    assert!(stdout.contains("status"), "Should show status command");
    assert!(stdout.contains("events"), "Should show events command");
    assert!(stdout.contains("cycles"), "Should show cycles command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = dpa(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("dpa"), "Should show binary name");
}

/// Test events subcommand help
#[test]
fn test_events_help() {
    let output = dpa(&["events", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Events help should succeed");
    assert!(stdout.contains("--kind"), "Should show kind option");
    assert!(stdout.contains("--limit"), "Should show limit option");
}

/// Test global options
#[test]
fn test_global_options() {
    let output = dpa(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--format"), "Should show format option");
    assert!(stdout.contains("table"), "Should show table format");
    assert!(stdout.contains("json"), "Should show json format");
    assert!(stdout.contains("--api-url"), "Should show api-url option");
    assert!(stdout.contains("DPA_API_URL"), "Should show env var");
}

/// Test invalid command error handling
#[test]
fn test_invalid_command() {
    let output = dpa(&["invalid-command"]);

    assert!(!output.status.success(), "Invalid command should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error") || stderr.contains("invalid"),
        "Should show error message"
    );
}

/// Test that an unreachable agent is reported as an error
#[test]
fn test_unreachable_agent() {
    let output = dpa(&["--api-url", "http://127.0.0.1:1", "status"]);

    assert!(!output.status.success(), "Unreachable agent should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Failed to send request"),
        "Should explain the request failure"
    );
}
