//! CLI integration tests

use std::process::{Command, Output};

/// Run the CLI with an isolated config directory
fn asctl(args: &[&str]) -> Output {
    let config_home = tempfile::tempdir().expect("Failed to create temp dir");
    Command::new("cargo")
        .args(["run", "-q", "-p", "asctl-cli", "--"])
        .args(args)
        .env("XDG_CONFIG_HOME", config_home.path())
        .env("HOME", config_home.path())
        .env_remove("ASCTL_API_URL")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = asctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Pipeline Autoscaler"), "Should show app name");
    assert!(stdout.contains("status"), "Should show status command");
    assert!(stdout.contains("metrics"), "Should show metrics command");
    assert!(stdout.contains("events"), "Should show events command");
    assert!(stdout.contains("scale"), "Should show scale command");
    assert!(stdout.contains("config"), "Should show config command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = asctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("asctl"), "Should show binary name");
}

/// Test global options
#[test]
fn test_global_options() {
    let output = asctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--api-url"), "Should show api-url option");
    assert!(stdout.contains("ASCTL_API_URL"), "Should show env var");
    assert!(stdout.contains("--format"), "Should show format option");
}

#[test]
fn test_events_help() {
    let output = asctl(&["events", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Events help should succeed");
    assert!(stdout.contains("--limit"), "Should show limit option");
    assert!(stdout.contains("--since"), "Should show since option");
}

#[test]
fn test_scale_help() {
    let output = asctl(&["scale", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Scale help should succeed");
    assert!(stdout.contains("<TARGET>"), "Should show target argument");
    assert!(stdout.contains("--reason"), "Should show reason option");
}

#[test]
fn test_config_set_requires_assignments() {
    let output = asctl(&["config", "set"]);

    assert!(!output.status.success(), "Missing assignments should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("required") || stderr.contains("error"),
        "Should show error about missing argument"
    );
}

#[test]
fn test_scale_rejects_non_numeric_target() {
    let output = asctl(&["scale", "many"]);

    assert!(!output.status.success(), "Non-numeric target should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid value"), "Should explain the bad value");
}

/// Test invalid command error handling
#[test]
fn test_invalid_command() {
    let output = asctl(&["invalid-command"]);

    assert!(!output.status.success(), "Invalid command should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error") || stderr.contains("invalid"),
        "Should show error message"
    );
}

/// Status against a mocked daemon, JSON output
#[test]
fn test_status_against_mock_server() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api/v1/status")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "running": true,
                "region": "us-west-2",
                "monitoring_interval_secs": 60,
                "auto_scaling_enabled": true,
                "cost_limit_per_hour": 10.0,
                "current_hourly_cost": 2.104,
                "running_instances": 2,
                "last_scaling_at": "2024-05-01T13:00:00Z",
                "total_events": 3,
                "recent_events": []
            }"#,
        )
        .create();

    let url = server.url();
    let output = asctl(&["--api-url", &url, "--format", "json", "status"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    mock.assert();
    assert!(output.status.success(), "Status should succeed");
    let status: serde_json::Value = serde_json::from_str(&stdout).expect("JSON output");
    assert_eq!(status["running_instances"], 2);
    assert_eq!(status["region"], "us-west-2");
}

/// A rejected scale request exits non-zero with the server's message
#[test]
fn test_scale_rejection_is_reported() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("POST", "/api/v1/scale")
        .with_status(422)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"safety limit exceeded: target 15 above ceiling 10"}"#)
        .create();

    let url = server.url();
    let output = asctl(&["--api-url", &url, "scale", "15"]);

    assert!(!output.status.success(), "Rejected scale should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("safety limit exceeded"));
}
