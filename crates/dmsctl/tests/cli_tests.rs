//! CLI integration tests for dmsctl
//!
//! Runs the built binary against bundles written to a temp dir:
//! - dmsctl diagnose       text, markdown and json output, exit codes
//! - dmsctl rules          library listing
//! - dmsctl check-config   effective settings, config errors

use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn dmsctl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dmsctl"))
        .args(args)
        .env_remove("DMS_DOCTOR_CONFIG")
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1")
        .output()
        .expect("failed to run dmsctl")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn source_outage_bundle() -> Value {
    json!({
        "task_id": "task-1",
        "window": {"start": "2024-03-01T10:00:00Z", "end": "2024-03-01T10:30:00Z"},
        "payloads": [
            {"origin": "dms", "observed_at": "2024-03-01T10:20:00Z", "kind": "task_status",
             "status": {
                "Status": "failed",
                "LastFailureMessage": "Last Error Task error notification received",
                "ConnectionTests": [
                    {"EndpointType": "source", "EndpointIdentifier": "src-pg", "Status": "failed",
                     "LastFailureMessage": "Connection timed out"},
                    {"EndpointType": "target", "EndpointIdentifier": "tgt-rs", "Status": "successful"}
                ]
             }},
            {"origin": "task-logs", "observed_at": "2024-03-01T10:20:00Z", "kind": "logs",
             "lines": [
                "2024-03-01T10:15:32 [SOURCE_CAPTURE  ]E:  Cannot connect to server: connection timed out [1020912]",
                "2024-03-01T10:15:33 [TASK_MANAGER    ]I:  Task is stopping"
             ]},
            {"origin": "cloudwatch", "observed_at": "2024-03-01T10:20:00Z", "kind": "metrics",
             "samples": [
                {"name": "CPUUtilization", "value": 21.0, "timestamp": "2024-03-01T10:10:00Z"},
                {"name": "CPUUtilization", "value": 23.0, "timestamp": "2024-03-01T10:15:00Z"}
             ]}
        ]
    })
}

fn bundle_file(dir: &TempDir, bundle: &Value) -> String {
    write(dir.path(), "bundle.json", &bundle.to_string()).display().to_string()
}

fn report_json(output: &Output) -> Value {
    serde_json::from_str(&stdout(output)).expect("stdout is not JSON")
}

#[test]
fn test_diagnose_json_identifies_source_outage() {
    let dir = TempDir::new().unwrap();
    let input = bundle_file(&dir, &source_outage_bundle());

    let output = dmsctl(&["diagnose", "--input", &input, "--format", "json"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));

    let report = report_json(&output);
    assert_eq!(report["verdict"], "identified");
    assert_eq!(report["task_id"], "task-1");
    assert_eq!(report["causes"][0]["cause_id"], "source_endpoint_unreachable");
    assert_eq!(report["causes"][0]["rank"], 1);
}

#[test]
fn test_diagnose_text_is_plain_when_piped() {
    let dir = TempDir::new().unwrap();
    let input = bundle_file(&dir, &source_outage_bundle());

    let output = dmsctl(&["diagnose", "--input", &input]);
    assert_eq!(output.status.code(), Some(0));
    let text = stdout(&output);
    assert!(text.starts_with("DIAGNOSTIC REPORT"));
    assert!(text.contains("Verdict: IDENTIFIED"));
    assert!(text.contains("PROBABLE CAUSES"));
    assert!(!text.contains('\u{1b}'), "unexpected ANSI escapes");
}

#[test]
fn test_diagnose_markdown() {
    let dir = TempDir::new().unwrap();
    let input = bundle_file(&dir, &source_outage_bundle());

    let output = dmsctl(&["diagnose", "--input", &input, "--format", "markdown"]);
    assert_eq!(output.status.code(), Some(0));
    let text = stdout(&output);
    assert!(text.starts_with("# Diagnostic Report: task-1"));
    assert!(text.contains("| Id | Evidence | Value | Observed |"));
}

#[test]
fn test_parallel_output_matches_sequential() {
    let dir = TempDir::new().unwrap();
    let input = bundle_file(&dir, &source_outage_bundle());

    let sequential = dmsctl(&["diagnose", "--input", &input, "--format", "json"]);
    let parallel = dmsctl(&["diagnose", "--input", &input, "--format", "json", "--parallel"]);
    assert_eq!(parallel.status.code(), Some(0));
    assert_eq!(stdout(&sequential), stdout(&parallel));
}

#[test]
fn test_task_override() {
    let dir = TempDir::new().unwrap();
    let input = bundle_file(&dir, &source_outage_bundle());

    let output = dmsctl(&["diagnose", "--input", &input, "--format", "json", "--task", "task-override"]);
    assert_eq!(report_json(&output)["task_id"], "task-override");
}

#[test]
fn test_inconclusive_still_exits_zero() {
    let dir = TempDir::new().unwrap();
    let input = bundle_file(&dir, &source_outage_bundle());

    let output = dmsctl(&["diagnose", "--input", &input, "--format", "json", "--min-confidence", "1.0"]);
    assert_eq!(output.status.code(), Some(0));
    let report = report_json(&output);
    assert_eq!(report["verdict"], "inconclusive");
    assert!(report["causes"].as_array().unwrap().is_empty());
    assert!(!report["suppressed"].as_array().unwrap().is_empty());
}

#[test]
fn test_no_evidence_exit_code() {
    let dir = TempDir::new().unwrap();
    let bundle = json!({
        "task_id": "task-1",
        "payloads": [
            {"origin": "cloudwatch", "observed_at": "2024-03-01T10:20:00Z", "kind": "unavailable",
             "signal": "metric", "reason": "request throttled"}
        ]
    });
    let input = bundle_file(&dir, &bundle);

    let output = dmsctl(&["diagnose", "--input", &input]);
    assert_eq!(output.status.code(), Some(66));
    assert!(stderr(&output).contains("No evidence collected"));
    assert!(stdout(&output).is_empty());
}

#[test]
fn test_invalid_bundle_exit_code() {
    let dir = TempDir::new().unwrap();
    let input = write(dir.path(), "bundle.json", "{ not json").display().to_string();

    let output = dmsctl(&["diagnose", "--input", &input]);
    assert_eq!(output.status.code(), Some(65));
    assert!(stderr(&output).contains("invalid telemetry bundle"));
}

#[test]
fn test_missing_bundle_exit_code() {
    let output = dmsctl(&["diagnose", "--input", "/nonexistent/bundle.json"]);
    assert_eq!(output.status.code(), Some(65));
}

#[test]
fn test_invalid_config_exit_code() {
    let dir = TempDir::new().unwrap();
    let input = bundle_file(&dir, &source_outage_bundle());
    let config = write(dir.path(), "doctor.toml", "max_hypotheses = 0\n").display().to_string();

    let output = dmsctl(&["diagnose", "--input", &input, "--config", &config]);
    assert_eq!(output.status.code(), Some(78));
    assert!(stderr(&output).contains("max_hypotheses"));
}

#[test]
fn test_config_from_environment() {
    let dir = TempDir::new().unwrap();
    let config = write(dir.path(), "doctor.toml", "min_confidence = 7\n");

    let output = Command::new(env!("CARGO_BIN_EXE_dmsctl"))
        .arg("check-config")
        .env("DMS_DOCTOR_CONFIG", &config)
        .env("NO_COLOR", "1")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(78));
}

#[test]
fn test_out_of_range_flag_is_config_error() {
    let dir = TempDir::new().unwrap();
    let input = bundle_file(&dir, &source_outage_bundle());

    let output = dmsctl(&["diagnose", "--input", &input, "--min-confidence", "1.5"]);
    assert_eq!(output.status.code(), Some(78));
}

#[test]
fn test_rules_listing() {
    let output = dmsctl(&["rules"]);
    assert_eq!(output.status.code(), Some(0));
    let text = stdout(&output);
    assert!(text.starts_with("RULES ("));
    assert!(text.contains("source_endpoint_unreachable"));
    assert!(text.contains("status.source_connection_failed"));
}

#[test]
fn test_rules_json_is_a_library() {
    let output = dmsctl(&["rules", "--json"]);
    assert_eq!(output.status.code(), Some(0));
    let library = report_json(&output);
    assert!(!library["cause"].as_array().unwrap().is_empty());
    assert!(!library["rule"].as_array().unwrap().is_empty());
}

#[test]
fn test_check_config_disabling_rules() {
    let dir = TempDir::new().unwrap();
    let config = write(
        dir.path(),
        "doctor.toml",
        "[rules]\ndisabled = [\"log.source_reader_warning\"]\n",
    )
    .display()
    .to_string();

    let output = dmsctl(&["check-config", "--config", &config]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    let text = stdout(&output);
    assert!(text.starts_with("[OK] configuration valid"));
    assert!(text.contains("log.source_reader_warning"));
    assert!(text.contains("min_confidence"));
}

#[test]
fn test_check_config_unknown_rule() {
    let dir = TempDir::new().unwrap();
    let config = write(dir.path(), "doctor.toml", "[rules]\ndisabled = [\"no.such.rule\"]\n")
        .display()
        .to_string();

    let output = dmsctl(&["check-config", "--config", &config]);
    assert_eq!(output.status.code(), Some(78));
    assert!(stderr(&output).contains("no.such.rule"));
}
