//! End-to-end diagnostic session tests.
//!
//! Tests verify:
//! - The reference scenarios (single fact, corroboration, empty input,
//!   reporting floor)
//! - Built-in library diagnoses realistic DMS telemetry
//! - Configuration errors surface before evaluation
//! - Sequential and parallel diagnosis agree byte for byte

use approx::assert_relative_eq;
use chrono::{DateTime, TimeZone, Utc};
use dms_doctor::collector::keys;
use dms_doctor::{
    format_markdown, format_text, CauseInfo, Condition, DiagnosticRequest, DiagnosticSession,
    DoctorConfig, DoctorError, EvidenceSlot, EvidenceSource, MetricSample, RawPayload, Rule,
    RuleSet, SuppressionReason, TelemetryBundle, Verdict,
};
use serde_json::json;

fn t(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, minute, 0).unwrap()
}

fn task_status(state: &str) -> RawPayload {
    RawPayload::task_status("dms", t(0), json!({ "Status": state }))
}

fn single_rule_set(cause: &str, rules: Vec<Rule>) -> RuleSet {
    RuleSet::new(vec![CauseInfo::new(cause, "Cause X", "Something broke", "test")], rules).unwrap()
}

fn session(rule_set: RuleSet, config: &DoctorConfig) -> DiagnosticSession {
    DiagnosticSession::new(DiagnosticRequest::new("task-1"), config)
        .unwrap()
        .with_rule_set(rule_set)
        .unwrap()
}

#[test]
fn test_single_fact_single_rule() {
    let rule = Rule::new("task_error", "Task error", "X", 0.8)
        .slot(EvidenceSlot::status(keys::TASK_STATE, Condition::equals("error")));
    let mut session = session(single_rule_set("X", vec![rule]), &DoctorConfig::default());
    session.ingest(&[task_status("error")]);

    let diagnosis = session.diagnose().unwrap();
    let report = &diagnosis.report;
    assert_eq!(report.verdict, Verdict::Identified);
    assert_eq!(report.causes.len(), 1);
    assert_relative_eq!(report.causes[0].confidence, 0.8, epsilon = 1e-12);
    assert_eq!(report.causes[0].evidence.len(), 1);
    assert_eq!(report.causes[0].evidence[0].key, keys::TASK_STATE);
}

#[test]
fn test_two_rules_corroborate() {
    let rules = vec![
        Rule::new("a", "a", "X", 0.5).slot(EvidenceSlot::status(keys::TASK_STATE, Condition::equals("failed"))),
        Rule::new("b", "b", "X", 0.4).slot(EvidenceSlot::status(keys::STOP_REASON, Condition::contains("fatal"))),
    ];
    let mut session = session(single_rule_set("X", rules), &DoctorConfig::default());
    session.ingest(&[RawPayload::task_status(
        "dms",
        t(0),
        json!({"Status": "failed", "StopReason": "Stop Reason FATAL_ERROR"}),
    )]);

    let report = session.diagnose().unwrap().report;
    assert_relative_eq!(report.causes[0].confidence, 0.7, epsilon = 1e-12);
    assert_eq!(report.causes[0].rules, vec!["a".to_string(), "b".to_string()]);
    // Same record is not cited twice
    assert_eq!(report.causes[0].evidence.len(), 2);
}

#[test]
fn test_empty_input_is_fatal() {
    let session = DiagnosticSession::new(DiagnosticRequest::new("task-1"), &DoctorConfig::default()).unwrap();
    match session.diagnose() {
        Err(DoctorError::NoEvidenceCollected { task_id }) => assert_eq!(task_id, "task-1"),
        other => panic!("expected NoEvidenceCollected, got {:?}", other.map(|d| d.report)),
    }
}

#[test]
fn test_only_outages_is_fatal() {
    let mut session = DiagnosticSession::new(DiagnosticRequest::new("task-1"), &DoctorConfig::default()).unwrap();
    session.ingest(&[RawPayload::unavailable(
        "cloudwatch",
        t(0),
        dms_doctor::SignalKind::Metric,
        "throttled",
    )]);
    assert!(matches!(session.diagnose(), Err(DoctorError::NoEvidenceCollected { .. })));
}

#[test]
fn test_sparse_input_is_inconclusive_not_error() {
    let mut session = DiagnosticSession::new(DiagnosticRequest::new("task-1"), &DoctorConfig::default()).unwrap();
    session.ingest(&[task_status("running")]);

    let report = session.diagnose().unwrap().report;
    assert!(report.is_inconclusive());
    assert!(report.summary.contains("no root cause identified with sufficient confidence"));
}

#[test]
fn test_below_floor_keeps_evidence() {
    let rule = Rule::new("weak", "weak", "X", 0.25)
        .slot(EvidenceSlot::status(keys::TASK_STATE, Condition::equals("failed")));
    let config = DoctorConfig {
        min_confidence: 0.3,
        ..Default::default()
    };
    let mut session = session(single_rule_set("X", vec![rule]), &config);
    session.ingest(&[task_status("failed")]);

    let diagnosis = session.diagnose().unwrap();
    assert!(diagnosis.report.causes.is_empty());
    assert_eq!(diagnosis.report.suppressed.len(), 1);
    assert_eq!(diagnosis.report.suppressed[0].reason, SuppressionReason::BelowFloor);

    let suppressed = diagnosis.correlation.suppressed_cause("X").unwrap();
    assert_relative_eq!(suppressed.hypothesis.aggregate_confidence, 0.25, epsilon = 1e-12);
    for id in &suppressed.hypothesis.evidence_refs {
        assert!(diagnosis.snapshot.get(*id).is_some());
    }
    assert_eq!(session.fact_base().snapshot().effective(EvidenceSource::Status, keys::TASK_STATE).len(), 1);
}

#[test]
fn test_invalid_config_fails_before_evaluation() {
    let config = DoctorConfig {
        min_confidence: -0.1,
        ..Default::default()
    };
    let err = DiagnosticSession::new(DiagnosticRequest::new("task-1"), &config).err().unwrap();
    assert!(err.is_configuration());
}

#[test]
fn test_inverted_window_is_rejected() {
    let request = DiagnosticRequest::new("task-1").with_window(t(30), t(10));
    let err = DiagnosticSession::new(request, &DoctorConfig::default()).err().unwrap();
    assert!(matches!(err, DoctorError::Configuration(_)));
}

fn failing_source_bundle() -> Vec<RawPayload> {
    vec![
        RawPayload::task_status(
            "dms",
            t(20),
            json!({
                "Status": "failed",
                "LastFailureMessage": "Last Error Task error notification received",
                "ConnectionTests": [
                    {"EndpointType": "source", "EndpointIdentifier": "src-pg", "Status": "failed",
                     "LastFailureMessage": "Connection timed out"},
                    {"EndpointType": "target", "EndpointIdentifier": "tgt-rs", "Status": "successful"}
                ]
            }),
        ),
        RawPayload::logs(
            "task-logs",
            t(20),
            vec![
                "2024-03-01T10:15:32 [SOURCE_CAPTURE  ]E:  Cannot connect to server: connection timed out [1020912]",
                "2024-03-01T10:15:33 [TASK_MANAGER    ]I:  Task is stopping",
            ],
        ),
        RawPayload::metrics(
            "cloudwatch",
            t(20),
            vec![
                MetricSample::new("CPUUtilization", 21.0).at(t(10)),
                MetricSample::new("CPUUtilization", 23.0).at(t(15)),
                MetricSample::new("FreeableMemory", 2048.0 * 1024.0 * 1024.0).at(t(15)),
            ],
        ),
    ]
}

#[test]
fn test_builtin_library_finds_source_outage() {
    let request = DiagnosticRequest::new("task-1").with_window(t(0), t(30));
    let mut session = DiagnosticSession::new(request, &DoctorConfig::default()).unwrap();
    session.ingest(&failing_source_bundle());

    let report = session.diagnose().unwrap().report;
    let top = &report.causes[0];
    assert_eq!(top.cause_id, "source_endpoint_unreachable");
    assert_eq!(top.rank, 1);
    // 1 - (1 - 0.8)(1 - 0.6)
    assert_relative_eq!(top.confidence, 0.92, epsilon = 1e-12);
    assert!(!top.remediation.is_empty());
    assert!(report.cause("replication_instance_unreachable").is_none());

    // Config was never supplied
    assert!(report
        .gaps
        .iter()
        .any(|g| g.message == "no endpoint or task settings were available for this time window"));
}

#[test]
fn test_builtin_library_instance_unreachable_without_metrics() {
    let mut session = DiagnosticSession::new(DiagnosticRequest::new("task-1"), &DoctorConfig::default()).unwrap();
    session.ingest(&[task_status("failed")]);
    let diagnosis = session.diagnose().unwrap();

    let firing = diagnosis
        .firings
        .iter()
        .find(|f| f.rule_id == "status.instance_no_metrics")
        .unwrap();
    // (1.0 + 2.0 * 1.0) / (1 + 2 + 1) of base 0.6
    assert_relative_eq!(firing.confidence, 0.45, epsilon = 1e-12);

    let cause = diagnosis.report.cause("replication_instance_unreachable").unwrap();
    assert!(cause
        .evidence
        .iter()
        .any(|c| c.source == EvidenceSource::Meta && c.value == "metric"));
}

#[test]
fn test_any_metric_rules_out_unreachable_instance() {
    let mut session = DiagnosticSession::new(DiagnosticRequest::new("task-1"), &DoctorConfig::default()).unwrap();
    session.ingest(&[
        task_status("failed"),
        RawPayload::metrics("cloudwatch", t(0), vec![MetricSample::new("FreeableMemory", 4e9)]),
    ]);
    let diagnosis = session.diagnose().unwrap();

    assert!(diagnosis.firings.iter().all(|f| f.rule_id != "status.instance_no_metrics"));
    assert!(diagnosis.report.cause("replication_instance_unreachable").is_none());
    assert!(diagnosis.correlation.suppressed_cause("replication_instance_unreachable").is_none());
}

#[test]
fn test_injected_empty_rule_set_is_rejected() {
    let session = DiagnosticSession::new(DiagnosticRequest::new("task-1"), &DoctorConfig::default()).unwrap();
    let err = session.with_rule_set(RuleSet::default()).err().unwrap();
    assert!(matches!(err, DoctorError::Configuration(_)));
}

#[test]
fn test_injected_rule_set_ignores_disabled_list() {
    // Disabling a built-in rule does not touch an injected library
    let config = DoctorConfig::from_toml_str("[rules]\ndisabled = [\"status.instance_no_metrics\"]\n").unwrap();
    let rule = Rule::new("task_error", "Task error", "X", 0.8)
        .slot(EvidenceSlot::status(keys::TASK_STATE, Condition::equals("error")));
    let mut session = session(single_rule_set("X", vec![rule]), &config);
    session.ingest(&[task_status("error")]);

    assert_eq!(session.rule_set().len(), 1);
    assert_eq!(session.diagnose().unwrap().report.causes[0].cause_id, "X");
}

#[test]
fn test_repeated_diagnosis_is_identical() {
    let mut session = DiagnosticSession::new(DiagnosticRequest::new("task-1"), &DoctorConfig::default()).unwrap();
    session.ingest(&failing_source_bundle());

    let first = session.diagnose().unwrap().report;
    let second = session.diagnose().unwrap().report;
    assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    assert_eq!(format_text(&first), format_text(&second));
    assert_eq!(format_markdown(&first), format_markdown(&second));
}

#[tokio::test]
async fn test_parallel_diagnosis_matches_sequential() {
    for workers in [1, 3, 16] {
        let config = DoctorConfig {
            evaluation_workers: workers,
            ..Default::default()
        };
        let mut session = DiagnosticSession::new(DiagnosticRequest::new("task-1"), &config).unwrap();
        session.ingest(&failing_source_bundle());

        let sequential = session.diagnose().unwrap();
        let parallel = session.diagnose_parallel().await.unwrap();
        assert_eq!(parallel.firings, sequential.firings);
        assert_eq!(parallel.report.to_json().unwrap(), sequential.report.to_json().unwrap());
    }
}

#[test]
fn test_incremental_ingest() {
    let mut session = DiagnosticSession::new(DiagnosticRequest::new("task-1"), &DoctorConfig::default()).unwrap();
    let bundle = failing_source_bundle();
    let first = session.ingest(&bundle[..1]);
    let second = session.ingest(&bundle[1..]);
    assert!(first > 0 && second > 0);
    assert_eq!(session.fact_base().len(), first + second);

    // Absence facts are added to the evaluated snapshot only
    let diagnosis = session.diagnose().unwrap();
    assert!(diagnosis.snapshot.len() > session.fact_base().len());
}

#[test]
fn test_bundle_round_trip() {
    let bundle: TelemetryBundle = serde_json::from_value(json!({
        "task_id": "arn:aws:dms:us-east-1:123456789012:task:ABC",
        "window": {"start": "2024-03-01T10:00:00Z", "end": "2024-03-01T10:30:00Z"},
        "payloads": [
            {"origin": "dms", "observed_at": "2024-03-01T10:20:00Z", "kind": "task_status",
             "status": {"Status": "running"}}
        ]
    }))
    .unwrap();
    assert_eq!(bundle.request.window.unwrap().end, t(30));
    assert_eq!(bundle.payloads.len(), 1);
}
