//! Telemetry source tests.
//!
//! Tests verify:
//! - Sources are fetched concurrently and results keep source order
//! - Failures and timeouts degrade to absence facts
//! - A session still diagnoses when some sources fail

use chrono::{TimeZone, Utc};
use dms_doctor::evidence::META_SIGNAL_UNAVAILABLE;
use dms_doctor::source::gather;
use dms_doctor::{
    DiagnosticRequest, DiagnosticSession, DoctorConfig, FakeTelemetrySource, FetchError,
    MetricSample, PayloadBody, RawPayload, SignalKind, TelemetrySource,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn request() -> DiagnosticRequest {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap();
    DiagnosticRequest::new("task-1").with_window(start, end)
}

fn status_source() -> FakeTelemetrySource {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 20, 0).unwrap();
    FakeTelemetrySource::ok(
        "dms",
        SignalKind::Status,
        vec![RawPayload::task_status("dms", at, json!({"Status": "failed"}))],
    )
}

fn metric_source() -> FakeTelemetrySource {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 20, 0).unwrap();
    FakeTelemetrySource::ok(
        "cloudwatch",
        SignalKind::Metric,
        vec![RawPayload::metrics("cloudwatch", at, vec![MetricSample::new("CPUUtilization", 12.0)])],
    )
}

#[tokio::test]
async fn test_gather_keeps_source_order() {
    let slow = FakeTelemetrySource::slow(
        "cloudwatch",
        SignalKind::Metric,
        Duration::from_millis(50),
        metric_source().fetch(&request()).await.unwrap(),
    );
    let sources: Vec<Arc<dyn TelemetrySource>> = vec![slow.into_shared(), status_source().into_shared()];

    let payloads = gather(&sources, &request(), Duration::from_secs(5)).await;
    assert_eq!(payloads.len(), 2);
    assert_eq!(payloads[0].origin, "cloudwatch");
    assert_eq!(payloads[1].origin, "dms");
}

#[tokio::test]
async fn test_failure_becomes_unavailable_payload() {
    let sources: Vec<Arc<dyn TelemetrySource>> = vec![
        FakeTelemetrySource::failing("task-logs", SignalKind::Log, FetchError::Throttled).into_shared(),
        status_source().into_shared(),
    ];
    let payloads = gather(&sources, &request(), Duration::from_secs(5)).await;

    match &payloads[0].body {
        PayloadBody::Unavailable { signal, reason } => {
            assert_eq!(*signal, SignalKind::Log);
            assert_eq!(reason, "request throttled");
        }
        other => panic!("expected unavailable payload, got {:?}", other),
    }
    // Stamped with the window end, not the wall clock
    assert_eq!(payloads[0].observed_at, request().window.unwrap().end);
}

#[tokio::test]
async fn test_timeout_becomes_unavailable_payload() {
    let hung = FakeTelemetrySource::slow("cloudwatch", SignalKind::Metric, Duration::from_secs(30), Vec::new());
    let sources: Vec<Arc<dyn TelemetrySource>> = vec![hung.into_shared()];

    let started = Instant::now();
    let payloads = gather(&sources, &request(), Duration::from_millis(100)).await;
    assert!(started.elapsed() < Duration::from_secs(10));

    match &payloads[0].body {
        PayloadBody::Unavailable { signal, reason } => {
            assert_eq!(*signal, SignalKind::Metric);
            assert!(reason.contains("timed out"));
        }
        other => panic!("expected unavailable payload, got {:?}", other),
    }
}

#[tokio::test]
async fn test_each_source_fetched_once() {
    let source = status_source();
    let handle = source.clone();
    let sources: Vec<Arc<dyn TelemetrySource>> = vec![source.into_shared()];
    gather(&sources, &request(), Duration::from_secs(5)).await;
    assert_eq!(handle.call_count(), 1);
}

#[tokio::test]
async fn test_session_degrades_on_partial_outage() {
    let mut session = DiagnosticSession::new(request(), &DoctorConfig::default()).unwrap();
    let sources: Vec<Arc<dyn TelemetrySource>> = vec![
        status_source().into_shared(),
        FakeTelemetrySource::failing("cloudwatch", SignalKind::Metric, FetchError::AccessDenied("cloudwatch:GetMetricData".into()))
            .into_shared(),
    ];
    let added = session.gather(&sources).await;
    assert!(added > 0);

    let diagnosis = session.diagnose().unwrap();
    assert_eq!(diagnosis.snapshot.meta(META_SIGNAL_UNAVAILABLE).len(), 1);
    assert!(diagnosis
        .report
        .gaps
        .iter()
        .any(|g| g.signal == Some(SignalKind::Metric) && g.message.contains("access denied")));
}

#[tokio::test]
async fn test_all_sources_failing_is_no_evidence() {
    let mut session = DiagnosticSession::new(request(), &DoctorConfig::default()).unwrap();
    let sources: Vec<Arc<dyn TelemetrySource>> = vec![
        FakeTelemetrySource::failing("dms", SignalKind::Status, FetchError::Unavailable("endpoint down".into())).into_shared(),
    ];
    session.gather(&sources).await;
    assert!(session.diagnose().is_err());
}
