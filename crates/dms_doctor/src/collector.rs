//! Signal Collector
//!
//! Normalizes raw task telemetry (CloudWatch metric samples, task log
//! batches, endpoint/task settings, `DescribeReplicationTasks`-shaped status
//! snapshots) into evidence records.
//!
//! The collector never fails. Malformed payloads yield whatever records
//! could be parsed plus one `meta/parseError` fact, and every signal kind
//! that produced nothing is recorded as `meta/missingSignal` so rules can
//! treat absence as evidence.

use crate::evidence::{
    Evidence, EvidenceSource, EvidenceValue, META_MISSING_SIGNAL, META_PARSE_ERROR,
    META_SIGNAL_UNAVAILABLE,
};
use crate::fact_base::FactBase;
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Default confidence multiplier for records observed outside the window
pub const DEFAULT_OUT_OF_WINDOW_FACTOR: f64 = 0.5;

/// Confidence of a metric value that had to be coerced from a string
pub const COERCED_VALUE_CONFIDENCE: f64 = 0.9;

/// Confidence of a log line that did not match the task log layout
pub const UNSTRUCTURED_LOG_CONFIDENCE: f64 = 0.6;

/// Confidence of a structured log line whose timestamp could not be read
pub const UNDATED_LOG_CONFIDENCE: f64 = 0.8;

/// Nested config objects deeper than this are not flattened
const MAX_CONFIG_DEPTH: usize = 8;

/// Evidence keys produced by the collector
pub mod keys {
    pub const TASK_STATE: &str = "taskState";
    pub const STOP_REASON: &str = "stopReason";
    pub const LAST_FAILURE_MESSAGE: &str = "lastFailureMessage";
    pub const MIGRATION_TYPE: &str = "migrationType";
    pub const FULL_LOAD_PROGRESS: &str = "fullLoadProgressPercent";
    pub const TABLES_LOADED: &str = "tablesLoaded";
    pub const TABLES_LOADING: &str = "tablesLoading";
    pub const TABLES_QUEUED: &str = "tablesQueued";
    pub const TABLES_ERRORED: &str = "tablesErrored";
    pub const ELAPSED_TIME_MILLIS: &str = "elapsedTimeMillis";
    pub const SOURCE_CONNECTION: &str = "sourceConnection";
    pub const TARGET_CONNECTION: &str = "targetConnection";
    pub const SOURCE_CONNECTION_FAILURE: &str = "sourceConnectionFailure";
    pub const TARGET_CONNECTION_FAILURE: &str = "targetConnectionFailure";
    pub const TABLE_STATE: &str = "tableState";
    pub const FULL_LOAD_ERROR_ROWS: &str = "fullLoadErrorRows";
    pub const VALIDATION_STATE: &str = "validationState";

    pub const LOG_ERROR: &str = "error";
    pub const LOG_WARNING: &str = "warning";
    pub const LOG_INFO: &str = "info";
    pub const LOG_DEBUG: &str = "debug";
    pub const LOG_TRACE: &str = "trace";
    pub const LOG_ERROR_CODE: &str = "errorCode";
    pub const LOG_UNSTRUCTURED: &str = "unstructured";
}

/// Task log layout: `2024-03-01T10:15:32 [SOURCE_CAPTURE  ]E:  message`
static LOG_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<ts>\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?)\s+\[(?P<component>[A-Za-z0-9_]+)\s*\](?P<sev>[IWEDT])[A-Za-z]*:\s*(?P<msg>.*?)\s*$",
    )
    .expect("log line pattern is valid")
});

/// Bracketed DMS error codes, e.g. `[1020912]`
static DMS_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(?P<code>\d{6,8})\]").expect("error code pattern is valid"));

/// Oracle error codes, e.g. `ORA-01031`
static ORA_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?P<code>ORA-\d{5})\b").expect("ORA code pattern is valid"));

/// Kind of telemetry signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Metric,
    Log,
    Config,
    Status,
}

impl SignalKind {
    pub const ALL: [SignalKind; 4] = [
        SignalKind::Metric,
        SignalKind::Log,
        SignalKind::Config,
        SignalKind::Status,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Metric => "metric",
            SignalKind::Log => "log",
            SignalKind::Config => "config",
            SignalKind::Status => "status",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "metric" | "metrics" => Some(SignalKind::Metric),
            "log" | "logs" => Some(SignalKind::Log),
            "config" => Some(SignalKind::Config),
            "status" => Some(SignalKind::Status),
            _ => None,
        }
    }

    pub fn source(&self) -> EvidenceSource {
        match self {
            SignalKind::Metric => EvidenceSource::Metric,
            SignalKind::Log => EvidenceSource::Log,
            SignalKind::Config => EvidenceSource::Config,
            SignalKind::Status => EvidenceSource::Status,
        }
    }

    pub fn from_source(source: EvidenceSource) -> Option<Self> {
        match source {
            EvidenceSource::Metric => Some(SignalKind::Metric),
            EvidenceSource::Log => Some(SignalKind::Log),
            EvidenceSource::Config => Some(SignalKind::Config),
            EvidenceSource::Status => Some(SignalKind::Status),
            EvidenceSource::Meta => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic time window (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }
}

/// One raw telemetry payload as fetched from a data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPayload {
    /// Data source that produced it (e.g. "cloudwatch", "task-logs")
    pub origin: String,
    pub observed_at: DateTime<Utc>,
    #[serde(flatten)]
    pub body: PayloadBody,
}

/// Payload contents. Inner items stay as raw JSON so that one bad entry
/// does not reject the whole payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadBody {
    Metrics {
        #[serde(default)]
        samples: Vec<Value>,
    },
    Logs {
        #[serde(default)]
        lines: Vec<Value>,
    },
    Config {
        #[serde(default)]
        entries: Map<String, Value>,
    },
    TaskStatus {
        status: Value,
    },
    /// The source was queried but timed out or failed
    Unavailable { signal: SignalKind, reason: String },
}

impl PayloadBody {
    pub fn signal(&self) -> SignalKind {
        match self {
            PayloadBody::Metrics { .. } => SignalKind::Metric,
            PayloadBody::Logs { .. } => SignalKind::Log,
            PayloadBody::Config { .. } => SignalKind::Config,
            PayloadBody::TaskStatus { .. } => SignalKind::Status,
            PayloadBody::Unavailable { signal, .. } => *signal,
        }
    }
}

/// Typed metric sample, converted to raw JSON by `RawPayload::metrics`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<String>,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp: None,
            dimension: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

impl RawPayload {
    pub fn new(origin: impl Into<String>, observed_at: DateTime<Utc>, body: PayloadBody) -> Self {
        Self {
            origin: origin.into(),
            observed_at,
            body,
        }
    }

    pub fn metrics(origin: impl Into<String>, observed_at: DateTime<Utc>, samples: Vec<MetricSample>) -> Self {
        let samples = samples
            .into_iter()
            .filter_map(|s| serde_json::to_value(s).ok())
            .collect();
        Self::new(origin, observed_at, PayloadBody::Metrics { samples })
    }

    pub fn logs<S: Into<String>>(origin: impl Into<String>, observed_at: DateTime<Utc>, lines: Vec<S>) -> Self {
        let lines = lines.into_iter().map(|l| Value::String(l.into())).collect();
        Self::new(origin, observed_at, PayloadBody::Logs { lines })
    }

    pub fn config(origin: impl Into<String>, observed_at: DateTime<Utc>, entries: Value) -> Self {
        let entries = match entries {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self::new(origin, observed_at, PayloadBody::Config { entries })
    }

    pub fn task_status(origin: impl Into<String>, observed_at: DateTime<Utc>, status: Value) -> Self {
        Self::new(origin, observed_at, PayloadBody::TaskStatus { status })
    }

    pub fn unavailable(
        origin: impl Into<String>,
        observed_at: DateTime<Utc>,
        signal: SignalKind,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            origin,
            observed_at,
            PayloadBody::Unavailable {
                signal,
                reason: reason.into(),
            },
        )
    }
}

/// What happened to one payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayloadOutcome {
    pub records: usize,
    pub failures: usize,
    pub items: usize,
}

/// Normalizes raw payloads into a fact base
#[derive(Debug, Clone)]
pub struct Collector {
    window: Option<TimeWindow>,
    out_of_window_factor: f64,
}

impl Default for Collector {
    fn default() -> Self {
        Self {
            window: None,
            out_of_window_factor: DEFAULT_OUT_OF_WINDOW_FACTOR,
        }
    }
}

/// Collect with default settings (no window)
pub fn collect(payloads: &[RawPayload]) -> FactBase {
    Collector::new().collect(payloads)
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(mut self, window: Option<TimeWindow>) -> Self {
        self.window = window;
        self
    }

    pub fn with_out_of_window_factor(mut self, factor: f64) -> Self {
        self.out_of_window_factor = factor;
        self
    }

    /// Collect a finite set of payloads, then record absences
    pub fn collect(&self, payloads: &[RawPayload]) -> FactBase {
        let mut base = FactBase::new();
        for payload in payloads {
            self.collect_into(&mut base, payload);
        }
        let at = self.absence_timestamp(payloads);
        self.record_absences(&mut base, at);
        debug!(
            payloads = payloads.len(),
            records = base.len(),
            observed = base.observed_count(),
            "collection finished"
        );
        base
    }

    /// Normalize one payload into `base`
    pub fn collect_into(&self, base: &mut FactBase, payload: &RawPayload) -> PayloadOutcome {
        let mut sink = Sink {
            collector: self,
            base,
            outcome: PayloadOutcome::default(),
        };

        match &payload.body {
            PayloadBody::Metrics { samples } => sink.metrics(payload, samples),
            PayloadBody::Logs { lines } => sink.logs(payload, lines),
            PayloadBody::Config { entries } => sink.config(payload, entries),
            PayloadBody::TaskStatus { status } => sink.task_status(payload, status),
            PayloadBody::Unavailable { signal, reason } => {
                warn!(origin = %payload.origin, signal = %signal, reason = %reason, "signal unavailable");
                let evidence = Evidence::new(
                    EvidenceSource::Meta,
                    META_SIGNAL_UNAVAILABLE,
                    EvidenceValue::enumeration(signal.as_str()),
                    payload.observed_at,
                )
                .with_subject(reason.clone());
                sink.base.insert(evidence);
            }
        }

        let outcome = sink.outcome;
        if outcome.failures > 0 {
            warn!(
                origin = %payload.origin,
                failures = outcome.failures,
                items = outcome.items,
                "payload partially parsed"
            );
            let detail = format!(
                "{} of {} {} item{} from '{}' could not be parsed",
                outcome.failures,
                outcome.items,
                payload.body.signal(),
                if outcome.items == 1 { "" } else { "s" },
                payload.origin
            );
            base.insert(
                Evidence::new(
                    EvidenceSource::Meta,
                    META_PARSE_ERROR,
                    EvidenceValue::text(detail),
                    payload.observed_at,
                )
                .with_subject(payload.origin.clone()),
            );
        }
        outcome
    }

    /// Insert `meta/missingSignal` for every signal kind with no records
    pub fn record_absences(&self, base: &mut FactBase, at: DateTime<Utc>) {
        for signal in SignalKind::ALL {
            if !base.has_signal(signal) {
                debug!(signal = %signal, "signal missing");
                base.insert(Evidence::new(
                    EvidenceSource::Meta,
                    META_MISSING_SIGNAL,
                    EvidenceValue::enumeration(signal.as_str()),
                    at,
                ));
            }
        }
    }

    fn absence_timestamp(&self, payloads: &[RawPayload]) -> DateTime<Utc> {
        if let Some(window) = self.window {
            return window.end;
        }
        payloads
            .iter()
            .map(|p| p.observed_at)
            .max()
            .unwrap_or_default()
    }

    fn admit(&self, mut evidence: Evidence) -> Evidence {
        if let Some(window) = self.window {
            if !window.contains(evidence.observed_at) {
                evidence.confidence *= self.out_of_window_factor;
            }
        }
        evidence
    }
}

struct Sink<'a> {
    collector: &'a Collector,
    base: &'a mut FactBase,
    outcome: PayloadOutcome,
}

impl Sink<'_> {
    fn push(&mut self, evidence: Evidence) {
        let evidence = self.collector.admit(evidence);
        self.base.insert(evidence);
        self.outcome.records += 1;
    }

    fn fail(&mut self) {
        self.outcome.failures += 1;
    }

    fn metrics(&mut self, payload: &RawPayload, samples: &[Value]) {
        for sample in samples {
            self.outcome.items += 1;
            match parse_metric_sample(sample, payload.observed_at) {
                Some(evidence) => self.push(evidence),
                None => self.fail(),
            }
        }
    }

    fn logs(&mut self, payload: &RawPayload, lines: &[Value]) {
        for line in lines {
            let Some(text) = line.as_str() else {
                self.outcome.items += 1;
                self.fail();
                continue;
            };
            if text.trim().is_empty() {
                continue;
            }
            self.outcome.items += 1;
            match parse_log_line(text, payload.observed_at) {
                Some(parsed) => {
                    for evidence in parsed {
                        self.push(evidence);
                    }
                }
                None => {
                    self.push(
                        Evidence::new(
                            EvidenceSource::Log,
                            keys::LOG_UNSTRUCTURED,
                            EvidenceValue::text(text.trim()),
                            payload.observed_at,
                        )
                        .with_confidence(UNSTRUCTURED_LOG_CONFIDENCE),
                    );
                    self.fail();
                }
            }
        }
    }

    fn config(&mut self, payload: &RawPayload, entries: &Map<String, Value>) {
        let mut flat = BTreeMap::new();
        let mut failures = 0;
        for (key, value) in entries {
            flatten_config(key, value, 0, &mut flat, &mut failures);
        }
        self.outcome.items += flat.len() + failures;
        self.outcome.failures += failures;
        for (key, value) in flat {
            self.push(Evidence::new(EvidenceSource::Config, key, value, payload.observed_at));
        }
    }

    fn task_status(&mut self, payload: &RawPayload, status: &Value) {
        let at = payload.observed_at;
        let Some(obj) = status.as_object() else {
            self.outcome.items += 1;
            self.fail();
            return;
        };

        self.outcome.items += 1;
        match field(obj, &["Status", "status"]).and_then(Value::as_str) {
            Some(state) => self.status_enum(keys::TASK_STATE, state, at),
            None => self.fail(),
        }

        if let Some(reason) = field(obj, &["StopReason", "stopReason"]).and_then(Value::as_str) {
            self.status_text(keys::STOP_REASON, reason, at);
        }
        if let Some(msg) = field(obj, &["LastFailureMessage", "lastFailureMessage"]).and_then(Value::as_str) {
            self.status_text(keys::LAST_FAILURE_MESSAGE, msg, at);
        }
        if let Some(kind) = field(obj, &["MigrationType", "migrationType"]).and_then(Value::as_str) {
            self.status_enum(keys::MIGRATION_TYPE, kind, at);
        }

        if let Some(stats) = field(obj, &["ReplicationTaskStats", "replicationTaskStats"]) {
            self.task_stats(stats, at);
        }
        if let Some(tests) = field(obj, &["ConnectionTests", "connectionTests"]) {
            self.connection_tests(tests, at);
        }
        if let Some(tables) = field(obj, &["TableStatistics", "tableStatistics"]) {
            self.table_statistics(tables, at);
        }
    }

    fn task_stats(&mut self, stats: &Value, at: DateTime<Utc>) {
        const STATS: [(&str, &str); 6] = [
            ("FullLoadProgressPercent", keys::FULL_LOAD_PROGRESS),
            ("TablesLoaded", keys::TABLES_LOADED),
            ("TablesLoading", keys::TABLES_LOADING),
            ("TablesQueued", keys::TABLES_QUEUED),
            ("TablesErrored", keys::TABLES_ERRORED),
            ("ElapsedTimeMillis", keys::ELAPSED_TIME_MILLIS),
        ];
        let Some(obj) = stats.as_object() else {
            self.outcome.items += 1;
            self.fail();
            return;
        };
        for (field_name, key) in STATS {
            let Some(value) = obj.get(field_name) else { continue };
            self.outcome.items += 1;
            match json_number(value) {
                Some((n, confidence)) => self.push(
                    Evidence::new(EvidenceSource::Status, key, EvidenceValue::numeric(n), at)
                        .with_confidence(confidence),
                ),
                None => self.fail(),
            }
        }
    }

    fn connection_tests(&mut self, tests: &Value, at: DateTime<Utc>) {
        let Some(items) = tests.as_array() else {
            self.outcome.items += 1;
            self.fail();
            return;
        };
        for item in items {
            self.outcome.items += 1;
            let Some(obj) = item.as_object() else {
                self.fail();
                continue;
            };
            let endpoint_type = field(obj, &["EndpointType", "endpointType"])
                .and_then(Value::as_str)
                .map(|s| s.to_lowercase());
            let (state_key, failure_key) = match endpoint_type.as_deref() {
                Some("source") => (keys::SOURCE_CONNECTION, keys::SOURCE_CONNECTION_FAILURE),
                Some("target") => (keys::TARGET_CONNECTION, keys::TARGET_CONNECTION_FAILURE),
                _ => {
                    self.fail();
                    continue;
                }
            };
            let Some(status) = field(obj, &["Status", "status"]).and_then(Value::as_str) else {
                self.fail();
                continue;
            };
            let endpoint = field(obj, &["EndpointIdentifier", "endpointIdentifier"])
                .and_then(Value::as_str)
                .unwrap_or(state_key)
                .to_string();
            self.push(
                Evidence::new(EvidenceSource::Status, state_key, EvidenceValue::enumeration(status), at)
                    .with_subject(endpoint.clone()),
            );
            if let Some(msg) = field(obj, &["LastFailureMessage", "lastFailureMessage"]).and_then(Value::as_str) {
                self.push(
                    Evidence::new(EvidenceSource::Status, failure_key, EvidenceValue::text(msg), at)
                        .with_subject(endpoint),
                );
            }
        }
    }

    fn table_statistics(&mut self, tables: &Value, at: DateTime<Utc>) {
        let Some(items) = tables.as_array() else {
            self.outcome.items += 1;
            self.fail();
            return;
        };
        for item in items {
            self.outcome.items += 1;
            let Some(obj) = item.as_object() else {
                self.fail();
                continue;
            };
            let Some(table) = field(obj, &["TableName", "tableName"]).and_then(Value::as_str) else {
                self.fail();
                continue;
            };
            let subject = match field(obj, &["SchemaName", "schemaName"]).and_then(Value::as_str) {
                Some(schema) => format!("{}.{}", schema, table),
                None => table.to_string(),
            };
            if let Some(state) = field(obj, &["TableState", "tableState"]).and_then(Value::as_str) {
                self.push(
                    Evidence::new(
                        EvidenceSource::Status,
                        keys::TABLE_STATE,
                        EvidenceValue::enumeration(normalize_table_state(state)),
                        at,
                    )
                    .with_subject(subject.clone()),
                );
            }
            if let Some(rows) = field(obj, &["FullLoadErrorRows", "fullLoadErrorRows"]) {
                match json_number(rows) {
                    Some((n, confidence)) => self.push(
                        Evidence::new(EvidenceSource::Status, keys::FULL_LOAD_ERROR_ROWS, EvidenceValue::numeric(n), at)
                            .with_confidence(confidence)
                            .with_subject(subject.clone()),
                    ),
                    None => self.fail(),
                }
            }
            if let Some(state) = field(obj, &["ValidationState", "validationState"]).and_then(Value::as_str) {
                self.push(
                    Evidence::new(EvidenceSource::Status, keys::VALIDATION_STATE, EvidenceValue::enumeration(state), at)
                        .with_subject(subject),
                );
            }
        }
    }

    fn status_enum(&mut self, key: &str, value: &str, at: DateTime<Utc>) {
        self.push(Evidence::new(EvidenceSource::Status, key, EvidenceValue::enumeration(value), at));
    }

    fn status_text(&mut self, key: &str, value: &str, at: DateTime<Utc>) {
        self.push(Evidence::new(EvidenceSource::Status, key, EvidenceValue::text(value), at));
    }
}

fn field<'v>(obj: &'v Map<String, Value>, names: &[&str]) -> Option<&'v Value> {
    names
        .iter()
        .find_map(|name| obj.get(*name))
        .filter(|v| !v.is_null())
}

/// Finite number from JSON, with the confidence of the conversion
fn json_number(value: &Value) -> Option<(f64, f64)> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()).map(|v| (v, 1.0)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| (v, COERCED_VALUE_CONFIDENCE)),
        _ => None,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn parse_metric_sample(sample: &Value, default_at: DateTime<Utc>) -> Option<Evidence> {
    let obj = sample.as_object()?;
    let name = field(obj, &["name", "MetricName", "metric"])
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())?;
    let (value, confidence) = json_number(field(obj, &["value", "Value", "Average"])?)?;
    let at = match field(obj, &["timestamp", "Timestamp"]) {
        Some(raw) => parse_timestamp(raw.as_str()?)?,
        None => default_at,
    };
    let mut evidence = Evidence::new(EvidenceSource::Metric, name, EvidenceValue::numeric(value), at)
        .with_confidence(confidence);
    if let Some(dimension) = field(obj, &["dimension", "Dimension"]).and_then(Value::as_str) {
        evidence = evidence.with_subject(dimension);
    }
    Some(evidence)
}

/// Parse one task log line into a severity record plus error-code records
pub fn parse_log_line(line: &str, default_at: DateTime<Utc>) -> Option<Vec<Evidence>> {
    let caps = LOG_LINE_RE.captures(line.trim())?;
    let severity = match &caps["sev"] {
        "E" => keys::LOG_ERROR,
        "W" => keys::LOG_WARNING,
        "I" => keys::LOG_INFO,
        "D" => keys::LOG_DEBUG,
        _ => keys::LOG_TRACE,
    };
    let (at, confidence) = match parse_timestamp(&caps["ts"]) {
        Some(ts) => (ts, 1.0),
        None => (default_at, UNDATED_LOG_CONFIDENCE),
    };
    let component = &caps["component"];
    let message = &caps["msg"];

    let mut out = vec![Evidence::new(
        EvidenceSource::Log,
        severity,
        EvidenceValue::text(format!("[{}] {}", component, message)),
        at,
    )
    .with_confidence(confidence)
    .with_subject(component)];

    let codes = DMS_CODE_RE
        .captures_iter(message)
        .chain(ORA_CODE_RE.captures_iter(message))
        .map(|c| c["code"].to_string());
    for code in codes {
        out.push(
            Evidence::new(EvidenceSource::Log, keys::LOG_ERROR_CODE, EvidenceValue::enumeration(&code), at)
                .with_confidence(confidence)
                .with_subject(component),
        );
    }
    Some(out)
}

/// "Table completed" -> "completed"
pub fn normalize_table_state(state: &str) -> String {
    let lower = state.trim().to_lowercase();
    lower
        .strip_prefix("table ")
        .map(str::to_string)
        .unwrap_or(lower)
}

fn flatten_config(
    key: &str,
    value: &Value,
    depth: usize,
    out: &mut BTreeMap<String, EvidenceValue>,
    failures: &mut usize,
) {
    let leaf = match value {
        Value::Null => None,
        Value::Bool(b) => Some(EvidenceValue::enumeration(b.to_string())),
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()).map(EvidenceValue::numeric),
        Value::String(s) => Some(EvidenceValue::text(s.clone())),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            })
            .collect::<Option<Vec<String>>>()
            .map(|list| EvidenceValue::text(list.join(","))),
        Value::Object(map) => {
            if depth >= MAX_CONFIG_DEPTH {
                *failures += 1;
                return;
            }
            for (child, child_value) in map {
                flatten_config(&format!("{}.{}", key, child), child_value, depth + 1, out, failures);
            }
            return;
        }
    };
    match leaf {
        // A dotted key and a nested path can flatten to the same name; the first one stays
        Some(v) if !out.contains_key(key) => {
            out.insert(key.to_string(), v);
        }
        _ => *failures += 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_log_line_error_with_code() {
        let line = "2024-03-01T10:15:32 [SOURCE_CAPTURE  ]E:  Failed to connect to database. [1020912]  (ar_odbc_conn.c:600)";
        let records = parse_log_line(line, at()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, keys::LOG_ERROR);
        assert!(records[0].value.as_text().starts_with("[SOURCE_CAPTURE] Failed to connect"));
        assert_eq!(records[0].observed_at, Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 32).unwrap());
        assert_eq!(records[1].key, keys::LOG_ERROR_CODE);
        assert_eq!(records[1].value, EvidenceValue::Enum("1020912".into()));
    }

    #[test]
    fn test_parse_log_line_ora_code() {
        let line = "2024-03-01 10:15:32 [SOURCE_UNLOAD   ]E:  ORA-01031: insufficient privileges";
        let records = parse_log_line(line, at()).unwrap();
        assert!(records.iter().any(|r| r.value == EvidenceValue::Enum("ora-01031".into())));
    }

    #[test]
    fn test_parse_log_line_rejects_free_text() {
        assert!(parse_log_line("something went wrong", at()).is_none());
    }

    #[test]
    fn test_normalize_table_state() {
        assert_eq!(normalize_table_state("Table completed"), "completed");
        assert_eq!(normalize_table_state("Table error"), "error");
        assert_eq!(normalize_table_state("Before load"), "before load");
    }

    #[test]
    fn test_flatten_config() {
        let value = serde_json::json!({
            "TargetMetadata": { "SupportLobs": true, "LobMaxSize": 32 },
            "Broken": null
        });
        let mut out = BTreeMap::new();
        let mut failures = 0;
        for (k, v) in value.as_object().unwrap() {
            flatten_config(k, v, 0, &mut out, &mut failures);
        }
        assert_eq!(failures, 1);
        assert_eq!(out.get("TargetMetadata.SupportLobs"), Some(&EvidenceValue::Enum("true".into())));
        assert_eq!(out.get("TargetMetadata.LobMaxSize"), Some(&EvidenceValue::Numeric(32.0)));
    }

    #[test]
    fn test_flatten_config_key_collision() {
        let value = serde_json::json!({ "a": { "b": 2 }, "a.b": 1 });
        let mut out = BTreeMap::new();
        let mut failures = 0;
        for (k, v) in value.as_object().unwrap() {
            flatten_config(k, v, 0, &mut out, &mut failures);
        }
        assert_eq!(failures, 1);
        assert_eq!(out.len(), 1);
        let kept = out.get("a.b").and_then(|v| v.as_f64()).unwrap();
        assert!(kept == 1.0 || kept == 2.0);
    }

    #[test]
    fn test_signal_kind_parse() {
        assert_eq!(SignalKind::parse("Metrics"), Some(SignalKind::Metric));
        assert_eq!(SignalKind::parse("bogus"), None);
    }
}
