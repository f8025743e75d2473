//! Evidence records: one normalized observation from task telemetry.
//!
//! Records are created only by the fact base (which assigns ids) and are
//! never mutated afterwards. Corrections are new records that point at the
//! record they supersede.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Meta key recorded when a payload could only be partially parsed
pub const META_PARSE_ERROR: &str = "parseError";

/// Meta key recorded for every signal kind that produced no records
pub const META_MISSING_SIGNAL: &str = "missingSignal";

/// Meta key recorded when a data source timed out or failed
pub const META_SIGNAL_UNAVAILABLE: &str = "signalUnavailable";

/// Unique id of a record within one fact base
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceId(pub u64);

impl std::fmt::Display for EvidenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E-{:04}", self.0)
    }
}

/// Where an observation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    Metric,
    Log,
    Config,
    Status,
    /// Facts about the collection itself (parse errors, absences, outages)
    Meta,
}

impl EvidenceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceSource::Metric => "metric",
            EvidenceSource::Log => "log",
            EvidenceSource::Config => "config",
            EvidenceSource::Status => "status",
            EvidenceSource::Meta => "meta",
        }
    }
}

impl std::fmt::Display for EvidenceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed value of an observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EvidenceValue {
    Numeric(f64),
    Text(String),
    /// Normalized lowercase token (task states, connection statuses, flags)
    Enum(String),
}

impl EvidenceValue {
    pub fn numeric(value: f64) -> Self {
        EvidenceValue::Numeric(value)
    }

    pub fn text(value: impl Into<String>) -> Self {
        EvidenceValue::Text(value.into())
    }

    pub fn enumeration(value: impl AsRef<str>) -> Self {
        EvidenceValue::Enum(value.as_ref().trim().to_lowercase())
    }

    /// Numeric view. Text that parses as a number is accepted.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EvidenceValue::Numeric(v) => Some(*v),
            EvidenceValue::Text(s) | EvidenceValue::Enum(s) => s.trim().parse::<f64>().ok(),
        }
    }

    /// String view used for textual conditions
    pub fn as_text(&self) -> String {
        match self {
            EvidenceValue::Numeric(v) => format_number(*v),
            EvidenceValue::Text(s) | EvidenceValue::Enum(s) => s.clone(),
        }
    }

    /// Case-insensitive equality; numbers compare numerically
    pub fn matches_literal(&self, literal: &str) -> bool {
        match self {
            EvidenceValue::Numeric(v) => literal
                .trim()
                .parse::<f64>()
                .map(|l| l == *v)
                .unwrap_or(false),
            EvidenceValue::Text(s) | EvidenceValue::Enum(s) => {
                s.trim().eq_ignore_ascii_case(literal.trim())
            }
        }
    }
}

impl std::fmt::Display for EvidenceValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_text())
    }
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// An immutable observation owned by the fact base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub id: EvidenceId,
    pub source: EvidenceSource,
    pub key: String,
    pub value: EvidenceValue,
    pub observed_at: DateTime<Utc>,
    /// 0.0 - 1.0, 1.0 for directly observed facts
    pub confidence: f64,
    /// What the observation is about (a table, an endpoint, an outage reason)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Earlier record this one corrects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<EvidenceId>,
}

impl EvidenceRecord {
    pub fn is_meta(&self) -> bool {
        self.source == EvidenceSource::Meta
    }
}

/// Draft of a record, turned into an `EvidenceRecord` by `FactBase::insert`
#[derive(Debug, Clone, PartialEq)]
pub struct Evidence {
    pub source: EvidenceSource,
    pub key: String,
    pub value: EvidenceValue,
    pub observed_at: DateTime<Utc>,
    pub confidence: f64,
    pub subject: Option<String>,
}

impl Evidence {
    pub fn new(
        source: EvidenceSource,
        key: impl Into<String>,
        value: EvidenceValue,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            key: key.into(),
            value,
            observed_at,
            confidence: 1.0,
            subject: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub(crate) fn into_record(self, id: EvidenceId, supersedes: Option<EvidenceId>) -> EvidenceRecord {
        EvidenceRecord {
            id,
            source: self.source,
            key: self.key,
            value: self.value,
            observed_at: self.observed_at,
            confidence: clamp_confidence(self.confidence),
            subject: self.subject,
            supersedes,
        }
    }
}

/// Clamp to [0, 1]; NaN counts as no confidence
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}
