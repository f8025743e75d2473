//! Root-cause diagnostic engine for DMS replication tasks.
//!
//! Pipeline: collector -> fact base -> rule engine -> correlator -> report.
//! Telemetry fetching is injected through [`TelemetrySource`]; the engine
//! itself performs no network I/O.

pub mod collector;
pub mod config;
pub mod correlator;
pub mod error;
pub mod evidence;
pub mod fact_base;
pub mod report;
pub mod rules;
pub mod session;
pub mod source;

pub use collector::{collect, Collector, MetricSample, PayloadBody, RawPayload, SignalKind, TimeWindow};
pub use config::{DoctorConfig, LogConfig, RulesConfig, CONFIG_ENV_VAR};
pub use correlator::{Correlation, Correlator, Hypothesis, SuppressionReason};
pub use error::{DoctorError, Result};
pub use evidence::{Evidence, EvidenceId, EvidenceRecord, EvidenceSource, EvidenceValue};
pub use fact_base::{FactBase, FactQuery, FactSnapshot};
pub use report::{format_markdown, format_text, Citation, ConfidenceLevel, Gap, Report, ReportBuilder, ReportedCause, Verdict};
pub use rules::{evaluate, evaluate_parallel, CauseInfo, Condition, EvidenceSlot, Firing, Rule, RuleSet};
pub use session::{DiagnosticRequest, DiagnosticSession, Diagnosis, TelemetryBundle};
pub use source::{FakeTelemetrySource, FetchError, TelemetrySource};
