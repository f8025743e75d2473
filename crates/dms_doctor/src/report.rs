//! Deterministic diagnostic report generation.
//!
//! Pure transformation of a correlation plus the fact snapshot it came
//! from. No clocks are read here, so identical inputs render identical
//! bytes. An empty hypothesis list is an inconclusive report, not an error.

use crate::collector::{keys, SignalKind, TimeWindow};
use crate::correlator::{Correlation, Hypothesis, SuppressionReason};
use crate::evidence::{EvidenceId, EvidenceRecord, EvidenceSource, META_PARSE_ERROR, META_SIGNAL_UNAVAILABLE};
use crate::fact_base::FactSnapshot;
use crate::rules::RuleSet;
use crate::session::DiagnosticRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const INCONCLUSIVE_SUMMARY: &str = "no root cause identified with sufficient confidence";

pub const HIGH_CONFIDENCE: f64 = 0.8;
pub const MEDIUM_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Identified,
    Inconclusive,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identified => write!(f, "IDENTIFIED"),
            Self::Inconclusive => write!(f, "INCONCLUSIVE"),
        }
    }
}

/// Coarse confidence band (stable ordering)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl ConfidenceLevel {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= HIGH_CONFIDENCE {
            Self::High
        } else if confidence >= MEDIUM_CONFIDENCE {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

/// One cited evidence record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub id: EvidenceId,
    pub source: EvidenceSource,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub value: String,
    pub observed_at: DateTime<Utc>,
    pub confidence: f64,
}

impl Citation {
    fn from_record(record: &EvidenceRecord) -> Self {
        let mut value = record.value.as_text();
        if record.source == EvidenceSource::Status && record.key == keys::TABLE_STATE {
            if let Some(description) = table_state_description(&value) {
                value = format!("{} ({})", value, description);
            }
        }
        Self {
            id: record.id,
            source: record.source,
            key: record.key.clone(),
            subject: record.subject.clone(),
            value,
            observed_at: record.observed_at,
            confidence: record.confidence,
        }
    }

    /// `status/tableState[public.users]`
    pub fn label(&self) -> String {
        match &self.subject {
            Some(subject) => format!("{}/{}[{}]", self.source, self.key, subject),
            None => format!("{}/{}", self.source, self.key),
        }
    }
}

/// Human description of a normalized table state
pub fn table_state_description(state: &str) -> Option<&'static str> {
    match state {
        "completed" => Some("Full load and ongoing replication complete"),
        "loading" => Some("Full load in progress"),
        "error" => Some("Error occurred during replication"),
        _ => None,
    }
}

/// A ranked cause as presented to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedCause {
    /// 1-based
    pub rank: usize,
    pub cause_id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub confidence: f64,
    pub confidence_level: ConfidenceLevel,
    /// Contributing rule ids, strongest first
    pub rules: Vec<String>,
    pub evidence: Vec<Citation>,
    pub remediation: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_remediation: Vec<String>,
}

/// Missing or degraded telemetry worth telling the reader about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<SignalKind>,
    pub message: String,
}

/// A cause left out of the ranked list, kept for debugging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuppressedCause {
    pub cause_id: String,
    pub confidence: f64,
    pub reason: SuppressionReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<TimeWindow>,
    pub verdict: Verdict,
    pub summary: String,
    pub causes: Vec<ReportedCause>,
    pub gaps: Vec<Gap>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suppressed: Vec<SuppressedCause>,
    /// Observed (non-meta) records the diagnosis was based on
    pub evidence_count: usize,
}

impl Report {
    pub fn is_inconclusive(&self) -> bool {
        self.verdict == Verdict::Inconclusive
    }

    pub fn cause(&self, cause_id: &str) -> Option<&ReportedCause> {
        self.causes.iter().find(|c| c.cause_id == cause_id)
    }

    /// Pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Renders correlations using the causes declared in a rule set
pub struct ReportBuilder<'a> {
    rule_set: &'a RuleSet,
}

impl<'a> ReportBuilder<'a> {
    pub fn new(rule_set: &'a RuleSet) -> Self {
        Self { rule_set }
    }

    pub fn build(&self, correlation: &Correlation, snapshot: &FactSnapshot, request: &DiagnosticRequest) -> Report {
        let causes: Vec<ReportedCause> = correlation
            .hypotheses
            .iter()
            .enumerate()
            .map(|(i, h)| self.reported_cause(i + 1, h, snapshot))
            .collect();

        let suppressed = correlation
            .suppressed
            .iter()
            .map(|s| SuppressedCause {
                cause_id: s.hypothesis.cause_id.clone(),
                confidence: s.hypothesis.aggregate_confidence,
                reason: s.reason,
            })
            .collect();

        let gaps = detect_gaps(snapshot, request.window.is_some());
        let verdict = if causes.is_empty() { Verdict::Inconclusive } else { Verdict::Identified };
        let summary = build_summary(&causes, &gaps);

        Report {
            task_id: request.task_id.clone(),
            window: request.window,
            verdict,
            summary,
            causes,
            gaps,
            suppressed,
            evidence_count: snapshot.observed_count(),
        }
    }

    fn reported_cause(&self, rank: usize, hypothesis: &Hypothesis, snapshot: &FactSnapshot) -> ReportedCause {
        let info = self.rule_set.cause(&hypothesis.cause_id);
        ReportedCause {
            rank,
            cause_id: hypothesis.cause_id.clone(),
            title: info.map_or_else(|| hypothesis.cause_id.clone(), |c| c.title.clone()),
            description: info.map(|c| c.description.clone()).unwrap_or_default(),
            category: info.map(|c| c.category.clone()).unwrap_or_default(),
            confidence: hypothesis.aggregate_confidence,
            confidence_level: ConfidenceLevel::from_confidence(hypothesis.aggregate_confidence),
            rules: hypothesis.rule_ids().into_iter().map(str::to_string).collect(),
            evidence: hypothesis
                .evidence_refs
                .iter()
                .filter_map(|id| snapshot.get(*id))
                .map(Citation::from_record)
                .collect(),
            remediation: hypothesis.remediation.clone(),
            additional_remediation: hypothesis.additional_remediation.clone(),
        }
    }
}

fn signal_label(signal: SignalKind) -> &'static str {
    match signal {
        SignalKind::Metric => "CloudWatch metrics",
        SignalKind::Log => "task logs",
        SignalKind::Config => "endpoint or task settings",
        SignalKind::Status => "task status",
    }
}

fn signal_verb(signal: SignalKind) -> &'static str {
    match signal {
        SignalKind::Status => "was",
        _ => "were",
    }
}

fn detect_gaps(snapshot: &FactSnapshot, windowed: bool) -> Vec<Gap> {
    let scope = if windowed { "this time window" } else { "this task" };
    let mut gaps = Vec::new();

    for signal in SignalKind::ALL {
        let outages: Vec<&EvidenceRecord> = snapshot
            .meta(META_SIGNAL_UNAVAILABLE)
            .into_iter()
            .filter(|r| r.value.matches_literal(signal.as_str()))
            .collect();
        for outage in &outages {
            let reason = outage.subject.as_deref().unwrap_or("unknown reason");
            gaps.push(Gap {
                signal: Some(signal),
                message: format!("{} could not be fetched: {}", signal_label(signal), reason),
            });
        }
        if outages.is_empty() && snapshot.missing_signals().contains(&signal) {
            gaps.push(Gap {
                signal: Some(signal),
                message: format!(
                    "no {} {} available for {}",
                    signal_label(signal),
                    signal_verb(signal),
                    scope
                ),
            });
        }
    }

    let parse_errors = snapshot.meta(META_PARSE_ERROR);
    if !parse_errors.is_empty() {
        let details: Vec<String> = parse_errors.iter().map(|r| r.value.as_text()).collect();
        gaps.push(Gap {
            signal: None,
            message: format!(
                "{} payload{} only partially parsed: {}",
                parse_errors.len(),
                if parse_errors.len() == 1 { " was" } else { "s were" },
                details.join("; ")
            ),
        });
    }
    gaps
}

fn build_summary(causes: &[ReportedCause], gaps: &[Gap]) -> String {
    let mut summary = match causes.first() {
        None => INCONCLUSIVE_SUMMARY.to_string(),
        Some(top) => {
            let mut s = format!(
                "Most likely cause: {} ({}, {} confidence)",
                top.title,
                format_percent(top.confidence),
                top.confidence_level.to_string().to_lowercase()
            );
            if causes.len() > 1 {
                s.push_str(&format!(
                    "; {} other candidate{}",
                    causes.len() - 1,
                    if causes.len() == 2 { "" } else { "s" }
                ));
            }
            s
        }
    };
    if !gaps.is_empty() {
        summary.push_str(&format!(
            ". {} telemetry gap{} noted",
            gaps.len(),
            if gaps.len() == 1 { "" } else { "s" }
        ));
    }
    summary
}

fn format_percent(confidence: f64) -> String {
    format!("{:.0}%", confidence * 100.0)
}

fn format_window(window: &Option<TimeWindow>) -> String {
    match window {
        Some(w) => format!("{} .. {}", w.start.to_rfc3339(), w.end.to_rfc3339()),
        None => "unbounded".to_string(),
    }
}

/// Format report as plain text
pub fn format_text(report: &Report) -> String {
    let mut out = String::new();

    out.push_str("DIAGNOSTIC REPORT\n");
    out.push_str("=================\n\n");
    out.push_str(&format!("  Task: {}\n", report.task_id));
    out.push_str(&format!("  Window: {}\n", format_window(&report.window)));
    out.push_str(&format!("  Verdict: {}\n", report.verdict));
    out.push_str(&format!("  Evidence: {} records\n\n", report.evidence_count));

    out.push_str("SUMMARY\n");
    out.push_str(&format!("  {}\n\n", report.summary));

    if !report.causes.is_empty() {
        out.push_str("PROBABLE CAUSES\n");
        for cause in &report.causes {
            out.push_str(&format!(
                "  {}. [{}] {} ({})\n",
                cause.rank,
                cause.confidence_level,
                cause.title,
                format_percent(cause.confidence)
            ));
            if !cause.description.is_empty() {
                out.push_str(&format!("     {}\n", cause.description));
            }
            out.push_str(&format!("     Rules: {}\n", cause.rules.join(", ")));
            for citation in &cause.evidence {
                out.push_str(&format!(
                    "     {} {} = {} @ {}\n",
                    citation.id,
                    citation.label(),
                    citation.value,
                    citation.observed_at.to_rfc3339()
                ));
            }
            if !cause.remediation.is_empty() {
                out.push_str(&format!("     Fix: {}\n", cause.remediation));
            }
            for extra in &cause.additional_remediation {
                out.push_str(&format!("     Also: {}\n", extra));
            }
        }
        out.push('\n');
    }

    if !report.gaps.is_empty() {
        out.push_str("GAPS\n");
        for gap in &report.gaps {
            out.push_str(&format!("  * {}\n", gap.message));
        }
        out.push('\n');
    }

    if !report.suppressed.is_empty() {
        out.push_str("SUPPRESSED\n");
        for s in &report.suppressed {
            out.push_str(&format!(
                "  - {} ({}, {})\n",
                s.cause_id,
                format_percent(s.confidence),
                suppression_label(s.reason)
            ));
        }
    }

    out
}

/// Format report as markdown
pub fn format_markdown(report: &Report) -> String {
    let mut out = String::new();

    out.push_str(&format!("# Diagnostic Report: {}\n\n", report.task_id));
    out.push_str(&format!("- **Window**: {}\n", format_window(&report.window)));
    out.push_str(&format!("- **Verdict**: {}\n", report.verdict));
    out.push_str(&format!("- **Evidence**: {} records\n\n", report.evidence_count));

    out.push_str("## Summary\n\n");
    out.push_str(&format!("{}\n\n", report.summary));

    if !report.causes.is_empty() {
        out.push_str("## Probable Causes\n\n");
        for cause in &report.causes {
            out.push_str(&format!(
                "### {}. {} ({}, {})\n\n",
                cause.rank,
                cause.title,
                format_percent(cause.confidence),
                cause.confidence_level
            ));
            if !cause.description.is_empty() {
                out.push_str(&format!("{}\n\n", cause.description));
            }
            out.push_str(&format!("Rules: `{}`\n\n", cause.rules.join("`, `")));
            if !cause.evidence.is_empty() {
                out.push_str("| Id | Evidence | Value | Observed |\n");
                out.push_str("|----|----------|-------|----------|\n");
                for citation in &cause.evidence {
                    out.push_str(&format!(
                        "| {} | {} | {} | {} |\n",
                        citation.id,
                        citation.label(),
                        citation.value.replace('|', "\\|"),
                        citation.observed_at.to_rfc3339()
                    ));
                }
                out.push('\n');
            }
            if !cause.remediation.is_empty() {
                out.push_str(&format!("**Remediation**: {}\n\n", cause.remediation));
            }
            for extra in &cause.additional_remediation {
                out.push_str(&format!("- {}\n", extra));
            }
            if !cause.additional_remediation.is_empty() {
                out.push('\n');
            }
        }
    }

    if !report.gaps.is_empty() {
        out.push_str("## Gaps\n\n");
        for gap in &report.gaps {
            out.push_str(&format!("- {}\n", gap.message));
        }
        out.push('\n');
    }

    if !report.suppressed.is_empty() {
        out.push_str("## Suppressed\n\n");
        out.push_str("| Cause | Confidence | Reason |\n");
        out.push_str("|-------|------------|--------|\n");
        for s in &report.suppressed {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                s.cause_id,
                format_percent(s.confidence),
                suppression_label(s.reason)
            ));
        }
    }

    out
}

fn suppression_label(reason: SuppressionReason) -> &'static str {
    match reason {
        SuppressionReason::BelowFloor => "below reporting floor",
        SuppressionReason::OverCap => "over hypothesis cap",
    }
}
