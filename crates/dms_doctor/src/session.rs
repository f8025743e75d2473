//! One diagnostic session: collect, evaluate, correlate, report.
//!
//! A session owns its fact base; nothing is shared between sessions.
//! Collection is the only mutation path. Evaluation always runs against an
//! immutable snapshot, so `diagnose` can be called repeatedly.

use crate::collector::{Collector, RawPayload, TimeWindow};
use crate::config::DoctorConfig;
use crate::correlator::{Correlation, Correlator};
use crate::error::{DoctorError, Result};
use crate::fact_base::{FactBase, FactSnapshot};
use crate::report::{Report, ReportBuilder};
use crate::rules::{evaluate, evaluate_parallel, Firing, RuleSet};
use crate::source::{self, TelemetrySource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, info_span, Instrument};

/// What to diagnose
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRequest {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<TimeWindow>,
}

impl DiagnosticRequest {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            window: None,
        }
    }

    pub fn with_window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.window = Some(TimeWindow::new(start, end));
        self
    }
}

/// Request plus already-fetched payloads, as read by the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryBundle {
    #[serde(flatten)]
    pub request: DiagnosticRequest,
    #[serde(default)]
    pub payloads: Vec<RawPayload>,
}

/// Everything one diagnosis produced
#[derive(Debug, Clone)]
pub struct Diagnosis {
    pub report: Report,
    pub firings: Vec<Firing>,
    pub correlation: Correlation,
    /// The evaluated snapshot, suppressed evidence included
    pub snapshot: FactSnapshot,
}

pub struct DiagnosticSession {
    request: DiagnosticRequest,
    rule_set: Arc<RuleSet>,
    collector: Collector,
    correlator: Correlator,
    fetch_timeout: std::time::Duration,
    workers: usize,
    fact_base: FactBase,
}

impl DiagnosticSession {
    /// Validate the request and configuration and resolve the rule set.
    /// Configuration errors surface here, before any evaluation.
    pub fn new(request: DiagnosticRequest, config: &DoctorConfig) -> Result<Self> {
        if request.task_id.trim().is_empty() {
            return Err(DoctorError::Configuration("task id must not be empty".to_string()));
        }
        if let Some(window) = request.window {
            if !window.is_valid() {
                return Err(DoctorError::Configuration(format!(
                    "time window starts after it ends ({} > {})",
                    window.start, window.end
                )));
            }
        }
        let rule_set = config.resolve_rule_set()?;

        Ok(Self {
            collector: Collector::new()
                .with_window(request.window)
                .with_out_of_window_factor(config.out_of_window_factor),
            request,
            rule_set: Arc::new(rule_set),
            correlator: config.correlator(),
            fetch_timeout: config.fetch_timeout(),
            workers: config.evaluation_workers,
            fact_base: FactBase::new(),
        })
    }

    /// Replace the configured rule library. The injected set is used as
    /// given: `[rules]` settings (builtin, files, disabled) only shape the
    /// configured library and are not applied here.
    pub fn with_rule_set(mut self, rule_set: RuleSet) -> Result<Self> {
        if rule_set.is_empty() {
            return Err(DoctorError::Configuration("rule set is empty".to_string()));
        }
        self.rule_set = Arc::new(rule_set);
        Ok(self)
    }

    pub fn request(&self) -> &DiagnosticRequest {
        &self.request
    }

    pub fn rule_set(&self) -> &RuleSet {
        &self.rule_set
    }

    pub fn fact_base(&self) -> &FactBase {
        &self.fact_base
    }

    /// Normalize payloads into the fact base. Returns records added.
    pub fn ingest(&mut self, payloads: &[RawPayload]) -> usize {
        let span = info_span!("collect", task_id = %self.request.task_id);
        let _guard = span.enter();
        let before = self.fact_base.len();
        for payload in payloads {
            self.collector.collect_into(&mut self.fact_base, payload);
        }
        let added = self.fact_base.len() - before;
        info!(payloads = payloads.len(), records = added, "payloads ingested");
        added
    }

    /// Fetch from injected sources (concurrently, each bounded by the
    /// configured timeout) and ingest the result
    pub async fn gather(&mut self, sources: &[Arc<dyn TelemetrySource>]) -> usize {
        let span = info_span!("gather", task_id = %self.request.task_id, sources = sources.len());
        let payloads = source::gather(sources, &self.request, self.fetch_timeout)
            .instrument(span)
            .await;
        self.ingest(&payloads)
    }

    /// Evaluate all rules sequentially
    pub fn diagnose(&self) -> Result<Diagnosis> {
        let snapshot = self.evaluation_snapshot()?;
        let firings = {
            let _guard = info_span!("evaluate", task_id = %self.request.task_id).entered();
            evaluate(&snapshot, &self.rule_set)
        };
        Ok(self.finish(snapshot, firings))
    }

    /// Same result as `diagnose`, with rules spread over blocking workers
    pub async fn diagnose_parallel(&self) -> Result<Diagnosis> {
        let snapshot = self.evaluation_snapshot()?;
        let span = info_span!("evaluate", task_id = %self.request.task_id, workers = self.workers);
        let firings = evaluate_parallel(Arc::new(snapshot.clone()), Arc::clone(&self.rule_set), self.workers)
            .instrument(span)
            .await;
        Ok(self.finish(snapshot, firings))
    }

    /// Snapshot with absence facts added. The session's own base is left
    /// untouched so more payloads can still be ingested.
    fn evaluation_snapshot(&self) -> Result<FactSnapshot> {
        if self.fact_base.observed_count() == 0 {
            return Err(DoctorError::NoEvidenceCollected {
                task_id: self.request.task_id.clone(),
            });
        }
        let mut base = self.fact_base.clone();
        self.collector.record_absences(&mut base, self.absence_timestamp());
        Ok(base.snapshot())
    }

    fn absence_timestamp(&self) -> DateTime<Utc> {
        match self.request.window {
            Some(window) => window.end,
            None => self
                .fact_base
                .iter()
                .map(|r| r.observed_at)
                .max()
                .unwrap_or_default(),
        }
    }

    fn finish(&self, snapshot: FactSnapshot, firings: Vec<Firing>) -> Diagnosis {
        let correlation = {
            let _guard = info_span!("correlate", task_id = %self.request.task_id).entered();
            self.correlator.correlate(&firings)
        };
        let report = {
            let _guard = info_span!("build_report", task_id = %self.request.task_id).entered();
            ReportBuilder::new(&self.rule_set).build(&correlation, &snapshot, &self.request)
        };
        info!(
            task_id = %self.request.task_id,
            firings = firings.len(),
            causes = report.causes.len(),
            verdict = %report.verdict,
            "diagnosis complete"
        );
        Diagnosis {
            report,
            firings,
            correlation,
            snapshot,
        }
    }
}
