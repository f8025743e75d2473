//! Correlator / hypothesis ranker
//!
//! Groups firings by cause and combines them as independent evidence:
//! `aggregate = 1 - prod(1 - confidence)`. Corroborating rules raise the
//! aggregate but it never exceeds 1.0.
//!
//! Ranking is a total order (aggregate desc, then cause id asc) so the
//! output does not depend on evaluation order or parallelism.

use crate::evidence::{clamp_confidence, EvidenceId};
use crate::rules::Firing;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.3;
pub const DEFAULT_MAX_HYPOTHESES: usize = 5;

/// A ranked candidate root cause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub cause_id: String,
    pub aggregate_confidence: f64,
    /// Confidence desc, rule id asc
    pub contributing_firings: Vec<Firing>,
    /// Deduplicated across firings, first-seen order
    pub evidence_refs: Vec<EvidenceId>,
    /// Remediation of the strongest firing
    pub remediation: String,
    /// Other distinct remediation texts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_remediation: Vec<String>,
}

impl Hypothesis {
    pub fn rule_ids(&self) -> Vec<&str> {
        self.contributing_firings.iter().map(|f| f.rule_id.as_str()).collect()
    }
}

/// Why a cause was left out of the ranked list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    /// Aggregate confidence under `min_confidence`
    BelowFloor,
    /// Ranked past `max_hypotheses`
    OverCap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suppressed {
    pub hypothesis: Hypothesis,
    pub reason: SuppressionReason,
}

/// Correlator output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub hypotheses: Vec<Hypothesis>,
    pub suppressed: Vec<Suppressed>,
}

impl Correlation {
    pub fn is_inconclusive(&self) -> bool {
        self.hypotheses.is_empty()
    }

    pub fn hypothesis(&self, cause_id: &str) -> Option<&Hypothesis> {
        self.hypotheses.iter().find(|h| h.cause_id == cause_id)
    }

    pub fn suppressed_cause(&self, cause_id: &str) -> Option<&Suppressed> {
        self.suppressed.iter().find(|s| s.hypothesis.cause_id == cause_id)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Correlator {
    min_confidence: f64,
    max_hypotheses: usize,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CONFIDENCE, DEFAULT_MAX_HYPOTHESES)
    }
}

impl Correlator {
    pub fn new(min_confidence: f64, max_hypotheses: usize) -> Self {
        Self {
            min_confidence,
            max_hypotheses,
        }
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    pub fn max_hypotheses(&self) -> usize {
        self.max_hypotheses
    }

    /// Aggregate and rank firings
    pub fn correlate(&self, firings: &[Firing]) -> Correlation {
        let mut by_cause: BTreeMap<&str, Vec<&Firing>> = BTreeMap::new();
        for firing in firings {
            by_cause.entry(firing.cause_id.as_str()).or_default().push(firing);
        }

        let mut ranked: Vec<Hypothesis> = by_cause
            .into_iter()
            .map(|(cause_id, group)| build_hypothesis(cause_id, group))
            .collect();
        ranked.sort_by(rank_order);

        let mut correlation = Correlation::default();
        for hypothesis in ranked {
            if hypothesis.aggregate_confidence < self.min_confidence {
                correlation.suppressed.push(Suppressed {
                    hypothesis,
                    reason: SuppressionReason::BelowFloor,
                });
            } else if correlation.hypotheses.len() >= self.max_hypotheses {
                correlation.suppressed.push(Suppressed {
                    hypothesis,
                    reason: SuppressionReason::OverCap,
                });
            } else {
                correlation.hypotheses.push(hypothesis);
            }
        }

        debug!(
            firings = firings.len(),
            hypotheses = correlation.hypotheses.len(),
            suppressed = correlation.suppressed.len(),
            "firings correlated"
        );
        correlation
    }
}

/// `1 - prod(1 - c)`, folded in the given order
pub fn combine_confidences(confidences: impl IntoIterator<Item = f64>) -> f64 {
    let miss = confidences
        .into_iter()
        .fold(1.0, |acc, c| acc * (1.0 - clamp_confidence(c)));
    clamp_confidence(1.0 - miss)
}

fn build_hypothesis(cause_id: &str, mut group: Vec<&Firing>) -> Hypothesis {
    // Fixed order for bit-identical floating point results
    group.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
    let aggregate_confidence = combine_confidences(group.iter().map(|f| f.confidence));

    let mut contributing: Vec<Firing> = group.into_iter().cloned().collect();
    contributing.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.rule_id.cmp(&b.rule_id))
    });

    let mut seen = BTreeSet::new();
    let evidence_refs = contributing
        .iter()
        .flat_map(|f| f.evidence_refs.iter().copied())
        .filter(|id| seen.insert(*id))
        .collect();

    let mut texts: Vec<String> = Vec::new();
    for firing in &contributing {
        if !firing.remediation.is_empty() && !texts.contains(&firing.remediation) {
            texts.push(firing.remediation.clone());
        }
    }
    let remediation = if texts.is_empty() { String::new() } else { texts.remove(0) };

    Hypothesis {
        cause_id: cause_id.to_string(),
        aggregate_confidence,
        contributing_firings: contributing,
        evidence_refs,
        remediation,
        additional_remediation: texts,
    }
}

fn rank_order(a: &Hypothesis, b: &Hypothesis) -> Ordering {
    b.aggregate_confidence
        .partial_cmp(&a.aggregate_confidence)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.cause_id.cmp(&b.cause_id))
}
