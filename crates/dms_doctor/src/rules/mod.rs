//! Diagnostic rules
//!
//! A rule is flat data: a set of evidence slots over the fact base, a
//! candidate cause, a base confidence and remediation text. Rules do not
//! know about each other. Several rules may point at the same cause; the
//! correlator combines them.
//!
//! Scoring:
//! - each slot scores `max(confidence of matching records) x
//!   min(1, matches / min_matches)`; superseded records are ignored
//! - an `absent` slot scores 1.0 when its key was never observed, or
//!   `ABSENT_SIGNAL_STRENGTH` when the whole signal kind is missing
//! - a rule fires only if every required slot scores above zero
//! - firing confidence = base x (weighted mean of slot scores)

mod catalog;
mod engine;
mod rule_set;

pub use engine::{evaluate, evaluate_parallel};
pub use rule_set::{CauseInfo, RuleLibrary, RuleSet};

use crate::collector::SignalKind;
use crate::evidence::{
    clamp_confidence, EvidenceId, EvidenceRecord, EvidenceSource, META_MISSING_SIGNAL,
};
use crate::fact_base::FactSnapshot;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Score of an `absent` slot when the signal kind was not collected at all
pub const ABSENT_SIGNAL_STRENGTH: f64 = 0.5;

/// Predicate applied to each record of a slot's (source, key)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// Any record exists
    Present,
    /// No record exists
    Absent,
    /// Case-insensitive equality; numbers compare numerically
    Equals { value: String },
    OneOf { values: Vec<String> },
    /// Case-insensitive substring
    Contains { pattern: String },
    Matches { regex: String },
    Above { threshold: f64 },
    Below { threshold: f64 },
}

impl Condition {
    pub fn equals(value: impl Into<String>) -> Self {
        Condition::Equals { value: value.into() }
    }

    pub fn one_of(values: &[&str]) -> Self {
        Condition::OneOf {
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn contains(pattern: impl Into<String>) -> Self {
        Condition::Contains { pattern: pattern.into() }
    }

    pub fn matches(regex: impl Into<String>) -> Self {
        Condition::Matches { regex: regex.into() }
    }

    pub fn above(threshold: f64) -> Self {
        Condition::Above { threshold }
    }

    pub fn below(threshold: f64) -> Self {
        Condition::Below { threshold }
    }

    fn accepts(&self, record: &EvidenceRecord, compiled: Option<&Regex>) -> bool {
        match self {
            Condition::Present => true,
            Condition::Absent => false,
            Condition::Equals { value } => record.value.matches_literal(value),
            Condition::OneOf { values } => values.iter().any(|v| record.value.matches_literal(v)),
            Condition::Contains { pattern } => record
                .value
                .as_text()
                .to_lowercase()
                .contains(&pattern.to_lowercase()),
            Condition::Matches { regex } => match compiled {
                Some(re) => re.is_match(&record.value.as_text()),
                None => Regex::new(regex)
                    .map(|re| re.is_match(&record.value.as_text()))
                    .unwrap_or(false),
            },
            Condition::Above { threshold } => record.value.as_f64().map_or(false, |v| v > *threshold),
            Condition::Below { threshold } => record.value.as_f64().map_or(false, |v| v < *threshold),
        }
    }
}

fn default_required() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

fn default_min_matches() -> usize {
    1
}

/// One piece of evidence a rule looks for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceSlot {
    pub source: EvidenceSource,
    pub key: String,
    #[serde(flatten)]
    pub condition: Condition,
    /// Hard precondition: the rule never fires without it
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Matching records needed for full strength (sustained conditions)
    #[serde(default = "default_min_matches")]
    pub min_matches: usize,
    #[serde(skip)]
    compiled: Option<Regex>,
}

/// Result of scoring one slot
#[derive(Debug, Clone, PartialEq)]
pub struct SlotScore {
    pub score: f64,
    pub matched: Vec<EvidenceId>,
}

impl SlotScore {
    fn none() -> Self {
        Self {
            score: 0.0,
            matched: Vec::new(),
        }
    }
}

impl EvidenceSlot {
    pub fn new(source: EvidenceSource, key: impl Into<String>, condition: Condition) -> Self {
        Self {
            source,
            key: key.into(),
            condition,
            required: true,
            weight: 1.0,
            min_matches: 1,
            compiled: None,
        }
    }

    pub fn status(key: &str, condition: Condition) -> Self {
        Self::new(EvidenceSource::Status, key, condition)
    }

    pub fn metric(key: &str, condition: Condition) -> Self {
        Self::new(EvidenceSource::Metric, key, condition)
    }

    pub fn log(key: &str, condition: Condition) -> Self {
        Self::new(EvidenceSource::Log, key, condition)
    }

    pub fn config(key: &str, condition: Condition) -> Self {
        Self::new(EvidenceSource::Config, key, condition)
    }

    pub fn meta(key: &str, condition: Condition) -> Self {
        Self::new(EvidenceSource::Meta, key, condition)
    }

    /// Corroborating slot: raises strength when present, never blocks
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn at_least(mut self, min_matches: usize) -> Self {
        self.min_matches = min_matches;
        self
    }

    /// Compile the `matches` pattern, if any
    pub(crate) fn prepare(&mut self) -> Result<(), String> {
        if let Condition::Matches { regex } = &self.condition {
            let compiled = Regex::new(regex).map_err(|e| format!("slot '{}': {}", self.key, e))?;
            self.compiled = Some(compiled);
        }
        Ok(())
    }

    /// Score this slot against a snapshot
    pub fn score(&self, snapshot: &FactSnapshot) -> SlotScore {
        let records = snapshot.effective(self.source, &self.key);

        if self.condition == Condition::Absent {
            if !records.is_empty() {
                return SlotScore::none();
            }
            return match SignalKind::from_source(self.source) {
                Some(signal) if !snapshot.has_source(self.source) => SlotScore {
                    score: ABSENT_SIGNAL_STRENGTH,
                    matched: snapshot
                        .meta(META_MISSING_SIGNAL)
                        .iter()
                        .filter(|r| r.value.matches_literal(signal.as_str()))
                        .map(|r| r.id)
                        .collect(),
                },
                _ => SlotScore {
                    score: 1.0,
                    matched: Vec::new(),
                },
            };
        }

        let matched: Vec<&EvidenceRecord> = records
            .into_iter()
            .filter(|r| self.condition.accepts(r, self.compiled.as_ref()))
            .collect();
        if matched.is_empty() {
            return SlotScore::none();
        }

        let best = matched.iter().map(|r| r.confidence).fold(0.0_f64, f64::max);
        let needed = self.min_matches.max(1);
        let coverage = (matched.len() as f64 / needed as f64).min(1.0);
        SlotScore {
            score: clamp_confidence(best * coverage),
            matched: matched.iter().map(|r| r.id).collect(),
        }
    }
}

/// A diagnostic pattern mapping evidence to a candidate cause
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub cause_id: String,
    pub base_confidence: f64,
    #[serde(default, rename = "slot")]
    pub slots: Vec<EvidenceSlot>,
    #[serde(default)]
    pub remediation: String,
}

impl Rule {
    pub fn new(id: &str, name: &str, cause_id: &str, base_confidence: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            cause_id: cause_id.to_string(),
            base_confidence,
            slots: Vec::new(),
            remediation: String::new(),
        }
    }

    pub fn slot(mut self, slot: EvidenceSlot) -> Self {
        self.slots.push(slot);
        self
    }

    pub fn with_remediation(mut self, text: &str) -> Self {
        self.remediation = text.to_string();
        self
    }

    /// Evaluate against a snapshot. Pure and deterministic.
    pub fn evaluate(&self, snapshot: &FactSnapshot) -> Option<Firing> {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        let mut any_match = false;
        let mut seen = BTreeSet::new();
        let mut evidence_refs = Vec::new();

        for slot in &self.slots {
            let slot_score = slot.score(snapshot);
            if slot.required && slot_score.score <= 0.0 {
                return None;
            }
            if slot_score.score > 0.0 {
                any_match = true;
                for id in slot_score.matched {
                    if seen.insert(id) {
                        evidence_refs.push(id);
                    }
                }
            }
            weighted += slot.weight * slot_score.score;
            total_weight += slot.weight;
        }

        if !any_match || total_weight <= 0.0 {
            return None;
        }

        let strength = weighted / total_weight;
        Some(Firing {
            rule_id: self.id.clone(),
            cause_id: self.cause_id.clone(),
            confidence: clamp_confidence(self.base_confidence * strength),
            evidence_refs,
            remediation: self.remediation.clone(),
        })
    }
}

/// One rule's match against a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Firing {
    pub rule_id: String,
    pub cause_id: String,
    pub confidence: f64,
    pub evidence_refs: Vec<EvidenceId>,
    #[serde(default)]
    pub remediation: String,
}

impl Firing {
    pub fn new(rule_id: &str, cause_id: &str, confidence: f64) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            cause_id: cause_id.to_string(),
            confidence,
            evidence_refs: Vec::new(),
            remediation: String::new(),
        }
    }

    pub fn with_evidence(mut self, refs: Vec<EvidenceId>) -> Self {
        self.evidence_refs = refs;
        self
    }

    pub fn with_remediation(mut self, text: &str) -> Self {
        self.remediation = text.to_string();
        self
    }
}
