//! Append-only fact base for one diagnostic session.
//!
//! Observations of the same (source, key) are all retained in arrival
//! order; the latest is not assumed authoritative because late-arriving
//! logs may predate metrics. There is no update or delete: a correction is
//! a new record that supersedes an older one.
//!
//! Snapshots share storage with the base copy-on-write, so taking one is
//! cheap and later inserts never show up in an existing snapshot.

use crate::collector::SignalKind;
use crate::evidence::{
    Evidence, EvidenceId, EvidenceRecord, EvidenceSource, META_MISSING_SIGNAL,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

type Predicate = Arc<dyn Fn(&EvidenceRecord) -> bool + Send + Sync>;

/// A restartable query over records. Every field is optional.
#[derive(Clone, Default)]
pub struct FactQuery {
    source: Option<EvidenceSource>,
    key: Option<String>,
    predicate: Option<Predicate>,
}

impl FactQuery {
    /// Matches every record
    pub fn all() -> Self {
        Self::default()
    }

    pub fn source(mut self, source: EvidenceSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&EvidenceRecord) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    fn accepts(&self, record: &EvidenceRecord) -> bool {
        self.source.map_or(true, |s| s == record.source)
            && self.key.as_deref().map_or(true, |k| k == record.key)
            && self.predicate.as_ref().map_or(true, |p| p(record))
    }
}

impl std::fmt::Debug for FactQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactQuery")
            .field("source", &self.source)
            .field("key", &self.key)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
struct Store {
    /// Record with id N lives at position N - 1
    records: Vec<EvidenceRecord>,
    index: BTreeMap<(EvidenceSource, String), Vec<usize>>,
    superseded: BTreeSet<EvidenceId>,
}

impl Store {
    fn push(&mut self, evidence: Evidence, supersedes: Option<EvidenceId>) -> EvidenceId {
        let position = self.records.len();
        let id = EvidenceId(position as u64 + 1);
        let record = evidence.into_record(id, supersedes);
        self.index
            .entry((record.source, record.key.clone()))
            .or_default()
            .push(position);
        if let Some(old) = supersedes {
            self.superseded.insert(old);
        }
        self.records.push(record);
        id
    }

    fn get(&self, id: EvidenceId) -> Option<&EvidenceRecord> {
        let position = usize::try_from(id.0).ok()?.checked_sub(1)?;
        self.records.get(position)
    }

    fn query<'a>(&'a self, query: &'a FactQuery) -> Box<dyn Iterator<Item = &'a EvidenceRecord> + 'a> {
        match (query.source, query.key.as_deref()) {
            (Some(source), Some(key)) => {
                let positions = self
                    .index
                    .get(&(source, key.to_string()))
                    .map(|p| p.as_slice())
                    .unwrap_or(&[]);
                Box::new(
                    positions
                        .iter()
                        .map(move |&i| &self.records[i])
                        .filter(move |r| query.accepts(r)),
                )
            }
            _ => Box::new(self.records.iter().filter(move |r| query.accepts(r))),
        }
    }

    fn records_for(&self, source: EvidenceSource, key: &str) -> Vec<&EvidenceRecord> {
        self.index
            .get(&(source, key.to_string()))
            .map(|positions| positions.iter().map(|&i| &self.records[i]).collect())
            .unwrap_or_default()
    }

    fn effective(&self, source: EvidenceSource, key: &str) -> Vec<&EvidenceRecord> {
        self.records_for(source, key)
            .into_iter()
            .filter(|r| !self.superseded.contains(&r.id))
            .collect()
    }
}

/// Mutable, append-only side of the store. One producer per session.
#[derive(Debug, Clone, Default)]
pub struct FactBase {
    store: Arc<Store>,
}

impl FactBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and return its id
    pub fn insert(&mut self, evidence: Evidence) -> EvidenceId {
        Arc::make_mut(&mut self.store).push(evidence, None)
    }

    /// Append a correction of an existing record. The original is kept.
    /// Returns `None` if `original` is not in this base.
    pub fn supersede(&mut self, original: EvidenceId, evidence: Evidence) -> Option<EvidenceId> {
        self.store.get(original)?;
        Some(Arc::make_mut(&mut self.store).push(evidence, Some(original)))
    }

    /// Immutable view for rule evaluation
    pub fn snapshot(&self) -> FactSnapshot {
        FactSnapshot {
            store: Arc::clone(&self.store),
        }
    }

    pub fn query<'a>(&'a self, query: &'a FactQuery) -> impl Iterator<Item = &'a EvidenceRecord> + 'a {
        self.store.query(query)
    }

    pub fn get(&self, id: EvidenceId) -> Option<&EvidenceRecord> {
        self.store.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EvidenceRecord> {
        self.store.records.iter()
    }

    pub fn len(&self) -> usize {
        self.store.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.records.is_empty()
    }

    /// Number of records that are not meta facts
    pub fn observed_count(&self) -> usize {
        self.store.records.iter().filter(|r| !r.is_meta()).count()
    }

    pub fn has_signal(&self, signal: SignalKind) -> bool {
        let source = signal.source();
        self.store.records.iter().any(|r| r.source == source)
    }
}

/// Read-only view of a fact base at one point in time
#[derive(Debug, Clone)]
pub struct FactSnapshot {
    store: Arc<Store>,
}

impl FactSnapshot {
    pub fn query<'a>(&'a self, query: &'a FactQuery) -> impl Iterator<Item = &'a EvidenceRecord> + 'a {
        self.store.query(query)
    }

    pub fn get(&self, id: EvidenceId) -> Option<&EvidenceRecord> {
        self.store.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EvidenceRecord> {
        self.store.records.iter()
    }

    pub fn len(&self) -> usize {
        self.store.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.records.is_empty()
    }

    /// All records for (source, key), superseded ones included
    pub fn records_for(&self, source: EvidenceSource, key: &str) -> Vec<&EvidenceRecord> {
        self.store.records_for(source, key)
    }

    /// Records for (source, key) that no later record corrects
    pub fn effective(&self, source: EvidenceSource, key: &str) -> Vec<&EvidenceRecord> {
        self.store.effective(source, key)
    }

    pub fn is_superseded(&self, id: EvidenceId) -> bool {
        self.store.superseded.contains(&id)
    }

    /// Whether any non-meta record of this source was collected
    pub fn has_source(&self, source: EvidenceSource) -> bool {
        source != EvidenceSource::Meta && self.store.records.iter().any(|r| r.source == source)
    }

    /// Number of records that are not meta facts
    pub fn observed_count(&self) -> usize {
        self.store.records.iter().filter(|r| !r.is_meta()).count()
    }

    pub fn meta(&self, key: &str) -> Vec<&EvidenceRecord> {
        self.store.records_for(EvidenceSource::Meta, key)
    }

    /// Signal kinds recorded as entirely missing by the collector
    pub fn missing_signals(&self) -> Vec<SignalKind> {
        let mut signals: Vec<SignalKind> = self
            .meta(META_MISSING_SIGNAL)
            .iter()
            .filter_map(|r| SignalKind::parse(&r.value.as_text()))
            .collect();
        signals.sort();
        signals.dedup();
        signals
    }
}
