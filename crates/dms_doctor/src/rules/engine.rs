//! Rule evaluation
//!
//! Rules are independent and read-only over an immutable snapshot, so
//! they can be evaluated in any order or in parallel. Output is always
//! sorted by rule id.

use super::{Firing, Rule, RuleSet};
use crate::fact_base::FactSnapshot;
use std::sync::Arc;
use tracing::{debug, warn};

/// Evaluate every rule against the snapshot
pub fn evaluate(snapshot: &FactSnapshot, rule_set: &RuleSet) -> Vec<Firing> {
    let mut firings = evaluate_rules(snapshot, rule_set.rules());
    sort_firings(&mut firings);
    debug!(rules = rule_set.len(), fired = firings.len(), "rules evaluated");
    firings
}

/// Evaluate across `workers` blocking tasks. Returns exactly what
/// `evaluate` returns for the same inputs.
pub async fn evaluate_parallel(
    snapshot: Arc<FactSnapshot>,
    rule_set: Arc<RuleSet>,
    workers: usize,
) -> Vec<Firing> {
    let total = rule_set.len();
    let chunk = ((total + workers.max(1) - 1) / workers.max(1)).max(1);

    let mut handles = Vec::new();
    for start in (0..total).step_by(chunk) {
        let end = (start + chunk).min(total);
        let snapshot = Arc::clone(&snapshot);
        let rules = Arc::clone(&rule_set);
        let handle = tokio::task::spawn_blocking(move || evaluate_rules(&snapshot, &rules.rules()[start..end]));
        handles.push((start, end, handle));
    }

    let mut firings = Vec::new();
    for (start, end, handle) in handles {
        match handle.await {
            Ok(mut chunk_firings) => firings.append(&mut chunk_firings),
            Err(err) => {
                warn!(start, end, error = %err, "evaluation worker failed, evaluating inline");
                firings.extend(evaluate_rules(&snapshot, &rule_set.rules()[start..end]));
            }
        }
    }

    sort_firings(&mut firings);
    debug!(rules = total, workers, fired = firings.len(), "rules evaluated in parallel");
    firings
}

fn evaluate_rules(snapshot: &FactSnapshot, rules: &[Rule]) -> Vec<Firing> {
    rules.iter().filter_map(|rule| rule.evaluate(snapshot)).collect()
}

fn sort_firings(firings: &mut [Firing]) {
    firings.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
}
