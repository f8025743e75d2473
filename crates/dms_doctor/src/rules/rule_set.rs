//! Validated rule library

use super::{catalog, Condition, Rule};
use crate::error::{DoctorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

/// Human-facing description of a root cause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CauseInfo {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
}

impl CauseInfo {
    pub fn new(id: &str, title: &str, description: &str, category: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            category: category.to_string(),
        }
    }
}

/// On-disk rule library layout
///
/// ```toml
/// [[cause]]
/// id = "source_endpoint_unreachable"
/// title = "Source endpoint unreachable"
///
/// [[rule]]
/// id = "custom.source_down"
/// name = "Source connection test failed"
/// cause_id = "source_endpoint_unreachable"
/// base_confidence = 0.8
///
/// [[rule.slot]]
/// source = "status"
/// key = "sourceConnection"
/// op = "equals"
/// value = "failed"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleLibrary {
    #[serde(default, rename = "cause")]
    pub causes: Vec<CauseInfo>,
    #[serde(default, rename = "rule")]
    pub rules: Vec<Rule>,
}

/// The active rule library: causes plus the rules that point at them.
///
/// Rules are kept sorted by id; every `matches` pattern is compiled once.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    causes: BTreeMap<String, CauseInfo>,
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Validate and compile a library
    pub fn new(causes: Vec<CauseInfo>, rules: Vec<Rule>) -> Result<Self> {
        let mut cause_map = BTreeMap::new();
        for cause in causes {
            if cause.id.trim().is_empty() {
                return Err(DoctorError::Configuration("cause with empty id".to_string()));
            }
            if cause_map.contains_key(&cause.id) {
                return Err(DoctorError::Configuration(format!("duplicate cause id: {}", cause.id)));
            }
            cause_map.insert(cause.id.clone(), cause);
        }

        let mut seen = BTreeSet::new();
        let mut prepared = Vec::with_capacity(rules.len());
        for mut rule in rules {
            if !seen.insert(rule.id.clone()) {
                return Err(DoctorError::DuplicateRule(rule.id));
            }
            validate_rule(&mut rule)?;
            if !cause_map.contains_key(&rule.cause_id) {
                return Err(DoctorError::UnknownCause {
                    rule_id: rule.id,
                    cause_id: rule.cause_id,
                });
            }
            prepared.push(rule);
        }
        prepared.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(Self {
            causes: cause_map,
            rules: prepared,
        })
    }

    /// The built-in DMS rule library
    pub fn builtin() -> Result<Self> {
        Self::new(catalog::builtin_causes(), catalog::builtin_rules())
    }

    /// Parse a TOML rule library
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let library: RuleLibrary = toml::from_str(content)?;
        Self::from_library(library)
    }

    pub fn from_library(library: RuleLibrary) -> Result<Self> {
        Self::new(library.causes, library.rules)
    }

    /// Load a TOML rule library from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let set = Self::from_toml_str(&content).map_err(|e| match e {
            DoctorError::TomlParse(err) => {
                DoctorError::Configuration(format!("rule file {}: {}", path.display(), err))
            }
            other => other,
        })?;
        debug!(path = %path.display(), rules = set.len(), "loaded rule library");
        Ok(set)
    }

    /// Union of two libraries. Rule ids must not collide; a cause declared
    /// in both keeps `other`'s description.
    pub fn merge(self, other: RuleSet) -> Result<Self> {
        let mut causes = self.causes;
        for (id, cause) in other.causes {
            causes.insert(id, cause);
        }
        let mut rules = self.rules;
        rules.extend(other.rules);
        Self::new(causes.into_values().collect(), rules)
    }

    /// Drop rules by id. Unknown ids are a configuration error.
    pub fn without(self, ids: &[String]) -> Result<Self> {
        for id in ids {
            if !self.rules.iter().any(|r| &r.id == id) {
                return Err(DoctorError::Configuration(format!(
                    "cannot disable unknown rule '{}'",
                    id
                )));
            }
        }
        let rules = self
            .rules
            .into_iter()
            .filter(|r| !ids.contains(&r.id))
            .collect();
        Ok(Self {
            causes: self.causes,
            rules,
        })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn causes(&self) -> impl Iterator<Item = &CauseInfo> {
        self.causes.values()
    }

    pub fn cause(&self, id: &str) -> Option<&CauseInfo> {
        self.causes.get(id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Export as a serializable library
    pub fn to_library(&self) -> RuleLibrary {
        RuleLibrary {
            causes: self.causes.values().cloned().collect(),
            rules: self.rules.clone(),
        }
    }
}

fn validate_rule(rule: &mut Rule) -> Result<()> {
    let invalid = |reason: String| DoctorError::InvalidRule {
        rule_id: rule.id.clone(),
        reason,
    };

    if rule.id.trim().is_empty() {
        return Err(DoctorError::InvalidRule {
            rule_id: rule.id.clone(),
            reason: "empty id".to_string(),
        });
    }
    if !rule.base_confidence.is_finite() || rule.base_confidence <= 0.0 || rule.base_confidence > 1.0 {
        return Err(invalid(format!(
            "base_confidence {} outside (0, 1]",
            rule.base_confidence
        )));
    }
    if rule.slots.is_empty() {
        return Err(invalid("no evidence slots".to_string()));
    }

    let mut errors = Vec::new();
    for slot in &rule.slots {
        if slot.key.trim().is_empty() {
            errors.push("slot with empty key".to_string());
        }
        if !slot.weight.is_finite() || slot.weight <= 0.0 {
            errors.push(format!("slot '{}': weight {} must be positive", slot.key, slot.weight));
        }
        if slot.min_matches == 0 {
            errors.push(format!("slot '{}': min_matches must be at least 1", slot.key));
        }
        match &slot.condition {
            Condition::Above { threshold } | Condition::Below { threshold } if !threshold.is_finite() => {
                errors.push(format!("slot '{}': threshold must be finite", slot.key));
            }
            Condition::OneOf { values } if values.is_empty() => {
                errors.push(format!("slot '{}': one_of needs at least one value", slot.key));
            }
            _ => {}
        }
    }
    if let Some(reason) = errors.into_iter().next() {
        return Err(invalid(reason));
    }

    for slot in rule.slots.iter_mut() {
        slot.prepare().map_err(|reason| DoctorError::InvalidRule {
            rule_id: rule.id.clone(),
            reason,
        })?;
    }
    Ok(())
}
