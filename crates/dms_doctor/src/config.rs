//! Engine configuration
//!
//! Read from TOML. Every key has a default so an empty file is valid.
//!
//! ```toml
//! min_confidence = 0.3
//! max_hypotheses = 5
//! fetch_timeout_secs = 30
//!
//! [rules]
//! include_builtin = true
//! files = ["rules/custom.toml"]
//! disabled = ["log.source_reader_warning"]
//!
//! [log]
//! level = "info"
//! ```
//!
//! Relative rule file paths resolve against the config file's directory.

use crate::collector::DEFAULT_OUT_OF_WINDOW_FACTOR;
use crate::correlator::{Correlator, DEFAULT_MAX_HYPOTHESES, DEFAULT_MIN_CONFIDENCE};
use crate::error::{DoctorError, Result};
use crate::rules::RuleSet;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable naming a config file
pub const CONFIG_ENV_VAR: &str = "DMS_DOCTOR_CONFIG";

/// Rule library selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Start from the built-in DMS library
    #[serde(default = "default_include_builtin")]
    pub include_builtin: bool,

    /// Extra TOML rule libraries merged on top
    #[serde(default)]
    pub files: Vec<PathBuf>,

    /// Rule ids to drop from the final set
    #[serde(default)]
    pub disabled: Vec<String>,
}

fn default_include_builtin() -> bool {
    true
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            include_builtin: default_include_builtin(),
            files: Vec::new(),
            disabled: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoctorConfig {
    /// Reporting floor for aggregate confidence
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Cap on ranked causes in the report
    #[serde(default = "default_max_hypotheses")]
    pub max_hypotheses: usize,

    /// Per-source fetch timeout
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Blocking workers for parallel rule evaluation
    #[serde(default = "default_evaluation_workers")]
    pub evaluation_workers: usize,

    /// Confidence multiplier for observations outside the request window
    #[serde(default = "default_out_of_window_factor")]
    pub out_of_window_factor: f64,

    #[serde(default)]
    pub rules: RulesConfig,

    #[serde(default)]
    pub log: LogConfig,

    /// Directory relative rule paths resolve against
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

fn default_min_confidence() -> f64 {
    DEFAULT_MIN_CONFIDENCE
}

fn default_max_hypotheses() -> usize {
    DEFAULT_MAX_HYPOTHESES
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_evaluation_workers() -> usize {
    4
}

fn default_out_of_window_factor() -> f64 {
    DEFAULT_OUT_OF_WINDOW_FACTOR
}

impl Default for DoctorConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            max_hypotheses: default_max_hypotheses(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            evaluation_workers: default_evaluation_workers(),
            out_of_window_factor: default_out_of_window_factor(),
            rules: RulesConfig::default(),
            log: LogConfig::default(),
            base_dir: None,
        }
    }
}

impl DoctorConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load a config file. Missing or unparseable files are errors.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            DoctorError::Configuration(format!("cannot read config {}: {}", path.display(), e))
        })?;
        let mut config: Self = toml::from_str(&content).map_err(|e| {
            DoctorError::Configuration(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Explicit path, then `$DMS_DOCTOR_CONFIG`, then defaults
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => Self::load(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn correlator(&self) -> Correlator {
        Correlator::new(self.min_confidence, self.max_hypotheses)
    }

    /// Check every setting and build the rule set it selects
    pub fn validate(&self) -> Result<()> {
        self.resolve_rule_set().map(|_| ())
    }

    /// Numeric settings only
    pub fn check_settings(&self) -> Result<()> {
        if !self.min_confidence.is_finite() || !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(DoctorError::Configuration(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        if !self.out_of_window_factor.is_finite() || !(0.0..=1.0).contains(&self.out_of_window_factor) {
            return Err(DoctorError::Configuration(format!(
                "out_of_window_factor must be within [0, 1], got {}",
                self.out_of_window_factor
            )));
        }
        if self.max_hypotheses == 0 {
            return Err(DoctorError::Configuration("max_hypotheses must be at least 1".to_string()));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(DoctorError::Configuration("fetch_timeout_secs must be at least 1".to_string()));
        }
        if self.evaluation_workers == 0 {
            return Err(DoctorError::Configuration("evaluation_workers must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Validate settings, then build: builtin (optional) + files - disabled
    pub fn resolve_rule_set(&self) -> Result<RuleSet> {
        self.check_settings()?;

        let mut set = if self.rules.include_builtin {
            RuleSet::builtin()?
        } else {
            RuleSet::default()
        };
        for file in &self.rules.files {
            let path = self.rule_path(file);
            let library = RuleSet::load(&path).map_err(|e| match e {
                DoctorError::Io(err) => {
                    DoctorError::Configuration(format!("cannot read rule file {}: {}", path.display(), err))
                }
                other => other,
            })?;
            set = set.merge(library)?;
        }
        let set = set.without(&self.rules.disabled)?;

        if set.is_empty() {
            return Err(DoctorError::Configuration("rule set is empty".to_string()));
        }
        debug!(rules = set.len(), "rule set resolved");
        Ok(set)
    }

    fn rule_path(&self, file: &Path) -> PathBuf {
        match &self.base_dir {
            Some(dir) if file.is_relative() => dir.join(file),
            _ => file.to_path_buf(),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DoctorError::Configuration(format!("cannot serialize config: {}", e)))
    }
}
