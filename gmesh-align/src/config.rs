//! Bootstrap configuration (`gmesh-align.toml`)
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [alignment]
//! min_confidence = 0.3
//! resolution = "confidence"
//! total_matchers = "succeeded"
//! output_dir = "/var/lib/graph-mesh/alignments"
//!
//! [voting]
//! strategy = "majority"
//!
//! [[matchers]]
//! name = "LogMap"
//! image = "graph-mesh/logmap:latest"
//! timeout_secs = 3600
//! health_check_timeout_secs = 30
//! ```
//!
//! Raw TOML sections keep strategy names as strings; `settings()` and
//! `descriptors()` turn them into typed core values and report every problem
//! as a `ConfigurationError`.

use crate::conflict::ResolutionStrategy;
use crate::pipeline::{AlignmentSettings, TotalMatcherPolicy};
use crate::runner::{CommandExecutor, MatcherDescriptor, DEFAULT_HEALTH_CHECK_TIMEOUT, DEFAULT_MATCHER_TIMEOUT};
use crate::types::ConfigurationError;
use crate::voting::{VotingConfig, VotingStrategy};
use gmesh_common::config::{load_toml, resolve_config_path, ConfigSource};
use gmesh_common::LoggingConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "GMESH_CONFIG";

/// Config file name under the platform config directories
pub const CONFIG_FILE_NAME: &str = "gmesh-align.toml";

/// Root of `gmesh-align.toml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlignConfig {
    pub logging: LoggingConfig,
    pub alignment: AlignmentSection,
    pub voting: VotingSection,
    pub matchers: Vec<MatcherSection>,
}

/// `[alignment]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlignmentSection {
    pub min_confidence: f64,
    pub resolution: String,
    pub total_matchers: TotalMatcherPolicy,
    pub output_dir: Option<PathBuf>,
}

impl Default for AlignmentSection {
    fn default() -> Self {
        Self {
            min_confidence: 0.0,
            resolution: ResolutionStrategy::default().to_string(),
            total_matchers: TotalMatcherPolicy::default(),
            output_dir: None,
        }
    }
}

/// `[voting]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VotingSection {
    pub strategy: String,
    pub min_support_count: usize,
    pub min_support_ratio: f64,
    pub min_confidence: f64,
    pub matcher_weights: Option<BTreeMap<String, f64>>,
    pub weight_threshold: f64,
}

impl Default for VotingSection {
    fn default() -> Self {
        let defaults = VotingConfig::default();
        Self {
            strategy: defaults.strategy.to_string(),
            min_support_count: defaults.min_support_count,
            min_support_ratio: defaults.min_support_ratio,
            min_confidence: defaults.min_confidence,
            matcher_weights: defaults.matcher_weights,
            weight_threshold: defaults.weight_threshold,
        }
    }
}

impl VotingSection {
    pub fn to_voting_config(&self) -> Result<VotingConfig, ConfigurationError> {
        let config = VotingConfig {
            strategy: self.strategy.parse::<VotingStrategy>()?,
            min_support_count: self.min_support_count,
            min_support_ratio: self.min_support_ratio,
            min_confidence: self.min_confidence,
            matcher_weights: self.matcher_weights.clone(),
            weight_threshold: self.weight_threshold,
        };
        config.validate()?;
        Ok(config)
    }
}

/// One `[[matchers]]` entry
///
/// Either `program` (+ `args`) or `image` (container with the standard
/// volume layout) must be set.
#[derive(Debug, Clone, Deserialize)]
pub struct MatcherSection {
    pub name: String,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_health_check")]
    pub health_check: bool,
    #[serde(default = "default_health_check_timeout_secs")]
    pub health_check_timeout_secs: u64,
    /// Health probe argv; defaults to `<program> --version`
    #[serde(default)]
    pub health_command: Option<Vec<String>>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_MATCHER_TIMEOUT.as_secs()
}

fn default_health_check() -> bool {
    true
}

fn default_health_check_timeout_secs() -> u64 {
    DEFAULT_HEALTH_CHECK_TIMEOUT.as_secs()
}

impl MatcherSection {
    pub fn to_descriptor(&self) -> Result<MatcherDescriptor, ConfigurationError> {
        let mut executor = match (&self.program, &self.image) {
            (Some(program), None) => CommandExecutor::new(program.clone(), self.args.clone()),
            (None, Some(image)) => CommandExecutor::container(image),
            (Some(_), Some(_)) => {
                return Err(ConfigurationError::invalid(
                    format!("matchers.{}", self.name),
                    "set either 'program' or 'image', not both",
                ));
            }
            (None, None) => {
                return Err(ConfigurationError::invalid(
                    format!("matchers.{}", self.name),
                    "one of 'program' or 'image' is required",
                ));
            }
        };
        if let Some(probe) = &self.health_command {
            executor = executor.with_health_probe(probe.clone());
        }

        Ok(MatcherDescriptor::new(self.name.clone(), Arc::new(executor))
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_health_check(self.health_check)
            .with_health_check_timeout(Duration::from_secs(self.health_check_timeout_secs)))
    }
}

impl AlignConfig {
    /// Load from an explicit path
    pub fn load(path: &Path) -> gmesh_common::Result<Self> {
        load_toml(path)
    }

    /// Resolve the config file (CLI → `GMESH_CONFIG` → user dir → system
    /// dir) and load it; built-in defaults when none exists
    pub fn resolve(cli_path: Option<&Path>) -> gmesh_common::Result<(Self, Option<(PathBuf, ConfigSource)>)> {
        match resolve_config_path(cli_path, CONFIG_ENV_VAR, CONFIG_FILE_NAME)? {
            Some((path, source)) => {
                info!(path = %path.display(), ?source, "Using configuration file");
                let config = Self::load(&path)?;
                Ok((config, Some((path, source))))
            }
            None => Ok((Self::default(), None)),
        }
    }

    /// Typed core settings
    pub fn settings(&self) -> Result<AlignmentSettings, ConfigurationError> {
        let settings = AlignmentSettings {
            min_confidence: self.alignment.min_confidence,
            voting: self.voting.to_voting_config()?,
            resolution: self.alignment.resolution.parse()?,
            total_policy: self.alignment.total_matchers,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Matcher registry built from `[[matchers]]`
    pub fn descriptors(&self) -> Result<Vec<MatcherDescriptor>, ConfigurationError> {
        self.matchers.iter().map(MatcherSection::to_descriptor).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[logging]
level = "debug"

[alignment]
min_confidence = 0.3
resolution = "specificity"
total_matchers = "configured"
output_dir = "/tmp/alignments"

[voting]
strategy = "weighted"
weight_threshold = 0.4

[voting.matcher_weights]
LogMap = 0.5
AML = 0.3

[[matchers]]
name = "LogMap"
image = "graph-mesh/logmap:latest"
timeout_secs = 600
health_check_timeout_secs = 5

[[matchers]]
name = "AML"
program = "aml"
args = ["-s", "{source}", "-t", "{target}", "-o", "{output}"]
health_check = false
"#;

    #[test]
    fn test_parse_sample() {
        let config: AlignConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.matchers.len(), 2);

        let settings = config.settings().unwrap();
        assert_eq!(settings.min_confidence, 0.3);
        assert_eq!(settings.resolution, ResolutionStrategy::Specificity);
        assert_eq!(settings.total_policy, TotalMatcherPolicy::Configured);
        assert_eq!(settings.voting.strategy, VotingStrategy::Weighted);
        assert_eq!(settings.voting.weight_threshold, 0.4);

        let descriptors = config.descriptors().unwrap();
        assert_eq!(descriptors[0].name, "LogMap");
        assert_eq!(descriptors[0].timeout, Duration::from_secs(600));
        assert!(descriptors[0].health_check_enabled);
        assert_eq!(descriptors[0].health_check_timeout, Duration::from_secs(5));
        assert_eq!(descriptors[1].health_check_timeout, DEFAULT_HEALTH_CHECK_TIMEOUT);
        assert_eq!(descriptors[1].timeout, DEFAULT_MATCHER_TIMEOUT);
        assert!(!descriptors[1].health_check_enabled);
    }

    #[test]
    fn test_defaults_when_empty() {
        let config: AlignConfig = toml::from_str("").unwrap();
        let settings = config.settings().unwrap();

        assert_eq!(settings, AlignmentSettings::default());
        assert!(config.descriptors().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_strategy_names() {
        let config: AlignConfig = toml::from_str("[voting]\nstrategy = \"plurality\"\n").unwrap();
        assert!(matches!(
            config.settings(),
            Err(ConfigurationError::UnknownVotingStrategy(_))
        ));

        let config: AlignConfig = toml::from_str("[alignment]\nresolution = \"coin_flip\"\n").unwrap();
        assert!(matches!(
            config.settings(),
            Err(ConfigurationError::UnknownResolutionStrategy(_))
        ));
    }

    #[test]
    fn test_matcher_needs_program_or_image() {
        let config: AlignConfig = toml::from_str("[[matchers]]\nname = \"X\"\n").unwrap();
        assert!(matches!(
            config.descriptors(),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, SAMPLE).unwrap();

        let (config, resolved) = AlignConfig::resolve(Some(&path)).unwrap();
        assert_eq!(config.matchers.len(), 2);
        assert_eq!(resolved.map(|(_, source)| source), Some(ConfigSource::CommandLine));
    }
}
