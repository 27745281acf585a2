//! Voter - acceptance policies over the fused mapping set
//!
//! | Strategy              | Accept condition                                        |
//! |-----------------------|---------------------------------------------------------|
//! | `majority`            | `support_count > total / 2`                             |
//! | `unanimous`           | `support_count == total`                                |
//! | `threshold`           | count, ratio and confidence floors all met              |
//! | `weighted`            | `Σ weight[m]` over supporters `> weight_threshold`      |
//! | `confidence_weighted` | `Σ weight[m] * confidence[m]` `> weight_threshold`      |
//!
//! Voting is a pure function of `(fused set, config, total)`.

pub mod agreement;

pub use agreement::{matcher_agreement, suggest_matcher_weights};

use crate::types::{ConfigurationError, FusedMapping};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

// ============================================================================
// Strategy
// ============================================================================

/// Acceptance policy applied to fused mappings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingStrategy {
    #[default]
    Majority,
    Unanimous,
    Threshold,
    Weighted,
    ConfidenceWeighted,
}

impl VotingStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Majority => "majority",
            Self::Unanimous => "unanimous",
            Self::Threshold => "threshold",
            Self::Weighted => "weighted",
            Self::ConfidenceWeighted => "confidence_weighted",
        }
    }

    /// True for strategies that read `matcher_weights`
    pub fn requires_weights(self) -> bool {
        matches!(self, Self::Weighted | Self::ConfidenceWeighted)
    }
}

impl fmt::Display for VotingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VotingStrategy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "majority" => Ok(Self::Majority),
            "unanimous" => Ok(Self::Unanimous),
            "threshold" => Ok(Self::Threshold),
            "weighted" => Ok(Self::Weighted),
            "confidence_weighted" => Ok(Self::ConfidenceWeighted),
            _ => Err(ConfigurationError::UnknownVotingStrategy(s.to_string())),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Voting configuration (`[voting]` table in TOML)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingConfig {
    pub strategy: VotingStrategy,

    /// THRESHOLD: minimum number of supporting matchers
    pub min_support_count: usize,

    /// THRESHOLD: minimum `support_count / total_matchers`
    pub min_support_ratio: f64,

    /// THRESHOLD: minimum consensus confidence
    pub min_confidence: f64,

    /// WEIGHTED / CONFIDENCE_WEIGHTED: matcher name → weight
    pub matcher_weights: Option<BTreeMap<String, f64>>,

    /// WEIGHTED / CONFIDENCE_WEIGHTED: score must exceed this value
    pub weight_threshold: f64,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            strategy: VotingStrategy::Majority,
            min_support_count: 2,
            min_support_ratio: 0.5,
            min_confidence: 0.0,
            matcher_weights: None,
            weight_threshold: 0.5,
        }
    }
}

impl VotingConfig {
    pub fn with_strategy(strategy: VotingStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    pub fn with_weights(mut self, weights: BTreeMap<String, f64>) -> Self {
        self.matcher_weights = Some(weights);
        self
    }

    /// Validate value ranges and strategy prerequisites
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(0.0..=1.0).contains(&self.min_support_ratio) {
            return Err(ConfigurationError::invalid(
                "voting.min_support_ratio",
                format!("{} is outside [0, 1]", self.min_support_ratio),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigurationError::invalid(
                "voting.min_confidence",
                format!("{} is outside [0, 1]", self.min_confidence),
            ));
        }
        if !self.weight_threshold.is_finite() {
            return Err(ConfigurationError::invalid(
                "voting.weight_threshold",
                "must be a finite number",
            ));
        }

        if self.strategy.requires_weights() {
            let weights = self.matcher_weights.as_ref().ok_or_else(|| {
                ConfigurationError::WeightsRequired {
                    strategy: self.strategy.to_string(),
                }
            })?;
            for (matcher, weight) in weights {
                if !weight.is_finite() || *weight < 0.0 {
                    return Err(ConfigurationError::invalid(
                        format!("voting.matcher_weights.{}", matcher),
                        format!("{} is not a non-negative number", weight),
                    ));
                }
            }
        }

        Ok(())
    }
}

// ============================================================================
// Voter
// ============================================================================

/// Partition of the fused set produced by one vote
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VotingResult {
    pub strategy: VotingStrategy,
    pub total_matchers: usize,
    pub accepted: Vec<FusedMapping>,
    pub rejected: Vec<FusedMapping>,
}

impl VotingResult {
    /// Fraction of fused mappings accepted (0.0 for an empty set)
    pub fn acceptance_rate(&self) -> f64 {
        let total = self.accepted.len() + self.rejected.len();
        if total == 0 {
            0.0
        } else {
            self.accepted.len() as f64 / total as f64
        }
    }
}

/// Applies one validated `VotingConfig`
#[derive(Debug, Clone)]
pub struct Voter {
    config: VotingConfig,
}

impl Voter {
    pub fn new(config: VotingConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &VotingConfig {
        &self.config
    }

    /// Check run-dependent prerequisites without voting
    ///
    /// A zero matcher total is only an error when there is something to vote
    /// on; weighted strategies need a weight for every contributing matcher.
    pub fn check(&self, fused: &[FusedMapping], total_matchers: usize) -> Result<(), ConfigurationError> {
        if total_matchers == 0 && !fused.is_empty() {
            return Err(ConfigurationError::NoMatchers(total_matchers));
        }

        if let Some(weights) = self.weights() {
            let missing = fused
                .iter()
                .flat_map(|m| m.supporting_matchers())
                .find(|matcher| !weights.contains_key(matcher.as_str()));
            if let Some(matcher) = missing {
                return Err(ConfigurationError::MissingWeight(matcher.clone()));
            }
        }

        Ok(())
    }

    /// Partition `fused` into accepted and rejected mappings
    ///
    /// All configuration problems surface before any record is classified.
    pub fn vote(&self, fused: &[FusedMapping], total_matchers: usize) -> Result<VotingResult, ConfigurationError> {
        self.check(fused, total_matchers)?;

        let (accepted, rejected): (Vec<FusedMapping>, Vec<FusedMapping>) = fused
            .iter()
            .cloned()
            .partition(|mapping| self.accepts(mapping, total_matchers));

        info!(
            strategy = %self.config.strategy,
            total_matchers,
            accepted = accepted.len(),
            rejected = rejected.len(),
            "Voting complete"
        );

        Ok(VotingResult {
            strategy: self.config.strategy,
            total_matchers,
            accepted,
            rejected,
        })
    }

    fn weights(&self) -> Option<&BTreeMap<String, f64>> {
        if self.config.strategy.requires_weights() {
            self.config.matcher_weights.as_ref()
        } else {
            None
        }
    }

    fn weight_of(&self, matcher: &str) -> f64 {
        self.config
            .matcher_weights
            .as_ref()
            .and_then(|w| w.get(matcher))
            .copied()
            .unwrap_or(0.0)
    }

    fn accepts(&self, mapping: &FusedMapping, total_matchers: usize) -> bool {
        let support = mapping.support_count();
        let accepted = match self.config.strategy {
            VotingStrategy::Majority => support * 2 > total_matchers,
            VotingStrategy::Unanimous => support == total_matchers,
            VotingStrategy::Threshold => {
                let ratio = support as f64 / total_matchers as f64;
                support >= self.config.min_support_count
                    && ratio >= self.config.min_support_ratio
                    && mapping.consensus_confidence() >= self.config.min_confidence
            }
            VotingStrategy::Weighted => {
                let score: f64 = mapping
                    .supporting_matchers()
                    .iter()
                    .map(|m| self.weight_of(m))
                    .sum();
                score > self.config.weight_threshold
            }
            VotingStrategy::ConfidenceWeighted => {
                let score: f64 = mapping
                    .confidences()
                    .iter()
                    .map(|(m, confidence)| self.weight_of(m) * confidence)
                    .sum();
                score > self.config.weight_threshold
            }
        };

        debug!(
            subject = mapping.subject_id(),
            object = mapping.object_id(),
            support,
            accepted,
            "Vote"
        );
        accepted
    }
}
