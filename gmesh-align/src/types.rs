//! Core Types for the Alignment Engine
//!
//! Shared record types passed between the stages of the alignment pipeline:
//! - **Runner:** `MatcherResult` (one per configured matcher per run)
//! - **Loader:** `Correspondence` (one per row of a matcher's table)
//! - **Fuser:** `FusedMapping` (one per `(subject_id, object_id)` pair)
//!
//! Plus the error taxonomy shared by all stages.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Predicates
// ============================================================================

const SKOS_NAMESPACE: &str = "http://www.w3.org/2004/02/skos/core#";
const OWL_EQUIVALENT_CLASS: &str = "http://www.w3.org/2002/07/owl#equivalentClass";

/// SKOS mapping predicate of a correspondence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Predicate {
    ExactMatch,
    CloseMatch,
    BroadMatch,
    NarrowMatch,
    RelatedMatch,
}

impl Predicate {
    /// All predicates, in declaration order
    pub const ALL: [Predicate; 5] = [
        Predicate::ExactMatch,
        Predicate::CloseMatch,
        Predicate::BroadMatch,
        Predicate::NarrowMatch,
        Predicate::RelatedMatch,
    ];

    /// Bare SKOS local name (e.g. `exactMatch`)
    pub fn name(self) -> &'static str {
        match self {
            Self::ExactMatch => "exactMatch",
            Self::CloseMatch => "closeMatch",
            Self::BroadMatch => "broadMatch",
            Self::NarrowMatch => "narrowMatch",
            Self::RelatedMatch => "relatedMatch",
        }
    }

    /// Compact IRI used in exported tables (e.g. `skos:exactMatch`)
    pub fn curie(self) -> String {
        format!("skos:{}", self.name())
    }

    /// Specificity rank: exact > narrow/broad > close > related
    pub fn specificity(self) -> u8 {
        match self {
            Self::ExactMatch => 3,
            Self::NarrowMatch | Self::BroadMatch => 2,
            Self::CloseMatch => 1,
            Self::RelatedMatch => 0,
        }
    }

    /// Total order by specificity; `Greater` means more specific.
    ///
    /// Equal ranks (broadMatch vs narrowMatch) fall back to the name, with the
    /// alphabetically first name treated as more specific.
    pub fn cmp_specificity(self, other: Predicate) -> Ordering {
        self.specificity()
            .cmp(&other.specificity())
            .then_with(|| other.name().cmp(self.name()))
    }

    /// Most specific predicate in a collection
    pub fn most_specific<I>(predicates: I) -> Option<Predicate>
    where
        I: IntoIterator<Item = Predicate>,
    {
        predicates.into_iter().max_by(|a, b| a.cmp_specificity(*b))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "skos:{}", self.name())
    }
}

/// Predicate string that is not a recognised SKOS mapping predicate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown mapping predicate: '{0}'")]
pub struct UnknownPredicate(pub String);

impl FromStr for Predicate {
    type Err = UnknownPredicate;

    /// Accepts bare names, `skos:` CURIEs and full SKOS IRIs.
    /// `owl:equivalentClass` is read as `exactMatch`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed == "owl:equivalentClass" || trimmed == OWL_EQUIVALENT_CLASS {
            return Ok(Self::ExactMatch);
        }

        let local = trimmed
            .strip_prefix(SKOS_NAMESPACE)
            .or_else(|| trimmed.strip_prefix("skos:"))
            .unwrap_or(trimmed);

        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(local))
            .ok_or_else(|| UnknownPredicate(s.to_string()))
    }
}

// ============================================================================
// Correspondence (Loader output)
// ============================================================================

/// A single candidate mapping proposed by one matcher
///
/// Confidence is clamped into [0.0, 1.0] at construction; instances are
/// read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correspondence {
    subject_id: String,
    predicate: Predicate,
    object_id: String,
    confidence: f64,
    provider: String,
    justification: Option<String>,
}

impl Correspondence {
    /// Create new correspondence with clamped confidence (0.0-1.0)
    pub fn new(
        subject_id: impl Into<String>,
        predicate: Predicate,
        object_id: impl Into<String>,
        confidence: f64,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            predicate,
            object_id: object_id.into(),
            confidence: confidence.clamp(0.0, 1.0),
            provider: provider.into(),
            justification: None,
        }
    }

    /// Attach a mapping justification (e.g. `semapv:LexicalMatching`)
    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = Some(justification.into());
        self
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn predicate(&self) -> Predicate {
        self.predicate
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn justification(&self) -> Option<&str> {
        self.justification.as_deref()
    }

    /// `(subject_id, object_id)` grouping key
    pub fn pair(&self) -> (&str, &str) {
        (&self.subject_id, &self.object_id)
    }
}

// ============================================================================
// FusedMapping (Fuser output)
// ============================================================================

/// Consensus mapping for one `(subject_id, object_id)` pair
///
/// Built once by the fuser; `consensus_confidence` is the mean of the
/// per-matcher confidences and `support_count` is the number of distinct
/// supporting matchers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedMapping {
    subject_id: String,
    object_id: String,
    predicate: Predicate,
    consensus_confidence: f64,
    supporting_matchers: BTreeSet<String>,
    support_count: usize,
    confidences: BTreeMap<String, f64>,
    justifications: BTreeSet<String>,
}

impl FusedMapping {
    /// Build a fused mapping from per-matcher confidences
    ///
    /// # Arguments
    /// * `confidences` - matcher name → that matcher's confidence for the pair
    pub fn new(
        subject_id: impl Into<String>,
        object_id: impl Into<String>,
        predicate: Predicate,
        confidences: BTreeMap<String, f64>,
    ) -> Self {
        let confidences: BTreeMap<String, f64> = confidences
            .into_iter()
            .map(|(matcher, c)| (matcher, c.clamp(0.0, 1.0)))
            .collect();

        let consensus_confidence = if confidences.is_empty() {
            0.0
        } else {
            let sum: f64 = confidences.values().sum();
            (sum / confidences.len() as f64).clamp(0.0, 1.0)
        };

        let supporting_matchers: BTreeSet<String> = confidences.keys().cloned().collect();

        Self {
            subject_id: subject_id.into(),
            object_id: object_id.into(),
            predicate,
            consensus_confidence,
            support_count: supporting_matchers.len(),
            supporting_matchers,
            confidences,
            justifications: BTreeSet::new(),
        }
    }

    /// Attach the justifications reported by contributing matchers
    pub fn with_justifications<I, S>(mut self, justifications: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.justifications = justifications.into_iter().map(Into::into).collect();
        self
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    pub fn predicate(&self) -> Predicate {
        self.predicate
    }

    pub fn consensus_confidence(&self) -> f64 {
        self.consensus_confidence
    }

    pub fn supporting_matchers(&self) -> &BTreeSet<String> {
        &self.supporting_matchers
    }

    pub fn support_count(&self) -> usize {
        self.support_count
    }

    /// Per-matcher confidences that produced the consensus
    pub fn confidences(&self) -> &BTreeMap<String, f64> {
        &self.confidences
    }

    /// Confidence reported by a specific matcher, if it supports this mapping
    pub fn confidence_of(&self, matcher: &str) -> Option<f64> {
        self.confidences.get(matcher).copied()
    }

    pub fn justifications(&self) -> &BTreeSet<String> {
        &self.justifications
    }

    /// `(subject_id, object_id)` identity of this mapping
    pub fn pair(&self) -> (&str, &str) {
        (&self.subject_id, &self.object_id)
    }
}

/// Set of `(subject_id, object_id)` pairs, used for agreement and
/// reference comparison
pub type PairSet = BTreeSet<(String, String)>;

/// Collect `(subject_id, object_id)` pairs into a `PairSet`
pub fn pair_set<'a, I>(pairs: I) -> PairSet
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs
        .into_iter()
        .map(|(s, o)| (s.to_string(), o.to_string()))
        .collect()
}

// ============================================================================
// MatcherResult (Runner output)
// ============================================================================

/// Outcome of one matcher invocation
///
/// `success` reports whether the executor completed and produced its table.
/// A table that later fails to parse keeps `success = true` and carries the
/// `MatcherError::Parse` in `error`; its matcher contributes no correspondences.
#[derive(Debug, Clone)]
pub struct MatcherResult {
    pub matcher_name: String,
    pub success: bool,
    pub execution_time: Duration,
    pub error: Option<MatcherError>,
    pub output_path: Option<PathBuf>,
}

impl MatcherResult {
    /// Successful invocation that wrote `output_path`
    pub fn succeeded(
        matcher_name: impl Into<String>,
        execution_time: Duration,
        output_path: PathBuf,
    ) -> Self {
        Self {
            matcher_name: matcher_name.into(),
            success: true,
            execution_time,
            error: None,
            output_path: Some(output_path),
        }
    }

    /// Failed invocation (timeout, crash, unavailable executor)
    pub fn failed(
        matcher_name: impl Into<String>,
        execution_time: Duration,
        error: MatcherError,
    ) -> Self {
        Self {
            matcher_name: matcher_name.into(),
            success: false,
            execution_time,
            error: Some(error),
            output_path: None,
        }
    }

    /// Attach the parse failure of this matcher's output table
    pub fn with_parse_error(mut self, error: ParseError) -> Self {
        self.error = Some(MatcherError::Parse(error));
        self
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.error, Some(MatcherError::Timeout { .. }))
    }

    /// True when the matcher's table can feed fusion
    pub fn has_usable_output(&self) -> bool {
        self.success && self.error.is_none() && self.output_path.is_some()
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Per-matcher failure; never fatal to the run
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatcherError {
    /// Matcher exceeded its timeout and was cancelled
    #[error("Matcher timed out after {:.1}s", .timeout.as_secs_f64())]
    Timeout { timeout: Duration },

    /// Matcher process failed, crashed, or produced no output
    #[error("Matcher execution failed: {0}")]
    Execution(String),

    /// Health check failed before invocation
    #[error("Matcher not available: {0}")]
    Unavailable(String),

    /// Matcher output table could not be parsed
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Malformed correspondence table
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Parse error in {}{}: {message}", .path.display(), .line.map(|l| format!(" (line {})", l)).unwrap_or_default())]
pub struct ParseError {
    pub path: PathBuf,
    pub line: Option<u64>,
    pub message: String,
}

impl ParseError {
    pub fn new(path: impl Into<PathBuf>, line: Option<u64>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}

/// Invalid configuration; aborts the run before any work starts
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("Unknown voting strategy: '{0}'")]
    UnknownVotingStrategy(String),

    #[error("Unknown conflict resolution strategy: '{0}'")]
    UnknownResolutionStrategy(String),

    #[error("Total matcher count must be positive (got {0})")]
    NoMatchers(usize),

    #[error("{strategy} voting requires matcher weights")]
    WeightsRequired { strategy: String },

    #[error("Missing weight for matcher '{0}'")]
    MissingWeight(String),

    #[error("Duplicate matcher name: '{0}'")]
    DuplicateMatcher(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigurationError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Top-level error for pipeline and artifact operations
#[derive(Debug, Error)]
pub enum AlignError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Table export error: {0}")]
    Export(#[from] csv::Error),

    #[error("Report serialization error: {0}")]
    Report(#[from] serde_json::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Common error: {0}")]
    Common(#[from] gmesh_common::Error),
}

pub type AlignResult<T> = Result<T, AlignError>;

// ============================================================================
// Tests
// ============================================================================
