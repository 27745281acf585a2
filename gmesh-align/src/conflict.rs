//! Conflict Resolver
//!
//! A conflict is a set of accepted mappings sharing a `subject_id` but with
//! different objects (or symmetrically, sharing an `object_id` with different
//! subjects). Resolution runs in two passes:
//! 1. Subject-keyed groups over the accepted set
//! 2. Object-keyed groups over the survivors of pass 1
//!
//! With `keep_all` both passes run over the full set and only record.

use crate::types::{ConfigurationError, FusedMapping};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

// ============================================================================
// Strategy
// ============================================================================

/// How a conflict group picks its surviving member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Highest consensus confidence, then support, then `object_id`
    #[default]
    Confidence,
    /// Highest support count, then confidence, then `object_id`
    Support,
    /// Most specific predicate, then confidence, then `object_id`
    Specificity,
    /// Record conflicts without removing anything
    KeepAll,
}

impl ResolutionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confidence => "confidence",
            Self::Support => "support",
            Self::Specificity => "specificity",
            Self::KeepAll => "keep_all",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "confidence" => Ok(Self::Confidence),
            "support" => Ok(Self::Support),
            "specificity" => Ok(Self::Specificity),
            "keep_all" => Ok(Self::KeepAll),
            _ => Err(ConfigurationError::UnknownResolutionStrategy(s.to_string())),
        }
    }
}

// ============================================================================
// Report types
// ============================================================================

/// Shared identifier of a conflict group
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ConflictKey {
    Subject(String),
    Object(String),
}

impl ConflictKey {
    pub fn id(&self) -> &str {
        match self {
            Self::Subject(id) | Self::Object(id) => id,
        }
    }
}

impl fmt::Display for ConflictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subject(id) => write!(f, "subject {}", id),
            Self::Object(id) => write!(f, "object {}", id),
        }
    }
}

/// First criterion on which a discarded member lost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    LowerConfidence,
    LowerSupport,
    LessSpecificPredicate,
    /// Equal on every scored criterion; lost the `object_id` ordering
    TieBreak,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::LowerConfidence => "lower confidence",
            Self::LowerSupport => "lower support",
            Self::LessSpecificPredicate => "less specific predicate",
            Self::TieBreak => "tie-break",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscardedMapping {
    pub mapping: FusedMapping,
    pub reason: DiscardReason,
}

/// One detected conflict and its outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictGroup {
    pub key: ConflictKey,
    /// All members, best-ranked first
    pub members: Vec<FusedMapping>,
    pub kept: Vec<FusedMapping>,
    pub discarded: Vec<DiscardedMapping>,
}

/// Record of every conflict found in one resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictReport {
    pub strategy: ResolutionStrategy,
    pub groups: Vec<ConflictGroup>,
}

impl ConflictReport {
    pub fn total_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn subject_groups(&self) -> usize {
        self.groups
            .iter()
            .filter(|g| matches!(g.key, ConflictKey::Subject(_)))
            .count()
    }

    pub fn object_groups(&self) -> usize {
        self.total_groups() - self.subject_groups()
    }

    pub fn kept_count(&self) -> usize {
        self.groups.iter().map(|g| g.kept.len()).sum()
    }

    pub fn discarded_count(&self) -> usize {
        self.groups.iter().map(|g| g.discarded.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Final mapping set plus the report explaining it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictResolution {
    pub mappings: Vec<FusedMapping>,
    pub report: ConflictReport,
}

// ============================================================================
// Resolver
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Subject,
    Object,
}

/// Detects and resolves one-to-many conflicts in the accepted set
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    strategy: ResolutionStrategy,
}

impl ConflictResolver {
    pub fn new(strategy: ResolutionStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    /// Resolve subject conflicts, then object conflicts among the survivors
    pub fn resolve(&self, accepted: &[FusedMapping]) -> ConflictResolution {
        let (after_subjects, mut groups) = self.resolve_pass(accepted.to_vec(), KeyKind::Subject);
        let (mut mappings, object_groups) = self.resolve_pass(after_subjects, KeyKind::Object);
        groups.extend(object_groups);

        mappings.sort_by(|a, b| a.pair().cmp(&b.pair()));

        let report = ConflictReport {
            strategy: self.strategy,
            groups,
        };

        if !report.is_empty() {
            warn!(
                strategy = %self.strategy,
                subject_groups = report.subject_groups(),
                object_groups = report.object_groups(),
                discarded = report.discarded_count(),
                "Conflicting mappings detected"
            );
        }
        info!(
            input = accepted.len(),
            output = mappings.len(),
            conflict_groups = report.total_groups(),
            "Conflict resolution complete"
        );

        ConflictResolution { mappings, report }
    }

    /// Group by one key; returns survivors and the groups found
    fn resolve_pass(&self, mappings: Vec<FusedMapping>, kind: KeyKind) -> (Vec<FusedMapping>, Vec<ConflictGroup>) {
        let mut buckets: BTreeMap<String, Vec<FusedMapping>> = BTreeMap::new();
        for mapping in mappings {
            let id = match kind {
                KeyKind::Subject => mapping.subject_id(),
                KeyKind::Object => mapping.object_id(),
            }
            .to_string();
            buckets.entry(id).or_default().push(mapping);
        }

        let mut survivors = Vec::new();
        let mut groups = Vec::new();

        for (id, mut members) in buckets {
            if members.len() < 2 {
                survivors.append(&mut members);
                continue;
            }

            members.sort_by(|a, b| self.rank(a, b));
            let key = match kind {
                KeyKind::Subject => ConflictKey::Subject(id),
                KeyKind::Object => ConflictKey::Object(id),
            };

            let group = if self.strategy == ResolutionStrategy::KeepAll {
                ConflictGroup {
                    key,
                    kept: members.clone(),
                    discarded: Vec::new(),
                    members,
                }
            } else {
                let winner = members[0].clone();
                let discarded = members[1..]
                    .iter()
                    .map(|loser| DiscardedMapping {
                        reason: self.discard_reason(&winner, loser),
                        mapping: loser.clone(),
                    })
                    .collect();
                ConflictGroup {
                    key,
                    kept: vec![winner],
                    discarded,
                    members,
                }
            };

            debug!(
                key = %group.key,
                members = group.members.len(),
                kept = group.kept.len(),
                "Resolved conflict group"
            );
            survivors.extend(group.kept.iter().cloned());
            groups.push(group);
        }

        (survivors, groups)
    }

    /// Sort order for group members: `Less` ranks `a` ahead of `b`
    fn rank(&self, a: &FusedMapping, b: &FusedMapping) -> Ordering {
        let by_confidence = || b.consensus_confidence().total_cmp(&a.consensus_confidence());
        let by_support = || b.support_count().cmp(&a.support_count());
        let by_predicate = || b.predicate().cmp_specificity(a.predicate());
        let lexical = || (a.object_id(), a.subject_id()).cmp(&(b.object_id(), b.subject_id()));

        match self.strategy {
            ResolutionStrategy::Confidence | ResolutionStrategy::KeepAll => {
                by_confidence().then_with(by_support).then_with(lexical)
            }
            ResolutionStrategy::Support => by_support().then_with(by_confidence).then_with(lexical),
            ResolutionStrategy::Specificity => by_predicate().then_with(by_confidence).then_with(lexical),
        }
    }

    fn discard_reason(&self, winner: &FusedMapping, loser: &FusedMapping) -> DiscardReason {
        let confidence_differs = winner.consensus_confidence() != loser.consensus_confidence();
        let support_differs = winner.support_count() != loser.support_count();
        let predicate_differs = winner.predicate().cmp_specificity(loser.predicate()) != Ordering::Equal;

        let criteria: &[(bool, DiscardReason)] = match self.strategy {
            ResolutionStrategy::Confidence | ResolutionStrategy::KeepAll => &[
                (confidence_differs, DiscardReason::LowerConfidence),
                (support_differs, DiscardReason::LowerSupport),
            ],
            ResolutionStrategy::Support => &[
                (support_differs, DiscardReason::LowerSupport),
                (confidence_differs, DiscardReason::LowerConfidence),
            ],
            ResolutionStrategy::Specificity => &[
                (predicate_differs, DiscardReason::LessSpecificPredicate),
                (confidence_differs, DiscardReason::LowerConfidence),
            ],
        };

        criteria
            .iter()
            .find(|(differs, _)| *differs)
            .map(|(_, reason)| *reason)
            .unwrap_or(DiscardReason::TieBreak)
    }
}
