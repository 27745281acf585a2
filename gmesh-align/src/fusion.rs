//! Fuser - consensus over per-matcher correspondence tables
//!
//! Groups correspondences by `(subject_id, object_id)` across all matchers,
//! collapses same-matcher duplicates, and scores each group:
//! - `consensus_confidence` = mean of one confidence per distinct matcher
//! - `predicate` = most specific predicate among contributors
//!
//! Input ordering never affects output: groups live in ordered maps and the
//! result is sorted by `(subject_id, object_id)`.

use crate::types::{Correspondence, FusedMapping, Predicate};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// One matcher's contribution to a `(subject_id, object_id)` group
#[derive(Debug, Clone)]
struct Contribution {
    confidence: f64,
    predicate: Predicate,
    justification: Option<String>,
}

impl Contribution {
    fn from_record(record: &Correspondence) -> Self {
        Self {
            confidence: record.confidence(),
            predicate: record.predicate(),
            justification: record.justification().map(str::to_string),
        }
    }

    /// Higher confidence wins; more specific predicate on equal confidence
    fn beats(&self, other: &Contribution) -> bool {
        match self.confidence.total_cmp(&other.confidence) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.predicate.cmp_specificity(other.predicate) == Ordering::Greater,
        }
    }
}

type PairKey = (String, String);

/// Merges per-matcher correspondence lists into consensus mappings
#[derive(Debug, Clone)]
pub struct Fuser {
    min_confidence: f64,
}

impl Fuser {
    /// Create fuser with a confidence floor (clamped to 0.0-1.0)
    pub fn new(min_confidence: f64) -> Self {
        Self {
            min_confidence: min_confidence.clamp(0.0, 1.0),
        }
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    /// Fuse correspondence tables (one per successful matcher)
    ///
    /// Records below the confidence floor are dropped before grouping, so a
    /// matcher whose only record for a pair is below the floor does not
    /// count as support for that pair.
    pub fn fuse(&self, tables: &[Vec<Correspondence>]) -> Vec<FusedMapping> {
        let mut groups: BTreeMap<PairKey, BTreeMap<String, Contribution>> = BTreeMap::new();
        let mut filtered = 0usize;

        for record in tables.iter().flatten() {
            if record.confidence() < self.min_confidence {
                filtered += 1;
                continue;
            }

            let contribution = Contribution::from_record(record);
            let by_matcher = groups
                .entry((record.subject_id().to_string(), record.object_id().to_string()))
                .or_default();

            match by_matcher.get(record.provider()) {
                Some(existing) if !contribution.beats(existing) => {}
                _ => {
                    by_matcher.insert(record.provider().to_string(), contribution);
                }
            }
        }

        let fused: Vec<FusedMapping> = groups
            .into_iter()
            .filter_map(|((subject, object), by_matcher)| {
                let predicate = Predicate::most_specific(by_matcher.values().map(|c| c.predicate))?;
                let justifications: BTreeSet<String> = by_matcher
                    .values()
                    .filter_map(|c| c.justification.clone())
                    .collect();
                let confidences: BTreeMap<String, f64> = by_matcher
                    .into_iter()
                    .map(|(matcher, c)| (matcher, c.confidence))
                    .collect();

                let mapping = FusedMapping::new(subject, object, predicate, confidences)
                    .with_justifications(justifications);
                debug!(
                    subject = mapping.subject_id(),
                    object = mapping.object_id(),
                    predicate = %mapping.predicate(),
                    consensus = mapping.consensus_confidence(),
                    support = mapping.support_count(),
                    "Fused mapping"
                );
                Some(mapping)
            })
            .collect();

        info!(
            tables = tables.len(),
            below_floor = filtered,
            fused = fused.len(),
            min_confidence = self.min_confidence,
            "Fusion complete"
        );

        fused
    }
}

impl Default for Fuser {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Keep mappings supported by at least `min_support` matchers
pub fn filter_by_support(mappings: &[FusedMapping], min_support: usize) -> Vec<FusedMapping> {
    mappings
        .iter()
        .filter(|m| m.support_count() >= min_support)
        .cloned()
        .collect()
}

/// Keep mappings with consensus confidence of at least `min_consensus`
pub fn filter_by_consensus(mappings: &[FusedMapping], min_consensus: f64) -> Vec<FusedMapping> {
    mappings
        .iter()
        .filter(|m| m.consensus_confidence() >= min_consensus)
        .cloned()
        .collect()
}
