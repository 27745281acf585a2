//! Quality Reporter
//!
//! Read-only statistics over a finalized mapping set, plus precision/recall
//! against a reference alignment.

pub mod report;

pub use report::QualityReport;

use crate::conflict::{ConflictReport, ResolutionStrategy};
use crate::types::{FusedMapping, PairSet, Predicate};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Lower bounds of the 0.2-wide confidence histogram bins; the last bin is
/// closed at 1.0
const HISTOGRAM_LOWER_BOUNDS: [f64; 5] = [0.0, 0.2, 0.4, 0.6, 0.8];

// ============================================================================
// Metric types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

impl HistogramBin {
    pub fn label(&self) -> String {
        format!("{:.1}-{:.1}", self.lower, self.upper)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupportStats {
    pub min: usize,
    pub max: usize,
    pub mean: f64,
    /// support count → number of mappings with that support
    pub distribution: BTreeMap<usize, usize>,
}

/// Condensed view of a `ConflictReport`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictSummary {
    pub strategy: ResolutionStrategy,
    pub total_groups: usize,
    pub subject_groups: usize,
    pub object_groups: usize,
    pub kept: usize,
    pub discarded: usize,
    /// Conflicting keys in report order (e.g. `subject ex:S1`)
    pub keys: Vec<String>,
}

impl From<&ConflictReport> for ConflictSummary {
    fn from(report: &ConflictReport) -> Self {
        Self {
            strategy: report.strategy,
            total_groups: report.total_groups(),
            subject_groups: report.subject_groups(),
            object_groups: report.object_groups(),
            kept: report.kept_count(),
            discarded: report.discarded_count(),
            keys: report.groups.iter().map(|g| g.key.to_string()).collect(),
        }
    }
}

/// Exact `(subject_id, object_id)` comparison against a reference set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceComparison {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Aggregate statistics of a finalized mapping set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityMetrics {
    pub total_mappings: usize,
    pub unique_subjects: usize,
    pub unique_objects: usize,
    /// Mappings per distinct subject
    pub coverage_ratio: f64,
    /// `None` for an empty set
    pub confidence: Option<ConfidenceStats>,
    pub confidence_histogram: Vec<HistogramBin>,
    /// `None` for an empty set
    pub support: Option<SupportStats>,
    pub predicate_frequency: BTreeMap<Predicate, usize>,
    pub conflicts: Option<ConflictSummary>,
    pub reference: Option<ReferenceComparison>,
}

// ============================================================================
// Computation
// ============================================================================

impl QualityMetrics {
    /// Compute metrics for `mappings`, attaching the conflict summary if given
    pub fn compute(mappings: &[FusedMapping], conflicts: Option<&ConflictReport>) -> Self {
        if mappings.is_empty() {
            warn!("No mappings to compute quality metrics for");
        }

        let unique_subjects: BTreeSet<&str> = mappings.iter().map(|m| m.subject_id()).collect();
        let unique_objects: BTreeSet<&str> = mappings.iter().map(|m| m.object_id()).collect();

        let mut confidences: Vec<f64> = mappings.iter().map(|m| m.consensus_confidence()).collect();
        confidences.sort_by(|a, b| a.total_cmp(b));

        let mut predicate_frequency = BTreeMap::new();
        for mapping in mappings {
            *predicate_frequency.entry(mapping.predicate()).or_insert(0) += 1;
        }

        let metrics = Self {
            total_mappings: mappings.len(),
            unique_subjects: unique_subjects.len(),
            unique_objects: unique_objects.len(),
            coverage_ratio: mappings.len() as f64 / unique_subjects.len().max(1) as f64,
            confidence: confidence_stats(&confidences),
            confidence_histogram: histogram(&confidences),
            support: support_stats(mappings),
            predicate_frequency,
            conflicts: conflicts.map(ConflictSummary::from),
            reference: None,
        };

        info!(
            total_mappings = metrics.total_mappings,
            unique_subjects = metrics.unique_subjects,
            unique_objects = metrics.unique_objects,
            "Quality metrics calculated"
        );
        metrics
    }

    pub fn with_reference(mut self, comparison: ReferenceComparison) -> Self {
        self.reference = Some(comparison);
        self
    }

    /// Predicates ordered by descending frequency, then name
    pub fn predicates_by_frequency(&self) -> Vec<(Predicate, usize)> {
        let mut entries: Vec<(Predicate, usize)> =
            self.predicate_frequency.iter().map(|(p, c)| (*p, *c)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.name().cmp(b.0.name())));
        entries
    }
}

/// Percentile of sorted values with linear interpolation between ranks
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let Some(last) = sorted.len().checked_sub(1) else {
        return 0.0;
    };
    let position = q * last as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

fn confidence_stats(sorted: &[f64]) -> Option<ConfidenceStats> {
    let (&min, &max) = (sorted.first()?, sorted.last()?);
    let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
    Some(ConfidenceStats {
        min,
        max,
        mean,
        q1: percentile(sorted, 0.25),
        median: percentile(sorted, 0.5),
        q3: percentile(sorted, 0.75),
    })
}

fn histogram(confidences: &[f64]) -> Vec<HistogramBin> {
    let mut bins: Vec<HistogramBin> = HISTOGRAM_LOWER_BOUNDS
        .iter()
        .enumerate()
        .map(|(i, &lower)| HistogramBin {
            lower,
            upper: HISTOGRAM_LOWER_BOUNDS.get(i + 1).copied().unwrap_or(1.0),
            count: 0,
        })
        .collect();

    for &confidence in confidences {
        let index = HISTOGRAM_LOWER_BOUNDS
            .iter()
            .rposition(|&lower| confidence >= lower)
            .unwrap_or(0);
        bins[index].count += 1;
    }
    bins
}

fn support_stats(mappings: &[FusedMapping]) -> Option<SupportStats> {
    let counts: Vec<usize> = mappings.iter().map(|m| m.support_count()).collect();
    let min = *counts.iter().min()?;
    let max = *counts.iter().max()?;

    let mut distribution = BTreeMap::new();
    for &count in &counts {
        *distribution.entry(count).or_insert(0) += 1;
    }

    Some(SupportStats {
        min,
        max,
        mean: counts.iter().sum::<usize>() as f64 / counts.len() as f64,
        distribution,
    })
}

/// Precision, recall and F1 of `mappings` against `reference`
///
/// Candidate-only pairs are false positives, reference-only pairs are false
/// negatives. Ratios with a zero denominator are 0.0.
pub fn compare_with_reference(mappings: &[FusedMapping], reference: &PairSet) -> ReferenceComparison {
    let candidates: PairSet = crate::types::pair_set(mappings.iter().map(|m| m.pair()));

    let true_positives = candidates.intersection(reference).count();
    let false_positives = candidates.len() - true_positives;
    let false_negatives = reference.len() - true_positives;

    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
    let precision = ratio(true_positives, true_positives + false_positives);
    let recall = ratio(true_positives, true_positives + false_negatives);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    info!(
        true_positives,
        false_positives,
        false_negatives,
        "Comparison with reference: P={:.3}, R={:.3}, F1={:.3}",
        precision,
        recall,
        f1
    );

    ReferenceComparison {
        true_positives,
        false_positives,
        false_negatives,
        precision,
        recall,
        f1,
    }
}
