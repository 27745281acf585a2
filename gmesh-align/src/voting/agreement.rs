//! Matcher agreement and weight suggestion
//!
//! Agreement between two matchers is the Jaccard index of the
//! `(subject_id, object_id)` pairs each one supports in the fused set.

use crate::types::{FusedMapping, PairSet};
use std::collections::BTreeMap;
use tracing::debug;

/// Pairs supported by each matcher in the fused set
fn pairs_by_matcher(fused: &[FusedMapping]) -> BTreeMap<String, PairSet> {
    let mut by_matcher: BTreeMap<String, PairSet> = BTreeMap::new();
    for mapping in fused {
        for matcher in mapping.supporting_matchers() {
            by_matcher
                .entry(matcher.clone())
                .or_default()
                .insert((mapping.subject_id().to_string(), mapping.object_id().to_string()));
        }
    }
    by_matcher
}

fn jaccard(a: &PairSet, b: &PairSet) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Pairwise Jaccard agreement, keyed by `(matcher_a, matcher_b)` with
/// `matcher_a < matcher_b`
pub fn matcher_agreement(fused: &[FusedMapping]) -> BTreeMap<(String, String), f64> {
    let by_matcher = pairs_by_matcher(fused);
    let matchers: Vec<&String> = by_matcher.keys().collect();

    let mut agreement = BTreeMap::new();
    for (i, a) in matchers.iter().enumerate() {
        for b in &matchers[i + 1..] {
            let score = jaccard(&by_matcher[*a], &by_matcher[*b]);
            agreement.insert(((*a).clone(), (*b).clone()), score);
        }
    }
    agreement
}

/// Suggest normalized matcher weights (summing to 1.0)
///
/// With a reference set each matcher is scored by its precision against it;
/// otherwise by its mean agreement with every other matcher. When every score
/// is zero the weights are equal.
pub fn suggest_matcher_weights(fused: &[FusedMapping], reference: Option<&PairSet>) -> BTreeMap<String, f64> {
    let by_matcher = pairs_by_matcher(fused);
    if by_matcher.is_empty() {
        return BTreeMap::new();
    }

    let scores: BTreeMap<String, f64> = match reference {
        Some(reference) => by_matcher
            .iter()
            .map(|(matcher, pairs)| {
                let correct = pairs.intersection(reference).count();
                (matcher.clone(), correct as f64 / pairs.len() as f64)
            })
            .collect(),
        None => {
            let agreement = matcher_agreement(fused);
            by_matcher
                .keys()
                .map(|matcher| {
                    let involving: Vec<f64> = agreement
                        .iter()
                        .filter(|((a, b), _)| a == matcher || b == matcher)
                        .map(|(_, score)| *score)
                        .collect();
                    let mean = if involving.is_empty() {
                        0.0
                    } else {
                        involving.iter().sum::<f64>() / involving.len() as f64
                    };
                    (matcher.clone(), mean)
                })
                .collect()
        }
    };

    let total: f64 = scores.values().sum();
    let weights: BTreeMap<String, f64> = if total > 0.0 {
        scores.into_iter().map(|(m, s)| (m, s / total)).collect()
    } else {
        let equal = 1.0 / scores.len() as f64;
        scores.into_keys().map(|m| (m, equal)).collect()
    };

    debug!(?weights, with_reference = reference.is_some(), "Suggested matcher weights");
    weights
}
