//! Fusion, voting and resolution properties over a fixed multi-matcher sample

mod helpers;

use gmesh_align::conflict::{ConflictResolver, ResolutionStrategy};
use gmesh_align::fusion::Fuser;
use gmesh_align::loader;
use gmesh_align::types::{Correspondence, FusedMapping, Predicate};
use gmesh_align::voting::{Voter, VotingConfig, VotingStrategy};
use std::collections::BTreeSet;
use tempfile::TempDir;

fn c(s: &str, p: Predicate, o: &str, confidence: f64, provider: &str) -> Correspondence {
    Correspondence::new(s, p, o, confidence, provider)
}

/// Three matchers with overlapping and conflicting output
fn sample_tables() -> Vec<Vec<Correspondence>> {
    vec![
        vec![
            c("S1", Predicate::ExactMatch, "O1", 0.9, "A"),
            c("S1", Predicate::CloseMatch, "O2", 0.4, "A"),
            c("S2", Predicate::ExactMatch, "O3", 0.8, "A"),
            c("S4", Predicate::BroadMatch, "O5", 0.3, "A"),
        ],
        vec![
            c("S1", Predicate::CloseMatch, "O1", 0.6, "B"),
            c("S2", Predicate::ExactMatch, "O3", 0.7, "B"),
            c("S3", Predicate::RelatedMatch, "O3", 0.95, "B"),
        ],
        vec![
            c("S1", Predicate::ExactMatch, "O2", 0.85, "C"),
            c("S2", Predicate::NarrowMatch, "O3", 0.5, "C"),
            c("S3", Predicate::ExactMatch, "O4", 0.2, "C"),
        ],
    ]
}

fn triples(mappings: &[FusedMapping]) -> BTreeSet<(String, Predicate, String)> {
    mappings
        .iter()
        .map(|m| (m.subject_id().to_string(), m.predicate(), m.object_id().to_string()))
        .collect()
}

#[test]
fn test_consensus_within_supporter_bounds() {
    let fused = Fuser::default().fuse(&sample_tables());
    assert!(!fused.is_empty());

    for mapping in &fused {
        let values: Vec<f64> = mapping.confidences().values().copied().collect();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        assert!((0.0..=1.0).contains(&mapping.consensus_confidence()));
        assert!(mapping.consensus_confidence() >= min - 1e-12);
        assert!(mapping.consensus_confidence() <= max + 1e-12);
        assert_eq!(mapping.support_count(), mapping.supporting_matchers().len());
        assert!(mapping.support_count() >= 1);
    }
}

#[test]
fn test_fusion_independent_of_table_order() {
    let tables = sample_tables();
    let expected = Fuser::default().fuse(&tables);

    let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
    for order in orders {
        let mut permuted: Vec<Vec<Correspondence>> = order.iter().map(|&i| tables[i].clone()).collect();
        for table in &mut permuted {
            table.reverse();
        }
        assert_eq!(Fuser::default().fuse(&permuted), expected, "order {:?}", order);
    }
}

#[test]
fn test_most_specific_predicate_wins() {
    let fused = Fuser::default().fuse(&sample_tables());
    let s2 = fused.iter().find(|m| m.pair() == ("S2", "O3")).unwrap();
    assert_eq!(s2.predicate(), Predicate::ExactMatch);
    assert_eq!(s2.support_count(), 3);

    let s1 = fused.iter().find(|m| m.pair() == ("S1", "O1")).unwrap();
    assert_eq!(s1.predicate(), Predicate::ExactMatch);
}

#[test]
fn test_floor_drops_weak_contributions() {
    let fused = Fuser::new(0.5).fuse(&sample_tables());
    assert!(fused.iter().all(|m| m.confidences().values().all(|&v| v >= 0.5)));
    assert!(!fused.iter().any(|m| m.pair() == ("S4", "O5")));
    assert!(!fused.iter().any(|m| m.pair() == ("S3", "O4")));
}

#[test]
fn test_export_reload_preserves_triples() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fused.sssom.tsv");
    let fused = Fuser::default().fuse(&sample_tables());

    loader::write_fused_table(&path, &fused).unwrap();
    let reloaded = loader::load_fused_table(&path).unwrap();

    assert_eq!(triples(&reloaded), triples(&fused));
    for (original, restored) in fused.iter().zip(&reloaded) {
        assert_eq!(original.pair(), restored.pair());
        assert_eq!(original.supporting_matchers(), restored.supporting_matchers());
        assert!((original.consensus_confidence() - restored.consensus_confidence()).abs() < 1e-9);
    }
}

#[test]
fn test_vote_is_idempotent() {
    let fused = Fuser::default().fuse(&sample_tables());
    let strategies = [
        VotingConfig::with_strategy(VotingStrategy::Majority),
        VotingConfig::with_strategy(VotingStrategy::Unanimous),
        VotingConfig {
            min_support_count: 1,
            min_confidence: 0.5,
            ..VotingConfig::with_strategy(VotingStrategy::Threshold)
        },
    ];

    for config in strategies {
        let voter = Voter::new(config).unwrap();
        let first = voter.vote(&fused, 3).unwrap();
        let second = voter.vote(&first.accepted, 3).unwrap();

        assert_eq!(second.accepted, first.accepted);
        assert!(second.rejected.is_empty());
        assert_eq!(first.accepted.len() + first.rejected.len(), fused.len());
    }
}

#[test]
fn test_confidence_resolution_keeps_best_of_each_group() {
    let fused = Fuser::default().fuse(&sample_tables());
    let resolution = ConflictResolver::new(ResolutionStrategy::Confidence).resolve(&fused);

    assert!(!resolution.report.is_empty());
    for group in &resolution.report.groups {
        for kept in &group.kept {
            for lost in &group.discarded {
                assert!(kept.consensus_confidence() >= lost.mapping.consensus_confidence());
            }
        }
    }

    let subjects: Vec<&str> = resolution.mappings.iter().map(|m| m.subject_id()).collect();
    let objects: Vec<&str> = resolution.mappings.iter().map(|m| m.object_id()).collect();
    assert_eq!(subjects.iter().collect::<BTreeSet<_>>().len(), subjects.len());
    assert_eq!(objects.iter().collect::<BTreeSet<_>>().len(), objects.len());
}

#[test]
fn test_keep_all_only_reports() {
    let fused = Fuser::default().fuse(&sample_tables());
    let resolution = ConflictResolver::new(ResolutionStrategy::KeepAll).resolve(&fused);

    assert_eq!(resolution.mappings.len(), fused.len());
    assert!(resolution.report.total_groups() > 0);
    assert_eq!(resolution.report.discarded_count(), 0);
}
