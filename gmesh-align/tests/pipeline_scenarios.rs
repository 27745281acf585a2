//! End-to-end alignment runs over scripted matchers

mod helpers;

use gmesh_align::pipeline::{align_tables, AlignmentPipeline, AlignmentSettings, TotalMatcherPolicy, FUSED_TABLE_FILE};
use gmesh_align::types::{MatcherError, Predicate};
use gmesh_align::voting::{VotingConfig, VotingStrategy};
use gmesh_align::{loader, ResolutionStrategy};
use helpers::{matcher, table, write_table, ScriptedExecutor, Workspace};
use std::time::Duration;

#[tokio::test]
async fn test_majority_consensus_of_two_out_of_three() {
    let ws = Workspace::new();
    let matchers = vec![
        matcher("A", ScriptedExecutor::writes(table("A", &[("S1", "skos:exactMatch", "O1", 0.9)]))),
        matcher("B", ScriptedExecutor::writes(table("B", &[("S1", "skos:exactMatch", "O1", 0.8)]))),
        matcher("C", ScriptedExecutor::writes(table("C", &[("S9", "skos:exactMatch", "O9", 0.6)]))),
    ];

    let outcome = AlignmentPipeline::new(matchers, AlignmentSettings::default())
        .unwrap()
        .run(&ws.source, &ws.target, &ws.output)
        .await
        .unwrap();

    assert_eq!(outcome.total_matchers, 3);
    let s1 = outcome
        .fused
        .iter()
        .find(|m| m.pair() == ("S1", "O1"))
        .expect("S1/O1 fused");
    assert!((s1.consensus_confidence() - 0.85).abs() < 1e-9);
    assert_eq!(s1.support_count(), 2);
    assert_eq!(
        s1.supporting_matchers().iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["A", "B"]
    );

    let accepted: Vec<_> = outcome.voting.accepted.iter().map(|m| m.pair()).collect();
    assert_eq!(accepted, vec![("S1", "O1")]);
    assert_eq!(outcome.final_mappings().len(), 1);
}

#[tokio::test]
async fn test_confidence_resolution_keeps_stronger_object() {
    let ws = Workspace::new();
    let matchers = vec![
        matcher("A", ScriptedExecutor::writes(table("A", &[("S1", "skos:exactMatch", "O1", 0.9)]))),
        matcher("B", ScriptedExecutor::writes(table("B", &[("S1", "skos:exactMatch", "O2", 0.95)]))),
    ];
    let settings = AlignmentSettings {
        voting: VotingConfig {
            min_support_count: 1,
            ..VotingConfig::with_strategy(VotingStrategy::Threshold)
        },
        resolution: ResolutionStrategy::Confidence,
        ..AlignmentSettings::default()
    };

    let outcome = AlignmentPipeline::new(matchers, settings)
        .unwrap()
        .run(&ws.source, &ws.target, &ws.output)
        .await
        .unwrap();

    assert_eq!(outcome.voting.accepted.len(), 2);
    let kept: Vec<_> = outcome.final_mappings().iter().map(|m| m.pair()).collect();
    assert_eq!(kept, vec![("S1", "O2")]);

    let report = &outcome.conflicts.report;
    assert_eq!(report.subject_groups(), 1);
    assert_eq!(report.discarded_count(), 1);
    assert_eq!(report.groups[0].discarded[0].mapping.pair(), ("S1", "O1"));
}

#[tokio::test]
async fn test_timed_out_matcher_excluded_from_total() {
    let ws = Workspace::new();
    let slow = ScriptedExecutor::slow(
        Duration::from_secs(5),
        table("C", &[("S1", "skos:exactMatch", "O1", 0.9)]),
    );
    let matchers = vec![
        matcher("A", ScriptedExecutor::writes(table("A", &[("S1", "skos:exactMatch", "O1", 0.9)]))),
        matcher("B", ScriptedExecutor::writes(table("B", &[("S1", "skos:exactMatch", "O1", 0.7)]))),
        matcher("C", slow).with_timeout(Duration::from_millis(100)),
    ];

    let started = std::time::Instant::now();
    let outcome = AlignmentPipeline::new(matchers, AlignmentSettings::default())
        .unwrap()
        .run(&ws.source, &ws.target, &ws.output)
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(4), "run waited for the slow matcher");

    let c = outcome
        .matcher_results
        .iter()
        .find(|r| r.matcher_name == "C")
        .unwrap();
    assert!(!c.success);
    assert!(c.is_timeout());
    assert!(matches!(c.error, Some(MatcherError::Timeout { .. })));

    assert_eq!(outcome.total_matchers, 2);
    assert!(outcome.fused.iter().all(|m| m.support_count() <= outcome.total_matchers));
    assert_eq!(outcome.final_mappings().len(), 1);
    assert_eq!(outcome.final_mappings()[0].support_count(), 2);
}

#[tokio::test]
async fn test_configured_policy_counts_failed_matchers() {
    let ws = Workspace::new();
    let matchers = vec![
        matcher(
            "A",
            ScriptedExecutor::writes(table(
                "A",
                &[("S1", "skos:exactMatch", "O1", 0.9), ("S2", "skos:exactMatch", "O2", 0.8)],
            )),
        ),
        matcher("B", ScriptedExecutor::writes(table("B", &[("S1", "skos:exactMatch", "O1", 0.7)]))),
        matcher("C", ScriptedExecutor::failing("container exited 137")),
        matcher(
            "D",
            ScriptedExecutor::slow(Duration::from_secs(5), table("D", &[("S2", "skos:exactMatch", "O2", 0.9)])),
        )
        .with_timeout(Duration::from_millis(100)),
    ];
    let settings = AlignmentSettings {
        total_policy: TotalMatcherPolicy::Configured,
        ..AlignmentSettings::default()
    };

    let outcome = AlignmentPipeline::new(matchers, settings)
        .unwrap()
        .run(&ws.source, &ws.target, &ws.output)
        .await
        .unwrap();

    assert_eq!(outcome.total_matchers, 4);
    assert_eq!(outcome.fused.len(), 2);
    assert!(outcome.fused.iter().all(|m| m.support_count() <= outcome.total_matchers));
    // 2 of 4 is not a majority once failed matchers count
    assert!(outcome.voting.accepted.is_empty());
    assert_eq!(outcome.failed_matchers().count(), 2);
}

#[tokio::test]
async fn test_no_successful_matchers_is_not_an_error() {
    let ws = Workspace::new();
    let matchers = vec![
        matcher("A", ScriptedExecutor::failing("segfault")),
        matcher("B", ScriptedExecutor::failing("out of memory")),
    ];

    let outcome = AlignmentPipeline::new(matchers, AlignmentSettings::default())
        .unwrap()
        .run(&ws.source, &ws.target, &ws.output)
        .await
        .unwrap();

    assert_eq!(outcome.total_matchers, 0);
    assert!(outcome.fused.is_empty());
    assert!(outcome.voting.accepted.is_empty());
    assert!(outcome.voting.rejected.is_empty());
    assert_eq!(outcome.quality.metrics.total_mappings, 0);
    assert_eq!(outcome.failed_matchers().count(), 2);

    let paths = outcome.write_artifacts(&ws.output).unwrap();
    assert!(loader::load_fused_table(&paths.fused_table).unwrap().is_empty());
}

#[tokio::test]
async fn test_same_matcher_duplicates_collapse_before_fusion() {
    let ws = Workspace::new();
    let a = write_table(
        ws.dir.path(),
        "a.tsv",
        "A",
        &[("S1", "skos:exactMatch", "O1", 0.7), ("S1", "skos:exactMatch", "O1", 0.9)],
    );

    let records = loader::load_as(&a, "A").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].confidence(), 0.9);

    let outcome = align_tables(&AlignmentSettings::default(), &[("A".to_string(), a)])
        .await
        .unwrap();
    assert_eq!(outcome.fused.len(), 1);
    assert_eq!(outcome.fused[0].support_count(), 1);
    assert_eq!(outcome.fused[0].confidence_of("A"), Some(0.9));
    assert_eq!(outcome.fused[0].consensus_confidence(), 0.9);
}

#[tokio::test]
async fn test_fused_table_written_and_reloadable() {
    let ws = Workspace::new();
    let matchers = vec![
        matcher("LogMap", ScriptedExecutor::writes(table("LogMap", &[("S1", "skos:exactMatch", "O1", 0.9)]))),
        matcher("AML", ScriptedExecutor::writes(table("AML", &[("S1", "skos:closeMatch", "O1", 0.6)]))),
    ];

    let outcome = AlignmentPipeline::new(matchers, AlignmentSettings::default())
        .unwrap()
        .run(&ws.source, &ws.target, &ws.output)
        .await
        .unwrap();
    let paths = outcome.write_artifacts(&ws.output).unwrap();
    assert_eq!(paths.fused_table, ws.output.join(FUSED_TABLE_FILE));

    let reloaded = loader::load_fused_table(&paths.fused_table).unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded[0].pair(), ("S1", "O1"));
    assert_eq!(reloaded[0].predicate(), Predicate::ExactMatch);
    assert_eq!(reloaded[0].support_count(), 2);
    assert!((reloaded[0].consensus_confidence() - 0.75).abs() < 1e-9);
}
