//! Alignment Pipeline
//!
//! Wires the stages of one alignment run:
//! - **Phase 1**: Run matchers concurrently (`MatcherRunner`)
//! - **Phase 2**: Load each successful matcher's table (`loader::load_as`)
//! - **Phase 3**: Fuse, vote, resolve conflicts
//! - **Phase 4**: Quality metrics
//!
//! # Error Handling
//! - Configuration problems are rejected when the pipeline is built, before
//!   any matcher is invoked
//! - Matcher failures and unparseable tables are recorded on the matcher's
//!   `MatcherResult`; the run continues with whatever succeeded
//! - Zero usable matchers yields empty mapping sets, not an error
//!
//! # Example
//! ```rust,ignore
//! let pipeline = AlignmentPipeline::new(matchers, AlignmentSettings::default())?;
//! let outcome = pipeline.run(&source, &target, &output_dir).await?;
//! outcome.write_artifacts(&output_dir)?;
//! ```

use crate::conflict::{ConflictResolution, ConflictResolver, ResolutionStrategy};
use crate::fusion::Fuser;
use crate::loader;
use crate::quality::{QualityMetrics, QualityReport};
use crate::runner::{MatcherDescriptor, MatcherRunner};
use crate::types::{AlignResult, ConfigurationError, Correspondence, FusedMapping, MatcherResult};
use crate::voting::{Voter, VotingConfig, VotingResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Fused table written by `write_artifacts`
pub const FUSED_TABLE_FILE: &str = "fused_mappings.sssom.tsv";
pub const TEXT_REPORT_FILE: &str = "quality_report.txt";
pub const JSON_REPORT_FILE: &str = "quality_report.json";

// ============================================================================
// Events
// ============================================================================

/// Progress events emitted during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AlignmentEvent {
    RunStarted {
        run_id: Uuid,
        matchers: usize,
        /// Unix timestamp (seconds since epoch)
        timestamp: i64,
    },
    MatcherStarted {
        matcher: String,
    },
    MatcherFinished {
        matcher: String,
        success: bool,
        elapsed_ms: u64,
        error: Option<String>,
    },
    TableLoaded {
        matcher: String,
        correspondences: usize,
    },
    TableSkipped {
        matcher: String,
        error: String,
    },
    Fused {
        mappings: usize,
        total_matchers: usize,
    },
    Voted {
        accepted: usize,
        rejected: usize,
    },
    ConflictsResolved {
        groups: usize,
        discarded: usize,
    },
    RunCompleted {
        run_id: Uuid,
        final_mappings: usize,
        duration_ms: u64,
    },
}

// ============================================================================
// Settings
// ============================================================================

/// Which matchers count toward `total_matchers` in voting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalMatcherPolicy {
    /// Matchers whose executor completed (failed and timed-out excluded)
    #[default]
    Succeeded,
    /// Every configured matcher
    Configured,
}

/// Core settings of a run
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentSettings {
    /// Fuser confidence floor
    pub min_confidence: f64,
    pub voting: VotingConfig,
    pub resolution: ResolutionStrategy,
    pub total_policy: TotalMatcherPolicy,
}

impl Default for AlignmentSettings {
    fn default() -> Self {
        Self {
            min_confidence: 0.0,
            voting: VotingConfig::default(),
            resolution: ResolutionStrategy::default(),
            total_policy: TotalMatcherPolicy::default(),
        }
    }
}

impl AlignmentSettings {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigurationError::invalid(
                "alignment.min_confidence",
                format!("{} is outside [0, 1]", self.min_confidence),
            ));
        }
        self.voting.validate()
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct AlignmentOutcome {
    pub run_id: Uuid,
    pub matcher_results: Vec<MatcherResult>,
    pub total_matchers: usize,
    pub fused: Vec<FusedMapping>,
    pub voting: VotingResult,
    pub conflicts: ConflictResolution,
    pub quality: QualityReport,
}

/// Locations of the files written by `write_artifacts`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub fused_table: PathBuf,
    pub text_report: PathBuf,
    pub json_report: PathBuf,
}

impl AlignmentOutcome {
    /// Final mapping set (after voting and conflict resolution)
    pub fn final_mappings(&self) -> &[FusedMapping] {
        &self.conflicts.mappings
    }

    /// Matchers that failed or whose table could not be used
    pub fn failed_matchers(&self) -> impl Iterator<Item = &MatcherResult> {
        self.matcher_results.iter().filter(|r| !r.has_usable_output())
    }

    /// Write the fused table and both quality reports into `dir`
    pub fn write_artifacts(&self, dir: &Path) -> AlignResult<ArtifactPaths> {
        std::fs::create_dir_all(dir)?;
        let paths = ArtifactPaths {
            fused_table: dir.join(FUSED_TABLE_FILE),
            text_report: dir.join(TEXT_REPORT_FILE),
            json_report: dir.join(JSON_REPORT_FILE),
        };

        loader::write_fused_table(&paths.fused_table, self.final_mappings())?;
        std::fs::write(&paths.text_report, self.quality.render_text())?;
        std::fs::write(&paths.json_report, self.quality.to_json()?)?;

        info!(dir = %dir.display(), "Wrote alignment artifacts");
        Ok(paths)
    }
}

// ============================================================================
// Stages
// ============================================================================

/// Fuse → vote → resolve → report, over already-loaded tables
#[derive(Debug, Clone)]
struct Stages {
    fuser: Fuser,
    voter: Voter,
    resolver: ConflictResolver,
    total_policy: TotalMatcherPolicy,
}

impl Stages {
    fn new(settings: &AlignmentSettings) -> Result<Self, ConfigurationError> {
        settings.validate()?;
        Ok(Self {
            fuser: Fuser::new(settings.min_confidence),
            voter: Voter::new(settings.voting.clone())?,
            resolver: ConflictResolver::new(settings.resolution),
            total_policy: settings.total_policy,
        })
    }

    fn total_matchers(&self, results: &[MatcherResult]) -> usize {
        match self.total_policy {
            TotalMatcherPolicy::Succeeded => results.iter().filter(|r| r.success).count(),
            TotalMatcherPolicy::Configured => results.len(),
        }
    }

    async fn process(
        &self,
        run_id: Uuid,
        matcher_results: Vec<MatcherResult>,
        tables: Vec<Vec<Correspondence>>,
        events: &Events,
    ) -> AlignResult<AlignmentOutcome> {
        let total_matchers = self.total_matchers(&matcher_results);

        let fused = self.fuser.fuse(&tables);
        events
            .emit(AlignmentEvent::Fused {
                mappings: fused.len(),
                total_matchers,
            })
            .await;
        if fused.is_empty() {
            warn!(run_id = %run_id, "No fused mappings produced");
        }

        let voting = self.voter.vote(&fused, total_matchers)?;
        events
            .emit(AlignmentEvent::Voted {
                accepted: voting.accepted.len(),
                rejected: voting.rejected.len(),
            })
            .await;

        let conflicts = self.resolver.resolve(&voting.accepted);
        events
            .emit(AlignmentEvent::ConflictsResolved {
                groups: conflicts.report.total_groups(),
                discarded: conflicts.report.discarded_count(),
            })
            .await;

        let metrics = QualityMetrics::compute(&conflicts.mappings, Some(&conflicts.report));
        let quality = QualityReport::new(metrics).with_run_id(run_id);

        Ok(AlignmentOutcome {
            run_id,
            matcher_results,
            total_matchers,
            fused,
            voting,
            conflicts,
            quality,
        })
    }
}

/// Optional event sink
#[derive(Debug, Clone, Default)]
struct Events(Option<mpsc::Sender<AlignmentEvent>>);

impl Events {
    async fn emit(&self, event: AlignmentEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event).await;
        }
    }
}

/// Load the table of every matcher whose executor succeeded
///
/// A table that fails to parse is attached to that matcher's result and
/// contributes nothing.
async fn load_tables(results: Vec<MatcherResult>, events: &Events) -> (Vec<MatcherResult>, Vec<Vec<Correspondence>>) {
    let mut tables = Vec::new();
    let mut annotated = Vec::with_capacity(results.len());

    for result in results {
        let path = match (&result.output_path, result.success) {
            (Some(path), true) => path.clone(),
            _ => {
                annotated.push(result);
                continue;
            }
        };

        match loader::load_as(&path, &result.matcher_name) {
            Ok(records) => {
                events
                    .emit(AlignmentEvent::TableLoaded {
                        matcher: result.matcher_name.clone(),
                        correspondences: records.len(),
                    })
                    .await;
                tables.push(records);
                annotated.push(result);
            }
            Err(e) => {
                warn!(matcher = %result.matcher_name, error = %e, "Skipping unparseable matcher output");
                events
                    .emit(AlignmentEvent::TableSkipped {
                        matcher: result.matcher_name.clone(),
                        error: e.to_string(),
                    })
                    .await;
                annotated.push(result.with_parse_error(e));
            }
        }
    }

    (annotated, tables)
}

// ============================================================================
// Pipeline
// ============================================================================

/// End-to-end alignment of one ontology pair
pub struct AlignmentPipeline {
    runner: MatcherRunner,
    stages: Stages,
    events: Events,
}

impl AlignmentPipeline {
    /// Build a pipeline, rejecting invalid configuration up front
    ///
    /// For weighted voting every configured matcher needs a weight.
    pub fn new(matchers: Vec<MatcherDescriptor>, settings: AlignmentSettings) -> Result<Self, ConfigurationError> {
        let stages = Stages::new(&settings)?;

        if settings.voting.strategy.requires_weights() {
            if let Some(weights) = &settings.voting.matcher_weights {
                if let Some(missing) = matchers.iter().find(|m| !weights.contains_key(&m.name)) {
                    return Err(ConfigurationError::MissingWeight(missing.name.clone()));
                }
            }
        }

        Ok(Self {
            runner: MatcherRunner::new(matchers)?,
            stages,
            events: Events::default(),
        })
    }

    /// Emit progress events on `event_tx`
    pub fn with_events(mut self, event_tx: mpsc::Sender<AlignmentEvent>) -> Self {
        self.runner = self.runner.with_events(event_tx.clone());
        self.events = Events(Some(event_tx));
        self
    }

    pub fn runner(&self) -> &MatcherRunner {
        &self.runner
    }

    /// Run every matcher against `source`/`target` and fuse their output
    pub async fn run(&self, source: &Path, target: &Path, output_dir: &Path) -> AlignResult<AlignmentOutcome> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!(run_id = %run_id, matchers = self.runner.count(), "Alignment run started");

        self.events
            .emit(AlignmentEvent::RunStarted {
                run_id,
                matchers: self.runner.count(),
                timestamp: chrono::Utc::now().timestamp(),
            })
            .await;

        let results = self.runner.run(source, target, output_dir).await?;
        let (results, tables) = load_tables(results, &self.events).await;
        let outcome = self.stages.process(run_id, results, tables, &self.events).await?;

        finish(&outcome, started.elapsed(), &self.events).await;
        Ok(outcome)
    }
}

/// Fuse existing matcher tables without running any matcher
///
/// # Arguments
/// * `tables` - `(matcher name, table path)` pairs; each table's rows are
///   attributed to its matcher name
pub async fn align_tables(settings: &AlignmentSettings, tables: &[(String, PathBuf)]) -> AlignResult<AlignmentOutcome> {
    let stages = Stages::new(settings)?;
    let run_id = Uuid::new_v4();
    let started = Instant::now();
    let events = Events::default();

    let results = tables
        .iter()
        .map(|(name, path)| MatcherResult::succeeded(name, Duration::ZERO, path.clone()))
        .collect();
    let (results, loaded) = load_tables(results, &events).await;
    let outcome = stages.process(run_id, results, loaded, &events).await?;

    finish(&outcome, started.elapsed(), &events).await;
    Ok(outcome)
}

async fn finish(outcome: &AlignmentOutcome, elapsed: Duration, events: &Events) {
    let failed: Vec<&str> = outcome.failed_matchers().map(|r| r.matcher_name.as_str()).collect();
    info!(
        run_id = %outcome.run_id,
        total_matchers = outcome.total_matchers,
        fused = outcome.fused.len(),
        accepted = outcome.voting.accepted.len(),
        final_mappings = outcome.final_mappings().len(),
        ?failed,
        duration_ms = elapsed.as_millis() as u64,
        "Alignment run completed"
    );

    events
        .emit(AlignmentEvent::RunCompleted {
            run_id: outcome.run_id,
            final_mappings: outcome.final_mappings().len(),
            duration_ms: elapsed.as_millis() as u64,
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::mock::{descriptor, Behavior, MockExecutor};
    use crate::types::MatcherError;
    use crate::voting::VotingStrategy;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn table(rows: &[(&str, &str, f64)]) -> String {
        let mut content = String::from("subject_id\tpredicate_id\tobject_id\tconfidence\tmapping_provider\n");
        for (s, o, c) in rows {
            content.push_str(&format!("{}\tskos:exactMatch\t{}\t{}\tignored\n", s, o, c));
        }
        content
    }

    fn writes(rows: &[(&str, &str, f64)]) -> MockExecutor {
        MockExecutor::new(Behavior::WriteTable(table(rows)))
    }

    #[tokio::test]
    async fn test_end_to_end_majority() {
        let dir = TempDir::new().unwrap();
        let matchers = vec![
            descriptor("A", writes(&[("S1", "O1", 0.9)])),
            descriptor("B", writes(&[("S1", "O1", 0.8)])),
            descriptor("C", writes(&[("S2", "O2", 0.7)])),
        ];
        let pipeline = AlignmentPipeline::new(matchers, AlignmentSettings::default()).unwrap();

        let outcome = pipeline
            .run(&dir.path().join("s.owl"), &dir.path().join("t.owl"), &dir.path().join("out"))
            .await
            .unwrap();

        assert_eq!(outcome.total_matchers, 3);
        assert_eq!(outcome.fused.len(), 2);
        assert_eq!(outcome.final_mappings().len(), 1);
        assert_eq!(outcome.final_mappings()[0].pair(), ("S1", "O1"));
        assert_eq!(outcome.quality.metrics.total_mappings, 1);
    }

    #[tokio::test]
    async fn test_unparseable_table_attached_to_result() {
        let dir = TempDir::new().unwrap();
        let matchers = vec![
            descriptor("Good", writes(&[("S1", "O1", 0.9)])),
            descriptor("Bad", MockExecutor::new(Behavior::WriteTable("not\ta\ttable\n".to_string()))),
        ];
        let pipeline = AlignmentPipeline::new(matchers, AlignmentSettings::default()).unwrap();

        let outcome = pipeline
            .run(&dir.path().join("s.owl"), &dir.path().join("t.owl"), &dir.path().join("out"))
            .await
            .unwrap();

        let bad = &outcome.matcher_results[1];
        assert!(bad.success);
        assert!(matches!(bad.error, Some(MatcherError::Parse(_))));
        assert_eq!(outcome.failed_matchers().count(), 1);
        // Both executors completed, so both count toward the total
        assert_eq!(outcome.total_matchers, 2);
        assert!(outcome.final_mappings().is_empty(), "1 of 2 is not a majority");
    }

    #[tokio::test]
    async fn test_configured_total_policy() {
        let dir = TempDir::new().unwrap();
        let matchers = vec![
            descriptor("A", writes(&[("S1", "O1", 0.9)])),
            descriptor("B", writes(&[("S1", "O1", 0.8)])),
            descriptor("C", MockExecutor::new(Behavior::Fail("crash".to_string()))),
        ];
        let settings = AlignmentSettings {
            voting: VotingConfig::with_strategy(VotingStrategy::Unanimous),
            total_policy: TotalMatcherPolicy::Configured,
            ..AlignmentSettings::default()
        };

        let outcome = AlignmentPipeline::new(matchers, settings)
            .unwrap()
            .run(&dir.path().join("s.owl"), &dir.path().join("t.owl"), &dir.path().join("out"))
            .await
            .unwrap();

        assert_eq!(outcome.total_matchers, 3);
        assert!(outcome.voting.accepted.is_empty());
    }

    #[test]
    fn test_configuration_errors_before_running() {
        let weighted = AlignmentSettings {
            voting: VotingConfig::with_strategy(VotingStrategy::Weighted)
                .with_weights(BTreeMap::from([("A".to_string(), 1.0)])),
            ..AlignmentSettings::default()
        };
        let matchers = vec![
            descriptor("A", writes(&[])),
            descriptor("B", writes(&[])),
        ];
        assert!(matches!(
            AlignmentPipeline::new(matchers, weighted),
            Err(ConfigurationError::MissingWeight(name)) if name == "B"
        ));

        let bad_floor = AlignmentSettings {
            min_confidence: 2.0,
            ..AlignmentSettings::default()
        };
        assert!(AlignmentPipeline::new(vec![descriptor("A", writes(&[]))], bad_floor).is_err());
        assert!(AlignmentPipeline::new(Vec::new(), AlignmentSettings::default()).is_err());
    }

    #[tokio::test]
    async fn test_events_and_artifacts() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let pipeline = AlignmentPipeline::new(
            vec![descriptor("A", writes(&[("S1", "O1", 0.9)]))],
            AlignmentSettings::default(),
        )
        .unwrap()
        .with_events(tx);

        let out = dir.path().join("out");
        let outcome = pipeline
            .run(&dir.path().join("s.owl"), &dir.path().join("t.owl"), &out)
            .await
            .unwrap();
        drop(pipeline);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(serde_json::to_value(&event).unwrap()["type"].as_str().unwrap().to_string());
        }
        assert_eq!(kinds.first().map(String::as_str), Some("RunStarted"));
        assert_eq!(kinds.last().map(String::as_str), Some("RunCompleted"));
        assert!(kinds.iter().any(|k| k == "TableLoaded"));

        let paths = outcome.write_artifacts(&out).unwrap();
        assert!(paths.fused_table.exists());
        assert!(std::fs::read_to_string(&paths.text_report).unwrap().contains("MAPPING QUALITY REPORT"));
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&paths.json_report).unwrap()).unwrap();
        assert_eq!(json["metrics"]["total_mappings"], 1);
    }

    #[tokio::test]
    async fn test_align_existing_tables() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.tsv");
        let b = dir.path().join("b.tsv");
        std::fs::write(&a, table(&[("S1", "O1", 0.9)])).unwrap();
        std::fs::write(&b, table(&[("S1", "O1", 0.7), ("S2", "O2", 0.4)])).unwrap();

        let tables = vec![("A".to_string(), a), ("B".to_string(), b)];
        let outcome = align_tables(&AlignmentSettings::default(), &tables).await.unwrap();

        assert_eq!(outcome.total_matchers, 2);
        assert_eq!(outcome.final_mappings().len(), 1);
        assert_eq!(outcome.final_mappings()[0].support_count(), 2);
    }
}
