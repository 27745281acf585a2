//! gmesh-align - Main entry point
//!
//! Subcommands:
//! - `run`: run the configured matchers on an ontology pair and fuse
//! - `fuse`: fuse existing matcher tables
//! - `evaluate`: score a fused table against a reference alignment

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gmesh_align::config::AlignConfig;
use gmesh_align::pipeline::{align_tables, AlignmentEvent, AlignmentOutcome, AlignmentPipeline};
use gmesh_align::quality::{compare_with_reference, QualityMetrics, QualityReport};
use gmesh_align::types::pair_set;
use gmesh_align::{loader, ResolutionStrategy, VotingStrategy};
use gmesh_common::logging::init_tracing;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const DEFAULT_OUTPUT_DIR: &str = "alignment-output";

/// Command-line arguments for gmesh-align
#[derive(Parser, Debug)]
#[command(name = "gmesh-align")]
#[command(about = "Ontology matcher ensemble: fusion, voting and conflict resolution")]
#[command(version)]
struct Cli {
    /// Configuration file (overrides GMESH_CONFIG and the default locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every configured matcher on a source/target ontology pair
    Run {
        #[arg(long)]
        source: PathBuf,

        #[arg(long)]
        target: PathBuf,

        /// Output directory (default: [alignment] output_dir)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Fuse existing matcher tables (NAME=PATH, repeatable)
    Fuse {
        #[arg(long = "mapping", value_parser = parse_named_path, required = true)]
        mappings: Vec<(String, PathBuf)>,

        /// Voting strategy (overrides [voting] strategy)
        #[arg(long)]
        strategy: Option<String>,

        /// Conflict resolution strategy (overrides [alignment] resolution)
        #[arg(long)]
        resolution: Option<String>,

        /// Fuser confidence floor (overrides [alignment] min_confidence)
        #[arg(long)]
        min_confidence: Option<f64>,

        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Compare a fused table with a reference alignment
    Evaluate {
        #[arg(long)]
        mappings: PathBuf,

        #[arg(long)]
        reference: PathBuf,

        /// Print the JSON report instead of text
        #[arg(long)]
        json: bool,
    },
}

fn parse_named_path(value: &str) -> Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((name, path)) if !name.trim().is_empty() && !path.trim().is_empty() => {
            Ok((name.trim().to_string(), PathBuf::from(path.trim())))
        }
        _ => Err(format!("expected NAME=PATH, got '{}'", value)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, config_path) =
        AlignConfig::resolve(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging).context("Failed to initialize logging")?;

    match &config_path {
        Some((path, source)) => info!(path = %path.display(), ?source, "Configuration loaded"),
        None => info!("No configuration file found, using defaults"),
    }

    match cli.command {
        Command::Run {
            source,
            target,
            output_dir,
        } => {
            let output_dir = output_dir
                .or_else(|| config.alignment.output_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
            run(&config, &source, &target, &output_dir).await
        }
        Command::Fuse {
            mappings,
            strategy,
            resolution,
            min_confidence,
            output_dir,
        } => {
            let mut settings = config.settings().context("Invalid configuration")?;
            if let Some(strategy) = strategy {
                settings.voting.strategy = strategy.parse::<VotingStrategy>()?;
            }
            if let Some(resolution) = resolution {
                settings.resolution = resolution.parse::<ResolutionStrategy>()?;
            }
            if let Some(min_confidence) = min_confidence {
                settings.min_confidence = min_confidence;
            }

            let output_dir = output_dir
                .or_else(|| config.alignment.output_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
            let outcome = align_tables(&settings, &mappings).await?;
            finish(&outcome, &output_dir)
        }
        Command::Evaluate {
            mappings,
            reference,
            json,
        } => evaluate(&mappings, &reference, json),
    }
}

async fn run(config: &AlignConfig, source: &Path, target: &Path, output_dir: &Path) -> Result<()> {
    for path in [source, target] {
        if !path.exists() {
            bail!("Ontology not found: {}", path.display());
        }
    }

    let descriptors = config.descriptors().context("Invalid matcher configuration")?;
    if descriptors.is_empty() {
        bail!("No matchers configured; add [[matchers]] entries to the configuration file");
    }
    let settings = config.settings().context("Invalid configuration")?;

    let (event_tx, mut event_rx) = mpsc::channel::<AlignmentEvent>(100);
    let progress = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            debug!(?event, "Progress");
        }
    });

    let pipeline = AlignmentPipeline::new(descriptors, settings)?.with_events(event_tx);
    let outcome = pipeline.run(source, target, output_dir).await?;
    drop(pipeline);
    let _ = progress.await;

    finish(&outcome, output_dir)
}

fn finish(outcome: &AlignmentOutcome, output_dir: &Path) -> Result<()> {
    for failed in outcome.failed_matchers() {
        if let Some(error) = &failed.error {
            warn!(matcher = %failed.matcher_name, %error, "Matcher contributed no correspondences");
        }
    }

    let paths = outcome
        .write_artifacts(output_dir)
        .with_context(|| format!("Failed to write artifacts to {}", output_dir.display()))?;

    println!("{}", outcome.quality.render_text());
    info!(
        fused_table = %paths.fused_table.display(),
        text_report = %paths.text_report.display(),
        json_report = %paths.json_report.display(),
        "Artifacts written"
    );
    Ok(())
}

fn evaluate(mappings: &Path, reference: &Path, json: bool) -> Result<()> {
    let candidates = loader::load_fused_table(mappings)
        .with_context(|| format!("Failed to load mappings from {}", mappings.display()))?;
    let reference_rows = loader::load_as(reference, "reference")
        .with_context(|| format!("Failed to load reference from {}", reference.display()))?;
    let reference_pairs = pair_set(reference_rows.iter().map(|c| c.pair()));

    let comparison = compare_with_reference(&candidates, &reference_pairs);
    let report = QualityReport::new(QualityMetrics::compute(&candidates, None).with_reference(comparison));

    if json {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", report.render_text());
    }
    Ok(())
}
