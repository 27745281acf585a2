//! Matcher Runner
//!
//! Runs every configured matcher concurrently, one task per matcher, and
//! collects exactly one `MatcherResult` per matcher.
//!
//! # Isolation
//! - Each matcher runs in its own spawned task with its own timeout
//! - A failing, hanging or panicking matcher never affects its siblings
//! - The health check (if enabled) runs before the timed invocation under
//!   its own short budget and does not consume the invocation timeout
//! - A table left over from an earlier run is removed before invoking, so
//!   only output written by this invocation counts
//! - `run()` returns only after every task has finished
//!
//! The runner records each matcher's output location but never parses it.

pub mod command;

pub use command::CommandExecutor;

use crate::pipeline::AlignmentEvent;
use crate::types::{AlignResult, ConfigurationError, MatcherError, MatcherResult};
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Default per-matcher timeout (one hour)
pub const DEFAULT_MATCHER_TIMEOUT: Duration = Duration::from_secs(3600);

/// Default budget for one health probe
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// File name a matcher writes into the output directory
pub fn output_file_name(matcher_name: &str) -> String {
    format!("{}.sssom.tsv", matcher_name.to_lowercase())
}

// ============================================================================
// Executor seam
// ============================================================================

/// One matcher invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentRequest {
    pub source_ontology: PathBuf,
    pub target_ontology: PathBuf,
    /// Where the matcher must write its correspondence table
    pub output_path: PathBuf,
}

impl AlignmentRequest {
    /// Directory containing `output_path`
    pub fn output_dir(&self) -> &Path {
        self.output_path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Capability to run one matcher tool
///
/// Implementations: `CommandExecutor` (external process or container).
/// Dropping the `execute` future must ask the underlying tool to stop.
#[async_trait]
pub trait MatcherExecutor: Send + Sync {
    /// Lightweight reachability probe
    async fn health_check(&self) -> Result<(), MatcherError> {
        Ok(())
    }

    /// Run the matcher; on success the table exists at `request.output_path`
    async fn execute(&self, request: &AlignmentRequest) -> Result<(), MatcherError>;
}

/// Matcher registry entry
#[derive(Clone)]
pub struct MatcherDescriptor {
    pub name: String,
    pub executor: Arc<dyn MatcherExecutor>,
    pub timeout: Duration,
    pub health_check_enabled: bool,
    pub health_check_timeout: Duration,
}

impl fmt::Debug for MatcherDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatcherDescriptor")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("health_check_enabled", &self.health_check_enabled)
            .field("health_check_timeout", &self.health_check_timeout)
            .finish_non_exhaustive()
    }
}

impl MatcherDescriptor {
    pub fn new(name: impl Into<String>, executor: Arc<dyn MatcherExecutor>) -> Self {
        Self {
            name: name.into(),
            executor,
            timeout: DEFAULT_MATCHER_TIMEOUT,
            health_check_enabled: true,
            health_check_timeout: DEFAULT_HEALTH_CHECK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_health_check(mut self, enabled: bool) -> Self {
        self.health_check_enabled = enabled;
        self
    }

    pub fn with_health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = timeout;
        self
    }

    pub fn output_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(output_file_name(&self.name))
    }
}

/// Check a matcher registry: non-empty, unique names (case-insensitive, since
/// names map to lowercased output files), positive timeouts
///
/// Names become file names inside the output directory, so path separators
/// and `..` are rejected.
pub fn validate_descriptors(matchers: &[MatcherDescriptor]) -> Result<(), ConfigurationError> {
    if matchers.is_empty() {
        return Err(ConfigurationError::NoMatchers(0));
    }

    let mut seen = HashSet::new();
    for matcher in matchers {
        if matcher.name.trim().is_empty() {
            return Err(ConfigurationError::invalid("matchers.name", "must not be empty"));
        }
        if !is_safe_file_stem(&matcher.name) {
            return Err(ConfigurationError::invalid(
                format!("matchers.{}", matcher.name),
                "name must not contain path separators or '..'",
            ));
        }
        if !seen.insert(matcher.name.to_lowercase()) {
            return Err(ConfigurationError::DuplicateMatcher(matcher.name.clone()));
        }
        if matcher.timeout.is_zero() {
            return Err(ConfigurationError::invalid(
                format!("matchers.{}.timeout", matcher.name),
                "must be positive",
            ));
        }
        if matcher.health_check_enabled && matcher.health_check_timeout.is_zero() {
            return Err(ConfigurationError::invalid(
                format!("matchers.{}.health_check_timeout", matcher.name),
                "must be positive",
            ));
        }
    }
    Ok(())
}

fn is_safe_file_stem(name: &str) -> bool {
    !name.contains(['/', '\\', '\0']) && !name.contains("..")
}

// ============================================================================
// Runner
// ============================================================================

/// Concurrent matcher executor with per-task timeouts and a join barrier
pub struct MatcherRunner {
    matchers: Vec<MatcherDescriptor>,
    event_tx: Option<mpsc::Sender<AlignmentEvent>>,
}

impl MatcherRunner {
    /// Create runner for a validated matcher registry
    pub fn new(matchers: Vec<MatcherDescriptor>) -> Result<Self, ConfigurationError> {
        validate_descriptors(&matchers)?;
        Ok(Self {
            matchers,
            event_tx: None,
        })
    }

    /// Emit per-matcher progress events on `event_tx`
    pub fn with_events(mut self, event_tx: mpsc::Sender<AlignmentEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn matchers(&self) -> &[MatcherDescriptor] {
        &self.matchers
    }

    pub fn count(&self) -> usize {
        self.matchers.len()
    }

    /// Run all matchers against one ontology pair
    ///
    /// # Returns
    /// One `MatcherResult` per configured matcher, in registry order.
    ///
    /// # Errors
    /// Only if the output directory cannot be created; matcher failures are
    /// recorded in their results.
    pub async fn run(
        &self,
        source_ontology: &Path,
        target_ontology: &Path,
        output_dir: &Path,
    ) -> AlignResult<Vec<MatcherResult>> {
        tokio::fs::create_dir_all(output_dir).await?;
        info!(
            matchers = self.matchers.len(),
            source = %source_ontology.display(),
            target = %target_ontology.display(),
            output_dir = %output_dir.display(),
            "Starting matchers"
        );

        let slots: Arc<Mutex<Vec<Option<MatcherResult>>>> =
            Arc::new(Mutex::new(vec![None; self.matchers.len()]));
        let mut tasks = JoinSet::new();

        for (index, descriptor) in self.matchers.iter().cloned().enumerate() {
            let request = AlignmentRequest {
                source_ontology: source_ontology.to_path_buf(),
                target_ontology: target_ontology.to_path_buf(),
                output_path: descriptor.output_path(output_dir),
            };
            let slots = Arc::clone(&slots);
            let event_tx = self.event_tx.clone();

            tasks.spawn(async move {
                emit(
                    &event_tx,
                    AlignmentEvent::MatcherStarted {
                        matcher: descriptor.name.clone(),
                    },
                )
                .await;

                let result = run_matcher(&descriptor, &request).await;

                emit(
                    &event_tx,
                    AlignmentEvent::MatcherFinished {
                        matcher: result.matcher_name.clone(),
                        success: result.success,
                        elapsed_ms: result.execution_time.as_millis() as u64,
                        error: result.error.as_ref().map(ToString::to_string),
                    },
                )
                .await;

                slots.lock().await[index] = Some(result);
            });
        }

        // Join barrier: every task finishes before results are read
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Matcher task aborted");
            }
        }

        let collected = std::mem::take(&mut *slots.lock().await);
        let results: Vec<MatcherResult> = collected
            .into_iter()
            .zip(&self.matchers)
            .map(|(slot, descriptor)| {
                slot.unwrap_or_else(|| {
                    MatcherResult::failed(
                        &descriptor.name,
                        Duration::ZERO,
                        MatcherError::Execution("matcher task aborted".to_string()),
                    )
                })
            })
            .collect();

        let succeeded = results.iter().filter(|r| r.success).count();
        info!(
            succeeded,
            failed = results.len() - succeeded,
            "All matchers finished"
        );
        Ok(results)
    }
}

async fn emit(event_tx: &Option<mpsc::Sender<AlignmentEvent>>, event: AlignmentEvent) {
    if let Some(tx) = event_tx {
        let _ = tx.send(event).await;
    }
}

/// Health check, then the timed invocation, then the output check
async fn run_matcher(descriptor: &MatcherDescriptor, request: &AlignmentRequest) -> MatcherResult {
    let name = descriptor.name.as_str();
    let started = Instant::now();

    if descriptor.health_check_enabled {
        let answered = tokio::time::timeout(descriptor.health_check_timeout, descriptor.executor.health_check()).await;
        let checked = match answered {
            Ok(checked) => checked,
            Err(_) => Err(MatcherError::Unavailable(format!(
                "health check did not answer within {:.1}s",
                descriptor.health_check_timeout.as_secs_f64()
            ))),
        };
        if let Err(e) = checked {
            let error = match e {
                MatcherError::Unavailable(_) => e,
                other => MatcherError::Unavailable(other.to_string()),
            };
            warn!(matcher = name, error = %error, "Health check failed, skipping matcher");
            return MatcherResult::failed(name, started.elapsed(), error);
        }
        debug!(matcher = name, "Health check passed");
    }

    if let Err(e) = remove_stale_output(&request.output_path).await {
        warn!(matcher = name, output = %request.output_path.display(), error = %e, "Cannot remove previous output table");
        return MatcherResult::failed(
            name,
            started.elapsed(),
            MatcherError::Execution(format!(
                "cannot remove previous output {}: {}",
                request.output_path.display(),
                e
            )),
        );
    }

    let invoked = Instant::now();
    let outcome = tokio::time::timeout(descriptor.timeout, descriptor.executor.execute(request)).await;
    let elapsed = invoked.elapsed();

    match outcome {
        Err(_) => {
            warn!(
                matcher = name,
                timeout_ms = descriptor.timeout.as_millis() as u64,
                "Matcher timed out, cancelled"
            );
            MatcherResult::failed(
                name,
                elapsed,
                MatcherError::Timeout {
                    timeout: descriptor.timeout,
                },
            )
        }
        Ok(Err(e)) => {
            warn!(matcher = name, error = %e, elapsed_ms = elapsed.as_millis() as u64, "Matcher failed");
            MatcherResult::failed(name, elapsed, e)
        }
        Ok(Ok(())) => {
            if tokio::fs::try_exists(&request.output_path).await.unwrap_or(false) {
                info!(
                    matcher = name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    output = %request.output_path.display(),
                    "Matcher completed"
                );
                MatcherResult::succeeded(name, elapsed, request.output_path.clone())
            } else {
                warn!(matcher = name, output = %request.output_path.display(), "Matcher wrote no output table");
                MatcherResult::failed(
                    name,
                    elapsed,
                    MatcherError::Execution(format!(
                        "no output table at {}",
                        request.output_path.display()
                    )),
                )
            }
        }
    }
}

async fn remove_stale_output(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(output = %path.display(), "Removed previous output table");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

// ============================================================================
// Mock Executor for Testing
// ============================================================================
