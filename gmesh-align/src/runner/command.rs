//! External process matcher executor
//!
//! Runs a matcher tool as a child process. Arguments may contain the
//! placeholders `{source}`, `{target}`, `{output}` and `{output_dir}`, which
//! are replaced with the request paths before spawning.
//!
//! The child is spawned with `kill_on_drop`, so a timed-out invocation (whose
//! future is dropped by the runner) terminates the process.
//!
//! Killing the `docker` client does not stop the container it started, so
//! container invocations are named (`{container_name}`, `gmesh-<matcher>-<uuid>`)
//! and a guard issues `docker kill <name>` when the invocation is dropped
//! before the client exits.

use super::{AlignmentRequest, MatcherExecutor};
use crate::types::MatcherError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// Longest stderr excerpt carried into an error message
const STDERR_EXCERPT_CHARS: usize = 2000;

/// Matcher executor backed by an external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    /// Full argv of the health probe
    health_probe: Vec<String>,
    /// Invocations run as named containers that must be killed on cancel
    containerized: bool,
}

impl CommandExecutor {
    /// Executor for `program args...`, probed with `program --version`
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        Self {
            health_probe: vec![program.clone(), "--version".to_string()],
            program,
            args,
            containerized: false,
        }
    }

    /// Containerised matcher using the standard volume layout:
    /// source at `/data/source.owl`, target at `/data/target.owl`, output
    /// directory at `/data/output`
    pub fn container(image: &str) -> Self {
        let args = [
            "run",
            "--rm",
            "--name",
            "{container_name}",
            "-v",
            "{source}:/data/source.owl:ro",
            "-v",
            "{target}:/data/target.owl:ro",
            "-v",
            "{output_dir}:/data/output",
            image,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        Self {
            program: "docker".to_string(),
            args,
            health_probe: vec![
                "docker".to_string(),
                "image".to_string(),
                "inspect".to_string(),
                image.to_string(),
            ],
            containerized: true,
        }
    }

    /// Replace the health probe argv (first element is the program)
    pub fn with_health_probe(mut self, probe: Vec<String>) -> Self {
        if !probe.is_empty() {
            self.health_probe = probe;
        }
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Fresh container name for one invocation, `None` for plain processes
    ///
    /// The matcher part comes from the output file stem, restricted to the
    /// characters docker accepts.
    pub fn container_name(&self, request: &AlignmentRequest) -> Option<String> {
        if !self.containerized {
            return None;
        }
        let stem = request
            .output_path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.split('.').next())
            .unwrap_or_default();
        let matcher: String = stem
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        let matcher = if matcher.is_empty() { "matcher".to_string() } else { matcher };
        Some(format!("gmesh-{}-{}", matcher, Uuid::new_v4().simple()))
    }

    /// Arguments with placeholders substituted for `request`
    ///
    /// `{container_name}` is replaced with `container_name` (empty when none).
    pub fn render_args(&self, request: &AlignmentRequest, container_name: Option<&str>) -> Vec<String> {
        let source = request.source_ontology.display().to_string();
        let target = request.target_ontology.display().to_string();
        let output = request.output_path.display().to_string();
        let output_dir = request.output_dir().display().to_string();

        self.args
            .iter()
            .map(|arg| {
                arg.replace("{container_name}", container_name.unwrap_or_default())
                    .replace("{source}", &source)
                    .replace("{target}", &target)
                    .replace("{output_dir}", &output_dir)
                    .replace("{output}", &output)
            })
            .collect()
    }
}

async fn run_command(program: &str, args: &[String]) -> std::io::Result<Output> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
}

/// Kills the named container unless disarmed first
struct ContainerGuard {
    name: Option<String>,
}

impl ContainerGuard {
    fn new(name: Option<String>) -> Self {
        Self { name }
    }

    fn disarm(mut self) {
        self.name = None;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let Some(name) = self.name.take() else {
            return;
        };
        warn!(container = %name, "Matcher invocation cancelled, killing container");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let killed = Command::new("docker")
                        .args(["kill", name.as_str()])
                        .stdin(Stdio::null())
                        .stdout(Stdio::null())
                        .stderr(Stdio::null())
                        .status()
                        .await;
                    if let Err(e) = killed {
                        warn!(container = %name, error = %e, "docker kill failed");
                    }
                });
            }
            Err(_) => warn!(container = %name, "No runtime to kill container, it may keep running"),
        }
    }
}

fn stderr_excerpt(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let trimmed = stderr.trim();
    let skip = trimmed.chars().count().saturating_sub(STDERR_EXCERPT_CHARS);
    trimmed.chars().skip(skip).collect()
}

#[async_trait]
impl MatcherExecutor for CommandExecutor {
    async fn health_check(&self) -> Result<(), MatcherError> {
        let Some((program, args)) = self.health_probe.split_first() else {
            return Ok(());
        };

        match run_command(program, args).await {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => Err(MatcherError::Unavailable(format!(
                "health probe '{}' exited with {:?}: {}",
                program,
                output.status.code(),
                stderr_excerpt(&output)
            ))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(MatcherError::Unavailable(format!("'{}' not found", program)))
            }
            Err(e) => Err(MatcherError::Unavailable(format!("health probe '{}' failed: {}", program, e))),
        }
    }

    async fn execute(&self, request: &AlignmentRequest) -> Result<(), MatcherError> {
        let container_name = self.container_name(request);
        let args = self.render_args(request, container_name.as_deref());
        debug!(program = %self.program, ?args, "Spawning matcher process");

        let guard = ContainerGuard::new(container_name);
        let spawned = run_command(&self.program, &args).await;
        guard.disarm();

        let output = spawned.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                MatcherError::Unavailable(format!("'{}' not found", self.program))
            } else {
                MatcherError::Execution(format!("failed to spawn '{}': {}", self.program, e))
            }
        })?;

        if !output.status.success() {
            return Err(MatcherError::Execution(format!(
                "Exit code: {:?}, stderr: {}",
                output.status.code(),
                stderr_excerpt(&output)
            )));
        }

        Ok(())
    }
}
