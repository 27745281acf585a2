//! Test Helper Utilities
//!
//! Shared fixtures for gmesh-align integration tests: scripted matcher
//! executors and on-disk correspondence tables.

#![allow(dead_code)]

use async_trait::async_trait;
use gmesh_align::runner::{AlignmentRequest, MatcherDescriptor, MatcherExecutor};
use gmesh_align::types::MatcherError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const HEADER: &str = "subject_id\tpredicate_id\tobject_id\tconfidence\tmapping_provider\n";

/// One table row: subject, predicate, object, confidence
pub type Row<'a> = (&'a str, &'a str, &'a str, f64);

/// Render rows as a correspondence table attributed to `provider`
pub fn table(provider: &str, rows: &[Row<'_>]) -> String {
    let mut content = String::from("# generated by test fixture\n");
    content.push_str(HEADER);
    for (subject, predicate, object, confidence) in rows {
        content.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\n",
            subject, predicate, object, confidence, provider
        ));
    }
    content
}

/// Write a table into `dir` and return its path
pub fn write_table(dir: &Path, file_name: &str, provider: &str, rows: &[Row<'_>]) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, table(provider, rows)).expect("write fixture table");
    path
}

/// Executor that optionally sleeps, then writes a fixed table or fails
pub struct ScriptedExecutor {
    pub delay: Duration,
    pub content: Option<String>,
    pub failure: Option<String>,
}

impl ScriptedExecutor {
    pub fn writes(content: String) -> Self {
        Self {
            delay: Duration::ZERO,
            content: Some(content),
            failure: None,
        }
    }

    pub fn slow(delay: Duration, content: String) -> Self {
        Self {
            delay,
            content: Some(content),
            failure: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            delay: Duration::ZERO,
            content: None,
            failure: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl MatcherExecutor for ScriptedExecutor {
    async fn execute(&self, request: &AlignmentRequest) -> Result<(), MatcherError> {
        tokio::time::sleep(self.delay).await;
        if let Some(message) = &self.failure {
            return Err(MatcherError::Execution(message.clone()));
        }
        if let Some(content) = &self.content {
            tokio::fs::write(&request.output_path, content)
                .await
                .map_err(|e| MatcherError::Execution(e.to_string()))?;
        }
        Ok(())
    }
}

/// Descriptor for a scripted matcher with a 5s timeout
pub fn matcher(name: &str, executor: ScriptedExecutor) -> MatcherDescriptor {
    MatcherDescriptor::new(name, Arc::new(executor)).with_timeout(Duration::from_secs(5))
}

/// Temporary source/target/output layout for one run
pub struct Workspace {
    pub dir: TempDir,
    pub source: PathBuf,
    pub target: PathBuf,
    pub output: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let source = dir.path().join("source.owl");
        let target = dir.path().join("target.owl");
        std::fs::write(&source, "<rdf:RDF/>").expect("write source");
        std::fs::write(&target, "<rdf:RDF/>").expect("write target");
        let output = dir.path().join("output");
        Self {
            dir,
            source,
            target,
            output,
        }
    }
}
