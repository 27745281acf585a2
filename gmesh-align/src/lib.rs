//! gmesh-align library interface
//!
//! Correspondence fusion and consensus engine for ontology alignment:
//! runs several matchers concurrently, fuses their correspondence tables,
//! votes, resolves conflicts and reports quality.
//!
//! Data flow:
//! `runner` → `loader` → `fusion` → `voting` → `conflict` → `quality`,
//! orchestrated by `pipeline`.

pub mod config;
pub mod conflict;
pub mod fusion;
pub mod loader;
pub mod pipeline;
pub mod quality;
pub mod runner;
pub mod types;
pub mod voting;

pub use conflict::{ConflictReport, ConflictResolution, ConflictResolver, ResolutionStrategy};
pub use fusion::Fuser;
pub use pipeline::{align_tables, AlignmentEvent, AlignmentOutcome, AlignmentPipeline, AlignmentSettings, TotalMatcherPolicy};
pub use quality::{compare_with_reference, QualityMetrics, QualityReport};
pub use runner::{AlignmentRequest, CommandExecutor, MatcherDescriptor, MatcherExecutor, MatcherRunner};
pub use types::{
    AlignError, AlignResult, ConfigurationError, Correspondence, FusedMapping, MatcherError, MatcherResult, ParseError,
    Predicate,
};
pub use voting::{Voter, VotingConfig, VotingResult, VotingStrategy};
