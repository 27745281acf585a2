//! # Graph-Mesh Common Library
//!
//! Shared plumbing for the Graph-Mesh alignment tools:
//! - Error types
//! - Configuration file resolution and TOML loading
//! - Logging setup

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::LoggingConfig;
