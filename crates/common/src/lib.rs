//! qarun Common Library
//!
//! Shared vocabulary types and configuration for the qarun scenario
//! orchestrator.

pub mod config;
pub mod error;
pub mod types;

pub use config::{BrowserConfig, ExecutorConfig, QarunConfig, ReportConfig, SyncConfig};
pub use error::{Error, Result};
pub use types::*;

/// qarun version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "qarun.toml";
