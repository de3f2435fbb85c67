//! qarun configuration
//!
//! Loaded from a TOML document, then overridden from the environment and
//! validated before any scenario runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};
use crate::types::BrowserKind;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QarunConfig {
    /// Number of scenario worker threads
    pub workers: usize,

    /// Browser session configuration
    pub browser: BrowserConfig,

    /// Resilient executor tuning
    pub executor: ExecutorConfig,

    /// Report output
    pub report: ReportConfig,

    /// Remote test-management synchronization
    pub sync: SyncConfig,

    /// Named locators, `name = "<strategy>:<value>"`
    pub locators: BTreeMap<String, String>,
}

impl Default for QarunConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            browser: BrowserConfig::default(),
            executor: ExecutorConfig::default(),
            report: ReportConfig::default(),
            sync: SyncConfig::default(),
            locators: BTreeMap::new(),
        }
    }
}

/// Browser session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub kind: BrowserKind,
    pub headless: bool,

    /// URL of an already running WebDriver endpoint
    pub driver_url: Option<String>,

    /// Driver executable to spawn when no `driver_url` is given
    pub driver_binary: Option<PathBuf>,

    pub driver_startup_timeout_secs: u64,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            kind: BrowserKind::Chrome,
            headless: false,
            driver_url: None,
            driver_binary: None,
            driver_startup_timeout_secs: 30,
            window_width: 1920,
            window_height: 1080,
        }
    }
}

/// Resilient executor tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Element-ready wait per attempt
    pub wait_timeout_ms: u64,
    pub poll_interval_ms: u64,

    pub standard_attempts: u32,
    pub standard_backoff_ms: u64,

    /// Bound and base delay for the focus-and-script-fallback strategy
    pub secondary_attempts: u32,
    pub secondary_backoff_ms: u64,

    /// Highlight-and-capture before every attempt
    pub highlight: bool,
    pub highlight_settle_ms: u64,
    pub scroll_settle_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 15_000,
            poll_interval_ms: 250,
            standard_attempts: 3,
            standard_backoff_ms: 1_000,
            secondary_attempts: 5,
            secondary_backoff_ms: 1_500,
            highlight: true,
            highlight_settle_ms: 400,
            scroll_settle_ms: 300,
        }
    }
}

impl ExecutorConfig {
    /// Worst-case latency of one resilient call under the slower strategy:
    /// `sum(attempt * base_delay)` plus one wait timeout per attempt.
    pub fn worst_case_latency(&self) -> Duration {
        let strategy = |attempts: u32, base_ms: u64| -> u64 {
            let backoff: u64 = (1..=u64::from(attempts)).map(|a| a * base_ms).sum();
            backoff + u64::from(attempts) * self.wait_timeout_ms
        };
        let standard = strategy(self.standard_attempts, self.standard_backoff_ms);
        let secondary = strategy(self.secondary_attempts, self.secondary_backoff_ms);
        Duration::from_millis(standard.max(secondary))
    }
}

/// Report output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub output_dir: PathBuf,
    pub file_name: String,
    pub title: String,
    pub environment: String,

    /// Flushed reports smaller than this are reported as suspicious
    pub min_bytes: u64,

    /// Attach a screenshot to every finished step
    pub capture_step_screenshots: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("test-output"),
            file_name: "qarun-report.json".to_string(),
            title: "Test Execution Summary".to_string(),
            environment: "QA".to_string(),
            min_bytes: 1_000,
            capture_step_screenshots: true,
        }
    }
}

impl ReportConfig {
    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join(&self.file_name)
    }
}

/// Remote test-management synchronization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub url: String,
    pub username: String,
    pub api_key: String,
    pub project_id: u64,
    pub suite_id: u64,

    /// Resolve the run's cases by label
    pub label: Option<String>,

    /// Explicit case ids used when no label matches
    pub case_ids: Vec<u64>,

    pub http_timeout_secs: u64,
    pub run_name_prefix: String,
    pub recovery_run_prefix: String,

    /// Lines of error chain kept in a defect's stack excerpt
    pub stack_excerpt_lines: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            username: String::new(),
            api_key: String::new(),
            project_id: 0,
            suite_id: 0,
            label: None,
            case_ids: Vec::new(),
            http_timeout_secs: 120,
            run_name_prefix: "AutoRun".to_string(),
            recovery_run_prefix: "AutoRecoveryRun".to_string(),
            stack_excerpt_lines: 25,
        }
    }
}

impl SyncConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl QarunConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `QARUN_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("QARUN_BROWSER") {
            self.browser.kind = v.parse()?;
        }
        if let Some(v) = lookup("QARUN_HEADLESS") {
            self.browser.headless = parse_bool("QARUN_HEADLESS", &v)?;
        }
        if let Some(v) = lookup("QARUN_WORKERS") {
            self.workers = v.trim().parse().map_err(|_| Error::InvalidValue {
                key: "QARUN_WORKERS".to_string(),
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("QARUN_SYNC_ENABLED") {
            self.sync.enabled = parse_bool("QARUN_SYNC_ENABLED", &v)?;
        }
        if let Some(v) = lookup("QARUN_SYNC_URL") {
            self.sync.url = v;
        }
        if let Some(v) = lookup("QARUN_SYNC_USERNAME") {
            self.sync.username = v;
        }
        if let Some(v) = lookup("QARUN_SYNC_API_KEY") {
            self.sync.api_key = v;
        }
        Ok(())
    }

    /// Reject configurations that cannot run
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be at least 1".to_string()));
        }
        if self.executor.standard_attempts == 0 || self.executor.secondary_attempts == 0 {
            return Err(Error::InvalidConfig(
                "executor attempts must be at least 1".to_string(),
            ));
        }
        for (name, spec) in &self.locators {
            let well_formed = spec
                .split_once(':')
                .map(|(strategy, value)| {
                    matches!(
                        strategy.trim().to_ascii_lowercase().as_str(),
                        "css" | "xpath" | "id" | "link"
                    ) && !value.trim().is_empty()
                })
                .unwrap_or(false);
            if !well_formed {
                return Err(Error::InvalidConfig(format!(
                    "locators.{} = {:?} is not <css|xpath|id|link>:<value>",
                    name, spec
                )));
            }
        }
        if self.sync.enabled {
            if self.sync.url.trim().is_empty() {
                return Err(Error::InvalidConfig("sync.url is required".to_string()));
            }
            if self.sync.username.trim().is_empty() || self.sync.api_key.trim().is_empty() {
                return Err(Error::InvalidConfig(
                    "sync.username and sync.api_key are required".to_string(),
                ));
            }
            if self.sync.project_id == 0 {
                return Err(Error::InvalidConfig("sync.project_id is required".to_string()));
            }

            let worst = self.executor.worst_case_latency();
            if self.sync.http_timeout() <= worst {
                warn!(
                    "sync.http_timeout_secs ({}s) does not exceed the worst-case resilient action latency ({}s)",
                    self.sync.http_timeout_secs,
                    worst.as_secs()
                );
            }
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
