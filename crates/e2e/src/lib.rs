//! qarun orchestration core
//!
//! This crate runs declarative browser scenarios concurrently and keeps a
//! test-management service in step with their outcomes:
//! - One browser session per worker, created lazily and torn down per scenario
//! - UI actions retried with a per-browser strategy and captured as evidence
//! - Every step recorded into a concurrent report, flushed once per suite
//! - Results, defects and report snapshots submitted to a shared remote run,
//!   with a single recovery when the run is rejected
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  SuiteRunner (worker pool)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  worker ─▶ SessionSlot ─▶ Session ─▶ BrowserBackend         │
//! │    │                                   ├── WebDriverBackend │
//! │    │                                   └── MemoryBackend    │
//! │    ├── ResilientExecutor                                    │
//! │    │     ├── Strategy { Standard 3×1s | Secondary 5×1.5s }  │
//! │    │     ├── FailureSink ─┐                                 │
//! │    │     └── EvidenceSink ┴─▶ StepRecorder                  │
//! │    │                             └──▶ ReportAggregator      │
//! │    │                                    └── flush() once    │
//! │    └── TestManagementSynchronizer                           │
//! │          ├── ensure_run / submit_result (one recovery)      │
//! │          ├── file_defect ◀── classifier(kind, message)      │
//! │          └── TestManagementApi ─▶ TestRailClient            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod classifier;
pub mod driver;
pub mod error;
pub mod executor;
pub mod locators;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod recorder;
pub mod report;
pub mod runner;
pub mod session;
pub mod spec;
pub mod sync;
pub mod webdriver;

pub use backend::{BrowserBackend, Locator, SessionFactory};
pub use driver::{DriverConfig, DriverService};
pub use error::{ActionError, E2eError, E2eResult, SyncError};
pub use executor::{NoPause, Pause, ResilientExecutor, ThreadPause};
pub use locators::LocatorCatalog;
pub use recorder::{FailureContext, StepRecorder};
pub use report::{JsonReportSink, ReportAggregator, ReportEntry};
pub use runner::{ScenarioResult, SuiteResult, SuiteRunner};
pub use session::{Session, SessionRegistry, SessionSlot};
pub use spec::{Scenario, ScenarioStep, StepAction};
pub use sync::{TestManagementSynchronizer, TestRailClient};
pub use webdriver::WebDriverFactory;
