//! Error types for the orchestration core

use thiserror::Error;

use qarun_common::BrowserKind;

use crate::backend::BackendError;
use crate::sync::ApiError;

/// A resilient action that exhausted its attempts
#[derive(Error, Debug, Clone)]
#[error("{operation} failed on {target} after {attempts} attempt(s): {last_cause}")]
pub struct ActionError {
    pub operation: String,
    pub target: String,
    pub attempts: u32,
    #[source]
    pub last_cause: BackendError,
}

/// Result submission failures that survived the one recovery retry
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No active test-management run")]
    NoActiveRun,

    #[error("Result submission for case C{case_id} failed: {source}")]
    Submit {
        case_id: u64,
        #[source]
        source: ApiError,
    },

    #[error("Result submission for case C{case_id} failed after run recovery: {source}")]
    RecoveryFailed {
        case_id: u64,
        #[source]
        source: ApiError,
    },

    #[error("Run creation failed: {0}")]
    RunCreation(#[source] ApiError),

    #[error("Closing run {run_id} failed: {source}")]
    Close {
        run_id: u64,
        #[source]
        source: ApiError,
    },
}

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Session initialization failed for {browser}: {reason}")]
    SessionInit { browser: BrowserKind, reason: String },

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Defect filing failed for case C{case_id}: {reason}")]
    DefectFiling { case_id: u64, reason: String },

    #[error("Attachment upload failed for result {result_id}: {reason}")]
    AttachmentUpload { result_id: u64, reason: String },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Unknown locator: {0}")]
    UnknownLocator(String),

    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    #[error("Scenario spec parse error: {0}")]
    SpecParse(String),

    #[error("Scenario name '{0}' is used more than once")]
    DuplicateScenario(String),

    #[error("Report has already been flushed")]
    ReportAlreadyFlushed,

    #[error("Report sink error: {0}")]
    ReportSink(String),

    #[error("Driver failed to start: {0}")]
    DriverStartup(String),

    #[error("Driver health check failed after {0} attempts")]
    DriverHealthCheck(usize),

    #[error("Config error: {0}")]
    Config(#[from] qarun_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl E2eError {
    /// Declared kind name, consumed by the failure classifier
    pub fn kind_name(&self) -> &'static str {
        match self {
            E2eError::SessionInit { .. } => "SessionInitError",
            E2eError::Action(_) => "ActionError",
            E2eError::Sync(_) => "SyncError",
            E2eError::DefectFiling { .. } => "DefectFilingError",
            E2eError::AttachmentUpload { .. } => "AttachmentUploadError",
            E2eError::AssertionFailed(_) => "AssertionError",
            E2eError::UnknownLocator(_) | E2eError::InvalidLocator(_) => "LocatorError",
            E2eError::SpecParse(_) | E2eError::DuplicateScenario(_) => "SpecParseError",
            E2eError::ReportAlreadyFlushed | E2eError::ReportSink(_) => "ReportError",
            E2eError::DriverStartup(_) | E2eError::DriverHealthCheck(_) => "DriverError",
            E2eError::Config(_) => "ConfigError",
            E2eError::Io(_) => "IoError",
            E2eError::Json(_) | E2eError::Yaml(_) => "DecodeError",
            E2eError::Http(_) => "HttpError",
        }
    }
}

pub type E2eResult<T> = Result<T, E2eError>;

/// Render an error and its source chain, one cause per line
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> Vec<String> {
    let mut lines = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {}", cause));
        source = cause.source();
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendErrorKind;

    #[test]
    fn test_action_error_chain() {
        let err = E2eError::from(ActionError {
            operation: "click".to_string(),
            target: "id:submitbtn".to_string(),
            attempts: 3,
            last_cause: BackendError::new(BackendErrorKind::StaleElement, "node detached"),
        });
        assert_eq!(err.kind_name(), "ActionError");

        let chain = error_chain(&err);
        assert_eq!(chain.len(), 2);
        assert!(chain[0].starts_with("click failed on id:submitbtn after 3 attempt(s)"));
        assert_eq!(chain[1], "caused by: stale element reference: node detached");
    }
}
