//! Remote test-management service seam

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// The referenced run does not exist or no longer accepts results
    RunInvalid,
    NotFound,
    Unauthorized,
    Rejected,
    Transport,
    Decode,
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApiErrorKind::RunInvalid => "run invalid",
            ApiErrorKind::NotFound => "not found",
            ApiErrorKind::Unauthorized => "unauthorized",
            ApiErrorKind::Rejected => "rejected",
            ApiErrorKind::Transport => "transport",
            ApiErrorKind::Decode => "decode",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}{}: {message}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP response
    ///
    /// A 400/404 whose body references the run, or a run that does not
    /// hold the case, is `RunInvalid`; this is the only signal the
    /// synchronizer uses to start run recovery.
    pub fn from_response(status: u16, body: &str) -> Self {
        let lower = body.to_lowercase();
        let kind = match status {
            400 | 404 if references_run(&lower) => ApiErrorKind::RunInvalid,
            401 | 403 => ApiErrorKind::Unauthorized,
            404 => ApiErrorKind::NotFound,
            _ => ApiErrorKind::Rejected,
        };
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| body.trim().to_string());
        Self::new(kind, Some(status), message)
    }

    pub fn is_run_invalid(&self) -> bool {
        self.kind == ApiErrorKind::RunInvalid
    }
}

fn references_run(body: &str) -> bool {
    body.contains("run_id") || body.contains("test run") || body.contains("run/case combination")
}

pub type ApiResult<T> = Result<T, ApiError>;

/// A remote case as returned by the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseDefinition {
    pub id: u64,
    pub title: String,
    /// Full service payload, for template fields
    pub raw: Value,
}

/// One result to record against a case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSubmission {
    pub passed: bool,
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defects: Option<String>,
}

/// Operations consumed from the remote service
///
/// Project and suite scoping are properties of the implementation.
pub trait TestManagementApi: Send + Sync {
    fn create_run(&self, name: &str, case_ids: &[u64]) -> ApiResult<u64>;

    fn close_run(&self, run_id: u64) -> ApiResult<()>;

    fn get_case(&self, case_id: u64) -> ApiResult<CaseDefinition>;

    fn get_cases_by_label(&self, label: &str) -> ApiResult<Vec<u64>>;

    /// Returns the new result's id
    fn submit_result(&self, run_id: u64, case_id: u64, result: &ResultSubmission) -> ApiResult<u64>;

    fn upload_attachment(&self, result_id: u64, file_name: &str, bytes: &[u8]) -> ApiResult<()>;
}
