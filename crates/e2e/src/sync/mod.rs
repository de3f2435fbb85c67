//! Test-management synchronization
//!
//! The [`TestManagementSynchronizer`] owns the suite's remote run. Workers
//! read the run id concurrently; creation and recovery replace it inside one
//! critical section.
//!
//! ```text
//! submit_result(case) ──▶ run includes case? ─no──────────────┐
//!                              │ yes                          │
//!                              ▼                              │
//!                         api.submit(run, case)               │
//!                              │ run invalid                  │
//!                              ▼                              ▼
//!                 lock ─▶ replacement for case exists? ─yes─▶ reuse it
//!                              │ no
//!                              ▼
//!                 create "AutoRecoveryRun - ts" {case} ─▶ record ─▶ unlock
//!                              │
//!                              ▼
//!                 api.submit(recovery run, case)   (exactly once)
//! ```
//!
//! Only a stale shared run is swapped out. Cases outside the shared run get
//! their own recovery run, kept until the suite closes its runs.

pub mod api;
pub mod defect;
pub mod testrail;

pub use api::{
    ApiError, ApiErrorKind, ApiResult, CaseDefinition, ResultSubmission, TestManagementApi,
};
pub use defect::{Defect, DefectEnvironment};
pub use testrail::TestRailClient;

use chrono::Local;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use qarun_common::{RunStatus, SyncConfig};

use crate::error::{E2eError, E2eResult, SyncError};

/// The shared remote run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    pub id: Option<u64>,
    pub case_ids: Vec<u64>,
    pub status: RunStatus,
    /// Recovery runs opened for cases the shared run does not include
    pub case_runs: BTreeMap<u64, u64>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            id: None,
            case_ids: Vec::new(),
            status: RunStatus::Closed,
            case_runs: BTreeMap::new(),
        }
    }
}

impl RunState {
    fn active(&self) -> Option<u64> {
        match self.status {
            RunStatus::Open => self.id,
            _ => None,
        }
    }

    /// Run that accepts results for `case_id`, if one is open
    pub fn run_for(&self, case_id: u64) -> Option<u64> {
        let shared = self.active()?;
        if self.case_ids.contains(&case_id) {
            Some(shared)
        } else {
            self.case_runs.get(&case_id).copied()
        }
    }
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub struct TestManagementSynchronizer {
    api: Arc<dyn TestManagementApi>,
    run: Mutex<RunState>,
    run_name_prefix: String,
    recovery_run_prefix: String,
    stack_excerpt_lines: usize,
    environment: DefectEnvironment,
}

impl TestManagementSynchronizer {
    pub fn new(api: Arc<dyn TestManagementApi>, config: &SyncConfig, environment: DefectEnvironment) -> Self {
        Self {
            api,
            run: Mutex::new(RunState::default()),
            run_name_prefix: config.run_name_prefix.clone(),
            recovery_run_prefix: config.recovery_run_prefix.clone(),
            stack_excerpt_lines: config.stack_excerpt_lines,
            environment,
        }
    }

    pub fn api(&self) -> &dyn TestManagementApi {
        self.api.as_ref()
    }

    pub fn stack_excerpt_lines(&self) -> usize {
        self.stack_excerpt_lines
    }

    /// Active run id, if any
    pub fn run_id(&self) -> Option<u64> {
        self.run.lock().active()
    }

    pub fn run_state(&self) -> RunState {
        self.run.lock().clone()
    }

    /// Reuse the active run, or create one covering `case_ids`
    pub fn ensure_run(&self, case_ids: &[u64]) -> Result<u64, SyncError> {
        let mut run = self.run.lock();
        if let (Some(id), RunStatus::Open) = (run.id, run.status) {
            debug!("Reusing run {}", id);
            return Ok(id);
        }

        let name = format!("{} - {}", self.run_name_prefix, timestamp());
        let id = self
            .api
            .create_run(&name, case_ids)
            .map_err(SyncError::RunCreation)?;
        *run = RunState {
            id: Some(id),
            case_ids: case_ids.to_vec(),
            status: RunStatus::Open,
            case_runs: BTreeMap::new(),
        };
        info!("Run {} '{}' active with {} case(s)", id, name, case_ids.len());
        Ok(id)
    }

    /// Record a result for `case_id` against the active run
    pub fn submit_result(&self, case_id: u64, passed: bool, comment: &str) -> Result<u64, SyncError> {
        self.submit(
            case_id,
            &ResultSubmission {
                passed,
                comment: comment.to_string(),
                defects: None,
            },
        )
    }

    /// Submit with exactly one run recovery on an invalid-run response
    fn submit(&self, case_id: u64, submission: &ResultSubmission) -> Result<u64, SyncError> {
        let target = {
            let run = self.run.lock();
            if run.active().is_none() {
                return Err(SyncError::NoActiveRun);
            }
            run.run_for(case_id)
        };
        let Some(run_id) = target else {
            debug!("Active run does not include C{}; opening a recovery run", case_id);
            return self.submit_recovered(None, case_id, submission);
        };

        match self.api.submit_result(run_id, case_id, submission) {
            Ok(result_id) => {
                debug!("Result {} recorded for C{} in run {}", result_id, case_id, run_id);
                Ok(result_id)
            }
            Err(e) if e.is_run_invalid() => {
                warn!("Run {} rejected result for C{} ({}); recovering", run_id, case_id, e);
                self.submit_recovered(Some(run_id), case_id, submission)
            }
            Err(source) => Err(SyncError::Submit { case_id, source }),
        }
    }

    /// The single retry, against a run that includes `case_id`
    fn submit_recovered(
        &self,
        stale_run: Option<u64>,
        case_id: u64,
        submission: &ResultSubmission,
    ) -> Result<u64, SyncError> {
        let recovered = self.recover(stale_run, case_id)?;
        let result_id = self
            .api
            .submit_result(recovered, case_id, submission)
            .map_err(|source| SyncError::RecoveryFailed { case_id, source })?;
        info!(
            "Result {} recorded for C{} in recovery run {}",
            result_id, case_id, recovered
        );
        Ok(result_id)
    }

    /// Open a run for `case_id`, unless another worker already did
    ///
    /// A stale shared run is replaced; otherwise the new run only serves
    /// `case_id`.
    fn recover(&self, stale_run: Option<u64>, case_id: u64) -> Result<u64, SyncError> {
        let mut run = self.run.lock();
        if let Some(current) = run.run_for(case_id) {
            if Some(current) != stale_run {
                debug!("C{} already served by run {}", case_id, current);
                return Ok(current);
            }
        }
        let replaced = stale_run.filter(|stale| run.active() == Some(*stale));

        let name = format!("{} - {}", self.recovery_run_prefix, timestamp());
        let id = self
            .api
            .create_run(&name, &[case_id])
            .map_err(|source| SyncError::RecoveryFailed { case_id, source })?;
        if let Some(stale) = replaced {
            run.id = Some(id);
            run.case_ids = vec![case_id];
            run.case_runs.remove(&case_id);
            info!("Recovery run {} '{}' replaces run {}", id, name, stale);
        } else {
            run.case_runs.insert(case_id, id);
            info!("Recovery run {} '{}' opened for C{}", id, name, case_id);
        }
        Ok(id)
    }

    /// File a failing result carrying the defect description
    ///
    /// Returns the id of the result that carries the defect reference.
    pub fn try_file_defect(&self, defect: &Defect) -> E2eResult<u64> {
        let submission = ResultSubmission {
            passed: false,
            comment: defect.render(&self.environment, self.run_id()),
            defects: Some(defect.reference.clone()),
        };
        let result_id = self
            .submit(defect.case_id, &submission)
            .map_err(|e| E2eError::DefectFiling {
                case_id: defect.case_id,
                reason: e.to_string(),
            })?;
        info!(
            "Filed defect {} for C{} (result {}, {:?} priority)",
            defect.reference, defect.case_id, result_id, defect.priority
        );
        Ok(result_id)
    }

    /// Never fails: problems are logged and reported as `false`.
    pub fn file_defect(&self, defect: &Defect) -> bool {
        match self.try_file_defect(defect) {
            Ok(_) => true,
            Err(e) => {
                error!(kind = e.kind_name(), "{}", e);
                false
            }
        }
    }

    pub fn try_upload_attachment(&self, result_id: u64, file_name: &str, bytes: &[u8]) -> E2eResult<()> {
        self.api
            .upload_attachment(result_id, file_name, bytes)
            .map_err(|e| E2eError::AttachmentUpload {
                result_id,
                reason: e.to_string(),
            })?;
        debug!("Uploaded {} ({} bytes) to result {}", file_name, bytes.len(), result_id);
        Ok(())
    }

    /// Best-effort upload to a result
    pub fn upload_attachment(&self, result_id: u64, file_name: &str, bytes: &[u8]) -> bool {
        match self.try_upload_attachment(result_id, file_name, bytes) {
            Ok(()) => true,
            Err(e) => {
                warn!(kind = e.kind_name(), "{}", e);
                false
            }
        }
    }

    /// Close the active run; no-op when none is active
    pub fn close_run(&self) -> Result<(), SyncError> {
        let mut run = self.run.lock();
        let Some(run_id) = run.id.take() else {
            debug!("No active run to close");
            return Ok(());
        };
        run.status = RunStatus::Closed;
        run.case_ids.clear();
        for (case_id, id) in std::mem::take(&mut run.case_runs) {
            match self.api.close_run(id) {
                Ok(()) => debug!("Closed recovery run {} for C{}", id, case_id),
                Err(e) => warn!("Closing recovery run {} for C{} failed: {}", id, case_id, e),
            }
        }
        self.api
            .close_run(run_id)
            .map_err(|source| SyncError::Close { run_id, source })?;
        info!("Closed run {}", run_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTestManagement;
    use qarun_common::{BrowserKind, FailureKind, Priority};

    fn synchronizer(api: Arc<MemoryTestManagement>) -> TestManagementSynchronizer {
        TestManagementSynchronizer::new(
            api,
            &SyncConfig::default(),
            DefectEnvironment::current(BrowserKind::Chrome, true, "QA"),
        )
    }

    #[test]
    fn test_ensure_run_reuses_active_run() {
        let api = Arc::new(MemoryTestManagement::new());
        let sync = synchronizer(api.clone());

        let first = sync.ensure_run(&[1, 2]).unwrap();
        let second = sync.ensure_run(&[3]).unwrap();
        assert_eq!(first, second);
        assert_eq!(api.runs().len(), 1);
        assert!(api.runs()[0].name.starts_with("AutoRun - "));
        assert_eq!(api.runs()[0].case_ids, vec![1, 2]);
    }

    #[test]
    fn test_submit_without_run() {
        let sync = synchronizer(Arc::new(MemoryTestManagement::new()));
        assert!(matches!(
            sync.submit_result(1, true, "ok"),
            Err(SyncError::NoActiveRun)
        ));
    }

    #[test]
    fn test_recovery_creates_single_case_run() {
        let api = Arc::new(MemoryTestManagement::new());
        let sync = synchronizer(api.clone());
        let original = sync.ensure_run(&[296, 297]).unwrap();
        api.close_remotely(original);

        let result = sync.submit_result(296, false, "failed").unwrap();
        let runs = api.runs();
        assert_eq!(runs.len(), 2);
        assert!(runs[1].name.starts_with("AutoRecoveryRun - "));
        assert_eq!(runs[1].case_ids, vec![296]);
        assert_eq!(sync.run_id(), Some(runs[1].id));

        let results = api.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, result);
        assert_eq!(results[0].run_id, runs[1].id);
    }

    #[test]
    fn test_recovery_is_bounded() {
        let api = Arc::new(MemoryTestManagement::new());
        let sync = synchronizer(api.clone());
        sync.ensure_run(&[296]).unwrap();

        let invalid = || ApiError::new(ApiErrorKind::RunInvalid, Some(400), "run_id invalid");
        api.fail_next_submit(invalid());
        api.fail_next_submit(invalid());
        api.fail_next_submit(invalid());

        let err = sync.submit_result(296, true, "ok").unwrap_err();
        assert!(matches!(err, SyncError::RecoveryFailed { case_id: 296, .. }));
        // original + exactly one recovery run
        assert_eq!(api.runs().len(), 2);
    }

    #[test]
    fn test_other_errors_are_not_recovered() {
        let api = Arc::new(MemoryTestManagement::new());
        let sync = synchronizer(api.clone());
        sync.ensure_run(&[5]).unwrap();
        api.fail_next_submit(ApiError::new(ApiErrorKind::Rejected, Some(500), "boom"));

        assert!(matches!(
            sync.submit_result(5, true, "ok"),
            Err(SyncError::Submit { case_id: 5, .. })
        ));
        assert_eq!(api.runs().len(), 1);
    }

    fn assert_results_in_member_runs(api: &MemoryTestManagement) {
        let runs = api.runs();
        for result in api.results() {
            let run = runs.iter().find(|r| r.id == result.run_id).unwrap();
            assert!(
                run.case_ids.contains(&result.case_id),
                "C{} recorded in run {} holding {:?}",
                result.case_id,
                run.id,
                run.case_ids
            );
        }
    }

    #[test]
    fn test_later_case_after_recovery_gets_its_own_run() {
        let api = Arc::new(MemoryTestManagement::new());
        let sync = synchronizer(api.clone());
        let original = sync.ensure_run(&[1, 2]).unwrap();
        api.close_remotely(original);

        sync.submit_result(1, true, "ok").unwrap();
        sync.submit_result(2, false, "failed").unwrap();
        // a second result for the same case reuses its recovery run
        sync.submit_result(2, false, "defect").unwrap();

        let runs = api.runs();
        let layout: Vec<(u64, Vec<u64>)> = runs.iter().map(|r| (r.id, r.case_ids.clone())).collect();
        assert_eq!(layout.len(), 3);
        assert_eq!(layout[1].1, vec![1]);
        assert_eq!(layout[2].1, vec![2]);
        assert_eq!(sync.run_id(), Some(layout[1].0));
        assert_eq!(sync.run_state().case_runs.get(&2), Some(&layout[2].0));
        assert_eq!(api.results().len(), 3);
        assert_results_in_member_runs(&api);

        sync.close_run().unwrap();
        assert!(api.runs()[1..].iter().all(|r| r.status == RunStatus::Closed));
    }

    #[test]
    fn test_case_outside_shared_run() {
        let api = Arc::new(MemoryTestManagement::new());
        let sync = synchronizer(api.clone());
        let shared = sync.ensure_run(&[1, 2]).unwrap();

        sync.submit_result(9, true, "ok").unwrap();
        sync.submit_result(2, true, "ok").unwrap();

        let runs = api.runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[1].case_ids, vec![9]);
        // the shared run keeps serving its own cases
        assert_eq!(sync.run_id(), Some(shared));
        assert_eq!(api.results()[1].run_id, shared);
        assert_results_in_member_runs(&api);
    }

    #[test]
    fn test_case_rejected_by_run_recovers_once() {
        let api = Arc::new(MemoryTestManagement::new());
        let sync = synchronizer(api.clone());
        sync.ensure_run(&[4]).unwrap();
        api.fail_next_submit(ApiError::from_response(
            400,
            r#"{"error":"No (active) test found for the run/case combination."}"#,
        ));

        sync.submit_result(4, true, "ok").unwrap();
        assert_eq!(api.runs().len(), 2);
        assert_eq!(api.results()[0].run_id, api.runs()[1].id);
    }

    #[test]
    fn test_concurrent_recovery_replaces_once() {
        let api = Arc::new(MemoryTestManagement::new());
        let sync = synchronizer(api.clone());
        let original = sync.ensure_run(&[1, 2, 3, 4]).unwrap();
        api.close_remotely(original);

        std::thread::scope(|s| {
            for case in 1..=4u64 {
                let sync = &sync;
                s.spawn(move || {
                    sync.submit_result(case, true, "ok").unwrap();
                    sync.submit_result(case, false, "again").unwrap();
                });
            }
        });

        // one replacement of the shared run, one recovery run per other case
        let recovery: Vec<_> = api.runs().into_iter().filter(|r| r.id != original).collect();
        assert_eq!(recovery.len(), 4);
        assert!(recovery.iter().all(|r| r.case_ids.len() == 1));
        assert_eq!(api.results().len(), 8);
        assert_results_in_member_runs(&api);

        sync.close_run().unwrap();
        assert!(api.runs().iter().all(|r| r.status == RunStatus::Closed));
    }

    #[test]
    fn test_file_defect_and_upload_failure() {
        let api = Arc::new(MemoryTestManagement::new());
        let sync = synchronizer(api.clone());
        sync.ensure_run(&[296]).unwrap();
        api.fail_uploads();

        let defect = Defect::new(
            296,
            "Login",
            FailureKind::ElementNotFound,
            Priority::High,
            "Step: When I log in",
            "no such element",
        );
        assert!(sync.file_defect(&defect));
        assert!(!sync.upload_attachment(1, "report.json", b"{}"));

        let results = api.results();
        assert_eq!(results[0].submission.defects.as_deref(), Some(defect.reference.as_str()));
        assert!(!results[0].submission.passed);
        assert!(results[0].submission.comment.contains("## Recommended remediation"));
    }

    #[test]
    fn test_file_defect_never_raises() {
        let api = Arc::new(MemoryTestManagement::new());
        let sync = synchronizer(api.clone());
        let defect = Defect::new(1, "X", FailureKind::Unknown, Priority::Low, "d", "s");
        assert!(!sync.file_defect(&defect));

        let err = sync.try_file_defect(&defect).unwrap_err();
        assert!(matches!(err, E2eError::DefectFiling { case_id: 1, .. }));
        assert_eq!(err.kind_name(), "DefectFilingError");

        api.fail_uploads();
        let err = sync.try_upload_attachment(7, "report.json", b"{}").unwrap_err();
        assert!(matches!(err, E2eError::AttachmentUpload { result_id: 7, .. }));
        assert!(err.to_string().contains("attachment storage unavailable"));
    }

    #[test]
    fn test_close_run_is_idempotent() {
        let api = Arc::new(MemoryTestManagement::new());
        let sync = synchronizer(api.clone());
        sync.close_run().unwrap();

        sync.ensure_run(&[1]).unwrap();
        sync.close_run().unwrap();
        sync.close_run().unwrap();
        assert_eq!(api.runs()[0].status, RunStatus::Closed);
        assert_eq!(sync.run_id(), None);
    }
}
