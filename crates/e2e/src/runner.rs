//! Suite runner that drives scenarios across a worker pool

use crossbeam_channel::unbounded;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use qarun_common::{FailureKind, Priority, QarunConfig, StepOutcome};

use crate::backend::SessionFactory;
use crate::error::{ActionError, E2eError, E2eResult};
use crate::executor::{Pause, ResilientExecutor, ThreadPause};
use crate::locators::LocatorCatalog;
use crate::recorder::{FailureContext, StepRecorder};
use crate::report::{JsonReportSink, ReportAggregator};
use crate::session::{Session, SessionOptions, SessionRegistry, SessionSlot, WaitConfig};
use crate::spec::{expand_vars, Scenario, StepAction};
use crate::sync::{Defect, TestManagementSynchronizer};

/// File name of the machine-readable suite summary
pub const SUITE_RESULTS_FILE: &str = "suite-results.json";

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub case_id: Option<u64>,
    pub outcome: StepOutcome,
    pub duration_ms: u64,
    pub steps: usize,
    pub failure_kind: Option<FailureKind>,
    pub priority: Option<Priority>,
    pub error: Option<String>,
    /// Remote result id when the outcome was synchronized
    pub result_id: Option<u64>,
    pub defect_filed: bool,
}

/// Result of running all scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub run_id: Option<u64>,
    pub report_path: Option<PathBuf>,
    pub results: Vec<ScenarioResult>,
}

impl SuiteResult {
    fn tally(results: Vec<ScenarioResult>, duration: Duration, run_id: Option<u64>) -> Self {
        let count = |outcome: StepOutcome| results.iter().filter(|r| r.outcome == outcome).count();
        Self {
            total: results.len(),
            passed: count(StepOutcome::Pass),
            failed: count(StepOutcome::Fail),
            skipped: count(StepOutcome::Skipped),
            duration_ms: duration.as_millis() as u64,
            run_id,
            report_path: None,
            results,
        }
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }

    pub fn write_to(&self, path: &Path) -> E2eResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> E2eResult<Self> {
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }
}

/// Comment submitted with each remote result
pub fn result_comment(
    scenario: &str,
    outcome: StepOutcome,
    duration: Duration,
    failure: Option<&FailureContext>,
) -> String {
    let status = match outcome {
        StepOutcome::Pass => "PASSED",
        StepOutcome::Fail => "FAILED",
        StepOutcome::Skipped => "SKIPPED",
    };
    let mut comment = format!(
        "Scenario: {}\nStatus: {}\nExecution time: {:.2}s",
        scenario,
        status,
        duration.as_secs_f64()
    );
    if let Some(failure) = failure {
        comment.push_str(&format!(
            "\nFailed step: {}\nError: {}",
            failure.step, failure.message
        ));
    }
    comment
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Runs scenarios concurrently, one browser session per worker
pub struct SuiteRunner {
    config: QarunConfig,
    registry: Arc<SessionRegistry>,
    catalog: LocatorCatalog,
    pause: Arc<dyn Pause>,
    sync: Option<Arc<TestManagementSynchronizer>>,
    aggregator: ReportAggregator,
}

impl SuiteRunner {
    pub fn new(config: QarunConfig, factory: Arc<dyn SessionFactory>) -> E2eResult<Self> {
        let catalog = LocatorCatalog::from_config(&config.locators)?;
        let registry = Arc::new(SessionRegistry::new(
            factory,
            SessionOptions {
                browser_kind: config.browser.kind,
                headless: config.browser.headless,
                wait: WaitConfig::from_executor(&config.executor),
            },
        ));
        let aggregator = ReportAggregator::new(&config.report);
        Ok(Self {
            config,
            registry,
            catalog,
            pause: Arc::new(ThreadPause),
            sync: None,
            aggregator,
        })
    }

    /// Replace the settle/backoff pause
    pub fn with_pause(mut self, pause: Arc<dyn Pause>) -> Self {
        self.pause = pause;
        self
    }

    /// Synchronize outcomes with a test-management run
    pub fn with_sync(mut self, sync: Arc<TestManagementSynchronizer>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn aggregator(&self) -> &ReportAggregator {
        &self.aggregator
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Run every scenario, flush the report, and write the suite summary
    pub fn run(&self, scenarios: &[Scenario]) -> E2eResult<SuiteResult> {
        if self.aggregator.is_flushed() {
            return Err(E2eError::ReportAlreadyFlushed);
        }
        let mut names = HashSet::new();
        for scenario in scenarios {
            if !names.insert(scenario.name.as_str()) {
                return Err(E2eError::DuplicateScenario(scenario.name.clone()));
            }
            self.catalog.validate(scenario.locator_names())?;
        }

        let start = Instant::now();
        let sync = self.bootstrap_sync(scenarios);
        let workers = self.config.workers.clamp(1, scenarios.len().max(1));
        info!("Running {} scenario(s) on {} worker(s)...", scenarios.len(), workers);

        let (jobs_tx, jobs_rx) = unbounded::<(usize, &Scenario)>();
        let (results_tx, results_rx) = unbounded::<(usize, ScenarioResult)>();
        for job in scenarios.iter().enumerate() {
            let _ = jobs_tx.send(job);
        }
        drop(jobs_tx);

        thread::scope(|scope| {
            for worker in 0..workers {
                let jobs = jobs_rx.clone();
                let results = results_tx.clone();
                let sync = sync.clone();
                scope.spawn(move || {
                    let mut slot = self.registry.slot();
                    for (index, scenario) in jobs.iter() {
                        debug!("Worker {} picked '{}'", worker, scenario.name);
                        let result = self.run_scenario(&mut slot, scenario, sync.as_deref());
                        let _ = results.send((index, result));
                    }
                });
            }
        });
        drop(results_tx);

        let mut indexed: Vec<(usize, ScenarioResult)> = results_rx.iter().collect();
        indexed.sort_by_key(|(index, _)| *index);
        let results: Vec<ScenarioResult> = indexed.into_iter().map(|(_, r)| r).collect();

        let run_id = sync.as_ref().and_then(|s| s.run_id());
        if let Some(sync) = &sync {
            if let Err(e) = sync.close_run() {
                warn!("{}", e);
            }
        }

        let report_path = self.config.report.report_path();
        let mut sink = JsonReportSink::create(&report_path)?;
        self.aggregator.flush(&mut sink)?;

        let mut suite = SuiteResult::tally(results, start.elapsed(), run_id);
        suite.report_path = Some(report_path);
        let summary_path = self.config.report.output_dir.join(SUITE_RESULTS_FILE);
        suite.write_to(&summary_path)?;

        info!(
            "Suite results: {} passed, {} failed, {} skipped ({} ms)",
            suite.passed, suite.failed, suite.skipped, suite.duration_ms
        );
        Ok(suite)
    }

    /// Open the remote run, or disable synchronization for this suite
    fn bootstrap_sync(&self, scenarios: &[Scenario]) -> Option<Arc<TestManagementSynchronizer>> {
        let sync = self.sync.as_ref()?;
        let case_ids = self.resolve_case_ids(sync, scenarios);
        if case_ids.is_empty() {
            warn!("No case ids resolved for the run; result synchronization disabled");
            return None;
        }
        match sync.ensure_run(&case_ids) {
            Ok(run_id) => {
                info!("Synchronizing results to run {}", run_id);
                Some(Arc::clone(sync))
            }
            Err(e) => {
                warn!("Run bootstrap failed, result synchronization disabled: {}", e);
                None
            }
        }
    }

    /// Label, then configured ids, then scenario tags
    fn resolve_case_ids(&self, sync: &TestManagementSynchronizer, scenarios: &[Scenario]) -> Vec<u64> {
        if let Some(label) = &self.config.sync.label {
            match sync.api().get_cases_by_label(label) {
                Ok(ids) if !ids.is_empty() => return ids,
                Ok(_) => warn!("Label '{}' matched no cases", label),
                Err(e) => warn!("Case lookup by label '{}' failed: {}", label, e),
            }
        }
        if !self.config.sync.case_ids.is_empty() {
            return self.config.sync.case_ids.clone();
        }
        scenarios
            .iter()
            .filter_map(Scenario::case_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn run_scenario(
        &self,
        slot: &mut SessionSlot,
        scenario: &Scenario,
        sync: Option<&TestManagementSynchronizer>,
    ) -> ScenarioResult {
        let start = Instant::now();
        let entry = self.aggregator.create_entry(&scenario.name);
        self.aggregator.set_tags(&entry, &scenario.tags);
        if !scenario.description.is_empty() {
            self.aggregator.add_note(&entry, scenario.description.clone());
        }

        let recorder = StepRecorder::new(
            &self.aggregator,
            entry.clone(),
            self.config.report.capture_step_screenshots,
        );
        let executor = ResilientExecutor::new(
            &self.config.executor,
            self.pause.as_ref(),
            &recorder,
            &recorder,
        );

        let mut failed = false;
        for step in &scenario.steps {
            let text = step.display_text();
            if failed || matches!(step.action, StepAction::Pending) {
                recorder.on_step_skipped(&text);
                continue;
            }

            recorder.on_step_start(&text);
            let session = match slot.acquire() {
                Ok(session) => session,
                Err(e) => {
                    error!("'{}': {}", scenario.name, e);
                    recorder.on_step_finish(Some(&e), None);
                    failed = true;
                    continue;
                }
            };
            match self.execute_step(&executor, session, &step.action) {
                Ok(()) => recorder.on_step_finish(None, Some(session)),
                Err(e) => {
                    warn!("'{}' failed at '{}': {}", scenario.name, text, e);
                    recorder.on_step_finish(Some(&e), Some(session));
                    failed = true;
                }
            }
        }
        slot.release();

        let duration = start.elapsed();
        let snapshot = entry.snapshot();
        let failure = recorder.take_failure();
        let case_id = scenario.case_id();

        let mut result = ScenarioResult {
            name: scenario.name.clone(),
            case_id,
            outcome: snapshot.overall_outcome,
            duration_ms: duration.as_millis() as u64,
            steps: snapshot.steps.len(),
            failure_kind: failure.as_ref().map(|f| f.failure_kind),
            priority: failure.as_ref().map(|f| f.priority),
            error: failure.as_ref().map(|f| f.message.clone()),
            result_id: None,
            defect_filed: false,
        };

        match result.outcome {
            StepOutcome::Pass => info!("✓ {} ({} ms)", result.name, result.duration_ms),
            StepOutcome::Fail => error!(
                "✗ {} - {}",
                result.name,
                result.error.as_deref().unwrap_or("unknown error")
            ),
            StepOutcome::Skipped => info!("- {} (skipped)", result.name),
        }

        if let (Some(sync), Some(case_id)) = (sync, case_id) {
            self.synchronize(sync, case_id, scenario, duration, failure.as_ref(), &mut result);
        }
        result
    }

    /// Submit the outcome, file a defect on failure, attach the entry snapshot
    ///
    /// Every remote problem is logged and swallowed.
    fn synchronize(
        &self,
        sync: &TestManagementSynchronizer,
        case_id: u64,
        scenario: &Scenario,
        duration: Duration,
        failure: Option<&FailureContext>,
        result: &mut ScenarioResult,
    ) {
        if result.outcome == StepOutcome::Skipped {
            debug!("'{}' skipped; no result submitted for C{}", scenario.name, case_id);
            return;
        }

        let comment = result_comment(&scenario.name, result.outcome, duration, failure);
        match sync.submit_result(case_id, result.outcome == StepOutcome::Pass, &comment) {
            Ok(result_id) => result.result_id = Some(result_id),
            Err(e) => {
                let e = E2eError::from(e);
                warn!(kind = e.kind_name(), "{}", e);
            }
        }

        if let Some(failure) = failure {
            let defect = Defect::from_failure(case_id, &scenario.name, failure, sync.stack_excerpt_lines());
            result.defect_filed = sync.file_defect(&defect);
        }

        if let Some(result_id) = result.result_id {
            let Some(entry) = self.aggregator.get(&scenario.name) else {
                return;
            };
            match self.aggregator.render_entry(&entry) {
                Ok(bytes) => {
                    sync.upload_attachment(result_id, &snapshot_file_name(&scenario.name), &bytes);
                }
                Err(e) => warn!("Report snapshot for '{}' failed: {}", scenario.name, e),
            }
        }
    }

    fn execute_step(
        &self,
        executor: &ResilientExecutor<'_>,
        session: &mut Session,
        action: &StepAction,
    ) -> E2eResult<()> {
        match action {
            StepAction::Navigate { url } => executor.navigate(session, &expand_vars(url, env_var)?),
            StepAction::Click { target } => executor.click(session, &target.resolve(&self.catalog)?),
            StepAction::Type { target, value } => {
                let locator = target.resolve(&self.catalog)?;
                executor.type_text(session, &locator, &expand_vars(value, env_var)?)
            }
            StepAction::ReadText { target, contains } => {
                let text = executor.read_text(session, &target.resolve(&self.catalog)?)?;
                match contains {
                    Some(expected) if !text.contains(expected.as_str()) => Err(E2eError::AssertionFailed(
                        format!("text of {} is {:?}, expected it to contain {:?}", target, text, expected),
                    )),
                    _ => Ok(()),
                }
            }
            StepAction::ReadAttribute { target, name, equals } => {
                let value = executor.read_attribute(session, &target.resolve(&self.catalog)?, name)?;
                match equals {
                    Some(expected) if value.as_deref() != Some(expected.as_str()) => {
                        Err(E2eError::AssertionFailed(format!(
                            "attribute {} of {} is {:?}, expected {:?}",
                            name, target, value, expected
                        )))
                    }
                    _ => Ok(()),
                }
            }
            StepAction::Exists { target, timeout_ms, expect } => {
                let present = executor.exists(
                    session,
                    &target.resolve(&self.catalog)?,
                    Duration::from_millis(*timeout_ms),
                )?;
                if present == *expect {
                    Ok(())
                } else {
                    Err(E2eError::AssertionFailed(format!(
                        "expected {} to be {}",
                        target,
                        if *expect { "present" } else { "absent" }
                    )))
                }
            }
            StepAction::AssertUrl { fragment } => {
                let url = session.backend().current_url().map_err(|last_cause| ActionError {
                    operation: "current_url".to_string(),
                    target: "page".to_string(),
                    attempts: 1,
                    last_cause,
                })?;
                if url.contains(fragment.as_str()) {
                    Ok(())
                } else {
                    Err(E2eError::AssertionFailed(format!(
                        "url {} does not contain {:?}",
                        url, fragment
                    )))
                }
            }
            StepAction::Pending => Ok(()),
        }
    }
}

/// Attachment name for a scenario's report snapshot
pub fn snapshot_file_name(scenario: &str) -> String {
    let stem: String = scenario
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{}-report.json", stem.trim_matches('_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Locator;
    use crate::executor::NoPause;
    use crate::memory::{MemoryElement, MemoryPage, MemorySessionFactory};
    use qarun_common::ReportConfig;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> QarunConfig {
        let mut config = QarunConfig::default();
        config.workers = 2;
        config.report = ReportConfig {
            output_dir: dir.path().to_path_buf(),
            min_bytes: 0,
            ..ReportConfig::default()
        };
        config
    }

    fn page() -> MemoryPage {
        MemoryPage::new()
            .with_element(&Locator::Id("username".into()), MemoryElement::new())
            .with_element(&Locator::Id("password".into()), MemoryElement::new())
            .with_element(&Locator::Id("submitbtn".into()), MemoryElement::new())
            .with_element(
                &Locator::Css("h1".into()),
                MemoryElement::new().with_text("Welcome back"),
            )
    }

    fn scenario(yaml: &str) -> Scenario {
        Scenario::from_yaml(yaml).unwrap()
    }

    #[test]
    fn test_result_comment() {
        let comment = result_comment("Login", StepOutcome::Pass, Duration::from_millis(1500), None);
        assert_eq!(comment, "Scenario: Login\nStatus: PASSED\nExecution time: 1.50s");
    }

    #[test]
    fn test_snapshot_file_name() {
        assert_eq!(snapshot_file_name("C296 - Login works"), "C296_-_Login_works-report.json");
        assert_eq!(snapshot_file_name("plain"), "plain-report.json");
    }

    #[test]
    fn test_steps_after_failure_are_skipped() {
        let dir = TempDir::new().unwrap();
        let runner = SuiteRunner::new(config(&dir), Arc::new(MemorySessionFactory::new(page())))
            .unwrap()
            .with_pause(Arc::new(NoPause));

        let suite = runner
            .run(&[scenario(
                r#"
name: Greeting
steps:
  - action: read_text
    target: "css:h1"
    contains: "Goodbye"
  - action: click
    target: login.submit
  - text: Then the dashboard loads
    action: pending
"#,
            )])
            .unwrap();

        assert_eq!(suite.failed, 1);
        let result = &suite.results[0];
        assert_eq!(result.failure_kind, Some(FailureKind::AssertionFailure));

        let entry = runner.aggregator().get("Greeting").unwrap().snapshot();
        let outcomes: Vec<StepOutcome> = entry.steps.iter().map(|s| s.outcome).collect();
        assert_eq!(
            outcomes,
            vec![StepOutcome::Fail, StepOutcome::Skipped, StepOutcome::Skipped]
        );
    }

    #[test]
    fn test_pending_only_scenario_is_skipped() {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(MemorySessionFactory::new(page()));
        let runner = SuiteRunner::new(config(&dir), factory.clone())
            .unwrap()
            .with_pause(Arc::new(NoPause));

        let suite = runner
            .run(&[scenario(
                "name: Draft\nsteps:\n  - text: Given something\n    action: pending\n",
            )])
            .unwrap();
        assert_eq!(suite.skipped, 1);
        assert_eq!(factory.created(), 0);
    }

    #[test]
    fn test_unknown_locator_fails_fast() {
        let dir = TempDir::new().unwrap();
        let runner = SuiteRunner::new(config(&dir), Arc::new(MemorySessionFactory::new(page()))).unwrap();
        let err = runner
            .run(&[scenario("name: Bad\nsteps:\n  - action: click\n    target: nav.missing\n")])
            .unwrap_err();
        assert!(matches!(err, E2eError::UnknownLocator(_)));
        assert!(!runner.aggregator().is_flushed());
    }

    #[test]
    fn test_duplicate_scenario_names_are_rejected() {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(MemorySessionFactory::new(page()));
        let runner = SuiteRunner::new(config(&dir), factory.clone()).unwrap();
        let err = runner
            .run(&[
                scenario("name: Dup\nsteps:\n  - action: click\n    target: \"css:#ghost\"\n"),
                scenario("name: Dup\nsteps:\n  - action: click\n    target: login.submit\n"),
            ])
            .unwrap_err();
        assert!(matches!(err, E2eError::DuplicateScenario(ref name) if name == "Dup"));
        assert_eq!(factory.created(), 0);
        assert!(runner.aggregator().is_empty());
        assert!(!runner.aggregator().is_flushed());
    }

    #[test]
    fn test_session_init_failure_fails_scenario() {
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(MemorySessionFactory::new(page()));
        factory.fail_creation("driver unreachable");
        let runner = SuiteRunner::new(config(&dir), factory)
            .unwrap()
            .with_pause(Arc::new(NoPause));

        let suite = runner
            .run(&[scenario("name: Nav\nsteps:\n  - action: navigate\n    url: https://x/login\n")])
            .unwrap();
        assert_eq!(suite.failed, 1);
        assert!(suite.results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("driver unreachable"));
    }

    #[test]
    fn test_assert_url_and_exists() {
        let dir = TempDir::new().unwrap();
        let runner = SuiteRunner::new(config(&dir), Arc::new(MemorySessionFactory::new(page())))
            .unwrap()
            .with_pause(Arc::new(NoPause));

        let suite = runner
            .run(&[scenario(
                r#"
name: Landing
steps:
  - action: navigate
    url: https://x/login
  - action: assert_url
    fragment: /login
  - action: exists
    target: "css:.error"
    timeout_ms: 10
    expect: false
"#,
            )])
            .unwrap();
        assert!(suite.success(), "{:?}", suite.results);
    }

    #[test]
    fn test_second_run_is_rejected() {
        let dir = TempDir::new().unwrap();
        let runner = SuiteRunner::new(config(&dir), Arc::new(MemorySessionFactory::new(page())))
            .unwrap()
            .with_pause(Arc::new(NoPause));
        runner.run(&[]).unwrap();
        assert!(matches!(runner.run(&[]), Err(E2eError::ReportAlreadyFlushed)));
    }
}
