//! Suite runner tests over the in-memory browser and test-management fakes

use std::sync::Arc;

use tempfile::TempDir;

use qarun_common::{
    BrowserKind, FailureKind, QarunConfig, ReportConfig, RunStatus, StepOutcome, SyncConfig,
};
use qarun_e2e::memory::{MemoryElement, MemoryPage, MemorySessionFactory, MemoryTestManagement};
use qarun_e2e::runner::SUITE_RESULTS_FILE;
use qarun_e2e::sync::DefectEnvironment;
use qarun_e2e::{
    Locator, NoPause, Scenario, SuiteResult, SuiteRunner, TestManagementSynchronizer,
};

fn config(dir: &TempDir, workers: usize) -> QarunConfig {
    let mut config = QarunConfig::default();
    config.workers = workers;
    config.executor.wait_timeout_ms = 20;
    config.executor.poll_interval_ms = 1;
    config.report = ReportConfig {
        output_dir: dir.path().to_path_buf(),
        min_bytes: 0,
        ..ReportConfig::default()
    };
    config
}

fn login_page() -> MemoryPage {
    MemoryPage::new()
        .with_element(&Locator::Id("username".into()), MemoryElement::new())
        .with_element(&Locator::Id("password".into()), MemoryElement::new())
        .with_element(&Locator::Id("submitbtn".into()), MemoryElement::new())
}

fn synchronizer(tm: &Arc<MemoryTestManagement>) -> Arc<TestManagementSynchronizer> {
    Arc::new(TestManagementSynchronizer::new(
        tm.clone(),
        &SyncConfig::default(),
        DefectEnvironment::current(BrowserKind::Chrome, true, "QA"),
    ))
}

const LOGIN: &str = r#"
name: Valid login
tags: ["@smoke", "@CaseID_101"]
steps:
  - text: Given I open the login page
    action: navigate
    url: https://x/login
  - text: When I enter username
    action: type
    target: login.username
    value: u
  - text: And I enter password
    action: type
    target: login.password
    value: p
  - text: And I click login
    action: click
    target: login.submit
"#;

#[test]
fn login_scenario_passes_without_defect() {
    let dir = TempDir::new().unwrap();
    let factory = Arc::new(MemorySessionFactory::new(login_page()));
    let tm = Arc::new(MemoryTestManagement::new());
    let runner = SuiteRunner::new(config(&dir, 1), factory.clone())
        .unwrap()
        .with_pause(Arc::new(NoPause))
        .with_sync(synchronizer(&tm));

    let suite = runner.run(&[Scenario::from_yaml(LOGIN).unwrap()]).unwrap();

    assert_eq!(suite.passed, 1);
    let result = &suite.results[0];
    assert_eq!(result.outcome, StepOutcome::Pass);
    assert_eq!(result.case_id, Some(101));
    assert!(!result.defect_filed);

    let page = &factory.pages()[0];
    assert_eq!(page.calls_starting_with("send_keys"), 2);
    assert_eq!(page.calls_starting_with("click"), 1);
    assert_eq!(page.value_of(&Locator::Id("username".into())).as_deref(), Some("u"));

    let results = tm.results();
    assert_eq!(results.len(), 1);
    assert!(results[0].submission.passed);
    assert!(results[0].submission.defects.is_none());
    assert!(results[0].submission.comment.contains("Status: PASSED"));

    let attachments = tm.attachments();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].1, "Valid_login-report.json");

    let runs = tm.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].case_ids, vec![101]);
    assert_eq!(runs[0].status, RunStatus::Closed);
}

#[test]
fn parallel_scenarios_keep_their_own_sessions_and_order() {
    let dir = TempDir::new().unwrap();
    let factory = Arc::new(MemorySessionFactory::new(login_page()));
    let runner = SuiteRunner::new(config(&dir, 3), factory.clone())
        .unwrap()
        .with_pause(Arc::new(NoPause));

    let scenarios: Vec<Scenario> = (0..6)
        .map(|i| {
            Scenario::from_yaml(&format!(
                r#"
name: Scenario {i}
steps:
  - action: navigate
    url: https://x/page/{i}
  - action: type
    target: login.username
    value: user-{i}
  - action: click
    target: login.submit
"#
            ))
            .unwrap()
        })
        .collect();

    let suite = runner.run(&scenarios).unwrap();
    assert_eq!(suite.total, 6);
    assert!(suite.success(), "{:?}", suite.results);

    // one session per scenario, all torn down
    assert_eq!(factory.created(), 6);
    assert_eq!(factory.quits(), 6);
    assert_eq!(runner.registry().open_sessions(), 0);

    for (i, result) in suite.results.iter().enumerate() {
        assert_eq!(result.name, format!("Scenario {}", i));
        let entry = runner.aggregator().get(&result.name).unwrap().snapshot();
        let navigate = format!("Navigate to https://x/page/{}", i);
        let texts: Vec<&str> = entry.steps.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![navigate.as_str(), "Type into login.username", "Click login.submit"]
        );
    }

    let summary = SuiteResult::load(&dir.path().join(SUITE_RESULTS_FILE)).unwrap();
    assert_eq!(summary.passed, 6);
    assert!(suite.report_path.unwrap().exists());
}

#[test]
fn failed_scenario_files_defect_and_keeps_local_report() {
    let dir = TempDir::new().unwrap();
    let factory = Arc::new(MemorySessionFactory::new(login_page()));
    let tm = Arc::new(MemoryTestManagement::new());
    let mut config = config(&dir, 1);
    config.executor.standard_backoff_ms = 1;
    let runner = SuiteRunner::new(config, factory)
        .unwrap()
        .with_pause(Arc::new(NoPause))
        .with_sync(synchronizer(&tm));

    let scenario = Scenario::from_yaml(
        r#"
name: Broken button
tags: ["@C296"]
steps:
  - action: click
    target: "css:#ghost"
  - action: click
    target: login.submit
"#,
    )
    .unwrap();
    let suite = runner.run(&[scenario]).unwrap();

    let result = &suite.results[0];
    assert_eq!(result.outcome, StepOutcome::Fail);
    assert_eq!(result.failure_kind, Some(FailureKind::ElementNotFound));
    assert!(result.defect_filed);
    assert!(result.error.as_deref().unwrap().contains("after 3 attempt(s)"));

    let results = tm.results();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| !r.submission.passed && r.case_id == 296));
    assert!(results[0].submission.comment.contains("Failed step: Click css:#ghost"));
    let reference = results[1].submission.defects.as_deref().unwrap();
    assert!(reference.starts_with("AUTO-DEFECT-C296-"));
    assert!(results[1].submission.comment.contains("## Recommended remediation"));

    let report = std::fs::read_to_string(suite.report_path.unwrap()).unwrap();
    assert!(report.contains("Broken button"));
    assert!(report.contains("ELEMENT_NOT_FOUND"));
}

#[test]
fn run_recovers_when_remote_run_is_closed_mid_suite() {
    let dir = TempDir::new().unwrap();
    let factory = Arc::new(MemorySessionFactory::new(login_page()));
    let tm = Arc::new(MemoryTestManagement::new());
    let sync = synchronizer(&tm);
    let original = sync.ensure_run(&[101]).unwrap();
    tm.close_remotely(original);

    let runner = SuiteRunner::new(config(&dir, 1), factory)
        .unwrap()
        .with_pause(Arc::new(NoPause))
        .with_sync(sync);
    let suite = runner.run(&[Scenario::from_yaml(LOGIN).unwrap()]).unwrap();

    let result = &suite.results[0];
    assert_eq!(result.outcome, StepOutcome::Pass);
    assert!(result.result_id.is_some());

    let runs = tm.runs();
    assert_eq!(runs.len(), 2);
    assert!(runs[1].name.starts_with("AutoRecoveryRun - "));
    assert_eq!(runs[1].case_ids, vec![101]);
    assert_eq!(tm.results()[0].run_id, runs[1].id);
}

#[test]
fn every_case_keeps_its_result_after_recovery() {
    let dir = TempDir::new().unwrap();
    let factory = Arc::new(MemorySessionFactory::new(login_page()));
    let tm = Arc::new(MemoryTestManagement::new());
    let sync = synchronizer(&tm);
    let original = sync.ensure_run(&[201, 202, 203]).unwrap();
    tm.close_remotely(original);

    let runner = SuiteRunner::new(config(&dir, 2), factory)
        .unwrap()
        .with_pause(Arc::new(NoPause))
        .with_sync(sync);
    let scenarios: Vec<Scenario> = (201..=203)
        .map(|case| {
            Scenario::from_yaml(&format!(
                "name: Case {case}\ntags: [\"@C{case}\"]\nsteps:\n  - action: click\n    target: login.submit\n"
            ))
            .unwrap()
        })
        .collect();
    let suite = runner.run(&scenarios).unwrap();

    assert_eq!(suite.passed, 3);
    assert!(suite.results.iter().all(|r| r.result_id.is_some()), "{:?}", suite.results);

    let runs = tm.runs();
    assert_eq!(runs.len(), 4);
    for result in tm.results() {
        let run = runs.iter().find(|r| r.id == result.run_id).unwrap();
        assert_eq!(run.case_ids, vec![result.case_id]);
    }
    assert!(runs.iter().all(|r| r.status == RunStatus::Closed));
}

#[test]
fn bootstrap_failure_disables_sync_but_runs_suite() {
    let dir = TempDir::new().unwrap();
    let tm = Arc::new(MemoryTestManagement::new());
    tm.fail_next_create(qarun_e2e::sync::ApiError::new(
        qarun_e2e::sync::ApiErrorKind::Unauthorized,
        Some(401),
        "bad credentials",
    ));
    let runner = SuiteRunner::new(
        config(&dir, 1),
        Arc::new(MemorySessionFactory::new(login_page())),
    )
    .unwrap()
    .with_pause(Arc::new(NoPause))
    .with_sync(synchronizer(&tm));

    let suite = runner.run(&[Scenario::from_yaml(LOGIN).unwrap()]).unwrap();
    assert_eq!(suite.passed, 1);
    assert_eq!(suite.run_id, None);
    assert!(tm.results().is_empty());
    assert!(tm.runs().is_empty());
}

#[test]
fn label_takes_precedence_over_tags() {
    let dir = TempDir::new().unwrap();
    let tm = Arc::new(MemoryTestManagement::new().with_label("Smoke", &[101, 102, 103]));
    let mut config = config(&dir, 1);
    config.sync.label = Some("smoke".to_string());
    let runner = SuiteRunner::new(config, Arc::new(MemorySessionFactory::new(login_page())))
        .unwrap()
        .with_pause(Arc::new(NoPause))
        .with_sync(synchronizer(&tm));

    runner.run(&[Scenario::from_yaml(LOGIN).unwrap()]).unwrap();
    assert_eq!(tm.runs()[0].case_ids, vec![101, 102, 103]);
}
