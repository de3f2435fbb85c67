//! Structured defect descriptions

use chrono::Utc;
use std::fmt::Write as _;

use qarun_common::{BrowserKind, FailureKind, Priority};

use crate::recorder::FailureContext;

/// Where a defect was observed
#[derive(Debug, Clone)]
pub struct DefectEnvironment {
    pub browser: BrowserKind,
    pub headless: bool,
    pub os: &'static str,
    pub environment: String,
}

impl DefectEnvironment {
    pub fn current(browser: BrowserKind, headless: bool, environment: &str) -> Self {
        Self {
            browser,
            headless,
            os: std::env::consts::OS,
            environment: environment.to_string(),
        }
    }
}

/// A failure to be filed against a case
#[derive(Debug, Clone)]
pub struct Defect {
    pub case_id: u64,
    pub scenario: String,
    pub failure_kind: FailureKind,
    pub priority: Priority,
    pub title: String,
    /// Failed step and error message
    pub description: String,
    pub stack_excerpt: String,
    /// `AUTO-DEFECT-C<case>-<epoch millis>`
    pub reference: String,
}

impl Defect {
    pub fn new(
        case_id: u64,
        scenario: &str,
        failure_kind: FailureKind,
        priority: Priority,
        description: &str,
        stack_excerpt: &str,
    ) -> Self {
        Self {
            case_id,
            scenario: scenario.to_string(),
            failure_kind,
            priority,
            title: format!("[Auto] {} failed: {}", scenario, failure_kind.as_str()),
            description: description.to_string(),
            stack_excerpt: stack_excerpt.to_string(),
            reference: defect_reference(case_id, Utc::now().timestamp_millis()),
        }
    }

    /// Defect for a scenario's captured failure context
    pub fn from_failure(case_id: u64, scenario: &str, failure: &FailureContext, max_stack_lines: usize) -> Self {
        Self::new(
            case_id,
            scenario,
            failure.failure_kind,
            failure.priority,
            &format!("Step: {}\n{}: {}", failure.step, failure.error_kind, failure.message),
            &truncate_stack(&failure.detail, max_stack_lines),
        )
    }

    /// Comment body filed with the failing result
    pub fn render(&self, env: &DefectEnvironment, run_id: Option<u64>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {}", self.title);
        let _ = writeln!(out);
        let _ = writeln!(out, "## Test identity");
        let _ = writeln!(out, "- Scenario: {}", self.scenario);
        let _ = writeln!(out, "- Case: C{}", self.case_id);
        let _ = writeln!(out, "- Reference: {}", self.reference);
        let _ = writeln!(out);
        let _ = writeln!(out, "## Failure classification");
        let _ = writeln!(out, "- Kind: {}", self.failure_kind.as_str());
        let _ = writeln!(out, "- Priority: {}", self.priority.label());
        let _ = writeln!(out);
        let _ = writeln!(out, "## Error detail");
        let _ = writeln!(out, "{}", self.description);
        let _ = writeln!(out);
        let _ = writeln!(out, "## Stack excerpt");
        for line in self.stack_excerpt.lines() {
            let _ = writeln!(out, "    {}", line);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "## Environment");
        let _ = writeln!(
            out,
            "- Browser: {}{}",
            env.browser,
            if env.headless { " (headless)" } else { "" }
        );
        let _ = writeln!(out, "- OS: {}", env.os);
        let _ = writeln!(out, "- Environment: {}", env.environment);
        match run_id {
            Some(id) => {
                let _ = writeln!(out, "- Run: R{}", id);
            }
            None => {
                let _ = writeln!(out, "- Run: none");
            }
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "## Reproduction");
        let _ = writeln!(
            out,
            "Re-run the scenario tagged @CaseID_{} against the same environment. \
             The attached report holds the step log and screenshots.",
            self.case_id
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "## Recommended remediation");
        let _ = writeln!(out, "{}", remediation(self.failure_kind));
        out
    }
}

pub fn defect_reference(case_id: u64, epoch_millis: i64) -> String {
    format!("AUTO-DEFECT-C{}-{}", case_id, epoch_millis)
}

/// First `max_lines` lines, with a marker for what was cut
pub fn truncate_stack(lines: &[String], max_lines: usize) -> String {
    if lines.len() <= max_lines {
        return lines.join("\n");
    }
    let mut kept = lines[..max_lines].join("\n");
    let _ = write!(kept, "\n... ({} more lines)", lines.len() - max_lines);
    kept
}

pub fn remediation(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::ElementNotFound => {
            "Check that the locator still matches the page. The element may have been \
             renamed, moved, or rendered later than the wait timeout allows."
        }
        FailureKind::Timeout => {
            "Check page and backend response times. Raise the wait timeout only if the \
             slowness is expected for this environment."
        }
        FailureKind::StaleElement => {
            "The page re-rendered between locating and using the element. Wait for the \
             re-render to settle before interacting."
        }
        FailureKind::AssertionFailure => {
            "The application state differs from the expectation. Confirm whether this is \
             a product regression or an outdated expectation in the scenario."
        }
        FailureKind::NotInteractable => {
            "Another element covers the target or it is disabled. Check overlays, modals \
             and loading spinners at the time of the action."
        }
        FailureKind::Unknown => {
            "Inspect the error detail and attached report; the failure did not match a \
             known category."
        }
    }
}
