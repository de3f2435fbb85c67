//! Step event recording
//!
//! A [`StepRecorder`] is created for each scenario with its report entry
//! handle. It turns step-start/step-finish events into [`Step`] records and
//! keeps the scenario's [`FailureContext`]: the first failure seen, whether
//! it came from an exhausted resilient action or a failed step.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Instant;
use tracing::{debug, warn};

use qarun_common::{FailureKind, Priority, StepOutcome};

use crate::classifier::classify_error;
use crate::error::{error_chain, ActionError, E2eError};
use crate::executor::{EvidenceSink, FailureSink};
use crate::report::{Artifact, EntryHandle, FailureSummary, ReportAggregator, Step};
use crate::session::Session;

/// The first failure captured in a scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureContext {
    pub step: String,
    /// Declared kind of the error (`ActionError`, `AssertionError`, ...)
    pub error_kind: String,
    pub message: String,
    /// Error and source chain, one cause per line
    pub detail: Vec<String>,
    pub failure_kind: FailureKind,
    pub priority: Priority,
}

impl FailureContext {
    pub fn from_error(step: &str, error: &E2eError) -> Self {
        let (failure_kind, priority) = classify_error(error);
        Self {
            step: step.to_string(),
            error_kind: error.kind_name().to_string(),
            message: error.to_string(),
            detail: error_chain(error),
            failure_kind,
            priority,
        }
    }

    pub fn summary(&self) -> FailureSummary {
        FailureSummary {
            step: self.step.clone(),
            kind: self.failure_kind,
            priority: self.priority,
            message: self.message.clone(),
        }
    }
}

struct ActiveStep {
    text: String,
    started_at: DateTime<Utc>,
    clock: Instant,
}

/// Records the steps of one scenario into its report entry
pub struct StepRecorder<'r> {
    aggregator: &'r ReportAggregator,
    entry: EntryHandle,
    capture_screenshots: bool,
    active: Mutex<Option<ActiveStep>>,
    failure: Mutex<Option<FailureContext>>,
}

impl<'r> StepRecorder<'r> {
    pub fn new(aggregator: &'r ReportAggregator, entry: EntryHandle, capture_screenshots: bool) -> Self {
        Self {
            aggregator,
            entry,
            capture_screenshots,
            active: Mutex::new(None),
            failure: Mutex::new(None),
        }
    }

    pub fn entry(&self) -> &EntryHandle {
        &self.entry
    }

    pub fn on_step_start(&self, text: &str) {
        debug!("Step started: {}", text);
        *self.active.lock() = Some(ActiveStep {
            text: text.to_string(),
            started_at: Utc::now(),
            clock: Instant::now(),
        });
    }

    /// Finalize the active step; `session` supplies the closing screenshot
    pub fn on_step_finish(&self, error: Option<&E2eError>, session: Option<&mut Session>) {
        let Some(active) = self.active.lock().take() else {
            warn!("Step finished without a matching start; ignoring");
            return;
        };
        let duration_ms = active.clock.elapsed().as_millis() as u64;

        let screenshot = if self.capture_screenshots {
            session.and_then(|s| match s.backend().screenshot() {
                Ok(png) => Some(Artifact::png(&png, &active.text)),
                Err(e) => {
                    warn!("Step screenshot failed for '{}': {}", active.text, e);
                    None
                }
            })
        } else {
            None
        };

        let outcome = if error.is_some() {
            StepOutcome::Fail
        } else {
            StepOutcome::Pass
        };
        if let Some(error) = error {
            self.capture_first(FailureContext::from_error(&active.text, error));
        }

        self.aggregator.append_step(
            &self.entry,
            Step {
                text: active.text,
                started_at: active.started_at,
                duration_ms,
                outcome,
                error: error.map(|e| e.to_string()),
                screenshot,
            },
        );
    }

    /// Record a step that was never executed
    pub fn on_step_skipped(&self, text: &str) {
        self.aggregator.append_step(&self.entry, Step::skipped(text));
    }

    pub fn failure(&self) -> Option<FailureContext> {
        self.failure.lock().clone()
    }

    /// Read the failure context once, leaving it empty
    pub fn take_failure(&self) -> Option<FailureContext> {
        self.failure.lock().take()
    }

    fn capture_first(&self, context: FailureContext) {
        let mut slot = self.failure.lock();
        if slot.is_none() {
            debug!(
                "Captured failure in '{}': {:?}/{:?}",
                context.step, context.failure_kind, context.priority
            );
            self.aggregator.record_failure(&self.entry, context.summary());
            *slot = Some(context);
        }
    }

    fn active_text(&self) -> String {
        self.active
            .lock()
            .as_ref()
            .map(|a| a.text.clone())
            .unwrap_or_default()
    }
}

impl FailureSink for StepRecorder<'_> {
    fn record_failure(&self, error: &ActionError) {
        let step = self.active_text();
        self.capture_first(FailureContext::from_error(&step, &E2eError::Action(error.clone())));
    }
}

impl EvidenceSink for StepRecorder<'_> {
    fn capture(&self, caption: &str, png: Vec<u8>) {
        self.aggregator
            .attach_artifact(&self.entry, &png, caption, "image/png");
    }
}
