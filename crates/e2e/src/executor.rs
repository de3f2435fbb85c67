//! Resilient action executor
//!
//! Every UI operation goes through [`ResilientExecutor::run`]: resolve a
//! [`Strategy`] from the session's browser kind, wait for the element-ready
//! precondition, highlight and capture the target, act, and on transient
//! failure back off linearly and try again up to the strategy's bound.
//!
//! ```text
//! attempt 1 ──fail──▶ pause(1 × base) ──▶ attempt 2 ──fail──▶ pause(2 × base) ──▶ ...
//!     │                                       │
//!     └─ ok ──▶ value                         └─ non-transient ──▶ ActionError
//! ```

use serde_json::{json, Value};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use qarun_common::{BrowserKind, ExecutorConfig};

use crate::backend::{BackendError, BackendErrorKind, BackendResult, ElementRef, Locator};
use crate::error::{ActionError, E2eError, E2eResult};
use crate::session::Session;

pub const HIGHLIGHT_STYLE: &str = "background: yellow; border: 3px solid red; border-radius: 4px;";

const SCROLL_INTO_VIEW: &str = "arguments[0].scrollIntoView({block: 'center'});";
const SET_STYLE: &str = "arguments[0].setAttribute('style', arguments[1]);";
const REMOVE_STYLE: &str = "arguments[0].removeAttribute('style');";
const FOCUS_WINDOW: &str = "window.focus();";
const SCRIPT_CLICK: &str = "arguments[0].click();";
const SCRIPT_SET_VALUE: &str = "arguments[0].value = arguments[1]; \
     arguments[0].dispatchEvent(new Event('input', { bubbles: true })); \
     arguments[0].dispatchEvent(new Event('change', { bubbles: true }));";
const DOCUMENT_READY: &str = "return document.readyState === 'complete';";

/// Injectable delay used for backoff, polling and visual settle
pub trait Pause: Send + Sync {
    fn pause(&self, duration: Duration);
}

/// Sleeps the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

/// Returns immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPause;

impl Pause for NoPause {
    fn pause(&self, _duration: Duration) {}
}

/// Receives the final error of an exhausted resilient action
pub trait FailureSink {
    fn record_failure(&self, error: &ActionError);
}

/// Receives best-effort screenshots taken before each attempt
pub trait EvidenceSink {
    fn capture(&self, caption: &str, png: Vec<u8>);
}

/// Sink that drops everything, for callers outside a scenario
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

impl FailureSink for DiscardSink {
    fn record_failure(&self, _error: &ActionError) {}
}

impl EvidenceSink for DiscardSink {
    fn capture(&self, _caption: &str, _png: Vec<u8>) {}
}

/// Retry strategy, chosen per browser kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Wait for the ready precondition, act, retry with the standard bound
    Standard,
    /// Additionally refocus the window and fall back to script interaction
    Secondary,
}

impl Strategy {
    pub fn for_browser(kind: BrowserKind) -> Self {
        match kind {
            BrowserKind::Safari => Strategy::Secondary,
            _ => Strategy::Standard,
        }
    }

    pub fn attempts(&self, config: &ExecutorConfig) -> u32 {
        match self {
            Strategy::Standard => config.standard_attempts,
            Strategy::Secondary => config.secondary_attempts,
        }
        .max(1)
    }

    pub fn base_backoff(&self, config: &ExecutorConfig) -> Duration {
        Duration::from_millis(match self {
            Strategy::Standard => config.standard_backoff_ms,
            Strategy::Secondary => config.secondary_backoff_ms,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Standard => "standard",
            Strategy::Secondary => "secondary",
        }
    }
}

/// Element-ready precondition awaited before acting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Presence,
    Visible,
    Clickable,
}

impl Readiness {
    fn describe(&self) -> &'static str {
        match self {
            Readiness::Presence => "present",
            Readiness::Visible => "visible",
            Readiness::Clickable => "clickable",
        }
    }
}

/// Mask typed text for captions: `****` plus the last two characters
pub fn mask_sensitive(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() > 4 {
        let tail: String = chars[chars.len() - 2..].iter().collect();
        format!("****{}", tail)
    } else {
        text.to_string()
    }
}

/// Runs UI operations with bounded retry on behalf of one scenario
pub struct ResilientExecutor<'a> {
    config: &'a ExecutorConfig,
    pause: &'a dyn Pause,
    failures: &'a dyn FailureSink,
    evidence: &'a dyn EvidenceSink,
}

impl<'a> ResilientExecutor<'a> {
    pub fn new(
        config: &'a ExecutorConfig,
        pause: &'a dyn Pause,
        failures: &'a dyn FailureSink,
        evidence: &'a dyn EvidenceSink,
    ) -> Self {
        Self {
            config,
            pause,
            failures,
            evidence,
        }
    }

    /// Wait until `locator` is present and return its reference
    pub fn locate(&self, session: &mut Session, locator: &Locator) -> E2eResult<ElementRef> {
        let caption = format!("Locating {}", locator);
        self.run(session, "locate", &locator.to_string(), |exec, session, _| {
            let element = exec.wait_for(session, locator, Readiness::Presence, None)?;
            exec.highlight_and_capture(session, &element, &caption);
            Ok(element)
        })
    }

    pub fn click(&self, session: &mut Session, locator: &Locator) -> E2eResult<()> {
        let caption = format!("Clicking {}", locator);
        self.run(session, "click", &locator.to_string(), |exec, session, strategy| {
            let element = exec.wait_for(session, locator, Readiness::Clickable, None)?;
            exec.highlight_and_capture(session, &element, &caption);
            if strategy == Strategy::Secondary {
                exec.prepare_secondary(session, &element);
            }

            let backend = session.backend();
            match backend.click(&element) {
                Ok(()) => Ok(()),
                Err(e) if strategy == Strategy::Secondary
                    && e.kind == BackendErrorKind::ClickIntercepted =>
                {
                    debug!("Click intercepted on {}, falling back to script click", locator);
                    let arg = backend.element_arg(&element);
                    backend
                        .execute_script(SCRIPT_CLICK, vec![arg])
                        .map(|_| ())
                        .map_err(|fallback| {
                            debug!("Script click fallback failed on {}: {}", locator, fallback);
                            e
                        })
                }
                Err(e) => Err(e),
            }
        })
    }

    /// Clear the field, type `text` and verify the field reflects it
    pub fn type_text(&self, session: &mut Session, locator: &Locator, text: &str) -> E2eResult<()> {
        let caption = format!("Typing '{}' into {}", mask_sensitive(text), locator);
        self.run(session, "type", &locator.to_string(), |exec, session, strategy| {
            let element = exec.wait_for(session, locator, Readiness::Visible, None)?;
            exec.highlight_and_capture(session, &element, &caption);
            if strategy == Strategy::Secondary {
                exec.prepare_secondary(session, &element);
            }

            let backend = session.backend();
            let typed = backend
                .clear(&element)
                .and_then(|_| backend.send_keys(&element, text));
            match typed {
                Ok(()) => {}
                Err(e) if strategy == Strategy::Secondary && e.is_transient() => {
                    debug!("Typing into {} failed ({}), falling back to script value", locator, e);
                    let arg = backend.element_arg(&element);
                    backend.execute_script(SCRIPT_SET_VALUE, vec![arg, json!(text)])?;
                }
                Err(e) => return Err(e),
            }

            let observed = backend.attribute(&element, "value")?.unwrap_or_default();
            if observed != text {
                return Err(BackendError::new(
                    BackendErrorKind::ValueMismatch,
                    format!(
                        "{} holds {} character(s), expected {}",
                        locator,
                        observed.chars().count(),
                        text.chars().count()
                    ),
                ));
            }
            Ok(())
        })
    }

    pub fn read_text(&self, session: &mut Session, locator: &Locator) -> E2eResult<String> {
        let caption = format!("Reading text of {}", locator);
        self.run(session, "read_text", &locator.to_string(), |exec, session, _| {
            let element = exec.wait_for(session, locator, Readiness::Visible, None)?;
            exec.highlight_and_capture(session, &element, &caption);
            session.backend().text(&element)
        })
    }

    pub fn read_attribute(
        &self,
        session: &mut Session,
        locator: &Locator,
        name: &str,
    ) -> E2eResult<Option<String>> {
        let caption = format!("Reading '{}' of {}", name, locator);
        self.run(session, "read_attribute", &locator.to_string(), |exec, session, _| {
            let element = exec.wait_for(session, locator, Readiness::Presence, None)?;
            exec.highlight_and_capture(session, &element, &caption);
            session.backend().attribute(&element, name)
        })
    }

    /// Whether `locator` becomes present within `timeout`
    ///
    /// Absence is an answer, not a failure; only non-transient backend
    /// errors are raised.
    pub fn exists(&self, session: &mut Session, locator: &Locator, timeout: Duration) -> E2eResult<bool> {
        match self.wait_for(session, locator, Readiness::Presence, Some(timeout)) {
            Ok(element) => {
                self.highlight_and_capture(session, &element, &format!("Found {}", locator));
                Ok(true)
            }
            Err(e) if e.is_transient() => {
                debug!("{} not present within {:?}", locator, timeout);
                Ok(false)
            }
            Err(e) => Err(self.exhausted("exists", &locator.to_string(), 1, e)),
        }
    }

    /// Navigate and wait for the document to finish loading
    pub fn navigate(&self, session: &mut Session, url: &str) -> E2eResult<()> {
        self.run(session, "navigate", url, |exec, session, _| {
            session.backend().navigate(url)?;
            exec.await_document_ready(session, url);
            Ok(())
        })?;
        info!("Navigated to {}", url);
        Ok(())
    }

    /// Drive `attempt` under the session's strategy until it succeeds, hits a
    /// non-transient failure, or exhausts the bound
    fn run<T>(
        &self,
        session: &mut Session,
        operation: &str,
        target: &str,
        mut attempt: impl FnMut(&Self, &mut Session, Strategy) -> BackendResult<T>,
    ) -> E2eResult<T> {
        let strategy = Strategy::for_browser(session.browser_kind());
        let bound = strategy.attempts(self.config);
        let base = strategy.base_backoff(self.config);

        let mut n = 1;
        loop {
            match attempt(self, &mut *session, strategy) {
                Ok(value) => {
                    if n > 1 {
                        info!(
                            "[{}] {} on {} succeeded on attempt {}",
                            strategy.name(),
                            operation,
                            target,
                            n
                        );
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && n < bound => {
                    warn!(
                        "[{}] attempt {}/{} of {} on {} failed: {}",
                        strategy.name(),
                        n,
                        bound,
                        operation,
                        target,
                        e
                    );
                    self.pause.pause(base * n);
                    n += 1;
                }
                Err(e) => return Err(self.exhausted(operation, target, n, e)),
            }
        }
    }

    fn exhausted(&self, operation: &str, target: &str, attempts: u32, cause: BackendError) -> E2eError {
        let error = ActionError {
            operation: operation.to_string(),
            target: target.to_string(),
            attempts,
            last_cause: cause,
        };
        warn!("{}", error);
        self.failures.record_failure(&error);
        error.into()
    }

    /// Poll until the element satisfies `readiness` or the wait expires
    fn wait_for(
        &self,
        session: &mut Session,
        locator: &Locator,
        readiness: Readiness,
        timeout: Option<Duration>,
    ) -> BackendResult<ElementRef> {
        let wait = session.wait();
        let timeout = timeout.unwrap_or(wait.timeout);
        let deadline = Instant::now() + timeout;
        let mut seen = false;

        loop {
            match session.backend().find(locator) {
                Ok(Some(element)) => {
                    seen = true;
                    if self.is_ready(session, &element, readiness)? {
                        return Ok(element);
                    }
                }
                Ok(None) => {}
                Err(e) if e.kind == BackendErrorKind::StaleElement => {}
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                break;
            }
            self.pause.pause(wait.poll_interval);
        }

        let waited = timeout.as_millis();
        if seen {
            Err(BackendError::new(
                BackendErrorKind::Timeout,
                format!("{} not {} after {}ms", locator, readiness.describe(), waited),
            ))
        } else {
            Err(BackendError::new(
                BackendErrorKind::NoSuchElement,
                format!("{} not present after {}ms", locator, waited),
            ))
        }
    }

    fn is_ready(&self, session: &mut Session, element: &ElementRef, readiness: Readiness) -> BackendResult<bool> {
        if readiness == Readiness::Presence {
            return Ok(true);
        }
        match session.backend().element_state(element) {
            Ok(state) => Ok(match readiness {
                Readiness::Presence => true,
                Readiness::Visible => state.displayed,
                Readiness::Clickable => state.displayed && state.enabled,
            }),
            Err(e) if e.kind == BackendErrorKind::StaleElement => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn prepare_secondary(&self, session: &mut Session, element: &ElementRef) {
        let backend = session.backend();
        let arg = backend.element_arg(element);
        let prepared = backend
            .execute_script(SCROLL_INTO_VIEW, vec![arg])
            .and_then(|_| backend.execute_script(FOCUS_WINDOW, Vec::new()));
        if let Err(e) = prepared {
            debug!("Window focus before interaction failed: {}", e);
        }
        self.pause.pause(Duration::from_millis(self.config.scroll_settle_ms));
    }

    fn await_document_ready(&self, session: &mut Session, url: &str) {
        let wait = session.wait();
        let deadline = Instant::now() + wait.timeout;
        loop {
            match session.backend().execute_script(DOCUMENT_READY, Vec::new()) {
                Ok(Value::Bool(true)) => return,
                Ok(_) => {}
                Err(e) => {
                    debug!("Document readiness check failed for {}: {}", url, e);
                    break;
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            self.pause.pause(wait.poll_interval);
        }
        warn!("Document readiness uncertain for {}, continuing", url);
    }

    /// Mark the target, capture a screenshot, restore the target
    ///
    /// Best-effort: failures are logged and never reach the caller.
    pub fn highlight_and_capture(&self, session: &mut Session, element: &ElementRef, caption: &str) {
        if !self.config.highlight {
            return;
        }
        match self.try_highlight(session, element) {
            Ok(png) => self.evidence.capture(caption, png),
            Err(e) => warn!("Highlight and capture failed for '{}': {}", caption, e),
        }
    }

    fn try_highlight(&self, session: &mut Session, element: &ElementRef) -> BackendResult<Vec<u8>> {
        let backend = session.backend();
        let arg = backend.element_arg(element);
        let original = backend.attribute(element, "style")?;

        backend.execute_script(SCROLL_INTO_VIEW, vec![arg.clone()])?;
        self.pause.pause(Duration::from_millis(self.config.scroll_settle_ms));
        backend.execute_script(SET_STYLE, vec![arg.clone(), json!(HIGHLIGHT_STYLE)])?;
        self.pause.pause(Duration::from_millis(self.config.highlight_settle_ms));

        let shot = backend.screenshot();

        let restored = match original {
            Some(style) if !style.is_empty() => {
                backend.execute_script(SET_STYLE, vec![arg, json!(style)])
            }
            _ => backend.execute_script(REMOVE_STYLE, vec![arg]),
        };
        if let Err(e) = restored {
            warn!("Could not restore element style: {}", e);
        }
        shot
    }
}
