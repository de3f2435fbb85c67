//! Per-worker browser session ownership
//!
//! The [`SessionRegistry`] is shared by every worker; it knows how to build
//! sessions and counts how many are open. Each worker owns a [`SessionSlot`]
//! that lazily holds that worker's one [`Session`]. Slots are never shared,
//! so a session is only ever touched by the worker that created it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use qarun_common::{BrowserKind, ExecutorConfig};

use crate::backend::{BrowserBackend, SessionFactory};
use crate::error::{E2eError, E2eResult};

/// Element-ready wait settings carried by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl WaitConfig {
    pub fn from_executor(config: &ExecutorConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.wait_timeout_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self::from_executor(&ExecutorConfig::default())
    }
}

/// How sessions built by a registry are configured
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub browser_kind: BrowserKind,
    pub headless: bool,
    pub wait: WaitConfig,
}

/// One browser instance bound to a worker
pub struct Session {
    id: String,
    browser_kind: BrowserKind,
    headless: bool,
    wait: WaitConfig,
    backend: Box<dyn BrowserBackend>,
}

impl Session {
    pub fn new(
        browser_kind: BrowserKind,
        headless: bool,
        wait: WaitConfig,
        backend: Box<dyn BrowserBackend>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            browser_kind,
            headless,
            wait,
            backend,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn browser_kind(&self) -> BrowserKind {
        self.browser_kind
    }

    pub fn is_headless(&self) -> bool {
        self.headless
    }

    pub fn wait(&self) -> WaitConfig {
        self.wait
    }

    pub fn backend(&mut self) -> &mut dyn BrowserBackend {
        self.backend.as_mut()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("browser_kind", &self.browser_kind)
            .field("headless", &self.headless)
            .finish()
    }
}

/// Builds sessions for worker slots
pub struct SessionRegistry {
    factory: Arc<dyn SessionFactory>,
    options: SessionOptions,
    open: AtomicUsize,
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn SessionFactory>, options: SessionOptions) -> Self {
        Self {
            factory,
            options,
            open: AtomicUsize::new(0),
        }
    }

    /// Number of sessions currently open across all workers
    pub fn open_sessions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// A new, empty slot for one worker
    pub fn slot(self: &Arc<Self>) -> SessionSlot {
        SessionSlot {
            registry: Arc::clone(self),
            session: None,
        }
    }

    fn open_session(&self) -> E2eResult<Session> {
        let kind = self.options.browser_kind;
        info!(
            "Initializing {} browser{}",
            kind,
            if self.options.headless { " (headless)" } else { "" }
        );

        let backend = self
            .factory
            .create(kind, self.options.headless)
            .map_err(|e| E2eError::SessionInit {
                browser: kind,
                reason: e.to_string(),
            })?;

        let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Session::new(kind, self.options.headless, self.options.wait, backend);
        debug!("Opened session {} ({} open)", session.id, open);
        Ok(session)
    }

    fn close_session(&self, mut session: Session) {
        if let Err(e) = session.backend.quit() {
            warn!("Error closing browser session {}: {}", session.id, e);
        }
        let open = self.open.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        debug!("Closed session {} ({} open)", session.id, open);
    }
}

/// A worker's session holder
pub struct SessionSlot {
    registry: Arc<SessionRegistry>,
    session: Option<Session>,
}

impl SessionSlot {
    /// The worker's session, created on first use
    pub fn acquire(&mut self) -> E2eResult<&mut Session> {
        if self.session.is_none() {
            self.session = Some(self.registry.open_session()?);
        }
        match self.session.as_mut() {
            Some(session) => Ok(session),
            None => Err(E2eError::SessionInit {
                browser: self.registry.options.browser_kind,
                reason: "session slot is empty".to_string(),
            }),
        }
    }

    /// The worker's session if one is open, without creating one
    pub fn current(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Tear down and forget the worker's session; no-op when none is open
    pub fn release(&mut self) {
        if let Some(session) = self.session.take() {
            self.registry.close_session(session);
        }
    }

    /// Backend kind of the active session, or the configured kind
    pub fn current_browser_kind(&self) -> BrowserKind {
        self.session
            .as_ref()
            .map(|s| s.browser_kind)
            .unwrap_or(self.registry.options.browser_kind)
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.release();
    }
}
