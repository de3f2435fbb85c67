//! Browser automation backend seam
//!
//! The orchestration core only ever talks to a browser through
//! [`BrowserBackend`]. The W3C WebDriver client in [`crate::webdriver`] and the
//! in-memory backend in [`crate::memory`] are the two implementations.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

use qarun_common::BrowserKind;

use crate::error::{E2eError, E2eResult};

/// W3C web element identifier key
pub const W3C_ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// How to find an element on the page
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    Css(String),
    Xpath(String),
    Id(String),
    Link(String),
}

impl Locator {
    /// Parse `"<strategy>:<value>"`
    pub fn parse(spec: &str) -> E2eResult<Self> {
        let (strategy, value) = spec
            .split_once(':')
            .ok_or_else(|| E2eError::InvalidLocator(spec.to_string()))?;
        let value = value.trim();
        if value.is_empty() {
            return Err(E2eError::InvalidLocator(spec.to_string()));
        }
        match strategy.trim().to_ascii_lowercase().as_str() {
            "css" => Ok(Locator::Css(value.to_string())),
            "xpath" => Ok(Locator::Xpath(value.to_string())),
            "id" => Ok(Locator::Id(value.to_string())),
            "link" => Ok(Locator::Link(value.to_string())),
            _ => Err(E2eError::InvalidLocator(spec.to_string())),
        }
    }

    /// W3C `(using, value)` pair
    pub fn to_w3c(&self) -> (&'static str, String) {
        match self {
            Locator::Css(v) => ("css selector", v.clone()),
            Locator::Xpath(v) => ("xpath", v.clone()),
            Locator::Id(v) => ("css selector", format!("[id=\"{}\"]", v.replace('"', "\\\""))),
            Locator::Link(v) => ("partial link text", v.clone()),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(v) => write!(f, "css:{}", v),
            Locator::Xpath(v) => write!(f, "xpath:{}", v),
            Locator::Id(v) => write!(f, "id:{}", v),
            Locator::Link(v) => write!(f, "link:{}", v),
        }
    }
}

/// Opaque reference to a located element
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(pub String);

/// Observable element state used by the ready preconditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementState {
    pub displayed: bool,
    pub enabled: bool,
}

/// Category of a backend failure, named after the W3C error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendErrorKind {
    NoSuchElement,
    StaleElement,
    ClickIntercepted,
    NotInteractable,
    Timeout,
    ValueMismatch,
    Script,
    Session,
    Transport,
    Other,
}

impl BackendErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendErrorKind::NoSuchElement => "no such element",
            BackendErrorKind::StaleElement => "stale element reference",
            BackendErrorKind::ClickIntercepted => "element click intercepted",
            BackendErrorKind::NotInteractable => "element not interactable",
            BackendErrorKind::Timeout => "timeout",
            BackendErrorKind::ValueMismatch => "value mismatch",
            BackendErrorKind::Script => "javascript error",
            BackendErrorKind::Session => "invalid session id",
            BackendErrorKind::Transport => "transport error",
            BackendErrorKind::Other => "unknown error",
        }
    }

    /// Map a W3C `error` code onto a kind
    pub fn from_w3c(code: &str) -> Self {
        match code {
            "no such element" => BackendErrorKind::NoSuchElement,
            "stale element reference" => BackendErrorKind::StaleElement,
            "element click intercepted" => BackendErrorKind::ClickIntercepted,
            "element not interactable" => BackendErrorKind::NotInteractable,
            "timeout" | "script timeout" => BackendErrorKind::Timeout,
            "javascript error" => BackendErrorKind::Script,
            "invalid session id" | "session not created" | "no such window" => {
                BackendErrorKind::Session
            }
            _ => BackendErrorKind::Other,
        }
    }
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a browser backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Failures that a fresh attempt can plausibly clear
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            BackendErrorKind::NoSuchElement
                | BackendErrorKind::StaleElement
                | BackendErrorKind::ClickIntercepted
                | BackendErrorKind::NotInteractable
                | BackendErrorKind::Timeout
                | BackendErrorKind::ValueMismatch
        )
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// One browser instance
///
/// Implementations are owned by exactly one worker at a time, so every
/// operation takes `&mut self`.
pub trait BrowserBackend: Send {
    fn navigate(&mut self, url: &str) -> BackendResult<()>;

    fn current_url(&mut self) -> BackendResult<String>;

    /// `Ok(None)` when nothing matches the locator
    fn find(&mut self, locator: &Locator) -> BackendResult<Option<ElementRef>>;

    fn element_state(&mut self, element: &ElementRef) -> BackendResult<ElementState>;

    fn click(&mut self, element: &ElementRef) -> BackendResult<()>;

    fn clear(&mut self, element: &ElementRef) -> BackendResult<()>;

    fn send_keys(&mut self, element: &ElementRef, text: &str) -> BackendResult<()>;

    fn text(&mut self, element: &ElementRef) -> BackendResult<String>;

    fn attribute(&mut self, element: &ElementRef, name: &str) -> BackendResult<Option<String>>;

    /// PNG bytes of the current viewport
    fn screenshot(&mut self) -> BackendResult<Vec<u8>>;

    fn execute_script(&mut self, script: &str, args: Vec<Value>) -> BackendResult<Value>;

    fn quit(&mut self) -> BackendResult<()>;

    /// Script argument referring to `element`
    fn element_arg(&self, element: &ElementRef) -> Value {
        json!({ W3C_ELEMENT_KEY: element.0 })
    }
}

/// Creates browser instances for the session registry
pub trait SessionFactory: Send + Sync {
    fn create(&self, kind: BrowserKind, headless: bool) -> BackendResult<Box<dyn BrowserBackend>>;
}
