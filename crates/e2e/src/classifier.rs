//! Failure classification
//!
//! Maps a captured error onto a [`FailureKind`] and [`Priority`] by looking
//! for known phrases in the error's declared kind and message. Rules are
//! checked in a fixed order and the first match wins.

use qarun_common::{FailureKind, Priority};

use crate::error::{error_chain, E2eError};

const ELEMENT_NOT_FOUND: &[&str] = &[
    "nosuchelement",
    "no such element",
    "element not found",
    "unable to locate",
    "failed to find element",
];

const TIMEOUT: &[&str] = &["timeout", "timed out"];

const STALE_ELEMENT: &[&str] = &["stale"];

const NOT_INTERACTABLE: &[&str] = &[
    "not interactable",
    "notinteractable",
    "click intercepted",
    "clickintercepted",
    "not clickable",
];

const ASSERTION: &[&str] = &["assertion", "assert", "expected", "mismatch", "verify"];

const RULES: &[(&[&str], FailureKind)] = &[
    (ELEMENT_NOT_FOUND, FailureKind::ElementNotFound),
    (TIMEOUT, FailureKind::Timeout),
    (STALE_ELEMENT, FailureKind::StaleElement),
    (NOT_INTERACTABLE, FailureKind::NotInteractable),
    (ASSERTION, FailureKind::AssertionFailure),
];

/// Classify an error from its declared kind and message text
pub fn classify(kind: &str, message: &str) -> (FailureKind, Priority) {
    let haystack = format!("{} {}", kind, message).to_lowercase();
    let failure = RULES
        .iter()
        .find(|(phrases, _)| phrases.iter().any(|p| haystack.contains(p)))
        .map(|(_, kind)| *kind)
        .unwrap_or(FailureKind::Unknown);
    (failure, failure.priority())
}

/// Classify an orchestration error, including its source chain
pub fn classify_error(error: &E2eError) -> (FailureKind, Priority) {
    classify(error.kind_name(), &error_chain(error).join("\n"))
}
