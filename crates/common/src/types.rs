//! Core vocabulary types shared by the orchestration core and the CLI

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Browser backend kind
///
/// The kind selects the retry strategy of the resilient executor; `Safari`
/// gets the focus-and-script-fallback strategy, every other kind the
/// standard one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserKind {
    Chrome,
    Firefox,
    Edge,
    Safari,
}

impl Default for BrowserKind {
    fn default() -> Self {
        Self::Chrome
    }
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chrome => "chrome",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Edge => "edge",
            BrowserKind::Safari => "safari",
        }
    }

    /// Name of the W3C driver executable for this browser
    pub fn driver_binary(&self) -> &'static str {
        match self {
            BrowserKind::Chrome => "chromedriver",
            BrowserKind::Firefox => "geckodriver",
            BrowserKind::Edge => "msedgedriver",
            BrowserKind::Safari => "safaridriver",
        }
    }
}

impl fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BrowserKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chrome" | "chromium" => Ok(BrowserKind::Chrome),
            "firefox" => Ok(BrowserKind::Firefox),
            "edge" | "msedge" => Ok(BrowserKind::Edge),
            "safari" => Ok(BrowserKind::Safari),
            other => Err(Error::UnsupportedBrowser(other.to_string())),
        }
    }
}

/// Outcome of one recorded step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Pass,
    Fail,
    Skipped,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Pass => write!(f, "pass"),
            StepOutcome::Fail => write!(f, "fail"),
            StepOutcome::Skipped => write!(f, "skipped"),
        }
    }
}

/// Failure taxonomy produced by the failure classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    ElementNotFound,
    Timeout,
    StaleElement,
    AssertionFailure,
    NotInteractable,
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ElementNotFound => "ELEMENT_NOT_FOUND",
            FailureKind::Timeout => "TIMEOUT",
            FailureKind::StaleElement => "STALE_ELEMENT",
            FailureKind::AssertionFailure => "ASSERTION_FAILURE",
            FailureKind::NotInteractable => "NOT_INTERACTABLE",
            FailureKind::Unknown => "UNKNOWN",
        }
    }

    /// Priority a defect of this kind is filed with
    pub fn priority(&self) -> Priority {
        match self {
            FailureKind::ElementNotFound | FailureKind::Timeout | FailureKind::StaleElement => {
                Priority::High
            }
            FailureKind::AssertionFailure | FailureKind::NotInteractable => Priority::Medium,
            FailureKind::Unknown => Priority::Low,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Defect priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Human-readable label used in defect descriptions
    pub fn label(&self) -> &'static str {
        match self {
            Priority::High => "HIGH - Needs immediate investigation",
            Priority::Medium => "MEDIUM - Requires analysis",
            Priority::Low => "LOW - Minor issue",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Remote test-management run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Open,
    Closed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Open => write!(f, "open"),
            RunStatus::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_kind_parse() {
        assert_eq!("Chrome".parse::<BrowserKind>().unwrap(), BrowserKind::Chrome);
        assert_eq!(" safari ".parse::<BrowserKind>().unwrap(), BrowserKind::Safari);
        assert_eq!("msedge".parse::<BrowserKind>().unwrap(), BrowserKind::Edge);
        assert!("lynx".parse::<BrowserKind>().is_err());
    }

    #[test]
    fn test_failure_kind_priorities() {
        assert_eq!(FailureKind::ElementNotFound.priority(), Priority::High);
        assert_eq!(FailureKind::Timeout.priority(), Priority::High);
        assert_eq!(FailureKind::StaleElement.priority(), Priority::High);
        assert_eq!(FailureKind::AssertionFailure.priority(), Priority::Medium);
        assert_eq!(FailureKind::NotInteractable.priority(), Priority::Medium);
        assert_eq!(FailureKind::Unknown.priority(), Priority::Low);
    }

    #[test]
    fn test_failure_kind_serde_names() {
        let json = serde_json::to_string(&FailureKind::StaleElement).unwrap();
        assert_eq!(json, "\"STALE_ELEMENT\"");
    }
}
