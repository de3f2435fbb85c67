//! Declarative YAML scenario specification

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::backend::Locator;
use crate::error::{E2eError, E2eResult};
use crate::locators::LocatorCatalog;
use crate::sync::CaseDefinition;

/// Case fields that may carry BDD step text, in lookup order
const CASE_STEP_FIELDS: &[&str] = &[
    "custom_testrail_bdd_scenario",
    "custom_bdd_scenarios",
    "custom_steps",
    "custom_steps_separated",
];

/// A complete scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this scenario within a run
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Tags for filtering; `@CaseID_<n>` / `@C<n>` link the remote case
    #[serde(default)]
    pub tags: Vec<String>,

    /// Steps to execute in order
    pub steps: Vec<ScenarioStep>,

    /// File the scenario was loaded from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// One step: display text plus the action it performs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(flatten)]
    pub action: StepAction,
}

impl ScenarioStep {
    pub fn pending(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            action: StepAction::Pending,
        }
    }

    /// Text shown in the report
    pub fn display_text(&self) -> String {
        match &self.text {
            Some(text) => text.clone(),
            None => self.action.describe(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    /// Load a URL and wait for the document
    Navigate { url: String },

    Click { target: Target },

    /// Clear the field and type `value`; `${VAR}` reads the environment
    Type { target: Target, value: String },

    ReadText {
        target: Target,
        #[serde(default)]
        contains: Option<String>,
    },

    ReadAttribute {
        target: Target,
        name: String,
        #[serde(default)]
        equals: Option<String>,
    },

    /// Check presence within a timeout; absence fails only when `expect` is true
    Exists {
        target: Target,
        #[serde(default = "default_exists_timeout")]
        timeout_ms: u64,
        #[serde(default = "default_true")]
        expect: bool,
    },

    AssertUrl { fragment: String },

    /// Text-only step, recorded as skipped
    Pending,
}

fn default_exists_timeout() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl StepAction {
    pub fn describe(&self) -> String {
        match self {
            StepAction::Navigate { url } => format!("Navigate to {}", url),
            StepAction::Click { target } => format!("Click {}", target),
            StepAction::Type { target, .. } => format!("Type into {}", target),
            StepAction::ReadText { target, .. } => format!("Read text of {}", target),
            StepAction::ReadAttribute { target, name, .. } => {
                format!("Read '{}' of {}", name, target)
            }
            StepAction::Exists { target, .. } => format!("Check {} exists", target),
            StepAction::AssertUrl { fragment } => format!("URL contains '{}'", fragment),
            StepAction::Pending => "Pending step".to_string(),
        }
    }

    pub fn target(&self) -> Option<&Target> {
        match self {
            StepAction::Click { target }
            | StepAction::Type { target, .. }
            | StepAction::ReadText { target, .. }
            | StepAction::ReadAttribute { target, .. }
            | StepAction::Exists { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// Element reference in a step: a catalog name or an inline `strategy:value`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(pub String);

impl Target {
    fn inline(&self) -> Option<E2eResult<Locator>> {
        let (strategy, _) = self.0.split_once(':')?;
        match strategy.trim().to_ascii_lowercase().as_str() {
            "css" | "xpath" | "id" | "link" => Some(Locator::parse(&self.0)),
            _ => None,
        }
    }

    /// Catalog name, when this is not an inline locator
    pub fn name(&self) -> Option<&str> {
        match self.inline() {
            Some(_) => None,
            None => Some(self.0.as_str()),
        }
    }

    pub fn resolve(&self, catalog: &LocatorCatalog) -> E2eResult<Locator> {
        match self.inline() {
            Some(parsed) => parsed,
            None => catalog.get(&self.0).cloned(),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Expand `${VAR}` references from `lookup`
pub fn expand_vars<F>(value: &str, lookup: F) -> E2eResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| E2eError::SpecParse(format!("unterminated variable in '{}'", value)))?;
        let name = &after[..end];
        let resolved = lookup(name)
            .ok_or_else(|| E2eError::SpecParse(format!("environment variable {} is not set", name)))?;
        out.push_str(&resolved);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn case_tag_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^@?(?:CaseID_|C)(\d+)$").ok())
        .as_ref()
}

fn gherkin_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)^(?:[-•*]+\s*|\d+[.)]\s*)?(given|when|then|and|but)\b(.*)$").ok()
        })
        .as_ref()
}

/// Case id from the first tag shaped like `@CaseID_<n>` or `@C<n>`
pub fn case_id_from_tags(tags: &[String]) -> Option<u64> {
    let pattern = case_tag_pattern()?;
    tags.iter().find_map(|tag| {
        pattern
            .captures(tag.trim())
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    })
}

impl Scenario {
    /// Parse a scenario from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        serde_yaml::from_str(yaml).map_err(E2eError::from)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut scenario = Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))?;
        scenario.source = Some(path.to_path_buf());
        Ok(scenario)
    }

    /// Load all scenarios under a directory, sorted by path
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();
        paths.sort();

        let mut scenarios = Vec::with_capacity(paths.len());
        for path in paths {
            scenarios.push(Self::from_file(&path)?);
        }
        Ok(scenarios)
    }

    /// Filter scenarios by tag, ignoring a leading `@`
    pub fn filter_by_tag<'a>(scenarios: &'a [Self], tag: &str) -> Vec<&'a Self> {
        let wanted = tag.trim_start_matches('@');
        scenarios
            .iter()
            .filter(|s| s.tags.iter().any(|t| t.trim_start_matches('@') == wanted))
            .collect()
    }

    pub fn case_id(&self) -> Option<u64> {
        case_id_from_tags(&self.tags)
    }

    /// Catalog names referenced by any step
    pub fn locator_names(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .filter_map(|s| s.action.target())
            .filter_map(Target::name)
    }

    /// Pending scenario built from a remote case's BDD text
    pub fn from_case_template(case: &CaseDefinition) -> E2eResult<Self> {
        let raw = case_step_text(&case.raw);
        let lines = extract_gherkin_lines(&raw);
        if lines.is_empty() {
            return Err(E2eError::SpecParse(format!(
                "case C{} has no Given/When/Then steps",
                case.id
            )));
        }
        Ok(Self {
            name: format!("C{} - {}", case.id, one_line(&case.title)),
            description: format!("Generated from test case C{}", case.id),
            tags: vec![format!("@CaseID_{}", case.id)],
            steps: lines.iter().map(|l| ScenarioStep::pending(l)).collect(),
            source: None,
        })
    }

    pub fn to_yaml(&self) -> E2eResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Step text from the first populated BDD field of a case
pub fn case_step_text(case: &Value) -> String {
    for field in CASE_STEP_FIELDS {
        match case.get(*field) {
            Some(Value::Array(items)) => {
                let joined = items
                    .iter()
                    .filter_map(|item| match item {
                        Value::Object(_) => item.get("content").and_then(Value::as_str),
                        Value::String(s) => Some(s.as_str()),
                        _ => None,
                    })
                    .filter(|s| !s.is_empty())
                    .map(clean_html)
                    .collect::<Vec<_>>()
                    .join("\n");
                if !joined.is_empty() {
                    return joined;
                }
            }
            Some(Value::String(s)) if !s.trim().is_empty() => {
                let s = s.trim();
                if s.starts_with('[') {
                    if let Ok(parsed) = serde_json::from_str::<Value>(s) {
                        let mut wrapper = serde_json::Map::new();
                        wrapper.insert(field.to_string(), parsed);
                        let text = case_step_text(&Value::Object(wrapper));
                        if !text.is_empty() {
                            return text;
                        }
                    }
                }
                return clean_html(s);
            }
            _ => {}
        }
    }
    String::new()
}

fn clean_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        match rest[start..].find('>') {
            Some(end) => {
                let tag = rest[start + 1..start + end].trim().to_ascii_lowercase();
                if tag.starts_with("br") || tag == "/p" || tag == "/li" {
                    out.push('\n');
                }
                rest = &rest[start + end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

/// Ordered Given/When/Then/And/But lines, stopping at `Examples:`
pub fn extract_gherkin_lines(raw: &str) -> Vec<String> {
    let Some(pattern) = gherkin_pattern() else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for line in raw.lines() {
        let trimmed = line.trim();
        let lower = trimmed.to_lowercase();
        if lower.starts_with("examples:") {
            break;
        }
        if trimmed.is_empty() || lower.starts_with("feature:") || lower.starts_with("scenario") {
            continue;
        }
        if let Some(captures) = pattern.captures(trimmed) {
            let keyword = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            let rest = captures.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
            out.push(format!("{} {}", capitalize(keyword), rest).trim().to_string());
        }
    }
    out
}

fn capitalize(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::sample_case;

    const LOGIN: &str = r#"
name: Login with valid credentials
description: Student logs in and reaches the dashboard
tags:
  - "@CaseID_296"
  - smoke
steps:
  - text: Given I open the login page
    action: navigate
    url: https://x/login
  - text: When I enter my username
    action: type
    target: login.username
    value: u
  - action: type
    target: "id:password"
    value: p
  - action: click
    target: login.submit
  - action: assert_url
    fragment: /home
  - text: Then the dashboard tiles are listed
    action: pending
"#;

    #[test]
    fn test_parse_scenario() {
        let scenario = Scenario::from_yaml(LOGIN).unwrap();
        assert_eq!(scenario.name, "Login with valid credentials");
        assert_eq!(scenario.steps.len(), 6);
        assert_eq!(scenario.case_id(), Some(296));
        assert!(matches!(scenario.steps[5].action, StepAction::Pending));
        assert_eq!(scenario.steps[3].display_text(), "Click login.submit");

        let names: Vec<_> = scenario.locator_names().collect();
        assert_eq!(names, vec!["login.username", "login.submit"]);
    }

    #[test]
    fn test_case_id_tags() {
        let tags = |t: &[&str]| t.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(case_id_from_tags(&tags(&["smoke", "@C42"])), Some(42));
        assert_eq!(case_id_from_tags(&tags(&["CaseID_7"])), Some(7));
        assert_eq!(case_id_from_tags(&tags(&["@Critical", "@C12x"])), None);
        assert_eq!(case_id_from_tags(&tags(&["@C1", "@C2"])), Some(1));
    }

    #[test]
    fn test_target_resolution() {
        let catalog = LocatorCatalog::builtin();
        assert_eq!(
            Target("login.username".to_string()).resolve(&catalog).unwrap(),
            Locator::Id("username".to_string())
        );
        assert_eq!(
            Target("css:.tile h5".to_string()).resolve(&catalog).unwrap(),
            Locator::Css(".tile h5".to_string())
        );
        assert!(matches!(
            Target("dashboard.nope".to_string()).resolve(&catalog),
            Err(E2eError::UnknownLocator(_))
        ));
    }

    #[test]
    fn test_expand_vars() {
        let lookup = |k: &str| (k == "QA_USER").then(|| "alice".to_string());
        assert_eq!(expand_vars("${QA_USER}@x", lookup).unwrap(), "alice@x");
        assert_eq!(expand_vars("plain", lookup).unwrap(), "plain");
        assert!(expand_vars("${MISSING}", lookup).is_err());
        assert!(expand_vars("${QA_USER", lookup).is_err());
    }

    #[test]
    fn test_load_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("auth")).unwrap();
        std::fs::write(dir.path().join("auth/login.yaml"), LOGIN).unwrap();
        std::fs::write(
            dir.path().join("other.yml"),
            "name: Other\ntags: [regression]\nsteps:\n  - action: pending\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let all = Scenario::load_all(dir.path()).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].source.is_some());
        assert_eq!(Scenario::filter_by_tag(&all, "@smoke").len(), 1);
        assert_eq!(Scenario::filter_by_tag(&all, "regression")[0].name, "Other");
    }

    #[test]
    fn test_gherkin_extraction() {
        let raw = "Scenario: Login\n\
                   1. Given I am on the login page\n\
                   - when I enter valid credentials\n\
                   * AND I press login\n\
                   Some note\n\
                   Then I see the dashboard\n\
                   Examples:\n\
                   | user |\n\
                   Then this is ignored";
        assert_eq!(
            extract_gherkin_lines(raw),
            vec![
                "Given I am on the login page",
                "When I enter valid credentials",
                "And I press login",
                "Then I see the dashboard",
            ]
        );
    }

    #[test]
    fn test_case_step_text_shapes() {
        let array = serde_json::json!({
            "custom_steps_separated": [
                { "content": "Given <b>a</b>" },
                { "content": "Then b" }
            ]
        });
        assert_eq!(case_step_text(&array), "Given a\nThen b");

        let stringified = serde_json::json!({
            "custom_bdd_scenarios": "[{\"content\":\"When c\"}]"
        });
        assert_eq!(case_step_text(&stringified), "When c");

        let html = serde_json::json!({
            "custom_testrail_bdd_scenario": "Given x<br/>Then y &amp; z"
        });
        assert_eq!(case_step_text(&html), "Given x\nThen y & z");
    }

    #[test]
    fn test_from_case_template() {
        let case = sample_case(
            296,
            "Login   works",
            "Given I open the login page\nWhen I log in\nThen I see the dashboard",
        );
        let scenario = Scenario::from_case_template(&case).unwrap();
        assert_eq!(scenario.name, "C296 - Login works");
        assert_eq!(scenario.case_id(), Some(296));
        assert_eq!(scenario.steps.len(), 3);

        let yaml = scenario.to_yaml().unwrap();
        let reparsed = Scenario::from_yaml(&yaml).unwrap();
        assert_eq!(reparsed.steps[2].display_text(), "Then I see the dashboard");

        let empty = sample_case(1, "Nothing", "no steps here");
        assert!(Scenario::from_case_template(&empty).is_err());
    }
}
