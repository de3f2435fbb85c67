//! Remote Case Commands

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use std::path::Path;

use qarun_e2e::spec::{case_step_text, extract_gherkin_lines};
use qarun_e2e::sync::{CaseDefinition, TestManagementApi};

use super::{load_config, testrail_client};
use crate::output::{print_item, print_list, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum CasesCommands {
    /// Show one case and the steps extracted from its template
    Get {
        /// Case ID (with or without the C prefix)
        id: String,
    },

    /// List the case ids carrying a label
    Label {
        /// Label title, matched case-insensitively
        label: String,
    },
}

/// Case display wrapper for serialization
#[derive(Serialize)]
pub struct CaseDisplay {
    pub id: u64,
    pub title: String,
    pub steps: Vec<String>,
}

impl From<CaseDefinition> for CaseDisplay {
    fn from(case: CaseDefinition) -> Self {
        Self {
            steps: extract_gherkin_lines(&case_step_text(&case.raw)),
            id: case.id,
            title: case.title,
        }
    }
}

impl TableDisplay for CaseDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Title", "Steps"]
    }

    fn row(&self) -> Vec<String> {
        vec![format!("C{}", self.id), self.title.clone(), self.steps.join("\n")]
    }
}

#[derive(Serialize)]
pub struct CaseIdDisplay {
    pub id: u64,
}

impl TableDisplay for CaseIdDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Case"]
    }

    fn row(&self) -> Vec<String> {
        vec![format!("C{}", self.id)]
    }
}

/// Parse `296` or `C296`
pub fn parse_case_id(raw: &str) -> Result<u64> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix('C')
        .or_else(|| trimmed.strip_prefix('c'))
        .unwrap_or(trimmed);
    digits
        .parse()
        .with_context(|| format!("'{}' is not a case id", raw))
}

pub fn execute(cmd: CasesCommands, config_path: &Path, format: OutputFormat) -> Result<()> {
    let config = load_config(config_path)?;
    let client = testrail_client(&config)?;

    match cmd {
        CasesCommands::Get { id } => {
            let case = client.get_case(parse_case_id(&id)?)?;
            print_item(&CaseDisplay::from(case), format);
        }
        CasesCommands::Label { label } => {
            let ids: Vec<CaseIdDisplay> = client
                .get_cases_by_label(&label)?
                .into_iter()
                .map(|id| CaseIdDisplay { id })
                .collect();
            print_list(&ids, format);
        }
    }
    Ok(())
}
