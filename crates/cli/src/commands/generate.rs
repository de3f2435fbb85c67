//! Generate Command

use anyhow::{Context, Result};
use clap::Args;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use qarun_e2e::sync::{CaseDefinition, TestManagementApi};
use qarun_e2e::Scenario;

use super::cases::parse_case_id;
use super::{load_config, testrail_client};
use crate::output::print_success;

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Case IDs to generate scenarios for
    #[arg(required = true)]
    pub case_ids: Vec<String>,

    /// Directory the scenario files are written to
    #[arg(short, long, default_value = "scenarios/generated")]
    pub output: PathBuf,

    /// Replace existing scenario files
    #[arg(long)]
    pub force: bool,

    /// Print the YAML instead of writing files
    #[arg(long)]
    pub stdout: bool,
}

/// Write the pending scenario for `case` into `dir`
pub fn write_scenario(case: &CaseDefinition, dir: &Path, force: bool) -> Result<PathBuf> {
    let scenario = Scenario::from_case_template(case)?;
    let path = dir.join(format!("C{}.yaml", case.id));
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to replace it)", path.display());
    }
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    fs::write(&path, scenario.to_yaml()?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Generated {} with {} step(s)", path.display(), scenario.steps.len());
    Ok(path)
}

pub fn execute(args: GenerateArgs, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let client = testrail_client(&config)?;

    for raw in &args.case_ids {
        let case = client.get_case(parse_case_id(raw)?)?;
        if args.stdout {
            println!("{}", Scenario::from_case_template(&case)?.to_yaml()?);
        } else {
            let path = write_scenario(&case, &args.output, args.force)?;
            print_success(&format!("C{} → {}", case.id, path.display()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qarun_e2e::memory::sample_case;
    use qarun_e2e::StepAction;
    use tempfile::TempDir;

    #[test]
    fn test_write_scenario_round_trips() {
        let dir = TempDir::new().unwrap();
        let case = sample_case(
            296,
            "Login works",
            "Given I am on the login page\nWhen I log in\nThen I see the dashboard",
        );

        let path = write_scenario(&case, dir.path(), false).unwrap();
        assert_eq!(path.file_name().unwrap(), "C296.yaml");

        let scenario = Scenario::from_file(&path).unwrap();
        assert_eq!(scenario.case_id(), Some(296));
        assert_eq!(scenario.steps.len(), 3);
        assert!(scenario
            .steps
            .iter()
            .all(|s| matches!(s.action, StepAction::Pending)));

        assert!(write_scenario(&case, dir.path(), false).is_err());
        assert!(write_scenario(&case, dir.path(), true).is_ok());
    }
}
