//! Classify Command

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use qarun_common::{FailureKind, Priority};
use qarun_e2e::classifier::classify;
use qarun_e2e::sync::defect::remediation;

use crate::output::{print_item, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// Declared error kind, e.g. TimeoutException
    pub kind: String,

    /// Error message
    pub message: String,

    /// Include the recommended remediation
    #[arg(long)]
    pub remediation: bool,
}

#[derive(Serialize)]
pub struct Classification {
    pub kind: FailureKind,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<&'static str>,
}

impl TableDisplay for Classification {
    fn headers() -> Vec<&'static str> {
        vec!["Kind", "Priority", "Remediation"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.kind.to_string(),
            self.priority.label().to_string(),
            self.remediation.unwrap_or("-").to_string(),
        ]
    }
}

pub fn execute(args: ClassifyArgs, format: OutputFormat) -> Result<()> {
    let (kind, priority) = classify(&args.kind, &args.message);
    let classification = Classification {
        kind,
        priority,
        remediation: args.remediation.then(|| remediation(kind)),
    };
    print_item(&classification, format);
    Ok(())
}
