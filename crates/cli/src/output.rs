//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

use qarun_common::StepOutcome;
use qarun_e2e::{ScenarioResult, SuiteResult};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

fn structured<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Option<String> {
    match format {
        OutputFormat::Json => Some(serde_json::to_string_pretty(value).unwrap_or_default()),
        OutputFormat::Yaml => Some(serde_yaml::to_string(value).unwrap_or_default()),
        _ => None,
    }
}

fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Print a single item
pub fn print_item<T: Serialize + TableDisplay>(item: &T, format: OutputFormat) {
    if let Some(text) = structured(item, format) {
        println!("{}", text);
        return;
    }
    match format {
        OutputFormat::Plain => {
            for (header, value) in T::headers().iter().zip(item.row().iter()) {
                println!("{}: {}", header, value);
            }
        }
        _ => {
            let mut table = table();
            table.set_header(T::headers());
            table.add_row(item.row());
            println!("{table}");
        }
    }
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    if items.is_empty() {
        println!("No items found.");
        return;
    }
    if let Some(text) = structured(items, format) {
        println!("{}", text);
        return;
    }
    match format {
        OutputFormat::Plain => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    println!("---");
                }
                for (header, value) in T::headers().iter().zip(item.row().iter()) {
                    println!("{}: {}", header, value);
                }
            }
        }
        _ => {
            let mut table = table();
            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }
            println!("{table}");
        }
    }
}

impl TableDisplay for ScenarioResult {
    fn headers() -> Vec<&'static str> {
        vec!["Scenario", "Case", "Outcome", "Duration", "Failure", "Priority", "Result"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.case_id.map(|id| format!("C{}", id)).unwrap_or_default(),
            self.outcome.to_string(),
            format!("{} ms", self.duration_ms),
            self.failure_kind.map(|k| k.to_string()).unwrap_or_default(),
            self.priority
                .map(|p| format!("{:?}", p).to_lowercase())
                .unwrap_or_default(),
            self.result_id.map(|id| id.to_string()).unwrap_or_default(),
        ]
    }
}

fn outcome_color(outcome: StepOutcome) -> Color {
    match outcome {
        StepOutcome::Pass => Color::Green,
        StepOutcome::Fail => Color::Red,
        StepOutcome::Skipped => Color::Yellow,
    }
}

/// Print the per-scenario table and the totals line
pub fn print_suite(suite: &SuiteResult, format: OutputFormat) {
    if let Some(text) = structured(suite, format) {
        println!("{}", text);
        return;
    }
    if let OutputFormat::Plain = format {
        print_list(&suite.results, format);
    } else if !suite.results.is_empty() {
        let mut table = table();
        table.set_header(ScenarioResult::headers());
        for result in &suite.results {
            let mut cells: Vec<Cell> = result.row().into_iter().map(Cell::new).collect();
            cells[2] = Cell::new(result.outcome.to_string()).fg(outcome_color(result.outcome));
            table.add_row(cells);
        }
        println!("{table}");
    }

    let totals = format!(
        "{} total, {} passed, {} failed, {} skipped in {:.1}s",
        suite.total,
        suite.passed,
        suite.failed,
        suite.skipped,
        suite.duration_ms as f64 / 1000.0
    );
    if suite.success() {
        print_success(&totals);
    } else {
        print_error(&totals);
    }
    if let Some(path) = &suite.report_path {
        print_info(&format!("Report written to {}", path.display()));
    }
    if let Some(run_id) = suite.run_id {
        print_info(&format!("Results synchronized to run R{}", run_id));
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("{} {}", "✅".green(), message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "❌".red(), message.red());
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("⚠️  {}", message.yellow());
}

/// Print info message
pub fn print_info(message: &str) {
    println!("ℹ️  {}", message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use qarun_common::{FailureKind, Priority};

    #[test]
    fn test_scenario_row() {
        let result = ScenarioResult {
            name: "Login".to_string(),
            case_id: Some(296),
            outcome: StepOutcome::Fail,
            duration_ms: 1200,
            steps: 4,
            failure_kind: Some(FailureKind::Timeout),
            priority: Some(Priority::High),
            error: Some("timed out".to_string()),
            result_id: Some(900),
            defect_filed: true,
        };
        assert_eq!(
            result.row(),
            vec!["Login", "C296", "fail", "1200 ms", "TIMEOUT", "high", "900"]
        );
        assert_eq!(ScenarioResult::headers().len(), result.row().len());
    }
}
