//! qarun CLI - Main Entry Point
//!
//! Runs browser scenarios concurrently and synchronizes their outcomes with
//! a test-management service.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use qarun_cli::commands::{cases, classify, generate, run};
use qarun_cli::output::{self, print_error};

/// qarun - concurrent browser scenario runner
#[derive(Parser)]
#[command(name = "qarun")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = qarun_common::DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenarios
    Run(run::RunArgs),

    /// Show a previous suite results file
    Results(run::ResultsArgs),

    /// Look up remote test cases
    #[command(subcommand)]
    Cases(cases::CasesCommands),

    /// Generate pending scenarios from remote case templates
    Generate(generate::GenerateArgs),

    /// Classify an error into failure kind and priority
    Classify(classify::ClassifyArgs),

    /// Show version information
    Version,
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let outcome = match cli.command {
        Commands::Run(args) => run::execute(args, &cli.config, cli.format),
        Commands::Results(args) => run::show(args, cli.format),
        Commands::Cases(cmd) => cases::execute(cmd, &cli.config, cli.format).map(|_| true),
        Commands::Generate(args) => generate::execute(args, &cli.config).map(|_| true),
        Commands::Classify(args) => classify::execute(args, cli.format).map(|_| true),
        Commands::Version => {
            println!("qarun v{}", qarun_common::VERSION);
            Ok(true)
        }
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            print_error(&format!("{:#}", e));
            ExitCode::from(2)
        }
    }
}
