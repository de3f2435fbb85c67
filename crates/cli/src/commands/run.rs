//! Run Command

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use qarun_common::{BrowserKind, QarunConfig};
use qarun_e2e::runner::SUITE_RESULTS_FILE;
use qarun_e2e::sync::DefectEnvironment;
use qarun_e2e::{
    DriverConfig, DriverService, Scenario, SessionFactory, SuiteResult, SuiteRunner,
    TestManagementSynchronizer, WebDriverFactory,
};

use super::{load_config, testrail_client};
use crate::output::{print_suite, print_warning, OutputFormat};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Scenario directory, searched recursively for *.yaml
    #[arg(short, long, default_value = "scenarios")]
    pub specs: PathBuf,

    /// Run only scenarios carrying this tag
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Run only the scenario with this name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Browser to use (chrome, firefox, edge, safari)
    #[arg(long)]
    pub browser: Option<BrowserKind>,

    /// Run browsers headless
    #[arg(long)]
    pub headless: bool,

    /// Number of concurrent workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Use a running WebDriver endpoint instead of spawning a driver
    #[arg(long)]
    pub driver_url: Option<String>,

    /// Keep results local even when sync is configured
    #[arg(long)]
    pub no_sync: bool,

    /// Report output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ResultsArgs {
    /// Suite results file, or the directory holding it
    #[arg(default_value = "test-results")]
    pub path: PathBuf,
}

impl RunArgs {
    fn apply(&self, config: &mut QarunConfig) {
        if let Some(kind) = self.browser {
            config.browser.kind = kind;
        }
        if self.headless {
            config.browser.headless = true;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(url) = &self.driver_url {
            config.browser.driver_url = Some(url.clone());
        }
        if self.no_sync {
            config.sync.enabled = false;
        }
        if let Some(output) = &self.output {
            config.report.output_dir = output.clone();
        }
    }
}

/// Load and filter scenarios
pub fn select_scenarios(dir: &Path, tag: Option<&str>, name: Option<&str>) -> Result<Vec<Scenario>> {
    let all = Scenario::load_all(dir)
        .with_context(|| format!("Failed to load scenarios from {}", dir.display()))?;
    let tagged: Vec<Scenario> = match tag {
        Some(tag) => Scenario::filter_by_tag(&all, tag).into_iter().cloned().collect(),
        None => all,
    };
    Ok(match name {
        Some(name) => tagged.into_iter().filter(|s| s.name == name).collect(),
        None => tagged,
    })
}

pub fn execute(args: RunArgs, config_path: &Path, format: OutputFormat) -> Result<bool> {
    let mut config = load_config(config_path)?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let scenarios = select_scenarios(&args.specs, args.tag.as_deref(), args.name.as_deref())?;
    if scenarios.is_empty() {
        print_warning(&format!("No scenarios matched in {}", args.specs.display()));
        return Ok(true);
    }

    // the driver must outlive the suite
    let mut driver = None;
    let driver_url = match &config.browser.driver_url {
        Some(url) => url.clone(),
        None => {
            let service = DriverService::spawn(DriverConfig::from_browser(&config.browser))
                .context("Failed to start the browser driver")?;
            let url = service.base_url().to_string();
            driver = Some(service);
            url
        }
    };
    let factory: Arc<dyn SessionFactory> = Arc::new(
        WebDriverFactory::new(&driver_url, &config.browser).context("Failed to build WebDriver client")?,
    );

    let mut runner = SuiteRunner::new(config.clone(), factory)?;
    if config.sync.enabled {
        let environment = DefectEnvironment::current(
            config.browser.kind,
            config.browser.headless,
            &config.report.environment,
        );
        let sync = TestManagementSynchronizer::new(testrail_client(&config)?, &config.sync, environment);
        runner = runner.with_sync(Arc::new(sync));
    } else {
        info!("Result synchronization disabled");
    }

    let suite = runner.run(&scenarios)?;
    if let Some(mut service) = driver.take() {
        if let Err(e) = service.stop() {
            warn!("Driver shutdown failed: {}", e);
        }
    }

    print_suite(&suite, format);
    Ok(suite.success())
}

/// Print a previously written suite results file
pub fn show(args: ResultsArgs, format: OutputFormat) -> Result<bool> {
    let path = if args.path.is_dir() {
        args.path.join(SUITE_RESULTS_FILE)
    } else {
        args.path
    };
    let suite = SuiteResult::load(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    print_suite(&suite, format);
    Ok(suite.success())
}
