//! Driver service management - spawning and health checking the WebDriver executable

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use qarun_common::{BrowserConfig, BrowserKind};

use crate::error::{E2eError, E2eResult};

/// Handle to a running driver process
pub struct DriverService {
    child: Child,
    base_url: String,
    port: u16,
    stopped: bool,
}

impl DriverService {
    /// Spawn the driver for `config.kind` and wait until `/status` reports ready
    pub fn spawn(config: DriverConfig) -> E2eResult<Self> {
        let port = match config.port {
            Some(port) => port,
            None => find_free_port()?,
        };
        let base_url = format!("http://127.0.0.1:{}", port);

        info!("Spawning {} on port {}", config.binary_path.display(), port);

        let mut cmd = Command::new(&config.binary_path);
        cmd.args(port_args(config.kind, port))
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let child = cmd.spawn().map_err(|e| {
            E2eError::DriverStartup(format!(
                "Failed to spawn {}: {}",
                config.binary_path.display(),
                e
            ))
        })?;

        let mut service = DriverService {
            child,
            base_url: base_url.clone(),
            port,
            stopped: false,
        };

        service.wait_for_ready(config.startup_timeout)?;

        info!("Driver is ready at {}", base_url);
        Ok(service)
    }

    /// Poll the W3C status endpoint
    fn wait_for_ready(&mut self, timeout: Duration) -> E2eResult<()> {
        let status_url = format!("{}/status", self.base_url);
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let start = Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout {
            attempts += 1;

            if let Ok(Some(status)) = self.child.try_wait() {
                return Err(E2eError::DriverStartup(format!(
                    "driver exited during startup with {}",
                    status
                )));
            }

            match client.get(&status_url).send() {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    warn!("Driver status returned {}", resp.status());
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for driver to start...");
                    }
                    if !e.is_connect() {
                        warn!("Driver status error: {}", e);
                    }
                }
            }

            sleep(Duration::from_millis(100));
        }

        Err(E2eError::DriverHealthCheck(attempts))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop the driver; later calls are no-ops
    pub fn stop(&mut self) -> E2eResult<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        info!("Stopping driver (pid: {})", self.child.id());

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.child.id() as i32);
            if kill(pid, Signal::SIGTERM).is_ok() {
                sleep(Duration::from_millis(500));
            }
        }

        let _ = self.child.kill();
        let _ = self.child.wait();

        Ok(())
    }
}

impl Drop for DriverService {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Configuration for spawning a driver
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub kind: BrowserKind,

    /// Driver executable
    pub binary_path: PathBuf,

    /// Port to listen on (None = find free port)
    pub port: Option<u16>,

    pub startup_timeout: Duration,
}

impl DriverConfig {
    pub fn from_browser(config: &BrowserConfig) -> Self {
        Self {
            kind: config.kind,
            binary_path: config
                .driver_binary
                .clone()
                .unwrap_or_else(|| PathBuf::from(config.kind.driver_binary())),
            port: None,
            startup_timeout: Duration::from_secs(config.driver_startup_timeout_secs),
        }
    }
}

/// Command-line flags that select the listen port
pub fn port_args(kind: BrowserKind, port: u16) -> Vec<String> {
    match kind {
        BrowserKind::Chrome | BrowserKind::Edge => vec![format!("--port={}", port)],
        BrowserKind::Firefox => vec!["--port".to_string(), port.to_string()],
        BrowserKind::Safari => vec!["-p".to_string(), port.to_string()],
    }
}

/// Find a free port to use
fn find_free_port() -> E2eResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .map_err(|e| E2eError::DriverStartup(format!("no free port: {}", e)))?;
    Ok(listener.local_addr()?.port())
}
