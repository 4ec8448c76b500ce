//! Application-under-test lifecycle: reachability probe, managed start and stop.
//!
//! The application counts as ready when an HTTP GET of its base URL answers
//! with any status below 500. When it is not ready and a start command is
//! configured, whatever already listens on the target port is terminated, the
//! command is launched (with `PORT` set) in its own process group, and the
//! probe is repeated until the readiness bound elapses.

use reqwest::Client;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config;

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("application at {url} is not reachable after {waited:?}")]
    Unavailable { url: String, waited: Duration },

    #[error("application at {url} is not reachable and no start command is configured")]
    NotRunning { url: String },

    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("start command `{command}` exited early ({status})")]
    Exited { command: String, status: String },

    #[error("invalid base URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// How to reach, and if needed start, the application
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub base_url: String,
    pub start_command: Option<String>,
    /// Port passed to the start command and freed before launch
    pub port: Option<u16>,
    pub ready_timeout: Duration,
    pub probe_interval: Duration,
    /// Timeout of a single probe request
    pub probe_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let cfg = &config::get().server;
        Self {
            port: config::port_from_url(&cfg.base_url),
            base_url: cfg.base_url.clone(),
            start_command: cfg.start_command.clone(),
            ready_timeout: Duration::from_secs(cfg.ready_timeout),
            probe_interval: Duration::from_millis(cfg.probe_interval_ms),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            port: config::port_from_url(&base_url),
            base_url,
            start_command: None,
            ..Default::default()
        }
    }

    pub fn start_command(mut self, command: impl Into<String>) -> Self {
        self.start_command = Some(command.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }
}

/// Owner of the (optionally) spawned application process
pub struct AppServer {
    config: ServerConfig,
    client: Client,
    child: Mutex<Option<Child>>,
}

impl AppServer {
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        url::Url::parse(&config.base_url).map_err(|e| ServerError::InvalidUrl {
            url: config.base_url.clone(),
            message: e.to_string(),
        })?;
        let client = Client::builder()
            .timeout(config.probe_timeout)
            .build()
            .map_err(|e| ServerError::Client(e.to_string()))?;
        Ok(Self {
            config,
            client,
            child: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub async fn is_reachable(&self) -> bool {
        probe(&self.client, &self.config.base_url).await
    }

    /// Whether this server spawned a process that is still tracked
    pub async fn is_managed(&self) -> bool {
        self.child.lock().await.is_some()
    }

    /// Make sure the application answers, starting it if configured to
    pub async fn ensure_running(&self) -> ServerResult<()> {
        if self.is_reachable().await {
            debug!(url = %self.config.base_url, "application already reachable");
            return Ok(());
        }

        let Some(command) = self.config.start_command.clone() else {
            return Err(ServerError::NotRunning {
                url: self.config.base_url.clone(),
            });
        };

        // A previous launch that stopped answering is replaced
        self.stop().await;
        if let Some(port) = self.config.port {
            free_port(port).await;
        }

        info!(command = %command, "Starting application");
        let child = self.spawn(&command)?;
        *self.child.lock().await = Some(child);

        self.wait_until_ready(&command).await
    }

    fn spawn(&self, command: &str) -> ServerResult<Child> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(port) = self.config.port {
            cmd.env("PORT", port.to_string());
        }
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        cmd.spawn().map_err(|source| ServerError::Spawn {
            command: command.to_string(),
            source,
        })
    }

    async fn wait_until_ready(&self, command: &str) -> ServerResult<()> {
        let start = Instant::now();
        let deadline = start + self.config.ready_timeout;

        loop {
            if self.is_reachable().await {
                info!(url = %self.config.base_url, elapsed = ?start.elapsed(), "Application ready");
                return Ok(());
            }

            let exited = {
                let mut guard = self.child.lock().await;
                let status = guard.as_mut().and_then(|c| c.try_wait().ok().flatten());
                if status.is_some() {
                    guard.take();
                }
                status
            };
            if let Some(status) = exited {
                return Err(ServerError::Exited {
                    command: command.to_string(),
                    status: status.to_string(),
                });
            }

            if Instant::now() >= deadline {
                self.stop().await;
                return Err(ServerError::Unavailable {
                    url: self.config.base_url.clone(),
                    waited: self.config.ready_timeout,
                });
            }
            tokio::time::sleep(self.config.probe_interval).await;
        }
    }

    /// Terminate the spawned process group, if any. Safe to call repeatedly.
    pub async fn stop(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };

        if let Some(pid) = child.id() {
            // The shell leads the group; its children get the signal too
            terminate_group(pid);
        }

        if let Err(e) = child.kill().await {
            debug!("application process already gone: {}", e);
        }
        info!("Stopped application");
    }
}

/// GET `url`, treating any status below 500 as ready
pub async fn probe(client: &Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(response) => response.status().as_u16() < 500,
        Err(_) => false,
    }
}

/// Terminate processes listening on `port`
async fn free_port(port: u16) {
    for pid in listener_pids(port).await {
        warn!(port, pid, "Terminating process listening on application port");
        terminate(pid);
    }
}

/// PIDs of other processes with a listening socket on `port`.
///
/// Clients connected to the port (the readiness check's pooled connection, the browser)
/// are not listeners and are never returned, nor is this process.
pub async fn listener_pids(port: u16) -> Vec<i32> {
    let output = Command::new("lsof")
        .args(lsof_args(port))
        .stdin(Stdio::null())
        .output()
        .await;
    match output {
        Ok(output) => foreign_pids(&String::from_utf8_lossy(&output.stdout), std::process::id()),
        Err(e) => {
            debug!("lsof unavailable, not freeing port {}: {}", port, e);
            Vec::new()
        }
    }
}

fn lsof_args(port: u16) -> Vec<String> {
    vec![
        "-ti".to_string(),
        format!("tcp:{port}"),
        "-sTCP:LISTEN".to_string(),
    ]
}

#[cfg(unix)]
fn terminate(pid: i32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
}

#[cfg(unix)]
fn terminate_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;
    let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM);
}

#[cfg(not(unix))]
fn terminate(_pid: i32) {}

#[cfg(not(unix))]
fn terminate_group(_pid: u32) {}

fn parse_pids(text: &str) -> Vec<i32> {
    text.lines()
        .filter_map(|line| line.trim().parse().ok())
        .filter(|pid| *pid > 0)
        .collect()
}

/// Parsed PIDs minus `own`
fn foreign_pids(text: &str, own: u32) -> Vec<i32> {
    parse_pids(text)
        .into_iter()
        .filter(|pid| i64::from(*pid) != i64::from(own))
        .collect()
}
