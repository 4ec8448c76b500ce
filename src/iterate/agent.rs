//! External coding agent boundary.
//!
//! The agent is a CLI process that receives one prompt and an allow-list of
//! tools, edits files, and exits. Its combined output is returned for the
//! iteration log. A hard timeout kills the whole process group.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config;

/// Result type for agent invocations
pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to start coding agent `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What one agent invocation produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutcome {
    pub success: bool,
    /// stdout followed by stderr
    pub output: String,
    pub timed_out: bool,
    pub duration: Duration,
}

#[async_trait]
pub trait CodingAgent: Send + Sync {
    async fn run(&self, prompt: &str) -> AgentResult<AgentOutcome>;
}

/// How to invoke the agent CLI
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub program: String,
    /// Arguments placed before the tool allow-list and prompt
    pub args: Vec<String>,
    pub allowed_tools: Vec<String>,
    pub timeout: Duration,
    /// Working directory for the agent (the project being repaired)
    pub workdir: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let cfg = &config::get().agent;
        Self {
            program: cfg.program.clone(),
            args: cfg.args.clone(),
            allowed_tools: cfg.allowed_tools.clone(),
            timeout: Duration::from_secs(cfg.timeout),
            workdir: None,
        }
    }
}

impl AgentConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }
}

/// Build the argument list: extra args, `--allowedTools a,b`, `-p <prompt>`
pub fn build_args(config: &AgentConfig, prompt: &str) -> Vec<String> {
    let mut args = config.args.clone();
    if !config.allowed_tools.is_empty() {
        args.push("--allowedTools".to_string());
        args.push(config.allowed_tools.join(","));
    }
    args.push("-p".to_string());
    args.push(prompt.to_string());
    args
}

/// [`CodingAgent`] backed by a CLI process
#[derive(Debug, Clone)]
pub struct CliCodingAgent {
    config: AgentConfig,
}

impl CliCodingAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

#[async_trait]
impl CodingAgent for CliCodingAgent {
    async fn run(&self, prompt: &str) -> AgentResult<AgentOutcome> {
        let start = Instant::now();
        let mut command = Command::new(&self.config.program);
        command
            .args(build_args(&self.config, prompt))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.workdir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        {
            command.process_group(0);
        }

        info!(program = %self.config.program, timeout = ?self.config.timeout, "Starting coding agent");
        let mut child = command.spawn().map_err(|source| AgentError::Spawn {
            program: self.config.program.clone(),
            source,
        })?;

        let stdout = tokio::spawn(read_all(child.stdout.take()));
        let stderr = tokio::spawn(read_all(child.stderr.take()));

        let (success, timed_out) =
            match tokio::time::timeout(self.config.timeout, child.wait()).await {
                Ok(status) => (status?.success(), false),
                Err(_) => {
                    warn!(timeout = ?self.config.timeout, "Coding agent timed out, terminating");
                    if let Some(pid) = child.id() {
                        terminate_group(pid);
                    }
                    if let Err(e) = child.kill().await {
                        debug!("agent already exited: {}", e);
                    }
                    (false, true)
                }
            };

        // Grandchildren may hold the pipes open; don't wait on them forever
        let grace = Duration::from_secs(5);
        let mut output = collect(stdout, grace).await;
        let err = collect(stderr, grace).await;
        if !err.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&err);
        }

        Ok(AgentOutcome {
            success,
            output,
            timed_out,
            duration: start.elapsed(),
        })
    }
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

async fn collect(handle: tokio::task::JoinHandle<String>, grace: Duration) -> String {
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(text)) => text,
        _ => String::new(),
    }
}

#[cfg(unix)]
fn terminate_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;
    let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(not(unix))]
fn terminate_group(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args() {
        let config = AgentConfig::new("claude")
            .args(vec!["--dangerously-skip-permissions".to_string()])
            .allowed_tools(vec!["Read".to_string(), "Edit".to_string()]);
        assert_eq!(
            build_args(&config, "fix it"),
            vec!["--dangerously-skip-permissions", "--allowedTools", "Read,Edit", "-p", "fix it"]
        );

        let bare = AgentConfig::new("agent").args(Vec::new()).allowed_tools(Vec::new());
        assert_eq!(build_args(&bare, "go"), vec!["-p", "go"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_agent_captures_output() {
        // sh -c '<script>' -p <prompt>: $0 = "-p", $1 = prompt
        let config = AgentConfig::new("sh")
            .args(vec!["-c".to_string(), "echo \"got $1\"; echo oops >&2".to_string()])
            .allowed_tools(Vec::new());
        let outcome = CliCodingAgent::new(config).run("the prompt").await.unwrap();

        assert!(outcome.success);
        assert!(!outcome.timed_out);
        assert_eq!(outcome.output, "got the prompt\noops\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_agent_nonzero_exit() {
        let config = AgentConfig::new("sh")
            .args(vec!["-c".to_string(), "exit 4".to_string()])
            .allowed_tools(Vec::new());
        let outcome = CliCodingAgent::new(config).run("x").await.unwrap();
        assert!(!outcome.success);
        assert!(!outcome.timed_out);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_agent_timeout_kills_process() {
        let config = AgentConfig::new("sh")
            .args(vec!["-c".to_string(), "sleep 30".to_string()])
            .allowed_tools(Vec::new())
            .timeout(Duration::from_millis(200));
        let outcome = CliCodingAgent::new(config).run("x").await.unwrap();
        assert!(outcome.timed_out);
        assert!(!outcome.success);
        assert!(outcome.duration < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let config = AgentConfig::new("definitely-not-a-real-agent-binary").allowed_tools(Vec::new());
        let err = CliCodingAgent::new(config).run("x").await.unwrap_err();
        assert!(matches!(err, AgentError::Spawn { .. }));
    }
}
