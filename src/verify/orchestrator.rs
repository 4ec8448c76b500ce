//! One verification run: scenarios in, [`VerificationSummary`] out.

use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::process::Command;
use tracing::{info, warn};

use super::executor::ActionExecutor;
use super::translator::ActionTranslator;
use super::types::{VerificationResult, VerificationSummary, VerifyError, VerifyResult};
use crate::browser::BrowserDriver;
use crate::scenario::{Scenario, filter_scenarios, load_scenarios};
use crate::server::AppServer;

/// Something that can run a full verification pass
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Run every scenario once. Failure screenshots go to `screenshot_dir`
    /// when given, else wherever the verifier was configured to put them.
    async fn verify(&self, screenshot_dir: Option<&Path>) -> VerifyResult<VerificationSummary>;

    /// Release the browser and any started application
    async fn shutdown(&self);
}

/// What to verify
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    pub scenarios_dir: PathBuf,
    /// Case-insensitive regex over name, category and path
    pub filter: Option<String>,
    /// Run once per verification before the application check
    pub setup_command: Option<String>,
    /// Pass the landing page HTML to the translator
    pub dom_context: bool,
}

impl VerifyOptions {
    pub fn new(scenarios_dir: impl Into<PathBuf>) -> Self {
        Self {
            scenarios_dir: scenarios_dir.into(),
            ..Default::default()
        }
    }

    pub fn filter(mut self, pattern: impl Into<String>) -> Self {
        self.filter = Some(pattern.into());
        self
    }

    pub fn setup_command(mut self, command: impl Into<String>) -> Self {
        self.setup_command = Some(command.into());
        self
    }

    pub fn dom_context(mut self, enabled: bool) -> Self {
        self.dom_context = enabled;
        self
    }
}

/// Loads scenarios, prepares the environment and runs translate→execute per scenario
pub struct Orchestrator {
    options: VerifyOptions,
    translator: ActionTranslator,
    executor: ActionExecutor,
    driver: Arc<dyn BrowserDriver>,
    server: Option<Arc<AppServer>>,
}

impl Orchestrator {
    pub fn new(
        options: VerifyOptions,
        translator: ActionTranslator,
        executor: ActionExecutor,
        driver: Arc<dyn BrowserDriver>,
    ) -> Self {
        Self {
            options,
            translator,
            executor,
            driver,
            server: None,
        }
    }

    /// Check (and if configured, start) the application before each run
    pub fn with_server(mut self, server: Arc<AppServer>) -> Self {
        self.server = Some(server);
        self
    }

    pub fn options(&self) -> &VerifyOptions {
        &self.options
    }

    /// Load and filter the scenario set, sorted by path
    pub fn scenarios(&self) -> VerifyResult<Vec<Scenario>> {
        let scenarios = load_scenarios(&self.options.scenarios_dir)?;
        Ok(match &self.options.filter {
            Some(pattern) => filter_scenarios(scenarios, pattern)?,
            None => scenarios,
        })
    }

    pub async fn run(&self) -> VerifyResult<VerificationSummary> {
        self.run_with(None).await
    }

    /// [`run`](Self::run) with failure screenshots redirected to `screenshot_dir`
    pub async fn run_with(
        &self,
        screenshot_dir: Option<&Path>,
    ) -> VerifyResult<VerificationSummary> {
        let started_at = Utc::now();
        let start = Instant::now();

        let scenarios = self.scenarios()?;
        info!(count = scenarios.len(), "Loaded scenarios");

        if let Some(command) = &self.options.setup_command {
            run_setup(command).await?;
        }

        if let Some(server) = &self.server {
            server.ensure_running().await?;
        }

        let mut results = Vec::with_capacity(scenarios.len());
        for (i, scenario) in scenarios.iter().enumerate() {
            info!(
                "[{}/{}] {} ({})",
                i + 1,
                scenarios.len(),
                scenario.name,
                scenario.category
            );
            let result = self.verify_scenario(scenario, screenshot_dir).await;
            if result.passed {
                info!(scenario = %scenario.name, "PASS");
            } else {
                info!(scenario = %scenario.name, actual = %result.actual, "FAIL");
            }
            results.push(result);
        }

        if let Err(e) = self.driver.shutdown().await {
            warn!("Browser shutdown failed: {}", e);
        }

        let summary = VerificationSummary::new(started_at, results, start.elapsed());
        info!(
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            "Verification finished"
        );
        Ok(summary)
    }

    /// Translate and execute one scenario; every error becomes a failed result
    async fn verify_scenario(
        &self,
        scenario: &Scenario,
        screenshot_dir: Option<&Path>,
    ) -> VerificationResult {
        let start = Instant::now();
        let base_url = self.executor.options().base_url.to_string();

        let dom = if self.options.dom_context {
            match self.executor.snapshot_dom().await {
                Ok(html) => Some(html),
                Err(e) => {
                    warn!(scenario = %scenario.name, "DOM snapshot failed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let actions = match self
            .translator
            .translate(scenario, &base_url, dom.as_deref())
            .await
        {
            Ok(actions) => actions,
            Err(e) => {
                warn!(scenario = %scenario.name, "Translation failed: {}", e);
                return VerificationResult::errored(
                    scenario,
                    format!("translation failed: {e}"),
                    start.elapsed(),
                );
            }
        };

        let screenshot_dir =
            screenshot_dir.or(self.executor.options().screenshot_dir.as_deref());
        match self
            .executor
            .execute_in(scenario, &actions, screenshot_dir)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(scenario = %scenario.name, "Execution failed: {}", e);
                VerificationResult::errored(
                    scenario,
                    format!("execution failed: {e}"),
                    start.elapsed(),
                )
            }
        }
    }
}

#[async_trait]
impl Verifier for Orchestrator {
    async fn verify(&self, screenshot_dir: Option<&Path>) -> VerifyResult<VerificationSummary> {
        self.run_with(screenshot_dir).await
    }

    async fn shutdown(&self) {
        if let Err(e) = self.driver.shutdown().await {
            warn!("Browser shutdown failed: {}", e);
        }
        if let Some(server) = &self.server {
            server.stop().await;
        }
    }
}

/// One verification that gives way to `cancel`.
///
/// The verifier is shut down on both paths, so a started application and the
/// browser never outlive an interrupted run. `None` means `cancel` won.
pub async fn verify_until<F>(
    verifier: &dyn Verifier,
    cancel: F,
) -> Option<VerifyResult<VerificationSummary>>
where
    F: Future<Output = ()>,
{
    let outcome = tokio::select! {
        biased;
        _ = cancel => None,
        result = verifier.verify(None) => Some(result),
    };
    verifier.shutdown().await;
    outcome
}

/// Run the one-shot setup command, failing with its output on non-zero exit
pub async fn run_setup(command: &str) -> VerifyResult<()> {
    info!(command = %command, "Running setup command");
    let output = Command::new("sh").arg("-c").arg(command).output().await?;
    if output.status.success() {
        return Ok(());
    }

    let mut text = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(stdout.trim());
    }
    Err(VerifyError::SetupFailed {
        status: output.status.to_string(),
        output: text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_setup_success() {
        run_setup("true").await.unwrap();
    }

    #[tokio::test]
    async fn test_setup_failure_propagates_output() {
        let err = run_setup("echo 'migration failed' >&2; exit 3").await.unwrap_err();
        match err {
            VerifyError::SetupFailed { status, output } => {
                assert!(status.contains('3'), "{status}");
                assert_eq!(output, "migration failed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
