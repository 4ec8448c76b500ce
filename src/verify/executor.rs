//! Runs an action list inside one isolated browser page.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use super::action::{Action, ActionKind};
use super::types::{ExecutionError, ExecutionResult, StepResult, VerificationResult, problem_logs};
use crate::browser::{BrowserDriver, BrowserPage, BrowserResult};
use crate::config;
use crate::scenario::Scenario;
use crate::selector::Selector;
use crate::session::screenshot_file_name;

/// Executor settings
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Origin relative URLs are resolved against
    pub base_url: Url,
    /// Bound on every navigation and element interaction
    pub action_timeout: Duration,
    /// Pause used by `wait` actions without a selector
    pub default_wait: Duration,
    /// Where failure screenshots go; `None` disables capture
    pub screenshot_dir: Option<PathBuf>,
}

impl ExecutorOptions {
    pub fn new(base_url: Url) -> Self {
        let cfg = &config::get().browser;
        Self {
            base_url,
            action_timeout: Duration::from_millis(cfg.action_timeout_ms),
            default_wait: Duration::from_millis(cfg.default_wait_ms),
            screenshot_dir: None,
        }
    }

    pub fn action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn default_wait(mut self, wait: Duration) -> Self {
        self.default_wait = wait;
        self
    }

    pub fn screenshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = Some(dir.into());
        self
    }
}

/// Executes actions against pages handed out by a [`BrowserDriver`]
pub struct ActionExecutor {
    driver: Arc<dyn BrowserDriver>,
    options: ExecutorOptions,
}

impl ActionExecutor {
    pub fn new(driver: Arc<dyn BrowserDriver>, options: ExecutorOptions) -> Self {
        Self { driver, options }
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Run `actions` for `scenario` in a fresh page.
    ///
    /// Stops at the first failing action. The page is closed whatever the
    /// outcome; only failing to open it is returned as an error.
    pub async fn execute(
        &self,
        scenario: &Scenario,
        actions: &[Action],
    ) -> BrowserResult<VerificationResult> {
        self.execute_in(scenario, actions, self.options.screenshot_dir.as_deref())
            .await
    }

    /// [`execute`](Self::execute) with failure screenshots written to `screenshot_dir`
    pub async fn execute_in(
        &self,
        scenario: &Scenario,
        actions: &[Action],
        screenshot_dir: Option<&Path>,
    ) -> BrowserResult<VerificationResult> {
        let start = Instant::now();
        let mut page = self.driver.new_page().await?;

        let steps = self
            .run_steps(page.as_mut(), scenario, actions, screenshot_dir)
            .await;
        let console_logs = problem_logs(&page.console_entries());

        if let Err(e) = page.close().await {
            warn!(scenario = %scenario.name, "Failed to close page: {}", e);
        }

        let failed = steps.iter().find(|s| !s.passed);
        let expected = scenario.expected.join("; ");
        let (passed, failed_step, actual) = match failed {
            Some(step) => (
                false,
                Some(step.step),
                step.error.clone().unwrap_or_default(),
            ),
            None => (true, None, "all steps passed".to_string()),
        };

        Ok(VerificationResult {
            scenario: scenario.id(),
            name: scenario.name.clone(),
            category: scenario.category.clone(),
            passed,
            steps,
            failed_step,
            expected,
            actual,
            console_logs,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn run_steps(
        &self,
        page: &mut dyn BrowserPage,
        scenario: &Scenario,
        actions: &[Action],
        screenshot_dir: Option<&Path>,
    ) -> Vec<StepResult> {
        let mut steps = Vec::with_capacity(actions.len());

        for (i, action) in actions.iter().enumerate() {
            let step = i + 1;
            let label = action.label();
            debug!(scenario = %scenario.name, step, action = %label, "running action");

            match self.run_action(page, action).await {
                Ok(()) => steps.push(StepResult::pass(step, label)),
                Err(err) => {
                    info!(scenario = %scenario.name, step, "Step failed: {}", err);
                    let mut result = StepResult::fail(step, label, err.to_string());
                    if let Some(dir) = screenshot_dir {
                        result.screenshot = capture(page, dir, &scenario.name, step).await;
                    }
                    steps.push(result);
                    break;
                }
            }
        }

        steps
    }

    async fn run_action(&self, page: &mut dyn BrowserPage, action: &Action) -> ExecutionResult<()> {
        let timeout = self.options.action_timeout;

        match action.kind {
            ActionKind::Navigate => {
                let raw = required(&action.value, "navigate needs a URL")?;
                let url = self.resolve_url(raw)?;
                page.goto(url.as_str(), timeout).await?;
            }
            ActionKind::Click => {
                page.click(&target(action)?, timeout).await?;
            }
            ActionKind::Fill => {
                let value = required(&action.value, "fill needs a value")?;
                page.fill(&target(action)?, value, timeout).await?;
            }
            ActionKind::Select => {
                let value = required(&action.value, "select needs a value")?;
                page.select_option(&target(action)?, value, timeout).await?;
            }
            ActionKind::Keyboard => {
                let key = action
                    .key
                    .as_deref()
                    .or(action.value.as_deref())
                    .ok_or_else(|| ExecutionError::InvalidAction("keyboard needs a key".into()))?;
                let selector = action.target();
                page.press_key(selector.as_ref(), key, timeout).await?;
            }
            ActionKind::Wait => match action.selector.as_deref().map(str::trim) {
                Some(raw) if !raw.is_empty() => match raw.parse::<u64>() {
                    Ok(ms) => tokio::time::sleep(Duration::from_millis(ms).min(timeout)).await,
                    Err(_) => page.wait_visible(&Selector::parse(raw), timeout).await?,
                },
                _ => tokio::time::sleep(self.options.default_wait).await,
            },
            ActionKind::Assert => {
                let selector = target(action)?;
                page.wait_visible(&selector, timeout).await?;
                if let Some(expected) = &action.value {
                    let actual = page.text_content(&selector, timeout).await?;
                    if !actual.contains(expected.as_str()) {
                        return Err(ExecutionError::AssertionMismatch {
                            expected: expected.clone(),
                            actual: actual.trim().to_string(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Absolute URLs pass through; paths resolve against the base origin
    pub fn resolve_url(&self, raw: &str) -> ExecutionResult<Url> {
        self.options
            .base_url
            .join(raw.trim())
            .map_err(|e| ExecutionError::InvalidUrl {
                url: raw.to_string(),
                message: e.to_string(),
            })
    }

    /// HTML of the landing page, for use as translation context
    pub async fn snapshot_dom(&self) -> BrowserResult<String> {
        let mut page = self.driver.new_page().await?;
        let result = async {
            page.goto(self.options.base_url.as_str(), self.options.action_timeout)
                .await?;
            page.content().await
        }
        .await;
        if let Err(e) = page.close().await {
            warn!("Failed to close snapshot page: {}", e);
        }
        result
    }
}

/// Best-effort failure screenshot
async fn capture(
    page: &mut dyn BrowserPage,
    dir: &Path,
    scenario_name: &str,
    step: usize,
) -> Option<PathBuf> {
    let path = dir.join(screenshot_file_name(scenario_name, step));
    match page.screenshot(&path).await {
        Ok(()) => Some(path),
        Err(e) => {
            warn!(scenario = %scenario_name, step, "Screenshot capture failed: {}", e);
            None
        }
    }
}

fn target(action: &Action) -> ExecutionResult<Selector> {
    action
        .target()
        .ok_or_else(|| ExecutionError::InvalidAction(format!("{} needs a selector", action.kind)))
}

fn required<'a>(value: &'a Option<String>, message: &str) -> ExecutionResult<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| ExecutionError::InvalidAction(message.to_string()))
}
