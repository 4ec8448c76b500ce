use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::browser::{BrowserError, ConsoleEntry};
use crate::llm::LlmError;
use crate::scenario::{Scenario, ScenarioError};
use crate::server::ServerError;

/// Longest slice of a bad model response kept for diagnostics
pub const RAW_EXCERPT_LIMIT: usize = 500;

/// Outcome of one executed action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// 1-based position in the action list
    pub step: usize,
    pub description: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
}

impl StepResult {
    pub fn pass(step: usize, description: impl Into<String>) -> Self {
        Self {
            step,
            description: description.into(),
            passed: true,
            error: None,
            screenshot: None,
        }
    }

    pub fn fail(step: usize, description: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            step,
            description: description.into(),
            passed: false,
            error: Some(error.into()),
            screenshot: None,
        }
    }
}

/// Result of verifying one scenario in one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Scenario identifier (its file path)
    pub scenario: String,
    pub name: String,
    pub category: String,
    pub passed: bool,
    pub steps: Vec<StepResult>,
    /// 1-based index of the failing step, if an action failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<usize>,
    /// What the scenario expected
    pub expected: String,
    /// What actually happened
    pub actual: String,
    /// Warnings and errors from the page console
    #[serde(default)]
    pub console_logs: Vec<String>,
    pub duration_ms: u64,
}

impl VerificationResult {
    /// A failed result for a scenario that never reached execution
    pub fn errored(scenario: &Scenario, error: impl std::fmt::Display, duration: Duration) -> Self {
        Self {
            scenario: scenario.id(),
            name: scenario.name.clone(),
            category: scenario.category.clone(),
            passed: false,
            steps: Vec::new(),
            failed_step: None,
            expected: scenario.expected.join("; "),
            actual: error.to_string(),
            console_logs: Vec::new(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn failing_step(&self) -> Option<&StepResult> {
        self.failed_step
            .and_then(|n| self.steps.iter().find(|s| s.step == n))
    }

    pub fn screenshot(&self) -> Option<&PathBuf> {
        self.failing_step().and_then(|s| s.screenshot.as_ref())
    }
}

/// Aggregate of one verification run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<VerificationResult>,
}

impl VerificationSummary {
    pub fn new(started_at: DateTime<Utc>, results: Vec<VerificationResult>, duration: Duration) -> Self {
        let passed = results.iter().filter(|r| r.passed).count();
        Self {
            started_at,
            total: results.len(),
            passed,
            failed: results.len() - passed,
            duration_ms: duration.as_millis() as u64,
            results,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &VerificationResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    /// Identifiers of every failing scenario
    pub fn failing_ids(&self) -> std::collections::BTreeSet<String> {
        self.failures().map(|r| r.scenario.clone()).collect()
    }
}

/// Result type for translation
pub type TranslationResult<T> = Result<T, TranslationError>;

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("model call failed: {0}")]
    Model(#[from] LlmError),

    #[error("model response is not a JSON action array: {message} (response: {raw_excerpt})")]
    InvalidJson { message: String, raw_excerpt: String },

    #[error("action {index} is invalid: {message}")]
    InvalidAction { index: usize, message: String },

    #[error("model returned no actions")]
    Empty,
}

/// Result type for action execution
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Why one action failed
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("assertion failed: expected \"{expected}\", got \"{actual}\"")]
    AssertionMismatch { expected: String, actual: String },

    #[error("invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("{0}")]
    InvalidAction(String),
}

/// Result type for a verification run
pub type VerifyResult<T> = Result<T, VerifyError>;

/// Errors that abort a whole verification run
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error("setup command failed ({status}): {output}")]
    SetupFailed { status: String, output: String },

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cut `text` to at most `limit` characters, marking the cut
pub fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Console entries worth reporting, rendered as `[level] text`
pub fn problem_logs(entries: &[ConsoleEntry]) -> Vec<String> {
    entries
        .iter()
        .filter(|e| e.is_problem())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::ConsoleLevel;

    fn result(id: &str, passed: bool) -> VerificationResult {
        VerificationResult {
            scenario: id.to_string(),
            name: id.to_string(),
            category: "general".to_string(),
            passed,
            steps: Vec::new(),
            failed_step: None,
            expected: String::new(),
            actual: String::new(),
            console_logs: Vec::new(),
            duration_ms: 1,
        }
    }

    #[test]
    fn test_summary_counts() {
        let summary = VerificationSummary::new(
            Utc::now(),
            vec![result("a.md", true), result("b.md", false), result("c.md", false)],
            Duration::from_millis(1500),
        );
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.duration_ms, 1500);
        assert!(!summary.all_passed());
        assert_eq!(
            summary.failing_ids().into_iter().collect::<Vec<_>>(),
            vec!["b.md".to_string(), "c.md".to_string()]
        );
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("ééééé", 2), "éé...");
    }

    #[test]
    fn test_problem_logs_keeps_warnings_and_errors() {
        let logs = problem_logs(&[
            ConsoleEntry::new(ConsoleLevel::Log, "hello"),
            ConsoleEntry::new(ConsoleLevel::Warning, "deprecated"),
            ConsoleEntry::new(ConsoleLevel::Error, "boom"),
        ]);
        assert_eq!(logs, vec!["[warning] deprecated", "[error] boom"]);
    }
}
