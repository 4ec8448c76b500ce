use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::selector::Selector;

/// Result type for browser operations
pub type BrowserResult<T> = Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("element not found: {selector} (waited {timeout:?})")]
    ElementNotFound { selector: String, timeout: Duration },

    #[error("element not visible: {selector} (waited {timeout:?})")]
    NotVisible { selector: String, timeout: Duration },

    #[error("no option '{value}' in {selector}")]
    OptionNotFound { selector: String, value: String },

    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("{action} timed out after {timeout:?}")]
    Timeout { action: String, timeout: Duration },

    #[error("devtools protocol error: {0}")]
    Protocol(String),

    #[error("browser session already closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Debug,
    Log,
    Info,
    Warning,
    Error,
}

/// One console message or uncaught page error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub level: ConsoleLevel,
    pub text: String,
}

impl ConsoleEntry {
    pub fn new(level: ConsoleLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }

    /// Warnings and errors are the only entries worth reporting
    pub fn is_problem(&self) -> bool {
        matches!(self.level, ConsoleLevel::Warning | ConsoleLevel::Error)
    }
}

impl std::fmt::Display for ConsoleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.level {
            ConsoleLevel::Debug => "debug",
            ConsoleLevel::Log => "log",
            ConsoleLevel::Info => "info",
            ConsoleLevel::Warning => "warning",
            ConsoleLevel::Error => "error",
        };
        write!(f, "[{}] {}", level, self.text)
    }
}

/// One isolated browsing context with a single page.
///
/// Every element operation resolves its selector first and waits for the
/// element to become visible within `timeout`; resolution always narrows to
/// the first match.
#[async_trait]
pub trait BrowserPage: Send {
    /// Navigate and wait for initial DOM readiness
    async fn goto(&mut self, url: &str, timeout: Duration) -> BrowserResult<()>;

    async fn wait_visible(&mut self, selector: &Selector, timeout: Duration) -> BrowserResult<()>;

    async fn click(&mut self, selector: &Selector, timeout: Duration) -> BrowserResult<()>;

    /// Replace the element's value with `value`
    async fn fill(&mut self, selector: &Selector, value: &str, timeout: Duration)
    -> BrowserResult<()>;

    /// Choose an option by value or visible label
    async fn select_option(
        &mut self,
        selector: &Selector,
        value: &str,
        timeout: Duration,
    ) -> BrowserResult<()>;

    /// Press a key on the element, or on the focused element when `selector` is `None`
    async fn press_key(
        &mut self,
        selector: Option<&Selector>,
        key: &str,
        timeout: Duration,
    ) -> BrowserResult<()>;

    async fn text_content(&mut self, selector: &Selector, timeout: Duration)
    -> BrowserResult<String>;

    /// Serialized HTML of the current document
    async fn content(&mut self) -> BrowserResult<String>;

    async fn screenshot(&mut self, path: &Path) -> BrowserResult<()>;

    /// Everything logged so far, unfiltered
    fn console_entries(&self) -> Vec<ConsoleEntry>;

    /// Close the page and dispose of its browsing context
    async fn close(&mut self) -> BrowserResult<()>;
}

/// Owner of the browser process; hands out isolated pages.
///
/// The process is created lazily by the first `new_page` and torn down by
/// `shutdown`, which is idempotent. A later `new_page` starts a new process.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn new_page(&self) -> BrowserResult<Box<dyn BrowserPage>>;

    async fn shutdown(&self) -> BrowserResult<()>;
}
