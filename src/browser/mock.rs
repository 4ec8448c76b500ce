//! Scripted in-memory browser for testing.
//!
//! Elements are registered by selector string; a selector resolves when a
//! registered element classifies to the same [`Selector`]. Every page
//! operation is recorded so tests can assert what was (and was not) attempted.

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::types::{BrowserDriver, BrowserError, BrowserPage, BrowserResult, ConsoleEntry};
use crate::selector::Selector;

/// An element on the mock page
#[derive(Debug, Clone)]
pub struct MockElement {
    pub selector: Selector,
    pub text: String,
    pub visible: bool,
    /// Option values, for `select`
    pub options: Vec<String>,
}

impl MockElement {
    pub fn new(selector: &str, text: impl Into<String>) -> Self {
        Self {
            selector: Selector::parse(selector),
            text: text.into(),
            visible: true,
            options: Vec::new(),
        }
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|o| o.to_string()).collect();
        self
    }
}

#[derive(Debug, Default)]
struct MockState {
    elements: Vec<MockElement>,
    console: Vec<ConsoleEntry>,
    html: String,
    unreachable_urls: Vec<String>,
    fail_screenshots: bool,
    fail_new_page: bool,
    calls: Vec<String>,
    pages_opened: usize,
    pages_closed: usize,
    shutdowns: usize,
}

/// Driver handing out [`MockPage`]s that share one scripted DOM
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_element(self, element: MockElement) -> Self {
        self.update(|s| s.elements.push(element));
        self
    }

    pub fn with_console(self, entry: ConsoleEntry) -> Self {
        self.update(|s| s.console.push(entry));
        self
    }

    pub fn with_html(self, html: &str) -> Self {
        self.update(|s| s.html = html.to_string());
        self
    }

    /// Navigation to any URL containing `fragment` fails
    pub fn with_unreachable(self, fragment: &str) -> Self {
        self.update(|s| s.unreachable_urls.push(fragment.to_string()));
        self
    }

    pub fn failing_screenshots(self) -> Self {
        self.update(|s| s.fail_screenshots = true);
        self
    }

    pub fn failing_launch(self) -> Self {
        self.update(|s| s.fail_new_page = true);
        self
    }

    /// Recorded page operations, e.g. `click role=button[name="Save"]`
    pub fn calls(&self) -> Vec<String> {
        self.read(|s| s.calls.clone())
    }

    pub fn pages_opened(&self) -> usize {
        self.read(|s| s.pages_opened)
    }

    pub fn pages_closed(&self) -> usize {
        self.read(|s| s.pages_closed)
    }

    pub fn shutdowns(&self) -> usize {
        self.read(|s| s.shutdowns)
    }

    fn update(&self, f: impl FnOnce(&mut MockState)) {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state);
        }
    }

    fn read<T: Default>(&self, f: impl FnOnce(&MockState) -> T) -> T {
        self.state.lock().map(|s| f(&s)).unwrap_or_default()
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn new_page(&self) -> BrowserResult<Box<dyn BrowserPage>> {
        let mut state = self.state.lock().map_err(|_| BrowserError::Closed)?;
        if state.fail_new_page {
            return Err(BrowserError::Launch("mock browser unavailable".to_string()));
        }
        state.pages_opened += 1;
        Ok(Box::new(MockPage {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }

    async fn shutdown(&self) -> BrowserResult<()> {
        self.update(|s| s.shutdowns += 1);
        Ok(())
    }
}

/// A page over the driver's scripted DOM
#[derive(Debug)]
pub struct MockPage {
    state: Arc<Mutex<MockState>>,
    closed: bool,
}

impl MockPage {
    fn record(&self, call: String) -> BrowserResult<std::sync::MutexGuard<'_, MockState>> {
        let mut state = self.state.lock().map_err(|_| BrowserError::Closed)?;
        state.calls.push(call);
        Ok(state)
    }

    fn find(
        state: &MockState,
        selector: &Selector,
        timeout: Duration,
    ) -> BrowserResult<MockElement> {
        let element = state
            .elements
            .iter()
            .find(|e| &e.selector == selector)
            .cloned()
            .ok_or_else(|| BrowserError::ElementNotFound {
                selector: selector.to_string(),
                timeout,
            })?;
        if !element.visible {
            return Err(BrowserError::NotVisible {
                selector: selector.to_string(),
                timeout,
            });
        }
        Ok(element)
    }
}

#[async_trait]
impl BrowserPage for MockPage {
    async fn goto(&mut self, url: &str, timeout: Duration) -> BrowserResult<()> {
        let state = self.record(format!("goto {url}"))?;
        if state.unreachable_urls.iter().any(|f| url.contains(f.as_str())) {
            return Err(BrowserError::Timeout {
                action: format!("navigate to {url}"),
                timeout,
            });
        }
        Ok(())
    }

    async fn wait_visible(&mut self, selector: &Selector, timeout: Duration) -> BrowserResult<()> {
        let state = self.record(format!("wait {selector}"))?;
        Self::find(&state, selector, timeout).map(|_| ())
    }

    async fn click(&mut self, selector: &Selector, timeout: Duration) -> BrowserResult<()> {
        let state = self.record(format!("click {selector}"))?;
        Self::find(&state, selector, timeout).map(|_| ())
    }

    async fn fill(
        &mut self,
        selector: &Selector,
        value: &str,
        timeout: Duration,
    ) -> BrowserResult<()> {
        let state = self.record(format!("fill {selector} {value}"))?;
        Self::find(&state, selector, timeout).map(|_| ())
    }

    async fn select_option(
        &mut self,
        selector: &Selector,
        value: &str,
        timeout: Duration,
    ) -> BrowserResult<()> {
        let state = self.record(format!("select {selector} {value}"))?;
        let element = Self::find(&state, selector, timeout)?;
        if element.options.iter().any(|o| o == value) {
            Ok(())
        } else {
            Err(BrowserError::OptionNotFound {
                selector: selector.to_string(),
                value: value.to_string(),
            })
        }
    }

    async fn press_key(
        &mut self,
        selector: Option<&Selector>,
        key: &str,
        timeout: Duration,
    ) -> BrowserResult<()> {
        match selector {
            Some(selector) => {
                let state = self.record(format!("press {key} on {selector}"))?;
                Self::find(&state, selector, timeout).map(|_| ())
            }
            None => self.record(format!("press {key}")).map(|_| ()),
        }
    }

    async fn text_content(
        &mut self,
        selector: &Selector,
        timeout: Duration,
    ) -> BrowserResult<String> {
        let state = self.record(format!("text {selector}"))?;
        Self::find(&state, selector, timeout).map(|e| e.text)
    }

    async fn content(&mut self) -> BrowserResult<String> {
        let state = self.record("content".to_string())?;
        Ok(state.html.clone())
    }

    async fn screenshot(&mut self, path: &Path) -> BrowserResult<()> {
        let fail = self.record(format!("screenshot {}", path.display()))?.fail_screenshots;
        if fail {
            return Err(BrowserError::Protocol("screenshot failed".to_string()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, b"mock screenshot")?;
        Ok(())
    }

    fn console_entries(&self) -> Vec<ConsoleEntry> {
        self.state.lock().map(|s| s.console.clone()).unwrap_or_default()
    }

    async fn close(&mut self) -> BrowserResult<()> {
        if !self.closed {
            self.closed = true;
            self.record("close".to_string())?.pages_closed += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_page_resolves_registered_elements() {
        let driver = MockDriver::new()
            .with_element(MockElement::new(r#"role=heading[name="Home"]"#, "Home"))
            .with_element(MockElement::new("#spinner", "").hidden());
        let mut page = driver.new_page().await.unwrap();
        let timeout = Duration::from_millis(10);

        let heading = Selector::parse("role=heading[name='Home']");
        assert_eq!(page.text_content(&heading, timeout).await.unwrap(), "Home");
        assert!(matches!(
            page.wait_visible(&Selector::parse("#spinner"), timeout).await,
            Err(BrowserError::NotVisible { .. })
        ));
        assert!(matches!(
            page.click(&Selector::parse("#missing"), timeout).await,
            Err(BrowserError::ElementNotFound { .. })
        ));

        page.close().await.unwrap();
        page.close().await.unwrap();
        assert_eq!(driver.pages_opened(), 1);
        assert_eq!(driver.pages_closed(), 1);
    }
}
