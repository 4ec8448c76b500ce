//! Chrome/Chromium driver over the DevTools protocol.
//!
//! One browser process is shared by every page the driver hands out. Each page
//! lives in its own browser context (separate cookies, storage and cache) that
//! is disposed when the page closes.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{CreateBrowserContextParams, CreateTargetParams};
use chromiumoxide::cdp::js_protocol::runtime::{
    ConsoleApiCalledType, EventConsoleApiCalled, EventExceptionThrown, RemoteObject,
};
use chromiumoxide::element::Element;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::types::{
    BrowserDriver, BrowserError, BrowserPage, BrowserResult, ConsoleEntry, ConsoleLevel,
};
use crate::config;
use crate::selector::{DOM_HELPERS, Selector};

/// Attribute used to hand a resolved element from script back to the driver
const TARGET_ATTRIBUTE: &str = "data-scenario-loop-target";

/// Interval between element resolution attempts
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ChromiumConfig {
    pub headless: bool,
    pub executable: Option<PathBuf>,
    pub window_size: (u32, u32),
}

impl Default for ChromiumConfig {
    fn default() -> Self {
        let cfg = &config::get().browser;
        Self {
            headless: cfg.headless,
            executable: cfg.executable.as_ref().map(PathBuf::from),
            window_size: (1280, 800),
        }
    }
}

struct RunningBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
}

type SharedState = Arc<Mutex<Option<RunningBrowser>>>;

/// Lazily launched, shared Chromium process
pub struct ChromiumDriver {
    config: ChromiumConfig,
    state: SharedState,
}

impl ChromiumDriver {
    pub fn new(config: ChromiumConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(None)),
        }
    }

    async fn launch(config: &ChromiumConfig) -> BrowserResult<RunningBrowser> {
        let (width, height) = config.window_size;
        let mut builder = BrowserConfig::builder()
            .window_size(width, height)
            .arg("--disable-dev-shm-usage")
            .no_sandbox();
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &config.executable {
            builder = builder.chrome_executable(path);
        }
        let browser_config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            let events = pump_events(&mut handler).await;
            tracing::debug!(events, "devtools handler finished");
        });

        tracing::info!(headless = config.headless, "browser launched");
        Ok(RunningBrowser { browser, handler })
    }
}

/// Drive the DevTools event stream to its end. A single bad message does not
/// stop the connection.
async fn pump_events<S, E>(mut events: S) -> usize
where
    S: futures::Stream<Item = Result<(), E>> + Unpin,
    E: std::fmt::Display,
{
    let mut seen = 0;
    while let Some(event) = events.next().await {
        seen += 1;
        if let Err(err) = event {
            tracing::debug!(error = %err, "devtools handler error");
        }
    }
    seen
}

impl Default for ChromiumDriver {
    fn default() -> Self {
        Self::new(ChromiumConfig::default())
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn new_page(&self) -> BrowserResult<Box<dyn BrowserPage>> {
        let mut state = self.state.lock().await;
        if state.is_none() {
            *state = Some(Self::launch(&self.config).await?);
        }
        let running = state.as_mut().ok_or(BrowserError::Closed)?;

        let context_id = running
            .browser
            .create_browser_context(CreateBrowserContextParams::default())
            .await
            .map_err(protocol)?;
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(BrowserError::Protocol)?;
        let page = running.browser.new_page(params).await.map_err(protocol)?;
        drop(state);

        let page = ChromiumPage::attach(page, context_id, Arc::clone(&self.state)).await?;
        Ok(Box::new(page))
    }

    async fn shutdown(&self) -> BrowserResult<()> {
        let Some(mut running) = self.state.lock().await.take() else {
            return Ok(());
        };
        let closed = running.browser.close().await.map_err(protocol);
        let _ = running.browser.wait().await;
        running.handler.abort();
        tracing::info!("browser closed");
        closed.map(|_| ())
    }
}

/// A page inside its own browser context
pub struct ChromiumPage {
    page: Page,
    context_id: BrowserContextId,
    driver_state: SharedState,
    console: Arc<StdMutex<Vec<ConsoleEntry>>>,
    listeners: Vec<JoinHandle<()>>,
    next_token: u64,
    closed: bool,
}

impl ChromiumPage {
    async fn attach(
        page: Page,
        context_id: BrowserContextId,
        driver_state: SharedState,
    ) -> BrowserResult<Self> {
        let console = Arc::new(StdMutex::new(Vec::new()));

        let mut console_events = page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .map_err(protocol)?;
        let sink = Arc::clone(&console);
        let console_task = tokio::spawn(async move {
            while let Some(event) = console_events.next().await {
                let level = match event.r#type {
                    ConsoleApiCalledType::Error | ConsoleApiCalledType::Assert => {
                        ConsoleLevel::Error
                    }
                    ConsoleApiCalledType::Warning => ConsoleLevel::Warning,
                    ConsoleApiCalledType::Info => ConsoleLevel::Info,
                    ConsoleApiCalledType::Debug => ConsoleLevel::Debug,
                    _ => ConsoleLevel::Log,
                };
                let text = event
                    .args
                    .iter()
                    .map(remote_object_text)
                    .collect::<Vec<_>>()
                    .join(" ");
                if let Ok(mut entries) = sink.lock() {
                    entries.push(ConsoleEntry::new(level, text));
                }
            }
        });

        let mut exception_events = page
            .event_listener::<EventExceptionThrown>()
            .await
            .map_err(protocol)?;
        let sink = Arc::clone(&console);
        let exception_task = tokio::spawn(async move {
            while let Some(event) = exception_events.next().await {
                let details = &event.exception_details;
                let text = details
                    .exception
                    .as_ref()
                    .and_then(|e| e.description.clone())
                    .unwrap_or_else(|| details.text.clone());
                if let Ok(mut entries) = sink.lock() {
                    entries.push(ConsoleEntry::new(ConsoleLevel::Error, format!("pageerror: {text}")));
                }
            }
        });

        Ok(Self {
            page,
            context_id,
            driver_state,
            console,
            listeners: vec![console_task, exception_task],
            next_token: 0,
            closed: false,
        })
    }

    async fn eval_string(&self, script: String) -> BrowserResult<String> {
        self.page
            .evaluate(script)
            .await
            .map_err(protocol)?
            .into_value::<String>()
            .map_err(|e| BrowserError::Protocol(e.to_string()))
    }

    /// Poll until the selector resolves (and is visible, if required),
    /// then return a handle to that element.
    async fn resolve(
        &mut self,
        selector: &Selector,
        timeout: Duration,
        require_visible: bool,
    ) -> BrowserResult<(Element, String)> {
        self.next_token += 1;
        let token = format!("t{}", self.next_token);
        let script = format!(
            "(() => {{ {helpers}\n const el = {query}; if (!el) return 'missing'; \
             el.setAttribute('{attr}', '{token}'); \
             return __sl.isVisible(el) ? 'visible' : 'hidden'; }})()",
            helpers = DOM_HELPERS,
            query = selector.to_query_js(),
            attr = TARGET_ATTRIBUTE,
            token = token,
        );

        let deadline = Instant::now() + timeout;
        let mut last_state = String::from("missing");
        loop {
            // Evaluation fails transiently while a navigation swaps the document
            if let Ok(state) = self.eval_string(script.clone()).await {
                last_state = state;
                if last_state == "visible" || (!require_visible && last_state == "hidden") {
                    let css = format!("[{}=\"{}\"]", TARGET_ATTRIBUTE, token);
                    let element = self.page.find_element(css.as_str()).await.map_err(protocol)?;
                    return Ok((element, css));
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let selector = selector.to_string();
        if last_state == "hidden" {
            Err(BrowserError::NotVisible { selector, timeout })
        } else {
            Err(BrowserError::ElementNotFound { selector, timeout })
        }
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn goto(&mut self, url: &str, timeout: Duration) -> BrowserResult<()> {
        let deadline = Instant::now() + timeout;
        let navigation = async {
            self.page
                .goto(url)
                .await
                .map(|_| ())
                .map_err(|e| BrowserError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                })
        };
        bounded("navigate", timeout, navigation).await?;

        loop {
            if let Ok(state) = self.eval_string("document.readyState".to_string()).await {
                if state != "loading" {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    action: format!("DOM ready for {url}"),
                    timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_visible(&mut self, selector: &Selector, timeout: Duration) -> BrowserResult<()> {
        self.resolve(selector, timeout, true).await.map(|_| ())
    }

    async fn click(&mut self, selector: &Selector, timeout: Duration) -> BrowserResult<()> {
        let (element, _) = self.resolve(selector, timeout, true).await?;
        bounded("click", timeout, async {
            element.click().await.map(|_| ()).map_err(protocol)
        })
        .await
    }

    async fn fill(
        &mut self,
        selector: &Selector,
        value: &str,
        timeout: Duration,
    ) -> BrowserResult<()> {
        let (element, css) = self.resolve(selector, timeout, true).await?;
        let clear = format!(
            "(() => {{ const el = document.querySelector({css}); el.focus(); \
             if ('value' in el) {{ el.value = ''; }} else {{ el.textContent = ''; }} \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); return 'ok'; }})()",
            css = serde_json::Value::String(css.clone()),
        );
        let change = format!(
            "(() => {{ const el = document.querySelector({css}); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); return 'ok'; }})()",
            css = serde_json::Value::String(css),
        );
        bounded("fill", timeout, async {
            self.eval_string(clear).await?;
            element.focus().await.map_err(protocol)?;
            element.type_str(value).await.map_err(protocol)?;
            self.eval_string(change).await.map(|_| ())
        })
        .await
    }

    async fn select_option(
        &mut self,
        selector: &Selector,
        value: &str,
        timeout: Duration,
    ) -> BrowserResult<()> {
        let (_, css) = self.resolve(selector, timeout, true).await?;
        let script = format!(
            "(() => {{ const el = document.querySelector({css}); const want = {value}; \
             const opts = Array.from(el.options || []); \
             const hit = opts.find((o) => o.value === want) || \
               opts.find((o) => (o.label || o.textContent).trim() === want.trim()) || \
               opts.find((o) => (o.label || o.textContent).trim().toLowerCase() === want.trim().toLowerCase()); \
             if (!hit) return 'missing'; el.value = hit.value; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); return 'ok'; }})()",
            css = serde_json::Value::String(css),
            value = serde_json::Value::String(value.to_string()),
        );
        let outcome = bounded("select", timeout, self.eval_string(script)).await?;
        if outcome == "ok" {
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
        let element = match selector {
            Some(selector) => {
                let (element, _) = self.resolve(selector, timeout, true).await?;
                element.focus().await.map_err(protocol)?;
                element
            }
            None => {
                self.next_token += 1;
                let token = format!("t{}", self.next_token);
                let mark = format!(
                    "(() => {{ const el = document.activeElement || document.body; \
                     el.setAttribute('{TARGET_ATTRIBUTE}', '{token}'); return 'ok'; }})()"
                );
                self.eval_string(mark).await?;
                let css = format!("[{}=\"{}\"]", TARGET_ATTRIBUTE, token);
                self.page.find_element(css.as_str()).await.map_err(protocol)?
            }
        };
        bounded("keyboard", timeout, async {
            element.press_key(key).await.map(|_| ()).map_err(protocol)
        })
        .await
    }

    async fn text_content(
        &mut self,
        selector: &Selector,
        timeout: Duration,
    ) -> BrowserResult<String> {
        let (element, _) = self.resolve(selector, timeout, true).await?;
        let text = element.inner_text().await.map_err(protocol)?;
        Ok(text.unwrap_or_default())
    }

    async fn content(&mut self) -> BrowserResult<String> {
        self.page.content().await.map_err(protocol)
    }

    async fn screenshot(&mut self, path: &Path) -> BrowserResult<()> {
        let bytes = self
            .page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .map_err(protocol)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    fn console_entries(&self) -> Vec<ConsoleEntry> {
        self.console.lock().map(|e| e.clone()).unwrap_or_default()
    }

    async fn close(&mut self) -> BrowserResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        for listener in self.listeners.drain(..) {
            listener.abort();
        }
        let closed = self.page.clone().close().await.map_err(protocol);

        let mut state = self.driver_state.lock().await;
        if let Some(running) = state.as_mut() {
            if let Err(err) = running
                .browser
                .dispose_browser_context(self.context_id.clone())
                .await
            {
                tracing::debug!(error = %err, "failed to dispose browser context");
            }
        }
        closed
    }
}

/// Run `fut` under a hard deadline
async fn bounded<T, F>(action: &str, timeout: Duration, fut: F) -> BrowserResult<T>
where
    F: std::future::Future<Output = BrowserResult<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| BrowserError::Timeout {
            action: action.to_string(),
            timeout,
        })?
}

fn remote_object_text(object: &RemoteObject) -> String {
    match &object.value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => object.description.clone().unwrap_or_default(),
    }
}

fn protocol(err: chromiumoxide::error::CdpError) -> BrowserError {
    BrowserError::Protocol(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_errors_do_not_stop_the_handler() {
        let events = futures::stream::iter(vec![Ok(()), Err("unknown event"), Ok(()), Err("bad frame")]);
        assert_eq!(pump_events(events).await, 4);
    }

    #[test]
    fn test_default_config_uses_browser_settings() {
        let config = ChromiumConfig::default();
        assert_eq!(config.headless, config::get().browser.headless);
        assert_eq!(config.window_size, (1280, 800));
    }
}
