pub mod chromium;
pub mod mock;
pub mod types;

pub use chromium::{ChromiumConfig, ChromiumDriver};
pub use mock::{MockDriver, MockElement};
pub use types::{BrowserDriver, BrowserError, BrowserPage, BrowserResult, ConsoleEntry, ConsoleLevel};
