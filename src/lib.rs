//! Scenario Loop - verify a web application against natural-language scenarios.
//!
//! This crate provides:
//! - Scenario files (Context / Steps / Expected) with a structured-text round trip
//! - Translation of scenarios into typed browser actions through a language model
//! - A Chromium (DevTools Protocol) executor with multi-strategy selector resolution
//! - A verification orchestrator with per-scenario failure isolation
//! - An iteration loop that drives a coding agent until scenarios pass, guarded
//!   by a stagnation / regression / oscillation circuit breaker
//! - Session management for screenshots, prompts and reports
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scenario_loop::browser::{BrowserDriver, ChromiumConfig, ChromiumDriver};
//! use scenario_loop::llm::{HttpLanguageModel, LlmConfig};
//! use scenario_loop::verify::{ActionExecutor, ActionTranslator, ExecutorOptions, Orchestrator, VerifyOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let llm = HttpLanguageModel::new(LlmConfig::default())?;
//! let model_id = llm.config().model.clone();
//! let translator = ActionTranslator::new(Arc::new(llm), model_id, 4096);
//!
//! let driver: Arc<dyn BrowserDriver> = Arc::new(ChromiumDriver::new(ChromiumConfig::default()));
//! let executor = ActionExecutor::new(
//!     driver.clone(),
//!     ExecutorOptions::new(url::Url::parse("http://localhost:3000")?),
//! );
//!
//! let orchestrator = Orchestrator::new(VerifyOptions::new("scenarios"), translator, executor, driver);
//! let summary = orchestrator.run().await?;
//! println!("{} of {} passed", summary.passed, summary.total);
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod config;
pub mod iterate;
pub mod llm;
pub mod scenario;
pub mod selector;
pub mod server;
pub mod session;
pub mod verify;

// Re-export scenario types
pub use scenario::{Scenario, ScenarioError, ScenarioMetadata, filter_scenarios, load_scenarios};

// Re-export selector classification
pub use selector::{Selector, Strategy};

// Re-export the verification engine
pub use verify::{
    Action, ActionExecutor, ActionKind, ActionTranslator, ExecutorOptions, Orchestrator,
    StepResult, VerificationResult, VerificationSummary, Verifier, VerifyError, VerifyOptions,
};

// Re-export the iteration loop
pub use iterate::{
    BreakerConfig, CircuitBreaker, CliCodingAgent, CodingAgent, IterationController,
    IterationRecord, LoopOptions, LoopOutcome, LoopState, StopReason,
};

// Re-export session management
pub use session::{Session, cleanup_old_sessions, list_sessions};
