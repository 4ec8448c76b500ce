//! Verification engine: translate scenarios into actions and run them in a browser.

pub mod action;
pub mod executor;
pub mod orchestrator;
pub mod report;
pub mod translator;
pub mod types;

pub use action::{Action, ActionKind, RawAction};
pub use executor::{ActionExecutor, ExecutorOptions};
pub use orchestrator::{Orchestrator, Verifier, VerifyOptions, verify_until};
pub use report::{failure_report, format_summary};
pub use translator::ActionTranslator;
pub use types::{
    ExecutionError, StepResult, TranslationError, VerificationResult, VerificationSummary,
    VerifyError, VerifyResult,
};
