//! Iteration controller: coding agent → verification → stop decision.
//!
//! An explicit state machine:
//!
//! ```text
//! Coding ──► Verifying ──► Deciding ──► Done       (no failures)
//!   ▲            │             ├──────► Stopped    (breaker, max iterations)
//!   └────────────┴─────────────┘                   (next iteration)
//! ```
//!
//! Only `Deciding` feeds the circuit breaker, and it is only reached with a
//! summary in hand, so a crashed verification never becomes a data point.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::agent::{AgentError, CodingAgent};
use super::breaker::{BreakerDecision, CircuitBreaker, IterationRecord, StopReason};
use super::prompt::build_prompt;
use crate::config;
use crate::session::Session;
use crate::verify::{Verifier, VerificationSummary, failure_report};

pub const PROMPT_FILE: &str = "prompt.md";
pub const AGENT_OUTPUT_FILE: &str = "agent-output.log";
pub const FAILURE_REPORT_FILE: &str = "failure-report.md";
pub const RESULTS_FILE: &str = "results.json";
pub const LOOP_SUMMARY_FILE: &str = "loop-summary.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Coding,
    Verifying,
    Deciding,
    Done,
    Stopped,
}

/// Why the loop ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopEnd {
    AllPassed,
    MaxIterations { limit: u32 },
    Breaker { reason: StopReason },
    Error { message: String },
}

impl std::fmt::Display for LoopEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopEnd::AllPassed => write!(f, "all scenarios pass"),
            LoopEnd::MaxIterations { limit } => write!(f, "reached {} iterations", limit),
            LoopEnd::Breaker { reason } => write!(f, "{}", reason),
            LoopEnd::Error { message } => write!(f, "error: {}", message),
        }
    }
}

/// Final record of a loop run
#[derive(Debug, Clone, Serialize)]
pub struct LoopOutcome {
    /// `Done` or `Stopped`
    pub state: LoopState,
    pub end: LoopEnd,
    /// Iterations started
    pub iterations: u32,
    pub last_summary: Option<VerificationSummary>,
    pub history: Vec<IterationRecord>,
    pub stuck: Vec<String>,
}

impl LoopOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == LoopState::Done
    }
}

#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub scenarios_dir: PathBuf,
    pub max_iterations: u32,
}

impl LoopOptions {
    pub fn new(scenarios_dir: impl Into<PathBuf>) -> Self {
        Self {
            scenarios_dir: scenarios_dir.into(),
            max_iterations: config::get().looping.max_iterations,
        }
    }

    pub fn max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }
}

pub struct IterationController {
    options: LoopOptions,
    agent: Arc<dyn CodingAgent>,
    verifier: Arc<dyn Verifier>,
    breaker: CircuitBreaker,
    session: Option<Session>,
}

impl IterationController {
    pub fn new(
        options: LoopOptions,
        agent: Arc<dyn CodingAgent>,
        verifier: Arc<dyn Verifier>,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            options,
            agent,
            verifier,
            breaker,
            session: None,
        }
    }

    /// Persist prompts, agent output and reports under `session`
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run to `Done` or `Stopped`. The verifier is shut down on every path.
    pub async fn run(&mut self) -> LoopOutcome {
        let max = self.options.max_iterations;
        let mut iteration: u32 = 1;
        let mut report: Option<String> = None;
        let mut pending: Option<VerificationSummary> = None;
        let mut last_summary: Option<VerificationSummary> = None;

        let (mut state, mut end) = if max == 0 {
            (LoopState::Stopped, Some(LoopEnd::MaxIterations { limit: 0 }))
        } else {
            (LoopState::Coding, None)
        };

        while !matches!(state, LoopState::Done | LoopState::Stopped) {
            state = match state {
                LoopState::Coding => {
                    info!(iteration, max, "Iteration started");
                    match self.code(iteration, report.as_deref()).await {
                        Ok(()) => LoopState::Verifying,
                        Err(e) => {
                            end = Some(LoopEnd::Error {
                                message: e.to_string(),
                            });
                            LoopState::Stopped
                        }
                    }
                }
                LoopState::Verifying => {
                    let screenshots = self
                        .session
                        .as_ref()
                        .map(|s| s.iteration_screenshots_dir(iteration));
                    match self.verifier.verify(screenshots.as_deref()).await {
                        Ok(summary) => {
                            self.write_artifact(
                                Some(iteration),
                                RESULTS_FILE,
                                &serde_json::to_string_pretty(&summary).unwrap_or_default(),
                            );
                            pending = Some(summary);
                            LoopState::Deciding
                        }
                        Err(e) => {
                            warn!(iteration, "Verification crashed, skipping iteration: {}", e);
                            self.advance(&mut iteration, &mut end)
                        }
                    }
                }
                LoopState::Deciding => match pending.take() {
                    Some(summary) => {
                        let next = self.decide(iteration, &summary, &mut report, &mut end);
                        last_summary = Some(summary);
                        match next {
                            LoopState::Coding => self.advance(&mut iteration, &mut end),
                            other => other,
                        }
                    }
                    None => {
                        end = Some(LoopEnd::Error {
                            message: "no verification summary to decide on".to_string(),
                        });
                        LoopState::Stopped
                    }
                },
                terminal => terminal,
            };
        }

        self.verifier.shutdown().await;

        let outcome = LoopOutcome {
            state,
            end: end.unwrap_or(LoopEnd::MaxIterations { limit: max }),
            iterations: iteration.min(max),
            last_summary,
            history: self.breaker.history().to_vec(),
            stuck: self.breaker.stuck_scenarios().into_iter().collect(),
        };
        info!(state = ?outcome.state, iterations = outcome.iterations, "Loop finished: {}", outcome.end);
        self.write_artifact(
            None,
            LOOP_SUMMARY_FILE,
            &serde_json::to_string_pretty(&outcome).unwrap_or_default(),
        );
        outcome
    }

    /// Invoke the agent; only a failure to start it at all is an error
    async fn code(&self, iteration: u32, report: Option<&str>) -> Result<(), AgentError> {
        let prompt = build_prompt(iteration, &self.options.scenarios_dir, report);
        self.write_artifact(Some(iteration), PROMPT_FILE, &prompt);

        match self.agent.run(&prompt).await {
            Ok(outcome) => {
                self.write_artifact(Some(iteration), AGENT_OUTPUT_FILE, &outcome.output);
                if outcome.timed_out {
                    warn!(iteration, "Coding agent timed out; verifying partial changes");
                } else if !outcome.success {
                    warn!(iteration, "Coding agent exited with failure; verifying anyway");
                } else {
                    info!(iteration, duration = ?outcome.duration, "Coding agent finished");
                }
                Ok(())
            }
            Err(e @ AgentError::Spawn { .. }) => Err(e),
            Err(e) => {
                warn!(iteration, "Coding agent failed: {}", e);
                Ok(())
            }
        }
    }

    /// Feed a summary to the breaker and pick the next state
    fn decide(
        &mut self,
        iteration: u32,
        summary: &VerificationSummary,
        report: &mut Option<String>,
        end: &mut Option<LoopEnd>,
    ) -> LoopState {
        info!(
            iteration,
            passed = summary.passed,
            failed = summary.failed,
            "Verification complete"
        );
        if summary.all_passed() {
            *end = Some(LoopEnd::AllPassed);
            return LoopState::Done;
        }

        let decision = self
            .breaker
            .record(IterationRecord::from_summary(iteration, summary));
        if let BreakerDecision::Stop(reason) = decision {
            warn!(iteration, "Circuit breaker tripped: {}", reason);
            *end = Some(LoopEnd::Breaker { reason });
            return LoopState::Stopped;
        }

        let stuck: Vec<String> = self.breaker.stuck_scenarios().into_iter().collect();
        if !stuck.is_empty() {
            warn!(iteration, count = stuck.len(), "Stuck scenarios: {}", stuck.join(", "));
        }
        let text = failure_report(summary, &stuck);
        self.write_artifact(Some(iteration), FAILURE_REPORT_FILE, &text);
        *report = Some(text);
        LoopState::Coding
    }

    /// Move to the next iteration, or stop at the limit
    fn advance(&self, iteration: &mut u32, end: &mut Option<LoopEnd>) -> LoopState {
        if *iteration >= self.options.max_iterations {
            *end = Some(LoopEnd::MaxIterations {
                limit: self.options.max_iterations,
            });
            return LoopState::Stopped;
        }
        *iteration += 1;
        LoopState::Coding
    }

    /// Best-effort artifact write
    fn write_artifact(&self, iteration: Option<u32>, file_name: &str, contents: &str) {
        let Some(session) = &self.session else {
            return;
        };
        let written = match iteration {
            Some(n) => session.write_iteration_file(n, file_name, contents),
            None => session.write_file(file_name, contents),
        };
        if let Err(e) = written {
            warn!(file = file_name, "Failed to write session artifact: {}", e);
        }
    }
}
