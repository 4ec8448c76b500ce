//! Integration tests for the iteration controller with scripted collaborators

use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scenario_loop::iterate::{
    AgentError, AgentOutcome, AgentResult, BreakerConfig, CircuitBreaker, CodingAgent,
    IterationController, LoopEnd, LoopOptions, LoopState, StopReason,
};
use scenario_loop::session::Session;
use scenario_loop::verify::{
    VerificationResult, VerificationSummary, Verifier, VerifyError, VerifyResult,
};

/// Records prompts and reports success
#[derive(Default)]
struct FakeAgent {
    prompts: Mutex<Vec<String>>,
    timeout: bool,
    unavailable: bool,
}

#[async_trait]
impl CodingAgent for FakeAgent {
    async fn run(&self, prompt: &str) -> AgentResult<AgentOutcome> {
        if self.unavailable {
            return Err(AgentError::Spawn {
                program: "fake".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            });
        }
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(AgentOutcome {
            success: !self.timeout,
            output: format!("edited files for prompt of {} bytes", prompt.len()),
            timed_out: self.timeout,
            duration: Duration::from_millis(1),
        })
    }
}

/// Plays back a fixed sequence of verification outcomes
struct ScriptedVerifier {
    script: Mutex<VecDeque<VerifyResult<VerificationSummary>>>,
    runs: AtomicUsize,
    shutdowns: AtomicUsize,
    screenshot_dirs: Mutex<Vec<Option<PathBuf>>>,
}

impl ScriptedVerifier {
    fn new(script: Vec<VerifyResult<VerificationSummary>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            runs: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
            screenshot_dirs: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Verifier for ScriptedVerifier {
    async fn verify(&self, screenshot_dir: Option<&Path>) -> VerifyResult<VerificationSummary> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.screenshot_dirs
            .lock()
            .unwrap()
            .push(screenshot_dir.map(Path::to_path_buf));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(summary(&[])))
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

const ALL: [&str; 4] = ["a.md", "b.md", "c.md", "d.md"];

/// Summary over scenarios a..d where `failing` fail
fn summary(failing: &[&str]) -> VerificationSummary {
    let results = ALL
        .iter()
        .map(|id| {
            let passed = !failing.contains(id);
            VerificationResult {
                scenario: id.to_string(),
                name: id.trim_end_matches(".md").to_uppercase(),
                category: "general".to_string(),
                passed,
                steps: Vec::new(),
                failed_step: None,
                expected: "it works".to_string(),
                actual: if passed { "all steps passed" } else { "it broke" }.to_string(),
                console_logs: Vec::new(),
                duration_ms: 1,
            }
        })
        .collect();
    VerificationSummary::new(Utc::now(), results, Duration::from_millis(4))
}

fn crash() -> VerifyResult<VerificationSummary> {
    Err(VerifyError::Io(std::io::Error::other("browser crashed")))
}

fn controller(
    agent: Arc<FakeAgent>,
    verifier: Arc<ScriptedVerifier>,
    max_iterations: u32,
) -> IterationController {
    IterationController::new(
        LoopOptions::new("scenarios").max_iterations(max_iterations),
        agent,
        verifier,
        CircuitBreaker::new(BreakerConfig::default()),
    )
}

#[tokio::test]
async fn test_loop_reaches_done_and_feeds_back_failures() {
    let agent = Arc::new(FakeAgent::default());
    let verifier = Arc::new(ScriptedVerifier::new(vec![
        Ok(summary(&["b.md", "c.md"])),
        Ok(summary(&[])),
    ]));

    let outcome = controller(agent.clone(), verifier.clone(), 10).run().await;

    assert_eq!(outcome.state, LoopState::Done);
    assert_eq!(outcome.end, LoopEnd::AllPassed);
    assert_eq!(outcome.iterations, 2);
    assert!(outcome.succeeded());

    let prompts = agent.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("Failure Report"));
    assert!(prompts[1].contains("# Iteration 2"));
    assert!(prompts[1].contains("- File: `b.md`"));
    assert!(prompts[1].contains("- File: `c.md`"));
    assert_eq!(verifier.shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_verification_crash_is_not_a_breaker_data_point() {
    let agent = Arc::new(FakeAgent::default());
    let verifier = Arc::new(ScriptedVerifier::new(vec![
        Ok(summary(&["a.md"])),
        crash(),
        Ok(summary(&["a.md"])),
        crash(),
        Ok(summary(&[])),
    ]));

    let mut loop_controller = controller(agent.clone(), verifier.clone(), 10);
    let outcome = loop_controller.run().await;

    assert_eq!(outcome.state, LoopState::Done);
    assert_eq!(outcome.iterations, 5);
    let recorded: Vec<u32> = outcome.history.iter().map(|r| r.iteration).collect();
    assert_eq!(recorded, vec![1, 3]);
    assert_eq!(loop_controller.breaker().history().len(), 2);
    assert_eq!(agent.prompts.lock().unwrap().len(), 5);
}

#[tokio::test]
async fn test_oscillation_stops_the_loop() {
    let agent = Arc::new(FakeAgent::default());
    let verifier = Arc::new(ScriptedVerifier::new(vec![
        Ok(summary(&["a.md"])),
        Ok(summary(&["b.md"])),
        Ok(summary(&["a.md"])),
        Ok(summary(&["b.md"])),
        Ok(summary(&[])),
    ]));

    let outcome = controller(agent, verifier.clone(), 10).run().await;

    assert_eq!(outcome.state, LoopState::Stopped);
    assert_eq!(
        outcome.end,
        LoopEnd::Breaker {
            reason: StopReason::Oscillation
        }
    );
    assert_eq!(outcome.iterations, 4);
    assert_eq!(verifier.runs.load(Ordering::SeqCst), 4);
    assert_eq!(verifier.shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_regression_stops_the_loop() {
    let agent = Arc::new(FakeAgent::default());
    let verifier = Arc::new(ScriptedVerifier::new(vec![
        Ok(summary(&["a.md"])),
        Ok(summary(&["a.md"])),
        Ok(summary(&["a.md", "b.md", "c.md", "d.md"])),
    ]));
    // Margin of 2 so four failures against a best of one trips it
    let mut loop_controller = IterationController::new(
        LoopOptions::new("scenarios").max_iterations(10),
        agent,
        verifier,
        CircuitBreaker::new(BreakerConfig {
            regression_margin: 2,
            ..Default::default()
        }),
    );

    let outcome = loop_controller.run().await;

    assert_eq!(
        outcome.end,
        LoopEnd::Breaker {
            reason: StopReason::Regression {
                current: 4,
                previous: 1,
                best: 1
            }
        }
    );
}

#[tokio::test]
async fn test_max_iterations_stops_the_loop() {
    let agent = Arc::new(FakeAgent {
        timeout: true,
        ..Default::default()
    });
    let verifier = Arc::new(ScriptedVerifier::new(vec![
        Ok(summary(&["a.md", "b.md", "c.md"])),
        Ok(summary(&["a.md", "b.md"])),
        Ok(summary(&["a.md"])),
    ]));

    let outcome = controller(agent.clone(), verifier.clone(), 3).run().await;

    assert_eq!(outcome.state, LoopState::Stopped);
    assert_eq!(outcome.end, LoopEnd::MaxIterations { limit: 3 });
    assert_eq!(outcome.iterations, 3);
    // A timed-out agent still gets its changes verified
    assert_eq!(verifier.runs.load(Ordering::SeqCst), 3);
    assert_eq!(outcome.stuck, vec!["a.md".to_string()]);
    assert_eq!(outcome.last_summary.unwrap().failed, 1);
}

#[tokio::test]
async fn test_unavailable_agent_stops_with_error() {
    let agent = Arc::new(FakeAgent {
        unavailable: true,
        ..Default::default()
    });
    let verifier = Arc::new(ScriptedVerifier::new(Vec::new()));

    let outcome = controller(agent, verifier.clone(), 5).run().await;

    assert_eq!(outcome.state, LoopState::Stopped);
    assert!(matches!(outcome.end, LoopEnd::Error { .. }));
    assert_eq!(verifier.runs.load(Ordering::SeqCst), 0);
    assert_eq!(verifier.shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_session_artifacts_are_written() {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::in_dir(dir.path().join("run"));
    session.init().unwrap();

    let agent = Arc::new(FakeAgent::default());
    let verifier = Arc::new(ScriptedVerifier::new(vec![
        Ok(summary(&["d.md"])),
        Ok(summary(&[])),
    ]));

    let outcome = controller(agent, verifier.clone(), 10)
        .with_session(session.clone())
        .run()
        .await;
    assert!(outcome.succeeded());

    let first = session.iteration_dir(1);
    assert!(first.join("prompt.md").exists());
    assert!(first.join("agent-output.log").exists());
    assert!(first.join("results.json").exists());
    let report = std::fs::read_to_string(first.join("failure-report.md")).unwrap();
    assert!(report.contains("- File: `d.md`"));

    let second = session.iteration_dir(2);
    assert!(second.join("results.json").exists());
    assert!(!second.join("failure-report.md").exists());

    let loop_summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(session.dir.join("loop-summary.json")).unwrap())
            .unwrap();
    assert_eq!(loop_summary["state"], "done");
    assert_eq!(loop_summary["end"]["kind"], "all_passed");
    assert_eq!(loop_summary["iterations"], 2);

    // Each iteration's evidence lands in its own directory
    let dirs = verifier.screenshot_dirs.lock().unwrap().clone();
    assert_eq!(
        dirs,
        vec![
            Some(session.iteration_screenshots_dir(1)),
            Some(session.iteration_screenshots_dir(2)),
        ]
    );
}
