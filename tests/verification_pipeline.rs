//! Integration tests for the verification pipeline (scenarios → translator → executor)

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scenario_loop::browser::{BrowserDriver, MockDriver, MockElement};
use scenario_loop::llm::{CompletionRequest, LanguageModel, LlmError, LlmResult};
use scenario_loop::scenario::{ScenarioError, load_scenarios, parse_scenario, write_scenario};
use scenario_loop::verify::{
    ActionExecutor, ActionTranslator, ExecutorOptions, Orchestrator, VerifyError, VerifyOptions,
    verify_until,
};

const HOME_ACTIONS: &str = r#"```json
[
  {"type": "navigate", "value": "/", "description": "Open the home page"},
  {"type": "assert", "selector": "role=heading[name=\"Home\"]", "description": "Title is visible"}
]
```"#;

/// Replies with canned text, or fails for scenarios whose name contains `fail_on`
struct StubModel {
    reply: String,
    fail_on: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl StubModel {
    fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            fail_on: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn failing_on(mut self, name: &str) -> Self {
        self.fail_on = Some(name.to_string());
        self
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete(&self, request: CompletionRequest) -> LlmResult<String> {
        let prompt = request.messages[0].content.clone();
        self.requests.lock().unwrap().push(request);
        match &self.fail_on {
            Some(name) if prompt.contains(name.as_str()) => {
                Err(LlmError::InvalidResponse("no content".to_string()))
            }
            _ => Ok(self.reply.clone()),
        }
    }
}

fn write_scenario_file(root: &Path, rel: &str, name: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(
        path,
        format!(
            "# {name}\n\npriority: high\n\n## Steps\n1. Navigate home\n\n## Expected\n- Title is visible\n"
        ),
    )
    .unwrap();
}

fn orchestrator(
    dir: &Path,
    model: Arc<StubModel>,
    driver: &MockDriver,
    options: VerifyOptions,
) -> Orchestrator {
    let translator = ActionTranslator::new(model, "stub", 1024);
    let driver: Arc<dyn BrowserDriver> = Arc::new(driver.clone());
    let executor = ActionExecutor::new(
        driver.clone(),
        ExecutorOptions::new(url::Url::parse("http://localhost:3000").unwrap())
            .action_timeout(Duration::from_millis(50))
            .screenshot_dir(dir.join("screenshots")),
    );
    Orchestrator::new(options, translator, executor, driver)
}

fn home_driver() -> MockDriver {
    MockDriver::new().with_element(MockElement::new(r#"role=heading[name="Home"]"#, "Home"))
}

#[tokio::test]
async fn test_end_to_end_home_scenario_passes() {
    let dir = tempfile::tempdir().unwrap();
    let scenarios = dir.path().join("scenarios");
    write_scenario_file(&scenarios, "home.md", "Navigate home, assert title visible");

    let model = Arc::new(StubModel::new(HOME_ACTIONS));
    let driver = home_driver();
    let summary = orchestrator(dir.path(), model.clone(), &driver, VerifyOptions::new(&scenarios))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.total, 1);
    assert_eq!(summary.passed, 1);
    let result = &summary.results[0];
    assert!(result.passed);
    assert_eq!(result.steps.len(), 2);
    assert_eq!(result.steps[1].description, "Title is visible");
    assert_eq!(model.request_count(), 1);
    assert_eq!(driver.pages_opened(), 1);
    assert_eq!(driver.pages_closed(), 1);
    assert_eq!(driver.shutdowns(), 1);
}

#[tokio::test]
async fn test_translation_failure_is_isolated_to_one_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let scenarios = dir.path().join("scenarios");
    write_scenario_file(&scenarios, "a.md", "Alpha home");
    write_scenario_file(&scenarios, "b.md", "Bravo home");
    write_scenario_file(&scenarios, "nested/c.md", "Charlie home");

    let model = Arc::new(StubModel::new(HOME_ACTIONS).failing_on("Bravo"));
    let summary = orchestrator(dir.path(), model, &home_driver(), VerifyOptions::new(&scenarios))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.failed, 1);
    let names: Vec<_> = summary.results.iter().map(|r| (r.name.as_str(), r.passed)).collect();
    assert_eq!(
        names,
        vec![("Alpha home", true), ("Bravo home", false), ("Charlie home", true)]
    );
    let bravo = &summary.results[1];
    assert!(bravo.actual.starts_with("translation failed"), "{}", bravo.actual);
    assert!(bravo.steps.is_empty());
    assert_eq!(summary.results[2].category, "nested");
}

#[tokio::test]
async fn test_malformed_model_output_fails_scenario_not_run() {
    let dir = tempfile::tempdir().unwrap();
    let scenarios = dir.path().join("scenarios");
    write_scenario_file(&scenarios, "a.md", "Alpha");

    let model = Arc::new(StubModel::new("I could not do that."));
    let summary = orchestrator(dir.path(), model, &home_driver(), VerifyOptions::new(&scenarios))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert!(summary.results[0].actual.contains("I could not do that."));
}

#[tokio::test]
async fn test_browser_failure_marks_each_scenario_failed() {
    let dir = tempfile::tempdir().unwrap();
    let scenarios = dir.path().join("scenarios");
    write_scenario_file(&scenarios, "a.md", "Alpha");
    write_scenario_file(&scenarios, "b.md", "Bravo");

    let driver = MockDriver::new().failing_launch();
    let model = Arc::new(StubModel::new(HOME_ACTIONS));
    let summary = orchestrator(dir.path(), model, &driver, VerifyOptions::new(&scenarios))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.failed, 2);
    assert!(summary.results.iter().all(|r| r.actual.starts_with("execution failed")));
}

#[tokio::test]
async fn test_failed_step_has_screenshot_in_session() {
    let dir = tempfile::tempdir().unwrap();
    let scenarios = dir.path().join("scenarios");
    write_scenario_file(&scenarios, "a.md", "Missing Title");

    // No heading on the page
    let driver = MockDriver::new();
    let model = Arc::new(StubModel::new(HOME_ACTIONS));
    let summary = orchestrator(dir.path(), model, &driver, VerifyOptions::new(&scenarios))
        .run()
        .await
        .unwrap();

    let result = &summary.results[0];
    assert_eq!(result.failed_step, Some(2));
    assert_eq!(result.steps.len(), 2);
    let shot = result.screenshot().unwrap();
    assert_eq!(shot, &dir.path().join("screenshots/missing-title-step-2.png"));
    assert!(shot.exists());
}

#[tokio::test]
async fn test_screenshots_follow_the_requested_dir() {
    let dir = tempfile::tempdir().unwrap();
    let scenarios = dir.path().join("scenarios");
    write_scenario_file(&scenarios, "a.md", "Missing Title");

    let model = Arc::new(StubModel::new(HOME_ACTIONS));
    let orchestrator = orchestrator(dir.path(), model, &MockDriver::new(), VerifyOptions::new(&scenarios));
    let first = dir.path().join("iteration-1/screenshots");
    let second = dir.path().join("iteration-2/screenshots");

    let one = orchestrator.run_with(Some(&first)).await.unwrap();
    let two = orchestrator.run_with(Some(&second)).await.unwrap();

    assert_eq!(one.results[0].screenshot().unwrap(), &first.join("missing-title-step-2.png"));
    assert_eq!(two.results[0].screenshot().unwrap(), &second.join("missing-title-step-2.png"));
    assert!(first.join("missing-title-step-2.png").exists());
    assert!(!dir.path().join("screenshots/missing-title-step-2.png").exists());
}

#[tokio::test]
async fn test_interrupted_verification_still_shuts_down() {
    let dir = tempfile::tempdir().unwrap();
    let scenarios = dir.path().join("scenarios");
    write_scenario_file(&scenarios, "a.md", "Alpha");
    let model = Arc::new(StubModel::new(HOME_ACTIONS));

    let driver = home_driver();
    let interrupted = orchestrator(dir.path(), model.clone(), &driver, VerifyOptions::new(&scenarios));
    assert!(verify_until(&interrupted, async {}).await.is_none());
    assert_eq!(driver.pages_opened(), 0);
    assert_eq!(driver.shutdowns(), 1);

    let driver = home_driver();
    let finished = orchestrator(dir.path(), model, &driver, VerifyOptions::new(&scenarios));
    let summary = verify_until(&finished, std::future::pending()).await.unwrap().unwrap();
    assert!(summary.all_passed());
    // Once at the end of the run, once more on the way out
    assert_eq!(driver.shutdowns(), 2);
}

#[tokio::test]
async fn test_no_scenarios_and_no_match() {
    let dir = tempfile::tempdir().unwrap();
    let empty = dir.path().join("empty");
    fs::create_dir_all(&empty).unwrap();
    let model = Arc::new(StubModel::new(HOME_ACTIONS));

    let err = orchestrator(dir.path(), model.clone(), &home_driver(), VerifyOptions::new(&empty))
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, VerifyError::Scenario(ScenarioError::NoScenarios(_))));

    let scenarios = dir.path().join("scenarios");
    write_scenario_file(&scenarios, "a.md", "Alpha");
    let err = orchestrator(
        dir.path(),
        model.clone(),
        &home_driver(),
        VerifyOptions::new(&scenarios).filter("zulu"),
    )
    .run()
    .await
    .unwrap_err();
    assert!(matches!(err, VerifyError::Scenario(ScenarioError::NoMatch(_))));
    assert_eq!(model.request_count(), 0);
}

#[tokio::test]
async fn test_filter_is_case_insensitive() {
    let dir = tempfile::tempdir().unwrap();
    let scenarios = dir.path().join("scenarios");
    write_scenario_file(&scenarios, "auth/login.md", "User logs in");
    write_scenario_file(&scenarios, "home.md", "Home page");

    let model = Arc::new(StubModel::new(HOME_ACTIONS));
    let summary = orchestrator(
        dir.path(),
        model,
        &home_driver(),
        VerifyOptions::new(&scenarios).filter("AUTH"),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(summary.total, 1);
    assert_eq!(summary.results[0].name, "User logs in");
}

#[tokio::test]
async fn test_setup_failure_aborts_before_any_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let scenarios = dir.path().join("scenarios");
    write_scenario_file(&scenarios, "a.md", "Alpha");

    let model = Arc::new(StubModel::new(HOME_ACTIONS));
    let driver = home_driver();
    let err = orchestrator(
        dir.path(),
        model.clone(),
        &driver,
        VerifyOptions::new(&scenarios).setup_command("echo 'seed failed' >&2; exit 1"),
    )
    .run()
    .await
    .unwrap_err();

    match err {
        VerifyError::SetupFailed { output, .. } => assert_eq!(output, "seed failed"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(model.request_count(), 0);
    assert_eq!(driver.pages_opened(), 0);
}

#[tokio::test]
async fn test_dom_context_reaches_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let scenarios = dir.path().join("scenarios");
    write_scenario_file(&scenarios, "a.md", "Alpha");

    let model = Arc::new(StubModel::new(HOME_ACTIONS));
    let driver = home_driver().with_html("<main><h1>Home</h1></main>");
    orchestrator(
        dir.path(),
        model.clone(),
        &driver,
        VerifyOptions::new(&scenarios).dom_context(true),
    )
    .run()
    .await
    .unwrap();

    let requests = model.requests.lock().unwrap();
    assert!(requests[0].messages[0].content.contains("<main><h1>Home</h1></main>"));
    // Snapshot page plus scenario page
    assert_eq!(driver.pages_opened(), 2);
    assert_eq!(driver.pages_closed(), 2);
}

#[test]
fn test_scenario_round_trip_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("billing")).unwrap();
    fs::write(
        root.join("billing/upgrade.md"),
        "# Scenario: Upgrade plan\n\n- **priority**: low\n- type: edge-case\n\n## Context\n* Free plan\n\n## Steps\n- Open billing\n- Click upgrade\n\n## Expected\n1) Plan shows Pro\n",
    )
    .unwrap();

    let loaded = load_scenarios(root).unwrap();
    assert_eq!(loaded.len(), 1);
    let original = &loaded[0];
    assert_eq!(original.category, "billing");
    assert_eq!(original.steps, vec!["Open billing", "Click upgrade"]);

    let reparsed = parse_scenario(&write_scenario(original), &original.path, &original.category).unwrap();
    assert_eq!(&reparsed, original);
}
