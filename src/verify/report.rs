//! Failure reports and human-readable summaries.

use std::fmt::Write as _;

use super::types::{VerificationResult, VerificationSummary};

/// Console entries kept per failing scenario
pub const CONSOLE_EXCERPT_LIMIT: usize = 5;

/// Markdown failure report fed back into the next coding prompt.
///
/// Lists each failing scenario's file, failed step, expected vs actual text,
/// screenshot and a console excerpt, then any stuck scenarios.
pub fn failure_report(summary: &VerificationSummary, stuck: &[String]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Failure Report\n");
    let _ = writeln!(
        out,
        "{} of {} scenarios failing ({} passing).\n",
        summary.failed, summary.total, summary.passed
    );

    for result in summary.failures() {
        write_failure(&mut out, result);
    }

    if !stuck.is_empty() {
        let _ = writeln!(out, "## Stuck scenarios\n");
        let _ = writeln!(out, "These have failed in each of the last iterations:\n");
        for id in stuck {
            let _ = writeln!(out, "- `{}`", id);
        }
        out.push('\n');
    }

    out
}

fn write_failure(out: &mut String, result: &VerificationResult) {
    let _ = writeln!(out, "## {}\n", result.name);
    let _ = writeln!(out, "- File: `{}`", result.scenario);
    let _ = writeln!(out, "- Category: {}", result.category);
    match result.failing_step() {
        Some(step) => {
            let _ = writeln!(out, "- Failed step: {} ({})", step.step, step.description);
        }
        None => {
            let _ = writeln!(out, "- Failed step: none (scenario did not run)");
        }
    }
    let _ = writeln!(out, "- Expected: {}", result.expected);
    let _ = writeln!(out, "- Actual: {}", result.actual);
    if let Some(path) = result.screenshot() {
        let _ = writeln!(out, "- Screenshot: `{}`", path.display());
    }

    if !result.console_logs.is_empty() {
        let _ = writeln!(out, "\nConsole:\n\n```");
        for line in result.console_logs.iter().take(CONSOLE_EXCERPT_LIMIT) {
            let _ = writeln!(out, "{}", line);
        }
        let hidden = result.console_logs.len().saturating_sub(CONSOLE_EXCERPT_LIMIT);
        if hidden > 0 {
            let _ = writeln!(out, "... {} more", hidden);
        }
        let _ = writeln!(out, "```");
    }
    out.push('\n');
}

/// Terminal summary listing every failing scenario with its evidence
pub fn format_summary(summary: &VerificationSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} scenarios: {} passed, {} failed ({:.1}s)",
        summary.total,
        summary.passed,
        summary.failed,
        summary.duration_ms as f64 / 1000.0
    );

    for result in &summary.results {
        let mark = if result.passed { "PASS" } else { "FAIL" };
        let _ = writeln!(out, "  {} {} [{}]", mark, result.name, result.category);
        if result.passed {
            continue;
        }
        if let Some(step) = result.failing_step() {
            let _ = writeln!(out, "       step {}: {}", step.step, step.description);
        }
        let _ = writeln!(out, "       expected: {}", result.expected);
        let _ = writeln!(out, "       actual:   {}", result.actual);
        if let Some(path) = result.screenshot() {
            let _ = writeln!(out, "       evidence: {}", path.display());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::types::StepResult;
    use chrono::Utc;
    use std::time::Duration;

    fn failing() -> VerificationResult {
        let mut step = StepResult::fail(2, "Click Save", "element not found: text=Save");
        step.screenshot = Some("shots/save-step-2.png".into());
        VerificationResult {
            scenario: "scenarios/settings/save.md".to_string(),
            name: "Save settings".to_string(),
            category: "settings".to_string(),
            passed: false,
            steps: vec![StepResult::pass(1, "Open settings"), step],
            failed_step: Some(2),
            expected: "Saved banner appears".to_string(),
            actual: "element not found: text=Save".to_string(),
            console_logs: (1..=7).map(|i| format!("[error] e{i}")).collect(),
            duration_ms: 10,
        }
    }

    fn passing() -> VerificationResult {
        VerificationResult {
            scenario: "scenarios/home.md".to_string(),
            name: "Home".to_string(),
            category: "general".to_string(),
            passed: true,
            steps: vec![StepResult::pass(1, "Open home")],
            failed_step: None,
            expected: String::new(),
            actual: "all steps passed".to_string(),
            console_logs: Vec::new(),
            duration_ms: 5,
        }
    }

    #[test]
    fn test_failure_report_contents() {
        let summary =
            VerificationSummary::new(Utc::now(), vec![passing(), failing()], Duration::from_secs(2));
        let report = failure_report(&summary, &["scenarios/settings/save.md".to_string()]);

        assert!(report.contains("1 of 2 scenarios failing"));
        assert!(report.contains("- File: `scenarios/settings/save.md`"));
        assert!(report.contains("- Failed step: 2 (Click Save)"));
        assert!(report.contains("- Expected: Saved banner appears"));
        assert!(report.contains("- Screenshot: `shots/save-step-2.png`"));
        assert!(report.contains("[error] e5"));
        assert!(!report.contains("[error] e6"));
        assert!(report.contains("... 2 more"));
        assert!(report.contains("## Stuck scenarios"));
        assert!(!report.contains("## Home"));
    }

    #[test]
    fn test_summary_lists_failures_with_evidence() {
        let summary =
            VerificationSummary::new(Utc::now(), vec![passing(), failing()], Duration::from_millis(1500));
        let text = format_summary(&summary);
        assert!(text.starts_with("2 scenarios: 1 passed, 1 failed (1.5s)"));
        assert!(text.contains("PASS Home"));
        assert!(text.contains("FAIL Save settings [settings]"));
        assert!(text.contains("evidence: shots/save-step-2.png"));
    }
}
