use std::fmt::Write as _;
use std::path::Path;

/// Build the coding-agent prompt for one iteration.
///
/// The first iteration gets the task framing only; later ones append the most
/// recent failure report.
pub fn build_prompt(iteration: u32, scenarios_dir: &Path, failure_report: Option<&str>) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "# Iteration {iteration}\n");
    let _ = writeln!(
        prompt,
        "Make this web application satisfy every behavioral scenario in `{}`.",
        scenarios_dir.display()
    );
    let _ = writeln!(
        prompt,
        "Each scenario file lists its context, the steps a user takes, and the expected outcomes. \
         After you finish, every scenario is verified in a real browser."
    );
    prompt.push('\n');
    let _ = writeln!(prompt, "Rules:");
    let _ = writeln!(prompt, "- Change application code, not the scenario files.");
    let _ = writeln!(
        prompt,
        "- Keep visible text and accessible names (headings, buttons, labels) matching the scenarios."
    );
    let _ = writeln!(prompt, "- Do not break scenarios that already pass.");

    match failure_report {
        Some(report) if !report.trim().is_empty() => {
            let _ = writeln!(prompt, "\n## Results of the previous verification\n");
            prompt.push_str(report.trim_end());
            prompt.push('\n');
            let _ = writeln!(
                prompt,
                "\nFix the failures above, starting with the scenarios that have been stuck longest."
            );
        }
        _ => {
            let _ = writeln!(
                prompt,
                "\nStart by reading the scenarios, then implement what they describe."
            );
        }
    }

    prompt
}
