use regex::RegexBuilder;
use std::fs;
use std::path::{Path, PathBuf};

use super::format::{parse_scenario, write_scenario};
use super::types::{Scenario, ScenarioError, ScenarioResult};

/// Category used for scenarios stored directly in the root directory
pub const ROOT_CATEGORY: &str = "general";

/// File extension of scenario files
pub const SCENARIO_EXTENSION: &str = "md";

/// Load every scenario under `root`, recursively, sorted by path.
///
/// Fails with [`ScenarioError::NoScenarios`] when nothing is found.
pub fn load_scenarios(root: &Path) -> ScenarioResult<Vec<Scenario>> {
    let mut files = Vec::new();
    if root.is_dir() {
        collect_files(root, &mut files)?;
    }
    files.sort();

    let mut scenarios = Vec::with_capacity(files.len());
    for path in files {
        let text = fs::read_to_string(&path)?;
        let category = category_for(root, &path);
        scenarios.push(parse_scenario(&text, &path, &category)?);
    }

    if scenarios.is_empty() {
        return Err(ScenarioError::NoScenarios(root.to_path_buf()));
    }
    tracing::debug!(count = scenarios.len(), root = %root.display(), "loaded scenarios");
    Ok(scenarios)
}

/// Keep scenarios whose name, category or path matches `pattern` (case-insensitive).
///
/// Fails with [`ScenarioError::NoMatch`] if the filter eliminates everything.
pub fn filter_scenarios(scenarios: Vec<Scenario>, pattern: &str) -> ScenarioResult<Vec<Scenario>> {
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| ScenarioError::InvalidFilter {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

    let matched: Vec<Scenario> = scenarios
        .into_iter()
        .filter(|s| {
            regex.is_match(&s.name)
                || regex.is_match(&s.category)
                || regex.is_match(&s.path.to_string_lossy())
        })
        .collect();

    if matched.is_empty() {
        return Err(ScenarioError::NoMatch(pattern.to_string()));
    }
    Ok(matched)
}

/// Write a scenario to its `path`, creating parent directories
pub fn save_scenario(scenario: &Scenario) -> ScenarioResult<()> {
    if let Some(parent) = scenario.path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&scenario.path, write_scenario(scenario))?;
    Ok(())
}

/// Category derived from the directories between `root` and the file
pub fn category_for(root: &Path, path: &Path) -> String {
    let relative_parent = path
        .parent()
        .and_then(|parent| parent.strip_prefix(root).ok())
        .map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("-")
        })
        .unwrap_or_default();

    if relative_parent.is_empty() {
        ROOT_CATEGORY.to_string()
    } else {
        relative_parent
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let hidden = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with('.'))
            .unwrap_or(false);
        if hidden {
            continue;
        }
        // file_type does not follow symlinks, so linked directories are skipped
        let file_type = entry.file_type()?;
        let is_scenario = path.extension().is_some_and(|e| e == SCENARIO_EXTENSION);
        if file_type.is_dir() {
            collect_files(&path, out)?;
        } else if is_scenario && path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}
