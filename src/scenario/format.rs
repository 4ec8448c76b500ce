//! Structured-text scenario format.
//!
//! ```text
//! # User can sign in
//!
//! priority: high
//! type: happy-path
//! confidence: direct
//!
//! ## Context
//! - A registered user exists
//!
//! ## Steps
//! 1. Open the login page
//! 2. Submit valid credentials
//!
//! ## Expected
//! - The dashboard greets the user by name
//! ```
//!
//! Bullet and numbering markers are presentation only; every non-empty line
//! inside a section is one ordered item.

use std::path::Path;

use super::types::{Scenario, ScenarioError, ScenarioMetadata, ScenarioResult};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    Context,
    Steps,
    Expected,
    Other,
}

/// Parse scenario text. `path` and `category` come from the storage location.
pub fn parse_scenario(text: &str, path: &Path, category: &str) -> ScenarioResult<Scenario> {
    let parse_error = |message: String| ScenarioError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let mut name: Option<String> = None;
    let mut metadata = ScenarioMetadata::default();
    let mut context = Vec::new();
    let mut steps = Vec::new();
    let mut expected = Vec::new();
    let mut section = Section::Header;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(heading) = line.strip_prefix("## ") {
            section = match heading.trim().to_ascii_lowercase().as_str() {
                "context" | "preconditions" => Section::Context,
                "steps" => Section::Steps,
                "expected" | "expected outcomes" | "expected results" => Section::Expected,
                _ => Section::Other,
            };
            continue;
        }

        if let Some(title) = line.strip_prefix("# ") {
            if name.is_none() {
                let title = title.trim();
                let title = title.strip_prefix("Scenario:").unwrap_or(title).trim();
                name = Some(title.to_string());
            }
            continue;
        }

        match section {
            Section::Header => {
                let entry = strip_marker(line).replace("**", "");
                let Some((key, value)) = entry.split_once(':') else {
                    continue;
                };
                let invalid = |e: ScenarioError| parse_error(e.to_string());
                match key.trim().to_ascii_lowercase().as_str() {
                    "priority" => metadata.priority = value.parse().map_err(invalid)?,
                    "type" => metadata.kind = value.parse().map_err(invalid)?,
                    "confidence" => metadata.confidence = value.parse().map_err(invalid)?,
                    _ => {}
                }
            }
            Section::Context => context.push(strip_marker(line).to_string()),
            Section::Steps => steps.push(strip_marker(line).to_string()),
            Section::Expected => expected.push(strip_marker(line).to_string()),
            Section::Other => {}
        }
    }

    let name = name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| parse_error("missing '# <name>' title".to_string()))?;
    if steps.is_empty() {
        return Err(parse_error("scenario has no steps".to_string()));
    }

    Ok(Scenario {
        path: path.to_path_buf(),
        name,
        category: category.to_string(),
        context,
        steps,
        expected,
        metadata,
    })
}

/// Render a scenario in the structured-text format
pub fn write_scenario(scenario: &Scenario) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", scenario.name));
    out.push_str(&format!("priority: {}\n", scenario.metadata.priority));
    out.push_str(&format!("type: {}\n", scenario.metadata.kind));
    out.push_str(&format!("confidence: {}\n", scenario.metadata.confidence));

    out.push_str("\n## Context\n");
    for item in &scenario.context {
        out.push_str(&format!("- {}\n", item));
    }

    out.push_str("\n## Steps\n");
    for (i, step) in scenario.steps.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, step));
    }

    out.push_str("\n## Expected\n");
    for item in &scenario.expected {
        out.push_str(&format!("- {}\n", item));
    }
    out
}

/// Remove a leading list marker: `-`, `*`, `+`, `1.`, `1)` or `[ ]`
fn strip_marker(line: &str) -> &str {
    let line = line.trim();
    for bullet in ["- [ ] ", "- [x] ", "- ", "* ", "+ "] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return rest.trim();
        }
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return rest.trim();
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::types::{Confidence, Priority, ScenarioType};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    const SAMPLE: &str = "\
# Scenario: Guest adds item to cart

priority: high
type: edge-case
confidence: expanded

## Context
- The catalog has at least one product

## Steps
1. Open the home page
2) Click the first product
* Press \"Add to cart\"

## Expected
- The cart badge shows 1
+ A toast confirms the addition
";

    #[test]
    fn test_parse_sample() {
        let path = PathBuf::from("scenarios/cart/add.md");
        let scenario = parse_scenario(SAMPLE, &path, "cart").unwrap();

        assert_eq!(scenario.name, "Guest adds item to cart");
        assert_eq!(scenario.category, "cart");
        assert_eq!(scenario.metadata.priority, Priority::High);
        assert_eq!(scenario.metadata.kind, ScenarioType::EdgeCase);
        assert_eq!(scenario.metadata.confidence, Confidence::Expanded);
        assert_eq!(scenario.context, vec!["The catalog has at least one product"]);
        assert_eq!(
            scenario.steps,
            vec![
                "Open the home page",
                "Click the first product",
                "Press \"Add to cart\"",
            ]
        );
        assert_eq!(
            scenario.expected,
            vec!["The cart badge shows 1", "A toast confirms the addition"]
        );
    }

    #[test]
    fn test_write_then_parse_preserves_content() {
        let path = PathBuf::from("s/a.md");
        let original = parse_scenario(SAMPLE, &path, "cart").unwrap();
        let reparsed = parse_scenario(&write_scenario(&original), &path, "cart").unwrap();
        assert_eq!(reparsed, original);
    }

    #[test]
    fn test_metadata_defaults_when_absent() {
        let text = "# Minimal\n\n## Steps\n- do it\n";
        let scenario = parse_scenario(text, Path::new("m.md"), "general").unwrap();
        assert_eq!(scenario.metadata, ScenarioMetadata::default());
        assert!(scenario.context.is_empty());
        assert!(scenario.expected.is_empty());
    }

    #[test]
    fn test_bold_metadata_keys() {
        let text = "# Bold\n- **Priority:** low\n- **Type:** infrastructure\n## Steps\n1. go\n";
        let scenario = parse_scenario(text, Path::new("b.md"), "general").unwrap();
        assert_eq!(scenario.metadata.priority, Priority::Low);
        assert_eq!(scenario.metadata.kind, ScenarioType::Infrastructure);
    }

    #[test]
    fn test_invalid_metadata_is_rejected() {
        let text = "# Bad\npriority: urgent\n## Steps\n1. go\n";
        let err = parse_scenario(text, Path::new("bad.md"), "general").unwrap_err();
        assert!(err.to_string().contains("urgent"));

        for (line, value) in [("type: chaos", "chaos"), ("confidence: certain", "certain")] {
            let text = format!("# Bad\n{line}\n## Steps\n1. go\n");
            let err = parse_scenario(&text, Path::new("bad.md"), "general").unwrap_err();
            let message = err.to_string();
            assert!(message.starts_with("bad.md: "), "{message}");
            assert!(message.contains(value), "{message}");
        }
    }

    #[test]
    fn test_missing_title_or_steps() {
        assert!(parse_scenario("## Steps\n1. go\n", Path::new("x.md"), "g").is_err());
        assert!(parse_scenario("# Title only\n", Path::new("x.md"), "g").is_err());
    }

    #[test]
    fn test_strip_marker() {
        assert_eq!(strip_marker("- item"), "item");
        assert_eq!(strip_marker("12. item"), "item");
        assert_eq!(strip_marker("3) item"), "item");
        assert_eq!(strip_marker("- [ ] todo"), "todo");
        assert_eq!(strip_marker("2024 was a year"), "2024 was a year");
    }
}
