//! Scenario → action list translation through one model call.

use std::sync::Arc;
use tracing::debug;

use super::action::{Action, actions_from_json};
use super::types::{RAW_EXCERPT_LIMIT, TranslationError, TranslationResult, truncate};
use crate::llm::{CompletionRequest, LanguageModel, Message};
use crate::scenario::Scenario;

/// Longest DOM snapshot passed along with a scenario
pub const DOM_CONTEXT_LIMIT: usize = 20_000;

pub const SYSTEM_PROMPT: &str = r#"You convert behavioral test scenarios for a web application into browser actions.

Respond with ONLY a JSON array. Each element is an object:
  {"type": "<action>", "selector": "...", "value": "...", "key": "...", "description": "..."}

Action types:
- navigate: go to "value" (absolute URL or a path relative to the base URL)
- click: click the element matched by "selector"
- fill: replace the text of the input matched by "selector" with "value"
- select: choose the option "value" in the <select> matched by "selector"
- wait: "selector" is either a number of milliseconds or an element to wait for; omit it for a short pause
- assert: the element matched by "selector" must be visible; when "value" is given its text must contain "value"
- keyboard: press "key" (e.g. "Enter", "Escape", "Tab"), on "selector" if given, otherwise on the focused element

Selector conventions, in order of preference:
- role=<role>[name="<accessible name>"]   e.g. role=button[name="Save"]
- <role>[name="<accessible name>"]        e.g. heading[name="Dashboard"]
- text=<visible text> or text=/regex/i
- /regex/flags for a visible-text pattern
- placeholder=<text>, label=<text>, testid=<data-testid>
- any CSS selector as a last resort

Every step must be performed and every expected outcome must be checked with an assert.
Start with a navigate action. Write a short description for each action."#;

/// Turns scenarios into action lists using a [`LanguageModel`]
#[derive(Clone)]
pub struct ActionTranslator {
    model: Arc<dyn LanguageModel>,
    model_id: String,
    max_tokens: u32,
}

impl ActionTranslator {
    pub fn new(model: Arc<dyn LanguageModel>, model_id: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model,
            model_id: model_id.into(),
            max_tokens,
        }
    }

    /// Issue exactly one model call and validate the returned actions
    pub async fn translate(
        &self,
        scenario: &Scenario,
        base_url: &str,
        dom: Option<&str>,
    ) -> TranslationResult<Vec<Action>> {
        let request = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            messages: vec![Message::user(build_user_message(scenario, base_url, dom))],
            model: self.model_id.clone(),
            max_tokens: self.max_tokens,
        };

        let response = self.model.complete(request).await?;
        debug!(scenario = %scenario.name, bytes = response.len(), "model responded");
        parse_actions(&response)
    }
}

fn build_user_message(scenario: &Scenario, base_url: &str, dom: Option<&str>) -> String {
    let mut message = format!("Base URL: {base_url}\n\nScenario: {}\n", scenario.name);
    let sections = [
        ("Context", &scenario.context),
        ("Steps", &scenario.steps),
        ("Expected", &scenario.expected),
    ];
    for (title, lines) in sections {
        if lines.is_empty() {
            continue;
        }
        message.push_str(&format!("\n{title}:\n"));
        for (i, line) in lines.iter().enumerate() {
            message.push_str(&format!("{}. {}\n", i + 1, line));
        }
    }
    if let Some(dom) = dom {
        message.push_str("\nCurrent page HTML:\n```html\n");
        message.push_str(&truncate(dom, DOM_CONTEXT_LIMIT));
        message.push_str("\n```\n");
    }
    message
}

/// Strip a surrounding Markdown code fence, if any
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (```json)
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Parse a model response into validated actions
pub fn parse_actions(response: &str) -> TranslationResult<Vec<Action>> {
    let body = strip_code_fence(response);
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| TranslationError::InvalidJson {
            message: e.to_string(),
            raw_excerpt: truncate(response, RAW_EXCERPT_LIMIT),
        })?;
    actions_from_json(value).map_err(|err| match err {
        TranslationError::InvalidJson { message, .. } => TranslationError::InvalidJson {
            message,
            raw_excerpt: truncate(response, RAW_EXCERPT_LIMIT),
        },
        other => other,
    })
}
