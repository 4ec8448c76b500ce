//! Typed UI actions and their validation from model output.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::{TranslationError, TranslationResult};
use crate::selector::Selector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Navigate,
    Click,
    Fill,
    Select,
    Wait,
    Assert,
    Keyboard,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::Fill => "fill",
            ActionKind::Select => "select",
            ActionKind::Wait => "wait",
            ActionKind::Assert => "assert",
            ActionKind::Keyboard => "keyboard",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        Some(match value.trim().to_ascii_lowercase().as_str() {
            "navigate" => ActionKind::Navigate,
            "click" => ActionKind::Click,
            "fill" => ActionKind::Fill,
            "select" => ActionKind::Select,
            "wait" => ActionKind::Wait,
            "assert" => ActionKind::Assert,
            "keyboard" => ActionKind::Keyboard,
            _ => return None,
        })
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete browser interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    /// URL for navigate, text for fill/assert, option for select
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Key name for keyboard
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Human-readable description used in reports
    pub description: String,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            selector: None,
            value: None,
            key: None,
            description: String::new(),
        }
    }

    pub fn navigate(url: &str) -> Self {
        Self::new(ActionKind::Navigate)
            .with_value(url)
            .describe(format!("Navigate to {url}"))
    }

    pub fn click(selector: &str) -> Self {
        Self::new(ActionKind::Click)
            .with_selector(selector)
            .describe(format!("Click {selector}"))
    }

    pub fn fill(selector: &str, value: &str) -> Self {
        Self::new(ActionKind::Fill)
            .with_selector(selector)
            .with_value(value)
            .describe(format!("Fill {selector} with \"{value}\""))
    }

    pub fn assert_visible(selector: &str) -> Self {
        Self::new(ActionKind::Assert)
            .with_selector(selector)
            .describe(format!("{selector} is visible"))
    }

    pub fn assert_text(selector: &str, text: &str) -> Self {
        Self::new(ActionKind::Assert)
            .with_selector(selector)
            .with_value(text)
            .describe(format!("{selector} contains \"{text}\""))
    }

    pub fn with_selector(mut self, selector: &str) -> Self {
        self.selector = Some(selector.to_string());
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The classified selector, when present
    pub fn target(&self) -> Option<Selector> {
        self.selector.as_deref().map(Selector::parse)
    }

    /// Description for reporting, synthesized when the model left it empty
    pub fn label(&self) -> String {
        if !self.description.trim().is_empty() {
            return self.description.clone();
        }
        match (&self.selector, &self.value, &self.key) {
            (Some(sel), Some(val), _) => format!("{} {} \"{}\"", self.kind, sel, val),
            (Some(sel), None, _) => format!("{} {}", self.kind, sel),
            (None, Some(val), _) => format!("{} {}", self.kind, val),
            (None, None, Some(key)) => format!("{} {}", self.kind, key),
            (None, None, None) => self.kind.to_string(),
        }
    }
}

/// Loosely-typed action as the model emits it
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAction {
    #[serde(rename = "type", alias = "action")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub selector: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub value: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub key: Option<String>,
    pub description: Option<String>,
}

/// Accept numbers and booleans where a string is expected (`"value": 500`)
fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(serde_json::Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected a string, got {}",
            json_kind(&other)
        ))),
    }
}

impl RawAction {
    /// Validate required fields for the declared type
    pub fn validate(self, index: usize) -> TranslationResult<Action> {
        let invalid = |message: String| TranslationError::InvalidAction { index, message };

        let raw_kind = non_empty(self.kind).ok_or_else(|| invalid("missing \"type\"".into()))?;
        let kind = ActionKind::parse(&raw_kind)
            .ok_or_else(|| invalid(format!("unknown action type \"{raw_kind}\"")))?;

        let selector = non_empty(self.selector);
        let value = self.value;
        let key = non_empty(self.key);

        let require_selector = |selector: &Option<String>| {
            if selector.is_none() {
                Err(invalid(format!("{kind} requires a selector")))
            } else {
                Ok(())
            }
        };
        let require_value = |value: &Option<String>| {
            if value.is_none() {
                Err(invalid(format!("{kind} requires a value")))
            } else {
                Ok(())
            }
        };

        let key = match kind {
            ActionKind::Navigate => {
                if value.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    return Err(invalid("navigate requires a URL value".into()));
                }
                key
            }
            ActionKind::Click | ActionKind::Assert => {
                require_selector(&selector)?;
                key
            }
            ActionKind::Fill | ActionKind::Select => {
                require_selector(&selector)?;
                require_value(&value)?;
                key
            }
            ActionKind::Keyboard => {
                let key = key.or_else(|| non_empty(value.clone()));
                if key.is_none() {
                    return Err(invalid("keyboard requires a key".into()));
                }
                key
            }
            ActionKind::Wait => key,
        };

        Ok(Action {
            kind,
            selector,
            value,
            key,
            description: self.description.unwrap_or_default(),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Decode a JSON array of actions, validating each entry
pub fn actions_from_json(value: serde_json::Value) -> TranslationResult<Vec<Action>> {
    let items = match value {
        serde_json::Value::Array(items) => items,
        other => {
            return Err(TranslationError::InvalidJson {
                message: format!("expected a JSON array, got {}", json_kind(&other)),
                raw_excerpt: String::new(),
            });
        }
    };
    if items.is_empty() {
        return Err(TranslationError::Empty);
    }

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let raw: RawAction = serde_json::from_value(item).map_err(|e| {
                TranslationError::InvalidAction {
                    index,
                    message: e.to_string(),
                }
            })?;
            raw.validate(index)
        })
        .collect()
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_actions_decode() {
        let actions = actions_from_json(json!([
            {"type": "navigate", "value": "/", "description": "Open home"},
            {"type": "fill", "selector": "placeholder=Email", "value": "a@b.c"},
            {"type": "keyboard", "value": "Enter"},
            {"type": "wait", "selector": 500},
            {"type": "assert", "selector": "role=heading[name=\"Home\"]"}
        ]))
        .unwrap();

        assert_eq!(actions.len(), 5);
        assert_eq!(actions[0].kind, ActionKind::Navigate);
        assert_eq!(actions[0].description, "Open home");
        assert_eq!(actions[2].key.as_deref(), Some("Enter"));
        assert_eq!(actions[3].selector.as_deref(), Some("500"));
        assert_eq!(actions[4].label(), "assert role=heading[name=\"Home\"]");
    }

    #[test]
    fn test_missing_required_fields_are_rejected() {
        let cases = [
            json!([{"type": "navigate"}]),
            json!([{"type": "click"}]),
            json!([{"type": "fill", "selector": "#email"}]),
            json!([{"type": "select", "value": "x"}]),
            json!([{"type": "keyboard"}]),
            json!([{"type": "hover", "selector": "#x"}]),
            json!([{"selector": "#x"}]),
        ];
        for case in cases {
            let err = actions_from_json(case.clone()).unwrap_err();
            assert!(
                matches!(err, TranslationError::InvalidAction { index: 0, .. }),
                "{case} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_error_carries_failing_index() {
        let err = actions_from_json(json!([
            {"type": "navigate", "value": "/"},
            {"type": "click", "selector": "text=Go"},
            {"type": "fill", "value": "x"}
        ]))
        .unwrap_err();
        assert!(matches!(err, TranslationError::InvalidAction { index: 2, .. }));
    }

    #[test]
    fn test_shape_mismatch_is_an_error_not_a_panic() {
        assert!(matches!(
            actions_from_json(json!([42])),
            Err(TranslationError::InvalidAction { index: 0, .. })
        ));
        assert!(matches!(
            actions_from_json(json!({"type": "click"})),
            Err(TranslationError::InvalidJson { .. })
        ));
        assert!(matches!(actions_from_json(json!([])), Err(TranslationError::Empty)));
    }

    #[test]
    fn test_action_serializes_with_type_tag() {
        let value = serde_json::to_value(Action::click("text=Save")).unwrap();
        assert_eq!(value["type"], "click");
        assert_eq!(value["selector"], "text=Save");
        assert!(value.get("value").is_none());
    }
}
