use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// A parsed behavioral scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// File the scenario was loaded from; also its identifier
    pub path: PathBuf,

    pub name: String,

    /// Slash-free segment derived from the storage location
    pub category: String,

    /// Preconditions, in order
    pub context: Vec<String>,

    /// Steps, in execution order
    pub steps: Vec<String>,

    /// Expected outcomes, in assertion order
    pub expected: Vec<String>,

    pub metadata: ScenarioMetadata,
}

impl Scenario {
    /// Identifier used in iteration history and failure reports
    pub fn id(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioMetadata {
    pub priority: Priority,
    #[serde(rename = "type")]
    pub kind: ScenarioType,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioType {
    #[default]
    HappyPath,
    EdgeCase,
    FailureMode,
    Infrastructure,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Confidence {
    #[default]
    Direct,
    Expanded,
    Inferred,
}

macro_rules! keyword_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ScenarioError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    other => Err(ScenarioError::InvalidMetadata {
                        field: stringify!($ty),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

keyword_enum!(Priority { High => "high", Medium => "medium", Low => "low" });
keyword_enum!(ScenarioType {
    HappyPath => "happy-path",
    EdgeCase => "edge-case",
    FailureMode => "failure-mode",
    Infrastructure => "infrastructure",
});
keyword_enum!(Confidence { Direct => "direct", Expanded => "expanded", Inferred => "inferred" });

/// Result type for scenario operations
pub type ScenarioResult<T> = Result<T, ScenarioError>;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("no scenarios found in {0}")]
    NoScenarios(PathBuf),

    #[error("filter '{0}' matched no scenarios")]
    NoMatch(String),

    #[error("invalid filter '{pattern}': {message}")]
    InvalidFilter { pattern: String, message: String },

    #[error("{path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid {field} value '{value}'")]
    InvalidMetadata { field: &'static str, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
