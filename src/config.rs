//! Configuration management with environment variable support.
//!
//! Every tunable of the verifier and the iteration loop can be set through an
//! environment variable; CLI flags override these in turn.
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SCENARIO_LOOP_LLM_ENDPOINT` | Model API endpoint URL | `https://api.anthropic.com/v1/messages` |
//! | `SCENARIO_LOOP_LLM_FLAVOR` | `anthropic` or `openai` request format | `anthropic` |
//! | `SCENARIO_LOOP_LLM_MODEL` | Model identifier | `claude-sonnet-4-5` |
//! | `SCENARIO_LOOP_LLM_API_KEY` | API key (falls back to `ANTHROPIC_API_KEY` / `OPENAI_API_KEY`) | none |
//! | `SCENARIO_LOOP_LLM_MAX_TOKENS` | Maximum tokens in a model response | `4096` |
//! | `SCENARIO_LOOP_LLM_TIMEOUT` | Model request timeout in seconds | `120` |
//! | `SCENARIO_LOOP_HEADED` | Run Chrome with a visible window when `1`/`true` | `false` |
//! | `SCENARIO_LOOP_CHROME` | Chrome/Chromium executable path | auto-detect |
//! | `SCENARIO_LOOP_ACTION_TIMEOUT` | Per-action timeout in milliseconds | `10000` |
//! | `SCENARIO_LOOP_DEFAULT_WAIT` | Wait used by selector-less `wait` actions (ms) | `1000` |
//! | `SCENARIO_LOOP_BASE_URL` | Origin of the application under test | `http://localhost:3000` |
//! | `SCENARIO_LOOP_START_COMMAND` | Command that starts the application | none |
//! | `SCENARIO_LOOP_SETUP_COMMAND` | One-shot command run before verification | none |
//! | `SCENARIO_LOOP_AGENT` | Coding agent executable | `claude` |
//! | `SCENARIO_LOOP_AGENT_TIMEOUT` | Coding agent hard timeout in seconds | `600` |
//! | `SCENARIO_LOOP_AGENT_ARGS` | Extra whitespace-separated agent arguments | none |
//! | `SCENARIO_LOOP_MAX_ITERATIONS` | Maximum loop iterations | `10` |
//! | `SCENARIO_LOOP_MIN_ITERATIONS` | Records required before the circuit breaker may stop | `3` |
//! | `SCENARIO_LOOP_STAGNATION_WINDOW` | Identical failure counts that mean no progress | `5` |
//! | `SCENARIO_LOOP_REGRESSION_MARGIN` | Failures above the best count that mean regression | `3` |
//! | `SCENARIO_LOOP_OSCILLATION_WINDOW` | Records compared for alternating failing sets | `4` |
//! | `SCENARIO_LOOP_STUCK_WINDOW` | Iterations a scenario must fail to be reported stuck | `3` |
//! | `SCENARIO_LOOP_SESSION_DIR` | Base directory for run artifacts | `.scenario-loop` |
//!
//! # Example
//!
//! ```bash
//! export SCENARIO_LOOP_LLM_FLAVOR=openai
//! export SCENARIO_LOOP_LLM_ENDPOINT="http://127.0.0.1:8080/v1/chat/completions"
//! export SCENARIO_LOOP_START_COMMAND="npm run dev"
//! ```

use std::env;
use std::sync::OnceLock;

// ============================================================================
// Default Values
// ============================================================================

/// Default model API endpoint
pub const DEFAULT_LLM_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";

/// Default model API flavor
pub const DEFAULT_LLM_FLAVOR: &str = "anthropic";

/// Default model identifier
pub const DEFAULT_LLM_MODEL: &str = "claude-sonnet-4-5";

/// Default max tokens for model responses
pub const DEFAULT_LLM_MAX_TOKENS: u32 = 4096;

/// Default model request timeout (seconds)
pub const DEFAULT_LLM_TIMEOUT: u64 = 120;

/// Default per-action timeout (milliseconds)
pub const DEFAULT_ACTION_TIMEOUT_MS: u64 = 10_000;

/// Default sleep for `wait` actions without a selector (milliseconds)
pub const DEFAULT_WAIT_MS: u64 = 1_000;

/// Default origin of the application under test
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Upper bound on waiting for a freshly started application (seconds)
pub const DEFAULT_SERVER_READY_TIMEOUT: u64 = 90;

/// Interval between reachability probes (milliseconds)
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 500;

/// Default coding agent executable
pub const DEFAULT_AGENT_PROGRAM: &str = "claude";

/// Default coding agent hard timeout (seconds)
pub const DEFAULT_AGENT_TIMEOUT: u64 = 600;

/// Tools the coding agent may use without asking
pub const DEFAULT_AGENT_ALLOWED_TOOLS: &[&str] = &["Read", "Edit", "Write", "Glob", "Grep", "Bash"];

/// Default maximum number of loop iterations
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Default circuit breaker thresholds
pub const DEFAULT_MIN_ITERATIONS: usize = 3;
pub const DEFAULT_STAGNATION_WINDOW: usize = 5;
pub const DEFAULT_REGRESSION_MARGIN: usize = 3;
pub const DEFAULT_OSCILLATION_WINDOW: usize = 4;
pub const DEFAULT_STUCK_WINDOW: usize = 3;

/// Default session base directory
pub const DEFAULT_SESSION_DIR: &str = ".scenario-loop";

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_LLM_ENDPOINT: &str = "SCENARIO_LOOP_LLM_ENDPOINT";
pub const ENV_LLM_FLAVOR: &str = "SCENARIO_LOOP_LLM_FLAVOR";
pub const ENV_LLM_MODEL: &str = "SCENARIO_LOOP_LLM_MODEL";
pub const ENV_LLM_API_KEY: &str = "SCENARIO_LOOP_LLM_API_KEY";
pub const ENV_LLM_MAX_TOKENS: &str = "SCENARIO_LOOP_LLM_MAX_TOKENS";
pub const ENV_LLM_TIMEOUT: &str = "SCENARIO_LOOP_LLM_TIMEOUT";
pub const ENV_HEADED: &str = "SCENARIO_LOOP_HEADED";
pub const ENV_CHROME: &str = "SCENARIO_LOOP_CHROME";
pub const ENV_ACTION_TIMEOUT: &str = "SCENARIO_LOOP_ACTION_TIMEOUT";
pub const ENV_DEFAULT_WAIT: &str = "SCENARIO_LOOP_DEFAULT_WAIT";
pub const ENV_BASE_URL: &str = "SCENARIO_LOOP_BASE_URL";
pub const ENV_START_COMMAND: &str = "SCENARIO_LOOP_START_COMMAND";
pub const ENV_SETUP_COMMAND: &str = "SCENARIO_LOOP_SETUP_COMMAND";
pub const ENV_AGENT: &str = "SCENARIO_LOOP_AGENT";
pub const ENV_AGENT_TIMEOUT: &str = "SCENARIO_LOOP_AGENT_TIMEOUT";
pub const ENV_AGENT_ARGS: &str = "SCENARIO_LOOP_AGENT_ARGS";
pub const ENV_MAX_ITERATIONS: &str = "SCENARIO_LOOP_MAX_ITERATIONS";
pub const ENV_MIN_ITERATIONS: &str = "SCENARIO_LOOP_MIN_ITERATIONS";
pub const ENV_STAGNATION_WINDOW: &str = "SCENARIO_LOOP_STAGNATION_WINDOW";
pub const ENV_REGRESSION_MARGIN: &str = "SCENARIO_LOOP_REGRESSION_MARGIN";
pub const ENV_OSCILLATION_WINDOW: &str = "SCENARIO_LOOP_OSCILLATION_WINDOW";
pub const ENV_STUCK_WINDOW: &str = "SCENARIO_LOOP_STUCK_WINDOW";
pub const ENV_SESSION_DIR: &str = "SCENARIO_LOOP_SESSION_DIR";

// Provider-native key variables, consulted when ours is unset
const ENV_ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmSettings,
    pub browser: BrowserSettings,
    pub server: ServerSettings,
    pub agent: AgentSettings,
    pub looping: LoopSettings,
    pub session: SessionSettings,
}

/// Model API settings
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// API endpoint URL
    pub endpoint: String,
    /// Request format (`anthropic` or `openai`)
    pub flavor: String,
    /// Model identifier
    pub model: String,
    /// API key, if any
    pub api_key: Option<String>,
    /// Maximum tokens in response
    pub max_tokens: u32,
    /// Request timeout (seconds)
    pub timeout: u64,
}

/// Browser settings
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub headless: bool,
    pub executable: Option<String>,
    /// Per-action timeout (milliseconds)
    pub action_timeout_ms: u64,
    /// Fallback wait duration (milliseconds)
    pub default_wait_ms: u64,
}

/// Application-under-test settings
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub base_url: String,
    pub start_command: Option<String>,
    pub setup_command: Option<String>,
    /// Readiness bound after starting the application (seconds)
    pub ready_timeout: u64,
    /// Probe interval (milliseconds)
    pub probe_interval_ms: u64,
}

/// Coding agent settings
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub program: String,
    /// Extra arguments placed before the prompt
    pub args: Vec<String>,
    pub allowed_tools: Vec<String>,
    /// Hard timeout (seconds)
    pub timeout: u64,
}

/// Iteration loop and circuit breaker settings
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub max_iterations: u32,
    pub min_iterations: usize,
    pub stagnation_window: usize,
    pub regression_margin: usize,
    pub oscillation_window: usize,
    pub stuck_window: usize,
}

/// Session-related settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Base directory for session storage
    pub base_dir: String,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            llm: LlmSettings::from_env(),
            browser: BrowserSettings::from_env(),
            server: ServerSettings::from_env(),
            agent: AgentSettings::from_env(),
            looping: LoopSettings::from_env(),
            session: SessionSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            llm: LlmSettings::defaults(),
            browser: BrowserSettings::defaults(),
            server: ServerSettings::defaults(),
            agent: AgentSettings::defaults(),
            looping: LoopSettings::defaults(),
            session: SessionSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl LlmSettings {
    pub fn from_env() -> Self {
        let flavor = env::var(ENV_LLM_FLAVOR).unwrap_or_else(|_| DEFAULT_LLM_FLAVOR.to_string());
        let native_key = if flavor.eq_ignore_ascii_case("openai") {
            ENV_OPENAI_API_KEY
        } else {
            ENV_ANTHROPIC_API_KEY
        };
        Self {
            endpoint: env::var(ENV_LLM_ENDPOINT)
                .unwrap_or_else(|_| DEFAULT_LLM_ENDPOINT.to_string()),
            model: env::var(ENV_LLM_MODEL).unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
            api_key: env::var(ENV_LLM_API_KEY)
                .or_else(|_| env::var(native_key))
                .ok()
                .filter(|key| !key.trim().is_empty()),
            max_tokens: parse_env(ENV_LLM_MAX_TOKENS).unwrap_or(DEFAULT_LLM_MAX_TOKENS),
            timeout: parse_env(ENV_LLM_TIMEOUT).unwrap_or(DEFAULT_LLM_TIMEOUT),
            flavor,
        }
    }

    pub fn defaults() -> Self {
        Self {
            endpoint: DEFAULT_LLM_ENDPOINT.to_string(),
            flavor: DEFAULT_LLM_FLAVOR.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            api_key: None,
            max_tokens: DEFAULT_LLM_MAX_TOKENS,
            timeout: DEFAULT_LLM_TIMEOUT,
        }
    }
}

impl BrowserSettings {
    pub fn from_env() -> Self {
        Self {
            headless: !env::var(ENV_HEADED).map(|v| parse_flag(&v)).unwrap_or(false),
            executable: env::var(ENV_CHROME).ok().filter(|p| !p.is_empty()),
            action_timeout_ms: parse_env(ENV_ACTION_TIMEOUT).unwrap_or(DEFAULT_ACTION_TIMEOUT_MS),
            default_wait_ms: parse_env(ENV_DEFAULT_WAIT).unwrap_or(DEFAULT_WAIT_MS),
        }
    }

    pub fn defaults() -> Self {
        Self {
            headless: true,
            executable: None,
            action_timeout_ms: DEFAULT_ACTION_TIMEOUT_MS,
            default_wait_ms: DEFAULT_WAIT_MS,
        }
    }
}

impl ServerSettings {
    pub fn from_env() -> Self {
        Self {
            base_url: env::var(ENV_BASE_URL).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            start_command: env::var(ENV_START_COMMAND).ok().filter(|c| !c.is_empty()),
            setup_command: env::var(ENV_SETUP_COMMAND).ok().filter(|c| !c.is_empty()),
            ready_timeout: DEFAULT_SERVER_READY_TIMEOUT,
            probe_interval_ms: DEFAULT_PROBE_INTERVAL_MS,
        }
    }

    pub fn defaults() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            start_command: None,
            setup_command: None,
            ready_timeout: DEFAULT_SERVER_READY_TIMEOUT,
            probe_interval_ms: DEFAULT_PROBE_INTERVAL_MS,
        }
    }
}

impl AgentSettings {
    pub fn from_env() -> Self {
        Self {
            program: env::var(ENV_AGENT).unwrap_or_else(|_| DEFAULT_AGENT_PROGRAM.to_string()),
            args: env::var(ENV_AGENT_ARGS)
                .map(|a| a.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            allowed_tools: default_allowed_tools(),
            timeout: parse_env(ENV_AGENT_TIMEOUT).unwrap_or(DEFAULT_AGENT_TIMEOUT),
        }
    }

    pub fn defaults() -> Self {
        Self {
            program: DEFAULT_AGENT_PROGRAM.to_string(),
            args: Vec::new(),
            allowed_tools: default_allowed_tools(),
            timeout: DEFAULT_AGENT_TIMEOUT,
        }
    }
}

impl LoopSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source; unset or unparsable values keep defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::defaults();
        Self {
            max_iterations: parse_with(&lookup, ENV_MAX_ITERATIONS).unwrap_or(defaults.max_iterations),
            min_iterations: parse_with(&lookup, ENV_MIN_ITERATIONS).unwrap_or(defaults.min_iterations),
            stagnation_window: parse_with(&lookup, ENV_STAGNATION_WINDOW)
                .unwrap_or(defaults.stagnation_window),
            regression_margin: parse_with(&lookup, ENV_REGRESSION_MARGIN)
                .unwrap_or(defaults.regression_margin),
            oscillation_window: parse_with(&lookup, ENV_OSCILLATION_WINDOW)
                .unwrap_or(defaults.oscillation_window),
            stuck_window: parse_with(&lookup, ENV_STUCK_WINDOW).unwrap_or(defaults.stuck_window),
        }
    }

    pub fn defaults() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            min_iterations: DEFAULT_MIN_ITERATIONS,
            stagnation_window: DEFAULT_STAGNATION_WINDOW,
            regression_margin: DEFAULT_REGRESSION_MARGIN,
            oscillation_window: DEFAULT_OSCILLATION_WINDOW,
            stuck_window: DEFAULT_STUCK_WINDOW,
        }
    }
}

impl SessionSettings {
    pub fn from_env() -> Self {
        Self {
            base_dir: env::var(ENV_SESSION_DIR).unwrap_or_else(|_| DEFAULT_SESSION_DIR.to_string()),
        }
    }

    pub fn defaults() -> Self {
        Self {
            base_dir: DEFAULT_SESSION_DIR.to_string(),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    parse_with(|name| env::var(name).ok(), name)
}

fn parse_with<T: std::str::FromStr>(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    lookup(name).and_then(|s| s.trim().parse().ok())
}

/// Interpret common truthy spellings
fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn default_allowed_tools() -> Vec<String> {
    DEFAULT_AGENT_ALLOWED_TOOLS.iter().map(|t| t.to_string()).collect()
}

/// Extract the port from a base URL, using the scheme default when absent
pub fn port_from_url(base_url: &str) -> Option<u16> {
    url::Url::parse(base_url).ok()?.port_or_known_default()
}
