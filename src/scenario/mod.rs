pub mod format;
pub mod loader;
pub mod types;

pub use format::{parse_scenario, write_scenario};
pub use loader::{category_for, filter_scenarios, load_scenarios, save_scenario, ROOT_CATEGORY};
pub use types::{
    Confidence, Priority, Scenario, ScenarioError, ScenarioMetadata, ScenarioResult, ScenarioType,
};
