//! Iteration loop: coding agent, verification, and the circuit breaker deciding when to stop.

pub mod agent;
pub mod breaker;
pub mod controller;
pub mod prompt;

pub use agent::{AgentConfig, AgentError, AgentOutcome, AgentResult, CliCodingAgent, CodingAgent};
pub use breaker::{BreakerConfig, BreakerDecision, CircuitBreaker, IterationRecord, StopReason};
pub use controller::{IterationController, LoopEnd, LoopOptions, LoopOutcome, LoopState};
pub use prompt::build_prompt;
