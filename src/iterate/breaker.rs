//! Circuit breaker over the iteration history.
//!
//! Evaluated after each new record, in order, first match wins:
//!
//! 1. **Stagnation**: the last `stagnation_window` records all have the same
//!    nonzero failure count.
//! 2. **Regression**: the current failure count exceeds the previous one and
//!    exceeds the best count seen so far by more than `regression_margin`.
//! 3. **Oscillation**: the last `oscillation_window` failing sets alternate
//!    between two different sets. With the default window of four records
//!    A, B, C, D that is A = C, B = D and A ≠ B.
//!
//! Nothing can stop the loop before `min_iterations` records exist.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::config;
use crate::verify::VerificationSummary;

/// Detector thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    pub min_iterations: usize,
    pub stagnation_window: usize,
    pub regression_margin: usize,
    /// Records compared by the oscillation check; below 3 disables it
    pub oscillation_window: usize,
    pub stuck_window: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        let cfg = config::LoopSettings::defaults();
        Self {
            min_iterations: cfg.min_iterations,
            stagnation_window: cfg.stagnation_window,
            regression_margin: cfg.regression_margin,
            oscillation_window: cfg.oscillation_window,
            stuck_window: cfg.stuck_window,
        }
    }
}

impl BreakerConfig {
    /// Thresholds from the loop settings
    pub fn from_config() -> Self {
        let cfg = &config::get().looping;
        Self {
            min_iterations: cfg.min_iterations,
            stagnation_window: cfg.stagnation_window,
            regression_margin: cfg.regression_margin,
            oscillation_window: cfg.oscillation_window,
            stuck_window: cfg.stuck_window,
        }
    }
}

/// Outcome of one verified iteration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub passed: usize,
    pub failed: usize,
    /// Identifiers (file paths) of failing scenarios
    pub failing: BTreeSet<String>,
}

impl IterationRecord {
    pub fn new(iteration: u32, passed: usize, failing: BTreeSet<String>) -> Self {
        Self {
            iteration,
            passed,
            failed: failing.len(),
            failing,
        }
    }

    pub fn from_summary(iteration: u32, summary: &VerificationSummary) -> Self {
        Self {
            iteration,
            passed: summary.passed,
            failed: summary.failed,
            failing: summary.failing_ids(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// Same nonzero failure count for a whole window
    Stagnation { failed: usize, window: usize },
    /// Failure count jumped well past the best seen
    Regression {
        current: usize,
        previous: usize,
        best: usize,
    },
    /// Alternating between two failing sets
    Oscillation,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Stagnation { failed, window } => write!(
                f,
                "no progress: {} failures in each of the last {} iterations",
                failed, window
            ),
            StopReason::Regression {
                current,
                previous,
                best,
            } => write!(
                f,
                "regression: {} failures, up from {} (best {})",
                current, previous, best
            ),
            StopReason::Oscillation => {
                write!(f, "oscillation: alternating between two sets of failures")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerDecision {
    Continue,
    Stop(StopReason),
}

/// Append-only history plus the stop checks
#[derive(Debug, Clone, Default)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    history: Vec<IterationRecord>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            history: Vec::new(),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn history(&self) -> &[IterationRecord] {
        &self.history
    }

    /// Append a record and evaluate
    pub fn record(&mut self, record: IterationRecord) -> BreakerDecision {
        self.history.push(record);
        self.evaluate()
    }

    pub fn evaluate(&self) -> BreakerDecision {
        if self.history.len() < self.config.min_iterations.max(1) {
            return BreakerDecision::Continue;
        }

        let checks = [self.stagnation(), self.regression(), self.oscillation()];
        match checks.into_iter().flatten().next() {
            Some(reason) => BreakerDecision::Stop(reason),
            None => BreakerDecision::Continue,
        }
    }

    fn stagnation(&self) -> Option<StopReason> {
        let window = self.config.stagnation_window;
        if window == 0 || self.history.len() < window {
            return None;
        }
        let recent = &self.history[self.history.len() - window..];
        let failed = recent[0].failed;
        if failed > 0 && recent.iter().all(|r| r.failed == failed) {
            Some(StopReason::Stagnation { failed, window })
        } else {
            None
        }
    }

    fn regression(&self) -> Option<StopReason> {
        let [.., previous, current] = self.history.as_slice() else {
            return None;
        };
        let best = self.history.iter().map(|r| r.failed).min()?;
        if current.failed > previous.failed && current.failed > best + self.config.regression_margin {
            Some(StopReason::Regression {
                current: current.failed,
                previous: previous.failed,
                best,
            })
        } else {
            None
        }
    }

    fn oscillation(&self) -> Option<StopReason> {
        let window = self.config.oscillation_window;
        if window < 3 || self.history.len() < window {
            return None;
        }
        let recent = &self.history[self.history.len() - window..];
        let alternating = recent
            .iter()
            .zip(&recent[2..])
            .all(|(earlier, later)| earlier.failing == later.failing);
        if alternating && recent[0].failing != recent[1].failing {
            Some(StopReason::Oscillation)
        } else {
            None
        }
    }

    /// Scenarios failing in every one of the last `stuck_window` records
    pub fn stuck_scenarios(&self) -> BTreeSet<String> {
        let window = self.config.stuck_window;
        if window == 0 || self.history.len() < window {
            return BTreeSet::new();
        }
        let mut recent = self.history[self.history.len() - window..].iter();
        let Some(first) = recent.next() else {
            return BTreeSet::new();
        };
        recent.fold(first.failing.clone(), |acc, r| {
            acc.intersection(&r.failing).cloned().collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    /// Records whose failing sets are `f0..f<count>`
    fn counts(failed: &[usize]) -> Vec<IterationRecord> {
        failed
            .iter()
            .enumerate()
            .map(|(i, &n)| {
                let failing = (0..n).map(|k| format!("f{k}.md")).collect();
                IterationRecord::new(i as u32 + 1, 10, failing)
            })
            .collect()
    }

    fn sets(sets: &[&[&str]]) -> Vec<IterationRecord> {
        sets.iter()
            .enumerate()
            .map(|(i, s)| IterationRecord::new(i as u32 + 1, 0, ids(s)))
            .collect()
    }

    fn run(records: Vec<IterationRecord>) -> BreakerDecision {
        let mut breaker = CircuitBreaker::new(BreakerConfig::default());
        let mut decision = BreakerDecision::Continue;
        for record in records {
            decision = breaker.record(record);
        }
        decision
    }

    #[test]
    fn test_needs_minimum_iterations() {
        // 1 → 9 would be a regression, but only two records exist
        assert_eq!(run(counts(&[1, 9])), BreakerDecision::Continue);
        assert!(matches!(run(counts(&[1, 1, 9])), BreakerDecision::Stop(_)));
    }

    #[test]
    fn test_stagnation() {
        let decision = run(counts(&[7, 5, 3, 3, 3, 3, 3]));
        assert_eq!(
            decision,
            BreakerDecision::Stop(StopReason::Stagnation {
                failed: 3,
                window: 5
            })
        );
    }

    #[test]
    fn test_stagnation_broken_by_any_one_different_count() {
        for position in 2..7 {
            let mut failed = vec![7, 5, 3, 3, 3, 3, 3];
            failed[position] = 4;
            assert_eq!(
                run(counts(&failed)),
                BreakerDecision::Continue,
                "count changed at index {position}"
            );
        }
    }

    #[test]
    fn test_zero_failures_never_stagnate() {
        let breaker = {
            let mut b = CircuitBreaker::new(BreakerConfig::default());
            for r in counts(&[0, 0, 0, 0, 0]) {
                b.record(r);
            }
            b
        };
        assert_eq!(breaker.stagnation(), None);
    }

    #[test]
    fn test_regression() {
        assert_eq!(
            run(counts(&[10, 6, 4, 4, 9])),
            BreakerDecision::Stop(StopReason::Regression {
                current: 9,
                previous: 4,
                best: 4
            })
        );
        assert_eq!(run(counts(&[10, 6, 4, 4, 7])), BreakerDecision::Continue);
    }

    #[test]
    fn test_regression_margin_is_configurable() {
        let mut breaker = CircuitBreaker::new(BreakerConfig {
            regression_margin: 1,
            ..Default::default()
        });
        let mut decision = BreakerDecision::Continue;
        for r in counts(&[10, 6, 4, 4, 6]) {
            decision = breaker.record(r);
        }
        assert!(matches!(decision, BreakerDecision::Stop(StopReason::Regression { .. })));
    }

    #[test]
    fn test_oscillation() {
        assert_eq!(
            run(sets(&[&["a"], &["b"], &["a"], &["b"]])),
            BreakerDecision::Stop(StopReason::Oscillation)
        );
        assert_eq!(run(sets(&[&["a"], &["b"], &["c"], &["b"]])), BreakerDecision::Continue);
    }

    #[test]
    fn test_oscillation_window_is_configurable() {
        let config = BreakerConfig {
            oscillation_window: 6,
            ..Default::default()
        };
        let record_all = |records: Vec<IterationRecord>| {
            let mut breaker = CircuitBreaker::new(config);
            let mut decision = BreakerDecision::Continue;
            for record in records {
                decision = breaker.record(record);
            }
            decision
        };

        // Four alternating records no longer suffice
        let four = sets(&[&["a", "x"], &["b"], &["a", "x"], &["b"]]);
        assert_eq!(record_all(four), BreakerDecision::Continue);

        let six = sets(&[&["a", "x"], &["b"], &["a", "x"], &["b"], &["a", "x"], &["b"]]);
        assert_eq!(record_all(six), BreakerDecision::Stop(StopReason::Oscillation));

        let disabled = CircuitBreaker::new(BreakerConfig {
            oscillation_window: 0,
            ..Default::default()
        });
        assert_eq!(disabled.oscillation(), None);
    }

    #[test]
    fn test_thresholds_follow_loop_settings() {
        let settings = config::LoopSettings::defaults();
        let config = BreakerConfig::default();
        assert_eq!(config.oscillation_window, settings.oscillation_window);
        assert_eq!(config.oscillation_window, 4);
        assert_eq!(config.stagnation_window, 5);
        assert_eq!(config.regression_margin, 3);
    }

    #[test]
    fn test_identical_sets_are_not_oscillation() {
        let breaker = {
            let mut b = CircuitBreaker::new(BreakerConfig::default());
            for r in sets(&[&["a"], &["a"], &["a"], &["a"]]) {
                b.record(r);
            }
            b
        };
        assert_eq!(breaker.oscillation(), None);
    }

    #[test]
    fn test_stagnation_checked_before_oscillation() {
        // Counts stay at 1 for five records while sets alternate
        let decision = run(sets(&[&["a"], &["b"], &["a"], &["b"], &["a"]]));
        assert!(matches!(decision, BreakerDecision::Stop(StopReason::Stagnation { .. })));
    }

    #[test]
    fn test_stuck_scenarios() {
        let mut breaker = CircuitBreaker::new(BreakerConfig::default());
        for r in sets(&[&["a"], &["a", "b"], &["a", "b", "c"], &["a", "b"]]) {
            breaker.record(r);
        }
        assert_eq!(breaker.stuck_scenarios(), ids(&["a", "b"]));

        let short = CircuitBreaker::new(BreakerConfig::default());
        assert!(short.stuck_scenarios().is_empty());
    }
}
