//! Assertion macros and result tracking for simulation testing.
//!
//! `assert_always!` guards safety properties and panics with the seed that
//! broke them. `assert_sometimes!` records how often a condition held so a
//! run can show that interesting paths (conflicts, crashes in doubt) were
//! actually exercised. Statistics are thread-local, one table per
//! simulation thread.

use std::cell::RefCell;
use std::collections::HashMap;

/// Statistics for a tracked assertion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssertionStats {
    /// Total number of times this assertion was evaluated.
    pub total_checks: usize,
    /// Number of times the condition held.
    pub successes: usize,
}

impl AssertionStats {
    /// Success rate as a percentage (0.0 to 100.0); 0.0 before any check.
    pub fn success_rate(&self) -> f64 {
        if self.total_checks == 0 {
            0.0
        } else {
            (self.successes as f64 / self.total_checks as f64) * 100.0
        }
    }

    /// Record one evaluation.
    pub fn record(&mut self, success: bool) {
        self.total_checks += 1;
        if success {
            self.successes += 1;
        }
    }
}

thread_local! {
    static ASSERTION_RESULTS: RefCell<HashMap<String, AssertionStats>> = RefCell::new(HashMap::new());
}

/// Record an assertion result. Used by `assert_sometimes!`.
pub fn record_assertion(name: &str, success: bool) {
    ASSERTION_RESULTS.with(|results| {
        results
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .record(success);
    });
}

/// Snapshot of every tracked assertion on this thread.
pub fn get_assertion_results() -> HashMap<String, AssertionStats> {
    ASSERTION_RESULTS.with(|results| results.borrow().clone())
}

/// Clear all assertion statistics.
pub fn reset_assertion_results() {
    ASSERTION_RESULTS.with(|results| results.borrow_mut().clear());
}

/// `assert_sometimes!` conditions that were checked but never held.
pub fn validate_assertion_contracts() -> Vec<String> {
    let mut violations: Vec<String> = get_assertion_results()
        .iter()
        .filter(|(_, stats)| stats.total_checks > 0 && stats.successes == 0)
        .map(|(name, stats)| {
            format!(
                "assert_sometimes!('{}') never held in {} checks",
                name, stats.total_checks
            )
        })
        .collect();
    violations.sort();
    violations
}

/// Always-true assertion. Panics with the current seed on failure.
#[macro_export]
macro_rules! assert_always {
    ($condition:expr, $message:expr) => {
        if !$condition {
            let seed = $crate::sim::rng::get_current_sim_seed();
            panic!("[ALWAYS FAILED] seed={}: {}", seed, $message);
        }
    };
}

/// Sometimes-true assertion. Records statistics, never panics.
#[macro_export]
macro_rules! assert_sometimes {
    ($condition:expr, $message:expr) => {{
        let result: bool = $condition;
        $crate::chaos::assertions::record_assertion($message, result);
    }};
}
