//! Simulation metrics and reporting.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::chaos::AssertionStats;

/// Metrics collected during one or more simulation runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationMetrics {
    /// Wall-clock time taken for the simulation
    pub wall_time: Duration,
    /// Simulated logical time elapsed
    pub simulated_time: Duration,
    /// Number of events processed
    pub events_processed: u64,
    /// Transactions decided COMMIT
    pub commits: u64,
    /// Transactions decided ABORT
    pub aborts: u64,
    /// Process crashes injected
    pub crashes: u64,
}

impl SimulationMetrics {
    pub(crate) fn accumulate(&mut self, other: &SimulationMetrics) {
        self.wall_time += other.wall_time;
        self.simulated_time += other.simulated_time;
        self.events_processed += other.events_processed;
        self.commits += other.commits;
        self.aborts += other.aborts;
        self.crashes += other.crashes;
    }
}

/// A failed iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedFailure {
    /// Seed that reproduces the failure.
    pub seed: u64,
    /// Panic message or error.
    pub reason: String,
}

/// Report of a simulation experiment.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Number of iterations executed
    pub iterations: usize,
    /// Number of successful runs
    pub successful_runs: usize,
    /// Number of failed runs
    pub failed_runs: usize,
    /// Aggregated metrics across successful runs
    pub metrics: SimulationMetrics,
    /// Seeds used for each iteration
    pub seeds_used: Vec<u64>,
    /// failed seeds
    pub seeds_failing: Vec<u64>,
    /// Why each failing seed failed
    pub failures: Vec<SeedFailure>,
    /// Aggregated assertion results across all iterations
    pub assertion_results: HashMap<String, AssertionStats>,
    /// `assert_sometimes!` sites that never held.
    pub assertion_violations: Vec<String>,
}

impl SimulationReport {
    /// Calculate the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.iterations == 0 {
            0.0
        } else {
            (self.successful_runs as f64 / self.iterations as f64) * 100.0
        }
    }

    /// Get the average wall time per iteration.
    pub fn average_wall_time(&self) -> Duration {
        if self.successful_runs == 0 {
            Duration::ZERO
        } else {
            self.metrics.wall_time / self.successful_runs as u32
        }
    }

    /// Get the average simulated time per iteration.
    pub fn average_simulated_time(&self) -> Duration {
        if self.successful_runs == 0 {
            Duration::ZERO
        } else {
            self.metrics.simulated_time / self.successful_runs as u32
        }
    }

    /// Get the average number of events processed per iteration.
    pub fn average_events_processed(&self) -> f64 {
        if self.successful_runs == 0 {
            0.0
        } else {
            self.metrics.events_processed as f64 / self.successful_runs as f64
        }
    }

    /// Share of decided transactions that committed, as a percentage.
    pub fn commit_rate(&self) -> f64 {
        let decided = self.metrics.commits + self.metrics.aborts;
        if decided == 0 {
            0.0
        } else {
            (self.metrics.commits as f64 / decided as f64) * 100.0
        }
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Simulation Report ===")?;
        writeln!(f, "Iterations: {}", self.iterations)?;
        writeln!(f, "Successful: {}", self.successful_runs)?;
        writeln!(f, "Failed: {}", self.failed_runs)?;
        writeln!(f, "Success Rate: {:.2}%", self.success_rate())?;
        writeln!(f)?;
        writeln!(f, "Average Wall Time: {:?}", self.average_wall_time())?;
        writeln!(
            f,
            "Average Simulated Time: {:?}",
            self.average_simulated_time()
        )?;
        writeln!(
            f,
            "Average Events Processed: {:.1}",
            self.average_events_processed()
        )?;
        writeln!(f)?;
        writeln!(
            f,
            "Transactions: {} committed, {} aborted ({:.2}% commit rate)",
            self.metrics.commits,
            self.metrics.aborts,
            self.commit_rate()
        )?;
        writeln!(f, "Crashes injected: {}", self.metrics.crashes)?;

        if !self.seeds_failing.is_empty() {
            writeln!(f)?;
            writeln!(f, "Faulty seeds: {:?}", self.seeds_failing)?;
            for failure in &self.failures {
                writeln!(f, "  seed {}: {}", failure.seed, failure.reason)?;
            }
        }

        if !self.assertion_violations.is_empty() {
            writeln!(f)?;
            writeln!(f, "Coverage gaps:")?;
            for violation in &self.assertion_violations {
                writeln!(f, "  {}", violation)?;
            }
        }

        Ok(())
    }
}
