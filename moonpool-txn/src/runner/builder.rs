//! Simulation builder: seeded iterations of a whole cluster.
//!
//! Each iteration reseeds the simulation RNG, enables buggify, builds a
//! fresh [`SimWorld`] from the configuration and runs it to quiescence with
//! the registered invariants checked after every event. A panic (from
//! `assert_always!` or an invariant) or a run error fails the iteration and
//! records its seed.
//!
//! ```ignore
//! let report = SimulationBuilder::new()
//!     .config(TxnConfig::chaos())
//!     .standard_invariants()
//!     .set_iterations(50)
//!     .run();
//! assert_eq!(report.failed_runs, 0);
//! ```

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use crate::chaos::{self, Invariant};
use crate::config::TxnConfig;
use crate::error::Result;
use crate::sim::{self, NetworkConfiguration, SimWorld, DEFAULT_TIME_LIMIT};
use crate::types::Outcome;

use super::report::{SeedFailure, SimulationMetrics, SimulationReport};

/// Configuration for how many iterations to run.
#[derive(Debug, Clone, PartialEq)]
pub enum IterationControl {
    /// Run a fixed number of iterations with specific seeds
    FixedCount(usize),
    /// Run for a specific duration of wall-clock time
    TimeLimit(Duration),
}

/// Which network model each iteration uses.
#[derive(Debug, Clone, PartialEq)]
enum NetworkChoice {
    Fixed(NetworkConfiguration),
    RandomPerSeed,
}

/// Builder for transactional simulation experiments.
pub struct SimulationBuilder {
    iteration_control: IterationControl,
    seeds: Vec<u64>,
    config: TxnConfig,
    use_random_config: bool,
    network: NetworkChoice,
    invariants: Vec<Box<dyn Invariant>>,
    sim_time_limit: Duration,
    buggify_activation: f64,
}

impl Default for SimulationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationBuilder {
    /// Create a builder running one iteration of the default configuration.
    pub fn new() -> Self {
        Self {
            iteration_control: IterationControl::FixedCount(1),
            seeds: Vec::new(),
            config: TxnConfig::default(),
            use_random_config: false,
            network: NetworkChoice::Fixed(NetworkConfiguration::default()),
            invariants: Vec::new(),
            sim_time_limit: DEFAULT_TIME_LIMIT,
            buggify_activation: 0.5,
        }
    }

    /// Cluster and workload configuration used by every iteration.
    pub fn config(mut self, config: TxnConfig) -> Self {
        self.config = config;
        self
    }

    /// Draw a fresh configuration from each iteration's seed.
    pub fn random_config(mut self) -> Self {
        self.use_random_config = true;
        self
    }

    /// Fixed network model for every iteration.
    pub fn network(mut self, network: NetworkConfiguration) -> Self {
        self.network = NetworkChoice::Fixed(network);
        self
    }

    /// Enable randomized network configuration for chaos testing.
    pub fn random_network(mut self) -> Self {
        self.network = NetworkChoice::RandomPerSeed;
        self
    }

    /// Add an invariant to be checked after every simulation event.
    pub fn invariant(mut self, i: impl Invariant + 'static) -> Self {
        self.invariants.push(Box::new(i));
        self
    }

    /// Add a closure-based invariant.
    pub fn invariant_fn(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&SimWorld, u64) + 'static,
    ) -> Self {
        self.invariants.push(chaos::invariant_fn(name, f));
        self
    }

    /// Add atomic commitment, conservation, lock hygiene and client completion.
    pub fn standard_invariants(mut self) -> Self {
        self.invariants.extend(chaos::standard_invariants());
        self
    }

    /// Set the number of iterations to run.
    pub fn set_iterations(mut self, iterations: usize) -> Self {
        self.iteration_control = IterationControl::FixedCount(iterations);
        self
    }

    /// Set the iteration control strategy.
    pub fn set_iteration_control(mut self, control: IterationControl) -> Self {
        self.iteration_control = control;
        self
    }

    /// Run for a specific wall-clock time duration.
    pub fn set_time_limit(mut self, duration: Duration) -> Self {
        self.iteration_control = IterationControl::TimeLimit(duration);
        self
    }

    /// Bound simulated time per iteration.
    pub fn set_sim_time_limit(mut self, limit: Duration) -> Self {
        self.sim_time_limit = limit;
        self
    }

    /// Set specific seeds for deterministic debugging and regression testing.
    pub fn set_debug_seeds(mut self, seeds: Vec<u64>) -> Self {
        self.seeds = seeds;
        self
    }

    /// Share of buggify sites enabled per iteration. Zero disables buggify.
    pub fn set_buggify_activation(mut self, probability: f64) -> Self {
        self.buggify_activation = probability;
        self
    }

    /// Run one iteration on the current thread's seeded RNG.
    fn run_iteration(&self, seed: u64) -> Result<SimulationMetrics> {
        let config = if self.use_random_config {
            TxnConfig::random_for_seed()
        } else {
            self.config.clone()
        };
        let network = match &self.network {
            NetworkChoice::Fixed(network) => network.clone(),
            NetworkChoice::RandomPerSeed => NetworkConfiguration::random_for_seed(),
        };

        let start = Instant::now();
        let mut world = SimWorld::from_config(&config, network)?;
        world.set_time_limit(self.sim_time_limit);
        world.run(&self.invariants)?;

        let history = world.history();
        info!(
            seed,
            events = world.events_processed(),
            simulated = ?world.now(),
            "iteration complete"
        );
        Ok(SimulationMetrics {
            wall_time: start.elapsed(),
            simulated_time: world.now(),
            events_processed: world.events_processed(),
            commits: history.decided_count(Outcome::Commit) as u64,
            aborts: history.decided_count(Outcome::Abort) as u64,
            crashes: history.crashes() as u64,
        })
    }

    /// Run the simulation and generate a report.
    #[instrument(skip_all)]
    pub fn run(self) -> SimulationReport {
        let mut iterations = IterationManager::new(self.iteration_control.clone(), self.seeds.clone());
        let mut metrics = SimulationMetrics::default();
        let mut successful_runs = 0;
        let mut failures = Vec::new();

        chaos::reset_assertion_results();

        while iterations.should_continue() {
            let seed = iterations.next_iteration();

            sim::reset_sim_rng();
            sim::set_sim_seed(seed);
            chaos::buggify_init(self.buggify_activation);

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_iteration(seed)));
            match outcome {
                Ok(Ok(run)) => {
                    successful_runs += 1;
                    metrics.accumulate(&run);
                }
                Ok(Err(err)) => {
                    warn!(seed, error = %err, "iteration failed");
                    failures.push(SeedFailure {
                        seed,
                        reason: err.to_string(),
                    });
                }
                Err(payload) => {
                    let reason = panic_message(payload.as_ref());
                    warn!(seed, %reason, "iteration panicked");
                    failures.push(SeedFailure { seed, reason });
                }
            }

            chaos::buggify_reset();
        }

        let iteration_count = iterations.current_iteration();
        info!(
            "Simulation completed: {}/{} iterations successful",
            successful_runs, iteration_count
        );
        info!("Seeds used: {:?}", iterations.seeds_used());
        if !failures.is_empty() {
            warn!(
                "{} iterations failed - check logs above for failing seeds",
                failures.len()
            );
        }

        SimulationReport {
            iterations: iteration_count,
            successful_runs,
            failed_runs: failures.len(),
            metrics,
            seeds_used: iterations.seeds_used().to_vec(),
            seeds_failing: failures.iter().map(|f| f.seed).collect(),
            failures,
            assertion_results: chaos::get_assertion_results(),
            assertion_violations: chaos::validate_assertion_contracts(),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Hands out seeds: debug seeds first, then seeds derived from a base.
struct IterationManager {
    control: IterationControl,
    seeds: Vec<u64>,
    base_seed: u64,
    iteration_count: usize,
    start_time: Instant,
}

impl IterationManager {
    fn new(control: IterationControl, initial_seeds: Vec<u64>) -> Self {
        let base_seed = std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(12345);

        Self {
            control,
            seeds: initial_seeds,
            base_seed,
            iteration_count: 0,
            start_time: Instant::now(),
        }
    }

    fn should_continue(&self) -> bool {
        match &self.control {
            IterationControl::FixedCount(count) => self.iteration_count < *count,
            IterationControl::TimeLimit(duration) => self.start_time.elapsed() < *duration,
        }
    }

    fn next_iteration(&mut self) -> u64 {
        let seed = if self.iteration_count < self.seeds.len() {
            self.seeds[self.iteration_count]
        } else {
            let mut hasher = DefaultHasher::new();
            self.base_seed.hash(&mut hasher);
            self.iteration_count.hash(&mut hasher);
            let new_seed = hasher.finish();
            self.seeds.push(new_seed);
            new_seed
        };

        self.iteration_count += 1;
        info!(
            "Starting iteration {} with seed {}",
            self.iteration_count, seed
        );
        seed
    }

    fn current_iteration(&self) -> usize {
        self.iteration_count
    }

    fn seeds_used(&self) -> &[u64] {
        &self.seeds[..self.iteration_count]
    }
}
