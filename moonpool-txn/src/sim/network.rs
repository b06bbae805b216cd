//! Simulated network parameters.
//!
//! | Parameter | Field | Default |
//! |-----------|-------|---------|
//! | One-way latency | `min_latency`..`max_latency` | 1-10 ms |
//! | Buggified extra delay | `buggified_delay` | 100 ms |
//!
//! Delivery is per-link FIFO regardless of the sampled latencies.

use std::time::Duration;

use crate::sim::rng::sim_random_range;

/// Latency model of the simulated network.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfiguration {
    /// Lower bound of the one-way latency.
    pub min_latency: Duration,
    /// Upper bound (exclusive) of the one-way latency.
    pub max_latency: Duration,
    /// Extra delay added when a buggify point fires on send.
    pub buggified_delay: Duration,
}

impl Default for NetworkConfiguration {
    fn default() -> Self {
        Self {
            min_latency: Duration::from_millis(1),
            max_latency: Duration::from_millis(10),
            buggified_delay: Duration::from_millis(100),
        }
    }
}

impl NetworkConfiguration {
    /// Near-instant network for fast tests.
    pub fn fast_local() -> Self {
        Self {
            min_latency: Duration::from_micros(100),
            max_latency: Duration::from_micros(500),
            buggified_delay: Duration::from_millis(5),
        }
    }

    /// Randomized latencies drawn from the simulation RNG.
    pub fn random_for_seed() -> Self {
        let min_us = sim_random_range(100..5_000u64);
        let spread_us = sim_random_range(1..50_000u64);
        Self {
            min_latency: Duration::from_micros(min_us),
            max_latency: Duration::from_micros(min_us + spread_us),
            buggified_delay: Duration::from_millis(sim_random_range(10..500)),
        }
    }

    /// Sample a one-way latency.
    pub fn sample_latency(&self) -> Duration {
        if self.max_latency <= self.min_latency {
            return self.min_latency;
        }
        sim_random_range(self.min_latency..self.max_latency)
    }
}
