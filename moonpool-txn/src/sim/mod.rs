//! Deterministic simulation substrate.
//!
//! - [`events`]: the time-ordered event queue
//! - [`rng`]: thread-local seeded randomness
//! - [`network`]: latency model
//! - [`SimWorld`]: processes, clock and per-link FIFO delivery

pub mod events;
pub mod network;
pub mod rng;
mod world;

pub use network::NetworkConfiguration;
pub use rng::{
    get_current_sim_seed, reset_sim_rng, set_sim_seed, sim_random, sim_random_below,
    sim_random_f64, sim_random_range,
};
pub use world::{SimWorld, DEFAULT_EVENT_BUDGET, DEFAULT_TIME_LIMIT};
