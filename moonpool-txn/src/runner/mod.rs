//! Simulation runner.
//!
//! - `builder` - [`SimulationBuilder`] configures and runs seeded iterations
//! - `report` - [`SimulationMetrics`] and [`SimulationReport`]

pub mod builder;
pub mod report;

pub use builder::{IterationControl, SimulationBuilder};
pub use report::{SeedFailure, SimulationMetrics, SimulationReport};
