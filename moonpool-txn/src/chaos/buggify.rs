//! Deterministic fault injection following FoundationDB's buggify approach.
//!
//! Each buggify location is randomly activated once per simulation run.
//! Active locations fire probabilistically on each call. Outside a
//! simulation (tokio runtime, unit tests) buggify is disabled.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::sim::rng::sim_random_f64;

thread_local! {
    static STATE: RefCell<State> = RefCell::new(State::default());
}

#[derive(Default)]
struct State {
    enabled: bool,
    active_locations: HashMap<&'static str, bool>,
    activation_prob: f64,
}

/// Enable buggify for a simulation run.
pub fn buggify_init(activation_prob: f64) {
    STATE.with(|state| {
        let mut state = state.borrow_mut();
        state.enabled = true;
        state.active_locations.clear();
        state.activation_prob = activation_prob;
    });
}

/// Disable buggify and forget activations.
pub fn buggify_reset() {
    STATE.with(|state| *state.borrow_mut() = State::default());
}

/// Backing function of the `buggify!` macros.
pub fn buggify_internal(prob: f64, location: &'static str) -> bool {
    STATE.with(|state| {
        let mut state = state.borrow_mut();
        if !state.enabled || prob <= 0.0 {
            return false;
        }
        let activation_prob = state.activation_prob;
        let active = *state
            .active_locations
            .entry(location)
            .or_insert_with(|| sim_random_f64() < activation_prob);
        active && sim_random_f64() < prob
    })
}

/// Buggify with 25% firing probability.
#[macro_export]
macro_rules! buggify {
    () => {
        $crate::chaos::buggify::buggify_internal(0.25, concat!(file!(), ":", line!()))
    };
}

/// Buggify with a custom firing probability.
#[macro_export]
macro_rules! buggify_with_prob {
    ($prob:expr) => {
        $crate::chaos::buggify::buggify_internal($prob as f64, concat!(file!(), ":", line!()))
    };
}
