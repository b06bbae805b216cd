//! Thread-local deterministic randomness for the simulator.
//!
//! Every random decision of a simulated run (latencies, crash coin flips,
//! client choices, buggify activations) draws from one `ChaCha8Rng` per
//! thread, seeded per iteration. Same seed, same run.

use std::cell::{Cell, RefCell};

use rand::distr::uniform::SampleUniform;
use rand::distr::{Distribution, StandardUniform};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

thread_local! {
    static SIM_RNG: RefCell<ChaCha8Rng> = RefCell::new(ChaCha8Rng::seed_from_u64(0));

    static CURRENT_SEED: Cell<u64> = const { Cell::new(0) };

    /// Number of draws since the last reseed. Used to check that two runs
    /// of the same seed consumed randomness identically.
    static DRAWS: Cell<u64> = const { Cell::new(0) };
}

/// Draw a value from the standard distribution of `T`.
pub fn sim_random<T>() -> T
where
    StandardUniform: Distribution<T>,
{
    DRAWS.with(|d| d.set(d.get() + 1));
    SIM_RNG.with(|rng| rng.borrow_mut().sample(StandardUniform))
}

/// Draw a value from `range` (exclusive upper bound).
///
/// # Panics
///
/// Panics if the range is empty; use [`sim_random_below`] for counts that
/// may be zero.
pub fn sim_random_range<T>(range: std::ops::Range<T>) -> T
where
    T: SampleUniform + PartialOrd,
{
    DRAWS.with(|d| d.set(d.get() + 1));
    SIM_RNG.with(|rng| rng.borrow_mut().random_range(range))
}

/// Draw from `0..n`, returning 0 when `n == 0`.
pub fn sim_random_below(n: u64) -> u64 {
    if n == 0 {
        0
    } else {
        sim_random_range(0..n)
    }
}

/// Draw a probability sample in `[0, 1)`.
pub fn sim_random_f64() -> f64 {
    sim_random::<f64>()
}

/// Reseed the thread-local RNG.
pub fn set_sim_seed(seed: u64) {
    SIM_RNG.with(|rng| *rng.borrow_mut() = ChaCha8Rng::seed_from_u64(seed));
    CURRENT_SEED.with(|s| s.set(seed));
    DRAWS.with(|d| d.set(0));
}

/// Seed of the current iteration, for failure messages.
pub fn get_current_sim_seed() -> u64 {
    CURRENT_SEED.with(|s| s.get())
}

/// Number of draws since the last [`set_sim_seed`].
pub fn sim_draw_count() -> u64 {
    DRAWS.with(|d| d.get())
}

/// Reset the RNG to seed 0 between iterations.
pub fn reset_sim_rng() {
    set_sim_seed(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        set_sim_seed(42);
        let first: Vec<u64> = (0..16).map(|_| sim_random_range(0..1_000)).collect();
        set_sim_seed(42);
        let second: Vec<u64> = (0..16).map(|_| sim_random_range(0..1_000)).collect();
        assert_eq!(first, second);
        assert_eq!(sim_draw_count(), 16);
        assert_eq!(get_current_sim_seed(), 42);
    }

    #[test]
    fn test_different_seeds_diverge() {
        set_sim_seed(1);
        let a: Vec<u64> = (0..8).map(|_| sim_random()).collect();
        set_sim_seed(2);
        let b: Vec<u64> = (0..8).map(|_| sim_random()).collect();
        assert_ne!(a, b);
    }

    #[test]
    fn test_random_below_zero_is_zero() {
        reset_sim_rng();
        assert_eq!(sim_random_below(0), 0);
        assert_eq!(sim_draw_count(), 0, "empty range does not consume randomness");
        for _ in 0..100 {
            assert!(sim_random_below(3) < 3);
        }
    }

    #[test]
    fn test_f64_in_unit_interval() {
        set_sim_seed(7);
        for _ in 0..1_000 {
            let p = sim_random_f64();
            assert!((0.0..1.0).contains(&p));
        }
    }
}
