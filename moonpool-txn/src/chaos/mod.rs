//! Chaos testing support: assertions, buggify and invariants.
//!
//! | Mechanism | Default | What it tests |
//! |-----------|---------|---------------|
//! | Coordinator crash after multicast | configurable | Recovery aborts, decision re-multicast |
//! | Partition crash after vote | configurable | Termination protocol |
//! | Buggified send delay | 25% of active sites | Timeouts racing with replies |
//! | `assert_always!` | - | Safety (atomicity, conservation) |
//! | `assert_sometimes!` | - | Coverage of rare paths |

pub mod assertions;
pub mod buggify;
pub mod invariants;

pub use assertions::{
    get_assertion_results, record_assertion, reset_assertion_results,
    validate_assertion_contracts, AssertionStats,
};
pub use buggify::{buggify_init, buggify_reset};
pub use invariants::{
    invariant_fn, standard_invariants, AtomicCommitment, ClientsFinished, ConservationLaw,
    Invariant, LockHygiene,
};
