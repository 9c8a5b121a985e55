//! In-memory per-PR automation state.
//!
//! One automaton per `(owner, repo, pr_number)`. Events for the same key are
//! serialized by a per-key lock; different keys proceed in parallel.

pub mod clock;
pub mod pr_state;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use pr_state::*;
pub use store::{KeyGuard, PrStateStore};
