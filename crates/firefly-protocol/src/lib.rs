//! Firefly Protocol Components
//!
//! The portable building blocks of the Firefly discovery and election
//! protocol, composed by `firefly-engine` into one tick-driven automaton:
//!
//! - [`cycle`] - the 4-slot discovery-cycle scheduler (one own-message slot,
//!   three forwarding slots, one completion event per cycle)
//! - [`timing`] - the stochastic listen/broadcast chooser used by the
//!   pre-discovery noise-sampling and neighbor-sampling phases
//! - [`forwarding`] - the per-packet forwarding admission (TTL, crowding,
//!   GPS proximity) and the TTL-derived dequeue priority
//! - [`queue`] - the bounded, deduplicating, loop-safe forwarding queue
//! - [`election`] - crowding estimation, candidacy and score formulas, the
//!   PDSF flood-reach recurrence, geographic spread and the slot hash
//!
//! Every component is deterministic given its inputs; stochastic decisions
//! draw from an explicit, reseedable RNG owned by the component, so engine
//! instances stay independent and reproducible under test.

pub mod cycle;
pub mod election;
pub mod forwarding;
pub mod queue;
pub mod timing;

pub use cycle::{CycleState, DiscoveryCycle, SlotKind, NUM_SLOTS};
pub use election::ElectionState;
pub use forwarding::ForwardPolicy;
pub use queue::ForwardQueue;
pub use timing::{BroadcastTiming, ScheduleKind, SlotDecision};
