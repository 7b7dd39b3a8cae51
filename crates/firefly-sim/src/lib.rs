//! Firefly Simulation Harness
//!
//! Composes N independent [`firefly_engine::DiscoveryEngine`] instances with
//! an in-memory broadcast transport and records a serializable event
//! timeline.
//!
//! The harness owns the two collaborator obligations the engine leaves to
//! its environment: it calls `tick` on every engine at each slot boundary
//! and `receive` for every packet a node can hear, attaching the link's
//! RSSI. Delivery is synchronous and deterministic - transmissions from one
//! slot are fanned out to adjacent nodes in ascending receiver-id order
//! before the next slot begins. There is no shared state between engines;
//! the transport is the only coupling.

pub mod events;
pub mod sim;
pub mod topology;

pub use events::MeshEvent;
pub use sim::Simulation;
pub use topology::LinkTopology;
