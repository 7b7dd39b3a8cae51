//! Firefly Discovery Engine
//!
//! The per-device automaton of the Firefly mesh protocol. Each engine
//! instance owns one node's complete protocol state and is driven by two
//! externally delivered stimuli:
//!
//! - [`DiscoveryEngine::tick`] at every slot boundary, and
//! - [`DiscoveryEngine::receive`] for every demodulated packet (with its
//!   RSSI reading).
//!
//! All state mutation is synchronous inside those two calls. The engine
//! holds no thread, timer or lock - scheduling slot boundaries is the
//! caller's job, which keeps the automaton reusable on bare-metal targets.
//! Outbound packets are handed to a [`PacketSink`] capability the caller
//! supplies at construction.
//!
//! # Lifecycle
//!
//! A node cycles through three phases: a **noisy** phase that samples
//! ambient RSSI into the crowding estimate, a **neighbor** phase that
//! advertises on a crowding-adapted stochastic schedule, and a 4-slot
//! **discovery** cycle that transmits once and forwards up to three queued
//! packets. Completing a discovery cycle re-evaluates the node's role:
//! well-connected nodes nominate themselves as clusterhead candidates,
//! announce for three rounds, and either promote to clusterhead or - upon
//! hearing a better candidate - renounce and align as edge nodes.

mod config;
mod engine;
mod error;
mod node;

pub use config::EngineConfig;
pub use engine::{DiscoveryEngine, PacketSink, Phase};
pub use error::ConfigError;
pub use node::{Adoption, NeighborRecord, Node, NodeCounters, NodeSnapshot, NodeState};
