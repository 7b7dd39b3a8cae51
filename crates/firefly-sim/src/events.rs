//! Recorded simulation events, serializable for offline inspection.

use serde::{Deserialize, Serialize};

use firefly_wire::MessageType;

/// Events on the simulated medium and in the observed node roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MeshEvent {
    /// A node transmitted a packet.
    Transmitted {
        node: u32,
        message_type: MessageType,
        /// Hop distance the packet has travelled; 1 = originated here.
        hops: usize,
        ttl: u8,
        renouncement: bool,
        at_ms: u64,
    },

    /// A packet was delivered over a link.
    Delivered {
        from: u32,
        to: u32,
        origin: u32,
        rssi: i8,
        accepted: bool,
        at_ms: u64,
    },

    /// A node's role changed.
    StateChanged {
        node: u32,
        from: String,
        to: String,
        at_ms: u64,
    },

    /// A node adopted (or dropped) its clusterhead.
    AdoptionChanged {
        node: u32,
        clusterhead: Option<u32>,
        at_ms: u64,
    },
}

impl MeshEvent {
    /// Timestamp of the event.
    pub fn at_ms(&self) -> u64 {
        match self {
            MeshEvent::Transmitted { at_ms, .. }
            | MeshEvent::Delivered { at_ms, .. }
            | MeshEvent::StateChanged { at_ms, .. }
            | MeshEvent::AdoptionChanged { at_ms, .. } => *at_ms,
        }
    }
}
