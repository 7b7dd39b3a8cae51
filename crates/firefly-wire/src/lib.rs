//! Firefly Wire Format
//!
//! Wire-level records for the Firefly mesh discovery protocol: discovery
//! advertisements and clusterhead election announcements.
//!
//! # Packet shape
//!
//! Every packet carries the common discovery fields (sender, TTL, traversed
//! path, optional GPS position). Election announcements extend them with the
//! candidacy fields (score, direct connections, flood-reach estimate, slot
//! hash). The two variants form a tagged sum type discriminated by
//! [`MessageType`] and are decoded exhaustively - there is no untyped
//! reinterpretation of one as the other.
//!
//! # Bounds
//!
//! The path and the PDSF history have fixed maximum lengths enforced both
//! when building a packet and when decoding one. A packet that claims more
//! entries than the bound is rejected, not truncated.

mod codec;
mod packet;

pub use codec::{decode, encode, encoded_len, WireError};
pub use packet::{
    DiscoveryPacket, ElectionData, ElectionPacket, GpsLocation, MessageType, Packet,
};

/// Maximum number of node ids recorded in a packet path.
pub const MAX_PATH_LEN: usize = 50;

/// Default hop budget for locally-originated packets.
pub const DEFAULT_TTL: u8 = 10;

/// Cluster size ceiling; the PDSF flood-reach estimate saturates here.
pub const MAX_CLUSTER_SIZE: u32 = 150;

/// Maximum per-hop entries in the PDSF history trail.
pub const PDSF_MAX_HOPS: usize = 16;

/// Reserved invalid node id (never assigned to a device).
pub const INVALID_NODE_ID: u32 = 0;
