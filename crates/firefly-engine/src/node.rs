//! Per-device node state: role FSM, neighbor table, counters.
//!
//! # Role state machine
//!
//! ```text
//! Init → Discovery → Edge
//!              ↘  ClusterheadCandidate → Clusterhead
//! ```
//!
//! Transitions are acyclic with one exception: Edge and Clusterhead fall
//! back to Discovery when the clusterhead they were aligned under renounces.
//! Every transition is checked against the validity table; an invalid
//! request is refused and logged, never applied.

use std::cmp::Reverse;

use tracing::{debug, warn};

use firefly_wire::GpsLocation;

/// Maximum neighbors tracked per node.
pub const MAX_NEIGHBORS: usize = 150;

/// A node's role in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Not yet started.
    Init,
    /// Actively discovering; no role settled.
    Discovery,
    /// Competing to coordinate a cluster.
    ClusterheadCandidate,
    /// Elected cluster coordinator.
    Clusterhead,
    /// Aligned under a clusterhead without coordinating one.
    Edge,
}

impl NodeState {
    pub fn name(&self) -> &'static str {
        match self {
            NodeState::Init => "INIT",
            NodeState::Discovery => "DISCOVERY",
            NodeState::ClusterheadCandidate => "CLUSTERHEAD_CANDIDATE",
            NodeState::Clusterhead => "CLUSTERHEAD",
            NodeState::Edge => "EDGE",
        }
    }
}

/// Whether `from → to` is an allowed role transition.
pub fn is_valid_transition(from: NodeState, to: NodeState) -> bool {
    use NodeState::*;
    if from == to {
        return true;
    }
    match from {
        Init => to == Discovery,
        Discovery => matches!(to, Edge | ClusterheadCandidate),
        ClusterheadCandidate => matches!(to, Clusterhead | Edge),
        // Renouncement fallbacks: the only re-entries into Discovery.
        Edge => matches!(to, Discovery | ClusterheadCandidate),
        Clusterhead => to == Discovery,
    }
}

/// One discovered neighbor.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborRecord {
    pub node_id: u32,
    /// Most recent RSSI reading (dBm).
    pub last_rssi: i8,
    /// Hop distance at which the neighbor was last heard; 1 = direct.
    pub hop_count: u8,
    /// Discovery cycle of the last reception.
    pub last_heard_cycle: u32,
    /// Last position the neighbor advertised.
    pub position: Option<GpsLocation>,
    /// Whether the neighbor claims to be a clusterhead.
    pub clusterhead_flag: bool,
}

/// Append-only traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeCounters {
    pub sent: u32,
    pub received: u32,
    pub forwarded: u32,
    pub dropped: u32,
}

/// An adopted (or contending) clusterhead and the credentials that won it
/// the adoption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adoption {
    pub id: u32,
    /// Hop distance of the winning announcement (1 = heard directly).
    pub hops: u16,
    /// The clusterhead's direct-connection count at announcement time.
    pub direct_connections: u32,
}

impl Adoption {
    /// Strict total order over announcements: fewer hops win, then more
    /// direct connections, then the lower id. Ids are unique, so two
    /// distinct announcements never tie.
    pub fn beats(&self, other: &Adoption) -> bool {
        (self.hops, Reverse(self.direct_connections), self.id)
            < (other.hops, Reverse(other.direct_connections), other.id)
    }
}

/// Read-only view of a node for external observers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeSnapshot {
    pub node_id: u32,
    pub state: NodeState,
    pub counters: NodeCounters,
    pub adopted_clusterhead: Option<u32>,
    pub candidacy_score: f64,
    pub direct_connections: u32,
    pub total_neighbors: u32,
    pub noise_level: f64,
    pub crowding_factor: f64,
    pub pdsf: u32,
    pub current_cycle: u32,
}

/// One device's long-lived protocol state.
#[derive(Debug)]
pub struct Node {
    node_id: u32,
    state: NodeState,
    prev_state: NodeState,
    state_entry_cycle: u32,

    position: Option<GpsLocation>,

    neighbors: Vec<NeighborRecord>,
    adopted: Option<Adoption>,

    noise_level: f64,
    crowding_factor: f64,
    candidacy_score: f64,
    pdsf: u32,
    election_hash: u32,

    current_cycle: u32,
    last_candidate_heard_cycle: u32,

    counters: NodeCounters,
}

impl Node {
    /// Create a node in the Init state.
    pub fn new(node_id: u32) -> Self {
        Self {
            node_id,
            state: NodeState::Init,
            prev_state: NodeState::Init,
            state_entry_cycle: 0,
            position: None,
            neighbors: Vec::new(),
            adopted: None,
            noise_level: 0.0,
            crowding_factor: 0.0,
            candidacy_score: 0.0,
            pdsf: 0,
            election_hash: firefly_protocol::election::slot_hash(node_id),
            current_cycle: 0,
            last_candidate_heard_cycle: 0,
            counters: NodeCounters::default(),
        }
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn prev_state(&self) -> NodeState {
        self.prev_state
    }

    /// Apply a role transition, refusing invalid ones.
    pub fn set_state(&mut self, new_state: NodeState) -> bool {
        if !is_valid_transition(self.state, new_state) {
            warn!(
                node = self.node_id,
                from = self.state.name(),
                to = new_state.name(),
                "invalid state transition refused"
            );
            return false;
        }
        if new_state != self.state {
            debug!(
                node = self.node_id,
                from = self.state.name(),
                to = new_state.name(),
                cycle = self.current_cycle,
                "state transition"
            );
        }
        self.prev_state = self.state;
        self.state = new_state;
        self.state_entry_cycle = self.current_cycle;
        true
    }

    pub fn state_entry_cycle(&self) -> u32 {
        self.state_entry_cycle
    }

    /// Advance to the next discovery cycle.
    pub fn advance_cycle(&mut self) {
        self.current_cycle += 1;
    }

    pub fn current_cycle(&self) -> u32 {
        self.current_cycle
    }

    // --- Position ---

    pub fn set_position(&mut self, x: f64, y: f64, z: f64) {
        self.position = Some(GpsLocation::new(x, y, z));
    }

    pub fn clear_position(&mut self) {
        self.position = None;
    }

    pub fn position(&self) -> Option<&GpsLocation> {
        self.position.as_ref()
    }

    // --- Neighbor table ---

    /// Insert or refresh a neighbor.
    ///
    /// Refreshing updates RSSI, hop count and the last-heard cycle. A new
    /// neighbor is refused once the table is full.
    pub fn upsert_neighbor(&mut self, node_id: u32, rssi: i8, hop_count: u8) -> bool {
        if let Some(existing) = self.neighbors.iter_mut().find(|n| n.node_id == node_id) {
            existing.last_rssi = rssi;
            existing.hop_count = hop_count;
            existing.last_heard_cycle = self.current_cycle;
            return true;
        }
        if self.neighbors.len() >= MAX_NEIGHBORS {
            return false;
        }
        self.neighbors.push(NeighborRecord {
            node_id,
            last_rssi: rssi,
            hop_count,
            last_heard_cycle: self.current_cycle,
            position: None,
            clusterhead_flag: false,
        });
        true
    }

    /// Attach an advertised position to a known neighbor.
    pub fn set_neighbor_position(&mut self, node_id: u32, position: GpsLocation) -> bool {
        match self.neighbors.iter_mut().find(|n| n.node_id == node_id) {
            Some(n) => {
                n.position = Some(position);
                true
            }
            None => false,
        }
    }

    /// Record a neighbor's clusterhead claim.
    pub fn set_neighbor_clusterhead(&mut self, node_id: u32, flag: bool) -> bool {
        match self.neighbors.iter_mut().find(|n| n.node_id == node_id) {
            Some(n) => {
                n.clusterhead_flag = flag;
                true
            }
            None => false,
        }
    }

    pub fn neighbor(&self, node_id: u32) -> Option<&NeighborRecord> {
        self.neighbors.iter().find(|n| n.node_id == node_id)
    }

    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    /// One-hop neighbor count.
    pub fn direct_neighbor_count(&self) -> u32 {
        self.neighbors.iter().filter(|n| n.hop_count == 1).count() as u32
    }

    /// Whether `node_id` is currently a one-hop neighbor.
    pub fn is_direct_neighbor(&self, node_id: u32) -> bool {
        self.neighbors
            .iter()
            .any(|n| n.node_id == node_id && n.hop_count == 1)
    }

    /// Positions of all position-valid neighbors.
    pub fn neighbor_positions(&self) -> Vec<GpsLocation> {
        self.neighbors.iter().filter_map(|n| n.position).collect()
    }

    /// Mean RSSI over the table; 0 when empty.
    pub fn average_rssi(&self) -> i8 {
        if self.neighbors.is_empty() {
            return 0;
        }
        let sum: i32 = self.neighbors.iter().map(|n| n.last_rssi as i32).sum();
        (sum / self.neighbors.len() as i32) as i8
    }

    /// Drop neighbors unheard for more than `max_age` completed cycles.
    pub fn prune_stale_neighbors(&mut self, max_age: u32) -> usize {
        let cycle = self.current_cycle;
        let before = self.neighbors.len();
        self.neighbors
            .retain(|n| cycle.saturating_sub(n.last_heard_cycle) <= max_age);
        before - self.neighbors.len()
    }

    // --- Adoption ---

    pub fn adopted_clusterhead(&self) -> Option<&Adoption> {
        self.adopted.as_ref()
    }

    pub fn adopt_clusterhead(&mut self, adoption: Adoption) {
        debug!(
            node = self.node_id,
            clusterhead = adoption.id,
            hops = adoption.hops,
            direct = adoption.direct_connections,
            "adopted clusterhead"
        );
        self.adopted = Some(adoption);
    }

    pub fn clear_adoption(&mut self) {
        self.adopted = None;
    }

    // --- Election metrics ---

    pub fn set_noise_level(&mut self, noise_level: f64) {
        self.noise_level = noise_level.max(0.0);
    }

    pub fn noise_level(&self) -> f64 {
        self.noise_level
    }

    pub fn set_crowding_factor(&mut self, crowding: f64) {
        self.crowding_factor = crowding.clamp(0.0, 1.0);
    }

    pub fn crowding_factor(&self) -> f64 {
        self.crowding_factor
    }

    pub fn set_candidacy_score(&mut self, score: f64) {
        self.candidacy_score = score;
    }

    pub fn candidacy_score(&self) -> f64 {
        self.candidacy_score
    }

    pub fn set_pdsf(&mut self, pdsf: u32) {
        self.pdsf = pdsf;
    }

    pub fn pdsf(&self) -> u32 {
        self.pdsf
    }

    pub fn election_hash(&self) -> u32 {
        self.election_hash
    }

    pub fn mark_candidate_heard(&mut self) {
        self.last_candidate_heard_cycle = self.current_cycle;
    }

    pub fn last_candidate_heard_cycle(&self) -> u32 {
        self.last_candidate_heard_cycle
    }

    // --- Counters ---

    pub fn counters(&self) -> NodeCounters {
        self.counters
    }

    pub fn inc_sent(&mut self) {
        self.counters.sent += 1;
    }

    pub fn inc_received(&mut self) {
        self.counters.received += 1;
    }

    pub fn inc_forwarded(&mut self) {
        self.counters.forwarded += 1;
    }

    pub fn inc_dropped(&mut self) {
        self.counters.dropped += 1;
    }

    /// Read-only view for external observers.
    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            node_id: self.node_id,
            state: self.state,
            counters: self.counters,
            adopted_clusterhead: self.adopted.map(|a| a.id),
            candidacy_score: self.candidacy_score,
            direct_connections: self.direct_neighbor_count(),
            total_neighbors: self.neighbors.len() as u32,
            noise_level: self.noise_level,
            crowding_factor: self.crowding_factor,
            pdsf: self.pdsf,
            current_cycle: self.current_cycle,
        }
    }
}
