//! Clusterhead election numerics.
//!
//! Everything a node needs to judge its own fitness as a cluster
//! coordinator, computed purely from local observations:
//!
//! - a time-boxed RSSI measurement window feeding the crowding factor;
//! - the candidacy predicate and its deterministic score - no tunable
//!   weights beyond the two admission thresholds;
//! - the geographic spread of position-valid neighbors (telemetry only, it
//!   never gates candidacy);
//! - the PDSF flood-reach recurrence with its double-count exclusion;
//! - the deterministic slot hash carried in announcements.

use firefly_wire::{ElectionData, GpsLocation, MAX_CLUSTER_SIZE};

use crate::forwarding::crowding_factor;

/// Capacity of the RSSI measurement ring.
pub const RSSI_BUFFER_SIZE: usize = 100;

/// Default minimum direct neighbors for candidacy.
pub const DEFAULT_MIN_NEIGHBORS: u32 = 10;

/// Default minimum connection:noise ratio for candidacy.
pub const DEFAULT_MIN_CN_RATIO: f64 = 5.0;

/// Connectivity metrics recomputed once per discovery cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConnectivityMetrics {
    /// One-hop neighbor count.
    pub direct_connections: u32,
    /// All known neighbors, any hop distance.
    pub total_neighbors: u32,
    /// Latest finalized crowding factor.
    pub crowding_factor: f64,
    /// `direct / (1 + crowding)`.
    pub connection_noise_ratio: f64,
    /// Spatial spread of position-valid neighbors.
    pub geographic_distribution: f64,
}

/// Election state: the RSSI window, thresholds and cached metrics.
#[derive(Debug)]
pub struct ElectionState {
    rssi_samples: [i8; RSSI_BUFFER_SIZE],
    rssi_head: usize,
    rssi_count: usize,
    measurement_active: bool,
    last_crowding_factor: f64,

    min_neighbors: u32,
    min_cn_ratio: f64,

    metrics: ConnectivityMetrics,
}

impl Default for ElectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ElectionState {
    pub fn new() -> Self {
        Self {
            rssi_samples: [0; RSSI_BUFFER_SIZE],
            rssi_head: 0,
            rssi_count: 0,
            measurement_active: false,
            last_crowding_factor: 0.0,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_cn_ratio: DEFAULT_MIN_CN_RATIO,
            metrics: ConnectivityMetrics::default(),
        }
    }

    /// Override the candidacy admission thresholds.
    pub fn set_thresholds(&mut self, min_neighbors: u32, min_cn_ratio: f64) {
        self.min_neighbors = min_neighbors;
        self.min_cn_ratio = min_cn_ratio;
    }

    /// Open the measurement window; samples are only accepted while open.
    pub fn begin_measurement(&mut self) {
        self.rssi_head = 0;
        self.rssi_count = 0;
        self.measurement_active = true;
    }

    /// Close the window, finalize and cache the crowding factor.
    pub fn end_measurement(&mut self) -> f64 {
        let factor = self.crowding();
        self.last_crowding_factor = factor;
        self.metrics.crowding_factor = factor;
        self.measurement_active = false;
        self.rssi_head = 0;
        self.rssi_count = 0;
        factor
    }

    pub fn is_measurement_active(&self) -> bool {
        self.measurement_active
    }

    /// Record one RSSI sample; ignored while the window is closed. The ring
    /// evicts the oldest sample once full.
    pub fn add_rssi_sample(&mut self, rssi: i8) {
        if !self.measurement_active {
            return;
        }
        let tail = (self.rssi_head + self.rssi_count) % RSSI_BUFFER_SIZE;
        self.rssi_samples[tail] = rssi;
        if self.rssi_count < RSSI_BUFFER_SIZE {
            self.rssi_count += 1;
        } else {
            self.rssi_head = (self.rssi_head + 1) % RSSI_BUFFER_SIZE;
        }
    }

    /// Crowding factor over the samples gathered so far; with an empty
    /// buffer the last finalized factor is reported.
    pub fn crowding(&self) -> f64 {
        if self.rssi_count == 0 {
            return self.last_crowding_factor;
        }
        let mut samples = Vec::with_capacity(self.rssi_count);
        for i in 0..self.rssi_count {
            samples.push(self.rssi_samples[(self.rssi_head + i) % RSSI_BUFFER_SIZE]);
        }
        crowding_factor(&samples)
    }

    pub fn sample_count(&self) -> usize {
        self.rssi_count
    }

    /// The last finalized crowding factor.
    pub fn last_crowding_factor(&self) -> f64 {
        self.last_crowding_factor
    }

    /// Recompute the cached connectivity metrics from the neighbor table
    /// summary of the owning node.
    pub fn update_metrics(
        &mut self,
        direct_connections: u32,
        total_neighbors: u32,
        neighbor_positions: &[GpsLocation],
    ) -> ConnectivityMetrics {
        self.metrics.direct_connections = direct_connections;
        self.metrics.total_neighbors = total_neighbors;
        self.metrics.crowding_factor = self.last_crowding_factor;
        self.metrics.connection_noise_ratio =
            direct_connections as f64 / (1.0 + self.last_crowding_factor);
        self.metrics.geographic_distribution = geographic_distribution(neighbor_positions);
        self.metrics
    }

    pub fn metrics(&self) -> ConnectivityMetrics {
        self.metrics
    }

    /// The candidacy predicate over the cached metrics.
    pub fn should_become_candidate(&self) -> bool {
        self.metrics.direct_connections >= self.min_neighbors
            && self.metrics.connection_noise_ratio >= self.min_cn_ratio
    }
}

/// Deterministic candidacy score:
/// `direct + (direct / MAX_CLUSTER_SIZE) / (noise + 1)`.
pub fn candidacy_score(direct_connections: u32, noise_level: f64) -> f64 {
    let base = direct_connections as f64;
    let neighbor_ratio = direct_connections as f64 / MAX_CLUSTER_SIZE as f64;
    base + neighbor_ratio / (noise_level + 1.0)
}

/// Spatial spread of neighbor positions: standard deviation about the
/// centroid, scaled by 1/100 and capped at 1. Fewer than two positions
/// reads as 0.
pub fn geographic_distribution(positions: &[GpsLocation]) -> f64 {
    if positions.len() < 2 {
        return 0.0;
    }
    let n = positions.len() as f64;
    let cx = positions.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = positions.iter().map(|p| p.y).sum::<f64>() / n;
    let cz = positions.iter().map(|p| p.z).sum::<f64>() / n;

    let variance = positions
        .iter()
        .map(|p| {
            let dx = p.x - cx;
            let dy = p.y - cy;
            let dz = p.z - cz;
            dx * dx + dy * dy + dz * dz
        })
        .sum::<f64>()
        / n;

    (variance.sqrt() / 100.0).min(1.0)
}

/// One step of the PDSF recurrence.
///
/// `Π' = Π × unique` (a zeroed carry is treated as 1 so the first hop
/// contributes its full count) and `pdsf' = pdsf + Π'`, both capped at the
/// cluster-size ceiling. Returns `(pdsf', Π')`.
pub fn pdsf_step(previous_pdsf: u32, previous_pi: u32, unique_connections: u32) -> (u32, u32) {
    let baseline_pi = if previous_pi == 0 { 1u64 } else { previous_pi as u64 };
    let pi_term = (baseline_pi * unique_connections as u64).min(u32::MAX as u64);
    let updated = (previous_pdsf as u64 + pi_term).min(MAX_CLUSTER_SIZE as u64);
    (updated as u32, pi_term as u32)
}

/// Fold one forwarding hop into an announcement's PDSF fields.
///
/// `already_reached` is the hop's estimate of how many of its direct
/// neighbors earlier hops already counted; it is clamped to the direct
/// count. When the history trail is full the announcement keeps its current
/// estimate. Returns the updated PDSF.
pub fn update_pdsf(election: &mut ElectionData, direct_connections: u32, already_reached: u32) -> u32 {
    let unique = direct_connections - already_reached.min(direct_connections);
    if !election.push_history(unique) {
        return election.pdsf;
    }
    let (pdsf, pi) = pdsf_step(election.pdsf, election.last_pi, unique);
    election.pdsf = pdsf;
    election.last_pi = pi;
    election.pdsf
}

/// Whether a flood-reach estimate has hit the cluster-size ceiling.
pub fn pdsf_ceiling_reached(pdsf: u32) -> bool {
    pdsf >= MAX_CLUSTER_SIZE
}

/// Deterministic FNV-1a hash of a node id, reserved for time/frequency
/// slot assignment.
pub fn slot_hash(node_id: u32) -> u32 {
    let mut hash = 2166136261u32;
    for byte in node_id.to_le_bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}
