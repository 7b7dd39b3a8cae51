//! Engine configuration.

use firefly_wire::{DEFAULT_TTL, INVALID_NODE_ID};

use crate::error::ConfigError;

/// Default discovery-slot duration in milliseconds.
pub const DEFAULT_SLOT_DURATION_MS: u32 = 100;

/// Default micro-slot count of the noisy phase.
pub const DEFAULT_NOISE_SLOTS: u32 = 10;

/// Default noisy micro-slot duration in milliseconds.
pub const DEFAULT_NOISE_SLOT_DURATION_MS: u32 = 200;

/// Default micro-slot count of the neighbor phase.
pub const DEFAULT_NEIGHBOR_SLOTS: u32 = 200;

/// Default neighbor micro-slot duration in milliseconds.
pub const DEFAULT_NEIGHBOR_SLOT_DURATION_MS: u32 = 10;

/// Default completed cycles before an unheard neighbor is pruned.
pub const DEFAULT_NEIGHBOR_TIMEOUT_CYCLES: u32 = 3;

/// Default GPS proximity threshold in meters.
pub const DEFAULT_PROXIMITY_THRESHOLD_M: f64 = 10.0;

/// Election/renouncement broadcast rounds.
pub const MAX_ELECTION_ROUNDS: u8 = 3;

/// Static parameters of one engine instance.
///
/// The send callback is not part of the configuration - it is a
/// [`PacketSink`](crate::PacketSink) value passed to
/// [`DiscoveryEngine::new`](crate::DiscoveryEngine::new), so a missing sink
/// is unrepresentable.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Unique device id; 0 is reserved and rejected.
    pub node_id: u32,
    /// Duration of each discovery slot (ms).
    pub slot_duration_ms: u32,
    /// Hop budget for locally-originated packets.
    pub initial_ttl: u8,
    /// GPS proximity threshold for the forwarding gate (m).
    pub proximity_threshold: f64,
    /// Micro-slots spent sampling noise.
    pub noise_slot_count: u32,
    /// Duration of each noisy micro-slot (ms).
    pub noise_slot_duration_ms: u32,
    /// Micro-slots spent sampling direct neighbors.
    pub neighbor_slot_count: u32,
    /// Duration of each neighbor micro-slot (ms).
    pub neighbor_slot_duration_ms: u32,
    /// Completed cycles before an unheard neighbor is pruned.
    pub neighbor_timeout_cycles: u32,
    /// Clusterhead class carried in announcements.
    pub class_id: u16,
    /// Minimum direct neighbors for candidacy.
    pub min_neighbors: u32,
    /// Minimum connection:noise ratio for candidacy.
    pub min_cn_ratio: f64,
    /// Seed for the engine's stochastic components.
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_id: INVALID_NODE_ID,
            slot_duration_ms: DEFAULT_SLOT_DURATION_MS,
            initial_ttl: DEFAULT_TTL,
            proximity_threshold: DEFAULT_PROXIMITY_THRESHOLD_M,
            noise_slot_count: DEFAULT_NOISE_SLOTS,
            noise_slot_duration_ms: DEFAULT_NOISE_SLOT_DURATION_MS,
            neighbor_slot_count: DEFAULT_NEIGHBOR_SLOTS,
            neighbor_slot_duration_ms: DEFAULT_NEIGHBOR_SLOT_DURATION_MS,
            neighbor_timeout_cycles: DEFAULT_NEIGHBOR_TIMEOUT_CYCLES,
            class_id: 0,
            min_neighbors: firefly_protocol::election::DEFAULT_MIN_NEIGHBORS,
            min_cn_ratio: firefly_protocol::election::DEFAULT_MIN_CN_RATIO,
            seed: 12345,
        }
    }
}

impl EngineConfig {
    /// Start from defaults with the given node id.
    pub fn for_node(node_id: u32) -> Self {
        Self {
            node_id,
            ..Default::default()
        }
    }

    /// Set the RNG seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the discovery-slot duration.
    #[must_use]
    pub fn with_slot_duration_ms(mut self, duration_ms: u32) -> Self {
        self.slot_duration_ms = duration_ms;
        self
    }

    /// Set the hop budget for locally-originated packets.
    #[must_use]
    pub fn with_initial_ttl(mut self, ttl: u8) -> Self {
        self.initial_ttl = ttl;
        self
    }

    /// Set the GPS proximity threshold.
    #[must_use]
    pub fn with_proximity_threshold(mut self, meters: f64) -> Self {
        self.proximity_threshold = meters;
        self
    }

    /// Set the candidacy admission thresholds.
    #[must_use]
    pub fn with_candidacy_thresholds(mut self, min_neighbors: u32, min_cn_ratio: f64) -> Self {
        self.min_neighbors = min_neighbors;
        self.min_cn_ratio = min_cn_ratio;
        self
    }

    /// Check the configuration for reserved ids and zero timing parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id == INVALID_NODE_ID {
            return Err(ConfigError::InvalidNodeId);
        }
        let timings = [
            ("slot_duration_ms", self.slot_duration_ms),
            ("noise_slot_count", self.noise_slot_count),
            ("noise_slot_duration_ms", self.noise_slot_duration_ms),
            ("neighbor_slot_count", self.neighbor_slot_count),
            ("neighbor_slot_duration_ms", self.neighbor_slot_duration_ms),
            ("neighbor_timeout_cycles", self.neighbor_timeout_cycles),
        ];
        for (name, value) in timings {
            if value == 0 {
                return Err(ConfigError::ZeroTimingParameter(name));
            }
        }
        Ok(())
    }
}
