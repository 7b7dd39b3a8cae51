//! Per-packet forwarding admission.
//!
//! A packet is forwarded only when all three gates pass:
//!
//! 1. **TTL** - the hop budget is not exhausted;
//! 2. **crowding** - a uniform draw clears a probability that falls from
//!    1.0 on a quiet channel toward `2 / direct_neighbors` on a saturated
//!    one (picky forwarding: the denser the neighborhood, the fewer nodes
//!    repeat each flood);
//! 3. **proximity** - when both endpoints know their position, the packet
//!    must have travelled strictly farther than the configured threshold
//!    since its last hop.
//!
//! The probabilistic gate draws from an RNG owned by the policy value and
//! seeded explicitly, so admission decisions are reproducible per node.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use firefly_wire::{DiscoveryPacket, GpsLocation};

/// Weakest RSSI considered when normalizing crowding (dBm).
pub const RSSI_MIN: f64 = -90.0;

/// Strongest RSSI considered when normalizing crowding (dBm).
pub const RSSI_MAX: f64 = -40.0;

/// Crowding below this forwards unconditionally.
const CROWDING_LOW: f64 = 0.1;

/// Crowding above this forwards at the base probability.
const CROWDING_HIGH: f64 = 0.9;

/// Normalized channel-density estimate from RSSI samples.
///
/// Mean sample strength is mapped linearly from [`RSSI_MIN`]..[`RSSI_MAX`]
/// onto [0, 1] and clamped; an empty sample set reads as a quiet channel.
pub fn crowding_factor(rssi_samples: &[i8]) -> f64 {
    if rssi_samples.is_empty() {
        return 0.0;
    }
    let mean = rssi_samples.iter().map(|&s| s as f64).sum::<f64>() / rssi_samples.len() as f64;
    ((mean - RSSI_MIN) / (RSSI_MAX - RSSI_MIN)).clamp(0.0, 1.0)
}

/// Noise level on the 0–100 scale carried by the node model.
pub fn noise_level(rssi_samples: &[i8]) -> f64 {
    crowding_factor(rssi_samples) * 100.0
}

/// Dequeue priority for a hop budget: higher TTL → numerically lower
/// (= better) priority. Strictly monotonic over the whole `u8` range.
pub fn priority_for_ttl(ttl: u8) -> u8 {
    255 - ttl
}

/// Euclidean distance between two positions (meters).
pub fn distance_between(a: &GpsLocation, b: &GpsLocation) -> f64 {
    a.distance_to(b)
}

/// The forwarding-admission policy with its own RNG state.
#[derive(Debug)]
pub struct ForwardPolicy {
    rng: StdRng,
}

impl ForwardPolicy {
    /// Create a policy seeded for reproducible admission draws.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Restart the admission draw sequence.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// The crowding gate alone.
    ///
    /// Forward probability is 1.0 up to crowding [`CROWDING_LOW`], then
    /// interpolates linearly down to `min(1, 2 / direct_neighbors)` at
    /// [`CROWDING_HIGH`] and stays there. Crowding 0 therefore always
    /// forwards, and the admission rate never increases with crowding.
    pub fn passes_crowding(&mut self, crowding_factor: f64, direct_neighbors: u32) -> bool {
        let crowding = crowding_factor.clamp(0.0, 1.0);
        let neighbors = direct_neighbors.max(1);
        let base_probability = (2.0 / neighbors as f64).min(1.0);

        let forward_probability = if crowding <= CROWDING_LOW {
            1.0
        } else if crowding >= CROWDING_HIGH {
            base_probability
        } else {
            let t = (crowding - CROWDING_LOW) / (CROWDING_HIGH - CROWDING_LOW);
            1.0 + t * (base_probability - 1.0)
        };

        self.rng.gen::<f64>() < forward_probability
    }

    /// The proximity gate alone: pass only when the packet travelled
    /// strictly farther than `threshold` meters since its last hop.
    /// Unknown positions on either side pass unconditionally.
    pub fn passes_proximity(
        local: Option<&GpsLocation>,
        last_hop: Option<&GpsLocation>,
        threshold: f64,
    ) -> bool {
        match (local, last_hop) {
            (Some(local), Some(last_hop)) => local.distance_to(last_hop) > threshold,
            _ => true,
        }
    }

    /// Full admission check: TTL, then crowding, then proximity.
    pub fn should_forward(
        &mut self,
        packet: &DiscoveryPacket,
        local_position: Option<&GpsLocation>,
        crowding_factor: f64,
        proximity_threshold: f64,
        direct_neighbors: u32,
    ) -> bool {
        if packet.ttl == 0 {
            return false;
        }
        if !self.passes_crowding(crowding_factor, direct_neighbors) {
            return false;
        }
        Self::passes_proximity(local_position, packet.position.as_ref(), proximity_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TRIALS: u32 = 2_000;

    fn forward_rate(crowding: f64, neighbors: u32) -> f64 {
        let mut policy = ForwardPolicy::new(0xF1E1);
        let mut passed = 0;
        for _ in 0..TRIALS {
            if policy.passes_crowding(crowding, neighbors) {
                passed += 1;
            }
        }
        passed as f64 / TRIALS as f64
    }

    #[test]
    fn ttl_zero_never_forwards() {
        let mut policy = ForwardPolicy::new(1);
        let packet = DiscoveryPacket::new(1, 0);
        for _ in 0..100 {
            assert!(!policy.should_forward(&packet, None, 0.0, 10.0, 5));
        }
    }

    #[test]
    fn quiet_channel_always_forwards() {
        let mut policy = ForwardPolicy::new(2);
        for _ in 0..TRIALS {
            assert!(policy.passes_crowding(0.0, 50));
        }
    }

    #[test]
    fn forward_rate_decreases_with_crowding() {
        // 10 direct neighbors → base probability 0.2, so the curve has room
        // to separate the three operating points.
        let low = forward_rate(0.2, 10);
        let mid = forward_rate(0.5, 10);
        let high = forward_rate(0.8, 10);
        assert!(low > mid, "rate(0.2)={low} should beat rate(0.5)={mid}");
        assert!(mid > high, "rate(0.5)={mid} should beat rate(0.8)={high}");
    }

    #[test]
    fn saturated_channel_approaches_base_probability() {
        let rate = forward_rate(1.0, 10);
        assert!((rate - 0.2).abs() < 0.05, "rate {rate} far from base 0.2");
    }

    #[test]
    fn sparse_neighborhoods_forward_regardless_of_crowding() {
        // With ≤ 2 direct neighbors the base probability saturates at 1.
        let mut policy = ForwardPolicy::new(3);
        for _ in 0..TRIALS {
            assert!(policy.passes_crowding(0.95, 2));
        }
    }

    #[test]
    fn proximity_equality_fails() {
        let local = GpsLocation::new(0.0, 0.0, 0.0);
        let hop = GpsLocation::new(10.0, 0.0, 0.0);
        assert!(!ForwardPolicy::passes_proximity(Some(&local), Some(&hop), 10.0));
        assert!(ForwardPolicy::passes_proximity(Some(&local), Some(&hop), 9.999));
        assert!(!ForwardPolicy::passes_proximity(Some(&local), Some(&hop), 10.001));
    }

    #[test]
    fn missing_position_passes_proximity() {
        let local = GpsLocation::new(0.0, 0.0, 0.0);
        assert!(ForwardPolicy::passes_proximity(None, None, 10.0));
        assert!(ForwardPolicy::passes_proximity(Some(&local), None, 10.0));
        assert!(ForwardPolicy::passes_proximity(None, Some(&local), 10.0));
    }

    #[test]
    fn crowding_factor_normalizes_rssi() {
        assert_eq!(crowding_factor(&[]), 0.0);
        assert_eq!(crowding_factor(&[-90, -95, -100]), 0.0);
        assert_eq!(crowding_factor(&[-40, -35]), 1.0);
        let mid = crowding_factor(&[-65]);
        assert!((mid - 0.5).abs() < 1e-9);
    }

    #[test]
    fn noise_level_is_scaled_crowding() {
        assert_eq!(noise_level(&[]), 0.0);
        let n = noise_level(&[-65]);
        assert!((n - 50.0).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn priority_strictly_monotonic(a in 0u8..=255, b in 0u8..=255) {
            prop_assume!(a < b);
            prop_assert!(priority_for_ttl(a) > priority_for_ttl(b));
        }
    }
}
