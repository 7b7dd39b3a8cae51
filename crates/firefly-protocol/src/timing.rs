//! Stochastic listen/broadcast slot selection.
//!
//! Before the discovery cycle starts, a node spends two phases on
//! micro-slots whose role (listen or transmit) is chosen at random each
//! slot:
//!
//! - the **noisy** phase mostly listens, sampling ambient RSSI for the
//!   crowding estimate;
//! - the **neighbor** phase advertises the node's presence on a
//!   majority-listen schedule whose transmit budget shrinks as the channel
//!   gets more crowded, so dense neighborhoods collide less.
//!
//! The randomness comes from a seeded, reseedable [`StdRng`] owned by the
//! timing state; two nodes with the same seed make the same slot choices.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Default listen probability when none is configured.
pub const DEFAULT_LISTEN_RATIO: f64 = 0.8;

/// Default micro-slot count for the noisy phase.
pub const NOISE_DEFAULT_SLOTS: u32 = 10;

/// Listen ratio used while sampling noise.
pub const NOISE_LISTEN_RATIO: f64 = 0.8;

/// Default micro-slot count for the neighbor-sampling phase.
pub const NEIGHBOR_DEFAULT_SLOTS: u32 = 200;

/// Fewest transmit slots the neighbor profile will budget per cycle.
pub const NEIGHBOR_MIN_TX_SLOTS: u32 = 4;

/// Most transmit slots the neighbor profile will budget per cycle.
pub const NEIGHBOR_MAX_TX_SLOTS: u32 = 40;

/// Broadcast attempts before a message is abandoned.
pub const MAX_RETRIES: u32 = 3;

/// Which phase profile the timing state follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    /// Noise sampling: high fixed listen ratio.
    Noisy,
    /// Neighbor sampling: listen ratio adapted to channel crowding.
    Stochastic,
}

/// The role chosen for one micro-slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotDecision {
    Listen,
    Broadcast,
}

/// Per-phase stochastic timing state.
#[derive(Debug)]
pub struct BroadcastTiming {
    kind: ScheduleKind,
    num_slots: u32,
    slot_duration_ms: u32,
    listen_ratio: f64,
    crowding_factor: f64,

    current_slot: u32,
    decision: SlotDecision,
    broadcasts_this_cycle: u32,
    max_broadcast_slots: u32,

    rng: StdRng,

    max_retries: u32,
    retry_count: u32,
    message_sent: bool,

    total_broadcast_slots: u32,
    total_listen_slots: u32,
    successful_broadcasts: u32,
    failed_broadcasts: u32,
}

impl BroadcastTiming {
    /// Create a timing state for one phase.
    ///
    /// A zero `num_slots` or an out-of-range `listen_ratio` falls back to
    /// the phase default.
    pub fn new(kind: ScheduleKind, num_slots: u32, slot_duration_ms: u32, listen_ratio: f64, seed: u64) -> Self {
        let default_slots = match kind {
            ScheduleKind::Noisy => NOISE_DEFAULT_SLOTS,
            ScheduleKind::Stochastic => NEIGHBOR_DEFAULT_SLOTS,
        };
        let num_slots = if num_slots == 0 { default_slots } else { num_slots };
        let listen_ratio = if (0.0..=1.0).contains(&listen_ratio) {
            listen_ratio
        } else {
            match kind {
                ScheduleKind::Noisy => NOISE_LISTEN_RATIO,
                ScheduleKind::Stochastic => DEFAULT_LISTEN_RATIO,
            }
        };

        let mut timing = Self {
            kind,
            num_slots,
            slot_duration_ms,
            listen_ratio,
            crowding_factor: 0.5,
            current_slot: 0,
            decision: SlotDecision::Listen,
            broadcasts_this_cycle: 0,
            max_broadcast_slots: u32::MAX,
            rng: StdRng::seed_from_u64(seed),
            max_retries: MAX_RETRIES,
            retry_count: 0,
            message_sent: false,
            total_broadcast_slots: 0,
            total_listen_slots: 0,
            successful_broadcasts: 0,
            failed_broadcasts: 0,
        };
        if kind == ScheduleKind::Stochastic {
            timing.apply_neighbor_profile();
        }
        timing
    }

    /// Reseed the slot chooser, restarting the pseudo-random sequence.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Update the crowding estimate and, for the neighbor profile, rederive
    /// the transmit budget and listen ratio from it.
    pub fn set_crowding(&mut self, crowding_factor: f64) {
        self.crowding_factor = crowding_factor.clamp(0.0, 1.0);
        if self.kind == ScheduleKind::Stochastic {
            self.apply_neighbor_profile();
            self.broadcasts_this_cycle = 0;
        }
    }

    /// Transmit-slot budget for the current crowding level: the budget
    /// shrinks linearly from the max toward the min as crowding rises.
    fn neighbor_tx_slots(crowding: f64) -> u32 {
        let crowding = crowding.clamp(0.0, 1.0);
        let range = (NEIGHBOR_MAX_TX_SLOTS - NEIGHBOR_MIN_TX_SLOTS) as f64;
        let value = NEIGHBOR_MIN_TX_SLOTS as f64 + (1.0 - crowding) * range;
        (value.ceil() as u32).clamp(NEIGHBOR_MIN_TX_SLOTS, NEIGHBOR_MAX_TX_SLOTS)
    }

    fn apply_neighbor_profile(&mut self) {
        let tx_slots = Self::neighbor_tx_slots(self.crowding_factor);
        self.max_broadcast_slots = tx_slots;
        if self.num_slots > 0 {
            let ratio = 1.0 - tx_slots as f64 / self.num_slots as f64;
            self.listen_ratio = ratio.clamp(0.0, 1.0);
        }
    }

    /// Advance one micro-slot and choose its role.
    pub fn advance_slot(&mut self) -> SlotDecision {
        self.current_slot = (self.current_slot + 1) % self.num_slots;
        if self.current_slot == 0 {
            self.broadcasts_this_cycle = 0;
        }

        let draw: f64 = self.rng.gen();
        let forced_listen = self.kind == ScheduleKind::Stochastic
            && self.broadcasts_this_cycle >= self.max_broadcast_slots;

        self.decision = if forced_listen || draw < self.listen_ratio {
            self.total_listen_slots += 1;
            SlotDecision::Listen
        } else {
            self.total_broadcast_slots += 1;
            if self.kind == ScheduleKind::Stochastic {
                self.broadcasts_this_cycle += 1;
            }
            SlotDecision::Broadcast
        };
        self.decision
    }

    /// The role chosen for the current slot.
    pub fn decision(&self) -> SlotDecision {
        self.decision
    }

    pub fn should_broadcast(&self) -> bool {
        self.decision == SlotDecision::Broadcast
    }

    /// Record a successful broadcast; clears the retry counter.
    pub fn record_success(&mut self) {
        self.successful_broadcasts += 1;
        self.message_sent = true;
        self.retry_count = 0;
    }

    /// Record a failed broadcast attempt.
    ///
    /// Returns `true` while the retry budget allows another attempt; once
    /// the budget is spent the counter resets and the message is abandoned.
    pub fn record_failure(&mut self) -> bool {
        self.failed_broadcasts += 1;
        self.retry_count += 1;
        if self.retry_count < self.max_retries {
            return true;
        }
        self.retry_count = 0;
        false
    }

    /// Forget the in-flight message and its retries.
    pub fn reset_retry(&mut self) {
        self.retry_count = 0;
        self.message_sent = false;
    }

    /// Fraction of broadcast attempts that succeeded.
    pub fn success_rate(&self) -> f64 {
        let attempts = self.successful_broadcasts + self.failed_broadcasts;
        if attempts == 0 {
            return 0.0;
        }
        self.successful_broadcasts as f64 / attempts as f64
    }

    /// Realized listen fraction over all classified slots.
    pub fn actual_listen_ratio(&self) -> f64 {
        let total = self.total_listen_slots + self.total_broadcast_slots;
        if total == 0 {
            return 0.0;
        }
        self.total_listen_slots as f64 / total as f64
    }

    pub fn kind(&self) -> ScheduleKind {
        self.kind
    }

    pub fn num_slots(&self) -> u32 {
        self.num_slots
    }

    pub fn slot_duration_ms(&self) -> u32 {
        self.slot_duration_ms
    }

    pub fn current_slot(&self) -> u32 {
        self.current_slot
    }

    /// Configured listen probability.
    pub fn listen_ratio(&self) -> f64 {
        self.listen_ratio
    }

    /// Transmit-slot budget per pass (neighbor profile only).
    pub fn max_broadcast_slots(&self) -> u32 {
        self.max_broadcast_slots
    }

    pub fn message_sent(&self) -> bool {
        self.message_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_per_phase() {
        let noisy = BroadcastTiming::new(ScheduleKind::Noisy, 0, 200, -1.0, 1);
        assert_eq!(noisy.num_slots(), NOISE_DEFAULT_SLOTS);
        assert!((noisy.listen_ratio() - NOISE_LISTEN_RATIO).abs() < f64::EPSILON);

        let neighbor = BroadcastTiming::new(ScheduleKind::Stochastic, 0, 10, -1.0, 1);
        assert_eq!(neighbor.num_slots(), NEIGHBOR_DEFAULT_SLOTS);
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = BroadcastTiming::new(ScheduleKind::Noisy, 50, 10, 0.8, 77);
        let mut b = BroadcastTiming::new(ScheduleKind::Noisy, 50, 10, 0.8, 77);
        for _ in 0..200 {
            assert_eq!(a.advance_slot(), b.advance_slot());
        }
    }

    #[test]
    fn reseed_restarts_sequence() {
        let mut timing = BroadcastTiming::new(ScheduleKind::Noisy, 50, 10, 0.8, 77);
        let first: Vec<_> = (0..50).map(|_| timing.advance_slot()).collect();
        timing.reseed(77);
        let second: Vec<_> = (0..50).map(|_| timing.advance_slot()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn noisy_phase_mostly_listens() {
        let mut timing = BroadcastTiming::new(ScheduleKind::Noisy, 100, 10, 0.8, 3);
        for _ in 0..5_000 {
            timing.advance_slot();
        }
        let ratio = timing.actual_listen_ratio();
        assert!(ratio > 0.75 && ratio < 0.85, "realized ratio {ratio}");
    }

    #[test]
    fn crowded_channel_listens_more() {
        let mut quiet = BroadcastTiming::new(ScheduleKind::Stochastic, 200, 10, -1.0, 5);
        quiet.set_crowding(0.0);
        let mut dense = BroadcastTiming::new(ScheduleKind::Stochastic, 200, 10, -1.0, 5);
        dense.set_crowding(1.0);

        assert!(dense.listen_ratio() > quiet.listen_ratio());
        assert!(dense.max_broadcast_slots() < quiet.max_broadcast_slots());
        assert_eq!(dense.max_broadcast_slots(), NEIGHBOR_MIN_TX_SLOTS);
        assert_eq!(quiet.max_broadcast_slots(), NEIGHBOR_MAX_TX_SLOTS);
    }

    #[test]
    fn broadcast_budget_caps_each_pass() {
        let mut timing = BroadcastTiming::new(ScheduleKind::Stochastic, 200, 10, 0.0, 9);
        timing.set_crowding(1.0);
        let budget = timing.max_broadcast_slots();

        let mut broadcasts = 0;
        // one full pass over the micro-slots
        for _ in 0..timing.num_slots() {
            let decision = timing.advance_slot();
            if timing.current_slot() == 0 {
                // wrapped into the next pass
                break;
            }
            if decision == SlotDecision::Broadcast {
                broadcasts += 1;
            }
        }
        assert!(broadcasts <= budget, "{broadcasts} > budget {budget}");
    }

    #[test]
    fn retry_budget_is_bounded() {
        let mut timing = BroadcastTiming::new(ScheduleKind::Noisy, 10, 10, 0.8, 1);
        assert!(timing.record_failure());
        assert!(timing.record_failure());
        // third failure exhausts the budget of 3 attempts
        assert!(!timing.record_failure());
        // budget resets afterwards
        assert!(timing.record_failure());
    }

    #[test]
    fn success_clears_retries_and_tracks_rate() {
        let mut timing = BroadcastTiming::new(ScheduleKind::Noisy, 10, 10, 0.8, 1);
        timing.record_failure();
        timing.record_success();
        assert!(timing.message_sent());
        assert!((timing.success_rate() - 0.5).abs() < f64::EPSILON);

        timing.reset_retry();
        assert!(!timing.message_sent());
    }
}
