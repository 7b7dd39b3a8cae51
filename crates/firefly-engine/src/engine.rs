//! The tick-driven discovery engine.
//!
//! Composes the protocol components into one automaton per device:
//!
//! ```text
//!          ┌────────── tick ──────────┐
//!          ▼                          │
//!   Noisy (RSSI sampling)             │
//!          ▼ window closes            │
//!   Neighbor (stochastic adverts)     │
//!          ▼ micro-slots exhausted    │
//!   Discovery (4-slot cycle) ─────────┘ cycle completion
//! ```
//!
//! Completing the noisy phase finalizes the crowding factor; completing a
//! discovery cycle prunes stale neighbors, ages the forward queue,
//! recomputes the election metrics and re-evaluates the node's role.
//!
//! The engine is purely reactive: `tick` and `receive` are the only entry
//! points that mutate state, and both run to completion synchronously.

use tracing::{debug, warn};

use firefly_protocol::cycle::{self, DiscoveryCycle, SlotKind};
use firefly_protocol::election::{self, ElectionState};
use firefly_protocol::forwarding::ForwardPolicy;
use firefly_protocol::queue::ForwardQueue;
use firefly_protocol::timing::{BroadcastTiming, ScheduleKind, SlotDecision};
use firefly_wire::{DiscoveryPacket, ElectionPacket, Packet};

use crate::config::{EngineConfig, MAX_ELECTION_ROUNDS};
use crate::error::ConfigError;
use crate::node::{Adoption, Node, NodeSnapshot, NodeState};

/// Capability for transmitting an outbound packet.
///
/// Invoked synchronously from within `tick`; the engine never retains the
/// packet after the call returns.
pub trait PacketSink {
    fn send(&mut self, packet: &Packet);
}

/// Dedup records outlive a neighbor the same number of cycles.
fn queue_retention_ms(config: &EngineConfig) -> u64 {
    config.neighbor_timeout_cycles as u64
        * config.slot_duration_ms as u64
        * cycle::NUM_SLOTS as u64
}

/// The engine's phase state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Sampling ambient RSSI for the crowding estimate.
    Noisy,
    /// Advertising presence on the stochastic neighbor schedule.
    Neighbor,
    /// Running the 4-slot discovery cycle.
    Discovery,
}

/// One device's discovery/election automaton.
pub struct DiscoveryEngine {
    config: EngineConfig,
    sink: Box<dyn PacketSink>,

    cycle: DiscoveryCycle,
    queue: ForwardQueue,
    node: Node,
    election: ElectionState,
    policy: ForwardPolicy,
    noisy_timing: BroadcastTiming,
    neighbor_timing: BroadcastTiming,

    phase: Phase,
    noisy_slots_completed: u32,
    neighbor_slots_completed: u32,

    election_rounds_remaining: u8,
    renouncement_rounds_remaining: u8,

    last_tick_ms: u64,
}

impl DiscoveryEngine {
    /// Validate the configuration and build an engine around the sink.
    pub fn new(config: EngineConfig, sink: Box<dyn PacketSink>) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut election = ElectionState::new();
        election.set_thresholds(config.min_neighbors, config.min_cn_ratio);
        election.begin_measurement();

        let noisy_timing = BroadcastTiming::new(
            ScheduleKind::Noisy,
            config.noise_slot_count,
            config.noise_slot_duration_ms,
            -1.0,
            config.seed,
        );
        let neighbor_timing = BroadcastTiming::new(
            ScheduleKind::Stochastic,
            config.neighbor_slot_count,
            config.neighbor_slot_duration_ms,
            -1.0,
            config.seed.wrapping_add(1),
        );
        let policy = ForwardPolicy::new(config.seed.wrapping_add(2));
        let retention_ms = queue_retention_ms(&config);

        Ok(Self {
            cycle: DiscoveryCycle::new(config.slot_duration_ms),
            queue: ForwardQueue::with_retention_ms(retention_ms),
            node: Node::new(config.node_id),
            election,
            policy,
            noisy_timing,
            neighbor_timing,
            phase: Phase::Noisy,
            noisy_slots_completed: 0,
            neighbor_slots_completed: 0,
            election_rounds_remaining: 0,
            renouncement_rounds_remaining: 0,
            last_tick_ms: 0,
            config,
            sink,
        })
    }

    /// Advance one slot/micro-slot boundary.
    pub fn tick(&mut self, now_ms: u64) {
        self.last_tick_ms = now_ms;

        if self.node.state() == NodeState::Init {
            self.node.set_state(NodeState::Discovery);
        }

        match self.phase {
            Phase::Noisy => self.tick_noisy(),
            Phase::Neighbor => self.tick_neighbor(),
            Phase::Discovery => self.tick_discovery(now_ms),
        }
    }

    fn tick_noisy(&mut self) {
        if self.noisy_timing.advance_slot() == SlotDecision::Broadcast {
            self.send_discovery_advert();
        }
        self.noisy_slots_completed += 1;
        if self.noisy_slots_completed >= self.config.noise_slot_count {
            self.finalize_noise_phase();
        }
    }

    /// Close the measurement window and propagate the crowding estimate.
    fn finalize_noise_phase(&mut self) {
        let crowding = self.election.end_measurement();
        self.node.set_crowding_factor(crowding);
        self.node.set_noise_level(crowding * 100.0);
        self.neighbor_timing.set_crowding(crowding);
        debug!(node = self.node.node_id(), crowding, "noise phase complete");

        self.phase = Phase::Neighbor;
        self.neighbor_slots_completed = 0;
    }

    fn tick_neighbor(&mut self) {
        if self.neighbor_timing.advance_slot() == SlotDecision::Broadcast {
            self.send_discovery_advert();
        }
        self.neighbor_slots_completed += 1;
        if self.neighbor_slots_completed >= self.config.neighbor_slot_count {
            self.phase = Phase::Discovery;
            self.cycle.start();
        }
    }

    fn tick_discovery(&mut self, now_ms: u64) {
        if !self.cycle.is_running() && !self.cycle.start() {
            warn!(node = self.node.node_id(), "cycle already running");
        }

        if let Some(kind) = self.cycle.execute_slot() {
            match kind {
                SlotKind::OwnMessage => self.handle_own_slot(),
                SlotKind::Forwarding(slot) => self.handle_forward_slot(slot),
            }
        }

        if self.cycle.advance_slot().is_some() {
            self.on_cycle_complete(now_ms);
        }
    }

    /// Slot 0: one transmission, renouncement before announcement before
    /// ordinary advertisement.
    fn handle_own_slot(&mut self) {
        if self.renouncement_rounds_remaining > 0 {
            self.send_renouncement();
            self.renouncement_rounds_remaining -= 1;
            return;
        }
        if self.node.state() == NodeState::ClusterheadCandidate && self.election_rounds_remaining > 0
        {
            self.send_election_announcement();
            self.election_rounds_remaining -= 1;
            return;
        }
        self.send_discovery_advert();
    }

    /// Slots 1–3: forward at most one queued packet.
    fn handle_forward_slot(&mut self, slot: u8) {
        if !cycle::is_forwarding_slot(slot) {
            warn!(node = self.node.node_id(), slot, "invalid forwarding slot");
            return;
        }
        self.forward_next();
    }

    fn forward_next(&mut self) {
        let admitted = match self.queue.peek() {
            Some(packet) => self.policy.should_forward(
                packet.base(),
                self.node.position(),
                self.node.crowding_factor(),
                self.config.proximity_threshold,
                self.node.direct_neighbor_count(),
            ),
            None => return,
        };

        let Some(mut packet) = self.queue.dequeue() else {
            return;
        };

        if !admitted {
            self.node.inc_dropped();
            return;
        }

        let base = packet.base_mut();
        if !base.decrement_ttl() {
            self.node.inc_dropped();
            return;
        }
        if !base.push_path(self.node.node_id()) {
            // A full path would defeat downstream loop detection.
            self.node.inc_dropped();
            return;
        }
        base.position = self.node.position().copied();

        if let Packet::Election(announcement) = &mut packet {
            if !announcement.election.is_renouncement {
                let already_reached = announcement
                    .base
                    .path
                    .iter()
                    .filter(|&&id| self.node.is_direct_neighbor(id))
                    .count() as u32;
                let updated = election::update_pdsf(
                    &mut announcement.election,
                    self.node.direct_neighbor_count(),
                    already_reached,
                );
                if election::pdsf_ceiling_reached(updated) {
                    debug!(
                        node = self.node.node_id(),
                        pdsf = updated,
                        "flood reached cluster ceiling, not forwarding"
                    );
                    self.node.inc_dropped();
                    return;
                }
            }
        }

        self.sink.send(&packet);
        self.node.inc_forwarded();
    }

    /// End-of-cycle bookkeeping and role evaluation.
    fn on_cycle_complete(&mut self, now_ms: u64) {
        self.node.advance_cycle();
        self.node
            .prune_stale_neighbors(self.config.neighbor_timeout_cycles);

        self.queue
            .clean_old_entries(now_ms, self.queue.retention_ms());

        let direct = self.node.direct_neighbor_count();
        let positions = self.node.neighbor_positions();
        self.election
            .update_metrics(direct, self.node.neighbor_count() as u32, &positions);
        self.node
            .set_candidacy_score(election::candidacy_score(direct, self.node.noise_level()));

        self.evaluate_role();

        // One cycle per phase loop; the next begins with a fresh noise window.
        self.cycle.stop();
        self.phase = Phase::Noisy;
        self.noisy_slots_completed = 0;
        self.election.begin_measurement();
    }

    fn evaluate_role(&mut self) {
        match self.node.state() {
            NodeState::Discovery => {
                if self.node.adopted_clusterhead().is_some() && !self.election.should_become_candidate()
                {
                    // Already aligned and not competing.
                    self.node.set_state(NodeState::Edge);
                    self.election_rounds_remaining = 0;
                } else if self.election.should_become_candidate() {
                    self.node.clear_adoption();
                    self.node.set_state(NodeState::ClusterheadCandidate);
                    self.election_rounds_remaining = MAX_ELECTION_ROUNDS;
                }
            }
            NodeState::ClusterheadCandidate => {
                if self.election_rounds_remaining == 0 {
                    self.node.set_state(NodeState::Clusterhead);
                }
            }
            _ => {}
        }
    }

    /// Deliver a demodulated packet to the engine.
    ///
    /// Returns whether the packet was admitted to the forward queue.
    pub fn receive(&mut self, packet: &Packet, rssi: i8, now_ms: u64) -> bool {
        let base = packet.base();
        if base.sender_id == self.node.node_id() {
            debug!(node = self.node.node_id(), "ignoring own packet");
            return false;
        }

        if self.election.is_measurement_active() {
            self.election.add_rssi_sample(rssi);
        }

        let hops = base.hop_distance().max(1).min(u8::MAX as usize) as u8;
        self.node.upsert_neighbor(base.sender_id, rssi, hops);
        if let Some(position) = base.position {
            self.node.set_neighbor_position(base.sender_id, position);
        }
        self.node
            .set_neighbor_clusterhead(base.sender_id, base.clusterhead_flag);

        if let Packet::Election(announcement) = packet {
            if announcement.election.is_renouncement {
                self.handle_renouncement(base.sender_id);
            } else {
                self.node.mark_candidate_heard();
                self.handle_announcement(Adoption {
                    id: base.sender_id,
                    hops: hops as u16,
                    direct_connections: announcement.election.direct_connections,
                });
            }
        }

        let enqueued = self.queue.enqueue(packet, self.node.node_id(), now_ms);
        if enqueued {
            self.node.inc_received();
        } else {
            self.node.inc_dropped();
        }
        enqueued
    }

    fn handle_announcement(&mut self, challenger: Adoption) {
        match self.node.state() {
            NodeState::ClusterheadCandidate => {
                // Defend with the credentials our own announcement carries:
                // hop distance 1, current direct-connection count.
                let own = Adoption {
                    id: self.node.node_id(),
                    hops: 1,
                    direct_connections: self.node.direct_neighbor_count(),
                };
                if challenger.beats(&own) {
                    debug!(
                        node = self.node.node_id(),
                        winner = challenger.id,
                        "conceding candidacy"
                    );
                    self.node.set_state(NodeState::Edge);
                    self.election_rounds_remaining = 0;
                    self.renouncement_rounds_remaining = MAX_ELECTION_ROUNDS;
                    self.node.clear_adoption();
                    self.adopt_if_better(challenger);
                }
            }
            NodeState::Clusterhead => {
                // An established clusterhead does not realign.
                debug!(
                    node = self.node.node_id(),
                    from = challenger.id,
                    "announcement ignored by clusterhead"
                );
            }
            _ => self.adopt_if_better(challenger),
        }
    }

    fn adopt_if_better(&mut self, challenger: Adoption) {
        let adopt = match self.node.adopted_clusterhead() {
            None => true,
            Some(current) => challenger.beats(current),
        };
        if adopt {
            self.node.adopt_clusterhead(challenger);
        }
    }

    fn handle_renouncement(&mut self, sender_id: u32) {
        let Some(adopted) = self.node.adopted_clusterhead() else {
            return;
        };
        if adopted.id != sender_id {
            return;
        }
        debug!(
            node = self.node.node_id(),
            clusterhead = sender_id,
            "adopted clusterhead renounced"
        );
        self.node.clear_adoption();
        if self.node.state() != NodeState::ClusterheadCandidate {
            self.node.set_state(NodeState::Discovery);
        }
    }

    // --- Transmission helpers ---

    fn send_discovery_advert(&mut self) {
        let mut packet = DiscoveryPacket::new(self.config.node_id, self.config.initial_ttl);
        packet.clusterhead_flag = self.node.state() == NodeState::Clusterhead;
        packet.push_path(self.config.node_id);
        packet.position = self.node.position().copied();

        self.node.inc_sent();
        self.sink.send(&Packet::Discovery(packet));
    }

    fn send_election_announcement(&mut self) {
        let direct = self.node.direct_neighbor_count();
        let mut packet = ElectionPacket::new(self.config.node_id, self.config.initial_ttl);
        packet.base.push_path(self.config.node_id);
        packet.base.position = self.node.position().copied();
        packet.election.class_id = self.config.class_id;
        packet.election.direct_connections = direct;
        packet.election.score = self.node.candidacy_score();
        packet.election.hash = self.node.election_hash();
        // Only forwarding hops fold their degree into the flood-reach
        // estimate; the announcement leaves here with an empty trail. The
        // node keeps its own one-hop reach as local telemetry.
        self.node.set_pdsf(direct);

        self.node.inc_sent();
        self.sink.send(&Packet::Election(packet));
    }

    fn send_renouncement(&mut self) {
        let mut packet = ElectionPacket::new(self.config.node_id, self.config.initial_ttl);
        packet.base.push_path(self.config.node_id);
        packet.base.position = self.node.position().copied();
        packet.election.class_id = self.config.class_id;
        packet.election.direct_connections = self.node.direct_neighbor_count();
        packet.election.hash = self.node.election_hash();
        packet.election.is_renouncement = true;

        self.node.inc_sent();
        self.sink.send(&Packet::Election(packet));
    }

    // --- External attribute interface ---

    /// Update or invalidate the node's position.
    pub fn set_position(&mut self, x: f64, y: f64, z: f64, valid: bool) {
        if valid {
            self.node.set_position(x, y, z);
        } else {
            self.node.clear_position();
        }
    }

    /// Override the measured noise level.
    pub fn set_noise_level(&mut self, noise_level: f64) {
        self.node.set_noise_level(noise_level);
    }

    /// Override the crowding factor (clamped to [0, 1]).
    pub fn set_crowding_factor(&mut self, crowding: f64) {
        self.node.set_crowding_factor(crowding);
    }

    /// Note that another candidate was heard out-of-band.
    pub fn mark_candidate_heard(&mut self) {
        self.node.mark_candidate_heard();
    }

    /// Reseed every stochastic component.
    pub fn reseed(&mut self, seed: u64) {
        self.policy.reseed(seed.wrapping_add(2));
        self.noisy_timing.reseed(seed);
        self.neighbor_timing.reseed(seed.wrapping_add(1));
    }

    /// Return to the initial state: queue cleared, cycle stopped, node
    /// re-created, a fresh noise window opened.
    pub fn reset(&mut self) {
        self.queue = ForwardQueue::with_retention_ms(queue_retention_ms(&self.config));
        self.cycle.stop();
        self.node = Node::new(self.config.node_id);
        self.election = ElectionState::new();
        self.election
            .set_thresholds(self.config.min_neighbors, self.config.min_cn_ratio);
        self.election.begin_measurement();
        self.phase = Phase::Noisy;
        self.noisy_slots_completed = 0;
        self.neighbor_slots_completed = 0;
        self.election_rounds_remaining = 0;
        self.renouncement_rounds_remaining = 0;
        self.last_tick_ms = 0;
    }

    // --- Observation ---

    /// Read-only node view.
    pub fn snapshot(&self) -> NodeSnapshot {
        self.node.snapshot()
    }

    /// The underlying node, read-only.
    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Forward-queue statistics.
    pub fn queue_stats(&self) -> firefly_protocol::queue::QueueStats {
        self.queue.stats()
    }

    /// Completed discovery cycles.
    pub fn cycle_count(&self) -> u32 {
        self.cycle.cycle_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Collects everything the engine transmits.
    #[derive(Default)]
    struct Outbox {
        packets: Rc<RefCell<Vec<Packet>>>,
    }

    struct OutboxSink(Rc<RefCell<Vec<Packet>>>);

    impl PacketSink for OutboxSink {
        fn send(&mut self, packet: &Packet) {
            self.0.borrow_mut().push(packet.clone());
        }
    }

    fn outbox() -> (Outbox, Box<dyn PacketSink>) {
        let packets: Rc<RefCell<Vec<Packet>>> = Rc::default();
        (
            Outbox {
                packets: packets.clone(),
            },
            Box::new(OutboxSink(packets)),
        )
    }

    /// Short phases so tests loop quickly: 2 noisy + 2 neighbor micro-slots
    /// per 4-slot cycle, 8 ticks per full phase loop.
    fn test_config(node_id: u32) -> EngineConfig {
        let mut config = EngineConfig::for_node(node_id).with_seed(42);
        config.noise_slot_count = 2;
        config.neighbor_slot_count = 2;
        config.neighbor_timeout_cycles = 100;
        config
    }

    const TICKS_PER_LOOP: u64 = 2 + 2 + 4;

    fn run_loops(engine: &mut DiscoveryEngine, loops: u64) {
        let start = engine.last_tick_ms;
        for i in 0..loops * TICKS_PER_LOOP {
            engine.tick(start + (i + 1) * 100);
        }
    }

    fn seed_direct_neighbors(engine: &mut DiscoveryEngine, count: u32) {
        for i in 0..count {
            engine.node.upsert_neighbor(1_000 + i, -50, 1);
        }
    }

    fn discovery_packet(sender: u32, ttl: u8) -> Packet {
        let mut p = DiscoveryPacket::new(sender, ttl);
        p.push_path(sender);
        Packet::Discovery(p)
    }

    fn announcement(sender: u32, direct: u32) -> Packet {
        let mut p = ElectionPacket::new(sender, 6);
        p.base.push_path(sender);
        p.election.direct_connections = direct;
        Packet::Election(p)
    }

    fn renouncement(sender: u32) -> Packet {
        let mut p = ElectionPacket::new(sender, 6);
        p.base.push_path(sender);
        p.election.is_renouncement = true;
        Packet::Election(p)
    }

    #[test]
    fn init_rejects_reserved_id() {
        let (_, sink) = outbox();
        assert!(matches!(
            DiscoveryEngine::new(EngineConfig::default(), sink),
            Err(ConfigError::InvalidNodeId)
        ));
    }

    #[test]
    fn phases_progress_and_loop() {
        let (_, sink) = outbox();
        let mut engine = DiscoveryEngine::new(test_config(1), sink).unwrap();
        assert_eq!(engine.phase(), Phase::Noisy);

        engine.tick(100);
        engine.tick(200);
        assert_eq!(engine.phase(), Phase::Neighbor);

        engine.tick(300);
        engine.tick(400);
        assert_eq!(engine.phase(), Phase::Discovery);

        for t in 0..4 {
            engine.tick(500 + t * 100);
        }
        // Cycle completed, back to sampling noise.
        assert_eq!(engine.phase(), Phase::Noisy);
        assert_eq!(engine.node().current_cycle(), 1);
    }

    #[test]
    fn first_tick_enters_discovery_state() {
        let (_, sink) = outbox();
        let mut engine = DiscoveryEngine::new(test_config(1), sink).unwrap();
        assert_eq!(engine.snapshot().state, NodeState::Init);
        engine.tick(100);
        assert_eq!(engine.snapshot().state, NodeState::Discovery);
    }

    #[test]
    fn own_slot_sends_exactly_once_per_cycle() {
        let (out, sink) = outbox();
        let mut engine = DiscoveryEngine::new(test_config(1), sink).unwrap();

        // Skip the stochastic phases, then count slot-0 sends over one cycle.
        engine.tick(100);
        engine.tick(200);
        engine.tick(300);
        engine.tick(400);
        out.packets.borrow_mut().clear();

        for t in 0..4 {
            engine.tick(500 + t * 100);
        }
        let sent = out.packets.borrow();
        // Empty queue: only the own-message slot transmits.
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].base().sender_id, 1);
        assert_eq!(sent[0].base().hop_distance(), 1);
    }

    #[test]
    fn forwarding_slots_drain_up_to_three_packets() {
        let (out, sink) = outbox();
        let mut engine = DiscoveryEngine::new(test_config(9), sink).unwrap();
        engine.set_crowding_factor(0.0);

        // Into discovery phase.
        for t in 1..=4 {
            engine.tick(t * 100);
        }
        for sender in [21, 22, 23, 24] {
            assert!(engine.receive(&discovery_packet(sender, 5), -60, 450));
        }
        out.packets.borrow_mut().clear();

        for t in 5..=8 {
            engine.tick(t * 100);
        }
        let sent = out.packets.borrow();
        // 1 own message + 3 forwards; the fourth queued packet waits.
        assert_eq!(sent.len(), 4);
        let forwards: Vec<_> = sent.iter().filter(|p| p.base().hop_distance() == 2).collect();
        assert_eq!(forwards.len(), 3);
        for f in &forwards {
            assert_eq!(f.base().ttl, 4);
            assert!(f.base().path_contains(9));
        }
        assert_eq!(engine.snapshot().counters.forwarded, 3);
    }

    #[test]
    fn receive_admission_reported_and_counted() {
        let (_, sink) = outbox();
        let mut engine = DiscoveryEngine::new(test_config(1), sink).unwrap();

        let packet = discovery_packet(2, 5);
        assert!(engine.receive(&packet, -60, 0));
        // Same message again: duplicate, dropped.
        assert!(!engine.receive(&packet, -60, 1));

        let snap = engine.snapshot();
        assert_eq!(snap.counters.received, 1);
        assert_eq!(snap.counters.dropped, 1);

        // Looped packet rejected.
        let mut looped = DiscoveryPacket::new(3, 5);
        looped.push_path(3);
        looped.push_path(1);
        assert!(!engine.receive(&Packet::Discovery(looped), -60, 2));
    }

    #[test]
    fn own_packets_ignored() {
        let (_, sink) = outbox();
        let mut engine = DiscoveryEngine::new(test_config(1), sink).unwrap();
        assert!(!engine.receive(&discovery_packet(1, 5), -60, 0));
        assert_eq!(engine.snapshot().counters.received, 0);
        assert_eq!(engine.node().neighbor_count(), 0);
    }

    #[test]
    fn reception_populates_neighbor_table() {
        let (_, sink) = outbox();
        let mut engine = DiscoveryEngine::new(test_config(1), sink).unwrap();

        engine.receive(&discovery_packet(2, 5), -48, 0);
        let record = engine.node().neighbor(2).unwrap();
        assert_eq!(record.hop_count, 1);
        assert_eq!(record.last_rssi, -48);

        // A forwarded packet records the origin at its hop distance.
        let mut far = DiscoveryPacket::new(7, 4);
        far.push_path(7);
        far.push_path(3);
        engine.receive(&Packet::Discovery(far), -70, 1);
        assert_eq!(engine.node().neighbor(7).unwrap().hop_count, 2);
    }

    #[test]
    fn candidate_announces_then_promotes() {
        let (out, sink) = outbox();
        let mut config = test_config(1);
        config.min_neighbors = 3;
        config.min_cn_ratio = 1.0;
        let mut engine = DiscoveryEngine::new(config, sink).unwrap();
        seed_direct_neighbors(&mut engine, 5);

        // Cycle 1 completes → candidacy recognized.
        run_loops(&mut engine, 1);
        assert_eq!(engine.snapshot().state, NodeState::ClusterheadCandidate);

        // Two announcement rounds down, one to go.
        run_loops(&mut engine, 2);
        assert_eq!(engine.snapshot().state, NodeState::ClusterheadCandidate);

        // Third announcement exhausts the rounds; the same cycle's
        // evaluation promotes.
        run_loops(&mut engine, 1);
        assert_eq!(engine.snapshot().state, NodeState::Clusterhead);

        let announcements: Vec<_> = out
            .packets
            .borrow()
            .iter()
            .filter(|p| matches!(p, Packet::Election(e) if !e.election.is_renouncement))
            .cloned()
            .collect();
        assert_eq!(announcements.len(), 3);
        if let Packet::Election(e) = &announcements[0] {
            assert_eq!(e.election.direct_connections, 5);
            // The origin does not fold its own degree into the flood-reach
            // estimate; forwarding hops do.
            assert_eq!(e.election.pdsf, 0);
            assert!(e.election.pdsf_history.is_empty());
            assert_eq!(e.election.hash, firefly_protocol::election::slot_hash(1));
        }
        assert_eq!(engine.snapshot().pdsf, 5);
    }

    #[test]
    fn candidate_concedes_to_stronger_and_renounces() {
        let (out, sink) = outbox();
        let mut config = test_config(30);
        config.min_neighbors = 3;
        config.min_cn_ratio = 1.0;
        let mut engine = DiscoveryEngine::new(config, sink).unwrap();
        seed_direct_neighbors(&mut engine, 4);

        run_loops(&mut engine, 1);
        assert_eq!(engine.snapshot().state, NodeState::ClusterheadCandidate);

        // A directly-heard competitor with a higher degree wins.
        engine.receive(&announcement(50, 40), -50, engine.last_tick_ms);
        assert_eq!(engine.snapshot().state, NodeState::Edge);
        assert_eq!(engine.snapshot().adopted_clusterhead, Some(50));

        // The renouncement goes out within the next cycles.
        run_loops(&mut engine, 2);
        let renouncements = out
            .packets
            .borrow()
            .iter()
            .filter(|p| p.is_renouncement())
            .count();
        assert!(renouncements >= 1);
    }

    #[test]
    fn candidate_defends_against_weaker() {
        let (_, sink) = outbox();
        let mut config = test_config(3);
        config.min_neighbors = 3;
        config.min_cn_ratio = 1.0;
        let mut engine = DiscoveryEngine::new(config, sink).unwrap();
        seed_direct_neighbors(&mut engine, 10);

        run_loops(&mut engine, 1);
        assert_eq!(engine.snapshot().state, NodeState::ClusterheadCandidate);

        engine.receive(&announcement(50, 4), -50, engine.last_tick_ms);
        assert_eq!(engine.snapshot().state, NodeState::ClusterheadCandidate);
        assert_eq!(engine.snapshot().adopted_clusterhead, None);
    }

    #[test]
    fn adoption_follows_the_total_order() {
        let (_, sink) = outbox();
        let mut engine = DiscoveryEngine::new(test_config(1), sink).unwrap();

        engine.receive(&announcement(10, 20), -60, 0);
        assert_eq!(engine.snapshot().adopted_clusterhead, Some(10));

        // Fewer hops always wins: 10 was direct, a 2-hop 100-degree loses.
        let mut far = ElectionPacket::new(8, 6);
        far.base.push_path(8);
        far.base.push_path(99);
        far.election.direct_connections = 100;
        engine.receive(&Packet::Election(far), -60, 1);
        assert_eq!(engine.snapshot().adopted_clusterhead, Some(10));

        // Equal hops, more connections wins.
        engine.receive(&announcement(12, 30), -60, 2);
        assert_eq!(engine.snapshot().adopted_clusterhead, Some(12));

        // Equal hops and connections: the lower id wins.
        engine.receive(&announcement(11, 30), -60, 3);
        assert_eq!(engine.snapshot().adopted_clusterhead, Some(11));
        engine.receive(&announcement(13, 30), -60, 4);
        assert_eq!(engine.snapshot().adopted_clusterhead, Some(11));
    }

    #[test]
    fn renouncement_clears_matching_adoption_only() {
        let (_, sink) = outbox();
        let mut engine = DiscoveryEngine::new(test_config(1), sink).unwrap();
        engine.tick(100); // leave Init

        engine.receive(&announcement(10, 20), -60, 0);
        assert_eq!(engine.snapshot().adopted_clusterhead, Some(10));

        engine.receive(&renouncement(99), -60, 1);
        assert_eq!(engine.snapshot().adopted_clusterhead, Some(10));

        engine.receive(&renouncement(10), -60, 2);
        assert_eq!(engine.snapshot().adopted_clusterhead, None);
        assert_eq!(engine.snapshot().state, NodeState::Discovery);
    }

    #[test]
    fn aligned_node_becomes_edge_on_evaluation() {
        let (_, sink) = outbox();
        let mut engine = DiscoveryEngine::new(test_config(1), sink).unwrap();
        engine.receive(&announcement(10, 20), -60, 0);

        run_loops(&mut engine, 1);
        assert_eq!(engine.snapshot().state, NodeState::Edge);
    }

    #[test]
    fn invalid_forward_slot_is_a_noop() {
        let (out, sink) = outbox();
        let mut engine = DiscoveryEngine::new(test_config(1), sink).unwrap();
        engine.receive(&discovery_packet(2, 5), -60, 0);
        engine.handle_forward_slot(0);
        engine.handle_forward_slot(4);
        assert!(out.packets.borrow().is_empty());
        assert_eq!(engine.snapshot().counters.forwarded, 0);
    }

    #[test]
    fn ttl_exhausted_packets_dropped_not_forwarded() {
        let (out, sink) = outbox();
        let mut engine = DiscoveryEngine::new(test_config(1), sink).unwrap();
        engine.set_crowding_factor(0.0);

        for t in 1..=4 {
            engine.tick(t * 100);
        }
        let mut spent = DiscoveryPacket::new(2, 0);
        spent.push_path(2);
        engine.receive(&Packet::Discovery(spent), -60, 450);
        out.packets.borrow_mut().clear();

        for t in 5..=8 {
            engine.tick(t * 100);
        }
        assert_eq!(
            out.packets
                .borrow()
                .iter()
                .filter(|p| p.base().hop_distance() > 1)
                .count(),
            0
        );
        assert!(engine.snapshot().counters.dropped >= 1);
    }

    #[test]
    fn election_forwarding_respects_the_ceiling() {
        let (out, sink) = outbox();
        let mut engine = DiscoveryEngine::new(test_config(1), sink).unwrap();
        engine.set_crowding_factor(0.0);
        seed_direct_neighbors(&mut engine, 60);

        for t in 1..=4 {
            engine.tick(t * 100);
        }
        // Already at 120 predicted devices; this hop's 60 would cross 150.
        let mut flood = ElectionPacket::new(5, 6);
        flood.base.push_path(5);
        flood.election.direct_connections = 60;
        flood.election.pdsf = 120;
        flood.election.last_pi = 120;
        flood.election.pdsf_history = vec![120];
        engine.receive(&Packet::Election(flood), -60, 450);
        out.packets.borrow_mut().clear();

        for t in 5..=8 {
            engine.tick(t * 100);
        }
        assert_eq!(
            out.packets
                .borrow()
                .iter()
                .filter(|p| p.base().hop_distance() > 1)
                .count(),
            0,
            "capped flood must not be forwarded"
        );
    }

    #[test]
    fn reset_restores_initial_state() {
        let (_, sink) = outbox();
        let mut engine = DiscoveryEngine::new(test_config(1), sink).unwrap();
        engine.receive(&announcement(10, 20), -60, 0);
        run_loops(&mut engine, 2);

        engine.reset();
        let snap = engine.snapshot();
        assert_eq!(snap.state, NodeState::Init);
        assert_eq!(snap.counters, Default::default());
        assert_eq!(snap.adopted_clusterhead, None);
        assert_eq!(engine.phase(), Phase::Noisy);
    }
}
