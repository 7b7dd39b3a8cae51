//! The 4-slot discovery cycle.
//!
//! A running cycle rotates through four slots: slot 0 transmits the node's
//! own message, slots 1–3 each forward at most one queued packet. Advancing
//! past slot 3 wraps to slot 0 and fires exactly one cycle-completion event.
//!
//! The cycle holds no timer of its own - the caller schedules slot
//! boundaries (slot n at n × the slot duration, completion at 4×) and drives
//! [`DiscoveryCycle::execute_slot`] / [`DiscoveryCycle::advance_slot`] at
//! each one. Stopping cancels the rotation; starting again begins a fresh
//! cycle at slot 0.

use tracing::warn;

/// Number of slots per discovery cycle.
pub const NUM_SLOTS: u8 = 4;

/// Slot index that transmits the node's own message.
pub const SLOT_OWN_MESSAGE: u8 = 0;

/// Default slot duration in milliseconds.
pub const DEFAULT_SLOT_DURATION_MS: u32 = 100;

/// What a slot is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Slot 0: transmit the node's own advertisement.
    OwnMessage,
    /// Slots 1–3: forward one queued packet.
    Forwarding(u8),
}

/// Whether the cycle is rotating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Stopped,
    Running,
}

/// The discovery-cycle automaton.
#[derive(Debug)]
pub struct DiscoveryCycle {
    state: CycleState,
    current_slot: u8,
    slot_duration_ms: u32,
    cycle_count: u32,
}

impl Default for DiscoveryCycle {
    fn default() -> Self {
        Self::new(DEFAULT_SLOT_DURATION_MS)
    }
}

impl DiscoveryCycle {
    /// Create a stopped cycle with the given slot duration.
    pub fn new(slot_duration_ms: u32) -> Self {
        Self {
            state: CycleState::Stopped,
            current_slot: 0,
            slot_duration_ms,
            cycle_count: 0,
        }
    }

    /// Start rotating from slot 0.
    ///
    /// Returns `false` when already running (the rotation is unchanged).
    pub fn start(&mut self) -> bool {
        if self.state == CycleState::Running {
            return false;
        }
        self.state = CycleState::Running;
        self.current_slot = 0;
        true
    }

    /// Stop the rotation. Idempotent; pending slots are simply abandoned.
    pub fn stop(&mut self) {
        self.state = CycleState::Stopped;
    }

    pub fn is_running(&self) -> bool {
        self.state == CycleState::Running
    }

    /// Change the slot duration.
    ///
    /// Only legal while stopped; while running the change is refused and the
    /// configured value is kept.
    pub fn set_slot_duration(&mut self, duration_ms: u32) -> bool {
        if self.state == CycleState::Running {
            warn!(duration_ms, "slot duration change refused while running");
            return false;
        }
        self.slot_duration_ms = duration_ms;
        true
    }

    pub fn slot_duration_ms(&self) -> u32 {
        self.slot_duration_ms
    }

    /// Full cycle duration: four slots.
    pub fn cycle_duration_ms(&self) -> u32 {
        self.slot_duration_ms * NUM_SLOTS as u32
    }

    /// Offset of a slot from the cycle start, for external scheduling.
    pub fn slot_offset_ms(&self, slot: u8) -> u32 {
        if !is_valid_slot(slot) {
            return 0;
        }
        slot as u32 * self.slot_duration_ms
    }

    pub fn current_slot(&self) -> u8 {
        self.current_slot
    }

    /// Completed cycles since the last reset.
    pub fn cycle_count(&self) -> u32 {
        self.cycle_count
    }

    pub fn reset_count(&mut self) {
        self.cycle_count = 0;
    }

    /// What the current slot is for, or `None` when stopped.
    pub fn execute_slot(&self) -> Option<SlotKind> {
        if self.state != CycleState::Running {
            return None;
        }
        Some(slot_kind(self.current_slot))
    }

    /// Move to the next slot.
    ///
    /// Returns the completed cycle count when the rotation just wrapped
    /// 3 → 0 - exactly once per four advances.
    pub fn advance_slot(&mut self) -> Option<u32> {
        if self.state != CycleState::Running {
            return None;
        }
        self.current_slot += 1;
        if self.current_slot >= NUM_SLOTS {
            self.current_slot = 0;
            self.cycle_count += 1;
            return Some(self.cycle_count);
        }
        None
    }
}

/// The kind of a slot index. Indexes ≥ 1 are forwarding slots.
pub fn slot_kind(slot: u8) -> SlotKind {
    if slot == SLOT_OWN_MESSAGE {
        SlotKind::OwnMessage
    } else {
        SlotKind::Forwarding(slot)
    }
}

/// Whether `slot` is a valid slot index.
pub fn is_valid_slot(slot: u8) -> bool {
    slot < NUM_SLOTS
}

/// Whether `slot` is one of the three forwarding slots.
pub fn is_forwarding_slot(slot: u8) -> bool {
    (1..NUM_SLOTS).contains(&slot)
}
