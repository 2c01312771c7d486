//! Contention Slot Registry
//!
//! Tracks which contention slots this terminal has already claimed, per
//! superframe instance and contention channel, so that a slot is never used
//! twice within the same frame.

use crate::ProtocolViolation;
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Claimed slots keyed by (superframe counter, contention channel)
#[derive(Debug, Default)]
pub struct ContentionSlotRegistry {
    slots: BTreeMap<(u32, u32), BTreeSet<u16>>,
}

impl ContentionSlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `slots` in (`frame`, `channel`).
    ///
    /// Entries for frames before `current_frame` are pruned first. If any slot
    /// is already claimed nothing is inserted.
    pub fn update(
        &mut self,
        current_frame: u32,
        frame: u32,
        channel: u32,
        slots: &BTreeSet<u16>,
    ) -> Result<(), ProtocolViolation> {
        self.slots.retain(|(f, _), _| *f >= current_frame);

        if let Some(used) = self.slots.get(&(frame, channel)) {
            if let Some(&slot) = slots.iter().find(|&s| used.contains(s)) {
                return Err(ProtocolViolation::SlotDoubleBooked { frame, channel, slot });
            }
        }

        let used = self.slots.entry((frame, channel)).or_default();
        used.extend(slots.iter().copied());
        trace!("Frame {} channel {}: {} slots claimed", frame, channel, used.len());
        Ok(())
    }

    /// Slots claimed in (`frame`, `channel`)
    pub fn used_slots(&self, frame: u32, channel: u32) -> Option<&BTreeSet<u16>> {
        self.slots.get(&(frame, channel))
    }

    /// Check whether `slot` is claimed in (`frame`, `channel`)
    pub fn is_used(&self, frame: u32, channel: u32, slot: u16) -> bool {
        self.slots
            .get(&(frame, channel))
            .is_some_and(|used| used.contains(&slot))
    }

    /// Number of (frame, channel) keys held
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
