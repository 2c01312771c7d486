//! Medium Access Control (MAC) Layer Implementation
//!
//! Terminal-side return-link access: dedicated slots announced in TBTPs and
//! contention slots chosen by the random access algorithm become transmit
//! events on the simulated timeline.

pub mod events;
pub mod ra_slots;
pub mod scheduler;
pub mod tbtp_container;

pub use events::{CrdsaReplica, MacEvent, TxOpportunity};
pub use ra_slots::ContentionSlotRegistry;
pub use scheduler::{AccessCollaborators, AccessScheduler, ContentionState, SchedulerState};
pub use tbtp_container::TbtpContainer;

use common::types::MacAddress;
use serde::Serialize;
use std::time::Duration;

/// Default frame PDU header size in bytes
pub const DEFAULT_FRAME_PDU_HEADER_BYTES: u32 = 1;

/// Default guard time at the end of each burst
pub const DEFAULT_GUARD_TIME: Duration = Duration::from_micros(1);

/// MAC layer configuration
#[derive(Debug, Clone)]
pub struct MacConfig {
    /// Terminal address
    pub address: MacAddress,
    /// Frame PDU header overhead subtracted from every slot
    pub frame_pdu_header_bytes: u32,
    /// Guard time removed from every burst
    pub guard_time: Duration,
    /// Superframe sequence used for contention access
    pub superframe_seq_id: u8,
    /// Seed for the contention channel choice
    pub rng_seed: u64,
}

impl MacConfig {
    /// Configuration with default header, guard time and seed
    pub fn new(address: MacAddress) -> Self {
        Self {
            address,
            frame_pdu_header_bytes: DEFAULT_FRAME_PDU_HEADER_BYTES,
            guard_time: DEFAULT_GUARD_TIME,
            superframe_seq_id: 0,
            rng_seed: 0,
        }
    }
}

/// Per-terminal access counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccessStats {
    /// TBTPs resolved from control tags
    pub tbtps_received: u64,
    /// Dedicated slots scheduled
    pub da_slots_scheduled: u64,
    /// Bursts handed to the PHY, replicas included
    pub bursts_sent: u64,
    /// Units carried in those bursts
    pub units_sent: u64,
    /// Bytes carried in those bursts
    pub bytes_sent: u64,
    /// Opportunities left unused because the queue was empty
    pub empty_opportunities: u64,
    /// Random access decisions requested
    pub ra_attempts: u64,
    /// Contention slots claimed
    pub ra_slots_claimed: u64,
}

impl AccessStats {
    /// Add another terminal's counters
    pub fn merge(&mut self, other: &AccessStats) {
        self.tbtps_received += other.tbtps_received;
        self.da_slots_scheduled += other.da_slots_scheduled;
        self.bursts_sent += other.bursts_sent;
        self.units_sent += other.units_sent;
        self.bytes_sent += other.bytes_sent;
        self.empty_opportunities += other.empty_opportunities;
        self.ra_attempts += other.ra_attempts;
        self.ra_slots_claimed += other.ra_slots_claimed;
    }
}
