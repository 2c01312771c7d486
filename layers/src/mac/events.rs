//! MAC Timeline Events
//!
//! Events the access scheduler places on the simulated timeline and handles
//! when they fire.

use bytes::Bytes;
use std::time::Duration;

/// A scheduled transmission opportunity in one time slot
#[derive(Debug, Clone, PartialEq)]
pub struct TxOpportunity {
    /// Burst duration before the guard time is removed
    pub duration: Duration,
    /// Slot capacity in bytes, header included
    pub payload_bytes: u32,
    /// Global carrier id
    pub carrier_id: u32,
    /// Contention channel, for random access slots
    pub ra_channel: Option<u32>,
}

/// A CRDSA replica still to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct CrdsaReplica {
    /// Offset of the replica from the first replica
    pub offset: Duration,
    /// Burst duration before the guard time is removed
    pub duration: Duration,
    /// Global carrier id
    pub carrier_id: u32,
}

/// Events handled by the access scheduler
#[derive(Debug, Clone, PartialEq)]
pub enum MacEvent {
    /// Start of a superframe instance this terminal has slots in
    SuperframeStart {
        superframe_seq_id: u8,
        superframe_counter: u32,
    },
    /// Transmit in one slot
    Transmit(TxOpportunity),
    /// Backoff elapsed; look for a free contention slot
    RandomAccessSlotSearch { channel: u32 },
    /// First CRDSA replica; units are collected once for all replicas
    CrdsaTransmit {
        channel: u32,
        payload_bytes: u32,
        first: CrdsaReplica,
        replicas: Vec<CrdsaReplica>,
    },
    /// Remaining CRDSA replica carrying already collected units
    ReplicaBurst {
        channel: u32,
        units: Vec<Bytes>,
        carrier_id: u32,
        duration: Duration,
    },
}

impl MacEvent {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            MacEvent::SuperframeStart { .. } => "SuperframeStart",
            MacEvent::Transmit(_) => "Transmit",
            MacEvent::RandomAccessSlotSearch { .. } => "RandomAccessSlotSearch",
            MacEvent::CrdsaTransmit { .. } => "CrdsaTransmit",
            MacEvent::ReplicaBurst { .. } => "ReplicaBurst",
        }
    }
}
