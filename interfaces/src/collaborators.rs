//! Collaborator Contracts
//!
//! Interfaces the terminal MAC is bound to at construction. Implementations
//! live outside the scheduling core (PHY, LLC, timing, random access, control
//! message storage).

use crate::message_types::TbtpMessage;
use bytes::Bytes;
use common::types::MacAddress;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Physical-layer transmit sink. Fire-and-forget.
pub trait PhyTransmitter: Send {
    /// Send one burst carrying `units` on `carrier_id` lasting `duration`
    fn send(&mut self, units: Vec<Bytes>, carrier_id: u32, duration: Duration);
}

/// One protocol data unit handed out by the LLC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlcPdu {
    /// Unit contents
    pub data: Bytes,
    /// Bytes still buffered in the queue after this unit
    pub bytes_left_in_queue: u32,
}

/// Link-layer queue serving transmission opportunities
pub trait LlcQueue: Send {
    /// Next unit no larger than `max_bytes` for `address`.
    ///
    /// Returns `None` when nothing fits or nothing is queued; this is the
    /// normal "queue empty" signal and never an error.
    fn next_unit(&mut self, max_bytes: u32, address: MacAddress) -> Option<LlcPdu>;
}

/// Buffer events reported by the LLC queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    /// The queue went from empty to non-empty
    FirstBufferedPacket,
    /// Another packet was buffered
    BufferedPacket,
}

/// Source of the propagation-delay compensation
pub trait TimingAdvance: Send {
    /// Current timing advance
    fn current_advance(&self) -> Duration;
}

/// What caused a random access attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandomAccessTrigger {
    /// Single-slot contention
    SlottedAloha,
    /// Contention resolution diversity slotted ALOHA (replicated bursts)
    Crdsa,
}

/// Transmission opportunity returned by the random access algorithm
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RandomAccessTxOpportunity {
    /// Transmit in the next free slot after `offset`
    SlottedAloha {
        /// Backoff before searching for a slot
        offset: Duration,
    },
    /// Transmit replicas in exactly these frame-relative slots
    Crdsa {
        /// Slot indices within the channel's random access frame
        slots: BTreeSet<u16>,
    },
}

/// Random access decision algorithm. Only its contract is fixed here.
pub trait RandomAccess: Send {
    /// Decide on a transmission opportunity for `channel`.
    ///
    /// `dama_available` tells whether the terminal still has dedicated
    /// slots ahead. `None` means no opportunity this cycle.
    fn decide(
        &mut self,
        channel: u32,
        trigger: RandomAccessTrigger,
        dama_available: bool,
    ) -> Option<RandomAccessTxOpportunity>;
}

/// Read access to control messages referenced by control tags
pub trait ControlMessageStore: Send + Sync {
    /// Look up a stored TBTP by message id
    fn read(&self, id: u32) -> Option<Arc<TbtpMessage>>;
}
