//! Allocation Cache
//!
//! TBTPs that addressed this terminal, keyed by the transmit start time of
//! the superframe instance they allocate.

use common::types::{MacAddress, SimTime};
use interfaces::TbtpMessage;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

/// Per-terminal store of received TBTPs
#[derive(Debug)]
pub struct TbtpContainer {
    address: MacAddress,
    superframe_duration: Duration,
    tbtps: BTreeMap<SimTime, Arc<TbtpMessage>>,
}

impl TbtpContainer {
    pub fn new(address: MacAddress, superframe_duration: Duration) -> Self {
        Self {
            address,
            superframe_duration,
            tbtps: BTreeMap::new(),
        }
    }

    /// Record a TBTP allocating the superframe starting at `tx_time`
    pub fn add(&mut self, tx_time: SimTime, tbtp: Arc<TbtpMessage>) {
        if let Some(previous) = self.tbtps.insert(tx_time, tbtp) {
            warn!(
                "UT {}: TBTP for superframe {} at {} replaced",
                self.address,
                previous.superframe_counter(),
                tx_time
            );
        }
    }

    /// Drop TBTPs whose superframe has ended by `now`
    pub fn remove_past(&mut self, now: SimTime) {
        let duration = self.superframe_duration;
        let before = self.tbtps.len();
        self.tbtps.retain(|tx_time, _| *tx_time + duration > now);

        let removed = before - self.tbtps.len();
        if removed > 0 {
            trace!("UT {}: removed {} expired TBTPs", self.address, removed);
        }
    }

    /// Check whether dedicated slots remain at or after `now`
    pub fn has_scheduled_time_slots(&self, now: SimTime) -> bool {
        let duration = self.superframe_duration;
        self.tbtps.iter().any(|(tx_time, tbtp)| {
            *tx_time + duration > now && !tbtp.da_time_slots(&self.address).is_empty()
        })
    }

    pub fn len(&self) -> usize {
        self.tbtps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tbtps.is_empty()
    }
}
