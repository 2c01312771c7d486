//! Network Control Centre
//!
//! Minimal controller: before every superframe it splits the dedicated
//! access frames into equal chunks and hands them round-robin to the
//! terminals, one chunk per terminal, then publishes the TBTP through the
//! control message store.

use anyhow::{bail, Context, Result};
use common::types::{MacAddress, SimTime};
use interfaces::{ControlMsgContainer, ControlMsgTag, ControlMsgType, TbtpMessage};
use layers::frame::SuperframeSeq;
use std::sync::Arc;
use tracing::{debug, info};

/// A chunk of consecutive slots in one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotChunk {
    frame_id: u8,
    first_slot: u16,
    len: u16,
}

pub struct Ncc {
    superframe_seq_id: u8,
    store: Arc<ControlMsgContainer>,
    terminals: Vec<MacAddress>,
    chunks: Vec<SlotChunk>,
    next_terminal: usize,
    tbtps_issued: u64,
}

impl Ncc {
    pub fn new(
        seq: &SuperframeSeq,
        superframe_seq_id: u8,
        store: Arc<ControlMsgContainer>,
        terminals: Vec<MacAddress>,
        slots_per_terminal: u16,
    ) -> Result<Self> {
        if slots_per_terminal == 0 {
            bail!("Slots per terminal must be positive");
        }

        let superframe = seq.superframe(superframe_seq_id)?;
        let mut chunks = Vec::new();
        for frame_id in superframe.dedicated_access_frames() {
            let slot_count = superframe.frame(frame_id)?.time_slot_count();
            let slot_count = u16::try_from(slot_count)?;

            let mut first_slot = 0u16;
            while slot_count - first_slot >= slots_per_terminal {
                chunks.push(SlotChunk {
                    frame_id,
                    first_slot,
                    len: slots_per_terminal,
                });
                first_slot += slots_per_terminal;
            }
        }

        info!(
            "NCC: {} terminal(s), {} chunk(s) of {} slot(s) per superframe",
            terminals.len(),
            chunks.len(),
            slots_per_terminal
        );

        Ok(Self {
            superframe_seq_id,
            store,
            terminals,
            chunks,
            next_terminal: 0,
            tbtps_issued: 0,
        })
    }

    /// Plan for superframe instance `counter`
    pub fn build_tbtp(&mut self, counter: u32) -> TbtpMessage {
        let mut tbtp = TbtpMessage::new(self.superframe_seq_id, counter);
        if self.terminals.is_empty() {
            return tbtp;
        }

        let assignments = self.chunks.len().min(self.terminals.len());
        for chunk in &self.chunks[..assignments] {
            let address = self.terminals[self.next_terminal];
            self.next_terminal = (self.next_terminal + 1) % self.terminals.len();

            for slot in chunk.first_slot..chunk.first_slot + chunk.len {
                tbtp.add_da_slot(address, chunk.frame_id, slot);
            }
        }

        tbtp
    }

    /// Build, store and announce the plan for superframe `counter`.
    ///
    /// The plan goes through the TBTP wire format; the store holds what a
    /// terminal would decode.
    pub fn issue(&mut self, counter: u32, now: SimTime) -> Result<ControlMsgTag> {
        let wire = self
            .build_tbtp(counter)
            .encode()
            .with_context(|| format!("Encoding TBTP for superframe {}", counter))?;
        let tbtp = TbtpMessage::decode(&wire).with_context(|| format!("Decoding TBTP for superframe {}", counter))?;

        let slots = tbtp.slot_count();
        let msg_id = self.store.add(tbtp, now);
        self.tbtps_issued += 1;

        debug!(
            "NCC: TBTP {} for superframe {} with {} slot(s), {} bytes",
            msg_id,
            counter,
            slots,
            wire.len()
        );
        Ok(ControlMsgTag {
            msg_type: ControlMsgType::Tbtp,
            msg_id,
        })
    }

    pub fn tbtps_issued(&self) -> u64 {
        self.tbtps_issued
    }
}
