//! Superframe Sequence
//!
//! The ordered set of superframe configurations a return link cycles through,
//! with the waveform table they share. Maps superframe counters to start times
//! on the simulated timeline.

use super::conf::SuperframeConf;
use super::waveform::WaveformConf;
use crate::LayerError;
use common::types::SimTime;
use common::utils::time::{periods, whole_periods};
use std::time::Duration;
use tracing::{debug, info};

/// Superframe sequence shared by every terminal
#[derive(Debug, Clone)]
pub struct SuperframeSeq {
    superframes: Vec<SuperframeConf>,
    waveforms: WaveformConf,
}

impl SuperframeSeq {
    /// Create a new superframe sequence.
    ///
    /// Every time slot must reference a known waveform whose burst fits in
    /// the slot at the frame's symbol rate.
    pub fn new(superframes: Vec<SuperframeConf>, waveforms: WaveformConf) -> Result<Self, LayerError> {
        if superframes.is_empty() {
            return Err(LayerError::config("Superframe sequence is empty"));
        }
        if superframes.len() > u8::MAX as usize + 1 {
            return Err(LayerError::config(format!("Too many superframes: {}", superframes.len())));
        }

        for (seq_id, superframe) in superframes.iter().enumerate() {
            for (frame_id, frame) in superframe.frames().iter().enumerate() {
                let symbol_rate = frame.btu().symbol_rate_baud();
                for (slot_index, slot) in frame.time_slots().iter().enumerate() {
                    let waveform = waveforms.waveform(slot.waveform_id())?;
                    let burst = waveform.burst_duration(symbol_rate);
                    if burst > slot.duration() {
                        return Err(LayerError::config(format!(
                            "Superframe {} frame {} slot {}: waveform {} burst {:?} exceeds slot {:?}",
                            seq_id,
                            frame_id,
                            slot_index,
                            waveform.id(),
                            burst,
                            slot.duration()
                        )));
                    }
                }
            }
        }

        info!(
            "Superframe sequence: {} superframe(s), {} waveform(s)",
            superframes.len(),
            waveforms.len()
        );

        Ok(Self { superframes, waveforms })
    }

    /// Superframe configuration by sequence id
    pub fn superframe(&self, seq_id: u8) -> Result<&SuperframeConf, LayerError> {
        self.superframes.get(seq_id as usize).ok_or_else(|| {
            LayerError::config(format!(
                "Superframe sequence id {} out of range, have {}",
                seq_id,
                self.superframes.len()
            ))
        })
    }

    pub fn superframes(&self) -> &[SuperframeConf] {
        &self.superframes
    }

    pub fn waveform_conf(&self) -> &WaveformConf {
        &self.waveforms
    }

    /// Duration of superframe `seq_id`
    pub fn superframe_duration(&self, seq_id: u8) -> Result<Duration, LayerError> {
        Ok(self.superframe(seq_id)?.duration())
    }

    /// Transmit start of superframe instance `counter`, shifted by the timing advance
    pub fn superframe_tx_time(&self, seq_id: u8, counter: u32, advance: Duration) -> Result<SimTime, LayerError> {
        let duration = self.superframe_duration(seq_id)?;
        Ok(SimTime::from_duration(periods(duration, counter as u64)) + advance)
    }

    /// Counter and transmit start of the superframe instance containing `now`.
    ///
    /// Before the first instance starts, instance 0 is returned.
    pub fn current_superframe(
        &self,
        seq_id: u8,
        now: SimTime,
        advance: Duration,
    ) -> Result<(u32, SimTime), LayerError> {
        let duration = self.superframe_duration(seq_id)?;
        let elapsed = match now.checked_duration_since(SimTime::from_duration(advance)) {
            Some(elapsed) => elapsed,
            None => return Ok((0, SimTime::from_duration(advance))),
        };

        let count = whole_periods(elapsed, duration);
        let counter = u32::try_from(count)
            .map_err(|_| LayerError::config(format!("Superframe counter overflow at {}", now)))?;

        debug!("Superframe {} of sequence {} is current at {}", counter, seq_id, now);
        Ok((counter, SimTime::from_duration(periods(duration, count) + advance)))
    }

    /// Global carrier id of a frame-local carrier
    pub fn carrier_id(&self, seq_id: u8, frame_id: u8, frame_carrier_id: u16) -> Result<u32, LayerError> {
        self.superframe(seq_id)?.global_carrier_id(frame_id, frame_carrier_id)
    }
}
