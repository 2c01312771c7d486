//! Return Link Frame Configuration
//!
//! Static description of the capacity grid: the burst time unit (BTU) that
//! sizes carriers, time slots within a frame, frames of identical carriers,
//! and the superframe that stacks frames in frequency.

use crate::LayerError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Relative tolerance used when checking that bandwidths divide evenly
const BANDWIDTH_EPSILON: f64 = 1e-9;

/// Burst time unit: the smallest bandwidth/time granularity of a carrier
#[derive(Debug, Clone, PartialEq)]
pub struct BtuConf {
    /// Carrier bandwidth in Hz
    bandwidth_hz: f64,
    /// BTU length
    length: Duration,
    /// Symbol rate in baud
    symbol_rate_baud: f64,
}

impl BtuConf {
    /// Create a new BTU configuration
    pub fn new(bandwidth_hz: f64, length: Duration, symbol_rate_baud: f64) -> Result<Self, LayerError> {
        if !(bandwidth_hz.is_finite() && bandwidth_hz > 0.0) {
            return Err(LayerError::config(format!("BTU bandwidth must be positive: {}", bandwidth_hz)));
        }
        if length.is_zero() {
            return Err(LayerError::config("BTU length must be positive"));
        }
        if !(symbol_rate_baud.is_finite() && symbol_rate_baud > 0.0) {
            return Err(LayerError::config(format!("BTU symbol rate must be positive: {}", symbol_rate_baud)));
        }

        Ok(Self {
            bandwidth_hz,
            length,
            symbol_rate_baud,
        })
    }

    /// Carrier bandwidth in Hz
    pub fn bandwidth_hz(&self) -> f64 {
        self.bandwidth_hz
    }

    /// BTU length
    pub fn length(&self) -> Duration {
        self.length
    }

    /// Symbol rate in baud
    pub fn symbol_rate_baud(&self) -> f64 {
        self.symbol_rate_baud
    }
}

/// One time slot on one carrier of a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSlotConf {
    /// Start offset from the beginning of the frame
    start_offset: Duration,
    /// Slot duration
    duration: Duration,
    /// Waveform used in the slot
    waveform_id: u32,
    /// Carrier id within the frame
    frame_carrier_id: u16,
}

impl TimeSlotConf {
    /// Create a new time slot
    pub fn new(
        start_offset: Duration,
        duration: Duration,
        waveform_id: u32,
        frame_carrier_id: u16,
    ) -> Result<Self, LayerError> {
        if duration.is_zero() {
            return Err(LayerError::config("Time slot duration must be positive"));
        }

        Ok(Self {
            start_offset,
            duration,
            waveform_id,
            frame_carrier_id,
        })
    }

    pub fn start_offset(&self) -> Duration {
        self.start_offset
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn waveform_id(&self) -> u32 {
        self.waveform_id
    }

    pub fn carrier_id(&self) -> u16 {
        self.frame_carrier_id
    }

    /// Offset of the slot end from the beginning of the frame
    pub fn end_offset(&self) -> Duration {
        self.start_offset + self.duration
    }
}

/// A band of identical carriers, each divided into time slots
#[derive(Debug, Clone)]
pub struct FrameConf {
    /// Frame bandwidth in Hz
    bandwidth_hz: f64,
    /// Frame duration
    duration: Duration,
    /// BTU sizing the carriers
    btu: Arc<BtuConf>,
    /// Time slots in configuration order
    time_slots: Vec<TimeSlotConf>,
    /// Number of carriers
    carrier_count: u16,
    /// Frame is reserved for contention access
    random_access: bool,
}

impl FrameConf {
    /// Create a new frame configuration.
    ///
    /// The frame bandwidth must be a whole multiple of the BTU bandwidth,
    /// every slot must fit in the frame on an existing carrier, and each slot
    /// must be addressable by a 16-bit index.
    pub fn new(
        bandwidth_hz: f64,
        duration: Duration,
        btu: Arc<BtuConf>,
        time_slots: Vec<TimeSlotConf>,
        random_access: bool,
    ) -> Result<Self, LayerError> {
        if !(bandwidth_hz.is_finite() && bandwidth_hz > 0.0) {
            return Err(LayerError::config(format!("Frame bandwidth must be positive: {}", bandwidth_hz)));
        }
        if duration.is_zero() {
            return Err(LayerError::config("Frame duration must be positive"));
        }

        let ratio = bandwidth_hz / btu.bandwidth_hz();
        let rounded = ratio.round();
        if rounded < 1.0 || (ratio - rounded).abs() > BANDWIDTH_EPSILON * ratio.max(1.0) {
            return Err(LayerError::config(format!(
                "Frame bandwidth {} Hz is not a whole multiple of BTU bandwidth {} Hz",
                bandwidth_hz,
                btu.bandwidth_hz()
            )));
        }
        if rounded > u16::MAX as f64 {
            return Err(LayerError::config(format!("Too many carriers in frame: {}", rounded)));
        }
        let carrier_count = rounded as u16;

        if time_slots.len() > usize::from(u16::MAX) {
            return Err(LayerError::config(format!(
                "Too many time slots in frame: {}, slot indices are 16 bit",
                time_slots.len()
            )));
        }

        for (index, slot) in time_slots.iter().enumerate() {
            if slot.end_offset() > duration {
                return Err(LayerError::config(format!(
                    "Time slot {} ends at {:?}, past the frame duration {:?}",
                    index,
                    slot.end_offset(),
                    duration
                )));
            }
            if slot.carrier_id() >= carrier_count {
                return Err(LayerError::config(format!(
                    "Time slot {} uses carrier {}, frame has {} carriers",
                    index,
                    slot.carrier_id(),
                    carrier_count
                )));
            }
        }

        debug!(
            "Frame: {} Hz, {} carriers, {} slots, random access: {}",
            bandwidth_hz,
            carrier_count,
            time_slots.len(),
            random_access
        );

        Ok(Self {
            bandwidth_hz,
            duration,
            btu,
            time_slots,
            carrier_count,
            random_access,
        })
    }

    pub fn bandwidth_hz(&self) -> f64 {
        self.bandwidth_hz
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn btu(&self) -> &Arc<BtuConf> {
        &self.btu
    }

    pub fn carrier_count(&self) -> u16 {
        self.carrier_count
    }

    /// Bandwidth of one carrier in Hz
    pub fn carrier_bandwidth_hz(&self) -> f64 {
        self.btu.bandwidth_hz()
    }

    pub fn is_random_access(&self) -> bool {
        self.random_access
    }

    /// Centre frequency of a carrier, relative to the frame's lower band edge
    pub fn carrier_frequency_hz(&self, carrier_id: u16) -> Result<f64, LayerError> {
        if carrier_id >= self.carrier_count {
            return Err(LayerError::config(format!(
                "Carrier {} out of range, frame has {} carriers",
                carrier_id, self.carrier_count
            )));
        }

        let carrier_bandwidth_hz = self.carrier_bandwidth_hz();
        Ok(carrier_bandwidth_hz * carrier_id as f64 + carrier_bandwidth_hz / 2.0)
    }

    /// Time slot by index
    pub fn time_slot(&self, index: u16) -> Result<&TimeSlotConf, LayerError> {
        self.time_slots.get(index as usize).ok_or_else(|| {
            LayerError::config(format!(
                "Time slot {} out of range, frame has {} slots",
                index,
                self.time_slots.len()
            ))
        })
    }

    pub fn time_slots(&self) -> &[TimeSlotConf] {
        &self.time_slots
    }

    pub fn time_slot_count(&self) -> usize {
        self.time_slots.len()
    }
}

/// Superframe: an ordered set of frames stacked in frequency, repeating in time
#[derive(Debug, Clone)]
pub struct SuperframeConf {
    /// Superframe bandwidth in Hz
    bandwidth_hz: f64,
    /// Superframe duration
    duration: Duration,
    /// Frames in carrier numbering order
    frames: Vec<FrameConf>,
}

impl SuperframeConf {
    /// Create a new superframe configuration
    pub fn new(bandwidth_hz: f64, duration: Duration, frames: Vec<FrameConf>) -> Result<Self, LayerError> {
        if !(bandwidth_hz.is_finite() && bandwidth_hz > 0.0) {
            return Err(LayerError::config(format!("Superframe bandwidth must be positive: {}", bandwidth_hz)));
        }
        if duration.is_zero() {
            return Err(LayerError::config("Superframe duration must be positive"));
        }
        if frames.is_empty() {
            return Err(LayerError::config("Superframe has no frames"));
        }
        if frames.len() > u8::MAX as usize + 1 {
            return Err(LayerError::config(format!("Too many frames in superframe: {}", frames.len())));
        }

        let used_bandwidth_hz: f64 = frames.iter().map(FrameConf::bandwidth_hz).sum();
        if used_bandwidth_hz > bandwidth_hz * (1.0 + BANDWIDTH_EPSILON) {
            return Err(LayerError::config(format!(
                "Frames use {} Hz, superframe bandwidth is {} Hz",
                used_bandwidth_hz, bandwidth_hz
            )));
        }

        if let Some((id, frame)) = frames.iter().enumerate().find(|(_, f)| f.duration() > duration) {
            return Err(LayerError::config(format!(
                "Frame {} lasts {:?}, longer than the superframe {:?}",
                id,
                frame.duration(),
                duration
            )));
        }

        Ok(Self {
            bandwidth_hz,
            duration,
            frames,
        })
    }

    pub fn bandwidth_hz(&self) -> f64 {
        self.bandwidth_hz
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn frames(&self) -> &[FrameConf] {
        &self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Frame by id
    pub fn frame(&self, frame_id: u8) -> Result<&FrameConf, LayerError> {
        self.frames.get(frame_id as usize).ok_or_else(|| {
            LayerError::config(format!(
                "Frame {} out of range, superframe has {} frames",
                frame_id,
                self.frames.len()
            ))
        })
    }

    /// Total number of carriers over all frames
    pub fn total_carrier_count(&self) -> u32 {
        self.frames.iter().map(|f| f.carrier_count() as u32).sum()
    }

    /// Map a frame-local carrier to the flat carrier id space used by the PHY
    pub fn global_carrier_id(&self, frame_id: u8, frame_carrier_id: u16) -> Result<u32, LayerError> {
        let frame = self.frame(frame_id)?;
        if frame_carrier_id >= frame.carrier_count() {
            return Err(LayerError::config(format!(
                "Carrier {} out of range, frame {} has {} carriers",
                frame_carrier_id,
                frame_id,
                frame.carrier_count()
            )));
        }

        let preceding: u32 = self.frames[..frame_id as usize]
            .iter()
            .map(|f| f.carrier_count() as u32)
            .sum();

        Ok(preceding + frame_carrier_id as u32)
    }

    /// Centre frequency of a carrier within its own frame
    pub fn carrier_frequency_hz(&self, carrier_id: u32) -> Result<f64, LayerError> {
        let (frame_index, local_id) = self.locate_carrier(carrier_id)?;
        self.frames[frame_index].carrier_frequency_hz(local_id)
    }

    /// Centre frequency of a carrier relative to the superframe's lower band edge
    pub fn carrier_center_frequency_hz(&self, carrier_id: u32) -> Result<f64, LayerError> {
        let (frame_index, local_id) = self.locate_carrier(carrier_id)?;
        let frame_start_hz: f64 = self.frames[..frame_index].iter().map(FrameConf::bandwidth_hz).sum();
        Ok(frame_start_hz + self.frames[frame_index].carrier_frequency_hz(local_id)?)
    }

    /// Bandwidth of a carrier
    pub fn carrier_bandwidth_hz(&self, carrier_id: u32) -> Result<f64, LayerError> {
        let (frame_index, _) = self.locate_carrier(carrier_id)?;
        Ok(self.frames[frame_index].carrier_bandwidth_hz())
    }

    /// Number of contention channels: one per random access frame
    pub fn random_access_channel_count(&self) -> u32 {
        self.frames.iter().filter(|f| f.is_random_access()).count() as u32
    }

    /// Frame serving contention channel `channel`, with its frame id
    pub fn random_access_frame(&self, channel: u32) -> Option<(u8, &FrameConf)> {
        self.frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_random_access())
            .nth(channel as usize)
            .map(|(id, f)| (id as u8, f))
    }

    /// Ids of frames available for dedicated access
    pub fn dedicated_access_frames(&self) -> impl Iterator<Item = u8> + '_ {
        self.frames
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.is_random_access())
            .map(|(id, _)| id as u8)
    }

    /// Owning frame index and frame-local id of a global carrier id.
    ///
    /// Linear scan; superframes hold few frames.
    fn locate_carrier(&self, carrier_id: u32) -> Result<(usize, u16), LayerError> {
        let total = self.total_carrier_count();
        if carrier_id >= total {
            return Err(LayerError::config(format!(
                "Carrier {} out of range, superframe has {} carriers",
                carrier_id, total
            )));
        }

        let mut first_in_frame = 0u32;
        for (index, frame) in self.frames.iter().enumerate() {
            let count = frame.carrier_count() as u32;
            if carrier_id < first_in_frame + count {
                let local_id = (carrier_id - first_in_frame) as u16;
                trace!("Carrier {} is carrier {} of frame {}", carrier_id, local_id, index);
                return Ok((index, local_id));
            }
            first_in_frame += count;
        }

        Err(LayerError::config(format!("Carrier {} not found", carrier_id)))
    }
}
