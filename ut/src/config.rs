//! Scenario Configuration
//!
//! YAML or TOML description of a return-link scenario: the superframe
//! geometry, the waveforms, the terminals and the network controller.

use anyhow::{anyhow, bail, Context, Result};
use common::utils::time::secs_to_duration;
use layers::frame::{BtuConf, FrameConf, SuperframeConf, SuperframeSeq, TimeSlotConf, Waveform, WaveformConf};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Complete scenario
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    /// Simulation run parameters
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Superframe geometry
    pub superframe: SuperframeSection,
    /// Waveform table
    pub waveforms: Vec<WaveformSection>,
    /// Terminal population
    pub terminals: TerminalSection,
    /// Network controller
    #[serde(default)]
    pub ncc: NccSection,
}

/// Simulation run parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    /// Simulated time in seconds
    #[serde(default = "default_length_s")]
    pub length_s: f64,
    /// Base random seed
    #[serde(default)]
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            length_s: default_length_s(),
            seed: 0,
        }
    }
}

fn default_length_s() -> f64 {
    10.0
}

/// Superframe geometry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SuperframeSection {
    /// Superframe bandwidth in Hz
    pub bandwidth_hz: f64,
    /// Superframe duration in milliseconds
    pub duration_ms: f64,
    /// Frames in carrier numbering order
    pub frames: Vec<FrameSection>,
}

/// One frame
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FrameSection {
    /// Frame bandwidth in Hz
    pub bandwidth_hz: f64,
    /// Frame duration in milliseconds; the superframe duration if absent
    #[serde(default)]
    pub duration_ms: Option<f64>,
    /// Burst time unit
    pub btu: BtuSection,
    /// Equal slots laid out back to back on every carrier
    pub slots_per_carrier: u16,
    /// Waveform used by all slots
    pub waveform_id: u32,
    /// Frame reserved for contention access
    #[serde(default)]
    pub random_access: bool,
}

/// Burst time unit
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BtuSection {
    pub bandwidth_hz: f64,
    pub length_us: f64,
    pub symbol_rate_baud: f64,
}

/// One waveform
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WaveformSection {
    pub id: u32,
    pub payload_bytes: u32,
    pub burst_length_symbols: u32,
}

/// Terminal population
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TerminalSection {
    /// Number of terminals
    pub count: usize,
    /// Timing advance in milliseconds
    #[serde(default)]
    pub timing_advance_ms: f64,
    /// Frame PDU header in bytes
    #[serde(default = "default_header_bytes")]
    pub header_bytes: u32,
    /// Burst guard time in microseconds
    #[serde(default = "default_guard_time_us")]
    pub guard_time_us: f64,
    /// Offered traffic
    #[serde(default)]
    pub traffic: TrafficSection,
    /// Contention access
    #[serde(default)]
    pub random_access: RandomAccessSection,
}

fn default_header_bytes() -> u32 {
    layers::mac::DEFAULT_FRAME_PDU_HEADER_BYTES
}

fn default_guard_time_us() -> f64 {
    1.0
}

/// Offered traffic per terminal
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrafficSection {
    /// Packet size in bytes
    #[serde(default = "default_packet_bytes")]
    pub packet_bytes: usize,
    /// Mean packet interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: f64,
    /// Request class the packets are queued in
    #[serde(default)]
    pub rc_index: u8,
}

impl Default for TrafficSection {
    fn default() -> Self {
        Self {
            packet_bytes: default_packet_bytes(),
            interval_ms: default_interval_ms(),
            rc_index: 0,
        }
    }
}

fn default_packet_bytes() -> usize {
    100
}

fn default_interval_ms() -> f64 {
    20.0
}

/// Contention access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RandomAccessMode {
    #[default]
    Disabled,
    SlottedAloha,
    Crdsa,
}

/// Contention access parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RandomAccessSection {
    #[serde(default)]
    pub mode: RandomAccessMode,
    /// Maximum slotted ALOHA backoff in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: f64,
    /// CRDSA replicas per packet
    #[serde(default = "default_replicas")]
    pub replicas: usize,
}

impl Default for RandomAccessSection {
    fn default() -> Self {
        Self {
            mode: RandomAccessMode::Disabled,
            max_backoff_ms: default_max_backoff_ms(),
            replicas: default_replicas(),
        }
    }
}

fn default_max_backoff_ms() -> f64 {
    20.0
}

fn default_replicas() -> usize {
    2
}

/// Network controller
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NccSection {
    /// Dedicated slots given to one terminal per superframe
    #[serde(default = "default_slots_per_terminal")]
    pub slots_per_terminal: u16,
    /// TBTPs are issued this long before the superframe starts
    #[serde(default = "default_lead_time_ms")]
    pub lead_time_ms: f64,
    /// Delay from issuing a TBTP to the terminals receiving it
    #[serde(default = "default_propagation_delay_ms")]
    pub propagation_delay_ms: f64,
    /// Control message retention
    #[serde(default = "default_store_time_ms")]
    pub store_time_ms: f64,
}

impl Default for NccSection {
    fn default() -> Self {
        Self {
            slots_per_terminal: default_slots_per_terminal(),
            lead_time_ms: default_lead_time_ms(),
            propagation_delay_ms: default_propagation_delay_ms(),
            store_time_ms: default_store_time_ms(),
        }
    }
}

fn default_slots_per_terminal() -> u16 {
    4
}

fn default_lead_time_ms() -> f64 {
    20.0
}

fn default_propagation_delay_ms() -> f64 {
    10.0
}

fn default_store_time_ms() -> f64 {
    500.0
}

/// Convert configured milliseconds
pub fn millis(value: f64, what: &str) -> Result<Duration> {
    secs_to_duration(value / 1e3).ok_or_else(|| anyhow!("Invalid {}: {} ms", what, value))
}

impl ScenarioConfig {
    /// Load a scenario; `.toml` files are read as TOML, anything else as YAML
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Reading scenario {}", path.display()))?;

        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&contents)?,
            _ => Self::from_yaml_str(&contents)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Timing checks the library cannot make on its own
    pub fn validate(&self) -> Result<()> {
        let superframe = millis(self.superframe.duration_ms, "superframe duration")?;
        let lead = millis(self.ncc.lead_time_ms, "lead time")?;
        let propagation = millis(self.ncc.propagation_delay_ms, "propagation delay")?;
        let store = millis(self.ncc.store_time_ms, "store time")?;

        if self.terminals.count == 0 {
            bail!("Scenario has no terminals");
        }
        if lead >= superframe {
            bail!("Lead time {:?} must be shorter than the superframe {:?}", lead, superframe);
        }
        if propagation > lead {
            bail!("Propagation delay {:?} exceeds the lead time {:?}", propagation, lead);
        }
        if store < propagation {
            bail!("Store time {:?} is shorter than the propagation delay {:?}", store, propagation);
        }
        if self.ncc.slots_per_terminal == 0 {
            bail!("NCC must assign at least one slot per terminal");
        }
        if self.terminals.traffic.packet_bytes == 0 {
            bail!("Packet size must be positive");
        }
        if self.terminals.random_access.mode == RandomAccessMode::Crdsa && self.terminals.random_access.replicas == 0 {
            bail!("CRDSA needs at least one replica");
        }
        Ok(())
    }

    /// Build the superframe sequence described by the scenario
    pub fn superframe_seq(&self) -> Result<Arc<SuperframeSeq>> {
        let superframe_duration = millis(self.superframe.duration_ms, "superframe duration")?;

        let mut frames = Vec::with_capacity(self.superframe.frames.len());
        for (id, section) in self.superframe.frames.iter().enumerate() {
            let frame = build_frame(section, superframe_duration).with_context(|| format!("Frame {}", id))?;
            frames.push(frame);
        }

        let superframe = SuperframeConf::new(self.superframe.bandwidth_hz, superframe_duration, frames)?;

        let waveforms = self
            .waveforms
            .iter()
            .map(|w| Waveform::new(w.id, w.payload_bytes, w.burst_length_symbols))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Arc::new(SuperframeSeq::new(vec![superframe], WaveformConf::new(waveforms)?)?))
    }
}

fn build_frame(section: &FrameSection, superframe_duration: Duration) -> Result<FrameConf> {
    let duration = match section.duration_ms {
        Some(ms) => millis(ms, "frame duration")?,
        None => superframe_duration,
    };

    let btu_length = secs_to_duration(section.btu.length_us / 1e6)
        .ok_or_else(|| anyhow!("Invalid BTU length: {} us", section.btu.length_us))?;
    let btu = Arc::new(BtuConf::new(section.btu.bandwidth_hz, btu_length, section.btu.symbol_rate_baud)?);

    if section.slots_per_carrier == 0 {
        bail!("Frame needs at least one slot per carrier");
    }
    let carriers = (section.bandwidth_hz / section.btu.bandwidth_hz).round() as u16;
    let slot_duration = duration / section.slots_per_carrier as u32;

    let mut slots = Vec::with_capacity(carriers as usize * section.slots_per_carrier as usize);
    for carrier in 0..carriers {
        for index in 0..section.slots_per_carrier {
            slots.push(TimeSlotConf::new(
                slot_duration * index as u32,
                slot_duration,
                section.waveform_id,
                carrier,
            )?);
        }
    }

    Ok(FrameConf::new(section.bandwidth_hz, duration, btu, slots, section.random_access)?)
}
