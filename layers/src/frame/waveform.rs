//! Waveform Table
//!
//! Modulation and coding formats usable in return-link time slots. Each
//! waveform fixes the payload a slot can carry and the length of its burst.

use crate::LayerError;
use common::utils::time::symbols_to_duration;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// One modulation/coding format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Waveform {
    /// Waveform id referenced by time slots
    id: u32,
    /// Payload carried by one burst in bytes
    payload_bytes: u32,
    /// Burst length in symbols
    burst_length_symbols: u32,
}

impl Waveform {
    /// Create a new waveform
    pub fn new(id: u32, payload_bytes: u32, burst_length_symbols: u32) -> Result<Self, LayerError> {
        if payload_bytes == 0 {
            return Err(LayerError::config(format!("Waveform {} has no payload", id)));
        }
        if burst_length_symbols == 0 {
            return Err(LayerError::config(format!("Waveform {} has zero burst length", id)));
        }

        Ok(Self {
            id,
            payload_bytes,
            burst_length_symbols,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn payload_bytes(&self) -> u32 {
        self.payload_bytes
    }

    pub fn burst_length_symbols(&self) -> u32 {
        self.burst_length_symbols
    }

    /// Burst duration at `symbol_rate_baud`
    pub fn burst_duration(&self, symbol_rate_baud: f64) -> Duration {
        symbols_to_duration(self.burst_length_symbols, symbol_rate_baud)
    }
}

/// Waveforms by id
#[derive(Debug, Clone)]
pub struct WaveformConf {
    waveforms: BTreeMap<u32, Waveform>,
}

impl WaveformConf {
    /// Build the table; ids must be unique
    pub fn new(waveforms: Vec<Waveform>) -> Result<Self, LayerError> {
        if waveforms.is_empty() {
            return Err(LayerError::config("Waveform table is empty"));
        }

        let mut table = BTreeMap::new();
        for waveform in waveforms {
            let id = waveform.id();
            if table.insert(id, waveform).is_some() {
                return Err(LayerError::config(format!("Duplicate waveform id {}", id)));
            }
        }

        debug!("Waveform table with {} entries", table.len());
        Ok(Self { waveforms: table })
    }

    /// Look up a waveform
    pub fn waveform(&self, id: u32) -> Result<&Waveform, LayerError> {
        self.waveforms
            .get(&id)
            .ok_or_else(|| LayerError::config(format!("Unknown waveform id {}", id)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Waveform> {
        self.waveforms.values()
    }

    pub fn len(&self) -> usize {
        self.waveforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waveforms.is_empty()
    }
}
