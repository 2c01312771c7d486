//! Return Link Frame Geometry
//!
//! Immutable description of the time/frequency grid shared by all terminals.

pub mod conf;
pub mod superframe_seq;
pub mod waveform;

pub use conf::{BtuConf, FrameConf, SuperframeConf, TimeSlotConf};
pub use superframe_seq::SuperframeSeq;
pub use waveform::{Waveform, WaveformConf};
