//! Return-Link Access Layers Library
//!
//! This crate implements the terminal side of a time/frequency multiplexed
//! satellite return link: the frame geometry shared by all terminals and the
//! per-terminal MAC that turns burst time plans and random access decisions
//! into scheduled transmissions.

pub mod frame;
pub mod mac;

use interfaces::ControlMsgType;
use thiserror::Error;

/// Runtime protocol violations.
///
/// Each one means the terminal and the controller have lost agreement on slot
/// state. None of them is retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("TBTP for superframe {superframe_counter} starts at {tx_time_ns} ns, already past (now {now_ns} ns)")]
    StaleAllocation {
        superframe_counter: u32,
        tx_time_ns: u128,
        now_ns: u128,
    },

    #[error("TBTP allocates slots from frames {first} and {found} to the same terminal")]
    MixedFrameIds { first: u8, found: u8 },

    #[error("Random access slot {slot} already used in frame {frame}, channel {channel}")]
    SlotDoubleBooked { frame: u32, channel: u32, slot: u16 },

    #[error("LLC returned a {size} byte unit with only {remaining} bytes left in the slot")]
    OversizedPdu { size: u32, remaining: u32 },
}

/// Common errors for the return-link layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("Control message {id} not found, storage time too short for the superframe sequence")]
    ControlMessageNotFound { id: u32 },

    #[error("Unsupported control message: {0:?}")]
    UnsupportedControlMessage(ControlMsgType),
}

impl LayerError {
    /// Shorthand for configuration errors
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        LayerError::InvalidConfiguration(msg.into())
    }

    /// Check whether this is a protocol violation
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, LayerError::Protocol(_))
    }
}
