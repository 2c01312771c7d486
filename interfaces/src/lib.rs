//! Return-Link Collaborator Interfaces Library
//! 
//! This crate defines the contracts between the terminal MAC and the parts
//! of the system it does not own: the PHY transmit sink, the LLC queue, the
//! timing-advance source, the random-access algorithm and the control-message
//! store, plus the TBTP wire message exchanged with the network controller.

pub mod collaborators;
pub mod message_types;
pub mod ctrl_store;

pub use collaborators::{
    ControlMessageStore, LlcPdu, LlcQueue, PhyTransmitter, QueueEvent, RandomAccess,
    RandomAccessTrigger, RandomAccessTxOpportunity, TimingAdvance,
};
pub use ctrl_store::ControlMsgContainer;
pub use message_types::{ControlMsgTag, ControlMsgType, DaTimeSlot, TbtpMessage};

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
    
    #[error("Unknown control message type: {0}")]
    UnknownMessageType(u8),

    #[error("Too many {what} for the wire format: {count}")]
    TooManyEntries { what: &'static str, count: usize },
}
