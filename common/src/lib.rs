//! Common Utilities and Types Library
//! 
//! This crate provides shared types, time helpers and the discrete-event
//! timeline used across the return-link access implementation.

pub mod types;
pub mod utils;
pub mod event_queue;

// Re-export commonly used items
pub use types::*;
pub use utils::*;
pub use event_queue::{EventQueue, EventScheduler, ScheduledEvent};
