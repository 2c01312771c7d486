//! Control Message Container
//!
//! Holds TBTPs issued by the network controller so that terminals can resolve
//! the ids carried in control tags. Messages are kept for a fixed storage
//! time and then dropped; a terminal reading an id after that gets `None`.

use crate::collaborators::ControlMessageStore;
use crate::message_types::TbtpMessage;
use common::types::SimTime;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct StoreState {
    next_id: u32,
    messages: BTreeMap<u32, (SimTime, Arc<TbtpMessage>)>,
}

/// Shared control message storage with retention
#[derive(Debug)]
pub struct ControlMsgContainer {
    store_time: Duration,
    state: RwLock<StoreState>,
}

impl ControlMsgContainer {
    /// Create a container keeping messages for `store_time`
    pub fn new(store_time: Duration) -> Self {
        Self {
            store_time,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Storage time
    pub fn store_time(&self) -> Duration {
        self.store_time
    }

    /// Store `message` at `now` and return its id.
    ///
    /// Messages older than the storage time are dropped first.
    pub fn add(&self, message: TbtpMessage, now: SimTime) -> u32 {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let before = state.messages.len();
        let store_time = self.store_time;
        state
            .messages
            .retain(|_, (stored_at, _)| now.saturating_duration_since(*stored_at) <= store_time);
        let dropped = before - state.messages.len();
        if dropped > 0 {
            trace!("Dropped {} expired control messages", dropped);
        }

        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);
        state.messages.insert(id, (now, Arc::new(message)));

        debug!("Stored control message {} at {}", id, now);
        id
    }

    /// Number of messages currently held
    pub fn len(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).messages.len()
    }

    /// Check whether the container is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ControlMessageStore for ControlMsgContainer {
    fn read(&self, id: u32) -> Option<Arc<TbtpMessage>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.messages.get(&id).map(|(_, message)| Arc::clone(message))
    }
}
