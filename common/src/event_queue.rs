//! Discrete-Event Timeline
//!
//! A single logical timeline: events are executed one at a time in
//! nondecreasing time order, ties broken by insertion order. There is no
//! cancellation; a fired event re-checks state if it may have gone stale.

use crate::types::SimTime;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;
use tracing::trace;

/// Something events can be submitted to.
///
/// Components only ever see this trait; the queue itself is owned by the
/// simulation driver.
pub trait EventScheduler<E> {
    /// Current simulated time
    fn now(&self) -> SimTime;

    /// Schedule `event` to fire `delay` after now
    fn schedule(&mut self, delay: Duration, event: E);
}

/// An event with its fire time
#[derive(Debug)]
pub struct ScheduledEvent<E> {
    /// Fire time
    pub time: SimTime,
    /// Insertion sequence for FIFO ordering among equal times
    pub sequence: u64,
    /// Event payload
    pub event: E,
}

impl<E> PartialEq for ScheduledEvent<E> {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.sequence == other.sequence
    }
}

impl<E> Eq for ScheduledEvent<E> {}

impl<E> PartialOrd for ScheduledEvent<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for ScheduledEvent<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest time, then lowest sequence, first)
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Time-ordered event queue
#[derive(Debug)]
pub struct EventQueue<E> {
    heap: BinaryHeap<ScheduledEvent<E>>,
    now: SimTime,
    next_sequence: u64,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventQueue<E> {
    /// Create an empty queue at simulation start
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            now: SimTime::ZERO,
            next_sequence: 0,
        }
    }

    /// Schedule `event` at an absolute time.
    ///
    /// Times in the past are clamped to now so the timeline never runs backwards.
    pub fn schedule_at(&mut self, time: SimTime, event: E) {
        let time = time.max(self.now);
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        trace!("Scheduling event #{} at {}", sequence, time);
        self.heap.push(ScheduledEvent { time, sequence, event });
    }

    /// Pop the next event and advance now to its fire time
    pub fn pop_next(&mut self) -> Option<ScheduledEvent<E>> {
        let next = self.heap.pop()?;
        self.now = next.time;
        Some(next)
    }

    /// Fire time of the next event, if any
    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|e| e.time)
    }

    /// Number of pending events
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Check whether no events are pending
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<E> EventScheduler<E> for EventQueue<E> {
    fn now(&self) -> SimTime {
        self.now
    }

    fn schedule(&mut self, delay: Duration, event: E) {
        self.schedule_at(self.now + delay, event);
    }
}
