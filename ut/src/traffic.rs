//! Demo Collaborators
//!
//! Stand-ins for the parts of a terminal the access scheduler does not own:
//! a FIFO LLC queue, a constant timing advance, a simple random access
//! algorithm and a PHY sink that only counts bursts.

use bytes::Bytes;
use common::types::{MacAddress, SimTime};
use interfaces::{
    LlcPdu, LlcQueue, PhyTransmitter, QueueEvent, RandomAccess, RandomAccessTrigger, RandomAccessTxOpportunity,
    TimingAdvance,
};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, trace};

/// Simulated time shared with collaborators that need to know it
#[derive(Debug, Clone, Default)]
pub struct SimClock(Arc<AtomicU64>);

impl SimClock {
    pub fn set(&self, now: SimTime) {
        let nanos = u64::try_from(now.as_duration().as_nanos()).unwrap_or(u64::MAX);
        self.0.store(nanos, Ordering::Relaxed);
    }

    pub fn now(&self) -> SimTime {
        SimTime::from_duration(Duration::from_nanos(self.0.load(Ordering::Relaxed)))
    }
}

/// FIFO packet queue, shared between the traffic source and the scheduler
#[derive(Debug, Clone, Default)]
pub struct FifoLlc {
    packets: Arc<Mutex<VecDeque<Bytes>>>,
}

impl FifoLlc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a packet and report the buffer event
    pub fn enqueue(&self, packet: Bytes) -> QueueEvent {
        let mut packets = self.packets.lock().unwrap_or_else(PoisonError::into_inner);
        let event = if packets.is_empty() {
            QueueEvent::FirstBufferedPacket
        } else {
            QueueEvent::BufferedPacket
        };
        packets.push_back(packet);
        event
    }

    /// Bytes waiting in the queue
    pub fn queued_bytes(&self) -> usize {
        let packets = self.packets.lock().unwrap_or_else(PoisonError::into_inner);
        packets.iter().map(Bytes::len).sum()
    }
}

impl LlcQueue for FifoLlc {
    fn next_unit(&mut self, max_bytes: u32, address: MacAddress) -> Option<LlcPdu> {
        let mut packets = self.packets.lock().unwrap_or_else(PoisonError::into_inner);

        let front = packets.front()?;
        if front.len() > max_bytes as usize {
            trace!("UT {}: {} byte packet does not fit in {} bytes", address, front.len(), max_bytes);
            return None;
        }

        let data = packets.pop_front()?;
        let left: usize = packets.iter().map(Bytes::len).sum();
        Some(LlcPdu {
            data,
            bytes_left_in_queue: u32::try_from(left).unwrap_or(u32::MAX),
        })
    }
}

/// Timing advance that never changes
#[derive(Debug, Clone, Copy)]
pub struct ConstantTimingAdvance(pub Duration);

impl TimingAdvance for ConstantTimingAdvance {
    fn current_advance(&self) -> Duration {
        self.0
    }
}

/// Uniform backoff slotted ALOHA and random-slot CRDSA.
///
/// Stays silent while the terminal has dedicated slots ahead.
pub struct RandomAccessModel {
    rng: StdRng,
    clock: SimClock,
    max_backoff: Duration,
    replicas: usize,
    /// Slots in the random access frame of each channel
    slots_per_channel: Vec<u16>,
    /// Minimum spacing between CRDSA attempts on one channel
    crdsa_spacing: Duration,
    last_crdsa: BTreeMap<u32, SimTime>,
}

impl RandomAccessModel {
    pub fn new(
        rng: StdRng,
        clock: SimClock,
        max_backoff: Duration,
        replicas: usize,
        slots_per_channel: Vec<u16>,
        superframe_duration: Duration,
    ) -> Self {
        Self {
            rng,
            clock,
            max_backoff,
            replicas,
            slots_per_channel,
            crdsa_spacing: superframe_duration,
            last_crdsa: BTreeMap::new(),
        }
    }

    fn crdsa_slots(&mut self, channel: u32) -> Option<BTreeSet<u16>> {
        let now = self.clock.now();
        if let Some(last) = self.last_crdsa.get(&channel) {
            if now.saturating_duration_since(*last) < self.crdsa_spacing {
                trace!("CRDSA on channel {} still backing off", channel);
                return None;
            }
        }

        let slot_count = *self.slots_per_channel.get(channel as usize)? as usize;
        let replicas = self.replicas.min(slot_count);
        if replicas == 0 {
            return None;
        }

        let slots: BTreeSet<u16> = sample(&mut self.rng, slot_count, replicas)
            .iter()
            .map(|index| index as u16)
            .collect();
        self.last_crdsa.insert(channel, now);
        Some(slots)
    }
}

impl RandomAccess for RandomAccessModel {
    fn decide(
        &mut self,
        channel: u32,
        trigger: RandomAccessTrigger,
        dama_available: bool,
    ) -> Option<RandomAccessTxOpportunity> {
        if dama_available {
            trace!("Dedicated slots ahead, no random access on channel {}", channel);
            return None;
        }

        match trigger {
            RandomAccessTrigger::SlottedAloha => {
                let max_nanos = u64::try_from(self.max_backoff.as_nanos()).unwrap_or(u64::MAX);
                let offset = Duration::from_nanos(self.rng.gen_range(0..=max_nanos));
                debug!("Slotted ALOHA backoff {:?} on channel {}", offset, channel);
                Some(RandomAccessTxOpportunity::SlottedAloha { offset })
            }
            RandomAccessTrigger::Crdsa => {
                let slots = self.crdsa_slots(channel)?;
                debug!("CRDSA replicas in slots {:?} on channel {}", slots, channel);
                Some(RandomAccessTxOpportunity::Crdsa { slots })
            }
        }
    }
}

/// Burst counters collected by the PHY sink
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhyStats {
    pub bursts: u64,
    pub units: u64,
    pub bytes: u64,
    /// Bursts that started on a carrier another terminal already used at the same instant
    pub collisions: u64,
    pub bursts_per_carrier: BTreeMap<u32, u64>,
}

#[derive(Debug, Default)]
struct PhyLog {
    stats: PhyStats,
    /// Carrier and start time of recent bursts
    starts: BTreeMap<(u32, SimTime), usize>,
}

/// PHY sink shared by all terminals; counts bursts and same-slot collisions
#[derive(Debug, Clone, Default)]
pub struct PhySink {
    log: Arc<Mutex<PhyLog>>,
}

impl PhySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transmitter for terminal `ut`
    pub fn transmitter(&self, ut: usize, clock: SimClock) -> CountingPhy {
        CountingPhy {
            ut,
            clock,
            log: Arc::clone(&self.log),
        }
    }

    pub fn stats(&self) -> PhyStats {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).stats.clone()
    }
}

/// Per-terminal handle onto the shared PHY sink
pub struct CountingPhy {
    ut: usize,
    clock: SimClock,
    log: Arc<Mutex<PhyLog>>,
}

impl PhyTransmitter for CountingPhy {
    fn send(&mut self, units: Vec<Bytes>, carrier_id: u32, duration: Duration) {
        let now = self.clock.now();
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);

        // Bursts that started before now can no longer collide with new ones
        log.starts.retain(|(_, start), _| *start >= now);
        if let Some(other) = log.starts.insert((carrier_id, now), self.ut) {
            if other != self.ut {
                log.stats.collisions += 1;
                debug!("UT {} collides with UT {} on carrier {} at {}", self.ut, other, carrier_id, now);
            }
        }

        log.stats.bursts += 1;
        log.stats.units += units.len() as u64;
        log.stats.bytes += common::utils::total_len(&units) as u64;
        *log.stats.bursts_per_carrier.entry(carrier_id).or_default() += 1;
        trace!("UT {}: {} units on carrier {} for {:?}", self.ut, units.len(), carrier_id, duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_fifo_llc_events_and_bound() {
        let llc = FifoLlc::new();
        assert_eq!(llc.enqueue(Bytes::from(vec![0u8; 100])), QueueEvent::FirstBufferedPacket);
        assert_eq!(llc.enqueue(Bytes::from(vec![0u8; 50])), QueueEvent::BufferedPacket);

        let mut queue = llc.clone();
        let address = MacAddress::from_index(1);
        assert!(queue.next_unit(99, address).is_none());

        let pdu = queue.next_unit(499, address).unwrap();
        assert_eq!(pdu.data.len(), 100);
        assert_eq!(pdu.bytes_left_in_queue, 50);
        assert_eq!(llc.queued_bytes(), 50);
    }

    #[test]
    fn test_aloha_backoff_bounded() {
        let mut model = RandomAccessModel::new(
            StdRng::seed_from_u64(1),
            SimClock::default(),
            Duration::from_millis(20),
            2,
            vec![20],
            Duration::from_millis(100),
        );

        for _ in 0..100 {
            match model.decide(0, RandomAccessTrigger::SlottedAloha, false) {
                Some(RandomAccessTxOpportunity::SlottedAloha { offset }) => {
                    assert!(offset <= Duration::from_millis(20))
                }
                other => panic!("unexpected decision {:?}", other),
            }
        }
    }

    #[test]
    fn test_crdsa_spacing() {
        let clock = SimClock::default();
        let mut model = RandomAccessModel::new(
            StdRng::seed_from_u64(1),
            clock.clone(),
            Duration::from_millis(20),
            3,
            vec![20],
            Duration::from_millis(100),
        );

        match model.decide(0, RandomAccessTrigger::Crdsa, false) {
            Some(RandomAccessTxOpportunity::Crdsa { slots }) => {
                assert_eq!(slots.len(), 3);
                assert!(slots.iter().all(|&s| s < 20));
            }
            other => panic!("unexpected decision {:?}", other),
        }

        clock.set(SimTime::from_millis(99));
        assert!(model.decide(0, RandomAccessTrigger::Crdsa, false).is_none());
        assert!(model.decide(1, RandomAccessTrigger::Crdsa, false).is_none());

        clock.set(SimTime::from_millis(100));
        assert!(model.decide(0, RandomAccessTrigger::Crdsa, false).is_some());
    }

    #[test]
    fn test_no_random_access_while_dama_available() {
        let mut model = RandomAccessModel::new(
            StdRng::seed_from_u64(1),
            SimClock::default(),
            Duration::from_millis(20),
            2,
            vec![20],
            Duration::from_millis(100),
        );

        assert!(model.decide(0, RandomAccessTrigger::SlottedAloha, true).is_none());
        assert!(model.decide(0, RandomAccessTrigger::Crdsa, true).is_none());
        // The refused CRDSA attempt does not start the spacing window
        assert!(model.decide(0, RandomAccessTrigger::Crdsa, false).is_some());
    }

    #[test]
    fn test_phy_sink_counts_collisions() {
        let sink = PhySink::new();
        let clock = SimClock::default();
        let mut ut0 = sink.transmitter(0, clock.clone());
        let mut ut1 = sink.transmitter(1, clock.clone());

        clock.set(SimTime::from_millis(10));
        ut0.send(vec![Bytes::from_static(b"abc")], 4, Duration::from_millis(8));
        ut1.send(vec![Bytes::from_static(b"de")], 4, Duration::from_millis(8));
        ut1.send(vec![Bytes::from_static(b"f")], 5, Duration::from_millis(8));

        clock.set(SimTime::from_millis(20));
        ut0.send(vec![Bytes::from_static(b"g")], 4, Duration::from_millis(8));

        let stats = sink.stats();
        assert_eq!(stats.bursts, 4);
        assert_eq!(stats.bytes, 7);
        assert_eq!(stats.collisions, 1);
        assert_eq!(stats.bursts_per_carrier.get(&4), Some(&3));
    }
}
