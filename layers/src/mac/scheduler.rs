//! Return-Link Access Scheduler
//!
//! Turns TBTP slot assignments and random access decisions into transmit
//! events, and executes those events by draining the LLC queue into PHY
//! bursts.

use super::events::{CrdsaReplica, MacEvent, TxOpportunity};
use super::ra_slots::ContentionSlotRegistry;
use super::tbtp_container::TbtpContainer;
use super::{AccessStats, MacConfig};
use crate::frame::{FrameConf, SuperframeConf, SuperframeSeq, TimeSlotConf};
use crate::{LayerError, ProtocolViolation};
use bytes::Bytes;
use common::event_queue::EventScheduler;
use common::types::{MacAddress, SimTime};
use common::utils::total_len;
use interfaces::{
    ControlMessageStore, ControlMsgTag, ControlMsgType, LlcQueue, PhyTransmitter, QueueEvent, RandomAccess,
    RandomAccessTrigger, RandomAccessTxOpportunity, TbtpMessage, TimingAdvance,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Collaborators the scheduler is bound to
pub struct AccessCollaborators {
    /// Burst sink
    pub phy: Box<dyn PhyTransmitter>,
    /// Queue served in each opportunity
    pub llc: Box<dyn LlcQueue>,
    /// Timing advance source
    pub timing_advance: Box<dyn TimingAdvance>,
    /// Random access algorithm; contention access is disabled without one
    pub random_access: Option<Box<dyn RandomAccess>>,
    /// Store resolving control tags
    pub ctrl_store: Arc<dyn ControlMessageStore>,
}

/// Dedicated access state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No dedicated transmissions pending
    Idle,
    /// At least one dedicated transmission pending
    Scheduled,
}

/// Contention access state of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentionState {
    Quiescent,
    AwaitingOpportunity,
}

/// Per-terminal return-link access scheduler
pub struct AccessScheduler {
    config: MacConfig,
    seq: Arc<SuperframeSeq>,
    phy: Box<dyn PhyTransmitter>,
    llc: Box<dyn LlcQueue>,
    timing_advance: Box<dyn TimingAdvance>,
    random_access: Option<Box<dyn RandomAccess>>,
    ctrl_store: Arc<dyn ControlMessageStore>,
    tbtps: TbtpContainer,
    ra_slots: ContentionSlotRegistry,
    /// Dedicated transmit events not yet fired
    pending_transmissions: usize,
    /// Contention bursts not yet fired, per channel
    pending_contention: BTreeMap<u32, usize>,
    rng: StdRng,
    stats: AccessStats,
}

impl AccessScheduler {
    /// Create a new scheduler.
    ///
    /// Every waveform must carry more than the frame PDU header, the guard
    /// time must be shorter than every burst, and contention access needs at
    /// least one random access frame.
    pub fn new(
        config: MacConfig,
        seq: Arc<SuperframeSeq>,
        collaborators: AccessCollaborators,
    ) -> Result<Self, LayerError> {
        let superframe = seq.superframe(config.superframe_seq_id)?;

        for waveform in seq.waveform_conf().iter() {
            if waveform.payload_bytes() <= config.frame_pdu_header_bytes {
                return Err(LayerError::config(format!(
                    "Waveform {} carries {} bytes, not more than the {} byte header",
                    waveform.id(),
                    waveform.payload_bytes(),
                    config.frame_pdu_header_bytes
                )));
            }
        }

        for superframe in seq.superframes() {
            for frame in superframe.frames() {
                for slot in frame.time_slots() {
                    let waveform = seq.waveform_conf().waveform(slot.waveform_id())?;
                    let burst = waveform.burst_duration(frame.btu().symbol_rate_baud());
                    if config.guard_time >= burst {
                        return Err(LayerError::config(format!(
                            "Guard time {:?} leaves nothing of a {:?} burst",
                            config.guard_time, burst
                        )));
                    }
                }
            }
        }

        if collaborators.random_access.is_some() && superframe.random_access_channel_count() == 0 {
            return Err(LayerError::config(format!(
                "Random access enabled but superframe {} has no random access frame",
                config.superframe_seq_id
            )));
        }

        let tbtps = TbtpContainer::new(config.address, superframe.duration());
        let rng = StdRng::seed_from_u64(config.rng_seed);

        info!(
            "UT {}: access scheduler ready, random access {}",
            config.address,
            if collaborators.random_access.is_some() { "enabled" } else { "disabled" }
        );

        Ok(Self {
            config,
            seq,
            phy: collaborators.phy,
            llc: collaborators.llc,
            timing_advance: collaborators.timing_advance,
            random_access: collaborators.random_access,
            ctrl_store: collaborators.ctrl_store,
            tbtps,
            ra_slots: ContentionSlotRegistry::new(),
            pending_transmissions: 0,
            pending_contention: BTreeMap::new(),
            rng,
            stats: AccessStats::default(),
        })
    }

    pub fn address(&self) -> MacAddress {
        self.config.address
    }

    pub fn state(&self) -> SchedulerState {
        if self.pending_transmissions > 0 {
            SchedulerState::Scheduled
        } else {
            SchedulerState::Idle
        }
    }

    pub fn contention_state(&self, channel: u32) -> ContentionState {
        match self.pending_contention.get(&channel) {
            Some(&pending) if pending > 0 => ContentionState::AwaitingOpportunity,
            _ => ContentionState::Quiescent,
        }
    }

    pub fn stats(&self) -> &AccessStats {
        &self.stats
    }

    pub fn ra_slots(&self) -> &ContentionSlotRegistry {
        &self.ra_slots
    }

    pub fn tbtp_container(&self) -> &TbtpContainer {
        &self.tbtps
    }

    /// Check whether dedicated slots are still ahead at `now`
    pub fn has_scheduled_time_slots(&self, now: SimTime) -> bool {
        self.tbtps.has_scheduled_time_slots(now)
    }

    /// Resolve a delivered control tag
    pub fn receive_control_message(
        &mut self,
        tag: ControlMsgTag,
        queue: &mut dyn EventScheduler<MacEvent>,
    ) -> Result<(), LayerError> {
        match tag.msg_type {
            ControlMsgType::Tbtp => {
                let tbtp = self
                    .ctrl_store
                    .read(tag.msg_id)
                    .ok_or(LayerError::ControlMessageNotFound { id: tag.msg_id })?;
                self.stats.tbtps_received += 1;
                self.schedule_time_slots(tbtp, queue)
            }
            other => Err(LayerError::UnsupportedControlMessage(other)),
        }
    }

    /// Schedule the transmissions a TBTP assigns to this terminal.
    ///
    /// The frame ids of this terminal's slots are checked first, then every
    /// slot is resolved; a rejected TBTP leaves no trace. An accepted TBTP is
    /// cached and marks its superframe start even when it assigns this
    /// terminal nothing.
    pub fn schedule_time_slots(
        &mut self,
        tbtp: Arc<TbtpMessage>,
        queue: &mut dyn EventScheduler<MacEvent>,
    ) -> Result<(), LayerError> {
        let now = queue.now();
        let advance = self.timing_advance.current_advance();
        let seq_id = tbtp.superframe_seq_id();
        let counter = tbtp.superframe_counter();

        let tx_time = self.seq.superframe_tx_time(seq_id, counter, advance)?;
        let start_delay = tx_time
            .checked_duration_since(now)
            .ok_or(ProtocolViolation::StaleAllocation {
                superframe_counter: counter,
                tx_time_ns: tx_time.as_duration().as_nanos(),
                now_ns: now.as_duration().as_nanos(),
            })?;

        let slots = tbtp.da_time_slots(&self.config.address);
        if let Some(first) = slots.first() {
            if let Some(other) = slots.iter().find(|s| s.frame_id != first.frame_id) {
                return Err(ProtocolViolation::MixedFrameIds {
                    first: first.frame_id,
                    found: other.frame_id,
                }
                .into());
            }
        }

        let superframe = self.seq.superframe(seq_id)?;
        let mut opportunities = Vec::with_capacity(slots.len());
        for slot in slots {
            let time_slot = superframe.frame(slot.frame_id)?.time_slot(slot.slot_index)?;
            let opportunity = tx_opportunity(&self.seq, superframe, slot.frame_id, time_slot, None)?;
            opportunities.push((start_delay + time_slot.start_offset(), opportunity));
        }

        match slots.first() {
            Some(first) => debug!(
                "UT {}: TBTP for superframe {} starts at {}, {} slot(s) in frame {}",
                self.config.address,
                counter,
                tx_time,
                opportunities.len(),
                first.frame_id
            ),
            None => trace!("UT {}: no slots in TBTP for superframe {}", self.config.address, counter),
        }

        self.tbtps.remove_past(now);
        self.tbtps.add(tx_time, Arc::clone(&tbtp));

        queue.schedule(
            start_delay,
            MacEvent::SuperframeStart {
                superframe_seq_id: seq_id,
                superframe_counter: counter,
            },
        );

        for (delay, opportunity) in opportunities {
            self.pending_transmissions += 1;
            self.stats.da_slots_scheduled += 1;
            queue.schedule(delay, MacEvent::Transmit(opportunity));
        }

        Ok(())
    }

    /// Handle a fired event
    pub fn handle_event(&mut self, event: MacEvent, queue: &mut dyn EventScheduler<MacEvent>) -> Result<(), LayerError> {
        trace!("UT {}: {} at {}", self.config.address, event.name(), queue.now());

        match event {
            MacEvent::SuperframeStart {
                superframe_seq_id,
                superframe_counter,
            } => {
                debug!(
                    "UT {}: superframe {} of sequence {} started",
                    self.config.address, superframe_counter, superframe_seq_id
                );
                self.tbtps.remove_past(queue.now());
                Ok(())
            }
            MacEvent::Transmit(opportunity) => {
                match opportunity.ra_channel {
                    Some(channel) => self.release_contention(channel, 1),
                    None => self.pending_transmissions = self.pending_transmissions.saturating_sub(1),
                }
                self.transmit(opportunity.payload_bytes, opportunity.carrier_id, opportunity.duration)
            }
            MacEvent::RandomAccessSlotSearch { channel } => self.search_contention_slot(channel, queue),
            MacEvent::CrdsaTransmit {
                channel,
                payload_bytes,
                first,
                replicas,
            } => {
                self.release_contention(channel, 1);
                let units = self.collect_units(payload_bytes)?;
                if units.is_empty() {
                    debug!("UT {}: nothing queued for CRDSA on channel {}", self.config.address, channel);
                    self.stats.empty_opportunities += 1;
                    self.release_contention(channel, replicas.len());
                    return Ok(());
                }

                for replica in replicas {
                    queue.schedule(
                        replica.offset,
                        MacEvent::ReplicaBurst {
                            channel,
                            units: units.clone(),
                            carrier_id: replica.carrier_id,
                            duration: replica.duration,
                        },
                    );
                }
                self.send_burst(units, first.carrier_id, first.duration);
                Ok(())
            }
            MacEvent::ReplicaBurst {
                channel,
                units,
                carrier_id,
                duration,
            } => {
                self.release_contention(channel, 1);
                self.send_burst(units, carrier_id, duration);
                Ok(())
            }
        }
    }

    /// React to an LLC buffer event on request class `rc_index`.
    ///
    /// Buffering on the control class (index 0) triggers slotted ALOHA.
    pub fn on_queue_event(
        &mut self,
        event: QueueEvent,
        rc_index: u8,
        queue: &mut dyn EventScheduler<MacEvent>,
    ) -> Result<(), LayerError> {
        if rc_index != 0 {
            trace!("UT {}: {:?} on RC {} ignored", self.config.address, event, rc_index);
            return Ok(());
        }

        match event {
            QueueEvent::FirstBufferedPacket | QueueEvent::BufferedPacket => {
                self.do_random_access(RandomAccessTrigger::SlottedAloha, queue)
            }
        }
    }

    /// Request a contention transmission opportunity
    pub fn do_random_access(
        &mut self,
        trigger: RandomAccessTrigger,
        queue: &mut dyn EventScheduler<MacEvent>,
    ) -> Result<(), LayerError> {
        if self.random_access.is_none() {
            trace!("UT {}: random access disabled", self.config.address);
            return Ok(());
        }

        let channel_count = self
            .seq
            .superframe(self.config.superframe_seq_id)?
            .random_access_channel_count();
        if channel_count == 0 {
            return Ok(());
        }
        let channel = self.rng.gen_range(0..channel_count);
        let dama_available = self.tbtps.has_scheduled_time_slots(queue.now());

        let Some(random_access) = self.random_access.as_mut() else {
            return Ok(());
        };
        self.stats.ra_attempts += 1;

        match random_access.decide(channel, trigger, dama_available) {
            None => {
                debug!(
                    "UT {}: no random access opportunity on channel {} (DAMA available: {})",
                    self.config.address, channel, dama_available
                );
                Ok(())
            }
            Some(RandomAccessTxOpportunity::SlottedAloha { offset }) => {
                debug!(
                    "UT {}: slotted ALOHA on channel {} after {:?}",
                    self.config.address, channel, offset
                );
                *self.pending_contention.entry(channel).or_default() += 1;
                queue.schedule(offset, MacEvent::RandomAccessSlotSearch { channel });
                Ok(())
            }
            Some(RandomAccessTxOpportunity::Crdsa { slots }) => self.schedule_crdsa(channel, &slots, queue),
        }
    }

    /// Claim the first free contention slot at or after now
    fn search_contention_slot(
        &mut self,
        channel: u32,
        queue: &mut dyn EventScheduler<MacEvent>,
    ) -> Result<(), LayerError> {
        let now = queue.now();
        let seq = Arc::clone(&self.seq);
        let seq_id = self.config.superframe_seq_id;
        let superframe = seq.superframe(seq_id)?;
        let (frame_id, frame) = random_access_frame(superframe, channel)?;

        let advance = self.timing_advance.current_advance();
        let (counter, start) = seq.current_superframe(seq_id, now, advance)?;
        let position = now.saturating_duration_since(start);

        let time_slots = frame.time_slots();
        let claimed = &self.ra_slots;
        let free_slot = move |instance: u32, earliest: Duration| {
            time_slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.start_offset() >= earliest)
                .filter_map(|(index, slot)| u16::try_from(index).ok().map(|index| (index, slot)))
                .filter(|(index, _)| !claimed.is_used(instance, channel, *index))
                .min_by_key(|(index, slot)| (slot.start_offset(), *index))
        };

        let found = match free_slot(counter, position) {
            Some((index, slot)) => Some((counter, start, index, slot)),
            None => counter.checked_add(1).and_then(|next| {
                free_slot(next, Duration::ZERO).map(|(index, slot)| (next, start + superframe.duration(), index, slot))
            }),
        };

        let Some((instance, instance_start, index, slot)) = found else {
            info!(
                "UT {}: no free contention slot on channel {} around superframe {}",
                self.config.address, channel, counter
            );
            self.release_contention(channel, 1);
            return Ok(());
        };

        self.ra_slots.update(counter, instance, channel, &BTreeSet::from([index]))?;
        self.stats.ra_slots_claimed += 1;

        let opportunity = tx_opportunity(&seq, superframe, frame_id, slot, Some(channel))?;
        let delay = (instance_start + slot.start_offset()).saturating_duration_since(now);
        debug!(
            "UT {}: contention slot {} of superframe {} on channel {}, in {:?}",
            self.config.address, index, instance, channel, delay
        );
        queue.schedule(delay, MacEvent::Transmit(opportunity));
        Ok(())
    }

    /// Claim CRDSA replica slots in the next superframe instance and schedule the first replica
    fn schedule_crdsa(
        &mut self,
        channel: u32,
        slots: &BTreeSet<u16>,
        queue: &mut dyn EventScheduler<MacEvent>,
    ) -> Result<(), LayerError> {
        if slots.is_empty() {
            debug!("UT {}: empty CRDSA slot set on channel {}", self.config.address, channel);
            return Ok(());
        }

        let now = queue.now();
        let seq = Arc::clone(&self.seq);
        let seq_id = self.config.superframe_seq_id;
        let superframe = seq.superframe(seq_id)?;
        let (frame_id, frame) = random_access_frame(superframe, channel)?;

        let advance = self.timing_advance.current_advance();
        let (counter, start) = seq.current_superframe(seq_id, now, advance)?;
        let (instance, instance_start) = if start >= now {
            (counter, start)
        } else {
            let next = counter
                .checked_add(1)
                .ok_or_else(|| LayerError::config("Superframe counter overflow"))?;
            (next, start + superframe.duration())
        };

        let mut replicas = Vec::with_capacity(slots.len());
        for &index in slots {
            let slot = frame.time_slot(index)?;
            let opportunity = tx_opportunity(&seq, superframe, frame_id, slot, Some(channel))?;
            replicas.push((slot.start_offset(), opportunity));
        }
        replicas.sort_by_key(|(offset, _)| *offset);

        self.ra_slots.update(counter, instance, channel, slots)?;
        self.stats.ra_slots_claimed += slots.len() as u64;
        *self.pending_contention.entry(channel).or_default() += slots.len();

        let payload_bytes = replicas
            .iter()
            .map(|(_, o)| o.payload_bytes)
            .min()
            .unwrap_or_default();
        let first_offset = replicas[0].0;
        let mut replicas = replicas.into_iter().map(|(offset, o)| CrdsaReplica {
            offset: offset - first_offset,
            duration: o.duration,
            carrier_id: o.carrier_id,
        });
        let Some(first) = replicas.next() else {
            return Ok(());
        };
        let replicas: Vec<_> = replicas.collect();

        let delay = (instance_start + first_offset).saturating_duration_since(now);
        debug!(
            "UT {}: CRDSA with {} replica(s) in superframe {} on channel {}, first in {:?}",
            self.config.address,
            replicas.len() + 1,
            instance,
            channel,
            delay
        );
        queue.schedule(
            delay,
            MacEvent::CrdsaTransmit {
                channel,
                payload_bytes,
                first,
                replicas,
            },
        );
        Ok(())
    }

    /// Fill one slot from the LLC and send it
    fn transmit(&mut self, payload_bytes: u32, carrier_id: u32, duration: Duration) -> Result<(), LayerError> {
        let units = self.collect_units(payload_bytes)?;
        if units.is_empty() {
            trace!("UT {}: nothing queued for carrier {}", self.config.address, carrier_id);
            self.stats.empty_opportunities += 1;
            return Ok(());
        }

        self.send_burst(units, carrier_id, duration);
        Ok(())
    }

    /// Pull units from the LLC until the slot is full or the queue is empty
    fn collect_units(&mut self, payload_bytes: u32) -> Result<Vec<Bytes>, LayerError> {
        let header = self.config.frame_pdu_header_bytes;
        if payload_bytes <= header {
            return Err(LayerError::config(format!(
                "Slot carries {} bytes, not more than the {} byte header",
                payload_bytes, header
            )));
        }

        let mut remaining = payload_bytes - header;
        let mut units = Vec::new();
        while remaining > 0 {
            let Some(pdu) = self.llc.next_unit(remaining, self.config.address) else {
                break;
            };

            let size = u32::try_from(pdu.data.len()).unwrap_or(u32::MAX);
            if size > remaining {
                return Err(ProtocolViolation::OversizedPdu { size, remaining }.into());
            }
            if size == 0 {
                warn!("UT {}: LLC returned an empty unit", self.config.address);
                break;
            }

            remaining -= size;
            trace!(
                "UT {}: unit of {} bytes, {} left in slot, {} left in queue",
                self.config.address,
                size,
                remaining,
                pdu.bytes_left_in_queue
            );
            units.push(pdu.data);
        }

        Ok(units)
    }

    fn send_burst(&mut self, units: Vec<Bytes>, carrier_id: u32, duration: Duration) {
        let bytes = total_len(&units);
        let duration = duration.saturating_sub(self.config.guard_time);

        self.stats.bursts_sent += 1;
        self.stats.units_sent += units.len() as u64;
        self.stats.bytes_sent += bytes as u64;

        debug!(
            "UT {}: burst of {} unit(s), {} bytes on carrier {} for {:?}",
            self.config.address,
            units.len(),
            bytes,
            carrier_id,
            duration
        );
        self.phy.send(units, carrier_id, duration);
    }

    fn release_contention(&mut self, channel: u32, count: usize) {
        if let Some(pending) = self.pending_contention.get_mut(&channel) {
            *pending = pending.saturating_sub(count);
            if *pending == 0 {
                self.pending_contention.remove(&channel);
            }
        }
    }
}

/// Random access frame serving `channel`
fn random_access_frame(superframe: &SuperframeConf, channel: u32) -> Result<(u8, &FrameConf), LayerError> {
    superframe
        .random_access_frame(channel)
        .ok_or_else(|| LayerError::config(format!("No random access frame for channel {}", channel)))
}

/// Burst parameters of one slot
fn tx_opportunity(
    seq: &SuperframeSeq,
    superframe: &SuperframeConf,
    frame_id: u8,
    slot: &TimeSlotConf,
    ra_channel: Option<u32>,
) -> Result<TxOpportunity, LayerError> {
    let frame = superframe.frame(frame_id)?;
    let waveform = seq.waveform_conf().waveform(slot.waveform_id())?;

    Ok(TxOpportunity {
        duration: waveform.burst_duration(frame.btu().symbol_rate_baud()),
        payload_bytes: waveform.payload_bytes(),
        carrier_id: superframe.global_carrier_id(frame_id, slot.carrier_id())?,
        ra_channel,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{BtuConf, FrameConf, TimeSlotConf, Waveform, WaveformConf};
    use common::event_queue::EventQueue;
    use interfaces::LlcPdu;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type Sent = Arc<Mutex<Vec<(Vec<Bytes>, u32, Duration)>>>;

    struct RecordingPhy(Sent);

    impl PhyTransmitter for RecordingPhy {
        fn send(&mut self, units: Vec<Bytes>, carrier_id: u32, duration: Duration) {
            self.0.lock().unwrap().push((units, carrier_id, duration));
        }
    }

    struct FifoLlc(Arc<Mutex<VecDeque<Bytes>>>);

    impl LlcQueue for FifoLlc {
        fn next_unit(&mut self, max_bytes: u32, _address: MacAddress) -> Option<LlcPdu> {
            let mut queue = self.0.lock().unwrap();
            if queue.front()?.len() as u32 > max_bytes {
                return None;
            }
            let data = queue.pop_front()?;
            let bytes_left_in_queue = queue.iter().map(|b| b.len() as u32).sum();
            Some(LlcPdu {
                data,
                bytes_left_in_queue,
            })
        }
    }

    /// Hands out whatever is queued, ignoring the size bound
    struct GreedyLlc(VecDeque<Bytes>);

    impl LlcQueue for GreedyLlc {
        fn next_unit(&mut self, _max_bytes: u32, _address: MacAddress) -> Option<LlcPdu> {
            self.0.pop_front().map(|data| LlcPdu {
                data,
                bytes_left_in_queue: 0,
            })
        }
    }

    struct FixedAdvance(Duration);

    impl TimingAdvance for FixedAdvance {
        fn current_advance(&self) -> Duration {
            self.0
        }
    }

    struct ScriptedRandomAccess {
        decisions: VecDeque<Option<RandomAccessTxOpportunity>>,
        calls: RaCalls,
    }

    type RaCalls = Arc<Mutex<Vec<(u32, RandomAccessTrigger, bool)>>>;

    impl RandomAccess for ScriptedRandomAccess {
        fn decide(
            &mut self,
            channel: u32,
            trigger: RandomAccessTrigger,
            dama_available: bool,
        ) -> Option<RandomAccessTxOpportunity> {
            self.calls.lock().unwrap().push((channel, trigger, dama_available));
            self.decisions.pop_front().flatten()
        }
    }

    #[derive(Default)]
    struct MapStore(BTreeMap<u32, Arc<TbtpMessage>>);

    impl ControlMessageStore for MapStore {
        fn read(&self, id: u32) -> Option<Arc<TbtpMessage>> {
            self.0.get(&id).cloned()
        }
    }

    /// Records scheduled events without executing them
    struct RecordingQueue {
        now: SimTime,
        scheduled: Vec<(Duration, MacEvent)>,
    }

    impl RecordingQueue {
        fn at(now: SimTime) -> Self {
            Self {
                now,
                scheduled: Vec::new(),
            }
        }
    }

    impl EventScheduler<MacEvent> for RecordingQueue {
        fn now(&self) -> SimTime {
            self.now
        }

        fn schedule(&mut self, delay: Duration, event: MacEvent) {
            self.scheduled.push((delay, event));
        }
    }

    /// 250 ms superframe: frame 0 has 8 dedicated carriers with one 1 ms slot
    /// each at 2 ms spacing, frame 1 is a single-carrier random access frame
    /// with slots at 0, 50, 100 and 150 ms. Waveform 0 is a 1 ms burst of 100 bytes.
    fn geometry() -> Arc<SuperframeSeq> {
        let btu = Arc::new(BtuConf::new(1e6, Duration::from_millis(1), 1e6).unwrap());
        let dama_slots = (0..8u16)
            .map(|c| TimeSlotConf::new(Duration::from_millis(2 * c as u64), Duration::from_millis(1), 0, c).unwrap())
            .collect();
        let dama = FrameConf::new(8e6, Duration::from_millis(250), Arc::clone(&btu), dama_slots, false).unwrap();
        let ra_slots = [0u64, 50, 100, 150]
            .iter()
            .map(|&ms| TimeSlotConf::new(Duration::from_millis(ms), Duration::from_millis(1), 0, 0).unwrap())
            .collect();
        let ra = FrameConf::new(1e6, Duration::from_millis(250), btu, ra_slots, true).unwrap();
        let superframe = SuperframeConf::new(9e6, Duration::from_millis(250), vec![dama, ra]).unwrap();
        let waveforms = WaveformConf::new(vec![Waveform::new(0, 100, 1000).unwrap()]).unwrap();
        Arc::new(SuperframeSeq::new(vec![superframe], waveforms).unwrap())
    }

    struct Harness {
        scheduler: AccessScheduler,
        sent: Sent,
        llc: Arc<Mutex<VecDeque<Bytes>>>,
        ra_calls: RaCalls,
    }

    fn address() -> MacAddress {
        MacAddress::from_index(1)
    }

    fn harness_with(
        config: MacConfig,
        advance: Duration,
        decisions: Option<Vec<Option<RandomAccessTxOpportunity>>>,
        store: MapStore,
    ) -> Harness {
        let sent = Sent::default();
        let llc = Arc::new(Mutex::new(VecDeque::new()));
        let ra_calls = RaCalls::default();
        let random_access = decisions.map(|d| {
            Box::new(ScriptedRandomAccess {
                decisions: d.into(),
                calls: Arc::clone(&ra_calls),
            }) as Box<dyn RandomAccess>
        });

        let collaborators = AccessCollaborators {
            phy: Box::new(RecordingPhy(Arc::clone(&sent))),
            llc: Box::new(FifoLlc(Arc::clone(&llc))),
            timing_advance: Box::new(FixedAdvance(advance)),
            random_access,
            ctrl_store: Arc::new(store),
        };
        let scheduler = AccessScheduler::new(config, geometry(), collaborators).unwrap();

        Harness {
            scheduler,
            sent,
            llc,
            ra_calls,
        }
    }

    fn harness(advance: Duration) -> Harness {
        harness_with(MacConfig::new(address()), advance, None, MapStore::default())
    }

    fn ra_harness(decisions: Vec<Option<RandomAccessTxOpportunity>>) -> Harness {
        harness_with(MacConfig::new(address()), Duration::ZERO, Some(decisions), MapStore::default())
    }

    fn enqueue(harness: &Harness, sizes: &[usize]) {
        let mut llc = harness.llc.lock().unwrap();
        for &size in sizes {
            llc.push_back(Bytes::from(vec![0xAB; size]));
        }
    }

    fn tbtp(counter: u32, slots: &[(u8, u16)]) -> Arc<TbtpMessage> {
        let mut tbtp = TbtpMessage::new(0, counter);
        for &(frame, slot) in slots {
            tbtp.add_da_slot(address(), frame, slot);
        }
        Arc::new(tbtp)
    }

    #[test]
    fn test_allocation_end_to_end() {
        let mut h = harness(Duration::from_millis(2));
        enqueue(&h, &[40]);
        let mut queue = EventQueue::new();

        h.scheduler.schedule_time_slots(tbtp(1, &[(0, 3)]), &mut queue).unwrap();
        assert_eq!(h.scheduler.state(), SchedulerState::Scheduled);
        assert_eq!(queue.len(), 2);

        let start = queue.pop_next().unwrap();
        assert_eq!(start.time, SimTime::from_millis(252));
        assert!(matches!(start.event, MacEvent::SuperframeStart { superframe_counter: 1, .. }));
        h.scheduler.handle_event(start.event, &mut queue).unwrap();

        let transmit = queue.pop_next().unwrap();
        assert_eq!(transmit.time, SimTime::from_millis(258));
        assert_eq!(
            transmit.event,
            MacEvent::Transmit(TxOpportunity {
                duration: Duration::from_millis(1),
                payload_bytes: 100,
                carrier_id: 3,
                ra_channel: None,
            })
        );
        h.scheduler.handle_event(transmit.event, &mut queue).unwrap();

        let sent = h.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.len(), 1);
        assert_eq!(sent[0].1, 3);
        assert_eq!(sent[0].2, Duration::from_micros(999));
        assert_eq!(h.scheduler.state(), SchedulerState::Idle);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_slots_scheduled_in_message_order() {
        let mut h = harness(Duration::ZERO);
        let mut queue = RecordingQueue::at(SimTime::ZERO);

        h.scheduler
            .schedule_time_slots(tbtp(2, &[(0, 5), (0, 1)]), &mut queue)
            .unwrap();

        let delays: Vec<_> = queue.scheduled.iter().map(|(d, _)| *d).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(510),
                Duration::from_millis(502)
            ]
        );
        assert_eq!(h.scheduler.stats().da_slots_scheduled, 2);
        assert_eq!(h.scheduler.tbtp_container().len(), 1);
    }

    #[test]
    fn test_stale_allocation_rejected() {
        let mut h = harness(Duration::from_millis(2));
        let mut queue = RecordingQueue::at(SimTime::from_millis(3));

        let err = h.scheduler.schedule_time_slots(tbtp(0, &[(0, 0)]), &mut queue).unwrap_err();
        assert!(matches!(
            err,
            LayerError::Protocol(ProtocolViolation::StaleAllocation { superframe_counter: 0, .. })
        ));
        assert!(queue.scheduled.is_empty());
        assert!(h.scheduler.tbtp_container().is_empty());
        assert_eq!(h.scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn test_allocation_at_exact_start_accepted() {
        let mut h = harness(Duration::from_millis(2));
        let mut queue = RecordingQueue::at(SimTime::from_millis(2));

        h.scheduler.schedule_time_slots(tbtp(0, &[(0, 0)]), &mut queue).unwrap();
        assert_eq!(queue.scheduled[0].0, Duration::ZERO);
    }

    #[test]
    fn test_mixed_frame_ids_rejected() {
        let mut h = harness(Duration::ZERO);
        let mut queue = RecordingQueue::at(SimTime::ZERO);

        let err = h
            .scheduler
            .schedule_time_slots(tbtp(1, &[(2, 0), (3, 0)]), &mut queue)
            .unwrap_err();
        assert!(matches!(
            err,
            LayerError::Protocol(ProtocolViolation::MixedFrameIds { first: 2, found: 3 })
        ));
        assert!(queue.scheduled.is_empty());
    }

    #[test]
    fn test_mixed_frame_ids_checked_before_slot_lookup() {
        let mut h = harness(Duration::ZERO);
        let mut queue = RecordingQueue::at(SimTime::ZERO);

        // Slot 8 does not exist in frame 0; the frame mix is reported anyway
        let err = h
            .scheduler
            .schedule_time_slots(tbtp(1, &[(0, 8), (1, 0)]), &mut queue)
            .unwrap_err();
        assert!(matches!(
            err,
            LayerError::Protocol(ProtocolViolation::MixedFrameIds { first: 0, found: 1 })
        ));
        assert!(queue.scheduled.is_empty());
        assert!(h.scheduler.tbtp_container().is_empty());
    }

    #[test]
    fn test_unknown_slot_schedules_nothing() {
        let mut h = harness(Duration::ZERO);
        let mut queue = RecordingQueue::at(SimTime::ZERO);

        let err = h
            .scheduler
            .schedule_time_slots(tbtp(1, &[(0, 1), (0, 8)]), &mut queue)
            .unwrap_err();
        assert!(matches!(err, LayerError::InvalidConfiguration(_)));
        assert!(queue.scheduled.is_empty());
        assert_eq!(h.scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn test_tbtp_for_other_terminal_ignored() {
        let mut h = harness(Duration::ZERO);
        let mut queue = RecordingQueue::at(SimTime::ZERO);
        let mut other = TbtpMessage::new(0, 1);
        other.add_da_slot(MacAddress::from_index(2), 0, 0);

        h.scheduler.schedule_time_slots(Arc::new(other), &mut queue).unwrap();
        assert_eq!(
            queue.scheduled,
            vec![(
                Duration::from_millis(250),
                MacEvent::SuperframeStart {
                    superframe_seq_id: 0,
                    superframe_counter: 1,
                }
            )]
        );
        assert_eq!(h.scheduler.tbtp_container().len(), 1);
        assert!(!h.scheduler.has_scheduled_time_slots(SimTime::ZERO));
        assert_eq!(h.scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn test_transmit_fills_slot() {
        let mut config = MacConfig::new(address());
        config.frame_pdu_header_bytes = 5;
        let mut h = harness_with(config, Duration::ZERO, None, MapStore::default());
        enqueue(&h, &[40, 40, 30]);

        h.scheduler.transmit(100, 4, Duration::from_millis(1)).unwrap();
        let sent = h.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.len(), 2);
        assert_eq!(sent[0].1, 4);
        assert_eq!(h.llc.lock().unwrap().len(), 1);
        assert_eq!(h.scheduler.stats().bytes_sent, 80);
    }

    #[test]
    fn test_empty_queue_sends_nothing() {
        let mut h = harness(Duration::ZERO);
        h.scheduler.transmit(100, 0, Duration::from_millis(1)).unwrap();

        assert!(h.sent.lock().unwrap().is_empty());
        assert_eq!(h.scheduler.stats().empty_opportunities, 1);
    }

    #[test]
    fn test_oversized_unit_is_violation() {
        let collaborators = AccessCollaborators {
            phy: Box::new(RecordingPhy(Sent::default())),
            llc: Box::new(GreedyLlc(VecDeque::from([Bytes::from(vec![0u8; 120])]))),
            timing_advance: Box::new(FixedAdvance(Duration::ZERO)),
            random_access: None,
            ctrl_store: Arc::new(MapStore::default()),
        };
        let mut scheduler = AccessScheduler::new(MacConfig::new(address()), geometry(), collaborators).unwrap();

        let err = scheduler.transmit(100, 0, Duration::from_millis(1)).unwrap_err();
        assert!(matches!(
            err,
            LayerError::Protocol(ProtocolViolation::OversizedPdu { size: 120, remaining: 99 })
        ));
    }

    #[test]
    fn test_construction_checks() {
        let build = |config: MacConfig, random_access: Option<Box<dyn RandomAccess>>, seq: Arc<SuperframeSeq>| {
            AccessScheduler::new(
                config,
                seq,
                AccessCollaborators {
                    phy: Box::new(RecordingPhy(Sent::default())),
                    llc: Box::new(GreedyLlc(VecDeque::new())),
                    timing_advance: Box::new(FixedAdvance(Duration::ZERO)),
                    random_access,
                    ctrl_store: Arc::new(MapStore::default()),
                },
            )
        };

        let mut config = MacConfig::new(address());
        config.frame_pdu_header_bytes = 100;
        assert!(build(config, None, geometry()).is_err());

        let mut config = MacConfig::new(address());
        config.guard_time = Duration::from_millis(1);
        assert!(build(config, None, geometry()).is_err());

        let mut config = MacConfig::new(address());
        config.superframe_seq_id = 1;
        assert!(build(config, None, geometry()).is_err());

        // Random access without a random access frame
        let btu = Arc::new(BtuConf::new(1e6, Duration::from_millis(1), 1e6).unwrap());
        let frame = FrameConf::new(1e6, Duration::from_millis(250), btu, vec![], false).unwrap();
        let superframe = SuperframeConf::new(1e6, Duration::from_millis(250), vec![frame]).unwrap();
        let waveforms = WaveformConf::new(vec![Waveform::new(0, 100, 1000).unwrap()]).unwrap();
        let seq = Arc::new(SuperframeSeq::new(vec![superframe], waveforms).unwrap());
        let random_access: Box<dyn RandomAccess> = Box::new(ScriptedRandomAccess {
            decisions: VecDeque::new(),
            calls: Arc::default(),
        });
        assert!(build(MacConfig::new(address()), Some(random_access), seq).is_err());
    }

    #[test]
    fn test_control_message_lookup() {
        let mut store = MapStore::default();
        store.0.insert(4, tbtp(1, &[(0, 2)]));
        let mut h = harness_with(MacConfig::new(address()), Duration::ZERO, None, store);
        let mut queue = RecordingQueue::at(SimTime::ZERO);

        let miss = ControlMsgTag {
            msg_type: ControlMsgType::Tbtp,
            msg_id: 7,
        };
        let err = h.scheduler.receive_control_message(miss, &mut queue).unwrap_err();
        assert!(matches!(err, LayerError::ControlMessageNotFound { id: 7 }));

        let hit = ControlMsgTag {
            msg_type: ControlMsgType::Tbtp,
            msg_id: 4,
        };
        h.scheduler.receive_control_message(hit, &mut queue).unwrap();
        assert_eq!(queue.scheduled.len(), 2);
        assert_eq!(h.scheduler.stats().tbtps_received, 1);

        let other = ControlMsgTag {
            msg_type: ControlMsgType::CapacityRequest,
            msg_id: 4,
        };
        assert!(matches!(
            h.scheduler.receive_control_message(other, &mut queue),
            Err(LayerError::UnsupportedControlMessage(ControlMsgType::CapacityRequest))
        ));
    }

    #[test]
    fn test_slotted_aloha_schedules_slot_search() {
        let mut h = ra_harness(vec![Some(RandomAccessTxOpportunity::SlottedAloha {
            offset: Duration::from_millis(5),
        })]);
        let mut queue = RecordingQueue::at(SimTime::from_millis(10));

        h.scheduler
            .do_random_access(RandomAccessTrigger::SlottedAloha, &mut queue)
            .unwrap();

        assert_eq!(
            queue.scheduled,
            vec![(Duration::from_millis(5), MacEvent::RandomAccessSlotSearch { channel: 0 })]
        );
        assert_eq!(h.scheduler.contention_state(0), ContentionState::AwaitingOpportunity);
        assert_eq!(*h.ra_calls.lock().unwrap(), vec![(0, RandomAccessTrigger::SlottedAloha, false)]);
    }

    #[test]
    fn test_no_opportunity_is_noop() {
        let mut h = ra_harness(vec![None]);
        let mut queue = RecordingQueue::at(SimTime::ZERO);

        h.scheduler.do_random_access(RandomAccessTrigger::Crdsa, &mut queue).unwrap();
        assert!(queue.scheduled.is_empty());
        assert_eq!(h.scheduler.contention_state(0), ContentionState::Quiescent);
    }

    #[test]
    fn test_pending_dedicated_slots_reported_to_random_access() {
        let mut h = ra_harness(vec![None]);
        let mut queue = RecordingQueue::at(SimTime::ZERO);
        h.scheduler.schedule_time_slots(tbtp(1, &[(0, 0)]), &mut queue).unwrap();
        queue.scheduled.clear();

        h.scheduler
            .on_queue_event(QueueEvent::FirstBufferedPacket, 0, &mut queue)
            .unwrap();
        assert_eq!(*h.ra_calls.lock().unwrap(), vec![(0, RandomAccessTrigger::SlottedAloha, true)]);
        assert_eq!(h.scheduler.stats().ra_attempts, 1);
        assert!(queue.scheduled.is_empty());
    }

    #[test]
    fn test_queue_event_on_control_class_triggers_aloha() {
        let mut h = ra_harness(vec![None, None]);
        let mut queue = RecordingQueue::at(SimTime::ZERO);

        h.scheduler
            .on_queue_event(QueueEvent::FirstBufferedPacket, 1, &mut queue)
            .unwrap();
        assert!(h.ra_calls.lock().unwrap().is_empty());

        h.scheduler
            .on_queue_event(QueueEvent::BufferedPacket, 0, &mut queue)
            .unwrap();
        assert_eq!(*h.ra_calls.lock().unwrap(), vec![(0, RandomAccessTrigger::SlottedAloha, false)]);
    }

    #[test]
    fn test_slot_search_picks_next_free_slot() {
        let mut h = ra_harness(vec![]);
        let mut queue = RecordingQueue::at(SimTime::from_millis(60));

        for _ in 0..3 {
            h.scheduler
                .handle_event(MacEvent::RandomAccessSlotSearch { channel: 0 }, &mut queue)
                .unwrap();
        }

        let delays: Vec<_> = queue.scheduled.iter().map(|(d, _)| *d).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(40),
                Duration::from_millis(90),
                Duration::from_millis(190)
            ]
        );
        assert!(h.scheduler.ra_slots().is_used(0, 0, 2));
        assert!(h.scheduler.ra_slots().is_used(0, 0, 3));
        assert!(h.scheduler.ra_slots().is_used(1, 0, 0));

        match &queue.scheduled[0].1 {
            MacEvent::Transmit(opportunity) => {
                assert_eq!(opportunity.carrier_id, 8);
                assert_eq!(opportunity.ra_channel, Some(0));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_slot_search_transmits_queued_data() {
        let mut h = ra_harness(vec![Some(RandomAccessTxOpportunity::SlottedAloha {
            offset: Duration::from_millis(1),
        })]);
        enqueue(&h, &[20]);
        let mut queue = EventQueue::new();

        h.scheduler
            .on_queue_event(QueueEvent::FirstBufferedPacket, 0, &mut queue)
            .unwrap();
        while let Some(next) = queue.pop_next() {
            h.scheduler.handle_event(next.event, &mut queue).unwrap();
        }

        let sent = h.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, 8);
        assert_eq!(queue.now(), SimTime::from_millis(50));
        assert_eq!(h.scheduler.contention_state(0), ContentionState::Quiescent);
    }

    #[test]
    fn test_crdsa_replicas_carry_same_units() {
        let mut h = ra_harness(vec![Some(RandomAccessTxOpportunity::Crdsa {
            slots: BTreeSet::from([3, 1]),
        })]);
        enqueue(&h, &[40]);
        let mut queue = RecordingQueue::at(SimTime::from_millis(10));

        h.scheduler.do_random_access(RandomAccessTrigger::Crdsa, &mut queue).unwrap();
        assert!(h.scheduler.ra_slots().is_used(1, 0, 1));
        assert!(h.scheduler.ra_slots().is_used(1, 0, 3));
        assert_eq!(h.scheduler.contention_state(0), ContentionState::AwaitingOpportunity);

        let (delay, event) = queue.scheduled.remove(0);
        assert_eq!(delay, Duration::from_millis(290));
        match &event {
            MacEvent::CrdsaTransmit { first, replicas, .. } => {
                assert_eq!(first.offset, Duration::ZERO);
                assert_eq!(replicas.len(), 1);
                assert_eq!(replicas[0].offset, Duration::from_millis(100));
            }
            other => panic!("unexpected event {:?}", other),
        }

        h.scheduler.handle_event(event, &mut queue).unwrap();
        let (delay, replica) = queue.scheduled.remove(0);
        assert_eq!(delay, Duration::from_millis(100));
        h.scheduler.handle_event(replica, &mut queue).unwrap();

        let sent = h.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, sent[1].0);
        assert_eq!(h.scheduler.contention_state(0), ContentionState::Quiescent);
        assert_eq!(h.scheduler.stats().bursts_sent, 2);
    }

    #[test]
    fn test_crdsa_double_booking_rejected() {
        let slots = BTreeSet::from([1]);
        let mut h = ra_harness(vec![
            Some(RandomAccessTxOpportunity::Crdsa { slots: slots.clone() }),
            Some(RandomAccessTxOpportunity::Crdsa { slots }),
        ]);
        let mut queue = RecordingQueue::at(SimTime::from_millis(10));

        h.scheduler.do_random_access(RandomAccessTrigger::Crdsa, &mut queue).unwrap();
        let err = h
            .scheduler
            .do_random_access(RandomAccessTrigger::Crdsa, &mut queue)
            .unwrap_err();
        assert!(matches!(
            err,
            LayerError::Protocol(ProtocolViolation::SlotDoubleBooked { frame: 1, channel: 0, slot: 1 })
        ));
        assert_eq!(queue.scheduled.len(), 1);
    }
}
