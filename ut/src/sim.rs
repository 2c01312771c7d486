//! Simulation Driver
//!
//! Runs the NCC, the traffic sources and every terminal's access scheduler
//! on one discrete-event timeline.

use crate::config::{millis, RandomAccessMode, ScenarioConfig};
use crate::ncc::Ncc;
use crate::traffic::{ConstantTimingAdvance, FifoLlc, PhySink, PhyStats, RandomAccessModel, SimClock};
use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use common::event_queue::{EventQueue, EventScheduler};
use common::types::{MacAddress, SimTime};
use common::utils::time::secs_to_duration;
use interfaces::{ControlMessageStore, ControlMsgContainer, ControlMsgTag, RandomAccess, RandomAccessTrigger};
use layers::LayerError;
use layers::mac::{AccessCollaborators, AccessScheduler, AccessStats, MacConfig, MacEvent};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Everything that can happen on the timeline
#[derive(Debug)]
pub enum SimEvent {
    /// Event owned by terminal `ut`'s scheduler
    Mac { ut: usize, event: MacEvent },
    /// NCC publishes the plan for a superframe
    IssueTbtp { superframe_counter: u32 },
    /// Control tag reaches the terminals
    DeliverControl { tag: ControlMsgTag },
    /// Terminal `ut` receives a packet from its upper layers
    PacketArrival { ut: usize },
}

/// View of the shared queue through which one terminal schedules its events
struct TerminalQueue<'a> {
    queue: &'a mut EventQueue<SimEvent>,
    ut: usize,
}

impl EventScheduler<MacEvent> for TerminalQueue<'_> {
    fn now(&self) -> SimTime {
        self.queue.now()
    }

    fn schedule(&mut self, delay: Duration, event: MacEvent) {
        self.queue.schedule(delay, SimEvent::Mac { ut: self.ut, event });
    }
}

struct Terminal {
    scheduler: AccessScheduler,
    llc: FifoLlc,
    rng: StdRng,
}

/// Per-terminal results
#[derive(Debug, Clone, Serialize)]
pub struct TerminalReport {
    pub address: MacAddress,
    pub stats: AccessStats,
    pub queued_bytes: usize,
}

/// Results of one run
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub sim_time_s: f64,
    pub events: u64,
    pub stopped_early: bool,
    pub tbtps_issued: u64,
    pub totals: AccessStats,
    pub phy: PhyStats,
    pub terminals: Vec<TerminalReport>,
}

pub struct Simulation {
    queue: EventQueue<SimEvent>,
    terminals: Vec<Terminal>,
    ncc: Ncc,
    clock: SimClock,
    phy: PhySink,
    superframe_duration: Duration,
    propagation_delay: Duration,
    packet_bytes: usize,
    packet_interval: Duration,
    rc_index: u8,
    ra_mode: RandomAccessMode,
    end: SimTime,
    stop: Arc<AtomicBool>,
    events: u64,
}

impl Simulation {
    /// Build terminals, NCC and initial events from a scenario
    pub fn build(config: &ScenarioConfig, stop: Arc<AtomicBool>) -> Result<Self> {
        config.validate()?;

        let seq = config.superframe_seq()?;
        let superframe = seq.superframe(0)?;
        let superframe_duration = superframe.duration();

        let ncc_config = &config.ncc;
        let lead_time = millis(ncc_config.lead_time_ms, "lead time")?;
        let propagation_delay = millis(ncc_config.propagation_delay_ms, "propagation delay")?;
        let store = Arc::new(ControlMsgContainer::new(millis(ncc_config.store_time_ms, "store time")?));

        let ut_config = &config.terminals;
        let advance = millis(ut_config.timing_advance_ms, "timing advance")?;
        let guard_time = secs_to_duration(ut_config.guard_time_us / 1e6)
            .ok_or_else(|| anyhow!("Invalid guard time: {} us", ut_config.guard_time_us))?;
        let max_backoff = millis(ut_config.random_access.max_backoff_ms, "backoff")?;
        let packet_interval = millis(ut_config.traffic.interval_ms, "packet interval")?;
        let end = SimTime::from_duration(
            secs_to_duration(config.simulation.length_s)
                .ok_or_else(|| anyhow!("Invalid simulation length: {} s", config.simulation.length_s))?,
        );

        let slots_per_channel: Vec<u16> = (0..superframe.random_access_channel_count())
            .filter_map(|channel| superframe.random_access_frame(channel))
            .map(|(_, frame)| u16::try_from(frame.time_slot_count()).unwrap_or(u16::MAX))
            .collect();

        let clock = SimClock::default();
        let phy = PhySink::new();
        let addresses: Vec<MacAddress> = (1..=ut_config.count as u32).map(MacAddress::from_index).collect();

        let mut terminals = Vec::with_capacity(addresses.len());
        for (ut, address) in addresses.iter().enumerate() {
            let seed = config.simulation.seed.wrapping_add(ut as u64);

            let mut mac_config = MacConfig::new(*address);
            mac_config.frame_pdu_header_bytes = ut_config.header_bytes;
            mac_config.guard_time = guard_time;
            mac_config.rng_seed = seed;

            let random_access: Option<Box<dyn RandomAccess>> = match ut_config.random_access.mode {
                RandomAccessMode::Disabled => None,
                RandomAccessMode::SlottedAloha | RandomAccessMode::Crdsa => Some(Box::new(RandomAccessModel::new(
                    StdRng::seed_from_u64(seed.rotate_left(17)),
                    clock.clone(),
                    max_backoff,
                    ut_config.random_access.replicas,
                    slots_per_channel.clone(),
                    superframe_duration,
                ))),
            };

            let llc = FifoLlc::new();
            let ctrl_store: Arc<dyn ControlMessageStore> = Arc::clone(&store) as Arc<dyn ControlMessageStore>;
            let collaborators = AccessCollaborators {
                phy: Box::new(phy.transmitter(ut, clock.clone())),
                llc: Box::new(llc.clone()),
                timing_advance: Box::new(ConstantTimingAdvance(advance)),
                random_access,
                ctrl_store,
            };

            let scheduler = AccessScheduler::new(mac_config, Arc::clone(&seq), collaborators)
                .with_context(|| format!("Terminal {}", address))?;
            terminals.push(Terminal {
                scheduler,
                llc,
                rng: StdRng::seed_from_u64(seed.rotate_left(41)),
            });
        }

        let ncc = Ncc::new(&seq, 0, store, addresses, ncc_config.slots_per_terminal)?;

        let mut queue = EventQueue::new();
        queue.schedule_at(
            SimTime::from_duration(superframe_duration - lead_time),
            SimEvent::IssueTbtp { superframe_counter: 1 },
        );
        for (ut, terminal) in terminals.iter_mut().enumerate() {
            let first = packet_interval.mul_f64(terminal.rng.gen_range(0.0..1.0));
            queue.schedule(first, SimEvent::PacketArrival { ut });
        }

        info!(
            "Simulation: {} terminal(s), {:?} superframe, random access {:?}, {} s",
            terminals.len(),
            superframe_duration,
            ut_config.random_access.mode,
            config.simulation.length_s
        );

        Ok(Self {
            queue,
            terminals,
            ncc,
            clock,
            phy,
            superframe_duration,
            propagation_delay,
            packet_bytes: ut_config.traffic.packet_bytes,
            packet_interval,
            rc_index: ut_config.traffic.rc_index,
            ra_mode: ut_config.random_access.mode,
            end,
            stop,
            events: 0,
        })
    }

    /// Run until the end time, an error, or the stop flag
    pub fn run(mut self) -> Result<SimReport> {
        let mut stopped_early = false;

        while let Some(time) = self.queue.peek_time() {
            if time > self.end {
                break;
            }
            if self.stop.load(Ordering::Relaxed) {
                warn!("Stopped at {}", self.queue.now());
                stopped_early = true;
                break;
            }

            let Some(next) = self.queue.pop_next() else {
                break;
            };
            self.clock.set(next.time);
            self.events += 1;
            self.dispatch(next.event)?;
        }

        info!("Simulation finished at {} after {} events", self.queue.now(), self.events);
        Ok(self.report(stopped_early))
    }

    fn dispatch(&mut self, event: SimEvent) -> Result<()> {
        let now = self.queue.now();

        match event {
            SimEvent::Mac { ut, event } => {
                let terminal = self
                    .terminals
                    .get_mut(ut)
                    .ok_or_else(|| anyhow!("Unknown terminal {}", ut))?;
                let name = event.name();
                let result = terminal
                    .scheduler
                    .handle_event(event, &mut TerminalQueue { queue: &mut self.queue, ut });
                report_violation(ut, result).with_context(|| format!("UT {} handling {} at {}", ut, name, now))?;
            }
            SimEvent::IssueTbtp { superframe_counter } => {
                let tag = self.ncc.issue(superframe_counter, now)?;
                self.queue
                    .schedule(self.propagation_delay, SimEvent::DeliverControl { tag });

                if let Some(next) = superframe_counter.checked_add(1) {
                    self.queue.schedule(
                        self.superframe_duration,
                        SimEvent::IssueTbtp { superframe_counter: next },
                    );
                }
            }
            SimEvent::DeliverControl { tag } => {
                for (ut, terminal) in self.terminals.iter_mut().enumerate() {
                    let result = terminal
                        .scheduler
                        .receive_control_message(tag, &mut TerminalQueue { queue: &mut self.queue, ut });
                    report_violation(ut, result).with_context(|| format!("UT {} receiving control message {} at {}", ut, tag.msg_id, now))?;
                }
            }
            SimEvent::PacketArrival { ut } => {
                let terminal = self
                    .terminals
                    .get_mut(ut)
                    .ok_or_else(|| anyhow!("Unknown terminal {}", ut))?;
                let queue_event = terminal.llc.enqueue(Bytes::from(vec![ut as u8; self.packet_bytes]));

                let mut terminal_queue = TerminalQueue { queue: &mut self.queue, ut };
                let result = match self.ra_mode {
                    RandomAccessMode::Crdsa => terminal
                        .scheduler
                        .do_random_access(RandomAccessTrigger::Crdsa, &mut terminal_queue),
                    RandomAccessMode::SlottedAloha | RandomAccessMode::Disabled => {
                        terminal
                            .scheduler
                            .on_queue_event(queue_event, self.rc_index, &mut terminal_queue)
                    }
                };
                report_violation(ut, result).with_context(|| format!("UT {} packet arrival at {}", ut, now))?;

                let gap = self.packet_interval.mul_f64(terminal.rng.gen_range(0.5..1.5));
                debug!("UT {}: next packet in {:?}", ut, gap);
                self.queue.schedule(gap, SimEvent::PacketArrival { ut });
            }
        }

        Ok(())
    }

    fn report(&self, stopped_early: bool) -> SimReport {
        let mut totals = AccessStats::default();
        let mut terminals = Vec::with_capacity(self.terminals.len());

        for terminal in &self.terminals {
            let stats = terminal.scheduler.stats();
            totals.merge(stats);
            terminals.push(TerminalReport {
                address: terminal.scheduler.address(),
                stats: stats.clone(),
                queued_bytes: terminal.llc.queued_bytes(),
            });
        }

        SimReport {
            sim_time_s: self.queue.now().as_secs_f64(),
            events: self.events,
            stopped_early,
            tbtps_issued: self.ncc.tbtps_issued(),
            totals,
            phy: self.phy.stats(),
            terminals,
        }
    }
}

/// Log scheduler errors that mean the terminal and the NCC disagree
fn report_violation(ut: usize, result: Result<(), LayerError>) -> Result<(), LayerError> {
    if let Err(e) = &result {
        if e.is_protocol_violation() {
            error!("UT {}: {}, aborting the run", ut, e);
        }
    }
    result
}
