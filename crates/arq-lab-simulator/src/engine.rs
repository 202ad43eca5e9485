use crate::channel::{Channel, FaultPlan, Transit};
use crate::context::{ActionBuffer, record};
use crate::receiver::ReceiverBuffer;
use crate::sender::SenderWindow;
use crate::timer::{Generation, TimerManager};
use crate::trace::{Delivery, RunOutcome, RunSummary, SimulationReport};
use arq_lab_abstract::{ArqConfig, ArqError, ArqEvent, Direction, Frame, Message, SeqNum, TimedEvent};
use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    Sender,
    Receiver,
}

#[derive(Debug)]
enum EventType {
    DataArrival { frame: Frame },
    AckArrival { seq: SeqNum },
    TimerExpiry { seq: SeqNum, generation: Generation },
}

#[derive(Debug)]
struct Event {
    time: u64,
    event_type: EventType,
    id: u64, // Unique ID to differentiate events at same time
}

// Custom Ord for Min-Heap (smallest time pops first)
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse comparison for time: smallest time is Greater in BinaryHeap
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Default payload of frame `n`.
pub fn default_payload(n: u32) -> Bytes {
    Bytes::from(format!("Data{n}"))
}

/// Discrete-event controller for one Selective Repeat run.
///
/// Channel deliveries and timer expiries live on a single time-ordered queue,
/// so every mutation of either window happens inside [`Simulator::step`] and
/// ties are broken by scheduling order. After each event the controller
/// refills the sender window and checks for completion.
pub struct Simulator {
    time: u64,
    event_queue: BinaryHeap<Event>,
    event_id_counter: u64,

    config: ArqConfig,
    channel: Channel,
    timers: TimerManager<SeqNum>,

    pub sender: SenderWindow,
    pub receiver: ReceiverBuffer,

    delivered: Vec<Delivery>,
    events: Vec<TimedEvent>,
    outcome: RunOutcome,
    peak_outstanding: usize,
    initialized: bool,
}

impl Simulator {
    /// Build a run over `config.total_frames` generated payloads.
    pub fn new(config: ArqConfig) -> Result<Self, ArqError> {
        let payloads = (0..config.total_frames).map(default_payload).collect();
        Self::with_payloads(config, payloads)
    }

    /// Build a run over caller-supplied payloads. `total_frames` is taken
    /// from the payload count.
    pub fn with_payloads(mut config: ArqConfig, payloads: Vec<Bytes>) -> Result<Self, ArqError> {
        config.total_frames = u32::try_from(payloads.len())
            .map_err(|_| ArqError::InvalidConfig("too many frames".into()))?;
        config.validate()?;

        let mut sender = SenderWindow::new(&config);
        for payload in payloads {
            sender.enqueue(payload);
        }

        Ok(Self {
            time: 0,
            event_queue: BinaryHeap::new(),
            event_id_counter: 0,
            channel: Channel::new(&config),
            timers: TimerManager::new(),
            receiver: ReceiverBuffer::new(&config),
            sender,
            config,
            delivered: Vec::new(),
            events: Vec::new(),
            outcome: RunOutcome::Running,
            peak_outstanding: 0,
            initialized: false,
        })
    }

    pub fn faults_mut(&mut self) -> &mut FaultPlan {
        self.channel.faults_mut()
    }

    /// Register a deterministic fault: drop the first data transmission of `seq`.
    pub fn add_drop_data_once(&mut self, seq: SeqNum) {
        self.faults_mut().drop_data_once(seq);
    }

    /// Register a deterministic fault: drop the first ACK emitted for `seq`.
    pub fn add_drop_ack_once(&mut self, seq: SeqNum) {
        self.faults_mut().drop_ack_once(seq);
    }

    /// Register a deterministic fault: hold back the first data transmission of `seq`.
    pub fn add_reorder_data_once(&mut self, seq: SeqNum, extra_ms: u64) {
        self.faults_mut().delay_data_once(seq, extra_ms);
    }

    /// Register a deterministic fault: hold back the first ACK emitted for `seq`.
    pub fn add_reorder_ack_once(&mut self, seq: SeqNum, extra_ms: u64) {
        self.faults_mut().delay_ack_once(seq, extra_ms);
    }

    pub fn config(&self) -> &ArqConfig {
        &self.config
    }

    pub fn timers(&self) -> &TimerManager<SeqNum> {
        &self.timers
    }

    pub fn outcome(&self) -> RunOutcome {
        self.outcome
    }

    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    pub fn delivered(&self) -> &[Delivery] {
        &self.delivered
    }

    fn push_event(&mut self, time: u64, event_type: EventType) {
        self.event_queue.push(Event {
            time,
            event_type,
            id: self.event_id_counter,
        });
        self.event_id_counter += 1;
    }

    /// Open the window. Called implicitly by the first [`Simulator::step`].
    pub fn init(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        self.fill_window();
        self.check_completion();
    }

    pub fn peek_next_event_time(&self) -> Option<u64> {
        self.event_queue.peek().map(|e| e.time)
    }

    pub fn current_time(&self) -> u64 {
        self.time
    }

    pub fn remaining_events(&self) -> usize {
        self.event_queue.len()
    }

    /// Process the next event. Returns false once the run has finished or
    /// the queue is empty.
    pub fn step(&mut self) -> bool {
        self.init();
        if self.outcome.is_finished() {
            return false;
        }
        let event = match self.event_queue.pop() {
            Some(e) => e,
            None => return false,
        };

        self.time = event.time;
        debug!("Processing event at {}: {:?}", self.time, event.event_type);

        match event.event_type {
            EventType::DataArrival { frame } => {
                let (buffer, ()) =
                    record(self.time, |ctx| self.receiver.on_frame_arrival(ctx, frame));
                self.process_actions(NodeId::Receiver, buffer);
            }
            EventType::AckArrival { seq } => {
                let (buffer, ()) = record(self.time, |ctx| self.sender.on_ack(ctx, seq));
                self.process_actions(NodeId::Sender, buffer);
            }
            EventType::TimerExpiry { seq, generation } => {
                if !self.timers.fire(seq, generation) {
                    debug!("Skipping cancelled timer event for seq={}", seq);
                    return true;
                }
                let (buffer, result) = record(self.time, |ctx| self.sender.on_timeout(ctx, seq));
                self.process_actions(NodeId::Sender, buffer);
                if let Err(err) = result {
                    warn!("{err}");
                    let outcome = match err {
                        ArqError::RetransmissionLimit {
                            seq,
                            retransmissions,
                        } => RunOutcome::RetryBudgetExceeded {
                            seq,
                            retransmissions,
                        },
                        _ => RunOutcome::Aborted,
                    };
                    self.finish(outcome);
                    return true;
                }
            }
        }

        self.fill_window();
        self.check_completion();
        true
    }

    /// Run until the outcome is decided.
    ///
    /// Without a retransmission cap this only returns for `loss_probability < 1`;
    /// use [`Simulator::run_until`] to bound it.
    pub fn run_until_complete(&mut self) -> RunOutcome {
        self.init();
        while self.step() {}
        self.outcome
    }

    /// Like [`Simulator::run_until_complete`], but aborts the run if it is
    /// still going when simulated time would pass `deadline_ms`.
    pub fn run_until(&mut self, deadline_ms: u64) -> RunOutcome {
        self.init();
        while !self.outcome.is_finished() {
            match self.peek_next_event_time() {
                Some(t) if t > deadline_ms => {
                    self.abort();
                    break;
                }
                Some(_) => {
                    self.step();
                }
                None => break,
            }
        }
        self.outcome
    }

    /// Cancel the run: every armed timer is released and nothing queued is
    /// delivered afterwards.
    pub fn abort(&mut self) {
        if self.outcome.is_finished() {
            return;
        }
        self.record_event(NodeId::Sender, ArqEvent::Aborted);
        self.finish(RunOutcome::Aborted);
    }

    pub fn summary(&self) -> RunSummary {
        let sender = self.sender.stats();
        RunSummary {
            frames_sent: sender.frames_sent,
            retransmissions: sender.retransmissions,
            duration_ms: self.time,
            delivered: self.receiver.delivered_count(),
            peak_outstanding: self.peak_outstanding,
            sender,
            receiver: self.receiver.stats(),
        }
    }

    /// Produce a serializable snapshot of the current simulation state.
    pub fn export_report(&self) -> SimulationReport {
        SimulationReport {
            config: self.config.clone(),
            outcome: self.outcome,
            summary: self.summary(),
            delivered: self.delivered.clone(),
            events: self.events.clone(),
        }
    }

    fn fill_window(&mut self) {
        if self.outcome.is_finished() {
            return;
        }
        let (buffer, ()) = record(self.time, |ctx| while self.sender.send_next(ctx) {});
        self.process_actions(NodeId::Sender, buffer);
        self.peak_outstanding = self.peak_outstanding.max(self.sender.outstanding_len());
    }

    fn check_completion(&mut self) {
        if !self.outcome.is_finished()
            && self.sender.is_done()
            && self.receiver.delivered_count() == self.config.total_frames
        {
            let summary = self.summary();
            info!(
                "All {} frames acknowledged: {} sent, {} retransmitted, {} ms",
                summary.delivered, summary.frames_sent, summary.retransmissions, summary.duration_ms
            );
            self.finish(RunOutcome::Completed);
        }
    }

    fn finish(&mut self, outcome: RunOutcome) {
        self.outcome = outcome;
        let released = self.timers.clear();
        let discarded = self.event_queue.len();
        self.event_queue.clear();
        debug!(
            ?outcome,
            released, discarded, "run finished, pending timers and deliveries dropped"
        );
    }

    fn record_event(&mut self, source_node: NodeId, event: ArqEvent) {
        info!("[{:?}] {}", source_node, event);
        self.events.push(TimedEvent {
            time_ms: self.time,
            event,
        });
    }

    fn process_actions(&mut self, source_node: NodeId, buffer: ActionBuffer) {
        for event in buffer.events {
            self.record_event(source_node, event);
        }

        for (seq, payload) in buffer.delivered {
            self.record_event(source_node, ArqEvent::Delivered { seq });
            self.delivered.push(Delivery {
                seq,
                time_ms: self.time,
                payload,
            });
        }

        for seq in buffer.timers_cancel {
            self.timers.cancel(seq);
        }

        for (delay, seq) in buffer.timers_start {
            let deadline = self.time + delay;
            let generation = self.timers.arm(seq, deadline);
            self.push_event(deadline, EventType::TimerExpiry { seq, generation });
        }

        // Channel
        for message in buffer.outgoing {
            let seq = message.seq_num();
            let direction = message.direction();
            match self.channel.transmit(&message) {
                Transit::Lost { .. } => {
                    let event = match direction {
                        Direction::Data => ArqEvent::FrameLost { seq },
                        Direction::Ack => ArqEvent::AckLost { seq },
                    };
                    self.record_event(source_node, event);
                }
                Transit::Deliver {
                    delay_ms,
                    extra_delay_ms,
                } => {
                    if extra_delay_ms > 0 {
                        self.record_event(
                            source_node,
                            ArqEvent::Reordered {
                                seq,
                                direction,
                                extra_delay_ms,
                            },
                        );
                    }
                    let event_type = match message {
                        Message::Data(frame) => EventType::DataArrival { frame },
                        Message::Ack(ack) => EventType::AckArrival { seq: ack.seq_num },
                    };
                    self.push_event(self.time + delay_ms, event_type);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn count(sim: &Simulator, pred: impl Fn(&ArqEvent) -> bool) -> usize {
        sim.events().iter().filter(|e| pred(&e.event)).count()
    }

    fn delivered_seqs(sim: &Simulator) -> Vec<SeqNum> {
        sim.delivered().iter().map(|d| d.seq).collect()
    }

    #[test]
    fn clean_channel_sends_each_frame_once() {
        let mut sim = Simulator::new(ArqConfig::ideal(10, 4)).unwrap();
        assert_eq!(sim.run_until_complete(), RunOutcome::Completed);

        let summary = sim.summary();
        assert_eq!(summary.frames_sent, 10);
        assert_eq!(summary.retransmissions, 0);
        assert_eq!(summary.sender.acks_received, 10);
        assert_eq!(summary.duration_ms, 600);
        assert_eq!(summary.peak_outstanding, 4);
        assert_eq!(delivered_seqs(&sim), (0..10).collect::<Vec<_>>());
        assert_eq!(sim.delivered()[7].payload, Bytes::from("Data7"));
        assert_eq!(count(&sim, |e| matches!(e, ArqEvent::AckSent { .. })), 10);
    }

    #[test]
    fn single_lost_frame_is_the_only_retransmission() {
        let mut sim = Simulator::new(ArqConfig::ideal(10, 4)).unwrap();
        sim.add_drop_data_once(2);
        assert_eq!(sim.run_until_complete(), RunOutcome::Completed);

        let summary = sim.summary();
        assert_eq!(summary.frames_sent, 11);
        assert_eq!(summary.retransmissions, 1);
        assert_eq!(summary.duration_ms, 1400);
        assert_eq!(delivered_seqs(&sim), (0..10).collect::<Vec<_>>());

        let retransmitted: Vec<_> = sim
            .events()
            .iter()
            .filter_map(|e| match e.event {
                ArqEvent::Retransmitted { seq, attempt } => Some((seq, attempt)),
                _ => None,
            })
            .collect();
        assert_eq!(retransmitted, vec![(2, 2)]);

        // Frames 3..=5 waited in the receive buffer for 2's retransmission.
        let frame_2 = &sim.delivered()[2];
        assert_eq!(frame_2.time_ms, 1100);
        assert!(sim.delivered()[3..6].iter().all(|d| d.time_ms == 1100));
    }

    #[test]
    fn overtaken_frame_releases_buffered_successor() {
        let mut sim = Simulator::new(ArqConfig::ideal(10, 4)).unwrap();
        sim.add_reorder_data_once(2, 50);
        sim.init();

        while sim.peek_next_event_time().is_some_and(|t| t <= 100) {
            sim.step();
        }
        assert!(sim.receiver.is_buffered(3));
        assert_eq!(delivered_seqs(&sim), vec![0, 1]);

        assert_eq!(sim.run_until_complete(), RunOutcome::Completed);
        let d = sim.delivered();
        assert_eq!((d[2].seq, d[2].time_ms), (2, 150));
        assert_eq!((d[3].seq, d[3].time_ms), (3, 150));
        assert_eq!(sim.summary().retransmissions, 0);
        assert_eq!(
            count(&sim, |e| matches!(e, ArqEvent::Reordered { seq: 2, .. })),
            1
        );
    }

    #[test]
    fn lossy_runs_deliver_everything_in_order() {
        for seed in 0..40 {
            let config = ArqConfig {
                total_frames: 20,
                window_size: 4,
                loss_probability: 0.3,
                reorder_probability: 0.3,
                seed,
                ..Default::default()
            };
            let mut sim = Simulator::new(config).unwrap();
            assert_eq!(sim.run_until_complete(), RunOutcome::Completed, "seed {seed}");

            let report = sim.export_report();
            assert!(report.delivered_in_order(), "seed {seed}");
            assert!(report.summary.peak_outstanding <= 4, "seed {seed}");
            assert_eq!(sim.timers().armed_count(), 0);
            let unique: HashSet<_> = report.delivered_seqs().into_iter().collect();
            assert_eq!(unique.len(), 20);
        }
    }

    #[test]
    fn only_timed_out_unacked_frames_are_resent() {
        for seed in 0..20 {
            let config = ArqConfig {
                total_frames: 15,
                loss_probability: 0.25,
                seed,
                ..Default::default()
            };
            let mut sim = Simulator::new(config).unwrap();
            sim.run_until_complete();

            let mut acked = HashSet::new();
            let mut previous: Option<&ArqEvent> = None;
            for timed in sim.events() {
                match &timed.event {
                    ArqEvent::AckReceived { seq, .. } => {
                        acked.insert(*seq);
                    }
                    ArqEvent::Retransmitted { seq, .. } => {
                        assert!(!acked.contains(seq), "seed {seed}: resent acked frame {seq}");
                        assert_eq!(previous, Some(&ArqEvent::TimedOut { seq: *seq }));
                    }
                    _ => {}
                }
                previous = Some(&timed.event);
            }
        }
    }

    #[test]
    fn same_seed_replays_identically() {
        let config = ArqConfig {
            seed: 1234,
            ..Default::default()
        };
        let mut a = Simulator::new(config.clone()).unwrap();
        let mut b = Simulator::new(config).unwrap();
        a.run_until_complete();
        b.run_until_complete();
        assert_eq!(a.events(), b.events());
        assert_eq!(a.current_time(), b.current_time());
    }

    #[test]
    fn retry_cap_stops_a_dead_link() {
        let config = ArqConfig {
            loss_probability: 1.0,
            max_retransmissions: Some(3),
            ..ArqConfig::ideal(10, 4)
        };
        let mut sim = Simulator::new(config).unwrap();
        assert_eq!(
            sim.run_until_complete(),
            RunOutcome::RetryBudgetExceeded {
                seq: 0,
                retransmissions: 3
            }
        );
        assert_eq!(sim.summary().frames_sent, 16);
        assert!(sim.delivered().is_empty());
        assert_eq!(sim.timers().armed_count(), 0);
        assert_eq!(sim.remaining_events(), 0);
        assert_eq!(sim.current_time(), 4000);
    }

    #[test]
    fn abort_releases_timers_and_pending_deliveries() {
        let mut sim = Simulator::new(ArqConfig::default()).unwrap();
        sim.init();
        for _ in 0..5 {
            sim.step();
        }
        assert!(sim.timers().armed_count() > 0);

        sim.abort();
        assert_eq!(sim.outcome(), RunOutcome::Aborted);
        assert_eq!(sim.timers().armed_count(), 0);
        assert_eq!(sim.remaining_events(), 0);
        assert!(!sim.step());
        assert_eq!(sim.events().last().map(|e| &e.event), Some(&ArqEvent::Aborted));
    }

    #[test]
    fn deadline_aborts_unbounded_retry() {
        let config = ArqConfig {
            loss_probability: 1.0,
            ..ArqConfig::ideal(3, 2)
        };
        let mut sim = Simulator::new(config).unwrap();
        assert_eq!(sim.run_until(10_000), RunOutcome::Aborted);
        assert!(sim.current_time() <= 10_000);
    }

    #[test]
    fn empty_run_completes_immediately() {
        let mut sim = Simulator::new(ArqConfig::ideal(0, 4)).unwrap();
        assert_eq!(sim.run_until_complete(), RunOutcome::Completed);
        assert_eq!(sim.current_time(), 0);
    }

    #[test]
    fn rejects_invalid_config() {
        let config = ArqConfig {
            window_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            Simulator::new(config),
            Err(ArqError::InvalidConfig(_))
        ));
    }

    #[test]
    fn custom_payloads_are_delivered_verbatim() {
        let payloads: Vec<Bytes> = ["alpha", "beta", "gamma"].into_iter().map(Bytes::from).collect();
        let mut sim = Simulator::with_payloads(ArqConfig::ideal(99, 2), payloads.clone()).unwrap();
        sim.run_until_complete();
        assert_eq!(sim.config().total_frames, 3);
        let got: Vec<_> = sim.delivered().iter().map(|d| d.payload.clone()).collect();
        assert_eq!(got, payloads);
    }
}
