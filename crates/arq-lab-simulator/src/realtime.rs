//! Wall-clock driver built on tokio.
//!
//! Every retransmission timer and every channel delivery is its own task that
//! sleeps and then posts an [`Input`] to one queue. The run loop is the only
//! place that touches the windows, so the two windows never need a lock. A
//! timer task is aborted when its frame is acknowledged, but an expiry that
//! was already queued still reaches the loop; the generation check in
//! [`TimerManager::fire`] and the sender's own acked check drop it.

use std::collections::HashMap;
use std::sync::Arc;

use arq_lab_abstract::{
    ArqConfig, ArqError, ArqEvent, Direction, Frame, Message, SeqNum, TimedEvent,
};
use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::{Duration, Instant, sleep};
use tracing::{debug, info, warn};

use crate::channel::{Channel, FaultPlan, Transit};
use crate::context::{ActionBuffer, record};
use crate::engine::{NodeId, default_payload};
use crate::receiver::ReceiverBuffer;
use crate::sender::SenderWindow;
use crate::timer::{Generation, TimerManager};
use crate::trace::{Delivery, RunOutcome, RunSummary, SimulationReport};

#[derive(Debug)]
enum Input {
    DataArrival(Frame),
    AckArrival(SeqNum),
    TimerExpiry { seq: SeqNum, generation: Generation },
}

/// Cancels a running [`RealtimeSimulator`] from outside the run loop.
#[derive(Clone)]
pub struct AbortSignal(Arc<watch::Sender<bool>>);

impl AbortSignal {
    pub fn abort(&self) {
        self.0.send_replace(true);
    }
}

pub struct RealtimeSimulator {
    config: ArqConfig,
    channel: Channel,
    timers: TimerManager<SeqNum>,
    sender: SenderWindow,
    receiver: ReceiverBuffer,

    tasks: JoinSet<()>,
    timer_tasks: HashMap<SeqNum, AbortHandle>,
    inputs_tx: mpsc::UnboundedSender<Input>,
    inputs_rx: mpsc::UnboundedReceiver<Input>,
    abort_tx: Arc<watch::Sender<bool>>,
    abort_rx: watch::Receiver<bool>,
    observer: Option<mpsc::UnboundedSender<TimedEvent>>,

    started: Instant,
    elapsed_ms: u64,
    delivered: Vec<Delivery>,
    events: Vec<TimedEvent>,
    outcome: RunOutcome,
    peak_outstanding: usize,
}

impl RealtimeSimulator {
    pub fn new(config: ArqConfig) -> Result<Self, ArqError> {
        let payloads = (0..config.total_frames).map(default_payload).collect();
        Self::with_payloads(config, payloads)
    }

    pub fn with_payloads(mut config: ArqConfig, payloads: Vec<Bytes>) -> Result<Self, ArqError> {
        config.total_frames = u32::try_from(payloads.len())
            .map_err(|_| ArqError::InvalidConfig("too many frames".into()))?;
        config.validate()?;

        let mut sender = SenderWindow::new(&config);
        for payload in payloads {
            sender.enqueue(payload);
        }
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (abort_tx, abort_rx) = watch::channel(false);

        Ok(Self {
            channel: Channel::new(&config),
            timers: TimerManager::new(),
            receiver: ReceiverBuffer::new(&config),
            sender,
            config,
            tasks: JoinSet::new(),
            timer_tasks: HashMap::new(),
            inputs_tx,
            inputs_rx,
            abort_tx: Arc::new(abort_tx),
            abort_rx,
            observer: None,
            started: Instant::now(),
            elapsed_ms: 0,
            delivered: Vec::new(),
            events: Vec::new(),
            outcome: RunOutcome::Running,
            peak_outstanding: 0,
        })
    }

    pub fn faults_mut(&mut self) -> &mut FaultPlan {
        self.channel.faults_mut()
    }

    pub fn abort_signal(&self) -> AbortSignal {
        AbortSignal(self.abort_tx.clone())
    }

    /// Stream events live as they happen, in addition to the final report.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TimedEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observer = Some(tx);
        rx
    }

    pub async fn run(mut self) -> SimulationReport {
        self.started = Instant::now();
        info!(
            frames = self.config.total_frames,
            window = self.config.window_size,
            "starting real-time run"
        );
        self.fill_window();
        self.check_completion();

        while !self.outcome.is_finished() {
            tokio::select! {
                changed = self.abort_rx.changed() => {
                    if changed.is_err() || *self.abort_rx.borrow() {
                        self.abort();
                    }
                }
                Some(input) = self.inputs_rx.recv() => self.handle(input),
            }
        }
        self.export_report()
    }

    fn now(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn handle(&mut self, input: Input) {
        self.elapsed_ms = self.now();
        // Reap finished delivery and timer tasks.
        while self.tasks.try_join_next().is_some() {}

        match input {
            Input::DataArrival(frame) => {
                let (buffer, ()) =
                    record(self.elapsed_ms, |ctx| self.receiver.on_frame_arrival(ctx, frame));
                self.process_actions(NodeId::Receiver, buffer);
            }
            Input::AckArrival(seq) => {
                let (buffer, ()) = record(self.elapsed_ms, |ctx| self.sender.on_ack(ctx, seq));
                self.process_actions(NodeId::Sender, buffer);
            }
            Input::TimerExpiry { seq, generation } => {
                if !self.timers.fire(seq, generation) {
                    debug!(seq, "stale timer expiry dropped");
                    return;
                }
                self.timer_tasks.remove(&seq);
                let (buffer, result) =
                    record(self.elapsed_ms, |ctx| self.sender.on_timeout(ctx, seq));
                self.process_actions(NodeId::Sender, buffer);
                if let Err(err) = result {
                    warn!("{err}");
                    self.finish(match err {
                        ArqError::RetransmissionLimit {
                            seq,
                            retransmissions,
                        } => RunOutcome::RetryBudgetExceeded {
                            seq,
                            retransmissions,
                        },
                        _ => RunOutcome::Aborted,
                    });
                    return;
                }
            }
        }

        self.fill_window();
        self.check_completion();
    }

    fn abort(&mut self) {
        if self.outcome.is_finished() {
            return;
        }
        self.elapsed_ms = self.now();
        self.record_event(NodeId::Sender, ArqEvent::Aborted);
        self.finish(RunOutcome::Aborted);
    }

    fn fill_window(&mut self) {
        let (buffer, ()) = record(self.elapsed_ms, |ctx| while self.sender.send_next(ctx) {});
        self.process_actions(NodeId::Sender, buffer);
        self.peak_outstanding = self.peak_outstanding.max(self.sender.outstanding_len());
    }

    fn check_completion(&mut self) {
        if !self.outcome.is_finished()
            && self.sender.is_done()
            && self.receiver.delivered_count() == self.config.total_frames
        {
            info!(elapsed_ms = self.elapsed_ms, "all frames acknowledged");
            self.finish(RunOutcome::Completed);
        }
    }

    fn finish(&mut self, outcome: RunOutcome) {
        self.outcome = outcome;
        self.timers.clear();
        self.timer_tasks.clear();
        self.tasks.abort_all();
        debug!(?outcome, "run finished, outstanding tasks aborted");
    }

    fn record_event(&mut self, source_node: NodeId, event: ArqEvent) {
        info!("[{:?}] {}", source_node, event);
        let timed = TimedEvent {
            time_ms: self.elapsed_ms,
            event,
        };
        if let Some(observer) = &self.observer {
            // A dropped subscriber only loses the live feed.
            let _ = observer.send(timed.clone());
        }
        self.events.push(timed);
    }

    fn process_actions(&mut self, source_node: NodeId, buffer: ActionBuffer) {
        for event in buffer.events {
            self.record_event(source_node, event);
        }

        for (seq, payload) in buffer.delivered {
            self.record_event(source_node, ArqEvent::Delivered { seq });
            self.delivered.push(Delivery {
                seq,
                time_ms: self.elapsed_ms,
                payload,
            });
        }

        for seq in buffer.timers_cancel {
            self.timers.cancel(seq);
            if let Some(task) = self.timer_tasks.remove(&seq) {
                task.abort();
            }
        }

        for (delay, seq) in buffer.timers_start {
            let generation = self.timers.arm(seq, self.elapsed_ms + delay);
            let tx = self.inputs_tx.clone();
            let task = self.tasks.spawn(async move {
                sleep(Duration::from_millis(delay)).await;
                let _ = tx.send(Input::TimerExpiry { seq, generation });
            });
            if let Some(previous) = self.timer_tasks.insert(seq, task) {
                previous.abort();
            }
        }

        for message in buffer.outgoing {
            let seq = message.seq_num();
            let direction = message.direction();
            let (delay_ms, extra_delay_ms) = match self.channel.transmit(&message) {
                Transit::Lost { .. } => {
                    let event = match direction {
                        Direction::Data => ArqEvent::FrameLost { seq },
                        Direction::Ack => ArqEvent::AckLost { seq },
                    };
                    self.record_event(source_node, event);
                    continue;
                }
                Transit::Deliver {
                    delay_ms,
                    extra_delay_ms,
                } => (delay_ms, extra_delay_ms),
            };
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
            let input = match message {
                Message::Data(frame) => Input::DataArrival(frame),
                Message::Ack(ack) => Input::AckArrival(ack.seq_num),
            };
            let tx = self.inputs_tx.clone();
            self.tasks.spawn(async move {
                sleep(Duration::from_millis(delay_ms)).await;
                let _ = tx.send(input);
            });
        }
    }

    fn export_report(&self) -> SimulationReport {
        let sender = self.sender.stats();
        SimulationReport {
            config: self.config.clone(),
            outcome: self.outcome,
            summary: RunSummary {
                frames_sent: sender.frames_sent,
                retransmissions: sender.retransmissions,
                duration_ms: self.elapsed_ms,
                delivered: self.receiver.delivered_count(),
                peak_outstanding: self.peak_outstanding,
                sender,
                receiver: self.receiver.stats(),
            },
            delivered: self.delivered.clone(),
            events: self.events.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn clean_channel_completes_without_retransmission() {
        let sim = RealtimeSimulator::new(ArqConfig::ideal(10, 4)).unwrap();
        let report = sim.run().await;

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert!(report.delivered_in_order());
        assert_eq!(report.summary.frames_sent, 10);
        assert_eq!(report.summary.retransmissions, 0);
        assert_eq!(report.summary.sender.acks_received, 10);
        assert!(report.summary.peak_outstanding <= 4);
        assert!((600..1000).contains(&report.summary.duration_ms));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_frame_is_retransmitted_alone() {
        let mut sim = RealtimeSimulator::new(ArqConfig::ideal(10, 4)).unwrap();
        sim.faults_mut().drop_data_once(2);
        let report = sim.run().await;

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert!(report.delivered_in_order());
        assert_eq!(report.summary.frames_sent, 11);
        let resent: Vec<_> = report
            .events
            .iter()
            .filter_map(|e| match e.event {
                ArqEvent::Retransmitted { seq, .. } => Some(seq),
                _ => None,
            })
            .collect();
        assert_eq!(resent, vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn lossy_run_still_delivers_in_order() {
        let config = ArqConfig {
            total_frames: 25,
            loss_probability: 0.3,
            reorder_probability: 0.3,
            seed: 11,
            ..Default::default()
        };
        let mut sim = RealtimeSimulator::new(config).unwrap();
        let mut live = sim.subscribe();
        let report = sim.run().await;

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert!(report.delivered_in_order());
        assert!(report.summary.peak_outstanding <= 4);

        let mut streamed = 0;
        while live.try_recv().is_ok() {
            streamed += 1;
        }
        assert_eq!(streamed, report.events.len());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_signal_stops_a_dead_link() {
        let config = ArqConfig {
            loss_probability: 1.0,
            ..ArqConfig::ideal(5, 2)
        };
        let sim = RealtimeSimulator::new(config).unwrap();
        let signal = sim.abort_signal();
        let run = tokio::spawn(sim.run());

        sleep(Duration::from_millis(5_500)).await;
        signal.abort();
        let report = run.await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Aborted);
        assert!(report.delivered.is_empty());
        assert_eq!(report.events.last().map(|e| &e.event), Some(&ArqEvent::Aborted));
        assert!(report.summary.retransmissions >= 8);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_cap_ends_the_run() {
        let config = ArqConfig {
            loss_probability: 1.0,
            max_retransmissions: Some(2),
            ..ArqConfig::ideal(5, 2)
        };
        let report = RealtimeSimulator::new(config).unwrap().run().await;
        assert!(matches!(
            report.outcome,
            RunOutcome::RetryBudgetExceeded {
                retransmissions: 2,
                ..
            }
        ));
    }
}
