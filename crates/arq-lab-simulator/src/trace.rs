use arq_lab_abstract::{ArqConfig, SeqNum, TimedEvent};
use bytes::Bytes;
use serde::Serialize;

use crate::receiver::ReceiverStats;
use crate::sender::SenderStats;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Running,
    /// Every frame acknowledged and delivered exactly once, in order.
    Completed,
    /// A frame exhausted its retransmission budget; delivery is incomplete.
    RetryBudgetExceeded { seq: SeqNum, retransmissions: u32 },
    Aborted,
}

impl RunOutcome {
    pub fn is_finished(&self) -> bool {
        !matches!(self, RunOutcome::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub seq: SeqNum,
    pub time_ms: u64,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub frames_sent: u32,
    pub retransmissions: u32,
    pub duration_ms: u64,
    pub delivered: u32,
    /// Largest number of simultaneously outstanding frames seen.
    pub peak_outstanding: usize,
    pub sender: SenderStats,
    pub receiver: ReceiverStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub config: ArqConfig,
    pub outcome: RunOutcome,
    pub summary: RunSummary,
    pub delivered: Vec<Delivery>,
    pub events: Vec<TimedEvent>,
}

impl SimulationReport {
    pub fn delivered_seqs(&self) -> Vec<SeqNum> {
        self.delivered.iter().map(|d| d.seq).collect()
    }

    /// Delivered exactly `0..total_frames`, each once, in order.
    pub fn delivered_in_order(&self) -> bool {
        self.delivered.len() == self.config.total_frames as usize
            && self
                .delivered
                .iter()
                .enumerate()
                .all(|(i, d)| d.seq as usize == i)
    }
}
