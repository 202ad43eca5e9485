use arq_lab_abstract::{ArqConfig, Direction, Message, SeqNum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Deterministic faults applied to the first matching transmission only.
///
/// These bypass the random draws entirely, so a scenario can force one loss
/// or one reordering without disturbing the rest of the RNG stream.
#[derive(Debug, Default, Clone)]
pub struct FaultPlan {
    drop_once: Vec<(Direction, SeqNum)>,
    delay_once: Vec<(Direction, SeqNum, u64)>,
}

impl FaultPlan {
    pub fn drop_data_once(&mut self, seq: SeqNum) {
        self.drop_once.push((Direction::Data, seq));
    }

    pub fn drop_ack_once(&mut self, seq: SeqNum) {
        self.drop_once.push((Direction::Ack, seq));
    }

    pub fn delay_data_once(&mut self, seq: SeqNum, extra_ms: u64) {
        self.delay_once.push((Direction::Data, seq, extra_ms));
    }

    pub fn delay_ack_once(&mut self, seq: SeqNum, extra_ms: u64) {
        self.delay_once.push((Direction::Ack, seq, extra_ms));
    }

    pub fn is_empty(&self) -> bool {
        self.drop_once.is_empty() && self.delay_once.is_empty()
    }

    fn take_drop(&mut self, direction: Direction, seq: SeqNum) -> bool {
        match self
            .drop_once
            .iter()
            .position(|&(d, s)| d == direction && s == seq)
        {
            Some(pos) => {
                self.drop_once.remove(pos);
                true
            }
            None => false,
        }
    }

    fn take_delay(&mut self, direction: Direction, seq: SeqNum) -> Option<u64> {
        let pos = self
            .delay_once
            .iter()
            .position(|&(d, s, _)| d == direction && s == seq)?;
        Some(self.delay_once.remove(pos).2)
    }
}

/// What the channel decided to do with one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transit {
    Lost {
        /// True when a [`FaultPlan`] entry caused the loss.
        forced: bool,
    },
    Deliver {
        /// Total one-way delay, including `extra_delay_ms`.
        delay_ms: u64,
        /// Additional hold-back applied for reordering, zero if none.
        extra_delay_ms: u64,
    },
}

impl Transit {
    pub fn is_lost(&self) -> bool {
        matches!(self, Transit::Lost { .. })
    }

    pub fn is_reordered(&self) -> bool {
        matches!(self, Transit::Deliver { extra_delay_ms, .. } if *extra_delay_ms > 0)
    }
}

/// Simulated lossy, delaying, reordering link shared by both directions.
///
/// All randomness comes from one generator seeded from the config, so two
/// channels built from the same config make the same decisions for the same
/// sequence of messages.
pub struct Channel {
    rng: StdRng,
    loss_probability: f64,
    reorder_probability: f64,
    delay_range: (u64, u64),
    reorder_delay_range: (u64, u64),
    faults: FaultPlan,
}

impl Channel {
    pub fn new(config: &ArqConfig) -> Self {
        Self::with_faults(config, FaultPlan::default())
    }

    pub fn with_faults(config: &ArqConfig, faults: FaultPlan) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            loss_probability: config.loss_probability,
            reorder_probability: config.reorder_probability,
            delay_range: (config.delay_min_ms, config.delay_max_ms),
            reorder_delay_range: (config.reorder_delay_min_ms, config.reorder_delay_max_ms),
            faults,
        }
    }

    pub fn faults_mut(&mut self) -> &mut FaultPlan {
        &mut self.faults
    }

    /// Decide the fate of one message.
    ///
    /// Every non-forced message consumes the same number of draws for the
    /// same outcome, which keeps runs reproducible from the seed.
    pub fn transmit(&mut self, message: &Message) -> Transit {
        let direction = message.direction();
        let seq = message.seq_num();

        if self.faults.take_drop(direction, seq) {
            debug!(?direction, seq, "deterministic drop");
            return Transit::Lost { forced: true };
        }

        // 1. Loss
        if self.rng.random::<f64>() < self.loss_probability {
            debug!(?direction, seq, "message lost in channel");
            return Transit::Lost { forced: false };
        }

        // 2. Propagation delay
        let (min, max) = self.delay_range;
        let mut delay_ms = self.rng.random_range(min..=max);

        // 3. Reordering
        let extra_delay_ms = if let Some(extra) = self.faults.take_delay(direction, seq) {
            extra
        } else if self.rng.random::<f64>() < self.reorder_probability {
            let (min, max) = self.reorder_delay_range;
            self.rng.random_range(min..=max)
        } else {
            0
        };
        delay_ms += extra_delay_ms;

        Transit::Deliver {
            delay_ms,
            extra_delay_ms,
        }
    }
}
