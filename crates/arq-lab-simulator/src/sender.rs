//! Sender side of Selective Repeat.
//!
//! The window holds at most `window_size` slots, all with sequence numbers in
//! `[base, base + window_size)`. Acknowledged slots stay in place until every
//! frame below them is acknowledged too; only then does `base` move past them.

use std::collections::{BTreeMap, VecDeque};

use arq_lab_abstract::{
    ArqConfig, ArqError, ArqEvent, Frame, FrameState, Message, SeqNum, SystemContext,
};
use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone)]
struct Slot {
    frame: Frame,
    state: FrameState,
    retransmissions: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SenderStats {
    /// Every data transmission, first sends and retransmissions alike.
    pub frames_sent: u32,
    pub retransmissions: u32,
    /// Distinct ACKs that acknowledged an outstanding frame.
    pub acks_received: u32,
    pub duplicate_acks: u32,
    /// Timer expiries that found their frame already acknowledged.
    pub stale_timeouts: u32,
}

#[derive(Debug)]
pub struct SenderWindow {
    window_size: u32,
    timeout_ms: u64,
    max_retransmissions: Option<u32>,
    base: SeqNum,
    next_seq: SeqNum,
    unsent: VecDeque<Frame>,
    outstanding: BTreeMap<SeqNum, Slot>,
    ack_arrivals: u64,
    stats: SenderStats,
}

impl SenderWindow {
    pub fn new(config: &ArqConfig) -> Self {
        Self {
            window_size: config.window_size,
            timeout_ms: config.timeout_ms,
            max_retransmissions: config.max_retransmissions,
            base: 0,
            next_seq: 0,
            unsent: VecDeque::new(),
            outstanding: BTreeMap::new(),
            ack_arrivals: 0,
            stats: SenderStats::default(),
        }
    }

    /// Queue a payload for transmission and return the sequence number it
    /// was assigned.
    pub fn enqueue(&mut self, payload: impl Into<Bytes>) -> SeqNum {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.unsent.push_back(Frame::new(seq, payload));
        seq
    }

    pub fn base(&self) -> SeqNum {
        self.base
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    pub fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    /// First sequence number past the window.
    fn window_end(&self) -> SeqNum {
        self.base.saturating_add(self.window_size)
    }

    pub fn has_capacity(&self) -> bool {
        self.unsent
            .front()
            .is_some_and(|frame| frame.seq_num < self.window_end())
    }

    pub fn state_of(&self, seq: SeqNum) -> Option<FrameState> {
        if let Some(slot) = self.outstanding.get(&seq) {
            Some(slot.state)
        } else if seq < self.base {
            Some(FrameState::Acked)
        } else if seq < self.next_seq {
            Some(FrameState::Unsent)
        } else {
            None
        }
    }

    /// All frames handed over so far are acknowledged.
    pub fn is_done(&self) -> bool {
        self.unsent.is_empty() && self.outstanding.is_empty()
    }

    /// Transmit the next unsent frame if the window has room for it.
    /// Returns false when the window is full or nothing is left to send.
    pub fn send_next(&mut self, ctx: &mut dyn SystemContext) -> bool {
        if !self.has_capacity() {
            return false;
        }
        let Some(frame) = self.unsent.pop_front() else {
            return false;
        };
        let seq = frame.seq_num;

        ctx.emit(ArqEvent::FrameSent { seq });
        ctx.transmit(Message::Data(frame.clone()));
        ctx.arm_timer(seq, self.timeout_ms);
        self.stats.frames_sent += 1;
        self.outstanding.insert(
            seq,
            Slot {
                frame,
                state: FrameState::InFlight,
                retransmissions: 0,
            },
        );
        debug_assert!(self.outstanding.len() <= self.window_size as usize);
        true
    }

    /// Consume a selective ACK. Duplicate, retired and unknown sequence
    /// numbers are ignored.
    pub fn on_ack(&mut self, ctx: &mut dyn SystemContext, seq: SeqNum) {
        let Some(slot) = self
            .outstanding
            .get_mut(&seq)
            .filter(|slot| slot.state.awaiting_ack())
        else {
            debug!(seq, base = self.base, "ignoring duplicate ACK");
            self.stats.duplicate_acks += 1;
            ctx.emit(ArqEvent::DuplicateAck { seq });
            return;
        };

        ctx.cancel_timer(seq);
        slot.state = FrameState::Acked;
        self.stats.acks_received += 1;
        self.ack_arrivals += 1;
        ctx.emit(ArqEvent::AckReceived {
            seq,
            arrival_order: self.ack_arrivals,
        });

        let from = self.base;
        while self
            .outstanding
            .first_key_value()
            .is_some_and(|(&s, slot)| s == self.base && slot.state == FrameState::Acked)
        {
            self.outstanding.pop_first();
            self.base += 1;
        }
        if self.base != from {
            ctx.emit(ArqEvent::WindowSlid {
                from,
                to: self.base,
            });
        }
    }

    /// Retransmit `seq` if it is still waiting for its ACK.
    ///
    /// An expiry that lost the race against the frame's ACK is a no-op. Fails
    /// once a frame that already used up its retransmission budget times out
    /// again.
    pub fn on_timeout(&mut self, ctx: &mut dyn SystemContext, seq: SeqNum) -> Result<(), ArqError> {
        let Some(slot) = self
            .outstanding
            .get_mut(&seq)
            .filter(|slot| slot.state.awaiting_ack())
        else {
            debug!(seq, "timer expired for an acknowledged frame, ignoring");
            self.stats.stale_timeouts += 1;
            return Ok(());
        };

        ctx.emit(ArqEvent::TimedOut { seq });
        if self
            .max_retransmissions
            .is_some_and(|max| slot.retransmissions >= max)
        {
            ctx.emit(ArqEvent::RetryBudgetExceeded {
                seq,
                retransmissions: slot.retransmissions,
            });
            return Err(ArqError::RetransmissionLimit {
                seq,
                retransmissions: slot.retransmissions,
            });
        }

        slot.retransmissions += 1;
        slot.state = FrameState::Retransmitted;
        ctx.emit(ArqEvent::Retransmitted {
            seq,
            attempt: slot.retransmissions + 1,
        });
        ctx.transmit(Message::Data(slot.frame.clone()));
        ctx.arm_timer(seq, self.timeout_ms);
        self.stats.frames_sent += 1;
        self.stats.retransmissions += 1;
        Ok(())
    }
}
