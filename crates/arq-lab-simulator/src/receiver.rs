use std::collections::BTreeMap;

use arq_lab_abstract::{ArqConfig, ArqEvent, Frame, Message, SeqNum, SystemContext};
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverStats {
    pub frames_received: u32,
    pub duplicate_frames: u32,
    pub out_of_window: u32,
    pub acks_sent: u32,
    pub delivered: u32,
}

/// Receive window: buffers arrivals in `[base, base + window_size)` and
/// releases them to the application strictly in sequence order.
#[derive(Debug)]
pub struct ReceiverBuffer {
    window_size: u32,
    base: SeqNum,
    buffered: BTreeMap<SeqNum, Bytes>,
    stats: ReceiverStats,
}

impl ReceiverBuffer {
    pub fn new(config: &ArqConfig) -> Self {
        Self {
            window_size: config.window_size,
            base: 0,
            buffered: BTreeMap::new(),
            stats: ReceiverStats::default(),
        }
    }

    pub fn base(&self) -> SeqNum {
        self.base
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    /// Number of frames handed to the application so far.
    pub fn delivered_count(&self) -> u32 {
        self.stats.delivered
    }

    pub fn is_buffered(&self, seq: SeqNum) -> bool {
        self.buffered.contains_key(&seq)
    }

    fn send_ack(&mut self, ctx: &mut dyn SystemContext, seq: SeqNum) {
        ctx.emit(ArqEvent::AckSent { seq });
        ctx.transmit(Message::ack(seq));
        self.stats.acks_sent += 1;
    }

    pub fn on_frame_arrival(&mut self, ctx: &mut dyn SystemContext, frame: Frame) {
        let seq = frame.seq_num;
        let window_end = self.base.saturating_add(self.window_size);

        if seq < self.base {
            // Already delivered; the sender evidently missed our ACK.
            debug!(seq, base = self.base, "duplicate of delivered frame, re-ACKing");
            self.stats.duplicate_frames += 1;
            ctx.emit(ArqEvent::DuplicateFrame { seq });
            self.send_ack(ctx, seq);
            return;
        }
        if seq >= window_end {
            warn!(seq, base = self.base, "frame beyond receive window dropped");
            self.stats.out_of_window += 1;
            ctx.emit(ArqEvent::OutOfWindow {
                seq,
                base: self.base,
            });
            return;
        }

        if self.buffered.contains_key(&seq) {
            self.stats.duplicate_frames += 1;
            ctx.emit(ArqEvent::DuplicateFrame { seq });
        } else {
            self.stats.frames_received += 1;
            ctx.emit(ArqEvent::FrameReceived { seq });
            self.buffered.insert(seq, frame.payload);
        }
        self.send_ack(ctx, seq);

        while let Some(payload) = self.buffered.remove(&self.base) {
            ctx.deliver(self.base, payload);
            self.stats.delivered += 1;
            self.base += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::record;

    fn receiver() -> ReceiverBuffer {
        ReceiverBuffer::new(&ArqConfig {
            window_size: 4,
            ..Default::default()
        })
    }

    fn frame(seq: SeqNum) -> Frame {
        Frame::new(seq, format!("Data{seq}"))
    }

    #[test]
    fn in_order_arrival_delivers_immediately() {
        let mut rx = receiver();
        let (buffer, _) = record(0, |ctx| rx.on_frame_arrival(ctx, frame(0)));
        assert_eq!(buffer.outgoing, vec![Message::ack(0)]);
        assert_eq!(buffer.delivered, vec![(0, Bytes::from("Data0"))]);
        assert_eq!(rx.base(), 1);
    }

    #[test]
    fn gap_is_buffered_then_released_in_order() {
        let mut rx = receiver();
        let (buffer, _) = record(0, |ctx| {
            rx.on_frame_arrival(ctx, frame(0));
            rx.on_frame_arrival(ctx, frame(2));
            rx.on_frame_arrival(ctx, frame(3));
        });
        assert_eq!(buffer.delivered.len(), 1);
        assert!(rx.is_buffered(2) && rx.is_buffered(3));
        assert_eq!(
            buffer.outgoing,
            vec![Message::ack(0), Message::ack(2), Message::ack(3)]
        );

        let (buffer, _) = record(0, |ctx| rx.on_frame_arrival(ctx, frame(1)));
        let seqs: Vec<_> = buffer.delivered.iter().map(|(seq, _)| *seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(rx.base(), 4);
        assert!(!rx.is_buffered(2));
    }

    #[test]
    fn below_window_duplicate_is_acked_not_redelivered() {
        let mut rx = receiver();
        record(0, |ctx| rx.on_frame_arrival(ctx, frame(0)));
        let (buffer, _) = record(0, |ctx| rx.on_frame_arrival(ctx, frame(0)));
        assert_eq!(buffer.outgoing, vec![Message::ack(0)]);
        assert!(buffer.delivered.is_empty());
        assert_eq!(buffer.events[0], ArqEvent::DuplicateFrame { seq: 0 });
        assert_eq!(rx.stats().duplicate_frames, 1);
    }

    #[test]
    fn in_window_duplicate_is_idempotent() {
        let mut rx = receiver();
        let (buffer, _) = record(0, |ctx| {
            rx.on_frame_arrival(ctx, frame(2));
            rx.on_frame_arrival(ctx, frame(2));
        });
        assert_eq!(buffer.outgoing, vec![Message::ack(2), Message::ack(2)]);
        assert_eq!(rx.stats().frames_received, 1);
        assert_eq!(rx.stats().duplicate_frames, 1);
    }

    #[test]
    fn beyond_window_is_dropped_without_ack() {
        let mut rx = receiver();
        let (buffer, _) = record(0, |ctx| rx.on_frame_arrival(ctx, frame(4)));
        assert!(buffer.outgoing.is_empty());
        assert!(buffer.delivered.is_empty());
        assert_eq!(buffer.events, vec![ArqEvent::OutOfWindow { seq: 4, base: 0 }]);
        assert!(!rx.is_buffered(4));
    }
}
