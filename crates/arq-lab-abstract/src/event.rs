use std::fmt;

use serde::Serialize;

use crate::frame::{Direction, SeqNum};

/// Observable protocol and channel events.
///
/// The core only produces these; printing them is left to whoever consumes
/// the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArqEvent {
    FrameSent { seq: SeqNum },
    FrameLost { seq: SeqNum },
    AckLost { seq: SeqNum },
    /// The channel held a message back long enough to let later ones overtake it.
    Reordered {
        seq: SeqNum,
        direction: Direction,
        extra_delay_ms: u64,
    },
    FrameReceived { seq: SeqNum },
    DuplicateFrame { seq: SeqNum },
    OutOfWindow { seq: SeqNum, base: SeqNum },
    AckSent { seq: SeqNum },
    AckReceived { seq: SeqNum, arrival_order: u64 },
    DuplicateAck { seq: SeqNum },
    TimedOut { seq: SeqNum },
    Retransmitted { seq: SeqNum, attempt: u32 },
    WindowSlid { from: SeqNum, to: SeqNum },
    Delivered { seq: SeqNum },
    RetryBudgetExceeded { seq: SeqNum, retransmissions: u32 },
    Aborted,
}

impl fmt::Display for ArqEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArqEvent::FrameSent { seq } => write!(f, "[SEND] frame {seq}"),
            ArqEvent::FrameLost { seq } => write!(f, "[LOSS] frame {seq} lost in transit"),
            ArqEvent::AckLost { seq } => write!(f, "[LOSS] ACK {seq} lost in transit"),
            ArqEvent::Reordered {
                seq,
                direction,
                extra_delay_ms,
            } => write!(
                f,
                "[REORDER] {direction:?} {seq} held back {extra_delay_ms}ms"
            ),
            ArqEvent::FrameReceived { seq } => write!(f, "[RECV] frame {seq}"),
            ArqEvent::DuplicateFrame { seq } => write!(f, "[RECV] duplicate frame {seq}"),
            ArqEvent::OutOfWindow { seq, base } => {
                write!(f, "[RECV] frame {seq} outside window (base {base}), dropped")
            }
            ArqEvent::AckSent { seq } => write!(f, "[ACK SENT] {seq}"),
            ArqEvent::AckReceived { seq, .. } => write!(f, "[ACK RECEIVED] frame {seq}"),
            ArqEvent::DuplicateAck { seq } => write!(f, "[ACK RECEIVED] duplicate {seq}"),
            ArqEvent::TimedOut { seq } => write!(f, "[TIMEOUT] frame {seq}"),
            ArqEvent::Retransmitted { seq, attempt } => {
                write!(f, "[RETRANSMIT] frame {seq} (attempt {attempt})")
            }
            ArqEvent::WindowSlid { from, to } => write!(f, "[SLIDE] base {from} -> {to}"),
            ArqEvent::Delivered { seq } => write!(f, "[DELIVER] frame {seq}"),
            ArqEvent::RetryBudgetExceeded {
                seq,
                retransmissions,
            } => write!(
                f,
                "[FAIL] frame {seq} gave up after {retransmissions} retransmissions"
            ),
            ArqEvent::Aborted => write!(f, "[ABORT] run cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimedEvent {
    pub time_ms: u64,
    #[serde(flatten)]
    pub event: ArqEvent,
}
