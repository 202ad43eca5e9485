use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Frame sequence number. Assigned once and never reused within a run.
pub type SeqNum = u32;

/// Sender-side delivery state of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameState {
    Unsent,
    InFlight,
    Acked,
    /// Resent at least once after a timeout and still waiting for its ACK.
    Retransmitted,
}

impl FrameState {
    /// True while the frame has been sent but not acknowledged.
    pub fn awaiting_ack(self) -> bool {
        matches!(self, FrameState::InFlight | FrameState::Retransmitted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub seq_num: SeqNum,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(seq_num: SeqNum, payload: impl Into<Bytes>) -> Self {
        Self {
            seq_num,
            payload: payload.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Selective acknowledgment: covers exactly one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub seq_num: SeqNum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Sender to receiver.
    Data,
    /// Receiver to sender.
    Ack,
}

/// Anything the channel carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Data(Frame),
    Ack(Ack),
}

impl Message {
    pub fn ack(seq_num: SeqNum) -> Self {
        Message::Ack(Ack { seq_num })
    }

    pub fn direction(&self) -> Direction {
        match self {
            Message::Data(_) => Direction::Data,
            Message::Ack(_) => Direction::Ack,
        }
    }

    pub fn seq_num(&self) -> SeqNum {
        match self {
            Message::Data(frame) => frame.seq_num,
            Message::Ack(ack) => ack.seq_num,
        }
    }
}
