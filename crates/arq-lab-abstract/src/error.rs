use thiserror::Error;

use crate::frame::SeqNum;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArqError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("frame {seq} exceeded its retransmission budget ({retransmissions} retransmissions)")]
    RetransmissionLimit { seq: SeqNum, retransmissions: u32 },

    #[error("run aborted")]
    Aborted,
}
