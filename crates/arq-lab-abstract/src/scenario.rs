use crate::config::ArqConfigOverride;
use crate::frame::SeqNum;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub config: ArqConfigOverride,
    #[serde(default)]
    pub actions: Vec<TestAction>,
    #[serde(default)]
    pub assertions: Vec<TestAssertion>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAction {
    /// Deterministically drop the first data transmission of frame `seq`
    DropData { seq: SeqNum },
    /// Deterministically drop the first ACK emitted for frame `seq`
    DropAck { seq: SeqNum },
    /// Hold back the first data transmission of frame `seq` by `extra_ms`
    ReorderData { seq: SeqNum, extra_ms: u64 },
    /// Hold back the first ACK emitted for frame `seq` by `extra_ms`
    ReorderAck { seq: SeqNum, extra_ms: u64 },
    /// Cancel the whole run once simulated time passes `time`
    AbortAt { time: u64 },
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAssertion {
    /// Every generated frame was delivered exactly once, in sequence order
    DeliveredInOrder,
    /// Total data transmissions (first sends and retransmissions) within range
    SenderFrameCount { min: u32, max: Option<u32> },
    /// Total retransmissions within range
    Retransmissions { min: u32, max: Option<u32> },
    /// The set of frames that were ever retransmitted is exactly `seqs`
    RetransmittedFrames { seqs: Vec<SeqNum> },
    /// Number of distinct ACKs consumed by the sender
    AcksReceived { count: u32 },
    /// Outstanding frames never exceeded the window size
    WindowRespected,
    /// The run finished with every frame acknowledged
    Completed,
    /// The run stopped because a frame ran out of retransmissions
    RetryBudgetExceeded { seq: Option<SeqNum> },
    /// Simulation finishes within time
    MaxDuration { ms: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_actions_and_assertions() {
        let scenario: TestScenario = toml::from_str(
            r#"
            name = "single loss"
            description = "frame 2 lost once"

            [config]
            total_frames = 10
            loss_probability = 0.0

            [[actions]]
            type = "drop_data"
            seq = 2

            [[actions]]
            type = "reorder_ack"
            seq = 4
            extra_ms = 50

            [[assertions]]
            type = "delivered_in_order"

            [[assertions]]
            type = "sender_frame_count"
            min = 11
            max = 11

            [[assertions]]
            type = "retry_budget_exceeded"
            "#,
        )
        .unwrap();

        assert_eq!(scenario.config.total_frames, Some(10));
        assert_eq!(scenario.config.window_size, None);
        assert_eq!(
            scenario.actions,
            vec![
                TestAction::DropData { seq: 2 },
                TestAction::ReorderAck { seq: 4, extra_ms: 50 },
            ]
        );
        assert_eq!(scenario.assertions[0], TestAssertion::DeliveredInOrder);
        assert_eq!(
            scenario.assertions[1],
            TestAssertion::SenderFrameCount {
                min: 11,
                max: Some(11)
            }
        );
        assert_eq!(
            scenario.assertions[2],
            TestAssertion::RetryBudgetExceeded { seq: None }
        );
    }
}
