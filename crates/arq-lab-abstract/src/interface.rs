use bytes::Bytes;

use crate::event::ArqEvent;
use crate::frame::{Message, SeqNum};

/// The capabilities a driver gives to the sender and receiver windows.
///
/// Calls are buffered by the driver and applied after the window method
/// returns, so a window never observes the side effects of its own call.
pub trait SystemContext {
    /// Hand a message to the unreliable channel.
    fn transmit(&mut self, message: Message);

    /// Start the retransmission timer for `seq`. Replaces any timer already
    /// armed for the same sequence number.
    fn arm_timer(&mut self, seq: SeqNum, delay_ms: u64);

    /// Disarm the timer for `seq` if it has not fired yet.
    fn cancel_timer(&mut self, seq: SeqNum);

    /// Hand an in-order payload to the application.
    fn deliver(&mut self, seq: SeqNum, payload: Bytes);

    fn emit(&mut self, event: ArqEvent);

    /// Current simulated time in ms.
    fn now(&self) -> u64;
}
