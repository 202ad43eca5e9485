use arq_lab_abstract::{ArqEvent, Message, SeqNum, SystemContext};
use bytes::Bytes;

/// Actions buffered during a single window call
#[derive(Default, Debug)]
pub(crate) struct ActionBuffer {
    pub outgoing: Vec<Message>,
    pub timers_start: Vec<(u64, SeqNum)>, // (delay, seq)
    pub timers_cancel: Vec<SeqNum>,
    pub delivered: Vec<(SeqNum, Bytes)>,
    pub events: Vec<ArqEvent>,
}

/// Context handed to the windows; records actions for the driver to apply.
pub(crate) struct ScopedContext<'a> {
    pub buffer: &'a mut ActionBuffer,
    pub now: u64,
}

impl<'a> SystemContext for ScopedContext<'a> {
    fn transmit(&mut self, message: Message) {
        self.buffer.outgoing.push(message);
    }

    fn arm_timer(&mut self, seq: SeqNum, delay_ms: u64) {
        self.buffer.timers_start.push((delay_ms, seq));
    }

    fn cancel_timer(&mut self, seq: SeqNum) {
        self.buffer.timers_cancel.push(seq);
    }

    fn deliver(&mut self, seq: SeqNum, payload: Bytes) {
        self.buffer.delivered.push((seq, payload));
    }

    fn emit(&mut self, event: ArqEvent) {
        self.buffer.events.push(event);
    }

    fn now(&self) -> u64 {
        self.now
    }
}

/// Run `f` against a fresh buffer and return what it recorded alongside its result.
pub(crate) fn record<R>(
    now: u64,
    f: impl FnOnce(&mut dyn SystemContext) -> R,
) -> (ActionBuffer, R) {
    let mut buffer = ActionBuffer::default();
    let result = {
        let mut ctx = ScopedContext {
            buffer: &mut buffer,
            now,
        };
        f(&mut ctx as &mut dyn SystemContext)
    };
    (buffer, result)
}
