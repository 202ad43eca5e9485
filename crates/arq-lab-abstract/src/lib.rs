pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod interface;
pub mod scenario;

pub use interface::SystemContext;
pub use frame::{Ack, Direction, Frame, FrameState, Message, SeqNum};

pub use config::{ArqConfig, ArqConfigOverride};
pub use error::ArqError;
pub use event::{ArqEvent, TimedEvent};
pub use scenario::{TestAction, TestAssertion, TestScenario};
