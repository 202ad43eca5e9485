pub mod channel;
mod context;
pub mod engine;
pub mod realtime;
pub mod receiver;
pub mod scenario_runner;
pub mod sender;
pub mod timer;
pub mod trace;

pub use channel::{Channel, FaultPlan, Transit};
pub use engine::{NodeId, Simulator};
pub use realtime::{AbortSignal, RealtimeSimulator};
pub use receiver::ReceiverBuffer;
pub use sender::SenderWindow;
pub use timer::TimerManager;
pub use trace::{Delivery, RunOutcome, RunSummary, SimulationReport};
