//! Timer subsystem (§4.8): timers are external objects that deliver into
//! stage mailboxes, keeping timer-driven work inside the stage's
//! serialization contract.

pub mod error;
pub mod manager;
pub mod record;

pub use error::TimerError;
pub use manager::{TimerManager, TimerSink};
pub use record::{TimerKind, TimerRecord};
