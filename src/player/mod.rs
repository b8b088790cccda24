//! Player seats inside a stage: the `ActorRecord` + the per-stage
//! `ActorRegistry` that enforces the busy-flag FIFO (§3, §4.6).

pub mod record;
pub mod registry;
pub mod traits;

pub use record::ActorRecord;
pub use registry::ActorRegistry;
pub use traits::{ActorContext, UserActor};
