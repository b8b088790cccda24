//! Stage/room machinery (§3, §4.5-§4.11): the mailbox entry contract, the
//! lifecycle state machine, the user-facing callback surface, the
//! broadcast engine, and the runtime that ties them together.

pub mod broadcast;
pub mod entry;
pub mod runtime;
pub mod state;
pub mod traits;

pub use entry::{Continuation, LeaveReason, MailboxEntry, SystemPacket};
pub use runtime::{StageLookupForRuntime, StageRuntime, DEFAULT_RECONNECT_GRACE};
pub use state::StageLifecycleState;
pub use traits::{HandlerError, HandlerResult, StageContext, UserStage};
