//! Mailbox Entry (§3): the tagged union every Stage Mailbox carries.

// Layer 1: Standard library imports
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use bytes::Bytes;

// Layer 3: Internal module imports
use crate::session::session::{DisconnectReason, Session};
use crate::stage::runtime::StageRuntime;
use crate::util::ids::{AccountId, StageId, TimerId};
use crate::wire::Packet;

/// Why an actor is being removed from its stage (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    Explicit,
    ReconnectTimeout,
    Kicked,
    StageClosed,
}

/// Internal, non-client-originated events a stage reacts to (§3, §4.7).
pub enum SystemPacket {
    /// First entry a newly-created stage ever sees.
    Create { init: Bytes },

    /// An account attached (first time or reconnect). Carries the
    /// original `ConnectWithToken` request so the runtime can address the
    /// `JoinRoomRes` reply directly at `session` once attachment completes
    /// (§4.3 step 5), independent of any later mailbox-entry reply scope.
    Join {
        account_id: AccountId,
        session: Arc<Session>,
        user_info: Bytes,
        request: Packet,
    },

    /// A session carrying this account went away (§4.4, §4.7).
    ActorDisconnect { account_id: AccountId, reason: DisconnectReason },

    /// A duplicate login displaced the account's prior session (§4.4): the
    /// owning stage rebinds its actor's transport without re-running
    /// `OnJoinRoom`, distinct from a fresh `Join` which always carries the
    /// original request it must answer.
    Reconnected { account_id: AccountId, session: Arc<Session> },

    /// Explicit leave, or the reconnect-timeout timer firing (§4.7).
    Leave { account_id: AccountId, reason: LeaveReason },

    /// Cooperative stage teardown (§4.10).
    Close,
}

/// A continuation re-entering the stage worker after `AsyncBlock`'s
/// off-mailbox work completes (§4.11, §9). Closures rather than a data
/// payload because the continuation's job is inherently "run this bit of
/// code under the serialization contract", which varies per call site.
pub type Continuation = Box<dyn FnOnce(Arc<StageRuntime>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// One unit of work for a Stage Mailbox (§3).
pub enum MailboxEntry {
    System(SystemPacket),
    ClientPacket { account_id: AccountId, packet: Packet },
    TimerTick { timer_id: TimerId, missed_ticks: u32 },
    AsyncContinuation(Continuation),
    InterStagePacket { from_stage_id: StageId, packet: Packet },
}

impl MailboxEntry {
    /// `true` for the only entry kind that counts toward the backpressure
    /// high watermark (§5).
    pub const fn counts_toward_watermark(&self) -> bool {
        matches!(self, Self::ClientPacket { .. })
    }
}

impl std::fmt::Debug for MailboxEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System(SystemPacket::Create { .. }) => write!(f, "MailboxEntry::System(Create)"),
            Self::System(SystemPacket::Join { account_id, .. }) => {
                write!(f, "MailboxEntry::System(Join {{ account_id: {account_id} }})")
            }
            Self::System(SystemPacket::ActorDisconnect { account_id, reason }) => write!(
                f,
                "MailboxEntry::System(ActorDisconnect {{ account_id: {account_id}, reason: {reason:?} }})"
            ),
            Self::System(SystemPacket::Reconnected { account_id, .. }) => {
                write!(f, "MailboxEntry::System(Reconnected {{ account_id: {account_id} }})")
            }
            Self::System(SystemPacket::Leave { account_id, reason }) => {
                write!(f, "MailboxEntry::System(Leave {{ account_id: {account_id}, reason: {reason:?} }})")
            }
            Self::System(SystemPacket::Close) => write!(f, "MailboxEntry::System(Close)"),
            Self::ClientPacket { account_id, packet } => {
                write!(f, "MailboxEntry::ClientPacket {{ account_id: {account_id}, msg_id: {:?} }}", packet.msg_id())
            }
            Self::TimerTick { timer_id, missed_ticks } => {
                write!(f, "MailboxEntry::TimerTick {{ timer_id: {timer_id}, missed_ticks: {missed_ticks} }}")
            }
            Self::AsyncContinuation(_) => write!(f, "MailboxEntry::AsyncContinuation"),
            Self::InterStagePacket { from_stage_id, packet } => write!(
                f,
                "MailboxEntry::InterStagePacket {{ from_stage_id: {from_stage_id}, msg_id: {:?} }}",
                packet.msg_id()
            ),
        }
    }
}
