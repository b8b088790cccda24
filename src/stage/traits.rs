//! `UserStage` and `StageContext` (§3, §4.7): the callback surface a
//! developer implements for one room.

// Layer 1: Standard library imports
use std::sync::{Arc, Weak};

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use bytes::Bytes;

// Layer 3: Internal module imports
use crate::mailbox::stage::StageMailbox;
use crate::player::{ActorContext, ActorRegistry, UserActor};
use crate::sender::{ReplyScope, StageSender};
use crate::session::manager::SessionManager;
use crate::session::session::DisconnectReason;
use crate::stage::entry::{LeaveReason, MailboxEntry};
use crate::stage::runtime::StageRuntime;
use crate::timer::error::TimerError;
use crate::timer::manager::TimerManager;
use crate::util::ids::{AccountId, StageId, TimerId};
use crate::wire::Packet;

/// Any error a `UserStage`/`UserActor` callback returns. Trapped at the
/// runtime boundary (§4.7 "Errors") and never allowed to unwind a mailbox
/// worker.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Read-only context handed to every `UserStage` callback: identity,
/// outbound seams (inter-stage sends, timers), and the collaborators
/// needed to call `stage::broadcast`. Does not carry the `ActorRegistry`
/// directly — callbacks that need it receive it as a separate borrowed
/// parameter from the runtime, since the registry is mutable stage state
/// and `StageContext` itself is cheaply cloned/shared.
#[derive(Clone)]
pub struct StageContext {
    stage_id: StageId,
    stage_type: Arc<str>,
    stage_sender: StageSender,
    timers: Arc<TimerManager>,
    session_manager: Arc<SessionManager>,
    mailbox: Arc<StageMailbox<MailboxEntry>>,
    runtime: Weak<StageRuntime>,
}

impl StageContext {
    pub fn new(
        stage_id: StageId,
        stage_type: Arc<str>,
        stage_sender: StageSender,
        timers: Arc<TimerManager>,
        session_manager: Arc<SessionManager>,
        mailbox: Arc<StageMailbox<MailboxEntry>>,
        runtime: Weak<StageRuntime>,
    ) -> Self {
        Self {
            stage_id,
            stage_type,
            stage_sender,
            timers,
            session_manager,
            mailbox,
            runtime,
        }
    }

    /// Used by `asyncblock::run` to re-post a continuation onto this
    /// stage's own mailbox; not part of the public callback surface.
    pub(crate) fn mailbox_handle(&self) -> Arc<StageMailbox<MailboxEntry>> {
        Arc::clone(&self.mailbox)
    }

    pub(crate) fn runtime_handle(&self) -> Weak<StageRuntime> {
        self.runtime.clone()
    }

    pub const fn stage_id(&self) -> StageId {
        self.stage_id
    }

    pub fn stage_type(&self) -> &str {
        &self.stage_type
    }

    pub fn sender(&self) -> &StageSender {
        &self.stage_sender
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.session_manager
    }

    pub fn add_repeat(&self, initial_delay: std::time::Duration, period: std::time::Duration) -> TimerId {
        self.timers.add_repeat(self.stage_id, initial_delay, period)
    }

    pub fn add_count(
        &self,
        initial_delay: std::time::Duration,
        period: std::time::Duration,
        count: u64,
    ) -> TimerId {
        self.timers.add_count(self.stage_id, initial_delay, period, count)
    }

    pub fn add_once(&self, delay: std::time::Duration) -> TimerId {
        self.timers.add_once(self.stage_id, delay)
    }

    pub fn cancel_timer(&self, timer_id: TimerId) -> Result<(), TimerError> {
        self.timers.cancel(timer_id)
    }

    pub fn has_timer(&self, timer_id: TimerId) -> bool {
        self.timers.has(timer_id)
    }

    /// Fan `packet` out to every connected actor in `registry` for which
    /// `filter` returns `true` (§4.9). `registry` is passed explicitly by
    /// the runtime, which alone holds it for the duration of the current
    /// entry.
    pub fn broadcast(&self, registry: &ActorRegistry, packet: &Packet, filter: impl Fn(crate::util::ids::AccountId) -> bool) -> usize {
        crate::stage::broadcast::broadcast(registry, &self.session_manager, packet, filter)
    }
}

/// The user-implemented handler object for one room (§3 "Stage", §4.7).
///
/// Boxed as a trait object for the same reason as `UserActor`: the Stage
/// Registry's `string -> constructor` table (§4.10, §9) resolves concrete
/// types only at `CreateStage` time.
#[async_trait]
pub trait UserStage: Send + Sync {
    /// First mailbox entry a stage ever processes.
    async fn on_create(&mut self, _ctx: &StageContext, _init: Bytes) -> HandlerResult<()> {
        Ok(())
    }

    /// Second mailbox entry, only reached if `on_create` succeeded.
    async fn on_post_create(&mut self, _ctx: &StageContext) {}

    /// Construct the `UserActor` for an account joining this stage for the
    /// first time (§4.7). The default seats a no-op actor; most stages
    /// override this to hand back their own game-specific actor type.
    fn create_actor(&self, _account_id: AccountId) -> Box<dyn UserActor> {
        Box::new(crate::player::traits::NoopActor)
    }

    /// First-time join only; not called again across reconnects (§4.7).
    async fn on_join_room(
        &mut self,
        _ctx: &StageContext,
        _actor: &ActorContext,
        _user_info: Bytes,
    ) -> HandlerResult<()> {
        Ok(())
    }

    /// Runs once, right after the first-time `on_join_room` succeeds.
    async fn on_post_join_room(&mut self, _ctx: &StageContext, _actor: &ActorContext) {}

    /// Fires on every connect/disconnect transition, including reconnects
    /// (`connected == true`, `reason == None`).
    async fn on_actor_connection_changed(
        &mut self,
        _ctx: &StageContext,
        _actor: &ActorContext,
        _connected: bool,
        _reason: Option<DisconnectReason>,
    ) {
    }

    /// The actor is about to be destroyed (§4.7).
    async fn on_leave_room(&mut self, _ctx: &StageContext, _actor: &ActorContext, _reason: LeaveReason) {}

    /// A client packet addressed to this stage. `reply` is `Some` when
    /// `packet.msg_seq() != 0`; the runtime sends a default empty success
    /// reply if the handler returns without using it. `registry` is this
    /// stage's actor registry, borrowed for exactly this call, so a
    /// handler can pass it straight to `ctx.broadcast` (§4.9: broadcast
    /// "occurs while the current handler holds the stage's serialization
    /// guarantee").
    async fn on_dispatch(
        &mut self,
        _ctx: &StageContext,
        _actor: &ActorContext,
        _reply: Option<&ReplyScope>,
        _packet: &Packet,
        _registry: &ActorRegistry,
    ) -> HandlerResult<()> {
        Ok(())
    }

    /// A packet sent by another stage (§4.9). Default implementation
    /// forwards to `on_dispatch` with no actor context and no reply scope;
    /// a stage that needs to distinguish inter-stage traffic overrides
    /// this instead.
    async fn on_inter_stage(&mut self, _ctx: &StageContext, _from_stage_id: StageId, _packet: &Packet) {}

    /// A timer owned by this stage fired (§4.8). `missed_ticks >= 1`
    /// indicates drift coalescing absorbed one or more periods. `registry`
    /// is handed in for the same reason as in `on_dispatch`: a repeating
    /// timer is the other common source of a stage-wide broadcast (S5/S6).
    async fn on_timer(&mut self, _ctx: &StageContext, _timer_id: TimerId, _missed_ticks: u32, _registry: &ActorRegistry) {}
}
