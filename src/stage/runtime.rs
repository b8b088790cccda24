//! `StageRuntime` (§3, §4.5, §4.7): the mailbox processor that turns one
//! `MailboxEntry` at a time into `UserStage`/`UserActor` callbacks, under
//! the stage's serialization contract.
//!
//! `StageShared` is locked with a `tokio::sync::Mutex` for the full
//! duration of processing one entry, including across any `.await` a
//! handler performs — safe because the mailbox guarantees only one entry
//! is ever in flight per stage, so the lock is never actually contended;
//! it exists to let `run_continuation` (called from a different spawned
//! task than the one that dequeued the entry) borrow the same state.

// Layer 1: Standard library imports
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{error, info, warn};

// Layer 3: Internal module imports
use crate::error::ErrorCode;
use crate::mailbox::stage::{EntryProcessor, StageMailbox};
use crate::player::{ActorContext, ActorRecord, ActorRegistry};
use crate::sender::{ActorSender, ReplyScope, StageSender};
use crate::session::manager::SessionManager;
use crate::session::session::Session;
use crate::stage::entry::{LeaveReason, MailboxEntry, SystemPacket};
use crate::stage::state::StageLifecycleState;
use crate::stage::traits::{StageContext, UserStage};
use crate::timer::manager::{TimerManager, TimerSink};
use crate::util::ids::{AccountId, StageId, TimerId};
use crate::wire::Packet;

/// How long an actor's seat survives a disconnect before the stage tears
/// it down (§4.7 "reconnect grace period", default 30s).
pub const DEFAULT_RECONNECT_GRACE: Duration = Duration::from_secs(30);

type ProcessFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Mutable stage state, touched only while `shared` is held.
struct StageShared {
    state: StageLifecycleState,
    user_stage: Box<dyn UserStage>,
    actor_registry: ActorRegistry,
}

/// One room: owns the mailbox worker's dispatch logic for a single
/// `UserStage` instance.
pub struct StageRuntime {
    stage_id: StageId,
    mailbox: Arc<StageMailbox<MailboxEntry>>,
    shared: tokio::sync::Mutex<StageShared>,
    timers: Arc<TimerManager>,
    session_manager: Arc<SessionManager>,
    reconnect_grace: Duration,
    ctx: StageContext,
}

impl StageRuntime {
    /// Build a new, `Created`-state stage. Does not post the initial
    /// `Create` entry or register with the timer manager; the caller
    /// (`registry::factory::StageRegistry`) does both once construction
    /// returns, after it has a `StageId` -> `Arc<StageRuntime>` entry it
    /// can hand to `TimerManager::register_stage`.
    pub fn new(
        stage_id: StageId,
        stage_type: Arc<str>,
        user_stage: Box<dyn UserStage>,
        high_watermark: usize,
        stage_lookup: Arc<dyn StageLookupForRuntime>,
        timers: Arc<TimerManager>,
        session_manager: Arc<SessionManager>,
    ) -> Arc<Self> {
        Self::with_config(
            stage_id,
            stage_type,
            user_stage,
            high_watermark,
            crate::mailbox::stage::DEFAULT_DRAIN_LIMIT,
            DEFAULT_RECONNECT_GRACE,
            stage_lookup,
            timers,
            session_manager,
        )
    }

    /// As [`Self::new`], but with an explicit mailbox drain limit and
    /// reconnect grace period rather than the defaults (surfaced as
    /// `StageConfig::drain_limit`/`StageConfig::reconnect_grace`).
    #[allow(clippy::too_many_arguments)]
    pub fn with_config(
        stage_id: StageId,
        stage_type: Arc<str>,
        user_stage: Box<dyn UserStage>,
        high_watermark: usize,
        drain_limit: usize,
        reconnect_grace: Duration,
        stage_lookup: Arc<dyn StageLookupForRuntime>,
        timers: Arc<TimerManager>,
        session_manager: Arc<SessionManager>,
    ) -> Arc<Self> {
        let mailbox = StageMailbox::with_drain_limit(stage_id, high_watermark, drain_limit);
        Arc::new_cyclic(|weak: &Weak<StageRuntime>| {
            let stage_sender = StageSender::new(stage_id, stage_lookup.into_stage_lookup());
            let ctx = StageContext::new(
                stage_id,
                stage_type,
                stage_sender,
                Arc::clone(&timers),
                Arc::clone(&session_manager),
                Arc::clone(&mailbox),
                weak.clone(),
            );
            Self {
                stage_id,
                mailbox,
                shared: tokio::sync::Mutex::new(StageShared {
                    state: StageLifecycleState::Created,
                    user_stage,
                    actor_registry: ActorRegistry::new(),
                }),
                timers,
                session_manager,
                reconnect_grace,
                ctx,
            }
        })
    }

    pub const fn stage_id(&self) -> StageId {
        self.stage_id
    }

    pub fn context(&self) -> &StageContext {
        &self.ctx
    }

    pub fn mailbox(&self) -> &Arc<StageMailbox<MailboxEntry>> {
        &self.mailbox
    }

    /// Enqueue `entry`, spawning the mailbox worker if it is not already
    /// running. Mirrors `StageMailbox::post`, supplying `self` as the
    /// processor.
    pub fn post(self: &Arc<Self>, entry: MailboxEntry) -> Result<(), MailboxEntry> {
        let counts = entry.counts_toward_watermark();
        self.mailbox.post(entry, Arc::clone(self) as Arc<dyn EntryProcessor<MailboxEntry>>, counts)
    }

    /// Called by a `stage::entry::Continuation` once it has been dequeued
    /// as an `AsyncContinuation` entry: runs `f` against this stage's own
    /// locked state, exactly as any other handler does.
    pub(crate) async fn run_continuation<F>(&self, f: F)
    where
        F: FnOnce(&StageContext, &ActorRegistry) + Send,
    {
        let shared = self.shared.lock().await;
        f(&self.ctx, &shared.actor_registry);
    }

    async fn handle_entry(self: Arc<Self>, entry: MailboxEntry) {
        match entry {
            MailboxEntry::System(SystemPacket::Create { init }) => self.handle_create(init).await,
            MailboxEntry::System(SystemPacket::Join { account_id, session, user_info, request }) => {
                self.handle_join(account_id, session, user_info, request).await
            }
            MailboxEntry::System(SystemPacket::ActorDisconnect { account_id, reason }) => {
                self.handle_actor_disconnect(account_id, reason).await
            }
            MailboxEntry::System(SystemPacket::Reconnected { account_id, session }) => {
                let mut shared = self.shared.lock().await;
                if shared.actor_registry.contains(account_id) {
                    self.join_reconnecting_actor(&mut shared, account_id, &session).await;
                }
            }
            MailboxEntry::System(SystemPacket::Leave { account_id, reason }) => {
                let mut shared = self.shared.lock().await;
                if shared.actor_registry.contains(account_id) {
                    self.do_leave(&mut shared, account_id, reason).await;
                }
            }
            MailboxEntry::System(SystemPacket::Close) => self.handle_close().await,
            MailboxEntry::ClientPacket { account_id, packet } => {
                self.mailbox.backpressure_decrement();
                self.handle_client_packet(account_id, packet).await;
            }
            MailboxEntry::TimerTick { timer_id, missed_ticks } => self.handle_timer_tick(timer_id, missed_ticks).await,
            MailboxEntry::AsyncContinuation(continuation) => {
                continuation(Arc::clone(&self)).await;
            }
            MailboxEntry::InterStagePacket { from_stage_id, packet } => {
                let mut shared = self.shared.lock().await;
                shared.user_stage.on_inter_stage(&self.ctx, from_stage_id, &packet).await;
            }
        }
    }

    async fn handle_create(self: &Arc<Self>, init: Bytes) {
        let mut shared = self.shared.lock().await;
        if shared.state != StageLifecycleState::Created {
            warn!(stage_id = %self.stage_id, "Create entry delivered to a stage that already left the Created state");
            return;
        }
        match shared.user_stage.on_create(&self.ctx, init).await {
            Ok(()) => {
                shared.user_stage.on_post_create(&self.ctx).await;
                shared.state = StageLifecycleState::Active;
                info!(stage_id = %self.stage_id, "stage active");
            }
            Err(err) => {
                error!(stage_id = %self.stage_id, %err, "on_create failed, stage will not become active");
                shared.state = StageLifecycleState::Closed;
                self.mailbox.close();
                self.timers.unregister_stage(self.stage_id);
            }
        }
    }

    async fn handle_join(self: &Arc<Self>, account_id: AccountId, session: Arc<Session>, user_info: Bytes, request: Packet) {
        let mut shared = self.shared.lock().await;
        if !shared.state.accepts_client_traffic() {
            reply_directly(&session, &request, ErrorCode::StageClosed);
            return;
        }

        let is_new = !shared.actor_registry.contains(account_id);
        if is_new {
            self.join_new_actor(&mut shared, account_id, &session, user_info, &request).await;
        } else {
            self.join_reconnecting_actor(&mut shared, account_id, &session).await;
        }

        let reconnected_flag: u8 = if is_new { 0 } else { 1 };
        if let Ok(reply) = Packet::reply_ok(&request, "JoinRoomRes", Bytes::copy_from_slice(&[reconnected_flag])) {
            let _ = session.send_async(reply);
        }
    }

    async fn join_new_actor(
        self: &Arc<Self>,
        shared: &mut tokio::sync::MutexGuard<'_, StageShared>,
        account_id: AccountId,
        session: &Arc<Session>,
        user_info: Bytes,
        request: &Packet,
    ) {
        let mut user_actor = shared.user_stage.create_actor(account_id);
        let actor_ctx = self.actor_context(account_id);
        user_actor.on_create(&actor_ctx).await;

        let mut record = ActorRecord::new(account_id, user_actor);
        record.session_id = Some(session.session_id());
        record.connected = true;
        shared.actor_registry.insert(record);

        if let Err(err) = shared.user_stage.on_join_room(&self.ctx, &actor_ctx, user_info).await {
            warn!(stage_id = %self.stage_id, account_id = %account_id, %err, "on_join_room rejected the join");
            shared.actor_registry.remove(account_id);
            reply_directly(session, request, ErrorCode::InternalError);
            return;
        }

        if let Some(joined) = shared.actor_registry.get_mut(account_id) {
            joined.user_actor.on_authenticate(&actor_ctx, &[]).await;
        }
        shared.user_stage.on_post_join_room(&self.ctx, &actor_ctx).await;
        shared.user_stage.on_actor_connection_changed(&self.ctx, &actor_ctx, true, None).await;
    }

    async fn join_reconnecting_actor(
        self: &Arc<Self>,
        shared: &mut tokio::sync::MutexGuard<'_, StageShared>,
        account_id: AccountId,
        session: &Arc<Session>,
    ) {
        let reconnect_timer = shared.actor_registry.get_mut(account_id).and_then(|record| {
            record.session_id = Some(session.session_id());
            record.connected = true;
            record.reconnect_timer_id.take()
        });
        if let Some(timer_id) = reconnect_timer {
            let _ = self.timers.cancel(timer_id);
        }

        let actor_ctx = self.actor_context(account_id);
        if let Some(record) = shared.actor_registry.get_mut(account_id) {
            record.user_actor.on_authenticate(&actor_ctx, &[]).await;
        }
        shared.user_stage.on_actor_connection_changed(&self.ctx, &actor_ctx, true, None).await;
    }

    async fn handle_actor_disconnect(self: &Arc<Self>, account_id: AccountId, reason: crate::session::session::DisconnectReason) {
        let mut shared = self.shared.lock().await;
        if !shared.actor_registry.contains(account_id) {
            return;
        }
        let timer_id = self.timers.add_once(self.stage_id, self.reconnect_grace);
        if let Some(record) = shared.actor_registry.get_mut(account_id) {
            record.connected = false;
            record.session_id = None;
            record.reconnect_timer_id = Some(timer_id);
        }
        let actor_ctx = self.actor_context(account_id);
        shared
            .user_stage
            .on_actor_connection_changed(&self.ctx, &actor_ctx, false, Some(reason))
            .await;
    }

    async fn handle_timer_tick(self: &Arc<Self>, timer_id: TimerId, missed_ticks: u32) {
        let mut shared = self.shared.lock().await;
        let reconnect_timeout_for = shared
            .actor_registry
            .iter()
            .find(|(_, record)| record.reconnect_timer_id == Some(timer_id))
            .map(|(account_id, _)| *account_id);

        match reconnect_timeout_for {
            Some(account_id) => self.do_leave(&mut shared, account_id, LeaveReason::ReconnectTimeout).await,
            None => {
                let StageShared { user_stage, actor_registry, .. } = &mut *shared;
                user_stage.on_timer(&self.ctx, timer_id, missed_ticks, actor_registry).await;
            }
        }
        // Release the tick only now that it has fully run: while this
        // handler held the mailbox (including any `.await` inside
        // `on_timer`), the Timer Manager withheld further deliveries so a
        // busy stage coalesces drift instead of queuing a tick per period.
        self.timers.ack(timer_id);
    }

    async fn handle_close(self: &Arc<Self>) {
        let mut shared = self.shared.lock().await;
        if shared.state.is_closed() {
            return;
        }
        shared.state = StageLifecycleState::Closing;
        self.mailbox.close();

        let account_ids: Vec<AccountId> = shared.actor_registry.account_ids().collect();
        for account_id in account_ids {
            self.do_leave(&mut shared, account_id, LeaveReason::StageClosed).await;
        }

        self.timers.unregister_stage(self.stage_id);
        shared.state = StageLifecycleState::Closed;
        info!(stage_id = %self.stage_id, "stage closed");
    }

    /// Common teardown for an explicit leave, a reconnect timeout, or a
    /// stage close sweeping every remaining actor.
    async fn do_leave(self: &Arc<Self>, shared: &mut tokio::sync::MutexGuard<'_, StageShared>, account_id: AccountId, reason: LeaveReason) {
        if let Some(record) = shared.actor_registry.get_mut(account_id) {
            if let Some(timer_id) = record.reconnect_timer_id.take() {
                let _ = self.timers.cancel(timer_id);
            }
        }
        let actor_ctx = self.actor_context(account_id);
        shared.user_stage.on_leave_room(&self.ctx, &actor_ctx, reason).await;
        if let Some(mut removed) = shared.actor_registry.remove(account_id) {
            removed.user_actor.on_destroy(&actor_ctx).await;
        }
    }

    async fn handle_client_packet(self: &Arc<Self>, account_id: AccountId, packet: Packet) {
        let mut shared = self.shared.lock().await;
        if !shared.state.accepts_client_traffic() {
            self.reject_client_packet(account_id, &packet, ErrorCode::StageClosed);
            return;
        }
        if !shared.actor_registry.contains(account_id) {
            self.reject_client_packet(account_id, &packet, ErrorCode::ActorNotFound);
            return;
        }
        if shared.actor_registry.is_busy(account_id) {
            shared.actor_registry.defer(account_id, packet);
            return;
        }
        shared.actor_registry.begin_busy(account_id);
        let mut next_packet = Some(packet);
        while let Some(p) = next_packet {
            if self.dispatch_client_packet(&mut shared, account_id, p).await {
                // `on_dispatch` handed this entry off to an Async-Block: the
                // actor's busy-flag stays held (and any packets arriving
                // behind it keep deferring) until `release_deferred_actor`
                // runs once the continuation completes (§4.6, §5).
                return;
            }
            next_packet = shared.actor_registry.finish_busy(account_id);
        }
    }

    /// Called once a deferred Async-Block continuation for `account_id`
    /// finishes (`asyncblock::run`'s `post` has returned). Releases the
    /// busy-flag that entry held across the suspension and, preserving
    /// arrival order, dispatches whatever the actor queued up behind it.
    pub(crate) async fn release_deferred_actor(self: &Arc<Self>, account_id: AccountId) {
        let mut shared = self.shared.lock().await;
        let mut next_packet = shared.actor_registry.finish_busy(account_id);
        while let Some(p) = next_packet {
            if self.dispatch_client_packet(&mut shared, account_id, p).await {
                return;
            }
            next_packet = shared.actor_registry.finish_busy(account_id);
        }
    }

    fn reject_client_packet(&self, account_id: AccountId, packet: &Packet, code: ErrorCode) {
        if packet.is_fire_and_forget() {
            return;
        }
        if let Some(session) = self.session_manager.get_by_account(account_id) {
            reply_directly(&session, packet, code);
        }
    }

    /// Runs `on_dispatch` for one `ClientPacket` entry. Returns `true` if
    /// the handler deferred completion to an Async-Block continuation
    /// (`ActorContext::defer_completion`, §4.11) — the caller must then
    /// leave the actor's busy-flag held rather than releasing it.
    async fn dispatch_client_packet(self: &Arc<Self>, shared: &mut tokio::sync::MutexGuard<'_, StageShared>, account_id: AccountId, packet: Packet) -> bool {
        let reply_scope = if packet.is_fire_and_forget() {
            None
        } else {
            self.session_manager.get_by_account(account_id).map(|session| ReplyScope::open(packet.clone(), session))
        };
        let actor_ctx = self.actor_context(account_id);
        let StageShared { user_stage, actor_registry, .. } = &mut **shared;

        match user_stage.on_dispatch(&self.ctx, &actor_ctx, reply_scope.as_ref(), &packet, actor_registry).await {
            Ok(()) => {
                if let Some(scope) = &reply_scope {
                    if !scope.has_replied() && !scope.is_deferred() {
                        scope.close_with_default_success();
                    }
                }
            }
            Err(err) => {
                error!(stage_id = %self.stage_id, account_id = %account_id, msg_id = packet.msg_id(), %err, "on_dispatch failed");
                if let Some(scope) = &reply_scope {
                    if !scope.is_deferred() {
                        scope.reply_error(ErrorCode::InternalError);
                    }
                }
            }
        }
        actor_ctx.is_deferred()
    }

    fn actor_context(&self, account_id: AccountId) -> ActorContext {
        let actor_sender = ActorSender::new(account_id, Arc::clone(&self.session_manager));
        ActorContext::new(account_id, self.stage_id, actor_sender)
    }
}

/// Reply directly to the session that sent `request`, bypassing any
/// `ReplyScope` — used before an `ActorRecord` exists to answer with (i.e.
/// the `JoinRoomRes`/rejection path, which has nothing to do with the
/// busy-flag FIFO).
fn reply_directly(session: &Arc<Session>, request: &Packet, code: ErrorCode) {
    if request.is_fire_and_forget() {
        return;
    }
    if let Ok(reply) = Packet::reply_error(request, code) {
        let _ = session.send_async(reply);
    }
}

impl EntryProcessor<MailboxEntry> for StageRuntime {
    fn process(self: Arc<Self>, entry: MailboxEntry) -> ProcessFuture {
        Box::pin(async move { self.handle_entry(entry).await })
    }
}

impl TimerSink for StageRuntime {
    fn deliver_tick(&self, timer_id: TimerId, missed_ticks: u32) {
        let Some(runtime) = self.ctx.runtime_handle().upgrade() else {
            return;
        };
        let entry = MailboxEntry::TimerTick { timer_id, missed_ticks };
        if runtime.post(entry).is_err() {
            warn!(stage_id = %self.stage_id, %timer_id, "dropping timer tick, stage mailbox closed");
        }
    }
}

/// Adapter seam so `StageRuntime::new` does not need to import
/// `registry::factory::StageRegistry` directly (that would cycle back
/// through `sender::StageLookup`, which `registry` already implements).
/// `StageRegistry` implements this by handing back `Arc<Self>` cast to
/// `Arc<dyn StageLookup>`.
pub trait StageLookupForRuntime: Send + Sync {
    fn into_stage_lookup(self: Arc<Self>) -> Arc<dyn crate::sender::StageLookup>;
}
