//! Stage Registry and Factory (§4.10, §9): the process-wide `stage_type
//! -> constructor` table, the `stage_id -> StageRuntime` index, and the
//! adapter that resolves the `sender`/`session` inversion-of-control
//! traits those modules define (`StageLookup`, `AccountEventSink`).

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::warn;

// Layer 3: Internal module imports
use crate::error::{RoutingError, RuntimeError};
use crate::mailbox::backpressure::DEFAULT_HIGH_WATERMARK;
use crate::sender::StageLookup;
use crate::session::manager::{AccountEventSink, SessionManager};
use crate::session::session::{DisconnectReason, Session};
use crate::stage::entry::{LeaveReason, MailboxEntry, SystemPacket};
use crate::stage::runtime::{StageLookupForRuntime, DEFAULT_RECONNECT_GRACE};
use crate::stage::traits::{StageContext, UserStage};
use crate::timer::manager::{TimerManager, TimerSink};
use crate::util::ids::{AccountId, IdGenerator, SessionId, StageId};
use crate::wire::Packet;
use crate::StageRuntime;

type StageConstructor = Box<dyn Fn() -> Box<dyn UserStage> + Send + Sync>;

/// Forwards `SessionManager`'s account-lifecycle notifications back to the
/// `StageRegistry` that owns it. Exists only so `StageRegistry::new` can
/// build its `SessionManager` and itself in one `Arc::new_cyclic` call,
/// the same pattern `StageRuntime`/`StageContext` use for the same reason.
struct RegistryEventSink(Weak<StageRegistry>);

#[async_trait]
impl AccountEventSink for RegistryEventSink {
    async fn on_reconnected(&self, account_id: AccountId, new_session_id: SessionId) {
        if let Some(registry) = self.0.upgrade() {
            registry.handle_reconnected(account_id, new_session_id).await;
        }
    }

    async fn on_disconnected(&self, account_id: AccountId, reason: DisconnectReason) {
        if let Some(registry) = self.0.upgrade() {
            registry.handle_disconnected(account_id, reason).await;
        }
    }
}

/// Owns every live stage and the constructors that can make more of them.
pub struct StageRegistry {
    stage_types: DashMap<String, StageConstructor>,
    stages: DashMap<StageId, Arc<StageRuntime>>,
    account_stage: DashMap<AccountId, StageId>,
    ids: IdGenerator,
    session_manager: Arc<SessionManager>,
    timers: Arc<TimerManager>,
    high_watermark: usize,
    drain_limit: usize,
    reconnect_grace: Duration,
    /// Flips to `false` on the first `create_stage` call, or explicitly via
    /// [`Self::close_registration`] (§4.10: "the registry closes to new
    /// stage-type registrations once the server has started creating
    /// stages").
    accepting_registrations: AtomicBool,
    /// Set once `Runtime::shutdown` begins (§5): new stages are refused so
    /// the stage count can only shrink while in-flight mailboxes drain.
    draining: AtomicBool,
}

impl StageRegistry {
    pub fn new(timers: Arc<TimerManager>) -> Arc<Self> {
        Self::with_high_watermark(timers, DEFAULT_HIGH_WATERMARK)
    }

    pub fn with_high_watermark(timers: Arc<TimerManager>, high_watermark: usize) -> Arc<Self> {
        Self::with_config(
            timers,
            high_watermark,
            crate::mailbox::stage::DEFAULT_DRAIN_LIMIT,
            DEFAULT_RECONNECT_GRACE,
        )
    }

    /// As [`Self::new`], but with explicit per-stage mailbox drain limit and
    /// reconnect grace period, threaded into every `StageRuntime` this
    /// registry subsequently constructs.
    pub fn with_config(
        timers: Arc<TimerManager>,
        high_watermark: usize,
        drain_limit: usize,
        reconnect_grace: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<StageRegistry>| Self {
            stage_types: DashMap::new(),
            stages: DashMap::new(),
            account_stage: DashMap::new(),
            ids: IdGenerator::new(),
            session_manager: SessionManager::new(Arc::new(RegistryEventSink(weak.clone()))),
            timers,
            high_watermark,
            drain_limit,
            reconnect_grace,
            accepting_registrations: AtomicBool::new(true),
            draining: AtomicBool::new(false),
        })
    }

    /// Close the registry to further stage-type registrations without
    /// requiring a `create_stage` call first. `Runtime::start` calls this
    /// so registration closes at server startup even for deployments that
    /// lazily create their first stage.
    pub fn close_registration(&self) {
        self.accepting_registrations.store(false, Ordering::Release);
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.session_manager
    }

    /// Begin graceful shutdown: refuse further `create_stage` calls. Does
    /// not itself touch any existing stage; `Runtime::shutdown` follows up
    /// with `destroy_stage` for each current id.
    pub fn begin_draining(&self) {
        self.draining.store(true, Ordering::Release);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Snapshot of every currently registered stage id, for the shutdown
    /// sweep to iterate over.
    pub fn stage_ids(&self) -> Vec<StageId> {
        self.stages.iter().map(|entry| *entry.key()).collect()
    }

    /// Register the constructor for `stage_type`. Ignored with a warning
    /// once the registry has started creating stages (§4.10) — by then
    /// some stage may already hold a reference to the old closed-set of
    /// types, so allowing late registration would make `CreateStage`'s
    /// behavior depend on call order.
    pub fn register_stage_type<F>(&self, stage_type: impl Into<String>, ctor: F)
    where
        F: Fn() -> Box<dyn UserStage> + Send + Sync + 'static,
    {
        let stage_type = stage_type.into();
        if !self.accepting_registrations.load(Ordering::Acquire) {
            warn!(stage_type, "stage type registration rejected, registry is closed");
            return;
        }
        self.stage_types.insert(stage_type, Box::new(ctor));
    }

    /// Construct and start a new stage of `stage_type`, posting its
    /// `Create` entry. Closes the registry to further type registrations.
    pub async fn create_stage(self: &Arc<Self>, stage_type: &str, init: Bytes) -> Result<StageId, RuntimeError> {
        if self.draining.load(Ordering::Acquire) {
            return Err(RuntimeError::ShutdownInProgress);
        }
        self.accepting_registrations.store(false, Ordering::Release);
        let ctor = self
            .stage_types
            .get(stage_type)
            .ok_or_else(|| RuntimeError::UnknownStageType(stage_type.to_string()))?;
        let user_stage = ctor();
        drop(ctor);

        let stage_id = StageId::from_raw(self.ids.next());
        let lookup: Arc<dyn StageLookupForRuntime> = Arc::clone(self);
        let runtime = StageRuntime::with_config(
            stage_id,
            Arc::from(stage_type),
            user_stage,
            self.high_watermark,
            self.drain_limit,
            self.reconnect_grace,
            lookup,
            Arc::clone(&self.timers),
            Arc::clone(&self.session_manager),
        );
        self.timers.register_stage(stage_id, Arc::clone(&runtime) as Arc<dyn TimerSink>);
        self.stages.insert(stage_id, Arc::clone(&runtime));
        let _ = runtime.post(MailboxEntry::System(SystemPacket::Create { init }));
        Ok(stage_id)
    }

    pub fn find_stage(&self, stage_id: StageId) -> Option<Arc<StageRuntime>> {
        self.stages.get(&stage_id).map(|entry| Arc::clone(&entry))
    }

    pub fn stage_context(&self, stage_id: StageId) -> Option<StageContext> {
        self.find_stage(stage_id).map(|runtime| runtime.context().clone())
    }

    /// Begin cooperative teardown (§4.10): post `Close`, which drains every
    /// remaining actor through `OnLeaveRoom`/`OnDestroy` before the stage
    /// marks itself `Closed`. Removing the registry's own entry immediately
    /// means no new `Join`/inter-stage traffic can be routed here while
    /// that drain is in flight.
    pub fn destroy_stage(&self, stage_id: StageId) -> Result<(), RuntimeError> {
        let (_, runtime) = self.stages.remove(&stage_id).ok_or(RoutingError::StageNotFound(stage_id))?;
        let _ = runtime.post(MailboxEntry::System(SystemPacket::Close));
        Ok(())
    }

    /// The single entry point the dispatcher uses to attach a session to a
    /// stage, first-time join or reconnect alike (§4.3 step 5). Records the
    /// account's owning stage so later `AccountEventSink`/`StageLookup`
    /// notifications can be routed back to it.
    pub async fn join_stage(
        &self,
        stage_id: StageId,
        account_id: AccountId,
        session: Arc<Session>,
        user_info: Bytes,
        request: Packet,
    ) -> Result<(), RoutingError> {
        let runtime = self.find_stage(stage_id).ok_or(RoutingError::StageNotFound(stage_id))?;
        self.account_stage.insert(account_id, stage_id);
        let _ = runtime.post(MailboxEntry::System(SystemPacket::Join { account_id, session, user_info, request }));
        Ok(())
    }

    /// Explicit leave (as opposed to a reconnect-timeout, which the
    /// `StageRuntime` arms and fires itself).
    pub fn leave_stage(&self, account_id: AccountId, reason: LeaveReason) {
        let Some(stage_id) = self.account_stage.get(&account_id).map(|entry| *entry) else {
            return;
        };
        if let Some(runtime) = self.find_stage(stage_id) {
            let _ = runtime.post(MailboxEntry::System(SystemPacket::Leave { account_id, reason }));
        }
    }

    async fn handle_reconnected(&self, account_id: AccountId, new_session_id: SessionId) {
        let Some(stage_id) = self.account_stage.get(&account_id).map(|entry| *entry) else {
            return;
        };
        let Some(runtime) = self.find_stage(stage_id) else {
            return;
        };
        let Some(session) = self.session_manager.get(new_session_id) else {
            return;
        };
        let _ = runtime.post(MailboxEntry::System(SystemPacket::Reconnected { account_id, session }));
    }

    async fn handle_disconnected(&self, account_id: AccountId, reason: DisconnectReason) {
        let Some(stage_id) = self.account_stage.get(&account_id).map(|entry| *entry) else {
            return;
        };
        if let Some(runtime) = self.find_stage(stage_id) {
            let _ = runtime.post(MailboxEntry::System(SystemPacket::ActorDisconnect { account_id, reason }));
        }
    }
}

#[async_trait]
impl StageLookup for StageRegistry {
    async fn send_to_stage(&self, target: StageId, from: StageId, packet: Packet) -> Result<(), RoutingError> {
        let runtime = self.find_stage(target).ok_or(RoutingError::StageNotFound(target))?;
        runtime
            .post(MailboxEntry::InterStagePacket { from_stage_id: from, packet })
            .map_err(|_| RoutingError::StageNotFound(target))
    }
}

impl StageLookupForRuntime for StageRegistry {
    fn into_stage_lookup(self: Arc<Self>) -> Arc<dyn StageLookup> {
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::session::TransportKind;
    use crate::session::transport::TransportSink;
    use crate::stage::traits::HandlerResult;
    use crate::wire::PacketFlags;
    use std::sync::atomic::AtomicU32;

    struct NullSink;
    #[async_trait]
    impl TransportSink for NullSink {
        async fn send_frame(&self, _packet: Packet) -> std::io::Result<()> {
            Ok(())
        }
        async fn close(&self) {}
    }

    #[derive(Default)]
    struct CountingStage {
        creates: Arc<AtomicU32>,
    }
    #[async_trait]
    impl UserStage for CountingStage {
        async fn on_create(&mut self, _ctx: &StageContext, _init: Bytes) -> HandlerResult<()> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn create_stage_resolves_the_registered_constructor() {
        let timers = TimerManager::new();
        let registry = StageRegistry::new(timers);
        let creates = Arc::new(AtomicU32::new(0));
        registry.register_stage_type("Counting", {
            let creates = Arc::clone(&creates);
            move || Box::new(CountingStage { creates: Arc::clone(&creates) }) as Box<dyn UserStage>
        });

        let stage_id = registry.create_stage("Counting", Bytes::new()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(creates.load(Ordering::SeqCst), 1);
        assert!(registry.find_stage(stage_id).is_some());
    }

    #[tokio::test]
    async fn unknown_stage_type_is_rejected() {
        let timers = TimerManager::new();
        let registry = StageRegistry::new(timers);
        let err = registry.create_stage("Nope", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownStageType(_)));
    }

    #[tokio::test]
    async fn registration_closes_after_the_first_create_stage() {
        let timers = TimerManager::new();
        let registry = StageRegistry::new(timers);
        registry.register_stage_type("A", || Box::new(CountingStage::default()) as Box<dyn UserStage>);
        registry.create_stage("A", Bytes::new()).await.unwrap();

        registry.register_stage_type("B", || Box::new(CountingStage::default()) as Box<dyn UserStage>);
        let err = registry.create_stage("B", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownStageType(_)));
    }

    #[tokio::test]
    async fn join_stage_reaches_the_target_stage() {
        let timers = TimerManager::new();
        let registry = StageRegistry::new(timers);
        registry.register_stage_type("Room", || Box::new(CountingStage::default()) as Box<dyn UserStage>);
        let stage_id = registry.create_stage("Room", Bytes::new()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let account_id = AccountId::from_raw(1);
        let session = Session::new(SessionId::from_raw(1), TransportKind::Tcp, Arc::new(NullSink));
        session.mark_authenticated(account_id);
        registry.session_manager().insert(session.clone());
        registry.session_manager().bind_account(account_id, session.session_id()).await;

        let request = Packet::new("JoinRoom", 1, stage_id, 0, PacketFlags::empty(), Bytes::new()).unwrap();
        registry.join_stage(stage_id, account_id, session, Bytes::new(), request).await.unwrap();
    }
}
