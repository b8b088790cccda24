//! `UserActor` and `ActorContext` (§3, §4.7): the callback surface a
//! developer implements for one player seat inside a stage.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;

// Layer 3: Internal module imports
use crate::sender::ActorSender;
use crate::util::ids::{AccountId, StageId};

/// Read-only context handed to every `UserActor` callback. Carries the
/// identity of the actor and a sender bound to its current live session,
/// never the stage's mutable state directly — `UserStage` callbacks are
/// where stage-local mutation happens, under the mailbox's serialization
/// guarantee (§4.5 "No locking in user handlers").
///
/// Also carries the busy-flag deferral signal `asyncblock::run` uses: a
/// handler that hands a request off to an Async-Block calls
/// [`ActorContext::defer_completion`] before returning, so the runtime
/// keeps this actor's busy-flag held across the suspension instead of
/// releasing it as soon as `on_dispatch` returns (§4.6, §5).
pub struct ActorContext {
    account_id: AccountId,
    stage_id: StageId,
    actor_sender: ActorSender,
    deferred: Arc<AtomicBool>,
}

impl ActorContext {
    pub fn new(account_id: AccountId, stage_id: StageId, actor_sender: ActorSender) -> Self {
        Self {
            account_id,
            stage_id,
            actor_sender,
            deferred: Arc::new(AtomicBool::new(false)),
        }
    }

    pub const fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub const fn stage_id(&self) -> StageId {
        self.stage_id
    }

    pub fn sender(&self) -> &ActorSender {
        &self.actor_sender
    }

    /// Mark the current mailbox entry for this actor as "completion
    /// deferred to an Async-Block continuation" (§4.11). Called by
    /// `asyncblock::run`, not directly by ordinary handlers.
    pub fn defer_completion(&self) {
        self.deferred.store(true, Ordering::Release);
    }

    pub(crate) fn is_deferred(&self) -> bool {
        self.deferred.load(Ordering::Acquire)
    }
}

/// The user-implemented handler object for one player seat (§3 "Actor").
///
/// Every method has a no-op default; a given game implements only the
/// callbacks its design needs. Boxed as a trait object (`Box<dyn
/// UserActor>`) rather than carried as a generic parameter through
/// `ActorRecord`, because the Stage Registry and Factory (§4.10) hold a
/// dynamic `string -> constructor` table keyed by stage_type at runtime —
/// the set of concrete actor types in a process is not known until the
/// relevant constructors run.
#[async_trait]
pub trait UserActor: Send + Sync {
    /// Runs once, the first time this account joins the stage (§4.7). Not
    /// called again across reconnects.
    async fn on_create(&mut self, _ctx: &ActorContext) {}

    /// Runs every time a session attaches to this actor, both on first
    /// join and on every later reconnect (§4.7).
    async fn on_authenticate(&mut self, _ctx: &ActorContext, _auth_data: &[u8]) {}

    /// Runs once, when the actor is finally torn down (explicit leave,
    /// reconnect timeout, kick, or stage close).
    async fn on_destroy(&mut self, _ctx: &ActorContext) {}
}

/// A `UserActor` that does nothing. The default seat `UserStage::create_actor`
/// hands back when a stage does not override it.
pub struct NoopActor;

#[async_trait]
impl UserActor for NoopActor {}
