//! Async-Block: the sanctioned escape hatch for blocking or CPU-heavy work
//! (§4.11, §9).
//!
//! `pre` runs on tokio's blocking-task pool, off the mailbox entirely.
//! Its result travels back as an `AsyncContinuation` mailbox entry, so
//! `post` runs under the same serialization contract as any other handler
//! — the only sanctioned way to call blocking code from inside a Stage.
//!
//! Handing a request off to `run` defers that entry's completion: the
//! originating actor's busy-flag stays held, and the default-success
//! reply fallback is suppressed, until `post` actually runs (§4.6, §4.7,
//! §4.11). Without this, a suspended request would let a later packet
//! from the same actor run ahead of it, and the client would see an
//! empty `Ack` land before (or instead of) the real reply.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use tracing::warn;

// Layer 3: Internal module imports
use crate::error::ErrorCode;
use crate::player::{ActorContext, ActorRegistry};
use crate::sender::ReplyScope;
use crate::stage::entry::{Continuation, MailboxEntry};
use crate::stage::traits::StageContext;

/// Run `pre` off the mailbox worker, then re-enter this stage to run
/// `post` with `pre`'s result, under the stage's serialization guarantee.
///
/// `actor` identifies whose in-flight `ClientPacket` entry this defers;
/// its busy-flag is released only once `post` (or an error path that
/// prevents `post` from ever running) completes. `reply`, if the request
/// expected one, is marked deferred so the runtime's "no explicit reply ->
/// send an empty success" fallback does not fire before the real answer
/// does — `post` (or a closure it spawns) is expected to call
/// `reply.reply(..)`/`reply.reply_error(..)` itself if it owes one.
///
/// `post` is synchronous: everything a handler can legitimately do from
/// inside the mailbox worker (send via `ActorSender`/`StageSender`,
/// broadcast, arm timers) is itself non-blocking, so `post` never needs to
/// suspend. If it needs to reply to the original request, capture a
/// `ReplyScope` from the call site and invoke it inside `post`.
pub fn run<T, F>(
    ctx: &StageContext,
    actor: &ActorContext,
    reply: Option<&ReplyScope>,
    pre: impl FnOnce() -> T + Send + 'static,
    post: F,
) where
    T: Send + 'static,
    F: FnOnce(&StageContext, &ActorRegistry, T) + Send + 'static,
{
    actor.defer_completion();
    if let Some(scope) = reply {
        scope.defer();
    }
    let reply = reply.cloned();
    let account_id = actor.account_id();
    let mailbox = ctx.mailbox_handle();
    let runtime_handle = ctx.runtime_handle();
    tokio::spawn(async move {
        let value = match tokio::task::spawn_blocking(pre).await {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "async-block pre-work panicked, dropping continuation");
                if let Some(runtime) = runtime_handle.upgrade() {
                    if let Some(scope) = &reply {
                        scope.reply_error(ErrorCode::InternalError);
                    }
                    runtime.release_deferred_actor(account_id).await;
                }
                return;
            }
        };
        let Some(runtime) = runtime_handle.upgrade() else {
            warn!("stage gone before async-block continuation could be delivered");
            return;
        };
        let continuation: Continuation = Box::new(move |runtime| {
            Box::pin(async move {
                runtime.run_continuation(move |ctx, registry| post(ctx, registry, value)).await;
                runtime.release_deferred_actor(account_id).await;
            })
        });
        let runtime_for_release = Arc::clone(&runtime);
        if mailbox.post(MailboxEntry::AsyncContinuation(continuation), runtime, false).is_err() {
            warn!("stage mailbox closed before async-block continuation could be delivered");
            runtime_for_release.release_deferred_actor(account_id).await;
        }
    });
}
