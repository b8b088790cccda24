//! The reply scope (§9 "Reply scope `thread-local`").
//!
//! A handler that suspends cannot rely on a thread-local to remember which
//! (session, msg_seq) it owes a reply to — the next poll may resume on a
//! different worker thread entirely. `ReplyScope` makes that binding an
//! explicit, `Send`-able value instead: it is constructed once per
//! `ClientPacket` entry with `msg_seq != 0` and threaded through the
//! handler call by value (or `&`), carried across any `.await` the handler
//! performs.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use bytes::Bytes;
use tracing::warn;

// Layer 3: Internal module imports
use crate::error::ErrorCode;
use crate::session::session::Session;
use crate::wire::Packet;

/// Binds a handler invocation to the (session, msg_seq) it must answer.
///
/// Cloning shares the same "already replied" flag: whichever clone replies
/// first wins, and later replies are no-ops logged as a bug. This mirrors
/// `OnDispatch`'s freedom to hand the scope into spawned sub-tasks while
/// the runtime still enforces the "send an empty success reply if nothing
/// else did" fallback exactly once.
#[derive(Clone)]
pub struct ReplyScope {
    request: Arc<Packet>,
    session: Arc<Session>,
    replied: Arc<AtomicBool>,
    deferred: Arc<AtomicBool>,
}

impl ReplyScope {
    /// Open a reply scope for `request` on `session`. Only meaningful when
    /// `request.msg_seq() != 0`; fire-and-forget entries never get one.
    pub fn open(request: Packet, session: Arc<Session>) -> Self {
        Self {
            request: Arc::new(request),
            session,
            replied: Arc::new(AtomicBool::new(false)),
            deferred: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn msg_seq(&self) -> u16 {
        self.request.msg_seq()
    }

    pub fn has_replied(&self) -> bool {
        self.replied.load(Ordering::Acquire)
    }

    /// Mark this scope as answered by an Async-Block continuation instead
    /// of synchronously inside `on_dispatch` (§4.11). Called by
    /// `asyncblock::run`; suppresses the runtime's default-success
    /// fallback for this entry until an explicit `reply`/`reply_error`
    /// eventually lands (from the continuation) or never does (a dropped
    /// request stays unanswered rather than getting a premature `Ack`).
    pub fn defer(&self) {
        self.deferred.store(true, Ordering::Release);
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred.load(Ordering::Acquire)
    }

    /// Send a success reply with `msg_id` and `payload`. A second call
    /// (from either this clone or another) is ignored.
    pub fn reply(&self, msg_id: impl Into<Box<str>>, payload: Bytes) {
        if self.replied.swap(true, Ordering::AcqRel) {
            warn!(msg_seq = self.msg_seq(), "reply scope already answered, ignoring");
            return;
        }
        match Packet::reply_ok(&self.request, msg_id, payload) {
            Ok(packet) => {
                let _ = self.session.send_async(packet);
            }
            Err(err) => warn!(%err, "failed to build reply packet"),
        }
    }

    /// Send an error reply with `code`.
    pub fn reply_error(&self, code: ErrorCode) {
        if self.replied.swap(true, Ordering::AcqRel) {
            warn!(msg_seq = self.msg_seq(), "reply scope already answered, ignoring");
            return;
        }
        match Packet::reply_error(&self.request, code) {
            Ok(packet) => {
                let _ = self.session.send_async(packet);
            }
            Err(err) => warn!(%err, "failed to build error reply packet"),
        }
    }

    /// Called by the runtime after a handler returns without replying: a
    /// silent empty success reply closes out the request (§4.7).
    pub(crate) fn close_with_default_success(&self) {
        self.reply("Ack", Bytes::new());
    }
}
