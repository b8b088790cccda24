//! `Session` (§3, §4.2): one live transport connection.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{info, warn};

// Layer 3: Internal module imports
use crate::error::SessionError;
use crate::session::queue::{OutboundQueue, DEFAULT_QUEUE_CAPACITY};
use crate::session::transport::TransportSink;
use crate::util::ids::{AccountId, SessionId};
use crate::wire::Packet;

/// Maximum protocol violations tolerated before a session is closed (§7
/// "User-visible failures", default 3).
pub const DEFAULT_PROTOCOL_VIOLATION_THRESHOLD: u32 = 3;

/// Transport kind a session rides on. Purely informational at this layer;
/// the framing and semantics are identical either way (§1 "Transport
/// socket I/O internals" are out of scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    WebSocket,
}

/// Why a session was closed. Distinct from `DisconnectReason` (the
/// coarser reason a stage's `OnActorConnectionChanged` sees) because a
/// session can close for reasons that never reach a stage at all (e.g. it
/// was never authenticated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    NetworkError,
    HeartbeatTimeout,
    DisplacedByDuplicateLogin,
    ProtocolViolation,
    Explicit,
    ServerShutdown,
}

/// The reason an actor transitioned to disconnected, carried on
/// `SystemPacket::ActorDisconnect` (§4.4, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    NetworkError,
    HeartbeatTimeout,
    Kicked,
}

impl CloseReason {
    /// Map a session close reason onto the stage-facing disconnect reason,
    /// when the closure should in fact propagate as an `ActorDisconnect`.
    /// Duplicate-login closures do NOT propagate this way — §4.4 instead
    /// emits a distinct `ActorReconnected` system packet.
    pub fn as_disconnect_reason(self) -> Option<DisconnectReason> {
        match self {
            Self::NetworkError | Self::ProtocolViolation => Some(DisconnectReason::NetworkError),
            Self::HeartbeatTimeout => Some(DisconnectReason::HeartbeatTimeout),
            Self::DisplacedByDuplicateLogin | Self::Explicit | Self::ServerShutdown => None,
        }
    }
}

/// A live client transport connection.
pub struct Session {
    session_id: SessionId,
    transport: TransportKind,
    account_id: RwLock<Option<AccountId>>,
    authenticated: AtomicBool,
    closed: AtomicBool,
    close_reason: RwLock<Option<CloseReason>>,
    /// Set by `Runtime` when this stage's mailbox reports `would_overload`
    /// (§5); a transport read-loop should stop reading new frames for this
    /// session while `true`.
    throttled: AtomicBool,
    /// `true` from the moment `ConnectWithToken` verifies until
    /// `StageRegistry::join_stage` has been called (§4.3 step 5): a
    /// client packet arriving in this window is buffered rather than
    /// routed, since the stage attachment it depends on is not yet
    /// guaranteed to be visible.
    join_pending: AtomicBool,
    last_heartbeat: RwLock<DateTime<Utc>>,
    protocol_violations: AtomicU32,
    violation_threshold: u32,
    /// At most one client packet may be buffered while authentication is
    /// still pending (§4.3 step 5); a second arrival before auth completes
    /// is itself a protocol violation.
    pending_preauth_packet: RwLock<Option<Packet>>,
    send_queue: Arc<OutboundQueue>,
    sink: Arc<dyn TransportSink>,
}

impl Session {
    pub fn new(
        session_id: SessionId,
        transport: TransportKind,
        sink: Arc<dyn TransportSink>,
    ) -> Arc<Self> {
        Self::with_capacity(session_id, transport, sink, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(
        session_id: SessionId,
        transport: TransportKind,
        sink: Arc<dyn TransportSink>,
        queue_capacity: usize,
    ) -> Arc<Self> {
        Self::with_config(
            session_id,
            transport,
            sink,
            queue_capacity,
            DEFAULT_PROTOCOL_VIOLATION_THRESHOLD,
        )
    }

    /// As [`Self::with_capacity`], but with an explicit protocol-violation
    /// threshold rather than the default (surfaced as
    /// `SessionConfig::protocol_violation_threshold`).
    pub fn with_config(
        session_id: SessionId,
        transport: TransportKind,
        sink: Arc<dyn TransportSink>,
        queue_capacity: usize,
        violation_threshold: u32,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            session_id,
            transport,
            account_id: RwLock::new(None),
            authenticated: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_reason: RwLock::new(None),
            throttled: AtomicBool::new(false),
            join_pending: AtomicBool::new(false),
            last_heartbeat: RwLock::new(Utc::now()),
            protocol_violations: AtomicU32::new(0),
            violation_threshold,
            pending_preauth_packet: RwLock::new(None),
            send_queue: OutboundQueue::new(session_id, queue_capacity),
            sink,
        });
        session.clone().spawn_writer();
        session
    }

    fn spawn_writer(self: Arc<Self>) {
        tokio::spawn(async move {
            while let Some(packet) = self.send_queue.pop().await {
                if let Err(err) = self.sink.send_frame(packet).await {
                    warn!(session_id = %self.session_id, %err, "transport write failed, closing session");
                    self.close(CloseReason::NetworkError).await;
                    return;
                }
            }
        });
    }

    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub const fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn account_id(&self) -> Option<AccountId> {
        *self.account_id.read()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The reason this session closed, once [`Self::close`] has run. `None`
    /// while still open.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.read()
    }

    pub fn is_throttled(&self) -> bool {
        self.throttled.load(Ordering::Acquire)
    }

    /// Flip the throttle flag a transport read-loop polls to decide whether
    /// to keep accepting frames for this session (§5 backpressure).
    pub fn set_throttled(&self, throttled: bool) {
        self.throttled.store(throttled, Ordering::Release);
    }

    pub fn is_join_pending(&self) -> bool {
        self.join_pending.load(Ordering::Acquire)
    }

    pub fn set_join_pending(&self, pending: bool) {
        self.join_pending.store(pending, Ordering::Release);
    }

    /// Bind this session to `account_id` and mark it authenticated. Called
    /// once the Token Verifier and duplicate-login policy have both
    /// succeeded (§4.3, §4.4).
    pub fn mark_authenticated(&self, account_id: AccountId) {
        *self.account_id.write() = Some(account_id);
        self.authenticated.store(true, Ordering::Release);
    }

    pub fn touch_heartbeat(&self) {
        *self.last_heartbeat.write() = Utc::now();
    }

    pub fn silent_for(&self) -> std::time::Duration {
        let elapsed = Utc::now().signed_duration_since(*self.last_heartbeat.read());
        elapsed.to_std().unwrap_or(std::time::Duration::ZERO)
    }

    /// Buffer the single client packet a not-yet-authenticated session is
    /// allowed to hold. Returns `false` if one was already buffered (a
    /// protocol violation per §4.3).
    pub fn buffer_preauth_packet(&self, packet: Packet) -> bool {
        let mut guard = self.pending_preauth_packet.write();
        if guard.is_some() {
            return false;
        }
        *guard = Some(packet);
        true
    }

    pub fn take_preauth_packet(&self) -> Option<Packet> {
        self.pending_preauth_packet.write().take()
    }

    /// Record a protocol violation. Returns `true` once the configured
    /// threshold has been exceeded, at which point the caller MUST close
    /// the session (§7).
    pub fn record_protocol_violation(&self) -> bool {
        let count = self.protocol_violations.fetch_add(1, Ordering::AcqRel) + 1;
        count > self.violation_threshold
    }

    /// Enqueue an outbound packet. Never blocks longer than the queue's
    /// capacity permits (§4.2); overflow is handled by `OutboundQueue`.
    pub fn send_async(&self, packet: Packet) -> Result<(), SessionError> {
        self.send_queue.push(packet)
    }

    /// Close the session: mark it closed, drop the send queue, and tear
    /// down the transport. Idempotent.
    pub async fn close(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(session_id = %self.session_id, ?reason, "closing session");
        *self.close_reason.write() = Some(reason);
        self.send_queue.close();
        self.sink.close().await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("transport", &self.transport)
            .field("account_id", &self.account_id())
            .field("authenticated", &self.is_authenticated())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::util::ids::StageId;
    use crate::wire::PacketFlags;
    use bytes::Bytes;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        sent: Arc<StdMutex<Vec<Packet>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl TransportSink for RecordingSink {
        async fn send_frame(&self, packet: Packet) -> std::io::Result<()> {
            self.sent.lock().unwrap().push(packet);
            Ok(())
        }
        async fn close(&self) {
            self.closed.store(true, Ordering::Release);
        }
    }

    fn packet(id: &str) -> Packet {
        Packet::new(id, 0, StageId::from_raw(1), 0, PacketFlags::empty(), Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn send_async_reaches_the_transport() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let sink = Arc::new(RecordingSink { sent: Arc::clone(&sent), closed });
        let session = Session::new(SessionId::from_raw(1), TransportKind::Tcp, sink);

        session.send_async(packet("Hello")).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn protocol_violation_threshold_trips_after_default_count() {
        let sink = Arc::new(RecordingSink {
            sent: Arc::new(StdMutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        });
        let session = Session::new(SessionId::from_raw(1), TransportKind::Tcp, sink);
        assert!(!session.record_protocol_violation());
        assert!(!session.record_protocol_violation());
        assert!(!session.record_protocol_violation());
        assert!(session.record_protocol_violation());
    }

    #[tokio::test]
    async fn preauth_buffer_accepts_only_one_packet() {
        let sink = Arc::new(RecordingSink {
            sent: Arc::new(StdMutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        });
        let session = Session::new(SessionId::from_raw(1), TransportKind::Tcp, sink);
        assert!(session.buffer_preauth_packet(packet("A")));
        assert!(!session.buffer_preauth_packet(packet("B")));
        assert_eq!(session.take_preauth_packet().unwrap().msg_id(), "A");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_tears_down_transport() {
        let closed = Arc::new(AtomicBool::new(false));
        let sink = Arc::new(RecordingSink {
            sent: Arc::new(StdMutex::new(Vec::new())),
            closed: Arc::clone(&closed),
        });
        let session = Session::new(SessionId::from_raw(1), TransportKind::Tcp, sink);
        session.close(CloseReason::Explicit).await;
        session.close(CloseReason::Explicit).await;
        assert!(session.is_closed());
        assert!(closed.load(Ordering::Acquire));
    }
}
