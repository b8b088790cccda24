//! `Runtime` (§4.3, §4.10, §5, §6): the top-level object a host binary
//! builds once, registers stage types against, and feeds decoded
//! `Packet`s into. It owns the collaborators treated as process-wide
//! singletons (`StageRegistry`, `TimerManager`, `SessionManager`) and is
//! the one place that implements the authentication handshake (§4.3) and
//! graceful shutdown (§5, §6) end to end.
//!
//! What `Runtime` deliberately does NOT do: open a socket, run a read
//! loop, or decode bytes. A host binary owns a `TcpListener`/WebSocket
//! accept loop, frames it with [`Self::codec`], calls
//! [`Self::accept_session`] once per connection and [`Self::on_frame`]
//! once per decoded `Packet`.

pub mod config;

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use bytes::Bytes;
use chrono::Utc;
use tracing::{info, warn};

// Layer 3: Internal module imports
use crate::auth::token::StageTarget;
use crate::auth::verifier::TokenVerifier;
use crate::error::{ErrorCode, RuntimeError};
use crate::mailbox::stage::StageMailbox;
use crate::monitoring::noop::NoopMonitor;
use crate::monitoring::traits::Monitor;
use crate::monitoring::types::{MailboxEvent, MailboxEventKind, SessionEvent, SessionEventKind};
use crate::registry::StageRegistry;
use crate::session::heartbeat::{spawn_watchdog, HeartbeatConfig};
use crate::session::manager::SessionManager;
use crate::session::session::{CloseReason, Session, TransportKind};
use crate::session::transport::TransportSink;
use crate::stage::entry::{LeaveReason, MailboxEntry};
use crate::stage::traits::UserStage;
use crate::timer::manager::TimerManager;
use crate::util::ids::{AccountId, IdGenerator, SessionId, StageId};
use crate::wire::packet::Packet;
use crate::wire::pool::BufferPool;
use crate::wire::PacketCodec;

pub use config::{RuntimeConfig, RuntimeConfigBuilder, SessionConfig, StageConfig, TimerConfig, WireConfig};

/// How often a throttled session or a dying session is polled. Neither the
/// mailbox low-watermark nor a session's `closed` flag has a waiter list,
/// so both paths poll; this is the same tradeoff `session::heartbeat`
/// already makes for the heartbeat watchdog.
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Reasons the auth-handshake short-circuits and closes the session
/// before it ever reaches the stage layer. Every such close uses
/// `CloseReason::ProtocolViolation`: the enum has no dedicated
/// "authentication failed" or "join failed" variant, and both are, from
/// the session's point of view, "this connection violated the handshake
/// contract" (documented in DESIGN.md).
const AUTH_CLOSE_REASON: CloseReason = CloseReason::ProtocolViolation;

/// The top-level object wiring every collaborator together (§9 Design
/// Notes: "construct them at startup, pass them by reference into every
/// collaborator").
pub struct Runtime {
    config: RuntimeConfig,
    stage_registry: Arc<StageRegistry>,
    timers: Arc<TimerManager>,
    token_verifier: Arc<dyn TokenVerifier>,
    buffer_pool: Arc<BufferPool>,
    session_ids: IdGenerator,
    session_monitor: Arc<dyn Monitor<SessionEvent>>,
    mailbox_monitor: Arc<dyn Monitor<MailboxEvent>>,
    started: AtomicBool,
    shutting_down: AtomicBool,
}

impl Runtime {
    /// Build a runtime with no-op monitoring (the default for a
    /// deployment that does not want recorded event history).
    pub fn new(config: RuntimeConfig, token_verifier: Arc<dyn TokenVerifier>) -> Arc<Self> {
        Self::with_monitors(config, token_verifier, Arc::new(NoopMonitor::new()), Arc::new(NoopMonitor::new()))
    }

    /// As [`Self::new`], but with explicit session/mailbox event monitors
    /// (e.g. `monitoring::InMemoryMonitor` in tests or a host's own
    /// exporter).
    pub fn with_monitors(
        config: RuntimeConfig,
        token_verifier: Arc<dyn TokenVerifier>,
        session_monitor: Arc<dyn Monitor<SessionEvent>>,
        mailbox_monitor: Arc<dyn Monitor<MailboxEvent>>,
    ) -> Arc<Self> {
        let timers = TimerManager::new();
        let stage_registry = StageRegistry::with_config(
            Arc::clone(&timers),
            config.stage.high_watermark,
            config.stage.drain_limit,
            config.stage.reconnect_grace,
        );
        Arc::new(Self {
            config,
            stage_registry,
            timers,
            token_verifier,
            buffer_pool: BufferPool::new(),
            session_ids: IdGenerator::new(),
            session_monitor,
            mailbox_monitor,
            started: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn stage_registry(&self) -> &Arc<StageRegistry> {
        &self.stage_registry
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        self.stage_registry.session_manager()
    }

    /// A `PacketCodec` bound to this runtime's buffer pool and configured
    /// compression threshold (§4.1), ready to pair with
    /// `tokio_util::codec::Framed` over a host-owned transport.
    pub fn codec(&self) -> PacketCodec {
        PacketCodec::new(Arc::clone(&self.buffer_pool)).with_compression_threshold(self.config.wire.compression_threshold)
    }

    /// Register the constructor for `stage_type`. Forwarded to the Stage
    /// Registry; rejected once [`Self::start`] has closed registration
    /// (§4.10).
    pub fn register_stage_type<F>(&self, stage_type: impl Into<String>, ctor: F)
    where
        F: Fn() -> Box<dyn UserStage> + Send + Sync + 'static,
    {
        self.stage_registry.register_stage_type(stage_type, ctor);
    }

    /// Close stage-type registration and mark the runtime started. Calling
    /// this before any `create_stage` is what lets a deployment register
    /// every stage type up front and still have registration close at a
    /// well-defined point, rather than implicitly on first use.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stage_registry.close_registration();
        info!("runtime started");
    }

    /// Construct a stage of `stage_type` directly, bypassing the token
    /// handshake's `StageTarget::CreateNew` path. Exposed for hosts that
    /// need to pre-create well-known stages (e.g. a single global lobby)
    /// at startup.
    pub async fn create_stage(&self, stage_type: &str, init: Bytes) -> Result<StageId, RuntimeError> {
        self.stage_registry.create_stage(stage_type, init).await
    }

    /// Register a new transport connection: allocates a `SessionId`,
    /// builds the `Session`, indexes it in the `SessionManager`, and
    /// spawns its heartbeat watchdog and disconnect-notification watcher.
    /// The caller still owns reading frames off `transport`/`sink` and
    /// feeding them to [`Self::on_frame`].
    pub fn accept_session(self: &Arc<Self>, transport: TransportKind, sink: Arc<dyn TransportSink>) -> Arc<Session> {
        let session_id = SessionId::from_raw(self.session_ids.next());
        let session = Session::with_config(
            session_id,
            transport,
            sink,
            self.config.session.send_queue_capacity,
            self.config.session.protocol_violation_threshold,
        );
        self.session_manager().insert(Arc::clone(&session));
        spawn_watchdog(
            Arc::clone(&session),
            HeartbeatConfig {
                interval: self.config.session.heartbeat_interval,
                timeout: self.config.session.heartbeat_timeout,
            },
        );
        self.spawn_close_watcher(Arc::clone(&session));

        let monitor = Arc::clone(&self.session_monitor);
        tokio::spawn(async move {
            let _ = monitor
                .record(SessionEvent {
                    timestamp: Utc::now(),
                    session_id,
                    event_kind: SessionEventKind::Opened { transport: format!("{transport:?}") },
                })
                .await;
        });

        session
    }

    /// Feed one decoded frame for `session` through the protocol (§4.2,
    /// §4.3, §4.6). Heartbeats never reach a stage; everything else is
    /// either the auth handshake or routed to the stage the session's
    /// account is attached to.
    pub async fn on_frame(self: &Arc<Self>, session: &Arc<Session>, packet: Packet) {
        if packet.is_heartbeat() {
            session.touch_heartbeat();
            if !packet.is_fire_and_forget() {
                if let Ok(reply) = Packet::reply_ok(&packet, "HeartbeatRes", Bytes::new()) {
                    let _ = session.send_async(reply);
                }
            }
            return;
        }

        if !session.is_authenticated() {
            if packet.msg_id() == "ConnectWithToken" {
                self.handle_connect_with_token(session, packet).await;
            } else {
                warn!(session_id = %session.session_id(), msg_id = packet.msg_id(), "frame on unauthenticated session");
                session.close(CloseReason::ProtocolViolation).await;
            }
            return;
        }

        if session.is_join_pending() {
            if !session.buffer_preauth_packet(packet) {
                warn!(session_id = %session.session_id(), "second packet buffered while join pending, protocol violation");
                session.close(CloseReason::ProtocolViolation).await;
            }
            return;
        }

        self.route_client_packet(session, packet).await;
    }

    async fn handle_connect_with_token(self: &Arc<Self>, session: &Arc<Session>, packet: Packet) {
        let claims = match self.token_verifier.verify(packet.payload()).await {
            Ok(claims) => claims,
            Err(reason) => {
                let _ = self
                    .session_monitor
                    .record(SessionEvent {
                        timestamp: Utc::now(),
                        session_id: session.session_id(),
                        event_kind: SessionEventKind::AuthFailed { reason: reason.to_string() },
                    })
                    .await;
                self.reply_error(session, &packet, ErrorCode::Unauthorized);
                session.close(AUTH_CLOSE_REASON).await;
                return;
            }
        };

        session.mark_authenticated(claims.account_id);
        self.session_manager().bind_account(claims.account_id, session.session_id()).await;
        session.set_join_pending(true);

        let stage_id = match claims.stage_target {
            StageTarget::Existing(raw) => StageId::from_raw(raw),
            StageTarget::CreateNew => match self.stage_registry.create_stage(&claims.stage_type, claims.user_info.clone()).await {
                Ok(id) => id,
                Err(err) => {
                    warn!(account_id = %claims.account_id, stage_type = %claims.stage_type, %err, "stage creation failed during handshake");
                    session.set_join_pending(false);
                    self.reply_error(session, &packet, ErrorCode::StageNotFound);
                    session.close(AUTH_CLOSE_REASON).await;
                    return;
                }
            },
        };

        let request = packet.clone().with_stage_id(stage_id);
        if let Err(err) = self
            .stage_registry
            .join_stage(stage_id, claims.account_id, Arc::clone(session), claims.user_info, request)
            .await
        {
            warn!(account_id = %claims.account_id, %stage_id, %err, "join_stage failed during handshake");
            session.set_join_pending(false);
            self.reply_error(session, &packet, err.error_code());
            session.close(AUTH_CLOSE_REASON).await;
            return;
        }

        session.set_join_pending(false);
        if let Some(buffered) = session.take_preauth_packet() {
            self.route_client_packet(session, buffered).await;
        }
    }

    async fn route_client_packet(self: &Arc<Self>, session: &Arc<Session>, packet: Packet) {
        if packet.msg_id() == "LeaveRoomReq" {
            if let Some(account_id) = session.account_id() {
                self.stage_registry.leave_stage(account_id, LeaveReason::Explicit);
            }
            if !packet.is_fire_and_forget() {
                if let Ok(reply) = Packet::reply_ok(&packet, "LeaveRoomRes", Bytes::new()) {
                    let _ = session.send_async(reply);
                }
            }
            return;
        }

        let Some(account_id) = session.account_id() else {
            self.reply_error(session, &packet, ErrorCode::Unauthorized);
            return;
        };

        let Some(stage) = self.stage_registry.find_stage(packet.stage_id()) else {
            self.reply_error(session, &packet, ErrorCode::StageNotFound);
            return;
        };

        if stage.mailbox().would_overload() {
            let _ = self
                .mailbox_monitor
                .record(MailboxEvent {
                    timestamp: Utc::now(),
                    stage_id: stage.stage_id(),
                    event_kind: MailboxEventKind::HighWatermarkReached { depth: stage.mailbox().len() },
                })
                .await;
            self.reply_error(session, &packet, ErrorCode::StageOverloaded);
            self.throttle_session(Arc::clone(session), Arc::clone(stage.mailbox()));
            return;
        }

        self.reply_error_if(session, &packet, |packet| {
            stage
                .post(MailboxEntry::ClientPacket { account_id, packet: packet.clone() })
                .is_err()
                .then_some(ErrorCode::StageClosed)
        });
    }

    /// Reply with whatever `f` decides, or nothing if it returns `None`.
    /// Exists only so `route_client_packet`'s final branch can compute its
    /// error code from a fallible move (`stage.post` consumes the entry)
    /// without cloning `packet` twice.
    fn reply_error_if(&self, session: &Session, packet: &Packet, f: impl FnOnce(&Packet) -> Option<ErrorCode>) {
        if let Some(code) = f(packet) {
            self.reply_error(session, packet, code);
        }
    }

    fn reply_error(&self, session: &Session, packet: &Packet, code: ErrorCode) {
        if packet.is_fire_and_forget() {
            return;
        }
        if let Ok(reply) = Packet::reply_error(packet, code) {
            let _ = session.send_async(reply);
        }
    }

    /// Engage backpressure throttling for `session` (§5): the caller's
    /// transport read-loop is expected to poll `session.is_throttled()`
    /// and stop reading frames while it is `true`. Clears itself once the
    /// stage's mailbox has drained below its low watermark.
    fn throttle_session(self: &Arc<Self>, session: Arc<Session>, mailbox: Arc<StageMailbox<MailboxEntry>>) {
        if session.is_throttled() {
            return;
        }
        session.set_throttled(true);
        let monitor = Arc::clone(&self.mailbox_monitor);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(WATCH_POLL_INTERVAL).await;
                if session.is_closed() {
                    return;
                }
                if mailbox.has_drained_below_low_watermark() {
                    session.set_throttled(false);
                    let _ = monitor
                        .record(MailboxEvent {
                            timestamp: Utc::now(),
                            stage_id: mailbox.stage_id(),
                            event_kind: MailboxEventKind::DrainedBelowLowWatermark { depth: mailbox.len() },
                        })
                        .await;
                    return;
                }
            }
        });
    }

    /// Poll for `session` closing and, once it does, unregister it from
    /// the `SessionManager` (§4.2 "Failure semantics": "the Session
    /// unregisters from Session Manager and emits `ActorDisconnect`").
    /// Nothing in this crate currently calls `SessionManager::remove`
    /// directly from a live transport path, since transport failures are
    /// only visible to the host binary's read loop; this watcher is what
    /// turns any `Session::close` call — whichever collaborator issued it
    /// — into the index cleanup the session's disconnect requires.
    fn spawn_close_watcher(self: &Arc<Self>, session: Arc<Session>) {
        let session_manager = Arc::clone(self.session_manager());
        let monitor = Arc::clone(&self.session_monitor);
        tokio::spawn(async move {
            loop {
                if session.is_closed() {
                    let session_id = session.session_id();
                    if let Some(reason) = session.close_reason() {
                        session_manager.handle_session_closed(session_id, reason).await;
                        let _ = monitor
                            .record(SessionEvent {
                                timestamp: Utc::now(),
                                session_id,
                                event_kind: SessionEventKind::Closed { reason: format!("{reason:?}") },
                            })
                            .await;
                    }
                    return;
                }
                tokio::time::sleep(WATCH_POLL_INTERVAL).await;
            }
        });
    }

    /// Graceful shutdown (§5, §6): stop accepting new stages, cooperatively
    /// destroy every current one, give in-flight mailbox drains a window
    /// to finish, then force-close whatever sessions remain. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("runtime shutdown: draining stages");
        self.stage_registry.begin_draining();
        for stage_id in self.stage_registry.stage_ids() {
            let _ = self.stage_registry.destroy_stage(stage_id);
        }

        tokio::time::sleep(self.config.shutdown_drain_deadline).await;

        self.session_manager().close_all(CloseReason::ServerShutdown).await;
        info!("runtime shutdown complete");
    }
}
