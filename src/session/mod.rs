//! Session: one per client transport connection (§4.2).
//!
//! A `Session` owns its outbound send queue, heartbeat bookkeeping and
//! authentication state. The `SessionManager` is the process-wide
//! `session_id -> Session` and `account_id -> session_id` index described
//! in §4.4, including the duplicate-login policy.

pub mod heartbeat;
pub mod manager;
pub mod queue;
pub mod session;
pub mod transport;

pub use heartbeat::{HeartbeatConfig, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_HEARTBEAT_TIMEOUT};
pub use manager::{AccountEventSink, SessionManager};
pub use queue::OutboundQueue;
pub use session::{CloseReason, DisconnectReason, Session, TransportKind};
pub use transport::TransportSink;
