//! Heartbeat constants and the watchdog loop (§4.2).
//!
//! Heartbeat frames bypass the mailbox entirely: they are handled inside
//! the Session (via `Session::touch_heartbeat`) and never reach a stage.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use tracing::debug;

// Layer 3: Internal module imports
use crate::session::session::{CloseReason, Session};

/// Client -> server heartbeat cadence (§4.2 default).
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Watchdog timeout: a session with no heartbeat for this long is closed
/// (§4.2 default).
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            timeout: DEFAULT_HEARTBEAT_TIMEOUT,
        }
    }
}

/// Spawn the background watchdog for `session`. Polls at a fraction of the
/// configured timeout and closes the session once it has gone silent for
/// longer than `config.timeout`.
pub fn spawn_watchdog(session: Arc<Session>, config: HeartbeatConfig) {
    tokio::spawn(async move {
        let poll_interval = (config.timeout / 4).max(Duration::from_millis(250));
        loop {
            tokio::time::sleep(poll_interval).await;
            if session.is_closed() {
                return;
            }
            if session.silent_for() > config.timeout {
                debug!(session_id = %session.session_id(), "heartbeat timeout, closing session");
                session.close(CloseReason::HeartbeatTimeout).await;
                return;
            }
        }
    });
}
