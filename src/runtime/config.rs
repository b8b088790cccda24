//! `RuntimeConfig`: a typed configuration surface for embedding the
//! crate — a plain struct with a `Default` impl, a fluent builder, and a
//! `validate()` that rejects self-contradictory values before a `Runtime`
//! is built from them.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::error::RuntimeError;
use crate::mailbox::backpressure::DEFAULT_HIGH_WATERMARK;
use crate::mailbox::stage::DEFAULT_DRAIN_LIMIT;
use crate::session::heartbeat::{DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_HEARTBEAT_TIMEOUT};
use crate::session::queue::DEFAULT_QUEUE_CAPACITY;
use crate::session::session::DEFAULT_PROTOCOL_VIOLATION_THRESHOLD;
use crate::stage::runtime::DEFAULT_RECONNECT_GRACE;
use crate::wire::compress::DEFAULT_COMPRESSION_THRESHOLD;

/// Wall-clock given to an in-flight mailbox drain during graceful shutdown
/// before sessions are force-closed and stages force-destroyed (§5
/// "Graceful shutdown drains mailboxes with a configurable deadline").
pub const DEFAULT_SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

/// Wire-layer settings (§4.1).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WireConfig {
    /// Payloads at or above this size are LZ4-compressed (§4.1, §9 item 2).
    pub compression_threshold: usize,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

/// Per-session settings (§4.2, §4.3, §7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionConfig {
    pub send_queue_capacity: usize,
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,
    #[serde(with = "duration_secs")]
    pub heartbeat_timeout: Duration,
    /// A session closes once it has accumulated more than this many
    /// protocol violations (§7 "User-visible failures", default 3).
    pub protocol_violation_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            protocol_violation_threshold: DEFAULT_PROTOCOL_VIOLATION_THRESHOLD,
        }
    }
}

/// Per-stage settings (§4.5, §4.7, §5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StageConfig {
    /// Mailbox depth at which new `ClientPacket` enqueues are rejected
    /// with `StageOverloaded` (§5, default 10,000).
    pub high_watermark: usize,
    /// Entries drained from one stage's mailbox in a single worker pass
    /// before yielding back to the scheduler (§4.5 Fairness, default 256).
    pub drain_limit: usize,
    /// How long a disconnected actor's seat survives before the owning
    /// stage tears it down (§4.7, default 30s).
    #[serde(with = "duration_secs")]
    pub reconnect_grace: Duration,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            high_watermark: DEFAULT_HIGH_WATERMARK,
            drain_limit: DEFAULT_DRAIN_LIMIT,
            reconnect_grace: DEFAULT_RECONNECT_GRACE,
        }
    }
}

/// Timer subsystem settings (§4.8). No tunables of its own today; kept as
/// a distinct type for symmetry with the other sub-configs and so a future
/// tunable (e.g. a coalescing window) has an obvious home.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TimerConfig {}

/// Top-level configuration for a [`crate::runtime::Runtime`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub wire: WireConfig,
    pub session: SessionConfig,
    pub stage: StageConfig,
    pub timer: TimerConfig,
    /// Deadline given to an in-flight drain during graceful shutdown
    /// before sessions are force-closed and stages force-destroyed (§5,
    /// default 10s).
    #[serde(with = "duration_secs")]
    pub shutdown_drain_deadline: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            wire: WireConfig::default(),
            session: SessionConfig::default(),
            stage: StageConfig::default(),
            timer: TimerConfig::default(),
            shutdown_drain_deadline: DEFAULT_SHUTDOWN_DRAIN,
        }
    }
}

impl RuntimeConfig {
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Reject configurations that could never produce a working runtime.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.stage.high_watermark == 0 {
            return Err(RuntimeError::InvalidConfig("stage.high_watermark must be > 0".into()));
        }
        if self.stage.drain_limit == 0 {
            return Err(RuntimeError::InvalidConfig("stage.drain_limit must be > 0".into()));
        }
        if self.session.send_queue_capacity == 0 {
            return Err(RuntimeError::InvalidConfig("session.send_queue_capacity must be > 0".into()));
        }
        if self.session.heartbeat_timeout <= self.session.heartbeat_interval {
            return Err(RuntimeError::InvalidConfig(
                "session.heartbeat_timeout must exceed session.heartbeat_interval".into(),
            ));
        }
        if self.session.protocol_violation_threshold == 0 {
            return Err(RuntimeError::InvalidConfig(
                "session.protocol_violation_threshold must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Fluent builder for [`RuntimeConfig`].
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl Default for RuntimeConfigBuilder {
    fn default() -> Self {
        Self { config: RuntimeConfig::default() }
    }
}

impl RuntimeConfigBuilder {
    pub fn with_compression_threshold(mut self, threshold: usize) -> Self {
        self.config.wire.compression_threshold = threshold;
        self
    }

    pub fn with_send_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.session.send_queue_capacity = capacity;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.config.session.heartbeat_interval = interval;
        self.config.session.heartbeat_timeout = timeout;
        self
    }

    pub fn with_protocol_violation_threshold(mut self, threshold: u32) -> Self {
        self.config.session.protocol_violation_threshold = threshold;
        self
    }

    pub fn with_high_watermark(mut self, high_watermark: usize) -> Self {
        self.config.stage.high_watermark = high_watermark;
        self
    }

    pub fn with_drain_limit(mut self, drain_limit: usize) -> Self {
        self.config.stage.drain_limit = drain_limit;
        self
    }

    pub fn with_reconnect_grace(mut self, reconnect_grace: Duration) -> Self {
        self.config.stage.reconnect_grace = reconnect_grace;
        self
    }

    pub fn with_shutdown_drain_deadline(mut self, deadline: Duration) -> Self {
        self.config.shutdown_drain_deadline = deadline;
        self
    }

    pub fn build(self) -> Result<RuntimeConfig, RuntimeError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
