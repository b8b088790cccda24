//! Domain event types recorded at the seams already logged through
//! `tracing`: stage lifecycle, actor lifecycle, session lifecycle, timer
//! fires, and mailbox backpressure.

// Layer 1: Standard library imports
use std::collections::HashMap;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::Serialize;

// Layer 3: Internal module imports
use super::traits::{EventSeverity, MonitoringEvent};
use crate::util::ids::{AccountId, SessionId, StageId, TimerId};

/// Controls how a [`super::Monitor`] records and retains events.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub max_history_size: usize,
    pub severity_filter: EventSeverity,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_history_size: 1000,
            severity_filter: EventSeverity::Info,
        }
    }
}

/// Queryable snapshot of a monitor's accumulated state.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringSnapshot<E: MonitoringEvent> {
    pub timestamp: DateTime<Utc>,
    pub total_events: u64,
    pub trace_count: u64,
    pub debug_count: u64,
    pub info_count: u64,
    pub warning_count: u64,
    pub error_count: u64,
    pub critical_count: u64,
    pub recent_events: Vec<E>,
}

// ============================================================================
// Stage events
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StageEvent {
    pub timestamp: DateTime<Utc>,
    pub stage_id: StageId,
    pub event_kind: StageEventKind,
    pub metadata: HashMap<String, String>,
}

impl MonitoringEvent for StageEvent {
    const EVENT_TYPE: &'static str = "stage";

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn severity(&self) -> EventSeverity {
        match &self.event_kind {
            StageEventKind::Created { .. } => EventSeverity::Info,
            StageEventKind::HandlerError { .. } => EventSeverity::Error,
            StageEventKind::Overloaded { .. } => EventSeverity::Warning,
            StageEventKind::Closed => EventSeverity::Info,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StageEventKind {
    Created { stage_type: String },
    HandlerError { msg_id: String, error: String },
    Overloaded { depth: usize, high_watermark: usize },
    Closed,
}

// ============================================================================
// Actor events
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ActorEvent {
    pub timestamp: DateTime<Utc>,
    pub stage_id: StageId,
    pub account_id: AccountId,
    pub event_kind: ActorEventKind,
}

impl MonitoringEvent for ActorEvent {
    const EVENT_TYPE: &'static str = "actor";

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn severity(&self) -> EventSeverity {
        match &self.event_kind {
            ActorEventKind::Joined => EventSeverity::Info,
            ActorEventKind::Reconnected => EventSeverity::Info,
            ActorEventKind::Disconnected { .. } => EventSeverity::Info,
            ActorEventKind::Left { .. } => EventSeverity::Info,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ActorEventKind {
    Joined,
    Reconnected,
    Disconnected { reason: String },
    Left { reason: String },
}

// ============================================================================
// Session events
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: SessionId,
    pub event_kind: SessionEventKind,
}

impl MonitoringEvent for SessionEvent {
    const EVENT_TYPE: &'static str = "session";

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn severity(&self) -> EventSeverity {
        match &self.event_kind {
            SessionEventKind::Opened { .. } => EventSeverity::Info,
            SessionEventKind::AuthFailed { .. } => EventSeverity::Warning,
            SessionEventKind::Closed { .. } => EventSeverity::Info,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SessionEventKind {
    Opened { transport: String },
    AuthFailed { reason: String },
    Closed { reason: String },
}

// ============================================================================
// Timer events
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct TimerEvent {
    pub timestamp: DateTime<Utc>,
    pub stage_id: StageId,
    pub timer_id: TimerId,
    pub event_kind: TimerEventKind,
}

impl MonitoringEvent for TimerEvent {
    const EVENT_TYPE: &'static str = "timer";

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn severity(&self) -> EventSeverity {
        match self.event_kind {
            TimerEventKind::Fired { missed_ticks } if missed_ticks > 0 => EventSeverity::Debug,
            TimerEventKind::Fired { .. } => EventSeverity::Trace,
            TimerEventKind::Cancelled => EventSeverity::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "type")]
pub enum TimerEventKind {
    Fired { missed_ticks: u32 },
    Cancelled,
}

// ============================================================================
// Mailbox events
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct MailboxEvent {
    pub timestamp: DateTime<Utc>,
    pub stage_id: StageId,
    pub event_kind: MailboxEventKind,
}

impl MonitoringEvent for MailboxEvent {
    const EVENT_TYPE: &'static str = "mailbox";

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn severity(&self) -> EventSeverity {
        match self.event_kind {
            MailboxEventKind::HighWatermarkReached { .. } => EventSeverity::Warning,
            MailboxEventKind::DrainedBelowLowWatermark { .. } => EventSeverity::Info,
            MailboxEventKind::DrainLimitYielded { .. } => EventSeverity::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "type")]
pub enum MailboxEventKind {
    HighWatermarkReached { depth: usize },
    DrainedBelowLowWatermark { depth: usize },
    DrainLimitYielded { processed: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_created_is_info_severity() {
        let event = StageEvent {
            timestamp: Utc::now(),
            stage_id: StageId::from_raw(1),
            event_kind: StageEventKind::Created { stage_type: "Lobby".into() },
            metadata: HashMap::new(),
        };
        assert_eq!(event.severity(), EventSeverity::Info);
    }

    #[test]
    fn mailbox_overload_is_warning_severity() {
        let event = MailboxEvent {
            timestamp: Utc::now(),
            stage_id: StageId::from_raw(1),
            event_kind: MailboxEventKind::HighWatermarkReached { depth: 10_000 },
        };
        assert_eq!(event.severity(), EventSeverity::Warning);
    }
}
