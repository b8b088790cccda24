//! Core monitoring traits: a generic `Monitor<E>` observing any event type
//! that implements `MonitoringEvent`.

// Layer 1: Standard library imports
use std::fmt::Debug;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

// Layer 3: Internal module imports
use super::error::MonitoringError;
use super::types::MonitoringSnapshot;

/// Event severity, ordered lowest to highest for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum EventSeverity {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// An event type a [`Monitor`] can record.
pub trait MonitoringEvent: Send + Sync + Clone + Debug + Serialize + 'static {
    /// Static event type identifier for categorization.
    const EVENT_TYPE: &'static str;

    fn timestamp(&self) -> DateTime<Utc>;

    fn severity(&self) -> EventSeverity;
}

/// Generic monitoring sink for one event type.
///
/// Every stage/actor/session/timer/mailbox event this crate emits flows
/// through one of these, generic over the concrete event type so a caller
/// can plug in [`NoopMonitor`](super::noop::NoopMonitor) in production and
/// [`InMemoryMonitor`](super::in_memory::InMemoryMonitor) in tests without
/// touching call sites.
#[async_trait]
pub trait Monitor<E: MonitoringEvent>: Send + Sync {
    async fn record(&self, event: E) -> Result<(), MonitoringError>;

    async fn snapshot(&self) -> Result<MonitoringSnapshot<E>, MonitoringError>;

    async fn reset(&self) -> Result<(), MonitoringError>;
}
