//! Structured event recording for the components already instrumented with
//! `tracing` (stage lifecycle, actor lifecycle, session lifecycle, timer
//! fires, mailbox backpressure), generalized behind a `Monitor<E>` seam so
//! a host binary can swap a `NoopMonitor` for an `InMemoryMonitor` (or its
//! own exporter) without touching call sites.

pub mod error;
pub mod in_memory;
pub mod noop;
pub mod traits;
pub mod types;

pub use error::MonitoringError;
pub use in_memory::InMemoryMonitor;
pub use noop::NoopMonitor;
pub use traits::{EventSeverity, Monitor, MonitoringEvent};
pub use types::{
    ActorEvent, ActorEventKind, MailboxEvent, MailboxEventKind, MonitoringConfig,
    MonitoringSnapshot, SessionEvent, SessionEventKind, StageEvent, StageEventKind, TimerEvent,
    TimerEventKind,
};
