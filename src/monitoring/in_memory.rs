//! In-memory monitor: lock-free atomic counters plus a bounded ring buffer
//! of recent events, for tests and for any host binary that wants a quick
//! queryable `/debug/monitoring` surface without standing up a full
//! metrics exporter.

// Layer 1: Standard library imports
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

// Layer 3: Internal module imports
use super::error::MonitoringError;
use super::traits::{EventSeverity, Monitor, MonitoringEvent};
use super::types::{MonitoringConfig, MonitoringSnapshot};

struct Inner<E: MonitoringEvent> {
    config: MonitoringConfig,
    total_events: AtomicU64,
    trace_count: AtomicU64,
    debug_count: AtomicU64,
    info_count: AtomicU64,
    warning_count: AtomicU64,
    error_count: AtomicU64,
    critical_count: AtomicU64,
    history: RwLock<VecDeque<E>>,
}

/// Cheaply-cloned monitor (`Arc<Inner>`) that records every event passing
/// its severity filter and retains up to `max_history_size` of them.
pub struct InMemoryMonitor<E: MonitoringEvent> {
    inner: Arc<Inner<E>>,
}

impl<E: MonitoringEvent> InMemoryMonitor<E> {
    pub fn new(config: MonitoringConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                total_events: AtomicU64::new(0),
                trace_count: AtomicU64::new(0),
                debug_count: AtomicU64::new(0),
                info_count: AtomicU64::new(0),
                warning_count: AtomicU64::new(0),
                error_count: AtomicU64::new(0),
                critical_count: AtomicU64::new(0),
                history: RwLock::new(VecDeque::new()),
            }),
        }
    }

    fn bump_severity_counter(&self, severity: EventSeverity) {
        let counter = match severity {
            EventSeverity::Trace => &self.inner.trace_count,
            EventSeverity::Debug => &self.inner.debug_count,
            EventSeverity::Info => &self.inner.info_count,
            EventSeverity::Warning => &self.inner.warning_count,
            EventSeverity::Error => &self.inner.error_count,
            EventSeverity::Critical => &self.inner.critical_count,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl<E: MonitoringEvent> Clone for InMemoryMonitor<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

#[async_trait]
impl<E: MonitoringEvent> Monitor<E> for InMemoryMonitor<E> {
    async fn record(&self, event: E) -> Result<(), MonitoringError> {
        if !self.inner.config.enabled {
            return Ok(());
        }
        let severity = event.severity();
        if severity < self.inner.config.severity_filter {
            return Ok(());
        }
        self.inner.total_events.fetch_add(1, Ordering::Relaxed);
        self.bump_severity_counter(severity);

        let mut history = self.inner.history.write();
        history.push_back(event);
        while history.len() > self.inner.config.max_history_size {
            history.pop_front();
        }
        Ok(())
    }

    async fn snapshot(&self) -> Result<MonitoringSnapshot<E>, MonitoringError> {
        let history = self.inner.history.read();
        Ok(MonitoringSnapshot {
            timestamp: Utc::now(),
            total_events: self.inner.total_events.load(Ordering::Relaxed),
            trace_count: self.inner.trace_count.load(Ordering::Relaxed),
            debug_count: self.inner.debug_count.load(Ordering::Relaxed),
            info_count: self.inner.info_count.load(Ordering::Relaxed),
            warning_count: self.inner.warning_count.load(Ordering::Relaxed),
            error_count: self.inner.error_count.load(Ordering::Relaxed),
            critical_count: self.inner.critical_count.load(Ordering::Relaxed),
            recent_events: history.iter().cloned().collect(),
        })
    }

    async fn reset(&self) -> Result<(), MonitoringError> {
        self.inner.total_events.store(0, Ordering::Relaxed);
        self.inner.trace_count.store(0, Ordering::Relaxed);
        self.inner.debug_count.store(0, Ordering::Relaxed);
        self.inner.info_count.store(0, Ordering::Relaxed);
        self.inner.warning_count.store(0, Ordering::Relaxed);
        self.inner.critical_count.store(0, Ordering::Relaxed);
        self.inner.error_count.store(0, Ordering::Relaxed);
        self.inner.history.write().clear();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::monitoring::types::{StageEvent, StageEventKind};
    use crate::util::ids::StageId;
    use std::collections::HashMap;

    fn event(kind: StageEventKind) -> StageEvent {
        StageEvent { timestamp: Utc::now(), stage_id: StageId::from_raw(1), event_kind: kind, metadata: HashMap::new() }
    }

    #[tokio::test]
    async fn records_and_counts_by_severity() {
        let monitor = InMemoryMonitor::new(MonitoringConfig::default());
        monitor.record(event(StageEventKind::Created { stage_type: "Lobby".into() })).await.unwrap();
        monitor.record(event(StageEventKind::HandlerError { msg_id: "Move".into(), error: "boom".into() })).await.unwrap();

        let snapshot = monitor.snapshot().await.unwrap();
        assert_eq!(snapshot.total_events, 2);
        assert_eq!(snapshot.info_count, 1);
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.recent_events.len(), 2);
    }

    #[tokio::test]
    async fn history_is_bounded_by_max_history_size() {
        let config = MonitoringConfig { max_history_size: 2, ..MonitoringConfig::default() };
        let monitor = InMemoryMonitor::new(config);
        for _ in 0..5 {
            monitor.record(event(StageEventKind::Closed)).await.unwrap();
        }
        let snapshot = monitor.snapshot().await.unwrap();
        assert_eq!(snapshot.total_events, 5);
        assert_eq!(snapshot.recent_events.len(), 2);
    }

    #[tokio::test]
    async fn severity_filter_drops_events_below_threshold() {
        let config = MonitoringConfig { severity_filter: EventSeverity::Error, ..MonitoringConfig::default() };
        let monitor = InMemoryMonitor::new(config);
        monitor.record(event(StageEventKind::Created { stage_type: "Lobby".into() })).await.unwrap();
        let snapshot = monitor.snapshot().await.unwrap();
        assert_eq!(snapshot.total_events, 0);
    }

    #[tokio::test]
    async fn reset_clears_counters_and_history() {
        let monitor = InMemoryMonitor::new(MonitoringConfig::default());
        monitor.record(event(StageEventKind::Closed)).await.unwrap();
        monitor.reset().await.unwrap();
        let snapshot = monitor.snapshot().await.unwrap();
        assert_eq!(snapshot.total_events, 0);
        assert!(snapshot.recent_events.is_empty());
    }
}
