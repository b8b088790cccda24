//! No-operation monitor: the default when a caller doesn't need recorded
//! history, with every method trivially inlined away.

// Layer 1: Standard library imports
use std::marker::PhantomData;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use chrono::Utc;

// Layer 3: Internal module imports
use super::error::MonitoringError;
use super::traits::{Monitor, MonitoringEvent};
use super::types::MonitoringSnapshot;

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMonitor<E: MonitoringEvent> {
    _phantom: PhantomData<E>,
}

impl<E: MonitoringEvent> NoopMonitor<E> {
    #[inline(always)]
    pub fn new() -> Self {
        Self { _phantom: PhantomData }
    }
}

#[async_trait]
impl<E: MonitoringEvent> Monitor<E> for NoopMonitor<E> {
    #[inline(always)]
    async fn record(&self, _event: E) -> Result<(), MonitoringError> {
        Ok(())
    }

    #[inline(always)]
    async fn snapshot(&self) -> Result<MonitoringSnapshot<E>, MonitoringError> {
        Ok(MonitoringSnapshot {
            timestamp: Utc::now(),
            total_events: 0,
            trace_count: 0,
            debug_count: 0,
            info_count: 0,
            warning_count: 0,
            error_count: 0,
            critical_count: 0,
            recent_events: Vec::new(),
        })
    }

    #[inline(always)]
    async fn reset(&self) -> Result<(), MonitoringError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::monitoring::types::{StageEventKind, StageEvent};
    use crate::util::ids::StageId;
    use std::collections::HashMap;

    fn event() -> StageEvent {
        StageEvent {
            timestamp: Utc::now(),
            stage_id: StageId::from_raw(1),
            event_kind: StageEventKind::Closed,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn record_and_snapshot_stay_empty() {
        let monitor = NoopMonitor::<StageEvent>::new();
        for _ in 0..10 {
            monitor.record(event()).await.unwrap();
        }
        let snapshot = monitor.snapshot().await.unwrap();
        assert_eq!(snapshot.total_events, 0);
        assert!(snapshot.recent_events.is_empty());
    }
}
