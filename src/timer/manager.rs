//! Timer Manager (§4.8): schedules one-shot, count and repeat timers and
//! delivers ticks as mailbox entries on their owning stage.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use crate::timer::error::TimerError;
use crate::timer::record::{TimerKind, TimerRecord};
use crate::util::ids::{IdGenerator, StageId, TimerId};

/// Receives delivered ticks. The Stage Runtime implements this to turn a
/// tick into a `TimerTick` mailbox entry; the Timer Manager itself has no
/// notion of mailboxes or stages beyond this seam.
pub trait TimerSink: Send + Sync {
    /// `missed_ticks` is `>= 1` when the manager coalesced one or more
    /// nominally-elapsed periods into this single delivery (§4.8 Drift).
    fn deliver_tick(&self, timer_id: TimerId, missed_ticks: u32);
}

struct Handle {
    record: parking_lot::Mutex<TimerRecord>,
    stop: AtomicBool,
    /// Set when a tick has been handed to the sink but not yet acked via
    /// `TimerManager::ack`. While set, the schedule loop withholds further
    /// deliveries instead of queuing a burst; `next_fire_at` stays frozen
    /// so the eventual resumed delivery's overdue calculation coalesces
    /// every period that elapsed while the mailbox was busy (§4.8).
    in_flight: AtomicBool,
}

/// Process-wide singleton (per §9 Design Notes: "construct them at
/// startup, pass them by reference into every collaborator").
pub struct TimerManager {
    ids: IdGenerator,
    handles: DashMap<TimerId, Arc<Handle>>,
    sinks: DashMap<StageId, Arc<dyn TimerSink>>,
}

impl TimerManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ids: IdGenerator::new(),
            handles: DashMap::new(),
            sinks: DashMap::new(),
        })
    }

    /// Register the sink a stage's timers should deliver into. Called once
    /// when a Stage becomes Active.
    pub fn register_stage(&self, stage_id: StageId, sink: Arc<dyn TimerSink>) {
        self.sinks.insert(stage_id, sink);
    }

    /// Stop delivering for a stage and cancel any timers it still owns.
    /// Called during `DestroyStage`.
    pub fn unregister_stage(&self, stage_id: StageId) {
        self.sinks.remove(&stage_id);
        let owned: Vec<TimerId> = self
            .handles
            .iter()
            .filter(|entry| entry.value().record.lock().owner_stage_id == stage_id)
            .map(|entry| *entry.key())
            .collect();
        for id in owned {
            let _ = self.cancel(id);
        }
    }

    pub fn add_repeat(self: &Arc<Self>, owner_stage_id: StageId, initial_delay: Duration, period: Duration) -> TimerId {
        self.schedule(owner_stage_id, TimerKind::Repeat, initial_delay, period, None)
    }

    pub fn add_count(
        self: &Arc<Self>,
        owner_stage_id: StageId,
        initial_delay: Duration,
        period: Duration,
        count: u64,
    ) -> TimerId {
        self.schedule(owner_stage_id, TimerKind::Count, initial_delay, period, Some(count))
    }

    pub fn add_once(self: &Arc<Self>, owner_stage_id: StageId, delay: Duration) -> TimerId {
        self.schedule(owner_stage_id, TimerKind::OneShot, delay, Duration::ZERO, Some(1))
    }

    pub fn cancel(&self, timer_id: TimerId) -> Result<(), TimerError> {
        let handle = self.handles.get(&timer_id).ok_or(TimerError::NotFound(timer_id))?;
        let mut record = handle.record.lock();
        if record.cancelled {
            return Err(TimerError::AlreadyCancelled(timer_id));
        }
        record.cancelled = true;
        handle.stop.store(true, Ordering::Release);
        Ok(())
    }

    pub fn has(&self, timer_id: TimerId) -> bool {
        self.handles
            .get(&timer_id)
            .map(|h| !h.record.lock().cancelled)
            .unwrap_or(false)
    }

    /// Acknowledge that the tick most recently delivered for `timer_id` has
    /// finished running in its stage. Called by the Stage Runtime once
    /// `on_timer` returns. A no-op if the timer has since been cancelled,
    /// exhausted or cancelled-and-removed — there is nothing left to ack.
    pub fn ack(&self, timer_id: TimerId) {
        if let Some(handle) = self.handles.get(&timer_id) {
            handle.in_flight.store(false, Ordering::Release);
        }
    }

    fn schedule(
        self: &Arc<Self>,
        owner_stage_id: StageId,
        kind: TimerKind,
        initial_delay: Duration,
        period: Duration,
        remaining: Option<u64>,
    ) -> TimerId {
        let timer_id = TimerId::from_raw(self.ids.next());
        let record = TimerRecord {
            timer_id,
            owner_stage_id,
            kind,
            period,
            remaining,
            next_fire_at: Utc::now() + chrono::Duration::from_std(initial_delay).unwrap_or_default(),
            cancelled: false,
        };
        let handle = Arc::new(Handle {
            record: parking_lot::Mutex::new(record),
            stop: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
        });
        self.handles.insert(timer_id, Arc::clone(&handle));

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.run_timer(timer_id, handle, initial_delay).await;
        });

        timer_id
    }

    async fn run_timer(self: Arc<Self>, timer_id: TimerId, handle: Arc<Handle>, initial_delay: Duration) {
        tokio::time::sleep(initial_delay).await;
        loop {
            if handle.stop.load(Ordering::Acquire) {
                break;
            }

            let (owner_stage_id, period, is_one_shot, exhausted) = {
                let mut record = handle.record.lock();
                if record.cancelled {
                    break;
                }

                if handle.in_flight.load(Ordering::Acquire) {
                    // The last delivered tick hasn't been acked yet: the
                    // mailbox is still busy with it (or an earlier entry).
                    // Leave `next_fire_at` untouched so the overdue amount
                    // keeps growing; the next non-skipped iteration folds
                    // every period that elapsed here into one `missed`
                    // count instead of queuing a tick per period.
                    let exhausted = record.is_exhausted();
                    (record.owner_stage_id, record.period, matches!(record.kind, TimerKind::OneShot), exhausted)
                } else {
                    // Drift coalescing: compare the wall clock against the
                    // nominal schedule rather than always sleeping `period`,
                    // so a delayed wakeup collapses into one delivery instead
                    // of a burst.
                    let now = Utc::now();
                    let mut missed: u32 = 0;
                    if !record.period.is_zero() {
                        let overdue = now.signed_duration_since(record.next_fire_at);
                        if overdue.num_milliseconds() > 0 {
                            let period_ms = record.period.as_millis().max(1) as i64;
                            missed = (overdue.num_milliseconds() / period_ms) as u32;
                        }
                    }

                    if let Some(remaining) = record.remaining.as_mut() {
                        let consumed = (missed as u64 + 1).min(*remaining);
                        *remaining -= consumed;
                        missed = (consumed - 1) as u32;
                    }

                    record.next_fire_at = now
                        + chrono::Duration::from_std(record.period).unwrap_or_default()
                            * (missed as i32 + 1);

                    if let Some(sink) = self.sinks.get(&record.owner_stage_id) {
                        handle.in_flight.store(true, Ordering::Release);
                        sink.deliver_tick(timer_id, missed);
                    } else {
                        debug!(%timer_id, "no sink registered for stage, dropping tick");
                    }

                    let exhausted = record.is_exhausted();
                    (record.owner_stage_id, record.period, matches!(record.kind, TimerKind::OneShot), exhausted)
                }
            };

            if is_one_shot || exhausted {
                handle.stop.store(true, Ordering::Release);
                break;
            }
            let _ = owner_stage_id;
            if period.is_zero() {
                warn!(%timer_id, "repeat timer has zero period, stopping to avoid a busy loop");
                break;
            }
            tokio::time::sleep(period).await;
        }

        self.handles.remove(&timer_id);
    }
}
