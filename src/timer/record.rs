//! `TimerRecord` (§3, §4.8).

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};

// Layer 3: Internal module imports
use crate::util::ids::{StageId, TimerId};

/// What kind of schedule a timer follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Fires forever at `period` until cancelled.
    Repeat,
    /// Fires `count` more times at `period`, then retires itself.
    Count,
    /// Fires exactly once after `initial_delay`.
    OneShot,
}

/// A scheduled timer, owned by the Timer Manager and referenced by its
/// owning stage's `timer_set`.
#[derive(Debug, Clone)]
pub struct TimerRecord {
    pub timer_id: TimerId,
    pub owner_stage_id: StageId,
    pub kind: TimerKind,
    pub period: Duration,
    pub remaining: Option<u64>,
    pub next_fire_at: DateTime<Utc>,
    pub cancelled: bool,
}

impl TimerRecord {
    pub fn is_exhausted(&self) -> bool {
        matches!(self.kind, TimerKind::Count) && self.remaining == Some(0)
    }
}
