//! Stage mailbox backpressure (§5): high/low watermark tracking used to
//! decide when inbound client packets should be rejected with
//! `StageOverloaded` and when a throttled session may resume reading.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicUsize, Ordering};

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
// (none)

/// Default high watermark: mailbox depth at which new client packets are
/// rejected (§5).
pub const DEFAULT_HIGH_WATERMARK: usize = 10_000;

/// Default low watermark, expressed as a fraction of the high watermark, at
/// which a throttled session is allowed to resume (§5).
pub const DEFAULT_LOW_WATERMARK_RATIO: f64 = 0.7;

/// Tracks a single stage mailbox's depth against its watermarks.
///
/// Only `ClientPacket` entries count against the watermark; system
/// packets and timer ticks are exempt per §5 ("System packets and timer
/// ticks are never throttled").
#[derive(Debug)]
pub struct Backpressure {
    depth: AtomicUsize,
    high_watermark: usize,
    low_watermark: usize,
}

impl Backpressure {
    pub fn new(high_watermark: usize) -> Self {
        let low_watermark = (high_watermark as f64 * DEFAULT_LOW_WATERMARK_RATIO) as usize;
        Self {
            depth: AtomicUsize::new(0),
            high_watermark,
            low_watermark,
        }
    }

    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn high_watermark(&self) -> usize {
        self.high_watermark
    }

    pub fn low_watermark(&self) -> usize {
        self.low_watermark
    }

    /// Would enqueuing one more countable entry exceed the high watermark?
    pub fn would_overload(&self) -> bool {
        self.current_depth() >= self.high_watermark
    }

    /// Has depth drained back to (or below) the low watermark? Used to
    /// decide whether a throttled session may resume reads.
    pub fn has_drained(&self) -> bool {
        self.current_depth() <= self.low_watermark
    }

    pub fn increment(&self) {
        self.depth.fetch_add(1, Ordering::AcqRel);
    }

    pub fn decrement(&self) {
        self.depth.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn overload_trips_at_high_watermark() {
        let bp = Backpressure::new(10);
        for _ in 0..9 {
            bp.increment();
        }
        assert!(!bp.would_overload());
        bp.increment();
        assert!(bp.would_overload());
    }

    #[test]
    fn drain_releases_at_low_watermark() {
        let bp = Backpressure::new(100);
        for _ in 0..100 {
            bp.increment();
        }
        assert!(!bp.has_drained());
        for _ in 0..30 {
            bp.decrement();
        }
        assert!(bp.has_drained(), "depth 70 should be at/under 70% low watermark");
    }
}
