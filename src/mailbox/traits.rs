//! Generic mailbox traits shared by the bounded Session send queue and any
//! other simple producer/consumer queue in the crate. The Stage Mailbox
//! proper (§4.5) has its own, much more specific, lock-free implementation
//! in `mailbox::stage` and does not implement these traits — it is driven
//! by its own worker loop rather than polled by a generic consumer.

// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use thiserror::Error;

// Layer 3: Internal module imports
// (none)

/// Capacity policy for a bounded queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueCapacity {
    Bounded(usize),
    Unbounded,
}

/// What happens to a new item when a bounded queue is already full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Drop the oldest queued item to make room (used for ordinary
    /// outbound packets, §4.2).
    #[default]
    DropOldest,
    /// Reject the new item and close the queue (used for reply packets,
    /// where a silently lost reply would be a protocol-level bug, §4.2).
    Close,
}

/// Errors common to queue send/receive operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
    #[error("queue is full and overflow policy forbids dropping")]
    Full,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TryRecvError {
    #[error("queue is empty")]
    Empty,
    #[error("queue is closed and drained")]
    Disconnected,
}

/// A producer handle onto a queue.
#[async_trait]
pub trait QueueSender<T: Send>: Send + Sync {
    async fn send(&self, item: T) -> Result<(), QueueError>;
    fn try_send(&self, item: T) -> Result<(), QueueError>;
    fn is_closed(&self) -> bool;
}

/// A single consumer handle onto a queue.
#[async_trait]
pub trait QueueReceiver<T: Send>: Send {
    async fn recv(&mut self) -> Option<T>;
    fn try_recv(&mut self) -> Result<T, TryRecvError>;
    fn close(&mut self);
}

impl fmt::Display for QueueCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded(n) => write!(f, "bounded({n})"),
            Self::Unbounded => write!(f, "unbounded"),
        }
    }
}
