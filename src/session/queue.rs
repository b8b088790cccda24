//! Bounded outbound queue with an §4.2 overflow policy: drop the oldest
//! queued packet for ordinary traffic, refuse (and thereby force a
//! session close) for reply packets, since a silently lost reply is a
//! protocol fatal.
//!
//! Built directly on a `parking_lot::Mutex<VecDeque<_>>` plus a `Notify`
//! rather than `tokio::sync::mpsc`, because `mpsc` has no way to evict the
//! oldest queued item — the drop-oldest half of the policy requires that.
//! Multi-producer (many stages may broadcast into one session, §5) /
//! single-consumer (the session's transport writer) access is safe because
//! the lock is only ever held for the O(1) push/pop, never across an await.

// Layer 1: Standard library imports
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use parking_lot::Mutex;
use tokio::sync::Notify;

// Layer 3: Internal module imports
use crate::error::SessionError;
use crate::util::ids::SessionId;
use crate::wire::Packet;

/// Default send queue capacity (§4.2).
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// A session's outbound packet queue.
pub struct OutboundQueue {
    session_id: SessionId,
    inner: Mutex<VecDeque<Packet>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl OutboundQueue {
    pub fn new(session_id: SessionId, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push a packet, applying the overflow policy when the queue is at
    /// capacity. Returns `Err` when the queue is already closed, or when a
    /// reply packet could not be enqueued because the queue was full (the
    /// caller MUST treat that as a protocol fatal and close the session).
    pub fn push(&self, packet: Packet) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::QueueClosed(self.session_id));
        }
        let mut guard = self.inner.lock();
        if guard.len() >= self.capacity {
            if packet.msg_seq() != 0 {
                drop(guard);
                self.close();
                return Err(SessionError::QueueClosed(self.session_id));
            }
            guard.pop_front();
        }
        guard.push_back(packet);
        drop(guard);
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for and pop the next packet. Returns `None` once the queue is
    /// closed and drained.
    pub async fn pop(&self) -> Option<Packet> {
        loop {
            {
                let mut guard = self.inner.lock();
                if let Some(packet) = guard.pop_front() {
                    return Some(packet);
                }
                if self.is_closed() {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}
