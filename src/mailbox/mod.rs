//! Mailbox primitives: the generic bounded queue used for Session send
//! queues, and the lock-free Stage Mailbox described in §4.5.

pub mod backpressure;
pub mod bounded;
pub mod stage;
pub mod traits;

pub use backpressure::Backpressure;
pub use bounded::{bounded, BoundedReceiver, BoundedSender};
pub use stage::{EntryProcessor, StageMailbox};
pub use traits::{OverflowPolicy, QueueCapacity, QueueError, QueueReceiver, QueueSender, TryRecvError};
