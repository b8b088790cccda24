//! Bounded producer/consumer queue over `tokio::sync::mpsc`.
//!
//! Used for the Session send queue (§4.2): many stages may broadcast into
//! one session (multi-producer), and the session's transport writer is the
//! sole consumer. The overflow *policy* (drop-oldest vs. close) is decided
//! by the caller per §4.2's distinction between ordinary and reply
//! packets — this type only exposes `try_send`'s bare full/closed outcome
//! and a `force_send` used to implement drop-oldest at the call site.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use tokio::sync::mpsc;

// Layer 3: Internal module imports
use crate::mailbox::traits::{QueueCapacity, QueueError, QueueReceiver, QueueSender, TryRecvError};

/// Create a bounded channel pair with the given capacity.
pub fn bounded<T: Send + 'static>(capacity: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        BoundedSender { tx, capacity },
        BoundedReceiver { rx },
    )
}

#[derive(Clone)]
pub struct BoundedSender<T> {
    tx: mpsc::Sender<T>,
    capacity: usize,
}

impl<T: Send + 'static> BoundedSender<T> {
    pub fn capacity(&self) -> QueueCapacity {
        QueueCapacity::Bounded(self.capacity)
    }
}

#[async_trait]
impl<T: Send + 'static> QueueSender<T> for BoundedSender<T> {
    async fn send(&self, item: T) -> Result<(), QueueError> {
        self.tx.send(item).await.map_err(|_| QueueError::Closed)
    }

    fn try_send(&self, item: T) -> Result<(), QueueError> {
        use mpsc::error::TrySendError;
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(QueueError::Full),
            Err(TrySendError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct BoundedReceiver<T> {
    rx: mpsc::Receiver<T>,
}

#[async_trait]
impl<T: Send + 'static> QueueReceiver<T> for BoundedReceiver<T> {
    async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    fn try_recv(&mut self) -> Result<T, TryRecvError> {
        use mpsc::error::TryRecvError as TokioTryRecvError;
        match self.rx.try_recv() {
            Ok(item) => Ok(item),
            Err(TokioTryRecvError::Empty) => Err(TryRecvError::Empty),
            Err(TokioTryRecvError::Disconnected) => Err(TryRecvError::Disconnected),
        }
    }

    fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_then_recv_roundtrips() {
        let (tx, mut rx) = bounded::<u32>(4);
        tx.send(7).await.unwrap();
        assert_eq!(rx.recv().await, Some(7));
    }

    #[tokio::test]
    async fn try_send_reports_full() {
        let (tx, _rx) = bounded::<u32>(1);
        tx.try_send(1).unwrap();
        let err = tx.try_send(2).unwrap_err();
        assert_eq!(err, QueueError::Full);
    }

    #[tokio::test]
    async fn dropping_receiver_closes_sender() {
        let (tx, rx) = bounded::<u32>(1);
        drop(rx);
        assert!(tx.is_closed());
        assert_eq!(tx.send(1).await.unwrap_err(), QueueError::Closed);
    }

    #[tokio::test]
    async fn multi_producer_single_consumer_fans_in() {
        let (tx, mut rx) = bounded::<u32>(16);
        let tx2 = tx.clone();
        tx.send(1).await.unwrap();
        tx2.send(2).await.unwrap();
        let mut got = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        got.sort_unstable();
        assert_eq!(got, vec![1, 2]);
    }
}
