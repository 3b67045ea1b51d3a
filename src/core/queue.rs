use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

/// Item on a queue whose consumers stop on an explicit sentinel rather than
/// on emptiness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueItem<T> {
    Data(T),
    Stop,
}

/// Unbounded multi-producer, multi-consumer FIFO. Consumers share the
/// receiver behind an async mutex; one consumer waits on the channel at a
/// time and releases it as soon as an item arrives.
///
/// The queue keeps its own sender alive, so it never reports closure; a pop
/// returns `None` only on timeout or (for `try_pop`) when empty.
pub struct WorkQueue<T> {
    tx: mpsc::UnboundedSender<T>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<T>>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        WorkQueue {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        WorkQueue {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    pub fn push(&self, item: T) {
        // The receiver lives as long as `self`, so send cannot fail here.
        let _ = self.tx.send(item);
    }

    pub async fn pop(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    pub async fn pop_timeout(&self, wait: Duration) -> Option<T> {
        timeout(wait, self.pop()).await.ok().flatten()
    }

    pub async fn try_pop(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        rx.try_recv().ok()
    }
}
