use crate::model::common::CategoryId;
use crate::model::product::FetchTask;
use crate::utils::lock_or_recover;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Ordered supply of fetch tasks. Category ids are known up front; names are
/// streamed in by a loader after the fetch workers are already running and
/// the stream is closed once the loader is done.
pub struct TaskSource {
    ids: Mutex<VecDeque<FetchTask>>,
    names_tx: Mutex<Option<mpsc::UnboundedSender<FetchTask>>>,
    names_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FetchTask>>,
}

impl TaskSource {
    pub fn new(category_ids: impl IntoIterator<Item = CategoryId>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        TaskSource {
            ids: Mutex::new(category_ids.into_iter().map(FetchTask::by_id).collect()),
            names_tx: Mutex::new(Some(tx)),
            names_rx: tokio::sync::Mutex::new(rx),
        }
    }

    pub fn try_take_id(&self) -> Option<FetchTask> {
        lock_or_recover(&self.ids).pop_front()
    }

    /// Waits up to `wait` for the next name task. `None` means nothing arrived
    /// in time, or the stream is closed and drained. The window starts once
    /// this caller holds the receiver, not while it queues behind another.
    pub async fn take_name(&self, wait: Duration) -> Option<FetchTask> {
        let mut rx = self.names_rx.lock().await;
        timeout(wait, rx.recv()).await.ok().flatten()
    }

    /// Returns `false` once the name stream has been closed.
    pub fn push_name<S: Into<String>>(&self, name: S) -> bool {
        match lock_or_recover(&self.names_tx).as_ref() {
            Some(tx) => tx.send(FetchTask::by_name(name)).is_ok(),
            None => false,
        }
    }

    pub fn close_names(&self) {
        lock_or_recover(&self.names_tx).take();
    }
}
