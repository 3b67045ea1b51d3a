use crate::core::completion::Completion;
use crate::core::queue::{QueueItem, WorkQueue};
use crate::logging::{log, LogLevel};
use crate::model::product::NormalizedProduct;
use crate::storage::ProductStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistSummary {
    pub batches_flushed: usize,
    pub batches_failed: usize,
    pub rows_written: u64,
    pub rows_dropped: usize,
}

/// The single writer. Nothing else touches the store while a run is active.
pub struct PersistStage {
    pub products: WorkQueue<NormalizedProduct>,
    /// Receives one `Stop` after the final flush, when names are collected.
    pub names: Option<WorkQueue<QueueItem<String>>>,
    pub store: Arc<dyn ProductStore>,
    pub completion: Arc<Completion>,
    pub batch_size: usize,
    pub poll_interval: Duration,
    /// Extra attempts for a failed flush; 0 drops the batch on first failure.
    pub flush_retries: u32,
    pub retry_delay: Duration,
}

impl PersistStage {
    pub async fn run(self) -> PersistSummary {
        let mut summary = PersistSummary::default();
        let mut batch: Vec<NormalizedProduct> = Vec::with_capacity(self.batch_size);

        loop {
            match self.products.pop_timeout(self.poll_interval).await {
                Some(product) => {
                    batch.push(product);
                    if batch.len() >= self.batch_size {
                        self.flush(&mut batch, &mut summary).await;
                    }
                }
                None => {
                    if self.completion.upstream_finished() {
                        break;
                    }
                }
            }
        }

        // Products can land between the last timeout and the check above.
        while let Some(product) = self.products.try_pop().await {
            batch.push(product);
            if batch.len() >= self.batch_size {
                self.flush(&mut batch, &mut summary).await;
            }
        }
        if !batch.is_empty() {
            self.flush(&mut batch, &mut summary).await;
        }

        if let Some(names) = &self.names {
            names.push(QueueItem::Stop);
        }

        let level = if summary.batches_failed > 0 {
            LogLevel::Warning
        } else {
            LogLevel::Success
        };
        log(
            level,
            &format!(
                "Persistence finished: {} batch(es) flushed, {} row(s) written, {} batch(es) / {} row(s) dropped.",
                summary.batches_flushed,
                summary.rows_written,
                summary.batches_failed,
                summary.rows_dropped
            ),
        );
        summary
    }

    /// Writes `batch` in one transaction and clears it whether or not the
    /// write eventually succeeded.
    async fn flush(&self, batch: &mut Vec<NormalizedProduct>, summary: &mut PersistSummary) {
        let attempts = self.flush_retries + 1;
        for attempt in 1..=attempts {
            match self.store.upsert_batch(batch.as_slice()).await {
                Ok(rows) => {
                    summary.batches_flushed += 1;
                    summary.rows_written += rows;
                    self.completion.record_saved(rows as usize);
                    log(
                        LogLevel::Info,
                        &format!("Flushed batch of {} product(s) ({} distinct).", batch.len(), rows),
                    );
                    batch.clear();
                    return;
                }
                Err(e) => {
                    log(
                        LogLevel::Error,
                        &format!(
                            "Flush of {} product(s) failed (Try {}/{}): {}",
                            batch.len(),
                            attempt,
                            attempts,
                            e
                        ),
                    );
                    if attempt < attempts {
                        sleep(self.retry_delay).await;
                    }
                }
            }
        }

        log(
            LogLevel::Warning,
            &format!("Dropping batch of {} product(s).", batch.len()),
        );
        summary.batches_failed += 1;
        summary.rows_dropped += batch.len();
        batch.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult};
    use crate::storage::{DiscountRow, MemoryProductStore, PriceColumn, PricedRow};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn product(id: usize) -> NormalizedProduct {
        NormalizedProduct::new(
            id.to_string(),
            format!("Item {}", id),
            None,
            None,
            String::new(),
            "u".into(),
        )
    }

    fn stage(
        store: Arc<dyn ProductStore>,
        completion: Arc<Completion>,
        batch_size: usize,
        flush_retries: u32,
    ) -> PersistStage {
        PersistStage {
            products: WorkQueue::new(),
            names: Some(WorkQueue::new()),
            store,
            completion,
            batch_size,
            poll_interval: Duration::from_millis(10),
            flush_retries,
            retry_delay: Duration::from_secs(2),
        }
    }

    /// Fails the first `failures` flushes, then behaves like the memory store.
    struct FlakyStore {
        failures: AtomicUsize,
        inner: MemoryProductStore,
    }

    #[async_trait]
    impl ProductStore for FlakyStore {
        async fn ensure_schema(&self) -> AppResult<()> {
            Ok(())
        }
        async fn upsert_batch(&self, rows: &[NormalizedProduct]) -> AppResult<u64> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(AppError::Database("connection reset".into()));
            }
            self.inner.upsert_batch(rows).await
        }
        async fn row_count(&self) -> AppResult<i64> {
            self.inner.row_count().await
        }
        async fn top_discounts(&self, limit: i64) -> AppResult<Vec<DiscountRow>> {
            self.inner.top_discounts(limit).await
        }
        async fn max_price(&self, column: PriceColumn) -> AppResult<Option<PricedRow>> {
            self.inner.max_price(column).await
        }
        async fn storage_size_bytes(&self) -> AppResult<Option<i64>> {
            self.inner.storage_size_bytes().await
        }
    }

    #[tokio::test]
    async fn consumer_waits_for_both_completion_conditions() {
        let store = Arc::new(MemoryProductStore::new());
        let completion = Arc::new(Completion::new(1, 1, Duration::ZERO));
        let st = stage(store.clone(), completion.clone(), 100, 0);
        let products = st.products.clone();
        let names = st.names.clone().unwrap();

        let handle = tokio::spawn(st.run());
        products.push(product(1));
        products.push(product(2));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!handle.is_finished());

        completion.parse_worker_exited();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!handle.is_finished(), "fetch workers have not all reported");

        products.push(product(3));
        completion.fetch_worker_finished();

        let summary = handle.await.unwrap();
        assert_eq!(summary.rows_written, 3);
        assert_eq!(summary.batches_flushed, 1);
        assert_eq!(store.row_count().await.unwrap(), 3);
        assert_eq!(names.try_pop().await, Some(QueueItem::Stop));
    }

    #[tokio::test]
    async fn full_batches_flush_before_remainder() {
        let store = Arc::new(MemoryProductStore::new());
        let completion = Arc::new(Completion::new(1, 1, Duration::ZERO));
        completion.parse_worker_exited();
        completion.fetch_worker_finished();

        let st = stage(store.clone(), completion.clone(), 2, 0);
        for i in 0..5 {
            st.products.push(product(i));
        }
        let summary = st.run().await;

        assert_eq!(summary.batches_flushed, 3);
        assert_eq!(summary.rows_written, 5);
        assert_eq!(store.batches_written(), 3);
        assert_eq!(completion.snapshot().progress.rows_saved, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flush_is_retried_when_configured() {
        let store = Arc::new(FlakyStore {
            failures: AtomicUsize::new(1),
            inner: MemoryProductStore::new(),
        });
        let completion = Arc::new(Completion::new(1, 1, Duration::ZERO));
        completion.parse_worker_exited();
        completion.fetch_worker_finished();

        let st = stage(store.clone(), completion, 10, 1);
        st.products.push(product(1));
        let summary = st.run().await;

        assert_eq!(summary.batches_flushed, 1);
        assert_eq!(summary.batches_failed, 0);
        assert_eq!(store.row_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_flush_is_dropped_by_default() {
        let store = Arc::new(FlakyStore {
            failures: AtomicUsize::new(1),
            inner: MemoryProductStore::new(),
        });
        let completion = Arc::new(Completion::new(1, 1, Duration::ZERO));
        completion.parse_worker_exited();
        completion.fetch_worker_finished();

        let st = stage(store.clone(), completion, 10, 0);
        st.products.push(product(1));
        st.products.push(product(2));
        let summary = st.run().await;

        assert_eq!(summary.batches_failed, 1);
        assert_eq!(summary.rows_dropped, 2);
        assert_eq!(store.row_count().await.unwrap(), 0);
    }
}
