use crate::core::completion::Completion;
use crate::core::queue::{QueueItem, WorkQueue};
use crate::logging::{log, LogLevel};
use crate::model::product::{NormalizedProduct, ParsedPage, RawPage};
use crate::transform::product::parse_products;
use crate::utils::run_cpu_intensive;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseWorkerStats {
    pub pages: usize,
    pub products: usize,
    pub skipped_records: usize,
}

pub struct ParseStage {
    pub pages: WorkQueue<QueueItem<RawPage>>,
    pub products: WorkQueue<NormalizedProduct>,
    /// Present only when taxonomy names are being collected.
    pub names: Option<WorkQueue<QueueItem<String>>>,
    pub completion: Arc<Completion>,
}

impl ParseStage {
    /// Consumes raw pages until it receives its `Stop`. An empty queue is
    /// not a reason to exit: fetch workers may still be producing.
    pub async fn run_worker(self: Arc<Self>, worker_id: usize) -> ParseWorkerStats {
        let mut stats = ParseWorkerStats::default();

        loop {
            match self.pages.pop().await {
                Some(QueueItem::Data(page)) => self.handle_page(page, &mut stats).await,
                Some(QueueItem::Stop) | None => break,
            }
        }

        if self.completion.parse_worker_exited() {
            log(
                LogLevel::Success,
                &format!(
                    "All {} parse worker(s) exited; parsing complete.",
                    self.completion.parse_workers()
                ),
            );
        }
        log(
            LogLevel::Info,
            &format!(
                "Parse worker {} exited: {} page(s), {} product(s), {} skipped record(s).",
                worker_id, stats.pages, stats.products, stats.skipped_records
            ),
        );
        stats
    }

    async fn handle_page(&self, page: RawPage, stats: &mut ParseWorkerStats) {
        let label = format!("{} page {}", page.task, page.page_number);
        let parsed = match run_cpu_intensive(move || parse_products(page.product_records())).await {
            Ok(parsed) => parsed,
            Err(e) => {
                log(
                    LogLevel::Error,
                    &format!("Parsing {} failed: {:?}", label, e),
                );
                ParsedPage::default()
            }
        };

        stats.pages += 1;
        stats.products += parsed.products.len();
        stats.skipped_records += parsed.skipped_records;
        self.completion
            .record_parsed(parsed.products.len(), parsed.skipped_records);

        for product in parsed.products {
            self.products.push(product);
        }
        if let Some(names) = &self.names {
            for name in parsed.taxonomy_names {
                names.push(QueueItem::Data(name));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::product::FetchTask;
    use serde_json::json;
    use std::time::Duration;

    fn page(key: u64, uids: &[&str]) -> RawPage {
        let products: Vec<_> = uids
            .iter()
            .map(|uid| json!({"product_uid": uid, "categories": [{"name": "Bakery"}]}))
            .collect();
        RawPage::new(FetchTask::by_id(key), 1, json!({ "products": products }))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn each_stop_retires_one_worker_and_no_page_is_lost() {
        const WORKERS: usize = 3;
        let stage = Arc::new(ParseStage {
            pages: WorkQueue::new(),
            products: WorkQueue::new(),
            names: Some(WorkQueue::new()),
            completion: Arc::new(Completion::new(1, WORKERS, Duration::ZERO)),
        });

        for i in 0..40u64 {
            stage.pages.push(QueueItem::Data(page(i, &["a", "b"])));
        }
        for _ in 0..WORKERS {
            stage.pages.push(QueueItem::Stop);
        }

        let handles: Vec<_> = (0..WORKERS)
            .map(|i| tokio::spawn(stage.clone().run_worker(i)))
            .collect();
        let mut total_pages = 0;
        for h in handles {
            total_pages += h.await.unwrap().pages;
        }

        assert_eq!(total_pages, 40);
        let snap = stage.completion.snapshot();
        assert_eq!(snap.parse_workers_exited, WORKERS);
        assert!(snap.parsing_complete);
        assert_eq!(snap.progress.products_parsed, 80);

        let mut products = 0;
        while stage.products.try_pop().await.is_some() {
            products += 1;
        }
        assert_eq!(products, 80);

        let names = stage.names.as_ref().unwrap();
        let mut name_count = 0;
        while let Some(QueueItem::Data(name)) = names.try_pop().await {
            assert_eq!(name, "Bakery");
            name_count += 1;
        }
        assert_eq!(name_count, 80);
    }

    #[tokio::test]
    async fn page_without_products_array_counts_but_yields_nothing() {
        let stage = Arc::new(ParseStage {
            pages: WorkQueue::new(),
            products: WorkQueue::new(),
            names: None,
            completion: Arc::new(Completion::new(1, 1, Duration::ZERO)),
        });
        stage.pages.push(QueueItem::Data(RawPage::new(
            FetchTask::by_name("Dairy"),
            1,
            json!({"products": "oops"}),
        )));
        stage.pages.push(QueueItem::Stop);

        let stats = stage.clone().run_worker(0).await;
        assert_eq!(stats, ParseWorkerStats { pages: 1, products: 0, skipped_records: 0 });
        assert!(stage.completion.is_parsing_complete());
    }
}
