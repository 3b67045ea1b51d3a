use crate::api::client::PageFetcher;
use crate::core::completion::Completion;
use crate::core::queue::{QueueItem, WorkQueue};
use crate::core::tasks::TaskSource;
use crate::logging::{log, LogLevel};
use crate::model::product::{FetchTask, RawPage, TaskMode};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchWorkerStats {
    pub tasks_ok: usize,
    pub tasks_failed: usize,
    pub pages: usize,
}

/// Everything a fetch worker needs; shared by all workers of a run.
pub struct FetchStage {
    pub fetcher: Arc<dyn PageFetcher>,
    pub tasks: Arc<TaskSource>,
    pub pages: WorkQueue<QueueItem<RawPage>>,
    pub completion: Arc<Completion>,
    pub page_size: u32,
    pub name_mode: bool,
    pub name_wait: Duration,
}

impl FetchStage {
    /// Drains category tasks, then (in name mode) keyword tasks until the
    /// name stream stays empty for `name_wait` or is closed. Reports to the
    /// completion coordinator exactly once on the way out.
    pub async fn run_worker(self: Arc<Self>, worker_id: usize) -> FetchWorkerStats {
        let mut stats = FetchWorkerStats::default();

        while let Some(task) = self.tasks.try_take_id() {
            self.run_task(task, &mut stats).await;
        }

        if self.name_mode {
            if self.completion.mark_name_processing_started() {
                log(
                    LogLevel::Step,
                    &format!(
                        "Category ids exhausted (worker {}); starting name-mode tasks.",
                        worker_id
                    ),
                );
            }
            while let Some(task) = self.tasks.take_name(self.name_wait).await {
                self.run_task(task, &mut stats).await;
            }
        }

        let finished = self.completion.fetch_worker_finished();
        log(
            LogLevel::Info,
            &format!(
                "Fetch worker {} finished ({}/{}): {} task(s) OK, {} failed, {} page(s).",
                worker_id,
                finished,
                self.completion.fetch_workers(),
                stats.tasks_ok,
                stats.tasks_failed,
                stats.pages
            ),
        );
        stats
    }

    async fn run_task(&self, task: FetchTask, stats: &mut FetchWorkerStats) {
        let (pages, completed) = self.fetch_all_pages(&task).await;
        stats.pages += pages;
        if completed {
            stats.tasks_ok += 1;
        } else {
            stats.tasks_failed += 1;
        }
        self.completion.record_task(completed);
    }

    /// Walks pages from 1 until the response says it was the last one.
    /// Returns the pages pushed and whether the task ran to completion.
    ///
    /// An exhausted page ends a category task. A keyword task that already
    /// knows its page count skips the page and carries on with the next one.
    async fn fetch_all_pages(&self, task: &FetchTask) -> (usize, bool) {
        let mut page_number: u32 = 1;
        let mut pushed = 0usize;
        let mut known_last: Option<u32> = None;
        loop {
            let payload = match self.fetcher.fetch(task, page_number, self.page_size).await {
                Some(payload) => payload,
                None => match known_last {
                    Some(last) if task.mode == TaskMode::Name && page_number < last => {
                        log(
                            LogLevel::Warning,
                            &format!(
                                "Skipping page {}/{} of {} after exhausting retries.",
                                page_number, last, task
                            ),
                        );
                        self.completion.record_page_skipped();
                        page_number += 1;
                        continue;
                    }
                    _ => {
                        log(
                            LogLevel::Error,
                            &format!(
                                "Abandoning {} at page {} after exhausting retries.",
                                task, page_number
                            ),
                        );
                        return (pushed, false);
                    }
                },
            };

            let page = RawPage::new(task.clone(), page_number, payload);
            // The requested number bounds the walk even if the echoed page does not move.
            let is_last =
                page.is_last() || page.last_page.map_or(false, |last| page_number >= last);
            if page.last_page.is_some() {
                known_last = page.last_page;
            }
            self.pages.push(QueueItem::Data(page));
            self.completion.record_page();
            pushed += 1;

            if is_last {
                return (pushed, true);
            }
            page_number += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// Serves `last` pages per key, or nothing for keys it does not know.
    /// Pages listed in `failing` always come back empty-handed.
    struct ScriptedFetcher {
        last_page: HashMap<String, u32>,
        failing: HashSet<(String, u32)>,
        /// Reported as `active` on every page instead of the requested number.
        stuck_active: Option<u32>,
        calls: Mutex<Vec<(String, u32)>>,
    }

    impl ScriptedFetcher {
        fn new(pages: &[(&str, u32)]) -> Self {
            ScriptedFetcher {
                last_page: pages.iter().map(|(k, n)| (k.to_string(), *n)).collect(),
                failing: HashSet::new(),
                stuck_active: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing(mut self, key: &str, page: u32) -> Self {
            self.failing.insert((key.to_string(), page));
            self
        }

        fn calls_for(&self, key: &str) -> Vec<u32> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, _)| k == key)
                .map(|(_, n)| *n)
                .collect()
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch(&self, task: &FetchTask, page_number: u32, _page_size: u32) -> Option<Value> {
            self.calls.lock().unwrap().push((task.key.clone(), page_number));
            let last = *self.last_page.get(&task.key)?;
            if self.failing.contains(&(task.key.clone(), page_number)) {
                return None;
            }
            Some(json!({
                "controls": {"page": {"active": self.stuck_active.unwrap_or(page_number), "last": last}},
                "products": []
            }))
        }
    }

    fn stage(
        fetcher: Arc<ScriptedFetcher>,
        ids: Vec<u64>,
        workers: usize,
        name_mode: bool,
    ) -> Arc<FetchStage> {
        Arc::new(FetchStage {
            fetcher,
            tasks: Arc::new(TaskSource::new(ids)),
            pages: WorkQueue::new(),
            completion: Arc::new(Completion::new(workers, 1, Duration::ZERO)),
            page_size: 60,
            name_mode,
            name_wait: Duration::from_millis(20),
        })
    }

    #[tokio::test]
    async fn pages_until_last_in_order() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[("1", 1), ("3", 3)]));
        let st = stage(fetcher.clone(), vec![1, 3], 1, false);

        let stats = st.clone().run_worker(0).await;
        assert_eq!(stats, FetchWorkerStats { tasks_ok: 2, tasks_failed: 0, pages: 4 });

        let calls = fetcher.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                ("1".to_string(), 1),
                ("3".to_string(), 1),
                ("3".to_string(), 2),
                ("3".to_string(), 3)
            ]
        );

        let mut page_numbers = Vec::new();
        while let Some(QueueItem::Data(page)) = st.pages.try_pop().await {
            page_numbers.push(page.page_number);
        }
        assert_eq!(page_numbers, vec![1, 1, 2, 3]);
    }

    #[tokio::test]
    async fn exhausted_fetch_abandons_task() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[]));
        let st = stage(fetcher, vec![99], 1, false);
        let stats = st.clone().run_worker(0).await;
        assert_eq!(stats.tasks_failed, 1);
        assert_eq!(stats.pages, 0);
        assert_eq!(st.completion.snapshot().progress.tasks_failed, 1);
    }

    #[tokio::test]
    async fn keyword_task_skips_a_failed_middle_page() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[("Bakery", 3)]).failing("Bakery", 2));
        let st = stage(fetcher.clone(), vec![], 1, true);
        st.tasks.push_name("Bakery");
        st.tasks.close_names();

        let stats = st.clone().run_worker(0).await;
        assert_eq!(fetcher.calls_for("Bakery"), vec![1, 2, 3]);
        assert_eq!(stats.tasks_ok, 1);
        assert_eq!(stats.pages, 2);

        let progress = st.completion.snapshot().progress;
        assert_eq!(progress.pages_skipped, 1);
        assert_eq!(progress.tasks_failed, 0);
    }

    #[tokio::test]
    async fn category_task_and_first_keyword_page_still_abandon() {
        let fetcher = Arc::new(
            ScriptedFetcher::new(&[("5", 3), ("Dairy", 3)])
                .failing("5", 2)
                .failing("Dairy", 1),
        );
        let st = stage(fetcher.clone(), vec![5], 1, true);
        st.tasks.push_name("Dairy");
        st.tasks.close_names();

        let stats = st.clone().run_worker(0).await;
        assert_eq!(fetcher.calls_for("5"), vec![1, 2]);
        assert_eq!(fetcher.calls_for("Dairy"), vec![1]);
        assert_eq!(stats.tasks_failed, 2);
        assert_eq!(st.completion.snapshot().progress.pages_skipped, 0);
    }

    #[tokio::test]
    async fn stuck_pagination_stops_at_reported_last_page() {
        let mut fetcher = ScriptedFetcher::new(&[("4", 3)]);
        fetcher.stuck_active = Some(1);
        let fetcher = Arc::new(fetcher);
        let st = stage(fetcher.clone(), vec![4], 1, false);

        let stats = st.clone().run_worker(0).await;
        assert_eq!(fetcher.calls_for("4"), vec![1, 2, 3]);
        assert_eq!(stats.tasks_ok, 1);
        assert_eq!(stats.pages, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_worker_reports_without_name_mode() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[("1", 2), ("2", 1), ("3", 1)]));
        let st = stage(fetcher, vec![1, 2, 3], 4, false);

        let handles: Vec<_> = (0..4).map(|i| tokio::spawn(st.clone().run_worker(i))).collect();
        for h in handles {
            h.await.unwrap();
        }

        let snap = st.completion.snapshot();
        assert_eq!(snap.fetch_workers_finished, 4);
        assert!(!snap.name_processing_started);
        assert_eq!(snap.progress.pages_fetched, 4);
    }

    #[tokio::test]
    async fn name_tasks_follow_ids_in_name_mode() {
        let fetcher = Arc::new(ScriptedFetcher::new(&[("7", 1), ("Bakery", 2)]));
        let st = stage(fetcher.clone(), vec![7], 1, true);
        st.tasks.push_name("Bakery");
        st.tasks.close_names();

        let stats = st.clone().run_worker(0).await;
        assert_eq!(stats.tasks_ok, 2);
        assert_eq!(stats.pages, 3);
        assert!(st.completion.snapshot().name_processing_started);
        assert_eq!(st.completion.snapshot().fetch_workers_finished, 1);
    }
}
