use crate::logging::{log, LogLevel};
use crate::utils::lock_or_recover;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Live counters shown in the progress line and the final summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    pub expected_tasks: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub pages_fetched: usize,
    /// Keyword-task pages given up on while the rest of the task went ahead.
    pub pages_skipped: usize,
    pub products_parsed: usize,
    pub records_skipped: usize,
    pub rows_saved: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionSnapshot {
    pub fetch_workers_finished: usize,
    pub parse_workers_exited: usize,
    pub parsing_complete: bool,
    pub name_processing_started: bool,
    pub progress: Progress,
}

#[derive(Debug)]
struct CompletionInner {
    fetch_workers_finished: usize,
    parse_workers_exited: usize,
    parsing_complete: bool,
    name_processing_started: bool,
    progress: Progress,
    last_report: Instant,
}

/// Shared completion state for one harvest run. Counters only grow and flags
/// only go from unset to set; nothing is reset during a run. Every field sits
/// behind the one mutex.
pub struct Completion {
    inner: Mutex<CompletionInner>,
    fetch_workers: usize,
    parse_workers: usize,
    progress_interval: Duration,
    started: Instant,
}

impl Completion {
    /// A zero `progress_interval` disables the periodic progress line.
    pub fn new(fetch_workers: usize, parse_workers: usize, progress_interval: Duration) -> Self {
        let now = Instant::now();
        Completion {
            inner: Mutex::new(CompletionInner {
                fetch_workers_finished: 0,
                parse_workers_exited: 0,
                parsing_complete: false,
                name_processing_started: false,
                progress: Progress::default(),
                last_report: now,
            }),
            fetch_workers,
            parse_workers,
            progress_interval,
            started: now,
        }
    }

    pub fn fetch_workers(&self) -> usize {
        self.fetch_workers
    }

    pub fn parse_workers(&self) -> usize {
        self.parse_workers
    }

    /// Returns `true` for the single call that flips the flag.
    pub fn mark_name_processing_started(&self) -> bool {
        let mut inner = lock_or_recover(&self.inner);
        if inner.name_processing_started {
            false
        } else {
            inner.name_processing_started = true;
            true
        }
    }

    /// Called once by each fetch worker after it has exhausted every task
    /// stream of the run. Returns the new count.
    pub fn fetch_worker_finished(&self) -> usize {
        let mut inner = lock_or_recover(&self.inner);
        inner.fetch_workers_finished += 1;
        inner.fetch_workers_finished
    }

    /// Called once by each parse worker on exit. The last one sets the
    /// parsing-complete latch and gets `true` back.
    pub fn parse_worker_exited(&self) -> bool {
        let mut inner = lock_or_recover(&self.inner);
        inner.parse_workers_exited += 1;
        if inner.parse_workers_exited >= self.parse_workers && !inner.parsing_complete {
            inner.parsing_complete = true;
            return true;
        }
        false
    }

    pub fn is_parsing_complete(&self) -> bool {
        lock_or_recover(&self.inner).parsing_complete
    }

    /// True once no product can ever be produced again: parsing has
    /// completed and every fetch worker has reported in.
    pub fn upstream_finished(&self) -> bool {
        let inner = lock_or_recover(&self.inner);
        inner.parsing_complete && inner.fetch_workers_finished == self.fetch_workers
    }

    pub fn add_expected_tasks(&self, count: usize) {
        self.update(|p| p.expected_tasks += count);
    }

    pub fn record_task(&self, succeeded: bool) {
        self.update(|p| {
            if succeeded {
                p.tasks_completed += 1;
            } else {
                p.tasks_failed += 1;
            }
        });
    }

    pub fn record_page(&self) {
        self.update(|p| p.pages_fetched += 1);
    }

    pub fn record_page_skipped(&self) {
        self.update(|p| p.pages_skipped += 1);
    }

    pub fn record_parsed(&self, products: usize, skipped: usize) {
        self.update(|p| {
            p.products_parsed += products;
            p.records_skipped += skipped;
        });
    }

    pub fn record_saved(&self, rows: usize) {
        self.update(|p| p.rows_saved += rows);
    }

    pub fn snapshot(&self) -> CompletionSnapshot {
        let inner = lock_or_recover(&self.inner);
        CompletionSnapshot {
            fetch_workers_finished: inner.fetch_workers_finished,
            parse_workers_exited: inner.parse_workers_exited,
            parsing_complete: inner.parsing_complete,
            name_processing_started: inner.name_processing_started,
            progress: inner.progress.clone(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn update<F: FnOnce(&mut Progress)>(&self, apply: F) {
        let line = {
            let mut inner = lock_or_recover(&self.inner);
            apply(&mut inner.progress);

            let now = Instant::now();
            if !self.progress_interval.is_zero()
                && now.duration_since(inner.last_report) >= self.progress_interval
            {
                inner.last_report = now;
                Some(render_progress(&inner.progress, now.duration_since(self.started)))
            } else {
                None
            }
        };

        if let Some(line) = line {
            log(LogLevel::Info, &line);
        }
    }
}

pub fn render_progress(p: &Progress, elapsed: Duration) -> String {
    let done = p.tasks_completed + p.tasks_failed;
    let percent = if p.expected_tasks > 0 {
        100.0 * done as f64 / p.expected_tasks as f64
    } else {
        0.0
    };
    let secs = elapsed.as_secs_f64().max(0.001);
    let whole = elapsed.as_secs();
    format!(
        "Progress: tasks {}/{} ({:.1}%) | pages {} | products {} parsed, {} saved | {:.0} products/sec | elapsed {}m{}s",
        done,
        p.expected_tasks,
        percent,
        p.pages_fetched,
        p.products_parsed,
        p.rows_saved,
        p.products_parsed as f64 / secs,
        whole / 60,
        whole % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn latch_is_set_only_by_last_parse_worker() {
        let c = Completion::new(2, 3, Duration::ZERO);
        assert!(!c.parse_worker_exited());
        assert!(!c.parse_worker_exited());
        assert!(!c.is_parsing_complete());
        assert!(c.parse_worker_exited());
        assert!(c.is_parsing_complete());
    }

    #[test]
    fn upstream_needs_both_latch_and_all_fetch_workers() {
        let c = Completion::new(2, 1, Duration::ZERO);
        c.fetch_worker_finished();
        assert!(c.parse_worker_exited());
        assert!(!c.upstream_finished());
        assert_eq!(c.fetch_worker_finished(), 2);
        assert!(c.upstream_finished());
    }

    #[test]
    fn name_flag_flips_once() {
        let c = Completion::new(1, 1, Duration::ZERO);
        assert!(c.mark_name_processing_started());
        assert!(!c.mark_name_processing_started());
        assert!(c.snapshot().name_processing_started);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let c = Arc::new(Completion::new(16, 1, Duration::ZERO));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let c = c.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        c.record_page();
                    }
                    c.fetch_worker_finished();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = c.snapshot();
        assert_eq!(snap.progress.pages_fetched, 16_000);
        assert_eq!(snap.fetch_workers_finished, 16);
    }

    #[test]
    fn progress_line_reports_percentage() {
        let p = Progress {
            expected_tasks: 4,
            tasks_completed: 1,
            tasks_failed: 1,
            pages_fetched: 7,
            products_parsed: 120,
            rows_saved: 100,
            ..Default::default()
        };
        let line = render_progress(&p, Duration::from_secs(75));
        assert!(line.contains("tasks 2/4 (50.0%)"));
        assert!(line.contains("elapsed 1m15s"));
    }
}
