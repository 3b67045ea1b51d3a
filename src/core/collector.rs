use crate::core::queue::{QueueItem, WorkQueue};
use crate::error::AppResult;
use crate::io;
use crate::logging::{log, LogLevel};
use crate::transform::taxonomy::sanitize_name;
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorSummary {
    pub loaded: usize,
    pub received: usize,
    pub total: usize,
}

/// Deduplicates taxonomy names against the persisted name file and rewrites
/// it once the persistence consumer sends `Stop`.
pub struct NameCollector {
    pub names: WorkQueue<QueueItem<String>>,
    pub names_file: PathBuf,
}

impl NameCollector {
    pub async fn run(self) -> AppResult<CollectorSummary> {
        let mut known: BTreeSet<String> = io::read_name_list(&self.names_file)
            .await?
            .into_iter()
            .collect();
        let mut summary = CollectorSummary {
            loaded: known.len(),
            ..Default::default()
        };
        log(
            LogLevel::Info,
            &format!(
                "Name collector started with {} known name(s) from {}.",
                summary.loaded,
                self.names_file.display()
            ),
        );

        loop {
            match self.names.pop().await {
                Some(QueueItem::Data(raw)) => {
                    summary.received += 1;
                    insert_sanitized(&mut known, &raw);
                }
                Some(QueueItem::Stop) | None => break,
            }
        }

        summary.total = known.len();
        io::write_sorted_lines(&self.names_file, &known).await?;
        log(
            LogLevel::Success,
            &format!(
                "Saved {} taxonomy name(s) to {} ({} new).",
                summary.total,
                self.names_file.display(),
                summary.total - summary.loaded
            ),
        );
        Ok(summary)
    }
}

fn insert_sanitized(known: &mut BTreeSet<String>, raw: &str) -> bool {
    let clean = sanitize_name(raw);
    if clean.trim().is_empty() {
        return false;
    }
    known.insert(clean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn names_are_sanitized_deduplicated_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("category_names.txt");
        tokio::fs::write(&path, "Dairy\n").await.unwrap();

        let queue: WorkQueue<QueueItem<String>> = WorkQueue::new();
        for name in ["Bakery", "bakery\u{99}", "Dairy", "\u{99}", "Bakery"] {
            queue.push(QueueItem::Data(name.to_string()));
        }
        queue.push(QueueItem::Stop);

        let summary = NameCollector {
            names: queue,
            names_file: path.clone(),
        }
        .run()
        .await
        .unwrap();

        assert_eq!(summary, CollectorSummary { loaded: 1, received: 5, total: 3 });
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, "Bakery\nDairy\nbakery \n");
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.txt");
        let queue: WorkQueue<QueueItem<String>> = WorkQueue::new();
        queue.push(QueueItem::Stop);

        let summary = NameCollector {
            names: queue,
            names_file: path.clone(),
        }
        .run()
        .await
        .unwrap();

        assert_eq!(summary.total, 0);
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "");
    }
}
