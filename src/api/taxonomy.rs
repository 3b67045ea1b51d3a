use crate::api::client::ApiClient;
use crate::config;
use crate::error::{AppError, AppResult};
use crate::io;
use crate::logging::{log, LogLevel};
use crate::model::common::CategoryId;
use crate::transform::taxonomy::collect_category_ids;
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub sources_ok: usize,
    pub sources_failed: usize,
    pub existing: usize,
    pub discovered: usize,
    pub total: usize,
    pub added: usize,
}

/// Fetches every taxonomy tree, merges the ids found with the ones already in
/// `seed_path`, and rewrites the file sorted. Unreachable sources are logged
/// and skipped; a malformed existing seed file is an error.
pub async fn seed_category_ids(
    client: &ApiClient,
    taxonomy_urls: &[String],
    seed_path: &Path,
) -> AppResult<SeedSummary> {
    log(
        LogLevel::Step,
        &format!(
            "--- Seeding category ids from {} taxonomy source(s) ---",
            taxonomy_urls.len()
        ),
    );

    let mut summary = SeedSummary::default();
    let mut discovered = BTreeSet::new();
    for url in taxonomy_urls {
        let ctx = format!("Taxonomy Req [{}]", url);
        match client
            .get_json(url, &config::SEED_HEADERS, &[], &ctx)
            .await
        {
            Some(tree) => {
                let before = discovered.len();
                collect_category_ids(&tree, &mut discovered);
                log(
                    LogLevel::Info,
                    &format!("{} yielded {} new id(s).", url, discovered.len() - before),
                );
                summary.sources_ok += 1;
            }
            None => {
                log(
                    LogLevel::Warning,
                    &format!("Giving up on taxonomy source {}.", url),
                );
                summary.sources_failed += 1;
            }
        }
    }

    let existing = read_existing_ids(seed_path).await?;
    summary.existing = existing.len();
    summary.discovered = discovered.len();

    let merged = merge_ids(existing, discovered);
    summary.total = merged.len();
    summary.added = summary.total - summary.existing;

    io::write_sorted_lines(seed_path, &merged).await?;
    log(
        LogLevel::Success,
        &format!(
            "Category ids written to {}: {} total, {} new.",
            seed_path.display(),
            summary.total,
            summary.added
        ),
    );
    Ok(summary)
}

async fn read_existing_ids(seed_path: &Path) -> AppResult<BTreeSet<CategoryId>> {
    match io::read_category_ids(seed_path).await {
        Ok(ids) => Ok(ids.into_iter().collect()),
        Err(AppError::SeedFile { line: 0, .. }) => Ok(BTreeSet::new()),
        Err(e) => Err(e),
    }
}

fn merge_ids(
    existing: BTreeSet<CategoryId>,
    discovered: BTreeSet<CategoryId>,
) -> BTreeSet<CategoryId> {
    let mut merged = existing;
    merged.extend(discovered);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_existing_and_adds_new_sorted() {
        let existing: BTreeSet<u64> = [30, 10].into_iter().collect();
        let discovered: BTreeSet<u64> = [20, 10].into_iter().collect();
        let merged = merge_ids(existing, discovered);
        assert_eq!(merged.into_iter().collect::<Vec<_>>(), vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn missing_seed_file_counts_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ids = read_existing_ids(&dir.path().join("ids.txt")).await.unwrap();
        assert!(ids.is_empty());

        let bad = dir.path().join("bad.txt");
        tokio::fs::write(&bad, "12\nnope\n").await.unwrap();
        assert!(read_existing_ids(&bad).await.is_err());
    }
}
