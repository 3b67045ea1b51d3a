use crate::core::collector::CollectorSummary;
use crate::core::completion::Progress;
use crate::core::persist::PersistSummary;
use crate::logging::{log, LogLevel};
use crate::storage::{DiscountRow, PricedRow};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct CategoryStats {
    pub ok: usize,
    pub fail: usize,
    pub skip_or_empty: usize,
    pub total_tasks: usize,
}

pub type RunStats = BTreeMap<String, CategoryStats>;

const FETCH_TASKS: &str = "Fetch Tasks";
const PARSE_RECORDS: &str = "Parse Records";
const DB_BATCHES: &str = "DB Batches";
const DB_ROWS: &str = "DB Rows";
const TAXONOMY_NAMES: &str = "Taxonomy Names";

const CATEGORIES_ORDER: [&str; 5] = [FETCH_TASKS, PARSE_RECORDS, DB_BATCHES, DB_ROWS, TAXONOMY_NAMES];

/// Everything a finished harvest run reports.
#[derive(Debug, Clone, Default)]
pub struct HarvestOutcome {
    pub progress: Progress,
    pub persist: PersistSummary,
    pub collector: Option<CollectorSummary>,
    pub row_count: Option<i64>,
    /// Stage tasks that panicked; shutdown still completed around them.
    pub stage_failures: Vec<String>,
    pub elapsed: Duration,
}

pub fn build_run_stats(outcome: &HarvestOutcome) -> RunStats {
    let p = &outcome.progress;
    let mut stats = RunStats::new();

    stats.insert(
        FETCH_TASKS.to_string(),
        CategoryStats {
            ok: p.tasks_completed,
            fail: p.tasks_failed,
            skip_or_empty: p
                .expected_tasks
                .saturating_sub(p.tasks_completed + p.tasks_failed),
            total_tasks: p.expected_tasks,
        },
    );
    stats.insert(
        PARSE_RECORDS.to_string(),
        CategoryStats {
            ok: p.products_parsed,
            fail: 0,
            skip_or_empty: p.records_skipped,
            total_tasks: p.products_parsed + p.records_skipped,
        },
    );
    let persist = &outcome.persist;
    stats.insert(
        DB_BATCHES.to_string(),
        CategoryStats {
            ok: persist.batches_flushed,
            fail: persist.batches_failed,
            skip_or_empty: 0,
            total_tasks: persist.batches_flushed + persist.batches_failed,
        },
    );
    stats.insert(
        DB_ROWS.to_string(),
        CategoryStats {
            ok: persist.rows_written as usize,
            fail: persist.rows_dropped,
            skip_or_empty: 0,
            total_tasks: persist.rows_written as usize + persist.rows_dropped,
        },
    );
    if let Some(c) = &outcome.collector {
        stats.insert(
            TAXONOMY_NAMES.to_string(),
            CategoryStats {
                ok: c.total - c.loaded,
                fail: 0,
                skip_or_empty: c.loaded,
                total_tasks: c.total,
            },
        );
    }
    stats
}

pub fn print_summary(outcome: &HarvestOutcome) {
    let stats = build_run_stats(outcome);
    let sep = "=".repeat(60);
    println!("\n{}\n{:^60}\n{}", sep, "Harvest Summary", sep);
    println!("Total Run Time:    {:.3?}", outcome.elapsed);
    println!("Pages Fetched:     {}", outcome.progress.pages_fetched);
    if outcome.progress.pages_skipped > 0 {
        println!("Pages Skipped:     {}", outcome.progress.pages_skipped);
    }
    match outcome.row_count {
        Some(count) => println!("Rows In Table:     {}", count),
        None => println!("Rows In Table:     unknown"),
    }
    println!("{}", "-".repeat(60));

    println!(
        "{:<17} {:<8} {:<12} {:<8} {:<8}",
        "Category", "OK", "Skip/Known", "Fail", "Total"
    );
    println!("{}", "-".repeat(60));
    for &cat_name in &CATEGORIES_ORDER {
        if let Some(s) = stats.get(cat_name) {
            println!(
                "{:<17} {:<8} {:<12} {:<8} {:<8}",
                cat_name, s.ok, s.skip_or_empty, s.fail, s.total_tasks
            );
        }
    }
    println!("{}", sep);

    log_overall_status(&stats, outcome.progress.pages_skipped, &outcome.stage_failures);

    let end_ts_str = chrono::Utc::now()
        .format("%Y-%m-%d %H:%M:%S %Z")
        .to_string();
    log(
        LogLevel::Step,
        &format!("--- Run Finished at {} ---", end_ts_str),
    );
}

fn log_overall_status(stats: &RunStats, pages_skipped: usize, stage_failures: &[String]) {
    let task_failures = stats.get(FETCH_TASKS).map_or(0, |s| s.fail);
    let batch_failures = stats.get(DB_BATCHES).map_or(0, |s| s.fail);

    if !stage_failures.is_empty() {
        log(
            LogLevel::Error,
            &format!(
                "Run completed after {} stage task(s) crashed: {}",
                stage_failures.len(),
                stage_failures.join("; ")
            ),
        );
    } else if task_failures > 0 || batch_failures > 0 || pages_skipped > 0 {
        log(LogLevel::Error, &format!("Run completed with errors: {} fetch task(s) abandoned, {} page(s) skipped and {} batch(es) dropped. Check logs.", task_failures, pages_skipped, batch_failures));
    } else {
        log(LogLevel::Success, "Run completed successfully.");
    }
}

pub fn determine_exit_code(outcome: &HarvestOutcome) -> i32 {
    let stats = build_run_stats(outcome);
    let fetch_failures = stats.get(FETCH_TASKS).map_or(false, |s| s.fail > 0);
    let save_failures = stats.get(DB_BATCHES).map_or(false, |s| s.fail > 0);

    let pages_lost = outcome.progress.pages_skipped > 0;

    if fetch_failures || pages_lost || save_failures || !outcome.stage_failures.is_empty() {
        1
    } else {
        0
    }
}

/// What `--report` reads back from the product table.
#[derive(Debug, Clone, Default)]
pub struct StoreReport {
    pub row_count: i64,
    pub size_bytes: Option<i64>,
    pub max_original: Option<PricedRow>,
    pub max_discounted: Option<PricedRow>,
    pub top_discounts: Vec<DiscountRow>,
}

/// Megabytes rounded to two places, or "unknown".
pub fn format_size(bytes: Option<i64>) -> String {
    match bytes {
        Some(b) => format!("{:.2} MB", b as f64 / 1024.0 / 1024.0),
        None => "unknown".to_string(),
    }
}

fn format_priced(row: &Option<PricedRow>) -> String {
    match row {
        Some(r) => format!("{} ({})\n    {}", r.price, r.name, r.url),
        None => "none stored".to_string(),
    }
}

pub fn print_discount_report(report: &StoreReport) {
    let sep = "=".repeat(60);
    println!("\n{}\n{:^60}\n{}", sep, "Product Table Report", sep);
    println!("Rows In Table:     {}", report.row_count);
    println!("Table Size:        {}", format_size(report.size_bytes));
    println!("Max Original:      {}", format_priced(&report.max_original));
    println!("Max Discounted:    {}", format_priced(&report.max_discounted));
    println!("{}", "-".repeat(60));
    println!("Top {} Discounts", report.top_discounts.len());
    if report.top_discounts.is_empty() {
        println!("No discounted products stored.");
    }
    for row in &report.top_discounts {
        println!(
            "{}  was {} now {} ({}% off)\n    {}",
            row.name,
            row.original_price,
            row.discounted_price,
            row.discount_percent(),
            row.url
        );
    }
    println!("{}", sep);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_run_exits_zero() {
        let outcome = HarvestOutcome {
            progress: Progress {
                expected_tasks: 2,
                tasks_completed: 2,
                ..Default::default()
            },
            persist: PersistSummary {
                batches_flushed: 1,
                rows_written: 10,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(determine_exit_code(&outcome), 0);
        assert_eq!(build_run_stats(&outcome)[FETCH_TASKS].ok, 2);
    }

    #[test]
    fn abandoned_tasks_dropped_batches_or_crashes_exit_one() {
        let mut outcome = HarvestOutcome::default();
        outcome.progress.tasks_failed = 1;
        assert_eq!(determine_exit_code(&outcome), 1);

        let mut outcome = HarvestOutcome::default();
        outcome.progress.pages_skipped = 1;
        assert_eq!(determine_exit_code(&outcome), 1);

        let mut outcome = HarvestOutcome::default();
        outcome.persist.batches_failed = 1;
        assert_eq!(determine_exit_code(&outcome), 1);

        let outcome = HarvestOutcome {
            stage_failures: vec!["parse worker 2: panicked".into()],
            ..Default::default()
        };
        assert_eq!(determine_exit_code(&outcome), 1);
    }

    #[test]
    fn sizes_print_in_megabytes() {
        assert_eq!(format_size(Some(5 * 1024 * 1024 + 512 * 1024)), "5.50 MB");
        assert_eq!(format_size(Some(0)), "0.00 MB");
        assert_eq!(format_size(None), "unknown");
    }
}
