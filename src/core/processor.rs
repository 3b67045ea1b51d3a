use crate::api::client::{ApiClient, PageFetcher};
use crate::api::taxonomy;
use crate::config::{self, HarvestConfig};
use crate::core::collector::NameCollector;
use crate::core::completion::Completion;
use crate::core::fetch::FetchStage;
use crate::core::parse::ParseStage;
use crate::core::persist::PersistStage;
use crate::core::queue::{QueueItem, WorkQueue};
use crate::core::stats::{self, HarvestOutcome, StoreReport};
use crate::core::tasks::TaskSource;
use crate::error::{AppError, AppResult};
use crate::io;
use crate::logging::{log, LogLevel};
use crate::model::common::CategoryId;
use crate::model::product::{NormalizedProduct, RawPage};
use crate::storage::{self, MemoryProductStore, PriceColumn, ProductStore};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Full harvest: seed ids, API client and store come from `config`.
pub async fn run(config: HarvestConfig, dry_run: bool) -> AppResult<i32> {
    let category_ids = io::read_category_ids(&config.files.category_ids_file).await?;
    log(
        LogLevel::Info,
        &format!(
            "Loaded {} category id(s) from {}.",
            category_ids.len(),
            config.files.category_ids_file.display()
        ),
    );

    let client: Arc<dyn PageFetcher> = Arc::new(ApiClient::new(&config.api)?);
    let store: Arc<dyn ProductStore> = if dry_run {
        log(
            LogLevel::Warning,
            "Dry run: products are kept in memory and discarded at exit.",
        );
        Arc::new(MemoryProductStore::new())
    } else {
        storage::connect(
            &config.database.url,
            config.database.max_connections,
            &config.database.table,
        )
        .await?
    };

    let outcome = harvest(&config, client, store, category_ids).await?;
    stats::print_summary(&outcome);

    if !outcome.stage_failures.is_empty() {
        return Err(AppError::JoinError(outcome.stage_failures.join("; ")));
    }
    Ok(stats::determine_exit_code(&outcome))
}

/// Runs the pipeline to completion. Startup order: collector, fetch workers,
/// name loader, parse workers, persistence. Shutdown order: fetch workers
/// joined, one `Stop` per parse worker, parse workers joined, persistence
/// joined (it stops the collector), collector joined, row count read.
pub async fn harvest(
    config: &HarvestConfig,
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn ProductStore>,
    category_ids: Vec<CategoryId>,
) -> AppResult<HarvestOutcome> {
    let start_ts_str = Utc::now().format("%Y-%m-%d %H:%M:%S %Z").to_string();
    let processing = &config.processing;
    let features = &config.features;
    log(
        LogLevel::Step,
        &format!(
            "Starting harvest of {} category id(s) at {} ({} fetch / {} parse worker(s), batch size {})",
            category_ids.len(),
            start_ts_str,
            processing.fetch_workers,
            processing.parse_workers,
            processing.batch_size
        ),
    );

    store.ensure_schema().await?;

    let completion = Arc::new(Completion::new(
        processing.fetch_workers,
        processing.parse_workers,
        processing.progress_interval(),
    ));
    completion.add_expected_tasks(category_ids.len());

    let pages: WorkQueue<QueueItem<RawPage>> = WorkQueue::new();
    let products: WorkQueue<NormalizedProduct> = WorkQueue::new();
    let names: Option<WorkQueue<QueueItem<String>>> =
        features.save_category_names.then(WorkQueue::new);

    let collector_handle = names.clone().map(|queue| {
        tokio::spawn(
            NameCollector {
                names: queue,
                names_file: config.files.category_names_file.clone(),
            }
            .run(),
        )
    });

    // Read before any fetch worker can reach the name phase.
    let keyword_names = if features.process_category_names {
        Some(io::read_name_list(&config.files.category_names_file).await)
    } else {
        None
    };

    let tasks = Arc::new(TaskSource::new(category_ids));
    let fetch_stage = Arc::new(FetchStage {
        fetcher,
        tasks: tasks.clone(),
        pages: pages.clone(),
        completion: completion.clone(),
        page_size: config.api.page_size,
        name_mode: features.process_category_names,
        name_wait: processing.name_wait(),
    });
    let fetch_handles: Vec<JoinHandle<_>> = (0..processing.fetch_workers)
        .map(|i| tokio::spawn(fetch_stage.clone().run_worker(i)))
        .collect();

    let loader_handle = spawn_name_loader(
        keyword_names,
        config.files.category_names_file.clone(),
        tasks,
        completion.clone(),
    );

    let parse_stage = Arc::new(ParseStage {
        pages: pages.clone(),
        products: products.clone(),
        names: names.clone(),
        completion: completion.clone(),
    });
    let parse_handles: Vec<JoinHandle<_>> = (0..processing.parse_workers)
        .map(|i| tokio::spawn(parse_stage.clone().run_worker(i)))
        .collect();

    let persist_handle = tokio::spawn(
        PersistStage {
            products,
            names: names.clone(),
            store: store.clone(),
            completion: completion.clone(),
            batch_size: processing.batch_size,
            poll_interval: processing.poll_interval(),
            flush_retries: processing.flush_retries,
            retry_delay: config.api.retry_delay(),
        }
        .run(),
    );

    let mut stage_failures = Vec::new();

    for (i, handle) in fetch_handles.into_iter().enumerate() {
        if let Err(e) = handle.await {
            log(LogLevel::Error, &format!("Fetch worker {} panicked: {}", i, e));
            stage_failures.push(format!("fetch worker {}: {}", i, e));
            // Stand in for the worker so persistence can still finish.
            completion.fetch_worker_finished();
        }
    }
    match loader_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log(LogLevel::Error, &format!("Name loader failed: {}", e)),
        Err(e) => {
            log(LogLevel::Error, &format!("Name loader panicked: {}", e));
            stage_failures.push(format!("name loader: {}", e));
        }
    }
    log(
        LogLevel::Success,
        "All fetch workers finished; signalling parse workers.",
    );

    for _ in 0..processing.parse_workers {
        pages.push(QueueItem::Stop);
    }
    for (i, handle) in parse_handles.into_iter().enumerate() {
        if let Err(e) = handle.await {
            log(LogLevel::Error, &format!("Parse worker {} panicked: {}", i, e));
            stage_failures.push(format!("parse worker {}: {}", i, e));
            completion.parse_worker_exited();
        }
    }

    let persist = match persist_handle.await {
        Ok(summary) => summary,
        Err(e) => {
            log(LogLevel::Error, &format!("Persistence task panicked: {}", e));
            stage_failures.push(format!("persistence: {}", e));
            if let Some(queue) = &names {
                queue.push(QueueItem::Stop);
            }
            Default::default()
        }
    };

    let collector = match collector_handle {
        Some(handle) => match handle.await {
            Ok(Ok(summary)) => Some(summary),
            Ok(Err(e)) => {
                log(
                    LogLevel::Error,
                    &format!("Failed to save taxonomy names: {}", e),
                );
                None
            }
            Err(e) => {
                log(LogLevel::Error, &format!("Name collector panicked: {}", e));
                stage_failures.push(format!("name collector: {}", e));
                None
            }
        },
        None => None,
    };

    let row_count = match store.row_count().await {
        Ok(count) => {
            log(
                LogLevel::Info,
                &format!("Table '{}' now holds {} row(s).", config.database.table, count),
            );
            Some(count)
        }
        Err(e) => {
            log(LogLevel::Error, &format!("Failed to read row count: {}", e));
            None
        }
    };

    Ok(HarvestOutcome {
        progress: completion.snapshot().progress,
        persist,
        collector,
        row_count,
        stage_failures,
        elapsed: completion.elapsed(),
    })
}

/// Feeds the keyword tasks read from the taxonomy name file, then closes the
/// name stream. `None` (name mode off) closes the stream straight away.
fn spawn_name_loader(
    names: Option<AppResult<Vec<String>>>,
    names_file: PathBuf,
    tasks: Arc<TaskSource>,
    completion: Arc<Completion>,
) -> JoinHandle<AppResult<()>> {
    tokio::spawn(async move {
        let Some(result) = names else {
            tasks.close_names();
            return Ok(());
        };
        if let Ok(names) = &result {
            completion.add_expected_tasks(names.len());
            for name in names {
                tasks.push_name(name.clone());
            }
            log(
                LogLevel::Info,
                &format!("Queued {} keyword task(s) from {}.", names.len(), names_file.display()),
            );
        }
        tasks.close_names();
        result.map(|_| ())
    })
}

/// Rebuilds the category id seed file from the upstream taxonomy trees.
pub async fn seed(config: &HarvestConfig) -> AppResult<i32> {
    let client = ApiClient::new(&config.api)?;
    let summary = taxonomy::seed_category_ids(
        &client,
        &config.api.taxonomy_urls,
        &config.files.category_ids_file,
    )
    .await?;
    Ok(if summary.sources_ok == 0 { 1 } else { 0 })
}

/// Prints table size, the priciest products and the largest stored discounts.
pub async fn report(config: &HarvestConfig) -> AppResult<i32> {
    let store = storage::connect(
        &config.database.url,
        config.database.max_connections,
        &config.database.table,
    )
    .await?;
    store.ensure_schema().await?;
    let report = build_report(store.as_ref()).await?;
    stats::print_discount_report(&report);
    Ok(0)
}

pub async fn build_report(store: &dyn ProductStore) -> AppResult<StoreReport> {
    Ok(StoreReport {
        row_count: store.row_count().await?,
        size_bytes: store.storage_size_bytes().await?,
        max_original: store.max_price(PriceColumn::Original).await?,
        max_discounted: store.max_price(PriceColumn::Discounted).await?,
        top_discounts: store.top_discounts(config::REPORT_TOP_DISCOUNTS).await?,
    })
}
