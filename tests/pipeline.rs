use async_trait::async_trait;
use bigdecimal::BigDecimal;
use catalog_harvest::api::client::PageFetcher;
use catalog_harvest::config::HarvestConfig;
use catalog_harvest::core::processor::{build_report, harvest};
use catalog_harvest::core::stats::determine_exit_code;
use catalog_harvest::model::product::FetchTask;
use catalog_harvest::storage::{MemoryProductStore, ProductStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// Serves a fixed catalog: each key maps to its pages of
/// `(product_uid, category name)` pairs. Unknown keys fail every fetch.
struct CatalogFetcher {
    pages: HashMap<String, Vec<Vec<(&'static str, &'static str)>>>,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl PageFetcher for CatalogFetcher {
    async fn fetch(&self, task: &FetchTask, page_number: u32, _page_size: u32) -> Option<Value> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}#{}", task.key, page_number));
        let pages = self.pages.get(&task.key)?;
        let records = pages.get(page_number as usize - 1)?;
        let products: Vec<Value> = records
            .iter()
            .map(|(uid, category)| {
                json!({
                    "product_uid": uid,
                    "name": format!("Product {}", uid),
                    "eans": [format!("50{}", uid)],
                    "full_url": format!("https://example.test/p/{}", uid),
                    "product_type": "BASIC",
                    "retail_price": {"price": 2.50},
                    "promotions": [{"promo_type": "SIMPLE_FIXED_PRICE", "original_price": 3.00}],
                    "categories": [{"name": category}]
                })
            })
            .collect();
        Some(json!({
            "controls": {"page": {"active": page_number, "last": pages.len()}},
            "products": products
        }))
    }
}

fn catalog() -> Arc<CatalogFetcher> {
    let mut pages = HashMap::new();
    pages.insert(
        "1".to_string(),
        vec![
            vec![("a1", "Fresh Food"), ("a2", "Fresh Food")],
            vec![("a3", "Dairy"), ("a4", "Dairy")],
        ],
    );
    pages.insert("2".to_string(), vec![vec![("b1", "Dairy"), ("b2", "Dairy")]]);
    pages.insert("Bakery".to_string(), vec![vec![("b2", "Bakery"), ("c1", "Bakery")]]);
    Arc::new(CatalogFetcher {
        pages,
        calls: Mutex::new(Vec::new()),
    })
}

fn test_config(dir: &Path, names: bool) -> HarvestConfig {
    let mut config = HarvestConfig::default();
    config.processing.fetch_workers = 3;
    config.processing.parse_workers = 2;
    config.processing.batch_size = 3;
    config.processing.poll_interval_ms = 10;
    config.processing.name_wait_secs = 1.0;
    config.processing.progress_interval_secs = 0;
    config.files.category_names_file = dir.join("category_names.txt");
    config.features.process_category_names = names;
    config.features.save_category_names = names;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_run_persists_every_product_and_saves_names() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), true);
    tokio::fs::write(&config.files.category_names_file, "Bakery\n")
        .await
        .unwrap();

    let fetcher = catalog();
    let store = Arc::new(MemoryProductStore::new());
    let outcome = harvest(&config, fetcher.clone(), store.clone(), vec![1, 2, 3])
        .await
        .unwrap();

    // Ids 1 and 2 plus the "Bakery" keyword succeed; id 3 is unknown upstream.
    assert_eq!(outcome.progress.expected_tasks, 4);
    assert_eq!(outcome.progress.tasks_completed, 3);
    assert_eq!(outcome.progress.tasks_failed, 1);
    assert_eq!(outcome.progress.pages_fetched, 4);
    assert_eq!(outcome.progress.products_parsed, 8);
    assert!(outcome.stage_failures.is_empty());
    assert_eq!(determine_exit_code(&outcome), 1);

    // "b2" appears under id 2 and under the keyword search.
    assert_eq!(outcome.row_count, Some(7));
    assert_eq!(store.row_count().await.unwrap(), 7);
    let b2 = store.get("b2").unwrap();
    assert_eq!(b2.original_price, Some(BigDecimal::from_str("3.00").unwrap()));
    assert_eq!(b2.discounted_price, Some(BigDecimal::from_str("2.50").unwrap()));

    let report = build_report(store.as_ref()).await.unwrap();
    assert_eq!(report.row_count, 7);
    assert_eq!(report.top_discounts.len(), 5);
    let priciest = report.max_original.unwrap();
    assert_eq!(priciest.id, "a1");
    assert_eq!(priciest.price, BigDecimal::from_str("3.00").unwrap());
    assert_eq!(
        report.max_discounted.unwrap().price,
        BigDecimal::from_str("2.50").unwrap()
    );
    assert_eq!(report.size_bytes, None);

    let collector = outcome.collector.unwrap();
    assert_eq!(collector.loaded, 1);
    assert_eq!(collector.total, 3);
    let names = tokio::fs::read_to_string(&config.files.category_names_file)
        .await
        .unwrap();
    assert_eq!(names, "Bakery\nDairy\nFresh Food\n");

    let calls = fetcher.calls.lock().unwrap().clone();
    assert!(calls.contains(&"1#2".to_string()));
    assert!(calls.contains(&"Bakery#1".to_string()));
    assert!(!calls.contains(&"2#2".to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_without_name_features_finishes_and_leaves_no_name_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), false);

    let store = Arc::new(MemoryProductStore::new());
    let outcome = harvest(&config, catalog(), store.clone(), vec![1, 2])
        .await
        .unwrap();

    assert_eq!(outcome.progress.tasks_completed, 2);
    assert_eq!(outcome.persist.rows_written, 6);
    assert!(outcome.collector.is_none());
    assert_eq!(determine_exit_code(&outcome), 0);
    assert!(!config.files.category_names_file.exists());
}
