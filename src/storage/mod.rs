pub mod memory;
pub mod postgres;
pub mod sqlite;

use crate::error::{AppError, AppResult};
use crate::model::product::NormalizedProduct;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

pub use memory::MemoryProductStore;
pub use postgres::PostgresProductStore;
pub use sqlite::SqliteProductStore;

/// A stored product that carries a real discount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscountRow {
    pub id: String,
    pub name: String,
    pub original_price: BigDecimal,
    pub discounted_price: BigDecimal,
    pub url: String,
}

impl DiscountRow {
    /// Percentage off the original price, rounded to two places.
    pub fn discount_percent(&self) -> BigDecimal {
        if self.original_price == BigDecimal::from(0) {
            return BigDecimal::from(0);
        }
        let saved = self.original_price.clone() - self.discounted_price.clone();
        (saved * BigDecimal::from(100) / self.original_price.clone()).round(2)
    }
}

/// The stored product with the highest value in one price column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricedRow {
    pub id: String,
    pub name: String,
    pub price: BigDecimal,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceColumn {
    Original,
    Discounted,
}

impl PriceColumn {
    pub fn column(self) -> &'static str {
        match self {
            PriceColumn::Original => "original_price",
            PriceColumn::Discounted => "discounted_price",
        }
    }
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Creates the product table if it does not exist.
    async fn ensure_schema(&self) -> AppResult<()>;

    /// Inserts or overwrites every row of `rows` in a single transaction and
    /// returns the number of distinct ids written.
    async fn upsert_batch(&self, rows: &[NormalizedProduct]) -> AppResult<u64>;

    async fn row_count(&self) -> AppResult<i64>;

    async fn top_discounts(&self, limit: i64) -> AppResult<Vec<DiscountRow>>;

    /// The most expensive product by `column`; rows with no price there are
    /// ignored.
    async fn max_price(&self, column: PriceColumn) -> AppResult<Option<PricedRow>>;

    /// On-disk footprint in bytes, when the backend can tell.
    async fn storage_size_bytes(&self) -> AppResult<Option<i64>>;
}

/// Collapses repeated ids so a multi-row upsert never touches the same key
/// twice. Keeps first-seen order; the last occurrence's values win.
pub fn dedupe_last_wins(rows: &[NormalizedProduct]) -> Vec<&NormalizedProduct> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(rows.len());
    let mut unique: Vec<&NormalizedProduct> = Vec::with_capacity(rows.len());
    for row in rows {
        match index.get(row.id.as_str()) {
            Some(&i) => unique[i] = row,
            None => {
                index.insert(row.id.as_str(), unique.len());
                unique.push(row);
            }
        }
    }
    unique
}

/// Opens the store named by `url`: `postgres://` / `postgresql://` or
/// `sqlite:`. `table` must already be a validated identifier.
pub async fn connect(
    url: &str,
    max_connections: u32,
    table: &str,
) -> AppResult<Arc<dyn ProductStore>> {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let store = PostgresProductStore::connect(url, max_connections, table).await?;
        Ok(Arc::new(store))
    } else if url.starts_with("sqlite:") {
        let store = SqliteProductStore::connect(url, max_connections, table).await?;
        Ok(Arc::new(store))
    } else {
        Err(AppError::config(format!(
            "Unsupported database URL scheme in '{}' (expected postgres:// or sqlite:)",
            redact_url(url)
        )))
    }
}

/// Drops any credentials from a URL before it is logged.
pub fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
