use crate::config::UPSERT_CHUNK_ROWS;
use crate::error::{AppError, AppResult};
use crate::logging::{log, LogLevel};
use crate::model::product::NormalizedProduct;
use crate::storage::{dedupe_last_wins, DiscountRow, PriceColumn, PricedRow, ProductStore};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::str::FromStr;
use std::time::Duration;

/// SQLite has no exact decimal type, so prices are kept as their decimal
/// text and parsed back into `BigDecimal` on read.
pub struct SqliteProductStore {
    pool: SqlitePool,
    table: String,
}

impl SqliteProductStore {
    /// `sqlite::memory:` gives every pooled connection its own database;
    /// use `max_connections = 1` with it.
    pub async fn connect(url: &str, max_connections: u32, table: &str) -> AppResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;
        log(
            LogLevel::Info,
            &format!("Opened SQLite database {} (pool size {}).", url, max_connections),
        );
        Ok(SqliteProductStore {
            pool,
            table: table.to_string(),
        })
    }
}

fn parse_price(raw: Option<String>, column: &str) -> AppResult<Option<BigDecimal>> {
    raw.map(|s| {
        BigDecimal::from_str(&s).map_err(|e| {
            AppError::Database(format!("Column {} holds non-decimal '{}': {}", column, s, e))
        })
    })
    .transpose()
}

#[async_trait]
impl ProductStore for SqliteProductStore {
    async fn ensure_schema(&self) -> AppResult<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                original_price TEXT,
                discounted_price TEXT,
                eans TEXT NOT NULL,
                full_url TEXT NOT NULL
            )",
            self.table
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert_batch(&self, rows: &[NormalizedProduct]) -> AppResult<u64> {
        let unique = dedupe_last_wins(rows);
        if unique.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for chunk in unique.chunks(UPSERT_CHUNK_ROWS) {
            let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
                "INSERT INTO {} (id, name, original_price, discounted_price, eans, full_url) ",
                self.table
            ));
            qb.push_values(chunk, |mut b, p| {
                b.push_bind(p.id.clone())
                    .push_bind(p.name.clone())
                    .push_bind(p.original_price.as_ref().map(BigDecimal::to_string))
                    .push_bind(p.discounted_price.as_ref().map(BigDecimal::to_string))
                    .push_bind(p.eans.clone())
                    .push_bind(p.url.clone());
            });
            qb.push(
                " ON CONFLICT (id) DO UPDATE SET
                    name = excluded.name,
                    original_price = excluded.original_price,
                    discounted_price = excluded.discounted_price,
                    eans = excluded.eans,
                    full_url = excluded.full_url",
            );
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        Ok(unique.len() as u64)
    }

    async fn row_count(&self) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn top_discounts(&self, limit: i64) -> AppResult<Vec<DiscountRow>> {
        let sql = format!(
            "SELECT id, name, original_price, discounted_price, full_url FROM {}
             WHERE discounted_price IS NOT NULL AND CAST(original_price AS REAL) > 0
             ORDER BY (CAST(original_price AS REAL) - CAST(discounted_price AS REAL))
                      / CAST(original_price AS REAL) DESC, id
             LIMIT ?",
            self.table
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let original = parse_price(row.try_get("original_price")?, "original_price")?;
            let discounted = parse_price(row.try_get("discounted_price")?, "discounted_price")?;
            if let (Some(original_price), Some(discounted_price)) = (original, discounted) {
                out.push(DiscountRow {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    original_price,
                    discounted_price,
                    url: row.try_get("full_url")?,
                });
            }
        }
        Ok(out)
    }

    async fn max_price(&self, column: PriceColumn) -> AppResult<Option<PricedRow>> {
        let col = column.column();
        let sql = format!(
            "SELECT id, name, {col} AS price, full_url FROM {table}
             WHERE {col} IS NOT NULL
             ORDER BY CAST({col} AS REAL) DESC, id
             LIMIT 1",
            col = col,
            table = self.table
        );
        let Some(row) = sqlx::query(&sql).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };
        let Some(price) = parse_price(row.try_get("price")?, col)? else {
            return Ok(None);
        };
        Ok(Some(PricedRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            price,
            url: row.try_get("full_url")?,
        }))
    }

    /// SQLite only reports the size of the whole database file.
    async fn storage_size_bytes(&self) -> AppResult<Option<i64>> {
        let size: i64 = sqlx::query_scalar(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(Some(size))
    }
}
