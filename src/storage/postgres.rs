use crate::config::UPSERT_CHUNK_ROWS;
use crate::error::AppResult;
use crate::logging::{log, LogLevel};
use crate::model::product::NormalizedProduct;
use crate::storage::{dedupe_last_wins, redact_url, DiscountRow, PriceColumn, PricedRow, ProductStore};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Row};
use std::time::Duration;

pub struct PostgresProductStore {
    pool: PgPool,
    table: String,
}

impl PostgresProductStore {
    pub async fn connect(url: &str, max_connections: u32, table: &str) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect(url)
            .await?;
        log(
            LogLevel::Info,
            &format!(
                "Connected to Postgres at {} (pool size {}).",
                redact_url(url),
                max_connections
            ),
        );
        Ok(PostgresProductStore {
            pool,
            table: table.to_string(),
        })
    }
}

#[async_trait]
impl ProductStore for PostgresProductStore {
    async fn ensure_schema(&self) -> AppResult<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id VARCHAR(255) PRIMARY KEY,
                name TEXT NOT NULL,
                original_price NUMERIC(10, 2),
                discounted_price NUMERIC(10, 2),
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
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} (id, name, original_price, discounted_price, eans, full_url) ",
                self.table
            ));
            qb.push_values(chunk, |mut b, p| {
                b.push_bind(p.id.clone())
                    .push_bind(p.name.clone())
                    .push_bind(p.original_price.clone())
                    .push_bind(p.discounted_price.clone())
                    .push_bind(p.eans.clone())
                    .push_bind(p.url.clone());
            });
            qb.push(
                " ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    original_price = EXCLUDED.original_price,
                    discounted_price = EXCLUDED.discounted_price,
                    eans = EXCLUDED.eans,
                    full_url = EXCLUDED.full_url",
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
             WHERE discounted_price IS NOT NULL AND original_price > 0
             ORDER BY (original_price - discounted_price) / original_price DESC, id
             LIMIT $1",
            self.table
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(DiscountRow {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                original_price: row.try_get::<BigDecimal, _>("original_price")?,
                discounted_price: row.try_get::<BigDecimal, _>("discounted_price")?,
                url: row.try_get("full_url")?,
            });
        }
        Ok(out)
    }

    async fn max_price(&self, column: PriceColumn) -> AppResult<Option<PricedRow>> {
        let col = column.column();
        let sql = format!(
            "SELECT id, name, {col} AS price, full_url FROM {table}
             WHERE {col} IS NOT NULL
             ORDER BY {col} DESC, id
             LIMIT 1",
            col = col,
            table = self.table
        );
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.map(|row| {
            Ok(PricedRow {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                price: row.try_get::<BigDecimal, _>("price")?,
                url: row.try_get("full_url")?,
            })
        })
        .transpose()
    }

    async fn storage_size_bytes(&self) -> AppResult<Option<i64>> {
        let size: i64 = sqlx::query_scalar("SELECT pg_total_relation_size($1::regclass)")
            .bind(&self.table)
            .fetch_one(&self.pool)
            .await?;
        Ok(Some(size))
    }
}
