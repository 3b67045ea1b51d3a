use crate::error::AppResult;
use crate::model::product::NormalizedProduct;
use crate::storage::{dedupe_last_wins, DiscountRow, PriceColumn, PricedRow, ProductStore};
use crate::utils::lock_or_recover;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Keyed in-process table used for dry runs and tests.
#[derive(Default)]
pub struct MemoryProductStore {
    rows: Mutex<BTreeMap<String, NormalizedProduct>>,
    batches: Mutex<usize>,
}

impl MemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<NormalizedProduct> {
        lock_or_recover(&self.rows).get(id).cloned()
    }

    pub fn batches_written(&self) -> usize {
        *lock_or_recover(&self.batches)
    }
}

#[async_trait]
impl ProductStore for MemoryProductStore {
    async fn ensure_schema(&self) -> AppResult<()> {
        Ok(())
    }

    async fn upsert_batch(&self, rows: &[NormalizedProduct]) -> AppResult<u64> {
        let unique = dedupe_last_wins(rows);
        if unique.is_empty() {
            return Ok(0);
        }
        {
            let mut table = lock_or_recover(&self.rows);
            for row in &unique {
                table.insert(row.id.clone(), (*row).clone());
            }
        }
        *lock_or_recover(&self.batches) += 1;
        Ok(unique.len() as u64)
    }

    async fn row_count(&self) -> AppResult<i64> {
        Ok(lock_or_recover(&self.rows).len() as i64)
    }

    async fn top_discounts(&self, limit: i64) -> AppResult<Vec<DiscountRow>> {
        let zero = BigDecimal::from(0);
        let mut discounted: Vec<DiscountRow> = lock_or_recover(&self.rows)
            .values()
            .filter_map(|p| match (&p.original_price, &p.discounted_price) {
                (Some(o), Some(d)) if *o > zero => Some(DiscountRow {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    original_price: o.clone(),
                    discounted_price: d.clone(),
                    url: p.url.clone(),
                }),
                _ => None,
            })
            .collect();

        discounted.sort_by(|a, b| {
            b.discount_percent()
                .cmp(&a.discount_percent())
                .then_with(|| a.id.cmp(&b.id))
        });
        discounted.truncate(limit.max(0) as usize);
        Ok(discounted)
    }

    async fn max_price(&self, column: PriceColumn) -> AppResult<Option<PricedRow>> {
        let table = lock_or_recover(&self.rows);
        let best = table
            .values()
            .filter_map(|p| {
                let price = match column {
                    PriceColumn::Original => p.original_price.as_ref(),
                    PriceColumn::Discounted => p.discounted_price.as_ref(),
                }?;
                Some((price, p))
            })
            // Ties go to the smallest id, as in the SQL stores.
            .fold(None::<(&BigDecimal, &NormalizedProduct)>, |best, (price, p)| match best {
                Some((top, _)) if top >= price => best,
                _ => Some((price, p)),
            });
        Ok(best.map(|(price, p)| PricedRow {
            id: p.id.clone(),
            name: p.name.clone(),
            price: price.clone(),
            url: p.url.clone(),
        }))
    }

    async fn storage_size_bytes(&self) -> AppResult<Option<i64>> {
        Ok(None)
    }
}
