use crate::api::model::read_pagination;
use bigdecimal::BigDecimal;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskMode {
    /// Browse a category by its numeric id.
    Id,
    /// Keyword search on a taxonomy name.
    Name,
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskMode::Id => f.write_str("category"),
            TaskMode::Name => f.write_str("keyword"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchTask {
    pub key: String,
    pub mode: TaskMode,
}

impl FetchTask {
    pub fn by_id<S: ToString>(id: S) -> Self {
        FetchTask {
            key: id.to_string(),
            mode: TaskMode::Id,
        }
    }

    pub fn by_name<S: Into<String>>(name: S) -> Self {
        FetchTask {
            key: name.into(),
            mode: TaskMode::Name,
        }
    }
}

impl fmt::Display for FetchTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.mode, self.key)
    }
}

/// One decoded response page plus the pagination fields read from it.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub task: FetchTask,
    pub page_number: u32,
    pub payload: Value,
    pub active_page: Option<u32>,
    pub last_page: Option<u32>,
}

impl RawPage {
    pub fn new(task: FetchTask, page_number: u32, payload: Value) -> Self {
        let pagination = read_pagination(&payload);
        RawPage {
            task,
            page_number,
            active_page: pagination.and_then(|p| p.active),
            last_page: pagination.and_then(|p| p.last),
            payload,
        }
    }

    /// No further page exists once `active >= last`, or when the response
    /// carries no usable pagination block.
    pub fn is_last(&self) -> bool {
        match (self.active_page, self.last_page) {
            (Some(active), Some(last)) => active >= last,
            _ => true,
        }
    }

    pub fn product_records(&self) -> &[Value] {
        self.payload
            .get("products")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedProduct {
    pub id: String,
    pub name: String,
    pub original_price: Option<BigDecimal>,
    pub discounted_price: Option<BigDecimal>,
    pub eans: String,
    pub url: String,
}

impl NormalizedProduct {
    /// A discount equal to the original price, or a zero discount, is stored
    /// as no discount.
    pub fn new(
        id: String,
        name: String,
        original_price: Option<BigDecimal>,
        discounted_price: Option<BigDecimal>,
        eans: String,
        url: String,
    ) -> Self {
        let discounted_price = discounted_price
            .filter(|d| *d != BigDecimal::from(0))
            .filter(|d| original_price.as_ref() != Some(d));
        NormalizedProduct {
            id,
            name,
            original_price,
            discounted_price,
            eans,
            url,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub products: Vec<NormalizedProduct>,
    pub taxonomy_names: Vec<String>,
    pub skipped_records: usize,
}
