use crate::error::{AppError, AppResult};
use crate::logging::{log, LogLevel};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, REFERER, USER_AGENT};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

const DEFAULT_BASE_URL: &str =
    "https://www.sainsburys.co.uk/groceries-api/gol-services/product/v1/product";
const DEFAULT_TAXONOMY_URLS: [&str; 2] = [
    "https://www.sainsburys.co.uk/groceries-api/gol-services/product/categories/tree",
    "https://www.sainsburys.co.uk/groceries-api/gol-services/product/v1/product/taxonomy",
];

pub const CATEGORY_REFERER: &str =
    "https://www.sainsburys.co.uk/gol-ui/groceries/halloween/all-halloween/c:1043380";
pub const SEARCH_REFERER: &str = "https://www.sainsburys.co.uk/gol-ui/SearchResults";
pub const SEED_REFERER: &str = "https://www.sainsburys.co.uk/";

/// Rows per INSERT statement; keeps the six bind parameters per row well
/// under the Postgres (65535) and SQLite (32766) limits.
pub const UPSERT_CHUNK_ROWS: usize = 1000;
pub const REPORT_TOP_DISCOUNTS: i64 = 5;

pub const PRODUCT_TYPE_CATCHWEIGHT: &str = "CATCHWEIGHT";
pub const PRODUCT_TYPE_MULTIVARIANT: &str = "MULTIVARIANT";
pub const PROMO_TYPE_MEAL_DEAL: &str = "MEAL_MULTI_DEAL_FOR_X";
pub const MISSING_FIELD_PLACEHOLDER: &str = "N/A";

const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

pub static BASE_UA_HEADERS: Lazy<HeaderMap> = Lazy::new(|| {
    let mut h = HeaderMap::new();
    h.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
    h.insert(ACCEPT, HeaderValue::from_static("application/json"));
    h.insert(
        HeaderName::from_static("enabled-feature-flags"),
        HeaderValue::from_static("findability_search"),
    );
    h
});

pub static SEED_HEADERS: Lazy<HeaderMap> = Lazy::new(|| {
    let mut h = HeaderMap::new();
    h.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
    h.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
    );
    h.insert(REFERER, HeaderValue::from_static(SEED_REFERER));
    h.insert(
        HeaderName::from_static("x-requested-with"),
        HeaderValue::from_static("XMLHttpRequest"),
    );
    h
});

pub static NON_PRINTABLE_ASCII_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\x20-\x7E]").unwrap());
pub static SQL_IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").unwrap());

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarvestConfig {
    pub api: ApiConfig,
    pub processing: ProcessingConfig,
    pub files: FilesConfig,
    pub features: FeaturesConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub base_url: String,
    pub taxonomy_urls: Vec<String>,
    pub page_size: u32,
    pub max_retries: u32,
    pub retry_delay_secs: f64,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            taxonomy_urls: DEFAULT_TAXONOMY_URLS.iter().map(|s| s.to_string()).collect(),
            page_size: 60,
            max_retries: 3,
            retry_delay_secs: 2.0,
            timeout_secs: 10,
            connect_timeout_secs: 10,
        }
    }
}

impl ApiConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    pub fetch_workers: usize,
    pub parse_workers: usize,
    pub batch_size: usize,
    pub name_wait_secs: f64,
    pub poll_interval_ms: u64,
    /// Extra attempts for a failed batch flush before the batch is dropped.
    pub flush_retries: u32,
    pub progress_interval_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        ProcessingConfig {
            fetch_workers: 8,
            parse_workers: 4,
            batch_size: 500,
            name_wait_secs: 5.0,
            poll_interval_ms: 500,
            flush_retries: 0,
            progress_interval_secs: 5,
        }
    }
}

impl ProcessingConfig {
    pub fn name_wait(&self) -> Duration {
        Duration::from_secs_f64(self.name_wait_secs)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilesConfig {
    pub category_ids_file: PathBuf,
    pub category_names_file: PathBuf,
}

impl Default for FilesConfig {
    fn default() -> Self {
        FilesConfig {
            category_ids_file: PathBuf::from("category_ids.txt"),
            category_names_file: PathBuf::from("category_names.txt"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeaturesConfig {
    pub process_category_names: bool,
    pub save_category_names: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub table: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            url: "sqlite://harvest.db?mode=rwc".to_string(),
            max_connections: 5,
            table: "products".to_string(),
        }
    }
}

impl HarvestConfig {
    /// Reads `path` if it exists, otherwise starts from defaults. The
    /// `DATABASE_URL` environment variable overrides the file value.
    pub fn load(path: &Path) -> AppResult<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                AppError::config(format!("Failed to read '{}': {}", path.display(), e))
            })?;
            toml::from_str::<HarvestConfig>(&content).map_err(|e| {
                AppError::config(format!("Failed to parse '{}': {}", path.display(), e))
            })?
        } else {
            log(
                LogLevel::Warning,
                &format!(
                    "Config file '{}' not found. Using built-in defaults.",
                    path.display()
                ),
            );
            HarvestConfig::default()
        };

        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            if !url.trim().is_empty() {
                config.database.url = url;
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        let p = &self.processing;
        if p.fetch_workers == 0 {
            return Err(AppError::config("processing.fetch_workers must be at least 1"));
        }
        if p.parse_workers == 0 {
            return Err(AppError::config("processing.parse_workers must be at least 1"));
        }
        if p.batch_size == 0 {
            return Err(AppError::config("processing.batch_size must be at least 1"));
        }
        if p.poll_interval_ms == 0 {
            return Err(AppError::config("processing.poll_interval_ms must be at least 1"));
        }
        if !p.name_wait_secs.is_finite() || p.name_wait_secs < 0.0 {
            return Err(AppError::config("processing.name_wait_secs must be a non-negative number"));
        }
        if self.api.page_size == 0 {
            return Err(AppError::config("api.page_size must be at least 1"));
        }
        if self.api.max_retries == 0 {
            return Err(AppError::config("api.max_retries must be at least 1"));
        }
        if !self.api.retry_delay_secs.is_finite() || self.api.retry_delay_secs < 0.0 {
            return Err(AppError::config("api.retry_delay_secs must be a non-negative number"));
        }
        if self.database.max_connections == 0 {
            return Err(AppError::config("database.max_connections must be at least 1"));
        }
        if !SQL_IDENTIFIER_RE.is_match(&self.database.table) {
            return Err(AppError::config(format!(
                "database.table '{}' is not a valid SQL identifier",
                self.database.table
            )));
        }
        Ok(())
    }
}
