use crate::config::{self, ApiConfig};
use crate::error::{AppError, AppResult};
use crate::logging::{log, LogLevel};
use crate::model::product::{FetchTask, TaskMode};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Fetches one page of one task. `None` means the page could not be
/// retrieved after every retry.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, task: &FetchTask, page_number: u32, page_size: u32) -> Option<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Other,
}

#[derive(Debug, Clone)]
pub struct RequestFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl RequestFailure {
    fn other<S: Into<String>>(message: S) -> Self {
        RequestFailure {
            kind: FailureKind::Other,
            message: message.into(),
        }
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        let (kind, context_str) = if e.is_timeout() {
            (FailureKind::Timeout, "Timeout")
        } else if e.is_connect() {
            (FailureKind::Other, "Connection")
        } else {
            (FailureKind::Other, "Request")
        };
        RequestFailure {
            kind,
            message: format!("{} Error: {}", context_str, e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(api: &ApiConfig) -> Self {
        RetryPolicy {
            max_retries: api.max_retries,
            retry_delay: api.retry_delay(),
        }
    }

    /// Timeouts back off linearly with the attempt number; every other
    /// failure waits the flat delay.
    pub fn backoff(&self, attempt: u32, kind: FailureKind) -> Duration {
        match kind {
            FailureKind::Timeout => self.retry_delay * attempt,
            FailureKind::Other => self.retry_delay,
        }
    }
}

/// Runs `op` up to `max_retries` times (attempts numbered from 1), sleeping
/// between failed attempts but not after the last one.
pub async fn with_retries<T, F, Fut>(policy: &RetryPolicy, log_ctx: &str, mut op: F) -> Option<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RequestFailure>>,
{
    for attempt in 1..=policy.max_retries {
        match op(attempt).await {
            Ok(value) => return Some(value),
            Err(failure) => {
                let level = match failure.kind {
                    FailureKind::Timeout => LogLevel::Warning,
                    FailureKind::Other => LogLevel::Error,
                };
                log(
                    level,
                    &format!(
                        "{} (Try {}/{}) {}",
                        log_ctx, attempt, policy.max_retries, failure.message
                    ),
                );
                if attempt < policy.max_retries {
                    sleep(policy.backoff(attempt, failure.kind)).await;
                }
            }
        }
    }
    None
}

/// Query parameters for one page of a task. Category tasks browse by id;
/// name tasks run a keyword search.
pub fn query_for(task: &FetchTask, page_number: u32, page_size: u32) -> Vec<(&'static str, String)> {
    let mut params = match task.mode {
        TaskMode::Id => vec![
            ("filter[keyword]", String::new()),
            ("filter[category]", task.key.clone()),
            ("browse", "true".to_string()),
        ],
        TaskMode::Name => vec![
            ("filter[keyword]", task.key.clone()),
            ("browse", "false".to_string()),
        ],
    };
    params.push(("page_number", page_number.to_string()));
    params.push(("page_size", page_size.to_string()));
    params
}

pub fn headers_for(mode: TaskMode) -> HeaderMap {
    let mut headers = config::BASE_UA_HEADERS.clone();
    let referer = match mode {
        TaskMode::Id => config::CATEGORY_REFERER,
        TaskMode::Name => config::SEARCH_REFERER,
    };
    headers.insert(REFERER, HeaderValue::from_static(referer));
    headers
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    policy: RetryPolicy,
}

impl ApiClient {
    pub fn new(api: &ApiConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(api.timeout_secs))
            .connect_timeout(Duration::from_secs(api.connect_timeout_secs))
            .build()
            .map_err(AppError::from)?;
        Ok(ApiClient {
            client,
            base_url: api.base_url.clone(),
            policy: RetryPolicy::from_config(api),
        })
    }

    /// GET `url` with retries, decoding the body as JSON.
    pub async fn get_json(
        &self,
        url: &str,
        headers: &HeaderMap,
        params: &[(&'static str, String)],
        log_ctx: &str,
    ) -> Option<Value> {
        with_retries(&self.policy, log_ctx, move |_attempt| {
            self.send_once(url, headers.clone(), params)
        })
        .await
    }

    async fn send_once(
        &self,
        url: &str,
        headers: HeaderMap,
        params: &[(&'static str, String)],
    ) -> Result<Value, RequestFailure> {
        let resp = self
            .client
            .get(url)
            .headers(headers)
            .query(params)
            .send()
            .await
            .map_err(RequestFailure::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Self::http_failure(resp, status).await);
        }

        let bytes = resp.bytes().await.map_err(RequestFailure::from_reqwest)?;
        serde_json::from_slice::<Value>(&bytes).map_err(|e| {
            let snippet_len = bytes.len().min(200);
            RequestFailure::other(format!(
                "Invalid JSON body: {}. Snippet: '{}'",
                e,
                String::from_utf8_lossy(&bytes[..snippet_len])
            ))
        })
    }

    async fn http_failure(resp: reqwest::Response, status: StatusCode) -> RequestFailure {
        let resp_text = resp
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error body".to_string());
        RequestFailure::other(format!(
            "HTTP {} ({}). Body: {}...",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown Status"),
            resp_text.chars().take(150).collect::<String>()
        ))
    }
}

#[async_trait]
impl PageFetcher for ApiClient {
    async fn fetch(&self, task: &FetchTask, page_number: u32, page_size: u32) -> Option<Value> {
        let params = query_for(task, page_number, page_size);
        let headers = headers_for(task.mode);
        let log_ctx = format!("API Req [{}] page {}", task, page_number);
        self.get_json(&self.base_url, &headers, &params, &log_ctx)
            .await
    }
}
