//! Paper search against the Semantic Scholar graph API.

use std::sync::Arc;
use std::time::Duration;

use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::error::{Error, Result, SearchError};
use crate::rate_limit::RateLimiter;
use crate::types::{Paper, S2SearchResponse};

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;
const PAPER_FIELDS: &str =
    "paperId,title,abstract,authors,year,venue,url,citationCount,openAccessPdf";

#[derive(Clone)]
pub struct PaperSearch {
    http_client: Client,
    config: SearchConfig,
    limiter: Arc<RateLimiter>,
    cache: Cache<String, Vec<Paper>>,
    retry_budget: Duration,
}

impl PaperSearch {
    pub fn new(config: SearchConfig, http_client: Client) -> Self {
        Self {
            http_client,
            limiter: Arc::new(RateLimiter::new(config.min_interval)),
            config,
            cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(60 * 10))
                .build(),
            retry_budget: Duration::from_secs(4),
        }
    }

    /// Upper bound on time spent retrying 5xx responses.
    pub fn with_retry_budget(mut self, budget: Duration) -> Self {
        self.retry_budget = budget;
        self
    }

    pub async fn search(&self, keyword: &str, limit: Option<u32>) -> Result<Vec<Paper>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(Error::Validation("keyword is required".to_string()));
        }
        let limit = clamp_limit(limit);
        info!("Searching papers for: {} (limit {})", keyword, limit);

        let cache_key = format!("q={}|limit={}", keyword.to_lowercase(), limit);
        if let Some(cached) = self.cache.get(&cache_key).await {
            debug!("paper search cache hit");
            return Ok(cached);
        }

        let search_url = format!("{}/paper/search", self.config.base_url.trim_end_matches('/'));
        let limit_param = limit.to_string();

        let response: S2SearchResponse = retry(
            ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_millis(200))
                .with_max_interval(Duration::from_secs(2))
                .with_max_elapsed_time(Some(self.retry_budget))
                .build(),
            || async {
                self.limiter.acquire().await;

                let mut request = self
                    .http_client
                    .get(&search_url)
                    .query(&[
                        ("query", keyword),
                        ("limit", limit_param.as_str()),
                        ("fields", PAPER_FIELDS),
                    ])
                    .header("Accept", "application/json");
                if let Some(key) = &self.config.api_key {
                    request = request.header("x-api-key", key);
                }

                let resp = request.send().await.map_err(|e| {
                    backoff::Error::transient(SearchError::Upstream(format!(
                        "failed to reach search index: {}",
                        e
                    )))
                })?;

                let status = resp.status();
                if status == StatusCode::TOO_MANY_REQUESTS {
                    let retry_after_secs = retry_after(resp.headers());
                    warn!("Search index throttled us; retry after {}s", retry_after_secs);
                    return Err(backoff::Error::permanent(SearchError::RateLimited {
                        retry_after_secs,
                    }));
                }
                if !status.is_success() {
                    let text = resp.text().await.unwrap_or_default();
                    let err = SearchError::Upstream(format!(
                        "search index responded with {}: {}",
                        status,
                        text.chars().take(300).collect::<String>()
                    ));
                    // 5xx transient, others permanent
                    return if status.is_server_error() {
                        Err(backoff::Error::transient(err))
                    } else {
                        Err(backoff::Error::permanent(err))
                    };
                }

                resp.json::<S2SearchResponse>()
                    .await
                    .map_err(|e| backoff::Error::permanent(SearchError::Parse(e.to_string())))
            },
        )
        .await?;

        let papers: Vec<Paper> = response.data.into_iter().map(Paper::from).collect();
        info!("Search index returned {} papers", papers.len());
        self.cache.insert(cache_key, papers.clone()).await;
        Ok(papers)
    }
}

pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after(v, Utc::now()))
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

/// Retry-After is either delta-seconds or an HTTP-date.
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<u64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let secs = (at.with_timezone(&Utc) - now).num_seconds();
    Some(secs.max(0) as u64)
}
