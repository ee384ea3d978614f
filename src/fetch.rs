use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::error::ExtractionError;

/// User agents for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

const DEFAULT_MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// A fetched resource, before any parsing.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: Url,
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

impl FetchedPage {
    /// Whether the declared content kind is HTML/XHTML markup.
    pub fn is_markup(&self) -> bool {
        is_markup_content_type(&self.content_type)
    }
}

pub fn is_markup_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    mime == "text/html" || mime == "application/xhtml+xml"
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchedPage, ExtractionError>;
}

/// reqwest-backed fetcher that presents itself as a desktop browser.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: Client,
    max_body_bytes: usize,
}

impl HttpFetcher {
    pub fn new(max_redirects: usize) -> anyhow::Result<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(max_redirects))
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Get a random User-Agent string
    fn random_user_agent(&self) -> &'static str {
        let mut rng = rand::thread_rng();
        USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())]
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchedPage, ExtractionError> {
        debug!("Fetching {} (timeout {:?})", url, timeout);

        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .header("User-Agent", self.random_user_agent())
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.5")
            .header("DNT", "1")
            .header("Upgrade-Insecure-Requests", "1")
            .send()
            .await
            .map_err(|e| ExtractionError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::HttpStatus(status.as_u16()));
        }

        let final_url = response.url().clone();
        // Servers that omit the header are almost always serving HTML.
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();

        // Skip downloading bodies we would reject anyway.
        if !is_markup_content_type(&content_type) {
            return Ok(FetchedPage {
                url: final_url,
                status: status.as_u16(),
                content_type,
                body: String::new(),
            });
        }

        let body = read_capped(response, self.max_body_bytes).await?;

        Ok(FetchedPage {
            url: final_url,
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}

/// Read at most `limit` bytes of the body; the rest is never downloaded.
async fn read_capped(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<String, ExtractionError> {
    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| ExtractionError::Fetch(format!("failed to read response body: {}", e)))?
    {
        let room = limit - buf.len();
        if chunk.len() >= room {
            buf.extend_from_slice(&chunk[..room]);
            warn!("Response body exceeds {} bytes; truncating", limit);
            break;
        }
        buf.extend_from_slice(&chunk);
    }
    // A cut may land inside a multi-byte character.
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::spawn_server;
    use axum::http::header;
    use axum::response::{IntoResponse, Redirect};
    use axum::routing::get;
    use axum::Router;

    fn test_app() -> Router {
        Router::new()
            .route(
                "/article",
                get(|| async {
                    (
                        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                        "<html><body><p>Hello there.</p></body></html>",
                    )
                }),
            )
            .route(
                "/paper.pdf",
                get(|| async { ([(header::CONTENT_TYPE, "application/pdf")], "%PDF-1.7") }),
            )
            .route(
                "/huge",
                get(|| async {
                    (
                        [(header::CONTENT_TYPE, "text/html")],
                        format!("<html><body><p>{}</p></body></html>", "word ".repeat(200_000)),
                    )
                }),
            )
            .route("/moved", get(|| async { Redirect::temporary("/article") }))
            .route(
                "/missing",
                get(|| async { axum::http::StatusCode::NOT_FOUND.into_response() }),
            )
    }

    #[test]
    fn test_markup_detection() {
        assert!(is_markup_content_type("text/html"));
        assert!(is_markup_content_type("Text/HTML; charset=ISO-8859-1"));
        assert!(is_markup_content_type("application/xhtml+xml"));
        assert!(!is_markup_content_type("application/pdf"));
        assert!(!is_markup_content_type("application/json"));
    }

    #[tokio::test]
    async fn test_fetch_html() {
        let base = spawn_server(test_app()).await;
        let fetcher = HttpFetcher::new(5).unwrap();
        let page = fetcher
            .fetch(&base.join("article").unwrap(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(page.status, 200);
        assert!(page.is_markup());
        assert!(page.body.contains("Hello there."));
    }

    #[tokio::test]
    async fn test_fetch_follows_redirects() {
        let base = spawn_server(test_app()).await;
        let fetcher = HttpFetcher::new(5).unwrap();
        let page = fetcher
            .fetch(&base.join("moved").unwrap(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(page.url.path(), "/article");
    }

    #[tokio::test]
    async fn test_fetch_non_markup_skips_body() {
        let base = spawn_server(test_app()).await;
        let fetcher = HttpFetcher::new(5).unwrap();
        let page = fetcher
            .fetch(&base.join("paper.pdf").unwrap(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!page.is_markup());
        assert!(page.body.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_body_is_truncated() {
        let base = spawn_server(test_app()).await;
        let fetcher = HttpFetcher::new(5).unwrap().with_max_body_bytes(4096);
        let page = fetcher
            .fetch(&base.join("huge").unwrap(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(page.body.len(), 4096);
        assert!(page.body.starts_with("<html><body><p>word word"));
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let base = spawn_server(test_app()).await;
        let fetcher = HttpFetcher::new(5).unwrap();
        let err = fetcher
            .fetch(&base.join("missing").unwrap(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err, ExtractionError::HttpStatus(404));
    }
}
