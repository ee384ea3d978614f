//! Test doubles for the network-facing capabilities.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::config::{Config, FetchConfig};
use crate::error::{ExtractionError, SummarizationError};
use crate::extract::{Candidate, ExtractionStrategy, StrategyInput, TextExtractor};
use crate::fetch::{FetchedPage, Fetcher};
use crate::jobs::JobRegistry;
use crate::orchestrator::SummaryService;
use crate::render::Renderer;
use crate::search::PaperSearch;
use crate::summarize::Summarizer;
use crate::types::SummaryPayload;
use crate::AppState;

/// Serve a router on an ephemeral local port and return its base URL.
pub async fn spawn_server(app: axum::Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{}/", addr)).unwrap()
}

/// Application state backed by the given doubles; paper search points at the
/// default (unreachable in tests) endpoint.
pub fn test_state(fetcher: StaticFetcher, summarizer: StubSummarizer) -> AppState {
    let config = Config::default();
    let extractor = TextExtractor::new(Arc::new(fetcher), FetchConfig::default());
    let service = SummaryService::new(
        JobRegistry::new(config.job_retention),
        Arc::new(extractor),
        Arc::new(summarizer),
    );
    let search = PaperSearch::new(config.search.clone(), reqwest::Client::new());
    AppState::new(config, service, search)
}

/// An English article page with `paragraphs` paragraphs of prose.
pub fn article_html(title: &str, paragraphs: usize) -> String {
    let body: String = (0..paragraphs)
        .map(|i| {
            format!(
                "<p>Paragraph {} explains how the new release improves reliability, \
                 reduces memory use, and makes the build faster for everyone involved. \
                 Early adopters report fewer crashes! Is it ready for production? \
                 The maintainers think so.</p>",
                i + 1
            )
        })
        .collect();
    format!(
        "<html><head><title>{title}</title></head><body>\
         <nav><a href=\"/\">Home</a> <a href=\"/about\">About</a></nav>\
         <article><h1>{title}</h1>{body}</article>\
         <footer>Copyright notice</footer></body></html>",
        title = title,
        body = body
    )
}

/// Serves canned responses keyed by URL; anything else is a fetch failure.
#[derive(Default)]
pub struct StaticFetcher {
    pages: HashMap<String, (String, String)>,
    pub calls: Arc<AtomicUsize>,
}

impl StaticFetcher {
    pub fn with_html(self, url: &str, html: &str) -> Self {
        self.with_response(url, "text/html; charset=utf-8", html)
    }

    pub fn with_response(mut self, url: &str, content_type: &str, body: &str) -> Self {
        self.pages
            .insert(url.to_string(), (content_type.to_string(), body.to_string()));
        self
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<FetchedPage, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.pages.get(url.as_str()) {
            Some((content_type, body)) => Ok(FetchedPage {
                url: url.clone(),
                status: 200,
                content_type: content_type.clone(),
                body: body.clone(),
            }),
            None => Err(ExtractionError::Fetch(format!("connection refused: {}", url))),
        }
    }
}

/// Returns the same markup for every URL.
pub struct StubRenderer {
    html: String,
    pub calls: AtomicUsize,
}

impl StubRenderer {
    pub fn new(html: &str) -> Self {
        Self {
            html: html.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Renderer for StubRenderer {
    async fn render(&self, _url: &Url, _timeout: Duration) -> Result<String, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.html.clone())
    }
}

/// Records how often the chain reached it; never produces anything.
#[derive(Default)]
pub struct CountingStrategy {
    pub attempts: Arc<AtomicUsize>,
}

impl ExtractionStrategy for CountingStrategy {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn attempt(&self, _input: &StrategyInput<'_>) -> Option<Candidate> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        None
    }
}

pub enum StubBehavior {
    /// Echo the first 40 chars of the input back as the summary.
    Echo,
    Fail(SummarizationError),
    Panic,
}

pub struct StubSummarizer {
    behavior: StubBehavior,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl StubSummarizer {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Summarizer for StubSummarizer {
    async fn summarize(
        &self,
        text: &str,
        _language: Option<&str>,
    ) -> Result<SummaryPayload, SummarizationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.behavior {
            StubBehavior::Echo => Ok(SummaryPayload::Text(format!(
                "Summary of: {}",
                text.chars().take(40).collect::<String>()
            ))),
            StubBehavior::Fail(e) => Err(e.clone()),
            StubBehavior::Panic => panic!("summarizer exploded"),
        }
    }
}
