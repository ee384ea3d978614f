pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod jobs;
pub mod mcp;
pub mod orchestrator;
pub mod preview;
pub mod rate_limit;
pub mod render;
pub mod search;
pub mod stdio_service;
pub mod summarize;
pub mod types;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::extract::TextExtractor;
use crate::fetch::HttpFetcher;
use crate::jobs::JobRegistry;
use crate::orchestrator::SummaryService;
use crate::search::PaperSearch;
use crate::summarize::OpenAiSummarizer;

pub use crate::error::{Error, Result};
pub use crate::types::*;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: SummaryService,
    pub search: PaperSearch,
}

impl AppState {
    pub fn new(config: Config, service: SummaryService, search: PaperSearch) -> Self {
        Self {
            config: Arc::new(config),
            service,
            search,
        }
    }

    /// Wire the production collaborators described by `config`.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let fetcher = Arc::new(
            HttpFetcher::new(config.fetch.max_redirects)?
                .with_max_body_bytes(config.fetch.max_body_bytes),
        );
        let mut extractor = TextExtractor::new(fetcher, config.fetch.clone());
        if config.enable_renderer {
            extractor = with_headless_renderer(extractor);
        }

        if config.summarizer.api_key.is_none() {
            warn!("OPENAI_API_KEY is not set; summarization jobs will fail");
        }
        let summarizer = Arc::new(OpenAiSummarizer::new(config.summarizer.clone()));
        let registry = JobRegistry::new(config.job_retention);
        let service = SummaryService::new(registry, Arc::new(extractor), summarizer);

        let search_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        let search = PaperSearch::new(config.search.clone(), search_client);

        Ok(Self::new(config, service, search))
    }
}

#[cfg(feature = "render")]
fn with_headless_renderer(extractor: TextExtractor) -> TextExtractor {
    info!("Headless rendering enabled for full extraction");
    extractor.with_renderer(Arc::new(render::ChromiumRenderer::new()))
}

#[cfg(not(feature = "render"))]
fn with_headless_renderer(extractor: TextExtractor) -> TextExtractor {
    warn!("ENABLE_RENDERER is set but this build lacks the `render` feature; skipping");
    extractor
}

/// Install the global tracing subscriber. The stdio MCP transport owns stdout,
/// so it logs to stderr.
pub fn init_tracing(to_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if to_stderr {
        builder.with_writer(std::io::stderr).with_ansi(false).try_init()
    } else {
        builder.try_init()
    };
    if result.is_ok() {
        info!("Tracing initialized");
    }
}
