use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::extract::ExtractionMode;

/// Runtime configuration, read once at process start.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub fetch: FetchConfig,
    pub summarizer: SummarizerConfig,
    pub search: SearchConfig,
    pub job_retention: Duration,
    pub enable_renderer: bool,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub fast_timeout: Duration,
    pub full_timeout: Duration,
    pub render_timeout: Duration,
    pub max_redirects: usize,
    /// Markup beyond this many bytes is not downloaded.
    pub max_body_bytes: usize,
    pub fast_min_chars: usize,
    pub full_min_chars: usize,
}

impl FetchConfig {
    pub fn timeout(&self, mode: ExtractionMode) -> Duration {
        match mode {
            ExtractionMode::Fast => self.fast_timeout,
            ExtractionMode::Full => self.full_timeout,
        }
    }

    pub fn min_chars(&self, mode: ExtractionMode) -> usize {
        match mode {
            ExtractionMode::Fast => self.fast_min_chars,
            ExtractionMode::Full => self.full_min_chars,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            fast_timeout: Duration::from_secs(8),
            full_timeout: Duration::from_secs(20),
            render_timeout: Duration::from_secs(30),
            max_redirects: 5,
            max_body_bytes: 5 * 1024 * 1024,
            fast_min_chars: 100,
            full_min_chars: 120,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    /// Unset is legal at startup; the adapter reports it when a job needs it.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_input_chars: usize,
    pub max_output_tokens: u32,
    pub timeout: Duration,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_input_chars: 12_000,
            max_output_tokens: 700,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub min_interval: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.semanticscholar.org/graph/v1".to_string(),
            api_key: None,
            min_interval: Duration::from_millis(1000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            fetch: FetchConfig::default(),
            summarizer: SummarizerConfig::default(),
            search: SearchConfig::default(),
            job_retention: Duration::from_secs(60 * 60),
            enable_renderer: false,
        }
    }
}

impl Config {
    /// Build configuration from environment variables, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        let fetch = FetchConfig {
            fast_timeout: env_secs("FAST_TIMEOUT_SECS", defaults.fetch.fast_timeout),
            full_timeout: env_secs("FULL_TIMEOUT_SECS", defaults.fetch.full_timeout),
            render_timeout: env_secs("RENDER_TIMEOUT_SECS", defaults.fetch.render_timeout),
            max_redirects: env_parse("MAX_REDIRECTS", defaults.fetch.max_redirects),
            max_body_bytes: env_parse("MAX_BODY_BYTES", defaults.fetch.max_body_bytes),
            fast_min_chars: env_parse("FAST_MIN_CHARS", defaults.fetch.fast_min_chars),
            full_min_chars: env_parse("FULL_MIN_CHARS", defaults.fetch.full_min_chars),
        };

        let summarizer = SummarizerConfig {
            api_key: env_opt("OPENAI_API_KEY"),
            base_url: env_opt("OPENAI_BASE_URL").unwrap_or(defaults.summarizer.base_url),
            model: env_opt("OPENAI_MODEL").unwrap_or(defaults.summarizer.model),
            max_input_chars: env_parse(
                "SUMMARY_MAX_INPUT_CHARS",
                defaults.summarizer.max_input_chars,
            ),
            max_output_tokens: env_parse(
                "SUMMARY_MAX_OUTPUT_TOKENS",
                defaults.summarizer.max_output_tokens,
            ),
            timeout: env_secs("SUMMARY_TIMEOUT_SECS", defaults.summarizer.timeout),
        };

        let search = SearchConfig {
            base_url: env_opt("SEARCH_API_URL").unwrap_or(defaults.search.base_url),
            api_key: env_opt("SEARCH_API_KEY"),
            min_interval: Duration::from_millis(env_parse(
                "SEARCH_MIN_INTERVAL_MS",
                defaults.search.min_interval.as_millis() as u64,
            )),
        };

        Self {
            bind_addr: env_opt("BIND_ADDR").unwrap_or(defaults.bind_addr),
            fetch,
            summarizer,
            search,
            job_retention: env_secs("JOB_RETENTION_SECS", defaults.job_retention),
            enable_renderer: env_parse("ENABLE_RENDERER", defaults.enable_renderer),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_parse(key, default.as_secs()))
}
