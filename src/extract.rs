//! Best-effort readable text from arbitrary web pages.
//!
//! Extraction runs an ordered list of [`ExtractionStrategy`] implementations
//! against fetched markup and keeps the first result long enough to be useful.
//! In [`ExtractionMode::Full`] a headless render is tried as a last resort.

use std::sync::{Arc, OnceLock};

use readability::extractor;
use regex::Regex;
use scraper::{Html, Selector};
use select::document::Document;
use select::node::Node;
use select::predicate::{Attr, Class, Name};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;
use whatlang::{detect, Lang};

use crate::config::FetchConfig;
use crate::error::ExtractionError;
use crate::fetch::Fetcher;
use crate::render::Renderer;

/// How hard to try. Fast is bounded for the synchronous submission path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    Fast,
    #[default]
    Full,
}

/// Normalized text pulled out of a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedText {
    pub url: String,
    pub title: Option<String>,
    pub body: String,
    pub language: String,
    pub word_count: usize,
    pub strategy: String,
    pub rendered: bool,
}

impl ExtractedText {
    /// Body text with the title and a blank line in front when one was found.
    pub fn text(&self) -> String {
        match &self.title {
            Some(title) => format!("{}\n\n{}", title, self.body),
            None => self.body.clone(),
        }
    }
}

/// What a strategy gets to look at.
pub struct StrategyInput<'a> {
    pub url: &'a Url,
    pub html: &'a str,
    pub min_chars: usize,
}

/// Raw strategy output, before normalization and thresholding.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub title: Option<String>,
    pub body: String,
}

pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn attempt(&self, input: &StrategyInput<'_>) -> Option<Candidate>;
}

/// Readability-style main content detection.
pub struct ReadabilityStrategy;

impl ExtractionStrategy for ReadabilityStrategy {
    fn name(&self) -> &'static str {
        "readability"
    }

    fn attempt(&self, input: &StrategyInput<'_>) -> Option<Candidate> {
        match extractor::extract(&mut input.html.as_bytes(), input.url) {
            Ok(product) => {
                let body = html2text::from_read_with_decorator(
                    product.content.as_bytes(),
                    100,
                    html2text::render::text_renderer::TrivialDecorator::new(),
                );
                let title = Some(product.title.trim().to_string()).filter(|t| !t.is_empty());
                Some(Candidate { title, body })
            }
            Err(e) => {
                debug!("Readability extraction failed: {}", e);
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Container {
    Tag(&'static str),
    Class(&'static str),
    Attr(&'static str, &'static str),
}

/// Semantic article containers, most specific first.
pub const SEMANTIC_CONTAINERS: &[Container] = &[
    Container::Tag("article"),
    Container::Attr("itemprop", "articleBody"),
    Container::Tag("main"),
    Container::Attr("role", "main"),
];

/// Common CMS content wrappers.
pub const GENERIC_CONTAINERS: &[Container] = &[
    Container::Class("entry-content"),
    Container::Class("post-content"),
    Container::Class("article-body"),
    Container::Class("article-content"),
    Container::Class("story-body"),
    Container::Attr("id", "content"),
    Container::Class("content"),
    Container::Class("post"),
    Container::Attr("id", "main"),
];

/// Elements whose text never belongs to the article.
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "nav", "footer", "aside", "form", "button", "svg",
];

/// Structural fallback: first container (in priority order) holding enough text.
pub struct SelectorStrategy {
    name: &'static str,
    containers: &'static [Container],
}

impl SelectorStrategy {
    pub fn semantic() -> Self {
        Self {
            name: "semantic-containers",
            containers: SEMANTIC_CONTAINERS,
        }
    }

    pub fn generic() -> Self {
        Self {
            name: "generic-containers",
            containers: GENERIC_CONTAINERS,
        }
    }

    /// Longest matching container text for one selector.
    fn best_match(document: &Document, container: Container) -> Option<String> {
        let texts: Vec<String> = match container {
            Container::Tag(name) => document.find(Name(name)).map(container_text).collect(),
            Container::Class(class) => document.find(Class(class)).map(container_text).collect(),
            Container::Attr(key, value) => {
                document.find(Attr(key, value)).map(container_text).collect()
            }
        };
        texts.into_iter().max_by_key(|t| t.chars().count())
    }
}

impl ExtractionStrategy for SelectorStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn attempt(&self, input: &StrategyInput<'_>) -> Option<Candidate> {
        let document = Document::from(input.html);
        let mut fallback: Option<String> = None;

        for container in self.containers {
            let Some(text) = Self::best_match(&document, *container) else {
                continue;
            };
            let len = text.chars().count();
            if len >= input.min_chars {
                debug!("Container {:?} matched with {} chars", container, len);
                return Some(Candidate { title: None, body: text });
            }
            if fallback.as_ref().map_or(true, |f| f.chars().count() < len) {
                fallback = Some(text);
            }
        }

        fallback
            .filter(|t| !t.is_empty())
            .map(|body| Candidate { title: None, body })
    }
}

fn container_text(node: Node<'_>) -> String {
    let mut out = String::new();
    collect_text(node, &mut out);
    normalize_whitespace(&out)
}

fn collect_text(node: Node<'_>, out: &mut String) {
    for child in node.children() {
        if let Some(text) = child.as_text() {
            out.push_str(text);
            out.push(' ');
        } else if let Some(name) = child.name() {
            if SKIPPED_TAGS.contains(&name) {
                continue;
            }
            collect_text(child, out);
        }
    }
}

/// Last resort: every text node in the body with scripts and styles stripped.
pub struct DocumentTextStrategy;

impl ExtractionStrategy for DocumentTextStrategy {
    fn name(&self) -> &'static str {
        "document-text"
    }

    fn attempt(&self, input: &StrategyInput<'_>) -> Option<Candidate> {
        let document = Html::parse_document(input.html);
        let mut parts = Vec::new();

        match Selector::parse("body")
            .ok()
            .and_then(|s| document.select(&s).next())
        {
            Some(body) => extract_text_recursive(&body, &mut parts),
            None => extract_text_recursive(&document.root_element(), &mut parts),
        }

        let body = normalize_whitespace(&parts.join(" "));
        Some(body)
            .filter(|b| !b.is_empty())
            .map(|body| Candidate { title: None, body })
    }
}

fn extract_text_recursive(element: &scraper::ElementRef, parts: &mut Vec<String>) {
    for child in element.children() {
        if let Some(child_element) = scraper::ElementRef::wrap(child) {
            let tag = child_element.value().name();
            if matches!(tag, "script" | "style" | "noscript" | "template" | "head") {
                continue;
            }
            extract_text_recursive(&child_element, parts);
        } else if let Some(text) = child.value().as_text() {
            parts.push(text.text.to_string());
        }
    }
}

pub fn default_strategies() -> Vec<Box<dyn ExtractionStrategy>> {
    vec![
        Box::new(ReadabilityStrategy),
        Box::new(SelectorStrategy::semantic()),
        Box::new(SelectorStrategy::generic()),
        Box::new(DocumentTextStrategy),
    ]
}

/// Collapse every whitespace run to a single space and trim.
pub fn normalize_whitespace(text: &str) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let re = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("static regex"));
    re.replace_all(text, " ").trim().to_string()
}

pub struct TextExtractor {
    fetcher: Arc<dyn Fetcher>,
    renderer: Option<Arc<dyn Renderer>>,
    strategies: Arc<Vec<Box<dyn ExtractionStrategy>>>,
    config: FetchConfig,
}

impl TextExtractor {
    pub fn new(fetcher: Arc<dyn Fetcher>, config: FetchConfig) -> Self {
        Self {
            fetcher,
            renderer: None,
            strategies: Arc::new(default_strategies()),
            config,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        self.strategies = Arc::new(strategies);
        self
    }

    pub fn has_renderer(&self) -> bool {
        self.renderer.is_some()
    }

    /// Fetch `url` and run the fallback chain for `mode`.
    pub async fn extract(
        &self,
        url: &str,
        mode: ExtractionMode,
    ) -> Result<ExtractedText, ExtractionError> {
        let parsed = parse_http_url(url)?;
        info!("Extracting {} ({:?} mode)", parsed, mode);

        let fetch_error = match self.fetcher.fetch(&parsed, self.config.timeout(mode)).await {
            Ok(page) => {
                if !page.is_markup() {
                    info!("Rejecting {}: content type {}", parsed, page.content_type);
                    return Err(ExtractionError::UnsupportedContentType(page.content_type));
                }
                if let Some(extracted) = self.parse_off_thread(page.url, page.body, mode).await {
                    return Ok(extracted);
                }
                warn!("Static markup for {} yielded insufficient text", parsed);
                None
            }
            Err(e) => {
                warn!("Fetch failed for {}: {}", parsed, e);
                Some(e)
            }
        };

        if mode == ExtractionMode::Full {
            if let Some(renderer) = &self.renderer {
                match renderer.render(&parsed, self.config.render_timeout).await {
                    Ok(html) => {
                        if let Some(mut extracted) =
                            self.parse_off_thread(parsed.clone(), html, mode).await
                        {
                            extracted.rendered = true;
                            return Ok(extracted);
                        }
                        warn!("Rendered markup for {} yielded insufficient text", parsed);
                    }
                    Err(e) => warn!("Render failed for {}: {}", parsed, e),
                }
            }
        }

        Err(fetch_error.unwrap_or(ExtractionError::InsufficientText))
    }

    /// Run the strategy chain over markup that is already in hand.
    pub fn extract_from_markup(
        &self,
        url: &Url,
        html: &str,
        mode: ExtractionMode,
    ) -> Option<ExtractedText> {
        run_strategies(&self.strategies, url, html, self.config.min_chars(mode))
    }

    /// Parsing large documents is CPU-bound; keep it off the async workers.
    async fn parse_off_thread(
        &self,
        url: Url,
        html: String,
        mode: ExtractionMode,
    ) -> Option<ExtractedText> {
        let strategies = self.strategies.clone();
        let min_chars = self.config.min_chars(mode);
        match tokio::task::spawn_blocking(move || {
            run_strategies(&strategies, &url, &html, min_chars)
        })
        .await
        {
            Ok(extracted) => extracted,
            Err(e) => {
                warn!("Extraction task failed: {}", e);
                None
            }
        }
    }
}

fn run_strategies(
    strategies: &[Box<dyn ExtractionStrategy>],
    url: &Url,
    html: &str,
    min_chars: usize,
) -> Option<ExtractedText> {
    let input = StrategyInput {
        url,
        html,
        min_chars,
    };

    for strategy in strategies {
        let Some(candidate) = strategy.attempt(&input) else {
            debug!("Strategy {} produced nothing", strategy.name());
            continue;
        };
        let body = normalize_whitespace(&candidate.body);
        let len = body.chars().count();
        if len < min_chars {
            debug!(
                "Strategy {} produced {} chars (< {})",
                strategy.name(),
                len,
                min_chars
            );
            continue;
        }

        let document = Html::parse_document(html);
        let title = candidate
            .title
            .map(|t| normalize_whitespace(&t))
            .filter(|t| !t.is_empty())
            .or_else(|| extract_title(&document));
        let language = detect_language(&document, &body);

        info!(
            "Extracted {} chars from {} using {}",
            len,
            url,
            strategy.name()
        );
        return Some(ExtractedText {
            url: url.to_string(),
            title,
            word_count: body.split_whitespace().count(),
            body,
            language,
            strategy: strategy.name().to_string(),
            rendered: false,
        });
    }
    None
}

/// Accept only absolute http(s) URLs.
pub fn parse_http_url(url: &str) -> Result<Url, ExtractionError> {
    let parsed = Url::parse(url.trim()).map_err(|e| ExtractionError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ExtractionError::InvalidUrl {
            url: url.to_string(),
            reason: "URL must use HTTP or HTTPS protocol".to_string(),
        });
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ExtractionError::InvalidUrl {
            url: url.to_string(),
            reason: "URL has no host".to_string(),
        });
    }
    Ok(parsed)
}

/// Page title: og:title, then <title>, then the first <h1>.
fn extract_title(document: &Html) -> Option<String> {
    if let Ok(selector) = Selector::parse("meta[property=\"og:title\"]") {
        if let Some(content) = document
            .select(&selector)
            .next()
            .and_then(|e| e.value().attr("content"))
        {
            let title = normalize_whitespace(content);
            if !title.is_empty() {
                return Some(title);
            }
        }
    }

    for tag in ["title", "h1"] {
        if let Ok(selector) = Selector::parse(tag) {
            if let Some(element) = document.select(&selector).next() {
                let title = normalize_whitespace(&element.text().collect::<String>());
                if !title.is_empty() {
                    return Some(title);
                }
            }
        }
    }
    None
}

/// Language from markup attributes, falling back to content-based detection.
fn detect_language(document: &Html, text: &str) -> String {
    if let Ok(selector) = Selector::parse("html") {
        if let Some(lang) = document
            .select(&selector)
            .next()
            .and_then(|e| e.value().attr("lang"))
        {
            let lang = lang.trim();
            if !lang.is_empty() {
                return lang.to_string();
            }
        }
    }

    if let Ok(selector) = Selector::parse("meta[http-equiv=\"content-language\"]") {
        if let Some(content) = document
            .select(&selector)
            .next()
            .and_then(|e| e.value().attr("content"))
        {
            let content = content.trim();
            if !content.is_empty() {
                return content.to_string();
            }
        }
    }

    match detect(text) {
        Some(info) => match info.lang() {
            Lang::Eng => "en".to_string(),
            Lang::Spa => "es".to_string(),
            Lang::Fra => "fr".to_string(),
            Lang::Deu => "de".to_string(),
            Lang::Ita => "it".to_string(),
            Lang::Por => "pt".to_string(),
            Lang::Rus => "ru".to_string(),
            Lang::Jpn => "ja".to_string(),
            Lang::Kor => "ko".to_string(),
            Lang::Cmn => "zh".to_string(),
            other => other.code().to_string(),
        },
        None => "unknown".to_string(),
    }
}
