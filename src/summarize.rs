//! Summarization through an OpenAI-compatible chat-completion endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SummarizerConfig;
use crate::error::SummarizationError;
use crate::types::{StructuredSummary, SummaryPayload};

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `text`. `language` is a hint for the response language.
    async fn summarize(
        &self,
        text: &str,
        language: Option<&str>,
    ) -> Result<SummaryPayload, SummarizationError>;
}

const SYSTEM_PROMPT: &str = "You are a research assistant who writes faithful, concise summaries \
of articles and papers. Never invent facts that are not in the source text.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponseRaw {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiSummarizer {
    http_client: Client,
    config: SummarizerConfig,
}

impl OpenAiSummarizer {
    pub fn new(config: SummarizerConfig) -> Self {
        Self {
            http_client: Client::new(),
            config,
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.http_client = client;
        self
    }

    fn build_prompt(&self, text: &str, language: Option<&str>) -> String {
        let language_hint = match language {
            Some(lang) if lang != "unknown" => format!(
                "Write the summary in the same language as the source (detected: {}).\n",
                lang
            ),
            _ => String::new(),
        };
        format!(
            "Summarize the following text. Respond with a single JSON object with these keys:\n\
             - \"summary\": a 3-5 sentence overview\n\
             - \"objective\": what the work sets out to do\n\
             - \"methods\": how it was done\n\
             - \"findings\": the main results\n\
             - \"implications\": why the results matter\n\
             - \"limitations\": caveats or weaknesses\n\
             - \"keyPoints\": an array of short bullet strings\n\
             - \"followUpQuestions\": an array of questions a reader might ask next\n\
             Use null for any section the text does not support.\n\
             {}\n\
             TEXT:\n{}",
            language_hint, text
        )
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(
        &self,
        text: &str,
        language: Option<&str>,
    ) -> Result<SummaryPayload, SummarizationError> {
        if text.trim().is_empty() {
            return Err(SummarizationError::EmptyInput);
        }
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(SummarizationError::MissingCredential)?;

        let (input, truncated) = truncate_chars(text, self.config.max_input_chars);
        if truncated {
            debug!(
                "Truncated summarizer input from {} to {} chars",
                text.chars().count(),
                self.config.max_input_chars
            );
        }

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: self.build_prompt(input, language),
                },
            ],
            temperature: 0.2,
            max_tokens: self.config.max_output_tokens,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let start = std::time::Instant::now();
        let response = self
            .http_client
            .post(format!(
                "{}/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .timeout(self.config.timeout)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!("Completion request failed: {}", e);
                if e.is_timeout() {
                    SummarizationError::Timeout
                } else {
                    SummarizationError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Completion service returned {}: {}", status, body);
            return Err(SummarizationError::UpstreamStatus {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let raw: ChatResponseRaw = response.json().await.map_err(|e| {
            if e.is_timeout() {
                SummarizationError::Timeout
            } else {
                SummarizationError::Request(format!("invalid completion response: {}", e))
            }
        })?;

        let content = raw
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(SummarizationError::EmptyResponse)?;

        info!(
            "Completion received in {}ms ({} chars)",
            start.elapsed().as_millis(),
            content.len()
        );
        Ok(parse_summary(&content))
    }
}

/// Structured summary when the model honored the JSON contract, plain text otherwise.
pub fn parse_summary(content: &str) -> SummaryPayload {
    let trimmed = strip_code_fence(content.trim());
    match serde_json::from_str::<StructuredSummary>(trimmed) {
        Ok(structured) if !structured.summary.trim().is_empty() => {
            SummaryPayload::Structured(structured)
        }
        Ok(_) => SummaryPayload::Text(content.trim().to_string()),
        Err(e) => {
            debug!("Completion was not a structured summary ({}); keeping text", e);
            SummaryPayload::Text(content.trim().to_string())
        }
    }
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Fixed-size prefix of at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}
