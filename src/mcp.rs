//! MCP tool catalogue and dispatch, plus the HTTP flavour of the MCP surface.
//! The stdio server in [`crate::stdio_service`] shares the same dispatch.

use axum::{extract::State, http::StatusCode, response::Json};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::types::*;
use crate::AppState;

pub const SUBMIT_TOOL: &str = "submit_summarization";
pub const STATUS_TOOL: &str = "get_summarization_status";
pub const SEARCH_TOOL: &str = "search_papers";

#[derive(Debug, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct McpToolsResponse {
    pub tools: Vec<McpTool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct McpCallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct McpCallResponse {
    pub content: Vec<McpContent>,
    pub is_error: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct McpContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

/// Problems with the call itself, as opposed to failures of the tool.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolCallError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
}

/// Text handed back to the client. `is_error` marks a tool-level failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    fn ok(text: String) -> Self {
        Self {
            text,
            is_error: false,
        }
    }

    fn failed(text: String) -> Self {
        Self {
            text,
            is_error: true,
        }
    }
}

fn schema_of<T: JsonSchema>() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| {
        serde_json::json!({"type": "object"})
    })
}

pub fn tool_definitions() -> Vec<McpTool> {
    vec![
        McpTool {
            name: SUBMIT_TOOL.to_string(),
            description: "Submit an article URL for summarization. Returns a job id and an \
                          immediate extractive preview; poll get_summarization_status for the \
                          final summary."
                .to_string(),
            input_schema: schema_of::<SubmitRequest>(),
        },
        McpTool {
            name: STATUS_TOOL.to_string(),
            description: "Get the status of a summarization job (pending, processing, done or \
                          failed) together with its result or error."
                .to_string(),
            input_schema: schema_of::<StatusRequest>(),
        },
        McpTool {
            name: SEARCH_TOOL.to_string(),
            description: "Search the Semantic Scholar paper index by keyword. Returns titles, \
                          authors, years, venues and links."
                .to_string(),
            input_schema: schema_of::<SearchQuery>(),
        },
    ]
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: serde_json::Value) -> Result<T, ToolCallError> {
    let arguments = if arguments.is_null() {
        serde_json::json!({})
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|e| ToolCallError::InvalidArguments {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

/// Run one tool call against the application state.
pub async fn dispatch(
    state: &AppState,
    name: &str,
    arguments: serde_json::Value,
) -> Result<ToolOutput, ToolCallError> {
    info!("MCP tool call: {} with args: {}", name, arguments);

    match name {
        SUBMIT_TOOL => {
            let args: SubmitRequest = parse_args(name, arguments)?;
            Ok(match state.service.submit(&args.url).await {
                Ok(response) => ToolOutput::ok(to_pretty_json(&response)),
                Err(e) => {
                    error!("Submit tool error: {}", e);
                    ToolOutput::failed(format!("Submission failed: {}", e))
                }
            })
        }
        STATUS_TOOL => {
            let args: StatusRequest = parse_args(name, arguments)?;
            Ok(match state.service.status(&args.job_id).await {
                Ok(job) => ToolOutput::ok(to_pretty_json(&job)),
                Err(e) => ToolOutput::failed(e.to_string()),
            })
        }
        SEARCH_TOOL => {
            let args: SearchQuery = parse_args(name, arguments)?;
            Ok(match state.search.search(&args.keyword, args.limit).await {
                Ok(papers) => ToolOutput::ok(format_papers(&args.keyword, &papers)),
                Err(e) => {
                    error!("Search tool error: {}", e);
                    ToolOutput::failed(format!("Search failed: {}", e))
                }
            })
        }
        other => Err(ToolCallError::UnknownTool(other.to_string())),
    }
}

fn to_pretty_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("serialization failed: {}", e))
}

fn format_papers(keyword: &str, papers: &[Paper]) -> String {
    if papers.is_empty() {
        return format!("No papers found for '{}'", keyword);
    }
    let mut text = format!("Found {} papers for '{}':\n\n", papers.len(), keyword);
    for (i, paper) in papers.iter().enumerate() {
        text.push_str(&format!("{}. **{}**", i + 1, paper.title));
        if let Some(year) = paper.year {
            text.push_str(&format!(" ({})", year));
        }
        text.push('\n');
        if !paper.authors.is_empty() {
            text.push_str(&format!("   Authors: {}\n", paper.authors.join(", ")));
        }
        if let Some(venue) = &paper.venue {
            text.push_str(&format!("   Venue: {}\n", venue));
        }
        if let Some(url) = paper.open_access_pdf.as_ref().or(paper.url.as_ref()) {
            text.push_str(&format!("   URL: {}\n", url));
        }
        if let Some(abstract_text) = &paper.r#abstract {
            text.push_str(&format!(
                "   Abstract: {}\n",
                abstract_text.chars().take(300).collect::<String>()
            ));
        }
        text.push('\n');
    }
    text
}

pub async fn list_tools() -> Json<McpToolsResponse> {
    Json(McpToolsResponse {
        tools: tool_definitions(),
    })
}

pub async fn call_tool(
    State(state): State<Arc<AppState>>,
    Json(request): Json<McpCallRequest>,
) -> Result<Json<McpCallResponse>, (StatusCode, Json<ErrorResponse>)> {
    match dispatch(&state, &request.name, request.arguments).await {
        Ok(output) => Ok(Json(McpCallResponse {
            content: vec![McpContent {
                content_type: "text".to_string(),
                text: output.text,
            }],
            is_error: output.is_error,
        })),
        Err(e) => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: e.to_string(),
                retry_after_secs: None,
            }),
        )),
    }
}
