use rmcp::{model::*, ServiceExt};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::Config;
use crate::mcp::{self, ToolCallError};
use crate::AppState;

#[derive(Clone)]
pub struct McpService {
    pub state: Arc<AppState>,
}

impl McpService {
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let config = Config::from_env();
        info!("Starting MCP stdio service");
        info!("Search index: {}", config.search.base_url);
        Ok(Self::new(AppState::from_config(config)?))
    }
}

fn to_rmcp_tool(tool: mcp::McpTool) -> Tool {
    let schema = match tool.input_schema {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    Tool::new(tool.name, tool.description, Arc::new(schema))
}

impl rmcp::ServerHandler for McpService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            server_info: Implementation {
                name: "article-digest".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: Some(
                "Summarizes web articles in the background: submit a URL, keep the preview, \
                 then poll the job until it is done. Also searches the Semantic Scholar paper index."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _page: Option<PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: mcp::tool_definitions().into_iter().map(to_rmcp_tool).collect(),
            ..Default::default()
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let arguments = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Null);

        match mcp::dispatch(&self.state, request.name.as_ref(), arguments).await {
            Ok(output) if output.is_error => {
                Ok(CallToolResult::error(vec![Content::text(output.text)]))
            }
            Ok(output) => Ok(CallToolResult::success(vec![Content::text(output.text)])),
            Err(e @ ToolCallError::UnknownTool(_)) => {
                Err(ErrorData::new(ErrorCode::METHOD_NOT_FOUND, e.to_string(), None))
            }
            Err(e @ ToolCallError::InvalidArguments { .. }) => {
                error!("Rejected tool call: {}", e);
                Err(ErrorData::new(ErrorCode::INVALID_PARAMS, e.to_string(), None))
            }
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    // stdout carries the protocol
    crate::init_tracing(true);
    let service = McpService::from_env()?;
    let server = service.serve(rmcp::transport::stdio()).await?;
    info!("MCP stdio server running");
    let _quit_reason = server.waiting().await?;
    Ok(())
}
