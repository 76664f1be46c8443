//! Bridge MCP tools into the host's tool interface so they can be used in the agent loop.
//!
//! Bridged tools never fail from the host's point of view: every error is
//! folded into a [`ToolOutput`] with `details.error` set, so one broken server
//! or call cannot abort a conversation.

use std::{collections::HashSet, sync::Arc};

use {
    async_trait::async_trait,
    serde::Serialize,
    serde_json::Value,
    switchyard_common::SharedMasker,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use switchyard_metrics::{counter, labels, mcp as mcp_metrics};

use crate::{
    manager::McpManager,
    types::{McpToolDef, ToolContent, ToolsCallResult},
};

/// Content block in the host's tool-result union.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

/// Side-channel facts about one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDetails {
    pub server: String,
    pub tool: String,
    pub error: bool,
    pub timed_out: bool,
}

/// What a bridged tool hands back to the host. `content` is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolOutput {
    pub content: Vec<HostContent>,
    pub details: ToolDetails,
}

/// Tool interface the host agent runtime calls into.
#[async_trait]
pub trait McpAgentTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, call_id: &str, params: Value) -> ToolOutput;
}

/// An [`McpAgentTool`] that delegates to one tool on one MCP server.
pub struct McpToolBridge {
    /// `<server>.<tool>`
    qualified_name: String,
    original_name: String,
    server_name: String,
    description: String,
    input_schema: Value,
    manager: Arc<McpManager>,
    masker: SharedMasker,
}

/// Host-visible name of `tool` on `server`.
pub fn qualified_tool_name(server: &str, tool: &str) -> String {
    format!("{server}.{tool}")
}

impl McpToolBridge {
    pub fn new(
        server_name: &str,
        tool_def: &McpToolDef,
        manager: Arc<McpManager>,
        masker: SharedMasker,
    ) -> Self {
        Self {
            qualified_name: qualified_tool_name(server_name, &tool_def.name),
            original_name: tool_def.name.clone(),
            server_name: server_name.to_string(),
            description: tool_def
                .description
                .clone()
                .unwrap_or_else(|| format!("MCP tool: {}", tool_def.name)),
            input_schema: tool_def.input_schema.clone(),
            manager,
            masker,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    fn details(&self, error: bool, timed_out: bool) -> ToolDetails {
        ToolDetails {
            server: self.server_name.clone(),
            tool: self.original_name.clone(),
            error,
            timed_out,
        }
    }

    fn normalize(&self, result: ToolsCallResult) -> Vec<HostContent> {
        let mut content: Vec<HostContent> = result
            .content
            .into_iter()
            .filter_map(|item| match item {
                ToolContent::Text { text } => Some(HostContent::Text {
                    text: self.masker.mask(&text),
                }),
                ToolContent::Image { data, mime_type } => {
                    Some(HostContent::Image { data, mime_type })
                },
                ToolContent::Resource { .. } | ToolContent::Unsupported => None,
            })
            .collect();
        if content.is_empty() {
            content.push(HostContent::Text {
                text: String::new(),
            });
        }
        content
    }
}

#[async_trait]
impl McpAgentTool for McpToolBridge {
    fn name(&self) -> &str {
        &self.qualified_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.input_schema.clone()
    }

    async fn execute(&self, call_id: &str, params: Value) -> ToolOutput {
        debug!(call_id = %call_id, tool = %self.qualified_name, "executing MCP tool");

        match self
            .manager
            .call_tool(&self.server_name, &self.original_name, params)
            .await
        {
            Ok(result) => {
                let is_error = result.is_error;
                if is_error {
                    warn!(call_id = %call_id, tool = %self.qualified_name, "MCP tool reported an error");
                }
                ToolOutput {
                    content: self.normalize(result),
                    details: self.details(is_error, false),
                }
            },
            Err(e) => {
                let timed_out = e.is_timeout();
                warn!(
                    call_id = %call_id,
                    tool = %self.qualified_name,
                    timed_out,
                    error = %self.masker.mask(&e.to_string()),
                    "MCP tool call failed"
                );
                ToolOutput {
                    content: vec![HostContent::Text {
                        text: self.masker.mask(&format!("Error: {e}")),
                    }],
                    details: self.details(true, timed_out),
                }
            },
        }
    }
}

/// Wrap every tool of every connected server, deduplicated.
///
/// Servers are visited in name order. A qualified name that the host
/// already has, or that an earlier server already claimed in this pass, is
/// skipped. A server whose catalog cannot be fetched is skipped too.
pub async fn resolve_all(
    manager: &Arc<McpManager>,
    existing_names: &HashSet<String>,
    masker: SharedMasker,
) -> Vec<McpToolBridge> {
    let mut claimed: HashSet<String> = HashSet::new();
    let mut bridges = Vec::new();

    for server in manager.connected_servers().await {
        let tools = match manager.get_tools(&server).await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(server = %server, error = %e, "skipping MCP server, tool discovery failed");
                continue;
            },
        };

        for tool in &tools {
            let name = qualified_tool_name(&server, &tool.name);
            if existing_names.contains(&name) {
                debug!(tool = %name, "MCP tool shadowed by a native tool");
                record_collision(&server, &name);
                continue;
            }
            if !claimed.insert(name.clone()) {
                info!(tool = %name, server = %server, "MCP tool name already registered, skipping");
                record_collision(&server, &name);
                continue;
            }
            bridges.push(McpToolBridge::new(
                &server,
                tool,
                Arc::clone(manager),
                Arc::clone(&masker),
            ));
        }
    }

    debug!(count = bridges.len(), "resolved MCP tools");
    bridges
}

#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
fn record_collision(server: &str, tool: &str) {
    #[cfg(feature = "metrics")]
    counter!(
        mcp_metrics::TOOL_COLLISIONS_TOTAL,
        labels::SERVER => server.to_string(),
        labels::TOOL => tool.to_string()
    )
    .increment(1);
}
