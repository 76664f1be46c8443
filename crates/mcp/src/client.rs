//! MCP client: the protocol handshake and tool interactions with a single server.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use {
    serde_json::Value,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Context, McpTransportError, Result},
    traits::{McpClientTrait, McpTransport},
    types::{
        ClientCapabilities, ClientInfo, InitializeParams, InitializeResult, McpToolDef,
        PROTOCOL_VERSION, ToolsCallParams, ToolsCallResult, ToolsListParams, ToolsListResult,
    },
};

/// Hard stop for servers that keep handing out cursors.
const MAX_TOOL_PAGES: usize = 100;

/// State of an MCP client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpClientState {
    /// `initialize` completed, `initialized` notification sent.
    Ready,
    /// Shut down locally or the transport went away.
    Closed,
}

/// An initialized MCP client bound to one transport.
pub struct McpClient {
    server_name: String,
    transport: Arc<dyn McpTransport>,
    server_info: InitializeResult,
    closed: AtomicBool,
}

impl McpClient {
    /// Perform the MCP handshake (`initialize` + `notifications/initialized`)
    /// over an already-open transport.
    pub async fn connect(server_name: &str, transport: Arc<dyn McpTransport>) -> Result<Self> {
        let server_info = match Self::initialize(server_name, transport.as_ref()).await {
            Ok(info) => info,
            Err(e) => {
                warn!(server = %server_name, error = %e, "MCP initialize handshake failed");
                return Err(e);
            },
        };

        Ok(Self {
            server_name: server_name.into(),
            transport,
            server_info,
            closed: AtomicBool::new(false),
        })
    }

    async fn initialize(server_name: &str, transport: &dyn McpTransport) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "switchyard".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };

        let resp = transport
            .request("initialize", Some(serde_json::to_value(&params)?))
            .await?;

        let result: InitializeResult =
            serde_json::from_value(resp.result.context("MCP initialize returned no result")?)
                .context("failed to parse MCP initialize result")?;

        info!(
            server = %server_name,
            protocol = %result.protocol_version,
            server_name = %result.server_info.name,
            "MCP server initialized"
        );

        transport.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    pub fn server_info(&self) -> &InitializeResult {
        &self.server_info
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpTransportError::Closed {
                reason: format!("MCP client for '{}' was shut down", self.server_name),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl McpClientTrait for McpClient {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn state(&self) -> McpClientState {
        if self.closed.load(Ordering::SeqCst) {
            McpClientState::Closed
        } else {
            McpClientState::Ready
        }
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDef>> {
        self.ensure_ready()?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_TOOL_PAGES {
            let params = match cursor.take() {
                Some(c) => Some(serde_json::to_value(ToolsListParams { cursor: Some(c) })?),
                None => None,
            };
            let resp = self.transport.request("tools/list", params).await?;
            let page: ToolsListResult =
                serde_json::from_value(resp.result.context("tools/list returned no result")?)?;
            tools.extend(page.tools);
            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        if cursor.is_some() {
            warn!(server = %self.server_name, "MCP tools/list pagination truncated");
        }

        debug!(server = %self.server_name, count = tools.len(), "fetched MCP tools");
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolsCallResult> {
        self.ensure_ready()?;

        let params = ToolsCallParams {
            name: name.into(),
            arguments,
        };
        let resp = self
            .transport
            .request("tools/call", Some(serde_json::to_value(&params)?))
            .await?;

        Ok(serde_json::from_value(
            resp.result.context("tools/call returned no result")?,
        )?)
    }

    async fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.transport.is_alive().await
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.transport.kill().await;
    }
}
