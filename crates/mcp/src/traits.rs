//! Trait seams between the connection manager and the protocol layer.
//!
//! The manager only ever sees [`McpConnector`] and [`McpClientTrait`], so the
//! stdio/SSE/HTTP plumbing can be swapped (or faked in tests) without touching
//! `manager.rs` or `tool_bridge.rs`.

use std::sync::Arc;

use {async_trait::async_trait, serde_json::Value};

use crate::{
    client::McpClientState,
    config::ServerConfig,
    error::Result,
    types::{JsonRpcResponse, McpToolDef, ToolsCallResult},
};

/// Transport layer for MCP communication (JSON-RPC).
///
/// Implemented by `StdioTransport` (child process), `SseTransport` (legacy
/// HTTP+SSE) and `StreamableHttpTransport`.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and wait for the response.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse>;

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// Check if the underlying connection/process is still alive.
    async fn is_alive(&self) -> bool;

    /// Kill/close the underlying connection/process.
    async fn kill(&self);
}

/// Client-level abstraction for an initialized MCP server connection.
#[async_trait]
pub trait McpClientTrait: Send + Sync {
    /// The configured name of the connected server.
    fn server_name(&self) -> &str;

    /// Current protocol state.
    fn state(&self) -> McpClientState;

    /// Fetch the full tool catalog from the server (all pages).
    async fn list_tools(&self) -> Result<Vec<McpToolDef>>;

    /// Call a tool on the server.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolsCallResult>;

    /// Check if the server process/connection is still alive.
    async fn is_alive(&self) -> bool;

    /// Shut down the server connection. Never fails.
    async fn shutdown(&self);
}

pub type SharedClient = Arc<dyn McpClientTrait>;

/// Builds a ready (handshaken) client for one configured server.
#[async_trait]
pub trait McpConnector: Send + Sync {
    async fn connect(&self, config: &ServerConfig) -> Result<SharedClient>;
}
