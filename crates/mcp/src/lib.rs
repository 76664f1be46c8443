//! MCP (Model Context Protocol) client support for switchyard.
//!
//! This crate provides:
//! - Server configuration validation (`config`)
//! - SSRF policy for remote servers and a re-validating HTTP fetch (`ssrf`, `fetch`)
//! - JSON-RPC transports over stdio, legacy SSE and streamable HTTP
//!   (`transport`, `sse_transport`, `http_transport`)
//! - Transport selection per configured server (`factory`)
//! - MCP client for protocol handshake and tool interactions (`client`)
//! - Per-server connection lifecycle and tool caching (`manager`)
//! - Tool bridge adapting MCP tools to the agent tool interface (`tool_bridge`)

pub mod client;
pub mod config;
pub mod error;
mod event_stream;
pub mod factory;
pub mod fetch;
pub mod http_transport;
pub mod manager;
pub mod sse_transport;
pub mod ssrf;
pub mod state;
#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod test_support;
pub mod tool_bridge;
pub mod traits;
pub mod transport;
pub mod types;

pub use {
    client::{McpClient, McpClientState},
    config::{McpConfig, ServerConfig, TransportKind},
    error::{ConfigError, Error, McpManagerError, McpTransportError, Result, SsrfError, ToolCallError},
    factory::{TransportConnector, TransportFactory},
    fetch::{
        FetchFactory, GuardedFetch, GuardedFetchFactory, HttpFetch, ReqwestFetch, SharedFetch,
        create_guarded_fetch,
    },
    manager::{McpManager, ServerStatusSnapshot},
    ssrf::{DnsResolver, SsrfGuard, SystemResolver, UrlValidator},
    state::ConnectionState,
    tool_bridge::{
        HostContent, McpAgentTool, McpToolBridge, ToolDetails, ToolOutput, qualified_tool_name,
        resolve_all,
    },
    traits::{McpClientTrait, McpConnector, McpTransport, SharedClient},
};
