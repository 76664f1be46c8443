use std::time::Duration;

use switchyard_common::FromMessage;

use crate::state::ConnectionState;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Ssrf(#[from] SsrfError),
    #[error(transparent)]
    Transport(#[from] McpTransportError),
    #[error(transparent)]
    Manager(#[from] McpManagerError),
    #[error(transparent)]
    Tool(#[from] ToolCallError),
    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    /// True when the underlying transport is gone (process exited, stream
    /// ended, connection refused).
    pub fn is_transport_closed(&self) -> bool {
        matches!(self, Self::Transport(McpTransportError::Closed { .. }))
    }

    /// True for request and tool-call timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Transport(McpTransportError::Timeout { .. }) | Self::Tool(ToolCallError::Timeout { .. })
        )
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

switchyard_common::impl_context!();

/// Structural problems in the server configuration. Always fatal at load time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid MCP config: {0}")]
    Shape(String),
    #[error("invalid MCP server name: {name:?}")]
    InvalidName { name: String },
    #[error("MCP server '{server}' has unknown transport type '{kind}' (expected stdio, sse or http)")]
    UnknownTransport { server: String, kind: String },
    #[error("MCP server '{server}' uses stdio transport but has no command")]
    MissingCommand { server: String },
    #[error("MCP server '{server}' uses {kind} transport but has no url")]
    MissingUrl { server: String, kind: String },
    #[error("failed to read MCP config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse MCP config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Outbound URL policy violations.
#[derive(Debug, thiserror::Error)]
pub enum SsrfError {
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("SSRF blocked: unsupported url scheme '{scheme}' (only http and https are allowed)")]
    UnsupportedScheme { scheme: String },
    #[error("SSRF blocked: {reason}")]
    Blocked { host: String, reason: String },
    #[error("DNS resolution failed for {host}: {reason}")]
    Resolution { host: String, reason: String },
}

impl SsrfError {
    /// Whether the target itself was rejected by policy (as opposed to a
    /// malformed url or a DNS failure).
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. } | Self::UnsupportedScheme { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum McpTransportError {
    #[error("MCP transport closed: {reason}")]
    Closed { reason: String },
    #[error("MCP request '{method}' timed out after {}ms", .after.as_millis())]
    Timeout { method: String, after: Duration },
    #[error("MCP server returned HTTP {status} for '{method}': {body}")]
    HttpStatus {
        method: String,
        status: u16,
        body: String,
    },
    #[error("MCP error on '{method}': code={code} message={message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum McpManagerError {
    #[error("MCP server '{server}' is not configured")]
    ServerNotFound { server: String },
    #[error("MCP server '{server}' is not connected (state: {state})")]
    NotConnected {
        server: String,
        state: ConnectionState,
    },
    #[error("invalid connection state transition {from} -> {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ToolCallError {
    #[error("MCP tool '{tool}' on '{server}' timed out after {}ms", .after.as_millis())]
    Timeout {
        server: String,
        tool: String,
        after: Duration,
    },
    #[error("MCP tool '{tool}' on '{server}' failed: {message}")]
    Failed {
        server: String,
        tool: String,
        message: String,
    },
}
