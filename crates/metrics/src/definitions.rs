//! Metric name and label definitions.

/// MCP connection and tool-call metrics
pub mod mcp {
    /// Total number of MCP server connection attempts
    pub const SERVER_CONNECTIONS_TOTAL: &str = "switchyard_mcp_server_connections_total";
    /// Total number of failed MCP server connection attempts
    pub const SERVER_CONNECTION_ERRORS_TOTAL: &str =
        "switchyard_mcp_server_connection_errors_total";
    /// Number of currently connected MCP servers
    pub const SERVERS_CONNECTED: &str = "switchyard_mcp_servers_connected";
    /// Total number of MCP tool calls
    pub const TOOL_CALLS_TOTAL: &str = "switchyard_mcp_tool_calls_total";
    /// MCP tool call duration in seconds
    pub const TOOL_CALL_DURATION_SECONDS: &str = "switchyard_mcp_tool_call_duration_seconds";
    /// MCP tool call errors
    pub const TOOL_CALL_ERRORS_TOTAL: &str = "switchyard_mcp_tool_call_errors_total";
    /// Tools skipped during catalog resolution because of a name collision
    pub const TOOL_COLLISIONS_TOTAL: &str = "switchyard_mcp_tool_collisions_total";
}

/// Outbound network policy metrics
pub mod ssrf {
    /// URLs rejected by the SSRF guard
    pub const BLOCKED_TOTAL: &str = "switchyard_ssrf_blocked_total";
    /// Redirect hops re-validated by the guarded fetch
    pub const REDIRECTS_TOTAL: &str = "switchyard_ssrf_redirects_total";
}

/// Common label keys
pub mod labels {
    pub const SERVER: &str = "server";
    pub const TOOL: &str = "tool";
    pub const TRANSPORT: &str = "transport";
    pub const ERROR_TYPE: &str = "error_type";
    pub const REASON: &str = "reason";
}
