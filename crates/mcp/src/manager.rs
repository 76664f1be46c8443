//! McpManager: lifecycle management for multiple MCP server connections.
//!
//! One [`ManagedServer`] exists per configured server for the whole life of
//! the manager. Each owns its own lock, so servers connect, fail and shut
//! down independently of each other.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use {
    futures::future::join_all,
    serde_json::Value,
    tokio::sync::RwLock,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use switchyard_metrics::{counter, gauge, histogram, labels, mcp as mcp_metrics};

use crate::{
    config::{McpConfig, ServerConfig, TransportKind},
    error::{Error, McpManagerError, McpTransportError, Result, ToolCallError},
    factory::TransportConnector,
    state::ConnectionState,
    traits::{McpConnector, SharedClient},
    types::{McpToolDef, ToolsCallResult},
};

/// Read-only status projection of one managed server.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ServerStatusSnapshot {
    pub name: String,
    pub state: ConnectionState,
    pub transport: TransportKind,
    pub tool_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Mutable part of a managed server, behind its own lock.
///
/// `client` is `Some` exactly when `state == Connected`. `tools` is only
/// written by [`McpManager::get_tools`] and cleared on (re)connect and
/// teardown.
#[derive(Default)]
struct ServerRecord {
    state: ConnectionState,
    client: Option<SharedClient>,
    tools: Option<Vec<McpToolDef>>,
    last_error: Option<String>,
    /// Bumped on every teardown so late results of in-flight work are
    /// recognised and discarded.
    generation: u64,
}

impl ServerRecord {
    fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(McpManagerError::InvalidTransition {
                from: self.state,
                to: next,
            }
            .into());
        }
        self.state = next;
        Ok(())
    }

    /// Drop handles and cache, move to `next`. Returns the released client.
    fn release(&mut self, next: ConnectionState) -> Option<SharedClient> {
        self.generation += 1;
        self.tools = None;
        self.state = next;
        self.client.take()
    }
}

/// A configured server and its connection record.
struct ManagedServer {
    name: String,
    config: ServerConfig,
    record: RwLock<ServerRecord>,
}

impl ManagedServer {
    fn new(config: ServerConfig) -> Self {
        Self {
            name: config.name.clone(),
            config,
            record: RwLock::new(ServerRecord::default()),
        }
    }

    async fn snapshot(&self) -> ServerStatusSnapshot {
        let record = self.record.read().await;
        ServerStatusSnapshot {
            name: self.name.clone(),
            state: record.state,
            transport: self.config.transport,
            tool_count: record.tools.as_ref().map_or(0, Vec::len),
            last_error: record.last_error.clone(),
        }
    }

    /// The live client plus the generation it belongs to, or `NotConnected`.
    async fn connected_client(&self) -> Result<(SharedClient, u64)> {
        let record = self.record.read().await;
        match (&record.client, record.state) {
            (Some(client), ConnectionState::Connected) => {
                Ok((Arc::clone(client), record.generation))
            },
            _ => Err(McpManagerError::NotConnected {
                server: self.name.clone(),
                state: record.state,
            }
            .into()),
        }
    }

    /// The transport died under a live connection: `Connected -> Error`.
    async fn mark_transport_closed(&self, generation: u64, reason: &str) {
        let client = {
            let mut record = self.record.write().await;
            if record.generation != generation || record.state != ConnectionState::Connected {
                return;
            }
            let client = record.release(ConnectionState::Error);
            record.last_error = Some(reason.to_string());
            client
        };
        warn!(server = %self.name, reason = %reason, "MCP transport closed");
        #[cfg(feature = "metrics")]
        gauge!(mcp_metrics::SERVERS_CONNECTED).decrement(1.0);
        if let Some(client) = client {
            client.shutdown().await;
        }
    }

    async fn teardown(&self) {
        let (client, was_connected) = {
            let mut record = self.record.write().await;
            let was_connected = record.state == ConnectionState::Connected;
            (record.release(ConnectionState::Disconnected), was_connected)
        };
        #[cfg(feature = "metrics")]
        if was_connected {
            gauge!(mcp_metrics::SERVERS_CONNECTED).decrement(1.0);
        }
        if let Some(client) = client {
            debug!(server = %self.name, "closing MCP connection");
            client.shutdown().await;
        } else if was_connected {
            warn!(server = %self.name, "connected MCP server had no client handle");
        }
    }
}

/// Manages the lifecycle of multiple MCP server connections.
pub struct McpManager {
    servers: BTreeMap<String, Arc<ManagedServer>>,
    connector: Arc<dyn McpConnector>,
}

impl McpManager {
    /// Manager using the real transports behind the default SSRF guard.
    pub fn new(config: McpConfig) -> Self {
        Self::with_connector(config, Arc::new(TransportConnector::default()))
    }

    pub fn with_connector(config: McpConfig, connector: Arc<dyn McpConnector>) -> Self {
        let servers = config
            .servers
            .into_values()
            .map(|cfg| (cfg.name.clone(), Arc::new(ManagedServer::new(cfg))))
            .collect();
        Self { servers, connector }
    }

    fn server(&self, name: &str) -> Result<&Arc<ManagedServer>> {
        self.servers.get(name).ok_or_else(|| {
            McpManagerError::ServerNotFound {
                server: name.to_string(),
            }
            .into()
        })
    }

    /// Configured server names, sorted.
    pub fn server_names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    /// Connect a server. Returns the state the server ended up in.
    ///
    /// A call while the server is already `Connecting` or `Connected` is a
    /// no-op. Failures (blocked URL, spawn error, handshake timeout) land in
    /// `Error` with `last_error` set; only an unknown name is an `Err`.
    pub async fn connect(&self, name: &str) -> Result<ConnectionState> {
        let server = self.server(name)?;

        let generation = {
            let mut record = server.record.write().await;
            if record.state.is_active() {
                debug!(server = %name, state = %record.state, "MCP connect skipped, already active");
                return Ok(record.state);
            }
            record.transition(ConnectionState::Connecting)?;
            record.tools = None;
            record.generation
        };

        info!(
            server = %name,
            transport = %server.config.transport,
            "connecting to MCP server"
        );
        #[cfg(feature = "metrics")]
        counter!(
            mcp_metrics::SERVER_CONNECTIONS_TOTAL,
            labels::SERVER => name.to_string(),
            labels::TRANSPORT => server.config.transport.as_str()
        )
        .increment(1);

        // Network work happens outside the lock.
        let timeout = server.config.timeout;
        let outcome = match tokio::time::timeout(timeout, self.connector.connect(&server.config))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(McpTransportError::Timeout {
                method: "initialize".into(),
                after: timeout,
            }
            .into()),
        };

        let mut record = server.record.write().await;
        if record.generation != generation {
            // Shut down while we were connecting; the result is stale.
            let state = record.state;
            drop(record);
            debug!(server = %name, "discarding MCP connection finished after shutdown");
            if let Ok(client) = outcome {
                client.shutdown().await;
            }
            return Ok(state);
        }

        match outcome {
            Ok(client) => {
                record.transition(ConnectionState::Connected)?;
                record.client = Some(client);
                record.last_error = None;
                info!(server = %name, "MCP server connected");
                #[cfg(feature = "metrics")]
                gauge!(mcp_metrics::SERVERS_CONNECTED).increment(1.0);
            },
            Err(e) => {
                record.transition(ConnectionState::Error)?;
                record.last_error = Some(e.to_string());
                warn!(server = %name, error = %e, "failed to connect MCP server");
                #[cfg(feature = "metrics")]
                counter!(
                    mcp_metrics::SERVER_CONNECTION_ERRORS_TOTAL,
                    labels::SERVER => name.to_string()
                )
                .increment(1);
            },
        }
        Ok(record.state)
    }

    /// Connect every configured server concurrently. Returns the names that
    /// ended up connected.
    pub async fn connect_all(&self) -> Vec<String> {
        let results = join_all(self.servers.keys().map(|name| async move {
            match self.connect(name).await {
                Ok(ConnectionState::Connected) => Some(name.clone()),
                Ok(_) => None,
                Err(e) => {
                    warn!(server = %name, error = %e, "failed to start MCP server");
                    None
                },
            }
        }))
        .await;
        results.into_iter().flatten().collect()
    }

    /// Tear down one server and return it to `Disconnected`.
    pub async fn disconnect(&self, name: &str) -> Result<()> {
        self.server(name)?.teardown().await;
        Ok(())
    }

    /// Disconnect then connect, dropping the cached tool list.
    pub async fn reconnect(&self, name: &str) -> Result<ConnectionState> {
        self.disconnect(name).await?;
        self.connect(name).await
    }

    /// The server's tool catalog, fetched once per connection.
    ///
    /// Fails with `NotConnected` when there is no cache and the server is not
    /// connected.
    pub async fn get_tools(&self, name: &str) -> Result<Vec<McpToolDef>> {
        let server = self.server(name)?;

        if let Some(tools) = server.record.read().await.tools.clone() {
            return Ok(tools);
        }

        let (client, generation) = server.connected_client().await?;
        let timeout = server.config.timeout;
        let tools = match tokio::time::timeout(timeout, client.list_tools()).await {
            Ok(Ok(tools)) => tools,
            Ok(Err(e)) => {
                if e.is_transport_closed() {
                    server.mark_transport_closed(generation, &e.to_string()).await;
                }
                return Err(e);
            },
            Err(_) => {
                return Err(McpTransportError::Timeout {
                    method: "tools/list".into(),
                    after: timeout,
                }
                .into());
            },
        };

        debug!(server = %name, count = tools.len(), "fetched MCP tools");

        let mut record = server.record.write().await;
        if record.generation == generation && record.state == ConnectionState::Connected {
            record.tools = Some(tools.clone());
        }
        Ok(tools)
    }

    /// Call a tool on a connected server with the server's timeout.
    ///
    /// A failed call leaves the connection alone unless the transport itself
    /// reports that it closed.
    pub async fn call_tool(&self, name: &str, tool: &str, params: Value) -> Result<ToolsCallResult> {
        let server = self.server(name)?;
        let (client, generation) = server.connected_client().await?;
        let timeout = server.config.timeout;

        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let outcome = match tokio::time::timeout(timeout, client.call_tool(tool, params)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) if e.is_timeout() => Err(timeout_error(name, tool, timeout)),
            Ok(Err(e)) => {
                if e.is_transport_closed() {
                    server.mark_transport_closed(generation, &e.to_string()).await;
                }
                Err(ToolCallError::Failed {
                    server: name.to_string(),
                    tool: tool.to_string(),
                    message: e.to_string(),
                }
                .into())
            },
            Err(_) => Err(timeout_error(name, tool, timeout)),
        };

        #[cfg(feature = "metrics")]
        {
            counter!(
                mcp_metrics::TOOL_CALLS_TOTAL,
                labels::SERVER => name.to_string(),
                labels::TOOL => tool.to_string()
            )
            .increment(1);
            histogram!(mcp_metrics::TOOL_CALL_DURATION_SECONDS, labels::SERVER => name.to_string())
                .record(started.elapsed().as_secs_f64());
            if let Err(ref e) = outcome {
                let error_type = if e.is_timeout() { "timeout" } else { "failed" };
                counter!(
                    mcp_metrics::TOOL_CALL_ERRORS_TOTAL,
                    labels::SERVER => name.to_string(),
                    labels::ERROR_TYPE => error_type
                )
                .increment(1);
            }
        }

        outcome
    }

    /// Status of every configured server, sorted by name. Pure read.
    pub async fn status_all(&self) -> Vec<ServerStatusSnapshot> {
        let mut statuses = Vec::with_capacity(self.servers.len());
        for server in self.servers.values() {
            statuses.push(server.snapshot().await);
        }
        statuses
    }

    /// Status of a single server.
    pub async fn status(&self, name: &str) -> Option<ServerStatusSnapshot> {
        match self.servers.get(name) {
            Some(server) => Some(server.snapshot().await),
            None => None,
        }
    }

    /// Names of currently connected servers, sorted.
    pub async fn connected_servers(&self) -> Vec<String> {
        let mut names = Vec::new();
        for (name, server) in &self.servers {
            if server.record.read().await.state == ConnectionState::Connected {
                names.push(name.clone());
            }
        }
        names
    }

    /// Shut down all servers. Close errors are swallowed; safe to call
    /// repeatedly and while connects or calls are in flight.
    pub async fn shutdown(&self) {
        join_all(self.servers.values().map(|server| server.teardown())).await;
        info!(servers = self.servers.len(), "MCP manager shut down");
    }
}

fn timeout_error(server: &str, tool: &str, after: Duration) -> Error {
    ToolCallError::Timeout {
        server: server.to_string(),
        tool: tool.to_string(),
        after,
    }
    .into()
}
