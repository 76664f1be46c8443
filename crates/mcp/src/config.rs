//! MCP server configuration: validation of raw `{servers: {...}}` input into
//! typed per-server descriptors.
//!
//! Validation is a pure function over JSON. Loading from disk is a thin
//! wrapper around it.

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    time::Duration,
};

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
    tracing::debug,
};

use crate::error::ConfigError;

/// Request timeout applied when a server does not configure one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Transport type for MCP server connections. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
    Sse,
    Http,
}

impl TransportKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stdio" => Some(Self::Stdio),
            "sse" => Some(Self::Sse),
            "http" => Some(Self::Http),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::Http => "http",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated configuration for a single MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerConfig {
    pub name: String,
    pub transport: TransportKind,
    /// Per-request timeout (handshake, tool listing, each tool call).
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// Command to spawn (stdio only, never empty for stdio).
    pub command: String,
    pub args: Vec<String>,
    /// Extra environment for the child process.
    pub env: HashMap<String, String>,
    /// Server URL (sse/http only, never empty for those).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Custom HTTP headers sent with every remote request.
    pub headers: HashMap<String, String>,
}

impl ServerConfig {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Stdio,
            timeout: DEFAULT_TIMEOUT,
            command: command.into(),
            args,
            env: HashMap::new(),
            url: None,
            headers: HashMap::new(),
        }
    }

    pub fn remote(name: impl Into<String>, transport: TransportKind, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport,
            timeout: DEFAULT_TIMEOUT,
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            url: Some(url.into()),
            headers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// The validated set of enabled servers, keyed (and therefore iterated) by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct McpConfig {
    pub servers: BTreeMap<String, ServerConfig>,
}

impl McpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a JSON config file. A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "MCP config file not found, using empty");
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let raw: Value = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_value(&raw)
    }

    /// Validate raw `{servers: {name: {...}}}` input.
    ///
    /// Disabled servers are dropped before any other check, so a disabled
    /// entry with a broken shape never fails the load.
    pub fn from_value(raw: &Value) -> Result<Self, ConfigError> {
        let root = raw
            .as_object()
            .ok_or_else(|| ConfigError::Shape("top level must be an object".into()))?;

        let servers = match root.get("servers") {
            None | Some(Value::Null) => return Ok(Self::default()),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(ConfigError::Shape("'servers' must be an object".into())),
        };

        let mut out = BTreeMap::new();
        for (name, entry) in servers {
            let entry = entry.as_object().ok_or_else(|| {
                ConfigError::Shape(format!("server '{name}' must be an object"))
            })?;

            if entry.get("disabled").and_then(Value::as_bool) == Some(true) {
                debug!(server = %name, "skipping disabled MCP server");
                continue;
            }

            let config = validate_server(name, entry)?;
            out.insert(name.clone(), config);
        }

        Ok(Self { servers: out })
    }

    pub fn get(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.servers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Add a pre-validated server (programmatic setup, tests).
    pub fn insert(&mut self, config: ServerConfig) {
        self.servers.insert(config.name.clone(), config);
    }
}

fn validate_server(name: &str, entry: &Map<String, Value>) -> Result<ServerConfig, ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::InvalidName {
            name: name.to_string(),
        });
    }

    let transport = match entry.get("type") {
        None | Some(Value::Null) => TransportKind::Stdio,
        Some(Value::String(kind)) => {
            TransportKind::parse(kind).ok_or_else(|| ConfigError::UnknownTransport {
                server: name.to_string(),
                kind: kind.clone(),
            })?
        },
        Some(other) => {
            return Err(ConfigError::UnknownTransport {
                server: name.to_string(),
                kind: other.to_string(),
            });
        },
    };

    let command = non_empty_string(entry.get("command"));
    let url = non_empty_string(entry.get("url"));

    let command = match transport {
        TransportKind::Stdio => command.ok_or_else(|| ConfigError::MissingCommand {
            server: name.to_string(),
        })?,
        TransportKind::Sse | TransportKind::Http => {
            if url.is_none() {
                return Err(ConfigError::MissingUrl {
                    server: name.to_string(),
                    kind: transport.to_string(),
                });
            }
            command.unwrap_or_default()
        },
    };

    let args = entry
        .get("args")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    Ok(ServerConfig {
        name: name.to_string(),
        transport,
        timeout: parse_timeout(entry.get("timeout")),
        command,
        args,
        env: string_map(name, "env", entry.get("env")),
        url,
        headers: string_map(name, "headers", entry.get("headers")),
    })
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Milliseconds; anything missing, non-numeric or non-positive gets the default.
fn parse_timeout(value: Option<&Value>) -> Duration {
    value
        .and_then(Value::as_f64)
        .filter(|ms| ms.is_finite() && *ms >= 1.0)
        .map(|ms| Duration::from_millis(ms as u64))
        .unwrap_or(DEFAULT_TIMEOUT)
}

/// All-or-nothing: one non-string value drops the whole map.
fn string_map(server: &str, field: &str, value: Option<&Value>) -> HashMap<String, String> {
    let Some(Value::Object(map)) = value else {
        return HashMap::new();
    };

    let mut out = HashMap::with_capacity(map.len());
    for (key, v) in map {
        let Some(s) = v.as_str() else {
            debug!(server = %server, field, key = %key, "dropping map with non-string value");
            return HashMap::new();
        };
        out.insert(key.clone(), s.to_string());
    }
    out
}

mod duration_ms {
    use {serde::Serializer, std::time::Duration};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }
}
