//! Builds the transport a configured server asks for.
//!
//! Remote targets are checked against the URL policy here, before any fetch
//! or transport object exists, and every request they make afterwards goes
//! through a guarded fetch that checks again.

use std::sync::Arc;

use {
    async_trait::async_trait,
    reqwest::header::{HeaderMap, HeaderName, HeaderValue},
    tracing::debug,
    url::Url,
};

use crate::{
    client::McpClient,
    config::{ServerConfig, TransportKind},
    error::{Error, Result},
    fetch::{FetchFactory, GuardedFetchFactory, SharedFetch},
    http_transport::StreamableHttpTransport,
    sse_transport::SseTransport,
    ssrf::{SsrfGuard, UrlValidator},
    traits::{McpConnector, McpTransport, SharedClient},
    transport::StdioTransport,
};

/// Chooses and constructs transports.
pub struct TransportFactory {
    validator: Arc<dyn UrlValidator>,
    fetch_factory: Arc<dyn FetchFactory>,
}

impl Default for TransportFactory {
    fn default() -> Self {
        Self::with_validator(Arc::new(SsrfGuard::default()))
    }
}

impl TransportFactory {
    pub fn new(validator: Arc<dyn UrlValidator>, fetch_factory: Arc<dyn FetchFactory>) -> Self {
        Self {
            validator,
            fetch_factory,
        }
    }

    /// Factory whose fetches are guarded by the same validator.
    pub fn with_validator(validator: Arc<dyn UrlValidator>) -> Self {
        let fetch_factory = Arc::new(GuardedFetchFactory::new(Arc::clone(&validator)));
        Self::new(validator, fetch_factory)
    }

    pub async fn build(&self, config: &ServerConfig) -> Result<Arc<dyn McpTransport>> {
        match config.transport {
            TransportKind::Stdio => {
                let transport: Arc<dyn McpTransport> =
                    StdioTransport::spawn(&config.command, &config.args, &config.env, config.timeout)
                        .await?;
                Ok(transport)
            },
            TransportKind::Sse => {
                let (url, headers, fetch) = self.remote_parts(config).await?;
                let transport: Arc<dyn McpTransport> =
                    SseTransport::connect(url, headers, fetch, config.timeout).await?;
                Ok(transport)
            },
            TransportKind::Http => {
                let (url, headers, fetch) = self.remote_parts(config).await?;
                let transport: Arc<dyn McpTransport> =
                    StreamableHttpTransport::new(url, headers, fetch, config.timeout);
                Ok(transport)
            },
        }
    }

    async fn remote_parts(
        &self,
        config: &ServerConfig,
    ) -> Result<(Url, HeaderMap, SharedFetch)> {
        let raw = config
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::message(format!("{} transport requires a url", config.transport)))?;

        let url = self.validator.validate_url(raw).await?;
        let headers = header_map(config)?;
        let fetch = self.fetch_factory.create_fetch()?;
        debug!(server = %config.name, url = %url, transport = %config.transport, "remote MCP target accepted");
        Ok((url, headers, fetch))
    }
}

fn header_map(config: &ServerConfig) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(config.headers.len());
    for (name, value) in &config.headers {
        let header = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            Error::message(format!(
                "MCP server '{}' has invalid header name '{name}': {e}",
                config.name
            ))
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            Error::message(format!(
                "MCP server '{}' has invalid value for header '{name}': {e}",
                config.name
            ))
        })?;
        map.insert(header, value);
    }
    Ok(map)
}

/// Production connector: transport from the factory, then the handshake.
#[derive(Default)]
pub struct TransportConnector {
    factory: TransportFactory,
}

impl TransportConnector {
    pub fn new(factory: TransportFactory) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl McpConnector for TransportConnector {
    async fn connect(&self, config: &ServerConfig) -> Result<SharedClient> {
        let transport = self.factory.build(config).await?;
        match McpClient::connect(&config.name, Arc::clone(&transport)).await {
            Ok(client) => Ok(Arc::new(client)),
            Err(e) => {
                transport.kill().await;
                Err(e)
            },
        }
    }
}
