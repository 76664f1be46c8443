//! Fakes shared by unit tests across modules.

use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    bytes::Bytes,
    futures::channel::mpsc,
    reqwest::{Body, Method, Request, Response, ResponseBuilderExt, StatusCode, header},
    serde_json::{Value, json},
    url::Url,
};

use crate::{
    client::McpClientState,
    config::ServerConfig,
    error::{Error, McpTransportError, Result},
    fetch::{FetchFactory, HttpFetch, SharedFetch},
    ssrf::DnsResolver,
    traits::{McpClientTrait, McpConnector, SharedClient},
    types::{McpToolDef, ToolContent, ToolsCallResult},
};

// ── DNS ─────────────────────────────────────────────────────────────────────

/// Resolver answering from a mutable table (so tests can simulate rebinding).
#[derive(Clone, Default)]
pub(crate) struct StaticResolver {
    table: Arc<Mutex<HashMap<String, Vec<IpAddr>>>>,
}

impl StaticResolver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(self, host: &str, addrs: &[&str]) -> Self {
        self.set(host, addrs);
        self
    }

    pub(crate) fn set(&self, host: &str, addrs: &[&str]) {
        let ips = addrs.iter().map(|a| a.parse().unwrap()).collect();
        self.table.lock().unwrap().insert(host.to_string(), ips);
    }
}

#[async_trait]
impl DnsResolver for StaticResolver {
    async fn resolve(&self, host: &str, _port: u16) -> std::io::Result<Vec<IpAddr>> {
        self.table.lock().unwrap().get(host).cloned().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("no such host {host}"))
        })
    }
}

// ── HTTP ────────────────────────────────────────────────────────────────────

enum FetchMode {
    Ok,
    RedirectOnce(StatusCode, String),
    RedirectAlways(StatusCode, String),
    RedirectChain(String),
}

/// Records every request that actually reaches the "network".
pub(crate) struct RecordingFetch {
    mode: FetchMode,
    seen: Mutex<Vec<String>>,
}

impl RecordingFetch {
    fn with_mode(mode: FetchMode) -> Self {
        Self {
            mode,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn ok() -> Self {
        Self::with_mode(FetchMode::Ok)
    }

    pub(crate) fn redirect_once(status: StatusCode, location: &str) -> Self {
        Self::with_mode(FetchMode::RedirectOnce(status, location.into()))
    }

    pub(crate) fn redirect_always(status: StatusCode, location: &str) -> Self {
        Self::with_mode(FetchMode::RedirectAlways(status, location.into()))
    }

    /// Redirects to `{prefix}1`, `{prefix}2`, ... forever.
    pub(crate) fn redirect_chain(prefix: &str) -> Self {
        Self::with_mode(FetchMode::RedirectChain(prefix.into()))
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

fn response(status: StatusCode, location: Option<&str>) -> Response {
    let mut builder = http::Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(location) = location {
        builder = builder.header(header::LOCATION, location);
    }
    Response::from(builder.body(r#"{"ok":true}"#.to_string()).unwrap())
}

#[async_trait]
impl HttpFetch for RecordingFetch {
    async fn fetch(&self, request: Request) -> Result<Response> {
        let n = {
            let mut seen = self.seen.lock().unwrap();
            seen.push(request.url().to_string());
            seen.len()
        };
        Ok(match &self.mode {
            FetchMode::Ok => response(StatusCode::OK, None),
            FetchMode::RedirectOnce(status, location) if n == 1 => {
                response(*status, Some(location))
            },
            FetchMode::RedirectOnce(..) => response(StatusCode::OK, None),
            FetchMode::RedirectAlways(status, location) => response(*status, Some(location)),
            FetchMode::RedirectChain(prefix) => {
                response(StatusCode::FOUND, Some(&format!("{prefix}{n}")))
            },
        })
    }
}

// ── SSE ─────────────────────────────────────────────────────────────────────

type Chunk = std::io::Result<Bytes>;

/// One in-memory event stream. The GET hands out the stream, which opens with
/// an `endpoint` event; every POST is acknowledged with 202.
pub(crate) struct SseFetch {
    tx: mpsc::UnboundedSender<Chunk>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Chunk>>>,
    /// Answer POSTed requests with a `message` event echoing the method.
    echo: bool,
    /// URL the GET response reports, as after a redirect.
    final_url: Option<Url>,
    posts: Mutex<Vec<String>>,
}

impl SseFetch {
    fn with_echo(echo: bool) -> Self {
        let (tx, rx) = mpsc::unbounded();
        tx.unbounded_send(Ok(Bytes::from_static(
            b"event: endpoint\ndata: /messages?session=1\n\n",
        )))
        .unwrap();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            echo,
            final_url: None,
            posts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn echo() -> Self {
        Self::with_echo(true)
    }

    /// Accepts every POST but never sends a response on the stream.
    pub(crate) fn silent() -> Self {
        Self::with_echo(false)
    }

    pub(crate) fn final_url(mut self, url: &str) -> Self {
        self.final_url = Some(url.parse().unwrap());
        self
    }

    pub(crate) fn posts(&self) -> Vec<String> {
        self.posts.lock().unwrap().clone()
    }

    /// True once the client side has dropped the event stream.
    pub(crate) fn stream_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Poll until the client drops the stream or `within` elapses.
    pub(crate) async fn wait_stream_closed(&self, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while !self.stream_closed() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

#[async_trait]
impl HttpFetch for SseFetch {
    async fn fetch(&self, request: Request) -> Result<Response> {
        if request.method() == Method::GET {
            let rx = self.rx.lock().unwrap().take().unwrap();
            let url = self
                .final_url
                .clone()
                .unwrap_or_else(|| request.url().clone());
            let resp = http::Response::builder()
                .header(header::CONTENT_TYPE, "text/event-stream")
                .url(url)
                .body(Body::wrap_stream(rx))
                .unwrap();
            return Ok(Response::from(resp));
        }

        self.posts.lock().unwrap().push(request.url().to_string());
        let body = request.body().and_then(Body::as_bytes).unwrap();
        let msg: Value = serde_json::from_slice(body).unwrap();
        if self.echo
            && let Some(id) = msg.get("id")
        {
            let reply = json!({"jsonrpc": "2.0", "id": id, "result": {"echo": msg["method"]}});
            self.tx
                .unbounded_send(Ok(Bytes::from(format!("event: message\ndata: {reply}\n\n"))))
                .unwrap();
        }
        let resp = http::Response::builder()
            .status(StatusCode::ACCEPTED)
            .body(String::new())
            .unwrap();
        Ok(Response::from(resp))
    }
}

/// Fetch factory handing out one shared fetch.
pub(crate) struct FixedFetchFactory(pub SharedFetch);

impl FetchFactory for FixedFetchFactory {
    fn create_fetch(&self) -> Result<SharedFetch> {
        Ok(Arc::clone(&self.0))
    }
}

// ── MCP client ──────────────────────────────────────────────────────────────

pub(crate) fn tool(name: &str) -> McpToolDef {
    McpToolDef {
        name: name.into(),
        description: Some(format!("{name} tool")),
        input_schema: json!({"type": "object"}),
    }
}

/// Scripted behaviour for one fake server.
#[derive(Clone, Default)]
pub(crate) struct FakeServer {
    pub tools: Vec<McpToolDef>,
    pub fail_connect: Option<String>,
    pub fail_list: bool,
    pub connect_delay: Option<Duration>,
}

impl FakeServer {
    pub(crate) fn with_tools(names: &[&str]) -> Self {
        Self {
            tools: names.iter().map(|n| tool(n)).collect(),
            ..Default::default()
        }
    }
}

/// Tool behaviour is keyed by tool name:
/// `slow` hangs, `boom` fails, `crash` reports a closed transport,
/// `mixed` returns image + resource + unknown content, `resource_only`
/// returns nothing the host understands, `leak` echoes a secret,
/// anything else echoes `message`.
pub(crate) struct FakeClient {
    name: String,
    server: FakeServer,
    closed: AtomicBool,
    pub(crate) list_calls: AtomicUsize,
    shutdowns: Arc<AtomicUsize>,
}

#[async_trait]
impl McpClientTrait for FakeClient {
    fn server_name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> McpClientState {
        if self.closed.load(Ordering::SeqCst) {
            McpClientState::Closed
        } else {
            McpClientState::Ready
        }
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDef>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.server.fail_list {
            return Err(Error::message("tools/list exploded"));
        }
        Ok(self.server.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolsCallResult> {
        let content = match name {
            "slow" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                vec![]
            },
            "boom" => return Err(Error::message("server said no")),
            "crash" => {
                return Err(McpTransportError::Closed {
                    reason: "process exited".into(),
                }
                .into());
            },
            "mixed" => vec![
                ToolContent::Image {
                    data: "aGk=".into(),
                    mime_type: "image/png".into(),
                },
                ToolContent::Resource {
                    resource: json!({"uri": "file:///x"}),
                },
                ToolContent::Unsupported,
                ToolContent::Text {
                    text: "caption".into(),
                },
            ],
            "resource_only" => vec![ToolContent::Resource {
                resource: json!({"uri": "file:///x"}),
            }],
            "leak" => vec![ToolContent::Text {
                text: "token=sk-secret-1".into(),
            }],
            "failing" => {
                return Ok(ToolsCallResult {
                    content: vec![ToolContent::Text {
                        text: "bad input sk-secret-1".into(),
                    }],
                    is_error: true,
                });
            },
            _ => vec![ToolContent::Text {
                text: arguments
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }],
        };
        Ok(ToolsCallResult {
            content,
            is_error: false,
        })
    }

    async fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct FakeConnector {
    servers: HashMap<String, FakeServer>,
    connects: Mutex<HashMap<String, usize>>,
    pub(crate) shutdowns: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn server(mut self, name: &str, server: FakeServer) -> Self {
        self.servers.insert(name.to_string(), server);
        self
    }

    pub(crate) fn connects(&self, name: &str) -> usize {
        self.connects
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl McpConnector for FakeConnector {
    async fn connect(&self, config: &ServerConfig) -> Result<SharedClient> {
        *self
            .connects
            .lock()
            .unwrap()
            .entry(config.name.clone())
            .or_default() += 1;

        let server = self.servers.get(&config.name).cloned().unwrap_or_default();
        if let Some(delay) = server.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &server.fail_connect {
            return Err(Error::message(reason.clone()));
        }
        Ok(Arc::new(FakeClient {
            name: config.name.clone(),
            server,
            closed: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            shutdowns: Arc::clone(&self.shutdowns),
        }))
    }
}
