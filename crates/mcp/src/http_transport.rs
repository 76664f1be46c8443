//! Streamable HTTP transport for remote MCP servers.
//!
//! Every JSON-RPC message is an HTTP POST to the server URL. The server
//! answers with either a JSON body or a short `text/event-stream` carrying
//! the response. A session id handed out by the server is echoed back on
//! every later request and released with a DELETE on close.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    reqwest::{
        Body, Method, Request, Response,
        header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue},
    },
    serde_json::Value,
    tokio::sync::RwLock,
    tracing::{debug, warn},
    url::Url,
};

use crate::{
    error::{Context, Error, McpTransportError, Result},
    event_stream,
    fetch::SharedFetch,
    traits::McpTransport,
    transport::{check_rpc_error, notification},
    types::{JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION},
};

const MCP_PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";
const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";
const STREAMABLE_ACCEPT: &str = "application/json, text/event-stream";
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Streamable-HTTP transport for a remote MCP server.
pub struct StreamableHttpTransport {
    url: Url,
    headers: HeaderMap,
    fetch: SharedFetch,
    request_timeout: Duration,
    next_id: AtomicU64,
    session_id: RwLock<Option<String>>,
    closed: AtomicBool,
}

impl StreamableHttpTransport {
    pub fn new(
        url: Url,
        headers: HeaderMap,
        fetch: SharedFetch,
        request_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            url,
            headers,
            fetch,
            request_timeout,
            next_id: AtomicU64::new(1),
            session_id: RwLock::new(None),
            closed: AtomicBool::new(false),
        })
    }

    async fn build(&self, method: Method, timeout: Duration) -> Request {
        let mut req = build_request(method, self.url.clone(), &self.headers, timeout);
        let headers = req.headers_mut();
        headers.insert(
            MCP_PROTOCOL_VERSION_HEADER,
            HeaderValue::from_static(PROTOCOL_VERSION),
        );
        if let Some(session_id) = self.session_id.read().await.as_deref()
            && let Ok(value) = HeaderValue::from_str(session_id)
        {
            headers.insert(MCP_SESSION_ID_HEADER, value);
        }
        req
    }

    async fn post(&self, method: &str, body: &impl serde::Serialize) -> Result<Response> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpTransportError::Closed {
                reason: "transport was closed".into(),
            }
            .into());
        }

        let mut req = self.build(Method::POST, self.request_timeout).await;
        req.headers_mut()
            .insert(ACCEPT, HeaderValue::from_static(STREAMABLE_ACCEPT));
        req.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *req.body_mut() = Some(Body::from(serde_json::to_vec(body)?));

        let resp = self
            .fetch
            .fetch(req)
            .await
            .map_err(|e| fetch_error(method, self.request_timeout, e))?;

        self.store_session_id(&resp).await;

        if !resp.status().is_success() {
            return Err(status_error(method, resp).await);
        }
        Ok(resp)
    }

    async fn store_session_id(&self, response: &Response) {
        let Some(session_id) = response
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return;
        };

        let mut slot = self.session_id.write().await;
        if slot.as_deref() != Some(session_id) {
            debug!(url = %self.url, session_id = %session_id, "updated MCP session id");
            *slot = Some(session_id.to_string());
        }
    }
}

/// A request carrying the configured headers and a timeout.
pub(crate) fn build_request(
    method: Method,
    url: Url,
    headers: &HeaderMap,
    timeout: Duration,
) -> Request {
    let mut req = Request::new(method, url);
    req.headers_mut().extend(headers.clone());
    *req.timeout_mut() = Some(timeout);
    req
}

/// Map a fetch failure onto transport errors. SSRF rejections pass through
/// untouched so callers can tell a blocked target from a dead one.
pub(crate) fn fetch_error(method: &str, after: Duration, err: Error) -> Error {
    match err {
        Error::Reqwest(e) if e.is_timeout() => McpTransportError::Timeout {
            method: method.to_string(),
            after,
        }
        .into(),
        Error::Reqwest(e) => McpTransportError::Closed {
            reason: format!("HTTP request for '{method}' failed: {e}"),
        }
        .into(),
        other => other,
    }
}

pub(crate) async fn status_error(method: &str, resp: Response) -> Error {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    McpTransportError::HttpStatus {
        method: method.to_string(),
        status,
        body,
    }
    .into()
}

fn is_event_stream(resp: &Response) -> bool {
    resp.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|base| base.trim().eq_ignore_ascii_case("text/event-stream"))
}

/// Pick the response for `id` out of an event-stream body. Server requests
/// and notifications interleaved before it are skipped.
fn response_from_event_stream(body: &str, id: &Value, method: &str) -> Result<JsonRpcResponse> {
    event_stream::parse_body(body)?
        .into_iter()
        .filter(|event| event.event == "message")
        .filter_map(|event| serde_json::from_str::<JsonRpcResponse>(&event.data).ok())
        .find(|resp| &resp.id == id)
        .with_context(|| format!("no JSON-RPC response for '{method}' in event stream"))
}

#[async_trait::async_trait]
impl McpTransport for StreamableHttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);

        debug!(method = %method, id = %id, url = %self.url, "HTTP client -> MCP server");

        let http_resp = self.post(method, &req).await?;

        let resp = if is_event_stream(&http_resp) {
            let body = http_resp
                .text()
                .await
                .map_err(|e| fetch_error(method, self.request_timeout, e.into()))?;
            response_from_event_stream(&body, &req.id, method)?
        } else {
            http_resp
                .json::<JsonRpcResponse>()
                .await
                .with_context(|| format!("failed to parse JSON-RPC response for '{method}'"))?
        };

        check_rpc_error(method, resp)
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        debug!(method = %method, url = %self.url, "HTTP client -> MCP server (notification)");
        self.post(method, &notification(method, params)).await?;
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn kill(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(session_id) = self.session_id.write().await.take() else {
            return;
        };
        let Ok(value) = HeaderValue::from_str(&session_id) else {
            return;
        };

        let mut req = build_request(Method::DELETE, self.url.clone(), &self.headers, CLOSE_TIMEOUT);
        req.headers_mut().insert(
            MCP_PROTOCOL_VERSION_HEADER,
            HeaderValue::from_static(PROTOCOL_VERSION),
        );
        req.headers_mut().insert(MCP_SESSION_ID_HEADER, value);

        if let Err(e) = self.fetch.fetch(req).await {
            warn!(url = %self.url, error = %e, "failed to close MCP streamable HTTP session");
        }
    }
}
