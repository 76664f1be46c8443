//! Legacy HTTP+SSE transport.
//!
//! The client opens a long-lived GET event stream. The server's first
//! `endpoint` event names the URL that JSON-RPC messages are POSTed to;
//! responses come back as `message` events on the stream.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    futures::{StreamExt, stream::BoxStream},
    reqwest::{
        Body, Method, StatusCode,
        header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue},
    },
    serde_json::Value,
    tokio::{
        sync::{Mutex, oneshot},
        task::AbortHandle,
    },
    tracing::{debug, info, warn},
    url::Url,
};

use crate::{
    error::{Error, McpTransportError, Result},
    event_stream::{EventStreamDecoder, SseEvent},
    fetch::SharedFetch,
    http_transport::{build_request, fetch_error, status_error},
    traits::McpTransport,
    transport::{PendingMap, await_response, dispatch_response, notification},
    types::{JsonRpcRequest, JsonRpcResponse},
};

/// Upper bound on the open event stream; it is expected to stay up.
const STREAM_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24);

type ByteStream = BoxStream<'static, reqwest::Result<bytes::Bytes>>;

/// HTTP+SSE transport for a remote MCP server.
///
/// The event stream is read by a background task that lives no longer than
/// the transport: dropping the transport aborts it and closes the stream.
pub struct SseTransport {
    endpoint: Url,
    headers: HeaderMap,
    fetch: SharedFetch,
    request_timeout: Duration,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    reader: AbortHandle,
}

impl SseTransport {
    /// Open the event stream and wait for the server to announce its
    /// message endpoint.
    pub async fn connect(
        url: Url,
        headers: HeaderMap,
        fetch: SharedFetch,
        request_timeout: Duration,
    ) -> Result<Arc<Self>> {
        info!(url = %url, "opening MCP SSE stream");

        let mut req = build_request(Method::GET, url, &headers, STREAM_TIMEOUT);
        req.headers_mut()
            .insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        let handshake = async {
            let resp = fetch
                .fetch(req)
                .await
                .map_err(|e| fetch_error("sse", request_timeout, e))?;
            if !resp.status().is_success() {
                return Err(status_error("sse", resp).await);
            }
            // Redirects are followed by the fetch; the endpoint is relative
            // to where the stream was actually served from.
            let base = resp.url().clone();
            let mut stream: ByteStream = resp.bytes_stream().boxed();
            let mut decoder = EventStreamDecoder::new();
            let endpoint = read_endpoint(&mut stream, &mut decoder).await?;
            Ok::<_, Error>((base, endpoint, stream, decoder))
        };

        let (base, raw_endpoint, stream, decoder) = tokio::time::timeout(request_timeout, handshake)
            .await
            .map_err(|_| McpTransportError::Timeout {
                method: "sse endpoint".into(),
                after: request_timeout,
            })??;

        let endpoint = resolve_endpoint(&base, &raw_endpoint)?;
        debug!(endpoint = %endpoint, "MCP SSE endpoint announced");

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_messages(
            stream,
            decoder,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ))
        .abort_handle();

        Ok(Arc::new(Self {
            endpoint,
            headers,
            fetch,
            request_timeout,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            reader,
        }))
    }

    async fn post(&self, method: &str, body: Vec<u8>) -> Result<()> {
        let mut req = build_request(
            Method::POST,
            self.endpoint.clone(),
            &self.headers,
            self.request_timeout,
        );
        req.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *req.body_mut() = Some(Body::from(body));

        let resp = self
            .fetch
            .fetch(req)
            .await
            .map_err(|e| fetch_error(method, self.request_timeout, e))?;
        if !resp.status().is_success() {
            return Err(status_error(method, resp).await);
        }
        if resp.status() != StatusCode::ACCEPTED {
            debug!(method = %method, status = %resp.status(), "MCP SSE POST acknowledged");
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpTransportError::Closed {
                reason: "event stream ended".into(),
            }
            .into());
        }
        Ok(())
    }
}

async fn read_endpoint(stream: &mut ByteStream, decoder: &mut EventStreamDecoder) -> Result<String> {
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| fetch_error("sse", Duration::ZERO, e.into()))?;
        if let Some(event) = decoder
            .push(&chunk)?
            .into_iter()
            .find(|event| event.event == "endpoint")
        {
            return Ok(event.data.trim().to_string());
        }
    }
    Err(McpTransportError::Closed {
        reason: "event stream ended before an endpoint was announced".into(),
    }
    .into())
}

/// The announced endpoint must stay on the origin the stream came from.
fn resolve_endpoint(base: &Url, raw: &str) -> Result<Url> {
    let endpoint = base.join(raw)?;
    if endpoint.origin() != base.origin() {
        return Err(Error::message(format!(
            "MCP SSE endpoint {endpoint} is not on the same origin as {base}"
        )));
    }
    Ok(endpoint)
}

async fn dispatch_messages(events: Vec<SseEvent>, pending: &PendingMap) {
    for event in events.into_iter().filter(|e| e.event == "message") {
        dispatch_response(pending, &event.data).await;
    }
}

async fn read_messages(
    mut stream: ByteStream,
    mut decoder: EventStreamDecoder,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
) {
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => match decoder.push(&chunk) {
                Ok(events) => dispatch_messages(events, &pending).await,
                Err(e) => {
                    warn!(error = %e, "dropping MCP SSE stream");
                    break;
                },
            },
            Err(e) => {
                warn!(error = %e, "error reading MCP SSE stream");
                break;
            },
        }
    }
    dispatch_messages(decoder.finish().into_iter().collect(), &pending).await;

    debug!("MCP SSE stream closed");
    closed.store(true, Ordering::SeqCst);
    pending.lock().await.clear();
}

#[async_trait::async_trait]
impl McpTransport for SseTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        self.ensure_open()?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);
        let id_key = req.id.to_string();
        let body = serde_json::to_vec(&req)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id_key.clone(), tx);

        debug!(method = %method, id = %id, endpoint = %self.endpoint, "SSE client -> MCP server");
        if let Err(e) = self.post(method, body).await {
            self.pending.lock().await.remove(&id_key);
            return Err(e);
        }

        await_response(&self.pending, &id_key, method, rx, self.request_timeout).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.ensure_open()?;
        let body = serde_json::to_vec(&notification(method, params))?;
        self.post(method, body).await
    }

    async fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn kill(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.reader.abort();
        self.pending.lock().await.clear();
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
