//! HTTP fetch abstraction used by the remote transports, and the guarded
//! variant that re-runs the SSRF check on every request and every redirect.
//!
//! Validating once when a transport is built is not enough: DNS answers can
//! change between calls (rebinding) and a server can answer with a redirect
//! to an internal address. The transports therefore only ever talk to the
//! network through a [`GuardedFetch`].

use std::sync::Arc;

use {
    async_trait::async_trait,
    reqwest::{Method, Request, Response, StatusCode, header},
    tracing::debug,
    url::Url,
};

#[cfg(feature = "metrics")]
use switchyard_metrics::{counter, ssrf as ssrf_metrics};

use crate::{
    error::{Context, Error, Result},
    ssrf::UrlValidator,
};

/// Redirect hops followed before giving up.
pub const MAX_REDIRECTS: u8 = 5;

/// A fetch-compatible function: one request in, one response out.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn fetch(&self, request: Request) -> Result<Response>;
}

pub type SharedFetch = Arc<dyn HttpFetch>;

/// Plain `reqwest` client with automatic redirects turned off.
#[derive(Debug, Clone)]
pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none()) // Manual redirect handling.
            .build()
            .context("failed to build HTTP client for MCP transport")?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetch {
    async fn fetch(&self, request: Request) -> Result<Response> {
        Ok(self.client.execute(request).await?)
    }
}

/// Fetch wrapper that validates the target before each network call.
pub struct GuardedFetch {
    validator: Arc<dyn UrlValidator>,
    inner: SharedFetch,
    max_redirects: u8,
}

impl GuardedFetch {
    pub fn new(validator: Arc<dyn UrlValidator>, inner: SharedFetch) -> Self {
        Self {
            validator,
            inner,
            max_redirects: MAX_REDIRECTS,
        }
    }

    #[must_use]
    pub fn with_max_redirects(mut self, max_redirects: u8) -> Self {
        self.max_redirects = max_redirects;
        self
    }
}

#[async_trait]
impl HttpFetch for GuardedFetch {
    async fn fetch(&self, request: Request) -> Result<Response> {
        let mut current = request;
        let mut visited: Vec<String> = Vec::new();
        let mut hops = 0u8;

        loop {
            // SSRF check before each request, including every redirect hop.
            self.validator.validate_url(current.url().as_str()).await?;
            visited.push(current.url().to_string());

            let base = current.url().clone();
            let replay = current.try_clone();
            let resp = self.inner.fetch(current).await?;
            let status = resp.status();

            if !status.is_redirection() {
                return Ok(resp);
            }
            let Some(location) = resp
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
            else {
                // 304 and friends carry no Location; nothing to follow.
                return Ok(resp);
            };

            if hops >= self.max_redirects {
                return Err(Error::message(format!(
                    "too many redirects ({} hops, max {})",
                    hops + 1,
                    self.max_redirects
                )));
            }

            let next = base.join(&location)?;
            if visited.contains(&next.to_string()) {
                return Err(Error::message(format!(
                    "redirect loop detected: {base} → {next}"
                )));
            }

            debug!(from = %base, to = %next, status = %status, "following MCP redirect");
            #[cfg(feature = "metrics")]
            counter!(ssrf_metrics::REDIRECTS_TOTAL).increment(1);

            let template = replay.context("cannot replay a streaming request body across a redirect")?;
            current = redirected_request(template, status, &base, next);
            hops += 1;
        }
    }
}

/// Build the follow-up request for a redirect, per fetch semantics: 303 (and
/// 301/302 for POST) become a body-less GET; 307/308 replay as-is.
/// Credentials are not forwarded to a different origin.
fn redirected_request(mut request: Request, status: StatusCode, from: &Url, to: Url) -> Request {
    let downgrade = status == StatusCode::SEE_OTHER
        || (matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND)
            && request.method() == Method::POST);

    if downgrade {
        *request.method_mut() = Method::GET;
        *request.body_mut() = None;
        let headers = request.headers_mut();
        headers.remove(header::CONTENT_TYPE);
        headers.remove(header::CONTENT_LENGTH);
    }

    if from.origin() != to.origin() {
        let headers = request.headers_mut();
        headers.remove(header::AUTHORIZATION);
        headers.remove(header::COOKIE);
    }

    *request.url_mut() = to;
    request
}

/// Build a guarded fetch over a fresh `reqwest` client.
pub fn create_guarded_fetch(validator: Arc<dyn UrlValidator>) -> Result<SharedFetch> {
    let inner: SharedFetch = Arc::new(ReqwestFetch::new()?);
    Ok(Arc::new(GuardedFetch::new(validator, inner)))
}

/// Produces a fetch per remote transport.
pub trait FetchFactory: Send + Sync {
    fn create_fetch(&self) -> Result<SharedFetch>;
}

/// Default factory: a guarded `reqwest` fetch sharing one validator.
pub struct GuardedFetchFactory {
    validator: Arc<dyn UrlValidator>,
}

impl GuardedFetchFactory {
    pub fn new(validator: Arc<dyn UrlValidator>) -> Self {
        Self { validator }
    }
}

impl FetchFactory for GuardedFetchFactory {
    fn create_fetch(&self) -> Result<SharedFetch> {
        create_guarded_fetch(Arc::clone(&self.validator))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            error::SsrfError,
            ssrf::SsrfGuard,
            test_support::{RecordingFetch, StaticResolver},
        },
    };

    fn get(url: &str) -> Request {
        Request::new(Method::GET, Url::parse(url).unwrap())
    }

    fn guarded(resolver: StaticResolver, inner: Arc<RecordingFetch>) -> GuardedFetch {
        let guard = SsrfGuard::new(Arc::new(resolver));
        GuardedFetch::new(Arc::new(guard), inner)
    }

    #[tokio::test]
    async fn test_public_then_blocked_host() {
        let resolver = StaticResolver::new()
            .with("public.example", &["93.184.216.34"])
            .with("intranet.example", &["192.168.10.7"]);
        let inner = Arc::new(RecordingFetch::ok());
        let fetch = guarded(resolver, Arc::clone(&inner));

        let resp = fetch.fetch(get("https://public.example/mcp")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let err = fetch
            .fetch(get("https://intranet.example/mcp"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Ssrf(SsrfError::Blocked { .. })));
        assert_eq!(inner.urls(), vec!["https://public.example/mcp"]);
    }

    #[tokio::test]
    async fn test_dns_rebinding_is_caught_on_next_call() {
        let resolver = StaticResolver::new().with("rebind.example", &["93.184.216.34"]);
        let inner = Arc::new(RecordingFetch::ok());
        let fetch = guarded(resolver.clone(), Arc::clone(&inner));

        fetch.fetch(get("https://rebind.example/mcp")).await.unwrap();

        resolver.set("rebind.example", &["127.0.0.1"]);
        let err = fetch.fetch(get("https://rebind.example/mcp")).await.unwrap_err();
        assert!(matches!(err, Error::Ssrf(SsrfError::Blocked { .. })));
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn test_redirect_to_metadata_endpoint_is_blocked() {
        let resolver = StaticResolver::new().with("public.example", &["93.184.216.34"]);
        let inner = Arc::new(RecordingFetch::redirect_once(
            StatusCode::FOUND,
            "http://169.254.169.254/latest/meta-data/",
        ));
        let fetch = guarded(resolver, Arc::clone(&inner));

        let err = fetch.fetch(get("https://public.example/mcp")).await.unwrap_err();
        assert!(matches!(err, Error::Ssrf(SsrfError::Blocked { .. })));
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn test_redirect_to_public_host_is_followed() {
        let resolver = StaticResolver::new()
            .with("public.example", &["93.184.216.34"])
            .with("mirror.example", &["93.184.216.35"]);
        let inner = Arc::new(RecordingFetch::redirect_once(
            StatusCode::TEMPORARY_REDIRECT,
            "https://mirror.example/mcp",
        ));
        let fetch = guarded(resolver, Arc::clone(&inner));

        let resp = fetch.fetch(get("https://public.example/mcp")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(inner.urls(), vec![
            "https://public.example/mcp",
            "https://mirror.example/mcp"
        ]);
    }

    #[tokio::test]
    async fn test_redirect_loop_detected() {
        let resolver = StaticResolver::new().with("public.example", &["93.184.216.34"]);
        let inner = Arc::new(RecordingFetch::redirect_always(
            StatusCode::FOUND,
            "https://public.example/mcp",
        ));
        let fetch = guarded(resolver, inner);

        let err = fetch.fetch(get("https://public.example/mcp")).await.unwrap_err();
        assert!(err.to_string().contains("redirect loop"));
    }

    #[tokio::test]
    async fn test_too_many_redirects() {
        let resolver = StaticResolver::new().with("public.example", &["93.184.216.34"]);
        let inner = Arc::new(RecordingFetch::redirect_chain("https://public.example/hop"));
        let fetch = guarded(resolver, inner).with_max_redirects(2);

        let err = fetch.fetch(get("https://public.example/start")).await.unwrap_err();
        assert!(err.to_string().contains("too many redirects"));
    }

    #[test]
    fn test_see_other_downgrades_post() {
        let mut req = Request::new(Method::POST, Url::parse("https://a.example/mcp").unwrap());
        *req.body_mut() = Some("{}".into());
        req.headers_mut()
            .insert(header::AUTHORIZATION, "Bearer t".parse().unwrap());

        let from = req.url().clone();
        let next = redirected_request(
            req,
            StatusCode::SEE_OTHER,
            &from,
            Url::parse("https://b.example/mcp").unwrap(),
        );
        assert_eq!(next.method(), Method::GET);
        assert!(next.body().is_none());
        assert!(next.headers().get(header::AUTHORIZATION).is_none());
    }

    #[test]
    fn test_temporary_redirect_keeps_method_and_same_origin_auth() {
        let mut req = Request::new(Method::POST, Url::parse("https://a.example/mcp").unwrap());
        *req.body_mut() = Some("{}".into());
        req.headers_mut()
            .insert(header::AUTHORIZATION, "Bearer t".parse().unwrap());

        let from = req.url().clone();
        let next = redirected_request(
            req,
            StatusCode::TEMPORARY_REDIRECT,
            &from,
            Url::parse("https://a.example/v2/mcp").unwrap(),
        );
        assert_eq!(next.method(), Method::POST);
        assert!(next.body().is_some());
        assert!(next.headers().get(header::AUTHORIZATION).is_some());
    }
}
