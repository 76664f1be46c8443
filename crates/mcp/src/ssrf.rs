//! SSRF protection for remote MCP servers.
//!
//! Every remote URL is parsed, scheme-checked, and its host resolved; the
//! connection is refused if the name is reserved or any resolved address is
//! loopback, private, link-local (cloud metadata lives there) or otherwise
//! not globally routable.

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    sync::Arc,
};

use {
    async_trait::async_trait,
    tracing::{debug, warn},
    url::{Host, Url},
};

#[cfg(feature = "metrics")]
use switchyard_metrics::{counter, labels, ssrf as ssrf_metrics};

use crate::error::SsrfError;

/// Hostnames that never leave the machine or the cloud provider's network.
const RESERVED_HOSTS: &[&str] = &["localhost", "localhost.localdomain"];
const RESERVED_SUFFIXES: &[&str] = &[".localhost", ".internal"];

/// Injectable DNS lookup.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolves through the system resolver (`getaddrinfo`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl DnsResolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Anything that can vet a URL before it is used for network I/O.
#[async_trait]
pub trait UrlValidator: Send + Sync {
    async fn validate_url(&self, url: &str) -> Result<Url, SsrfError>;
}

/// Blocklist policy backed by DNS resolution.
#[derive(Clone)]
pub struct SsrfGuard {
    resolver: Arc<dyn DnsResolver>,
}

impl Default for SsrfGuard {
    fn default() -> Self {
        Self::new(Arc::new(SystemResolver))
    }
}

impl std::fmt::Debug for SsrfGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsrfGuard").finish_non_exhaustive()
    }
}

impl SsrfGuard {
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self { resolver }
    }

    async fn check(&self, raw: &str) -> Result<Url, SsrfError> {
        let url = Url::parse(raw).map_err(|e| SsrfError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => {},
            scheme => {
                return Err(SsrfError::UnsupportedScheme {
                    scheme: scheme.to_string(),
                });
            },
        }

        let port = url.port_or_known_default().unwrap_or(443);
        match url.host() {
            None => Err(SsrfError::InvalidUrl {
                url: raw.to_string(),
                reason: "url has no host".into(),
            }),
            Some(Host::Ipv4(ip)) => check_ip(&ip.to_string(), IpAddr::V4(ip)).map(|()| url),
            Some(Host::Ipv6(ip)) => check_ip(&ip.to_string(), IpAddr::V6(ip)).map(|()| url),
            Some(Host::Domain(domain)) => {
                let host = domain.trim_end_matches('.').to_ascii_lowercase();
                check_reserved_name(&host)?;

                let addrs =
                    self.resolver
                        .resolve(&host, port)
                        .await
                        .map_err(|e| SsrfError::Resolution {
                            host: host.clone(),
                            reason: e.to_string(),
                        })?;
                if addrs.is_empty() {
                    return Err(SsrfError::Resolution {
                        host,
                        reason: "no addresses returned".into(),
                    });
                }
                for ip in &addrs {
                    check_ip(&host, *ip)?;
                }
                debug!(host = %host, addrs = ?addrs, "SSRF check passed");
                Ok(url)
            },
        }
    }
}

#[async_trait]
impl UrlValidator for SsrfGuard {
    async fn validate_url(&self, url: &str) -> Result<Url, SsrfError> {
        let result = self.check(url).await;
        if let Err(ref e) = result
            && e.is_blocked()
        {
            warn!(error = %e, "refusing outbound MCP request");
            #[cfg(feature = "metrics")]
            counter!(ssrf_metrics::BLOCKED_TOTAL, labels::REASON => "policy").increment(1);
        }
        result
    }
}

fn check_reserved_name(host: &str) -> Result<(), SsrfError> {
    let reserved = RESERVED_HOSTS.contains(&host)
        || RESERVED_SUFFIXES.iter().any(|suffix| host.ends_with(suffix));
    if reserved {
        return Err(SsrfError::Blocked {
            host: host.to_string(),
            reason: format!("{host} is a reserved private hostname"),
        });
    }
    Ok(())
}

fn check_ip(host: &str, ip: IpAddr) -> Result<(), SsrfError> {
    match blocked_category(ip) {
        Some(category) => Err(SsrfError::Blocked {
            host: host.to_string(),
            reason: format!("{host} resolves to a private address ({category}: {ip})"),
        }),
        None => Ok(()),
    }
}

/// Why an address is off limits, or `None` when it is publicly routable.
pub fn blocked_category(ip: IpAddr) -> Option<&'static str> {
    match ip {
        IpAddr::V4(v4) => blocked_v4(v4),
        IpAddr::V6(v6) => embedded_v4(v6)
            .and_then(blocked_v4)
            .or_else(|| blocked_v6(v6)),
    }
}

/// IPv4 address carried inside an IPv6 one that routes to it: mapped
/// `::ffff:0:0/96`, NAT64 `64:ff9b::/96` and 6to4 `2002::/16`.
fn embedded_v4(v6: Ipv6Addr) -> Option<Ipv4Addr> {
    if let Some(v4) = v6.to_ipv4_mapped() {
        return Some(v4);
    }
    match v6.segments() {
        [0x64, 0xff9b, 0, 0, 0, 0, hi, lo] => Some(join_v4(hi, lo)),
        [0x2002, hi, lo, ..] => Some(join_v4(hi, lo)),
        _ => None,
    }
}

fn join_v4(hi: u16, lo: u16) -> Ipv4Addr {
    Ipv4Addr::from((u32::from(hi) << 16) | u32::from(lo))
}

fn blocked_v4(v4: Ipv4Addr) -> Option<&'static str> {
    let [a, b, c, _] = v4.octets();
    if v4.is_loopback() {
        Some("loopback")
    } else if v4.is_private() {
        Some("rfc1918")
    } else if v4.is_link_local() {
        Some("link-local/metadata")
    } else if v4.is_unspecified() || a == 0 {
        Some("unspecified")
    } else if v4.is_broadcast() {
        Some("broadcast")
    } else if v4.is_multicast() {
        Some("multicast")
    } else if a >= 240 {
        // 240.0.0.0/4
        Some("reserved")
    } else if a == 100 && (b & 0xC0) == 64 {
        // 100.64.0.0/10
        Some("carrier-grade nat")
    } else if a == 192 && b == 0 && c == 0 {
        // 192.0.0.0/24
        Some("ietf protocol assignment")
    } else {
        None
    }
}

fn blocked_v6(v6: Ipv6Addr) -> Option<&'static str> {
    let first = v6.segments()[0];
    if v6.is_loopback() {
        Some("loopback")
    } else if v6.is_unspecified() {
        Some("unspecified")
    } else if (first & 0xFE00) == 0xFC00 {
        // fc00::/7
        Some("unique local")
    } else if (first & 0xFFC0) == 0xFE80 {
        // fe80::/10
        Some("link-local")
    } else if v6.is_multicast() {
        Some("multicast")
    } else {
        None
    }
}
