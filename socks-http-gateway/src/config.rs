use std::fmt;

use url::{Host, Url};

use crate::error::{GatewayError, Result};

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:1085";
pub const DEFAULT_UPSTREAM_URL: &str = "http://localhost:8888";

/// Network address of the upstream HTTP proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamProxy {
    pub host: String,
    pub port: u16,
}

impl UpstreamProxy {
    /// Extract host and port from an `http://` proxy URL.
    /// Path, query and credentials are ignored; a missing port means 80.
    pub fn from_url(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| GatewayError::InvalidUpstream {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != "http" {
            return Err(invalid("only the http scheme is supported"));
        }

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(invalid("missing host")),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port"))?;

        Ok(Self { host, port })
    }
}

impl fmt::Display for UpstreamProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Everything the gateway needs at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_addr: String,
    pub upstream: UpstreamProxy,
}

impl GatewayConfig {
    pub fn new(listen_addr: impl Into<String>, upstream_url: &str) -> Result<Self> {
        Ok(Self {
            listen_addr: listen_addr.into(),
            upstream: UpstreamProxy::from_url(upstream_url)?,
        })
    }
}
