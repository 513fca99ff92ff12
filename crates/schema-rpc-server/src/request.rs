//! Transport metadata handed to context extractors

use std::net::SocketAddr;

use http::{HeaderMap, Method};

/// What the transport knows about an inbound call, apart from its body
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub http_method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
}

impl RequestMeta {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// A header value, if present and valid ASCII
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// The client address, preferring the first `X-Forwarded-For` hop
    pub fn client_ip(&self) -> Option<String> {
        self.header("x-forwarded-for")
            .and_then(|forwarded| forwarded.split(',').next())
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty())
            .or_else(|| self.remote_addr.map(|addr| addr.ip().to_string()))
    }
}
