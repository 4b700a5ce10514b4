//! Proxy string parsing
//!
//! Clients pass proxies as a single colon-delimited string. Three shapes are
//! recognised:
//!
//! - `host:port` - unauthenticated, used verbatim as the proxy server
//! - `scheme://host:port` - unauthenticated, used verbatim
//! - `scheme:host:port:user:pass` - authenticated, server becomes `scheme://host:port`
//!
//! Anything else parses to `None` and the session runs without a proxy.

use serde::{Deserialize, Serialize};

/// Proxy settings applied when opening an isolated browser session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxyConfig {
    pub server: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(
        server: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    pub fn requires_auth(&self) -> bool {
        self.username.is_some()
    }

    /// Parse a client-supplied proxy spec. Unrecognised shapes yield `None`.
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return None;
        }

        let parts: Vec<&str> = spec.split(':').collect();
        if parts.iter().any(|part| part.is_empty()) {
            return None;
        }

        match parts.as_slice() {
            [_host, _port] => Some(Self::new(spec)),
            [_scheme, host, _port] if host.starts_with("//") => Some(Self::new(spec)),
            [scheme, host, port, user, pass] => Some(Self::with_credentials(
                format!("{scheme}://{host}:{port}"),
                *user,
                *pass,
            )),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // credentials stay out of logs
        match &self.username {
            Some(user) => write!(f, "{} (user {})", self.server, user),
            None => write!(f, "{}", self.server),
        }
    }
}
