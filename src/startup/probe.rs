//! Endpoint probing: is an HTTP server already answering at (host, port)?

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

/// Upper bound on how long a probe may take.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// A (host, port) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Hostname or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`, with IPv6 literals bracketed.
    #[must_use]
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Base HTTP URL of this endpoint.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.authority())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

/// Something that can tell whether a server answers at an endpoint.
#[async_trait]
pub trait EndpointProbe: Send + Sync {
    /// Returns `true` if any response arrived. Every failure is `false`.
    async fn is_running(&self, endpoint: &Endpoint) -> bool;
}

/// Probes with a single HTTP GET bounded by a timeout.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProbe {
    /// Creates a probe using [`PROBE_TIMEOUT`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeout(PROBE_TIMEOUT)
    }

    /// Creates a probe with a custom timeout.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .no_proxy()
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client for probing");
                reqwest::Client::new()
            });
        Self { client, timeout }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EndpointProbe for HttpProbe {
    async fn is_running(&self, endpoint: &Endpoint) -> bool {
        let url = endpoint.url();
        // The client timeout is advisory; this one cancels the request outright.
        match tokio::time::timeout(self.timeout, self.client.get(&url).send()).await {
            Ok(Ok(response)) => {
                tracing::debug!(%url, status = %response.status(), "Endpoint answered probe");
                true
            }
            Ok(Err(e)) => {
                tracing::debug!(%url, error = %e, "Endpoint probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(%url, timeout_ms = self.timeout.as_millis(), "Endpoint probe timed out");
                false
            }
        }
    }
}

/// Convenience wrapper around [`HttpProbe`].
pub async fn is_server_running(host: &str, port: u16) -> bool {
    HttpProbe::new().is_running(&Endpoint::new(host, port)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_formatting() {
        assert_eq!(Endpoint::new("localhost", 3000).url(), "http://localhost:3000");
        assert_eq!(Endpoint::new("::1", 8080).url(), "http://[::1]:8080");
        assert_eq!(Endpoint::new("[::1]", 8080).authority(), "[::1]:8080");
        assert_eq!(Endpoint::new("127.0.0.1", 1).to_string(), "127.0.0.1:1");
    }

    #[tokio::test]
    async fn refused_connection_is_not_running() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!is_server_running("127.0.0.1", port).await);
    }

    #[tokio::test]
    async fn unresolvable_host_is_not_running() {
        let probe = HttpProbe::new();
        assert!(!probe.is_running(&Endpoint::new("host.invalid", 80)).await);
    }
}
