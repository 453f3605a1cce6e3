//! Server configuration.
//!
//! Every value is fixed once [`Server::serve`](crate::Server::serve) starts.
//! The defaults are the reference deployment's:
//!
//! | Setting | Default |
//! |---|---|
//! | read timeout | 5 s |
//! | write timeout (per-request deadline) | 5 s |
//! | request timeout | 5 s |
//! | idle keep-alive timeout | 30 s |
//! | drain deadline | write + request = 10 s |

use std::time::Duration;

pub const READ_TIMEOUT: Duration = Duration::from_secs(5);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Listening address and connection timeouts.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub(crate) addr: String,
    /// Bounds reading request headers and the request body.
    pub read_timeout: Duration,
    /// Deadline the timeout middleware gives each handler.
    pub write_timeout: Duration,
    /// Extra slack granted to in-flight requests while draining.
    pub request_timeout: Duration,
    /// How long a keep-alive connection may sit without a request.
    pub idle_timeout: Duration,
}

impl ServerConfig {
    /// Defaults listening on `addr` (`host:port`).
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into(), ..Self::default() }
    }

    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// How long shutdown waits for in-flight requests.
    pub fn drain_timeout(&self) -> Duration {
        self.write_timeout + self.request_timeout
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:80".to_owned(),
            read_timeout: READ_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
            idle_timeout: IDLE_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_deployment() {
        let config = ServerConfig::default();
        assert_eq!(config.addr(), "0.0.0.0:80");
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.write_timeout, Duration::from_secs(5));
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.drain_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn drain_follows_write_and_request() {
        let config = ServerConfig::new("127.0.0.1:0")
            .with_write_timeout(Duration::from_millis(200))
            .with_request_timeout(Duration::from_millis(300));
        assert_eq!(config.drain_timeout(), Duration::from_millis(500));
        assert_eq!(config.addr(), "127.0.0.1:0");
    }
}
