//! Connector addressing.
//!
//! Endpoints are written as URLs; the scheme selects the client invocation
//! mode. `beanwire://host:port` connects a synchronous client,
//! `beanwire+async://host:port` a callback-driven one. Anything else is a
//! configuration error, raised before any socket is opened.

use std::time::Duration;

use url::Url;

use crate::error::{BeanwireError, Result};

/// Scheme for the synchronous (blocking-call) client mode.
pub const SCHEME_SYNC: &str = "beanwire";
/// Scheme for the asynchronous (callback) client mode.
pub const SCHEME_ASYNC: &str = "beanwire+async";

/// Default timeout for synchronous calls.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Client invocation mode, selected by the URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Each call awaits its response.
    Sync,
    /// Each call returns immediately; the response fires a callback.
    Async,
}

/// A parsed connector endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorAddr {
    /// Hostname or address from the URL.
    pub host: String,
    /// TCP port (required, no default).
    pub port: u16,
    /// Invocation mode derived from the scheme.
    pub mode: CallMode,
}

impl ConnectorAddr {
    /// Parse a connector URL.
    ///
    /// # Errors
    ///
    /// Returns `Config` for an unparseable URL, an unknown scheme, or a
    /// missing host or port.
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input)
            .map_err(|e| BeanwireError::Config(format!("invalid connector url {input:?}: {e}")))?;

        let mode = match url.scheme() {
            SCHEME_SYNC => CallMode::Sync,
            SCHEME_ASYNC => CallMode::Async,
            other => {
                return Err(BeanwireError::Config(format!(
                    "unknown connector scheme {other:?} (expected {SCHEME_SYNC:?} or {SCHEME_ASYNC:?})"
                )))
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| BeanwireError::Config(format!("connector url {input:?} has no host")))?
            .to_string();
        let port = url
            .port()
            .ok_or_else(|| BeanwireError::Config(format!("connector url {input:?} has no port")))?;

        Ok(Self { host, port, mode })
    }

    /// `host:port` form for `TcpStream::connect`.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Tunables for a client connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Timeout applied to each synchronous call.
    pub call_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_scheme() {
        let addr = ConnectorAddr::parse("beanwire://mgmt.example.com:9875").unwrap();
        assert_eq!(addr.mode, CallMode::Sync);
        assert_eq!(addr.host, "mgmt.example.com");
        assert_eq!(addr.port, 9875);
        assert_eq!(addr.socket_addr(), "mgmt.example.com:9875");
    }

    #[test]
    fn test_async_scheme() {
        let addr = ConnectorAddr::parse("beanwire+async://127.0.0.1:7000").unwrap();
        assert_eq!(addr.mode, CallMode::Async);
        assert_eq!(addr.host, "127.0.0.1");
    }

    #[test]
    fn test_unknown_scheme_is_config_error() {
        let err = ConnectorAddr::parse("http://localhost:80").unwrap_err();
        assert!(matches!(err, BeanwireError::Config(_)));
    }

    #[test]
    fn test_missing_port_is_config_error() {
        let err = ConnectorAddr::parse("beanwire://localhost").unwrap_err();
        assert!(matches!(err, BeanwireError::Config(_)));
    }

    #[test]
    fn test_garbage_is_config_error() {
        assert!(ConnectorAddr::parse("not a url").is_err());
    }
}
