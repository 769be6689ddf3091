//! Session settings.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::Request;
use micro_listener::protocol::body::RequestBody;

/// Extra validation of an upgrade request. Returns the reason to reject it, if any.
pub type HandshakeChecker = Arc<dyn Fn(&Request<RequestBody>) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub struct WebSocketConfig {
    /// Largest payload of an outgoing frame; longer messages are fragmented (default: 1016)
    pub fragment_length: usize,
    /// Largest payload of an incoming frame (default: 16 MiB)
    pub max_frame_size: usize,
    /// Largest incoming message after reassembly (default: 64 MiB)
    pub max_message_size: usize,
    /// How long a close handshake or a ping waits for the peer (default: 1 s)
    pub close_timeout: Duration,
    /// Subprotocols the server speaks, by preference
    pub protocols: Vec<String>,
    /// Accepted `Origin` values; any origin when empty
    pub allowed_origins: Vec<String>,
    pub handshake_checker: Option<HandshakeChecker>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            fragment_length: 1016,
            max_frame_size: 16 << 20,
            max_message_size: 64 << 20,
            close_timeout: Duration::from_secs(1),
            protocols: Vec::new(),
            allowed_origins: Vec::new(),
            handshake_checker: None,
        }
    }
}

impl fmt::Debug for WebSocketConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketConfig")
            .field("fragment_length", &self.fragment_length)
            .field("max_frame_size", &self.max_frame_size)
            .field("max_message_size", &self.max_message_size)
            .field("close_timeout", &self.close_timeout)
            .field("protocols", &self.protocols)
            .field("allowed_origins", &self.allowed_origins)
            .field("handshake_checker", &self.handshake_checker.is_some())
            .finish()
    }
}

impl WebSocketConfig {
    pub fn builder() -> WebSocketConfigBuilder {
        WebSocketConfigBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct WebSocketConfigBuilder {
    config: WebSocketConfig,
}

impl WebSocketConfigBuilder {
    pub fn fragment_length(mut self, length: usize) -> Self {
        self.config.fragment_length = length.max(1);
        self
    }

    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.config.protocols.push(protocol.into());
        self
    }

    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.config.allowed_origins.push(origin.into());
        self
    }

    pub fn handshake_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn(&Request<RequestBody>) -> Option<String> + Send + Sync + 'static,
    {
        self.config.handshake_checker = Some(Arc::new(checker));
        self
    }

    pub fn build(self) -> WebSocketConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = WebSocketConfig::default();
        assert_eq!(config.fragment_length, 1016);
        assert_eq!(config.max_frame_size, 16 * 1024 * 1024);
        assert_eq!(config.max_message_size, 64 * 1024 * 1024);
        assert_eq!(config.close_timeout, Duration::from_millis(1000));
        assert!(config.handshake_checker.is_none());
    }

    #[test]
    fn builder() {
        let config = WebSocketConfig::builder()
            .fragment_length(0)
            .protocol("chat")
            .allow_origin("http://example.com")
            .handshake_checker(|_request| None)
            .build();
        assert_eq!(config.fragment_length, 1);
        assert_eq!(config.protocols, vec!["chat".to_string()]);
        assert_eq!(config.allowed_origins, vec!["http://example.com".to_string()]);
        assert!(config.handshake_checker.is_some());
    }
}
