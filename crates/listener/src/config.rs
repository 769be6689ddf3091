//! Listener configuration.

use std::time::Duration;

use http::HeaderValue;

use crate::codec::{MAX_HEADER_BYTES, MAX_HEADER_NUM};

pub const DEFAULT_SERVER_NAME: &str = concat!("micro-listener/", env!("CARGO_PKG_VERSION"));

/// Settings shared by every connection of an endpoint.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Capacity of the per-connection read buffer (default: 8 KiB)
    pub read_buffer_size: usize,
    /// Largest request head accepted (default: 32 KiB)
    pub max_header_bytes: usize,
    /// Most header fields accepted in one request head (default: 100)
    pub max_headers: usize,
    /// Time allowed for the next request head to arrive (default: 300 s)
    pub idle_timeout: Duration,
    /// Time allowed to drain an unread request body before reusing the connection (default: 1 s)
    pub drain_timeout: Duration,
    /// Requests served on one connection before it is closed (default: unlimited)
    pub max_requests_per_connection: Option<u32>,
    /// Default `Server` header value
    pub server_name: String,
    /// Bind wildcard hosts on the IPv6 unspecified address (default: false)
    pub dual_stack: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 8 * 1024,
            max_header_bytes: MAX_HEADER_BYTES,
            max_headers: MAX_HEADER_NUM,
            idle_timeout: Duration::from_secs(300),
            drain_timeout: Duration::from_secs(1),
            max_requests_per_connection: None,
            server_name: DEFAULT_SERVER_NAME.to_string(),
            dual_stack: false,
        }
    }
}

impl ListenerConfig {
    pub fn builder() -> ListenerConfigBuilder {
        ListenerConfigBuilder::new()
    }

    /// The `Server` header value, falling back to the default name when `server_name` is
    /// not a valid header value.
    pub fn server_header(&self) -> HeaderValue {
        HeaderValue::from_str(&self.server_name).unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_SERVER_NAME))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListenerConfigBuilder {
    config: ListenerConfig,
}

impl ListenerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    pub fn max_header_bytes(mut self, size: usize) -> Self {
        self.config.max_header_bytes = size;
        self
    }

    /// Capped at the decoder limit of 100 header fields.
    pub fn max_headers(mut self, num: usize) -> Self {
        self.config.max_headers = num.min(MAX_HEADER_NUM);
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    pub fn max_requests_per_connection(mut self, max: u32) -> Self {
        self.config.max_requests_per_connection = Some(max);
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    pub fn dual_stack(mut self, dual_stack: bool) -> Self {
        self.config.dual_stack = dual_stack;
        self
    }

    pub fn build(self) -> ListenerConfig {
        self.config
    }
}
