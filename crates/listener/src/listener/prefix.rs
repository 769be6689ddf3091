//! Listener prefixes: `scheme://host[:port]/path/`.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::protocol::ListenerError;

/// Which requests a prefix host matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    /// A literal host name or IP address
    Exact,
    /// `*`: any host that no exact prefix claims
    Unhandled,
    /// `+`: every host
    All,
}

/// A parsed listener prefix.
///
/// Equality and hashing use the original string.
#[derive(Debug, Clone)]
pub struct ListenerPrefix {
    original: String,
    host: String,
    port: u16,
    path: String,
    secure: bool,
}

struct Parts<'a> {
    secure: bool,
    host: &'a str,
    port: Option<&'a str>,
    path: &'a str,
}

fn split(uri: &str) -> Result<Parts<'_>, ListenerError> {
    let (secure, rest) = if let Some(rest) = uri.strip_prefix("https://") {
        (true, rest)
    } else if let Some(rest) = uri.strip_prefix("http://") {
        (false, rest)
    } else {
        return Err(ListenerError::invalid_prefix(uri, "Only 'http' and 'https' schemes are supported."));
    };

    // an IPv6 literal keeps its brackets as part of the host
    let host_end = if rest.starts_with('[') {
        rest.find(']').map_or(rest.len(), |i| i + 1)
    } else {
        rest.find([':', '/']).unwrap_or(rest.len())
    };
    let (host, rest) = rest.split_at(host_end);
    if host.is_empty() {
        return Err(ListenerError::invalid_prefix(uri, "No host specified."));
    }

    let Some(root) = rest.find('/') else {
        return Err(ListenerError::invalid_prefix(uri, "No path specified."));
    };
    let (port, path) = rest.split_at(root);
    let port = match port.strip_prefix(':') {
        Some(port) => Some(port),
        None if port.is_empty() => None,
        None => return Err(ListenerError::invalid_prefix(uri, "Invalid port.")),
    };

    Ok(Parts { secure, host, port, path })
}

impl ListenerPrefix {
    /// Validates a prefix string without keeping the result.
    pub fn check(uri: &str) -> Result<(), ListenerError> {
        let parts = split(uri)?;
        if let Some(port) = parts.port {
            match port.parse::<u32>() {
                Ok(port) if (1..=65535).contains(&port) => {}
                _ => return Err(ListenerError::invalid_prefix(uri, "Invalid port.")),
            }
        }
        if !uri.ends_with('/') {
            return Err(ListenerError::invalid_prefix(uri, "The prefix must end with '/'"));
        }
        Ok(())
    }

    pub fn parse(uri: &str) -> Result<Self, ListenerError> {
        Self::check(uri)?;
        let parts = split(uri)?;

        let default_port = if parts.secure { 443 } else { 80 };
        let port = parts.port.and_then(|port| port.parse().ok()).unwrap_or(default_port);

        let path = match parts.path {
            "/" => "/",
            path => path.strip_suffix('/').unwrap_or(path),
        };

        Ok(Self { original: uri.to_string(), host: parts.host.to_string(), port, path: path.to_string(), secure: parts.secure })
    }

    pub fn as_str(&self) -> &str {
        &self.original
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn host_kind(&self) -> HostKind {
        match self.host.as_str() {
            "*" => HostKind::Unhandled,
            "+" => HostKind::All,
            _ => HostKind::Exact,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The path without its trailing `/`, or `/` for the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

impl PartialEq for ListenerPrefix {
    fn eq(&self, other: &Self) -> bool {
        self.original == other.original
    }
}

impl Eq for ListenerPrefix {}

impl Hash for ListenerPrefix {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.original.hash(state);
    }
}

impl fmt::Display for ListenerPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(uri: &str) -> &'static str {
        match ListenerPrefix::check(uri) {
            Err(ListenerError::InvalidPrefix { reason, .. }) => reason,
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn check_rejects_malformed_prefixes() {
        assert_eq!(reason("ftp://host/"), "Only 'http' and 'https' schemes are supported.");
        assert_eq!(reason("http://"), "No host specified.");
        assert_eq!(reason("http://:80/"), "No host specified.");
        assert_eq!(reason("http://host"), "No path specified.");
        assert_eq!(reason("http://host:0/"), "Invalid port.");
        assert_eq!(reason("http://host:65536/"), "Invalid port.");
        assert_eq!(reason("http://host:abc/"), "Invalid port.");
        assert_eq!(reason("http://host/path"), "The prefix must end with '/'");
    }

    #[test]
    fn parse_defaults() {
        let prefix = ListenerPrefix::parse("http://localhost/").unwrap();
        assert_eq!(prefix.host(), "localhost");
        assert_eq!(prefix.port(), 80);
        assert_eq!(prefix.path(), "/");
        assert!(!prefix.is_secure());
        assert_eq!(prefix.host_kind(), HostKind::Exact);

        let prefix = ListenerPrefix::parse("https://*/api/v1/").unwrap();
        assert_eq!(prefix.port(), 443);
        assert_eq!(prefix.path(), "/api/v1");
        assert!(prefix.is_secure());
        assert_eq!(prefix.host_kind(), HostKind::Unhandled);
    }

    #[test]
    fn parse_explicit_port_and_ipv6() {
        let prefix = ListenerPrefix::parse("http://+:8080/app/").unwrap();
        assert_eq!(prefix.port(), 8080);
        assert_eq!(prefix.host_kind(), HostKind::All);

        let prefix = ListenerPrefix::parse("http://[::1]:9000/").unwrap();
        assert_eq!(prefix.host(), "[::1]");
        assert_eq!(prefix.port(), 9000);
    }

    #[test]
    fn equality_by_original_string() {
        let a = ListenerPrefix::parse("http://localhost:80/a/").unwrap();
        let b = ListenerPrefix::parse("http://localhost/a/").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, ListenerPrefix::parse("http://localhost:80/a/").unwrap());
        assert_eq!(a.to_string(), "http://localhost:80/a/");
    }
}
