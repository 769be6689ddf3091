//! HTTP request head handling.
//!
//! [`RequestHead`] is produced by the header decoder once the request line and all header
//! lines have been read. The header-only checks (host, content length, transfer coding) run
//! while decoding. [`RequestHead::finish_initialization`] completes the head with what only
//! the connection knows: the local endpoint and whether the transport is secure. That is
//! where the absolute request url and the query string are built.

use std::net::SocketAddr;

use http::{Method, Request, Uri, Version, header};
use mime::Mime;

use crate::protocol::{Cookie, HeaderCollection, ParseError, PayloadSize};

/// The parsed head of one request.
#[derive(Debug, Clone)]
pub struct RequestHead {
    method: Method,
    raw_target: String,
    version: Version,
    headers: HeaderCollection,
    url: Option<Uri>,
    query: Vec<(String, String)>,
    cookies: Vec<Cookie>,
    content_length: Option<u64>,
    chunked: bool,
}

/// Request facts that do not fit into [`http::Request`], carried in its extensions.
#[derive(Debug, Clone)]
pub struct RequestDetails {
    pub raw_target: String,
    pub query: Vec<(String, String)>,
    pub cookies: Vec<Cookie>,
    pub content_length: Option<u64>,
    pub chunked: bool,
    pub keep_alive: bool,
    pub websocket: bool,
}

impl RequestDetails {
    /// First query value for `key`.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

impl RequestHead {
    pub(crate) fn new(method: Method, raw_target: String, version: Version, headers: HeaderCollection) -> Self {
        Self {
            method,
            raw_target,
            version,
            headers,
            url: None,
            query: Vec::new(),
            cookies: Vec::new(),
            content_length: None,
            chunked: false,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target exactly as it appeared on the request line.
    pub fn raw_target(&self) -> &str {
        &self.raw_target
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderCollection {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderCollection {
        &mut self.headers
    }

    /// The absolute request url, available after [`finish_initialization`](Self::finish_initialization).
    pub fn url(&self) -> Option<&Uri> {
        self.url.as_ref()
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    pub fn has_entity_body(&self) -> bool {
        self.chunked || self.content_length.is_some_and(|length| length > 0)
    }

    /// The `Host` header as sent by the client.
    pub fn user_host_name(&self) -> Option<&str> {
        self.headers.get_first(header::HOST.as_str())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.headers.get_first(header::USER_AGENT.as_str())
    }

    pub fn accept_types(&self) -> Vec<&str> {
        self.headers.get_values(header::ACCEPT.as_str())
    }

    pub fn user_languages(&self) -> Vec<&str> {
        self.headers.get_values(header::ACCEPT_LANGUAGE.as_str())
    }

    /// The `charset` parameter of the `Content-Type` header.
    pub fn content_charset(&self) -> Option<String> {
        let mime: Mime = self.headers.get_first(header::CONTENT_TYPE.as_str())?.parse().ok()?;
        mime.get_param(mime::CHARSET).map(|charset| charset.as_str().to_string())
    }

    /// The `Referer` header when it holds an absolute url.
    pub fn referer(&self) -> Option<Uri> {
        let uri: Uri = self.headers.get_first(header::REFERER.as_str())?.parse().ok()?;
        uri.scheme().map(|_| uri.clone())
    }

    pub fn expect_continue(&self) -> bool {
        self.headers
            .get_first(header::EXPECT.as_str())
            .is_some_and(|value| value.eq_ignore_ascii_case("100-continue"))
    }

    /// Whether the client allows the connection to be reused after this request.
    pub fn keep_alive(&self) -> bool {
        let connection = header::CONNECTION.as_str();
        if self.headers.contains_token(connection, "keep-alive") {
            return true;
        }
        if self.headers.contains_token(connection, "close") {
            return false;
        }
        if self.version >= Version::HTTP_11 {
            return true;
        }
        self.headers.get_first("keep-alive").is_some_and(|value| !value.eq_ignore_ascii_case("closed"))
    }

    /// Whether this request asks to switch the connection to the WebSocket protocol.
    pub fn is_websocket_request(&self) -> bool {
        self.method == Method::GET
            && self.version > Version::HTTP_10
            && self.headers.contains_token(header::UPGRADE.as_str(), "websocket")
            && self.headers.contains_token(header::CONNECTION.as_str(), "upgrade")
    }

    /// Applies the header-only request rules and determines how the body is delimited.
    pub(crate) fn parse_payload(&mut self) -> Result<PayloadSize, ParseError> {
        if self.version > Version::HTTP_10 && self.user_host_name().is_none_or(str::is_empty) {
            return Err(ParseError::InvalidHost);
        }

        if let Some(value) = self.headers.get(header::CONTENT_LENGTH.as_str()) {
            let length = value
                .trim()
                .parse::<u64>()
                .map_err(|_| ParseError::invalid_content_length(format!("value {value} is not u64")))?;
            self.content_length = Some(length);
        }

        if self.version >= Version::HTTP_11
            && let Some(value) = self.headers.get(header::TRANSFER_ENCODING.as_str())
        {
            if !value.trim().eq_ignore_ascii_case("chunked") {
                return Err(ParseError::unsupported_transfer_encoding(value));
            }
            self.chunked = true;
        }

        if !self.chunked && self.content_length.is_none() && matches!(self.method, Method::POST | Method::PUT) {
            return Err(ParseError::length_required(&self.method));
        }

        if let Some(cookie) = self.headers.get(header::COOKIE.as_str()) {
            self.cookies = Cookie::parse_header(&cookie);
        }

        Ok(match (self.chunked, self.content_length) {
            (true, _) => PayloadSize::Chunked,
            (false, Some(0) | None) => PayloadSize::Empty,
            (false, Some(length)) => PayloadSize::Length(length),
        })
    }

    /// Builds the absolute request url and the query string.
    ///
    /// The url scheme reflects the transport (`https`/`wss` when secure) and the upgrade
    /// request kind, the host comes from the `Host` header (or an absolute request target,
    /// or the local address for HTTP/1.0 clients that sent no host), and the port is always
    /// the local port the request arrived on.
    pub fn finish_initialization(&mut self, local_addr: SocketAddr, secure: bool) -> Result<(), ParseError> {
        let absolute: Option<Uri> = if self.raw_target.starts_with('/') {
            None
        } else {
            self.raw_target.parse::<Uri>().ok().filter(|uri| uri.scheme().is_some())
        };

        let path = match &absolute {
            Some(uri) => uri.path_and_query().map_or("/", |pq| pq.as_str()).to_string(),
            None if self.raw_target == "*" => "/".to_string(),
            None => self.raw_target.clone(),
        };
        if !path.starts_with('/') {
            return Err(ParseError::InvalidUri);
        }

        let host = match (absolute.as_ref().and_then(Uri::host), self.user_host_name()) {
            (Some(host), _) => host.to_string(),
            (None, Some(host)) if !host.is_empty() => strip_port(host).to_string(),
            _ => match local_addr {
                SocketAddr::V4(addr) => addr.ip().to_string(),
                SocketAddr::V6(addr) => format!("[{}]", addr.ip()),
            },
        };

        let scheme = match (secure, self.is_websocket_request()) {
            (true, true) => "wss",
            (true, false) => "https",
            (false, true) => "ws",
            (false, false) => "http",
        };

        let url: Uri = format!("{scheme}://{host}:{}{path}", local_addr.port()).parse().map_err(|_| ParseError::InvalidUri)?;
        self.query = url.query().map(parse_query).unwrap_or_default();
        self.url = Some(url);
        Ok(())
    }

    pub(crate) fn details(&self) -> RequestDetails {
        RequestDetails {
            raw_target: self.raw_target.clone(),
            query: self.query.clone(),
            cookies: self.cookies.clone(),
            content_length: self.content_length,
            chunked: self.chunked,
            keep_alive: self.keep_alive(),
            websocket: self.is_websocket_request(),
        }
    }

    /// Converts the head into an [`http::Request`] carrying `body`.
    ///
    /// The uri is the absolute url when the head has been initialized, the raw target otherwise.
    /// [`RequestDetails`] is inserted into the request extensions.
    pub fn into_request<B>(self, body: B) -> Request<B> {
        let details = self.details();
        let uri = match self.url {
            Some(url) => url,
            None => self.raw_target.parse().unwrap_or_default(),
        };

        let mut request = Request::new(body);
        *request.method_mut() = self.method;
        *request.uri_mut() = uri;
        *request.version_mut() = self.version;
        *request.headers_mut() = self.headers.into_inner();
        request.extensions_mut().insert(details);
        request
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.find(']').map_or(host, |end| &host[..=end]);
    }
    host.rfind(':').map_or(host, |colon| &host[..colon])
}

/// Splits and decodes a query string. A parameter without `=` has an empty value.
fn parse_query(query: &str) -> Vec<(String, String)> {
    serde_urlencoded::from_str(query).unwrap_or_default()
}
