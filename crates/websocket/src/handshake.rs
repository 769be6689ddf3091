//! The server side of the opening handshake.

use base64::Engine;
use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, Request, Response, StatusCode, Version};
use micro_listener::protocol::body::{RequestBody, ResponseBody};
use micro_listener::protocol::error_response;
use sha1::{Digest, Sha1};

use crate::config::WebSocketConfig;
use crate::error::WsError;

pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
pub const WS_VERSION: &str = "13";

/// `base64(SHA-1(key + GUID))`
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::trim)
}

fn tokens<'a>(headers: &'a HeaderMap, name: &header::HeaderName) -> impl Iterator<Item = &'a str> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Whether the request asks for a WebSocket upgrade.
pub fn is_upgrade_request<B>(request: &Request<B>) -> bool {
    let headers = request.headers();
    request.method() == Method::GET
        && request.version() > Version::HTTP_10
        && tokens(headers, &header::UPGRADE).any(|token| token.eq_ignore_ascii_case("websocket"))
        && tokens(headers, &header::CONNECTION).any(|token| token.eq_ignore_ascii_case("upgrade"))
}

/// An accepted upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    accept_key: String,
    protocol: Option<String>,
}

impl Handshake {
    /// Validates an upgrade request.
    ///
    /// The subprotocol is the first of the configured ones the client offered. Extensions
    /// offered by the client are never accepted.
    pub fn check(request: &Request<RequestBody>, config: &WebSocketConfig) -> Result<Self, WsError> {
        let uri = request.uri();
        if uri.scheme().is_none() || uri.host().is_none() {
            return Err(WsError::handshake("Invalid request url."));
        }
        if !is_upgrade_request(request) {
            return Err(WsError::handshake("Not WebSocket connection request."));
        }

        let headers = request.headers();
        let key = match header_str(headers, &header::SEC_WEBSOCKET_KEY) {
            Some(key) if !key.is_empty() => key,
            _ => return Err(WsError::handshake("Invalid Sec-WebSocket-Key header.")),
        };
        if header_str(headers, &header::SEC_WEBSOCKET_VERSION) != Some(WS_VERSION) {
            return Err(WsError::handshake("Invalid Sec-WebSocket-Version header."));
        }

        if !config.allowed_origins.is_empty() {
            let origin = header_str(headers, &header::ORIGIN);
            if !origin.is_some_and(|origin| config.allowed_origins.iter().any(|allowed| allowed == origin)) {
                return Err(WsError::handshake("Invalid Origin header."));
            }
        }
        if let Some(checker) = &config.handshake_checker
            && let Some(reason) = checker(request)
        {
            return Err(WsError::handshake(reason));
        }

        let protocol = config
            .protocols
            .iter()
            .find(|protocol| tokens(headers, &header::SEC_WEBSOCKET_PROTOCOL).any(|offered| offered == protocol.as_str()))
            .cloned();

        Ok(Self { accept_key: accept_key(key), protocol })
    }

    pub fn accept_key(&self) -> &str {
        &self.accept_key
    }

    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// The `101 Switching Protocols` response.
    pub fn response(&self) -> Result<Response<ResponseBody>, WsError> {
        let mut response = Response::new(ResponseBody::empty());
        *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
        let headers = response.headers_mut();
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(header::SEC_WEBSOCKET_ACCEPT, HeaderValue::from_str(&self.accept_key).map_err(WsError::handshake)?);
        if let Some(protocol) = &self.protocol {
            headers.insert(header::SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_str(protocol).map_err(WsError::handshake)?);
        }
        Ok(response)
    }
}

/// The `400 Bad Request` answering a failed handshake.
pub fn reject_response() -> Response<ResponseBody> {
    let mut response = error_response(StatusCode::BAD_REQUEST, None);
    response.headers_mut().insert(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static(WS_VERSION));
    response
}
