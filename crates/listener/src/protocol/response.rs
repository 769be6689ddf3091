//! Response head handling.
//!
//! A response head is an `http::Response<()>`. Before the head is written, [`prepare`] turns
//! whatever the handler produced into the head that goes on the wire: sending-headers hooks
//! run, the status is checked, `Server`/`Date` defaults are added and the body framing and
//! connection persistence are decided.

use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::{Response, StatusCode, Version};

use crate::date::DateService;
use crate::protocol::body::ResponseBody;
use crate::protocol::{Cookie, PayloadSize, SendError};

pub type ResponseHead = Response<()>;

/// Longest header value accepted by [`ResponseExt::add_header`].
const MAX_HEADER_VALUE_LEN: usize = 65535;

/// A custom reason phrase written on the status line instead of the canonical one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonPhrase(pub String);

type SendingHeadersHook = Box<dyn FnOnce(&mut ResponseHead) + Send>;

/// Callbacks run once, right before the response head of the current request is written.
///
/// Handlers find the registry in the request extensions. Hooks run in reverse registration
/// order and may still change the status and headers.
#[derive(Clone, Default)]
pub struct SendingHeaders {
    hooks: Arc<Mutex<Vec<SendingHeadersHook>>>,
}

impl SendingHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, hook: F)
    where
        F: FnOnce(&mut ResponseHead) + Send + 'static,
    {
        if let Ok(mut hooks) = self.hooks.lock() {
            hooks.push(Box::new(hook));
        }
    }

    pub(crate) fn run(&self, head: &mut ResponseHead) {
        let hooks = match self.hooks.lock() {
            Ok(mut hooks) => std::mem::take(&mut *hooks),
            Err(_) => return,
        };
        for hook in hooks.into_iter().rev() {
            hook(head);
        }
    }
}

impl fmt::Debug for SendingHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.hooks.lock().map_or(0, |hooks| hooks.len());
        f.debug_struct("SendingHeaders").field("hooks", &len).finish()
    }
}

/// Convenience operations for building responses.
pub trait ResponseExt {
    /// Sets the status from a raw code, rejecting `100` and anything outside `101..=999`.
    fn set_status(&mut self, code: u16) -> Result<(), SendError>;

    /// Sets a custom reason phrase for the status line.
    fn set_reason(&mut self, reason: impl Into<String>);

    /// Validates and appends a header.
    fn add_header(&mut self, name: &str, value: &str) -> Result<(), SendError>;

    /// Validates and replaces a header.
    fn set_header(&mut self, name: &str, value: &str) -> Result<(), SendError>;

    /// Turns the response into a `302 Found` pointing at `url`.
    fn redirect(&mut self, url: &str) -> Result<(), SendError>;

    fn append_cookie(&mut self, cookie: &Cookie) -> Result<(), SendError>;
}

fn header_pair(name: &str, value: &str) -> Result<(header::HeaderName, HeaderValue), SendError> {
    if name.is_empty() {
        return Err(SendError::invalid_header("header name is empty"));
    }
    if value.len() > MAX_HEADER_VALUE_LEN {
        return Err(SendError::invalid_header(format!("value of {name} is longer than {MAX_HEADER_VALUE_LEN} bytes")));
    }
    let name = header::HeaderName::from_bytes(name.as_bytes()).map_err(SendError::invalid_header)?;
    let value = HeaderValue::from_str(value.trim()).map_err(SendError::invalid_header)?;
    Ok((name, value))
}

impl<B> ResponseExt for Response<B> {
    fn set_status(&mut self, code: u16) -> Result<(), SendError> {
        if !(101..=999).contains(&code) {
            return Err(SendError::invalid_status(code));
        }
        *self.status_mut() = StatusCode::from_u16(code).map_err(|_| SendError::invalid_status(code))?;
        Ok(())
    }

    fn set_reason(&mut self, reason: impl Into<String>) {
        self.extensions_mut().insert(ReasonPhrase(reason.into()));
    }

    fn add_header(&mut self, name: &str, value: &str) -> Result<(), SendError> {
        let (name, value) = header_pair(name, value)?;
        self.headers_mut().append(name, value);
        Ok(())
    }

    fn set_header(&mut self, name: &str, value: &str) -> Result<(), SendError> {
        let (name, value) = header_pair(name, value)?;
        self.headers_mut().insert(name, value);
        Ok(())
    }

    fn redirect(&mut self, url: &str) -> Result<(), SendError> {
        self.set_header(header::LOCATION.as_str(), url)?;
        *self.status_mut() = StatusCode::FOUND;
        Ok(())
    }

    fn append_cookie(&mut self, cookie: &Cookie) -> Result<(), SendError> {
        self.add_header(header::SET_COOKIE.as_str(), &cookie.to_string())
    }
}

/// The built-in error page: `<h1>{reason} ({message})</h1>`.
pub fn error_response(status: StatusCode, message: Option<&str>) -> Response<ResponseBody> {
    let reason = status.canonical_reason().unwrap_or_default();
    let page = match message {
        Some(message) if !message.is_empty() => format!("<h1>{reason} ({message})</h1>"),
        _ => format!("<h1>{reason}</h1>"),
    };

    let mut response = Response::new(ResponseBody::from(page));
    *response.status_mut() = status;
    response.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
    response
}

/// What the connection knows about the request a response answers.
#[derive(Debug, Clone)]
pub(crate) struct ResponseContext<'a> {
    pub version: Version,
    pub head_request: bool,
    pub keep_alive: bool,
    pub server_name: &'a HeaderValue,
    pub sending_headers: Option<&'a SendingHeaders>,
}

/// The result of [`prepare`]: how to encode the body and whether the connection survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Prepared {
    /// Framing used by the encoder; `Empty` when body bytes must not be written.
    pub payload_size: PayloadSize,
    pub keep_alive: bool,
}

/// Statuses after which the connection is always closed.
fn forces_close(status: StatusCode) -> bool {
    matches!(status.as_u16(), 400 | 408 | 411 | 413 | 414 | 500 | 503)
}

fn body_allowed(status: StatusCode, head_request: bool) -> bool {
    !(head_request || status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED)
}

/// Finalizes `head` for the wire. `body_size` is the exact body size when known.
///
/// A status the hooks (or the handler) left at `100` or outside the valid range is turned
/// into a `500` before anything is written.
pub(crate) fn prepare(head: &mut ResponseHead, body_size: Option<u64>, ctx: &ResponseContext<'_>) -> Prepared {
    if let Some(sending_headers) = ctx.sending_headers {
        sending_headers.run(head);
    }

    if head.status() == StatusCode::CONTINUE {
        *head.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    }
    *head.version_mut() = if ctx.version == Version::HTTP_10 { Version::HTTP_10 } else { Version::HTTP_11 };

    let headers = head.headers_mut();
    if !headers.contains_key(header::SERVER) {
        headers.insert(header::SERVER, ctx.server_name.clone());
    }
    if !headers.contains_key(header::DATE) {
        DateService::get_global_instance().with_http_date(|date| {
            headers.insert(header::DATE, date);
        });
    }

    let status = head.status();
    let explicit_length = head
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());

    let framing = match (explicit_length.or(body_size), ctx.version) {
        _ if !body_allowed(status, false) => PayloadSize::Empty,
        (Some(length), _) => PayloadSize::Length(length),
        (None, version) if version >= Version::HTTP_11 => PayloadSize::Chunked,
        (None, _) => PayloadSize::UntilClose,
    };

    let headers = head.headers_mut();
    match framing {
        PayloadSize::Length(length) => {
            headers.remove(header::TRANSFER_ENCODING);
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        }
        PayloadSize::Chunked => {
            headers.remove(header::CONTENT_LENGTH);
            headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        }
        PayloadSize::UntilClose | PayloadSize::Empty => {}
    }

    let connection_close = head
        .headers()
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("close"));

    let keep_alive = ctx.keep_alive && !forces_close(status) && !framing.is_until_close() && !connection_close;

    let headers = head.headers_mut();
    if !keep_alive {
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    } else if ctx.version == Version::HTTP_10 {
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    }

    let payload_size = if body_allowed(status, ctx.head_request) {
        match framing {
            PayloadSize::Length(0) => PayloadSize::Empty,
            framing => framing,
        }
    } else {
        PayloadSize::Empty
    };

    Prepared { payload_size, keep_alive }
}

/// The reason phrase written for `head`: the custom one, else the canonical one, else empty.
pub(crate) fn reason_phrase(head: &ResponseHead) -> Bytes {
    match head.extensions().get::<ReasonPhrase>() {
        Some(ReasonPhrase(reason)) => Bytes::copy_from_slice(reason.as_bytes()),
        None => Bytes::from_static(head.status().canonical_reason().unwrap_or_default().as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> HeaderValue {
        HeaderValue::from_static("micro-listener/test")
    }

    fn ctx<'a>(server: &'a HeaderValue, version: Version, keep_alive: bool) -> ResponseContext<'a> {
        ResponseContext { version, head_request: false, keep_alive, server_name: server, sending_headers: None }
    }

    fn head(status: StatusCode) -> ResponseHead {
        let mut head = ResponseHead::default();
        *head.status_mut() = status;
        head
    }

    #[test]
    fn set_status_rejects_out_of_range() {
        let mut response = head(StatusCode::OK);
        assert!(response.set_status(100).is_err());
        assert!(response.set_status(1000).is_err());
        assert!(response.set_status(99).is_err());
        response.set_status(418).unwrap();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }

    #[test]
    fn header_helpers_validate() {
        let mut response = head(StatusCode::OK);
        assert!(response.add_header("", "x").is_err());
        assert!(response.add_header("x-long", &"a".repeat(MAX_HEADER_VALUE_LEN + 1)).is_err());

        response.redirect("/elsewhere").unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/elsewhere");

        response.append_cookie(&Cookie::new("a", "1")).unwrap();
        response.append_cookie(&Cookie::new("b", "2")).unwrap();
        assert_eq!(response.headers().get_all(header::SET_COOKIE).iter().count(), 2);
    }

    #[test]
    fn error_page() {
        let response = error_response(StatusCode::BAD_REQUEST, Some("Invalid host"));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
        assert_eq!(http_body::Body::size_hint(response.body()).exact(), Some("<h1>Bad Request (Invalid host)</h1>".len() as u64));

        let response = error_response(StatusCode::NOT_FOUND, None);
        assert_eq!(http_body::Body::size_hint(response.body()).exact(), Some("<h1>Not Found</h1>".len() as u64));
    }

    #[tokio::test]
    async fn hooks_run_in_reverse_order() {
        let server = server();
        let hooks = SendingHeaders::new();
        hooks.register(|head| {
            head.headers_mut().insert("x-order", HeaderValue::from_static("first"));
        });
        hooks.register(|head| {
            head.headers_mut().insert("x-order", HeaderValue::from_static("second"));
            *head.status_mut() = StatusCode::ACCEPTED;
        });

        let mut response = head(StatusCode::OK);
        let context = ResponseContext { sending_headers: Some(&hooks), ..ctx(&server, Version::HTTP_11, true) };
        prepare(&mut response, Some(0), &context);

        assert_eq!(response.headers()["x-order"], "first");
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        // hooks run once
        let mut response = head(StatusCode::OK);
        prepare(&mut response, Some(0), &context);
        assert!(response.headers().get("x-order").is_none());
    }

    #[tokio::test]
    async fn defaults_and_length() {
        let server = server();
        let mut response = head(StatusCode::OK);
        let prepared = prepare(&mut response, Some(5), &ctx(&server, Version::HTTP_11, true));

        assert_eq!(prepared, Prepared { payload_size: PayloadSize::Length(5), keep_alive: true });
        assert_eq!(response.headers()[header::SERVER], "micro-listener/test");
        assert!(response.headers().contains_key(header::DATE));
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "5");
        assert!(!response.headers().contains_key(header::CONNECTION));
    }

    #[tokio::test]
    async fn unknown_length_framing() {
        let server = server();

        let mut response = head(StatusCode::OK);
        let prepared = prepare(&mut response, None, &ctx(&server, Version::HTTP_11, true));
        assert_eq!(prepared.payload_size, PayloadSize::Chunked);
        assert_eq!(response.headers()[header::TRANSFER_ENCODING], "chunked");

        let mut response = head(StatusCode::OK);
        let prepared = prepare(&mut response, None, &ctx(&server, Version::HTTP_10, true));
        assert_eq!(prepared, Prepared { payload_size: PayloadSize::UntilClose, keep_alive: false });
        assert_eq!(response.headers()[header::CONNECTION], "close");
        assert_eq!(response.version(), Version::HTTP_10);
    }

    #[tokio::test]
    async fn connection_persistence() {
        let server = server();

        let mut response = head(StatusCode::BAD_REQUEST);
        assert!(!prepare(&mut response, Some(0), &ctx(&server, Version::HTTP_11, true)).keep_alive);
        assert_eq!(response.headers()[header::CONNECTION], "close");

        let mut response = head(StatusCode::OK);
        assert!(!prepare(&mut response, Some(0), &ctx(&server, Version::HTTP_11, false)).keep_alive);

        let mut response = head(StatusCode::OK);
        response.headers_mut().insert(header::CONNECTION, HeaderValue::from_static("Close"));
        assert!(!prepare(&mut response, Some(0), &ctx(&server, Version::HTTP_11, true)).keep_alive);

        let mut response = head(StatusCode::OK);
        assert!(prepare(&mut response, Some(2), &ctx(&server, Version::HTTP_10, true)).keep_alive);
        assert_eq!(response.headers()[header::CONNECTION], "keep-alive");
    }

    #[tokio::test]
    async fn body_suppressed_for_head_and_no_content() {
        let server = server();

        let mut response = head(StatusCode::OK);
        let context = ResponseContext { head_request: true, ..ctx(&server, Version::HTTP_11, true) };
        let prepared = prepare(&mut response, Some(42), &context);
        assert_eq!(prepared.payload_size, PayloadSize::Empty);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "42");

        let mut response = head(StatusCode::NO_CONTENT);
        let prepared = prepare(&mut response, None, &ctx(&server, Version::HTTP_11, true));
        assert_eq!(prepared.payload_size, PayloadSize::Empty);
        assert!(!response.headers().contains_key(header::TRANSFER_ENCODING));

        let mut response = head(StatusCode::CONTINUE);
        prepare(&mut response, Some(0), &ctx(&server, Version::HTTP_11, true));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn custom_reason() {
        let mut response = head(StatusCode::OK);
        assert_eq!(reason_phrase(&response), Bytes::from_static(b"OK"));
        response.set_reason("Fine");
        assert_eq!(reason_phrase(&response), Bytes::from_static(b"Fine"));
    }
}
