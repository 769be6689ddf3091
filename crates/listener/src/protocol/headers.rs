//! A case-insensitive, multi-value header collection.
//!
//! [`HeaderCollection`] wraps [`http::HeaderMap`] and adds the protocol-aware rules the
//! listener relies on: validation of names and values before insertion, knowledge of which
//! well-known headers carry comma separated lists, and serialization into wire format.
//!
//! Header names are case-insensitive. They are stored and written in lower case.

use std::fmt;

use bytes::{BufMut, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;

use crate::protocol::SendError;

const REQUEST: u8 = 1;
const RESPONSE: u8 = 1 << 1;
const MULTI_VALUE: u8 = 1 << 2;

/// Well-known headers and how they may be used.
static HEADER_INFO: &[(&str, u8)] = &[
    ("allow", MULTI_VALUE),
    ("accept", REQUEST | MULTI_VALUE),
    ("accept-charset", MULTI_VALUE),
    ("accept-encoding", MULTI_VALUE),
    ("accept-language", MULTI_VALUE),
    ("accept-ranges", MULTI_VALUE),
    ("age", RESPONSE),
    ("authorization", MULTI_VALUE),
    ("cache-control", MULTI_VALUE),
    ("cookie", MULTI_VALUE),
    ("connection", REQUEST | MULTI_VALUE),
    ("content-encoding", MULTI_VALUE),
    ("content-length", REQUEST | RESPONSE),
    ("content-type", REQUEST),
    ("content-language", MULTI_VALUE),
    ("date", REQUEST),
    ("expect", REQUEST | MULTI_VALUE),
    ("host", REQUEST),
    ("if-match", MULTI_VALUE),
    ("if-modified-since", REQUEST),
    ("if-none-match", MULTI_VALUE),
    ("keep-alive", RESPONSE),
    ("pragma", MULTI_VALUE),
    ("proxy-authenticate", MULTI_VALUE),
    ("proxy-authorization", MULTI_VALUE),
    ("proxy-connection", REQUEST | MULTI_VALUE),
    ("range", REQUEST | MULTI_VALUE),
    ("referer", REQUEST),
    ("set-cookie", MULTI_VALUE),
    ("set-cookie2", MULTI_VALUE),
    ("server", RESPONSE),
    ("te", MULTI_VALUE),
    ("trailer", MULTI_VALUE),
    ("transfer-encoding", REQUEST | RESPONSE | MULTI_VALUE),
    ("translate", REQUEST | RESPONSE),
    ("upgrade", MULTI_VALUE),
    ("user-agent", REQUEST),
    ("vary", MULTI_VALUE),
    ("via", MULTI_VALUE),
    ("warning", MULTI_VALUE),
    ("www-authenticate", RESPONSE | MULTI_VALUE),
    ("sec-websocket-accept", RESPONSE),
    ("sec-websocket-extensions", REQUEST | RESPONSE | MULTI_VALUE),
    ("sec-websocket-key", REQUEST),
    ("sec-websocket-protocol", REQUEST | RESPONSE | MULTI_VALUE),
    ("sec-websocket-version", RESPONSE | MULTI_VALUE),
];

fn header_info(name: &str) -> Option<u8> {
    HEADER_INFO.iter().find(|(known, _)| known.eq_ignore_ascii_case(name)).map(|(_, info)| *info)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("invalid header name: {0:?}")]
    InvalidName(String),

    #[error("invalid header value for {name}: {value:?}")]
    InvalidValue { name: String, value: String },
}

impl From<HeaderError> for SendError {
    fn from(e: HeaderError) -> Self {
        SendError::invalid_header(e)
    }
}

/// Returns true if `name` is a non-empty RFC 7230 token.
pub fn is_header_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(is_token_byte)
}

/// Returns true if `value` contains no control characters other than HTAB, and every
/// embedded line break is followed by linear white space.
pub fn is_header_value(value: &str) -> bool {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == 0x7f || (b < 0x20 && !matches!(b, b'\r' | b'\n' | b'\t')) {
            return false;
        }
        if b == b'\n' {
            i += 1;
            if i < bytes.len() && !matches!(bytes[i], b' ' | b'\t') {
                return false;
            }
        }
        i += 1;
    }
    true
}

fn is_token_byte(b: u8) -> bool {
    match b {
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~' => true,
        b => b.is_ascii_alphanumeric(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderCollection {
    inner: HeaderMap,
}

impl HeaderCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { inner: HeaderMap::with_capacity(capacity) }
    }

    /// Validates and appends a header, keeping any existing values.
    pub fn add(&mut self, name: &str, value: &str) -> Result<(), HeaderError> {
        let (name, value) = Self::validate(name, value)?;
        self.inner.append(name, value);
        Ok(())
    }

    /// Validates and stores a header. Multi-value headers get the value appended,
    /// every other header is replaced.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), HeaderError> {
        let (header_name, value) = Self::validate(name, value)?;
        if Self::is_multi_value(name) {
            self.inner.append(header_name, value);
        } else {
            self.inner.insert(header_name, value);
        }
        Ok(())
    }

    pub(crate) fn append_raw(&mut self, name: HeaderName, value: HeaderValue) {
        self.inner.append(name, value);
    }

    fn validate(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), HeaderError> {
        if !is_header_name(name) {
            return Err(HeaderError::InvalidName(name.to_string()));
        }
        let value = value.trim();
        let invalid_value = || HeaderError::InvalidValue { name: name.to_string(), value: value.to_string() };
        if !is_header_value(value) {
            return Err(invalid_value());
        }

        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| HeaderError::InvalidName(name.to_string()))?;
        let header_value = HeaderValue::from_str(value).map_err(|_| invalid_value())?;
        Ok((header_name, header_value))
    }

    /// All values of `name` joined with a comma, the way a name/value collection reports them.
    pub fn get(&self, name: &str) -> Option<String> {
        let values = self.raw_values(name);
        if values.is_empty() { None } else { Some(values.join(",")) }
    }

    pub fn get_first(&self, name: &str) -> Option<&str> {
        self.inner.get(name).and_then(|value| value.to_str().ok())
    }

    /// All values of `name`. Values of multi-value headers are additionally split at commas.
    pub fn get_values(&self, name: &str) -> Vec<&str> {
        let values = self.raw_values(name);
        if !Self::is_multi_value(name) {
            return values;
        }

        let mut separated = Vec::with_capacity(values.len());
        for value in values {
            let value = value.strip_suffix(',').unwrap_or(value);
            separated.extend(value.split(',').map(str::trim));
        }
        separated
    }

    fn raw_values(&self, name: &str) -> Vec<&str> {
        self.inner.get_all(name).iter().filter_map(|value| value.to_str().ok()).collect()
    }

    /// Case-insensitive check for `token` in the comma separated values of `name`.
    pub fn contains_token(&self, name: &str, token: &str) -> bool {
        self.inner
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|item| item.trim().eq_ignore_ascii_case(token))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    /// Removes every value of `name`, returning whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.inner.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> http::header::Iter<'_, HeaderValue> {
        self.inner.iter()
    }

    pub fn as_map(&self) -> &HeaderMap {
        &self.inner
    }

    pub fn as_map_mut(&mut self) -> &mut HeaderMap {
        &mut self.inner
    }

    pub fn into_inner(self) -> HeaderMap {
        self.inner
    }

    pub fn is_multi_value(name: &str) -> bool {
        header_info(name).is_some_and(|info| info & MULTI_VALUE != 0)
    }

    /// Whether `name` is a header the request (or response, when `response` is true)
    /// manages itself and callers should not set directly.
    pub fn is_restricted(name: &str, response: bool) -> Result<bool, HeaderError> {
        if !is_header_name(name) {
            return Err(HeaderError::InvalidName(name.to_string()));
        }
        let flag = if response { RESPONSE } else { REQUEST };
        Ok(header_info(name).is_some_and(|info| info & flag != 0))
    }

    /// Writes every header as `name: value\r\n` followed by the terminating blank line.
    pub fn write_to(&self, dst: &mut BytesMut) {
        for (name, value) in &self.inner {
            dst.put_slice(name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
    }
}

impl From<HeaderMap> for HeaderCollection {
    fn from(inner: HeaderMap) -> Self {
        Self { inner }
    }
}

impl<'a> IntoIterator for &'a HeaderCollection {
    type Item = (&'a HeaderName, &'a HeaderValue);
    type IntoIter = http::header::Iter<'a, HeaderValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}

impl fmt::Display for HeaderCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        f.write_str(&String::from_utf8_lossy(&buf))
    }
}
