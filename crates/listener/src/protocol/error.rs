use std::io;

use http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("invalid host name")]
    InvalidHost,

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("length required for {method} request")]
    LengthRequired { method: String },

    #[error("unsupported transfer-encoding: {value}")]
    UnsupportedTransferEncoding { value: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("invalid chunk: {reason}")]
    InvalidChunk { reason: String },

    #[error("timed out waiting for {phase}")]
    Timeout { phase: &'static str },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_chunk<S: ToString>(str: S) -> Self {
        Self::InvalidChunk { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn length_required<S: ToString>(method: S) -> Self {
        Self::LengthRequired { method: method.to_string() }
    }

    pub fn unsupported_transfer_encoding<S: ToString>(value: S) -> Self {
        Self::UnsupportedTransferEncoding { value: value.to_string() }
    }

    pub fn timeout(phase: &'static str) -> Self {
        Self::Timeout { phase }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// The status code answered to the client when this error ends a request.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::LengthRequired { .. } => StatusCode::LENGTH_REQUIRED,
            Self::UnsupportedTransferEncoding { .. } => StatusCode::NOT_IMPLEMENTED,
            Self::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Whether the peer is still there to read an error response.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("invalid status code: {code}")]
    InvalidStatus { code: u16 },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_status(code: u16) -> Self {
        Self::InvalidStatus { code }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

/// Errors raised while configuring listeners and their prefixes.
#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("invalid prefix {prefix}: {reason}")]
    InvalidPrefix { prefix: String, reason: &'static str },

    #[error("Invalid path.")]
    InvalidPath { prefix: String },

    #[error("Prefix already in use.")]
    PrefixInUse { prefix: String },

    #[error("There's another listener for {prefix}")]
    PrefixConflict { prefix: String },

    #[error("can't bind {addr}: {source}")]
    Bind { addr: std::net::SocketAddr, source: io::Error },

    #[error("listener is closed")]
    Closed,
}

impl ListenerError {
    pub fn invalid_prefix<S: ToString>(prefix: S, reason: &'static str) -> Self {
        Self::InvalidPrefix { prefix: prefix.to_string(), reason }
    }

    pub fn invalid_path<S: ToString>(prefix: S) -> Self {
        Self::InvalidPath { prefix: prefix.to_string() }
    }

    pub fn prefix_in_use<S: ToString>(prefix: S) -> Self {
        Self::PrefixInUse { prefix: prefix.to_string() }
    }

    pub fn prefix_conflict<S: ToString>(prefix: S) -> Self {
        Self::PrefixConflict { prefix: prefix.to_string() }
    }
}
