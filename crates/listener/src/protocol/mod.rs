//! Core HTTP protocol types.
//!
//! - **Messages** ([`message`]): [`Message`] is either a head or a payload item,
//!   [`PayloadItem`] a body chunk, the trailers or the end of the body,
//!   [`PayloadSize`] how a body is delimited on the wire.
//! - **Requests** ([`request`]): [`RequestHead`] and the [`RequestDetails`] extension.
//! - **Responses** ([`response`]): [`ResponseHead`], the [`SendingHeaders`] hooks and
//!   the [`ResponseExt`] helpers.
//! - **Headers and cookies**: [`HeaderCollection`], [`Cookie`].
//! - **Bodies** ([`body`]): [`body::RequestBody`] and [`body::ResponseBody`].
//! - **Errors** ([`error`]): [`HttpError`], [`ParseError`], [`SendError`], [`ListenerError`].

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod headers;
pub use headers::{HeaderCollection, HeaderError, is_header_name, is_header_value};

mod cookie;
pub use cookie::Cookie;

mod request;
pub use request::{RequestDetails, RequestHead};

mod response;
pub(crate) use response::{Prepared, ResponseContext, prepare, reason_phrase};
pub use response::{ReasonPhrase, ResponseExt, ResponseHead, SendingHeaders, error_response};

mod error;
pub use error::HttpError;
pub use error::ListenerError;
pub use error::ParseError;
pub use error::SendError;

pub mod body;
