//! Request and response bodies.
//!
//! - [`RequestBody`]: the consumer side handed to handlers, implementing `http_body::Body`
//! - [`RequestBodySender`]: the producer side, reading payload items from the connection
//! - [`ResponseBody`]: what handlers answer with, buffered or streaming
//!
//! The request body and its sender talk through channels so the handler and the payload
//! reader can make progress together on the connection task. Whatever the handler leaves
//! unread is drained afterwards, keeping the connection usable for the next request.

mod req_body;
mod resp_body;

pub(crate) use req_body::skip_body;
pub use req_body::{RequestBody, RequestBodySender};
pub use resp_body::ResponseBody;
