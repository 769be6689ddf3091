//! Wire codecs for HTTP/1.x.
//!
//! [`RequestDecoder`] turns the bytes of a connection into request heads and body items,
//! [`ResponseEncoder`] does the reverse for responses. Both plug into
//! `tokio_util::codec::{FramedRead, FramedWrite}`.

mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use header::{MAX_HEADER_BYTES, MAX_HEADER_NUM};
pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
