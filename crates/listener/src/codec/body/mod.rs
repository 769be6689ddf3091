//! Body framing.
//!
//! Decoders turn the bytes of a request body into [`PayloadItem`](crate::protocol::PayloadItem)s,
//! encoders do the reverse for response bodies:
//!
//! - `Content-Length` bodies: `LengthDecoder` / `LengthEncoder`
//! - chunked bodies, including trailers: `ChunkedDecoder` / `ChunkedEncoder`
//! - [`PayloadDecoder`] and [`PayloadEncoder`] pick one of the above from a
//!   [`PayloadSize`](crate::protocol::PayloadSize)

mod chunked_decoder;
mod chunked_encoder;
mod length_decoder;
mod length_encoder;
mod payload_decoder;
mod payload_encoder;

pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;
