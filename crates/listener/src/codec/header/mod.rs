//! Request head decoding and response head encoding.
//!
//! - [`HeaderDecoder`]: parses a request line and header fields with `httparse`, enforcing
//!   the configured header size and count limits.
//! - [`HeaderEncoder`]: writes a prepared response head.

mod header_decoder;
mod header_encoder;

pub use header_decoder::{HeaderDecoder, MAX_HEADER_BYTES, MAX_HEADER_NUM};
pub use header_encoder::HeaderEncoder;
