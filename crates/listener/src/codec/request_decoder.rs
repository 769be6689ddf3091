//! Request decoder.
//!
//! Decodes a request head with [`HeaderDecoder`], then the request body (if any) with a
//! [`PayloadDecoder`] until the end of the body, after which the next head is expected.
//! Bytes of a following pipelined request stay in the buffer untouched.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::PayloadDecoder;
use crate::codec::header::HeaderDecoder;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHead};

/// State machine over request heads and payloads:
/// `payload_decoder` is `None` while a head is expected.
#[derive(Debug, Default)]
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_header_bytes: usize, max_headers: usize) -> Self {
        Self { header_decoder: HeaderDecoder::new(max_header_bytes, max_headers), payload_decoder: None }
    }

    /// Whether the decoder is between requests.
    pub fn is_idle(&self) -> bool {
        self.payload_decoder.is_none()
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHead, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(PayloadItem::Eof) => {
                    self.payload_decoder.take();
                    Some(Message::Payload(PayloadItem::Eof))
                }
                Some(item) => Some(Message::Payload(item)),
                None => None,
            };
            return Ok(message);
        }

        let message = match self.header_decoder.decode(src)? {
            Some((head, payload_size)) => {
                if !payload_size.is_empty() {
                    self.payload_decoder = Some(payload_size.into());
                }
                Some(Message::Header((head, payload_size)))
            }
            None => None,
        };
        Ok(message)
    }
}
