//! Request head decoder.
//!
//! Parses the request line and header lines with `httparse`, resuming across partial reads.
//! Empty lines before the request line are skipped. The header bytes are split off the read
//! buffer once the head is complete and header values share that allocation.
//!
//! After parsing, the header-only request rules are applied (host presence, content length,
//! transfer coding, length requirement) and the payload size is determined.

use std::mem::MaybeUninit;

use bytes::BytesMut;
use http::{HeaderName, HeaderValue, Method, Version};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{HeaderCollection, ParseError, PayloadSize, RequestHead};

/// Upper bound of header lines per request, regardless of configuration.
pub const MAX_HEADER_NUM: usize = 100;

/// Default upper bound of the request line plus header lines, in bytes.
pub const MAX_HEADER_BYTES: usize = 32 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct HeaderDecoder {
    max_header_bytes: usize,
    max_headers: usize,
}

impl Default for HeaderDecoder {
    fn default() -> Self {
        Self { max_header_bytes: MAX_HEADER_BYTES, max_headers: MAX_HEADER_NUM }
    }
}

impl HeaderDecoder {
    pub fn new(max_header_bytes: usize, max_headers: usize) -> Self {
        Self { max_header_bytes, max_headers: max_headers.min(MAX_HEADER_NUM) }
    }
}

impl Decoder for HeaderDecoder {
    type Item = (RequestHead, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut req = httparse::Request::new(&mut []);
        let mut headers: [MaybeUninit<httparse::Header<'_>>; MAX_HEADER_NUM] = [const { MaybeUninit::uninit() }; MAX_HEADER_NUM];
        let headers = &mut headers[..self.max_headers];

        let parsed = req.parse_with_uninit_headers(src, headers).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(self.max_headers),
            Error::Version => ParseError::InvalidVersion(None),
            Error::Token => ParseError::InvalidMethod,
            e => ParseError::invalid_header(e),
        })?;

        let body_offset = match parsed {
            Status::Complete(body_offset) => body_offset,
            Status::Partial => {
                ensure!(src.len() <= self.max_header_bytes, ParseError::too_large_header(src.len(), self.max_header_bytes));
                return Ok(None);
            }
        };

        trace!(head_size = body_offset, "parsed request head");
        ensure!(body_offset <= self.max_header_bytes, ParseError::too_large_header(body_offset, self.max_header_bytes));

        let version = match req.version {
            Some(0) => Version::HTTP_10,
            Some(1) => Version::HTTP_11,
            v => return Err(ParseError::InvalidVersion(v)),
        };
        let method = Method::from_bytes(req.method.ok_or(ParseError::InvalidMethod)?.as_bytes()).map_err(|_| ParseError::InvalidMethod)?;
        let raw_target = req.path.ok_or(ParseError::InvalidUri)?.to_string();
        ensure!(!raw_target.is_empty(), ParseError::InvalidUri);

        let header_count = req.headers.len();
        let mut header_index = [HeaderIndex::EMPTY; MAX_HEADER_NUM];
        HeaderIndex::record(src, req.headers, &mut header_index);

        let header_bytes = src.split_to(body_offset).freeze();
        let mut collection = HeaderCollection::with_capacity(header_count);
        for index in &header_index[..header_count] {
            let name = HeaderName::from_bytes(&header_bytes[index.name.0..index.name.1]).map_err(ParseError::invalid_header)?;
            let value = HeaderValue::from_maybe_shared(header_bytes.slice(index.value.0..index.value.1)).map_err(ParseError::invalid_header)?;
            collection.append_raw(name, value);
        }

        let mut head = RequestHead::new(method, raw_target, version, collection);
        let payload_size = head.parse_payload()?;
        Ok(Some((head, payload_size)))
    }
}

/// Byte ranges of one header's name and value within the parsed buffer.
#[derive(Clone, Copy)]
struct HeaderIndex {
    name: (usize, usize),
    value: (usize, usize),
}

impl HeaderIndex {
    const EMPTY: HeaderIndex = HeaderIndex { name: (0, 0), value: (0, 0) };

    fn record(bytes: &[u8], headers: &[httparse::Header<'_>], indices: &mut [HeaderIndex]) {
        let bytes_ptr = bytes.as_ptr() as usize;
        for (header, index) in headers.iter().zip(indices.iter_mut()) {
            let name_start = header.name.as_ptr() as usize - bytes_ptr;
            index.name = (name_start, name_start + header.name.len());
            let value_start = header.value.as_ptr() as usize - bytes_ptr;
            index.value = (value_start, value_start + header.value.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn decode(input: &str) -> Result<Option<(RequestHead, PayloadSize)>, ParseError> {
        HeaderDecoder::default().decode(&mut BytesMut::from(input))
    }

    #[test]
    fn remaining_bytes_stay_in_buffer() {
        let str = indoc! {r"
        GET /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        123"};

        let mut bytes = BytesMut::from(str);
        let result = HeaderDecoder::default().decode(&mut bytes).unwrap();

        assert!(result.is_some());
        assert_eq!(&bytes[..], b"123");
    }

    #[test]
    fn from_curl() {
        let str = indoc! {r"
        GET /index.html?a=1 HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        "};

        let (head, payload_size) = decode(str).unwrap().unwrap();

        assert!(payload_size.is_empty());
        assert_eq!(head.method(), &Method::GET);
        assert_eq!(head.version(), Version::HTTP_11);
        assert_eq!(head.raw_target(), "/index.html?a=1");
        assert_eq!(head.headers().len(), 3);
        assert_eq!(head.user_host_name(), Some("127.0.0.1:8080"));
        assert_eq!(head.user_agent(), Some("curl/7.79.1"));
        assert_eq!(head.accept_types(), vec!["*/*"]);
    }

    #[test]
    fn leading_empty_lines_are_skipped() {
        let (head, _) = decode("\r\n\r\nGET / HTTP/1.0\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.version(), Version::HTTP_10);
    }

    #[test]
    fn partial_head_resumes() {
        let mut decoder = HeaderDecoder::default();
        let mut buf = BytesMut::from("GET / HTTP/1.1\r\nHo");
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"st: a\r\n\r\n");
        let (head, _) = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(head.user_host_name(), Some("a"));
        assert!(buf.is_empty());
    }

    #[test]
    fn payload_size_from_headers() {
        let str = indoc! {r"
        POST /submit HTTP/1.1
        Host: a
        Content-Length: 11

        "};
        let (_, payload_size) = decode(str).unwrap().unwrap();
        assert_eq!(payload_size, PayloadSize::Length(11));

        let str = indoc! {r"
        POST /submit HTTP/1.1
        Host: a
        Transfer-Encoding: chunked

        "};
        let (head, payload_size) = decode(str).unwrap().unwrap();
        assert!(payload_size.is_chunked());
        assert!(head.is_chunked());
    }

    #[test]
    fn malformed_heads() {
        assert!(matches!(decode("GET / HTTP/2.0\r\n\r\n"), Err(ParseError::InvalidVersion(_))));
        assert!(matches!(decode("G(T / HTTP/1.1\r\n\r\n"), Err(ParseError::InvalidMethod)));
        assert!(matches!(decode("GET / HTTP/1.1\r\nNoColon\r\n\r\n"), Err(ParseError::InvalidHeader { .. })));
        assert!(matches!(decode("GET / HTTP/1.1\r\n\r\n"), Err(ParseError::InvalidHost)));
        assert!(matches!(decode("PUT / HTTP/1.1\r\nHost: a\r\n\r\n"), Err(ParseError::LengthRequired { .. })));
        assert!(matches!(
            decode("POST / HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: gzip\r\n\r\n"),
            Err(ParseError::UnsupportedTransferEncoding { .. })
        ));
    }

    #[test]
    fn oversized_head() {
        let mut decoder = HeaderDecoder::new(64, MAX_HEADER_NUM);
        let mut buf = BytesMut::from(format!("GET / HTTP/1.1\r\nX-Long: {}", "a".repeat(64)).as_str());
        assert!(matches!(decoder.decode(&mut buf), Err(ParseError::TooLargeHeader { .. })));
    }

    #[test]
    fn too_many_headers() {
        let mut decoder = HeaderDecoder::new(MAX_HEADER_BYTES, 2);
        let mut buf = BytesMut::from("GET / HTTP/1.1\r\nHost: a\r\nA: 1\r\nB: 2\r\n\r\n");
        assert!(matches!(decoder.decode(&mut buf), Err(ParseError::TooManyHeaders { max_num: 2 })));
    }
}
