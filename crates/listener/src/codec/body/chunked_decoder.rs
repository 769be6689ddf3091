//! Decoder for the chunked transfer coding.
//!
//! Each chunk is a hex size line (optionally followed by `;extensions`, which are discarded),
//! the chunk data and a CRLF. A zero-size chunk ends the body; it may be followed by trailer
//! fields and an empty line. Trailers are surfaced as one [`PayloadItem::Trailers`] item right
//! before [`PayloadItem::Eof`].

use bytes::{Buf, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, PayloadItem};

use ChunkedState::*;

/// Longest size line accepted, extensions included, CRLF excluded.
const MAX_SIZE_LINE: usize = 20;

/// Upper bound for all trailer lines together.
pub(crate) const MAX_TRAILER_BYTES: usize = 4196;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
    remaining_size: u64,
    /// hex digits read on the current size line
    size_digits: usize,
    size_line_len: usize,
    trailers: HeaderMap,
    trailer_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Hex digits of the chunk size
    Size,
    /// Whitespace after the size
    SizeLws,
    /// Ignored chunk extensions
    Extension,
    /// LF closing the size line
    SizeLf,
    /// Chunk data
    Body,
    BodyCr,
    BodyLf,
    /// Trailer lines after the last chunk, up to the empty line
    Trailer,
    /// Trailers (if any) handed out, only EOF is left
    End,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: Size, remaining_size: 0, size_digits: 0, size_line_len: 0, trailers: HeaderMap::new(), trailer_bytes: 0 }
    }

    fn read_size(&mut self, b: u8) -> Result<ChunkedState, ParseError> {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b + 10 - b'a',
            b'A'..=b'F' => b + 10 - b'A',
            b'\t' | b' ' | b';' | b'\r' if self.size_digits == 0 => {
                return Err(ParseError::invalid_chunk("missing chunk size"));
            }
            b'\t' | b' ' => return Ok(SizeLws),
            b';' => return Ok(Extension),
            b'\r' => return Ok(SizeLf),
            _ => return Err(ParseError::invalid_chunk("invalid chunk size line")),
        };

        self.size_digits += 1;
        self.remaining_size = self
            .remaining_size
            .checked_mul(16)
            .and_then(|size| size.checked_add(u64::from(digit)))
            .ok_or_else(|| ParseError::invalid_chunk("chunk size overflow"))?;
        Ok(Size)
    }

    fn read_size_lf(&mut self, b: u8) -> Result<ChunkedState, ParseError> {
        ensure!(b == b'\n', ParseError::invalid_chunk("invalid chunk size LF"));
        self.size_line_len = 0;
        self.size_digits = 0;
        Ok(if self.remaining_size == 0 { Trailer } else { Body })
    }

    /// Consumes complete trailer lines. Returns true once the terminating empty line was read.
    fn read_trailers(&mut self, src: &mut BytesMut) -> Result<bool, ParseError> {
        loop {
            let Some(line_end) = src.windows(2).position(|window| window == b"\r\n") else {
                ensure!(
                    self.trailer_bytes + src.len() <= MAX_TRAILER_BYTES,
                    ParseError::invalid_chunk("trailers too large")
                );
                return Ok(false);
            };

            let line = src.split_to(line_end + 2);
            if line_end == 0 {
                return Ok(true);
            }

            self.trailer_bytes += line.len();
            ensure!(self.trailer_bytes <= MAX_TRAILER_BYTES, ParseError::invalid_chunk("trailers too large"));

            let (name, value) = parse_trailer(&line[..line_end])?;
            self.trailers.append(name, value);
        }
    }
}

fn parse_trailer(line: &[u8]) -> Result<(HeaderName, HeaderValue), ParseError> {
    let colon = line
        .iter()
        .position(|b| *b == b':')
        .filter(|colon| *colon > 0)
        .ok_or_else(|| ParseError::invalid_chunk("invalid trailer line"))?;

    let name = HeaderName::from_bytes(line[..colon].trim_ascii()).map_err(|_| ParseError::invalid_chunk("invalid trailer name"))?;
    let value = HeaderValue::from_bytes(line[colon + 1..].trim_ascii()).map_err(|_| ParseError::invalid_chunk("invalid trailer value"))?;
    Ok((name, value))
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                End => {
                    if !self.trailers.is_empty() {
                        trace!(count = self.trailers.len(), "read chunked trailers");
                        return Ok(Some(PayloadItem::Trailers(std::mem::take(&mut self.trailers))));
                    }
                    trace!("finished reading chunked data");
                    return Ok(Some(PayloadItem::Eof));
                }

                Body => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let read_size = usize::try_from(self.remaining_size).unwrap_or(usize::MAX).min(src.len());
                    self.remaining_size -= read_size as u64;
                    if self.remaining_size == 0 {
                        self.state = BodyCr;
                    }

                    let bytes = src.split_to(read_size).freeze();
                    trace!(len = bytes.len(), "read chunked bytes");
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }

                Trailer => {
                    if !self.read_trailers(src)? {
                        return Ok(None);
                    }
                    self.state = End;
                }

                state => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let b = src.get_u8();

                    if matches!(state, Size | SizeLws | Extension) && b != b'\r' {
                        self.size_line_len += 1;
                        ensure!(self.size_line_len <= MAX_SIZE_LINE, ParseError::invalid_chunk("chunk size line too long"));
                    }

                    self.state = match (state, b) {
                        (Size, b) => self.read_size(b)?,
                        (SizeLws, b'\t' | b' ') => SizeLws,
                        (SizeLws, b';') => Extension,
                        (SizeLws, b'\r') => SizeLf,
                        (SizeLws, _) => return Err(ParseError::invalid_chunk("invalid chunk size linear white space")),
                        (Extension, b'\r') => SizeLf,
                        (Extension, b'\n') => return Err(ParseError::invalid_chunk("chunk extension contains newline")),
                        (Extension, _) => Extension,
                        (SizeLf, b) => self.read_size_lf(b)?,
                        (BodyCr, b'\r') => BodyLf,
                        (BodyCr, _) => return Err(ParseError::invalid_chunk("invalid chunk body CR")),
                        (BodyLf, b'\n') => Size,
                        (BodyLf, _) => return Err(ParseError::invalid_chunk("invalid chunk body LF")),
                        (Body | Trailer | End, _) => unreachable!("handled above"),
                    };
                }
            }
        }
    }
}
