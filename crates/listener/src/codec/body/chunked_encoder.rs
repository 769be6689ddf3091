use std::io::Write;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::Encoder;

use crate::protocol::{PayloadItem, SendError};

/// Encoder for the chunked transfer coding.
///
/// Every non-empty chunk becomes `<HEX-SIZE>\r\n<payload>\r\n`. The last chunk `0\r\n` is
/// written exactly once, followed by trailer fields (if any) and the final empty line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkedEncoder {
    last_chunk: bool,
    eof: bool,
}

impl ChunkedEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finish(&self) -> bool {
        self.eof
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for ChunkedEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            PayloadItem::Chunk(bytes) => {
                if self.last_chunk || !bytes.has_remaining() {
                    return Ok(());
                }
                write!(helper::Writer(dst), "{:X}\r\n", bytes.remaining())?;
                dst.reserve(bytes.remaining() + 2);
                dst.put(bytes);
                dst.extend_from_slice(b"\r\n");
            }
            PayloadItem::Trailers(trailers) => {
                if self.last_chunk {
                    return Ok(());
                }
                self.last_chunk = true;
                dst.extend_from_slice(b"0\r\n");
                for (name, value) in &trailers {
                    dst.put_slice(name.as_ref());
                    dst.put_slice(b": ");
                    dst.put_slice(value.as_ref());
                    dst.put_slice(b"\r\n");
                }
                dst.extend_from_slice(b"\r\n");
            }
            PayloadItem::Eof => {
                self.eof = true;
                if !self.last_chunk {
                    self.last_chunk = true;
                    dst.extend_from_slice(b"0\r\n\r\n");
                }
            }
        }
        Ok(())
    }
}

mod helper {
    use std::io;

    use bytes::{BufMut, BytesMut};

    pub struct Writer<'a>(pub &'a mut BytesMut);

    impl io::Write for Writer<'_> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.put_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::{HeaderMap, HeaderValue};
    use tokio_util::codec::Decoder;

    use super::*;
    use crate::codec::body::chunked_decoder::ChunkedDecoder;

    #[test]
    fn chunk_framing() {
        let mut encoder = ChunkedEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"hello world, chunked!")), &mut dst).unwrap();
        encoder.encode(PayloadItem::Chunk(Bytes::new()), &mut dst).unwrap();
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).unwrap();
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).unwrap();

        assert_eq!(&dst[..], b"15\r\nhello world, chunked!\r\n0\r\n\r\n");
        assert!(encoder.is_finish());
    }

    #[test]
    fn trailers_end_the_body() {
        let mut trailers = HeaderMap::new();
        trailers.insert("x-digest", HeaderValue::from_static("abc"));

        let mut encoder = ChunkedEncoder::new();
        let mut dst = BytesMut::new();
        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"ab")), &mut dst).unwrap();
        encoder.encode(PayloadItem::<Bytes>::Trailers(trailers), &mut dst).unwrap();
        assert!(!encoder.is_finish());
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).unwrap();
        assert!(encoder.is_finish());

        assert_eq!(&dst[..], b"2\r\nab\r\n0\r\nx-digest: abc\r\n\r\n");
    }

    #[test]
    fn decoder_reads_what_encoder_wrote() {
        let parts: [&[u8]; 3] = [b"first ", b"second ", b"third"];
        let mut encoder = ChunkedEncoder::new();
        let mut wire = BytesMut::new();
        for part in parts {
            encoder.encode(PayloadItem::Chunk(Bytes::from_static(part)), &mut wire).unwrap();
        }
        encoder.encode(PayloadItem::<Bytes>::Eof, &mut wire).unwrap();

        let mut decoder = ChunkedDecoder::new();
        let mut body = Vec::new();
        while let Some(PayloadItem::Chunk(bytes)) = decoder.decode(&mut wire).unwrap() {
            body.extend_from_slice(&bytes);
        }
        assert_eq!(body, parts.concat());
        assert!(wire.is_empty());
    }
}
