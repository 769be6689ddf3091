use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::channel::{mpsc, oneshot};
use futures::{FutureExt, SinkExt, Stream, StreamExt};
use http_body::{Body, Frame, SizeHint};
use tracing::{error, info, trace};

use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHead};

type PayloadResult = Result<PayloadItem, ParseError>;

/// The request body handed to handlers.
///
/// Every poll asks the [`RequestBodySender`] running on the connection task for the next
/// payload item. Chunk trailers arrive as a trailers frame before the end of the stream.
#[derive(Debug)]
pub struct RequestBody {
    signal: Option<mpsc::Sender<oneshot::Sender<PayloadResult>>>,
    receiving: Option<oneshot::Receiver<PayloadResult>>,
    payload_size: PayloadSize,
}

impl RequestBody {
    /// A body that ends immediately.
    pub fn empty() -> Self {
        Self { signal: None, receiving: None, payload_size: PayloadSize::Empty }
    }

    /// Creates the body and the sender that feeds it from `payload_stream`.
    pub fn body_channel<S>(payload_stream: &mut S, payload_size: PayloadSize) -> (RequestBody, RequestBodySender<'_, S>)
    where
        S: Stream + Unpin,
    {
        if payload_size.is_empty() {
            return (Self::empty(), RequestBodySender { payload_stream, receiver: None, eof: true });
        }

        let (tx, receiver) = mpsc::channel(16);
        let body = RequestBody { signal: Some(tx), receiving: None, payload_size };
        (body, RequestBodySender { payload_stream, receiver: Some(receiver), eof: false })
    }
}

/// Reads payload items from the connection on behalf of a [`RequestBody`].
#[derive(Debug)]
pub struct RequestBodySender<'conn, S>
where
    S: Stream + Unpin,
{
    payload_stream: &'conn mut S,
    receiver: Option<mpsc::Receiver<oneshot::Sender<PayloadResult>>>,
    eof: bool,
}

impl<S> RequestBodySender<'_, S>
where
    S: Stream<Item = Result<Message<(RequestHead, PayloadSize)>, ParseError>> + Unpin,
{
    /// Answers body requests until the payload is complete, the body is dropped, or reading fails.
    pub async fn send_body(&mut self) -> Result<(), ParseError> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Ok(());
        };

        while !self.eof {
            let Some(sender) = receiver.next().await else {
                trace!("request body dropped before end of payload");
                return Ok(());
            };

            let item = match self.payload_stream.next().await {
                Some(Ok(Message::Payload(item))) => item,
                Some(Ok(Message::Header(_))) => {
                    error!("received header from receive body phase");
                    let _ = sender.send(Err(ParseError::invalid_body("unexpected request head")));
                    return Err(ParseError::invalid_body("received header from receive body phase"));
                }
                Some(Err(e)) => {
                    let _ = sender.send(Err(ParseError::invalid_body(&e)));
                    return Err(e);
                }
                None => {
                    let _ = sender.send(Err(ParseError::invalid_body("connection closed")));
                    return Err(ParseError::invalid_body("connection closed while reading body"));
                }
            };

            self.eof = item.is_eof();
            if sender.send(Ok(item)).is_err() {
                trace!("request body dropped while a frame was pending");
            }
        }
        Ok(())
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }
}

/// Reads and discards the rest of the current request payload.
pub(crate) async fn skip_body<S>(payload_stream: &mut S) -> Result<(), ParseError>
where
    S: Stream<Item = Result<Message<(RequestHead, PayloadSize)>, ParseError>> + Unpin,
{
    let mut size: usize = 0;
    loop {
        match payload_stream.next().await {
            Some(Ok(Message::Payload(PayloadItem::Eof))) => {
                if size > 0 {
                    info!(size, "skip request body");
                }
                return Ok(());
            }
            Some(Ok(Message::Payload(item))) => size += item.as_bytes().map_or(0, Bytes::len),
            Some(Ok(Message::Header(_))) => return Err(ParseError::invalid_body("request head while skipping body")),
            Some(Err(e)) => return Err(e),
            None => return Err(ParseError::invalid_body("connection closed while skipping body")),
        }
    }
}

impl Body for RequestBody {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        loop {
            if let Some(receiver) = &mut self.receiving {
                let result = ready!(receiver.poll_unpin(cx));
                self.receiving.take();
                return match result {
                    Ok(Ok(PayloadItem::Chunk(bytes))) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                    Ok(Ok(PayloadItem::Trailers(trailers))) => Poll::Ready(Some(Ok(Frame::trailers(trailers)))),
                    Ok(Ok(PayloadItem::Eof)) => {
                        self.signal.take();
                        Poll::Ready(None)
                    }
                    Ok(Err(e)) => {
                        self.signal.take();
                        Poll::Ready(Some(Err(e)))
                    }
                    Err(_) => {
                        self.signal.take();
                        Poll::Ready(Some(Err(ParseError::invalid_body("parse body canceled"))))
                    }
                };
            }

            let Some(signal) = &mut self.signal else {
                return Poll::Ready(None);
            };

            if let Err(e) = ready!(signal.poll_ready_unpin(cx)) {
                return Poll::Ready(Some(Err(ParseError::invalid_body(e))));
            }
            let (tx, rx) = oneshot::channel();
            if let Err(e) = signal.start_send(tx) {
                return Poll::Ready(Some(Err(ParseError::invalid_body(e))));
            }
            self.receiving = Some(rx);
        }
    }

    fn is_end_stream(&self) -> bool {
        self.signal.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        match self.payload_size {
            PayloadSize::Length(length) => SizeHint::with_exact(length),
            PayloadSize::Empty => SizeHint::with_exact(0),
            PayloadSize::Chunked | PayloadSize::UntilClose => SizeHint::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use tokio_util::codec::FramedRead;

    use super::*;
    use crate::codec::RequestDecoder;

    #[tokio::test]
    async fn streams_chunks_and_trailers() {
        let input = "POST /upload HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\n\
                     5\r\nhello\r\n6\r\n world\r\n0\r\nX-Sum: 11\r\n\r\n";
        let mut framed = FramedRead::new(input.as_bytes(), RequestDecoder::new());

        let Some(Ok(Message::Header((_, payload_size)))) = framed.next().await else {
            panic!("expected request head");
        };
        let (body, mut sender) = RequestBody::body_channel(&mut framed, payload_size);

        let (collected, sent) = tokio::join!(body.collect(), sender.send_body());
        sent.unwrap();
        assert!(sender.is_eof());

        let collected = collected.unwrap();
        assert_eq!(collected.trailers().unwrap().get("x-sum").unwrap(), "11");
        assert_eq!(collected.to_bytes(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn empty_body_ends_without_sender() {
        let mut stream = futures::stream::empty::<Result<Message<(RequestHead, PayloadSize)>, ParseError>>();
        let (mut body, mut sender) = RequestBody::body_channel(&mut stream, PayloadSize::Empty);

        assert!(body.is_end_stream());
        assert_eq!(body.size_hint().exact(), Some(0));
        assert!(body.frame().await.is_none());
        sender.send_body().await.unwrap();
    }

    #[tokio::test]
    async fn skip_unread_body() {
        let input = "POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\nhelloGET / HTTP/1.1\r\nHost: a\r\n\r\n";
        let mut framed = FramedRead::new(input.as_bytes(), RequestDecoder::new());

        let Some(Ok(Message::Header((_, payload_size)))) = framed.next().await else {
            panic!("expected request head");
        };
        let (body, sender) = RequestBody::body_channel(&mut framed, payload_size);
        assert_eq!(body.size_hint().exact(), Some(5));
        assert!(!sender.is_eof());
        drop(body);
        drop(sender);

        skip_body(&mut framed).await.unwrap();
        let next = framed.next().await.unwrap().unwrap();
        assert!(next.is_header());
    }
}
