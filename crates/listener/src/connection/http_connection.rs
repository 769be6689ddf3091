use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::channel::oneshot;
use futures::{SinkExt, StreamExt};
use http::{HeaderValue, Method, Response, StatusCode, Version};
use http_body::Body;
use http_body_util::BodyExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, trace, warn};

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::config::ListenerConfig;
use crate::connection::{Binder, ConnectionInfo, ConnectionTracker, OnUpgrade, Upgraded};
use crate::protocol::body::{RequestBody, ResponseBody, skip_body};
use crate::protocol::{
    HttpError, Message, ParseError, PayloadItem, PayloadSize, Prepared, RequestHead, ResponseContext, ResponseHead, SendError,
    SendingHeaders, error_response, prepare,
};

/// One client connection.
///
/// Requests are served strictly one after another. While a handler runs, the request body
/// is read from the socket on demand; whatever the handler leaves unread is drained before
/// the connection is reused for the next request.
pub struct HttpConnection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: FramedWrite<W, ResponseEncoder>,
    config: Arc<ListenerConfig>,
    server_header: HeaderValue,
    info: ConnectionInfo,
    tracker: ConnectionTracker,
}

impl<R, W> fmt::Debug for HttpConnection<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConnection").field("info", &self.info).finish_non_exhaustive()
    }
}

/// What happens to the connection after a response.
enum Next {
    KeepAlive,
    Close,
    Upgrade(oneshot::Sender<Upgraded>),
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(
        reader: R,
        writer: W,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        tracker: ConnectionTracker,
        config: Arc<ListenerConfig>,
    ) -> Self {
        let decoder = RequestDecoder::with_limits(config.max_header_bytes, config.max_headers);
        Self {
            framed_read: FramedRead::with_capacity(reader, decoder, config.read_buffer_size),
            framed_write: FramedWrite::new(writer, ResponseEncoder::new()),
            server_header: config.server_header(),
            info: ConnectionInfo { id: tracker.id(), local_addr, remote_addr, secure: false, reuses: 0 },
            tracker,
            config,
        }
    }

    /// Marks the connection as secure: request urls use `https`/`wss`.
    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.info.secure = secure;
        self
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Serves requests until the peer goes away, a response closes the connection, the
    /// connection is upgraded or it is force-closed through its connection set.
    pub async fn process<B>(mut self, binder: &B) -> Result<(), HttpError>
    where
        B: Binder + ?Sized,
    {
        let result = loop {
            let token = self.tracker.token().clone();
            let next = select! {
                biased;
                () = token.cancelled() => {
                    debug!(id = self.info.id, "connection force closed");
                    break Ok(());
                }
                next = timeout(self.config.idle_timeout, self.framed_read.next()) => next,
            };

            let (head, payload_size) = match next {
                Err(_) => {
                    debug!(id = self.info.id, "idle timeout, close connection");
                    break Ok(());
                }
                Ok(None) => {
                    trace!(id = self.info.id, "can't read more request, break this connection down");
                    break Ok(());
                }
                Ok(Some(Err(e))) => {
                    if !e.is_transport() {
                        warn!(cause = %e, "can't receive next request");
                        self.send_error(&e, Version::HTTP_11).await?;
                    }
                    break Err(e.into());
                }
                Ok(Some(Ok(Message::Payload(_)))) => {
                    error!("receive request body while expecting request head");
                    let e = ParseError::invalid_body("need header while receive body");
                    self.send_error(&e, Version::HTTP_11).await?;
                    break Err(e.into());
                }
                Ok(Some(Ok(Message::Header(header)))) => header,
            };

            match self.do_process(head, payload_size, binder).await {
                Ok(Next::KeepAlive) => self.info.reuses += 1,
                Ok(Next::Close) => break Ok(()),
                Ok(Next::Upgrade(sender)) => {
                    self.upgrade(sender);
                    return Ok(());
                }
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = self.framed_write.get_mut().shutdown().await {
            trace!(cause = %e, "shutdown connection error");
        }
        result
    }

    async fn do_process<B>(&mut self, mut head: RequestHead, payload_size: PayloadSize, binder: &B) -> Result<Next, HttpError>
    where
        B: Binder + ?Sized,
    {
        let version = head.version();
        if let Err(e) = head.finish_initialization(self.info.local_addr, self.info.secure) {
            warn!(cause = %e, target = head.raw_target(), "invalid request target");
            self.send_error(&e, version).await?;
            return Ok(Next::Close);
        }

        let Some(binding) = binder.bind(&head) else {
            warn!(host = head.user_host_name(), target = head.raw_target(), "no listener for request");
            self.send_closing(error_response(StatusCode::BAD_REQUEST, Some("Invalid host")), version).await?;
            return Ok(Next::Close);
        };
        self.tracker.move_to(Arc::clone(&binding.connections));

        if head.expect_continue() && !payload_size.is_empty() {
            let writer = self.framed_write.get_mut();
            writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.map_err(SendError::io)?;
            writer.flush().await.map_err(SendError::io)?;
            info!("receive expect request header, sent continue response");
        }

        let head_request = head.method() == Method::HEAD;
        let keep_alive = head.keep_alive();
        let sending_headers = SendingHeaders::new();
        let token = self.tracker.token().clone();
        let (upgrade_sender, on_upgrade) = if head.is_websocket_request() {
            let (sender, on_upgrade) = OnUpgrade::pair();
            (Some(sender), Some(on_upgrade))
        } else {
            (None, None)
        };

        let (req_body, mut body_sender) = RequestBody::body_channel(&mut self.framed_read, payload_size);
        let mut request = head.into_request(req_body);
        let extensions = request.extensions_mut();
        extensions.insert(self.info);
        extensions.insert(sending_headers.clone());
        extensions.insert(token.clone());
        if let Some(on_upgrade) = on_upgrade {
            extensions.insert(on_upgrade);
        }

        // the handler and the body reader run together: the handler may wait for body bytes
        // that only the body reader pulls from the socket
        let mut body_error = None;
        let response = {
            let mut handler_future = binding.handler.call(request);
            let body_future = body_sender.send_body();
            tokio::pin!(body_future);
            let mut body_done = false;

            loop {
                select! {
                    biased;
                    response = &mut handler_future => break Some(response),
                    () = token.cancelled() => break None,
                    result = &mut body_future, if !body_done => {
                        body_done = true;
                        if let Err(e) = result {
                            body_error = Some(e);
                        }
                    }
                }
            }
        };

        let body_eof = body_sender.is_eof();
        drop(body_sender);

        let Some(response) = response else {
            debug!(id = self.info.id, "connection force closed while handling request");
            return Ok(Next::Close);
        };

        if let Some(e) = body_error {
            if e.is_transport() {
                return Err(e.into());
            }
            warn!(cause = %e, "can't read request body");
            self.send_error(&e, version).await?;
            return Ok(Next::Close);
        }

        let response = response.unwrap_or_else(|e| {
            error!(cause = %e, "handle request error");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, None)
        });

        let upgrading = response.status() == StatusCode::SWITCHING_PROTOCOLS
            && upgrade_sender.as_ref().is_some_and(|sender| !sender.is_canceled());
        let limit_reached = self.config.max_requests_per_connection.is_some_and(|max| self.info.reuses + 1 >= max);

        let server_name = self.server_header.clone();
        let ctx = ResponseContext {
            version,
            head_request,
            keep_alive: keep_alive && (upgrading || !limit_reached),
            server_name: &server_name,
            sending_headers: Some(&sending_headers),
        };
        let prepared = self.send_response(response, &ctx).await?;

        if upgrading && let Some(sender) = upgrade_sender {
            return Ok(Next::Upgrade(sender));
        }

        if !prepared.keep_alive {
            return Ok(Next::Close);
        }

        if !body_eof {
            match timeout(self.config.drain_timeout, skip_body(&mut self.framed_read)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(cause = %e, "can't drain request body, close connection");
                    return Ok(Next::Close);
                }
                Err(_) => {
                    debug!("drain request body timeout, close connection");
                    return Ok(Next::Close);
                }
            }
        }

        Ok(Next::KeepAlive)
    }

    /// Responds to a request that could not be parsed; the connection is closed afterwards.
    async fn send_error(&mut self, e: &ParseError, version: Version) -> Result<(), HttpError> {
        self.send_closing(error_response(e.status(), None), version).await
    }

    async fn send_closing(&mut self, response: Response<ResponseBody>, version: Version) -> Result<(), HttpError> {
        let server_name = self.server_header.clone();
        let ctx = ResponseContext { version, head_request: false, keep_alive: false, server_name: &server_name, sending_headers: None };
        self.send_response(response, &ctx).await?;
        Ok(())
    }

    async fn send_response(&mut self, response: Response<ResponseBody>, ctx: &ResponseContext<'_>) -> Result<Prepared, HttpError> {
        let (parts, mut body) = response.into_parts();
        let mut head = ResponseHead::from_parts(parts, ());
        let prepared = prepare(&mut head, body.size_hint().exact(), ctx);
        let payload_size = prepared.payload_size;

        // the head stays buffered so that it leaves together with the first body chunk
        self.framed_write.feed(Message::<_, Bytes>::Header((head, payload_size))).await?;

        if !payload_size.is_empty() {
            while let Some(frame) = body.frame().await {
                let frame = frame.map_err(|e| SendError::invalid_body(format!("resolve response body error: {e}")))?;
                let payload_item = match frame.into_data() {
                    Ok(data) => PayloadItem::Chunk(data),
                    Err(frame) => match frame.into_trailers() {
                        Ok(trailers) => PayloadItem::Trailers(trailers),
                        Err(_) => continue,
                    },
                };
                self.framed_write.send(Message::<(ResponseHead, PayloadSize), _>::Payload(payload_item)).await?;
            }
        }

        self.framed_write.send(Message::<(ResponseHead, PayloadSize), Bytes>::Payload(PayloadItem::Eof)).await?;
        Ok(prepared)
    }

    fn upgrade(self, sender: oneshot::Sender<Upgraded>) {
        let Self { mut framed_read, framed_write, info, tracker, .. } = self;
        let read_buf = std::mem::take(framed_read.read_buffer_mut());
        let upgraded = Upgraded {
            reader: Box::new(framed_read.into_inner()),
            writer: Box::new(framed_write.into_inner()),
            read_buf,
            info,
            tracker,
        };
        if sender.send(upgraded).is_err() {
            debug!(id = info.id, "upgrade receiver dropped, close connection");
        } else {
            info!(id = info.id, "connection upgraded");
        }
    }
}
