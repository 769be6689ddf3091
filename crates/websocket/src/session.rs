//! The session state machine.
//!
//! A session is `Connecting` until its task starts, then `Open`. Either side may start the
//! close handshake, which moves it to `Closing`; it ends `Closed` once the handshake
//! completes, times out or the connection drops. States only move forward.

use std::fmt;
use std::future;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use http::Uri;
use micro_listener::connection::{ConnectionInfo, ConnectionTracker, Upgraded, UpgradedReader, UpgradedWriter};
use tokio::io::AsyncWriteExt;
use tokio::select;
use tokio::sync::Notify;
use tokio::task;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::WebSocketConfig;
use crate::error::{CloseCode, WsError};
use crate::frame::{Frame, FrameCodec, MAX_CONTROL_PAYLOAD, OpCode};
use crate::handler::WebSocketHandler;

/// Longest close reason that fits into a close frame.
const MAX_CLOSE_REASON: usize = MAX_CONTROL_PAYLOAD - 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// A close we started and for which the peer's answer is awaited.
#[derive(Debug)]
struct PendingClose {
    code: CloseCode,
    reason: String,
    deadline: Instant,
}

/// Handle of one session. Clones share the session.
#[derive(Clone)]
pub struct WebSocket {
    inner: Arc<Inner>,
}

struct Inner {
    id: u64,
    uri: Uri,
    protocol: Option<String>,
    info: ConnectionInfo,
    config: Arc<WebSocketConfig>,
    handler: Arc<dyn WebSocketHandler>,
    state: Mutex<ReadyState>,
    pending_close: Mutex<Option<PendingClose>>,
    writer: tokio::sync::Mutex<FramedWrite<UpgradedWriter, FrameCodec>>,
    pong: Notify,
    close_started: Notify,
    /// cancelled when the connection is released, stops the reading task
    released: CancellationToken,
    /// cancelled after `on_close` returned
    closed: CancellationToken,
    /// the task reading frames, which also runs the handler callbacks
    task_id: OnceLock<task::Id>,
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("id", &self.inner.id)
            .field("uri", &self.inner.uri)
            .field("state", &self.ready_state())
            .field("protocol", &self.inner.protocol)
            .finish_non_exhaustive()
    }
}

/// Reads the frames of a session until it is closed.
pub struct SessionTask {
    ws: WebSocket,
    reader: FramedRead<UpgradedReader, FrameCodec>,
    tracker: ConnectionTracker,
}

impl fmt::Debug for SessionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTask").field("ws", &self.ws).finish_non_exhaustive()
    }
}

impl WebSocket {
    /// Creates a session on an upgraded connection. The session opens when the returned task
    /// runs.
    pub fn accept(
        id: u64,
        upgraded: Upgraded,
        uri: Uri,
        protocol: Option<String>,
        config: Arc<WebSocketConfig>,
        handler: Arc<dyn WebSocketHandler>,
    ) -> (Self, SessionTask) {
        let Upgraded { reader, writer, read_buf, info, tracker } = upgraded;

        let mut reader = FramedRead::new(reader, FrameCodec::new(config.max_frame_size));
        reader.read_buffer_mut().extend_from_slice(&read_buf);
        let writer = FramedWrite::new(writer, FrameCodec::new(config.max_frame_size));

        let inner = Inner {
            id,
            uri,
            protocol,
            info,
            config,
            handler,
            state: Mutex::new(ReadyState::Connecting),
            pending_close: Mutex::new(None),
            writer: tokio::sync::Mutex::new(writer),
            pong: Notify::new(),
            close_started: Notify::new(),
            released: CancellationToken::new(),
            closed: CancellationToken::new(),
            task_id: OnceLock::new(),
        };
        let ws = Self { inner: Arc::new(inner) };
        let task = SessionTask { ws: ws.clone(), reader, tracker };
        (ws, task)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    /// The negotiated subprotocol.
    pub fn protocol(&self) -> Option<&str> {
        self.inner.protocol.as_deref()
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.inner.info
    }

    pub fn ready_state(&self) -> ReadyState {
        *self.state()
    }

    fn state(&self) -> MutexGuard<'_, ReadyState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_close(&self) -> MutexGuard<'_, Option<PendingClose>> {
        self.inner.pending_close.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_session_task(&self) -> bool {
        task::try_id().is_some_and(|id| self.inner.task_id.get() == Some(&id))
    }

    fn ensure_open(&self) -> Result<(), WsError> {
        match self.ready_state() {
            ReadyState::Open => Ok(()),
            ReadyState::Closed => Err(WsError::Closed),
            state => Err(WsError::InvalidState { state }),
        }
    }

    pub async fn send_text(&self, text: &str) -> Result<(), WsError> {
        self.send_message(OpCode::Text, Bytes::copy_from_slice(text.as_bytes())).await
    }

    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), WsError> {
        self.send_message(OpCode::Binary, data.into()).await
    }

    /// Sends one message, fragmented by `fragment_length`. Frames of concurrent messages never
    /// interleave.
    async fn send_message(&self, opcode: OpCode, payload: Bytes) -> Result<(), WsError> {
        self.ensure_open()?;
        let frames = Frame::fragments(opcode, payload, self.inner.config.fragment_length);

        let mut writer = self.inner.writer.lock().await;
        self.ensure_open()?;
        for frame in frames {
            writer.feed(frame).await?;
        }
        writer.flush().await
    }

    async fn send_frame(&self, frame: Frame) -> Result<(), WsError> {
        self.inner.writer.lock().await.send(frame).await
    }

    /// Sends a ping and waits up to `close_timeout` for a pong. Returns whether one arrived.
    pub async fn ping(&self, payload: impl Into<Bytes>) -> Result<bool, WsError> {
        let payload = payload.into();
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(WsError::protocol(CloseCode::PROTOCOL_ERROR, "ping payload longer than 125 bytes"));
        }
        self.ensure_open()?;

        let pong = self.inner.pong.notified();
        tokio::pin!(pong);
        pong.as_mut().enable();
        self.send_frame(Frame::ping(payload)).await?;
        Ok(timeout(self.inner.config.close_timeout, pong).await.is_ok())
    }

    /// Starts the close handshake and waits for the peer's answer, see [`WebSocket::close_with`].
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<(), WsError> {
        self.close_with(code, reason, true).await
    }

    /// Closes the session. A no-op once the session is closing.
    ///
    /// Reserved codes close without sending a close frame. With `wait`, the peer gets
    /// `close_timeout` to answer and the call returns once the session is closed. Without
    /// `wait` the connection is released right away.
    ///
    /// Called from a handler callback, the call returns once the close frame is written: the
    /// peer's answer is only read after the callback returns. [`WebSocket::closed`] resolves
    /// when the session is closed.
    pub async fn close_with(&self, code: CloseCode, reason: &str, wait: bool) -> Result<(), WsError> {
        if reason.len() > MAX_CLOSE_REASON {
            return Err(WsError::invalid_close_reason("reason longer than 123 bytes"));
        }
        if !code.is_valid() {
            return Err(WsError::invalid_close_reason(format!("invalid close code {code}")));
        }

        let previous = {
            let mut state = self.state();
            let previous = *state;
            if matches!(previous, ReadyState::Closing | ReadyState::Closed) {
                return Ok(());
            }
            *state = ReadyState::Closing;
            previous
        };
        debug!(id = self.inner.id, %code, reason, "close session");

        let send = previous == ReadyState::Open && !code.is_reserved();
        if wait && send {
            let deadline = Instant::now() + self.inner.config.close_timeout;
            *self.pending_close() = Some(PendingClose { code, reason: reason.to_string(), deadline });
            self.inner.close_started.notify_one();
        }

        let sent = send && self.send_frame(Frame::close(Some(code), reason)).await.is_ok();
        if !(wait && sent) {
            self.finish(code, reason, false).await;
        } else if self.in_session_task() {
            trace!(id = self.inner.id, "close started by a callback");
        } else if timeout(self.inner.config.close_timeout, self.closed()).await.is_err() {
            debug!(id = self.inner.id, "close handshake timeout");
            let pending = self.pending_close().take();
            if let Some(PendingClose { code, reason, .. }) = pending {
                self.finish(code, &reason, false).await;
            }
            self.closed().await;
        }
        Ok(())
    }

    /// Resolves once the session is closed and `on_close` has returned.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await;
    }

    async fn finish_pending(&self, received: bool) {
        let pending = self.pending_close().take();
        match pending {
            Some(PendingClose { code, reason, .. }) => self.finish(code, &reason, received).await,
            None => self.finish(CloseCode::ABNORMAL, "", false).await,
        }
    }

    /// Releases the connection and emits `on_close`, once.
    async fn finish(&self, code: CloseCode, reason: &str, was_clean: bool) {
        {
            let mut state = self.state();
            if *state == ReadyState::Closed {
                return;
            }
            *state = ReadyState::Closed;
        }
        self.pending_close().take();
        self.inner.released.cancel();

        if let Err(e) = self.inner.writer.lock().await.get_mut().shutdown().await {
            trace!(cause = %e, "shutdown websocket connection error");
        }
        info!(id = self.inner.id, %code, was_clean, "websocket closed");

        self.inner.handler.on_close(self, code, reason, was_clean).await;
        self.inner.closed.cancel();
    }

    async fn fail(&self, e: WsError) {
        warn!(id = self.inner.id, cause = %e, "websocket error");
        self.inner.handler.on_error(self, &e).await;
        if let WsError::Protocol { code, reason } = &e
            && let Err(e) = self.close_with(*code, reason, false).await
        {
            debug!(cause = %e, "can't close session");
        }
        self.finish_pending(false).await;
    }

    async fn deliver(&self, opcode: OpCode, payload: Bytes) -> Result<(), WsError> {
        if opcode == OpCode::Text {
            let text = String::from_utf8(payload.to_vec())
                .map_err(|e| WsError::protocol(CloseCode::INVALID_PAYLOAD, format!("text message is not utf-8: {e}")))?;
            self.inner.handler.on_text(self, text).await;
        } else {
            self.inner.handler.on_binary(self, payload).await;
        }
        Ok(())
    }

    fn check_message_size(&self, size: usize) -> Result<(), WsError> {
        if size > self.inner.config.max_message_size {
            return Err(WsError::protocol(CloseCode::MESSAGE_TOO_BIG, format!("message of {size} bytes is too large")));
        }
        Ok(())
    }

    /// Handles one frame; returns whether more frames are expected.
    async fn process_frame(&self, frame: Frame, message: &mut Option<(OpCode, BytesMut)>) -> Result<bool, WsError> {
        if frame.rsv1 {
            return Err(WsError::protocol(CloseCode::INVALID_PAYLOAD, "compressed frame without negotiated compression"));
        }

        match frame.opcode {
            OpCode::Ping => {
                if self.ready_state() == ReadyState::Open {
                    self.send_frame(Frame::pong(frame.payload)).await?;
                }
                Ok(true)
            }
            OpCode::Pong => {
                self.inner.pong.notify_waiters();
                Ok(true)
            }
            OpCode::Close => {
                self.process_close(&frame).await?;
                Ok(false)
            }
            // data arriving after our close frame is dropped
            _ if self.ready_state() != ReadyState::Open => Ok(true),
            OpCode::Text | OpCode::Binary => {
                if message.is_some() {
                    return Err(WsError::protocol(CloseCode::PROTOCOL_ERROR, "new message while a fragmented message is in progress"));
                }
                self.check_message_size(frame.payload.len())?;
                if frame.fin {
                    self.deliver(frame.opcode, frame.payload).await?;
                } else {
                    *message = Some((frame.opcode, BytesMut::from(&frame.payload[..])));
                }
                Ok(true)
            }
            OpCode::Continuation => {
                let Some((_, buf)) = message.as_mut() else {
                    return Err(WsError::protocol(CloseCode::PROTOCOL_ERROR, "continuation frame without a message in progress"));
                };
                self.check_message_size(buf.len() + frame.payload.len())?;
                buf.extend_from_slice(&frame.payload);
                if frame.fin
                    && let Some((opcode, buf)) = message.take()
                {
                    self.deliver(opcode, buf.freeze()).await?;
                }
                Ok(true)
            }
        }
    }

    async fn process_close(&self, frame: &Frame) -> Result<(), WsError> {
        let (code, reason) = frame.close_payload()?;
        trace!(id = self.inner.id, %code, %reason, "receive close frame");

        let previous = {
            let mut state = self.state();
            let previous = *state;
            if previous == ReadyState::Open {
                *state = ReadyState::Closing;
            }
            previous
        };
        match previous {
            ReadyState::Open => {}
            ReadyState::Closed => return Ok(()),
            // the peer answered our close
            ReadyState::Connecting | ReadyState::Closing => {
                self.finish_pending(true).await;
                return Ok(());
            }
        }

        let reply = if code.is_reserved() { Frame::close(None, "") } else { Frame::close(Some(code), &reason) };
        let sent = self.send_frame(reply).await.is_ok();
        self.finish(code, &reason, sent).await;
        Ok(())
    }

    fn close_deadline(&self) -> Option<Instant> {
        self.pending_close().as_ref().map(|pending| pending.deadline)
    }
}

impl SessionTask {
    pub fn id(&self) -> u64 {
        self.ws.id()
    }

    /// Opens the session and processes its frames until it is closed. The connection is
    /// released when this returns.
    pub async fn run(self) {
        let Self { ws, mut reader, tracker } = self;
        {
            let mut state = ws.state();
            if *state != ReadyState::Connecting {
                return;
            }
            *state = ReadyState::Open;
        }
        if let Some(id) = task::try_id() {
            ws.inner.task_id.get_or_init(|| id);
        }
        info!(id = ws.id(), uri = %ws.uri(), "websocket opened");
        ws.inner.handler.on_open(&ws).await;

        let mut message = None;
        loop {
            let deadline = ws.close_deadline();
            let next = select! {
                biased;
                () = ws.inner.released.cancelled() => break,
                () = tracker.token().cancelled() => {
                    debug!(id = ws.id(), "websocket force closed");
                    if let Err(e) = ws.close_with(CloseCode::GOING_AWAY, "", false).await {
                        debug!(cause = %e, "can't close session");
                    }
                    ws.finish_pending(false).await;
                    break;
                }
                () = wait_until(deadline) => {
                    debug!(id = ws.id(), "close handshake timeout");
                    ws.finish_pending(false).await;
                    break;
                }
                () = ws.inner.close_started.notified() => continue,
                next = reader.next() => next,
            };

            match next {
                None => {
                    ws.finish_pending(false).await;
                    break;
                }
                Some(Err(e)) => {
                    ws.fail(e).await;
                    break;
                }
                Some(Ok(frame)) => match ws.process_frame(frame, &mut message).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        ws.fail(e).await;
                        break;
                    }
                },
            }
        }
        // a close we started is still waiting for the peer
        if ws.ready_state() != ReadyState::Closed {
            ws.finish_pending(false).await;
        }
        drop(tracker);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use async_trait::async_trait;
    use micro_listener::connection::ConnectionSet;
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

    use super::*;
    use crate::frame::encode_client_frame;

    const MASK: [u8; 4] = [1, 2, 3, 4];

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        Open,
        Text(String),
        Binary(Bytes),
        Close(CloseCode, String, bool),
        Error(CloseCode),
    }

    struct Recorder {
        events: UnboundedSender<Event>,
    }

    #[async_trait]
    impl WebSocketHandler for Recorder {
        async fn on_open(&self, _ws: &WebSocket) {
            self.events.send(Event::Open).unwrap();
        }

        async fn on_text(&self, _ws: &WebSocket, text: String) {
            self.events.send(Event::Text(text)).unwrap();
        }

        async fn on_binary(&self, _ws: &WebSocket, data: Bytes) {
            self.events.send(Event::Binary(data)).unwrap();
        }

        async fn on_close(&self, _ws: &WebSocket, code: CloseCode, reason: &str, was_clean: bool) {
            self.events.send(Event::Close(code, reason.to_string(), was_clean)).unwrap();
        }

        async fn on_error(&self, _ws: &WebSocket, error: &WsError) {
            self.events.send(Event::Error(error.close_code())).unwrap();
        }
    }

    /// Closes the session from inside `on_text`.
    struct CloseOnText(Recorder);

    #[async_trait]
    impl WebSocketHandler for CloseOnText {
        async fn on_open(&self, ws: &WebSocket) {
            self.0.on_open(ws).await;
        }

        async fn on_text(&self, ws: &WebSocket, _text: String) {
            ws.close(CloseCode::NORMAL, "bye").await.unwrap();
        }

        async fn on_close(&self, ws: &WebSocket, code: CloseCode, reason: &str, was_clean: bool) {
            self.0.on_close(ws, code, reason, was_clean).await;
        }
    }

    struct Session {
        ws: WebSocket,
        client: DuplexStream,
        events: UnboundedReceiver<Event>,
        connections: Arc<ConnectionSet>,
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    async fn open(config: WebSocketConfig) -> Session {
        open_with(config, |events| Arc::new(Recorder { events })).await
    }

    async fn open_with(config: WebSocketConfig, handler: impl FnOnce(UnboundedSender<Event>) -> Arc<dyn WebSocketHandler>) -> Session {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(server);
        let connections = Arc::new(ConnectionSet::new());
        let upgraded = Upgraded {
            reader: Box::new(reader),
            writer: Box::new(writer),
            read_buf: BytesMut::new(),
            info: ConnectionInfo { id: 7, local_addr: addr(8080), remote_addr: addr(50000), secure: false, reuses: 0 },
            tracker: ConnectionTracker::new(Arc::clone(&connections)),
        };
        let (events, receiver) = unbounded_channel();
        let handler = handler(events);

        let (ws, task) = WebSocket::accept(1, upgraded, Uri::from_static("http://example.com/chat"), None, Arc::new(config), handler);
        assert_eq!(ws.ready_state(), ReadyState::Connecting);
        tokio::spawn(task.run());

        let mut session = Session { ws, client, events: receiver, connections };
        assert_eq!(session.events.recv().await, Some(Event::Open));
        session
    }

    impl Session {
        async fn send(&mut self, frame: Frame) {
            let mut buf = BytesMut::new();
            encode_client_frame(&frame, MASK, &mut buf);
            self.client.write_all(&buf).await.unwrap();
        }

        async fn read(&mut self, n: usize) -> Vec<u8> {
            let mut buf = vec![0; n];
            self.client.read_exact(&mut buf).await.unwrap();
            buf
        }
    }

    #[tokio::test]
    async fn fragmented_text_is_delivered_once() {
        let mut session = open(WebSocketConfig::default()).await;
        session.send(Frame::new(OpCode::Text, Bytes::from_static(b"Hel"), false)).await;
        session.send(Frame::ping("in between")).await;
        session.send(Frame::new(OpCode::Continuation, Bytes::from_static(b"lo "), false)).await;
        session.send(Frame::new(OpCode::Continuation, Bytes::from_static(b"world"), true)).await;
        session.send(Frame::new(OpCode::Binary, Bytes::from_static(b"\x00\x01"), true)).await;

        assert_eq!(session.events.recv().await, Some(Event::Text("Hello world".to_string())));
        assert_eq!(session.events.recv().await, Some(Event::Binary(Bytes::from_static(b"\x00\x01"))));
        // the ping was answered inline
        assert_eq!(session.read(12).await, b"\x8a\x0ain between");
    }

    #[tokio::test]
    async fn messages_are_fragmented() {
        let mut session = open(WebSocketConfig::builder().fragment_length(2).build()).await;
        session.ws.send_text("abc").await.unwrap();
        session.ws.send_binary(Bytes::new()).await.unwrap();

        assert_eq!(session.read(7).await, b"\x01\x02ab\x80\x01c");
        assert_eq!(session.read(2).await, b"\x82\x00");
    }

    #[tokio::test]
    async fn peer_close_is_echoed() {
        let mut session = open(WebSocketConfig::default()).await;
        session.send(Frame::close(Some(CloseCode::GOING_AWAY), "bye")).await;

        assert_eq!(session.read(7).await, b"\x88\x05\x03\xe9bye");
        assert_eq!(session.events.recv().await, Some(Event::Close(CloseCode::GOING_AWAY, "bye".to_string(), true)));
        session.ws.closed().await;
        assert_eq!(session.ws.ready_state(), ReadyState::Closed);
        assert!(matches!(session.ws.send_text("late").await, Err(WsError::Closed)));
    }

    #[tokio::test]
    async fn empty_close_is_answered_without_code() {
        let mut session = open(WebSocketConfig::default()).await;
        session.send(Frame::close(None, "")).await;

        assert_eq!(session.read(2).await, b"\x88\x00");
        assert_eq!(session.events.recv().await, Some(Event::Close(CloseCode::NO_STATUS, String::new(), true)));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut session = open(WebSocketConfig::default()).await;
        let ws = session.ws.clone();
        let close = tokio::spawn(async move { ws.close(CloseCode::NORMAL, "done").await });

        assert_eq!(session.read(8).await, b"\x88\x06\x03\xe8done");
        assert_eq!(session.ws.ready_state(), ReadyState::Closing);
        session.ws.close(CloseCode::GOING_AWAY, "again").await.unwrap();
        assert!(matches!(session.ws.send_text("late").await, Err(WsError::InvalidState { state: ReadyState::Closing })));

        session.send(Frame::close(Some(CloseCode::NORMAL), "")).await;
        close.await.unwrap().unwrap();
        assert_eq!(session.ws.ready_state(), ReadyState::Closed);
        assert_eq!(session.events.recv().await, Some(Event::Close(CloseCode::NORMAL, "done".to_string(), true)));
        session.ws.close(CloseCode::NORMAL, "").await.unwrap();
        assert!(session.events.try_recv().is_err());
        session.connections.closed().await;
    }

    #[tokio::test]
    async fn close_handshake_times_out() {
        let config = WebSocketConfig::builder().close_timeout(Duration::from_millis(20)).build();
        let mut session = open(config).await;
        session.ws.close(CloseCode::NORMAL, "").await.unwrap();
        assert_eq!(session.ws.ready_state(), ReadyState::Closed);
        assert_eq!(session.events.recv().await, Some(Event::Close(CloseCode::NORMAL, String::new(), false)));
    }

    #[tokio::test]
    async fn close_from_callback_returns_before_the_answer() {
        let config = WebSocketConfig::builder().close_timeout(Duration::from_secs(30)).build();
        let mut session = open_with(config, |events| Arc::new(CloseOnText(Recorder { events }))).await;
        session.send(Frame::new(OpCode::Text, Bytes::from_static(b"hi"), true)).await;

        assert_eq!(session.read(7).await, b"\x88\x05\x03\xe8bye");
        session.send(Frame::close(Some(CloseCode::NORMAL), "")).await;
        session.ws.closed().await;
        assert_eq!(session.events.recv().await, Some(Event::Close(CloseCode::NORMAL, "bye".to_string(), true)));
    }

    #[tokio::test]
    async fn invalid_close_arguments() {
        let session = open(WebSocketConfig::default()).await;
        let long_reason = "x".repeat(124);
        assert!(matches!(session.ws.close(CloseCode::NORMAL, &long_reason).await, Err(WsError::InvalidCloseReason { .. })));
        assert!(matches!(session.ws.close(CloseCode::new(999), "").await, Err(WsError::InvalidCloseReason { .. })));
        assert_eq!(session.ws.ready_state(), ReadyState::Open);
    }

    #[tokio::test]
    async fn reserved_code_closes_without_frame() {
        let mut session = open(WebSocketConfig::default()).await;
        session.ws.close(CloseCode::ABNORMAL, "").await.unwrap();
        session.ws.closed().await;
        assert_eq!(session.events.recv().await, Some(Event::Close(CloseCode::ABNORMAL, String::new(), false)));

        let mut rest = Vec::new();
        session.client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn ping_waits_for_pong() {
        let mut session = open(WebSocketConfig::default()).await;
        let ws = session.ws.clone();
        let ping = tokio::spawn(async move { ws.ping("hb").await });

        assert_eq!(session.read(4).await, b"\x89\x02hb");
        session.send(Frame::pong("hb")).await;
        assert!(ping.await.unwrap().unwrap());

        assert!(session.ws.ping(vec![0_u8; 126]).await.is_err());
    }

    #[tokio::test]
    async fn protocol_errors_close_the_session() {
        let mut session = open(WebSocketConfig::default()).await;
        session.send(Frame::new(OpCode::Continuation, Bytes::from_static(b"orphan"), true)).await;

        let reply = session.read(4).await;
        assert_eq!(reply[0], 0x88);
        assert_eq!(&reply[2..4], &1002_u16.to_be_bytes());
        assert_eq!(session.events.recv().await, Some(Event::Error(CloseCode::PROTOCOL_ERROR)));
        assert!(matches!(session.events.recv().await, Some(Event::Close(CloseCode::PROTOCOL_ERROR, _, false))));
    }

    #[tokio::test]
    async fn invalid_utf8_and_oversized_messages() {
        let mut session = open(WebSocketConfig::default()).await;
        session.send(Frame::new(OpCode::Text, Bytes::from_static(b"\xff\xfe"), true)).await;
        assert_eq!(session.events.recv().await, Some(Event::Error(CloseCode::INVALID_PAYLOAD)));

        let mut session = open(WebSocketConfig::builder().max_message_size(4).build()).await;
        session.send(Frame::new(OpCode::Binary, Bytes::from_static(b"abc"), false)).await;
        session.send(Frame::new(OpCode::Continuation, Bytes::from_static(b"def"), true)).await;
        assert_eq!(session.events.recv().await, Some(Event::Error(CloseCode::MESSAGE_TOO_BIG)));
    }

    #[tokio::test]
    async fn force_close_releases_session() {
        let mut session = open(WebSocketConfig::default()).await;
        session.connections.close_all();

        assert_eq!(session.read(4).await, b"\x88\x02\x03\xe9");
        assert_eq!(session.events.recv().await, Some(Event::Close(CloseCode::GOING_AWAY, String::new(), false)));
        session.connections.closed().await;
    }

    #[tokio::test]
    async fn peer_disconnect_is_abnormal() {
        let Session { ws, client, mut events, .. } = open(WebSocketConfig::default()).await;
        drop(client);
        assert_eq!(events.recv().await, Some(Event::Close(CloseCode::ABNORMAL, String::new(), false)));
        ws.closed().await;
    }
}
