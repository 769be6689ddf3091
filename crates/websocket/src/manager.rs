//! Routes upgrade requests to WebSocket sessions.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::join_all;
use http::{Request, Response};
use micro_listener::connection::OnUpgrade;
use micro_listener::handler::{BoxError, Handler};
use micro_listener::protocol::body::{RequestBody, ResponseBody};
use tracing::{debug, info, warn};

use crate::config::WebSocketConfig;
use crate::error::{CloseCode, WsError};
use crate::handler::WebSocketHandler;
use crate::handshake::{Handshake, is_upgrade_request, reject_response};
use crate::session::WebSocket;

/// Creates the handler of a new session from its upgrade request.
pub type SessionFactory = Arc<dyn Fn(&Request<RequestBody>) -> Arc<dyn WebSocketHandler> + Send + Sync>;

/// A [`Handler`] serving WebSocket sessions on registered paths.
///
/// Requests that are not upgrades, or whose path is not registered, go to the fallback
/// handler. Each session keeps its connection in the owning listener's connection set until
/// it is closed.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: Arc<WebSocketConfig>,
    fallback: Arc<dyn Handler>,
    registry: Mutex<Registry>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct Registry {
    paths: HashMap<String, SessionFactory>,
    sessions: HashMap<u64, WebSocket>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.registry();
        f.debug_struct("SessionManager")
            .field("config", &self.inner.config)
            .field("paths", &registry.paths.keys().collect::<Vec<_>>())
            .field("sessions", &registry.sessions.len())
            .finish_non_exhaustive()
    }
}

impl ManagerInner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionManager {
    pub fn new<H: Handler + 'static>(config: WebSocketConfig, fallback: H) -> Self {
        let inner = ManagerInner {
            config: Arc::new(config),
            fallback: Arc::new(fallback),
            registry: Mutex::new(Registry::default()),
            next_id: AtomicU64::new(1),
        };
        Self { inner: Arc::new(inner) }
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.inner.config
    }

    /// Serves sessions on `path`, replacing any factory registered for it.
    pub fn register_path<F>(&self, path: impl Into<String>, factory: F)
    where
        F: Fn(&Request<RequestBody>) -> Arc<dyn WebSocketHandler> + Send + Sync + 'static,
    {
        self.inner.registry().paths.insert(path.into(), Arc::new(factory));
    }

    pub fn unregister_path(&self, path: &str) -> bool {
        self.inner.registry().paths.remove(path).is_some()
    }

    pub fn session(&self, id: u64) -> Option<WebSocket> {
        self.inner.registry().sessions.get(&id).cloned()
    }

    /// Live sessions, in no particular order.
    pub fn sessions(&self) -> Vec<WebSocket> {
        self.inner.registry().sessions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.registry().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.registry().sessions.is_empty()
    }

    /// Sends `text` to every open session. Returns how many sessions it was sent to.
    pub async fn broadcast_text(&self, text: &str) -> usize {
        let sessions = self.sessions();
        let results = join_all(sessions.iter().map(|ws| ws.send_text(text))).await;
        results
            .into_iter()
            .zip(&sessions)
            .filter(|(result, ws)| match result {
                Ok(()) => true,
                Err(e) => {
                    debug!(id = ws.id(), cause = %e, "skip session in broadcast");
                    false
                }
            })
            .count()
    }

    /// Closes every live session without waiting for the peers.
    pub async fn close_all(&self, code: CloseCode, reason: &str) {
        let sessions = self.sessions();
        info!(count = sessions.len(), %code, "close all websocket sessions");
        for ws in sessions {
            if let Err(e) = ws.close_with(code, reason, false).await {
                warn!(id = ws.id(), cause = %e, "can't close session");
            }
        }
    }

    fn factory(&self, path: &str) -> Option<SessionFactory> {
        self.inner.registry().paths.get(path).map(Arc::clone)
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn upgrade(&self, mut request: Request<RequestBody>, factory: &SessionFactory) -> Result<Response<ResponseBody>, WsError> {
        let handshake = match Handshake::check(&request, &self.inner.config) {
            Ok(handshake) => handshake,
            Err(e) => {
                debug!(uri = %request.uri(), cause = %e, "reject websocket handshake");
                return Ok(reject_response());
            }
        };
        let Some(on_upgrade) = request.extensions_mut().remove::<OnUpgrade>() else {
            warn!(uri = %request.uri(), "upgrade request without connection upgrade");
            return Ok(reject_response());
        };
        let response = handshake.response()?;

        let handler = factory(&request);
        let uri = request.uri().clone();
        let protocol = handshake.protocol().map(str::to_string);
        let id = self.next_id();
        let manager = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let upgraded = match on_upgrade.await {
                Ok(upgraded) => upgraded,
                Err(_canceled) => {
                    debug!(id, "upgrade canceled before the handshake response was written");
                    return;
                }
            };
            let (ws, task) = WebSocket::accept(id, upgraded, uri, protocol, Arc::clone(&manager.config), handler);
            manager.registry().sessions.insert(id, ws);
            task.run().await;
            manager.registry().sessions.remove(&id);
        });
        Ok(response)
    }
}

#[async_trait]
impl Handler for SessionManager {
    async fn call(&self, request: Request<RequestBody>) -> Result<Response<ResponseBody>, BoxError> {
        if !is_upgrade_request(&request) {
            return self.inner.fallback.call(request).await;
        }
        match self.factory(request.uri().path()) {
            Some(factory) => Ok(self.upgrade(request, &factory)?),
            None => self.inner.fallback.call(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use bytes::BytesMut;
    use http::StatusCode;
    use indoc::indoc;
    use micro_listener::config::ListenerConfig;
    use micro_listener::connection::{ConnectionSet, ConnectionTracker, DirectBinder, HttpConnection};
    use micro_listener::handler::make_handler;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;
    use crate::frame::{Frame, OpCode, encode_client_frame};

    const UPGRADE: &str = indoc! {"
        GET /echo HTTP/1.1\r
        Host: example.com\r
        Upgrade: websocket\r
        Connection: Upgrade\r
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r
        Sec-WebSocket-Version: 13\r
        \r
    "};

    struct Echo;

    #[async_trait]
    impl WebSocketHandler for Echo {
        async fn on_text(&self, ws: &WebSocket, text: String) {
            ws.send_text(&text).await.unwrap();
        }
    }

    async fn hello(_request: Request<RequestBody>) -> Result<Response<&'static str>, BoxError> {
        Ok(Response::new("hello"))
    }

    fn manager() -> SessionManager {
        let manager = SessionManager::new(WebSocketConfig::default(), make_handler(hello));
        manager.register_path("/echo", |_request: &Request<RequestBody>| -> Arc<dyn WebSocketHandler> { Arc::new(Echo) });
        manager
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn serve(manager: &SessionManager) -> (DuplexStream, Arc<ConnectionSet>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(server);
        let binder = DirectBinder::new(Arc::new(manager.clone()));
        let connections = Arc::clone(binder.connections());
        let tracker = ConnectionTracker::new(Arc::clone(&connections));
        let connection = HttpConnection::new(reader, writer, addr(8080), addr(50000), tracker, Arc::new(ListenerConfig::default()));
        tokio::spawn(async move {
            let _ = connection.process(&binder).await;
        });
        (client, connections)
    }

    async fn read_head(client: &mut DuplexStream) -> String {
        let mut head = Vec::new();
        while !head.ends_with(b"\r\n\r\n") {
            head.push(client.read_u8().await.unwrap());
        }
        String::from_utf8(head).unwrap()
    }

    async fn send(client: &mut DuplexStream, frame: &Frame) {
        let mut buf = BytesMut::new();
        encode_client_frame(frame, [9, 8, 7, 6], &mut buf);
        client.write_all(&buf).await.unwrap();
    }

    async fn read(client: &mut DuplexStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0; n];
        client.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn echo_session_over_upgraded_connection() {
        let manager = manager();
        let (mut client, connections) = serve(&manager);
        client.write_all(UPGRADE.as_bytes()).await.unwrap();

        let head = read_head(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(head.contains("sec-websocket-accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(head.contains("upgrade: websocket\r\n"));

        send(&mut client, &Frame::new(OpCode::Text, "hi".into(), true)).await;
        assert_eq!(read(&mut client, 4).await, b"\x81\x02hi");
        assert_eq!(manager.len(), 1);
        assert_eq!(connections.len(), 1);

        assert_eq!(manager.broadcast_text("all").await, 1);
        assert_eq!(read(&mut client, 5).await, b"\x81\x03all");

        let id = manager.sessions()[0].id();
        let ws = manager.session(id).unwrap();
        manager.close_all(CloseCode::GOING_AWAY, "").await;
        assert_eq!(read(&mut client, 4).await, b"\x88\x02\x03\xe9");
        ws.closed().await;

        connections.closed().await;
        for _ in 0..100 {
            if manager.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn missing_key_is_rejected() {
        let manager = manager();
        let (mut client, _connections) = serve(&manager);
        let request = UPGRADE.replace("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n", "");
        client.write_all(request.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.contains("sec-websocket-version: 13\r\n"));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn plain_requests_go_to_fallback() {
        let manager = manager();
        let (mut client, _connections) = serve(&manager);
        client.write_all(b"GET /echo HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n").await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("hello"));
    }

    #[tokio::test]
    async fn upgrade_without_connection_is_rejected() {
        let manager = manager();
        let request = Request::get("http://example.com/echo")
            .header(http::header::UPGRADE, "websocket")
            .header(http::header::CONNECTION, "Upgrade")
            .header(http::header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .header(http::header::SEC_WEBSOCKET_VERSION, "13")
            .body(RequestBody::empty())
            .unwrap();

        let response = manager.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(manager.is_empty());

        assert!(manager.unregister_path("/echo"));
        assert!(!manager.unregister_path("/echo"));
    }
}
