use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::connection::{Binding, ConnectionSet};
use crate::ensure;
use crate::handler::Handler;
use crate::listener::manager::EndpointManager;
use crate::listener::prefix::ListenerPrefix;
use crate::protocol::ListenerError;

/// What the endpoints hold on to: the dispatch callback and the connections bound to it.
pub(crate) struct ListenerCore {
    handler: Arc<dyn Handler>,
    connections: Arc<ConnectionSet>,
}

impl ListenerCore {
    pub(crate) fn binding(&self) -> Binding {
        Binding { handler: Arc::clone(&self.handler), connections: Arc::clone(&self.connections) }
    }
}

impl fmt::Debug for ListenerCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerCore").field("connections", &self.connections).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Listening,
    Closed,
}

#[derive(Debug)]
struct State {
    prefixes: Vec<ListenerPrefix>,
    status: ListenerState,
}

/// One logical server: a set of prefixes and the handler their requests are dispatched to.
///
/// Prefixes are registered with the [`EndpointManager`] only while the listener is started.
/// Stopping unregisters them and force-closes the connections bound to this listener; a
/// stopped listener can be started again. Closing is terminal.
pub struct HttpListener {
    manager: Arc<EndpointManager>,
    core: Arc<ListenerCore>,
    state: Mutex<State>,
}

impl fmt::Debug for HttpListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpListener").field("core", &self.core).field("state", &self.state).finish_non_exhaustive()
    }
}

impl HttpListener {
    pub fn new<H: Handler + 'static>(manager: Arc<EndpointManager>, handler: H) -> Self {
        let core = ListenerCore { handler: Arc::new(handler), connections: Arc::new(ConnectionSet::new()) };
        Self { manager, core: Arc::new(core), state: Mutex::new(State { prefixes: Vec::new(), status: ListenerState::Stopped }) }
    }

    pub async fn state(&self) -> ListenerState {
        self.state.lock().await.status
    }

    pub async fn is_listening(&self) -> bool {
        self.state().await == ListenerState::Listening
    }

    /// Connections currently bound to this listener.
    pub fn connections(&self) -> &Arc<ConnectionSet> {
        &self.core.connections
    }

    /// Adds a prefix such as `http://+:8080/app/`, registering it right away when the listener
    /// is started. Adding a prefix twice is a no-op.
    pub async fn add_prefix(&self, uri: &str) -> Result<(), ListenerError> {
        let prefix = ListenerPrefix::parse(uri)?;
        let mut state = self.state.lock().await;
        ensure!(state.status != ListenerState::Closed, ListenerError::Closed);
        if state.prefixes.contains(&prefix) {
            return Ok(());
        }
        if state.status == ListenerState::Listening {
            self.manager.add_prefix(&prefix, &self.core).await?;
        }
        state.prefixes.push(prefix);
        Ok(())
    }

    /// Returns whether the prefix was part of the listener.
    pub async fn remove_prefix(&self, uri: &str) -> Result<bool, ListenerError> {
        let mut state = self.state.lock().await;
        ensure!(state.status != ListenerState::Closed, ListenerError::Closed);
        let Some(index) = state.prefixes.iter().position(|prefix| prefix.as_str() == uri) else {
            return Ok(false);
        };
        let prefix = state.prefixes.remove(index);
        if state.status == ListenerState::Listening {
            self.manager.remove_prefix(&prefix, &self.core).await;
        }
        Ok(true)
    }

    pub async fn prefixes(&self) -> Vec<String> {
        self.state.lock().await.prefixes.iter().map(ToString::to_string).collect()
    }

    pub async fn clear_prefixes(&self) -> Result<(), ListenerError> {
        let mut state = self.state.lock().await;
        ensure!(state.status != ListenerState::Closed, ListenerError::Closed);
        if state.status == ListenerState::Listening {
            self.manager.remove_listener(&state.prefixes, &self.core).await;
        }
        state.prefixes.clear();
        Ok(())
    }

    /// Registers every prefix. Either all of them are registered or none is.
    pub async fn start(&self) -> Result<(), ListenerError> {
        let mut state = self.state.lock().await;
        match state.status {
            ListenerState::Closed => Err(ListenerError::Closed),
            ListenerState::Listening => Ok(()),
            ListenerState::Stopped => {
                self.manager.add_listener(&state.prefixes, &self.core).await?;
                state.status = ListenerState::Listening;
                info!(prefixes = state.prefixes.len(), "listener started");
                Ok(())
            }
        }
    }

    /// Unregisters every prefix and force-closes the connections bound to this listener.
    pub async fn stop(&self) -> Result<(), ListenerError> {
        let mut state = self.state.lock().await;
        ensure!(state.status != ListenerState::Closed, ListenerError::Closed);
        if state.status == ListenerState::Listening {
            self.manager.remove_listener(&state.prefixes, &self.core).await;
            state.status = ListenerState::Stopped;
            info!("listener stopped");
        }
        self.core.connections.close_all();
        Ok(())
    }

    /// Shuts the listener down for good and waits until its connections are gone.
    pub async fn close(&self) {
        self.shutdown().await;
        self.core.connections.closed().await;
    }

    /// Shuts the listener down for good without waiting for its connections.
    pub async fn abort(&self) {
        self.shutdown().await;
    }

    async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if state.status == ListenerState::Listening {
            self.manager.remove_listener(&state.prefixes, &self.core).await;
        }
        if state.status != ListenerState::Closed {
            info!("listener closed");
        }
        state.status = ListenerState::Closed;
        self.core.connections.close_all();
    }
}

impl Drop for HttpListener {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.status != ListenerState::Listening {
            return;
        }
        state.status = ListenerState::Closed;
        self.core.connections.close_all();

        let prefixes = std::mem::take(&mut state.prefixes);
        let manager = Arc::clone(&self.manager);
        let core = Arc::clone(&self.core);
        if let Ok(handle) = Handle::try_current() {
            handle.spawn(async move { manager.remove_listener(&prefixes, &core).await });
        } else {
            warn!("listener dropped outside of a runtime, prefixes stay registered");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use http::{Request, Response};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::*;
    use crate::handler::{BoxError, make_handler};
    use crate::protocol::body::RequestBody;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
    }

    async fn hello(request: Request<RequestBody>) -> Result<Response<String>, BoxError> {
        Ok(Response::new(format!("hello {}", request.uri().path())))
    }

    async fn get(port: u16, path: &str) -> String {
        let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn serves_requests_on_loopback() {
        let port = free_port();
        let manager = Arc::new(EndpointManager::default());
        let listener = HttpListener::new(Arc::clone(&manager), make_handler(hello));
        listener.add_prefix(&format!("http://127.0.0.1:{port}/app/")).await.unwrap();
        listener.start().await.unwrap();
        assert!(listener.is_listening().await);

        let response = get(port, "/app/index.html").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("hello /app/index.html"));

        let response = get(port, "/other").await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.contains("Invalid host"));

        listener.close().await;
        assert!(manager.bound_addrs().await.is_empty());
    }

    #[tokio::test]
    async fn stop_releases_endpoint_and_allows_restart() {
        let port = free_port();
        let manager = Arc::new(EndpointManager::default());
        let listener = HttpListener::new(Arc::clone(&manager), make_handler(hello));
        listener.add_prefix(&format!("http://127.0.0.1:{port}/")).await.unwrap();

        listener.start().await.unwrap();
        assert_eq!(manager.bound_addrs().await, vec![SocketAddr::from((IpAddr::V4(Ipv4Addr::LOCALHOST), port))]);

        listener.stop().await.unwrap();
        assert_eq!(listener.state().await, ListenerState::Stopped);
        assert!(manager.bound_addrs().await.is_empty());

        listener.start().await.unwrap();
        assert!(get(port, "/again").await.ends_with("hello /again"));

        assert!(listener.remove_prefix(&format!("http://127.0.0.1:{port}/")).await.unwrap());
        assert!(manager.bound_addrs().await.is_empty());
        listener.abort().await;
    }

    #[tokio::test]
    async fn stop_returns_after_socket_is_released() {
        let port = free_port();
        let manager = Arc::new(EndpointManager::default());
        let listener = HttpListener::new(Arc::clone(&manager), make_handler(hello));
        listener.add_prefix(&format!("http://127.0.0.1:{port}/")).await.unwrap();
        listener.start().await.unwrap();

        listener.stop().await.unwrap();
        let rebound = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, port)).unwrap();
        drop(rebound);

        listener.start().await.unwrap();
        manager.remove_endpoint(IpAddr::V4(Ipv4Addr::LOCALHOST), port).await;
        std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, port)).unwrap();
        listener.close().await;
    }

    #[tokio::test]
    async fn conflicting_start_rolls_back() {
        let (shared, own) = (free_port(), free_port());
        let manager = Arc::new(EndpointManager::default());

        let first = HttpListener::new(Arc::clone(&manager), make_handler(hello));
        first.add_prefix(&format!("http://127.0.0.1:{shared}/a/")).await.unwrap();
        first.start().await.unwrap();

        let second = HttpListener::new(Arc::clone(&manager), make_handler(hello));
        second.add_prefix(&format!("http://127.0.0.1:{own}/b/")).await.unwrap();
        second.add_prefix(&format!("http://127.0.0.1:{shared}/a/")).await.unwrap();
        let result = second.start().await;
        assert!(matches!(result, Err(ListenerError::PrefixConflict { .. })));
        assert_eq!(second.state().await, ListenerState::Stopped);
        assert_eq!(manager.bound_addrs().await.len(), 1);

        first.close().await;
        second.close().await;
    }

    #[tokio::test]
    async fn closed_listener_rejects_operations() {
        let listener = HttpListener::new(Arc::new(EndpointManager::default()), make_handler(hello));
        listener.add_prefix("http://*:8080/").await.unwrap();
        listener.add_prefix("http://*:8080/").await.unwrap();
        assert_eq!(listener.prefixes().await, vec!["http://*:8080/".to_string()]);

        listener.close().await;
        listener.close().await;
        assert_eq!(listener.state().await, ListenerState::Closed);
        assert!(matches!(listener.start().await, Err(ListenerError::Closed)));
        assert!(matches!(listener.add_prefix("http://*:8081/").await, Err(ListenerError::Closed)));
        assert!(matches!(listener.clear_prefixes().await, Err(ListenerError::Closed)));
    }

    #[tokio::test]
    async fn invalid_prefix_is_rejected() {
        let listener = HttpListener::new(Arc::new(EndpointManager::default()), make_handler(hello));
        assert!(matches!(listener.add_prefix("http://host/no-slash").await, Err(ListenerError::InvalidPrefix { .. })));
        assert!(listener.prefixes().await.is_empty());
    }
}
