//! One bound listening socket.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::select;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ListenerConfig;
use crate::connection::{Binder, Binding, ConnectionSet, ConnectionTracker, HttpConnection};
use crate::listener::http_listener::ListenerCore;
use crate::listener::prefix::ListenerPrefix;
use crate::listener::registry::PrefixRegistry;
use crate::protocol::{ListenerError, RequestHead};

/// Accepts connections on one `(address, port)` and dispatches their requests to the
/// listeners whose prefixes match.
#[derive(Debug)]
pub(crate) struct EndpointListener {
    inner: Arc<EndpointInner>,
    shutdown: CancellationToken,
    closed: bool,
    /// owns the socket, which is released once the task has ended
    accept_task: Option<JoinHandle<()>>,
}

#[derive(Debug)]
pub(crate) struct EndpointInner {
    registry: PrefixRegistry<ListenerCore>,
    /// connections whose requests haven't been bound to a listener yet
    unbound: Arc<ConnectionSet>,
    config: Arc<ListenerConfig>,
    local_addr: SocketAddr,
    secure: bool,
}

impl EndpointListener {
    pub(crate) async fn bind(addr: SocketAddr, secure: bool, config: Arc<ListenerConfig>) -> Result<Self, ListenerError> {
        let tcp_listener = TcpListener::bind(addr).await.map_err(|source| ListenerError::Bind { addr, source })?;
        let local_addr = tcp_listener.local_addr().map_err(|source| ListenerError::Bind { addr, source })?;
        info!(%local_addr, secure, "start listening");

        let inner = Arc::new(EndpointInner {
            registry: PrefixRegistry::new(),
            unbound: Arc::new(ConnectionSet::new()),
            config,
            local_addr,
            secure,
        });
        let shutdown = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(tcp_listener, Arc::clone(&inner), shutdown.clone()));

        Ok(Self { inner, shutdown, closed: false, accept_task: Some(accept_task) })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub(crate) fn add_prefix(&self, prefix: &ListenerPrefix, listener: &Arc<ListenerCore>) -> Result<(), ListenerError> {
        self.inner.registry.add(prefix, listener)
    }

    /// Returns whether the endpoint serves no prefix anymore.
    pub(crate) fn remove_prefix(&self, prefix: &ListenerPrefix, listener: &Arc<ListenerCore>) -> bool {
        if !self.inner.registry.remove(prefix, listener) {
            debug!(%prefix, "prefix not registered by this listener");
        }
        self.inner.registry.is_empty()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.registry.is_empty()
    }

    /// Stops accepting, force-closes every connection not bound to a listener, and returns
    /// once the socket is released.
    pub(crate) async fn close(mut self) {
        self.stop();
        let Some(accept_task) = self.accept_task.take() else {
            return;
        };
        match accept_task.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!(local_addr = %self.inner.local_addr, cause = %e, "accept task failed"),
        }
    }

    fn stop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        info!(local_addr = %self.inner.local_addr, "stop listening");
        self.shutdown.cancel();
        if let Some(accept_task) = &self.accept_task {
            accept_task.abort();
        }
        self.inner.unbound.close_all();
    }
}

impl Drop for EndpointListener {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Binder for EndpointInner {
    fn bind(&self, head: &RequestHead) -> Option<Binding> {
        let url = head.url()?;
        let listener = self.registry.search(url.host().unwrap_or_default(), self.local_addr.port(), url.path())?;
        Some(listener.binding())
    }
}

async fn accept_loop(tcp_listener: TcpListener, endpoint: Arc<EndpointInner>, shutdown: CancellationToken) {
    loop {
        let accepted = select! {
            biased;
            () = shutdown.cancelled() => break,
            accepted = tcp_listener.accept() => accepted,
        };

        let (tcp_stream, remote_addr) = match accepted {
            Ok(stream_and_addr) => stream_and_addr,
            Err(e) if matches!(e.kind(), io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted) => {
                debug!(cause = %e, "connection dropped before accept");
                continue;
            }
            Err(e) => {
                warn!(cause = %e, "failed to accept");
                continue;
            }
        };

        if endpoint.secure {
            // no certificate is ever configured
            debug!(%remote_addr, "close connection on secure endpoint");
            drop(tcp_stream);
            continue;
        }

        let tracker = ConnectionTracker::new(Arc::clone(&endpoint.unbound));
        let endpoint = Arc::clone(&endpoint);
        tokio::spawn(async move {
            let (reader, writer) = tcp_stream.into_split();
            let connection =
                HttpConnection::new(reader, writer, endpoint.local_addr, remote_addr, tracker, Arc::clone(&endpoint.config));
            match connection.process(endpoint.as_ref()).await {
                Ok(()) => debug!(%remote_addr, "finished process, connection shutdown"),
                Err(e) => warn!(%remote_addr, cause = %e, "service has error, connection shutdown"),
            }
        });
    }
}
