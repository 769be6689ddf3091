//! Per-connection request processing.
//!
//! [`HttpConnection`] reads requests one after another from a socket, binds each one to a
//! handler through a [`Binder`], streams the request body to the handler and writes the
//! response. Keep-alive connections are reused in place; upgrade requests can take over the
//! raw stream through [`OnUpgrade`].
//!
//! Besides [`RequestDetails`](crate::protocol::RequestDetails), the extensions of every
//! request handed to a handler carry:
//!
//! - [`ConnectionInfo`]
//! - [`SendingHeaders`](crate::protocol::SendingHeaders)
//! - a `tokio_util::sync::CancellationToken` cancelled when the connection is force-closed
//! - [`OnUpgrade`] for WebSocket upgrade requests

use std::fmt;
use std::sync::Arc;

use crate::handler::Handler;
use crate::protocol::RequestHead;

mod http_connection;
mod tracker;
mod upgrade;

pub use http_connection::HttpConnection;
pub use tracker::{ConnectionInfo, ConnectionSet, ConnectionTracker};
pub use upgrade::{OnUpgrade, Upgraded, UpgradedReader, UpgradedWriter};

/// Where a request goes: the handler that answers it and the connection set that owns the
/// connection while it does.
#[derive(Clone)]
pub struct Binding {
    pub handler: Arc<dyn Handler>,
    pub connections: Arc<ConnectionSet>,
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding").field("connections", &self.connections.len()).finish_non_exhaustive()
    }
}

/// Resolves the handler for a fully parsed request head.
pub trait Binder: Send + Sync {
    fn bind(&self, head: &RequestHead) -> Option<Binding>;
}

/// Binds every request to one handler.
#[derive(Debug, Clone)]
pub struct DirectBinder {
    binding: Binding,
}

impl DirectBinder {
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Self { binding: Binding { handler, connections: Arc::new(ConnectionSet::new()) } }
    }

    pub fn connections(&self) -> &Arc<ConnectionSet> {
        &self.binding.connections
    }
}

impl Binder for DirectBinder {
    fn bind(&self, _head: &RequestHead) -> Option<Binding> {
        Some(self.binding.clone())
    }
}
