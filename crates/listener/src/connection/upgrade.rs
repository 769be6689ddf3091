//! Handing a connection over to another protocol after a `101 Switching Protocols` response.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use bytes::BytesMut;
use futures::FutureExt;
use futures::channel::oneshot;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection::{ConnectionInfo, ConnectionTracker};

pub type UpgradedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type UpgradedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The raw stream of an upgraded connection.
///
/// `read_buf` holds bytes the client sent after the upgrade request that were already read
/// from the socket. The connection stays in its listener's connection set until `tracker`
/// is dropped.
pub struct Upgraded {
    pub reader: UpgradedReader,
    pub writer: UpgradedWriter,
    pub read_buf: BytesMut,
    pub info: ConnectionInfo,
    pub tracker: ConnectionTracker,
}

impl fmt::Debug for Upgraded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upgraded").field("read_buf", &self.read_buf.len()).field("info", &self.info).finish_non_exhaustive()
    }
}

/// Resolves to the [`Upgraded`] connection once a `101` response for the request has been
/// written. Found in the extensions of upgrade requests.
///
/// Resolves to an error when the response was not a `101`.
#[derive(Debug, Clone)]
pub struct OnUpgrade {
    receiver: Arc<Mutex<oneshot::Receiver<Upgraded>>>,
}

impl OnUpgrade {
    pub(crate) fn pair() -> (oneshot::Sender<Upgraded>, OnUpgrade) {
        let (sender, receiver) = oneshot::channel();
        (sender, OnUpgrade { receiver: Arc::new(Mutex::new(receiver)) })
    }
}

impl Future for OnUpgrade {
    type Output = Result<Upgraded, oneshot::Canceled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.receiver.lock().unwrap_or_else(PoisonError::into_inner).poll_unpin(cx)
    }
}
