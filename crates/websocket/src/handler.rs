use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{CloseCode, WsError};
use crate::session::WebSocket;

/// Session events.
///
/// Events of one session are delivered one at a time from the task reading its frames;
/// a slow callback holds back the frames behind it.
#[async_trait]
pub trait WebSocketHandler: Send + Sync {
    async fn on_open(&self, _ws: &WebSocket) {}

    async fn on_text(&self, _ws: &WebSocket, _text: String) {}

    async fn on_binary(&self, _ws: &WebSocket, _data: Bytes) {}

    /// Emitted once, when the session reaches [`ReadyState::Closed`](crate::ReadyState::Closed).
    async fn on_close(&self, _ws: &WebSocket, _code: CloseCode, _reason: &str, _was_clean: bool) {}

    async fn on_error(&self, _ws: &WebSocket, _error: &WsError) {}
}
