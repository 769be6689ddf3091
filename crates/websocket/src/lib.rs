//! RFC 6455 WebSocket sessions on top of `micro-listener`.
//!
//! A [`SessionManager`] is a `micro-listener` [`Handler`](micro_listener::handler::Handler):
//! upgrade requests for registered paths are answered with `101 Switching Protocols` and
//! become sessions, everything else goes to a fallback handler. Session events are delivered
//! to a [`WebSocketHandler`] created per session by the path's factory.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use http::{Request, Response};
//! use micro_listener::handler::{BoxError, make_handler};
//! use micro_listener::listener::{EndpointManager, HttpListener};
//! use micro_listener::protocol::body::RequestBody;
//! use micro_websocket::{SessionManager, WebSocket, WebSocketConfig, WebSocketHandler};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl WebSocketHandler for Echo {
//!     async fn on_text(&self, ws: &WebSocket, text: String) {
//!         let _ = ws.send_text(&text).await;
//!     }
//! }
//!
//! async fn not_found(_request: Request<RequestBody>) -> Result<Response<&'static str>, BoxError> {
//!     Ok(Response::builder().status(404).body("not found")?)
//! }
//!
//! # async fn run() -> Result<(), BoxError> {
//! let sessions = SessionManager::new(WebSocketConfig::default(), make_handler(not_found));
//! sessions.register_path("/echo", |_request: &Request<RequestBody>| -> Arc<dyn WebSocketHandler> { Arc::new(Echo) });
//!
//! let listener = HttpListener::new(Arc::new(EndpointManager::default()), sessions.clone());
//! listener.add_prefix("http://+:8080/").await?;
//! listener.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Limitations
//!
//! - No extensions: `permessage-deflate` is never negotiated and compressed frames close the
//!   session with `1007`
//! - Server side only

mod config;
mod error;
pub mod frame;
mod handler;
pub mod handshake;
mod manager;
mod session;

pub use config::{HandshakeChecker, WebSocketConfig, WebSocketConfigBuilder};
pub use error::{CloseCode, WsError};
pub use handler::WebSocketHandler;
pub use manager::{SessionFactory, SessionManager};
pub use session::{ReadyState, SessionTask, WebSocket};
