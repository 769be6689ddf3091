//! Prefix based dispatch over shared listening sockets.
//!
//! An [`HttpListener`] owns a set of prefixes like `http://+:8080/app/` and a
//! [`Handler`](crate::handler::Handler). While it is started, its prefixes are registered
//! with an [`EndpointManager`], which binds one socket per address and port and routes each
//! request to the listener with the best matching prefix:
//!
//! 1. prefixes naming the request host exactly, longest path first,
//! 2. then `*` prefixes (hosts no exact prefix claims),
//! 3. then `+` prefixes (every host).
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use http::{Request, Response};
//! use micro_listener::handler::{BoxError, make_handler};
//! use micro_listener::listener::{EndpointManager, HttpListener};
//! use micro_listener::protocol::body::RequestBody;
//!
//! async fn hello(_request: Request<RequestBody>) -> Result<Response<String>, BoxError> {
//!     Ok(Response::new("Hello World!".to_string()))
//! }
//!
//! # async fn run() -> Result<(), micro_listener::protocol::ListenerError> {
//! let manager = Arc::new(EndpointManager::default());
//! let listener = HttpListener::new(manager, make_handler(hello));
//! listener.add_prefix("http://+:8080/").await?;
//! listener.start().await?;
//! # Ok(())
//! # }
//! ```

mod endpoint;
mod http_listener;
mod manager;
mod prefix;
mod registry;

pub use http_listener::{HttpListener, ListenerState};
pub use manager::EndpointManager;
pub use prefix::{HostKind, ListenerPrefix};
