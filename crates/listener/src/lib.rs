//! An asynchronous HTTP/1.x listener built directly on tokio sockets.
//!
//! The crate accepts connections, parses requests, dispatches them to handlers by URL
//! prefix and writes the responses, keeping connections alive between requests. Upgrade
//! requests can take over the raw stream, which is what `micro-websocket` builds on.
//!
//! # Features
//!
//! - HTTP/1.0 and HTTP/1.1 with keep-alive
//! - Streaming request and response bodies, chunked transfer coding with trailers
//! - `Expect: 100-continue`
//! - Prefix based dispatch (`http://host:port/path/`, `*` and `+` wildcard hosts) with
//!   many listeners sharing one socket
//! - Connection upgrades
//!
//! # Example
//!
//! ```no_run
//! use std::error::Error;
//! use std::sync::Arc;
//!
//! use http::{Request, Response, StatusCode};
//! use http_body_util::BodyExt;
//! use micro_listener::handler::make_handler;
//! use micro_listener::listener::{EndpointManager, HttpListener};
//! use micro_listener::protocol::body::RequestBody;
//! use tracing::{Level, error, info};
//! use tracing_subscriber::FmtSubscriber;
//!
//! #[tokio::main]
//! async fn main() {
//!     let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
//!     tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
//!
//!     let manager = Arc::new(EndpointManager::default());
//!     let listener = HttpListener::new(manager, make_handler(hello_world));
//!     if let Err(e) = listener.add_prefix("http://+:8080/").await {
//!         error!(cause = %e, "invalid prefix");
//!         return;
//!     }
//!     if let Err(e) = listener.start().await {
//!         error!(cause = %e, "start listener error");
//!         return;
//!     }
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     listener.close().await;
//! }
//!
//! async fn hello_world(request: Request<RequestBody>) -> Result<Response<String>, Box<dyn Error + Send + Sync>> {
//!     info!(path = request.uri().path(), "receiving request");
//!     let body = request.into_body().collect().await?.to_bytes();
//!     info!(size = body.len(), "receiving request body");
//!
//!     let response = Response::builder().status(StatusCode::OK).body("Hello World!\r\n".to_string())?;
//!     Ok(response)
//! }
//! ```
//!
//! # Architecture
//!
//! - [`listener`]: prefixes, endpoints and listeners
//! - [`connection`]: the per-connection request loop
//! - [`protocol`]: request, response, header and body types, errors
//! - [`codec`]: request decoding and response encoding
//! - [`handler`]: the dispatch callback
//! - [`config`]: limits and timeouts
//!
//! # Limitations
//!
//! - HTTP/1.x only
//! - No TLS: secure endpoints close every accepted connection

pub mod codec;
pub mod config;
pub mod connection;
pub mod handler;
pub mod listener;
pub mod protocol;

mod date;
mod utils;
pub(crate) use utils::ensure;
