use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use micro_listener::handler::{BoxError, make_handler};
use micro_listener::listener::{EndpointManager, HttpListener};
use micro_listener::protocol::body::RequestBody;
use micro_websocket::{CloseCode, SessionManager, WebSocket, WebSocketConfig, WebSocketHandler};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

struct Echo;

#[async_trait]
impl WebSocketHandler for Echo {
    async fn on_open(&self, ws: &WebSocket) {
        info!(id = ws.id(), remote = %ws.info().remote_addr, "session opened");
    }

    async fn on_text(&self, ws: &WebSocket, text: String) {
        if let Err(e) = ws.send_text(&text).await {
            warn!(cause = %e, "echo text error");
        }
    }

    async fn on_binary(&self, ws: &WebSocket, data: Bytes) {
        if let Err(e) = ws.send_binary(data).await {
            warn!(cause = %e, "echo binary error");
        }
    }

    async fn on_close(&self, ws: &WebSocket, code: CloseCode, reason: &str, was_clean: bool) {
        info!(id = ws.id(), %code, reason, was_clean, "session closed");
    }
}

// curl -v http://127.0.0.1:8080/hello
async fn hello(request: Request<RequestBody>) -> Result<Response<String>, BoxError> {
    info!(uri = %request.uri(), "receiving request");
    let response = Response::builder().status(StatusCode::OK).body("Hello World!\r\n".to_string())?;
    Ok(response)
}

// websocat ws://127.0.0.1:8080/echo
#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let sessions = SessionManager::new(WebSocketConfig::default(), make_handler(hello));
    sessions.register_path("/echo", |_request: &Request<RequestBody>| -> Arc<dyn WebSocketHandler> { Arc::new(Echo) });

    let listener = HttpListener::new(Arc::new(EndpointManager::default()), sessions.clone());
    if let Err(e) = listener.add_prefix("http://127.0.0.1:8080/").await {
        error!(cause = %e, "invalid prefix");
        return;
    }
    if let Err(e) = listener.start().await {
        error!(cause = %e, "start listener error");
        return;
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(cause = %e, "wait for ctrl-c error");
    }
    sessions.close_all(CloseCode::GOING_AWAY, "server shutdown").await;
    listener.close().await;
}
