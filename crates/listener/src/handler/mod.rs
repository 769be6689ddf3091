//! The dispatch callback invoked for every bound request.
//!
//! A [`Handler`] receives the request with a streaming [`RequestBody`] and produces the
//! response. The request extensions carry the connection information and the per-request
//! services (see [`crate::connection`]).
//!
//! Plain async functions become handlers through [`make_handler`]:
//!
//! ```no_run
//! use http::{Request, Response};
//! use micro_listener::handler::{BoxError, make_handler};
//! use micro_listener::protocol::body::RequestBody;
//!
//! async fn hello(_request: Request<RequestBody>) -> Result<Response<String>, BoxError> {
//!     Ok(Response::new("Hello World!".to_string()))
//! }
//!
//! let handler = make_handler(hello);
//! ```

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use http::{Request, Response};

use crate::protocol::body::{RequestBody, ResponseBody};

pub type BoxError = Box<dyn Error + Send + Sync>;

#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, req: Request<RequestBody>) -> Result<Response<ResponseBody>, BoxError>;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn call(&self, req: Request<RequestBody>) -> Result<Response<ResponseBody>, BoxError> {
        (**self).call(req).await
    }
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut, B, Err> Handler for HandlerFn<F>
where
    F: Fn(Request<RequestBody>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<B>, Err>> + Send,
    B: Into<ResponseBody>,
    Err: Into<BoxError>,
{
    async fn call(&self, req: Request<RequestBody>) -> Result<Response<ResponseBody>, BoxError> {
        match (self.f)(req).await {
            Ok(response) => Ok(response.map(Into::into)),
            Err(e) => Err(e.into()),
        }
    }
}

pub fn make_handler<F, Fut, B, Err>(f: F) -> HandlerFn<F>
where
    F: Fn(Request<RequestBody>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<B>, Err>> + Send,
    B: Into<ResponseBody>,
    Err: Into<BoxError>,
{
    HandlerFn { f }
}
