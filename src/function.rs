//! The function calling convention.
//!
//! Implement [`Function`] (or just write an `async fn`) to define the code the
//! server invokes once per request.
//!
//! ```rust
//! use fdk::{Bytes, Context, Response};
//!
//! async fn hello(ctx: Context, body: Option<Bytes>) -> anyhow::Result<Response> {
//!     let name = body
//!         .map(|b| String::from_utf8_lossy(&b).into_owned())
//!         .unwrap_or_else(|| "world".into());
//!     let response = Response::new(ctx)
//!         .with_header("Content-Type", "text/plain")?
//!         .with_body(format!("Hello {name}"));
//!     Ok(response)
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

use anyhow::{Context as _, Result};
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use http::Method;
use serde::Serialize;

use crate::protocol::RequestHead;

/// Header carrying the platform-assigned call identifier.
pub const FN_CALL_ID: &str = "fn-call-id";

/// Future returned by [`Function::call`].
pub type FunctionFuture = Pin<Box<dyn Future<Output = Result<Response>> + Send + 'static>>;

/// Code invoked once per request.
///
/// Any `async fn(Context, Option<Bytes>) -> anyhow::Result<Response>` already
/// implements this trait. Implement it by hand to get start/stop hooks.
pub trait Function: Send + Sync + 'static {
    /// Handle one request.
    ///
    /// `body` is `None` when the request carried no body bytes. Errors and
    /// panics are both reported to the caller as a 502 response whose body is
    /// the error message.
    fn call(&self, ctx: Context, body: Option<Bytes>) -> FunctionFuture;

    /// Name used in logs.
    fn name(&self) -> &str {
        "function"
    }

    /// Called before the socket is exposed.
    fn on_start(&self) -> Result<()> {
        Ok(())
    }

    /// Called after in-flight requests have drained.
    fn on_stop(&self) -> Result<()> {
        Ok(())
    }
}

impl<F, Fut> Function for F
where
    F: Fn(Context, Option<Bytes>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    fn call(&self, ctx: Context, body: Option<Bytes>) -> FunctionFuture {
        Box::pin(self(ctx, body))
    }
}

/// Per-call view of the request plus the headers of the response being built.
#[derive(Debug, Clone)]
pub struct Context {
    call_id: String,
    method: Method,
    request_url: String,
    headers: HeaderMap,
    response_headers: HeaderMap,
}

impl Context {
    /// Build the context for a parsed request head.
    ///
    /// The call id comes from the `Fn-Call-Id` header, or is generated.
    pub fn from_head(head: RequestHead) -> Self {
        let call_id = head
            .headers
            .get(FN_CALL_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Self {
            call_id,
            method: head.method,
            request_url: head.target,
            headers: head.headers,
            response_headers: HeaderMap::new(),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request target as received (path and query).
    pub fn request_url(&self) -> &str {
        &self.request_url
    }

    /// Request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A request header as text, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Headers that will be sent with the response.
    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    /// Set a response header, replacing any previous value.
    pub fn set_response_header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid response header name {name:?}"))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for response header {name}"))?;
        self.response_headers.insert(name, value);
        Ok(())
    }
}

/// What a function returns: a status, a body, and the context whose
/// response headers go out with it.
#[derive(Debug, Clone)]
pub struct Response {
    ctx: Context,
    status: u16,
    body: Bytes,
}

impl Response {
    /// An empty `200` response.
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            status: 200,
            body: Bytes::new(),
        }
    }

    /// A JSON response with `Content-Type: application/json`.
    pub fn json<T: Serialize>(mut ctx: Context, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value).context("failed to serialize response body")?;
        ctx.response_headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(Self::new(ctx).with_body(body))
    }

    /// Set the status code. It is validated when the response is written.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        self.ctx.set_response_header(name, value)?;
        Ok(self)
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn into_parts(self) -> (Context, u16, Bytes) {
        (self.ctx, self.status, self.body)
    }
}
