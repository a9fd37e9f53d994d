//! Per-connection request/response cycle.
//!
//! One request per connection: read until the engine reports a complete
//! request, invoke the function, write the response, close.
//!
//! ```text
//! ReadingRequest -> Invoking -> WritingResponse -> Closed
//!        \______________\______________\__________> Error
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use http::header::{HeaderValue, CONNECTION, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::config::Limits;
use crate::error::ProtocolError;
use crate::function::Function;
use crate::invoke::{invoke, FunctionResult};
use crate::protocol::{render_response, HttpEngine, ParsedRequest, RequestAssembler};

/// Bytes requested from the transport per read.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    ReadingRequest,
    Invoking,
    WritingResponse,
    Closed,
    Error,
}

/// Drives one accepted stream through a single request/response exchange.
pub struct ConnectionHandler<S> {
    id: ConnectionId,
    stream: S,
    engine: HttpEngine,
    limits: Limits,
    state: ConnectionState,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, limits: Limits) -> Self {
        Self {
            id: ConnectionId::next(),
            stream,
            engine: HttpEngine::new(&limits),
            limits,
            state: ConnectionState::ReadingRequest,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run the exchange to completion.
    ///
    /// On a protocol fault a best-effort error response is written when the
    /// fault has a status (see [`ProtocolError::response_status`]); the fault
    /// is then returned and the handler is left in [`ConnectionState::Error`].
    pub async fn run<F>(&mut self, function: &Arc<F>) -> Result<(), ProtocolError>
    where
        F: Function + ?Sized,
    {
        let request = match self.read_request().await {
            Ok(request) => request,
            Err(e) => {
                self.fail_request(&e).await;
                return Err(e);
            }
        };

        debug!(
            connection = %self.id,
            method = %request.method(),
            target = request.target(),
            body_bytes = request.body().len(),
            "Request received"
        );

        self.transition(ConnectionState::Invoking);
        let result = invoke(function, request).await;

        self.transition(ConnectionState::WritingResponse);
        if let Err(e) = self.write_result(result).await {
            warn!(connection = %self.id, error = %e, "Failed to write response");
            self.transition(ConnectionState::Error);
            return Err(e.into());
        }

        self.transition(ConnectionState::Closed);
        Ok(())
    }

    async fn read_request(&mut self) -> Result<ParsedRequest, ProtocolError> {
        let mut assembler = RequestAssembler::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let n = match self.limits.read_timeout {
                Some(timeout) => tokio::time::timeout(timeout, self.stream.read(&mut buf))
                    .await
                    .map_err(|_| ProtocolError::ReadTimeout)??,
                None => self.stream.read(&mut buf).await?,
            };

            for event in self.engine.feed(&buf[..n])? {
                if let Some(request) = assembler.push(event)? {
                    return Ok(request);
                }
            }
        }
    }

    async fn fail_request(&mut self, error: &ProtocolError) {
        self.transition(ConnectionState::Error);

        let Some(status) = error.response_status() else {
            debug!(connection = %self.id, error = %error, "Dropping connection");
            return;
        };

        warn!(connection = %self.id, error = %error, "Rejecting request");
        let raw = render_response(status, &plain_text_headers(), error.to_string().as_bytes());
        if let Err(e) = self.write_all(&raw).await {
            debug!(connection = %self.id, error = %e, "Connection unwritable, error dropped");
        }
    }

    async fn write_result(&mut self, result: FunctionResult) -> std::io::Result<()> {
        let raw = match result {
            FunctionResult::Response {
                status,
                mut headers,
                body,
            } => {
                if !headers.contains_key(CONNECTION) {
                    headers.insert(CONNECTION, HeaderValue::from_static("close"));
                }
                render_response(status, &headers, &body)
            }
            FunctionResult::Fault { message } => {
                render_response(StatusCode::BAD_GATEWAY, &plain_text_headers(), message.as_bytes())
            }
        };
        self.write_all(&raw).await
    }

    async fn write_all(&mut self, raw: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(raw).await?;
        self.stream.flush().await?;
        self.stream.shutdown().await
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!(connection = %self.id, from = ?self.state, to = ?next, "Connection state");
        self.state = next;
    }
}

fn plain_text_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(CONNECTION, HeaderValue::from_static("close"));
    headers
}

/// Serve exactly one request on `stream`, logging instead of returning faults.
pub async fn handle_connection<S, F>(stream: S, function: Arc<F>, limits: Limits)
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: Function + ?Sized,
{
    let mut handler = ConnectionHandler::new(stream, limits);
    if let Err(e) = handler.run(&function).await {
        debug!(connection = %handler.id(), error = %e, "Connection ended with error");
    }
}
