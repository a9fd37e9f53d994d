//! Invocation bridge: parsed request in, [`FunctionResult`] out.
//!
//! Nothing the function does escapes as anything but a `FunctionResult`:
//! returned errors, panics, and invalid status codes all become
//! [`FunctionResult::Fault`].

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use tracing::{debug, warn};

use crate::function::{Context, Function};
use crate::protocol::ParsedRequest;

/// Outcome of a single invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionResult {
    Response {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
    Fault {
        message: String,
    },
}

impl FunctionResult {
    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault {
            message: message.into(),
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault { .. })
    }
}

/// Invoke `function` once for `request`.
pub async fn invoke<F>(function: &Arc<F>, request: ParsedRequest) -> FunctionResult
where
    F: Function + ?Sized,
{
    let (head, body) = request.into_parts();
    let ctx = Context::from_head(head);
    let call_id = ctx.call_id().to_string();
    let body = (!body.is_empty()).then_some(body);

    debug!(
        function = function.name(),
        call_id = %call_id,
        method = %ctx.method(),
        url = ctx.request_url(),
        "Invoking function"
    );

    let start = Instant::now();
    // A separate task turns a panic into a JoinError instead of unwinding
    // through the connection handler.
    let outcome = tokio::spawn(function.call(ctx, body)).await;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    let result = match outcome {
        Ok(Ok(response)) => {
            let (ctx, status, body) = response.into_parts();
            // 1xx codes are interim responses and cannot end an exchange.
            match StatusCode::from_u16(status) {
                Ok(code) if !code.is_informational() => FunctionResult::Response {
                    status: code,
                    headers: ctx.response_headers().clone(),
                    body,
                },
                _ => FunctionResult::fault(format!("invalid response status code {status}")),
            }
        }
        Ok(Err(e)) => FunctionResult::fault(format!("{e:#}")),
        Err(e) if e.is_panic() => FunctionResult::fault(panic_message(e.into_panic())),
        Err(_) => FunctionResult::fault("function invocation was cancelled"),
    };

    match &result {
        FunctionResult::Response { status, body, .. } => debug!(
            call_id = %call_id,
            status = status.as_u16(),
            body_bytes = body.len(),
            elapsed_ms,
            "Function returned"
        ),
        FunctionResult::Fault { message } => warn!(
            call_id = %call_id,
            error = %message,
            elapsed_ms,
            "Function failed"
        ),
    }

    result
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "function panicked".to_string()
    }
}
