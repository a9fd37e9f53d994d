//! # fdk
//!
//! Function development kit: serve a single function over HTTP/1.1 on a
//! UNIX domain socket.
//!
//! The platform agent tells the process where to listen through
//! `FN_LISTENER=unix:<path>` and `FN_FORMAT=http-stream`. The socket is bound
//! under a private name and only then symlinked to `<path>`, so the agent
//! never connects to a half-initialized endpoint.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fdk::{Bytes, Context, Response};
//!
//! async fn hello(ctx: Context, body: Option<Bytes>) -> anyhow::Result<Response> {
//!     let name = body
//!         .map(|b| String::from_utf8_lossy(&b).into_owned())
//!         .unwrap_or_else(|| "world".into());
//!     Ok(Response::new(ctx).with_body(format!("Hello {name}")))
//! }
//!
//! fn main() {
//!     fdk::handle(hello);
//! }
//! ```
//!
//! ## Protocol Overview
//!
//! One request per connection. Whatever the function returns is written back
//! with an exact `Content-Length`; a function error or panic becomes
//! `502 Bad Gateway` with the message as a `text/plain` body.
//!
//! ```text
//! POST / HTTP/1.1            HTTP/1.1 200 OK
//! Fn-Call-Id: 01ABC          Content-Length: 10
//! Content-Length: 3          Connection: close
//!
//! Ada                        Hello Ada
//! ```

pub mod bootstrap;
pub mod client;
pub mod config;
pub mod connection;
pub mod debug;
pub mod error;
pub mod function;
pub mod invoke;
pub mod logging;
pub mod protocol;
pub mod runtime;
pub mod server;

use tracing::{error, info, warn};

// Re-exports for convenience
pub use bytes::Bytes;
pub use client::{FdkClient, HttpResponse};
pub use config::{Config, Limits};
pub use error::{BootstrapError, ConfigError, FdkError, ProtocolError};
pub use function::{Context, Function, Response, FN_CALL_ID};
pub use invoke::FunctionResult;
pub use runtime::RuntimeFlavor;
pub use server::{FdkServer, ShutdownHandle};

/// Serve `function` as configured by the environment, exiting the process on
/// a fatal fault.
///
/// Installs stderr logging first. Returns after SIGINT or SIGTERM once
/// in-flight requests have finished.
pub fn handle<F: Function>(function: F) {
    let logging = logging::init_logging();
    if let Err(e) = &logging {
        eprintln!("fdk: {e:#}");
    }

    if let Err(e) = run(function) {
        if logging.is_ok() {
            error!(error = %e, "Function server failed");
        } else {
            eprintln!("fdk: {e}");
        }
        std::process::exit(1);
    }
}

/// Serve `function` as configured by the environment.
///
/// Like [`handle`] but returns the fault instead of exiting, and leaves
/// logging setup to the caller.
pub fn run<F: Function>(function: F) -> Result<(), FdkError> {
    let config = Config::from_env()?;
    let runtime = runtime::build_runtime(config.runtime).map_err(FdkError::Runtime)?;
    runtime.block_on(serve_until_signal(function, config))
}

async fn serve_until_signal<F: Function>(function: F, config: Config) -> Result<(), FdkError> {
    let server = FdkServer::new(function, &config.listener_path).with_limits(config.limits);

    let handle = server.shutdown_handle();
    tokio::spawn(async move {
        wait_for_signal().await;
        handle.stop();
    });

    server.serve().await
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM, only SIGINT stops the server");
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Cannot listen for SIGINT");
                std::future::pending::<()>().await;
            }
            info!("Received SIGINT");
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Cannot listen for SIGINT");
                terminate.recv().await;
                info!("Received SIGTERM");
            } else {
                info!("Received SIGINT");
            }
        }
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
}
