//! Example: Debug a function over TCP.
//!
//! Serves the same echo function on `127.0.0.1:8080` so it can be driven with
//! plain `curl`, no platform agent or UNIX socket required.
//!
//! ```bash
//! cargo run --example tcp_debug
//! curl -d 'ping' http://127.0.0.1:8080/echo
//! ```

use anyhow::Result;
use fdk::{Bytes, Context, Limits, Response};

async fn echo(mut ctx: Context, body: Option<Bytes>) -> Result<Response> {
    ctx.set_response_header("X-Request-Url", &ctx.request_url().to_string())?;
    Ok(Response::new(ctx).with_body(body.unwrap_or_default()))
}

#[tokio::main]
async fn main() -> Result<()> {
    fdk::logging::init_logging()?;

    println!("Debug server on http://127.0.0.1:8080");
    fdk::debug::serve_tcp("127.0.0.1:8080", echo, Limits::default()).await?;
    Ok(())
}
