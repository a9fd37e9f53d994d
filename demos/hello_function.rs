//! Example: Hello function.
//!
//! Greets the `name` from a JSON body, or the world when there is none.
//!
//! # Run the function
//! ```bash
//! FN_FORMAT=http-stream FN_LISTENER=unix:/tmp/fn/lsnr.sock \
//!     cargo run --example hello_function
//! ```
//!
//! # Call it
//! ```bash
//! curl --unix-socket /tmp/fn/lsnr.sock -d '{"name":"Ada"}' http://localhost/
//! ```

use anyhow::{Context as _, Result};
use fdk::{Bytes, Context, Response};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
struct Person {
    name: String,
}

#[derive(Serialize)]
struct Greeting {
    message: String,
}

async fn hello(ctx: Context, body: Option<Bytes>) -> Result<Response> {
    let name = match body {
        Some(body) => {
            let person: Person =
                serde_json::from_slice(&body).context("expected a JSON body like {\"name\":\"...\"}")?;
            person.name
        }
        None => "World".to_string(),
    };

    tracing::info!(call_id = ctx.call_id(), name = %name, "Greeting");
    Response::json(
        ctx,
        &Greeting {
            message: format!("Hello {name}"),
        },
    )
}

fn main() {
    fdk::handle(hello);
}
