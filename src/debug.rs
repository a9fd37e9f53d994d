//! TCP debug server.
//!
//! Runs the same connection handler over TCP so a function can be exercised
//! with `curl` during development, without a UNIX socket or a platform agent.
//! Not for production use.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{info, warn};

use crate::config::Limits;
use crate::connection::handle_connection;
use crate::function::Function;

/// A bound debug listener.
pub struct DebugServer<F: Function> {
    listener: TcpListener,
    function: Arc<F>,
    limits: Limits,
}

impl<F: Function> DebugServer<F> {
    pub async fn bind(addr: impl ToSocketAddrs, function: F, limits: Limits) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            function: Arc::new(function),
            limits,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever.
    pub async fn serve(self) {
        if let Ok(addr) = self.local_addr() {
            info!(address = %addr, "Debug TCP server started");
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::debug!(peer = %peer, "Debug connection accepted");
                    tokio::spawn(handle_connection(
                        stream,
                        Arc::clone(&self.function),
                        self.limits,
                    ));
                }
                Err(e) => warn!(error = %e, "Accept error"),
            }
        }
    }
}

/// Bind `addr` and serve `function` over TCP forever.
pub async fn serve_tcp<F: Function>(addr: impl ToSocketAddrs, function: F, limits: Limits) -> std::io::Result<()> {
    DebugServer::bind(addr, function, limits).await?.serve().await;
    Ok(())
}
