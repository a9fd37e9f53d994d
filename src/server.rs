//! Server lifecycle: bootstrap, accept loop, graceful stop.
//!
//! The [`FdkServer`] owns the listening socket. Each accepted connection gets
//! its own task running a [`ConnectionHandler`](crate::connection::ConnectionHandler);
//! handlers share nothing but the function itself.

use std::io;
use std::os::unix::net::UnixListener as StdUnixListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::net::UnixListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::bootstrap::{self, SocketPaths};
use crate::config::Limits;
use crate::connection::handle_connection;
use crate::error::{BootstrapError, FdkError};
use crate::function::Function;

type TeardownHook = Box<dyn FnOnce() + Send + 'static>;

/// Function server on a UNIX socket.
///
/// # Example
///
/// ```rust,no_run
/// use fdk::{Bytes, Context, FdkServer, Response};
///
/// async fn hello(ctx: Context, _body: Option<Bytes>) -> anyhow::Result<Response> {
///     Ok(Response::new(ctx).with_body("hello"))
/// }
///
/// # async fn run() -> Result<(), fdk::FdkError> {
/// let server = FdkServer::new(hello, "/tmp/fn/lsnr.sock");
/// server.serve().await?;
/// # Ok(())
/// # }
/// ```
pub struct FdkServer<F: Function> {
    function: Arc<F>,
    listener_path: PathBuf,
    limits: Limits,
    shutdown: watch::Sender<bool>,
    teardown: Mutex<Vec<TeardownHook>>,
}

/// Cloneable handle that stops a running [`FdkServer`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    shutdown: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

impl<F: Function> FdkServer<F> {
    /// Create a server for `function`, to be exposed at `listener_path`.
    pub fn new(function: F, listener_path: impl AsRef<Path>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            function: Arc::new(function),
            listener_path: listener_path.as_ref().to_path_buf(),
            limits: Limits::default(),
            shutdown,
            teardown: Mutex::new(Vec::new()),
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Canonical socket path.
    pub fn listener_path(&self) -> &Path {
        &self.listener_path
    }

    /// Register a hook run after in-flight connections drain and before the
    /// listener is released.
    pub fn on_teardown(&self, hook: impl FnOnce() + Send + 'static) {
        self.teardown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(hook));
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Stop accepting connections; [`serve`](Self::serve) returns once
    /// in-flight connections finish.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Bootstrap the socket and serve until [`stop`](Self::stop) is called.
    ///
    /// Must run inside a Tokio runtime.
    pub async fn serve(&self) -> Result<(), FdkError> {
        self.function.on_start().map_err(FdkError::Startup)?;

        let (listener, paths) = match self.bind() {
            Ok(bound) => bound,
            Err(e) => {
                self.stop_function();
                return Err(e);
            }
        };

        self.run(listener, paths).await;
        Ok(())
    }

    fn bind(&self) -> Result<(UnixListener, SocketPaths), FdkError> {
        let (listener, paths) = bootstrap::bootstrap(&self.listener_path)?.into_parts();
        match into_tokio(listener) {
            Ok(listener) => Ok((listener, paths)),
            Err(source) => {
                bootstrap::cleanup(&paths);
                Err(BootstrapError::Bind {
                    path: paths.phony().to_path_buf(),
                    source,
                }
                .into())
            }
        }
    }

    fn stop_function(&self) {
        if let Err(e) = self.function.on_stop() {
            warn!(error = %format!("{e:#}"), "Function stop hook failed");
        }
    }

    async fn run(&self, listener: UnixListener, paths: SocketPaths) {
        info!(
            function = self.function.name(),
            socket = %paths.listener().display(),
            "Function server started"
        );

        let mut shutdown = self.shutdown.subscribe();
        let mut connections = JoinSet::new();

        loop {
            let stopping = *shutdown.borrow_and_update();
            if stopping {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => {}
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        connections.spawn(handle_connection(
                            stream,
                            Arc::clone(&self.function),
                            self.limits,
                        ));
                    }
                    Err(e) => warn!(error = %e, "Accept error"),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Connection task failed");
                    }
                }
            }
        }

        // New clients must not find the socket while we drain.
        bootstrap::unlink_listener(&paths);

        debug!(in_flight = connections.len(), "Draining connections");
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Connection task failed");
            }
        }

        self.stop_function();
        let hooks = std::mem::take(&mut *self.teardown.lock().unwrap_or_else(|e| e.into_inner()));
        for hook in hooks {
            hook();
        }

        drop(listener);
        bootstrap::cleanup(&paths);

        info!(function = self.function.name(), "Function server stopped");
    }
}

fn into_tokio(listener: StdUnixListener) -> io::Result<UnixListener> {
    listener.set_nonblocking(true)?;
    UnixListener::from_std(listener)
}
