//! Listening socket bootstrap.
//!
//! Clients poll for the canonical listener path and connect as soon as it
//! exists, so that path must never point at a socket that is not yet bound or
//! not yet connectable. The socket is therefore bound on a hidden "phony" path
//! in the same directory, opened up to every user, and only then exposed by
//! creating the canonical path as a relative symlink to it:
//!
//! ```text
//! /run/fn/lsnr.sock  ->  phonylsnr.sock   (symlink, created last)
//! /run/fn/phonylsnr.sock                  (bound socket, mode 0666)
//! ```
//!
//! Symlink creation is a single atomic filesystem operation, so a client can
//! only ever observe the canonical path once the listener is accepting.

use std::fs;
use std::io;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{BootstrapError, ConfigError};

/// Prefix added to the listener file name to form the bind target.
pub const PHONY_PREFIX: &str = "phony";

/// Permission bits applied to the bound socket.
pub const SOCKET_MODE: u32 = 0o666;

/// The canonical listener path and the phony path derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketPaths {
    listener: PathBuf,
    phony: PathBuf,
    phony_name: String,
}

impl SocketPaths {
    /// Derive the phony path from the canonical listener path.
    ///
    /// Fails if the path has no file name to prefix.
    pub fn from_listener_path(listener: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let listener = listener.as_ref();
        let file_name = listener
            .file_name()
            .ok_or_else(|| ConfigError::MalformedListener(listener.display().to_string()))?;

        let phony_name = format!("{PHONY_PREFIX}{}", file_name.to_string_lossy());
        let dir = listener.parent().unwrap_or_else(|| Path::new(""));

        Ok(Self {
            listener: listener.to_path_buf(),
            phony: dir.join(&phony_name),
            phony_name,
        })
    }

    /// Path clients connect to (a symlink once bootstrapped).
    pub fn listener(&self) -> &Path {
        &self.listener
    }

    /// Path the socket is actually bound on.
    pub fn phony(&self) -> &Path {
        &self.phony
    }

    /// Relative symlink target.
    pub fn phony_name(&self) -> &str {
        &self.phony_name
    }
}

/// A bound, world-connectable socket exposed at the canonical path.
#[derive(Debug)]
pub struct ReadyEndpoint {
    listener: UnixListener,
    paths: SocketPaths,
}

impl ReadyEndpoint {
    pub fn paths(&self) -> &SocketPaths {
        &self.paths
    }

    pub fn listener(&self) -> &UnixListener {
        &self.listener
    }

    /// Close the listener and remove both socket files.
    pub fn cleanup(self) {
        let (listener, paths) = self.into_parts();
        drop(listener);
        cleanup(&paths);
    }

    /// Split into the std listener and the paths it is exposed on.
    pub fn into_parts(self) -> (UnixListener, SocketPaths) {
        (self.listener, self.paths)
    }
}

/// Bind the listener on the phony path and expose it at the canonical path.
///
/// Any stale file at either path is removed first; missing files are fine,
/// every other filesystem fault aborts the bootstrap.
pub fn bootstrap(listener_path: impl AsRef<Path>) -> Result<ReadyEndpoint, crate::FdkError> {
    let paths = SocketPaths::from_listener_path(listener_path)?;
    Ok(bootstrap_paths(paths)?)
}

/// [`bootstrap`] for already-derived paths.
pub fn bootstrap_paths(paths: SocketPaths) -> Result<ReadyEndpoint, BootstrapError> {
    debug!(
        socket = %paths.listener.display(),
        phony = %paths.phony.display(),
        "Deleting socket files if they exist"
    );
    remove_stale(&paths.listener)?;
    remove_stale(&paths.phony)?;

    let listener = bind_exposed(&paths)?;
    Ok(ReadyEndpoint { listener, paths })
}

/// Bind the phony path and expose it; a failure after the bind removes the
/// phony socket again.
fn bind_exposed(paths: &SocketPaths) -> Result<UnixListener, BootstrapError> {
    let listener = UnixListener::bind(&paths.phony).map_err(|source| BootstrapError::Bind {
        path: paths.phony.clone(),
        source,
    })?;

    if let Err(e) = expose(paths) {
        drop(listener);
        remove_quietly(&paths.phony);
        return Err(e);
    }

    info!(
        socket = %paths.listener.display(),
        phony = %paths.phony.display(),
        "Listener exposed"
    );
    Ok(listener)
}

fn expose(paths: &SocketPaths) -> Result<(), BootstrapError> {
    fs::set_permissions(&paths.phony, fs::Permissions::from_mode(SOCKET_MODE)).map_err(
        |source| BootstrapError::Permissions {
            path: paths.phony.clone(),
            source,
        },
    )?;
    debug!(
        phony = %paths.phony.display(),
        mode = format_args!("{:o}", socket_mode(&paths.phony).unwrap_or_default()),
        "Phony socket permissions set"
    );

    symlink(&paths.phony_name, &paths.listener).map_err(|source| BootstrapError::Symlink {
        link: paths.listener.clone(),
        target: PathBuf::from(&paths.phony_name),
        source,
    })
}

/// Remove a file without following symlinks; a missing file is not an error.
fn remove_stale(path: &Path) -> Result<(), BootstrapError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed stale socket file");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(BootstrapError::RemoveStale {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Remove the canonical symlink so new clients stop finding the socket.
pub fn unlink_listener(paths: &SocketPaths) {
    remove_quietly(&paths.listener);
}

/// Remove both socket files.
pub fn cleanup(paths: &SocketPaths) {
    remove_quietly(&paths.listener);
    remove_quietly(&paths.phony);
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove socket file");
        }
    }
}

fn socket_mode(path: &Path) -> Option<u32> {
    fs::metadata(path).ok().map(|m| m.permissions().mode() & 0o777)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phony_path_derivation() {
        let paths = SocketPaths::from_listener_path("/run/fn/lsnr.sock").unwrap();
        assert_eq!(paths.listener(), Path::new("/run/fn/lsnr.sock"));
        assert_eq!(paths.phony(), Path::new("/run/fn/phonylsnr.sock"));
        assert_eq!(paths.phony_name(), "phonylsnr.sock");
    }

    #[test]
    fn test_relative_listener_path() {
        let paths = SocketPaths::from_listener_path("lsnr.sock").unwrap();
        assert_eq!(paths.phony(), Path::new("phonylsnr.sock"));
    }

    #[test]
    fn test_path_without_file_name() {
        assert!(matches!(
            SocketPaths::from_listener_path("/"),
            Err(ConfigError::MalformedListener(_))
        ));
    }

    #[test]
    fn test_remove_stale_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(remove_stale(&dir.path().join("absent.sock")).is_ok());
    }

    #[test]
    fn test_failed_symlink_removes_phony() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SocketPaths::from_listener_path(dir.path().join("lsnr.sock")).unwrap();
        fs::create_dir(paths.listener()).unwrap();

        let err = bind_exposed(&paths).unwrap_err();
        assert!(matches!(err, BootstrapError::Symlink { .. }));
        assert!(fs::symlink_metadata(paths.phony()).is_err());
        assert!(paths.listener().is_dir());
    }

    #[test]
    fn test_remove_stale_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("lsnr.sock");
        fs::create_dir(&sub).unwrap();
        assert!(matches!(
            remove_stale(&sub),
            Err(BootstrapError::RemoveStale { .. })
        ));
    }
}
