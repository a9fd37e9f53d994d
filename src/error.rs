//! Error taxonomy.
//!
//! Configuration and bootstrap faults are process-fatal. Protocol faults are
//! scoped to a single connection. Invocation faults never surface as errors at
//! all: the invocation bridge turns them into a 502 response (see
//! [`FunctionResult::Fault`](crate::invoke::FunctionResult::Fault)).

use http::StatusCode;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Faults detected while reading configuration, before any socket exists.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is missing.
    #[error("{0} is not set")]
    Missing(&'static str),

    /// `FN_FORMAT` is not `http-stream`.
    #[error("incompatible function format: {}", .0.as_deref().unwrap_or("<unset>"))]
    UnsupportedFormat(Option<String>),

    /// The listener value has no usable file name.
    #[error("malformed FN_LISTENER env var value: {0:?}")]
    MalformedListener(String),

    /// A tunable could not be parsed.
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Filesystem or bind faults while exposing the listening socket.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to remove stale socket file {}: {source}", .path.display())]
    RemoveStale {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {}: {source}", .path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to set permissions on {}: {source}", .path.display())]
    Permissions {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to link {} -> {}: {source}", .link.display(), .target.display())]
    Symlink {
        link: PathBuf,
        target: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Per-connection faults raised while reading a request.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed before request completed")]
    IncompleteRequest,

    #[error("unable to read incoming request")]
    MissingRequest,

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: u64 },

    #[error("timed out waiting for request data")]
    ReadTimeout,

    /// The engine was fed again after reporting a fault.
    #[error("parser used after a fatal error")]
    Poisoned,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Status for the best-effort error response, if the fault deserves one.
    ///
    /// Faults where the peer is gone or silent get `None`: the connection is
    /// simply dropped.
    pub fn response_status(&self) -> Option<StatusCode> {
        match self {
            Self::Malformed(_) | Self::MissingRequest => Some(StatusCode::BAD_REQUEST),
            Self::HeadTooLarge { .. } => Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE),
            Self::BodyTooLarge { .. } => Some(StatusCode::PAYLOAD_TOO_LARGE),
            Self::IncompleteRequest | Self::ReadTimeout | Self::Poisoned | Self::Io(_) => None,
        }
    }
}

/// Process-fatal faults returned by [`run`](crate::run).
#[derive(Debug, Error)]
pub enum FdkError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error("failed to start runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("function failed to start: {0:#}")]
    Startup(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_statuses() {
        assert_eq!(
            ProtocolError::Malformed("bad".into()).response_status(),
            Some(StatusCode::BAD_REQUEST)
        );
        assert_eq!(
            ProtocolError::BodyTooLarge { limit: 10 }.response_status(),
            Some(StatusCode::PAYLOAD_TOO_LARGE)
        );
        assert!(ProtocolError::IncompleteRequest.response_status().is_none());
    }

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::MalformedListener("unix:".into());
        assert!(err.to_string().contains("\"unix:\""));

        let err = ConfigError::UnsupportedFormat(None);
        assert_eq!(err.to_string(), "incompatible function format: <unset>");

        let err = ConfigError::Missing("FN_LISTENER");
        assert_eq!(err.to_string(), "FN_LISTENER is not set");
    }

    #[test]
    fn test_incomplete_request_message() {
        assert_eq!(
            ProtocolError::IncompleteRequest.to_string(),
            "connection closed before request completed"
        );
    }
}
