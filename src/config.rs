//! Environment-driven configuration.
//!
//! | Variable                | Meaning                                          |
//! |-------------------------|--------------------------------------------------|
//! | `FN_FORMAT`             | must be `http-stream`                            |
//! | `FN_LISTENER`           | `unix:<path>` of the socket clients connect to   |
//! | `FDK_RUNTIME`           | `current-thread` (default) or `multi-thread`     |
//! | `FDK_MAX_BODY_BYTES`    | request body limit, `0` disables (default 64MiB) |
//! | `FDK_READ_TIMEOUT_SECS` | idle read timeout per connection (default none)  |

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::runtime::RuntimeFlavor;

pub const FN_FORMAT: &str = "FN_FORMAT";
pub const FN_LISTENER: &str = "FN_LISTENER";
pub const FDK_RUNTIME: &str = "FDK_RUNTIME";
pub const FDK_MAX_BODY_BYTES: &str = "FDK_MAX_BODY_BYTES";
pub const FDK_READ_TIMEOUT_SECS: &str = "FDK_READ_TIMEOUT_SECS";

/// The only supported `FN_FORMAT`.
pub const HTTP_STREAM: &str = "http-stream";

/// Prefix stripped from `FN_LISTENER`.
pub const UNIX_PREFIX: &str = "unix:";

pub const DEFAULT_MAX_HEAD_BYTES: usize = 64 * 1024;
pub const DEFAULT_MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

/// Per-connection resource limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Request line plus headers.
    pub max_head_bytes: usize,
    /// Decoded request body; `None` is unbounded.
    pub max_body_bytes: Option<u64>,
    /// How long a connection may stay silent while its request is read.
    pub read_timeout: Option<Duration>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_head_bytes: DEFAULT_MAX_HEAD_BYTES,
            max_body_bytes: Some(DEFAULT_MAX_BODY_BYTES),
            read_timeout: None,
        }
    }
}

/// Resolved process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Canonical socket path (the symlink clients look for).
    pub listener_path: PathBuf,
    pub runtime: RuntimeFlavor,
    pub limits: Limits,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listener = lookup(FN_LISTENER).ok_or(ConfigError::Missing(FN_LISTENER))?;

        let format = lookup(FN_FORMAT);
        if format.as_deref() != Some(HTTP_STREAM) {
            return Err(ConfigError::UnsupportedFormat(format));
        }

        let listener_path = parse_listener(&listener)?;

        let runtime = match lookup(FDK_RUNTIME) {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                name: FDK_RUNTIME,
                value,
            })?,
            None => RuntimeFlavor::default(),
        };

        let mut limits = Limits::default();
        if let Some(value) = lookup(FDK_MAX_BODY_BYTES) {
            let bytes: u64 = parse_number(FDK_MAX_BODY_BYTES, value)?;
            limits.max_body_bytes = (bytes > 0).then_some(bytes);
        }
        if let Some(value) = lookup(FDK_READ_TIMEOUT_SECS) {
            let secs: u64 = parse_number(FDK_READ_TIMEOUT_SECS, value)?;
            limits.read_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(Self {
            listener_path,
            runtime,
            limits,
        })
    }
}

fn parse_number(name: &'static str, value: String) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { name, value })
}

/// Extract the socket path from a `unix:<path>` listener value.
///
/// The literal `unix:` prefix is optional and `~` is expanded. A value
/// without a file name component (empty, `/`, ending in `..`) is rejected.
pub fn parse_listener(value: &str) -> Result<PathBuf, ConfigError> {
    let raw = value.strip_prefix(UNIX_PREFIX).unwrap_or(value);
    if raw.trim().is_empty() {
        return Err(ConfigError::MalformedListener(value.to_string()));
    }

    let path = expand_path(Path::new(raw));
    if path.file_name().is_none() {
        return Err(ConfigError::MalformedListener(value.to_string()));
    }
    Ok(path)
}

/// Expand `~` in path to home directory.
pub(crate) fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let expanded = shellexpand::tilde(&path_str);
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_valid_config() {
        let config = Config::from_lookup(lookup(&[
            (FN_FORMAT, "http-stream"),
            (FN_LISTENER, "unix:/tmp/fn/lsnr.sock"),
        ]))
        .unwrap();

        assert_eq!(config.listener_path, PathBuf::from("/tmp/fn/lsnr.sock"));
        assert_eq!(config.runtime, RuntimeFlavor::CurrentThread);
        assert_eq!(config.limits, Limits::default());
    }

    #[test]
    fn test_missing_listener() {
        let err = Config::from_lookup(lookup(&[(FN_FORMAT, "http-stream")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(FN_LISTENER)));
    }

    #[test]
    fn test_unsupported_format() {
        let err = Config::from_lookup(lookup(&[
            (FN_FORMAT, "json"),
            (FN_LISTENER, "unix:/tmp/lsnr.sock"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(Some(ref f)) if f == "json"));

        let err = Config::from_lookup(lookup(&[(FN_LISTENER, "unix:/tmp/lsnr.sock")])).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(None)));
    }

    #[test]
    fn test_malformed_listener_values() {
        for value in ["", "unix:", "unix:/", "unix:/tmp/.."] {
            let err = parse_listener(value).unwrap_err();
            match err {
                ConfigError::MalformedListener(v) => assert_eq!(v, value),
                other => panic!("unexpected error for {value:?}: {other}"),
            }
        }
    }

    #[test]
    fn test_listener_without_prefix() {
        assert_eq!(
            parse_listener("/run/fn/lsnr.sock").unwrap(),
            PathBuf::from("/run/fn/lsnr.sock")
        );
    }

    #[test]
    fn test_listener_tilde_expansion() {
        let path = parse_listener("unix:~/fn.sock").unwrap();
        assert!(!path.to_string_lossy().contains('~'));
        assert_eq!(path.file_name().unwrap(), "fn.sock");
    }

    #[test]
    fn test_tunables() {
        let config = Config::from_lookup(lookup(&[
            (FN_FORMAT, "http-stream"),
            (FN_LISTENER, "unix:/tmp/lsnr.sock"),
            (FDK_RUNTIME, "multi-thread"),
            (FDK_MAX_BODY_BYTES, "0"),
            (FDK_READ_TIMEOUT_SECS, "30"),
        ]))
        .unwrap();

        assert_eq!(config.runtime, RuntimeFlavor::MultiThread);
        assert_eq!(config.limits.max_body_bytes, None);
        assert_eq!(config.limits.read_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_invalid_tunable() {
        let err = Config::from_lookup(lookup(&[
            (FN_FORMAT, "http-stream"),
            (FN_LISTENER, "unix:/tmp/lsnr.sock"),
            (FDK_MAX_BODY_BYTES, "lots"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { name: FDK_MAX_BODY_BYTES, .. }
        ));
    }
}
