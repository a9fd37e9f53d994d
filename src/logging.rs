//! Logging setup.
//!
//! Function containers collect stderr, so logs go there by default.
//!
//! # Example
//!
//! ```rust,no_run
//! use fdk::logging::init_logging;
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging()?;
//!
//!     tracing::info!("Function starting");
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Enables debug logging when set to anything but `0`/`false`.
pub const FDK_DEBUG: &str = "FDK_DEBUG";

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive() -> &'static str {
    let debug = std::env::var(FDK_DEBUG)
        .map(|v| is_truthy(&v))
        .unwrap_or(false);
    if debug {
        "debug"
    } else {
        "info"
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "" | "0" | "false" | "no" | "off")
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive()))
}

/// Initialize plain-text logging to stderr.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging() -> Result<()> {
    let subscriber = tracing_subscriber::registry().with(env_filter()).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    );

    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;

    Ok(())
}

/// Initialize file logging with daily rotation under `log_dir`.
///
/// Older logs are kept as `function.log.YYYY-MM-DD`.
#[cfg(feature = "log-rotation")]
pub fn init_logging_with_rotation(log_dir: impl AsRef<std::path::Path>) -> Result<()> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};

    let log_dir = log_dir.as_ref();
    std::fs::create_dir_all(log_dir).context("Failed to create log directory")?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "function.log");

    let subscriber = tracing_subscriber::registry().with(env_filter()).with(
        fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_target(true),
    );

    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy("true"));
        assert!(is_truthy("yes"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("False"));
        assert!(!is_truthy(""));
    }
}
