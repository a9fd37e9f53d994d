//! Tokio runtime selection.
//!
//! Resolved once at process start from `FDK_RUNTIME`. The default is a
//! single-threaded scheduler multiplexing all connections cooperatively.

use std::fmt;
use std::io;
use std::str::FromStr;

use tokio::runtime::{Builder, Runtime};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RuntimeFlavor {
    #[default]
    CurrentThread,
    MultiThread,
}

impl FromStr for RuntimeFlavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "current-thread" | "current_thread" => Ok(Self::CurrentThread),
            "multi-thread" | "multi_thread" => Ok(Self::MultiThread),
            other => Err(format!("unknown runtime flavor: {other}")),
        }
    }
}

impl fmt::Display for RuntimeFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CurrentThread => write!(f, "current-thread"),
            Self::MultiThread => write!(f, "multi-thread"),
        }
    }
}

/// Build a runtime of the requested flavor with I/O and timers enabled.
pub fn build_runtime(flavor: RuntimeFlavor) -> io::Result<Runtime> {
    let mut builder = match flavor {
        RuntimeFlavor::CurrentThread => Builder::new_current_thread(),
        RuntimeFlavor::MultiThread => Builder::new_multi_thread(),
    };
    builder.enable_all().thread_name("fdk-worker").build()
}
