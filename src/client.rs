//! Blocking HTTP client for a function socket.
//!
//! Speaks just enough HTTP/1.1 to drive a function the way the platform
//! agent does: one request per connection, response read until close.

use anyhow::{bail, Context, Result};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{expand_path, UNIX_PREFIX};

/// Maximum number of response headers accepted.
const MAX_HEADERS: usize = 64;

/// Client for a function listening on a UNIX socket.
///
/// # Example
///
/// ```rust,no_run
/// use fdk::FdkClient;
///
/// let client = FdkClient::new("/tmp/fn/lsnr.sock");
///
/// let response = client.post("/", br#"{"name":"Ada"}"#)?;
/// println!("{} {}", response.status, response.body_text());
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct FdkClient {
    socket_path: PathBuf,
    timeout: Duration,
}

/// A fully read response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names as sent, in order.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// First header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl FdkClient {
    /// Create a client for `socket_path`.
    ///
    /// Accepts a `unix:` prefix and `~`, like `FN_LISTENER`.
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        let raw = socket_path.as_ref().to_string_lossy();
        let raw = raw.strip_prefix(UNIX_PREFIX).unwrap_or(&*raw);
        Self {
            socket_path: expand_path(Path::new(raw)),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the read/write timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn get(&self, target: &str) -> Result<HttpResponse> {
        self.request("GET", target, &[], &[])
    }

    pub fn post(&self, target: &str, body: &[u8]) -> Result<HttpResponse> {
        self.request("POST", target, &[], body)
    }

    /// Send one request; `Content-Length` is added for non-empty bodies.
    pub fn request(
        &self,
        method: &str,
        target: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<HttpResponse> {
        let mut raw = format!("{method} {target} HTTP/1.1\r\nHost: localhost\r\n");
        for (name, value) in headers {
            raw.push_str(&format!("{name}: {value}\r\n"));
        }
        if !body.is_empty() {
            raw.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        raw.push_str("\r\n");

        let mut bytes = raw.into_bytes();
        bytes.extend_from_slice(body);
        self.send_raw(&bytes)
    }

    /// Write `raw` verbatim, half-close, and parse whatever comes back.
    pub fn send_raw(&self, raw: &[u8]) -> Result<HttpResponse> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .with_context(|| format!("Cannot connect to function at {:?}", self.socket_path))?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        stream.write_all(raw)?;
        stream.flush()?;
        stream.shutdown(std::net::Shutdown::Write)?;

        // A server that rejects a request early may close with our bytes
        // unread, which surfaces as a reset after its response.
        let mut response = Vec::new();
        match stream.read_to_end(&mut response) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset && !response.is_empty() => {}
            Err(e) => return Err(e).context("Failed to read response"),
        }

        parse_response(&response)
    }
}

/// Parse a complete response, trusting `Content-Length` when present.
pub fn parse_response(raw: &[u8]) -> Result<HttpResponse> {
    if raw.is_empty() {
        bail!("connection closed without a response");
    }

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut headers);
    let head_len = match parsed.parse(raw).context("Malformed response")? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => bail!("truncated response head"),
    };

    let status = parsed.code.context("response has no status code")?;
    let headers: Vec<(String, String)> = parsed
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).into_owned(),
            )
        })
        .collect();

    let mut body = raw[head_len..].to_vec();
    let declared = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .map(|(_, v)| v.trim().parse::<usize>())
        .transpose()
        .context("invalid Content-Length")?;
    if let Some(len) = declared {
        if body.len() < len {
            bail!("truncated body: expected {len} bytes, got {}", body.len());
        }
        body.truncate(len);
    }

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}
