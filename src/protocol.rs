//! Incremental HTTP/1.1 request parser and response serializer.
//!
//! [`HttpEngine`] knows nothing about sockets. The connection handler feeds it
//! whatever bytes the transport delivered and gets back a list of
//! [`ParseEvent`]s. Message boundaries never need to line up with read
//! boundaries: a request split across any number of reads parses to the same
//! [`ParsedRequest`] as the request delivered in one piece.
//!
//! ```text
//! Idle -> RequestLine -> Headers -> Body -> Done
//!   \__________\____________\________\______> Error | Closed
//! ```
//!
//! Bodies are framed by `Content-Length` or `Transfer-Encoding: chunked`.
//! Pipelined requests are not supported: bytes after the first complete request
//! are discarded.

use bytes::{Buf, Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{Method, StatusCode, Version};
use tracing::debug;

use crate::config::Limits;
use crate::error::ProtocolError;

/// Maximum number of request headers.
const MAX_HEADERS: usize = 100;

/// Longest accepted chunk-size or trailer line.
const MAX_CHUNK_LINE: usize = 4096;

/// Parser state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No bytes received yet.
    Idle,
    /// Receiving the request line.
    RequestLine,
    /// Request line received, header block incomplete.
    Headers,
    /// Head parsed, receiving the body.
    Body,
    /// A full request has been parsed.
    Done,
    /// A fault was reported; the engine refuses further input.
    Error,
    /// The transport reported end of stream.
    Closed,
}

/// Event produced by [`HttpEngine::feed`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    /// Request line and headers are complete.
    RequestStarted(RequestHead),
    /// A slice of the (decoded) request body.
    BodyChunk(Bytes),
    /// The request, body included, is complete.
    RequestComplete,
    /// The buffered bytes are exhausted; read more from the transport.
    NeedMoreData,
    /// The transport hit end of stream.
    PeerClosed,
}

/// Request line and headers.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
}

/// A fully buffered request.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRequest {
    head: RequestHead,
    body: Bytes,
}

impl ParsedRequest {
    pub fn new(head: RequestHead, body: Bytes) -> Self {
        Self { head, body }
    }

    pub fn method(&self) -> &Method {
        &self.head.method
    }

    /// Request target as sent on the request line.
    pub fn target(&self) -> &str {
        &self.head.target
    }

    pub fn version(&self) -> Version {
        self.head.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_parts(self) -> (RequestHead, Bytes) {
        (self.head, self.body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Length { remaining: u64 },
    Chunked(ChunkState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data { remaining: u64 },
    DataEnd,
    Trailers,
}

/// Incremental request parser for a single connection.
#[derive(Debug)]
pub struct HttpEngine {
    state: EngineState,
    buffer: BytesMut,
    framing: Framing,
    body_seen: u64,
    max_head_bytes: usize,
    max_body_bytes: Option<u64>,
}

impl Default for HttpEngine {
    fn default() -> Self {
        Self::new(&Limits::default())
    }
}

impl HttpEngine {
    /// Create an engine enforcing the given head/body limits.
    pub fn new(limits: &Limits) -> Self {
        Self {
            state: EngineState::Idle,
            buffer: BytesMut::new(),
            framing: Framing::Length { remaining: 0 },
            body_seen: 0,
            max_head_bytes: limits.max_head_bytes,
            max_body_bytes: limits.max_body_bytes,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Feed bytes read from the transport.
    ///
    /// An empty slice means end of stream and yields [`ParseEvent::PeerClosed`].
    /// Once an error has been returned the engine is poisoned.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<ParseEvent>, ProtocolError> {
        match self.state {
            EngineState::Error => return Err(ProtocolError::Poisoned),
            EngineState::Closed => return Ok(vec![ParseEvent::PeerClosed]),
            _ => {}
        }

        if data.is_empty() {
            self.state = EngineState::Closed;
            return Ok(vec![ParseEvent::PeerClosed]);
        }

        self.buffer.extend_from_slice(data);

        let mut events = Vec::new();
        match self.advance(&mut events) {
            Ok(()) => Ok(events),
            Err(e) => {
                self.state = EngineState::Error;
                Err(e)
            }
        }
    }

    fn advance(&mut self, events: &mut Vec<ParseEvent>) -> Result<(), ProtocolError> {
        loop {
            let progressed = match self.state {
                EngineState::Idle | EngineState::RequestLine | EngineState::Headers => {
                    self.parse_head(events)?
                }
                EngineState::Body => self.parse_body(events)?,
                EngineState::Done => {
                    if !self.buffer.is_empty() {
                        debug!(
                            bytes = self.buffer.len(),
                            "Discarding bytes past end of request"
                        );
                        self.buffer.clear();
                    }
                    return Ok(());
                }
                EngineState::Error | EngineState::Closed => return Ok(()),
            };

            if !progressed {
                events.push(ParseEvent::NeedMoreData);
                return Ok(());
            }
        }
    }

    /// Returns `Ok(true)` once the head has been consumed.
    fn parse_head(&mut self, events: &mut Vec<ParseEvent>) -> Result<bool, ProtocolError> {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut slots);

        let status = request
            .parse(&self.buffer)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let head_len = match status {
            httparse::Status::Partial => {
                if self.buffer.len() > self.max_head_bytes {
                    return Err(ProtocolError::HeadTooLarge {
                        limit: self.max_head_bytes,
                    });
                }
                self.state = if self.buffer.contains(&b'\n') {
                    EngineState::Headers
                } else {
                    EngineState::RequestLine
                };
                return Ok(false);
            }
            httparse::Status::Complete(len) => len,
        };

        if head_len > self.max_head_bytes {
            return Err(ProtocolError::HeadTooLarge {
                limit: self.max_head_bytes,
            });
        }

        let head = build_head(&request)?;
        let framing = body_framing(&head.headers)?;

        if let (Framing::Length { remaining }, Some(limit)) = (framing, self.max_body_bytes) {
            if remaining > limit {
                return Err(ProtocolError::BodyTooLarge { limit });
            }
        }

        self.buffer.advance(head_len);
        events.push(ParseEvent::RequestStarted(head));

        if framing == (Framing::Length { remaining: 0 }) {
            self.finish(events);
        } else {
            self.framing = framing;
            self.state = EngineState::Body;
        }
        Ok(true)
    }

    /// Returns `Ok(true)` once the body is complete.
    fn parse_body(&mut self, events: &mut Vec<ParseEvent>) -> Result<bool, ProtocolError> {
        loop {
            match self.framing {
                Framing::Length { remaining } => {
                    if self.buffer.is_empty() {
                        return Ok(false);
                    }
                    let take = remaining.min(self.buffer.len() as u64) as usize;
                    events.push(ParseEvent::BodyChunk(self.buffer.split_to(take).freeze()));

                    let remaining = remaining - take as u64;
                    self.framing = Framing::Length { remaining };
                    if remaining == 0 {
                        self.finish(events);
                        return Ok(true);
                    }
                }
                Framing::Chunked(ChunkState::Size) => {
                    let Some(line_end) = find_line_end(&self.buffer)? else {
                        return Ok(false);
                    };
                    let size = parse_chunk_size(&self.buffer[..line_end])?;
                    self.buffer.advance(line_end + 2);

                    self.framing = if size == 0 {
                        Framing::Chunked(ChunkState::Trailers)
                    } else {
                        if let Some(limit) = self.max_body_bytes {
                            if self.body_seen.saturating_add(size) > limit {
                                return Err(ProtocolError::BodyTooLarge { limit });
                            }
                        }
                        Framing::Chunked(ChunkState::Data { remaining: size })
                    };
                }
                Framing::Chunked(ChunkState::Data { remaining }) => {
                    if self.buffer.is_empty() {
                        return Ok(false);
                    }
                    let take = remaining.min(self.buffer.len() as u64) as usize;
                    events.push(ParseEvent::BodyChunk(self.buffer.split_to(take).freeze()));
                    self.body_seen += take as u64;

                    let remaining = remaining - take as u64;
                    self.framing = if remaining == 0 {
                        Framing::Chunked(ChunkState::DataEnd)
                    } else {
                        Framing::Chunked(ChunkState::Data { remaining })
                    };
                }
                Framing::Chunked(ChunkState::DataEnd) => {
                    if self.buffer.len() < 2 {
                        return Ok(false);
                    }
                    if &self.buffer[..2] != b"\r\n" {
                        return Err(ProtocolError::Malformed(
                            "missing CRLF after chunk data".into(),
                        ));
                    }
                    self.buffer.advance(2);
                    self.framing = Framing::Chunked(ChunkState::Size);
                }
                Framing::Chunked(ChunkState::Trailers) => {
                    let Some(line_end) = find_line_end(&self.buffer)? else {
                        return Ok(false);
                    };
                    self.buffer.advance(line_end + 2);
                    if line_end == 0 {
                        self.finish(events);
                        return Ok(true);
                    }
                }
            }
        }
    }

    fn finish(&mut self, events: &mut Vec<ParseEvent>) {
        self.state = EngineState::Done;
        events.push(ParseEvent::RequestComplete);
    }
}

fn build_head(request: &httparse::Request<'_, '_>) -> Result<RequestHead, ProtocolError> {
    let method = request
        .method
        .ok_or_else(|| ProtocolError::Malformed("missing method".into()))?;
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| ProtocolError::Malformed(format!("invalid method {method:?}")))?;

    let target = request
        .path
        .ok_or_else(|| ProtocolError::Malformed("missing request target".into()))?
        .to_string();

    let version = match request.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut headers = HeaderMap::with_capacity(request.headers.len());
    for header in request.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| ProtocolError::Malformed(format!("invalid header name {:?}", header.name)))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| ProtocolError::Malformed(format!("invalid value for header {name}")))?;
        headers.append(name, value);
    }

    Ok(RequestHead {
        method,
        target,
        version,
        headers,
    })
}

fn body_framing(headers: &HeaderMap) -> Result<Framing, ProtocolError> {
    if let Some(coding) = headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .last()
    {
        if coding.eq_ignore_ascii_case("chunked") {
            return Ok(Framing::Chunked(ChunkState::Size));
        }
        return Err(ProtocolError::Malformed(format!(
            "unsupported transfer-encoding {coding:?}"
        )));
    }

    let mut length: Option<u64> = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let value = value
            .to_str()
            .map_err(|_| ProtocolError::Malformed("invalid content-length".into()))?;
        for part in value.split(',') {
            let parsed: u64 = part
                .trim()
                .parse()
                .map_err(|_| ProtocolError::Malformed(format!("invalid content-length {value:?}")))?;
            match length {
                Some(existing) if existing != parsed => {
                    return Err(ProtocolError::Malformed(
                        "conflicting content-length values".into(),
                    ));
                }
                _ => length = Some(parsed),
            }
        }
    }

    Ok(Framing::Length {
        remaining: length.unwrap_or(0),
    })
}

/// Position of the `\r\n` ending the first line, if buffered.
fn find_line_end(buffer: &[u8]) -> Result<Option<usize>, ProtocolError> {
    match buffer.windows(2).position(|w| w == b"\r\n") {
        Some(pos) => Ok(Some(pos)),
        None if buffer.len() > MAX_CHUNK_LINE => Err(ProtocolError::Malformed(
            "chunk line too long".into(),
        )),
        None => Ok(None),
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ProtocolError> {
    let line = std::str::from_utf8(line)
        .map_err(|_| ProtocolError::Malformed("chunk size is not ASCII".into()))?;
    // Chunk extensions are ignored.
    let digits = line.split(';').next().unwrap_or_default().trim();
    u64::from_str_radix(digits, 16)
        .map_err(|_| ProtocolError::Malformed(format!("invalid chunk size {digits:?}")))
}

/// Serialize a response.
///
/// Header names are written title-cased (`content-type` -> `Content-Type`).
/// `Content-Length` is always computed from `body`; any `Content-Length` or
/// `Transfer-Encoding` present in `headers` is dropped.
pub fn render_response(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(128 + headers.len() * 32 + body.len());

    out.extend_from_slice(b"HTTP/1.1 ");
    out.extend_from_slice(status.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(status.canonical_reason().unwrap_or("").as_bytes());
    out.extend_from_slice(b"\r\n");

    for (name, value) in headers {
        if *name == CONTENT_LENGTH || *name == TRANSFER_ENCODING {
            continue;
        }
        write_title_case(&mut out, name.as_str());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    out.extend_from_slice(body);
    out
}

/// Header names are stored lowercase; emit them in conventional casing.
fn write_title_case(out: &mut Vec<u8>, name: &str) {
    let mut upper = true;
    for b in name.bytes() {
        out.push(if upper { b.to_ascii_uppercase() } else { b });
        upper = b == b'-';
    }
}

/// Folds parse events into a [`ParsedRequest`].
#[derive(Debug, Default)]
pub struct RequestAssembler {
    head: Option<RequestHead>,
    body: BytesMut,
}

impl RequestAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event; returns the request once it is complete.
    pub fn push(&mut self, event: ParseEvent) -> Result<Option<ParsedRequest>, ProtocolError> {
        match event {
            ParseEvent::RequestStarted(head) => {
                self.head = Some(head);
                self.body.clear();
                Ok(None)
            }
            ParseEvent::BodyChunk(chunk) => {
                self.body.extend_from_slice(&chunk);
                Ok(None)
            }
            ParseEvent::RequestComplete => {
                let head = self.head.take().ok_or(ProtocolError::MissingRequest)?;
                Ok(Some(ParsedRequest::new(head, self.body.split().freeze())))
            }
            ParseEvent::NeedMoreData => Ok(None),
            ParseEvent::PeerClosed => Err(ProtocolError::IncompleteRequest),
        }
    }
}
