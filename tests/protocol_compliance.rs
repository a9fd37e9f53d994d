//! HTTP framing compliance tests.
//!
//! Exercises the request engine through its public API: however the bytes are
//! split across reads, the same request must come out, and every rendered
//! response must carry an exact `Content-Length`.

use fdk::protocol::{render_response, EngineState, HttpEngine, ParseEvent, ParsedRequest, RequestAssembler};
use fdk::{Limits, ProtocolError};
use http::{HeaderMap, HeaderValue, Method, StatusCode};

// ============================================================================
// Helpers
// ============================================================================

const JSON_POST: &[u8] = b"POST /r/app/fn HTTP/1.1\r\n\
    Host: localhost\r\n\
    Fn-Call-Id: 01CALL\r\n\
    Content-Type: application/json\r\n\
    Content-Length: 14\r\n\
    \r\n\
    {\"name\":\"Ada\"}";

const CHUNKED_POST: &[u8] = b"POST / HTTP/1.1\r\n\
    Transfer-Encoding: chunked\r\n\
    \r\n\
    4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";

/// Feed `pieces` in order, then EOF, returning the first complete request.
fn parse_pieces<'a>(pieces: impl IntoIterator<Item = &'a [u8]>) -> Result<ParsedRequest, ProtocolError> {
    let mut engine = HttpEngine::default();
    let mut assembler = RequestAssembler::new();

    for piece in pieces.into_iter().chain(std::iter::once(&b""[..])) {
        for event in engine.feed(piece)? {
            if let Some(request) = assembler.push(event)? {
                return Ok(request);
            }
        }
    }
    unreachable!("end of stream always yields an event")
}

fn parse_whole(raw: &[u8]) -> Result<ParsedRequest, ProtocolError> {
    parse_pieces([raw])
}

/// Split a rendered response at the blank line.
fn split_response(raw: &[u8]) -> (String, Vec<u8>) {
    let pos = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has a head terminator");
    (
        String::from_utf8(raw[..pos].to_vec()).unwrap(),
        raw[pos + 4..].to_vec(),
    )
}

fn content_length(head: &str) -> usize {
    head.lines()
        .find_map(|line| line.strip_prefix("Content-Length: "))
        .expect("Content-Length present")
        .parse()
        .unwrap()
}

// ============================================================================
// Chunk Independence Tests
// ============================================================================

#[test]
fn test_every_two_way_split_parses_identically() {
    let expected = parse_whole(JSON_POST).unwrap();

    for split in 1..JSON_POST.len() {
        let (a, b) = JSON_POST.split_at(split);
        let request = parse_pieces([a, b]).unwrap();
        assert_eq!(request, expected, "split at {split}");
    }
}

#[test]
fn test_byte_at_a_time_parses_identically() {
    let expected = parse_whole(JSON_POST).unwrap();
    let request = parse_pieces(JSON_POST.chunks(1)).unwrap();
    assert_eq!(request, expected);
}

#[test]
fn test_chunked_body_split_anywhere() {
    let expected = parse_whole(CHUNKED_POST).unwrap();
    assert_eq!(&expected.body()[..], b"Wikipedia");

    for size in 1..8 {
        let request = parse_pieces(CHUNKED_POST.chunks(size)).unwrap();
        assert_eq!(request, expected, "chunk size {size}");
    }
}

#[test]
fn test_parsed_fields() {
    let request = parse_whole(JSON_POST).unwrap();
    assert_eq!(request.method(), Method::POST);
    assert_eq!(request.target(), "/r/app/fn");
    assert_eq!(request.headers()["fn-call-id"], "01CALL");
    assert_eq!(&request.body()[..], br#"{"name":"Ada"}"#);
}

// ============================================================================
// Engine State Tests
// ============================================================================

#[test]
fn test_states_follow_input() {
    let mut engine = HttpEngine::default();
    assert_eq!(engine.state(), EngineState::Idle);

    engine.feed(b"POST / HTT").unwrap();
    assert_eq!(engine.state(), EngineState::RequestLine);

    engine.feed(b"P/1.1\r\nContent-Len").unwrap();
    assert_eq!(engine.state(), EngineState::Headers);

    let events = engine.feed(b"gth: 2\r\n\r\nh").unwrap();
    assert!(matches!(events[0], ParseEvent::RequestStarted(_)));
    assert_eq!(engine.state(), EngineState::Body);

    let events = engine.feed(b"i").unwrap();
    assert!(events.contains(&ParseEvent::RequestComplete));
    assert_eq!(engine.state(), EngineState::Done);

    assert_eq!(engine.feed(b"").unwrap(), vec![ParseEvent::PeerClosed]);
    assert_eq!(engine.state(), EngineState::Closed);
}

#[test]
fn test_eof_mid_head_is_incomplete() {
    let err = parse_pieces([&b"GET / HTTP/1.1\r\nHo"[..]]).unwrap_err();
    assert!(matches!(err, ProtocolError::IncompleteRequest));
}

#[test]
fn test_eof_mid_body_is_incomplete() {
    let err = parse_pieces([&b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc"[..]]).unwrap_err();
    assert!(matches!(err, ProtocolError::IncompleteRequest));
}

#[test]
fn test_engine_poisoned_after_error() {
    let mut engine = HttpEngine::default();
    assert!(engine.feed(b"\x00\x01\r\n\r\n").is_err());
    assert_eq!(engine.state(), EngineState::Error);
    assert!(matches!(engine.feed(b"GET / HTTP/1.1\r\n\r\n"), Err(ProtocolError::Poisoned)));
}

// ============================================================================
// Limit Tests
// ============================================================================

#[test]
fn test_declared_body_over_limit() {
    let limits = Limits {
        max_body_bytes: Some(8),
        ..Limits::default()
    };
    let mut engine = HttpEngine::new(&limits);
    let err = engine
        .feed(b"POST / HTTP/1.1\r\nContent-Length: 9\r\n\r\n")
        .unwrap_err();
    assert!(matches!(err, ProtocolError::BodyTooLarge { limit: 8 }));
}

#[test]
fn test_unbounded_body_when_limit_disabled() {
    let limits = Limits {
        max_body_bytes: None,
        ..Limits::default()
    };
    let body = vec![b'z'; 200_000];
    let mut raw = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
    raw.extend_from_slice(&body);

    let mut engine = HttpEngine::new(&limits);
    let mut assembler = RequestAssembler::new();
    let mut request = None;
    for event in engine.feed(&raw).unwrap() {
        if let Some(r) = assembler.push(event).unwrap() {
            request = Some(r);
        }
    }
    assert_eq!(request.unwrap().body().len(), body.len());
}

#[test]
fn test_head_over_limit() {
    let limits = Limits {
        max_head_bytes: 64,
        ..Limits::default()
    };
    let mut engine = HttpEngine::new(&limits);
    let raw = format!("GET / HTTP/1.1\r\nX-Filler: {}\r\n", "a".repeat(100));
    let err = engine.feed(raw.as_bytes()).unwrap_err();
    assert!(matches!(err, ProtocolError::HeadTooLarge { limit: 64 }));
}

// ============================================================================
// Response Rendering Tests
// ============================================================================

#[test]
fn test_content_length_matches_body() {
    let headers = HeaderMap::new();
    for body in [&b""[..], b"x", b"hello", &[0u8; 1000][..]] {
        let raw = render_response(StatusCode::OK, &headers, body);
        let (head, rendered_body) = split_response(&raw);
        assert_eq!(content_length(&head), body.len());
        assert_eq!(rendered_body, body);
    }
}

#[test]
fn test_function_supplied_length_is_replaced() {
    let mut headers = HeaderMap::new();
    headers.insert("content-length", HeaderValue::from_static("999"));
    headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));

    let raw = render_response(StatusCode::OK, &headers, b"abc");
    let (head, _) = split_response(&raw);
    assert_eq!(content_length(&head), 3);
    assert!(!head.contains("999"));
    assert!(!head.to_ascii_lowercase().contains("transfer-encoding"));
}

#[test]
fn test_status_line() {
    let raw = render_response(StatusCode::BAD_GATEWAY, &HeaderMap::new(), b"");
    assert!(raw.starts_with(b"HTTP/1.1 502 Bad Gateway\r\n"));

    let raw = render_response(StatusCode::from_u16(299).unwrap(), &HeaderMap::new(), b"");
    assert!(raw.starts_with(b"HTTP/1.1 299 \r\n"));
}
