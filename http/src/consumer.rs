//! The HTTP message consumer: a line/header parser with bounded sizes,
//! driving the state machine of `spec.md` §4.5.
//!
//! ```text
//! START → START_LINE → HEADERS → [ BODY ] → END
//!                        │
//!                        └──(on error)──▶ ERROR
//! ```
//!
//! This is a pull parser operated on an accumulating [`BytesMut`]: each
//! call to [`MessageConsumer::feed`] consumes as many complete lines/chunks
//! as it can and returns the first [`ConsumerEvent`] it produces, or
//! [`ConsumerEvent::NeedMoreBytes`] once the buffer is exhausted mid-line.
//! The session (`crate::session`) drives it; unlike the generic
//! `Consumer`/`Channel` pump in `fileport_kernel` (built for a pure
//! byte-sink like a body writer), request parsing has to interleave with
//! handler dispatch closely enough — "don't read a body until asked" is
//! the whole point of `spec.md` §4.5 — that the session owns the read loop
//! directly and calls this incrementally instead of binding it as a
//! `kernel::Consumer`.

use bytes::{Bytes, BytesMut};

use crate::error::HttpError;
use crate::headers::Headers;
use crate::request::{HttpVersion, Request};

pub const MAX_LINE_SIZE: usize = 4096;
pub const MAX_HEADERS_COUNT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    StartLine,
    Headers,
    Body,
    End,
}

#[derive(Debug, Clone)]
enum Framing {
    None,
    ContentLength(u64),
    Chunked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataCrlf,
    TrailerCrlf,
}

pub enum ConsumerEvent {
    NeedMoreBytes,
    HeadersReady(Request),
    BodyData(Bytes),
    BodyEnd,
}

pub struct MessageConsumer {
    state: State,
    framing: Framing,
    chunk_state: ChunkState,
    headers_seen: usize,
    peer_addr: std::net::SocketAddr,
    is_secure: bool,
    /// Set once the handler has opted in to reading the body
    /// (`spec.md` §4.5 "until it does, body bytes are not consumed").
    body_requested: bool,
    /// Request under construction while we're still folding header
    /// lines; resumed across `feed` calls that return `NeedMoreBytes`
    /// mid-headers.
    pending_request: Option<Request>,
}

impl MessageConsumer {
    pub fn new(peer_addr: std::net::SocketAddr, is_secure: bool) -> Self {
        Self {
            state: State::StartLine,
            framing: Framing::None,
            chunk_state: ChunkState::Size,
            headers_seen: 0,
            peer_addr,
            is_secure,
            body_requested: false,
            pending_request: None,
        }
    }

    /// Resets parser state for the next transaction on a keep-alive
    /// connection, preserving the connection-level fields.
    pub fn reset(&mut self) {
        self.state = State::StartLine;
        self.framing = Framing::None;
        self.chunk_state = ChunkState::Size;
        self.headers_seen = 0;
        self.body_requested = false;
        self.pending_request = None;
    }

    pub fn request_body(&mut self) {
        self.body_requested = true;
    }

    pub fn is_at_body(&self) -> bool {
        self.state == State::Body
    }

    pub fn is_done(&self) -> bool {
        self.state == State::End
    }

    pub fn has_no_body(&self) -> bool {
        matches!(self.framing, Framing::None)
    }

    fn take_line(buf: &mut BytesMut) -> Result<Option<Bytes>, HttpError> {
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            if pos >= MAX_LINE_SIZE {
                return Err(HttpError::bad_request("request line too long"));
            }
            let mut line = buf.split_to(pos + 1);
            line.truncate(line.len().saturating_sub(if line.ends_with(b"\r\n") { 2 } else { 1 }));
            return Ok(Some(line.freeze()));
        }
        if buf.len() >= MAX_LINE_SIZE {
            return Err(HttpError::bad_request("request line too long"));
        }
        Ok(None)
    }

    pub fn feed(&mut self, buf: &mut BytesMut) -> Result<ConsumerEvent, HttpError> {
        loop {
            match self.state {
                State::StartLine => match Self::take_line(buf)? {
                    None => return Ok(ConsumerEvent::NeedMoreBytes),
                    Some(line) => {
                        let request = self.parse_start_line(&line)?;
                        self.state = State::Headers;
                        return self.continue_headers(buf, request);
                    }
                },
                State::Headers => {
                    let request = self
                        .pending_request
                        .take()
                        .ok_or(HttpError::Protocol("headers state with no pending request"))?;
                    return self.continue_headers(buf, request);
                }
                State::Body => return self.feed_body(buf),
                State::End => return Ok(ConsumerEvent::BodyEnd),
            }
        }
    }

    /// Continues parsing from just after the start line, folding header
    /// lines into `request.headers` until the blank line or an error.
    fn continue_headers(&mut self, buf: &mut BytesMut, mut request: Request) -> Result<ConsumerEvent, HttpError> {
        loop {
            match Self::take_line(buf)? {
                None => {
                    // Stash partial progress by re-feeding via a resumable
                    // path: callers re-invoke `feed_headers` with the same
                    // in-progress request next time more bytes arrive.
                    self.pending_request = Some(request);
                    self.state = State::Headers;
                    return Ok(ConsumerEvent::NeedMoreBytes);
                }
                Some(line) if line.is_empty() => {
                    self.framing = self.determine_framing(&request.headers)?;
                    self.state = State::Body;
                    self.pending_request = None;
                    return Ok(ConsumerEvent::HeadersReady(request));
                }
                Some(line) => {
                    self.headers_seen += 1;
                    if self.headers_seen > MAX_HEADERS_COUNT {
                        return Err(HttpError::bad_request("too many headers"));
                    }
                    let (name, value) = parse_header_line(&line)?;
                    if name.eq_ignore_ascii_case("connection") {
                        let list: Vec<&str> = value.split(',').map(str::trim).collect();
                        if list.iter().any(|v| v.eq_ignore_ascii_case("keep-alive")) {
                            // explicit override handled by the session
                        } else if !list.iter().any(|v| v.eq_ignore_ascii_case("close")) {
                            return Err(HttpError::bad_request("unrecognized Connection value"));
                        }
                    }
                    request
                        .headers
                        .insert(name, value, MAX_LINE_SIZE)
                        .map_err(|_| HttpError::bad_request("header value too large"))?;
                }
            }
        }
    }

    fn feed_body(&mut self, buf: &mut BytesMut) -> Result<ConsumerEvent, HttpError> {
        if !self.body_requested {
            return Ok(ConsumerEvent::NeedMoreBytes);
        }
        match &mut self.framing {
            Framing::None => {
                self.state = State::End;
                Ok(ConsumerEvent::BodyEnd)
            }
            Framing::ContentLength(remaining) => {
                if *remaining == 0 {
                    self.state = State::End;
                    return Ok(ConsumerEvent::BodyEnd);
                }
                if buf.is_empty() {
                    return Ok(ConsumerEvent::NeedMoreBytes);
                }
                let take = (*remaining).min(buf.len() as u64) as usize;
                let chunk = buf.split_to(take).freeze();
                *remaining -= take as u64;
                if *remaining == 0 {
                    self.state = State::End;
                }
                Ok(ConsumerEvent::BodyData(chunk))
            }
            Framing::Chunked => self.feed_chunked(buf),
        }
    }

    fn feed_chunked(&mut self, buf: &mut BytesMut) -> Result<ConsumerEvent, HttpError> {
        loop {
            match self.chunk_state {
                ChunkState::Size => match Self::take_line(buf)? {
                    None => return Ok(ConsumerEvent::NeedMoreBytes),
                    Some(line) => {
                        let text = std::str::from_utf8(&line)
                            .map_err(|_| HttpError::bad_request("invalid chunk size"))?;
                        let size_text = text.split(';').next().unwrap_or("").trim();
                        let size = u64::from_str_radix(size_text, 16)
                            .map_err(|_| HttpError::bad_request("invalid chunk size"))?;
                        if size == 0 {
                            self.chunk_state = ChunkState::TrailerCrlf;
                        } else {
                            self.chunk_state = ChunkState::Data(size);
                        }
                    }
                },
                ChunkState::Data(remaining) => {
                    if buf.is_empty() {
                        return Ok(ConsumerEvent::NeedMoreBytes);
                    }
                    let take = remaining.min(buf.len() as u64) as usize;
                    let chunk = buf.split_to(take).freeze();
                    let left = remaining - take as u64;
                    self.chunk_state = if left == 0 { ChunkState::DataCrlf } else { ChunkState::Data(left) };
                    return Ok(ConsumerEvent::BodyData(chunk));
                }
                ChunkState::DataCrlf => match Self::take_line(buf)? {
                    None => return Ok(ConsumerEvent::NeedMoreBytes),
                    Some(_) => self.chunk_state = ChunkState::Size,
                },
                ChunkState::TrailerCrlf => match Self::take_line(buf)? {
                    None => return Ok(ConsumerEvent::NeedMoreBytes),
                    Some(line) => {
                        if line.is_empty() {
                            self.state = State::End;
                            return Ok(ConsumerEvent::BodyEnd);
                        }
                        // Trailers are not supported (`spec.md` §6); skip
                        // and keep reading blank-terminated trailer lines.
                    }
                },
            }
        }
    }

    fn determine_framing(&self, headers: &Headers) -> Result<Framing, HttpError> {
        if let Some(te) = headers.get("transfer-encoding") {
            if te.as_str().eq_ignore_ascii_case("chunked") {
                return Ok(Framing::Chunked);
            }
            return Err(HttpError::bad_request("unsupported transfer-encoding"));
        }
        if let Some(cl) = headers.get("content-length") {
            let n: u64 = cl
                .as_str()
                .trim()
                .parse()
                .map_err(|_| HttpError::bad_request("invalid Content-Length"))?;
            return Ok(Framing::ContentLength(n));
        }
        Ok(Framing::None)
    }

    fn parse_start_line(&self, line: &[u8]) -> Result<Request, HttpError> {
        let text = std::str::from_utf8(line).map_err(|_| HttpError::bad_request("malformed start line"))?;
        let mut parts = text.splitn(3, ' ');
        let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(t), Some(v)) if !m.is_empty() && !t.is_empty() => (m, t, v),
            _ => return Err(HttpError::bad_request("malformed request start line")),
        };

        let version = match version {
            "HTTP/1.0" => HttpVersion::Http10,
            "HTTP/1.1" => HttpVersion::Http11,
            _ => return Err(HttpError::bad_request("unsupported HTTP version")),
        };

        let (path_and_query, fragment) = match target.split_once('#') {
            Some((p, f)) => (p, f),
            None => (target, ""),
        };
        let (raw_path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p, q),
            None => (path_and_query, ""),
        };

        let normalized = crate::path::normalize_path(raw_path)
            .ok_or_else(|| HttpError::bad_request("empty normalized request path"))?;

        Ok(Request {
            method: method.to_string(),
            path: normalized,
            query: query.to_string(),
            fragment: fragment.to_string(),
            version,
            headers: Headers::new(),
            is_secure: self.is_secure,
            peer_addr: self.peer_addr,
        })
    }
}

fn parse_header_line(line: &[u8]) -> Result<(&str, &str), HttpError> {
    let text = std::str::from_utf8(line).map_err(|_| HttpError::bad_request("malformed header line"))?;
    let (name, value) = text
        .split_once(':')
        .ok_or_else(|| HttpError::bad_request("malformed header line"))?;
    Ok((name.trim(), value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1234)
    }

    #[test]
    fn parses_simple_get() {
        let mut c = MessageConsumer::new(addr(), false);
        let mut buf = BytesMut::from(&b"GET /index.html HTTP/1.1\r\nHost: t\r\n\r\n"[..]);
        match c.feed(&mut buf).unwrap() {
            ConsumerEvent::HeadersReady(req) => {
                assert_eq!(req.method, "GET");
                assert_eq!(req.path, "/index.html");
                assert_eq!(req.version, HttpVersion::Http11);
            }
            _ => panic!("expected headers ready"),
        }
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut c = MessageConsumer::new(addr(), false);
        let mut buf = BytesMut::from(&b"GET / HTTP/1.2\r\n\r\n"[..]);
        assert!(c.feed(&mut buf).is_err());
    }

    #[test]
    fn rejects_line_over_max_size() {
        let mut c = MessageConsumer::new(addr(), false);
        let huge = "x".repeat(MAX_LINE_SIZE + 10);
        let mut buf = BytesMut::from(format!("GET /{huge} HTTP/1.1\r\n\r\n").as_bytes());
        assert!(c.feed(&mut buf).is_err());
    }

    #[test]
    fn content_length_body_is_delivered_after_request() {
        let mut c = MessageConsumer::new(addr(), false);
        let mut buf = BytesMut::from(&b"POST /up HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello"[..]);
        match c.feed(&mut buf).unwrap() {
            ConsumerEvent::HeadersReady(_) => {}
            _ => panic!("expected headers ready"),
        }
        c.request_body();
        match c.feed(&mut buf).unwrap() {
            ConsumerEvent::BodyData(d) => assert_eq!(&d[..], b"hello"),
            _ => panic!("expected body data"),
        }
        match c.feed(&mut buf).unwrap() {
            ConsumerEvent::BodyEnd => {}
            _ => panic!("expected body end"),
        }
    }
}
