//! The response side of an HTTP transaction: a small state machine
//! (`spec.md` §4.6 "Responder") a handler drives through `send_status`
//! → `send_header`* → one `send_body_*`/`send_end`, grounded on
//! `server/session.cpp`'s responder class.
//!
//! The whole response — status line, headers, and body — is exposed as
//! a single [`Adder`] so the session can pump it to the socket with the
//! same `add_to_buffer` loop it uses for everything else; `HEAD`
//! suppresses the body half without the handler needing to know.

use bytes::{BufMut, BytesMut};

use fileport_kernel::{AddOutcome, Adder, PumpResult, ReadyNotifier};

use crate::body::StringAdder;
use crate::chunked::ChunkedAdder;
use crate::headers::Headers;
use crate::request::HttpVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseState {
    WaitingForCodeAndReason,
    WaitingForHeaders,
    SendingBody,
    SentBody,
    Ended,
}

enum BodyFraming {
    None,
    Sized(Box<dyn Adder>),
    Chunked(ChunkedAdder),
}

pub struct Responder {
    state: ResponseState,
    version: HttpVersion,
    status: u16,
    reason: &'static str,
    headers: Headers,
    keep_alive: bool,
    suppress_body: bool,
    head: Option<BytesMut>,
    body: BodyFraming,
}

impl Responder {
    pub fn new(version: HttpVersion, suppress_body: bool, keep_alive: bool) -> Self {
        Self {
            state: ResponseState::WaitingForCodeAndReason,
            version,
            status: 200,
            reason: "OK",
            headers: Headers::new(),
            keep_alive,
            suppress_body,
            head: None,
            body: BodyFraming::None,
        }
    }

    /// The literal bytes of a `100 Continue` interim response
    /// (`spec.md` §4.5 "Expect: 100-continue"). Sent directly by the
    /// session ahead of the real response; not part of this state
    /// machine at all.
    pub fn continue_line(version: HttpVersion) -> &'static [u8] {
        match version {
            HttpVersion::Http11 => b"HTTP/1.1 100 Continue\r\n\r\n",
            HttpVersion::Http10 => b"HTTP/1.0 100 Continue\r\n\r\n",
        }
    }

    pub fn send_status(&mut self, status: u16, reason: &'static str) {
        debug_assert_eq!(self.state, ResponseState::WaitingForCodeAndReason);
        self.status = status;
        self.reason = reason;
        self.state = ResponseState::WaitingForHeaders;
    }

    pub fn send_header(&mut self, name: &str, value: impl Into<String>) {
        debug_assert_eq!(self.state, ResponseState::WaitingForHeaders);
        self.headers.set(name, value);
    }

    /// Appends one `Set-Cookie` header line (`spec.md` §4.8); unlike
    /// [`Self::send_header`], repeated calls accumulate rather than
    /// overwrite, since a response can carry several cookies.
    pub fn send_cookie(&mut self, value: impl Into<String>) {
        debug_assert_eq!(self.state, ResponseState::WaitingForHeaders);
        self.headers.add_set_cookie(value);
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Forces the connection closed no matter what was negotiated
    /// (`spec.md` §4.6 "abort_send"): used when a handler can't produce
    /// a well-framed body after headers are already committed.
    pub fn abort_send(&mut self) {
        self.keep_alive = false;
        self.body = BodyFraming::None;
        self.state = ResponseState::Ended;
    }

    fn finalize_headers(&mut self, framing_header: Option<(&'static str, String)>) {
        if !self.headers.contains("server") {
            self.headers.set("Server", "fileport");
        }
        if !self.headers.contains("date") {
            self.headers
                .set("Date", httpdate::fmt_http_date(std::time::SystemTime::now()));
        }
        if !self.headers.contains("connection") {
            self.headers
                .set("Connection", if self.keep_alive { "keep-alive" } else { "close" });
        }
        if !self.headers.contains("content-type") {
            self.headers.set("Content-Type", "application/octet-stream");
        }
        if let Some((name, value)) = framing_header {
            self.headers.set(name, value);
        }

        let mut head = BytesMut::new();
        head.put_slice(format!("{} {} {}\r\n", self.version.as_str(), self.status, self.reason).as_bytes());
        for (name, value) in self.headers.iter() {
            head.put_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        for cookie in self.headers.set_cookies() {
            head.put_slice(format!("Set-Cookie: {cookie}\r\n").as_bytes());
        }
        head.put_slice(b"\r\n");
        self.head = Some(head);
    }

    /// Sends a fully-buffered body (`spec.md` §4.6 `send_body(str)`).
    pub fn send_body_str(&mut self, body: impl Into<Vec<u8>>) {
        let data = body.into();
        self.finalize_headers(Some(("Content-Length", data.len().to_string())));
        self.body = BodyFraming::Sized(Box::new(StringAdder::new(data)));
        self.state = ResponseState::SendingBody;
    }

    /// Sends a body of known length from an arbitrary [`Adder`]
    /// (`spec.md` §4.6 `send_body(file)` when the size is known).
    pub fn send_body_sized(&mut self, len: u64, adder: Box<dyn Adder>) {
        self.finalize_headers(Some(("Content-Length", len.to_string())));
        self.body = BodyFraming::Sized(adder);
        self.state = ResponseState::SendingBody;
    }

    /// Sends a body of unknown length, chunk-framed (`spec.md` §4.6
    /// "Body chunker").
    pub fn send_body_chunked(&mut self, adder: Box<dyn Adder>) {
        self.finalize_headers(Some(("Transfer-Encoding", "chunked".to_string())));
        self.body = BodyFraming::Chunked(ChunkedAdder::new(adder));
        self.state = ResponseState::SendingBody;
    }

    /// Sends an empty body (`spec.md` §4.6 `send_end`): `204`/`304`/
    /// `HEAD` responses, or anything else the handler put no body on.
    pub fn send_end(&mut self) {
        if self.head.is_none() {
            self.finalize_headers(Some(("Content-Length", "0".to_string())));
        }
        self.body = BodyFraming::None;
        self.state = ResponseState::SentBody;
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, ResponseState::SentBody | ResponseState::Ended)
    }
}

impl Adder for Responder {
    fn add_to_buffer(&mut self, buf: &mut BytesMut) -> PumpResult<AddOutcome> {
        if let Some(head) = self.head.take() {
            buf.put_slice(&head);
            return Ok(AddOutcome::Produced);
        }

        if self.suppress_body {
            self.state = ResponseState::SentBody;
            return Ok(AddOutcome::EndOfStream);
        }

        let outcome = match &mut self.body {
            BodyFraming::None => return Ok(AddOutcome::EndOfStream),
            BodyFraming::Sized(adder) => adder.add_to_buffer(buf)?,
            BodyFraming::Chunked(adder) => adder.add_to_buffer(buf)?,
        };
        if outcome == AddOutcome::EndOfStream {
            self.state = ResponseState::SentBody;
        }
        Ok(outcome)
    }

    fn set_ready_notifier(&mut self, notifier: ReadyNotifier) {
        match &mut self.body {
            BodyFraming::Sized(adder) => adder.set_ready_notifier(notifier),
            BodyFraming::Chunked(adder) => adder.set_ready_notifier(notifier),
            BodyFraming::None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(mut r: Responder) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let mut scratch = BytesMut::new();
            match r.add_to_buffer(&mut scratch).unwrap() {
                AddOutcome::Produced => out.extend_from_slice(&scratch),
                AddOutcome::EndOfStream => {
                    out.extend_from_slice(&scratch);
                    return out;
                }
                other => panic!("unexpected outcome in test drain: {other:?}"),
            }
        }
    }

    #[test]
    fn writes_status_line_and_body() {
        let mut r = Responder::new(HttpVersion::Http11, false, true);
        r.send_status(200, "OK");
        r.send_header("Content-Type", "text/plain");
        r.send_body_str("hi");
        let bytes = drain(r);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));
    }

    #[test]
    fn head_request_suppresses_body() {
        let mut r = Responder::new(HttpVersion::Http11, true, true);
        r.send_status(200, "OK");
        r.send_body_str("this should not appear");
        let bytes = drain(r);
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("this should not appear"));
        assert!(text.contains("Content-Length: 22\r\n"));
    }

    #[test]
    fn send_end_produces_zero_length_body() {
        let mut r = Responder::new(HttpVersion::Http11, false, true);
        r.send_status(204, "No Content");
        r.send_end();
        let bytes = drain(r);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("Content-Length: 0\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
