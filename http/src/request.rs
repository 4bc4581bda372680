//! The parsed request (`spec.md` §3 "Request"): method, URI, headers,
//! version.

use crate::headers::Headers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
        }
    }
}

/// One parsed request. `path` is mutated in place as it passes through
/// nested routers (`spec.md` §4.7 "the matched prefix is stripped"); the
/// original is preserved in `X-FZ-INT-Original-Path` the first time that
/// happens.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: String,
    pub fragment: String,
    pub version: HttpVersion,
    pub headers: Headers,
    pub is_secure: bool,
    pub peer_addr: std::net::SocketAddr,
}

impl Request {
    pub fn is_get_or_head(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET") || self.method.eq_ignore_ascii_case("HEAD")
    }

    pub fn is_head(&self) -> bool {
        self.method.eq_ignore_ascii_case("HEAD")
    }

    /// Value of a header, falling back to `default` — mirrors the
    /// source's `headers.get(name, default)` convenience overload used
    /// throughout `file_server.cpp`/`authorizator.cpp`.
    pub fn header_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.headers.get(name).map(|v| v.as_str()).unwrap_or(default)
    }
}
