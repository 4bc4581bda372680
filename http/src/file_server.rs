//! The "entries" handler: GET/PUT/DELETE/POST over a [`TvfsEngine`]
//! (`spec.md` §4.7 "authorized file server", `SPEC_FULL.md` §C.3-C.6),
//! grounded on `http/handlers/file_server.cpp`.

use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};

use fileport_tvfs::{FsEntry, FsError, FsErrorKind, OpenMode, OpenedFile, TvfsEngine};

use crate::body::{FileAdder, FileConsumer};
use crate::handler::{RequestBody, TransactionHandler};
use crate::listing::ListingFormat;
use crate::transaction::SharedTransaction;

const PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Knobs for one mounted tree (`spec.md` §4.7 "options"), defaults
/// matching `file_server.hpp`'s `options` struct.
#[derive(Debug, Clone)]
pub struct FileServerOptions {
    pub can_get: bool,
    pub can_put: bool,
    pub can_delete: bool,
    pub can_post: bool,
    pub can_list_dir: bool,
    pub honor_406: bool,
    pub default_index: Vec<String>,
}

impl Default for FileServerOptions {
    fn default() -> Self {
        Self {
            can_get: true,
            can_put: false,
            can_delete: false,
            can_post: false,
            can_list_dir: false,
            honor_406: false,
            default_index: Vec::new(),
        }
    }
}

pub struct FileServer<E> {
    tvfs: E,
    opts: FileServerOptions,
}

impl<E: TvfsEngine> FileServer<E> {
    pub fn new(tvfs: E, opts: FileServerOptions) -> Self {
        Self { tvfs, opts }
    }

    fn send_response_from_result(&self, txn: &SharedTransaction, err: &FsError) {
        let (status, reason) = crate::error::fs_error_status(err);
        let mut guard = txn.lock();
        guard.responder.send_status(status, reason);
        if status == 500 {
            guard.responder.send_header("Connection", "close");
            guard.responder.send_body_str(format!("{}\n", err.message));
        } else {
            guard.responder.send_end();
        }
    }

    /// `spec.md` §4.7 "405 responses carry an `Allow` header built from
    /// the verbs this mount actually permits; a mount with none enabled
    /// falls back to 403" (`SPEC_FULL.md` §C.2).
    fn send_not_allowed_response(&self, txn: &SharedTransaction, additionally_not_allowed: &[&str]) {
        let mut allowed = Vec::new();
        if self.opts.can_get && !additionally_not_allowed.contains(&"GET") {
            allowed.push("GET");
        }
        if self.opts.can_put && !additionally_not_allowed.contains(&"PUT") {
            allowed.push("PUT");
        }
        if self.opts.can_delete && !additionally_not_allowed.contains(&"DELETE") {
            allowed.push("DELETE");
        }
        if self.opts.can_post && !additionally_not_allowed.contains(&"POST") {
            allowed.push("POST");
        }

        let mut guard = txn.lock();
        if !allowed.is_empty() {
            guard.responder.send_status(405, "Method Not Allowed");
            guard.responder.send_header("Allow", allowed.join(", "));
            guard.responder.send_end();
        } else {
            guard.responder.send_status(403, "Forbidden");
            guard.responder.send_end();
        }
    }

    /// Picks the first of `candidates` the client's `Accept` header
    /// prefers (`spec.md` §4.7 "content negotiation"). Absent or
    /// wildcard `Accept` accepts anything. On a genuine mismatch,
    /// `self.opts.honor_406` decides between sending `406` (returns
    /// `None`, already responded) and silently picking the first
    /// candidate (`SPEC_FULL.md` §C.4).
    fn negotiate_content_type(&self, txn: &SharedTransaction, candidates: &[&'static str]) -> Option<&'static str> {
        if candidates.is_empty() {
            return Some("");
        }

        let accept = {
            let guard = txn.lock();
            guard.request.headers.get("accept").map(|v| v.as_list().iter().map(|s| s.to_string()).collect::<Vec<_>>())
        };

        let accept = match accept {
            None => return Some(candidates[0]),
            Some(list) => list,
        };

        if accept.iter().any(|a| a.split(';').next().unwrap_or("").trim() == "*/*") {
            return Some(candidates[0]);
        }

        for candidate in candidates {
            if accept.iter().any(|a| a.split(';').next().unwrap_or("").trim().eq_ignore_ascii_case(candidate)) {
                return Some(candidate);
            }
        }

        if !self.opts.honor_406 {
            tracing::debug!(candidates = ?candidates, "Accept header not satisfied; honor_406 is false, picking first candidate");
            return Some(candidates[0]);
        }

        let mut guard = txn.lock();
        guard.responder.send_status(406, "Not Acceptable");
        guard
            .responder
            .send_body_str(format!("Client must accept one of: {}.\n", candidates.join(", ")));
        None
    }

    fn send_disposition_header(&self, txn: &SharedTransaction) {
        let mut guard = txn.lock();
        let query = guard.request.query.clone();
        let file_name_header = guard.request.headers.get("x-fz-int-file-name").map(|v| v.as_str().to_string());

        let is_download = url::form_urlencoded::parse(query.as_bytes()).any(|(k, _)| k == "download");
        let disposition = if is_download { "attachment" } else { "inline" };

        let value = match file_name_header {
            Some(name) => format!(
                "{disposition}; filename*=UTF-8''{}",
                percent_encoding::utf8_percent_encode(&name, NON_ALPHANUMERIC)
            ),
            None => disposition.to_string(),
        };
        guard.responder.send_header("Content-Disposition", value);
    }

    /// Streams one file as the response body (`spec.md` §4.7 `GET` on a
    /// file). `Ok(true)` means a response was sent; `Ok(false)` means
    /// content negotiation failed and a `406` was already sent; `Err`
    /// propagates a `tvfs` failure (the caller decides what to do,
    /// e.g. fall through to the next `default_index` candidate).
    async fn send_file(&self, txn: &SharedTransaction, path: &str) -> Result<bool, FsError> {
        let opened = self.tvfs.open_file(path, OpenMode::Reading).await?;
        let OpenedFile::Read { reader, size, modified } = opened else {
            return Err(FsError::new(FsErrorKind::Invalid, "open_file(Reading) returned a writer"));
        };

        let file_name_header = {
            let guard = txn.lock();
            guard.request.headers.get("x-fz-int-file-name").map(|v| v.as_str().to_string())
        };
        let mime = crate::mime::mime_from_name(file_name_header.as_deref().unwrap_or(path));

        let Some(content_type) = self.negotiate_content_type(txn, &[mime]) else {
            return Ok(false);
        };

        {
            let mut guard = txn.lock();
            guard.responder.send_status(200, "OK");
            guard.responder.send_header("Content-Type", content_type.to_string());
            if let Some(modified) = modified {
                guard.responder.send_header("Last-Modified", httpdate::fmt_http_date(modified));
            }
            guard.responder.send_header("Vary", "Accept");
        }
        self.send_disposition_header(txn);
        {
            let mut guard = txn.lock();
            guard.responder.send_body_sized(size, Box::new(FileAdder::new(reader)));
        }
        Ok(true)
    }

    async fn do_get(&self, txn: &SharedTransaction, mut path: String) {
        match self.tvfs.get_entries(&path).await {
            Err(e) if e.kind == FsErrorKind::NoDir => match self.send_file(txn, &path).await {
                Ok(_) => {}
                Err(e) => self.send_response_from_result(txn, &e),
            },
            Err(e) => self.send_response_from_result(txn, &e),
            Ok(entries) => self.do_get_directory(txn, &mut path, entries).await,
        }
    }

    async fn do_get_directory(&self, txn: &SharedTransaction, path: &mut String, entries: Vec<FsEntry>) {
        if !self.opts.can_list_dir && self.opts.default_index.is_empty() {
            self.send_response_from_result(txn, &FsError::new(FsErrorKind::NoPerm, "directory listing disabled"));
            return;
        }

        let slash_appended = !path.ends_with('/');
        if slash_appended {
            path.push('/');
        }

        for index in &self.opts.default_index {
            if index.is_empty() || index.contains('/') {
                tracing::warn!(index, "default_index entry is invalid, skipping");
                continue;
            }
            match self.send_file(txn, &format!("{path}{index}")).await {
                Ok(true) => return,
                Ok(false) => return,
                Err(_) => {}
            }
        }

        if self.opts.can_list_dir {
            if slash_appended {
                let original = {
                    let guard = txn.lock();
                    let h = guard.request.headers.get_str("x-fz-int-original-path");
                    if h.is_empty() {
                        path.trim_end_matches('/').to_string()
                    } else {
                        h.to_string()
                    }
                };
                let mut location = percent_encoding::utf8_percent_encode(&original, PATH_ENCODE_SET).to_string();
                if !location.ends_with('/') {
                    location.push('/');
                }
                let query = txn.lock().request.query.clone();
                if !query.is_empty() {
                    location.push('?');
                    location.push_str(&query);
                }

                let mut guard = txn.lock();
                guard.responder.send_status(301, "Moved Permanently");
                guard.responder.send_header("Location", location);
                guard.responder.send_end();
                return;
            }

            let Some(format) = self.negotiate_content_type(txn, &["text/html", "text/plain", "application/ndjson"])
            else {
                return;
            };
            let format = match format {
                "text/html" => ListingFormat::Html,
                "text/plain" => ListingFormat::PlainText,
                _ => ListingFormat::Ndjson,
            };

            let modified = self.tvfs.get_entry(path).await.ok().and_then(|e| e.modified);
            let rendered = crate::listing::render(format, path, &entries);

            {
                let mut guard = txn.lock();
                guard.responder.send_status(200, "OK");
                guard.responder.send_header("Content-Type", format.content_type());
                guard.responder.send_header("Vary", "Accept");
                if let Some(modified) = modified {
                    guard.responder.send_header("Last-Modified", httpdate::fmt_http_date(modified));
                }
            }
            self.send_disposition_header(txn);
            txn.lock().responder.send_body_str(rendered);
            return;
        }

        self.send_response_from_result(txn, &FsError::new(FsErrorKind::NoPerm, "directory listing disabled"));
    }

    async fn do_put(&self, txn: &SharedTransaction, path: String, body: &mut RequestBody<'_>) {
        let action = {
            let guard = txn.lock();
            guard.request.headers.get("x-fz-action").map(|v| v.as_str().to_string())
        };

        if let Some(action) = action {
            let (name, params) = parse_action(&action);
            if name == "mkdir" {
                return self.do_put_mkdir(txn, &path).await;
            }
            if name == "copy-from" {
                if let Some(source) = params.get("path").filter(|s| !s.is_empty()) {
                    return self.do_put_copy(txn, source).await;
                }
            }

            tracing::error!(action, "invalid X-FZ-Action header");
            let mut guard = txn.lock();
            guard.responder.send_status(400, "Bad Request");
            guard.responder.send_end();
            return;
        }

        match self.tvfs.open_file(&path, OpenMode::Writing).await {
            Ok(OpenedFile::Write { writer }) => {
                let mut sink = FileConsumer::new(writer);
                let receive_result = body.receive_into(&mut sink).await;
                let write_result = sink.finish().await;
                let mut guard = txn.lock();
                if receive_result.is_ok() && write_result.is_ok() {
                    guard.responder.send_status(204, "No Content");
                    guard.responder.send_end();
                } else {
                    guard.responder.send_status(500, "Internal Server Error");
                    guard.responder.send_header("Connection", "close");
                    guard.responder.send_end();
                }
            }
            Ok(OpenedFile::Read { .. }) => {
                self.send_response_from_result(txn, &FsError::new(FsErrorKind::Invalid, "open_file(Writing) returned a reader"));
            }
            Err(e) => self.send_response_from_result(txn, &e),
        }
    }

    async fn do_put_mkdir(&self, txn: &SharedTransaction, path: &str) {
        match self.tvfs.make_directory(path).await {
            Ok(()) => {
                let mut guard = txn.lock();
                guard.responder.send_status(204, "No Content");
                guard.responder.send_end();
            }
            // PUT is idempotent, so a directory that's already there is
            // a success (`SPEC_FULL.md` §C.5).
            Err(e) if e.kind == FsErrorKind::AlreadyExists => {
                let mut guard = txn.lock();
                guard.responder.send_status(204, "No Content");
                guard.responder.send_end();
            }
            Err(e) => self.send_response_from_result(txn, &e),
        }
    }

    async fn do_put_copy(&self, txn: &SharedTransaction, _source: &str) {
        let mut guard = txn.lock();
        guard.responder.send_status(501, "Not Implemented");
        guard.responder.send_end();
    }

    async fn do_delete(&self, txn: &SharedTransaction, path: String) {
        let recursive = {
            let guard = txn.lock();
            guard.request.headers.get_str("x-fz-recursive") == "true"
        };

        let result = if path.ends_with('/') {
            self.tvfs.remove_directory(&path, recursive).await
        } else {
            match self.tvfs.remove_file(&path).await {
                // A file-or-directory DELETE falls back from file to
                // directory removal (`SPEC_FULL.md` §C.6).
                Err(e) if e.kind == FsErrorKind::NoFile => self.tvfs.remove_directory(&path, recursive).await,
                other => other,
            }
        };

        match result {
            Ok(()) => {
                let mut guard = txn.lock();
                guard.responder.send_status(204, "No Content");
                guard.responder.send_end();
            }
            Err(e) => self.send_response_from_result(txn, &e),
        }
    }

    async fn do_post(&self, txn: &SharedTransaction, path: String) {
        let entry = match self.tvfs.get_entry(&path).await {
            Ok(e) => e,
            Err(e) => return self.send_response_from_result(txn, &e),
        };
        if !entry.is_directory() {
            return self.send_not_allowed_response(txn, &["POST"]);
        }

        let actions = {
            let guard = txn.lock();
            guard
                .request
                .headers
                .get("x-fz-action")
                .map(|v| v.as_list().iter().map(|s| s.to_string()).collect::<Vec<_>>())
                .unwrap_or_default()
        };

        let mut move_from = None;
        let mut move_to = None;
        for action in &actions {
            let (name, params) = parse_action(action);
            match name {
                "move-from" => move_from = params.get("path").cloned(),
                "move-to" => move_to = params.get("path").cloned(),
                _ => {}
            }
        }

        if let (Some(from), Some(to)) = (&move_from, &move_to) {
            if !from.is_empty() && !to.is_empty() {
                let cwd = path.trim_end_matches('/');
                let from = join_under(cwd, from);
                let to = join_under(cwd, to);
                return match self.tvfs.rename(&from, &to).await {
                    Ok(()) => {
                        let mut guard = txn.lock();
                        guard.responder.send_status(204, "No Content");
                        guard.responder.send_end();
                    }
                    Err(e) => self.send_response_from_result(txn, &e),
                };
            }
        }

        tracing::error!("missing or invalid X-FZ-Action header for POST");
        let mut guard = txn.lock();
        guard.responder.send_status(400, "Bad Request");
        guard.responder.send_end();
    }
}

/// Decodes a `move-from`/`copy-from`-style action path param and joins
/// it under `cwd` (`spec.md` §4.7 "paths resolved against the request
/// path").
fn join_under(cwd: &str, relative: &str) -> String {
    let decoded = percent_encoding::percent_decode_str(relative)
        .decode_utf8_lossy()
        .into_owned();
    if decoded.starts_with('/') {
        decoded
    } else {
        format!("{cwd}/{decoded}")
    }
}

/// Parses an `X-FZ-Action`-style header value: a bare action name
/// followed by `; key=value` params, e.g. `copy-from; path=foo/bar`.
fn parse_action(value: &str) -> (&str, std::collections::HashMap<&str, String>) {
    let mut parts = value.split(';');
    let name = parts.next().unwrap_or("").trim();
    let mut params = std::collections::HashMap::new();
    for part in parts {
        if let Some((k, v)) = part.trim().split_once('=') {
            params.insert(k.trim(), v.trim().trim_matches('"').to_string());
        }
    }
    (name, params)
}

#[async_trait::async_trait]
impl<E: TvfsEngine> TransactionHandler for FileServer<E> {
    async fn handle_transaction(&self, txn: SharedTransaction, body: &mut RequestBody<'_>) {
        let (method, path, expects_continue) = {
            let guard = txn.lock();
            (
                guard.request.method.clone(),
                guard.request.path.clone(),
                guard.request.headers.get_str("expect").eq_ignore_ascii_case("100-continue"),
            )
        };

        enum Dispatch {
            Get,
            Put,
            Delete,
            Post,
        }

        let dispatch = if method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("HEAD") {
            self.opts.can_get.then_some(Dispatch::Get)
        } else if method.eq_ignore_ascii_case("PUT") {
            self.opts.can_put.then_some(Dispatch::Put)
        } else if method.eq_ignore_ascii_case("DELETE") {
            self.opts.can_delete.then_some(Dispatch::Delete)
        } else if method.eq_ignore_ascii_case("POST") {
            self.opts.can_post.then_some(Dispatch::Post)
        } else {
            None
        };

        let Some(dispatch) = dispatch else {
            return self.send_not_allowed_response(&txn, &[]);
        };

        // Unconditional 100-continue: the handler may or may not
        // actually read the body, but the client is allowed to have
        // asked regardless (`SPEC_FULL.md` §C.9).
        if expects_continue {
            let _ = body.send_continue().await;
        }

        match dispatch {
            Dispatch::Get => self.do_get(&txn, path).await,
            Dispatch::Put => self.do_put(&txn, path, body).await,
            Dispatch::Delete => self.do_delete(&txn, path).await,
            Dispatch::Post => self.do_post(&txn, path).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::MessageConsumer;
    use crate::request::{HttpVersion, Request};
    use crate::responder::Responder;
    use crate::transaction::{self, Transaction};
    use fileport_tvfs::local::LocalFilesystem;

    fn request(method: &str, path: &str) -> Request {
        Request {
            method: method.into(),
            path: path.into(),
            query: String::new(),
            fragment: String::new(),
            version: HttpVersion::Http11,
            headers: crate::headers::Headers::new(),
            is_secure: false,
            peer_addr: "127.0.0.1:1".parse().unwrap(),
        }
    }

    fn txn(method: &str, path: &str) -> SharedTransaction {
        transaction::shared(Transaction::new(
            request(method, path),
            Responder::new(HttpVersion::Http11, false, true),
        ))
    }

    async fn dispatch(h: &FileServer<LocalFilesystem>, t: SharedTransaction) {
        let mut buf = bytes::BytesMut::new();
        let mut consumer = MessageConsumer::new("127.0.0.1:1".parse().unwrap(), false);
        let mut write_half = tokio::io::sink();
        let mut read_half = tokio::io::empty();
        let mut body = RequestBody::new(
            &mut read_half,
            &mut write_half,
            &mut buf,
            &mut consumer,
            HttpVersion::Http11,
            Duration::from_secs(1),
        );
        h.handle_transaction(t, &mut body).await;
    }

    #[tokio::test]
    async fn get_missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        let server = FileServer::new(fs, FileServerOptions::default());
        let t = txn("GET", "/missing.txt");
        dispatch(&server, t.clone()).await;
        assert_eq!(t.lock().responder.status(), 404);
    }

    #[tokio::test]
    async fn put_then_get_round_trips_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        tokio::fs::write(&path, b"hi there").await.unwrap();
        let fs = LocalFilesystem::new(dir.path());
        let server = FileServer::new(fs, FileServerOptions::default());

        let t = txn("GET", "/hello.txt");
        dispatch(&server, t.clone()).await;
        assert_eq!(t.lock().responder.status(), 200);
    }

    #[tokio::test]
    async fn disabled_verb_yields_405_with_allow_header() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        let server = FileServer::new(fs, FileServerOptions::default());
        let t = txn("PUT", "/x");
        dispatch(&server, t.clone()).await;
        assert_eq!(t.lock().responder.status(), 405);
    }

    #[tokio::test]
    async fn mkdir_twice_is_idempotent_success() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::new(dir.path());
        let server = FileServer::new(
            fs,
            FileServerOptions {
                can_put: true,
                ..Default::default()
            },
        );

        for _ in 0..2 {
            let t = txn("PUT", "/sub");
            t.lock().request.headers.set("X-FZ-Action", "mkdir");
            dispatch(&server, t.clone()).await;
            assert_eq!(t.lock().responder.status(), 204);
        }
    }
}
