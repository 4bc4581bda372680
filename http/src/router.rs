//! Longest-prefix-wins request dispatch (`spec.md` §4.7 "Router"),
//! grounded on `http/handlers/router.cpp`'s `std::map<string, handler,
//! std::greater<>>` + `lower_bound` scan.
//!
//! A `BTreeMap` sorts ascending, so the source's descending walk
//! becomes `.range(..=path).rev()`: every key at or below `path` in
//! normal order, visited from the longest candidate down. The first
//! one that actually lands on a `/` boundary in `path` wins.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::handler::{RequestBody, TransactionHandler};
use crate::transaction::SharedTransaction;

pub struct Router {
    routes: BTreeMap<String, Arc<dyn TransactionHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }

    /// Registers `handler` under `prefix`. Returns `false` without
    /// replacing anything if `prefix` is empty or already taken,
    /// mirroring the source's `emplace` (which never overwrites).
    pub fn add_route(&mut self, prefix: impl Into<String>, handler: Arc<dyn TransactionHandler>) -> bool {
        let prefix = prefix.into();
        if prefix.is_empty() || self.routes.contains_key(&prefix) {
            return false;
        }
        self.routes.insert(prefix, handler);
        true
    }

    /// Finds the longest registered prefix that lands on a `/` boundary
    /// in `path`, returning it along with the path the matched handler
    /// should see (the prefix stripped off, re-anchored to `/`).
    fn find(&self, path: &str) -> Option<(&str, &Arc<dyn TransactionHandler>, String)> {
        for (prefix, handler) in self.routes.range(..=path.to_string()).rev() {
            if !path.starts_with(prefix.as_str()) {
                continue;
            }
            let new_path = if let Some(rest) = prefix.strip_suffix('/') {
                // `rest` no longer counts the boundary slash; keep it on
                // the stripped path by slicing from `rest.len()` instead
                // of `prefix.len()`.
                Some(path[rest.len()..].to_string())
            } else if prefix.len() == path.len() {
                Some("/".to_string())
            } else if path.as_bytes().get(prefix.len()) == Some(&b'/') {
                Some(path[prefix.len()..].to_string())
            } else {
                None
            };

            if let Some(new_path) = new_path {
                return Some((prefix.as_str(), handler, new_path));
            }
        }
        None
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TransactionHandler for Router {
    async fn handle_transaction(&self, txn: SharedTransaction, body: &mut RequestBody<'_>) {
        let path = txn.lock().request.path.clone();

        let Some((_prefix, handler, new_path)) = self.find(&path) else {
            let mut guard = txn.lock();
            guard.responder.send_status(404, "Not Found");
            guard.responder.send_end();
            return;
        };
        let handler = handler.clone();

        {
            let mut guard = txn.lock();
            // Preserve the path the client actually sent exactly once,
            // even across nested routers (`spec.md` §4.7 "the original
            // path is preserved the first time it's rewritten").
            if !guard.request.headers.contains("x-fz-int-original-path") {
                let original = guard.request.path.clone();
                guard.request.headers.set("X-FZ-INT-Original-Path", original);
            }
            guard.request.path = new_path;
        }

        handler.handle_transaction(txn, body).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{HttpVersion, Request};
    use crate::responder::Responder;
    use crate::transaction::{self, Transaction};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        seen_path: std::sync::Mutex<String>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TransactionHandler for CountingHandler {
        async fn handle_transaction(&self, txn: SharedTransaction, _body: &mut RequestBody<'_>) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_path.lock().unwrap() = txn.lock().request.path.clone();
            let mut guard = txn.lock();
            guard.responder.send_status(200, "OK");
            guard.responder.send_end();
        }
    }

    fn request(path: &str) -> Request {
        Request {
            method: "GET".into(),
            path: path.into(),
            query: String::new(),
            fragment: String::new(),
            version: HttpVersion::Http11,
            headers: crate::headers::Headers::new(),
            is_secure: false,
            peer_addr: "127.0.0.1:1".parse().unwrap(),
        }
    }

    fn txn(path: &str) -> SharedTransaction {
        transaction::shared(Transaction::new(
            request(path),
            Responder::new(HttpVersion::Http11, false, true),
        ))
    }

    async fn dispatch(router: &Router, txn: SharedTransaction) {
        let mut buf = bytes::BytesMut::new();
        let mut consumer = crate::consumer::MessageConsumer::new("127.0.0.1:1".parse().unwrap(), false);
        let mut sink = std::io::sink();
        let mut null_write = tokio::io::sink();
        let mut read_half = tokio::io::empty();
        let _ = &mut sink;
        let mut body = RequestBody::new(
            &mut read_half,
            &mut null_write,
            &mut buf,
            &mut consumer,
            HttpVersion::Http11,
            std::time::Duration::from_secs(1),
        );
        router.handle_transaction(txn, &mut body).await;
    }

    #[tokio::test]
    async fn longest_prefix_wins_and_strips_to_boundary() {
        let mut router = Router::new();
        router.add_route("/api", Arc::new(CountingHandler {
            seen_path: std::sync::Mutex::new(String::new()),
            calls: AtomicUsize::new(0),
        }));
        let api = Arc::new(CountingHandler {
            seen_path: std::sync::Mutex::new(String::new()),
            calls: AtomicUsize::new(0),
        });
        router.add_route("/api/v1/", api.clone());

        let t = txn("/api/v1/entries");
        dispatch(&router, t.clone()).await;
        assert_eq!(*api.seen_path.lock().unwrap(), "/entries");
        assert_eq!(t.lock().responder.status(), 200);
    }

    #[tokio::test]
    async fn exact_prefix_match_rewrites_to_root() {
        let mut router = Router::new();
        let handler = Arc::new(CountingHandler {
            seen_path: std::sync::Mutex::new(String::new()),
            calls: AtomicUsize::new(0),
        });
        router.add_route("/api", handler.clone());

        let t = txn("/api");
        dispatch(&router, t).await;
        assert_eq!(*handler.seen_path.lock().unwrap(), "/");
    }

    #[tokio::test]
    async fn unmatched_path_yields_404() {
        let router = Router::new();
        let t = txn("/nope");
        dispatch(&router, t.clone()).await;
        assert_eq!(t.lock().responder.status(), 404);
    }

    #[tokio::test]
    async fn duplicate_prefix_registration_is_rejected() {
        let mut router = Router::new();
        let handler = Arc::new(CountingHandler {
            seen_path: std::sync::Mutex::new(String::new()),
            calls: AtomicUsize::new(0),
        });
        assert!(router.add_route("/a", handler.clone()));
        assert!(!router.add_route("/a", handler));
    }
}
