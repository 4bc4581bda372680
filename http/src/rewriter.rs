//! The WebUI single-page-app fallback (`spec.md` §4.7 "rewriter"),
//! grounded on `webui/rewriter.cpp`: any path outside a fixed exemption
//! list is rewritten to `/index.html` before falling through to the
//! wrapped handler, so client-side routes resolve to the app shell.

use crate::handler::{RequestBody, TransactionHandler};
use crate::transaction::SharedTransaction;

/// Paths left untouched because they're real files/APIs, not
/// client-side routes.
const EXEMPT_PREFIXES: &[&str] = &["/assets", "/favicon.ico", "/icons", "/index.html", "/api"];

pub struct Rewriter<H> {
    inner: H,
}

impl<H> Rewriter<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

#[async_trait::async_trait]
impl<H: TransactionHandler> TransactionHandler for Rewriter<H> {
    async fn handle_transaction(&self, txn: SharedTransaction, body: &mut RequestBody<'_>) {
        let needs_rewrite = {
            let guard = txn.lock();
            !EXEMPT_PREFIXES.iter().any(|p| guard.request.path.starts_with(p))
        };
        if needs_rewrite {
            txn.lock().request.path = "/index.html".to_string();
        }
        self.inner.handle_transaction(txn, body).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{HttpVersion, Request};
    use crate::responder::Responder;
    use crate::transaction::{self, Transaction};

    struct Echo;

    #[async_trait::async_trait]
    impl TransactionHandler for Echo {
        async fn handle_transaction(&self, txn: SharedTransaction, _body: &mut RequestBody<'_>) {
            let mut guard = txn.lock();
            let path = guard.request.path.clone();
            guard.responder.send_status(200, "OK");
            guard.responder.send_header("X-Seen-Path", path);
            guard.responder.send_end();
        }
    }

    fn txn(path: &str) -> SharedTransaction {
        transaction::shared(Transaction::new(
            Request {
                method: "GET".into(),
                path: path.into(),
                query: String::new(),
                fragment: String::new(),
                version: HttpVersion::Http11,
                headers: crate::headers::Headers::new(),
                is_secure: false,
                peer_addr: "127.0.0.1:1".parse().unwrap(),
            },
            Responder::new(HttpVersion::Http11, false, true),
        ))
    }

    async fn dispatch(h: &Rewriter<Echo>, txn: SharedTransaction) {
        let mut buf = bytes::BytesMut::new();
        let mut consumer = crate::consumer::MessageConsumer::new("127.0.0.1:1".parse().unwrap(), false);
        let mut write_half = tokio::io::sink();
        let mut read_half = tokio::io::empty();
        let mut body = RequestBody::new(
            &mut read_half,
            &mut write_half,
            &mut buf,
            &mut consumer,
            HttpVersion::Http11,
            std::time::Duration::from_secs(1),
        );
        h.handle_transaction(txn, &mut body).await;
    }

    #[tokio::test]
    async fn client_side_route_is_rewritten_to_index() {
        let r = Rewriter::new(Echo);
        let t = txn("/dashboard/settings");
        dispatch(&r, t.clone()).await;
        assert_eq!(t.lock().request.path, "/index.html");
    }

    #[tokio::test]
    async fn exempt_prefixes_pass_through_unchanged() {
        let r = Rewriter::new(Echo);
        let t = txn("/assets/app.js");
        dispatch(&r, t.clone()).await;
        assert_eq!(t.lock().request.path, "/assets/app.js");
    }
}
