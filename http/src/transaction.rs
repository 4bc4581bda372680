//! One HTTP request/response pair (`spec.md` §3 "HTTP transaction",
//! §4.6), grounded on `server/session.cpp`'s `http::transaction`.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::request::Request;
use crate::responder::Responder;

/// A request paired with the responder driving its reply. Held behind
/// `Arc<Mutex<_>>` ("shared_transaction" in the source) because a
/// handler may hop across an `await` that outlives a single poll of the
/// session's loop (e.g. an authorizator round-trip) and needs to reach
/// back into the same transaction when it resumes.
pub struct Transaction {
    pub request: Request,
    pub responder: Responder,
    /// Set by [`Transaction::detach`] when the owning session goes
    /// away; outstanding handlers check this before touching
    /// `responder` so a slow round-trip can't write into a connection
    /// nobody is reading from anymore.
    detached: bool,
}

impl Transaction {
    pub fn new(request: Request, responder: Responder) -> Self {
        Self {
            request,
            responder,
            detached: false,
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Unhooks this transaction from its session (`spec.md` §4.10 "On
    /// session end, `transaction.detach()` unhooks the buffer-operator
    /// event handlers so callbacks don't fire into a dead session"). The
    /// transaction object itself may outlive the session.
    pub fn detach(&mut self) {
        self.detached = true;
        if !self.responder.is_done() {
            self.responder.abort_send();
        }
    }
}

pub type SharedTransaction = Arc<Mutex<Transaction>>;

pub fn shared(transaction: Transaction) -> SharedTransaction {
    Arc::new(Mutex::new(transaction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::HttpVersion;

    fn dummy_request() -> Request {
        Request {
            method: "GET".into(),
            path: "/".into(),
            query: String::new(),
            fragment: String::new(),
            version: HttpVersion::Http11,
            headers: crate::headers::Headers::new(),
            is_secure: false,
            peer_addr: "127.0.0.1:1".parse().unwrap(),
        }
    }

    #[test]
    fn detach_marks_detached_and_aborts_unfinished_response() {
        let mut txn = Transaction::new(dummy_request(), Responder::new(HttpVersion::Http11, false, true));
        assert!(!txn.is_detached());
        txn.detach();
        assert!(txn.is_detached());
        assert!(txn.responder.is_done());
    }
}
