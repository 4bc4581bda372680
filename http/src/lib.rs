//! HTTP/1.x server layer (`spec.md` §4.5-§4.7): message parsing, the
//! request/response state machines, routing, and the file-serving
//! handler, all driven by one [`session::run_http_session`] task per
//! accepted connection.

pub mod body;
pub mod chunked;
pub mod consumer;
pub mod error;
pub mod file_server;
pub mod handler;
pub mod headers;
pub mod listing;
pub mod mime;
pub mod path;
pub mod request;
pub mod responder;
pub mod rewriter;
pub mod router;
pub mod session;
pub mod transaction;

pub use error::HttpError;
pub use handler::{RequestBody, TransactionHandler};
pub use request::{HttpVersion, Request};
pub use responder::Responder;
pub use router::Router;
pub use session::{HttpSession, HttpSessionFactory};
pub use transaction::{SharedTransaction, Transaction};
