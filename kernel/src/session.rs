//! Per-connection session bookkeeping owned exclusively by a
//! [`crate::tcp_server::TcpServer`] (`spec.md` §3).

use std::net::SocketAddr;
use std::time::{Duration, Instant};

pub type SessionId = u64;

/// Shared fields every protocol session carries, regardless of what it
/// actually speaks on the wire.
pub struct SessionInfo {
    pub id: SessionId,
    pub peer_addr: SocketAddr,
    pub keepalive_timeout: Duration,
    pub activity_timeout: Duration,
    pub last_activity: Instant,
}

impl SessionInfo {
    pub fn new(id: SessionId, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            keepalive_timeout: Duration::from_secs(300),
            activity_timeout: Duration::from_secs(60),
            last_activity: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Implemented by a protocol's session type so the TCP server can manage
/// it uniformly: shut it down and learn when it has ended.
#[async_trait::async_trait]
pub trait Session: Send {
    fn id(&self) -> SessionId;

    /// Requests that the session terminate, typically because
    /// `TcpServer::end_sessions` was called. `err` is `None` for a
    /// graceful shutdown request.
    async fn shutdown(&mut self, err: Option<std::io::Error>);
}

/// Produces a protocol session for each accepted socket. Implemented by
/// e.g. the HTTP layer's session factory.
#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: Session + 'static;

    async fn make_session(
        &self,
        id: SessionId,
        socket: tokio::net::TcpStream,
        peer_addr: SocketAddr,
        ended: tokio::sync::mpsc::UnboundedSender<(SessionId, Option<std::io::Error>)>,
    ) -> Self::Session;
}
