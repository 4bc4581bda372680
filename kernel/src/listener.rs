//! A listener owns one bound socket and a queue of accepted-but-not-yet-
//! dispatched connections (`spec.md` §4.4).

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Host/port pair identifying a listener; also accepts the
/// `file_descriptor:<N>` pseudo-address for socket activation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddressInfo {
    pub host: String,
    pub port: u16,
}

impl AddressInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn inherited_fd(&self) -> Option<i32> {
        self.host
            .strip_prefix("file_descriptor:")
            .and_then(|n| n.parse().ok())
    }
}

impl std::fmt::Display for AddressInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Decides whether an accepted peer may proceed past the listener.
pub trait PeerAllowanceChecker: Send + Sync {
    fn is_peer_allowed(&self, addr: SocketAddr) -> bool;
}

/// Allows every peer; the default.
pub struct AllowAll;
impl PeerAllowanceChecker for AllowAll {
    fn is_peer_allowed(&self, _addr: SocketAddr) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerStatus {
    Stopped,
    Started,
    RetryingToStart,
}

const RETRY_INTERVAL: Duration = Duration::from_secs(1);

struct Shared {
    status: Mutex<ListenerStatus>,
    accepted: Mutex<VecDeque<(TcpStream, SocketAddr)>>,
}

/// Binds one address, accepts connections into an internal queue, and
/// signals the owner exactly on the empty-to-non-empty transition of that
/// queue via `connected`. The owner is expected to drain fully
/// (`take_accepted`) each time it is signalled, up to its own per-turn
/// cap (`spec.md` §4.4 point 3).
pub struct Listener {
    address: AddressInfo,
    shared: Arc<Shared>,
    connected: mpsc::UnboundedSender<()>,
    pac: Arc<dyn PeerAllowanceChecker>,
    stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
    accept_task: Option<tokio::task::JoinHandle<()>>,
}

impl Listener {
    pub fn new(
        address: AddressInfo,
        pac: Arc<dyn PeerAllowanceChecker>,
        connected: mpsc::UnboundedSender<()>,
    ) -> Self {
        Self {
            address,
            shared: Arc::new(Shared {
                status: Mutex::new(ListenerStatus::Stopped),
                accepted: Mutex::new(VecDeque::new()),
            }),
            connected,
            pac,
            stop_tx: None,
            accept_task: None,
        }
    }

    pub fn address_info(&self) -> &AddressInfo {
        &self.address
    }

    pub fn status(&self) -> ListenerStatus {
        *self.shared.status.lock()
    }

    /// Binds and starts accepting; on failure, retries once a second
    /// until it succeeds or [`Listener::stop`] is called.
    pub async fn start(&mut self) {
        if self.status() != ListenerStatus::Stopped {
            return;
        }

        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();
        self.stop_tx = Some(stop_tx);

        let address = self.address.clone();
        let shared = self.shared.clone();
        let connected = self.connected.clone();
        let pac = self.pac.clone();

        self.accept_task = Some(tokio::spawn(async move {
            loop {
                let bind_result = bind(&address).await;
                let listener = match bind_result {
                    Ok(l) => {
                        *shared.status.lock() = ListenerStatus::Started;
                        info!(%address, "listener started");
                        l
                    }
                    Err(e) => {
                        warn!(%address, error = %e, "bind failed, retrying");
                        *shared.status.lock() = ListenerStatus::RetryingToStart;
                        tokio::select! {
                            _ = tokio::time::sleep(RETRY_INTERVAL) => continue,
                            _ = &mut stop_rx => return,
                        }
                    }
                };

                loop {
                    tokio::select! {
                        accepted = listener.accept() => {
                            let Ok((stream, peer)) = accepted else { continue };
                            if !pac.is_peer_allowed(peer) {
                                continue;
                            }
                            let was_empty = {
                                let mut q = shared.accepted.lock();
                                let was_empty = q.is_empty();
                                q.push_back((stream, peer));
                                was_empty
                            };
                            if was_empty {
                                let _ = connected.send(());
                            }
                        }
                        _ = &mut stop_rx => {
                            *shared.status.lock() = ListenerStatus::Stopped;
                            return;
                        }
                    }
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        *self.shared.status.lock() = ListenerStatus::Stopped;
        self.shared.accepted.lock().clear();
    }

    /// Drains one accepted socket, if any.
    pub fn take_accepted(&self) -> Option<(TcpStream, SocketAddr)> {
        self.shared.accepted.lock().pop_front()
    }

    pub fn has_accepted(&self) -> bool {
        !self.shared.accepted.lock().is_empty()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn bind(address: &AddressInfo) -> std::io::Result<TokioTcpListener> {
    if let Some(fd) = address.inherited_fd() {
        #[cfg(unix)]
        {
            use std::os::unix::io::FromRawFd;
            // Safety: the caller is responsible for `fd` being a valid,
            // already-listening socket handed down via socket activation.
            let std_listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
            std_listener.set_nonblocking(true)?;
            return TokioTcpListener::from_std(std_listener);
        }
        #[cfg(not(unix))]
        {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "socket activation requires unix",
            ));
        }
    }

    TokioTcpListener::bind((address.host.as_str(), address.port)).await
}
