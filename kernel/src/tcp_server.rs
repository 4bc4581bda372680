//! The TCP server: owns a set of listeners and a table of live sessions
//! (`spec.md` §4.4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::listener::{AddressInfo, AllowAll, Listener, PeerAllowanceChecker};
use crate::session::{Session, SessionFactory, SessionId};

/// At most this many sockets are accepted from one listener per turn of
/// the dispatch loop, so one listener under load can't starve the
/// others (`spec.md` §4.4).
const MAX_ACCEPTS_PER_TURN: usize = 10;

/// A locked view over the session table. Held for as long as the value
/// is alive; callers must not hold it across long operations
/// (`spec.md` §4.4 "Thread-safety").
pub struct SessionsGuard<'a, S> {
    guard: MutexGuard<'a, HashMap<SessionId, S>>,
}

impl<'a, S> SessionsGuard<'a, S> {
    pub fn get(&self, id: SessionId) -> Option<&S> {
        self.guard.get(&id)
    }

    pub fn len(&self) -> usize {
        self.guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SessionId, &S)> {
        self.guard.iter()
    }
}

/// Owns the set of listeners for a protocol and the sessions they spawn.
pub struct TcpServer<S: Session + 'static> {
    sessions: Arc<Mutex<HashMap<SessionId, S>>>,
    listeners: Vec<Listener>,
    next_id: AtomicU64,
    connected_tx: mpsc::UnboundedSender<()>,
    connected_rx: mpsc::UnboundedReceiver<()>,
    ended_tx: mpsc::UnboundedSender<(SessionId, Option<std::io::Error>)>,
    ended_rx: mpsc::UnboundedReceiver<(SessionId, Option<std::io::Error>)>,
    num_sessions: Arc<AtomicU64>,
}

impl<S: Session + 'static> TcpServer<S> {
    pub fn new() -> Self {
        let (connected_tx, connected_rx) = mpsc::unbounded_channel();
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            listeners: Vec::new(),
            next_id: AtomicU64::new(1),
            connected_tx,
            connected_rx,
            ended_tx,
            ended_rx,
            num_sessions: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Diffs `addresses` against the currently bound listeners, starting
    /// new ones and stopping ones no longer wanted, preserving overlap
    /// (`spec.md` §4.4 `set_listen_address_infos`).
    pub async fn set_listen_address_infos(
        &mut self,
        addresses: impl IntoIterator<Item = AddressInfo>,
        pac: Arc<dyn PeerAllowanceChecker>,
    ) {
        let wanted: Vec<AddressInfo> = addresses.into_iter().collect();

        self.listeners
            .retain(|l| wanted.contains(l.address_info()));

        for addr in wanted {
            if self.listeners.iter().any(|l| l.address_info() == &addr) {
                continue;
            }
            let mut listener = Listener::new(addr, pac.clone(), self.connected_tx.clone());
            listener.start().await;
            self.listeners.push(listener);
        }
    }

    pub async fn start_default(&mut self, address: AddressInfo) {
        self.set_listen_address_infos([address], Arc::new(AllowAll)).await;
    }

    pub fn ended_sender(&self) -> mpsc::UnboundedSender<(SessionId, Option<std::io::Error>)> {
        self.ended_tx.clone()
    }

    pub fn get_sessions(&self) -> SessionsGuard<'_, S> {
        SessionsGuard {
            guard: self.sessions.lock(),
        }
    }

    pub fn num_sessions(&self) -> u64 {
        self.num_sessions.load(Ordering::Relaxed)
    }

    /// Shuts down matching sessions; an empty `ids` means "all".
    pub async fn end_sessions(&self, ids: &[SessionId], err_msg: Option<&str>) -> usize {
        let targets: Vec<SessionId> = {
            let guard = self.sessions.lock();
            if ids.is_empty() {
                guard.keys().copied().collect()
            } else {
                ids.iter().copied().filter(|id| guard.contains_key(id)).collect()
            }
        };

        // Shutdown happens outside the lock: session destruction may
        // block (`spec.md` §4.4 point on `ended_event`).
        for id in &targets {
            let mut maybe_session = self.sessions.lock().remove(id);
            if let Some(session) = maybe_session.as_mut() {
                let err = err_msg.map(|m| std::io::Error::new(std::io::ErrorKind::Other, m));
                session.shutdown(err).await;
            }
        }

        targets.len()
    }

    /// Runs the accept-dispatch loop forever: on each `connected` signal,
    /// drains up to [`MAX_ACCEPTS_PER_TURN`] sockets from whichever
    /// listener has them, builds a session via `factory`, and records it.
    /// Also drains `ended` notifications and drops finished sessions.
    pub async fn run(&mut self, factory: impl SessionFactory<Session = S>) {
        loop {
            tokio::select! {
                Some(()) = self.connected_rx.recv() => {
                    self.drain_accepts(&factory).await;
                }
                Some((id, err)) = self.ended_rx.recv() => {
                    let removed = self.sessions.lock().remove(&id);
                    if removed.is_some() {
                        self.num_sessions.fetch_sub(1, Ordering::Relaxed);
                    }
                    match err {
                        Some(e) => warn!(session = id, error = %e, "session ended with error"),
                        None => info!(session = id, "session ended"),
                    }
                }
                else => break,
            }
        }
    }

    async fn drain_accepts(&mut self, factory: &impl SessionFactory<Session = S>) {
        let mut accepted_any = false;
        for listener in &self.listeners {
            let mut n = 0;
            while n < MAX_ACCEPTS_PER_TURN {
                let Some((stream, peer)) = listener.take_accepted() else {
                    break;
                };
                n += 1;
                accepted_any = true;

                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let session = factory
                    .make_session(id, stream, peer, self.ended_tx.clone())
                    .await;
                self.sessions.lock().insert(id, session);
                self.num_sessions.fetch_add(1, Ordering::Relaxed);
            }
            if listener.has_accepted() {
                // More sockets remain queued than we drained this turn;
                // re-post so we come back to this without starving
                // other listeners (`spec.md` §4.4 point 3).
                let _ = self.connected_tx.send(());
            }
        }
        let _ = accepted_any;
    }
}

impl<S: Session + 'static> Default for TcpServer<S> {
    fn default() -> Self {
        Self::new()
    }
}
