//! The receiver primitive: a typed, one-shot continuation handle bound to
//! the lifetime of a "handler" (a task that owns a queue of invocations).
//!
//! The C++ original (`receiver_handle<E>`, `shared_receiver_context`,
//! `enabled_for_receiving`) models this with an intrusive list of raw
//! receiver objects owned by the handler, deleted by the handler's
//! destructor. In Rust, `Arc`/`Weak` plus `tokio::sync::oneshot` give the
//! same contract for free: a handle holds a `Weak` reference to the
//! handler context, and the oneshot channel itself already implements
//! "destroying an unactivated handle cancels the continuation" (dropping
//! the sender makes the receiver's `.await` resolve to `Err`). No
//! intrusive list or generation counter is needed to avoid use-after-free
//! because ownership (not manual bookkeeping) guarantees it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, oneshot};

/// A closure posted to a handler's loop via [`HandlerHandle::invoke_later`].
pub type Invocation = Box<dyn FnOnce() + Send + 'static>;

struct HandlerInner {
    id: u64,
    queue: mpsc::UnboundedSender<Invocation>,
}

/// Shared context owned by a handler (a session, an authorizator worker,
/// ...). Cloning is cheap; handing out [`ReceiverHandle`]s only ever hands
/// out a [`Weak`] view of this, so a handler that is torn down makes every
/// outstanding handle inert without any explicit bookkeeping.
#[derive(Clone)]
pub struct HandlerHandle {
    inner: Arc<HandlerInner>,
}

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

impl HandlerHandle {
    /// Constructs a handler context plus the receiving half of its
    /// invocation queue. The owner is expected to drive the returned
    /// queue in a loop (`while let Some(f) = queue.recv().await { f() }`)
    /// for as long as the handler is alive.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Invocation>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed);
        (
            Self {
                inner: Arc::new(HandlerInner { id, queue: tx }),
            },
            rx,
        )
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Posts a closure for execution on the handler's own loop. Used to
    /// re-enter the loop after a tricky state transition, mirroring
    /// `invoke_later` in the source.
    pub fn invoke_later(&self, f: impl FnOnce() + Send + 'static) {
        // A closed queue means the handler is gone; dropping `f` silently
        // is correct; there is nobody left to run it for.
        let _ = self.inner.queue.send(Box::new(f));
    }

    fn downgrade(&self) -> Weak<HandlerInner> {
        Arc::downgrade(&self.inner)
    }

    /// Creates a non-reentrant receiver/handle pair bound to this handler.
    /// The handle may be activated exactly once; dropping it unactivated
    /// cancels the continuation.
    pub fn receive<T: Send + 'static>(&self) -> (ReceiverHandle<T>, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            ReceiverHandle {
                ctx: self.downgrade(),
                tx: Some(tx),
            },
            rx,
        )
    }
}

/// A typed one-shot continuation handle. Activating it (`activate`)
/// constructs the value and hands it to whatever is awaiting the paired
/// `oneshot::Receiver`. Re-activating, or activating after the owning
/// handler has been torn down, is a documented no-op.
pub struct ReceiverHandle<T> {
    ctx: Weak<HandlerInner>,
    tx: Option<oneshot::Sender<T>>,
}

impl<T> ReceiverHandle<T> {
    /// Activates the handle with `value`. A no-op if already activated or
    /// if the handler this handle was issued against no longer exists.
    pub fn activate(mut self, value: T) {
        if self.ctx.upgrade().is_none() {
            return;
        }
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(value);
        }
    }

    /// True if the owning handler is still alive.
    pub fn is_live(&self) -> bool {
        self.ctx.upgrade().is_some()
    }
}

/// Drives a nested wait for a single receiver to fire, optionally bounded
/// by a timeout. Mirrors `sync_receive`/`sync_timeout_receive`: the
/// caller's task is suspended (not spinning) until either the receiver
/// resolves or the timeout elapses, returning `true` for "timed out".
pub async fn sync_timeout_receive<T>(
    rx: oneshot::Receiver<T>,
    timeout: std::time::Duration,
) -> (Option<T>, bool) {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(v)) => (Some(v), false),
        Ok(Err(_)) => (None, false),
        Err(_) => (None, true),
    }
}

/// Runs a reentrant receive loop: each time the paired handle is
/// activated, `f` is invoked with a *fresh* handle/receiver pair so the
/// loop may continue without reallocating a fresh continuation's
/// plumbing by hand. Used by the channel pump for the `EAGAIN` "the adder
/// promises to post an event when ready" protocol.
pub async fn reentrant_loop<T, Fut>(
    handler: &HandlerHandle,
    mut f: impl FnMut(ReceiverHandle<T>) -> Fut,
) where
    T: Send + 'static,
    Fut: std::future::Future<Output = ReentrantControl>,
{
    loop {
        let (handle, rx) = handler.receive::<T>();
        match f(handle).await {
            ReentrantControl::Continue => {
                // `f` is expected to have consumed or dropped `rx` itself
                // (typically by awaiting it before returning `Continue`).
                drop(rx);
                continue;
            }
            ReentrantControl::Stop => break,
        }
    }
}

/// Returned by a reentrant receive callback to decide whether the loop
/// keeps going.
pub enum ReentrantControl {
    Continue,
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn activation_delivers_value_once() {
        let (handler, mut queue) = HandlerHandle::new();
        tokio::spawn(async move { while let Some(f) = queue.recv().await { f() } });

        let (handle, rx) = handler.receive::<u32>();
        handle.activate(42);
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn dropping_unactivated_handle_cancels() {
        let (handler, mut queue) = HandlerHandle::new();
        tokio::spawn(async move { while let Some(f) = queue.recv().await { f() } });

        let (handle, rx) = handler.receive::<u32>();
        drop(handle);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn activation_after_handler_death_is_noop() {
        let (handler, queue) = HandlerHandle::new();
        drop(queue);

        let (handle, rx) = handler.receive::<u32>();
        drop(handler);
        handle.activate(7);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn sync_timeout_receive_reports_timeout() {
        let (_tx, rx) = oneshot::channel::<u32>();
        let (value, timed_out) =
            sync_timeout_receive(rx, std::time::Duration::from_millis(10)).await;
        assert!(value.is_none());
        assert!(timed_out);
    }
}
