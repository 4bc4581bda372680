//! Buffer operators: the adder/consumer pair that sits on either side of a
//! [`crate::channel::Channel`], plus the locking byte buffer they share.
//!
//! The source's `add_to_buffer()`/`consume_buffer()` return a bare `int`
//! drawn from the alphabet `{0, ENODATA, ENOBUFS, EAGAIN, ECANCELED,
//! error}`. That is a domain-specific result type wearing an integer
//! costume; DESIGN NOTES §9 says as much. Here it is two small enums.

use bytes::BytesMut;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// The result of a successful `add_to_buffer()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Some bytes were produced into the buffer.
    Produced,
    /// End of stream (`ENODATA`): nothing more will ever be produced.
    EndOfStream,
    /// The buffer is full (`ENOBUFS`); the caller should drain it to the
    /// socket and retry.
    BufferFull,
    /// Nothing produced yet; the adder will call
    /// [`ReadyNotifier::notify`] when it has more to give (`EAGAIN`).
    Pending,
}

/// The result of a successful `consume_buffer()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Some bytes were consumed.
    Consumed,
    /// The consumer has lost interest in further bytes (`ECANCELED`);
    /// this is a no-op, not an error.
    NoInterest,
}

/// Low-level pump error vocabulary (`spec.md` §7, first vocabulary). These
/// are never shown to an HTTP client directly; they are a contract
/// between buffer operators and the channel that pumps them.
#[derive(Debug, Error)]
pub enum PumpError {
    #[error("fault in buffer operator")]
    Fault,
    #[error("invalid state transition")]
    Invalid,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type PumpResult<T> = Result<T, PumpError>;

/// Notifies a channel that a previously-`Pending` adder or consumer is now
/// ready to be called again. Cloned freely; firing it when nobody is
/// listening is harmless.
#[derive(Clone, Default)]
pub struct ReadyNotifier {
    inner: Arc<tokio::sync::Notify>,
}

impl ReadyNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.inner.notify_one();
    }

    pub async fn notified(&self) {
        self.inner.notified().await;
    }
}

/// Produces bytes into a shared buffer. One adder is bound to a channel at
/// a time (`spec.md` §3).
pub trait Adder: Send {
    /// Appends as many bytes as convenient to `buf` and reports the
    /// outcome. Must not block.
    fn add_to_buffer(&mut self, buf: &mut BytesMut) -> PumpResult<AddOutcome>;

    /// Lets the adder tell the channel how to wake it up after a
    /// `Pending` result. The default implementation ignores the
    /// notifier, which is only correct for adders that never return
    /// `Pending`.
    fn set_ready_notifier(&mut self, _notifier: ReadyNotifier) {}
}

/// Drains bytes from a shared buffer. One consumer is bound to a channel
/// at a time.
pub trait Consumer: Send {
    fn consume_buffer(&mut self, buf: &mut BytesMut) -> PumpResult<ConsumeOutcome>;

    fn set_ready_notifier(&mut self, _notifier: ReadyNotifier) {}
}

/// An adder that immediately reports end of stream. Used as the initial,
/// harmless placeholder before a real adder is bound.
pub struct NoAdder;

impl Adder for NoAdder {
    fn add_to_buffer(&mut self, _buf: &mut BytesMut) -> PumpResult<AddOutcome> {
        Ok(AddOutcome::EndOfStream)
    }
}

/// A consumer that has no interest in any bytes. Used as the initial
/// placeholder before a real consumer is bound.
pub struct NoConsumer;

impl Consumer for NoConsumer {
    fn consume_buffer(&mut self, _buf: &mut BytesMut) -> PumpResult<ConsumeOutcome> {
        Ok(ConsumeOutcome::NoInterest)
    }
}

/// A byte buffer behind a lock, granting mutual exclusion to its holder
/// via a scoped guard. Channels are single-task in this rewrite so the
/// lock never actually contends, but keeping the type preserves the
/// "scoped acquisition handle" shape the rest of the pump is built around
/// (and lets an adder/consumer implemented on another task touch the
/// buffer safely, which the trait objects above don't rule out).
#[derive(Clone, Default)]
pub struct LockingBuffer {
    inner: Arc<Mutex<BytesMut>>,
}

impl LockingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> parking_lot::MutexGuard<'_, BytesMut> {
        self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locking_buffer_round_trips() {
        let buf = LockingBuffer::new();
        buf.lock().extend_from_slice(b"hello");
        assert_eq!(&buf.lock()[..], b"hello");
    }

    #[tokio::test]
    async fn ready_notifier_wakes_waiter() {
        let notifier = ReadyNotifier::new();
        let waiter = notifier.clone();
        let task = tokio::spawn(async move { waiter.notified().await });
        notifier.notify();
        task.await.unwrap();
    }
}
