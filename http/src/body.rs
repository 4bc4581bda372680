//! Concrete `Adder`/`Consumer` implementations used as response-body
//! sources and request-body sinks (`spec.md` §3 "Adder / Consumer",
//! grounded on `buffer_operator/file_reader.hpp`/`file_writer.hpp`).
//!
//! File I/O can't be driven synchronously from inside `add_to_buffer`/
//! `consume_buffer` without blocking the loop thread (`spec.md` §4.1
//! "no handler may block on I/O"), so [`FileAdder`]/[`FileConsumer`] each
//! hand the actual `tokio::fs` handle to a background task and talk to it
//! over a queue; `add_to_buffer` reports `Pending`/registers the
//! [`ReadyNotifier`] exactly as `spec.md` §4.3 describes for the `EAGAIN`
//! case, rather than blocking the calling task.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use fileport_kernel::{AddOutcome, Adder, ConsumeOutcome, Consumer, PumpError, PumpResult, ReadyNotifier};

/// Produces the bytes of an in-memory string (`spec.md` §4.6
/// `send_body(str)`).
pub struct StringAdder {
    data: Vec<u8>,
    pos: usize,
}

impl StringAdder {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }
}

impl Adder for StringAdder {
    fn add_to_buffer(&mut self, buf: &mut BytesMut) -> PumpResult<AddOutcome> {
        if self.pos >= self.data.len() {
            return Ok(AddOutcome::EndOfStream);
        }
        buf.put_slice(&self.data[self.pos..]);
        self.pos = self.data.len();
        Ok(AddOutcome::Produced)
    }
}

struct ReadQueue {
    chunks: Mutex<VecDeque<Bytes>>,
    eof: AtomicBool,
    error: Mutex<Option<std::io::Error>>,
}

/// Streams a file as a response body (`spec.md` §4.6 `send_body(file)`),
/// grounded on `buffer_operator/file_reader.hpp`.
pub struct FileAdder {
    queue: Arc<ReadQueue>,
    notifier: ReadyNotifier,
    started: bool,
    reader: Option<Box<dyn AsyncRead + Send + Unpin>>,
}

impl FileAdder {
    pub fn new(reader: Box<dyn AsyncRead + Send + Unpin>) -> Self {
        Self {
            queue: Arc::new(ReadQueue {
                chunks: Mutex::new(VecDeque::new()),
                eof: AtomicBool::new(false),
                error: Mutex::new(None),
            }),
            notifier: ReadyNotifier::new(),
            started: false,
            reader: Some(reader),
        }
    }

    fn ensure_started(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let queue = self.queue.clone();
        let notifier = self.notifier.clone();
        let mut reader = self.reader.take().expect("reader taken exactly once");
        tokio::spawn(async move {
            let mut scratch = vec![0u8; 64 * 1024];
            loop {
                match reader.read(&mut scratch).await {
                    Ok(0) => {
                        queue.eof.store(true, Ordering::Release);
                        notifier.notify();
                        return;
                    }
                    Ok(n) => {
                        queue.chunks.lock().push_back(Bytes::copy_from_slice(&scratch[..n]));
                        notifier.notify();
                    }
                    Err(e) => {
                        *queue.error.lock() = Some(e);
                        notifier.notify();
                        return;
                    }
                }
            }
        });
    }
}

impl Adder for FileAdder {
    fn add_to_buffer(&mut self, buf: &mut BytesMut) -> PumpResult<AddOutcome> {
        self.ensure_started();

        if let Some(e) = self.queue.error.lock().take() {
            return Err(PumpError::Io(e));
        }

        if let Some(chunk) = self.queue.chunks.lock().pop_front() {
            buf.put_slice(&chunk);
            return Ok(AddOutcome::Produced);
        }

        if self.queue.eof.load(Ordering::Acquire) {
            return Ok(AddOutcome::EndOfStream);
        }

        Ok(AddOutcome::Pending)
    }

    fn set_ready_notifier(&mut self, notifier: ReadyNotifier) {
        self.notifier = notifier;
    }
}

/// Collects a request body into an in-memory buffer (`spec.md`
/// `receive_body(sink)` with a `std::string` sink, used by the
/// authorizator's `/token`/`/revoke` handlers).
pub struct StringConsumer {
    buf: Vec<u8>,
    max_len: usize,
}

impl StringConsumer {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_len,
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl Consumer for StringConsumer {
    fn consume_buffer(&mut self, buf: &mut BytesMut) -> PumpResult<ConsumeOutcome> {
        if self.buf.len() + buf.len() > self.max_len {
            return Err(PumpError::Invalid);
        }
        self.buf.extend_from_slice(&buf[..]);
        buf.clear();
        Ok(ConsumeOutcome::Consumed)
    }
}

/// Writes a request body straight to a file (`spec.md` `receive_body(sink)`
/// with a file sink, used by `PUT`), via the same background-task pattern
/// as [`FileAdder`] so `consume_buffer` never blocks on disk I/O.
pub struct FileConsumer {
    tx: mpsc::UnboundedSender<Bytes>,
    error: Arc<Mutex<Option<std::io::Error>>>,
    done: Arc<tokio::sync::Notify>,
}

impl FileConsumer {
    pub fn new(writer: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let error = Arc::new(Mutex::new(None));
        let done = Arc::new(tokio::sync::Notify::new());

        let error_task = error.clone();
        let done_task = done.clone();
        tokio::spawn(async move {
            let mut writer = writer;
            while let Some(chunk) = rx.recv().await {
                if let Err(e) = writer.write_all(&chunk).await {
                    *error_task.lock() = Some(e);
                    break;
                }
            }
            let _ = writer.flush().await;
            done_task.notify_waiters();
        });

        Self { tx, error, done }
    }

    /// Signals end of input and waits for the background task to flush
    /// and exit, surfacing any write error it hit.
    pub async fn finish(self) -> std::io::Result<()> {
        drop(self.tx);
        self.done.notified().await;
        if let Some(e) = self.error.lock().take() {
            return Err(e);
        }
        Ok(())
    }
}

impl Consumer for FileConsumer {
    fn consume_buffer(&mut self, buf: &mut BytesMut) -> PumpResult<ConsumeOutcome> {
        if let Some(e) = self.error.lock().take() {
            return Err(PumpError::Io(e));
        }
        if buf.is_empty() {
            return Ok(ConsumeOutcome::Consumed);
        }
        let chunk = buf.split().freeze();
        // An unbounded channel means this never blocks; the spec's
        // consumer contract only promises "accepted", not "durable".
        let _ = self.tx.send(chunk);
        Ok(ConsumeOutcome::Consumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_adder_produces_then_ends() {
        let mut a = StringAdder::new(b"hi".to_vec());
        let mut buf = BytesMut::new();
        assert!(matches!(a.add_to_buffer(&mut buf).unwrap(), AddOutcome::Produced));
        assert_eq!(&buf[..], b"hi");
        assert!(matches!(a.add_to_buffer(&mut buf).unwrap(), AddOutcome::EndOfStream));
    }

    #[test]
    fn string_consumer_rejects_oversized_body() {
        let mut c = StringConsumer::new(4);
        let mut buf = BytesMut::from(&b"12345"[..]);
        assert!(c.consume_buffer(&mut buf).is_err());
    }

    #[tokio::test]
    async fn file_adder_streams_then_ends() {
        let data = b"streamed bytes".to_vec();
        let mut adder = FileAdder::new(Box::new(std::io::Cursor::new(data.clone())));
        let mut collected = Vec::new();
        loop {
            let mut buf = BytesMut::new();
            match adder.add_to_buffer(&mut buf).unwrap() {
                AddOutcome::Produced => collected.extend_from_slice(&buf),
                AddOutcome::EndOfStream => break,
                AddOutcome::Pending => tokio::task::yield_now().await,
                AddOutcome::BufferFull => unreachable!(),
            }
        }
        assert_eq!(collected, data);
    }

    #[tokio::test]
    async fn file_consumer_writes_and_flushes() {
        let sink = Vec::<u8>::new();
        let cursor = std::io::Cursor::new(sink);
        let shared = Arc::new(tokio::sync::Mutex::new(cursor));
        struct SharedWriter(Arc<tokio::sync::Mutex<std::io::Cursor<Vec<u8>>>>);
        impl AsyncWrite for SharedWriter {
            fn poll_write(
                self: std::pin::Pin<&mut Self>,
                cx: &mut std::task::Context<'_>,
                buf: &[u8],
            ) -> std::task::Poll<std::io::Result<usize>> {
                let mut guard = match self.0.try_lock() {
                    Ok(g) => g,
                    Err(_) => {
                        cx.waker().wake_by_ref();
                        return std::task::Poll::Pending;
                    }
                };
                use std::io::Write;
                std::task::Poll::Ready(guard.write(buf))
            }
            fn poll_flush(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Ok(()))
            }
            fn poll_shutdown(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Ok(()))
            }
        }

        let mut consumer = FileConsumer::new(Box::new(SharedWriter(shared.clone())));
        let mut buf = BytesMut::from(&b"payload"[..]);
        consumer.consume_buffer(&mut buf).unwrap();
        consumer.finish().await.unwrap();

        assert_eq!(shared.lock().await.get_ref(), b"payload");
    }
}
