//! The seam between the session's byte-pump and protocol logic
//! (`spec.md` §4.7 "handlers"): a [`TransactionHandler`] gets a
//! [`SharedTransaction`] to read the request from and drive the
//! response on, plus a [`RequestBody`] it can use to opt into reading
//! the request body — mirroring the source's `receive_body(sink)`
//! call, which is likewise optional and pull-based.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use fileport_kernel::Consumer;

use crate::consumer::{ConsumerEvent, MessageConsumer};
use crate::error::HttpError;
use crate::request::HttpVersion;
use crate::responder::Responder;
use crate::transaction::SharedTransaction;

/// Handle to the still-arriving request body, lent to a
/// [`TransactionHandler`] for the lifetime of one `handle_transaction`
/// call. Reading through it is the only way body bytes get pulled off
/// the wire (`spec.md` §4.5 "until it does, body bytes are not
/// consumed").
pub struct RequestBody<'a> {
    read_half: &'a mut (dyn AsyncRead + Unpin + Send),
    write_half: &'a mut (dyn AsyncWrite + Unpin + Send),
    buf: &'a mut BytesMut,
    consumer: &'a mut MessageConsumer,
    version: HttpVersion,
    activity_timeout: std::time::Duration,
}

impl<'a> RequestBody<'a> {
    pub fn new(
        read_half: &'a mut (dyn AsyncRead + Unpin + Send),
        write_half: &'a mut (dyn AsyncWrite + Unpin + Send),
        buf: &'a mut BytesMut,
        consumer: &'a mut MessageConsumer,
        version: HttpVersion,
        activity_timeout: std::time::Duration,
    ) -> Self {
        Self {
            read_half,
            write_half,
            buf,
            consumer,
            version,
            activity_timeout,
        }
    }

    pub fn has_no_body(&self) -> bool {
        self.consumer.has_no_body()
    }

    /// Writes the `100 Continue` interim response immediately, ahead of
    /// the real status line (`spec.md` §4.5 "Expect: 100-continue").
    /// Handlers call this themselves after inspecting the `Expect`
    /// header, the same way `file_server.cpp::handle_transaction` does.
    pub async fn send_continue(&mut self) -> std::io::Result<()> {
        self.write_half.write_all(Responder::continue_line(self.version)).await
    }

    /// Pulls body bytes off the wire and feeds them to `sink` until end
    /// of body, backpressure-free (`sink` decides whether it still
    /// wants bytes via [`fileport_kernel::ConsumeOutcome`]).
    pub async fn receive_into(&mut self, sink: &mut dyn Consumer) -> Result<(), HttpError> {
        self.consumer.request_body();
        loop {
            match self.consumer.feed(self.buf)? {
                ConsumerEvent::NeedMoreBytes => read_more(self.read_half, self.buf, self.activity_timeout).await?,
                ConsumerEvent::BodyData(data) => {
                    if feed_sink(sink, data)?.is_done() {
                        return Ok(());
                    }
                }
                ConsumerEvent::BodyEnd => return Ok(()),
                ConsumerEvent::HeadersReady(_) => {
                    return Err(HttpError::Protocol("unexpected HeadersReady while reading a body"))
                }
            }
        }
    }

    /// Discards whatever body remains unread (used by the session
    /// between transactions so leftover bytes from a handler that never
    /// called [`RequestBody::receive_into`] don't get parsed as the
    /// next request line).
    pub async fn discard_remaining(&mut self) -> Result<(), HttpError> {
        if self.consumer.is_done() {
            return Ok(());
        }
        self.consumer.request_body();
        loop {
            match self.consumer.feed(self.buf)? {
                ConsumerEvent::NeedMoreBytes => read_more(self.read_half, self.buf, self.activity_timeout).await?,
                ConsumerEvent::BodyData(_) => {}
                ConsumerEvent::BodyEnd => return Ok(()),
                ConsumerEvent::HeadersReady(_) => {
                    return Err(HttpError::Protocol("unexpected HeadersReady while draining a body"))
                }
            }
        }
    }
}

enum SinkState {
    StillInterested,
    Done,
}

impl SinkState {
    fn is_done(&self) -> bool {
        matches!(self, SinkState::Done)
    }
}

fn feed_sink(sink: &mut dyn Consumer, data: Bytes) -> Result<SinkState, HttpError> {
    use fileport_kernel::ConsumeOutcome;

    let mut chunk = BytesMut::from(&data[..]);
    while !chunk.is_empty() {
        match sink.consume_buffer(&mut chunk).map_err(|_| HttpError::internal("body sink rejected data"))? {
            ConsumeOutcome::Consumed => {
                if chunk.is_empty() {
                    return Ok(SinkState::StillInterested);
                }
            }
            ConsumeOutcome::NoInterest => return Ok(SinkState::Done),
        }
    }
    Ok(SinkState::StillInterested)
}

/// Reads one chunk from the socket, bounded by `timeout` (`spec.md`
/// §4.10 "activity timer"). A zero-length read or a timeout both mean
/// the connection is dead from the session's point of view.
pub(crate) async fn read_more(
    read_half: &mut (dyn AsyncRead + Unpin + Send),
    buf: &mut BytesMut,
    timeout: std::time::Duration,
) -> Result<(), HttpError> {
    use tokio::io::AsyncReadExt;

    let mut scratch = [0u8; 16 * 1024];
    let n = tokio::time::timeout(timeout, read_half.read(&mut scratch))
        .await
        .map_err(|_| HttpError::Parse {
            status: 408,
            reason: "Request Timeout",
        })??;
    if n == 0 {
        return Err(HttpError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed mid-request",
        )));
    }
    buf.extend_from_slice(&scratch[..n]);
    Ok(())
}

/// Dispatches a parsed transaction to protocol logic (`spec.md` §4.7
/// "router"/"rewriter"/handlers all implement this). Implementations
/// read `txn.lock().request` and drive `txn.lock().responder`;
/// `body` is how they opt into reading whatever request body follows.
#[async_trait::async_trait]
pub trait TransactionHandler: Send + Sync {
    async fn handle_transaction(&self, txn: SharedTransaction, body: &mut RequestBody<'_>);
}
