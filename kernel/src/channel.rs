//! The channel: a mediator pumping bytes between a socket and a bound
//! adder/consumer pair, with a configurable high-water mark and progress
//! notification (`spec.md` §3, §4.3).

use std::time::Instant;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::buffer::{AddOutcome, Adder, ConsumeOutcome, Consumer, LockingBuffer, NoAdder, NoConsumer, PumpError};

/// High-water mark: the channel never holds more than this many unwritten
/// or unconsumed bytes per direction before pausing its own socket I/O.
pub const DEFAULT_HIGH_WATER_MARK: usize = 256 * 1024;

/// The error passed to a channel's `done_event`. `None` means a clean
/// shutdown (e.g. the adder reached end of stream and the consumer lost
/// interest).
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),
    #[error(transparent)]
    Pump(#[from] PumpError),
}

/// Informed of `(timestamp, bytes)` pairs after each successful transfer,
/// so the owning session can refresh its activity timestamp without the
/// channel needing to know anything about sessions.
pub trait ProgressNotifier: Send {
    fn socket_read(&mut self, at: Instant, bytes: usize);
    fn socket_written(&mut self, at: Instant, bytes: usize);
}

/// A notifier that does nothing; the default until a real one is bound.
pub struct NoProgress;
impl ProgressNotifier for NoProgress {
    fn socket_read(&mut self, _at: Instant, _bytes: usize) {}
    fn socket_written(&mut self, _at: Instant, _bytes: usize) {}
}

/// Pumps bytes between `socket` and exactly one bound adder (source) and
/// one bound consumer (sink). Call [`Channel::run`] to drive it to
/// completion; it returns when the socket is shut down in both
/// directions or an unrecoverable error occurs.
pub struct Channel<S> {
    socket: S,
    adder: Box<dyn Adder>,
    consumer: Box<dyn Consumer>,
    read_buf: LockingBuffer,
    write_buf: LockingBuffer,
    progress: Box<dyn ProgressNotifier>,
    high_water_mark: usize,
    write_shutdown: bool,
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(socket: S) -> Self {
        Self {
            socket,
            adder: Box::new(NoAdder),
            consumer: Box::new(NoConsumer),
            read_buf: LockingBuffer::new(),
            write_buf: LockingBuffer::new(),
            progress: Box::new(NoProgress),
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            write_shutdown: false,
        }
    }

    pub fn set_high_water_mark(&mut self, n: usize) {
        self.high_water_mark = n;
    }

    pub fn set_progress_notifier(&mut self, p: Box<dyn ProgressNotifier>) {
        self.progress = p;
    }

    /// Binds the outbound (adder) side. Only one adder may be bound at a
    /// time; binding a new one replaces the old.
    pub fn set_adder(&mut self, adder: Box<dyn Adder>) {
        self.adder = adder;
    }

    /// Binds the inbound (consumer) side.
    pub fn set_consumer(&mut self, consumer: Box<dyn Consumer>) {
        self.consumer = consumer;
    }

    pub fn read_buffer(&self) -> &LockingBuffer {
        &self.read_buf
    }

    pub fn write_buffer(&self) -> &LockingBuffer {
        &self.write_buf
    }

    /// Drains the adder into the write buffer and flushes the write
    /// buffer to the socket once. Returns `Ok(true)` if the adder reached
    /// end of stream (write-shutdown should be initiated), `Ok(false)` if
    /// there is more work to do, pumping should continue, or an error.
    async fn pump_outbound(&mut self) -> Result<bool, ChannelError> {
        loop {
            let outcome = {
                let mut buf = self.write_buf.lock();
                if buf.len() >= self.high_water_mark {
                    AddOutcome::BufferFull
                } else {
                    self.adder.add_to_buffer(&mut buf)?
                }
            };

            match outcome {
                AddOutcome::Produced => {
                    self.flush_write_buffer().await?;
                }
                AddOutcome::BufferFull => {
                    self.flush_write_buffer().await?;
                    return Ok(false);
                }
                AddOutcome::Pending => {
                    self.flush_write_buffer().await?;
                    return Ok(false);
                }
                AddOutcome::EndOfStream => {
                    self.flush_write_buffer().await?;
                    return Ok(true);
                }
            }
        }
    }

    async fn flush_write_buffer(&mut self) -> Result<(), ChannelError> {
        loop {
            let chunk_len = self.write_buf.lock().len();
            if chunk_len == 0 {
                return Ok(());
            }
            let written = {
                let buf = self.write_buf.lock();
                self.socket.write(&buf[..]).await?
            };
            if written == 0 {
                return Err(ChannelError::Socket(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "socket closed mid-write",
                )));
            }
            self.write_buf.lock().advance(written);
            self.progress.socket_written(Instant::now(), written);
        }
    }

    /// Reads one chunk from the socket into the read buffer, then drains
    /// the consumer until it reports no further interest or the buffer
    /// empties.
    async fn pump_inbound(&mut self) -> Result<(), ChannelError> {
        let mut scratch = [0u8; 64 * 1024];
        let n = self.socket.read(&mut scratch).await?;
        if n == 0 {
            return Err(ChannelError::Socket(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed connection",
            )));
        }
        self.read_buf.lock().extend_from_slice(&scratch[..n]);
        self.progress.socket_read(Instant::now(), n);

        loop {
            let outcome = {
                let mut buf = self.read_buf.lock();
                if buf.is_empty() {
                    return Ok(());
                }
                self.consumer.consume_buffer(&mut buf)?
            };
            match outcome {
                ConsumeOutcome::Consumed => continue,
                ConsumeOutcome::NoInterest => return Ok(()),
            }
        }
    }

    /// Drives the channel until a clean or erroneous shutdown. The
    /// returned `Option<ChannelError>` is the channel's `done_event`
    /// payload: `None` for a clean close.
    pub async fn run(&mut self) -> Option<ChannelError> {
        loop {
            if !self.write_shutdown {
                match self.pump_outbound().await {
                    Ok(true) => {
                        self.write_shutdown = true;
                        if let Err(e) = self.socket.shutdown().await {
                            return Some(ChannelError::Socket(e));
                        }
                    }
                    Ok(false) => {}
                    Err(e) => return Some(e),
                }
            }

            match self.pump_inbound().await {
                Ok(()) => {}
                Err(e) => return Some(e),
            }
        }
    }

    pub fn shutdown(self) -> S {
        self.socket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{AddOutcome, ConsumeOutcome, PumpResult};
    use tokio::io::duplex;

    struct StringAdder {
        data: BytesMut,
    }
    impl Adder for StringAdder {
        fn add_to_buffer(&mut self, buf: &mut BytesMut) -> PumpResult<AddOutcome> {
            if self.data.is_empty() {
                return Ok(AddOutcome::EndOfStream);
            }
            buf.extend_from_slice(&self.data);
            self.data.clear();
            Ok(AddOutcome::Produced)
        }
    }

    struct CollectConsumer {
        out: std::sync::Arc<parking_lot::Mutex<Vec<u8>>>,
    }
    impl Consumer for CollectConsumer {
        fn consume_buffer(&mut self, buf: &mut BytesMut) -> PumpResult<ConsumeOutcome> {
            self.out.lock().extend_from_slice(&buf[..]);
            buf.clear();
            Ok(ConsumeOutcome::Consumed)
        }
    }

    #[tokio::test]
    async fn conserves_bytes_larger_than_write_buffer() {
        let (client, server) = duplex(8);
        let mut channel = Channel::new(server);
        channel.set_high_water_mark(4);
        channel.set_adder(Box::new(StringAdder {
            data: BytesMut::from(&b"0123456789abcdef"[..]),
        }));

        let (mut client_r, mut client_w) = tokio::io::split(client);
        drop(client_w.shutdown().await);

        let run = tokio::spawn(async move { channel.run().await });

        let mut got = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client_r, &mut got)
            .await
            .unwrap();
        assert_eq!(got, b"0123456789abcdef".to_vec());

        run.await.unwrap();
    }
}
