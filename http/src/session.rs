//! Wires one accepted socket to the parser/handler/responder pipeline
//! (`spec.md` §4.6 "HTTP session"): one [`tokio::task`] per connection
//! plays the role the source gives a single event-loop-bound session
//! object, parsing transactions back-to-back until the peer goes away,
//! `Connection: close` is negotiated, or the owning
//! [`fileport_kernel::TcpServer`] asks it to stop.
//!
//! Unlike [`crate::channel`]-style duplex pumping, request parsing and
//! response writing don't run concurrently on the same connection: a
//! transaction's response is fully drained to the socket before the
//! next request line is parsed, matching `spec.md` §4.6's "one
//! in-flight transaction per connection" (no HTTP pipelining).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;

use fileport_kernel::{AddOutcome, Adder, ReadyNotifier, Session, SessionFactory, SessionId};

use crate::consumer::{ConsumerEvent, MessageConsumer};
use crate::error::HttpError;
use crate::handler::{RequestBody, TransactionHandler};
use crate::request::{HttpVersion, Request};
use crate::responder::Responder;
use crate::transaction::{self, Transaction};

const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(300);

/// Builds an [`HttpSession`] per accepted connection (`spec.md` §4.6),
/// optionally terminating TLS first so the same `run_http_session`
/// loop serves both plaintext and HTTPS listeners.
pub struct HttpSessionFactory {
    router: Arc<dyn TransactionHandler>,
    tls: Option<Arc<rustls::ServerConfig>>,
    activity_timeout: Duration,
    keepalive_timeout: Duration,
}

impl HttpSessionFactory {
    pub fn new(router: Arc<dyn TransactionHandler>) -> Self {
        Self {
            router,
            tls: None,
            activity_timeout: DEFAULT_ACTIVITY_TIMEOUT,
            keepalive_timeout: DEFAULT_KEEPALIVE_TIMEOUT,
        }
    }

    pub fn with_tls(mut self, config: Arc<rustls::ServerConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    pub fn with_timeouts(mut self, activity: Duration, keepalive: Duration) -> Self {
        self.activity_timeout = activity;
        self.keepalive_timeout = keepalive;
        self
    }
}

#[async_trait::async_trait]
impl SessionFactory for HttpSessionFactory {
    type Session = HttpSession;

    async fn make_session(
        &self,
        id: SessionId,
        socket: tokio::net::TcpStream,
        peer_addr: SocketAddr,
        ended: tokio::sync::mpsc::UnboundedSender<(SessionId, Option<std::io::Error>)>,
    ) -> HttpSession {
        let router = self.router.clone();
        let tls = self.tls.clone();
        let activity_timeout = self.activity_timeout;
        let keepalive_timeout = self.keepalive_timeout;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            match tls {
                Some(config) => {
                    let acceptor = tokio_rustls::TlsAcceptor::from(config);
                    match acceptor.accept(socket).await {
                        Ok(stream) => {
                            run_http_session(
                                stream,
                                peer_addr,
                                true,
                                router,
                                activity_timeout,
                                keepalive_timeout,
                                &mut shutdown_rx,
                            )
                            .await
                        }
                        Err(e) => tracing::warn!(error = %e, "TLS handshake failed"),
                    }
                }
                None => {
                    run_http_session(
                        socket,
                        peer_addr,
                        false,
                        router,
                        activity_timeout,
                        keepalive_timeout,
                        &mut shutdown_rx,
                    )
                    .await
                }
            }
            let _ = ended.send((id, None));
        });

        HttpSession {
            id,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// The [`fileport_kernel::Session`] handle a [`fileport_kernel::TcpServer`]
/// holds; the actual protocol loop runs in a spawned task
/// ([`run_http_session`]), not on this struct.
pub struct HttpSession {
    id: SessionId,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

#[async_trait::async_trait]
impl Session for HttpSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn shutdown(&mut self, _err: Option<std::io::Error>) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// `spec.md` §4.6 "keep-alive negotiation": HTTP/1.1 defaults to
/// keep-alive unless `Connection: close` is sent; HTTP/1.0 defaults to
/// close unless the client explicitly asks for keep-alive
/// (`SPEC_FULL.md` §C "HTTP/1.0 keep-alive is rejected by default").
fn determine_keep_alive(request: &Request) -> bool {
    let connection = request.headers.get("connection").map(|v| v.as_list());
    match request.version {
        HttpVersion::Http11 => !connection
            .map(|list| list.iter().any(|v| v.eq_ignore_ascii_case("close")))
            .unwrap_or(false),
        HttpVersion::Http10 => connection
            .map(|list| list.iter().any(|v| v.eq_ignore_ascii_case("keep-alive")))
            .unwrap_or(false),
    }
}

enum ReadChunk {
    Data(BytesMut),
    Eof,
    TimedOut,
}

async fn read_chunk(
    read_half: &mut (dyn AsyncRead + Unpin + Send),
    timeout: Duration,
) -> std::io::Result<ReadChunk> {
    let mut scratch = [0u8; 16 * 1024];
    match tokio::time::timeout(timeout, read_half.read(&mut scratch)).await {
        Err(_) => Ok(ReadChunk::TimedOut),
        Ok(Ok(0)) => Ok(ReadChunk::Eof),
        Ok(Ok(n)) => Ok(ReadChunk::Data(BytesMut::from(&scratch[..n]))),
        Ok(Err(e)) => Err(e),
    }
}

/// Parses the next request start-line-through-headers, racing the
/// session's shutdown signal. `Ok(None)` means the connection ended
/// cleanly (EOF, or a keepalive timeout with nothing parsed yet —
/// `spec.md` §4.10 "the keepalive timer runs between transactions").
/// `Err` carries a synthetic response to send before closing (`spec.md`
/// §4.10 "If activity expires while waiting_for_code_and_reason, a 408
/// ... is sent before shutdown", and malformed-request parse errors).
async fn read_request(
    read_half: &mut (dyn AsyncRead + Unpin + Send),
    buf: &mut BytesMut,
    consumer: &mut MessageConsumer,
    activity_timeout: Duration,
    keepalive_timeout: Duration,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> Result<Option<Request>, HttpError> {
    let mut parsing_started = false;

    loop {
        match consumer.feed(buf)? {
            ConsumerEvent::HeadersReady(request) => return Ok(Some(request)),
            ConsumerEvent::NeedMoreBytes => {
                let timeout = if parsing_started || !buf.is_empty() {
                    activity_timeout
                } else {
                    keepalive_timeout
                };

                tokio::select! {
                    biased;
                    _ = &mut *shutdown_rx => return Ok(None),
                    chunk = read_chunk(read_half, timeout) => match chunk? {
                        ReadChunk::Data(data) => {
                            parsing_started = true;
                            buf.extend_from_slice(&data);
                        }
                        ReadChunk::Eof => return Ok(None),
                        ReadChunk::TimedOut if !parsing_started => return Ok(None),
                        ReadChunk::TimedOut => {
                            return Err(HttpError::Parse { status: 408, reason: "Request Timeout" })
                        }
                    },
                }
            }
            ConsumerEvent::BodyData(_) | ConsumerEvent::BodyEnd => {
                return Err(HttpError::Protocol("consumer yielded a body event before headers were ready"))
            }
        }
    }
}

async fn write_error_response(write_half: &mut (dyn AsyncWrite + Unpin + Send), status: u16, reason: &str) {
    let body = format!("{reason}\n");
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    let _ = write_half.write_all(response.as_bytes()).await;
}

/// Drains the responder (itself an [`Adder`]) to the socket, waiting on
/// its [`ReadyNotifier`] whenever it reports `Pending` (`spec.md` §4.3
/// "EAGAIN") rather than busy-polling.
async fn drain_responder(
    txn: &transaction::SharedTransaction,
    write_half: &mut (dyn AsyncWrite + Unpin + Send),
) -> std::io::Result<()> {
    let notifier = ReadyNotifier::new();
    txn.lock().responder.set_ready_notifier(notifier.clone());

    loop {
        let (outcome, chunk) = {
            let mut guard = txn.lock();
            let mut scratch = BytesMut::new();
            let outcome = guard
                .responder
                .add_to_buffer(&mut scratch)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
            (outcome, scratch)
        };

        match outcome {
            AddOutcome::Produced | AddOutcome::BufferFull => {
                write_half.write_all(&chunk).await?;
            }
            AddOutcome::EndOfStream => {
                write_half.write_all(&chunk).await?;
                return Ok(());
            }
            AddOutcome::Pending => notifier.notified().await,
        }
    }
}

/// The per-connection HTTP loop: parse a transaction, dispatch it,
/// drain whatever body bytes the handler didn't read, write the
/// response, and either loop for the next transaction (keep-alive) or
/// tear the connection down.
pub async fn run_http_session<S>(
    socket: S,
    peer_addr: SocketAddr,
    is_secure: bool,
    router: Arc<dyn TransactionHandler>,
    activity_timeout: Duration,
    keepalive_timeout: Duration,
    shutdown_rx: &mut oneshot::Receiver<()>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut read_half, mut write_half) = tokio::io::split(socket);

    let mut buf = BytesMut::new();

    loop {
        let mut consumer = MessageConsumer::new(peer_addr, is_secure);

        let request = match read_request(
            &mut read_half,
            &mut buf,
            &mut consumer,
            activity_timeout,
            keepalive_timeout,
            shutdown_rx,
        )
        .await
        {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(e) => {
                let (status, reason) = e.response_status();
                write_error_response(&mut write_half, status, reason).await;
                return;
            }
        };

        let version = request.version;
        let keep_alive_requested = determine_keep_alive(&request);
        let suppress_body = request.is_head();
        let responder = Responder::new(version, suppress_body, keep_alive_requested);
        let txn = transaction::shared(Transaction::new(request, responder));

        {
            let mut body = RequestBody::new(
                &mut read_half,
                &mut write_half,
                &mut buf,
                &mut consumer,
                version,
                activity_timeout,
            );
            router.handle_transaction(txn.clone(), &mut body).await;
            if body.discard_remaining().await.is_err() {
                return;
            }
        }

        if drain_responder(&txn, &mut write_half).await.is_err() {
            return;
        }

        let keep_alive = txn.lock().responder.keep_alive();
        if !keep_alive {
            let _ = write_half.shutdown().await;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Echo;

    #[async_trait::async_trait]
    impl TransactionHandler for Echo {
        async fn handle_transaction(&self, txn: transaction::SharedTransaction, _body: &mut RequestBody<'_>) {
            let mut guard = txn.lock();
            guard.responder.send_status(200, "OK");
            guard.responder.send_body_str("hi");
        }
    }

    #[tokio::test]
    async fn serves_one_request_then_closes_without_keep_alive() {
        let (client, server) = tokio::io::duplex(4096);
        let (_shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let server_task = tokio::spawn(async move {
            run_http_session(
                server,
                "127.0.0.1:1".parse().unwrap(),
                false,
                Arc::new(Echo),
                Duration::from_secs(5),
                Duration::from_secs(5),
                &mut shutdown_rx,
            )
            .await;
        });

        let (mut read_half, mut write_half) = tokio::io::split(client);
        write_half
            .write_all(b"GET / HTTP/1.1\r\nHost: t\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let mut response = Vec::new();
        read_half.read_to_end(&mut response).await.unwrap();
        server_task.await.unwrap();

        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("hi"));
    }

    #[tokio::test]
    async fn keeps_connection_open_for_http11_default() {
        let (client, server) = tokio::io::duplex(4096);
        let (_shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let server_task = tokio::spawn(async move {
            run_http_session(
                server,
                "127.0.0.1:1".parse().unwrap(),
                false,
                Arc::new(Echo),
                Duration::from_secs(5),
                Duration::from_secs(5),
                &mut shutdown_rx,
            )
            .await;
        });

        let (mut read_half, mut write_half) = tokio::io::split(client);
        write_half.write_all(b"GET / HTTP/1.1\r\nHost: t\r\n\r\n").await.unwrap();

        let mut scratch = [0u8; 256];
        let n = read_half.read(&mut scratch).await.unwrap();
        let text = String::from_utf8_lossy(&scratch[..n]);
        assert!(text.contains("Connection: keep-alive"));

        drop(write_half);
        drop(read_half);
        let _ = server_task.await;
    }
}
