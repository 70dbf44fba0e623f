//! Dial-out client
//!
//! The client is the manager's twin for outbound connections: the same
//! bounded outbound queue, write pump with ping ticker, read pump with a
//! rolling pong deadline, and single-flag termination, over a dialed
//! tokio-tungstenite stream instead of an upgraded one. Callbacks use the
//! client-variant signatures (no session argument).

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::callbacks::{load, store};
use crate::config::Config;
use crate::error::{Error, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

type StateFn = Arc<dyn Fn() + Send + Sync>;
type TextFn = Arc<dyn Fn(Utf8Bytes) + Send + Sync>;
type BinaryFn = Arc<dyn Fn(Bytes) + Send + Sync>;
type CloseFn = Arc<dyn Fn(u16, Utf8Bytes) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&Error) + Send + Sync>;

const NO_STATUS: u16 = 1005;

struct ClientCallbacks {
    connect: RwLock<StateFn>,
    disconnect: RwLock<StateFn>,
    pong: RwLock<StateFn>,
    message: RwLock<TextFn>,
    message_binary: RwLock<BinaryFn>,
    sent: RwLock<TextFn>,
    sent_binary: RwLock<BinaryFn>,
    close: RwLock<CloseFn>,
    error: RwLock<ErrorFn>,
}

impl ClientCallbacks {
    fn new() -> Self {
        Self {
            connect: RwLock::new(Arc::new(|| {})),
            disconnect: RwLock::new(Arc::new(|| {})),
            pong: RwLock::new(Arc::new(|| {})),
            message: RwLock::new(Arc::new(|_| {})),
            message_binary: RwLock::new(Arc::new(|_| {})),
            sent: RwLock::new(Arc::new(|_| {})),
            sent_binary: RwLock::new(Arc::new(|_| {})),
            close: RwLock::new(Arc::new(|_, _| {})),
            error: RwLock::new(Arc::new(|_| {})),
        }
    }

    fn on_error(&self, err: &Error) {
        load(&self.error)(err);
    }
}

/// State of one dialed connection.
struct ConnState {
    outbound: mpsc::Sender<Message>,
    open: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl ConnState {
    fn is_closed(&self) -> bool {
        !self.open.load(Ordering::SeqCst)
    }

    fn terminate(&self) -> bool {
        if self
            .open
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = self.closed_tx.send(true);
            true
        } else {
            false
        }
    }
}

/// Outbound WebSocket connection with the same lifecycle guarantees as a
/// server-side session.
///
/// One client drives one connection at a time: [`connect`](Self::connect)
/// blocks until the connection ends, after which the client may dial again.
/// [`close`](Self::close) retires the instance for good.
pub struct Client {
    config: Config,
    callbacks: ClientCallbacks,
    open: AtomicBool,
    connecting: AtomicBool,
    conn: Mutex<Option<Arc<ConnState>>>,
}

impl Client {
    pub fn new() -> Arc<Self> {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Arc<Self> {
        debug_assert!(
            config.ping_period < config.pong_wait,
            "ping_period must be below pong_wait"
        );
        Arc::new(Self {
            config,
            callbacks: ClientCallbacks::new(),
            open: AtomicBool::new(true),
            connecting: AtomicBool::new(false),
            conn: Mutex::new(None),
        })
    }

    /// Dial `url` and run the connection until it ends.
    ///
    /// Fires the connect callback once the handshake completes and the
    /// disconnect callback after the connection has fully terminated. Dial
    /// failures are also reported through the error callback. Fails
    /// `AlreadyConnected` while an earlier `connect` is still running.
    pub async fn connect(self: &Arc<Self>, url: &str) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        if self
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyConnected);
        }

        let (socket, _response) = match connect_async(url).await {
            Ok(pair) => pair,
            Err(err) => {
                let err = Error::from(err);
                self.callbacks.on_error(&err);
                self.connecting.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };

        tracing::debug!(url, "client connected");

        let capacity = self.config.message_buffer_size.max(1);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (closed_tx, closed_rx) = watch::channel(false);
        let conn = Arc::new(ConnState {
            outbound: outbound_tx,
            open: AtomicBool::new(true),
            closed_tx,
        });
        *lock_conn(&self.conn) = Some(conn.clone());

        load(&self.callbacks.connect)();

        let (sink, stream) = socket.split();
        let writer = tokio::spawn(client_write_pump(
            self.clone(),
            conn.clone(),
            sink,
            outbound_rx,
            closed_rx.clone(),
        ));

        self.read_pump(&conn, stream, closed_rx).await;

        conn.terminate();
        let _ = writer.await;

        *lock_conn(&self.conn) = None;

        load(&self.callbacks.disconnect)();
        tracing::debug!(url, "client disconnected");
        self.connecting.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Enqueue a text frame. Never blocks; a full queue drops the frame and
    /// reports `MessageBufferFull` through the error callback.
    pub fn send(&self, payload: impl Into<Utf8Bytes>) -> Result<()> {
        self.enqueue_checked(Message::Text(payload.into()))
    }

    /// Enqueue a binary frame. Same semantics as [`send`](Self::send).
    pub fn send_binary(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.enqueue_checked(Message::Binary(payload.into()))
    }

    /// Retire the client: the live connection (if any) receives a close
    /// frame, and subsequent calls fail `Closed`.
    pub fn close(&self) -> Result<()> {
        self.shutdown(Message::Close(None))
    }

    /// Like [`close`](Self::close), with a close code and reason.
    pub fn close_with_reason(&self, code: u16, reason: impl Into<Utf8Bytes>) -> Result<()> {
        self.shutdown(Message::Close(Some(CloseFrame {
            code: code.into(),
            reason: reason.into(),
        })))
    }

    pub fn is_closed(&self) -> bool {
        !self.open.load(Ordering::SeqCst)
    }

    fn shutdown(&self, frame: Message) -> Result<()> {
        if self
            .open
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Closed);
        }
        if let Some(conn) = lock_conn(&self.conn).clone() {
            self.enqueue(&conn, frame);
        }
        Ok(())
    }

    fn enqueue_checked(&self, message: Message) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let Some(conn) = lock_conn(&self.conn).clone() else {
            return Err(Error::NoConnection);
        };
        if conn.is_closed() {
            return Err(Error::SessionClosed);
        }
        self.enqueue(&conn, message);
        Ok(())
    }

    /// Non-blocking enqueue; failures go to the error callback.
    fn enqueue(&self, conn: &ConnState, message: Message) {
        if conn.is_closed() {
            self.callbacks.on_error(&Error::WriteClosed);
            return;
        }
        match conn.outbound.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.callbacks.on_error(&Error::MessageBufferFull),
            Err(TrySendError::Closed(_)) => self.callbacks.on_error(&Error::WriteClosed),
        }
    }

    async fn read_pump(
        &self,
        conn: &Arc<ConnState>,
        mut stream: SplitStream<Socket>,
        mut closed: watch::Receiver<bool>,
    ) {
        let pong_wait = self.config.pong_wait;
        let mut deadline = Instant::now() + pong_wait;

        loop {
            let next = tokio::select! {
                next = timeout_at(deadline, stream.next()) => next,
                _ = closed.changed() => break,
            };

            let frame = match next {
                Ok(Some(Ok(frame))) => frame,
                Ok(Some(Err(err))) => {
                    let err = Error::from(err);
                    tracing::debug!(error = %err, "client read failed");
                    self.callbacks.on_error(&err);
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    self.callbacks.on_error(&Error::PongTimeout);
                    break;
                }
            };

            match frame {
                Message::Text(text) => load(&self.callbacks.message)(text),
                Message::Binary(bytes) => load(&self.callbacks.message_binary)(bytes),
                Message::Pong(_) => {
                    deadline = Instant::now() + pong_wait;
                    load(&self.callbacks.pong)();
                }
                // The transport answers pings on its own.
                Message::Ping(_) => {}
                Message::Close(frame) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason))
                        .unwrap_or((NO_STATUS, Utf8Bytes::from_static("")));
                    load(&self.callbacks.close)(code, reason);
                }
                Message::Frame(_) => {}
            }
        }

        conn.terminate();
    }

    /// Fires once the dial handshake completes.
    pub fn handle_connect(&self, f: impl Fn() + Send + Sync + 'static) {
        store(&self.callbacks.connect, Arc::new(f));
    }

    /// Fires after the connection has fully terminated.
    pub fn handle_disconnect(&self, f: impl Fn() + Send + Sync + 'static) {
        store(&self.callbacks.disconnect, Arc::new(f));
    }

    /// Fires when a keepalive pong arrives.
    pub fn handle_pong(&self, f: impl Fn() + Send + Sync + 'static) {
        store(&self.callbacks.pong, Arc::new(f));
    }

    /// Fires for each inbound text frame.
    pub fn handle_message(&self, f: impl Fn(Utf8Bytes) + Send + Sync + 'static) {
        store(&self.callbacks.message, Arc::new(f));
    }

    /// Fires for each inbound binary frame.
    pub fn handle_message_binary(&self, f: impl Fn(Bytes) + Send + Sync + 'static) {
        store(&self.callbacks.message_binary, Arc::new(f));
    }

    /// Fires after a text frame reached the wire.
    pub fn handle_sent(&self, f: impl Fn(Utf8Bytes) + Send + Sync + 'static) {
        store(&self.callbacks.sent, Arc::new(f));
    }

    /// Fires after a binary frame reached the wire.
    pub fn handle_sent_binary(&self, f: impl Fn(Bytes) + Send + Sync + 'static) {
        store(&self.callbacks.sent_binary, Arc::new(f));
    }

    /// Fires when the server sends a close frame, with its code and reason.
    pub fn handle_close(&self, f: impl Fn(u16, Utf8Bytes) + Send + Sync + 'static) {
        store(&self.callbacks.close, Arc::new(f));
    }

    /// Fires for pump failures, dial failures, and dropped frames.
    pub fn handle_error(&self, f: impl Fn(&Error) + Send + Sync + 'static) {
        store(&self.callbacks.error, Arc::new(f));
    }
}

async fn client_write_pump(
    client: Arc<Client>,
    conn: Arc<ConnState>,
    mut sink: SplitSink<Socket, Message>,
    mut outbound: mpsc::Receiver<Message>,
    mut closed: watch::Receiver<bool>,
) {
    let write_wait = client.config.write_wait;
    let mut ticker = interval_at(
        Instant::now() + client.config.ping_period,
        client.config.ping_period,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe = outbound.recv() => {
                let Some(message) = maybe else { break };
                let is_close = matches!(message, Message::Close(_));
                let echo = message.clone();

                if let Err(err) = write_frame(&mut sink, message, write_wait).await {
                    tracing::debug!(error = %err, "client frame write failed");
                    client.callbacks.on_error(&err);
                    break;
                }

                if is_close {
                    break;
                }

                match echo {
                    Message::Text(text) => load(&client.callbacks.sent)(text),
                    Message::Binary(bytes) => load(&client.callbacks.sent_binary)(bytes),
                    _ => {}
                }
            }
            _ = ticker.tick() => {
                if let Err(err) = write_frame(&mut sink, Message::Ping(Bytes::new()), write_wait).await {
                    tracing::debug!(error = %err, "client keepalive ping failed");
                    client.callbacks.on_error(&err);
                    break;
                }
            }
            _ = closed.changed() => {
                let _ = write_frame(&mut sink, Message::Close(None), write_wait).await;
                break;
            }
        }
    }

    conn.terminate();
    let _ = sink.close().await;
}

async fn write_frame(
    sink: &mut SplitSink<Socket, Message>,
    message: Message,
    write_wait: Duration,
) -> Result<()> {
    match timeout(write_wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(Error::from(err)),
        Err(_) => Err(Error::WriteTimeout),
    }
}

fn lock_conn<'a>(
    conn: &'a Mutex<Option<Arc<ConnState>>>,
) -> std::sync::MutexGuard<'a, Option<Arc<ConnState>>> {
    match conn.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("closed", &self.is_closed())
            .field("connected", &lock_conn(&self.conn).is_some())
            .finish()
    }
}
