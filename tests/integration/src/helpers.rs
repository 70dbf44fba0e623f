//! Test helpers for integration tests
//!
//! Provides utilities for spawning a sockline-backed axum server on an
//! ephemeral port and dialing it with tokio-tungstenite clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use futures_util::StreamExt;
use sockline::{Manager, RequestContext};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// How long any single test read may take before the test fails.
pub const WAIT: Duration = Duration::from_secs(5);

/// A dialed test connection.
pub type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Test server instance that manages lifecycle.
pub struct TestServer {
    pub addr: SocketAddr,
    pub manager: Arc<Manager>,
    _handle: JoinHandle<()>,
}

impl TestServer {
    /// Serve the given manager on an ephemeral local port.
    pub async fn start(manager: Arc<Manager>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let app = Router::new()
            .route("/ws", any(ws_handler))
            .with_state(manager.clone());

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self {
            addr,
            manager,
            _handle: handle,
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Dial a new WebSocket connection to this server.
    pub async fn dial(&self) -> Result<ClientSocket> {
        let (socket, _response) = connect_async(self.url()).await?;
        Ok(socket)
    }
}

async fn ws_handler(
    State(manager): State<Arc<Manager>>,
    ctx: RequestContext,
    ws: WebSocketUpgrade,
) -> Result<Response, sockline::Error> {
    manager.handle_request(ws, ctx)
}

/// Next text frame, skipping keepalive control frames.
pub async fn recv_text(socket: &mut ClientSocket) -> Result<String> {
    loop {
        match next_frame(socket).await? {
            Message::Text(text) => return Ok(text.to_string()),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => bail!("expected text frame, got {other:?}"),
        }
    }
}

/// Next binary frame, skipping keepalive control frames.
pub async fn recv_binary(socket: &mut ClientSocket) -> Result<Vec<u8>> {
    loop {
        match next_frame(socket).await? {
            Message::Binary(bytes) => return Ok(bytes.to_vec()),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => bail!("expected binary frame, got {other:?}"),
        }
    }
}

/// Next close frame, as (code, reason) when it carried a payload.
pub async fn recv_close(socket: &mut ClientSocket) -> Result<Option<(u16, String)>> {
    loop {
        match next_frame(socket).await? {
            Message::Close(frame) => {
                return Ok(frame.map(|f| (u16::from(f.code), f.reason.to_string())))
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => bail!("expected close frame, got {other:?}"),
        }
    }
}

/// Serve an arbitrary router on an ephemeral local port, for tests that need
/// a custom upgrade handler.
pub async fn serve_app(app: Router) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok(addr)
}

/// Poll until the manager reports `n` live sessions.
///
/// Registration happens in the upgrade task, so a dialed connection may not
/// be a member yet when the dial returns.
pub async fn wait_for_len(manager: &Manager, n: usize) -> Result<()> {
    timeout(WAIT, async {
        loop {
            if manager.len().map(|len| len == n).unwrap_or(false) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .map_err(|_| anyhow!("never reached {n} sessions"))
}

async fn next_frame(socket: &mut ClientSocket) -> Result<Message> {
    let frame = timeout(WAIT, socket.next())
        .await
        .map_err(|_| anyhow!("timed out waiting for a frame"))?
        .ok_or_else(|| anyhow!("connection ended"))??;
    Ok(frame)
}
