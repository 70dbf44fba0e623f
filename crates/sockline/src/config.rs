//! Timing, sizing, and upgrade parameters
//!
//! `Config` drives the per-session pumps; `UpgradeOptions` is forwarded to
//! the WebSocket upgrade without interpretation.

use axum::extract::ws::WebSocketUpgrade;
use axum::http::HeaderMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Origin-check predicate evaluated against the upgrading request's headers.
pub type OriginCheck = Arc<dyn Fn(&HeaderMap) -> bool + Send + Sync>;

/// Tunable timing and size parameters consumed by sessions.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum time a single frame write may take.
    pub write_wait: Duration,

    /// Maximum gap between two received pongs before the read pump is failed.
    pub pong_wait: Duration,

    /// Cadence at which the write pump sends keepalive pings.
    ///
    /// Must be less than `pong_wait`; the default keeps the 9/10 ratio.
    pub ping_period: Duration,

    /// Frames larger than this fail the read.
    pub max_message_size: usize,

    /// Capacity of each session's outbound queue.
    ///
    /// Values below 1 are clamped to 1 (the queue cannot be unbuffered).
    pub message_buffer_size: usize,

    /// When true, each inbound frame is dispatched on its own task so a slow
    /// handler cannot starve the keepalive read. When false (the default),
    /// handlers run synchronously in the read pump and per-connection frame
    /// ordering is preserved at the handler level.
    pub concurrent_message_handling: bool,
}

impl Default for Config {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            max_message_size: 512,
            message_buffer_size: 256,
            concurrent_message_handling: false,
        }
    }
}

/// Options forwarded to the WebSocket upgrade.
#[derive(Clone, Default)]
pub struct UpgradeOptions {
    /// Target size of the transport's write buffer.
    pub write_buffer_size: Option<usize>,

    /// Hard cap on the transport's write buffer.
    pub max_write_buffer_size: Option<usize>,

    /// Accept frames the client failed to mask.
    pub accept_unmasked_frames: bool,

    /// Subprotocols offered during the handshake.
    pub subprotocols: Vec<String>,

    /// Predicate over the request headers; a rejected origin receives a 403
    /// response and no session is created.
    pub check_origin: Option<OriginCheck>,
}

impl UpgradeOptions {
    pub(crate) fn apply(&self, mut ws: WebSocketUpgrade) -> WebSocketUpgrade {
        if let Some(size) = self.write_buffer_size {
            ws = ws.write_buffer_size(size);
        }
        if let Some(size) = self.max_write_buffer_size {
            ws = ws.max_write_buffer_size(size);
        }
        if self.accept_unmasked_frames {
            ws = ws.accept_unmasked_frames(true);
        }
        if !self.subprotocols.is_empty() {
            ws = ws.protocols(self.subprotocols.clone());
        }
        ws
    }
}

impl fmt::Debug for UpgradeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeOptions")
            .field("write_buffer_size", &self.write_buffer_size)
            .field("max_write_buffer_size", &self.max_write_buffer_size)
            .field("accept_unmasked_frames", &self.accept_unmasked_frames)
            .field("subprotocols", &self.subprotocols)
            .field("check_origin", &self.check_origin.as_ref().map(|_| "fn"))
            .finish()
    }
}
