//! # sockline
//!
//! WebSocket session management for axum.
//!
//! A [`Manager`] accepts upgraded WebSocket connections, owns their full
//! lifecycle (read pump, write pump, keepalive, close), and fans messages out
//! to the set of live sessions. Application code plugs in through replaceable
//! event callbacks:
//!
//! ```no_run
//! use axum::{extract::{State, WebSocketUpgrade}, response::IntoResponse, routing::any, Router};
//! use sockline::{Manager, RequestContext};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = Manager::new();
//!
//!     let broadcaster = manager.clone();
//!     manager.handle_message(move |_session, msg| {
//!         let _ = broadcaster.broadcast(msg);
//!     });
//!
//!     let app = Router::new()
//!         .route("/ws", any(ws_handler))
//!         .with_state(manager);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:5000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//!
//! async fn ws_handler(
//!     State(manager): State<Arc<Manager>>,
//!     ctx: RequestContext,
//!     ws: WebSocketUpgrade,
//! ) -> impl IntoResponse {
//!     manager.handle_request(ws, ctx)
//! }
//! ```

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod manager;
pub mod request;
pub mod session;

mod callbacks;
mod hub;

pub use client::Client;
pub use config::{Config, UpgradeOptions};
pub use envelope::Envelope;
pub use error::{Error, Result};
pub use manager::Manager;
pub use request::RequestContext;
pub use session::Session;

// Standard close codes, re-exported for `close_with_reason` callers.
pub use axum::extract::ws::close_code;
