//! Manager facade
//!
//! One manager per logical WebSocket endpoint. It upgrades requests into
//! sessions, drives the per-session pumps, and exposes the broadcast surface
//! and the callback registration API.

use axum::extract::ws::{Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::callbacks::Callbacks;
use crate::config::{Config, UpgradeOptions};
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::hub::Hub;
use crate::request::RequestContext;
use crate::session::{read_pump, write_pump, Session};

/// WebSocket session manager.
///
/// Cheap to share: every handler and callback can hold the same `Arc`.
pub struct Manager {
    config: Config,
    upgrade: UpgradeOptions,
    hub: Hub,
    callbacks: Callbacks,
}

impl Manager {
    /// Manager with default configuration.
    pub fn new() -> Arc<Self> {
        Self::with_options(Config::default(), UpgradeOptions::default())
    }

    pub fn with_config(config: Config) -> Arc<Self> {
        Self::with_options(config, UpgradeOptions::default())
    }

    pub fn with_options(config: Config, upgrade: UpgradeOptions) -> Arc<Self> {
        debug_assert!(
            config.ping_period < config.pong_wait,
            "ping_period must be below pong_wait"
        );
        Arc::new(Self {
            config,
            upgrade,
            hub: Hub::new(),
            callbacks: Callbacks::new(),
        })
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    /// Upgrade the request and hand the connection to a new session.
    ///
    /// Returns the upgrade response; the session itself runs in the upgrade
    /// task until the connection ends. Fails `Closed` once the manager has
    /// been shut down.
    pub fn handle_request(
        self: &Arc<Self>,
        ws: WebSocketUpgrade,
        ctx: RequestContext,
    ) -> Result<Response> {
        self.handle_request_with_keys(ws, ctx, HashMap::new())
    }

    /// Same as [`handle_request`](Self::handle_request), seeding the
    /// session's metadata bag with `keys`.
    pub fn handle_request_with_keys(
        self: &Arc<Self>,
        ws: WebSocketUpgrade,
        ctx: RequestContext,
        keys: HashMap<String, Value>,
    ) -> Result<Response> {
        if self.hub.is_closed() {
            return Err(Error::Closed);
        }

        if let Some(check) = &self.upgrade.check_origin {
            if !check(ctx.headers()) {
                tracing::debug!(uri = %ctx.uri(), "origin check rejected upgrade");
                return Ok(StatusCode::FORBIDDEN.into_response());
            }
        }

        let ws = self
            .upgrade
            .apply(ws)
            .max_message_size(self.config.max_message_size);

        let on_error = self.clone();
        let ws = ws.on_failed_upgrade(move |err| {
            on_error.callbacks.on_error(None, &Error::from(err));
        });

        let manager = self.clone();
        let keys = if keys.is_empty() { None } else { Some(keys) };
        Ok(ws.on_upgrade(move |socket| async move {
            manager.run_session(socket, ctx, keys).await;
        }))
    }

    /// Full lifecycle of one session, from registration to the disconnect
    /// callback. Runs in the upgrade task and returns when the session ends.
    async fn run_session(
        self: Arc<Self>,
        socket: WebSocket,
        ctx: RequestContext,
        keys: Option<HashMap<String, Value>>,
    ) {
        let (session, outbound, closed) = Session::new(ctx, keys, self.clone());

        if self.hub.register(session.clone()).is_err() {
            // Raced with shutdown between the pre-upgrade check and here.
            tracing::debug!(session_id = %session.id(), "hub closed during upgrade, dropping connection");
            return;
        }

        tracing::debug!(session_id = %session.id(), "session connected");
        self.callbacks.on_connect(session.clone());

        let (sink, stream) = socket.split();
        let writer = tokio::spawn(write_pump(
            session.clone(),
            sink,
            outbound,
            closed.clone(),
        ));

        read_pump(session.clone(), stream, closed).await;

        session.terminate();
        let _ = writer.await;

        self.hub.unregister(&session);
        self.callbacks.on_disconnect(session.clone());
        tracing::debug!(session_id = %session.id(), "session disconnected");
    }

    /// Broadcast a text frame to every session.
    pub fn broadcast(&self, payload: impl Into<Utf8Bytes>) -> Result<()> {
        self.hub.broadcast(Envelope::text(payload))
    }

    /// Broadcast a binary frame to every session.
    pub fn broadcast_binary(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.hub.broadcast(Envelope::binary(payload))
    }

    /// Broadcast a text frame to every session the filter accepts.
    pub fn broadcast_filter(
        &self,
        payload: impl Into<Utf8Bytes>,
        filter: impl Fn(&Arc<Session>) -> bool + Send + Sync + 'static,
    ) -> Result<()> {
        self.hub.broadcast(Envelope::text(payload).with_filter(filter))
    }

    /// Broadcast a binary frame to every session the filter accepts.
    pub fn broadcast_binary_filter(
        &self,
        payload: impl Into<Bytes>,
        filter: impl Fn(&Arc<Session>) -> bool + Send + Sync + 'static,
    ) -> Result<()> {
        self.hub
            .broadcast(Envelope::binary(payload).with_filter(filter))
    }

    /// Broadcast a text frame to every session except `session`.
    pub fn broadcast_others(
        &self,
        payload: impl Into<Utf8Bytes>,
        session: &Arc<Session>,
    ) -> Result<()> {
        let sender = session.id();
        self.broadcast_filter(payload, move |q| q.id() != sender)
    }

    /// Broadcast a binary frame to every session except `session`.
    pub fn broadcast_binary_others(
        &self,
        payload: impl Into<Bytes>,
        session: &Arc<Session>,
    ) -> Result<()> {
        let sender = session.id();
        self.broadcast_binary_filter(payload, move |q| q.id() != sender)
    }

    /// Write a text frame to each of the given sessions. A target that is
    /// already closing is reported through the error callback; the remaining
    /// targets still receive the frame.
    pub fn broadcast_multiple(
        &self,
        payload: impl Into<Utf8Bytes>,
        targets: &[Arc<Session>],
    ) -> Result<()> {
        self.hub.multicast(Envelope::text(payload), targets)
    }

    /// Shut down the manager: every session receives a close frame and the
    /// hub stops admitting registrations and broadcasts.
    pub fn close(&self) -> Result<()> {
        self.hub.shutdown(Envelope::close())
    }

    /// Like [`close`](Self::close), with a close code and reason delivered
    /// to every session.
    pub fn close_with_reason(&self, code: u16, reason: impl Into<Utf8Bytes>) -> Result<()> {
        self.hub.shutdown(Envelope::close_with(code, reason))
    }

    /// Number of live sessions. Fails `Closed` after shutdown.
    pub fn len(&self) -> Result<usize> {
        self.hub.len()
    }

    /// Whether the manager has been shut down.
    pub fn is_closed(&self) -> bool {
        self.hub.is_closed()
    }

    /// An independent list of the current sessions. Fails `Closed` after
    /// shutdown.
    pub fn sessions(&self) -> Result<Vec<Arc<Session>>> {
        self.hub.snapshot()
    }

    /// Fires when a session connects.
    pub fn handle_connect(&self, f: impl Fn(Arc<Session>) + Send + Sync + 'static) {
        self.callbacks.set_connect(Arc::new(f));
    }

    /// Fires after a session has been unregistered.
    pub fn handle_disconnect(&self, f: impl Fn(Arc<Session>) + Send + Sync + 'static) {
        self.callbacks.set_disconnect(Arc::new(f));
    }

    /// Fires when a keepalive pong arrives.
    pub fn handle_pong(&self, f: impl Fn(Arc<Session>) + Send + Sync + 'static) {
        self.callbacks.set_pong(Arc::new(f));
    }

    /// Fires for each inbound text frame.
    pub fn handle_message(&self, f: impl Fn(Arc<Session>, Utf8Bytes) + Send + Sync + 'static) {
        self.callbacks.set_message(Arc::new(f));
    }

    /// Fires for each inbound binary frame.
    pub fn handle_message_binary(&self, f: impl Fn(Arc<Session>, Bytes) + Send + Sync + 'static) {
        self.callbacks.set_message_binary(Arc::new(f));
    }

    /// Fires after a text frame reached the wire.
    pub fn handle_sent(&self, f: impl Fn(Arc<Session>, Utf8Bytes) + Send + Sync + 'static) {
        self.callbacks.set_sent(Arc::new(f));
    }

    /// Fires after a binary frame reached the wire.
    pub fn handle_sent_binary(&self, f: impl Fn(Arc<Session>, Bytes) + Send + Sync + 'static) {
        self.callbacks.set_sent_binary(Arc::new(f));
    }

    /// Fires when the peer sends a close frame, with its code and reason.
    pub fn handle_close(
        &self,
        f: impl Fn(Arc<Session>, u16, Utf8Bytes) + Send + Sync + 'static,
    ) {
        self.callbacks.set_close(Arc::new(f));
    }

    /// Fires for pump failures and dropped frames. The session is `None`
    /// only when the upgrade itself failed.
    pub fn handle_error(
        &self,
        f: impl Fn(Option<Arc<Session>>, &Error) + Send + Sync + 'static,
    ) {
        self.callbacks.set_error(Arc::new(f));
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("sessions", &self.hub.len().unwrap_or(0))
            .field("closed", &self.is_closed())
            .finish()
    }
}
