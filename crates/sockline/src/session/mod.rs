//! Session state and write surface
//!
//! A session owns one live connection. Frame I/O itself happens in the two
//! pumps (`pump` module); the `Session` value carries the shared state both
//! pumps and the application observe: the outbound queue, the open flag, the
//! termination signal, the request snapshot, and the user metadata bag.

mod pump;

pub(crate) use pump::{read_pump, write_pump};

use axum::extract::ws::Utf8Bytes;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::manager::Manager;
use crate::request::RequestContext;

/// One live WebSocket session.
///
/// Handed to every callback as an `Arc`; all methods are safe to call from
/// any concurrent context, including from inside other callbacks.
pub struct Session {
    id: Uuid,
    request: RequestContext,
    keys: Mutex<Option<HashMap<String, Value>>>,
    outbound: mpsc::Sender<Envelope>,
    open: AtomicBool,
    closed_tx: watch::Sender<bool>,
    manager: Arc<Manager>,
}

impl Session {
    /// Returns the session plus the receiving halves consumed by the pumps.
    pub(crate) fn new(
        request: RequestContext,
        keys: Option<HashMap<String, Value>>,
        manager: Arc<Manager>,
    ) -> (Arc<Self>, mpsc::Receiver<Envelope>, watch::Receiver<bool>) {
        let capacity = manager.config().message_buffer_size.max(1);
        let (outbound, outbound_rx) = mpsc::channel(capacity);
        let (closed_tx, closed_rx) = watch::channel(false);

        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            request,
            keys: Mutex::new(keys),
            outbound,
            open: AtomicBool::new(true),
            closed_tx,
            manager,
        });

        (session, outbound_rx, closed_rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The request this session was upgraded from.
    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.request.local_addr()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.request.remote_addr()
    }

    /// Whether termination of this session has begun.
    pub fn is_closed(&self) -> bool {
        !self.open.load(Ordering::SeqCst)
    }

    /// Enqueue a text frame.
    ///
    /// Never blocks: a full outbound queue drops the frame and reports
    /// `MessageBufferFull` through the error callback.
    pub fn write(self: &Arc<Self>, payload: impl Into<Utf8Bytes>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        self.write_message(Envelope::text(payload));
        Ok(())
    }

    /// Enqueue a binary frame. Same non-blocking semantics as [`write`](Self::write).
    pub fn write_binary(self: &Arc<Self>, payload: impl Into<Bytes>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        self.write_message(Envelope::binary(payload));
        Ok(())
    }

    /// Enqueue a close frame; the session terminates once it reaches the wire.
    pub fn close(self: &Arc<Self>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        self.write_message(Envelope::close());
        Ok(())
    }

    /// Enqueue a close frame with a close code and a UTF-8 reason.
    pub fn close_with_reason(
        self: &Arc<Self>,
        code: u16,
        reason: impl Into<Utf8Bytes>,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        self.write_message(Envelope::close_with(code, reason));
        Ok(())
    }

    /// Non-blocking enqueue used by the hub and the public write surface.
    /// Failures are reported through the error callback, not returned.
    pub(crate) fn write_message(self: &Arc<Self>, envelope: Envelope) {
        if self.is_closed() {
            self.manager
                .callbacks()
                .on_error(Some(self.clone()), &Error::SessionClosed);
            return;
        }

        match self.outbound.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::trace!(session_id = %self.id, "outbound queue full, dropping frame");
                self.manager
                    .callbacks()
                    .on_error(Some(self.clone()), &Error::MessageBufferFull);
            }
            Err(TrySendError::Closed(_)) => {
                self.manager
                    .callbacks()
                    .on_error(Some(self.clone()), &Error::SessionClosed);
            }
        }
    }

    /// Store a key/value pair on this session's metadata bag.
    ///
    /// The bag is created lazily on first use.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let mut keys = lock(&self.keys);
        keys.get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
    }

    /// The value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<Value> {
        lock(&self.keys)
            .as_ref()
            .and_then(|keys| keys.get(key).cloned())
    }

    /// The value for `key`.
    ///
    /// # Panics
    /// Panics if the key does not exist.
    pub fn must_get(&self, key: &str) -> Value {
        match self.get(key) {
            Some(value) => value,
            None => panic!("key {key:?} does not exist"),
        }
    }

    /// Remove `key`, returning the previous value if any.
    pub fn unset(&self, key: &str) -> Option<Value> {
        lock(&self.keys)
            .as_mut()
            .and_then(|keys| keys.remove(key))
    }

    /// Flip the open flag exactly once and wake both pumps.
    ///
    /// Returns true for the caller that won the flip; every other caller is a
    /// no-op. Whoever wins, all subsequent public writes return
    /// `SessionClosed`.
    pub(crate) fn terminate(&self) -> bool {
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

    pub(crate) fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }
}

fn lock<'a>(
    keys: &'a Mutex<Option<HashMap<String, Value>>>,
) -> std::sync::MutexGuard<'a, Option<HashMap<String, Value>>> {
    match keys.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("open", &!self.is_closed())
            .field("remote_addr", &self.remote_addr())
            .finish()
    }
}
