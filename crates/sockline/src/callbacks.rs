//! User event handlers
//!
//! Every slot holds a handler and defaults to a no-op, so the dispatch path
//! is unconditional. Replacing a handler while traffic is in flight is safe:
//! dispatch clones the slot's `Arc` under a read lock and invokes it outside
//! the lock, so each dispatch sees exactly one consistent handler value.

use axum::extract::ws::Utf8Bytes;
use bytes::Bytes;
use std::sync::{Arc, RwLock};

use crate::error::Error;
use crate::session::Session;

pub(crate) type SessionFn = Arc<dyn Fn(Arc<Session>) + Send + Sync>;
pub(crate) type TextFn = Arc<dyn Fn(Arc<Session>, Utf8Bytes) + Send + Sync>;
pub(crate) type BinaryFn = Arc<dyn Fn(Arc<Session>, Bytes) + Send + Sync>;
pub(crate) type CloseFn = Arc<dyn Fn(Arc<Session>, u16, Utf8Bytes) + Send + Sync>;
pub(crate) type ErrorFn = Arc<dyn Fn(Option<Arc<Session>>, &Error) + Send + Sync>;

pub(crate) struct Callbacks {
    connect: RwLock<SessionFn>,
    disconnect: RwLock<SessionFn>,
    pong: RwLock<SessionFn>,
    message: RwLock<TextFn>,
    message_binary: RwLock<BinaryFn>,
    sent: RwLock<TextFn>,
    sent_binary: RwLock<BinaryFn>,
    close: RwLock<CloseFn>,
    error: RwLock<ErrorFn>,
}

pub(crate) fn load<T: Clone>(slot: &RwLock<T>) -> T {
    match slot.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

pub(crate) fn store<T>(slot: &RwLock<T>, value: T) {
    match slot.write() {
        Ok(mut guard) => *guard = value,
        Err(poisoned) => *poisoned.into_inner() = value,
    }
}

impl Callbacks {
    pub(crate) fn new() -> Self {
        Self {
            connect: RwLock::new(Arc::new(|_| {})),
            disconnect: RwLock::new(Arc::new(|_| {})),
            pong: RwLock::new(Arc::new(|_| {})),
            message: RwLock::new(Arc::new(|_, _| {})),
            message_binary: RwLock::new(Arc::new(|_, _| {})),
            sent: RwLock::new(Arc::new(|_, _| {})),
            sent_binary: RwLock::new(Arc::new(|_, _| {})),
            close: RwLock::new(Arc::new(|_, _, _| {})),
            error: RwLock::new(Arc::new(|_, _| {})),
        }
    }

    pub(crate) fn set_connect(&self, handler: SessionFn) {
        store(&self.connect, handler);
    }

    pub(crate) fn set_disconnect(&self, handler: SessionFn) {
        store(&self.disconnect, handler);
    }

    pub(crate) fn set_pong(&self, handler: SessionFn) {
        store(&self.pong, handler);
    }

    pub(crate) fn set_message(&self, handler: TextFn) {
        store(&self.message, handler);
    }

    pub(crate) fn set_message_binary(&self, handler: BinaryFn) {
        store(&self.message_binary, handler);
    }

    pub(crate) fn set_sent(&self, handler: TextFn) {
        store(&self.sent, handler);
    }

    pub(crate) fn set_sent_binary(&self, handler: BinaryFn) {
        store(&self.sent_binary, handler);
    }

    pub(crate) fn set_close(&self, handler: CloseFn) {
        store(&self.close, handler);
    }

    pub(crate) fn set_error(&self, handler: ErrorFn) {
        store(&self.error, handler);
    }

    pub(crate) fn on_connect(&self, session: Arc<Session>) {
        load(&self.connect)(session);
    }

    pub(crate) fn on_disconnect(&self, session: Arc<Session>) {
        load(&self.disconnect)(session);
    }

    pub(crate) fn on_pong(&self, session: Arc<Session>) {
        load(&self.pong)(session);
    }

    pub(crate) fn on_message(&self, session: Arc<Session>, payload: Utf8Bytes) {
        load(&self.message)(session, payload);
    }

    pub(crate) fn on_message_binary(&self, session: Arc<Session>, payload: Bytes) {
        load(&self.message_binary)(session, payload);
    }

    pub(crate) fn on_sent(&self, session: Arc<Session>, payload: Utf8Bytes) {
        load(&self.sent)(session, payload);
    }

    pub(crate) fn on_sent_binary(&self, session: Arc<Session>, payload: Bytes) {
        load(&self.sent_binary)(session, payload);
    }

    pub(crate) fn on_close(&self, session: Arc<Session>, code: u16, reason: Utf8Bytes) {
        load(&self.close)(session, code, reason);
    }

    pub(crate) fn on_error(&self, session: Option<Arc<Session>>, err: &Error) {
        load(&self.error)(session, err);
    }

    /// Cloned message handlers, for dispatch on a spawned task.
    pub(crate) fn message_handler(&self) -> TextFn {
        load(&self.message)
    }

    pub(crate) fn message_binary_handler(&self) -> BinaryFn {
        load(&self.message_binary)
    }
}
