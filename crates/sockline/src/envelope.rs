//! Broadcast envelope
//!
//! An envelope is one outbound frame plus an optional recipient filter. It is
//! immutable after construction and cheap to clone, so a single broadcast
//! envelope can be enqueued to many sessions concurrently.

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

use crate::session::Session;

/// Recipient predicate used by filtered broadcasts.
pub type Filter = Arc<dyn Fn(&Arc<Session>) -> bool + Send + Sync>;

/// One enqueuable frame plus an optional broadcast filter.
#[derive(Clone)]
pub struct Envelope {
    message: Message,
    filter: Option<Filter>,
}

impl Envelope {
    /// Text frame.
    pub fn text(payload: impl Into<Utf8Bytes>) -> Self {
        Self::from_message(Message::Text(payload.into()))
    }

    /// Binary frame.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::from_message(Message::Binary(payload.into()))
    }

    /// Close frame without a payload.
    pub fn close() -> Self {
        Self::from_message(Message::Close(None))
    }

    /// Close frame carrying a close code and a UTF-8 reason.
    pub fn close_with(code: u16, reason: impl Into<Utf8Bytes>) -> Self {
        Self::from_message(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
    }

    pub(crate) fn ping() -> Self {
        Self::from_message(Message::Ping(Bytes::new()))
    }

    fn from_message(message: Message) -> Self {
        Self {
            message,
            filter: None,
        }
    }

    /// Restrict broadcast delivery to sessions the predicate accepts.
    #[must_use]
    pub fn with_filter(
        mut self,
        filter: impl Fn(&Arc<Session>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Whether this envelope should be delivered to the given session.
    pub(crate) fn accepts(&self, session: &Arc<Session>) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(session))
    }

    pub(crate) fn is_close(&self) -> bool {
        matches!(self.message, Message::Close(_))
    }

    /// The frame this envelope carries.
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub(crate) fn into_message(self) -> Message {
        self.message
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("message", &self.message)
            .field("filter", &self.filter.as_ref().map(|_| "fn"))
            .finish()
    }
}
