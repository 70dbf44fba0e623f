//! Error taxonomy
//!
//! Synchronous API misuse is reported through return values; I/O failures
//! inside the pumps are reported through the error callback. By the time the
//! error callback observes a fatal error the session has already been
//! scheduled for termination.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for sockline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the manager, sessions, and the client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The manager (or client) has been shut down.
    #[error("instance is closed")]
    Closed,

    /// Operation on a session whose termination has already begun.
    #[error("session is closed")]
    SessionClosed,

    /// Attempt to write a frame after the writer terminated.
    #[error("tried to write to a closed connection")]
    WriteClosed,

    /// Operation before a connection was established.
    #[error("connection was not set")]
    NoConnection,

    /// Dial attempt while an earlier connection is still running.
    #[error("client is already connected")]
    AlreadyConnected,

    /// The session's outbound queue is at capacity; the frame was dropped.
    #[error("session message buffer is full")]
    MessageBufferFull,

    /// No pong arrived within the configured `pong_wait` window.
    #[error("no pong received within the keepalive window")]
    PongTimeout,

    /// A single frame write exceeded the configured `write_wait` deadline.
    #[error("frame write deadline exceeded")]
    WriteTimeout,

    /// Socket-level failure reported by the transport.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    /// Whether the session survives this error.
    ///
    /// Only a dropped frame is recoverable; every other pump error terminates
    /// the session it occurred on (never the manager or other sessions).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MessageBufferFull)
    }

    /// HTTP status for errors returned before a connection was upgraded.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Closed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

impl From<axum::Error> for Error {
    fn from(err: axum::Error) -> Self {
        Self::Transport(err.into())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.into())
    }
}
