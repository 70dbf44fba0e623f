//! Read and write pumps
//!
//! Each session runs exactly one of each. The write pump owns the sink half
//! of the socket and is the only writer of frames; the read pump owns the
//! stream half and is the only reader. Both observe the session's
//! termination signal, so whichever side fails first drags the other down
//! within one scheduling round.

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::session::Session;

/// Close code reported when the peer's close frame carried no payload.
const NO_STATUS: u16 = 1005;

/// Drains the outbound queue onto the wire and keeps the peer alive with
/// periodic pings. Exits on write failure, on a close envelope, or on the
/// termination signal, and flips the session closed on every exit path.
pub(crate) async fn write_pump(
    session: Arc<Session>,
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Envelope>,
    mut closed: watch::Receiver<bool>,
) {
    let config = session.manager().config();
    let write_wait = config.write_wait;

    let mut ticker = interval_at(Instant::now() + config.ping_period, config.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe = outbound.recv() => {
                let Some(envelope) = maybe else { break };
                let is_close = envelope.is_close();
                let message = envelope.into_message();
                let echo = message.clone();

                if let Err(err) = write_frame(&mut sink, message, write_wait).await {
                    tracing::debug!(session_id = %session.id(), error = %err, "frame write failed");
                    session
                        .manager()
                        .callbacks()
                        .on_error(Some(session.clone()), &err);
                    break;
                }

                if is_close {
                    tracing::debug!(session_id = %session.id(), "close frame written");
                    break;
                }

                match echo {
                    Message::Text(text) => {
                        session.manager().callbacks().on_sent(session.clone(), text);
                    }
                    Message::Binary(bytes) => {
                        session
                            .manager()
                            .callbacks()
                            .on_sent_binary(session.clone(), bytes);
                    }
                    _ => {}
                }
            }
            _ = ticker.tick() => {
                let ping = Envelope::ping().into_message();
                if let Err(err) = write_frame(&mut sink, ping, write_wait).await {
                    tracing::debug!(session_id = %session.id(), error = %err, "keepalive ping failed");
                    session
                        .manager()
                        .callbacks()
                        .on_error(Some(session.clone()), &err);
                    break;
                }
            }
            _ = closed.changed() => {
                // Read side already terminated; flush a close frame on the
                // way out. The transport guarantees at most one close frame
                // reaches the wire.
                let _ = write_frame(&mut sink, Message::Close(None), write_wait).await;
                break;
            }
        }
    }

    session.terminate();
    let _ = sink.close().await;
}

/// Reads frames until an error, the peer going away, a missed keepalive, or
/// the termination signal, dispatching text/binary frames to the user
/// handlers. The rolling read deadline is extended only when a pong arrives.
pub(crate) async fn read_pump(
    session: Arc<Session>,
    mut stream: SplitStream<WebSocket>,
    mut closed: watch::Receiver<bool>,
) {
    let config = session.manager().config();
    let pong_wait = config.pong_wait;
    let concurrent = config.concurrent_message_handling;

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
                tracing::debug!(session_id = %session.id(), error = %err, "read failed");
                session
                    .manager()
                    .callbacks()
                    .on_error(Some(session.clone()), &err);
                break;
            }
            Ok(None) => {
                tracing::debug!(session_id = %session.id(), "peer went away");
                break;
            }
            Err(_) => {
                tracing::debug!(session_id = %session.id(), "keepalive window expired");
                session
                    .manager()
                    .callbacks()
                    .on_error(Some(session.clone()), &Error::PongTimeout);
                break;
            }
        };

        match frame {
            Message::Text(text) => dispatch_text(&session, text, concurrent),
            Message::Binary(bytes) => dispatch_binary(&session, bytes, concurrent),
            Message::Pong(_) => {
                deadline = Instant::now() + pong_wait;
                session.manager().callbacks().on_pong(session.clone());
            }
            // The transport answers pings on its own.
            Message::Ping(_) => {}
            Message::Close(frame) => {
                let (code, reason) = frame
                    .map(|f| (f.code, f.reason))
                    .unwrap_or((NO_STATUS, Utf8Bytes::from_static("")));
                session
                    .manager()
                    .callbacks()
                    .on_close(session.clone(), code, reason);
                // The transport echoes the close; the stream ends on the
                // next read.
            }
        }
    }

    session.terminate();
}

fn dispatch_text(session: &Arc<Session>, payload: Utf8Bytes, concurrent: bool) {
    if concurrent {
        let handler = session.manager().callbacks().message_handler();
        let session = session.clone();
        tokio::spawn(async move { handler(session, payload) });
    } else {
        session
            .manager()
            .callbacks()
            .on_message(session.clone(), payload);
    }
}

fn dispatch_binary(session: &Arc<Session>, payload: Bytes, concurrent: bool) {
    if concurrent {
        let handler = session.manager().callbacks().message_binary_handler();
        let session = session.clone();
        tokio::spawn(async move { handler(session, payload) });
    } else {
        session
            .manager()
            .callbacks()
            .on_message_binary(session.clone(), payload);
    }
}

async fn write_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    write_wait: Duration,
) -> Result<()> {
    match timeout(write_wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(Error::from(err)),
        Err(_) => Err(Error::WriteTimeout),
    }
}
