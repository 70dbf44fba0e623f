//! Live-session registry
//!
//! The hub tracks every registered session behind a read/write lock and owns
//! the fan-out and shutdown paths. Fan-out snapshots the membership under the
//! read lock and enqueues lock-free, so user callbacks fired by a failing
//! enqueue can safely re-enter the hub.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::session::Session;

pub(crate) struct Hub {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    open: AtomicBool,
}

impl Hub {
    pub(crate) fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            open: AtomicBool::new(true),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        !self.open.load(Ordering::SeqCst)
    }

    /// Admit a session. The open flag is re-checked under the write lock so
    /// registration cannot race past a concurrent shutdown.
    pub(crate) fn register(&self, session: Arc<Session>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let mut sessions = write_lock(&self.sessions);
        if self.is_closed() {
            return Err(Error::Closed);
        }

        tracing::debug!(session_id = %session.id(), "session registered");
        sessions.insert(session.id(), session);
        Ok(())
    }

    /// Remove a session. Idempotent, and a silent no-op after shutdown has
    /// already cleared the membership.
    pub(crate) fn unregister(&self, session: &Session) {
        let mut sessions = write_lock(&self.sessions);
        if sessions.remove(&session.id()).is_some() {
            tracing::debug!(session_id = %session.id(), "session unregistered");
        }
    }

    /// Enqueue the envelope to every member passing its filter.
    ///
    /// Never blocks on a slow consumer: a full or closing session is reported
    /// through the error callback and the fan-out continues.
    pub(crate) fn broadcast(&self, envelope: Envelope) -> Result<()> {
        let members = self.snapshot()?;
        for session in &members {
            if envelope.accepts(session) {
                session.write_message(envelope.clone());
            }
        }
        Ok(())
    }

    /// Like broadcast, over a caller-provided list. A closed target is
    /// reported through the error callback and the call continues to the
    /// next target.
    pub(crate) fn multicast(&self, envelope: Envelope, targets: &[Arc<Session>]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        for session in targets {
            session.write_message(envelope.clone());
        }
        Ok(())
    }

    pub(crate) fn len(&self) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(read_lock(&self.sessions).len())
    }

    /// An independent list of the current members.
    pub(crate) fn snapshot(&self) -> Result<Vec<Arc<Session>>> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(read_lock(&self.sessions).values().cloned().collect())
    }

    /// Close the hub: no further registration or broadcast is admitted, the
    /// envelope (a close frame) is enqueued to every member, and the
    /// membership is cleared. A second call fails `Closed`.
    pub(crate) fn shutdown(&self, envelope: Envelope) -> Result<()> {
        if self
            .open
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Closed);
        }

        let members: Vec<Arc<Session>> = {
            let mut sessions = write_lock(&self.sessions);
            sessions.drain().map(|(_, session)| session).collect()
        };

        tracing::debug!(members = members.len(), "hub shutting down");
        for session in &members {
            session.write_message(envelope.clone());
        }
        Ok(())
    }
}

fn read_lock<'a, T>(lock: &'a RwLock<T>) -> std::sync::RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<'a, T>(lock: &'a RwLock<T>) -> std::sync::RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
