//! Session Registry implementation.
//!
//! Tracks live client, server and component sessions by address, together
//! with their lifecycle status and outbound delivery channel.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use jid::{BareJid, Jid};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::stanza::{OutboundStanza, Stanza};
use crate::types::{SessionKind, SessionStatus};

/// Result of attempting to send a stanza to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Stanza was successfully queued for delivery
    Sent,
    /// The session is closed
    NotConnected,
    /// The channel to the session is full (backpressure)
    ChannelFull,
    /// The channel to the session is closed
    ChannelClosed,
}

impl SendResult {
    pub fn is_sent(self) -> bool {
        matches!(self, SendResult::Sent)
    }
}

/// A live session as seen by the routing core.
///
/// The transport owns the receiving half of the outbound channel and watches
/// [`Session::closed_token`] to learn when the core force-closes it.
pub struct Session {
    address: Jid,
    kind: SessionKind,
    stream_id: Uuid,
    status: AtomicU8,
    sender: mpsc::Sender<OutboundStanza>,
    closed: CancellationToken,
    created_at: DateTime<Utc>,
}

impl Session {
    /// Create a session in `Connecting` status.
    pub fn new(address: Jid, kind: SessionKind, sender: mpsc::Sender<OutboundStanza>) -> Self {
        Self {
            address,
            kind,
            stream_id: Uuid::new_v4(),
            status: AtomicU8::new(SessionStatus::Connecting.as_u8()),
            sender,
            closed: CancellationToken::new(),
            created_at: Utc::now(),
        }
    }

    pub fn address(&self) -> &Jid {
        &self.address
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Local part of the session address, if any.
    pub fn username(&self) -> Option<&str> {
        self.address.node().map(|node| node.as_str())
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_closed(&self) -> bool {
        self.status() == SessionStatus::Closed
    }

    /// Move the session to a new status.
    ///
    /// `Closed` is terminal; returns false if the session was already closed.
    pub fn set_status(&self, status: SessionStatus) -> bool {
        let closed = SessionStatus::Closed.as_u8();
        let result = self
            .status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != closed).then_some(status.as_u8())
            });
        if result.is_ok() && status == SessionStatus::Closed {
            self.closed.cancel();
        }
        result.is_ok()
    }

    /// Force-close the session and signal the transport to terminate.
    pub fn close(&self) -> bool {
        self.set_status(SessionStatus::Closed)
    }

    /// Token cancelled when the session is closed.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Enqueue a stanza on the session's outbound channel.
    ///
    /// Fire-and-forget from the caller's side: the session owns ordering.
    pub fn deliver(&self, stanza: Stanza) -> SendResult {
        if self.is_closed() {
            debug!(to = %self.address, "Session closed, not delivering");
            return SendResult::NotConnected;
        }

        match self.sender.try_send(OutboundStanza::new(stanza)) {
            Ok(()) => SendResult::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(to = %self.address, "Outbound channel full, applying backpressure");
                SendResult::ChannelFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(to = %self.address, "Outbound channel closed, session may have dropped");
                SendResult::ChannelClosed
            }
        }
    }

    fn has_dropped_channel(&self) -> bool {
        self.sender.is_closed()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address)
            .field("kind", &self.kind)
            .field("status", &self.status())
            .field("stream_id", &self.stream_id)
            .finish()
    }
}

/// Registry of live sessions keyed by address.
///
/// Client sessions are keyed by their full address; server and component
/// sessions by their domain.
pub struct SessionRegistry {
    sessions: DashMap<Jid, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        info!("Creating session registry");
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a session.
    ///
    /// A session already registered at the same address is replaced and
    /// returned so the caller can close it.
    #[instrument(skip(self, session), fields(address = %session.address(), kind = %session.kind()))]
    pub fn register(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let replaced = self.sessions.insert(session.address().clone(), session);
        if replaced.is_some() {
            debug!("Replaced existing session");
        } else {
            debug!("Registered new session");
        }
        replaced
    }

    /// Remove a session from the registry.
    #[instrument(skip(self), fields(address = %address))]
    pub fn unregister(&self, address: &Jid) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(address).map(|(_, session)| session);
        if removed.is_some() {
            debug!("Unregistered session");
        }
        removed
    }

    /// Remove `session` only if it is still the one registered at its
    /// address.
    pub fn unregister_session(&self, session: &Arc<Session>) -> bool {
        let removed = self
            .sessions
            .remove_if(session.address(), |_, registered| Arc::ptr_eq(registered, session))
            .is_some();
        if removed {
            debug!(address = %session.address(), "Unregistered session");
        }
        removed
    }

    /// Whether `session` is the one registered at its address.
    pub fn is_current(&self, session: &Arc<Session>) -> bool {
        self.sessions
            .get(session.address())
            .is_some_and(|registered| Arc::ptr_eq(registered.value(), session))
    }

    pub fn get(&self, address: &Jid) -> Option<Arc<Session>> {
        self.sessions.get(address).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, address: &Jid) -> bool {
        self.sessions.contains_key(address)
    }

    /// Update the status of a registered session.
    pub fn set_status(&self, address: &Jid, status: SessionStatus) -> bool {
        match self.get(address) {
            Some(session) => session.set_status(status),
            None => false,
        }
    }

    /// Force-close a session. The entry stays registered until the
    /// transport reports the disconnect.
    #[instrument(skip(self), fields(address = %address))]
    pub fn close(&self, address: &Jid) -> bool {
        match self.get(address) {
            Some(session) => {
                let closed = session.close();
                if closed {
                    info!("Session force-closed");
                }
                closed
            }
            None => false,
        }
    }

    /// All client sessions bound to a bare address.
    pub fn sessions_for(&self, bare: &BareJid) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|entry| {
                entry.value().kind() == SessionKind::Client && entry.key().to_bare() == *bare
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn count_by_kind(&self, kind: SessionKind) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().kind() == kind)
            .count()
    }

    pub fn list(&self) -> Vec<Jid> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Sessions that are closed or whose transport dropped the channel.
    pub fn stale(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().is_closed() || entry.value().has_dropped_channel())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Remove sessions that are closed or whose transport dropped the channel.
    pub fn cleanup_closed(&self) -> usize {
        let mut removed = 0;
        for session in self.stale() {
            if self.unregister_session(&session) {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(count = removed, "Cleaned up stale sessions");
        }
        removed
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("session_count", &self.sessions.len())
            .finish()
    }
}
