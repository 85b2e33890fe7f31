//! Collaborators the presence router delegates to.
//!
//! Roster storage, subscription state and capability caches live outside
//! the routing core. The router only sees these narrow interfaces.

use std::sync::Arc;

use async_trait::async_trait;
use jid::Jid;
use tracing::debug;
use xmpp_parsers::presence::{Presence, Type as PresenceType};

use super::directed::DirectedPresenceTracker;
use crate::routing::RoutingTable;
use crate::stanza::Stanza;
use crate::XmppError;

/// Handles available/unavailable presence.
#[async_trait]
pub trait PresenceUpdateHandler: Send + Sync {
    /// Presence sent to the server itself: broadcast to the roster.
    async fn process(&self, presence: &Presence) -> Result<(), XmppError>;

    /// A directed presence is about to be delivered to `target`, one of the
    /// routes of `original_recipient`.
    async fn directed_presence_sent(
        &self,
        presence: &Presence,
        target: &Jid,
        original_recipient: &Jid,
    ) -> Result<(), XmppError>;
}

/// Owns the roster subscription state machine.
#[async_trait]
pub trait PresenceSubscribeHandler: Send + Sync {
    async fn process(&self, presence: &Presence) -> Result<(), XmppError>;
}

/// Answers probes for local users with their current availability.
#[async_trait]
pub trait PresenceManager: Send + Sync {
    async fn handle_probe(&self, presence: &Presence) -> Result<(), XmppError>;
}

/// Entity capabilities (XEP-0115) cache fed by presence to the server.
#[async_trait]
pub trait EntityCapabilitiesManager: Send + Sync {
    async fn process(&self, presence: &Presence) -> Result<(), XmppError>;
}

/// Extended stanza addressing (XEP-0033).
#[async_trait]
pub trait MulticastRouter: Send + Sync {
    async fn route(&self, presence: &Presence) -> Result<(), XmppError>;
}

/// Notified when a remote user sends directed presence to a local entity.
#[async_trait]
pub trait RemotePresenceEventDispatcher: Send + Sync {
    async fn remote_user_available(&self, presence: &Presence) -> Result<(), XmppError>;
    async fn remote_user_unavailable(&self, presence: &Presence) -> Result<(), XmppError>;
}

/// Roster broadcast used by [`DirectedPresenceUpdateHandler`].
#[async_trait]
pub trait PresenceBroadcaster: Send + Sync {
    async fn broadcast(&self, presence: &Presence) -> Result<(), XmppError>;
}

/// Collaborator that accepts everything and does nothing.
///
/// Used where a deployment has no roster or capability store.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCollaborator;

#[async_trait]
impl PresenceSubscribeHandler for NoopCollaborator {
    async fn process(&self, presence: &Presence) -> Result<(), XmppError> {
        debug!(from = ?presence.from, type_ = ?presence.type_, "No subscription handler");
        Ok(())
    }
}

#[async_trait]
impl PresenceManager for NoopCollaborator {
    async fn handle_probe(&self, presence: &Presence) -> Result<(), XmppError> {
        debug!(from = ?presence.from, to = ?presence.to, "No presence manager to answer probe");
        Ok(())
    }
}

#[async_trait]
impl EntityCapabilitiesManager for NoopCollaborator {
    async fn process(&self, _presence: &Presence) -> Result<(), XmppError> {
        Ok(())
    }
}

#[async_trait]
impl MulticastRouter for NoopCollaborator {
    async fn route(&self, presence: &Presence) -> Result<(), XmppError> {
        debug!(from = ?presence.from, "No multicast router, dropping presence");
        Ok(())
    }
}

#[async_trait]
impl RemotePresenceEventDispatcher for NoopCollaborator {
    async fn remote_user_available(&self, _presence: &Presence) -> Result<(), XmppError> {
        Ok(())
    }

    async fn remote_user_unavailable(&self, _presence: &Presence) -> Result<(), XmppError> {
        Ok(())
    }
}

#[async_trait]
impl PresenceBroadcaster for NoopCollaborator {
    async fn broadcast(&self, _presence: &Presence) -> Result<(), XmppError> {
        Ok(())
    }
}

/// Presence update handler that records directed presence.
///
/// Directed presences go into the tracker so the recipients get an
/// unavailable when the sender broadcasts unavailable or its session ends.
/// Roster broadcast is delegated.
pub struct DirectedPresenceUpdateHandler {
    tracker: Arc<DirectedPresenceTracker>,
    routing: Arc<RoutingTable>,
    broadcaster: Arc<dyn PresenceBroadcaster>,
}

impl DirectedPresenceUpdateHandler {
    pub fn new(
        tracker: Arc<DirectedPresenceTracker>,
        routing: Arc<RoutingTable>,
        broadcaster: Arc<dyn PresenceBroadcaster>,
    ) -> Self {
        Self {
            tracker,
            routing,
            broadcaster,
        }
    }

    pub fn tracker(&self) -> &Arc<DirectedPresenceTracker> {
        &self.tracker
    }
}

#[async_trait]
impl PresenceUpdateHandler for DirectedPresenceUpdateHandler {
    async fn process(&self, presence: &Presence) -> Result<(), XmppError> {
        if presence.type_ == PresenceType::Unavailable {
            if let Some(from) = &presence.from {
                // Going offline ends every directed presence of that resource.
                for unavailable in self.tracker.take_for_sender(from) {
                    let Some(to) = unavailable.to.clone() else {
                        continue;
                    };
                    debug!(from = %from, to = %to, "Ending directed presence");
                    self.routing
                        .route_packet(&to, Stanza::Presence(unavailable), true)
                        .await;
                }
            }
        }
        self.broadcaster.broadcast(presence).await
    }

    async fn directed_presence_sent(
        &self,
        presence: &Presence,
        target: &Jid,
        original_recipient: &Jid,
    ) -> Result<(), XmppError> {
        let Some(from) = &presence.from else {
            return Ok(());
        };
        // A full recipient routed through its domain (a room occupant
        // address) keeps its resource so the implicit unavailable reaches it.
        let recipient = if original_recipient.resource().is_some() {
            original_recipient
        } else {
            target
        };
        match presence.type_ {
            PresenceType::None => self.tracker.record(from, recipient),
            PresenceType::Unavailable => self.tracker.forget(from, recipient),
            _ => {}
        }
        Ok(())
    }
}

/// The collaborators used by a presence router.
#[derive(Clone)]
pub struct PresenceHandlers {
    pub update: Arc<dyn PresenceUpdateHandler>,
    pub subscribe: Arc<dyn PresenceSubscribeHandler>,
    pub presence_manager: Arc<dyn PresenceManager>,
    pub caps: Arc<dyn EntityCapabilitiesManager>,
    pub multicast: Arc<dyn MulticastRouter>,
    pub remote_events: Arc<dyn RemotePresenceEventDispatcher>,
}

impl PresenceHandlers {
    /// Handlers that track directed presence and ignore everything else.
    pub fn with_tracker(tracker: Arc<DirectedPresenceTracker>, routing: Arc<RoutingTable>) -> Self {
        let noop = Arc::new(NoopCollaborator);
        Self {
            update: Arc::new(DirectedPresenceUpdateHandler::new(
                tracker,
                routing,
                noop.clone(),
            )),
            subscribe: noop.clone(),
            presence_manager: noop.clone(),
            caps: noop.clone(),
            multicast: noop.clone(),
            remote_events: noop,
        }
    }
}
