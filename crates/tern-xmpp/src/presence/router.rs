//! Presence Router.
//!
//! Decides for every inbound presence whether it is delivered locally,
//! forwarded to a component or remote server, fanned out to several
//! resources, or handed to the subscription/probe collaborators.

use std::sync::Arc;

use jid::Jid;
use tracing::{debug, error, info, instrument, warn};
use xmpp_parsers::presence::{Presence, Type as PresenceType};

use super::handlers::PresenceHandlers;
use crate::address::{is_local, is_server_address, is_subdomain_of};
use crate::component::ComponentManager;
use crate::interceptor::InterceptorChain;
use crate::registry::{Session, SessionRegistry};
use crate::routing::{RoutingResult, RoutingTable};
use crate::stanza::{presence_error, rejection_notice, Stanza};
use crate::types::SessionStatus;
use crate::XmppError;

/// Extended stanza addressing namespace (XEP-0033).
pub const MULTICAST_NS: &str = "http://jabber.org/protocol/address";

/// What the router did with a presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceDisposition {
    /// No sender address; dropped.
    Malformed,
    /// A pre-processing interceptor vetoed it.
    Rejected,
    /// The sender has not finished authenticating; bounced as not-authorized.
    NotAuthorized,
    /// Handed to the multicast router.
    Multicast,
    /// Neither end is local; forwarded as-is.
    Forwarded(RoutingResult),
    /// Presence to the server itself, given to the update handler.
    ServerUpdate,
    /// Directed presence fanned out to `targets` routes, `delivered` of them
    /// accepted it.
    Directed { targets: usize, delivered: usize },
    /// Available presence from a closed session; dropped.
    DroppedStaleAvailable,
    /// Given to the subscription handler.
    Subscription,
    /// Probe for a local user, given to the presence manager.
    ProbeHandled,
    /// Probe for a component that is not registered yet; queued.
    ProbeQueued,
    /// Routed without interpretation.
    Routed(RoutingResult),
    /// Processing failed and the sender's session was closed.
    Failed,
}

/// Routes presence stanzas.
pub struct PresenceRouter {
    server_domain: String,
    routing: Arc<RoutingTable>,
    sessions: Arc<SessionRegistry>,
    interceptors: Arc<InterceptorChain>,
    components: Arc<ComponentManager>,
    handlers: PresenceHandlers,
}

impl PresenceRouter {
    pub fn new(
        routing: Arc<RoutingTable>,
        sessions: Arc<SessionRegistry>,
        interceptors: Arc<InterceptorChain>,
        components: Arc<ComponentManager>,
        handlers: PresenceHandlers,
    ) -> Self {
        Self {
            server_domain: routing.server_domain().to_string(),
            routing,
            sessions,
            interceptors,
            components,
            handlers,
        }
    }

    pub fn handlers(&self) -> &PresenceHandlers {
        &self.handlers
    }

    /// Route one presence read from the sender's session.
    #[instrument(
        skip(self, presence),
        fields(from = ?presence.from, to = ?presence.to, type_ = ?presence.type_)
    )]
    pub async fn route(&self, presence: Presence) -> PresenceDisposition {
        let Some(from) = presence.from.clone() else {
            warn!("Presence without sender address, dropping");
            return PresenceDisposition::Malformed;
        };
        let session = self.sessions.get(&from);
        let stanza = Stanza::Presence(presence.clone());

        if let Err(rejected) = self
            .interceptors
            .invoke(&stanza, session.as_deref(), true, false)
        {
            info!(reason = ?rejected.reason, "Presence rejected by interceptor");
            if let Some(session) = session.as_deref().filter(|s| !s.is_closed()) {
                let error = XmppError::not_allowed(rejected.reason.clone()).to_stanza_error();
                let to = presence.to.clone();
                session.deliver(Stanza::Presence(presence_error(
                    presence,
                    session.address().clone(),
                    to.clone(),
                    error,
                )));
                if let Some(reason) = rejected.reason.as_deref() {
                    session.deliver(Stanza::Message(rejection_notice(
                        session.address().clone(),
                        to,
                        reason,
                    )));
                }
            }
            return PresenceDisposition::Rejected;
        }

        if let Some(session) = session.as_deref() {
            if session.status() == SessionStatus::Connecting {
                debug!("Sender not authenticated, answering not-authorized");
                let error = XmppError::not_authorized(None).to_stanza_error();
                session.deliver(Stanza::Presence(presence_error(
                    presence,
                    session.address().clone(),
                    None,
                    error,
                )));
                return PresenceDisposition::NotAuthorized;
            }
        }

        let disposition = match self.handle(presence, session.as_deref()).await {
            Ok(disposition) => disposition,
            Err(e) => {
                error!(error = %e, "Failed to route presence, closing sender session");
                self.sessions.close(&from);
                return PresenceDisposition::Failed;
            }
        };

        if let Err(rejected) = self
            .interceptors
            .invoke(&stanza, session.as_deref(), true, true)
        {
            debug!(reason = ?rejected.reason, "Post-processing interceptor rejected delivered presence");
        }

        disposition
    }

    async fn handle(
        &self,
        presence: Presence,
        session: Option<&Session>,
    ) -> Result<PresenceDisposition, XmppError> {
        let from = presence
            .from
            .clone()
            .ok_or_else(|| XmppError::bad_request(Some("presence has no sender".into())))?;
        let to = presence.to.clone();
        let to_server = to
            .as_ref()
            .map(|to| is_server_address(to, &self.server_domain))
            .unwrap_or(true);

        if to.is_some() && to_server && has_multicast_payload(&presence) {
            self.handlers.multicast.route(&presence).await?;
            return Ok(PresenceDisposition::Multicast);
        }

        if let Some(to) = &to {
            if !is_local(to, &self.server_domain) && !is_local(&from, &self.server_domain) {
                let result = self
                    .routing
                    .route_packet(to, Stanza::Presence(presence), false)
                    .await;
                return Ok(PresenceDisposition::Forwarded(result));
            }
        }

        match presence.type_ {
            PresenceType::None | PresenceType::Unavailable => match to {
                Some(to) if !to_server => self.handle_directed(presence, from, to, session).await,
                _ => {
                    self.handlers.caps.process(&presence).await?;
                    self.handlers.update.process(&presence).await?;
                    Ok(PresenceDisposition::ServerUpdate)
                }
            },
            PresenceType::Subscribe
            | PresenceType::Unsubscribe
            | PresenceType::Subscribed
            | PresenceType::Unsubscribed => {
                self.handlers.subscribe.process(&presence).await?;
                Ok(PresenceDisposition::Subscription)
            }
            PresenceType::Probe => {
                let to = to.ok_or_else(|| {
                    XmppError::bad_request(Some("probe has no recipient".into()))
                })?;
                self.handle_probe(presence, from, to).await
            }
            _ => {
                let Some(to) = to else {
                    debug!("Presence without recipient, dropping");
                    return Ok(PresenceDisposition::Malformed);
                };
                let result = self
                    .routing
                    .route_packet(&to, Stanza::Presence(presence), false)
                    .await;
                Ok(PresenceDisposition::Routed(result))
            }
        }
    }

    async fn handle_directed(
        &self,
        presence: Presence,
        from: Jid,
        to: Jid,
        session: Option<&Session>,
    ) -> Result<PresenceDisposition, XmppError> {
        if !is_local(&from, &self.server_domain)
            && !self.components.is_component_domain(from.domain().as_str())
        {
            if presence.type_ == PresenceType::Unavailable {
                self.handlers
                    .remote_events
                    .remote_user_unavailable(&presence)
                    .await?;
            } else {
                self.handlers
                    .remote_events
                    .remote_user_available(&presence)
                    .await?;
            }
        }

        if presence.type_ == PresenceType::None && session.is_some_and(Session::is_closed) {
            debug!("Available presence from closed session, dropping");
            return Ok(PresenceDisposition::DroppedStaleAvailable);
        }

        let targets = self.routing.get_routes_for(&to, Some(&from));
        let mut delivered = 0;
        for target in &targets {
            self.handlers
                .update
                .directed_presence_sent(&presence, target, &to)
                .await?;
            let result = self
                .routing
                .route_packet(target, Stanza::Presence(presence.clone()), false)
                .await;
            if result.is_delivered() {
                delivered += 1;
            }
        }

        debug!(targets = targets.len(), delivered, "Directed presence routed");
        Ok(PresenceDisposition::Directed {
            targets: targets.len(),
            delivered,
        })
    }

    async fn handle_probe(
        &self,
        presence: Presence,
        from: Jid,
        to: Jid,
    ) -> Result<PresenceDisposition, XmppError> {
        if is_local(&to, &self.server_domain) {
            self.handlers.presence_manager.handle_probe(&presence).await?;
            return Ok(PresenceDisposition::ProbeHandled);
        }

        let result = self
            .routing
            .route_packet(&to, Stanza::Presence(presence.clone()), true)
            .await;
        if result == RoutingResult::NotFound && is_subdomain_of(&to, &self.server_domain) {
            self.components.add_presence_request(from, presence);
            return Ok(PresenceDisposition::ProbeQueued);
        }
        Ok(PresenceDisposition::Routed(result))
    }
}

fn has_multicast_payload(presence: &Presence) -> bool {
    presence
        .payloads
        .iter()
        .any(|payload| payload.is("addresses", MULTICAST_NS))
}
