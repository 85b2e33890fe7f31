//! Server context.
//!
//! Owns every shared table of the routing core. Constructed once at startup
//! and passed by reference (or `Arc`) to transports and components; there
//! are no process-wide singletons.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use jid::Jid;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::presence::Presence;

use crate::address::{domain_jid, is_server_address};
use crate::component::{Component, ComponentManager};
use crate::config::CoreConfig;
use crate::disco::{
    build_disco_info_response, is_disco_info_query, is_disco_items_query, Feature, Identity,
};
use crate::interceptor::InterceptorChain;
use crate::muc::MucService;
use crate::presence::{
    DirectedPresenceTracker, PresenceDisposition, PresenceHandlers, PresenceRouter,
};
use crate::registry::{Session, SessionRegistry};
use crate::routing::{RouteTarget, RouterConfig, RoutingResult, RoutingTable};
use crate::stanza::{OutboundStanza, Stanza};
use crate::types::{SessionKind, SessionStatus};
use crate::XmppError;

/// The routing core of one server instance.
pub struct ServerContext {
    config: CoreConfig,
    node_id: Uuid,
    routing: Arc<RoutingTable>,
    sessions: Arc<SessionRegistry>,
    interceptors: Arc<InterceptorChain>,
    components: Arc<ComponentManager>,
    tracker: Arc<DirectedPresenceTracker>,
    presence: Arc<PresenceRouter>,
}

impl ServerContext {
    /// Build a context whose presence collaborators only track directed
    /// presence.
    pub fn new(config: CoreConfig) -> Result<Self, XmppError> {
        Self::with_handlers(config, PresenceHandlers::with_tracker)
    }

    /// Build a context with custom presence collaborators.
    ///
    /// `handlers` receives the tracker and routing table the context will
    /// use, so a custom update handler can still record directed presence.
    pub fn with_handlers<F>(config: CoreConfig, handlers: F) -> Result<Self, XmppError>
    where
        F: FnOnce(Arc<DirectedPresenceTracker>, Arc<RoutingTable>) -> PresenceHandlers,
    {
        config.validate()?;

        let routing = Arc::new(RoutingTable::new(
            RouterConfig::new(config.domain.clone()).with_federation(config.federation_enabled),
        ));
        let sessions = Arc::new(SessionRegistry::new());
        let interceptors = Arc::new(InterceptorChain::new());
        let components = ComponentManager::new(config.domain.clone(), Arc::clone(&routing));
        let tracker = Arc::new(DirectedPresenceTracker::new());
        let presence = Arc::new(PresenceRouter::new(
            Arc::clone(&routing),
            Arc::clone(&sessions),
            Arc::clone(&interceptors),
            Arc::clone(&components),
            handlers(Arc::clone(&tracker), Arc::clone(&routing)),
        ));

        let node_id = Uuid::new_v4();
        info!(domain = %config.domain, node_id = %node_id, federation = config.federation_enabled, "Server context created");

        Ok(Self {
            config,
            node_id,
            routing,
            sessions,
            interceptors,
            components,
            tracker,
            presence,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn domain(&self) -> &str {
        &self.config.domain
    }

    /// Identifier of this cluster node.
    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    pub fn routing(&self) -> &Arc<RoutingTable> {
        &self.routing
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn interceptors(&self) -> &Arc<InterceptorChain> {
        &self.interceptors
    }

    pub fn components(&self) -> &Arc<ComponentManager> {
        &self.components
    }

    pub fn tracker(&self) -> &Arc<DirectedPresenceTracker> {
        &self.tracker
    }

    pub fn presence_router(&self) -> &Arc<PresenceRouter> {
        &self.presence
    }

    /// Register a session for a freshly accepted transport.
    ///
    /// The session starts in `Connecting` and is not routable until
    /// [`authenticate_session`](Self::authenticate_session). A session
    /// already registered at the same address is closed and replaced.
    #[instrument(skip(self), fields(address = %address, kind = %kind))]
    pub fn open_session(
        &self,
        address: Jid,
        kind: SessionKind,
    ) -> (Arc<Session>, mpsc::Receiver<OutboundStanza>) {
        let (tx, rx) = mpsc::channel(self.config.session_channel_capacity);
        let session = Arc::new(Session::new(address, kind, tx));
        if let Some(replaced) = self.sessions.register(Arc::clone(&session)) {
            info!("Closing replaced session");
            replaced.close();
        }
        (session, rx)
    }

    /// Mark a session authenticated and make it routable.
    ///
    /// Client sessions are routed at their full address; server and
    /// component sessions at their domain.
    #[instrument(skip(self), fields(address = %address))]
    pub fn authenticate_session(&self, address: &Jid) -> Result<Arc<Session>, XmppError> {
        let session = self
            .sessions
            .get(address)
            .ok_or_else(|| XmppError::item_not_found(Some(format!("no session for {address}"))))?;
        if session.status() != SessionStatus::Connecting {
            return Err(XmppError::not_allowed(Some(format!(
                "session is already {}",
                session.status()
            ))));
        }

        let (route, target) = match session.kind() {
            SessionKind::Client => (
                address.clone(),
                RouteTarget::LocalSession(Arc::clone(&session)),
            ),
            SessionKind::Server => (
                Jid::from(domain_jid(address.domain().as_str())?),
                RouteTarget::RemoteServer(Arc::clone(&session)),
            ),
            SessionKind::Component => (
                Jid::from(domain_jid(address.domain().as_str())?),
                RouteTarget::ComponentProxy(Arc::clone(&session)),
            ),
        };
        self.routing.add_route(route.clone(), target)?;

        if !session.set_status(SessionStatus::Connected) {
            self.routing.remove_route(&route);
            return Err(XmppError::not_authorized(Some("session closed during authentication".into())));
        }
        info!(kind = %session.kind(), "Session authenticated");
        Ok(session)
    }

    /// Tear down after the transport of `session` went away.
    ///
    /// Removes the session's routes, sends the implicit unavailable presence
    /// to everyone it sent directed presence to, and unregisters it.
    /// Returns how many implicit unavailables were routed.
    ///
    /// A session that was already replaced at its address only loses its own
    /// routes; the session that replaced it is left alone.
    #[instrument(skip(self, session), fields(address = %session.address(), stream_id = %session.stream_id()))]
    pub async fn session_closed(&self, session: &Arc<Session>) -> usize {
        session.close();
        self.routing.remove_session_routes(session);
        if !self.sessions.is_current(session) {
            debug!("Session already replaced or unregistered");
            return 0;
        }

        let address = session.address();
        let unavailables = self.tracker.take_for_sender(address);
        let count = unavailables.len();
        let deliveries = unavailables.into_iter().filter_map(|presence| {
            let to = presence.to.clone()?;
            Some(async move {
                self.routing
                    .route_packet(&to, Stanza::Presence(presence), true)
                    .await
            })
        });
        let delivered = join_all(deliveries)
            .await
            .iter()
            .filter(|r| r.is_delivered())
            .count();

        self.sessions.unregister_session(session);
        info!(implicit_unavailable = count, delivered, "Session closed");
        count
    }

    /// Run [`session_closed`](Self::session_closed) for every session that
    /// was force-closed or whose transport went away without reporting it.
    pub async fn sweep_stale_sessions(&self) -> usize {
        let stale = self.sessions.stale();
        for session in &stale {
            self.session_closed(session).await;
        }
        stale.len()
    }

    /// Outgoing pre-processing phase for a stanza taken off the outbound
    /// channel of `session`, before the transport writes it.
    ///
    /// Returns false when an interceptor vetoed it; the transport drops the
    /// stanza instead of writing it.
    pub fn intercept_outgoing(&self, session: &Session, stanza: &Stanza) -> bool {
        match self.interceptors.invoke(stanza, Some(session), false, false) {
            Ok(()) => true,
            Err(rejected) => {
                debug!(to = %session.address(), reason = ?rejected.reason, "Outgoing stanza rejected by interceptor");
                false
            }
        }
    }

    /// Outgoing post-processing phase, once the transport wrote `stanza`.
    pub fn outgoing_written(&self, session: &Session, stanza: &Stanza) {
        if let Err(rejected) = self.interceptors.invoke(stanza, Some(session), false, true) {
            debug!(to = %session.address(), reason = ?rejected.reason, "Post-processing interceptor rejected written stanza");
        }
    }

    /// Route a presence read from a session.
    pub async fn route_presence(&self, presence: Presence) -> PresenceDisposition {
        self.presence.route(presence).await
    }

    /// Route any stanza read from a session.
    ///
    /// Presence goes through the presence router. Messages and IQs pass the
    /// interceptor chain and are then answered here (when addressed to the
    /// server) or handed to the routing table. Undeliverable IQ requests and
    /// messages are bounced as `service-unavailable` to a live sender.
    #[instrument(skip(self, stanza), fields(kind = stanza.name(), from = ?stanza.from(), to = ?stanza.to()))]
    pub async fn route_stanza(&self, stanza: Stanza) -> RoutingResult {
        let stanza = match stanza {
            Stanza::Presence(presence) => return disposition_result(self.route_presence(presence).await),
            other => other,
        };

        let Some(from) = stanza.from().cloned() else {
            warn!("Stanza without sender address, dropping");
            return RoutingResult::Failed {
                reason: "stanza has no sender".to_string(),
            };
        };
        let session = self.sessions.get(&from);

        if let Err(rejected) = self.interceptors.invoke(&stanza, session.as_deref(), true, false) {
            info!(reason = ?rejected.reason, "Stanza rejected by interceptor");
            self.bounce(&stanza, session.as_deref(), XmppError::not_allowed(rejected.reason.clone()));
            return RoutingResult::Failed {
                reason: rejected.to_string(),
            };
        }
        if session.as_deref().map(Session::status) == Some(SessionStatus::Connecting) {
            self.bounce(&stanza, session.as_deref(), XmppError::not_authorized(None));
            return RoutingResult::Failed {
                reason: "sender is not authenticated".to_string(),
            };
        }

        let result = match stanza.to().cloned() {
            Some(to) if !is_server_address(&to, &self.config.domain) => {
                let result = self.routing.route_packet(&to, stanza.clone(), false).await;
                if !result.is_delivered() {
                    debug!(result = ?result, "Stanza undeliverable");
                    self.bounce(&stanza, session.as_deref(), XmppError::service_unavailable(None));
                }
                result
            }
            _ => self.handle_server_stanza(&stanza, session.as_deref()).await,
        };

        if let Err(rejected) = self.interceptors.invoke(&stanza, session.as_deref(), true, true) {
            debug!(reason = ?rejected.reason, "Post-processing interceptor rejected routed stanza");
        }
        result
    }

    async fn handle_server_stanza(&self, stanza: &Stanza, session: Option<&Session>) -> RoutingResult {
        if self.components.process(stanza) {
            return RoutingResult::Delivered;
        }
        let Stanza::Iq(iq) = stanza else {
            debug!(kind = stanza.name(), "Ignoring stanza addressed to the server");
            return RoutingResult::NotFound;
        };

        match self.answer_server_iq(iq) {
            Some(reply) => {
                let Some(to) = reply.to.clone() else {
                    return RoutingResult::NotFound;
                };
                self.routing.route_packet(&to, Stanza::Iq(reply), false).await
            }
            None => {
                if matches!(iq.payload, IqType::Get(_) | IqType::Set(_)) {
                    self.bounce(stanza, session, XmppError::service_unavailable(None));
                }
                RoutingResult::NotFound
            }
        }
    }

    fn answer_server_iq(&self, iq: &Iq) -> Option<Iq> {
        if is_disco_items_query(iq) {
            return Some(self.components.disco_items_response(iq));
        }
        if is_disco_info_query(iq) {
            return Some(build_disco_info_response(
                iq,
                &[Identity::server(None)],
                &[Feature::disco_info(), Feature::disco_items()],
            ));
        }
        None
    }

    fn bounce(&self, stanza: &Stanza, session: Option<&Session>, error: XmppError) {
        let Some(session) = session.filter(|s| !s.is_closed()) else {
            return;
        };
        if let Some(reply) = stanza.error_reply(&error) {
            session.deliver(reply);
        }
    }

    /// Register an internal component at `subdomain.<domain>`.
    ///
    /// Logs a warning if the component has not answered the disco#info
    /// probe within the configured timeout.
    pub async fn add_component(
        &self,
        subdomain: &str,
        component: Arc<dyn Component>,
    ) -> Result<(), XmppError> {
        self.components.add_component(subdomain, component).await?;

        let domain = format!("{}.{}", subdomain, self.config.domain);
        let components = Arc::clone(&self.components);
        let timeout = Duration::from_millis(self.config.component_disco_timeout_ms);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if components.component_info(&domain).is_none() {
                warn!(component = %domain, ?timeout, "Component did not answer disco#info");
            }
        });
        Ok(())
    }

    /// Register the built-in MUC service if it is enabled.
    pub async fn register_muc(&self) -> Result<Option<Arc<MucService>>, XmppError> {
        if !self.config.muc.enabled {
            debug!("MUC service disabled");
            return Ok(None);
        }
        let service = Arc::new(MucService::new(
            self.config.muc_domain(),
            self.config.domain.clone(),
            self.config.muc.defaults.clone(),
            self.node_id,
        ));
        self.add_component(&self.config.muc.subdomain, service.clone())
            .await?;
        Ok(Some(service))
    }

    /// Unregister every component and close every session.
    pub async fn shutdown(&self) {
        info!(
            sessions = self.sessions.count(),
            components = self.components.component_count(),
            "Shutting down server context"
        );
        self.components.remove_all().await;
        for address in self.sessions.list() {
            self.sessions.close(&address);
        }
    }
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("domain", &self.config.domain)
            .field("node_id", &self.node_id)
            .field("sessions", &self.sessions.count())
            .field("components", &self.components)
            .finish()
    }
}

fn disposition_result(disposition: PresenceDisposition) -> RoutingResult {
    match disposition {
        PresenceDisposition::Forwarded(result) | PresenceDisposition::Routed(result) => result,
        PresenceDisposition::Directed { delivered: 0, .. } => RoutingResult::NotFound,
        PresenceDisposition::Malformed
        | PresenceDisposition::Rejected
        | PresenceDisposition::NotAuthorized
        | PresenceDisposition::DroppedStaleAvailable
        | PresenceDisposition::Failed => RoutingResult::Failed {
            reason: format!("presence {disposition:?}"),
        },
        _ => RoutingResult::Delivered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xmpp_parsers::message::Message;

    fn context() -> ServerContext {
        ServerContext::new(CoreConfig::new("example.com")).unwrap()
    }

    fn jid(s: &str) -> Jid {
        s.parse().unwrap()
    }

    #[test]
    fn test_authenticate_adds_client_route() {
        let ctx = context();
        let (session, _rx) = ctx.open_session(jid("alice@example.com/home"), SessionKind::Client);
        assert!(!ctx.routing().has_client_route(&"alice@example.com/home".parse().unwrap()));

        ctx.authenticate_session(session.address()).unwrap();
        assert_eq!(session.status(), SessionStatus::Connected);
        assert!(ctx.routing().has_client_route(&"alice@example.com/home".parse().unwrap()));

        // A second authentication is refused.
        assert!(ctx.authenticate_session(session.address()).is_err());
    }

    #[test]
    fn test_reopening_replaces_session() {
        let ctx = context();
        let (first, _rx1) = ctx.open_session(jid("alice@example.com/home"), SessionKind::Client);
        let (_second, _rx2) = ctx.open_session(jid("alice@example.com/home"), SessionKind::Client);
        assert!(first.is_closed());
        assert_eq!(ctx.sessions().count(), 1);
    }

    #[tokio::test]
    async fn test_undeliverable_message_bounces() {
        let ctx = context();
        let (session, mut rx) = ctx.open_session(jid("alice@example.com/home"), SessionKind::Client);
        ctx.authenticate_session(session.address()).unwrap();

        let mut message = Message::new(Some(jid("nobody@example.com/x")));
        message.from = Some(jid("alice@example.com/home"));
        let result = ctx.route_stanza(Stanza::Message(message)).await;

        assert_eq!(result, RoutingResult::NotFound);
        let bounced = rx.try_recv().unwrap().stanza;
        assert_eq!(
            bounced.error_condition(),
            Some(crate::StanzaErrorCondition::ServiceUnavailable)
        );
    }

    #[tokio::test]
    async fn test_server_answers_disco_info() {
        let ctx = context();
        let (session, mut rx) = ctx.open_session(jid("alice@example.com/home"), SessionKind::Client);
        ctx.authenticate_session(session.address()).unwrap();

        let iq = crate::disco::build_disco_info_request(
            jid("alice@example.com/home"),
            jid("example.com"),
            "d1".to_string(),
        );
        assert!(ctx.route_stanza(Stanza::Iq(iq)).await.is_delivered());

        match rx.try_recv().unwrap().stanza {
            Stanza::Iq(reply) => assert!(matches!(reply.payload, IqType::Result(Some(_)))),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sweep_removes_dropped_sessions() {
        let ctx = context();
        let (session, rx) = ctx.open_session(jid("alice@example.com/home"), SessionKind::Client);
        ctx.authenticate_session(session.address()).unwrap();
        drop(rx);

        assert_eq!(ctx.sweep_stale_sessions().await, 1);
        assert_eq!(ctx.sessions().count(), 0);
        assert!(!ctx.routing().has_client_route(&"alice@example.com/home".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_register_muc_is_discoverable() {
        let ctx = context();
        let service = ctx.register_muc().await.unwrap().unwrap();
        assert_eq!(service.registry().muc_domain(), "conference.example.com");
        assert!(ctx.routing().has_component_route(&jid("conference.example.com")));
        let items = ctx.components().disco_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].jid, "conference.example.com");

        ctx.shutdown().await;
        assert!(!ctx.routing().has_component_route(&jid("conference.example.com")));
    }
}
