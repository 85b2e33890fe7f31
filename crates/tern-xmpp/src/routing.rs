//! Routing Table.
//!
//! Maps an address to a deliverable target and hands stanzas off to it.
//!
//! # Resolution order
//!
//! For `route_packet(address, ..)` the table tries, in order:
//! 1. an exact full-address client route
//! 2. a component route registered for the address' domain
//! 3. a server-to-server route for a remote domain
//! 4. otherwise the address is "not found"
//!
//! Delivery failures are reported back as [`RoutingResult`] values; the
//! table never retries and never bounces on its own. Callers decide.
//!
//! # Example
//!
//! ```ignore
//! use tern_xmpp::routing::{RouterConfig, RouteTarget, RoutingTable};
//!
//! let table = RoutingTable::new(RouterConfig::new("example.com".to_string()));
//! table.add_route(session.address().clone(), RouteTarget::LocalSession(session))?;
//!
//! let result = table.route_packet(&to, stanza, false).await;
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use jid::{BareJid, FullJid, Jid};
use tracing::{debug, instrument, warn};

use crate::component::Component;
use crate::registry::{SendResult, Session};
use crate::stanza::Stanza;
use crate::XmppError;

/// Result of a routing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingResult {
    /// Stanza was handed off to the target
    Delivered,
    /// No route exists for the address
    NotFound,
    /// The address is remote and federation is disabled
    FederationDisabled,
    /// A target exists but refused or failed the handoff
    Failed {
        /// Error description
        reason: String,
    },
}

impl RoutingResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self, RoutingResult::Delivered)
    }
}

/// Configuration for the routing table.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// The local domain for this server
    pub local_domain: String,
    /// Whether S2S federation is enabled
    pub federation_enabled: bool,
}

impl RouterConfig {
    /// Create a new router configuration.
    pub fn new(local_domain: String) -> Self {
        Self {
            local_domain,
            federation_enabled: true,
        }
    }

    /// Enable or disable S2S federation.
    pub fn with_federation(mut self, enabled: bool) -> Self {
        self.federation_enabled = enabled;
        self
    }
}

/// A deliverable target.
#[derive(Clone)]
pub enum RouteTarget {
    /// A locally connected client session
    LocalSession(Arc<Session>),
    /// An in-process component
    InternalComponent(Arc<dyn Component>),
    /// An established server-to-server session for a remote domain
    RemoteServer(Arc<Session>),
    /// An external component connected over its own session
    ComponentProxy(Arc<Session>),
}

impl RouteTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            RouteTarget::LocalSession(_) => "local-session",
            RouteTarget::InternalComponent(_) => "internal-component",
            RouteTarget::RemoteServer(_) => "remote-server",
            RouteTarget::ComponentProxy(_) => "component-proxy",
        }
    }

    fn is_session(&self, session: &Arc<Session>) -> bool {
        match self {
            RouteTarget::LocalSession(s)
            | RouteTarget::RemoteServer(s)
            | RouteTarget::ComponentProxy(s) => Arc::ptr_eq(s, session),
            RouteTarget::InternalComponent(_) => false,
        }
    }

    fn is_component(&self) -> bool {
        matches!(
            self,
            RouteTarget::InternalComponent(_) | RouteTarget::ComponentProxy(_)
        )
    }

    async fn deliver(&self, stanza: Stanza) -> RoutingResult {
        match self {
            RouteTarget::LocalSession(session)
            | RouteTarget::RemoteServer(session)
            | RouteTarget::ComponentProxy(session) => match session.deliver(stanza) {
                SendResult::Sent => RoutingResult::Delivered,
                other => RoutingResult::Failed {
                    reason: format!("{:?}", other),
                },
            },
            RouteTarget::InternalComponent(component) => {
                match component.process_packet(stanza).await {
                    Ok(()) => RoutingResult::Delivered,
                    Err(e) => RoutingResult::Failed {
                        reason: e.to_string(),
                    },
                }
            }
        }
    }
}

impl PartialEq for RouteTarget {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RouteTarget::LocalSession(a), RouteTarget::LocalSession(b))
            | (RouteTarget::RemoteServer(a), RouteTarget::RemoteServer(b))
            | (RouteTarget::ComponentProxy(a), RouteTarget::ComponentProxy(b)) => Arc::ptr_eq(a, b),
            (RouteTarget::InternalComponent(a), RouteTarget::InternalComponent(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            _ => false,
        }
    }
}

impl fmt::Debug for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteTarget::LocalSession(s) => f.debug_tuple("LocalSession").field(s.address()).finish(),
            RouteTarget::InternalComponent(c) => {
                f.debug_tuple("InternalComponent").field(&c.name()).finish()
            }
            RouteTarget::RemoteServer(s) => f.debug_tuple("RemoteServer").field(s.address()).finish(),
            RouteTarget::ComponentProxy(s) => {
                f.debug_tuple("ComponentProxy").field(s.address()).finish()
            }
        }
    }
}

/// Process-wide routing table.
///
/// Client routes are keyed by full address and indexed by bare address so
/// presence fan-out can enumerate every resource of a user. Component and
/// server routes are keyed by domain.
pub struct RoutingTable {
    config: RouterConfig,
    client_routes: DashMap<FullJid, RouteTarget>,
    user_resources: DashMap<BareJid, HashSet<FullJid>>,
    component_routes: DashMap<String, RouteTarget>,
    server_routes: DashMap<String, RouteTarget>,
}

impl RoutingTable {
    pub fn new(config: RouterConfig) -> Self {
        debug!(domain = %config.local_domain, federation = config.federation_enabled, "Creating routing table");
        Self {
            config,
            client_routes: DashMap::new(),
            user_resources: DashMap::new(),
            component_routes: DashMap::new(),
            server_routes: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn server_domain(&self) -> &str {
        &self.config.local_domain
    }

    /// Check if a domain is the local server domain.
    pub fn is_local_domain(&self, domain: &str) -> bool {
        domain == self.config.local_domain
    }

    /// Register a deliverable target, overwriting any existing entry for the
    /// exact same address.
    ///
    /// Client sessions need a full address. Component and server routes are
    /// keyed by the address' domain.
    #[instrument(skip(self, target), fields(address = %address, kind = target.kind()))]
    pub fn add_route(&self, address: Jid, target: RouteTarget) -> Result<(), XmppError> {
        let domain = address.domain().as_str().to_string();
        let replaced = if matches!(target, RouteTarget::LocalSession(_)) {
            let full = address.try_into_full().map_err(|bare| {
                XmppError::bad_request(Some(format!(
                    "client route for {} needs a full address",
                    bare
                )))
            })?;
            self.insert_client_route(full, target)
        } else if target.is_component() {
            self.component_routes.insert(domain, target).is_some()
        } else {
            self.server_routes.insert(domain, target).is_some()
        };

        if replaced {
            debug!("Replaced existing route");
        } else {
            debug!("Added route");
        }
        Ok(())
    }

    /// Remove the entry registered for exactly this address.
    ///
    /// Full addresses remove client routes, domain addresses remove the
    /// component or server route for that domain. No-op if absent.
    #[instrument(skip(self), fields(address = %address))]
    pub fn remove_route(&self, address: &Jid) -> Option<RouteTarget> {
        let removed = match address.clone().try_into_full() {
            Ok(full) => self.remove_client_route(&full),
            Err(bare) if bare.node().is_none() => {
                let domain = bare.domain().as_str();
                self.component_routes
                    .remove(domain)
                    .or_else(|| self.server_routes.remove(domain))
                    .map(|(_, target)| target)
            }
            Err(_) => None,
        };

        if removed.is_some() {
            debug!("Removed route");
        }
        removed
    }

    // Client routes change only while the bare-address index entry is held,
    // always locking `user_resources` before `client_routes`.
    fn insert_client_route(&self, full: FullJid, target: RouteTarget) -> bool {
        let mut resources = self.user_resources.entry(full.to_bare()).or_default();
        resources.insert(full.clone());
        self.client_routes.insert(full, target).is_some()
    }

    fn remove_client_route(&self, full: &FullJid) -> Option<RouteTarget> {
        self.remove_client_route_if(full, |_| true)
    }

    fn remove_client_route_if(
        &self,
        full: &FullJid,
        predicate: impl FnOnce(&RouteTarget) -> bool,
    ) -> Option<RouteTarget> {
        match self.user_resources.entry(full.to_bare()) {
            Entry::Occupied(mut resources) => {
                let removed = self
                    .client_routes
                    .remove_if(full, |_, target| predicate(target))
                    .map(|(_, target)| target);
                if removed.is_some() {
                    resources.get_mut().remove(full);
                    if resources.get().is_empty() {
                        resources.remove();
                    }
                }
                removed
            }
            Entry::Vacant(_) => self
                .client_routes
                .remove_if(full, |_, target| predicate(target))
                .map(|(_, target)| target),
        }
    }

    /// Remove every client route under a bare address.
    pub fn remove_client_routes_for(&self, bare: &BareJid) -> Vec<FullJid> {
        let Entry::Occupied(mut resources) = self.user_resources.entry(bare.clone()) else {
            return Vec::new();
        };
        let removed = std::mem::take(resources.get_mut());
        for full in &removed {
            self.client_routes.remove(full);
        }
        resources.remove();
        removed.into_iter().collect()
    }

    /// Remove every route whose target is `session`.
    ///
    /// Routes that a newer session has since taken over are left alone.
    /// Returns how many routes were removed.
    #[instrument(skip(self, session), fields(address = %session.address()))]
    pub fn remove_session_routes(&self, session: &Arc<Session>) -> usize {
        let mut removed = 0;
        for full in self.routes_for_session(session) {
            if self
                .remove_client_route_if(&full, |target| target.is_session(session))
                .is_some()
            {
                removed += 1;
            }
        }
        for routes in [&self.component_routes, &self.server_routes] {
            let domains: Vec<String> = routes
                .iter()
                .filter(|entry| entry.value().is_session(session))
                .map(|entry| entry.key().clone())
                .collect();
            for domain in domains {
                if routes
                    .remove_if(&domain, |_, target| target.is_session(session))
                    .is_some()
                {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!(removed, "Removed session routes");
        }
        removed
    }

    /// Resolve an address and hand the stanza to its target.
    ///
    /// `ignore_errors` only lowers the log level of a failed handoff; the
    /// outcome is always returned.
    #[instrument(skip(self, stanza), fields(to = %address, stanza = stanza.name()))]
    pub async fn route_packet(
        &self,
        address: &Jid,
        stanza: Stanza,
        ignore_errors: bool,
    ) -> RoutingResult {
        let Some(target) = self.resolve(address) else {
            let result = self.unresolved(address);
            debug!(result = ?result, "No route for address");
            return result;
        };

        let result = target.deliver(stanza).await;
        if let RoutingResult::Failed { reason } = &result {
            if ignore_errors {
                debug!(target = target.kind(), %reason, "Delivery failed");
            } else {
                warn!(target = target.kind(), %reason, "Delivery failed");
            }
        }
        result
    }

    /// Look up the target for an address without delivering.
    pub fn resolve(&self, address: &Jid) -> Option<RouteTarget> {
        if let Ok(full) = address.clone().try_into_full() {
            if let Some(target) = self.client_routes.get(&full) {
                return Some(target.value().clone());
            }
        }

        let domain = address.domain().as_str();
        if let Some(target) = self.component_routes.get(domain) {
            return Some(target.value().clone());
        }

        if !self.is_local_domain(domain) && self.config.federation_enabled {
            if let Some(target) = self.server_routes.get(domain) {
                return Some(target.value().clone());
            }
        }

        None
    }

    fn unresolved(&self, address: &Jid) -> RoutingResult {
        let domain = address.domain().as_str();
        if !self.is_local_domain(domain) && !self.config.federation_enabled {
            RoutingResult::FederationDisabled
        } else {
            RoutingResult::NotFound
        }
    }

    /// Every route under a bare address, except `excluding`.
    ///
    /// Local users resolve to their connected resources. A bare address on a
    /// component or remote domain resolves to itself so that delivery goes
    /// through the component or server-to-server route.
    pub fn get_routes(&self, bare: &BareJid, excluding: Option<&Jid>) -> Vec<Jid> {
        let resources: Vec<FullJid> = self
            .user_resources
            .get(bare)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        let routes: Vec<Jid> = if !resources.is_empty() {
            resources.into_iter().map(Jid::from).collect()
        } else {
            let domain = bare.domain().as_str();
            if self.component_routes.contains_key(domain) || !self.is_local_domain(domain) {
                vec![Jid::from(bare.clone())]
            } else {
                Vec::new()
            }
        };

        match excluding {
            Some(excluded) => routes.into_iter().filter(|jid| jid != excluded).collect(),
            None => routes,
        }
    }

    /// Delivery addresses for a stanza addressed to `address`.
    ///
    /// A full address with a client route resolves to itself only; a full
    /// address on the local domain without one resolves to nothing. Anything
    /// else fans out like [`get_routes`](Self::get_routes).
    pub fn get_routes_for(&self, address: &Jid, excluding: Option<&Jid>) -> Vec<Jid> {
        if let Ok(full) = address.clone().try_into_full() {
            if self.client_routes.contains_key(&full) {
                return if excluding == Some(address) {
                    Vec::new()
                } else {
                    vec![address.clone()]
                };
            }
            if self.is_local_domain(full.domain().as_str()) {
                return Vec::new();
            }
        }
        self.get_routes(&address.to_bare(), excluding)
    }

    /// Check if a component is registered for the address' domain.
    pub fn has_component_route(&self, address: &Jid) -> bool {
        self.component_routes
            .get(address.domain().as_str())
            .map(|target| target.is_component())
            .unwrap_or(false)
    }

    pub fn has_client_route(&self, address: &FullJid) -> bool {
        self.client_routes.contains_key(address)
    }

    pub fn has_server_route(&self, domain: &str) -> bool {
        self.server_routes.contains_key(domain)
    }

    pub fn get_client_route(&self, address: &FullJid) -> Option<RouteTarget> {
        self.client_routes.get(address).map(|t| t.value().clone())
    }

    pub fn client_route_count(&self) -> usize {
        self.client_routes.len()
    }

    /// Domains with a registered component route.
    pub fn component_domains(&self) -> Vec<String> {
        self.component_routes.iter().map(|e| e.key().clone()).collect()
    }

    /// All client routes whose target is the given session.
    pub fn routes_for_session(&self, session: &Arc<Session>) -> Vec<FullJid> {
        self.client_routes
            .iter()
            .filter(|entry| entry.value().is_session(session))
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingTable")
            .field("local_domain", &self.config.local_domain)
            .field("client_routes", &self.client_routes.len())
            .field("component_routes", &self.component_routes.len())
            .field("server_routes", &self.server_routes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentDispatcher;
    use crate::stanza::OutboundStanza;
    use crate::types::SessionKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use xmpp_parsers::presence::{Presence, Type as PresenceType};

    fn create_test_table() -> RoutingTable {
        RoutingTable::new(RouterConfig::new("example.com".to_string()))
    }

    fn jid(s: &str) -> Jid {
        s.parse().unwrap()
    }

    fn session(
        address: &str,
        kind: SessionKind,
    ) -> (Arc<Session>, mpsc::Receiver<OutboundStanza>) {
        let (tx, rx) = mpsc::channel(16);
        (Arc::new(Session::new(jid(address), kind, tx)), rx)
    }

    fn presence_to(to: &str) -> Stanza {
        let mut presence = Presence::new(PresenceType::None);
        presence.to = Some(jid(to));
        Stanza::Presence(presence)
    }

    #[derive(Default)]
    struct CountingComponent {
        received: AtomicUsize,
    }

    #[async_trait]
    impl Component for CountingComponent {
        fn name(&self) -> &str {
            "counting"
        }

        async fn initialize(
            &self,
            _address: BareJid,
            _dispatcher: ComponentDispatcher,
        ) -> Result<(), XmppError> {
            Ok(())
        }

        async fn process_packet(&self, _stanza: Stanza) -> Result<(), XmppError> {
            self.received.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_add_route_is_idempotent() {
        let table = create_test_table();
        let (s, _rx) = session("user@example.com/phone", SessionKind::Client);
        let target = RouteTarget::LocalSession(Arc::clone(&s));

        table.add_route(jid("user@example.com/phone"), target.clone()).unwrap();
        table.add_route(jid("user@example.com/phone"), target.clone()).unwrap();

        assert_eq!(table.client_route_count(), 1);
        let full: FullJid = "user@example.com/phone".parse().unwrap();
        assert_eq!(table.get_client_route(&full), Some(target));
        assert_eq!(
            table.get_routes(&full.to_bare(), None),
            vec![jid("user@example.com/phone")]
        );
    }

    #[test]
    fn test_racing_add_and_remove_keep_fan_out_index() {
        let table = Arc::new(create_test_table());
        let (s, _rx) = session("user@example.com/phone", SessionKind::Client);
        let full: FullJid = "user@example.com/phone".parse().unwrap();

        let adder = {
            let table = Arc::clone(&table);
            let s = Arc::clone(&s);
            std::thread::spawn(move || {
                for _ in 0..2000 {
                    table
                        .add_route(jid("user@example.com/phone"), RouteTarget::LocalSession(Arc::clone(&s)))
                        .unwrap();
                }
            })
        };
        let remover = {
            let table = Arc::clone(&table);
            std::thread::spawn(move || {
                for _ in 0..2000 {
                    table.remove_route(&jid("user@example.com/phone"));
                }
            })
        };
        adder.join().unwrap();
        remover.join().unwrap();

        let indexed = table
            .get_routes(&full.to_bare(), None)
            .contains(&jid("user@example.com/phone"));
        assert_eq!(table.has_client_route(&full), indexed);
    }

    #[test]
    fn test_remove_session_routes_spares_successor() {
        let table = create_test_table();
        let (old, _rx1) = session("user@example.com/phone", SessionKind::Client);
        let (new, _rx2) = session("user@example.com/phone", SessionKind::Client);
        let (gateway, _rx3) = session("irc.example.com", SessionKind::Component);
        table
            .add_route(jid("user@example.com/phone"), RouteTarget::LocalSession(Arc::clone(&old)))
            .unwrap();
        table
            .add_route(jid("user@example.com/phone"), RouteTarget::LocalSession(Arc::clone(&new)))
            .unwrap();
        table
            .add_route(jid("irc.example.com"), RouteTarget::ComponentProxy(Arc::clone(&gateway)))
            .unwrap();

        assert_eq!(table.remove_session_routes(&old), 0);
        let full: FullJid = "user@example.com/phone".parse().unwrap();
        assert_eq!(table.get_client_route(&full), Some(RouteTarget::LocalSession(Arc::clone(&new))));

        assert_eq!(table.remove_session_routes(&new), 1);
        assert!(table.get_routes(&full.to_bare(), None).is_empty());

        assert_eq!(table.remove_session_routes(&gateway), 1);
        assert!(!table.has_component_route(&jid("irc.example.com")));
    }

    #[test]
    fn test_add_route_overwrites() {
        let table = create_test_table();
        let (first, _rx1) = session("user@example.com/phone", SessionKind::Client);
        let (second, _rx2) = session("user@example.com/phone", SessionKind::Client);

        table
            .add_route(jid("user@example.com/phone"), RouteTarget::LocalSession(first))
            .unwrap();
        table
            .add_route(
                jid("user@example.com/phone"),
                RouteTarget::LocalSession(Arc::clone(&second)),
            )
            .unwrap();

        let full: FullJid = "user@example.com/phone".parse().unwrap();
        assert_eq!(
            table.get_client_route(&full),
            Some(RouteTarget::LocalSession(second))
        );
    }

    #[test]
    fn test_client_route_requires_full_address() {
        let table = create_test_table();
        let (s, _rx) = session("user@example.com/phone", SessionKind::Client);
        assert!(table
            .add_route(jid("user@example.com"), RouteTarget::LocalSession(s))
            .is_err());
    }

    #[test]
    fn test_get_routes_excludes_requester() {
        let table = create_test_table();
        let (phone, _rx1) = session("r1@ex.com/phone", SessionKind::Client);
        let (laptop, _rx2) = session("r1@ex.com/laptop", SessionKind::Client);
        table
            .add_route(jid("r1@ex.com/phone"), RouteTarget::LocalSession(phone))
            .unwrap();
        table
            .add_route(jid("r1@ex.com/laptop"), RouteTarget::LocalSession(laptop))
            .unwrap();

        let bare: BareJid = "r1@ex.com".parse().unwrap();
        let routes = table.get_routes(&bare, Some(&jid("r1@ex.com/phone")));
        assert_eq!(routes, vec![jid("r1@ex.com/laptop")]);
        assert_eq!(table.get_routes(&bare, None).len(), 2);
    }

    #[test]
    fn test_get_routes_for_offline_local_user_is_empty() {
        let table = create_test_table();
        let bare: BareJid = "nobody@example.com".parse().unwrap();
        assert!(table.get_routes(&bare, None).is_empty());
    }

    #[test]
    fn test_get_routes_for_remote_user_is_the_bare_address() {
        let table = create_test_table();
        let bare: BareJid = "b@remote.org".parse().unwrap();
        assert_eq!(table.get_routes(&bare, None), vec![jid("b@remote.org")]);
    }

    #[test]
    fn test_get_routes_for_full_address_targets_one_resource() {
        let table = create_test_table();
        let (phone, _rx1) = session("r1@example.com/phone", SessionKind::Client);
        let (laptop, _rx2) = session("r1@example.com/laptop", SessionKind::Client);
        table
            .add_route(jid("r1@example.com/phone"), RouteTarget::LocalSession(phone))
            .unwrap();
        table
            .add_route(jid("r1@example.com/laptop"), RouteTarget::LocalSession(laptop))
            .unwrap();

        assert_eq!(
            table.get_routes_for(&jid("r1@example.com/laptop"), None),
            vec![jid("r1@example.com/laptop")]
        );
        assert!(table
            .get_routes_for(&jid("r1@example.com/tablet"), None)
            .is_empty());
        assert_eq!(table.get_routes_for(&jid("r1@example.com"), None).len(), 2);
    }

    #[test]
    fn test_remove_route() {
        let table = create_test_table();
        let (s, _rx) = session("user@example.com/phone", SessionKind::Client);
        table
            .add_route(jid("user@example.com/phone"), RouteTarget::LocalSession(s))
            .unwrap();

        assert!(table.remove_route(&jid("user@example.com/phone")).is_some());
        assert!(table.remove_route(&jid("user@example.com/phone")).is_none());
        assert_eq!(table.client_route_count(), 0);
        let bare: BareJid = "user@example.com".parse().unwrap();
        assert!(table.get_routes(&bare, None).is_empty());
    }

    #[tokio::test]
    async fn test_route_packet_exact_full_match() {
        let table = create_test_table();
        let (s, mut rx) = session("user@example.com/phone", SessionKind::Client);
        table
            .add_route(jid("user@example.com/phone"), RouteTarget::LocalSession(s))
            .unwrap();

        let result = table
            .route_packet(&jid("user@example.com/phone"), presence_to("user@example.com/phone"), false)
            .await;

        assert_eq!(result, RoutingResult::Delivered);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_route_packet_not_found() {
        let table = create_test_table();
        let result = table
            .route_packet(&jid("user@example.com/phone"), presence_to("user@example.com/phone"), false)
            .await;
        assert_eq!(result, RoutingResult::NotFound);
    }

    #[tokio::test]
    async fn test_route_packet_to_component() {
        let table = create_test_table();
        let component = Arc::new(CountingComponent::default());
        table
            .add_route(
                jid("proxy.example.com"),
                RouteTarget::InternalComponent(component.clone()),
            )
            .unwrap();

        assert!(table.has_component_route(&jid("anything@proxy.example.com")));
        let result = table
            .route_packet(&jid("room@proxy.example.com/nick"), presence_to("room@proxy.example.com/nick"), false)
            .await;

        assert_eq!(result, RoutingResult::Delivered);
        assert_eq!(component.received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_route_packet_to_remote_server() {
        let table = create_test_table();
        let (s2s, mut rx) = session("remote.org", SessionKind::Server);
        table
            .add_route(jid("remote.org"), RouteTarget::RemoteServer(s2s))
            .unwrap();

        let result = table
            .route_packet(&jid("b@remote.org"), presence_to("b@remote.org"), false)
            .await;

        assert_eq!(result, RoutingResult::Delivered);
        assert!(rx.try_recv().is_ok());
        assert!(table.has_server_route("remote.org"));
    }

    #[tokio::test]
    async fn test_route_packet_federation_disabled() {
        let table = RoutingTable::new(
            RouterConfig::new("example.com".to_string()).with_federation(false),
        );
        let (s2s, _rx) = session("remote.org", SessionKind::Server);
        table
            .add_route(jid("remote.org"), RouteTarget::RemoteServer(s2s))
            .unwrap();

        let result = table
            .route_packet(&jid("b@remote.org"), presence_to("b@remote.org"), false)
            .await;
        assert_eq!(result, RoutingResult::FederationDisabled);
    }

    #[tokio::test]
    async fn test_route_packet_reports_closed_session() {
        let table = create_test_table();
        let (s, rx) = session("user@example.com/phone", SessionKind::Client);
        table
            .add_route(jid("user@example.com/phone"), RouteTarget::LocalSession(s))
            .unwrap();
        drop(rx);

        let result = table
            .route_packet(&jid("user@example.com/phone"), presence_to("user@example.com/phone"), true)
            .await;
        assert!(matches!(result, RoutingResult::Failed { .. }));
    }

    #[test]
    fn test_routes_for_session() {
        let table = create_test_table();
        let (s, _rx) = session("user@example.com/phone", SessionKind::Client);
        table
            .add_route(
                jid("user@example.com/phone"),
                RouteTarget::LocalSession(Arc::clone(&s)),
            )
            .unwrap();

        assert_eq!(table.routes_for_session(&s).len(), 1);
        let bare: BareJid = "user@example.com".parse().unwrap();
        assert_eq!(table.remove_client_routes_for(&bare).len(), 1);
        assert_eq!(table.client_route_count(), 0);
    }
}
