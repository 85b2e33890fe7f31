//! Component manager: lifecycle, disco registration and probe replay.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use jid::{BareJid, Jid};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::presence::Presence;

use super::{Component, ComponentDispatcher, ComponentEventListener};
use crate::address::{domain_jid, is_server_address, strip_server_suffix};
use crate::disco::{
    build_disco_info_request, build_disco_items_response, parse_identities, DiscoItem, Identity,
    DISCO_INFO_NS,
};
use crate::routing::{RouteTarget, RoutingResult, RoutingTable};
use crate::stanza::Stanza;
use crate::XmppError;

/// Dispatch table from subdomain to registered component.
///
/// Components are keyed by their subdomain label (`proxy`), and addressed on
/// the wire as `proxy.<server domain>`.
pub struct ComponentManager {
    server_domain: String,
    routing: Arc<RoutingTable>,
    components: DashMap<String, Arc<dyn Component>>,
    component_info: DashMap<String, Vec<Identity>>,
    disco_items: DashMap<String, DiscoItem>,
    /// Probes waiting for a component route, keyed by prober.
    pending_probes: DashMap<Jid, Presence>,
    listeners: RwLock<Vec<Arc<dyn ComponentEventListener>>>,
}

impl ComponentManager {
    pub fn new(server_domain: String, routing: Arc<RoutingTable>) -> Arc<Self> {
        Arc::new(Self {
            server_domain,
            routing,
            components: DashMap::new(),
            component_info: DashMap::new(),
            disco_items: DashMap::new(),
            pending_probes: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Address the server uses when talking to components.
    pub fn service_address(&self) -> Result<BareJid, XmppError> {
        domain_jid(&self.server_domain)
    }

    fn full_domain(&self, subdomain: &str) -> String {
        format!("{}.{}", subdomain, self.server_domain)
    }

    /// Register a component under `subdomain.<server domain>`.
    ///
    /// The subdomain is claimed first, then the routing entry is added and
    /// the component is initialized and started. Any failure releases the
    /// claim and the route and is returned to the caller; nothing stays
    /// registered.
    #[instrument(skip(self, component), fields(subdomain = %subdomain, component = component.name()))]
    pub async fn add_component(
        self: &Arc<Self>,
        subdomain: &str,
        component: Arc<dyn Component>,
    ) -> Result<(), XmppError> {
        let domain = self.full_domain(subdomain);
        let address = domain_jid(&domain)?;
        let jid = Jid::from(address.clone());

        match self.components.entry(subdomain.to_string()) {
            Entry::Occupied(_) => {
                return Err(XmppError::conflict(Some(format!(
                    "subdomain '{}' already has a component",
                    subdomain
                ))));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&component));
            }
        }

        let target = RouteTarget::InternalComponent(Arc::clone(&component));
        if let Err(e) = self.routing.add_route(jid.clone(), target) {
            self.release(subdomain, &component);
            return Err(e);
        }

        let dispatcher = ComponentDispatcher::new(address.clone(), Arc::downgrade(self));
        let started = async {
            component.initialize(address.clone(), dispatcher).await?;
            component.start().await
        }
        .await;

        if let Err(e) = started {
            warn!(error = %e, "Component failed to start, rolling back registration");
            self.routing.remove_route(&jid);
            self.release(subdomain, &component);
            return Err(e);
        }

        info!(address = %address, "Component registered");
        for listener in self.listeners() {
            listener.component_registered(&address);
        }

        self.check_presences().await;
        self.check_disco_support(&address).await;
        Ok(())
    }

    /// Drop the claim on `subdomain` if `component` still holds it.
    fn release(&self, subdomain: &str, component: &Arc<dyn Component>) {
        self.components
            .remove_if(subdomain, |_, held| Arc::ptr_eq(held, component));
    }

    /// Unregister the component at `subdomain`.
    ///
    /// The route and disco registration go first, then the component is
    /// shut down. Unknown subdomains are ignored.
    #[instrument(skip(self), fields(subdomain = %subdomain))]
    pub async fn remove_component(&self, subdomain: &str) {
        let Some((_, component)) = self.components.remove(subdomain) else {
            debug!("No component registered at subdomain");
            return;
        };

        let domain = self.full_domain(subdomain);
        let address = match domain_jid(&domain) {
            Ok(address) => address,
            Err(e) => {
                warn!(error = %e, "Registered component has an invalid address");
                component.shutdown().await;
                return;
            }
        };

        self.routing.remove_route(&Jid::from(address.clone()));
        self.disco_items.remove(&domain);
        self.component_info.remove(&domain);

        component.shutdown().await;
        info!(address = %address, "Component unregistered");

        for listener in self.listeners() {
            listener.component_unregistered(&address);
        }
    }

    /// Remove every registered component.
    pub async fn remove_all(&self) {
        let subdomains: Vec<String> = self.components.iter().map(|e| e.key().clone()).collect();
        for subdomain in subdomains {
            self.remove_component(&subdomain).await;
        }
    }

    /// Find the component serving an address.
    ///
    /// The domain is tried as-is first and then with the server suffix
    /// stripped, so both `proxy` and `proxy.example.com` resolve. Addresses
    /// with a node never resolve to a component.
    pub fn get_component(&self, address: &Jid) -> Option<Arc<dyn Component>> {
        if address.node().is_some() {
            return None;
        }
        self.component_key(address.domain().as_str())
            .and_then(|key| self.components.get(&key).map(|c| Arc::clone(c.value())))
    }

    fn component_key(&self, domain: &str) -> Option<String> {
        if self.components.contains_key(domain) {
            return Some(domain.to_string());
        }
        strip_server_suffix(domain, &self.server_domain)
            .filter(|sub| self.components.contains_key(*sub))
            .map(str::to_string)
    }

    /// True if the address' domain belongs to a registered component.
    ///
    /// Unlike [`get_component`](Self::get_component) this accepts addresses
    /// with a node, e.g. a room on the MUC service.
    pub fn is_component_domain(&self, domain: &str) -> bool {
        self.component_key(domain).is_some()
    }

    pub fn has_component(&self, address: &Jid) -> bool {
        self.get_component(address).is_some()
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Identities a component reported in its disco#info answer.
    pub fn component_info(&self, domain: &str) -> Option<Vec<Identity>> {
        self.component_info.get(domain).map(|i| i.value().clone())
    }

    /// Items listed in the server's disco#items.
    pub fn disco_items(&self) -> Vec<DiscoItem> {
        let mut items: Vec<DiscoItem> = self.disco_items.iter().map(|i| i.value().clone()).collect();
        items.sort_by(|a, b| a.jid.cmp(&b.jid));
        items
    }

    /// Answer a disco#items query on the server domain.
    pub fn disco_items_response(&self, iq: &Iq) -> Iq {
        build_disco_items_response(iq, &self.disco_items())
    }

    pub fn add_listener(&self, listener: Arc<dyn ComponentEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn listeners(&self) -> Vec<Arc<dyn ComponentEventListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Queue a probe for a component that is not reachable yet.
    ///
    /// One probe is kept per prober; a newer probe replaces an older one.
    pub fn add_presence_request(&self, prober: Jid, probe: Presence) {
        debug!(prober = %prober, probee = ?probe.to, "Queued presence probe for component");
        self.pending_probes.insert(prober, probe);
    }

    pub fn pending_probe_count(&self) -> usize {
        self.pending_probes.len()
    }

    /// Deliver queued probes whose target now has a component route.
    ///
    /// Each probe is delivered at most once.
    pub async fn check_presences(&self) {
        let ready: Vec<Jid> = self
            .pending_probes
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .to
                    .as_ref()
                    .map(|to| self.routing.has_component_route(to))
                    .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();

        for prober in ready {
            let Some((_, probe)) = self.pending_probes.remove(&prober) else {
                continue;
            };
            let Some(to) = probe.to.clone() else {
                continue;
            };
            debug!(prober = %prober, probee = %to, "Replaying queued presence probe");
            self.routing
                .route_packet(&to, Stanza::Presence(probe), false)
                .await;
        }
    }

    async fn check_disco_support(&self, component: &BareJid) {
        let from = match self.service_address() {
            Ok(address) => Jid::from(address),
            Err(e) => {
                warn!(error = %e, "Invalid server domain, skipping disco#info probe");
                return;
            }
        };
        let request = build_disco_info_request(
            from,
            Jid::from(component.clone()),
            format!("disco-{}", Uuid::new_v4()),
        );
        let result = self
            .routing
            .route_packet(&Jid::from(component.clone()), Stanza::Iq(request), true)
            .await;
        debug!(component = %component, result = ?result, "Sent disco#info probe to component");
    }

    /// Route a stanza sent by a component.
    ///
    /// Stanzas addressed to the server itself are interpreted here; anything
    /// else goes through the routing table.
    pub async fn send_packet(&self, stanza: Stanza) -> Result<RoutingResult, XmppError> {
        if stanza.from().is_none() {
            return Err(XmppError::bad_request(Some(
                "packet with no from address received from component".into(),
            )));
        }
        let to = stanza
            .to()
            .cloned()
            .ok_or_else(|| XmppError::bad_request(Some("packet has no recipient".into())))?;

        if is_server_address(&to, &self.server_domain) {
            return Ok(if self.process(&stanza) {
                RoutingResult::Delivered
            } else {
                debug!(stanza = stanza.name(), "Component packet for the server was not handled");
                RoutingResult::NotFound
            });
        }

        Ok(self.routing.route_packet(&to, stanza, false).await)
    }

    /// Interpret a packet sent by a component to the server.
    ///
    /// Only packets from registered components are considered. Returns true
    /// if the packet was consumed.
    pub fn process(&self, stanza: &Stanza) -> bool {
        let Some(from) = stanza.from() else {
            return false;
        };
        let domain = from.domain().as_str();
        if self.component_key(domain).is_none() {
            debug!(from = %from, "Ignoring packet from unregistered component");
            return false;
        }

        let Stanza::Iq(iq) = stanza else {
            return false;
        };

        match &iq.payload {
            IqType::Result(Some(query)) if query.is("query", DISCO_INFO_NS) => {
                let identities = parse_identities(iq);
                let address = from.to_bare();
                if let Some(identity) = identities.first() {
                    self.disco_items.insert(
                        domain.to_string(),
                        DiscoItem::new(domain, identity.name.as_deref()),
                    );
                    info!(component = %address, name = ?identity.name, "Component is discoverable");
                }
                for listener in self.listeners() {
                    listener.component_info_received(&address, &identities);
                }
                self.component_info.insert(domain.to_string(), identities);
                true
            }
            IqType::Error(_) => {
                debug!(from = %from, "Component does not answer disco#info");
                true
            }
            _ => false,
        }
    }
}

impl fmt::Debug for ComponentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentManager")
            .field("server_domain", &self.server_domain)
            .field("component_count", &self.components.len())
            .field("pending_probes", &self.pending_probes.len())
            .finish()
    }
}
