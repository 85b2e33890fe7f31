//! Component Dispatch Table.
//!
//! Internal components are services addressed at `<subdomain>.<server domain>`
//! (a MUC service, a file proxy, a gateway). The [`ComponentManager`] owns
//! their lifecycle: it registers the routing entry, initializes and starts
//! the component, probes it with disco#info and exposes it through
//! disco#items once it answers.
//!
//! ## Lifecycle
//!
//! ```text
//! add_component ─> route added ─> initialize ─> start ─> probes replayed ─> disco#info sent
//!                       │              │           │
//!                       └──── rolled back on any failure
//! ```

mod manager;

use std::sync::Weak;

use async_trait::async_trait;
use jid::BareJid;

use crate::disco::Identity;
use crate::routing::RoutingResult;
use crate::stanza::Stanza;
use crate::XmppError;

pub use manager::ComponentManager;

/// An internal component.
///
/// Every method is called by the [`ComponentManager`] or the routing table;
/// components never see stanzas that were not addressed to their domain.
#[async_trait]
pub trait Component: Send + Sync {
    /// Human-readable component name.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Called once after the routing entry exists.
    ///
    /// A failure here aborts the registration and rolls the route back.
    async fn initialize(
        &self,
        address: BareJid,
        dispatcher: ComponentDispatcher,
    ) -> Result<(), XmppError>;

    /// Called after a successful `initialize`.
    async fn start(&self) -> Result<(), XmppError> {
        Ok(())
    }

    /// Called after the component's routing entry has been removed.
    async fn shutdown(&self) {}

    /// Handle a stanza addressed to the component's domain.
    async fn process_packet(&self, stanza: Stanza) -> Result<(), XmppError>;
}

/// Handle given to a component for sending stanzas back into the server.
#[derive(Clone)]
pub struct ComponentDispatcher {
    address: BareJid,
    manager: Weak<ComponentManager>,
}

impl ComponentDispatcher {
    pub(crate) fn new(address: BareJid, manager: Weak<ComponentManager>) -> Self {
        Self { address, manager }
    }

    /// Address the component was registered at.
    pub fn address(&self) -> &BareJid {
        &self.address
    }

    /// Route a stanza on behalf of the component.
    ///
    /// The stanza must carry a `from` address.
    pub async fn send(&self, stanza: Stanza) -> Result<RoutingResult, XmppError> {
        let manager = self
            .manager
            .upgrade()
            .ok_or_else(|| XmppError::service_unavailable(Some("server is shutting down".into())))?;
        manager.send_packet(stanza).await
    }
}

impl std::fmt::Debug for ComponentDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDispatcher")
            .field("address", &self.address)
            .finish()
    }
}

/// Observer of component registrations.
pub trait ComponentEventListener: Send + Sync {
    fn component_registered(&self, _address: &BareJid) {}

    fn component_unregistered(&self, _address: &BareJid) {}

    /// The component answered the server's disco#info probe.
    fn component_info_received(&self, _address: &BareJid, _identities: &[Identity]) {}
}
