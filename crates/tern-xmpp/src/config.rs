//! Core configuration.
//!
//! Values are loaded once by the embedding binary and handed to
//! [`ServerContext`](crate::context::ServerContext) as an immutable struct.

use serde::{Deserialize, Serialize};

use crate::muc::RoomConfig;
use crate::XmppError;

/// Configuration of the routing core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// The XMPP domain served by this instance
    pub domain: String,
    /// Route stanzas for remote domains over server-to-server sessions
    pub federation_enabled: bool,
    /// Capacity of each session's outbound channel
    pub session_channel_capacity: usize,
    /// How long a component may take to answer the disco#info probe before
    /// a warning is logged
    pub component_disco_timeout_ms: u64,
    pub muc: MucConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            federation_enabled: true,
            session_channel_capacity: 256,
            component_disco_timeout_ms: 5_000,
            muc: MucConfig::default(),
        }
    }
}

impl CoreConfig {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Self::default()
        }
    }

    /// Check values that would otherwise fail later at registration time.
    pub fn validate(&self) -> Result<(), XmppError> {
        self.domain
            .parse::<jid::BareJid>()
            .ok()
            .filter(|jid| jid.node().is_none())
            .ok_or_else(|| XmppError::config(format!("'{}' is not a valid domain", self.domain)))?;
        if self.session_channel_capacity == 0 {
            return Err(XmppError::config("session_channel_capacity must be positive"));
        }
        if self.muc.enabled && (self.muc.subdomain.is_empty() || self.muc.subdomain.contains('.')) {
            return Err(XmppError::config(format!(
                "'{}' is not a valid MUC subdomain label",
                self.muc.subdomain
            )));
        }
        Ok(())
    }

    /// Full domain of the MUC service.
    pub fn muc_domain(&self) -> String {
        format!("{}.{}", self.muc.subdomain, self.domain)
    }
}

/// Built-in MUC service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MucConfig {
    pub enabled: bool,
    /// Subdomain label, e.g. `conference` for `conference.<domain>`
    pub subdomain: String,
    /// Settings new rooms start with
    pub defaults: RoomConfig,
}

impl Default for MucConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            subdomain: "conference".to_string(),
            defaults: RoomConfig::default(),
        }
    }
}
