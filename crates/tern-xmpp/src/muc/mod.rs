//! Multi-User Chat (XEP-0045).
//!
//! Rooms are plain state guarded by a `tokio::sync::RwLock` and looked up
//! through [`MucRoomRegistry`]. Each [`Occupant`] carries a role (in-room,
//! session-scoped) and an affiliation (long-term standing). The two are set
//! independently but [`Occupant`] keeps them consistent:
//!
//! - `outcast` always has role `none`
//! - `owner` and `admin` are always `moderator` while present
//!
//! [`MucService`] exposes rooms on the wire as an internal component.

pub mod admin;
mod affiliation;
mod events;
mod occupant;
pub mod presence;
mod room;
mod room_registry;
mod service;

pub use affiliation::{AffiliationChange, AffiliationList};
pub use events::{MucEvent, MucEventDispatcher, MucEventListener};
pub use occupant::Occupant;
pub use room::{AffiliationOutcome, MucRoom, RoleOutcome};
pub use room_registry::{MucRoomRegistry, RoomInfo};
pub use service::MucService;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::XmppError;

/// A rejected room operation.
///
/// Occupant and room state are left untouched when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MucError {
    #[error("not allowed: {0}")]
    NotAllowed(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("room is members-only")]
    RegistrationRequired,
    #[error("room is full")]
    ServiceUnavailable,
    #[error("not found: {0}")]
    ItemNotFound(String),
    #[error("occupant has left the room")]
    Destroyed,
}

impl From<MucError> for XmppError {
    fn from(err: MucError) -> Self {
        let text = Some(err.to_string());
        match err {
            MucError::NotAllowed(_) => XmppError::not_allowed(text),
            MucError::Forbidden(_) => XmppError::forbidden(text),
            MucError::Conflict(_) => XmppError::conflict(text),
            MucError::RegistrationRequired => XmppError::registration_required(text),
            MucError::ServiceUnavailable => XmppError::service_unavailable(text),
            MucError::ItemNotFound(_) | MucError::Destroyed => XmppError::item_not_found(text),
        }
    }
}

/// Room configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Human-readable room name
    pub name: String,
    pub description: Option<String>,
    /// Kept when the last occupant leaves
    pub persistent: bool,
    /// Only members and above may join
    pub members_only: bool,
    /// Occupants without affiliation join as visitors
    pub moderated: bool,
    /// Maximum number of occupants (0 = unlimited)
    pub max_occupants: u32,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: None,
            persistent: false,
            members_only: false,
            moderated: false,
            max_occupants: 0,
        }
    }
}
