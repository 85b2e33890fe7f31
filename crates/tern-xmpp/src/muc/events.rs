//! Room event fan-out.

use std::sync::{Arc, PoisonError, RwLock};

use jid::{BareJid, FullJid};
use tracing::trace;

use crate::types::{Affiliation, Role};

/// Something that happened in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MucEvent {
    RoomCreated {
        room: BareJid,
        creator: BareJid,
    },
    RoomDestroyed {
        room: BareJid,
    },
    OccupantJoined {
        room: BareJid,
        user: FullJid,
        nick: String,
    },
    OccupantLeft {
        room: BareJid,
        user: FullJid,
        nick: String,
    },
    NicknameChanged {
        room: BareJid,
        user: FullJid,
        old_nick: String,
        new_nick: String,
    },
    RoleChanged {
        room: BareJid,
        nick: String,
        old_role: Role,
        new_role: Role,
    },
    AffiliationChanged {
        room: BareJid,
        user: BareJid,
        old_affiliation: Affiliation,
        new_affiliation: Affiliation,
    },
}

/// Receives room events.
///
/// Called with the room lock held, so implementations must not block.
pub trait MucEventListener: Send + Sync {
    fn on_event(&self, event: &MucEvent);
}

/// Fans events out to every registered listener, in registration order.
#[derive(Default)]
pub struct MucEventDispatcher {
    listeners: RwLock<Vec<Arc<dyn MucEventListener>>>,
}

impl MucEventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn MucEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn MucEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn dispatch(&self, event: MucEvent) {
        trace!(?event, "Dispatching MUC event");
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.on_event(&event);
        }
    }
}

impl std::fmt::Debug for MucEventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MucEventDispatcher")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
