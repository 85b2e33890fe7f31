//! Presence routing.
//!
//! [`PresenceRouter`] runs every inbound presence through the interceptor
//! chain and then dispatches on its destination and type. Roster and
//! subscription logic stay outside; the router calls them through the
//! traits in [`handlers`].

mod directed;
pub mod handlers;
mod router;

pub use directed::DirectedPresenceTracker;
pub use handlers::{
    DirectedPresenceUpdateHandler, EntityCapabilitiesManager, MulticastRouter, NoopCollaborator,
    PresenceBroadcaster, PresenceHandlers, PresenceManager, PresenceSubscribeHandler,
    PresenceUpdateHandler, RemotePresenceEventDispatcher,
};
pub use router::{PresenceDisposition, PresenceRouter, MULTICAST_NS};
