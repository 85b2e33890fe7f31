//! MUC Room Registry
//!
//! Maps room addresses to live room state. Rooms are created on first join
//! and dropped when destroyed or, for non-persistent rooms, when the last
//! occupant leaves.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use jid::BareJid;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{MucError, MucEventDispatcher, MucRoom, RoomConfig};

/// Basic room information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub room_jid: BareJid,
    pub occupant_count: usize,
    pub name: String,
}

/// Registry of rooms on one MUC service.
pub struct MucRoomRegistry {
    muc_domain: String,
    rooms: DashMap<BareJid, Arc<RwLock<MucRoom>>>,
    default_config: RoomConfig,
    events: Arc<MucEventDispatcher>,
    node_id: Uuid,
}

impl MucRoomRegistry {
    pub fn new(muc_domain: String, default_config: RoomConfig, node_id: Uuid) -> Self {
        info!(domain = %muc_domain, "Creating MUC room registry");
        Self {
            muc_domain,
            rooms: DashMap::new(),
            default_config,
            events: Arc::new(MucEventDispatcher::new()),
            node_id,
        }
    }

    pub fn muc_domain(&self) -> &str {
        &self.muc_domain
    }

    /// Dispatcher shared by every room in this registry.
    pub fn events(&self) -> &Arc<MucEventDispatcher> {
        &self.events
    }

    /// Check if a JID is a room on this service.
    pub fn is_muc_jid(&self, jid: &BareJid) -> bool {
        jid.node().is_some() && jid.domain().as_str() == self.muc_domain
    }

    pub fn get_room(&self, room_jid: &BareJid) -> Option<Arc<RwLock<MucRoom>>> {
        self.rooms.get(room_jid).map(|r| Arc::clone(r.value()))
    }

    pub fn room_exists(&self, room_jid: &BareJid) -> bool {
        self.rooms.contains_key(room_jid)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Look up a room, creating it with `creator` as owner if needed.
    ///
    /// The flag is true when the room was created by this call.
    #[instrument(skip(self), fields(room = %room_jid))]
    pub fn get_or_create_room(
        &self,
        room_jid: BareJid,
        creator: &BareJid,
    ) -> Result<(Arc<RwLock<MucRoom>>, bool), MucError> {
        if !self.is_muc_jid(&room_jid) {
            return Err(MucError::ItemNotFound(format!(
                "{room_jid} is not a room on {}",
                self.muc_domain
            )));
        }

        match self.rooms.entry(room_jid.clone()) {
            Entry::Occupied(entry) => {
                debug!("Room already exists");
                Ok((Arc::clone(entry.get()), false))
            }
            Entry::Vacant(entry) => {
                let room = MucRoom::new(
                    room_jid,
                    self.default_config.clone(),
                    creator.clone(),
                    Arc::clone(&self.events),
                    self.node_id,
                );
                let room = Arc::new(RwLock::new(room));
                entry.insert(Arc::clone(&room));
                info!(creator = %creator, "Created MUC room");
                Ok((room, true))
            }
        }
    }

    /// Create a room explicitly. Fails if it already exists.
    pub fn create_room(
        &self,
        room_jid: BareJid,
        creator: &BareJid,
    ) -> Result<Arc<RwLock<MucRoom>>, MucError> {
        if self.rooms.contains_key(&room_jid) {
            return Err(MucError::Conflict(format!("room {room_jid} already exists")));
        }
        self.get_or_create_room(room_jid, creator).map(|(room, _)| room)
    }

    /// Drop a room from the registry.
    #[instrument(skip(self), fields(room = %room_jid))]
    pub fn remove_room(&self, room_jid: &BareJid) -> Option<Arc<RwLock<MucRoom>>> {
        let removed = self.rooms.remove(room_jid).map(|(_, room)| room);
        if removed.is_some() {
            info!("Removed MUC room");
        } else {
            warn!("Attempted to remove non-existent room");
        }
        removed
    }

    /// Drop a room if it is empty and not persistent.
    pub async fn remove_if_idle(&self, room_jid: &BareJid) -> bool {
        let Some(room) = self.get_room(room_jid) else {
            return false;
        };
        let idle = {
            let room = room.read().await;
            room.is_empty() && !room.config().persistent
        };
        if idle {
            self.rooms.remove(room_jid);
            debug!(room = %room_jid, "Removed idle room");
        }
        idle
    }

    /// List all room JIDs.
    pub fn list_rooms(&self) -> Vec<BareJid> {
        self.rooms.iter().map(|r| r.key().clone()).collect()
    }

    /// Room info for all rooms.
    pub async fn list_room_info(&self) -> Vec<RoomInfo> {
        let rooms: Vec<Arc<RwLock<MucRoom>>> =
            self.rooms.iter().map(|r| Arc::clone(r.value())).collect();
        let mut infos = Vec::with_capacity(rooms.len());
        for room in rooms {
            let room = room.read().await;
            infos.push(RoomInfo {
                room_jid: room.room_jid().clone(),
                occupant_count: room.occupant_count(),
                name: room.config().name.clone(),
            });
        }
        infos
    }
}

impl std::fmt::Debug for MucRoomRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MucRoomRegistry")
            .field("muc_domain", &self.muc_domain)
            .field("room_count", &self.rooms.len())
            .finish()
    }
}
