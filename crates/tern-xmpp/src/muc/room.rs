//! A single chat room: occupants, affiliations and the permission rules
//! for changing them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jid::{BareJid, FullJid};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{
    AffiliationChange, AffiliationList, MucError, MucEvent, MucEventDispatcher, Occupant,
    RoomConfig,
};
use crate::types::{Affiliation, Role};

/// Result of a role change.
#[derive(Debug, Clone)]
pub struct RoleOutcome {
    /// The occupant after the change
    pub occupant: Occupant,
    pub old_role: Role,
    /// True if the occupant was kicked (role `none`)
    pub removed: bool,
}

/// Result of an affiliation change.
#[derive(Debug, Clone, Default)]
pub struct AffiliationOutcome {
    /// `None` if the affiliation was already set
    pub change: Option<AffiliationChange>,
    /// Occupants still present whose role may have moved
    pub updated: Vec<Occupant>,
    /// Occupants removed because they were banned, or lost membership of a
    /// members-only room
    pub removed: Vec<Occupant>,
}

/// Room state.
#[derive(Debug)]
pub struct MucRoom {
    room_jid: BareJid,
    config: RoomConfig,
    /// nick -> occupant
    occupants: HashMap<String, Occupant>,
    affiliations: AffiliationList,
    events: Arc<MucEventDispatcher>,
    node_id: Uuid,
    created_at: DateTime<Utc>,
    destroyed: bool,
}

impl MucRoom {
    /// Create a room owned by `creator`.
    pub fn new(
        room_jid: BareJid,
        config: RoomConfig,
        creator: BareJid,
        events: Arc<MucEventDispatcher>,
        node_id: Uuid,
    ) -> Self {
        let mut affiliations = AffiliationList::new();
        affiliations.set(creator.clone(), Affiliation::Owner);
        events.dispatch(MucEvent::RoomCreated {
            room: room_jid.clone(),
            creator,
        });
        Self {
            room_jid,
            config,
            occupants: HashMap::new(),
            affiliations,
            events,
            node_id,
            created_at: Utc::now(),
            destroyed: false,
        }
    }

    pub fn room_jid(&self) -> &BareJid {
        &self.room_jid
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn occupant(&self, nick: &str) -> Option<&Occupant> {
        self.occupants.get(nick)
    }

    pub fn occupant_by_jid(&self, user_jid: &FullJid) -> Option<&Occupant> {
        self.occupants.values().find(|o| o.user_jid() == user_jid)
    }

    pub fn occupants(&self) -> impl Iterator<Item = &Occupant> {
        self.occupants.values()
    }

    pub fn occupant_count(&self) -> usize {
        self.occupants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occupants.is_empty()
    }

    pub fn affiliation_of(&self, jid: &BareJid) -> Affiliation {
        self.affiliations.get(jid)
    }

    pub fn affiliations(&self) -> &AffiliationList {
        &self.affiliations
    }

    fn is_full(&self) -> bool {
        self.config.max_occupants != 0 && self.occupants.len() >= self.config.max_occupants as usize
    }

    fn ensure_live(&self) -> Result<(), MucError> {
        if self.destroyed {
            Err(MucError::ItemNotFound(format!("{} was destroyed", self.room_jid)))
        } else {
            Ok(())
        }
    }

    fn nick_of(&self, user_jid: &FullJid) -> Result<String, MucError> {
        self.occupant_by_jid(user_jid)
            .map(|o| o.nick().to_string())
            .ok_or_else(|| MucError::ItemNotFound(format!("{user_jid} is not an occupant")))
    }

    /// Add an occupant.
    ///
    /// A user re-sending presence to its own nick gets the existing
    /// occupant back unchanged.
    #[instrument(skip(self), fields(room = %self.room_jid))]
    pub fn join(
        &mut self,
        user_jid: FullJid,
        nick: &str,
        is_local: bool,
    ) -> Result<Occupant, MucError> {
        self.ensure_live()?;

        if let Some(existing) = self.occupants.get(nick) {
            if existing.user_jid() == &user_jid {
                return Ok(existing.clone());
            }
            return Err(MucError::Conflict(format!("nickname '{nick}' is in use")));
        }

        let affiliation = self.affiliations.get(&user_jid.to_bare());
        if affiliation == Affiliation::Outcast {
            return Err(MucError::Forbidden(format!("{} is banned", user_jid.to_bare())));
        }
        if self.config.members_only && !affiliation.outranks(Affiliation::None) {
            return Err(MucError::RegistrationRequired);
        }
        if self.is_full() && !affiliation.is_privileged() {
            return Err(MucError::ServiceUnavailable);
        }

        let occupant = Occupant::new(
            self.room_jid.clone(),
            user_jid.clone(),
            nick.to_string(),
            affiliation,
            self.config.moderated,
            is_local,
            self.node_id,
        )?;
        self.occupants.insert(nick.to_string(), occupant.clone());

        info!(nick = %nick, user = %user_jid, role = %occupant.role(), "Occupant joined");
        self.events.dispatch(MucEvent::OccupantJoined {
            room: self.room_jid.clone(),
            user: user_jid,
            nick: nick.to_string(),
        });
        Ok(occupant)
    }

    fn remove_occupant(&mut self, nick: &str) -> Option<Occupant> {
        let mut occupant = self.occupants.remove(nick)?;
        occupant.destroy();
        self.events.dispatch(MucEvent::OccupantLeft {
            room: self.room_jid.clone(),
            user: occupant.user_jid().clone(),
            nick: occupant.nick().to_string(),
        });
        Some(occupant)
    }

    /// Remove the occupant bound to `user_jid`.
    #[instrument(skip(self), fields(room = %self.room_jid))]
    pub fn leave(&mut self, user_jid: &FullJid) -> Result<Occupant, MucError> {
        let nick = self.nick_of(user_jid)?;
        let occupant = self
            .remove_occupant(&nick)
            .ok_or_else(|| MucError::ItemNotFound(nick.clone()))?;
        info!(nick = %nick, "Occupant left");
        Ok(occupant)
    }

    /// Move an occupant to a new nickname. Returns the old one.
    #[instrument(skip(self), fields(room = %self.room_jid))]
    pub fn change_nickname(
        &mut self,
        user_jid: &FullJid,
        new_nick: &str,
    ) -> Result<String, MucError> {
        self.ensure_live()?;
        let old_nick = self.nick_of(user_jid)?;
        if old_nick == new_nick {
            return Ok(old_nick);
        }
        if self.occupants.contains_key(new_nick) {
            return Err(MucError::Conflict(format!("nickname '{new_nick}' is in use")));
        }

        let mut occupant = self
            .occupants
            .remove(&old_nick)
            .ok_or_else(|| MucError::ItemNotFound(old_nick.clone()))?;
        if let Err(e) = occupant.set_nick(new_nick.to_string()) {
            self.occupants.insert(old_nick, occupant);
            return Err(e);
        }
        self.occupants.insert(new_nick.to_string(), occupant);

        debug!(old = %old_nick, new = %new_nick, "Nickname changed");
        self.events.dispatch(MucEvent::NicknameChanged {
            room: self.room_jid.clone(),
            user: user_jid.clone(),
            old_nick: old_nick.clone(),
            new_nick: new_nick.to_string(),
        });
        Ok(old_nick)
    }

    /// Change the role of the occupant at `nick` on behalf of `actor`.
    ///
    /// Granting or revoking moderator needs an admin or owner. Other role
    /// changes need a moderator who does not rank below the target.
    /// Role `none` kicks the occupant out of the room.
    #[instrument(skip(self), fields(room = %self.room_jid))]
    pub fn set_role(
        &mut self,
        actor: &FullJid,
        nick: &str,
        role: Role,
    ) -> Result<RoleOutcome, MucError> {
        self.ensure_live()?;
        let (actor_role, actor_affiliation) = self
            .occupant_by_jid(actor)
            .map(|o| (o.role(), o.affiliation()))
            .ok_or_else(|| MucError::Forbidden(format!("{actor} is not an occupant")))?;
        let target = self
            .occupants
            .get_mut(nick)
            .ok_or_else(|| MucError::ItemNotFound(format!("no occupant '{nick}'")))?;

        if role == Role::Moderator || target.role() == Role::Moderator {
            if !actor_affiliation.is_privileged() {
                return Err(MucError::Forbidden(
                    "only admins and owners manage moderators".into(),
                ));
            }
        } else {
            if actor_role != Role::Moderator {
                return Err(MucError::Forbidden("only moderators change roles".into()));
            }
            if target.affiliation().outranks(actor_affiliation) {
                return Err(MucError::NotAllowed(format!(
                    "'{nick}' has a higher affiliation"
                )));
            }
        }

        let old_role = target.set_role(role)?;
        let occupant = target.clone();
        self.events.dispatch(MucEvent::RoleChanged {
            room: self.room_jid.clone(),
            nick: nick.to_string(),
            old_role,
            new_role: role,
        });

        let removed = role == Role::None;
        if removed {
            self.remove_occupant(nick);
            info!(nick = %nick, actor = %actor, "Occupant kicked");
        }
        Ok(RoleOutcome {
            occupant,
            old_role,
            removed,
        })
    }

    /// Kick the occupant at `nick`.
    pub fn kick(&mut self, actor: &FullJid, nick: &str) -> Result<RoleOutcome, MucError> {
        self.set_role(actor, nick, Role::None)
    }

    /// Change the affiliation of `target` on behalf of `actor`.
    ///
    /// Owner and admin changes need an owner; everything else needs an
    /// admin or owner. The last owner can't step down, and owners or
    /// admins can't be banned without being demoted first. Banned
    /// occupants are removed from the room, and so are occupants of a
    /// members-only room whose affiliation drops to `none`.
    #[instrument(skip(self), fields(room = %self.room_jid))]
    pub fn set_affiliation(
        &mut self,
        actor: &BareJid,
        target: BareJid,
        affiliation: Affiliation,
    ) -> Result<AffiliationOutcome, MucError> {
        self.ensure_live()?;
        let actor_affiliation = self.affiliations.get(actor);
        let current = self.affiliations.get(&target);

        if affiliation.is_privileged() || current.is_privileged() {
            if actor_affiliation != Affiliation::Owner {
                return Err(MucError::Forbidden(
                    "only owners manage owners and admins".into(),
                ));
            }
        } else if !actor_affiliation.is_privileged() {
            return Err(MucError::Forbidden(
                "only admins and owners change affiliations".into(),
            ));
        }

        if affiliation == Affiliation::Outcast && current.is_privileged() {
            return Err(MucError::NotAllowed(format!(
                "{target} is {current} and must be demoted before being banned"
            )));
        }
        if current == Affiliation::Owner
            && affiliation != Affiliation::Owner
            && self.affiliations.owner_count() <= 1
        {
            return Err(MucError::Conflict("a room needs at least one owner".into()));
        }

        let nicks: Vec<String> = self
            .occupants
            .values()
            .filter(|o| o.user_jid().to_bare() == target)
            .map(|o| o.nick().to_string())
            .collect();

        let moderated = self.config.moderated;
        let mut updated = Vec::with_capacity(nicks.len());
        for nick in &nicks {
            if let Some(occupant) = self.occupants.get_mut(nick) {
                occupant.set_affiliation(affiliation, moderated)?;
                updated.push(occupant.clone());
            }
        }

        let change = self.affiliations.set(target.clone(), affiliation);
        if let Some(change) = &change {
            info!(
                user = %target,
                old = %change.old_affiliation,
                new = %change.new_affiliation,
                "Affiliation changed"
            );
            self.events.dispatch(MucEvent::AffiliationChanged {
                room: self.room_jid.clone(),
                user: target,
                old_affiliation: change.old_affiliation,
                new_affiliation: change.new_affiliation,
            });
        }

        // Members-only rooms hold no unaffiliated occupants.
        let revoked = self.config.members_only && affiliation == Affiliation::None;
        let mut removed = Vec::new();
        if affiliation == Affiliation::Outcast || revoked {
            for nick in &nicks {
                removed.extend(self.remove_occupant(nick));
            }
            updated.clear();
        }

        Ok(AffiliationOutcome {
            change,
            updated,
            removed,
        })
    }

    /// Destroy the room, removing every occupant. Owners only.
    #[instrument(skip(self), fields(room = %self.room_jid))]
    pub fn destroy(&mut self, actor: &BareJid) -> Result<Vec<Occupant>, MucError> {
        self.ensure_live()?;
        if self.affiliations.get(actor) != Affiliation::Owner {
            return Err(MucError::Forbidden("only owners destroy rooms".into()));
        }

        let nicks: Vec<String> = self.occupants.keys().cloned().collect();
        let removed: Vec<Occupant> = nicks
            .iter()
            .filter_map(|nick| self.remove_occupant(nick))
            .collect();
        self.destroyed = true;

        info!(occupants = removed.len(), "Room destroyed");
        self.events.dispatch(MucEvent::RoomDestroyed {
            room: self.room_jid.clone(),
        });
        Ok(removed)
    }
}
