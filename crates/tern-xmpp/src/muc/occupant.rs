//! Room occupant and its role/affiliation state machine.

use jid::{BareJid, FullJid};
use tracing::debug;
use uuid::Uuid;

use super::MucError;
use crate::types::{Affiliation, Role};

/// A user's presence and permissions within one room.
#[derive(Debug, Clone)]
pub struct Occupant {
    room_jid: BareJid,
    user_jid: FullJid,
    occupant_jid: FullJid,
    nick: String,
    role: Role,
    affiliation: Affiliation,
    is_local: bool,
    node_id: Uuid,
    destroyed: bool,
}

/// The role an affiliation implies on entry or after an affiliation change.
pub(crate) fn role_for(affiliation: Affiliation, moderated: bool) -> Role {
    match affiliation {
        Affiliation::Owner | Affiliation::Admin => Role::Moderator,
        Affiliation::Member => Role::Participant,
        Affiliation::None if moderated => Role::Visitor,
        Affiliation::None => Role::Participant,
        Affiliation::Outcast => Role::None,
    }
}

fn occupant_address(room_jid: &BareJid, nick: &str) -> Result<FullJid, MucError> {
    room_jid
        .with_resource_str(nick)
        .map_err(|_| MucError::NotAllowed(format!("'{nick}' is not a valid nickname")))
}

impl Occupant {
    /// Create an occupant with the role its affiliation implies.
    ///
    /// Outcasts can't be occupants.
    pub fn new(
        room_jid: BareJid,
        user_jid: FullJid,
        nick: String,
        affiliation: Affiliation,
        moderated: bool,
        is_local: bool,
        node_id: Uuid,
    ) -> Result<Self, MucError> {
        if affiliation == Affiliation::Outcast {
            return Err(MucError::Forbidden(format!("{} is banned", user_jid.to_bare())));
        }
        let occupant_jid = occupant_address(&room_jid, &nick)?;
        Ok(Self {
            room_jid,
            user_jid,
            occupant_jid,
            nick,
            role: role_for(affiliation, moderated),
            affiliation,
            is_local,
            node_id,
            destroyed: false,
        })
    }

    pub fn room_jid(&self) -> &BareJid {
        &self.room_jid
    }

    pub fn user_jid(&self) -> &FullJid {
        &self.user_jid
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn affiliation(&self) -> Affiliation {
        self.affiliation
    }

    pub fn is_local(&self) -> bool {
        self.is_local
    }

    /// Cluster node hosting the occupant's session.
    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Occupant address inside the room (`room@service/nick`).
    pub fn occupant_jid(&self) -> &FullJid {
        &self.occupant_jid
    }

    pub(crate) fn set_nick(&mut self, nick: String) -> Result<(), MucError> {
        self.ensure_live()?;
        self.occupant_jid = occupant_address(&self.room_jid, &nick)?;
        self.nick = nick;
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), MucError> {
        if self.destroyed {
            Err(MucError::Destroyed)
        } else {
            Ok(())
        }
    }

    /// Change the role. Returns the previous role.
    ///
    /// Owners and admins stay moderators and outcasts stay at `none`.
    /// Setting `none` is how an occupant gets kicked; it leaves the
    /// affiliation alone.
    pub fn set_role(&mut self, role: Role) -> Result<Role, MucError> {
        self.ensure_live()?;
        if self.affiliation.is_privileged() && role != Role::Moderator {
            return Err(MucError::NotAllowed(format!(
                "{} is {} and must remain moderator",
                self.nick, self.affiliation
            )));
        }
        if self.affiliation == Affiliation::Outcast && role != Role::None {
            return Err(MucError::NotAllowed(format!("{} is banned", self.nick)));
        }

        let old = self.role;
        self.role = role;
        debug!(room = %self.room_jid, nick = %self.nick, %old, new = %role, "Role changed");
        Ok(old)
    }

    /// Change the affiliation, moving the role with it.
    ///
    /// Banning an owner or admin is refused; they have to be demoted first.
    /// Returns the previous `(affiliation, role)`.
    pub fn set_affiliation(
        &mut self,
        affiliation: Affiliation,
        moderated: bool,
    ) -> Result<(Affiliation, Role), MucError> {
        self.ensure_live()?;
        if affiliation == Affiliation::Outcast && self.affiliation.is_privileged() {
            return Err(MucError::NotAllowed(format!(
                "{} is {} and can't be banned",
                self.nick, self.affiliation
            )));
        }

        let previous = (self.affiliation, self.role);
        self.affiliation = affiliation;
        self.role = role_for(affiliation, moderated);
        debug!(
            room = %self.room_jid,
            nick = %self.nick,
            affiliation = %self.affiliation,
            role = %self.role,
            "Affiliation changed"
        );
        Ok(previous)
    }

    /// Mark the occupant as gone. No transitions are valid afterwards.
    ///
    /// Returns false if it was already destroyed.
    pub fn destroy(&mut self) -> bool {
        if self.destroyed {
            return false;
        }
        self.destroyed = true;
        self.role = Role::None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROLES: [Role; 4] = [Role::Moderator, Role::Participant, Role::Visitor, Role::None];
    const AFFILIATIONS: [Affiliation; 5] = [
        Affiliation::Owner,
        Affiliation::Admin,
        Affiliation::Member,
        Affiliation::Outcast,
        Affiliation::None,
    ];

    fn occupant(affiliation: Affiliation, moderated: bool) -> Occupant {
        Occupant::new(
            "room@muc.example.com".parse().unwrap(),
            "user@example.com/res".parse().unwrap(),
            "nick".to_string(),
            affiliation,
            moderated,
            true,
            Uuid::nil(),
        )
        .unwrap()
    }

    fn assert_invariant(o: &Occupant) {
        if o.affiliation() == Affiliation::Outcast {
            assert_eq!(o.role(), Role::None, "outcast with role {}", o.role());
        }
        if o.affiliation().is_privileged() {
            assert_eq!(o.role(), Role::Moderator, "{} with role {}", o.affiliation(), o.role());
        }
    }

    #[test]
    fn test_initial_roles() {
        assert_eq!(occupant(Affiliation::Owner, false).role(), Role::Moderator);
        assert_eq!(occupant(Affiliation::Admin, true).role(), Role::Moderator);
        assert_eq!(occupant(Affiliation::Member, true).role(), Role::Participant);
        assert_eq!(occupant(Affiliation::None, false).role(), Role::Participant);
        assert_eq!(occupant(Affiliation::None, true).role(), Role::Visitor);
    }

    #[test]
    fn test_outcast_cannot_be_created() {
        let result = Occupant::new(
            "room@muc.example.com".parse().unwrap(),
            "user@example.com/res".parse().unwrap(),
            "nick".to_string(),
            Affiliation::Outcast,
            false,
            true,
            Uuid::nil(),
        );
        assert!(matches!(result, Err(MucError::Forbidden(_))));
    }

    #[test]
    fn test_privileged_must_stay_moderator() {
        for affiliation in [Affiliation::Owner, Affiliation::Admin] {
            let mut o = occupant(affiliation, false);
            for role in [Role::Participant, Role::Visitor, Role::None] {
                assert!(matches!(o.set_role(role), Err(MucError::NotAllowed(_))));
                assert_eq!(o.role(), Role::Moderator);
            }
            assert!(o.set_role(Role::Moderator).is_ok());
        }
    }

    #[test]
    fn test_owner_cannot_be_banned() {
        let mut o = occupant(Affiliation::Owner, false);
        let result = o.set_affiliation(Affiliation::Outcast, false);
        assert!(matches!(result, Err(MucError::NotAllowed(_))));
        assert_eq!(o.affiliation(), Affiliation::Owner);
        assert_eq!(o.role(), Role::Moderator);
    }

    #[test]
    fn test_demote_then_ban() {
        let mut o = occupant(Affiliation::Admin, false);
        o.set_affiliation(Affiliation::Member, false).unwrap();
        assert_eq!(o.role(), Role::Participant);
        o.set_affiliation(Affiliation::Outcast, false).unwrap();
        assert_eq!(o.role(), Role::None);
    }

    #[test]
    fn test_kick_keeps_affiliation() {
        let mut o = occupant(Affiliation::Member, false);
        assert_eq!(o.set_role(Role::None).unwrap(), Role::Participant);
        assert_eq!(o.affiliation(), Affiliation::Member);
    }

    #[test]
    fn test_destroyed_is_terminal() {
        let mut o = occupant(Affiliation::Member, false);
        assert!(o.destroy());
        assert!(!o.destroy());
        assert_eq!(o.set_role(Role::Visitor), Err(MucError::Destroyed));
        assert_eq!(
            o.set_affiliation(Affiliation::Admin, false),
            Err(MucError::Destroyed)
        );
    }

    /// Every successful transition from every reachable state keeps the
    /// role/affiliation invariant.
    #[test]
    fn test_invariant_holds_for_all_transition_pairs() {
        for moderated in [false, true] {
            for start in [Affiliation::Owner, Affiliation::Admin, Affiliation::Member, Affiliation::None] {
                for first_affiliation in AFFILIATIONS {
                    for role in ROLES {
                        for second_affiliation in AFFILIATIONS {
                            let mut o = occupant(start, moderated);
                            assert_invariant(&o);
                            if o.set_affiliation(first_affiliation, moderated).is_ok() {
                                assert_invariant(&o);
                            }
                            if o.set_role(role).is_ok() {
                                assert_invariant(&o);
                            }
                            if o.set_affiliation(second_affiliation, moderated).is_ok() {
                                assert_invariant(&o);
                            }
                        }
                    }
                }
            }
        }
    }
}
