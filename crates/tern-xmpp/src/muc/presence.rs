//! MUC presence parsing and occupant presence builders (XEP-0045 §7).

use jid::{BareJid, FullJid, Jid};
use minidom::Element;
use tracing::debug;
use xmpp_parsers::muc::user::{Affiliation as MucAffiliation, Item, MucUser, Role as MucRole, Status};
use xmpp_parsers::presence::{Presence, Type as PresenceType};

use super::Occupant;
use crate::types::{Affiliation, Role};

/// Namespace for MUC user protocol.
pub const NS_MUC_USER: &str = "http://jabber.org/protocol/muc#user";

/// Namespace for MUC protocol (join request).
pub const NS_MUC: &str = "http://jabber.org/protocol/muc";

/// What a presence addressed to `room@service/nick` asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MucPresenceAction {
    /// Enter the room, or re-announce presence under the same nick.
    Join { room_jid: BareJid, nick: String },
    /// Leave the room.
    Leave { room_jid: BareJid, nick: String },
    /// Not a room presence.
    NotMuc,
}

/// Classify a presence sent to the MUC service.
///
/// A join is available presence to `room@service/nick`; some clients omit
/// the `<x xmlns='…/muc'/>` element, so it is not required. A leave is
/// unavailable presence to the same address.
pub fn parse_muc_presence(presence: &Presence, muc_domain: &str) -> MucPresenceAction {
    let Some(to) = presence.to.clone() else {
        return MucPresenceAction::NotMuc;
    };
    let Ok(to) = to.try_into_full() else {
        return MucPresenceAction::NotMuc;
    };
    let room_jid = to.to_bare();
    if room_jid.domain().as_str() != muc_domain || room_jid.node().is_none() {
        return MucPresenceAction::NotMuc;
    }
    let nick = to.resource().to_string();

    match presence.type_ {
        PresenceType::None => {
            debug!(room = %room_jid, nick = %nick, has_x = has_muc_element(presence), "Parsed MUC join");
            MucPresenceAction::Join { room_jid, nick }
        }
        PresenceType::Unavailable => MucPresenceAction::Leave { room_jid, nick },
        _ => MucPresenceAction::NotMuc,
    }
}

fn has_muc_element(presence: &Presence) -> bool {
    presence.payloads.iter().any(|p| p.is("x", NS_MUC))
}

/// `<x xmlns='…muc#user'/>` carrying one item.
///
/// The serializer omits `affiliation` and `role` when they are `none`, but
/// the item is invalid without them, so they are always written out.
fn muc_user_element(item: Item, status: Vec<Status>) -> Element {
    let affiliation = affiliation_attr(&item.affiliation);
    let role = role_attr(&item.role);
    let mut element: Element = MucUser {
        status,
        items: vec![item],
    }
    .into();
    for child in element.children_mut() {
        if child.is("item", NS_MUC_USER) {
            child.set_attr("affiliation", affiliation);
            child.set_attr("role", role);
        }
    }
    element
}

fn affiliation_attr(affiliation: &MucAffiliation) -> &'static str {
    match affiliation {
        MucAffiliation::Owner => "owner",
        MucAffiliation::Admin => "admin",
        MucAffiliation::Member => "member",
        MucAffiliation::Outcast => "outcast",
        MucAffiliation::None => "none",
    }
}

fn role_attr(role: &MucRole) -> &'static str {
    match role {
        MucRole::Moderator => "moderator",
        MucRole::Participant => "participant",
        MucRole::Visitor => "visitor",
        MucRole::None => "none",
    }
}

/// Presence announcing `occupant` to `to`.
///
/// The occupant's real JID is included when `include_jid` is set, i.e. for
/// moderators in semi-anonymous rooms and for the occupant itself.
pub fn build_occupant_presence(
    occupant: &Occupant,
    to: &FullJid,
    status: Vec<Status>,
    include_jid: bool,
) -> Presence {
    let mut presence = Presence::new(PresenceType::None);
    presence.from = Some(Jid::from(occupant.occupant_jid().clone()));
    presence.to = Some(Jid::from(to.clone()));

    let item = Item {
        affiliation: affiliation_to_muc(occupant.affiliation()),
        role: role_to_muc(occupant.role()),
        jid: include_jid.then(|| occupant.user_jid().clone()),
        nick: None,
        actor: None,
        continue_: None,
        reason: None,
    };
    presence.payloads.push(muc_user_element(item, status));
    presence
}

/// Unavailable presence for an occupant leaving, kicked, banned or
/// changing nick.
///
/// `new_nick` is carried in the item for status 303.
pub fn build_unavailable_presence(
    occupant: &Occupant,
    to: &FullJid,
    status: Vec<Status>,
    new_nick: Option<&str>,
) -> Presence {
    let mut presence = Presence::new(PresenceType::Unavailable);
    presence.from = Some(Jid::from(occupant.occupant_jid().clone()));
    presence.to = Some(Jid::from(to.clone()));

    let item = Item {
        affiliation: affiliation_to_muc(occupant.affiliation()),
        role: MucRole::None,
        jid: None,
        nick: new_nick.map(str::to_string),
        actor: None,
        continue_: None,
        reason: None,
    };
    presence.payloads.push(muc_user_element(item, status));
    presence
}

fn affiliation_to_muc(affiliation: Affiliation) -> MucAffiliation {
    match affiliation {
        Affiliation::Owner => MucAffiliation::Owner,
        Affiliation::Admin => MucAffiliation::Admin,
        Affiliation::Member => MucAffiliation::Member,
        Affiliation::Outcast => MucAffiliation::Outcast,
        Affiliation::None => MucAffiliation::None,
    }
}

fn role_to_muc(role: Role) -> MucRole {
    match role {
        Role::Moderator => MucRole::Moderator,
        Role::Participant => MucRole::Participant,
        Role::Visitor => MucRole::Visitor,
        Role::None => MucRole::None,
    }
}

/// Items and status codes carried by a presence, if it has a muc#user
/// payload.
pub fn parse_muc_user(presence: &Presence) -> Option<MucUser> {
    presence
        .payloads
        .iter()
        .find(|p| p.is("x", NS_MUC_USER))
        .and_then(|p| MucUser::try_from(p.clone()).ok())
}
