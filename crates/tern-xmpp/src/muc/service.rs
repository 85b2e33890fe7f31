//! The MUC service as an internal component.
//!
//! Registered with the component manager at `<subdomain>.<server domain>`.
//! Every reply and broadcast leaves through the [`ComponentDispatcher`], and
//! always after the room lock has been released.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use jid::{BareJid, FullJid, Jid};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::message::{Message, MessageType};
use xmpp_parsers::muc::user::Status;
use xmpp_parsers::presence::{Presence, Type as PresenceType};

use super::admin::{
    affiliation_list_payload, is_muc_admin_get, is_muc_admin_set, parse_admin_items, AdminItem,
};
use super::presence::{
    build_occupant_presence, build_unavailable_presence, parse_muc_presence, MucPresenceAction,
};
use super::{MucError, MucRoom, MucRoomRegistry, Occupant, RoomConfig};
use crate::component::{Component, ComponentDispatcher};
use crate::disco::{
    build_disco_info_response, build_disco_items_response, is_disco_info_query,
    is_disco_items_query, muc_service_features, DiscoItem, Feature, Identity,
};
use crate::stanza::{iq_error, iq_result, presence_error, Stanza};
use crate::types::{Affiliation, Role};
use crate::XmppError;

/// Multi-user chat service.
pub struct MucService {
    name: String,
    server_domain: String,
    registry: Arc<MucRoomRegistry>,
    dispatcher: OnceLock<ComponentDispatcher>,
}

impl MucService {
    pub fn new(muc_domain: String, server_domain: String, defaults: RoomConfig, node_id: Uuid) -> Self {
        Self {
            name: "Multi-user chat".to_string(),
            server_domain,
            registry: Arc::new(MucRoomRegistry::new(muc_domain, defaults, node_id)),
            dispatcher: OnceLock::new(),
        }
    }

    pub fn registry(&self) -> &Arc<MucRoomRegistry> {
        &self.registry
    }

    fn muc_domain(&self) -> &str {
        self.registry.muc_domain()
    }

    async fn send_all(&self, stanzas: Vec<Stanza>) {
        let Some(dispatcher) = self.dispatcher.get() else {
            warn!("MUC service is not initialized, dropping outbound stanzas");
            return;
        };
        for stanza in stanzas {
            let to = stanza.to().cloned();
            match dispatcher.send(stanza).await {
                Ok(result) if !result.is_delivered() => {
                    debug!(to = ?to, result = ?result, "MUC stanza was not delivered");
                }
                Ok(_) => {}
                Err(e) => warn!(to = ?to, error = %e, "Failed to send MUC stanza"),
            }
        }
    }

    async fn reject_presence(&self, presence: Presence, sender: FullJid, error: XmppError) {
        debug!(sender = %sender, error = %error, "Rejecting MUC presence");
        let from = presence.to.clone();
        let reply = presence_error(presence, Jid::from(sender), from, error.to_stanza_error());
        self.send_all(vec![Stanza::Presence(reply)]).await;
    }

    #[instrument(skip(self, presence), fields(from = ?presence.from, to = ?presence.to))]
    async fn handle_presence(&self, presence: Presence) -> Result<(), XmppError> {
        let sender = presence
            .from
            .clone()
            .ok_or_else(|| XmppError::bad_request(Some("presence has no sender".into())))?
            .try_into_full()
            .map_err(|bare| {
                XmppError::bad_request(Some(format!("{bare} must join with a full address")))
            })?;

        match parse_muc_presence(&presence, self.muc_domain()) {
            MucPresenceAction::Join { room_jid, nick } => {
                self.handle_join(presence, sender, room_jid, nick).await;
            }
            MucPresenceAction::Leave { room_jid, .. } => {
                self.handle_leave(sender, room_jid).await;
            }
            MucPresenceAction::NotMuc if presence.type_ == PresenceType::None => {
                self.reject_presence(
                    presence,
                    sender,
                    XmppError::bad_request(Some("a nickname is required".into())),
                )
                .await;
            }
            MucPresenceAction::NotMuc => {
                debug!(type_ = ?presence.type_, "Ignoring presence");
            }
        }
        Ok(())
    }

    async fn handle_join(&self, presence: Presence, sender: FullJid, room_jid: BareJid, nick: String) {
        let (room, created) = match self.registry.get_or_create_room(room_jid.clone(), &sender.to_bare()) {
            Ok(found) => found,
            Err(e) => return self.reject_presence(presence, sender, e.into()).await,
        };

        let is_local = sender.domain().as_str() == self.server_domain;
        let outcome = {
            let mut room = room.write().await;
            match room.occupant_by_jid(&sender).cloned() {
                Some(existing) if existing.nick() != nick => {
                    change_nickname(&mut room, existing, &nick)
                }
                Some(existing) => Ok(announce(&room, &existing, vec![Status::SelfPresence])),
                None => room.join(sender.clone(), &nick, is_local).map(|occupant| {
                    let mut self_status = vec![Status::SelfPresence];
                    if created {
                        self_status.push(Status::RoomHasBeenCreated);
                    }
                    let mut stanzas = existing_occupants_for(&room, &occupant);
                    stanzas.extend(announce(&room, &occupant, self_status));
                    stanzas
                }),
            }
        };

        match outcome {
            Ok(stanzas) => self.send_all(stanzas).await,
            Err(e) => {
                if created {
                    self.registry.remove_if_idle(&room_jid).await;
                }
                self.reject_presence(presence, sender, e.into()).await;
            }
        }
    }

    async fn handle_leave(&self, sender: FullJid, room_jid: BareJid) {
        let Some(room) = self.registry.get_room(&room_jid) else {
            debug!(room = %room_jid, "Leave for unknown room");
            return;
        };
        let stanzas = {
            let mut room = room.write().await;
            match room.leave(&sender) {
                Ok(occupant) => announce_departure(&room, &occupant, vec![], None),
                Err(e) => {
                    debug!(room = %room_jid, error = %e, "Leave from non-occupant");
                    return;
                }
            }
        };
        self.send_all(stanzas).await;
        self.registry.remove_if_idle(&room_jid).await;
    }

    #[instrument(skip(self, iq), fields(id = %iq.id, from = ?iq.from, to = ?iq.to))]
    async fn handle_iq(&self, iq: Iq) -> Result<(), XmppError> {
        if matches!(iq.payload, IqType::Result(_) | IqType::Error(_)) {
            debug!("Ignoring IQ response");
            return Ok(());
        }

        let stanzas = match self.answer_iq(&iq).await {
            Ok((reply, mut broadcasts)) => {
                broadcasts.insert(0, Stanza::Iq(reply));
                broadcasts
            }
            Err(e) => {
                debug!(error = %e, "MUC IQ failed");
                vec![Stanza::Iq(iq_error(&iq, e.to_stanza_error()))]
            }
        };
        self.send_all(stanzas).await;
        Ok(())
    }

    async fn answer_iq(&self, iq: &Iq) -> Result<(Iq, Vec<Stanza>), XmppError> {
        let from = iq
            .from
            .clone()
            .ok_or_else(|| XmppError::bad_request(Some("IQ has no sender".into())))?;
        let to = iq
            .to
            .clone()
            .ok_or_else(|| XmppError::bad_request(Some("IQ has no recipient".into())))?;

        if to.node().is_none() {
            return self.answer_service_iq(iq).await.map(|reply| (reply, Vec::new()));
        }

        let room_jid = to.to_bare();
        let room = self
            .registry
            .get_room(&room_jid)
            .ok_or_else(|| XmppError::item_not_found(Some(format!("no room {room_jid}"))))?;
        let mut room = room.write().await;

        if is_disco_info_query(iq) {
            let name = Some(room.config().name.as_str()).filter(|n| !n.is_empty());
            let reply = build_disco_info_response(
                iq,
                &[Identity::new("conference", "text", name)],
                &[Feature::disco_info(), Feature::muc()],
            );
            return Ok((reply, Vec::new()));
        }
        if is_muc_admin_get(iq) {
            let items = parse_admin_items(iq)?;
            return list_affiliations(&room, &from.to_bare(), &items)
                .map(|payload| (iq_result(iq, Some(payload)), Vec::new()));
        }
        if is_muc_admin_set(iq) {
            let items = parse_admin_items(iq)?;
            let broadcasts = apply_admin_items(&mut room, &from, items)?;
            return Ok((iq_result(iq, None), broadcasts));
        }

        Err(XmppError::feature_not_implemented(None))
    }

    async fn answer_service_iq(&self, iq: &Iq) -> Result<Iq, XmppError> {
        if is_disco_info_query(iq) {
            return Ok(build_disco_info_response(
                iq,
                &[Identity::muc_service(Some(&self.name))],
                &muc_service_features(),
            ));
        }
        if is_disco_items_query(iq) {
            let items: Vec<DiscoItem> = self
                .registry
                .list_room_info()
                .await
                .iter()
                .map(|info| {
                    let name = Some(info.name.as_str()).filter(|n| !n.is_empty());
                    DiscoItem::new(&info.room_jid.to_string(), name)
                })
                .collect();
            return Ok(build_disco_items_response(iq, &items));
        }
        Err(XmppError::feature_not_implemented(None))
    }

    #[instrument(skip(self, message), fields(from = ?message.from, to = ?message.to))]
    async fn handle_message(&self, message: Message) -> Result<(), XmppError> {
        let Some(sender) = message.from.clone().and_then(|f| f.try_into_full().ok()) else {
            return Err(XmppError::bad_request(Some("message needs a full sender".into())));
        };
        let Some(to) = message.to.clone() else {
            return Err(XmppError::bad_request(Some("message has no recipient".into())));
        };
        let Some(room) = self.registry.get_room(&to.to_bare()) else {
            return self
                .bounce_message(message, XmppError::item_not_found(Some("no such room".into())))
                .await;
        };

        let outcome = {
            let room = room.read().await;
            relay_message(&room, &sender, &to, &message)
        };
        match outcome {
            Ok(stanzas) => self.send_all(stanzas).await,
            Err(e) => return self.bounce_message(message, e).await,
        }
        Ok(())
    }

    async fn bounce_message(&self, message: Message, error: XmppError) -> Result<(), XmppError> {
        if message.type_ == MessageType::Error {
            return Ok(());
        }
        if let Some(reply) = Stanza::Message(message).error_reply(&error) {
            self.send_all(vec![reply]).await;
        }
        Ok(())
    }
}

#[async_trait]
impl Component for MucService {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "XEP-0045 multi-user chat rooms"
    }

    async fn initialize(&self, address: BareJid, dispatcher: ComponentDispatcher) -> Result<(), XmppError> {
        if address.domain().as_str() != self.muc_domain() {
            return Err(XmppError::component(format!(
                "MUC service for {} registered at {}",
                self.muc_domain(),
                address
            )));
        }
        self.dispatcher
            .set(dispatcher)
            .map_err(|_| XmppError::component("MUC service initialized twice"))?;
        info!(address = %address, "MUC service initialized");
        Ok(())
    }

    async fn shutdown(&self) {
        info!(rooms = self.registry.room_count(), "MUC service shutting down");
    }

    async fn process_packet(&self, stanza: Stanza) -> Result<(), XmppError> {
        match stanza {
            Stanza::Presence(presence) => self.handle_presence(presence).await,
            Stanza::Iq(iq) => self.handle_iq(iq).await,
            Stanza::Message(message) => self.handle_message(message).await,
        }
    }
}

impl std::fmt::Debug for MucService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MucService")
            .field("registry", &self.registry)
            .finish()
    }
}

/// Real JIDs are shown to moderators and to the occupant itself.
fn reveals_jid(recipient: &Occupant, subject: &Occupant) -> bool {
    recipient.role() == Role::Moderator || recipient.user_jid() == subject.user_jid()
}

/// Available presence of `subject` to every occupant, itself included.
fn announce(room: &MucRoom, subject: &Occupant, self_status: Vec<Status>) -> Vec<Stanza> {
    let mut stanzas: Vec<Stanza> = room
        .occupants()
        .filter(|o| o.user_jid() != subject.user_jid())
        .map(|o| build_occupant_presence(subject, o.user_jid(), vec![], reveals_jid(o, subject)).into())
        .collect();
    stanzas.push(build_occupant_presence(subject, subject.user_jid(), self_status, true).into());
    stanzas
}

/// Presence of everyone already in the room, for a new occupant.
fn existing_occupants_for(room: &MucRoom, joiner: &Occupant) -> Vec<Stanza> {
    room.occupants()
        .filter(|o| o.user_jid() != joiner.user_jid())
        .map(|o| build_occupant_presence(o, joiner.user_jid(), vec![], reveals_jid(joiner, o)).into())
        .collect()
}

/// Unavailable presence of `subject` to the remaining occupants and itself.
fn announce_departure(
    room: &MucRoom,
    subject: &Occupant,
    status: Vec<Status>,
    new_nick: Option<&str>,
) -> Vec<Stanza> {
    let mut stanzas: Vec<Stanza> = room
        .occupants()
        .filter(|o| o.user_jid() != subject.user_jid())
        .map(|o| build_unavailable_presence(subject, o.user_jid(), status.clone(), new_nick).into())
        .collect();
    let mut self_status = status;
    self_status.push(Status::SelfPresence);
    stanzas.push(build_unavailable_presence(subject, subject.user_jid(), self_status, new_nick).into());
    stanzas
}

fn change_nickname(room: &mut MucRoom, existing: Occupant, nick: &str) -> Result<Vec<Stanza>, MucError> {
    room.change_nickname(existing.user_jid(), nick)?;
    let renamed = room
        .occupant(nick)
        .cloned()
        .ok_or_else(|| MucError::ItemNotFound(nick.to_string()))?;
    let mut stanzas = announce_departure(room, &existing, vec![Status::NewNick], Some(nick));
    stanzas.extend(announce(room, &renamed, vec![Status::SelfPresence]));
    Ok(stanzas)
}

fn list_affiliations(
    room: &MucRoom,
    requester: &BareJid,
    items: &[AdminItem],
) -> Result<minidom::Element, XmppError> {
    if !room.affiliation_of(requester).is_privileged() {
        return Err(XmppError::forbidden(Some(
            "only admins and owners list affiliations".into(),
        )));
    }
    let mut listed = Vec::new();
    for item in items {
        match item {
            AdminItem::AffiliationFilter(affiliation) => listed.extend(
                room.affiliations()
                    .by_affiliation(*affiliation)
                    .into_iter()
                    .map(|jid| (jid, *affiliation)),
            ),
            _ => {
                return Err(XmppError::bad_request(Some(
                    "affiliation lists are filtered by affiliation".into(),
                )))
            }
        }
    }
    Ok(affiliation_list_payload(&listed))
}

/// Apply muc#admin set items in order, collecting the presence broadcasts.
///
/// Processing stops at the first failing item.
fn apply_admin_items(room: &mut MucRoom, actor: &Jid, items: Vec<AdminItem>) -> Result<Vec<Stanza>, XmppError> {
    let mut stanzas = Vec::new();
    for item in items {
        match item {
            AdminItem::Role { nick, role, .. } => {
                let actor = actor.clone().try_into_full().map_err(|bare| {
                    XmppError::bad_request(Some(format!("{bare} is not an occupant address")))
                })?;
                let outcome = room.set_role(&actor, &nick, role)?;
                if outcome.removed {
                    stanzas.extend(announce_departure(room, &outcome.occupant, vec![Status::Kicked], None));
                } else {
                    stanzas.extend(announce(room, &outcome.occupant, vec![]));
                }
            }
            AdminItem::Affiliation { jid, affiliation, .. } => {
                let outcome = room.set_affiliation(&actor.to_bare(), jid, affiliation)?;
                let status = if affiliation == Affiliation::Outcast {
                    Status::Banned
                } else {
                    Status::RemovalFromRoom
                };
                for removed in &outcome.removed {
                    stanzas.extend(announce_departure(room, removed, vec![status.clone()], None));
                }
                for updated in &outcome.updated {
                    stanzas.extend(announce(room, updated, vec![]));
                }
            }
            AdminItem::AffiliationFilter(_) => {
                return Err(XmppError::bad_request(Some(
                    "set items need a target".into(),
                )))
            }
        }
    }
    Ok(stanzas)
}

/// Fan a groupchat message out, or pass a private message to one occupant.
fn relay_message(
    room: &MucRoom,
    sender: &FullJid,
    to: &Jid,
    message: &Message,
) -> Result<Vec<Stanza>, XmppError> {
    let occupant = room.occupant_by_jid(sender).ok_or_else(|| {
        XmppError::forbidden(Some("only occupants can send to the room".into()))
    })?;

    let from = Jid::from(occupant.occupant_jid().clone());
    let relayed = |recipient: &FullJid| {
        let mut copy = message.clone();
        copy.from = Some(from.clone());
        copy.to = Some(Jid::from(recipient.clone()));
        Stanza::Message(copy)
    };

    if message.type_ == MessageType::Groupchat {
        if to.resource().is_some() {
            return Err(XmppError::bad_request(Some(
                "groupchat messages go to the room address".into(),
            )));
        }
        if occupant.role() == Role::Visitor {
            return Err(XmppError::forbidden(Some("visitors can't speak".into())));
        }
        return Ok(room.occupants().map(|o| relayed(o.user_jid())).collect());
    }

    let nick = to
        .resource()
        .ok_or_else(|| XmppError::bad_request(Some("private messages need a nickname".into())))?;
    let target = room
        .occupant(nick.as_str())
        .ok_or_else(|| XmppError::item_not_found(Some(format!("no occupant '{nick}'"))))?;
    Ok(vec![relayed(target.user_jid())])
}
