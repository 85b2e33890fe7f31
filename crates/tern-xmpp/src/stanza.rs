//! Stanza model shared by every routing path.
//!
//! [`Stanza`] wraps the three `xmpp-parsers` stanza types so routing code can
//! read `{from, to, id}` uniformly without caring which variant it holds.

use jid::Jid;
use minidom::Element;
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::message::{Body, Message, MessageType};
use xmpp_parsers::presence::{Presence, Type as PresenceType};
use xmpp_parsers::stanza_error::StanzaError;

use crate::error::StanzaErrorCondition;
use crate::types::StanzaType;
use crate::XmppError;

/// A routable stanza.
#[derive(Debug, Clone)]
pub enum Stanza {
    Message(Message),
    Presence(Presence),
    Iq(Iq),
}

impl Stanza {
    /// Get the stanza type name for tracing.
    pub fn name(&self) -> &'static str {
        match self {
            Stanza::Message(_) => "message",
            Stanza::Presence(_) => "presence",
            Stanza::Iq(_) => "iq",
        }
    }

    pub fn stanza_type(&self) -> StanzaType {
        match self {
            Stanza::Message(_) => StanzaType::Message,
            Stanza::Presence(_) => StanzaType::Presence,
            Stanza::Iq(_) => StanzaType::Iq,
        }
    }

    pub fn from(&self) -> Option<&Jid> {
        match self {
            Stanza::Message(m) => m.from.as_ref(),
            Stanza::Presence(p) => p.from.as_ref(),
            Stanza::Iq(iq) => iq.from.as_ref(),
        }
    }

    pub fn to(&self) -> Option<&Jid> {
        match self {
            Stanza::Message(m) => m.to.as_ref(),
            Stanza::Presence(p) => p.to.as_ref(),
            Stanza::Iq(iq) => iq.to.as_ref(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Stanza::Message(m) => m.id.as_deref(),
            Stanza::Presence(p) => p.id.as_deref(),
            Stanza::Iq(iq) => Some(iq.id.as_str()),
        }
    }

    pub fn set_from(&mut self, from: Option<Jid>) {
        match self {
            Stanza::Message(m) => m.from = from,
            Stanza::Presence(p) => p.from = from,
            Stanza::Iq(iq) => iq.from = from,
        }
    }

    pub fn set_to(&mut self, to: Option<Jid>) {
        match self {
            Stanza::Message(m) => m.to = to,
            Stanza::Presence(p) => p.to = to,
            Stanza::Iq(iq) => iq.to = to,
        }
    }

    /// True for stanzas of type `error`. These are never answered with
    /// another error.
    pub fn is_error(&self) -> bool {
        match self {
            Stanza::Message(m) => m.type_ == MessageType::Error,
            Stanza::Presence(p) => p.type_ == PresenceType::Error,
            Stanza::Iq(iq) => matches!(iq.payload, IqType::Error(_)),
        }
    }

    /// The error condition carried by an error stanza, if any.
    pub fn error_condition(&self) -> Option<StanzaErrorCondition> {
        let stanza_error = match self {
            Stanza::Iq(Iq {
                payload: IqType::Error(err),
                ..
            }) => Some(err.clone()),
            Stanza::Presence(p) => find_error(&p.payloads),
            Stanza::Message(m) => find_error(&m.payloads),
            Stanza::Iq(_) => None,
        };
        stanza_error.and_then(|e| StanzaErrorCondition::from_parsers(&e.defined_condition))
    }

    /// Build the error bounce for this stanza, addressed back to its sender.
    ///
    /// Returns `None` for stanzas that are already errors and for IQ results.
    pub fn error_reply(&self, error: &XmppError) -> Option<Stanza> {
        if self.is_error() {
            return None;
        }
        let stanza_error = error.to_stanza_error();
        match self {
            Stanza::Iq(iq) => match iq.payload {
                IqType::Get(_) | IqType::Set(_) => Some(Stanza::Iq(iq_error(iq, stanza_error))),
                _ => None,
            },
            Stanza::Message(m) => Some(Stanza::Message(message_error(m, stanza_error))),
            Stanza::Presence(p) => {
                let to = p.from.clone()?;
                Some(Stanza::Presence(presence_error(
                    p.clone(),
                    to,
                    p.to.clone(),
                    stanza_error,
                )))
            }
        }
    }
}

fn find_error(payloads: &[Element]) -> Option<StanzaError> {
    payloads
        .iter()
        .find_map(|payload| StanzaError::try_from(payload.clone()).ok())
}

impl From<Message> for Stanza {
    fn from(message: Message) -> Self {
        Stanza::Message(message)
    }
}

impl From<Presence> for Stanza {
    fn from(presence: Presence) -> Self {
        Stanza::Presence(presence)
    }
}

impl From<Iq> for Stanza {
    fn from(iq: Iq) -> Self {
        Stanza::Iq(iq)
    }
}

impl From<Stanza> for Element {
    fn from(stanza: Stanza) -> Self {
        match stanza {
            Stanza::Message(m) => m.into(),
            Stanza::Presence(p) => p.into(),
            Stanza::Iq(iq) => iq.into(),
        }
    }
}

/// A stanza to be sent to a session.
///
/// This is the message type sent through the outbound channel of every
/// session.
#[derive(Debug, Clone)]
pub struct OutboundStanza {
    /// The stanza to send
    pub stanza: Stanza,
}

impl OutboundStanza {
    /// Create a new outbound stanza.
    pub fn new(stanza: Stanza) -> Self {
        Self { stanza }
    }
}

/// Rewrite a presence into an error presence.
///
/// Keeps the id and payloads of the original, sets `type='error'` and
/// appends the `<error/>` element.
pub fn presence_error(
    mut presence: Presence,
    to: Jid,
    from: Option<Jid>,
    error: StanzaError,
) -> Presence {
    presence.type_ = PresenceType::Error;
    presence.to = Some(to);
    presence.from = from;
    presence.payloads.push(error.into());
    presence
}

/// Build an IQ error reply with from/to swapped.
pub fn iq_error(iq: &Iq, error: StanzaError) -> Iq {
    Iq {
        from: iq.to.clone(),
        to: iq.from.clone(),
        id: iq.id.clone(),
        payload: IqType::Error(error),
    }
}

/// Bounce a message back to its sender as `type='error'`.
pub fn message_error(message: &Message, error: StanzaError) -> Message {
    let mut reply = message.clone();
    reply.type_ = MessageType::Error;
    reply.from = message.to.clone();
    reply.to = message.from.clone();
    reply.payloads.push(error.into());
    reply
}

/// Build an IQ result reply with from/to swapped.
pub fn iq_result(iq: &Iq, payload: Option<Element>) -> Iq {
    Iq {
        from: iq.to.clone(),
        to: iq.from.clone(),
        id: iq.id.clone(),
        payload: IqType::Result(payload),
    }
}

/// Human-readable notice explaining why a stanza was rejected.
pub fn rejection_notice(to: Jid, from: Option<Jid>, text: &str) -> Message {
    let mut message = Message::new(Some(to));
    message.from = from;
    message.bodies.insert(String::new(), Body(text.to_string()));
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jid(s: &str) -> Jid {
        s.parse().unwrap()
    }

    fn make_presence(from: &str, to: &str) -> Presence {
        let mut presence = Presence::new(PresenceType::None);
        presence.from = Some(jid(from));
        presence.to = Some(jid(to));
        presence.id = Some("p1".to_string());
        presence
    }

    #[test]
    fn test_uniform_accessors() {
        let stanza = Stanza::Presence(make_presence("a@example.com/1", "b@example.com"));
        assert_eq!(stanza.name(), "presence");
        assert_eq!(stanza.from(), Some(&jid("a@example.com/1")));
        assert_eq!(stanza.to(), Some(&jid("b@example.com")));
        assert_eq!(stanza.id(), Some("p1"));

        let iq = Iq {
            from: Some(jid("a@example.com/1")),
            to: Some(jid("example.com")),
            id: "iq-1".to_string(),
            payload: IqType::Get(Element::builder("ping", "urn:xmpp:ping").build()),
        };
        let mut stanza = Stanza::Iq(iq);
        assert_eq!(stanza.id(), Some("iq-1"));
        stanza.set_to(None);
        assert!(stanza.to().is_none());
    }

    #[test]
    fn test_presence_error_reply() {
        let stanza = Stanza::Presence(make_presence("a@example.com/1", "b@example.com"));
        let reply = stanza
            .error_reply(&XmppError::not_allowed(None))
            .expect("presence gets a bounce");

        assert!(reply.is_error());
        assert_eq!(reply.to(), Some(&jid("a@example.com/1")));
        assert_eq!(reply.from(), Some(&jid("b@example.com")));
        assert_eq!(reply.error_condition(), Some(StanzaErrorCondition::NotAllowed));
    }

    #[test]
    fn test_errors_are_not_bounced() {
        let stanza = Stanza::Presence(make_presence("a@example.com/1", "b@example.com"));
        let reply = stanza
            .error_reply(&XmppError::not_allowed(None))
            .unwrap();
        assert!(reply.error_reply(&XmppError::not_allowed(None)).is_none());

        let result = Iq {
            from: Some(jid("a@example.com/1")),
            to: Some(jid("example.com")),
            id: "r1".to_string(),
            payload: IqType::Result(None),
        };
        assert!(Stanza::Iq(result)
            .error_reply(&XmppError::service_unavailable(None))
            .is_none());
    }

    #[test]
    fn test_iq_error_swaps_addresses() {
        let iq = Iq {
            from: Some(jid("a@example.com/1")),
            to: Some(jid("proxy.example.com")),
            id: "q1".to_string(),
            payload: IqType::Get(Element::builder("query", "jabber:iq:version").build()),
        };
        let reply = Stanza::Iq(iq)
            .error_reply(&XmppError::service_unavailable(None))
            .unwrap();
        assert_eq!(reply.to(), Some(&jid("a@example.com/1")));
        assert_eq!(reply.from(), Some(&jid("proxy.example.com")));
        assert_eq!(
            reply.error_condition(),
            Some(StanzaErrorCondition::ServiceUnavailable)
        );
    }

    #[test]
    fn test_conversions_pick_the_variant() {
        let stanza: Stanza = make_presence("a@example.com/1", "b@example.com").into();
        assert_eq!(stanza.name(), "presence");

        let stanza: Stanza = rejection_notice(jid("a@example.com/1"), None, "no").into();
        assert_eq!(stanza.name(), "message");

        let element = Element::from(stanza);
        assert!(element.is("message", "jabber:client"));
    }

    #[test]
    fn test_rejection_notice_has_body() {
        let notice = rejection_notice(jid("a@example.com/1"), None, "blocked");
        assert_eq!(notice.bodies.get("").map(|b| b.0.as_str()), Some("blocked"));
    }
}
