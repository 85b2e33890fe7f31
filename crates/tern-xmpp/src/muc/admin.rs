//! MUC admin queries (XEP-0045 §9-10).
//!
//! Role changes are addressed by nick, affiliation changes by bare JID.

use jid::BareJid;
use minidom::Element;
use tracing::{debug, instrument};
use xmpp_parsers::iq::{Iq, IqType};

use crate::types::{Affiliation, Role};
use crate::XmppError;

/// Namespace for MUC admin protocol.
pub const NS_MUC_ADMIN: &str = "http://jabber.org/protocol/muc#admin";

pub fn is_muc_admin_get(iq: &Iq) -> bool {
    matches!(&iq.payload, IqType::Get(elem) if elem.is("query", NS_MUC_ADMIN))
}

pub fn is_muc_admin_set(iq: &Iq) -> bool {
    matches!(&iq.payload, IqType::Set(elem) if elem.is("query", NS_MUC_ADMIN))
}

/// One `<item/>` of an admin query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminItem {
    /// `<item nick='…' role='…'/>`
    Role {
        nick: String,
        role: Role,
        reason: Option<String>,
    },
    /// `<item jid='…' affiliation='…'/>`
    Affiliation {
        jid: BareJid,
        affiliation: Affiliation,
        reason: Option<String>,
    },
    /// `<item affiliation='…'/>` in a get: list everyone with it.
    AffiliationFilter(Affiliation),
}

/// Parse the items of a muc#admin get or set.
#[instrument(skip(iq), fields(iq_id = %iq.id))]
pub fn parse_admin_items(iq: &Iq) -> Result<Vec<AdminItem>, XmppError> {
    let query = match &iq.payload {
        IqType::Get(elem) | IqType::Set(elem) if elem.is("query", NS_MUC_ADMIN) => elem,
        _ => {
            return Err(XmppError::bad_request(Some(
                "expected a muc#admin query".into(),
            )))
        }
    };

    let mut items = Vec::new();
    for child in query.children().filter(|c| c.is("item", NS_MUC_ADMIN)) {
        let reason = child.get_child("reason", NS_MUC_ADMIN).map(Element::text);
        let affiliation = child.attr("affiliation").map(parse_affiliation).transpose()?;
        let role = child.attr("role").map(parse_role).transpose()?;

        let item = match (child.attr("nick"), role, child.attr("jid"), affiliation) {
            (Some(nick), Some(role), _, _) => AdminItem::Role {
                nick: nick.to_string(),
                role,
                reason,
            },
            (_, _, Some(jid), Some(affiliation)) => AdminItem::Affiliation {
                jid: jid.parse::<BareJid>().map_err(|e| {
                    XmppError::bad_request(Some(format!("invalid jid '{jid}': {e}")))
                })?,
                affiliation,
                reason,
            },
            (_, None, None, Some(affiliation)) => AdminItem::AffiliationFilter(affiliation),
            _ => {
                return Err(XmppError::bad_request(Some(
                    "item needs nick+role or jid+affiliation".into(),
                )))
            }
        };
        items.push(item);
    }

    debug!(count = items.len(), "Parsed MUC admin items");
    Ok(items)
}

fn parse_affiliation(s: &str) -> Result<Affiliation, XmppError> {
    match s {
        "owner" => Ok(Affiliation::Owner),
        "admin" => Ok(Affiliation::Admin),
        "member" => Ok(Affiliation::Member),
        "outcast" => Ok(Affiliation::Outcast),
        "none" => Ok(Affiliation::None),
        _ => Err(XmppError::bad_request(Some(format!("unknown affiliation '{s}'")))),
    }
}

fn parse_role(s: &str) -> Result<Role, XmppError> {
    match s {
        "moderator" => Ok(Role::Moderator),
        "participant" => Ok(Role::Participant),
        "visitor" => Ok(Role::Visitor),
        "none" => Ok(Role::None),
        _ => Err(XmppError::bad_request(Some(format!("unknown role '{s}'")))),
    }
}

/// `<query/>` payload listing `(jid, affiliation)` pairs.
pub fn affiliation_list_payload(items: &[(BareJid, Affiliation)]) -> Element {
    items
        .iter()
        .fold(Element::builder("query", NS_MUC_ADMIN), |query, (jid, affiliation)| {
            query.append(
                Element::builder("item", NS_MUC_ADMIN)
                    .attr("jid", jid.to_string())
                    .attr("affiliation", affiliation.as_str())
                    .build(),
            )
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin_iq(set: bool, item: Element) -> Iq {
        let query = Element::builder("query", NS_MUC_ADMIN).append(item).build();
        Iq {
            from: Some("owner@example.com/res".parse().unwrap()),
            to: Some("room@muc.example.com".parse().unwrap()),
            id: "admin-1".to_string(),
            payload: if set { IqType::Set(query) } else { IqType::Get(query) },
        }
    }

    #[test]
    fn test_query_detection() {
        let iq = admin_iq(false, Element::builder("item", NS_MUC_ADMIN).attr("affiliation", "member").build());
        assert!(is_muc_admin_get(&iq));
        assert!(!is_muc_admin_set(&iq));
    }

    #[test]
    fn test_parse_affiliation_item_with_reason() {
        let item = Element::builder("item", NS_MUC_ADMIN)
            .attr("jid", "spammer@example.com")
            .attr("affiliation", "outcast")
            .append(Element::builder("reason", NS_MUC_ADMIN).append("Spamming").build())
            .build();
        let items = parse_admin_items(&admin_iq(true, item)).unwrap();
        assert_eq!(
            items,
            vec![AdminItem::Affiliation {
                jid: "spammer@example.com".parse().unwrap(),
                affiliation: Affiliation::Outcast,
                reason: Some("Spamming".to_string()),
            }]
        );
    }

    #[test]
    fn test_parse_kick_item() {
        let item = Element::builder("item", NS_MUC_ADMIN)
            .attr("nick", "troublemaker")
            .attr("role", "none")
            .build();
        let items = parse_admin_items(&admin_iq(true, item)).unwrap();
        assert!(matches!(
            &items[0],
            AdminItem::Role { nick, role: Role::None, reason: None } if nick == "troublemaker"
        ));
    }

    #[test]
    fn test_parse_filter_and_invalid_items() {
        let item = Element::builder("item", NS_MUC_ADMIN).attr("affiliation", "member").build();
        let items = parse_admin_items(&admin_iq(false, item)).unwrap();
        assert_eq!(items, vec![AdminItem::AffiliationFilter(Affiliation::Member)]);

        let bogus = Element::builder("item", NS_MUC_ADMIN).attr("role", "king").attr("nick", "x").build();
        assert!(parse_admin_items(&admin_iq(true, bogus)).is_err());

        let empty = Element::builder("item", NS_MUC_ADMIN).attr("nick", "x").build();
        assert!(parse_admin_items(&admin_iq(true, empty)).is_err());
    }

    #[test]
    fn test_affiliation_list_payload() {
        let payload = affiliation_list_payload(&[
            ("a@example.com".parse().unwrap(), Affiliation::Owner),
            ("b@example.com".parse().unwrap(), Affiliation::Member),
        ]);
        let items: Vec<_> = payload.children().collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].attr("affiliation"), Some("member"));
    }
}
