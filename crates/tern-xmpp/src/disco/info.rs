//! disco#info: who an entity is and what it supports.
//!
//! The server asks every newly started component for its disco#info and
//! reads the announced identities back out of the answer.

use jid::Jid;
use minidom::Element;
use tracing::debug;
use xmpp_parsers::iq::{Iq, IqType};

use crate::stanza::iq_result;

pub const DISCO_INFO_NS: &str = "http://jabber.org/protocol/disco#info";

const MUC_NS: &str = "http://jabber.org/protocol/muc";

/// An `<identity/>` of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub category: String,
    pub type_: String,
    pub name: Option<String>,
}

impl Identity {
    pub fn new(category: &str, type_: &str, name: Option<&str>) -> Self {
        Self {
            category: category.to_owned(),
            type_: type_.to_owned(),
            name: name.map(str::to_owned),
        }
    }

    /// `server/im`
    pub fn server(name: Option<&str>) -> Self {
        Self::new("server", "im", name)
    }

    /// `conference/text`
    pub fn muc_service(name: Option<&str>) -> Self {
        Self::new("conference", "text", name)
    }

    fn from_element(element: &Element) -> Option<Self> {
        if !element.is("identity", DISCO_INFO_NS) {
            return None;
        }
        Some(Self::new(
            element.attr("category")?,
            element.attr("type")?,
            element.attr("name"),
        ))
    }
}

impl From<&Identity> for Element {
    fn from(identity: &Identity) -> Self {
        Element::builder("identity", DISCO_INFO_NS)
            .attr("category", identity.category.as_str())
            .attr("type", identity.type_.as_str())
            .attr("name", identity.name.as_deref())
            .build()
    }
}

/// A supported protocol namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature(pub String);

impl Feature {
    pub fn new(var: &str) -> Self {
        Self(var.to_owned())
    }

    pub fn disco_info() -> Self {
        Self::new(DISCO_INFO_NS)
    }

    pub fn disco_items() -> Self {
        Self::new(super::DISCO_ITEMS_NS)
    }

    pub fn muc() -> Self {
        Self::new(MUC_NS)
    }
}

impl From<&Feature> for Element {
    fn from(feature: &Feature) -> Self {
        Element::builder("feature", DISCO_INFO_NS)
            .attr("var", feature.0.as_str())
            .build()
    }
}

pub fn is_disco_info_query(iq: &Iq) -> bool {
    matches!(&iq.payload, IqType::Get(query) if query.is("query", DISCO_INFO_NS))
}

/// A disco#info `get` from `from` asking `to` about itself.
pub fn build_disco_info_request(from: Jid, to: Jid, id: String) -> Iq {
    Iq {
        from: Some(from),
        to: Some(to),
        id,
        payload: IqType::Get(Element::builder("query", DISCO_INFO_NS).build()),
    }
}

/// Answer a disco#info query.
pub fn build_disco_info_response(query: &Iq, identities: &[Identity], features: &[Feature]) -> Iq {
    let payload = Element::builder("query", DISCO_INFO_NS)
        .append_all(identities.iter().map(Element::from))
        .append_all(features.iter().map(Element::from))
        .build();
    iq_result(query, Some(payload))
}

/// Identities announced in a disco#info result, empty for anything else.
pub fn parse_identities(iq: &Iq) -> Vec<Identity> {
    let IqType::Result(Some(query)) = &iq.payload else {
        return Vec::new();
    };
    if !query.is("query", DISCO_INFO_NS) {
        return Vec::new();
    }

    let identities: Vec<Identity> = query.children().filter_map(Identity::from_element).collect();
    debug!(from = ?iq.from, count = identities.len(), "Read disco#info identities");
    identities
}

/// What the MUC service itself supports.
pub fn muc_service_features() -> Vec<Feature> {
    vec![Feature::disco_info(), Feature::disco_items(), Feature::muc()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jid(s: &str) -> Jid {
        s.parse().unwrap()
    }

    fn info_request() -> Iq {
        build_disco_info_request(jid("example.com"), jid("proxy.example.com"), "d1".into())
    }

    #[test]
    fn test_request_is_a_query() {
        assert!(is_disco_info_query(&info_request()));
    }

    #[test]
    fn test_component_answer_yields_identities() {
        let response = build_disco_info_response(
            &info_request(),
            &[Identity::new("proxy", "bytestreams", Some("File proxy"))],
            &[Feature::new("http://jabber.org/protocol/bytestreams")],
        );

        assert_eq!(response.to, Some(jid("example.com")));
        assert_eq!(response.from, Some(jid("proxy.example.com")));
        assert!(!is_disco_info_query(&response));
        assert_eq!(
            parse_identities(&response),
            vec![Identity::new("proxy", "bytestreams", Some("File proxy"))]
        );
    }

    #[test]
    fn test_unnamed_identity_has_no_name_attribute() {
        let element = Element::from(&Identity::server(None));
        assert_eq!(element.attr("category"), Some("server"));
        assert_eq!(element.attr("name"), None);
    }

    #[test]
    fn test_parse_identities_ignores_requests() {
        assert!(parse_identities(&info_request()).is_empty());
    }
}
