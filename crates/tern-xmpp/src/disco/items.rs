//! disco#items: the entities hosted by the server domain.

use minidom::Element;
use xmpp_parsers::iq::{Iq, IqType};

use crate::stanza::iq_result;

pub const DISCO_ITEMS_NS: &str = "http://jabber.org/protocol/disco#items";

/// One `<item/>` listed under the server domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoItem {
    pub jid: String,
    pub name: Option<String>,
}

impl DiscoItem {
    pub fn new(jid: &str, name: Option<&str>) -> Self {
        Self {
            jid: jid.to_owned(),
            name: name.map(str::to_owned),
        }
    }
}

impl From<&DiscoItem> for Element {
    fn from(item: &DiscoItem) -> Self {
        Element::builder("item", DISCO_ITEMS_NS)
            .attr("jid", item.jid.as_str())
            .attr("name", item.name.as_deref())
            .build()
    }
}

pub fn is_disco_items_query(iq: &Iq) -> bool {
    matches!(&iq.payload, IqType::Get(query) if query.is("query", DISCO_ITEMS_NS))
}

/// Answer a disco#items query with `items`, in order.
pub fn build_disco_items_response(query: &Iq, items: &[DiscoItem]) -> Iq {
    let payload = Element::builder("query", DISCO_ITEMS_NS)
        .append_all(items.iter().map(Element::from))
        .build();
    iq_result(query, Some(payload))
}
