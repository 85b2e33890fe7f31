//! Service Discovery (XEP-0030) helpers.
//!
//! Components become discoverable through disco#items on the server domain
//! once they have answered the server's disco#info probe.

pub mod info;
pub mod items;

pub use info::{
    build_disco_info_request, build_disco_info_response, is_disco_info_query, muc_service_features,
    parse_identities, Feature, Identity, DISCO_INFO_NS,
};
pub use items::{build_disco_items_response, is_disco_items_query, DiscoItem, DISCO_ITEMS_NS};
